use crate::types::*;
use aws_config::BehaviorVersion;
use aws_sdk_ses::Client as SesClient;
use chrono::{Duration, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

/// Notification service for sending registration emails.
#[derive(Debug, Clone)]
pub struct NotificationService {
    ses_client: SesClient,
    from_email: String,
    registration_base_url: String,
    invite_lifetime_hours: i64,
}

impl NotificationService {
    /// Creates a new instance of the NotificationService with the SES client initialized.
    pub async fn new(invite_lifetime_hours: i64) -> Result<Self, NotificationError> {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        let ses_client = SesClient::new(&config);

        let from_email = std::env::var("FROM_EMAIL")
            .unwrap_or_else(|_| "noreply@parkpass.example".to_string());
        let registration_base_url = std::env::var("REGISTRATION_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080/register".to_string());

        Ok(Self {
            ses_client,
            from_email,
            registration_base_url,
            invite_lifetime_hours,
        })
    }

    /// Sends the "vehicle detected, please register" invite carrying the registration link.
    pub async fn send_registration_invite(
        &self,
        email: &str,
        name: &str,
        registration_token: &str,
    ) -> Result<(), NotificationError> {
        if !email.contains('@') {
            return Err(NotificationError::InvalidEmail);
        }

        log::info!("📧 Sending registration invite to {}", email);

        let registration_url = format!(
            "{}?token={}",
            self.registration_base_url, registration_token
        );

        let html_body =
            registration_invite_html(name, &registration_url, self.invite_lifetime_hours);
        let text_body =
            registration_invite_text(name, &registration_url, self.invite_lifetime_hours);

        self.send_email(
            email,
            "Your vehicle was detected - complete your ParkPass registration",
            html_body,
            text_body,
        )
        .await
    }

    /// Sends the one-time code that completes a registration.
    pub async fn send_registration_otp(
        &self,
        email: &str,
        name: &str,
        code: &str,
    ) -> Result<(), NotificationError> {
        if !email.contains('@') {
            return Err(NotificationError::InvalidEmail);
        }

        log::info!("📧 Sending registration code to {}", email);

        let text_body = format!(
            "Hi {}!\n\nYour ParkPass verification code is: {}\n\nThis code expires in 10 minutes.\n\nIf you didn't request this, ignore this message.",
            name, code
        );
        let html_body = format!(
            "<html><body style=\"font-family: Arial, sans-serif;\"><p>Hi {}!</p><p>Your ParkPass verification code is: <strong>{}</strong></p><p>This code expires in 10 minutes.</p></body></html>",
            name, code
        );

        self.send_email(email, "Your ParkPass verification code", html_body, text_body)
            .await
    }

    async fn send_email(
        &self,
        email: &str,
        subject: &str,
        html_body: String,
        text_body: String,
    ) -> Result<(), NotificationError> {
        let subject_content = aws_sdk_ses::types::Content::builder()
            .data(subject)
            .build()
            .map_err(|e| {
                log::error!("❌ Failed to build subject content: {}", e);
                NotificationError::SesError(format!("Failed to build subject: {}", e))
            })?;

        let html_content = aws_sdk_ses::types::Content::builder()
            .data(html_body)
            .build()
            .map_err(|e| {
                log::error!("❌ Failed to build HTML content: {}", e);
                NotificationError::SesError(format!("Failed to build HTML body: {}", e))
            })?;

        let text_content = aws_sdk_ses::types::Content::builder()
            .data(text_body)
            .build()
            .map_err(|e| {
                log::error!("❌ Failed to build text content: {}", e);
                NotificationError::SesError(format!("Failed to build text body: {}", e))
            })?;

        let body = aws_sdk_ses::types::Body::builder()
            .html(html_content)
            .text(text_content)
            .build();

        let message = aws_sdk_ses::types::Message::builder()
            .subject(subject_content)
            .body(body)
            .build();

        let destination = aws_sdk_ses::types::Destination::builder()
            .to_addresses(email)
            .build();

        let result = self
            .ses_client
            .send_email()
            .source(&self.from_email)
            .destination(destination)
            .message(message)
            .send()
            .await;

        match result {
            Ok(output) => {
                log::info!(
                    "✅ Email sent to {} (SES Message ID: {})",
                    email,
                    output.message_id()
                );
                Ok(())
            }
            Err(e) => {
                log::error!("❌ AWS SES error: {:#?}", e);
                let error_msg = if let Some(service_error) = e.as_service_error() {
                    format!("AWS SES service error: {:?}", service_error)
                } else {
                    format!("AWS SES error: {}", e)
                };
                Err(NotificationError::SesError(error_msg))
            }
        }
    }

    /// Generates a random 6-digit verification code.
    pub fn generate_verification_code() -> String {
        use rand::Rng;
        let mut rng = rand::rng();
        format!("{:06}", rng.random_range(100000..=999999))
    }

    /// Generates a 32-character alphanumeric token for registration links.
    pub fn generate_registration_token() -> String {
        use rand::Rng;
        let mut rng = rand::rng();
        (0..32)
            .map(|_| {
                let chars = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
                chars[rng.random_range(0..chars.len())] as char
            })
            .collect()
    }
}

/// A thread-safe store for verification codes, allowing concurrent access.
pub fn create_verification_store() -> VerificationStore {
    Arc::new(Mutex::new(HashMap::new()))
}

fn lock_store(store: &VerificationStore) -> MutexGuard<'_, HashMap<String, VerificationCode>> {
    // A panic while holding the lock leaves the map itself intact.
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Stores a code under `key`, replacing any previous one.
pub fn store_verification_code(
    store: &VerificationStore,
    key: &str,
    code: &str,
    expires_in_minutes: i64,
) {
    let verification = VerificationCode {
        code: code.to_string(),
        expires_at: Utc::now() + Duration::minutes(expires_in_minutes),
        attempts: 0,
    };

    lock_store(store).insert(key.to_string(), verification);
}

/// Verifies the provided code against the stored verification code.
///
/// A matching code is consumed. Expired codes and codes guessed more than
/// [`MAX_VERIFICATION_ATTEMPTS`] times are discarded.
pub fn verify_code(
    store: &VerificationStore,
    key: &str,
    provided_code: &str,
) -> Result<bool, NotificationError> {
    let mut store = lock_store(store);

    let verification = store.get_mut(key).ok_or(NotificationError::CodeNotFound)?;

    if verification.expires_at < Utc::now() {
        store.remove(key);
        return Err(NotificationError::CodeExpired);
    }

    verification.attempts += 1;

    if verification.attempts > MAX_VERIFICATION_ATTEMPTS {
        store.remove(key);
        return Err(NotificationError::TooManyAttempts);
    }

    if verification.code == provided_code {
        store.remove(key);
        Ok(true)
    } else {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_have_expected_shape() {
        let code = NotificationService::generate_verification_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        let token = NotificationService::generate_registration_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, NotificationService::generate_registration_token());
    }

    #[test]
    fn test_code_is_consumed_on_success() {
        let store = create_verification_store();
        store_verification_code(&store, "k", "123456", 10);

        assert!(!verify_code(&store, "k", "000000").unwrap());
        assert!(verify_code(&store, "k", "123456").unwrap());
        assert!(matches!(
            verify_code(&store, "k", "123456"),
            Err(NotificationError::CodeNotFound)
        ));
    }

    #[test]
    fn test_expired_code_is_rejected() {
        let store = create_verification_store();
        store_verification_code(&store, "k", "123456", -1);

        assert!(matches!(
            verify_code(&store, "k", "123456"),
            Err(NotificationError::CodeExpired)
        ));
    }

    #[test]
    fn test_too_many_attempts() {
        let store = create_verification_store();
        store_verification_code(&store, "k", "123456", 10);

        for _ in 0..MAX_VERIFICATION_ATTEMPTS {
            assert!(!verify_code(&store, "k", "999999").unwrap());
        }
        assert!(matches!(
            verify_code(&store, "k", "123456"),
            Err(NotificationError::TooManyAttempts)
        ));
    }

    #[test]
    fn test_registration_key_is_case_insensitive() {
        let org = uuid::Uuid::new_v4();
        assert_eq!(
            registration_code_key(&org, " Jane@Example.com"),
            registration_code_key(&org, "jane@example.com")
        );
    }
}
