use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Errors raised while delivering email or checking one-time codes.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Simple email service (SES) errors.
    #[error("AWS SES error: {0}")]
    SesError(String),

    /// Invalid email format.
    #[error("Invalid email format")]
    InvalidEmail,

    /// No code was issued for this key, or it was already consumed.
    #[error("Verification code not found")]
    CodeNotFound,

    /// The code outlived its expiry.
    #[error("Verification code has expired")]
    CodeExpired,

    /// More than the allowed number of guesses were made.
    #[error("Too many verification attempts")]
    TooManyAttempts,
}

/// A one-time code awaiting confirmation.
#[derive(Clone)]
pub struct VerificationCode {
    /// The code itself, a 6-digit number.
    pub code: String,
    /// The expiration time of the code.
    pub expires_at: DateTime<Utc>,
    /// The number of attempts made against this code.
    pub attempts: u32,
}

/// Maximum wrong guesses before a code is discarded.
pub const MAX_VERIFICATION_ATTEMPTS: u32 = 3;

/// A thread-safe store for one-time codes, keyed by identity.
pub type VerificationStore = Arc<Mutex<HashMap<String, VerificationCode>>>;

/// Key under which a registration OTP is stored for an identity.
pub fn registration_code_key(organization_id: &uuid::Uuid, email: &str) -> String {
    format!("registration_{}_{}", organization_id, email.trim().to_lowercase())
}

/// Builds the HTML body of the registration invite.
pub fn registration_invite_html(name: &str, registration_url: &str, lifetime_hours: i64) -> String {
    format!(
        r#"
        <html>
        <body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
            <div style="background: #1f2937; padding: 20px; text-align: center;">
                <h1 style="color: white; margin: 0;">ParkPass</h1>
            </div>
            <div style="padding: 30px; background: white;">
                <h2 style="color: #1f2937;">Hi {name}!</h2>
                <p style="font-size: 16px; line-height: 1.6; color: #374151;">
                    One of your vehicles was just detected at a ParkPass location.
                    Finish registering your account so your next visit opens a parking session automatically.
                </p>
                <div style="text-align: center; margin: 30px 0;">
                    <a href="{registration_url}" style="
                        display: inline-block;
                        background: #2563eb;
                        color: white;
                        text-decoration: none;
                        padding: 12px 24px;
                        border-radius: 8px;
                        font-weight: bold;
                        font-size: 16px;
                    ">Complete Registration</a>
                </div>
                <p style="font-size: 14px; color: #6b7280;">
                    This link will expire in {lifetime_hours} hours. If this wasn't your vehicle, you can safely ignore this email.
                </p>
            </div>
        </body>
        </html>
        "#
    )
}

/// Builds the plain-text body of the registration invite.
pub fn registration_invite_text(name: &str, registration_url: &str, lifetime_hours: i64) -> String {
    format!(
        "Hi {name}!\n\nOne of your vehicles was just detected at a ParkPass location.\n\nComplete your registration here:\n{registration_url}\n\nThis link will expire in {lifetime_hours} hours.\n\nParkPass"
    )
}
