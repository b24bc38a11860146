use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use notification_services::{NotificationError, NotificationService};
use tracing::info;

/// Delivery of the "vehicle detected, please register" invite
#[async_trait]
pub trait RegistrationNotifier: Send + Sync {
    /// Sends one invite carrying the registration token
    async fn send_registration_invite(
        &self,
        email: &str,
        name: &str,
        token: &str,
    ) -> Result<(), NotificationError>;
}

#[async_trait]
impl RegistrationNotifier for NotificationService {
    async fn send_registration_invite(
        &self,
        email: &str,
        name: &str,
        token: &str,
    ) -> Result<(), NotificationError> {
        NotificationService::send_registration_invite(self, email, name, token).await
    }
}

/// An invite captured by [`RecordingNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentInvite {
    /// Recipient
    pub email: String,
    /// Recipient name
    pub name: String,
    /// Registration token in the link
    pub token: String,
}

/// Notifier for development and tests: logs and keeps every invite
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentInvite>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    /// Creates a notifier that accepts every invite
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent sends fail, as an SES outage would
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Invites accepted so far
    pub fn sent(&self) -> Vec<SentInvite> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl RegistrationNotifier for RecordingNotifier {
    async fn send_registration_invite(
        &self,
        email: &str,
        name: &str,
        token: &str,
    ) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::SesError("simulated outage".to_string()));
        }

        info!("📧 [MOCK EMAIL] Registration invite to {} ({})", email, name);
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(SentInvite {
                email: email.to_string(),
                name: name.to_string(),
                token: token.to_string(),
            });
        Ok(())
    }
}
