//! # Notification Services
//!
//! Outbound email for the parking platform: registration invites sent when an
//! unregistered customer's vehicle is detected, and the one-time codes that
//! complete the registration.

/// SES-backed delivery plus token and code generation.
pub mod service;
/// Error type, verification code store and email templates.
pub mod types;

pub use service::{NotificationService, create_verification_store, store_verification_code, verify_code};
pub use types::{NotificationError, VerificationStore};
