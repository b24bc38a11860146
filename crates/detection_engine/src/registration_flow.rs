use std::sync::Arc;

use chrono::{DateTime, Utc};
use notification_services::NotificationService;
use tracing::{info, warn};

use crate::locks::{KeyedLocks, customer_key};
use crate::store::{CustomerStore, TokenStore};
use crate::types::*;

/// Outcome of [`RegistrationFlow::issue_if_absent`]
#[derive(Debug, Clone, PartialEq)]
pub enum TokenIssue {
    /// Freshly minted; the caller sends the invite
    NewlyIssued(RegistrationToken),
    /// A token was already outstanding; the caller stays quiet
    AlreadyIssued(RegistrationToken),
}

/// Issues registration tokens and completes registrations.
///
/// Token reads and writes for one customer are serialized on the customer key,
/// so two vehicles of the same customer detected at once still yield one token.
pub struct RegistrationFlow {
    tokens: Arc<dyn TokenStore>,
    customers: Arc<dyn CustomerStore>,
    locks: KeyedLocks,
    token_lifetime: chrono::Duration,
}

impl RegistrationFlow {
    /// Creates the flow; `locks` is shared with the processor
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        customers: Arc<dyn CustomerStore>,
        locks: KeyedLocks,
        token_lifetime: chrono::Duration,
    ) -> Self {
        Self {
            tokens,
            customers,
            locks,
            token_lifetime,
        }
    }

    /// Mints a token unless the customer already has an outstanding one
    pub async fn issue_if_absent(
        &self,
        customer: &Customer,
        now: DateTime<Utc>,
    ) -> Result<TokenIssue, DetectionError> {
        let _guard = self.locks.lock(customer_key(&customer.id)).await;

        if let Some(existing) = self.tokens.find_unexpired_unused(&customer.id, now).await? {
            return Ok(TokenIssue::AlreadyIssued(existing));
        }

        let expires_at = now.checked_add_signed(self.token_lifetime).ok_or_else(|| {
            DetectionError::ConfigError(format!(
                "token lifetime {} overflows from {}",
                self.token_lifetime, now
            ))
        })?;

        let token = self
            .tokens
            .create(NewRegistrationToken {
                customer_id: customer.id,
                token: NotificationService::generate_registration_token(),
                expires_at,
            })
            .await?;

        info!(
            "Issued registration token for customer {} valid until {}",
            customer.id, token.expires_at
        );
        Ok(TokenIssue::NewlyIssued(token))
    }

    /// Resolves a registration link to its token and customer.
    ///
    /// Used, expired and unknown tokens are all rejected the same way.
    pub async fn validate_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(RegistrationToken, Customer), DetectionError> {
        let invalid =
            || DetectionError::Validation("Registration link has expired or is invalid".to_string());

        let token = self
            .tokens
            .find_by_value(token)
            .await?
            .filter(|t| t.is_outstanding_at(now))
            .ok_or_else(invalid)?;

        let customer = self
            .customers
            .find_by_id(&token.customer_id)
            .await?
            .ok_or_else(|| DetectionError::NotFound("Customer".to_string()))?;

        Ok((token, customer))
    }

    /// Completes registration for the identity behind `email`.
    ///
    /// Flips every unused token of the customer to used and sets the
    /// `registered` flag. Returns the number of tokens consumed.
    pub async fn mark_used_by_identity(
        &self,
        email: &str,
        organization_id: &uuid::Uuid,
    ) -> Result<u64, DetectionError> {
        let customer = self
            .customers
            .find_by_email(email, organization_id)
            .await?
            .ok_or_else(|| DetectionError::NotFound("Customer".to_string()))?;

        let _guard = self.locks.lock(customer_key(&customer.id)).await;

        let consumed = self.tokens.mark_used_for_customer(&customer.id).await?;
        if consumed == 0 {
            warn!(
                "Customer {} completed verification without an outstanding token",
                customer.id
            );
        }

        self.customers.mark_registered(&customer.id).await?;
        info!("Customer {} is now registered", customer.id);

        Ok(consumed)
    }
}
