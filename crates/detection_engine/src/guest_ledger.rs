use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::GuestStore;
use crate::types::*;

/// Owns the pending / confirmed / expired lifecycle of guests.
pub struct GuestLedger {
    store: Arc<dyn GuestStore>,
    confirmation_window: chrono::Duration,
}

impl GuestLedger {
    /// Creates a ledger whose new guests stay pending for `confirmation_window`
    pub fn new(store: Arc<dyn GuestStore>, confirmation_window: chrono::Duration) -> Self {
        Self {
            store,
            confirmation_window,
        }
    }

    /// Pending guest for the plate whose window is open at `now`
    pub async fn find_pending(
        &self,
        plate: &str,
        organization_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Guest>, DetectionError> {
        Ok(self.store.find_pending(plate, organization_id, now).await?)
    }

    /// Returns the open pending guest for the plate, creating one if none exists.
    ///
    /// The caller holds the plate lock.
    pub async fn admit(
        &self,
        plate: &str,
        organization_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<Guest, DetectionError> {
        if let Some(existing) = self.find_pending(plate, organization_id, now).await? {
            debug!("Reusing pending guest {} for plate {}", existing.id, plate);
            return Ok(existing);
        }

        let expires_at = now
            .checked_add_signed(self.confirmation_window)
            .ok_or_else(|| {
                DetectionError::ConfigError(format!(
                    "confirmation window {} overflows from {}",
                    self.confirmation_window, now
                ))
            })?;

        let guest = self
            .store
            .create(NewGuest {
                organization_id: *organization_id,
                plate: plate.to_string(),
                expires_at,
                created_at: now,
            })
            .await?;

        info!(
            "Created guest {} for plate {}, pending until {}",
            guest.id, plate, guest.expires_at
        );
        Ok(guest)
    }

    /// Confirms a pending guest inside its window.
    ///
    /// A guest whose window already closed is expired on the spot and the
    /// confirmation is refused.
    pub async fn confirm(
        &self,
        organization_id: &Uuid,
        guest_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<Guest, DetectionError> {
        let guest = self
            .store
            .find_by_id(guest_id)
            .await?
            .filter(|g| g.organization_id == *organization_id)
            .ok_or_else(|| DetectionError::NotFound("Guest".to_string()))?;

        if guest.status == GuestStatus::PendingConfirmation && guest.expires_at <= now {
            self.store
                .transition(guest_id, GuestStatus::PendingConfirmation, GuestStatus::Expired, now)
                .await?;
            return Err(DetectionError::InvalidTransition(format!(
                "guest {} confirmation window closed at {}",
                guest.id, guest.expires_at
            )));
        }

        if !guest.status.can_transition_to(GuestStatus::Confirmed) {
            return Err(DetectionError::InvalidTransition(format!(
                "guest {} is {}",
                guest.id,
                guest.status.as_str()
            )));
        }

        self.store
            .transition(guest_id, GuestStatus::PendingConfirmation, GuestStatus::Confirmed, now)
            .await?
            .ok_or_else(|| {
                DetectionError::InvalidTransition(format!(
                    "guest {} changed state during confirmation",
                    guest_id
                ))
            })
    }

    /// Expires every pending guest whose window closed before `now`
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, DetectionError> {
        let expired = self.store.expire_overdue(now).await?;
        if expired > 0 {
            info!("Expired {} overdue guests", expired);
        }
        Ok(expired)
    }
}
