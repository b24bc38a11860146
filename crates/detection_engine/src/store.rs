//! Persistence contracts consumed by the engine.
//!
//! Every lookup is qualified by organization, either directly or through an
//! organization-scoped parent (vehicle, customer). Implementations live in the
//! `postgres` crate and in [`crate::memory_store`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::*;

/// Result alias for store calls
pub type StoreResult<T> = Result<T, StoreError>;

/// Audit trail of detections
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert-if-absent keyed by (organization, external event id).
    async fn record(&self, event: &DetectionEvent) -> StoreResult<RecordedEvent>;
}

/// Read-only view of registered vehicles
#[async_trait]
pub trait VehicleStore: Send + Sync {
    /// Vehicle with this normalized plate in the organization
    async fn find_by_plate(&self, plate: &str, organization_id: &Uuid)
    -> StoreResult<Option<Vehicle>>;
}

/// Customer lookups and the registration flag
#[async_trait]
pub trait CustomerStore: Send + Sync {
    /// Customer by id
    async fn find_by_id(&self, customer_id: &Uuid) -> StoreResult<Option<Customer>>;

    /// Customer by email within an organization, case-insensitive
    async fn find_by_email(
        &self,
        email: &str,
        organization_id: &Uuid,
    ) -> StoreResult<Option<Customer>>;

    /// Sets `registered = true`
    async fn mark_registered(&self, customer_id: &Uuid) -> StoreResult<()>;
}

/// Parking session persistence
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The vehicle's `active` session, if any
    async fn find_active_by_vehicle(&self, vehicle_id: &Uuid)
    -> StoreResult<Option<ParkingSession>>;

    /// Opens a session. Fails with [`StoreError::Conflict`] if the vehicle already has an active one.
    async fn create(&self, session: NewSession) -> StoreResult<ParkingSession>;

    /// Replaces the entry reference and time of an active session
    async fn update_entry(
        &self,
        session_id: &Uuid,
        entry_event_id: &Uuid,
        entry_time: DateTime<Utc>,
    ) -> StoreResult<ParkingSession>;

    /// Marks an active session completed with the exit reference and time
    async fn complete(
        &self,
        session_id: &Uuid,
        exit_event_id: &Uuid,
        exit_time: DateTime<Utc>,
    ) -> StoreResult<ParkingSession>;
}

/// Guest persistence
#[async_trait]
pub trait GuestStore: Send + Sync {
    /// Pending guest for (plate, organization) whose window is still open at `now`
    async fn find_pending(
        &self,
        plate: &str,
        organization_id: &Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Guest>>;

    /// Guest by id
    async fn find_by_id(&self, guest_id: &Uuid) -> StoreResult<Option<Guest>>;

    /// Creates a pending guest. Fails with [`StoreError::Conflict`] if an open one exists.
    async fn create(&self, guest: NewGuest) -> StoreResult<Guest>;

    /// Compare-and-set of the status. Returns `None` when the current status is not `expected`.
    async fn transition(
        &self,
        guest_id: &Uuid,
        expected: GuestStatus,
        next: GuestStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Guest>>;

    /// Moves every pending guest whose window closed before `now` to `Expired`
    async fn expire_overdue(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// Registration token persistence
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// The customer's unused token that is still valid at `now`
    async fn find_unexpired_unused(
        &self,
        customer_id: &Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RegistrationToken>>;

    /// Token by its opaque value
    async fn find_by_value(&self, token: &str) -> StoreResult<Option<RegistrationToken>>;

    /// Persists a freshly minted token
    async fn create(&self, token: NewRegistrationToken) -> StoreResult<RegistrationToken>;

    /// Flips every unused token of the customer to used; returns how many changed
    async fn mark_used_for_customer(&self, customer_id: &Uuid) -> StoreResult<u64>;
}

/// The full set of collaborators the engine needs
#[derive(Clone)]
pub struct ParkingStores {
    /// Audit trail
    pub events: Arc<dyn EventStore>,
    /// Vehicles
    pub vehicles: Arc<dyn VehicleStore>,
    /// Customers
    pub customers: Arc<dyn CustomerStore>,
    /// Sessions
    pub sessions: Arc<dyn SessionStore>,
    /// Guests
    pub guests: Arc<dyn GuestStore>,
    /// Registration tokens
    pub tokens: Arc<dyn TokenStore>,
}

impl ParkingStores {
    /// Uses one backend for every collaborator
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: EventStore + VehicleStore + CustomerStore + SessionStore + GuestStore + TokenStore + 'static,
    {
        Self {
            events: store.clone(),
            vehicles: store.clone(),
            customers: store.clone(),
            sessions: store.clone(),
            guests: store.clone(),
            tokens: store,
        }
    }
}
