use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::*;
use crate::types::*;

#[derive(Default)]
struct Tables {
    events: HashMap<Uuid, DetectionEvent>,
    event_keys: HashMap<(Uuid, String), Uuid>,
    vehicles: HashMap<Uuid, Vehicle>,
    customers: HashMap<Uuid, Customer>,
    sessions: HashMap<Uuid, ParkingSession>,
    guests: HashMap<Uuid, Guest>,
    tokens: HashMap<Uuid, RegistrationToken>,
}

/// In-memory implementation of every store trait.
///
/// Enforces the same uniqueness rules as the PostgreSQL schema and can be told
/// to fail, which makes it the backend for tests and local runs.
#[derive(Default)]
pub struct InMemoryParkingStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
    injected_conflicts: AtomicUsize,
}

impl InMemoryParkingStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a vehicle; the plate is expected normalized
    pub async fn add_vehicle(&self, vehicle: Vehicle) {
        self.tables.write().await.vehicles.insert(vehicle.id, vehicle);
    }

    /// Registers a customer
    pub async fn add_customer(&self, customer: Customer) {
        self.tables
            .write()
            .await
            .customers
            .insert(customer.id, customer);
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// The next `count` session or guest inserts fail with [`StoreError::Conflict`]
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Customer by id, bypassing failure injection
    pub async fn customer(&self, customer_id: &Uuid) -> Option<Customer> {
        self.tables.read().await.customers.get(customer_id).cloned()
    }

    /// Every session ever opened for the vehicle
    pub async fn sessions_for_vehicle(&self, vehicle_id: &Uuid) -> Vec<ParkingSession> {
        self.tables
            .read()
            .await
            .sessions
            .values()
            .filter(|s| s.vehicle_id == *vehicle_id)
            .cloned()
            .collect()
    }

    /// Every guest ever created for the plate, oldest first
    pub async fn guests_for_plate(&self, plate: &str, organization_id: &Uuid) -> Vec<Guest> {
        let mut guests: Vec<Guest> = self
            .tables
            .read()
            .await
            .guests
            .values()
            .filter(|g| g.plate == plate && g.organization_id == *organization_id)
            .cloned()
            .collect();
        guests.sort_by_key(|g| g.created_at);
        guests
    }

    /// Every token ever minted for the customer
    pub async fn tokens_for_customer(&self, customer_id: &Uuid) -> Vec<RegistrationToken> {
        self.tables
            .read()
            .await
            .tokens
            .values()
            .filter(|t| t.customer_id == *customer_id)
            .cloned()
            .collect()
    }

    /// Number of audit records
    pub async fn event_count(&self) -> usize {
        self.tables.read().await.events.len()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EventStore for InMemoryParkingStore {
    async fn record(&self, event: &DetectionEvent) -> StoreResult<RecordedEvent> {
        self.check_available()?;
        let mut tables = self.tables.write().await;

        let key = (event.organization_id, event.external_event_id.clone());
        if let Some(existing) = tables.event_keys.get(&key) {
            return Ok(RecordedEvent {
                id: *existing,
                first_seen: false,
            });
        }

        tables.event_keys.insert(key, event.id);
        tables.events.insert(event.id, event.clone());
        Ok(RecordedEvent {
            id: event.id,
            first_seen: true,
        })
    }
}

#[async_trait]
impl VehicleStore for InMemoryParkingStore {
    async fn find_by_plate(
        &self,
        plate: &str,
        organization_id: &Uuid,
    ) -> StoreResult<Option<Vehicle>> {
        self.check_available()?;
        Ok(self
            .tables
            .read()
            .await
            .vehicles
            .values()
            .find(|v| v.plate == plate && v.organization_id == *organization_id)
            .cloned())
    }
}

#[async_trait]
impl CustomerStore for InMemoryParkingStore {
    async fn find_by_id(&self, customer_id: &Uuid) -> StoreResult<Option<Customer>> {
        self.check_available()?;
        Ok(self.tables.read().await.customers.get(customer_id).cloned())
    }

    async fn find_by_email(
        &self,
        email: &str,
        organization_id: &Uuid,
    ) -> StoreResult<Option<Customer>> {
        self.check_available()?;
        let email = email.trim().to_lowercase();
        Ok(self
            .tables
            .read()
            .await
            .customers
            .values()
            .find(|c| c.organization_id == *organization_id && c.email.to_lowercase() == email)
            .cloned())
    }

    async fn mark_registered(&self, customer_id: &Uuid) -> StoreResult<()> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        if let Some(customer) = tables.customers.get_mut(customer_id) {
            customer.registered = true;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemoryParkingStore {
    async fn find_active_by_vehicle(
        &self,
        vehicle_id: &Uuid,
    ) -> StoreResult<Option<ParkingSession>> {
        self.check_available()?;
        Ok(self
            .tables
            .read()
            .await
            .sessions
            .values()
            .find(|s| s.vehicle_id == *vehicle_id && s.status == SessionStatus::Active)
            .cloned())
    }

    async fn create(&self, session: NewSession) -> StoreResult<ParkingSession> {
        self.check_available()?;
        if self.take_injected_conflict() {
            return Err(StoreError::Conflict("injected session conflict".to_string()));
        }

        let mut tables = self.tables.write().await;
        if tables
            .sessions
            .values()
            .any(|s| s.vehicle_id == session.vehicle_id && s.status == SessionStatus::Active)
        {
            return Err(StoreError::Conflict(format!(
                "vehicle {} already has an active session",
                session.vehicle_id
            )));
        }

        let created = ParkingSession {
            id: Uuid::new_v4(),
            organization_id: session.organization_id,
            vehicle_id: session.vehicle_id,
            customer_id: session.customer_id,
            entry_event_id: session.entry_event_id,
            entry_time: session.entry_time,
            exit_event_id: None,
            exit_time: None,
            status: SessionStatus::Active,
        };
        tables.sessions.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_entry(
        &self,
        session_id: &Uuid,
        entry_event_id: &Uuid,
        entry_time: DateTime<Utc>,
    ) -> StoreResult<ParkingSession> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let session = tables
            .sessions
            .get_mut(session_id)
            .filter(|s| s.status == SessionStatus::Active)
            .ok_or_else(|| StoreError::Conflict(format!("session {} is not active", session_id)))?;

        session.entry_event_id = *entry_event_id;
        session.entry_time = entry_time;
        Ok(session.clone())
    }

    async fn complete(
        &self,
        session_id: &Uuid,
        exit_event_id: &Uuid,
        exit_time: DateTime<Utc>,
    ) -> StoreResult<ParkingSession> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let session = tables
            .sessions
            .get_mut(session_id)
            .filter(|s| s.status == SessionStatus::Active)
            .ok_or_else(|| StoreError::Conflict(format!("session {} is not active", session_id)))?;

        session.status = SessionStatus::Completed;
        session.exit_event_id = Some(*exit_event_id);
        session.exit_time = Some(exit_time);
        Ok(session.clone())
    }
}

#[async_trait]
impl GuestStore for InMemoryParkingStore {
    async fn find_pending(
        &self,
        plate: &str,
        organization_id: &Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Guest>> {
        self.check_available()?;
        Ok(self
            .tables
            .read()
            .await
            .guests
            .values()
            .find(|g| g.plate == plate && g.organization_id == *organization_id && g.is_pending_at(now))
            .cloned())
    }

    async fn find_by_id(&self, guest_id: &Uuid) -> StoreResult<Option<Guest>> {
        self.check_available()?;
        Ok(self.tables.read().await.guests.get(guest_id).cloned())
    }

    async fn create(&self, guest: NewGuest) -> StoreResult<Guest> {
        self.check_available()?;
        if self.take_injected_conflict() {
            return Err(StoreError::Conflict("injected guest conflict".to_string()));
        }

        let mut tables = self.tables.write().await;
        for existing in tables.guests.values_mut().filter(|g| {
            g.plate == guest.plate
                && g.organization_id == guest.organization_id
                && g.status == GuestStatus::PendingConfirmation
        }) {
            if existing.expires_at > guest.created_at {
                return Err(StoreError::Conflict(format!(
                    "plate {} already has a pending guest",
                    guest.plate
                )));
            }
            existing.status = GuestStatus::Expired;
        }

        let created = Guest {
            id: Uuid::new_v4(),
            organization_id: guest.organization_id,
            plate: guest.plate,
            status: GuestStatus::PendingConfirmation,
            expires_at: guest.expires_at,
            confirmed_at: None,
            created_at: guest.created_at,
        };
        tables.guests.insert(created.id, created.clone());
        Ok(created)
    }

    async fn transition(
        &self,
        guest_id: &Uuid,
        expected: GuestStatus,
        next: GuestStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Guest>> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let Some(guest) = tables.guests.get_mut(guest_id).filter(|g| g.status == expected) else {
            return Ok(None);
        };

        guest.status = next;
        if next == GuestStatus::Confirmed {
            guest.confirmed_at = Some(at);
        }
        Ok(Some(guest.clone()))
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let mut expired = 0;
        for guest in tables
            .guests
            .values_mut()
            .filter(|g| g.status == GuestStatus::PendingConfirmation && g.expires_at <= now)
        {
            guest.status = GuestStatus::Expired;
            expired += 1;
        }
        Ok(expired)
    }
}

#[async_trait]
impl TokenStore for InMemoryParkingStore {
    async fn find_unexpired_unused(
        &self,
        customer_id: &Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RegistrationToken>> {
        self.check_available()?;
        Ok(self
            .tables
            .read()
            .await
            .tokens
            .values()
            .find(|t| t.customer_id == *customer_id && t.is_outstanding_at(now))
            .cloned())
    }

    async fn find_by_value(&self, token: &str) -> StoreResult<Option<RegistrationToken>> {
        self.check_available()?;
        Ok(self
            .tables
            .read()
            .await
            .tokens
            .values()
            .find(|t| t.token == token)
            .cloned())
    }

    async fn create(&self, token: NewRegistrationToken) -> StoreResult<RegistrationToken> {
        self.check_available()?;
        let created = RegistrationToken {
            id: Uuid::new_v4(),
            customer_id: token.customer_id,
            token: token.token,
            expires_at: token.expires_at,
            used: false,
        };
        self.tables
            .write()
            .await
            .tokens
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn mark_used_for_customer(&self, customer_id: &Uuid) -> StoreResult<u64> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let mut flipped = 0;
        for token in tables
            .tokens
            .values_mut()
            .filter(|t| t.customer_id == *customer_id && !t.used)
        {
            token.used = true;
            flipped += 1;
        }
        Ok(flipped)
    }
}
