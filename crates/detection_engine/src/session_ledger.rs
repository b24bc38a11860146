use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::store::SessionStore;
use crate::types::*;

/// What an entry detection did to the vehicle's session
#[derive(Debug, Clone, PartialEq)]
pub enum EntryResult {
    /// No session was active; a new one was opened
    Opened(ParkingSession),
    /// The active session absorbed the re-entry
    Updated(ParkingSession),
}

/// Owns the parking-session lifecycle. Callers hold the vehicle's plate lock.
pub struct SessionLedger {
    store: Arc<dyn SessionStore>,
}

impl SessionLedger {
    /// Creates a ledger over the given store
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// The vehicle's active session, if any
    pub async fn find_active(
        &self,
        vehicle_id: &Uuid,
    ) -> Result<Option<ParkingSession>, DetectionError> {
        Ok(self.store.find_active_by_vehicle(vehicle_id).await?)
    }

    /// Opens a session, or folds a re-entry into the one already active.
    pub async fn record_entry(
        &self,
        vehicle: &Vehicle,
        event: &DetectionEvent,
    ) -> Result<EntryResult, DetectionError> {
        match self.find_active(&vehicle.id).await? {
            Some(active) => {
                info!(
                    "Vehicle {} re-entered without exit, updating session {}",
                    vehicle.plate, active.id
                );
                let session = self
                    .store
                    .update_entry(&active.id, &event.id, event.timestamp)
                    .await?;
                Ok(EntryResult::Updated(session))
            }
            None => {
                let session = self
                    .store
                    .create(NewSession {
                        organization_id: vehicle.organization_id,
                        vehicle_id: vehicle.id,
                        customer_id: vehicle.customer_id,
                        entry_event_id: event.id,
                        entry_time: event.timestamp,
                    })
                    .await?;
                debug!("Opened session {} for vehicle {}", session.id, vehicle.plate);
                Ok(EntryResult::Opened(session))
            }
        }
    }

    /// Completes the active session. `None` when nothing was active.
    pub async fn record_exit(
        &self,
        vehicle: &Vehicle,
        event: &DetectionEvent,
    ) -> Result<Option<ParkingSession>, DetectionError> {
        let Some(active) = self.find_active(&vehicle.id).await? else {
            info!(
                "Exit for vehicle {} without an active session, nothing to close",
                vehicle.plate
            );
            return Ok(None);
        };

        if !active.status.can_transition_to(SessionStatus::Completed) {
            return Err(DetectionError::InvalidTransition(format!(
                "session {} is {}",
                active.id,
                active.status.as_str()
            )));
        }

        let session = self
            .store
            .complete(&active.id, &event.id, event.timestamp)
            .await?;
        debug!("Completed session {} for vehicle {}", session.id, vehicle.plate);
        Ok(Some(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::InMemoryParkingStore;
    use chrono::{Duration, Utc};

    fn vehicle() -> Vehicle {
        Vehicle {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            plate: "AB123".to_string(),
            customer_id: Uuid::new_v4(),
            label: None,
            brand: None,
            model: None,
        }
    }

    fn event(vehicle: &Vehicle, direction: Direction, minutes: i64) -> DetectionEvent {
        DetectionEvent {
            id: Uuid::new_v4(),
            organization_id: vehicle.organization_id,
            external_event_id: Uuid::new_v4().to_string(),
            plate: vehicle.plate.clone(),
            timestamp: Utc::now() + Duration::minutes(minutes),
            camera_id: "cam-1".to_string(),
            location_label: "Gate A".to_string(),
            direction,
            image_ref: None,
            confidence: 0.97,
            device_type: "anpr".to_string(),
        }
    }

    #[tokio::test]
    async fn test_entry_then_reentry_then_exit() {
        let store = Arc::new(InMemoryParkingStore::new());
        let ledger = SessionLedger::new(store.clone());
        let vehicle = vehicle();

        let first = event(&vehicle, Direction::Entry, 0);
        let EntryResult::Opened(opened) = ledger.record_entry(&vehicle, &first).await.unwrap() else {
            panic!("first entry must open a session");
        };

        let second = event(&vehicle, Direction::Entry, 5);
        let updated = ledger.record_entry(&vehicle, &second).await.unwrap();
        let EntryResult::Updated(session) = updated else {
            panic!("re-entry must fold into the active session");
        };
        assert_eq!(session.id, opened.id);
        assert_eq!(session.entry_event_id, second.id);
        assert_eq!(session.entry_time, second.timestamp);

        let exit = event(&vehicle, Direction::Exit, 60);
        let completed = ledger.record_exit(&vehicle, &exit).await.unwrap().unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
        assert_eq!(completed.exit_event_id, Some(exit.id));
        assert!(ledger.find_active(&vehicle.id).await.unwrap().is_none());
        assert_eq!(store.sessions_for_vehicle(&vehicle.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_exit_without_session_is_not_an_error() {
        let store = Arc::new(InMemoryParkingStore::new());
        let ledger = SessionLedger::new(store.clone());
        let vehicle = vehicle();

        let exit = event(&vehicle, Direction::Exit, 0);
        assert!(ledger.record_exit(&vehicle, &exit).await.unwrap().is_none());
        assert!(store.sessions_for_vehicle(&vehicle.id).await.is_empty());
    }
}
