use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::{EngineConfig, RedeliveryPolicy};
use crate::guest_ledger::GuestLedger;
use crate::locks::{KeyedLocks, plate_key};
use crate::outbox::{NotificationOutbox, OutboundNotification};
use crate::plate::normalize;
use crate::registration_flow::{RegistrationFlow, TokenIssue};
use crate::session_ledger::{EntryResult, SessionLedger};
use crate::store::{CustomerStore, EventStore, ParkingStores, VehicleStore};
use crate::types::*;

/// What one decision produced: the outcome plus at most one side effect
struct Decision {
    outcome: DetectionOutcome,
    notification: Option<OutboundNotification>,
}

impl Decision {
    fn quiet(event: &DetectionEvent, action: OutcomeAction, details: OutcomeDetails) -> Self {
        Self {
            outcome: DetectionOutcome {
                event_id: event.id,
                is_guest_entry: false,
                action,
                details,
            },
            notification: None,
        }
    }
}

/// Turns detections into session, guest and registration transitions.
///
/// Holds no state of its own between calls: every decision is re-derived from
/// the stores while the plate's lock is held.
pub struct DetectionProcessor {
    engine: Arc<Engine>,
}

struct Engine {
    events: Arc<dyn EventStore>,
    vehicles: Arc<dyn VehicleStore>,
    customers: Arc<dyn CustomerStore>,
    sessions: SessionLedger,
    guests: GuestLedger,
    registration: RegistrationFlow,
    outbox: NotificationOutbox,
    locks: KeyedLocks,
    config: EngineConfig,
}

impl DetectionProcessor {
    /// Wires the ledgers over `stores`
    pub fn new(stores: ParkingStores, outbox: NotificationOutbox, config: EngineConfig) -> Self {
        let locks = KeyedLocks::new();

        let engine = Engine {
            sessions: SessionLedger::new(stores.sessions),
            guests: GuestLedger::new(stores.guests, config.guest_confirmation_window),
            registration: RegistrationFlow::new(
                stores.tokens,
                stores.customers.clone(),
                locks.clone(),
                config.registration_token_lifetime,
            ),
            events: stores.events,
            vehicles: stores.vehicles,
            customers: stores.customers,
            outbox,
            locks,
            config,
        };

        Self {
            engine: Arc::new(engine),
        }
    }

    /// Guest ledger, for confirmation and expiry outside the detection path
    pub fn guests(&self) -> &GuestLedger {
        &self.engine.guests
    }

    /// Registration flow, for the verification endpoints
    pub fn registration(&self) -> &RegistrationFlow {
        &self.engine.registration
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.engine.config
    }

    /// Processes one detection end to end.
    ///
    /// The audit record is written first; if that fails nothing else happens.
    /// The decision then runs on its own task so that a caller-side timeout
    /// never cancels it between a committed write and the notification that
    /// write implies. The caller still sees [`DetectionError::Timeout`].
    pub async fn process_detection(
        &self,
        request: ProcessDetectionRequest,
    ) -> Result<DetectionOutcome, DetectionError> {
        request
            .validate()
            .map_err(|e| DetectionError::Validation(format!("Validation error: {}", e)))?;

        let engine = &self.engine;
        let mut event = engine.build_event(request)?;

        let recorded = engine
            .bounded(async { engine.events.record(&event).await.map_err(DetectionError::from) })
            .await
            .inspect_err(|e| error!("Failed to record detection {}: {}", event.external_event_id, e))?;
        event.id = recorded.id;

        if !recorded.first_seen {
            match engine.config.redelivery_policy {
                RedeliveryPolicy::Ignore => {
                    info!(
                        "Ignoring redelivered event {} for plate {}",
                        event.external_event_id, event.plate
                    );
                    return Ok(Decision::quiet(
                        &event,
                        OutcomeAction::DuplicateEvent,
                        OutcomeDetails::default(),
                    )
                    .outcome);
                }
                RedeliveryPolicy::Reprocess => {
                    debug!(
                        "Event {} was already recorded, processing as a fresh observation",
                        event.external_event_id
                    );
                }
            }
        }

        let external_event_id = event.external_event_id.clone();
        let settling = engine.clone();
        let task = tokio::spawn(async move { settling.settle(event).await });

        match tokio::time::timeout(engine.config.store_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("Decision task for detection {} failed: {}", external_event_id, e);
                Err(DetectionError::Internal(e.to_string()))
            }
            Err(_) => {
                warn!(
                    "Detection {} not settled within {:?}, finishing in the background",
                    external_event_id, engine.config.store_timeout
                );
                Err(DetectionError::Timeout(engine.config.store_timeout))
            }
        }
    }
}

impl Engine {
    /// Decides under the plate lock, retries a lost race once and queues the
    /// notification only after every write succeeded.
    async fn settle(&self, event: DetectionEvent) -> Result<DetectionOutcome, DetectionError> {
        let _guard = self
            .locks
            .lock(plate_key(&event.organization_id, &event.plate))
            .await;

        let decision = match self.decide(&event).await {
            Err(e) if e.is_conflict() => {
                warn!(
                    "Write race on plate {} ({}), retrying from a fresh read",
                    event.plate, e
                );
                self.decide(&event).await
            }
            other => other,
        }
        .inspect_err(|e| error!("Failed to process detection {}: {}", event.external_event_id, e))?;

        if let Some(notification) = decision.notification {
            self.outbox.enqueue(notification);
        }

        info!(
            "Detection {} ({} {}) -> {}",
            event.external_event_id,
            event.plate,
            event.direction.as_str(),
            decision.outcome.action
        );
        Ok(decision.outcome)
    }

    fn build_event(&self, request: ProcessDetectionRequest) -> Result<DetectionEvent, DetectionError> {
        let direction = request
            .direction
            .ok_or_else(|| DetectionError::Validation("Direction is required".to_string()))?;

        let plate = normalize(&request.plate);
        if plate.is_empty() {
            return Err(DetectionError::Validation(
                "Plate is empty after normalization".to_string(),
            ));
        }

        Ok(DetectionEvent {
            id: Uuid::new_v4(),
            organization_id: request
                .organization_id
                .unwrap_or(self.config.default_organization_id),
            external_event_id: request.external_event_id,
            plate,
            timestamp: request.timestamp_utc,
            camera_id: request.camera_id,
            location_label: request.location_label,
            direction,
            image_ref: request.image_ref,
            confidence: request.confidence,
            device_type: request.device_type,
        })
    }

    async fn bounded<T>(
        &self,
        work: impl Future<Output = Result<T, DetectionError>>,
    ) -> Result<T, DetectionError> {
        tokio::time::timeout(self.config.store_timeout, work)
            .await
            .map_err(|_| DetectionError::Timeout(self.config.store_timeout))?
    }

    async fn decide(&self, event: &DetectionEvent) -> Result<Decision, DetectionError> {
        let Some(vehicle) = self
            .vehicles
            .find_by_plate(&event.plate, &event.organization_id)
            .await?
        else {
            return self.guest_path(event).await;
        };

        let Some(customer) = self
            .customers
            .find_by_id(&vehicle.customer_id)
            .await?
            .filter(|c| c.organization_id == event.organization_id)
        else {
            warn!(
                "Vehicle {} resolved but owner {} is missing, nothing to do",
                vehicle.plate, vehicle.customer_id
            );
            return Ok(Decision::quiet(
                event,
                OutcomeAction::NoAction,
                OutcomeDetails::default(),
            ));
        };

        if !customer.registered {
            return self.registration_path(event, &customer).await;
        }

        let details = OutcomeDetails {
            customer_id: Some(customer.id),
            ..Default::default()
        };

        match event.direction {
            Direction::Entry => {
                let (action, session) = match self.sessions.record_entry(&vehicle, event).await? {
                    EntryResult::Opened(session) => (OutcomeAction::ParkingSessionCreated, session),
                    EntryResult::Updated(session) => (OutcomeAction::ParkingSessionUpdated, session),
                };
                Ok(Decision::quiet(
                    event,
                    action,
                    OutcomeDetails {
                        session_id: Some(session.id),
                        ..details
                    },
                ))
            }
            Direction::Exit => {
                let completed = self.sessions.record_exit(&vehicle, event).await?;
                Ok(Decision::quiet(
                    event,
                    OutcomeAction::ExitProcessed,
                    OutcomeDetails {
                        session_id: completed.map(|s| s.id),
                        ..details
                    },
                ))
            }
        }
    }

    async fn registration_path(
        &self,
        event: &DetectionEvent,
        customer: &Customer,
    ) -> Result<Decision, DetectionError> {
        let details = OutcomeDetails {
            customer_id: Some(customer.id),
            ..Default::default()
        };

        match self.registration.issue_if_absent(customer, Utc::now()).await? {
            TokenIssue::NewlyIssued(token) => {
                let mut decision =
                    Decision::quiet(event, OutcomeAction::RegistrationEmailSent, details);
                decision.notification = Some(OutboundNotification::RegistrationInvite {
                    customer_id: customer.id,
                    email: customer.email.clone(),
                    name: customer.name.clone(),
                    token: token.token,
                });
                Ok(decision)
            }
            TokenIssue::AlreadyIssued(_) => {
                info!(
                    "Registration invite already outstanding for customer {}, not resending",
                    customer.id
                );
                Ok(Decision::quiet(
                    event,
                    OutcomeAction::RegistrationEmailSuppressed,
                    details,
                ))
            }
        }
    }

    async fn guest_path(&self, event: &DetectionEvent) -> Result<Decision, DetectionError> {
        match event.direction {
            Direction::Entry => {
                let guest = self
                    .guests
                    .admit(&event.plate, &event.organization_id, Utc::now())
                    .await?;
                let mut decision = Decision::quiet(
                    event,
                    OutcomeAction::GuestCreated,
                    OutcomeDetails {
                        guest_id: Some(guest.id),
                        ..Default::default()
                    },
                );
                decision.outcome.is_guest_entry = true;
                Ok(decision)
            }
            Direction::Exit => Ok(Decision::quiet(
                event,
                OutcomeAction::ExitProcessed,
                OutcomeDetails::default(),
            )),
        }
    }
}
