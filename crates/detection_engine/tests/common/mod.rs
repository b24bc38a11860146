#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use detection_engine::*;
use uuid::Uuid;

pub struct Harness {
    pub store: Arc<InMemoryParkingStore>,
    pub processor: Arc<DetectionProcessor>,
    pub dispatcher: OutboxDispatcher,
    pub notifier: Arc<RecordingNotifier>,
    pub org: Uuid,
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    harness_with_stores(config, |_| {})
}

/// Lets a test swap individual collaborators before the processor is built
pub fn harness_with_stores(
    config: EngineConfig,
    customize: impl FnOnce(&mut ParkingStores),
) -> Harness {
    let store = Arc::new(InMemoryParkingStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let (outbox, dispatcher) = NotificationOutbox::channel(notifier.clone(), Duration::from_secs(1));
    let mut stores = ParkingStores::shared(store.clone());
    customize(&mut stores);
    let processor = Arc::new(DetectionProcessor::new(stores, outbox, config));

    Harness {
        store,
        processor,
        dispatcher,
        notifier,
        org: Uuid::new_v4(),
    }
}

impl Harness {
    /// Seeds a vehicle with the given (normalized) plate and its owner
    pub async fn vehicle(&self, plate: &str, registered: bool) -> (Vehicle, Customer) {
        let customer = Customer {
            id: Uuid::new_v4(),
            organization_id: self.org,
            name: "Jane Doe".to_string(),
            email: format!("{}@example.com", plate.to_lowercase()),
            registered,
            membership_status: MembershipStatus::Active,
        };
        let vehicle = self.vehicle_for(&customer, plate).await;
        self.store.add_customer(customer.clone()).await;
        (vehicle, customer)
    }

    /// Seeds another vehicle for an existing customer
    pub async fn vehicle_for(&self, customer: &Customer, plate: &str) -> Vehicle {
        let vehicle = Vehicle {
            id: Uuid::new_v4(),
            organization_id: customer.organization_id,
            plate: plate.to_string(),
            customer_id: customer.id,
            label: Some("Family car".to_string()),
            brand: Some("Volvo".to_string()),
            model: Some("V70".to_string()),
        };
        self.store.add_vehicle(vehicle.clone()).await;
        vehicle
    }

    pub fn detection(&self, plate: &str, direction: Direction) -> ProcessDetectionRequest {
        detection(Some(self.org), plate, direction)
    }
}

pub fn detection(
    organization_id: Option<Uuid>,
    plate: &str,
    direction: Direction,
) -> ProcessDetectionRequest {
    ProcessDetectionRequest {
        organization_id,
        external_event_id: Uuid::new_v4().to_string(),
        plate: plate.to_string(),
        timestamp_utc: Utc::now(),
        camera_id: "cam-gate-1".to_string(),
        location_label: "North gate".to_string(),
        image_ref: None,
        confidence: 0.94,
        direction: Some(direction),
        device_type: "anpr".to_string(),
    }
}
