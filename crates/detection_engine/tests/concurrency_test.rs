//! Concurrent detections for the same plate or customer must never produce
//! duplicate sessions, guests or invites.

mod common;

use std::sync::Arc;

use common::*;
use detection_engine::*;
use tokio::task::JoinSet;

async fn burst(
    processor: &Arc<DetectionProcessor>,
    requests: Vec<ProcessDetectionRequest>,
) -> Vec<DetectionOutcome> {
    let mut tasks = JoinSet::new();
    for request in requests {
        let processor = processor.clone();
        tasks.spawn(async move { processor.process_detection(request).await });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined.unwrap().unwrap());
    }
    outcomes
}

fn count(outcomes: &[DetectionOutcome], action: OutcomeAction) -> usize {
    outcomes.iter().filter(|o| o.action == action).count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_entries_open_one_session() {
    let h = harness();
    let (vehicle, _customer) = h.vehicle("CC100", true).await;

    let requests = (0..25).map(|_| h.detection("CC100", Direction::Entry)).collect();
    let outcomes = burst(&h.processor, requests).await;

    assert_eq!(count(&outcomes, OutcomeAction::ParkingSessionCreated), 1);
    assert_eq!(count(&outcomes, OutcomeAction::ParkingSessionUpdated), 24);
    let sessions = h.store.sessions_for_vehicle(&vehicle.id).await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Active);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_unknown_entries_create_one_guest() {
    let h = harness();

    let spellings = ["GU 200", "gu200", " GU200 ", "Gu 2 00"];
    let requests = (0..24)
        .map(|i| h.detection(spellings[i % spellings.len()], Direction::Entry))
        .collect();
    let outcomes = burst(&h.processor, requests).await;

    assert_eq!(count(&outcomes, OutcomeAction::GuestCreated), 24);
    let guests = h.store.guests_for_plate("GU200", &h.org).await;
    assert_eq!(guests.len(), 1);
    assert!(
        outcomes
            .iter()
            .all(|o| o.details.guest_id == Some(guests[0].id))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_detections_send_one_invite() {
    let mut h = harness();
    let (_vehicle, customer) = h.vehicle("IN300", false).await;

    let requests = (0..20)
        .map(|i| {
            let direction = if i % 2 == 0 { Direction::Entry } else { Direction::Exit };
            h.detection("IN300", direction)
        })
        .collect();
    let outcomes = burst(&h.processor, requests).await;

    assert_eq!(count(&outcomes, OutcomeAction::RegistrationEmailSent), 1);
    assert_eq!(count(&outcomes, OutcomeAction::RegistrationEmailSuppressed), 19);
    assert_eq!(h.store.tokens_for_customer(&customer.id).await.len(), 1);
    assert_eq!(h.dispatcher.drain().await, 1);
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_vehicles_of_one_customer_share_one_invite() {
    let mut h = harness();
    let (_first, customer) = h.vehicle("TW401", false).await;
    h.vehicle_for(&customer, "TW402").await;

    let requests = (0..20)
        .map(|i| {
            let plate = if i % 2 == 0 { "TW401" } else { "TW402" };
            h.detection(plate, Direction::Entry)
        })
        .collect();
    let outcomes = burst(&h.processor, requests).await;

    assert_eq!(count(&outcomes, OutcomeAction::RegistrationEmailSent), 1);
    assert_eq!(h.store.tokens_for_customer(&customer.id).await.len(), 1);
    assert_eq!(h.dispatcher.drain().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_traffic_keeps_one_active_session_per_vehicle() {
    let h = harness();
    let mut vehicles = Vec::new();
    for plate in ["MX501", "MX502", "MX503"] {
        vehicles.push(h.vehicle(plate, true).await.0);
    }

    let requests = (0..30)
        .map(|i| {
            let vehicle = &vehicles[i % vehicles.len()];
            let direction = if i % 4 == 3 { Direction::Exit } else { Direction::Entry };
            h.detection(&vehicle.plate, direction)
        })
        .collect();
    burst(&h.processor, requests).await;

    for vehicle in &vehicles {
        let active = h
            .store
            .sessions_for_vehicle(&vehicle.id)
            .await
            .into_iter()
            .filter(|s| s.status == SessionStatus::Active)
            .count();
        assert!(active <= 1, "vehicle {} has {} active sessions", vehicle.plate, active);
    }
}
