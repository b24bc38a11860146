use actix_web::{HttpResponse, Result, web};

use detection_engine::{DetectionError, DetectionProcessor, ProcessDetectionRequest};

/// Accepts one camera detection and returns what the engine did with it.
pub async fn process_detection(
    processor: web::Data<DetectionProcessor>,
    request: web::Json<ProcessDetectionRequest>,
) -> Result<HttpResponse, DetectionError> {
    let outcome = processor.process_detection(request.into_inner()).await?;

    Ok(HttpResponse::Ok().json(outcome))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use actix_web::{App, http::StatusCode, test};
    use detection_engine::*;
    use serde_json::{Value, json};

    use super::*;
    use crate::configure_routes;

    /// Vehicle lookups that never answer in time
    struct SlowVehicles {
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl store::VehicleStore for SlowVehicles {
        async fn find_by_plate(
            &self,
            _plate: &str,
            _organization_id: &uuid::Uuid,
        ) -> store::StoreResult<Option<Vehicle>> {
            actix_web::rt::time::sleep(self.delay).await;
            Ok(None)
        }
    }

    fn processor(store: Arc<InMemoryParkingStore>) -> web::Data<DetectionProcessor> {
        let (outbox, _dispatcher) =
            NotificationOutbox::channel(Arc::new(RecordingNotifier::new()), Duration::from_secs(1));
        web::Data::new(DetectionProcessor::new(
            ParkingStores::shared(store),
            outbox,
            EngineConfig::default(),
        ))
    }

    fn body(plate: &str, direction: Option<&str>) -> Value {
        let mut body = json!({
            "organizationId": "6f1c2a52-3c1e-4f43-9a57-0d1b9c7d2e11",
            "externalEventId": uuid::Uuid::new_v4().to_string(),
            "plate": plate,
            "timestampUtc": "2026-03-01T08:15:00Z",
            "cameraId": "cam-gate-1",
            "locationLabel": "North gate",
            "confidence": 0.91,
            "deviceType": "anpr"
        });
        if let Some(direction) = direction {
            body["direction"] = json!(direction);
        }
        body
    }

    #[actix_web::test]
    async fn test_unknown_plate_entry_returns_guest_outcome() {
        let store = Arc::new(InMemoryParkingStore::new());
        let app = test::init_service(
            App::new()
                .app_data(processor(store.clone()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/detections")
            .set_json(body("ab 123", Some("entry")))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(resp["action"], "guest_created");
        assert_eq!(resp["isGuestEntry"], true);
        assert!(resp["details"]["guestId"].is_string());
        assert!(resp["details"].get("sessionId").is_none());
    }

    #[actix_web::test]
    async fn test_missing_direction_is_bad_request() {
        let store = Arc::new(InMemoryParkingStore::new());
        let app = test::init_service(
            App::new()
                .app_data(processor(store.clone()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/detections")
            .set_json(body("AB123", None))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "validation_error");
        assert_eq!(store.event_count().await, 0);
    }

    #[actix_web::test]
    async fn test_malformed_body_uses_validation_shape() {
        let store = Arc::new(InMemoryParkingStore::new());
        let app = test::init_service(
            App::new()
                .app_data(processor(store))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/detections")
            .set_json(json!({ "plate": "AB123" }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "validation_error");
    }

    #[actix_web::test]
    async fn test_store_outage_is_internal_error() {
        let store = Arc::new(InMemoryParkingStore::new());
        store.set_unavailable(true);
        let app = test::init_service(
            App::new()
                .app_data(processor(store))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/detections")
            .set_json(body("AB123", Some("exit")))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "internal_error");
    }

    #[actix_web::test]
    async fn test_store_timeout_is_internal_error() {
        let store = Arc::new(InMemoryParkingStore::new());
        let (outbox, _dispatcher) =
            NotificationOutbox::channel(Arc::new(RecordingNotifier::new()), Duration::from_secs(1));
        let mut stores = ParkingStores::shared(store.clone());
        stores.vehicles = Arc::new(SlowVehicles {
            delay: Duration::from_millis(300),
        });
        let processor = web::Data::new(DetectionProcessor::new(
            stores,
            outbox,
            EngineConfig {
                store_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        ));
        let app = test::init_service(
            App::new()
                .app_data(processor)
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/detections")
            .set_json(body("SLOW1", Some("entry")))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "internal_error");
        assert_eq!(store.event_count().await, 1);
    }
}
