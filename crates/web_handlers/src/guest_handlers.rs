use actix_web::{HttpResponse, Result, web};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use detection_engine::{DetectionError, DetectionProcessor};

/// Query parameters for guest confirmation
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestConfirmQuery {
    /// Organization of the guest; the configured default is used when absent
    pub organization_id: Option<Uuid>,
}

/// Confirms a pending guest while its window is open.
///
/// Unknown guests are 404, guests that are no longer pending are 409.
pub async fn confirm_guest(
    processor: web::Data<DetectionProcessor>,
    path: web::Path<Uuid>,
    query: web::Query<GuestConfirmQuery>,
) -> Result<HttpResponse, DetectionError> {
    let guest_id = path.into_inner();
    let organization_id = query
        .organization_id
        .unwrap_or(processor.config().default_organization_id);

    let guest = processor
        .guests()
        .confirm(&organization_id, &guest_id, Utc::now())
        .await?;

    log::info!("Guest {} confirmed for plate {}", guest.id, guest.plate);
    Ok(HttpResponse::Ok().json(guest))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use actix_web::{App, http::StatusCode, test};
    use detection_engine::*;
    use serde_json::Value;

    use super::*;
    use crate::configure_routes;

    #[actix_web::test]
    async fn test_confirm_flow() {
        let store = Arc::new(InMemoryParkingStore::new());
        let (outbox, _dispatcher) =
            NotificationOutbox::channel(Arc::new(RecordingNotifier::new()), Duration::from_secs(1));
        let processor = web::Data::new(DetectionProcessor::new(
            ParkingStores::shared(store),
            outbox,
            EngineConfig::default(),
        ));
        let org = processor.config().default_organization_id;
        let guest = processor
            .guests()
            .admit("GX100", &org, Utc::now())
            .await
            .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(processor.clone())
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri(&format!("/api/guests/{}/confirm", guest.id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "Confirmed");

        let again = test::TestRequest::post()
            .uri(&format!("/api/guests/{}/confirm", guest.id))
            .to_request();
        let resp = test::call_service(&app, again).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let unknown = test::TestRequest::post()
            .uri(&format!("/api/guests/{}/confirm", Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, unknown).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
