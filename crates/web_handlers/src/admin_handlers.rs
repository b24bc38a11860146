use actix_web::{HttpResponse, Result, web};
use chrono::Utc;

use detection_engine::{DetectionError, DetectionProcessor};

/// Health check endpoint
pub async fn health() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "service": "parkpass-detections",
        "status": "healthy",
        "timestamp": Utc::now()
    })))
}

/// Expires every overdue pending guest right now
pub async fn sweep_guests(
    processor: web::Data<DetectionProcessor>,
) -> Result<HttpResponse, DetectionError> {
    let expired = processor.guests().expire_overdue(Utc::now()).await?;

    log::info!("Manual guest sweep expired {} guest(s)", expired);
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "expired": expired
    })))
}
