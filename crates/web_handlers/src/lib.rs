//! # Web Handlers for the ParkPass detection service
//!
//! actix-web handlers for detection intake, registration completion, guest
//! confirmation and operational endpoints.

use actix_web::{error::JsonPayloadError, web};
use detection_engine::DetectionError;

/// Camera detection intake
mod detection_handlers;
pub use detection_handlers::*;

/// Registration completion (one-time code)
mod registration_handlers;
pub use registration_handlers::*;

/// Guest confirmation
mod guest_handlers;
pub use guest_handlers::*;

/// Health and maintenance handlers
mod admin_handlers;
pub use admin_handlers::*;

/// JSON extractor settings: malformed bodies get the same 400 shape as failed validation
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err: JsonPayloadError, _req| {
        DetectionError::Validation(format!("Invalid request body: {}", err)).into()
    })
}

/// Registers every route; the caller provides the shared app data
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .service(
            web::scope("/api")
                .route("/detections", web::post().to(process_detection))
                .route("/guests/{guest_id}/confirm", web::post().to(confirm_guest))
                .service(
                    web::scope("/registration")
                        .route("/otp", web::post().to(send_registration_code))
                        .route("/verify", web::post().to(verify_registration_code)),
                )
                .service(
                    web::scope("/admin").route("/guests/sweep", web::post().to(sweep_guests)),
                ),
        )
        .route("/health", web::get().to(health));
}
