use actix_web::{HttpResponse, Result, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use validator::Validate;

use detection_engine::{DetectionError, DetectionProcessor};
use notification_services::types::registration_code_key;
use notification_services::{
    NotificationService, VerificationStore, store_verification_code, verify_code,
};

const REGISTRATION_CODE_MINUTES: i64 = 10;

/// Request a one-time code for the registration link's owner
#[derive(Debug, Deserialize, Validate)]
pub struct RegistrationCodeRequest {
    /// Token carried in the registration link
    #[validate(length(min = 1, max = 128, message = "Registration token is required"))]
    pub token: String,
}

/// Submit the one-time code to complete registration
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyRegistrationRequest {
    /// Token carried in the registration link
    #[validate(length(min = 1, max = 128, message = "Registration token is required"))]
    pub token: String,

    /// Code received by email
    #[validate(length(equal = 6, message = "Verification code must be 6 digits"))]
    pub code: String,
}

/// Generic acknowledgement
#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    /// Human readable result
    pub message: String,
}

/// Emails a one-time code to the customer behind a valid registration link
pub async fn send_registration_code(
    processor: web::Data<DetectionProcessor>,
    notification_service: web::Data<NotificationService>,
    verification_store: web::Data<VerificationStore>,
    request: web::Json<RegistrationCodeRequest>,
) -> Result<HttpResponse, DetectionError> {
    request
        .validate()
        .map_err(|e| DetectionError::Validation(format!("Validation error: {}", e)))?;

    let (_token, customer) = processor
        .registration()
        .validate_token(&request.token, Utc::now())
        .await?;

    let code = NotificationService::generate_verification_code();
    let key = registration_code_key(&customer.organization_id, &customer.email);
    store_verification_code(&verification_store, &key, &code, REGISTRATION_CODE_MINUTES);

    notification_service
        .send_registration_otp(&customer.email, &customer.name, &code)
        .await
        .map_err(|e| {
            log::error!("Failed to send registration code to customer {}: {}", customer.id, e);
            DetectionError::Notification(e)
        })?;

    Ok(HttpResponse::Ok().json(RegistrationResponse {
        message: "Verification code sent".to_string(),
    }))
}

/// Checks the one-time code and completes the customer's registration
pub async fn verify_registration_code(
    processor: web::Data<DetectionProcessor>,
    verification_store: web::Data<VerificationStore>,
    request: web::Json<VerifyRegistrationRequest>,
) -> Result<HttpResponse, DetectionError> {
    request
        .validate()
        .map_err(|e| DetectionError::Validation(format!("Validation error: {}", e)))?;

    let registration = processor.registration();
    let (_token, customer) = registration
        .validate_token(&request.token, Utc::now())
        .await?;

    let key = registration_code_key(&customer.organization_id, &customer.email);
    match verify_code(&verification_store, &key, &request.code) {
        Ok(true) => {
            registration
                .mark_used_by_identity(&customer.email, &customer.organization_id)
                .await?;

            Ok(HttpResponse::Ok().json(RegistrationResponse {
                message: "Registration completed".to_string(),
            }))
        }
        Ok(false) => Err(DetectionError::Validation(
            "Invalid verification code".to_string(),
        )),
        Err(err) => Err(DetectionError::Validation(err.to_string())),
    }
}
