use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Which way the camera saw the vehicle travelling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Vehicle entering the lot
    Entry,
    /// Vehicle leaving the lot
    Exit,
}

impl Direction {
    /// Database and wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Entry => "entry",
            Direction::Exit => "exit",
        }
    }
}

impl FromStr for Direction {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entry" => Ok(Direction::Entry),
            "exit" => Ok(Direction::Exit),
            other => Err(StoreError::DataFormat(format!("unknown direction '{}'", other))),
        }
    }
}

/// Inbound detection as delivered by a camera integration
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDetectionRequest {
    /// Organization owning the camera; the configured default is used when absent
    #[serde(default)]
    pub organization_id: Option<Uuid>,

    /// Identifier assigned by the event source, used as idempotency key for the audit record
    #[validate(length(min = 1, max = 128, message = "External event id is required"))]
    pub external_event_id: String,

    /// Plate as read by the camera, before normalization
    #[validate(length(min = 1, max = 32, message = "Plate is required"))]
    pub plate: String,

    /// When the camera saw the vehicle
    pub timestamp_utc: DateTime<Utc>,

    /// Camera that produced the read
    #[validate(length(min = 1, max = 128, message = "Camera id is required"))]
    pub camera_id: String,

    /// Human readable location of the camera
    #[serde(default)]
    pub location_label: String,

    /// Optional reference to the captured image
    #[serde(default)]
    pub image_ref: Option<String>,

    /// Recognition confidence in `0.0..=1.0`
    #[validate(range(min = 0.0, max = 1.0, message = "Confidence must be between 0 and 1"))]
    pub confidence: f64,

    /// Direction of travel
    #[validate(required(message = "Direction is required"))]
    pub direction: Option<Direction>,

    /// Kind of device that produced the read
    #[serde(default)]
    pub device_type: String,
}

/// Immutable audit record of one camera observation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    /// Audit record id
    pub id: Uuid,
    /// Organization the camera belongs to
    pub organization_id: Uuid,
    /// Event source identifier
    pub external_event_id: String,
    /// Normalized plate
    pub plate: String,
    /// When the camera saw the vehicle
    pub timestamp: DateTime<Utc>,
    /// Camera that produced the read
    pub camera_id: String,
    /// Human readable location of the camera
    pub location_label: String,
    /// Direction of travel
    pub direction: Direction,
    /// Optional reference to the captured image
    pub image_ref: Option<String>,
    /// Recognition confidence
    pub confidence: f64,
    /// Kind of device that produced the read
    pub device_type: String,
}

/// Result of persisting an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Id of the stored record; for a redelivery this is the original record's id
    pub id: Uuid,
    /// False when the (organization, external event id) pair was already recorded
    pub first_seen: bool,
}

/// A plate registered to one customer within an organization
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vehicle {
    /// Vehicle id
    pub id: Uuid,
    /// Owning organization
    pub organization_id: Uuid,
    /// Normalized plate
    pub plate: String,
    /// Owning customer
    pub customer_id: Uuid,
    /// Free-form label given by the owner
    pub label: Option<String>,
    /// Manufacturer
    pub brand: Option<String>,
    /// Model name
    pub model: Option<String>,
}

/// Membership state of a customer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    /// Paying member in good standing
    Active,
    /// Membership lapsed
    Inactive,
    /// Membership suspended by an operator
    Suspended,
}

impl MembershipStatus {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Inactive => "inactive",
            MembershipStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for MembershipStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MembershipStatus::Active),
            "inactive" => Ok(MembershipStatus::Inactive),
            "suspended" => Ok(MembershipStatus::Suspended),
            other => Err(StoreError::DataFormat(format!(
                "unknown membership status '{}'",
                other
            ))),
        }
    }
}

/// Customer attributes the engine reads
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Customer {
    /// Customer id
    pub id: Uuid,
    /// Owning organization
    pub organization_id: Uuid,
    /// Display name used in emails
    pub name: String,
    /// Contact email
    pub email: String,
    /// Whether identity verification has been completed
    pub registered: bool,
    /// Membership state
    pub membership_status: MembershipStatus,
}

/// Lifecycle state of a parking session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Vehicle is on site
    Active,
    /// Vehicle left and the exit was recorded
    Completed,
    /// Session closed with a penalty
    Penalized,
}

impl SessionStatus {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Penalized => "penalized",
        }
    }

    /// Sessions only move out of `Active`; closed sessions stay closed.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Active, SessionStatus::Completed)
                | (SessionStatus::Active, SessionStatus::Penalized)
        )
    }
}

impl FromStr for SessionStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "penalized" => Ok(SessionStatus::Penalized),
            other => Err(StoreError::DataFormat(format!(
                "unknown session status '{}'",
                other
            ))),
        }
    }
}

/// One continuous stay of a vehicle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkingSession {
    /// Session id
    pub id: Uuid,
    /// Owning organization
    pub organization_id: Uuid,
    /// Parked vehicle
    pub vehicle_id: Uuid,
    /// Vehicle owner at the time of entry
    pub customer_id: Uuid,
    /// Audit record of the (latest) entry detection
    pub entry_event_id: Uuid,
    /// Time of the (latest) entry detection
    pub entry_time: DateTime<Utc>,
    /// Audit record of the exit detection
    pub exit_event_id: Option<Uuid>,
    /// Time of the exit detection
    pub exit_time: Option<DateTime<Utc>>,
    /// Lifecycle state
    pub status: SessionStatus,
}

/// Fields needed to open a session
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Owning organization
    pub organization_id: Uuid,
    /// Parked vehicle
    pub vehicle_id: Uuid,
    /// Vehicle owner
    pub customer_id: Uuid,
    /// Audit record of the entry detection
    pub entry_event_id: Uuid,
    /// Time of the entry detection
    pub entry_time: DateTime<Utc>,
}

/// Lifecycle state of a guest authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuestStatus {
    /// Waiting for confirmation inside the window
    PendingConfirmation,
    /// Confirmed before the window closed
    Confirmed,
    /// Window closed without confirmation
    Expired,
}

impl GuestStatus {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestStatus::PendingConfirmation => "PendingConfirmation",
            GuestStatus::Confirmed => "Confirmed",
            GuestStatus::Expired => "Expired",
        }
    }

    /// Guests only move forward out of `PendingConfirmation`.
    pub fn can_transition_to(&self, next: GuestStatus) -> bool {
        matches!(
            (self, next),
            (GuestStatus::PendingConfirmation, GuestStatus::Confirmed)
                | (GuestStatus::PendingConfirmation, GuestStatus::Expired)
        )
    }
}

impl FromStr for GuestStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PendingConfirmation" => Ok(GuestStatus::PendingConfirmation),
            "Confirmed" => Ok(GuestStatus::Confirmed),
            "Expired" => Ok(GuestStatus::Expired),
            other => Err(StoreError::DataFormat(format!(
                "unknown guest status '{}'",
                other
            ))),
        }
    }
}

/// Provisional authorization for an unknown plate
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Guest {
    /// Guest id
    pub id: Uuid,
    /// Owning organization
    pub organization_id: Uuid,
    /// Normalized plate
    pub plate: String,
    /// Lifecycle state
    pub status: GuestStatus,
    /// End of the confirmation window
    pub expires_at: DateTime<Utc>,
    /// When the guest was confirmed
    pub confirmed_at: Option<DateTime<Utc>>,
    /// When the guest was created
    pub created_at: DateTime<Utc>,
}

impl Guest {
    /// Pending and still inside its confirmation window at `now`
    pub fn is_pending_at(&self, now: DateTime<Utc>) -> bool {
        self.status == GuestStatus::PendingConfirmation && self.expires_at > now
    }
}

/// Fields needed to create a guest
#[derive(Debug, Clone)]
pub struct NewGuest {
    /// Owning organization
    pub organization_id: Uuid,
    /// Normalized plate
    pub plate: String,
    /// End of the confirmation window
    pub expires_at: DateTime<Utc>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Single-use credential for the registration flow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationToken {
    /// Token id
    pub id: Uuid,
    /// Customer the token was issued to
    pub customer_id: Uuid,
    /// Opaque token value carried in the registration link
    pub token: String,
    /// Expiry time
    pub expires_at: DateTime<Utc>,
    /// Whether the token has been consumed
    pub used: bool,
}

impl RegistrationToken {
    /// Unused and unexpired at `now`
    pub fn is_outstanding_at(&self, now: DateTime<Utc>) -> bool {
        !self.used && self.expires_at > now
    }
}

/// Fields needed to mint a token
#[derive(Debug, Clone)]
pub struct NewRegistrationToken {
    /// Customer the token is issued to
    pub customer_id: Uuid,
    /// Opaque token value
    pub token: String,
    /// Expiry time
    pub expires_at: DateTime<Utc>,
}

/// What the engine did with a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeAction {
    /// A registration token was minted and an invite queued
    RegistrationEmailSent,
    /// A token was already outstanding; no invite was queued
    RegistrationEmailSuppressed,
    /// A new active session was opened
    ParkingSessionCreated,
    /// The active session's entry fields were refreshed
    ParkingSessionUpdated,
    /// Exit handled, with or without a matching session
    ExitProcessed,
    /// A pending guest exists for the plate (new or reused)
    GuestCreated,
    /// Redelivered event ignored under the `ignore` redelivery policy
    DuplicateEvent,
    /// Vehicle resolved but its owner could not be loaded
    NoAction,
}

impl OutcomeAction {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeAction::RegistrationEmailSent => "registration_email_sent",
            OutcomeAction::RegistrationEmailSuppressed => "registration_email_suppressed",
            OutcomeAction::ParkingSessionCreated => "parking_session_created",
            OutcomeAction::ParkingSessionUpdated => "parking_session_updated",
            OutcomeAction::ExitProcessed => "exit_processed",
            OutcomeAction::GuestCreated => "guest_created",
            OutcomeAction::DuplicateEvent => "duplicate_event",
            OutcomeAction::NoAction => "no_action",
        }
    }
}

impl fmt::Display for OutcomeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// References to the entities touched by a detection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeDetails {
    /// Owning customer, when the vehicle is known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<Uuid>,
    /// Session opened, updated or completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    /// Guest created or reused
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<Uuid>,
}

/// Response returned for every processed detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionOutcome {
    /// Audit record id
    pub event_id: Uuid,
    /// True for an entry of an unknown plate
    pub is_guest_entry: bool,
    /// What was done
    pub action: OutcomeAction,
    /// Entities touched
    pub details: OutcomeDetails,
}

/// Failures reported by store collaborators
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A uniqueness guarantee was violated by a concurrent writer
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// The store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded
    #[error("Data format error: {0}")]
    DataFormat(String),
}

/// Errors surfaced by the detection engine
#[derive(thiserror::Error, Debug)]
pub enum DetectionError {
    /// Malformed input, rejected before any state change
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced record does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// A status change that the lifecycle forbids
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// A store collaborator failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An email could not be delivered
    #[error("Notification error: {0}")]
    Notification(#[from] notification_services::NotificationError),

    /// A collaborator call did not finish in time
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A decision task ended without producing a result
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DetectionError {
    /// Lost a uniqueness race; worth one fresh retry
    pub fn is_conflict(&self) -> bool {
        matches!(self, DetectionError::Store(StoreError::Conflict(_)))
    }
}

impl actix_web::ResponseError for DetectionError {
    fn error_response(&self) -> actix_web::HttpResponse {
        use actix_web::HttpResponse;

        match self {
            DetectionError::Validation(msg) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "validation_error",
                "message": msg
            })),
            DetectionError::NotFound(what) => HttpResponse::NotFound().json(serde_json::json!({
                "error": "not_found",
                "message": format!("{} not found", what)
            })),
            DetectionError::InvalidTransition(msg) => {
                HttpResponse::Conflict().json(serde_json::json!({
                    "error": "invalid_transition",
                    "message": msg
                }))
            }
            _ => HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "internal_error",
                "message": "An internal error occurred"
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_transitions_only_leave_active() {
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Completed));
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Penalized));
        assert!(!SessionStatus::Completed.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::Penalized.can_transition_to(SessionStatus::Completed));
    }

    #[test]
    fn test_guest_transitions_are_forward_only() {
        assert!(GuestStatus::PendingConfirmation.can_transition_to(GuestStatus::Confirmed));
        assert!(GuestStatus::PendingConfirmation.can_transition_to(GuestStatus::Expired));
        assert!(!GuestStatus::Confirmed.can_transition_to(GuestStatus::PendingConfirmation));
        assert!(!GuestStatus::Expired.can_transition_to(GuestStatus::PendingConfirmation));
        assert!(!GuestStatus::Expired.can_transition_to(GuestStatus::Confirmed));
    }

    #[test]
    fn test_status_strings_round_trip_through_store_format() {
        for status in [
            GuestStatus::PendingConfirmation,
            GuestStatus::Confirmed,
            GuestStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<GuestStatus>().unwrap(), status);
        }
        assert!("pending".parse::<GuestStatus>().is_err());
        assert!("open".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_outcome_serializes_in_camel_case() {
        let outcome = DetectionOutcome {
            event_id: Uuid::nil(),
            is_guest_entry: true,
            action: OutcomeAction::GuestCreated,
            details: OutcomeDetails {
                guest_id: Some(Uuid::nil()),
                ..Default::default()
            },
        };

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["action"], "guest_created");
        assert_eq!(json["isGuestEntry"], true);
        assert!(json["details"].get("guestId").is_some());
        assert!(json["details"].get("sessionId").is_none());
    }

    #[test]
    fn test_missing_direction_fails_validation() {
        let request: ProcessDetectionRequest = serde_json::from_value(serde_json::json!({
            "externalEventId": "evt-1",
            "plate": "AB 123",
            "timestampUtc": "2025-01-01T10:00:00Z",
            "cameraId": "cam-1",
            "confidence": 0.9
        }))
        .unwrap();

        assert!(request.validate().is_err());
    }

    #[test]
    fn test_timeout_keeps_sub_second_precision_and_is_internal() {
        use actix_web::ResponseError;

        let error = DetectionError::Timeout(std::time::Duration::from_millis(100));

        assert_eq!(error.to_string(), "Operation timed out after 100ms");
        assert_eq!(
            error.error_response().status(),
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
