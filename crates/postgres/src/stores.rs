use async_trait::async_trait;
use chrono::{DateTime, Utc};
use detection_engine::store::*;
use detection_engine::types::*;
use log::{debug, warn};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";

const SESSION_COLUMNS: &str = "id, organization_id, vehicle_id, customer_id, entry_event_id, \
     entry_time, exit_event_id, exit_time, status";

const GUEST_COLUMNS: &str = "id, organization_id, plate, status, expires_at, confirmed_at, created_at";

const TOKEN_COLUMNS: &str = "id, customer_id, token, expires_at, used";

const CUSTOMER_COLUMNS: &str = "id, organization_id, name, email, registered, membership_status";

/// Every store contract backed by one PostgreSQL pool
#[derive(Clone)]
pub struct PgParkingStore {
    pool: PgPool,
}

impl PgParkingStore {
    /// Wraps an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Maps driver failures onto the engine's store error kinds
fn classify(error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::Conflict(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(error.to_string())
        }
        _ => StoreError::Database(error),
    }
}

fn session_from_row(row: &PgRow) -> StoreResult<ParkingSession> {
    Ok(ParkingSession {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        vehicle_id: row.get("vehicle_id"),
        customer_id: row.get("customer_id"),
        entry_event_id: row.get("entry_event_id"),
        entry_time: row.get("entry_time"),
        exit_event_id: row.get("exit_event_id"),
        exit_time: row.get("exit_time"),
        status: row.get::<String, _>("status").parse()?,
    })
}

fn guest_from_row(row: &PgRow) -> StoreResult<Guest> {
    Ok(Guest {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        plate: row.get("plate"),
        status: row.get::<String, _>("status").parse()?,
        expires_at: row.get("expires_at"),
        confirmed_at: row.get("confirmed_at"),
        created_at: row.get("created_at"),
    })
}

fn token_from_row(row: &PgRow) -> RegistrationToken {
    RegistrationToken {
        id: row.get("id"),
        customer_id: row.get("customer_id"),
        token: row.get("token"),
        expires_at: row.get("expires_at"),
        used: row.get("used"),
    }
}

fn customer_from_row(row: &PgRow) -> StoreResult<Customer> {
    Ok(Customer {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        name: row.get("name"),
        email: row.get("email"),
        registered: row.get("registered"),
        membership_status: row.get::<String, _>("membership_status").parse()?,
    })
}

#[async_trait]
impl EventStore for PgParkingStore {
    async fn record(&self, event: &DetectionEvent) -> StoreResult<RecordedEvent> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO detection_events (
                id, organization_id, external_event_id, plate, detected_at,
                camera_id, location_label, direction, image_ref, confidence, device_type
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (organization_id, external_event_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(event.id)
        .bind(event.organization_id)
        .bind(&event.external_event_id)
        .bind(&event.plate)
        .bind(event.timestamp)
        .bind(&event.camera_id)
        .bind(&event.location_label)
        .bind(event.direction.as_str())
        .bind(&event.image_ref)
        .bind(event.confidence)
        .bind(&event.device_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        if let Some(row) = inserted {
            return Ok(RecordedEvent {
                id: row.get("id"),
                first_seen: true,
            });
        }

        let row = sqlx::query(
            "SELECT id FROM detection_events WHERE organization_id = $1 AND external_event_id = $2",
        )
        .bind(event.organization_id)
        .bind(&event.external_event_id)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        debug!("Detection {} already recorded", event.external_event_id);
        Ok(RecordedEvent {
            id: row.get("id"),
            first_seen: false,
        })
    }
}

#[async_trait]
impl VehicleStore for PgParkingStore {
    async fn find_by_plate(
        &self,
        plate: &str,
        organization_id: &Uuid,
    ) -> StoreResult<Option<Vehicle>> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, plate, customer_id, label, brand, model
            FROM vehicles
            WHERE plate = $1 AND organization_id = $2
            "#,
        )
        .bind(plate)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        Ok(row.map(|row| Vehicle {
            id: row.get("id"),
            organization_id: row.get("organization_id"),
            plate: row.get("plate"),
            customer_id: row.get("customer_id"),
            label: row.get("label"),
            brand: row.get("brand"),
            model: row.get("model"),
        }))
    }
}

#[async_trait]
impl CustomerStore for PgParkingStore {
    async fn find_by_id(&self, customer_id: &Uuid) -> StoreResult<Option<Customer>> {
        let row = sqlx::query(&format!("SELECT {} FROM customers WHERE id = $1", CUSTOMER_COLUMNS))
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        row.as_ref().map(customer_from_row).transpose()
    }

    async fn find_by_email(
        &self,
        email: &str,
        organization_id: &Uuid,
    ) -> StoreResult<Option<Customer>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM customers WHERE LOWER(email) = $1 AND organization_id = $2",
            CUSTOMER_COLUMNS
        ))
        .bind(email.trim().to_lowercase())
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        row.as_ref().map(customer_from_row).transpose()
    }

    async fn mark_registered(&self, customer_id: &Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE customers SET registered = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(customer_id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;

        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgParkingStore {
    async fn find_active_by_vehicle(
        &self,
        vehicle_id: &Uuid,
    ) -> StoreResult<Option<ParkingSession>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM parking_sessions WHERE vehicle_id = $1 AND status = 'active'",
            SESSION_COLUMNS
        ))
        .bind(vehicle_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn create(&self, session: NewSession) -> StoreResult<ParkingSession> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO parking_sessions (
                organization_id, vehicle_id, customer_id, entry_event_id, entry_time, status
            ) VALUES ($1, $2, $3, $4, $5, 'active')
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(session.organization_id)
        .bind(session.vehicle_id)
        .bind(session.customer_id)
        .bind(session.entry_event_id)
        .bind(session.entry_time)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        session_from_row(&row)
    }

    async fn update_entry(
        &self,
        session_id: &Uuid,
        entry_event_id: &Uuid,
        entry_time: DateTime<Utc>,
    ) -> StoreResult<ParkingSession> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE parking_sessions
            SET entry_event_id = $1, entry_time = $2, updated_at = NOW()
            WHERE id = $3 AND status = 'active'
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(entry_event_id)
        .bind(entry_time)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .ok_or_else(|| StoreError::Conflict(format!("session {} is not active", session_id)))?;

        session_from_row(&row)
    }

    async fn complete(
        &self,
        session_id: &Uuid,
        exit_event_id: &Uuid,
        exit_time: DateTime<Utc>,
    ) -> StoreResult<ParkingSession> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE parking_sessions
            SET status = 'completed', exit_event_id = $1, exit_time = $2, updated_at = NOW()
            WHERE id = $3 AND status = 'active'
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(exit_event_id)
        .bind(exit_time)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .ok_or_else(|| StoreError::Conflict(format!("session {} is not active", session_id)))?;

        session_from_row(&row)
    }
}

#[async_trait]
impl GuestStore for PgParkingStore {
    async fn find_pending(
        &self,
        plate: &str,
        organization_id: &Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Guest>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM guests
            WHERE plate = $1 AND organization_id = $2
              AND status = 'PendingConfirmation' AND expires_at > $3
            "#,
            GUEST_COLUMNS
        ))
        .bind(plate)
        .bind(organization_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        row.as_ref().map(guest_from_row).transpose()
    }

    async fn find_by_id(&self, guest_id: &Uuid) -> StoreResult<Option<Guest>> {
        let row = sqlx::query(&format!("SELECT {} FROM guests WHERE id = $1", GUEST_COLUMNS))
            .bind(guest_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        row.as_ref().map(guest_from_row).transpose()
    }

    async fn create(&self, guest: NewGuest) -> StoreResult<Guest> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        // Overdue pending rows still hold the partial unique index.
        let expired = sqlx::query(
            r#"
            UPDATE guests SET status = 'Expired'
            WHERE plate = $1 AND organization_id = $2
              AND status = 'PendingConfirmation' AND expires_at <= $3
            "#,
        )
        .bind(&guest.plate)
        .bind(guest.organization_id)
        .bind(guest.created_at)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        if expired.rows_affected() > 0 {
            debug!("Expired {} overdue guest(s) for plate {}", expired.rows_affected(), guest.plate);
        }

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO guests (organization_id, plate, status, expires_at, created_at)
            VALUES ($1, $2, 'PendingConfirmation', $3, $4)
            RETURNING {}
            "#,
            GUEST_COLUMNS
        ))
        .bind(guest.organization_id)
        .bind(&guest.plate)
        .bind(guest.expires_at)
        .bind(guest.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(classify)?;

        let created = guest_from_row(&row)?;
        tx.commit().await.map_err(classify)?;
        Ok(created)
    }

    async fn transition(
        &self,
        guest_id: &Uuid,
        expected: GuestStatus,
        next: GuestStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Guest>> {
        let confirmed_at = (next == GuestStatus::Confirmed).then_some(at);

        let row = sqlx::query(&format!(
            r#"
            UPDATE guests
            SET status = $1, confirmed_at = COALESCE($2, confirmed_at)
            WHERE id = $3 AND status = $4
            RETURNING {}
            "#,
            GUEST_COLUMNS
        ))
        .bind(next.as_str())
        .bind(confirmed_at)
        .bind(guest_id)
        .bind(expected.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        row.as_ref().map(guest_from_row).transpose()
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE guests SET status = 'Expired'
            WHERE status = 'PendingConfirmation' AND expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TokenStore for PgParkingStore {
    async fn find_unexpired_unused(
        &self,
        customer_id: &Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RegistrationToken>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM registration_tokens
            WHERE customer_id = $1 AND used = FALSE AND expires_at > $2
            ORDER BY expires_at DESC
            LIMIT 1
            "#,
            TOKEN_COLUMNS
        ))
        .bind(customer_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        Ok(row.as_ref().map(token_from_row))
    }

    async fn find_by_value(&self, token: &str) -> StoreResult<Option<RegistrationToken>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM registration_tokens WHERE token = $1",
            TOKEN_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        Ok(row.as_ref().map(token_from_row))
    }

    async fn create(&self, token: NewRegistrationToken) -> StoreResult<RegistrationToken> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO registration_tokens (customer_id, token, expires_at, used)
            VALUES ($1, $2, $3, FALSE)
            RETURNING {}
            "#,
            TOKEN_COLUMNS
        ))
        .bind(token.customer_id)
        .bind(&token.token)
        .bind(token.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        Ok(token_from_row(&row))
    }

    async fn mark_used_for_customer(&self, customer_id: &Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE registration_tokens SET used = TRUE WHERE customer_id = $1 AND used = FALSE",
        )
        .bind(customer_id)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        if result.rows_affected() == 0 {
            warn!("No outstanding registration tokens for customer {}", customer_id);
        }
        Ok(result.rows_affected())
    }
}
