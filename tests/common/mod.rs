#![allow(dead_code)]

use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use salonsync::auth::new_id;
use salonsync::booking::BookingRequest;
use salonsync::models::{Actor, Role};
use salonsync::state::AppState;

pub struct Fixture {
    pub state: AppState,
    pub salon_id: String,
    pub owner_id: String,
    pub worker_id: String,
    pub second_worker_id: String,
    pub client_id: String,
    pub cut_service_id: String,
    pub beard_service_id: String,
}

/// A salon with an owner, two workers, a client, two services, and
/// every-day 09:00-18:00 working hours so tests are not weekday-sensitive.
pub async fn fixture(pool: SqlitePool) -> Fixture {
    let now = Utc::now().to_rfc3339();
    let salon_id = new_id();
    let owner_id = new_id();
    let worker_id = new_id();
    let second_worker_id = new_id();
    let client_id = new_id();
    let cut_service_id = new_id();
    let beard_service_id = new_id();

    sqlx::query("INSERT INTO salons (id, name, owner_id, created_at) VALUES (?, 'Test Salon', ?, ?)")
        .bind(&salon_id)
        .bind(&owner_id)
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap();

    for (id, username, role) in [
        (&owner_id, "owner", "owner"),
        (&worker_id, "worker1", "worker"),
        (&second_worker_id, "worker2", "worker"),
        (&client_id, "client1", "client"),
    ] {
        sqlx::query(
            r#"INSERT INTO users (id, username, display_name, role, password_hash, salon_id, phone, active, created_at)
               VALUES (?, ?, ?, ?, 'unused', ?, NULL, 1, ?)"#,
        )
        .bind(id)
        .bind(username)
        .bind(username)
        .bind(role)
        .bind(&salon_id)
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap();
    }

    for weekday in 0..7 {
        sqlx::query(
            "INSERT INTO working_hours (salon_id, weekday, open_minutes, close_minutes) VALUES (?, ?, 540, 1080)",
        )
        .bind(&salon_id)
        .bind(weekday)
        .execute(&pool)
        .await
        .unwrap();
    }

    for (id, name, price, minutes) in [
        (&cut_service_id, "Signature Cut", 5000_i64, 45_i64),
        (&beard_service_id, "Beard Sculpt", 2500, 25),
    ] {
        sqlx::query(
            r#"INSERT INTO services (id, salon_id, name, price_cents, duration_minutes, active, created_at)
               VALUES (?, ?, ?, ?, ?, 1, ?)"#,
        )
        .bind(id)
        .bind(&salon_id)
        .bind(name)
        .bind(price)
        .bind(minutes)
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap();
    }

    Fixture {
        state: AppState::new(pool),
        salon_id,
        owner_id,
        worker_id,
        second_worker_id,
        client_id,
        cut_service_id,
        beard_service_id,
    }
}

/// A start time safely in the future; `hour_offset` spreads bookings apart.
pub fn future_start(hour_offset: i64) -> String {
    (Utc::now() + Duration::days(2) + Duration::hours(hour_offset)).to_rfc3339()
}

impl Fixture {
    pub fn client_actor(&self) -> Actor {
        Actor::new(self.client_id.clone(), Role::Client)
    }

    pub fn worker_actor(&self) -> Actor {
        Actor::new(self.worker_id.clone(), Role::Worker)
    }

    pub fn second_worker_actor(&self) -> Actor {
        Actor::new(self.second_worker_id.clone(), Role::Worker)
    }

    pub fn owner_actor(&self) -> Actor {
        Actor::new(self.owner_id.clone(), Role::Owner)
    }

    /// A plain client booking for the cut service.
    pub fn cut_request(&self, start: &str) -> BookingRequest {
        BookingRequest {
            requester: self.client_actor(),
            client_id: Some(self.client_id.clone()),
            client_name: "Test Client".to_string(),
            client_phone: Some("555-0100".to_string()),
            worker_id: self.worker_id.clone(),
            service_ids: vec![self.cut_service_id.clone()],
            scheduled_start: start.to_string(),
            notes: None,
            walk_in: false,
            skip_availability_check: false,
            idempotency_key: None,
        }
    }

    pub async fn history_actions(&self, appointment_id: &str) -> Vec<String> {
        sqlx::query_as::<_, (String,)>(
            "SELECT action FROM history WHERE appointment_id = ? ORDER BY created_at",
        )
        .bind(appointment_id)
        .fetch_all(&self.state.db)
        .await
        .unwrap()
        .into_iter()
        .map(|(action,)| action)
        .collect()
    }

    pub async fn appointment_count(&self) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM appointments")
            .fetch_one(&self.state.db)
            .await
            .unwrap()
    }
}
