use std::{env, fs, path::Path};

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    auth::{hash_password, new_id},
    errors::BookingError,
    models::{Appointment, AppointmentRow, ServiceLineRow, ROLE_OWNER, ROLE_WORKER},
};

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Best-effort audit trail. Logging must never break the primary transition,
/// so failures are swallowed after a warning.
pub async fn log_history(
    pool: &SqlitePool,
    actor_id: Option<&str>,
    action: &str,
    appointment_id: Option<&str>,
    metadata: Option<serde_json::Value>,
) {
    let result = sqlx::query(
        r#"INSERT INTO history (id, actor_id, action, appointment_id, metadata, created_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(actor_id)
    .bind(action)
    .bind(appointment_id)
    .bind(metadata.map(|value| value.to_string()))
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await;

    if let Err(err) = result {
        log::warn!("history log failed for action {action}: {err}");
    }
}

pub async fn fetch_appointment_row(
    pool: &SqlitePool,
    appointment_id: &str,
) -> Result<AppointmentRow, BookingError> {
    sqlx::query_as::<_, AppointmentRow>("SELECT * FROM appointments WHERE id = ? LIMIT 1")
        .bind(appointment_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| BookingError::NotFound("appointment".to_string()))
}

pub async fn fetch_service_lines(
    pool: &SqlitePool,
    appointment_id: &str,
) -> Result<Vec<ServiceLineRow>, BookingError> {
    let lines = sqlx::query_as::<_, ServiceLineRow>(
        "SELECT * FROM appointment_services WHERE appointment_id = ? ORDER BY name",
    )
    .bind(appointment_id)
    .fetch_all(pool)
    .await?;
    Ok(lines)
}

pub async fn fetch_appointment(
    pool: &SqlitePool,
    appointment_id: &str,
) -> Result<Appointment, BookingError> {
    let row = fetch_appointment_row(pool, appointment_id).await?;
    let lines = fetch_service_lines(pool, appointment_id).await?;
    Appointment::from_row(row, lines)
}

/// How many appointments this client has besides the given one. Live count
/// each time, matching by account id when present and by phone for
/// account-less walk-ins.
pub async fn count_other_appointments(
    pool: &SqlitePool,
    appointment: &AppointmentRow,
) -> Result<i64, BookingError> {
    let count = if let Some(client_id) = appointment.client_id.as_deref() {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM appointments WHERE client_id = ? AND id != ?",
        )
        .bind(client_id)
        .bind(&appointment.id)
        .fetch_one(pool)
        .await?
    } else if let Some(phone) = appointment.client_phone.as_deref() {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM appointments WHERE client_phone = ? AND id != ?",
        )
        .bind(phone)
        .bind(&appointment.id)
        .fetch_one(pool)
        .await?
    } else {
        0
    };
    Ok(count)
}

/// Finance collaborator record, written when an appointment completes.
pub async fn record_payment(
    pool: &SqlitePool,
    appointment_id: &str,
    amount_cents: i64,
    method: &str,
) {
    let result = sqlx::query(
        r#"INSERT INTO payments (id, appointment_id, amount_cents, method, recorded_at)
           VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(appointment_id)
    .bind(amount_cents)
    .bind(method)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await;

    if let Err(err) = result {
        log::warn!("payment record failed for appointment {appointment_id}: {err}");
    }
}

pub async fn seed_defaults(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let existing =
        sqlx::query_as::<_, (String,)>("SELECT id FROM salons LIMIT 1")
            .fetch_optional(pool)
            .await?;
    if existing.is_some() {
        return Ok(());
    }

    let now = Utc::now().to_rfc3339();
    let salon_id = new_id();
    let salon_name = env::var("SALON_NAME").unwrap_or_else(|_| "SalonSync Studio".to_string());

    let username = env::var("OWNER_USER").unwrap_or_else(|_| "owner".to_string());
    let password = env::var("OWNER_PASSWORD").unwrap_or_else(|_| "owner".to_string());
    let display_name =
        env::var("OWNER_DISPLAY_NAME").unwrap_or_else(|_| "Salon Owner".to_string());
    if password == "owner" {
        log::warn!("OWNER_PASSWORD not set. Using default password 'owner'. Set OWNER_PASSWORD in production.");
    }
    let password_hash = hash_password(&password)
        .map_err(|_| sqlx::Error::Protocol("password hash failed".into()))?;

    let owner_id = new_id();
    sqlx::query(
        r#"INSERT INTO users (id, username, display_name, role, password_hash, salon_id, phone, active, created_at)
           VALUES (?, ?, ?, ?, ?, ?, NULL, 1, ?)"#,
    )
    .bind(&owner_id)
    .bind(username)
    .bind(display_name)
    .bind(ROLE_OWNER)
    .bind(password_hash)
    .bind(&salon_id)
    .bind(&now)
    .execute(pool)
    .await?;

    sqlx::query("INSERT INTO salons (id, name, owner_id, created_at) VALUES (?, ?, ?, ?)")
        .bind(&salon_id)
        .bind(salon_name)
        .bind(&owner_id)
        .bind(&now)
        .execute(pool)
        .await?;

    // Monday through Saturday, 09:00-18:00.
    for weekday in 0..6 {
        sqlx::query(
            "INSERT INTO working_hours (salon_id, weekday, open_minutes, close_minutes) VALUES (?, ?, 540, 1080)",
        )
        .bind(&salon_id)
        .bind(weekday)
        .execute(pool)
        .await?;
    }

    let services = [
        ("Signature Cut", 4500_i64, 45_i64),
        ("Color & Style", 9000, 90),
        ("Beard Sculpt", 2500, 25),
        ("Full Grooming", 6000, 60),
    ];
    for (name, price_cents, duration_minutes) in services {
        sqlx::query(
            r#"INSERT INTO services (id, salon_id, name, price_cents, duration_minutes, active, created_at)
               VALUES (?, ?, ?, ?, ?, 1, ?)"#,
        )
        .bind(new_id())
        .bind(&salon_id)
        .bind(name)
        .bind(price_cents)
        .bind(duration_minutes)
        .bind(&now)
        .execute(pool)
        .await?;
    }

    if env::var("SEED_WORKER").unwrap_or_else(|_| "false".to_string()) == "true" {
        let username = env::var("WORKER_USER").unwrap_or_else(|_| "worker1".to_string());
        let password = env::var("WORKER_PASSWORD").unwrap_or_else(|_| "change-me".to_string());
        let display_name =
            env::var("WORKER_DISPLAY_NAME").unwrap_or_else(|_| "Worker One".to_string());
        if password == "change-me" {
            log::warn!("WORKER_PASSWORD not set. Using default password 'change-me'. Set WORKER_PASSWORD in production.");
        }
        let password_hash = hash_password(&password)
            .map_err(|_| sqlx::Error::Protocol("password hash failed".into()))?;
        sqlx::query(
            r#"INSERT INTO users (id, username, display_name, role, password_hash, salon_id, phone, active, created_at)
               VALUES (?, ?, ?, ?, ?, ?, NULL, 1, ?)"#,
        )
        .bind(new_id())
        .bind(username)
        .bind(display_name)
        .bind(ROLE_WORKER)
        .bind(password_hash)
        .bind(&salon_id)
        .bind(&now)
        .execute(pool)
        .await?;
    }

    Ok(())
}
