use chrono::{Duration, Utc};
use sqlx::{Sqlite, Transaction};

use crate::{
    auth::new_id,
    db::{fetch_appointment, log_history},
    errors::BookingError,
    models::{Actor, Appointment, AppointmentRow, Role, ServiceRow},
    notify,
    schedule::parse_timestamp,
    state::AppState,
};

/// A booking request as it arrives at the orchestrator, whether from the
/// public API, a worker recording a walk-in, or the offline sync engine.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub requester: Actor,
    pub client_id: Option<String>,
    pub client_name: String,
    pub client_phone: Option<String>,
    pub worker_id: String,
    pub service_ids: Vec<String>,
    pub scheduled_start: String,
    pub notes: Option<String>,
    pub walk_in: bool,
    pub skip_availability_check: bool,
    pub idempotency_key: Option<String>,
}

/// Conditional insert: the appointment lands only if the worker's calendar
/// is still free for the candidate interval. The overlap predicate runs
/// inside the insert itself as the transaction's first write, so the check
/// and the write are one atomic step with respect to other writers.
const INSERT_GUARDED: &str = r#"
INSERT INTO appointments
    (id, salon_id, client_id, client_name, client_phone, worker_id,
     scheduled_start, duration_minutes, total_price_cents, status, walk_in,
     notes, idempotency_key, created_at)
SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?
WHERE ? = 1 OR NOT EXISTS (
    SELECT 1 FROM appointments
    WHERE worker_id = ?
      AND status IN ('pending', 'confirmed')
      AND datetime(scheduled_start) < datetime(?)
      AND datetime(scheduled_start, '+' || duration_minutes || ' minutes') > datetime(?)
)"#;

/// Validate a booking request, snapshot the selected services, and create the
/// appointment in `Pending`. Fail-fast validation order: selections present,
/// start in the future, services exist/active/one salon, worker
/// exists/active/same salon, then the atomic slot gate.
pub async fn book(state: &AppState, request: BookingRequest) -> Result<Appointment, BookingError> {
    if request.service_ids.is_empty() {
        return Err(BookingError::Validation(
            "at least one service must be selected".to_string(),
        ));
    }

    let start = parse_timestamp(&request.scheduled_start)?;
    if start <= Utc::now() {
        return Err(BookingError::Validation(
            "scheduled start must be in the future".to_string(),
        ));
    }

    let mut services = Vec::with_capacity(request.service_ids.len());
    for service_id in &request.service_ids {
        let service = sqlx::query_as::<_, ServiceRow>(
            "SELECT id, salon_id, name, price_cents, duration_minutes, active FROM services WHERE id = ? LIMIT 1",
        )
        .bind(service_id)
        .fetch_optional(&state.db)
        .await?
        .filter(|service| service.active == 1)
        .ok_or_else(|| BookingError::NotFound(format!("service {service_id}")))?;
        services.push(service);
    }

    let salon_id = services[0].salon_id.clone();
    if services.iter().any(|service| service.salon_id != salon_id) {
        return Err(BookingError::SalonMismatch(
            "selected services belong to more than one salon".to_string(),
        ));
    }

    let worker = sqlx::query_as::<_, (String, Option<String>)>(
        "SELECT role, salon_id FROM users WHERE id = ? AND active = 1 LIMIT 1",
    )
    .bind(&request.worker_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| BookingError::NotFound(format!("worker {}", request.worker_id)))?;
    if worker.0 != Role::Worker.as_str() {
        return Err(BookingError::NotFound(format!(
            "worker {}",
            request.worker_id
        )));
    }
    if worker.1.as_deref() != Some(salon_id.as_str()) {
        return Err(BookingError::SalonMismatch(
            "worker is not assigned to the services' salon".to_string(),
        ));
    }

    if request.skip_availability_check && request.requester.role == Role::Client {
        return Err(BookingError::Authorization(
            "clients may not bypass the availability check".to_string(),
        ));
    }

    if request.client_name.trim().is_empty() {
        return Err(BookingError::Validation(
            "client name is required".to_string(),
        ));
    }

    // Replay of a previously accepted submission is a no-op returning the
    // original result, which is what makes offline sync exactly-once.
    if let Some(key) = request.idempotency_key.as_deref() {
        if let Some(existing) = appointment_id_for_key(state, key).await? {
            return fetch_appointment(&state.db, &existing).await;
        }
    }

    let total_minutes: i64 = services.iter().map(|s| s.duration_minutes).sum();
    let total_cents: i64 = services.iter().map(|s| s.price_cents).sum();
    let end = start + Duration::minutes(total_minutes);
    let appointment_id = new_id();
    let now = Utc::now().to_rfc3339();

    let mut tx = state.db.begin().await?;
    match insert_guarded(
        &mut tx,
        &appointment_id,
        &salon_id,
        &request,
        &services,
        start.to_rfc3339(),
        end.to_rfc3339(),
        total_minutes,
        total_cents,
        &now,
    )
    .await
    {
        Ok(()) => {
            tx.commit().await?;
        }
        Err(err) => {
            drop(tx);
            // A concurrent duplicate of the same idempotency key lost the
            // UNIQUE race; hand back the winner's appointment.
            if let (BookingError::Database(sqlx::Error::Database(db_err)), Some(key)) =
                (&err, request.idempotency_key.as_deref())
            {
                if db_err.is_unique_violation() {
                    if let Some(existing) = appointment_id_for_key(state, key).await? {
                        return fetch_appointment(&state.db, &existing).await;
                    }
                }
            }
            return Err(err);
        }
    }

    let row = sqlx::query_as::<_, AppointmentRow>("SELECT * FROM appointments WHERE id = ?")
        .bind(&appointment_id)
        .fetch_one(&state.db)
        .await?;

    log_history(
        &state.db,
        Some(&request.requester.id),
        "appointment_created",
        Some(&appointment_id),
        Some(serde_json::json!({
            "walk_in": request.walk_in,
            "requester_role": request.requester.role.as_str(),
            "scheduled_start": row.scheduled_start,
        })),
    )
    .await;

    notify::notify_appointment_parties(&state.db, &row, "appointment_created").await;
    notify::broadcast(state, "appointment_created", &row);

    fetch_appointment(&state.db, &appointment_id).await
}

#[allow(clippy::too_many_arguments)]
async fn insert_guarded(
    tx: &mut Transaction<'_, Sqlite>,
    appointment_id: &str,
    salon_id: &str,
    request: &BookingRequest,
    services: &[ServiceRow],
    start_rfc3339: String,
    end_rfc3339: String,
    total_minutes: i64,
    total_cents: i64,
    now: &str,
) -> Result<(), BookingError> {
    let inserted = sqlx::query(INSERT_GUARDED)
        .bind(appointment_id)
        .bind(salon_id)
        .bind(&request.client_id)
        .bind(request.client_name.trim())
        .bind(&request.client_phone)
        .bind(&request.worker_id)
        .bind(&start_rfc3339)
        .bind(total_minutes)
        .bind(total_cents)
        .bind(request.walk_in as i64)
        .bind(&request.notes)
        .bind(&request.idempotency_key)
        .bind(now)
        .bind(request.skip_availability_check as i64)
        .bind(&request.worker_id)
        .bind(&end_rfc3339)
        .bind(&start_rfc3339)
        .execute(&mut **tx)
        .await?;

    if inserted.rows_affected() == 0 {
        return Err(BookingError::SlotConflict);
    }

    for service in services {
        sqlx::query(
            r#"INSERT INTO appointment_services
               (id, appointment_id, service_id, name, price_cents, duration_minutes)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(new_id())
        .bind(appointment_id)
        .bind(&service.id)
        .bind(&service.name)
        .bind(service.price_cents)
        .bind(service.duration_minutes)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

async fn appointment_id_for_key(
    state: &AppState,
    key: &str,
) -> Result<Option<String>, BookingError> {
    let row = sqlx::query_as::<_, (String,)>(
        "SELECT id FROM appointments WHERE idempotency_key = ? LIMIT 1",
    )
    .bind(key)
    .fetch_optional(&state.db)
    .await?;
    Ok(row.map(|(id,)| id))
}
