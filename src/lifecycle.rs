use chrono::Utc;

use crate::{
    db::{
        count_other_appointments, fetch_appointment, fetch_appointment_row, log_history,
        record_payment,
    },
    errors::BookingError,
    models::{Actor, Appointment, AppointmentRow, AppointmentStatus, Role},
    notify,
    state::AppState,
};

/// Lifecycle events an actor can request against an existing appointment.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Accept,
    Reject,
    Cancel,
    Start,
    Complete { payment_method: String },
    Reassign { new_worker_id: String },
}

impl LifecycleEvent {
    fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Accept => "accept",
            LifecycleEvent::Reject => "reject",
            LifecycleEvent::Cancel => "cancel",
            LifecycleEvent::Start => "start",
            LifecycleEvent::Complete { .. } => "complete",
            LifecycleEvent::Reassign { .. } => "reassign",
        }
    }
}

/// Drive one transition of the appointment state machine. Permission checks
/// come first (wrong actor is an authorization error even when the target
/// state would also be wrong), then the from-state check, then a guarded
/// UPDATE so concurrent transitions cannot double-fire. Side effects
/// (history, notifications, finance) run after the write and never fail it.
pub async fn apply(
    state: &AppState,
    actor: &Actor,
    appointment_id: &str,
    event: LifecycleEvent,
) -> Result<Appointment, BookingError> {
    let row = fetch_appointment_row(&state.db, appointment_id).await?;
    let status = AppointmentStatus::parse(&row.status)?;

    // A client may only ever cancel their own Pending/Confirmed appointment.
    if actor.role == Role::Client {
        if !matches!(event, LifecycleEvent::Cancel) {
            return Err(BookingError::Authorization(format!(
                "clients may not {} appointments",
                event.name()
            )));
        }
        if row.client_id.as_deref() != Some(actor.id.as_str()) {
            return Err(BookingError::Authorization(
                "clients may only cancel their own appointments".to_string(),
            ));
        }
    }

    match event {
        LifecycleEvent::Accept => accept(state, actor, row, status).await,
        LifecycleEvent::Reject => reject(state, actor, row, status).await,
        LifecycleEvent::Cancel => cancel(state, actor, row, status).await,
        LifecycleEvent::Start => start(state, actor, row, status).await,
        LifecycleEvent::Complete { payment_method } => {
            complete(state, actor, row, status, &payment_method).await
        }
        LifecycleEvent::Reassign { new_worker_id } => {
            reassign(state, actor, row, status, &new_worker_id).await
        }
    }
}

fn require_assigned_worker_or_owner(actor: &Actor, row: &AppointmentRow) -> Result<(), BookingError> {
    match actor.role {
        Role::Owner => Ok(()),
        Role::Worker if actor.id == row.worker_id => Ok(()),
        Role::Worker => Err(BookingError::Authorization(
            "appointment is assigned to another worker".to_string(),
        )),
        Role::Client => Err(BookingError::Authorization(
            "not permitted".to_string(),
        )),
    }
}

fn wrong_state(event: &str, status: AppointmentStatus) -> BookingError {
    BookingError::Validation(format!(
        "cannot {event} an appointment in status {}",
        status.as_str()
    ))
}

/// Guarded transition: the UPDATE only fires while the appointment is still
/// in `from`, and each lifecycle timestamp is set at most once via COALESCE.
async fn transition(
    state: &AppState,
    row: &AppointmentRow,
    from: AppointmentStatus,
    to: AppointmentStatus,
    timestamp_column: Option<&str>,
) -> Result<AppointmentRow, BookingError> {
    let now = Utc::now().to_rfc3339();
    let sql = match timestamp_column {
        Some(column) => format!(
            "UPDATE appointments SET status = ?, {column} = COALESCE({column}, ?) WHERE id = ? AND status = ?"
        ),
        None => "UPDATE appointments SET status = ? WHERE id = ? AND status = ?".to_string(),
    };

    let mut query = sqlx::query(&sql).bind(to.as_str());
    if timestamp_column.is_some() {
        query = query.bind(&now);
    }
    let updated = query
        .bind(&row.id)
        .bind(from.as_str())
        .execute(&state.db)
        .await?;

    if updated.rows_affected() == 0 {
        return Err(BookingError::Validation(
            "appointment changed concurrently, reload and retry".to_string(),
        ));
    }

    fetch_appointment_row(&state.db, &row.id).await
}

async fn accept(
    state: &AppState,
    actor: &Actor,
    row: AppointmentRow,
    status: AppointmentStatus,
) -> Result<Appointment, BookingError> {
    require_assigned_worker_or_owner(actor, &row)?;
    if status != AppointmentStatus::Pending {
        return Err(wrong_state("accept", status));
    }

    let row = transition(
        state,
        &row,
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        Some("accepted_at"),
    )
    .await?;

    log_history(
        &state.db,
        Some(&actor.id),
        "appointment_accepted",
        Some(&row.id),
        None,
    )
    .await;
    notify::notify_client(&state.db, &row, "appointment_accepted").await;
    notify::broadcast(state, "appointment_accepted", &row);

    fetch_appointment(&state.db, &row.id).await
}

async fn reject(
    state: &AppState,
    actor: &Actor,
    row: AppointmentRow,
    status: AppointmentStatus,
) -> Result<Appointment, BookingError> {
    require_assigned_worker_or_owner(actor, &row)?;
    if status != AppointmentStatus::Pending {
        return Err(wrong_state("reject", status));
    }

    let row = transition(
        state,
        &row,
        AppointmentStatus::Pending,
        AppointmentStatus::Cancelled,
        Some("rejected_at"),
    )
    .await?;

    log_history(
        &state.db,
        Some(&actor.id),
        "appointment_rejected",
        Some(&row.id),
        None,
    )
    .await;
    notify::notify_client(&state.db, &row, "appointment_rejected").await;
    notify::broadcast(state, "appointment_rejected", &row);

    fetch_appointment(&state.db, &row.id).await
}

async fn cancel(
    state: &AppState,
    actor: &Actor,
    row: AppointmentRow,
    status: AppointmentStatus,
) -> Result<Appointment, BookingError> {
    if actor.role != Role::Client {
        require_assigned_worker_or_owner(actor, &row)?;
    }
    if !status.occupies_calendar() {
        return Err(wrong_state("cancel", status));
    }

    // A pending cancellation is a rejection as far as timestamps go.
    let timestamp = if status == AppointmentStatus::Pending {
        Some("rejected_at")
    } else {
        None
    };
    let row = transition(state, &row, status, AppointmentStatus::Cancelled, timestamp).await?;

    // The audit trail distinguishes who pulled the plug.
    let action = match actor.role {
        Role::Client => "appointment_cancelled_by_client",
        Role::Worker => "appointment_cancelled_by_worker",
        Role::Owner => "appointment_cancelled_by_owner",
    };
    log_history(&state.db, Some(&actor.id), action, Some(&row.id), None).await;
    if actor.role == Role::Client {
        notify::notify_appointment_parties(&state.db, &row, "appointment_cancelled").await;
    } else {
        notify::notify_client(&state.db, &row, "appointment_cancelled").await;
    }
    notify::broadcast(state, "appointment_cancelled", &row);

    fetch_appointment(&state.db, &row.id).await
}

async fn start(
    state: &AppState,
    actor: &Actor,
    row: AppointmentRow,
    status: AppointmentStatus,
) -> Result<Appointment, BookingError> {
    if actor.role != Role::Worker || actor.id != row.worker_id {
        return Err(BookingError::Authorization(
            "only the assigned worker may start the appointment".to_string(),
        ));
    }
    if status != AppointmentStatus::Confirmed {
        return Err(wrong_state("start", status));
    }

    let row = transition(
        state,
        &row,
        AppointmentStatus::Confirmed,
        AppointmentStatus::InProgress,
        Some("started_at"),
    )
    .await?;

    log_history(
        &state.db,
        Some(&actor.id),
        "appointment_started",
        Some(&row.id),
        None,
    )
    .await;
    notify::broadcast(state, "appointment_started", &row);

    fetch_appointment(&state.db, &row.id).await
}

async fn complete(
    state: &AppState,
    actor: &Actor,
    row: AppointmentRow,
    status: AppointmentStatus,
    payment_method: &str,
) -> Result<Appointment, BookingError> {
    if actor.role != Role::Worker || actor.id != row.worker_id {
        return Err(BookingError::Authorization(
            "only the assigned worker may complete the appointment".to_string(),
        ));
    }
    if status != AppointmentStatus::InProgress {
        return Err(wrong_state("complete", status));
    }

    let row = transition(
        state,
        &row,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        Some("completed_at"),
    )
    .await?;

    record_payment(&state.db, &row.id, row.total_price_cents, payment_method).await;

    // Live count, not a cached flag: stays correct even if history rows are
    // pruned later.
    let prior = count_other_appointments(&state.db, &row).await.unwrap_or(0);
    let action = if prior == 0 {
        "appointment_completed_first_visit"
    } else {
        "appointment_completed_repeat_visit"
    };
    log_history(
        &state.db,
        Some(&actor.id),
        action,
        Some(&row.id),
        Some(serde_json::json!({
            "amount_cents": row.total_price_cents,
            "payment_method": payment_method,
        })),
    )
    .await;
    notify::notify_client(&state.db, &row, "appointment_completed").await;
    notify::broadcast(state, "appointment_completed", &row);

    fetch_appointment(&state.db, &row.id).await
}

/// Reassignment UPDATE with the same overlap predicate the booking gate
/// uses, evaluated against the new worker's calendar (excluding this
/// appointment's own row).
const REASSIGN_GUARDED: &str = r#"
UPDATE appointments
SET worker_id = ?, status = 'pending'
WHERE id = ?
  AND status IN ('pending', 'confirmed')
  AND NOT EXISTS (
      SELECT 1 FROM appointments other
      WHERE other.worker_id = ?
        AND other.id != appointments.id
        AND other.status IN ('pending', 'confirmed')
        AND datetime(other.scheduled_start) < datetime(?)
        AND datetime(other.scheduled_start, '+' || other.duration_minutes || ' minutes') > datetime(?)
  )"#;

async fn reassign(
    state: &AppState,
    actor: &Actor,
    row: AppointmentRow,
    status: AppointmentStatus,
    new_worker_id: &str,
) -> Result<Appointment, BookingError> {
    if actor.role != Role::Owner {
        return Err(BookingError::Authorization(
            "only the owner may reassign appointments".to_string(),
        ));
    }
    if !status.occupies_calendar() {
        return Err(wrong_state("reassign", status));
    }
    if new_worker_id == row.worker_id {
        return Err(BookingError::Validation(
            "appointment is already assigned to that worker".to_string(),
        ));
    }

    let worker = sqlx::query_as::<_, (String, Option<String>)>(
        "SELECT role, salon_id FROM users WHERE id = ? AND active = 1 LIMIT 1",
    )
    .bind(new_worker_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| BookingError::NotFound(format!("worker {new_worker_id}")))?;
    if worker.0 != Role::Worker.as_str() {
        return Err(BookingError::NotFound(format!("worker {new_worker_id}")));
    }
    if worker.1.as_deref() != Some(row.salon_id.as_str()) {
        return Err(BookingError::SalonMismatch(
            "new worker is not assigned to this salon".to_string(),
        ));
    }

    let start = crate::schedule::parse_timestamp(&row.scheduled_start)?;
    let end = start + chrono::Duration::minutes(row.duration_minutes);

    let mut tx = state.db.begin().await?;
    let updated = sqlx::query(REASSIGN_GUARDED)
        .bind(new_worker_id)
        .bind(&row.id)
        .bind(new_worker_id)
        .bind(end.to_rfc3339())
        .bind(start.to_rfc3339())
        .execute(&mut *tx)
        .await?;

    if updated.rows_affected() == 0 {
        // Distinguish a busy calendar from a concurrent status change.
        let busy = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM appointments
               WHERE worker_id = ? AND id != ?
                 AND status IN ('pending', 'confirmed')
                 AND datetime(scheduled_start) < datetime(?)
                 AND datetime(scheduled_start, '+' || duration_minutes || ' minutes') > datetime(?)"#,
        )
        .bind(new_worker_id)
        .bind(&row.id)
        .bind(end.to_rfc3339())
        .bind(start.to_rfc3339())
        .fetch_one(&mut *tx)
        .await
        .unwrap_or(0);
        drop(tx);
        if busy > 0 {
            return Err(BookingError::SlotConflict);
        }
        return Err(BookingError::Validation(
            "appointment changed concurrently, reload and retry".to_string(),
        ));
    }
    tx.commit().await?;

    let old_worker_id = row.worker_id.clone();
    let row = fetch_appointment_row(&state.db, &row.id).await?;

    let metadata = serde_json::json!({
        "from_worker": old_worker_id,
        "to_worker": new_worker_id,
        "was_confirmed": status == AppointmentStatus::Confirmed,
    });
    log_history(
        &state.db,
        Some(&actor.id),
        "appointment_reassigned_from",
        Some(&row.id),
        Some(metadata.clone()),
    )
    .await;
    log_history(
        &state.db,
        Some(&actor.id),
        "appointment_reassigned_to",
        Some(&row.id),
        Some(metadata),
    )
    .await;

    notify::notify_user(
        &state.db,
        &old_worker_id,
        "appointment_reassigned_away",
        serde_json::json!({ "appointment_id": row.id }),
    )
    .await;
    notify::notify_user(
        &state.db,
        new_worker_id,
        "appointment_reassigned_to_you",
        serde_json::json!({ "appointment_id": row.id, "scheduled_start": row.scheduled_start }),
    )
    .await;
    notify::broadcast(state, "appointment_reassigned", &row);

    fetch_appointment(&state.db, &row.id).await
}
