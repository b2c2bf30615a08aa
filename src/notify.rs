use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    auth::new_id,
    models::AppointmentRow,
    state::{AppState, ServerEvent},
};

/// Emit a notification event for a user. Fire-and-forget: delivery belongs
/// to an external channel, and emission failures never roll back the
/// appointment transition that triggered them.
pub async fn notify_user(
    pool: &SqlitePool,
    user_id: &str,
    event: &str,
    payload: serde_json::Value,
) {
    let result = sqlx::query(
        r#"INSERT INTO notifications (id, user_id, event, payload, created_at)
           VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(user_id)
    .bind(event)
    .bind(payload.to_string())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await;

    if let Err(err) = result {
        log::warn!("notification emit failed for user {user_id}: {err}");
    }
}

/// Notify everyone with a stake in an appointment change: the assigned
/// worker and the salon owner.
pub async fn notify_appointment_parties(
    pool: &SqlitePool,
    row: &AppointmentRow,
    event: &str,
) {
    let payload = serde_json::json!({
        "appointment_id": row.id,
        "status": row.status,
        "scheduled_start": row.scheduled_start,
        "client_name": row.client_name,
    });

    notify_user(pool, &row.worker_id, event, payload.clone()).await;

    let owner = sqlx::query_as::<_, (Option<String>,)>("SELECT owner_id FROM salons WHERE id = ?")
        .bind(&row.salon_id)
        .fetch_optional(pool)
        .await
        .unwrap_or(None);
    if let Some((Some(owner_id),)) = owner {
        if owner_id != row.worker_id {
            notify_user(pool, &owner_id, event, payload).await;
        }
    }
}

/// Notify the booking client, when the appointment carries an account.
pub async fn notify_client(pool: &SqlitePool, row: &AppointmentRow, event: &str) {
    if let Some(client_id) = row.client_id.as_deref() {
        let payload = serde_json::json!({
            "appointment_id": row.id,
            "status": row.status,
            "scheduled_start": row.scheduled_start,
        });
        notify_user(pool, client_id, event, payload).await;
    }
}

pub fn broadcast(state: &AppState, kind: &str, row: &AppointmentRow) {
    let _ = state.events.send(ServerEvent::from_row(kind, row));
}
