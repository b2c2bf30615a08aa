use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::models::AppointmentRow;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub events: broadcast::Sender<ServerEvent>,
}

impl AppState {
    pub fn new(db: SqlitePool) -> Self {
        let (events, _) = broadcast::channel(64);
        Self { db, events }
    }
}

/// Event pushed onto the broadcast channel on every appointment mutation;
/// the SSE route streams these to connected dashboards.
#[derive(Clone, Debug, Serialize)]
pub struct ServerEvent {
    pub kind: String,
    pub appointment_id: Option<String>,
    pub status: Option<String>,
    pub client_name: Option<String>,
    pub worker_id: Option<String>,
    pub scheduled_start: Option<String>,
}

impl ServerEvent {
    pub fn from_row(kind: &str, row: &AppointmentRow) -> Self {
        Self {
            kind: kind.to_string(),
            appointment_id: Some(row.id.clone()),
            status: Some(row.status.clone()),
            client_name: Some(row.client_name.clone()),
            worker_id: Some(row.worker_id.clone()),
            scheduled_start: Some(row.scheduled_start.clone()),
        }
    }
}
