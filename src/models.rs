use serde::Serialize;

use crate::errors::BookingError;

pub const ROLE_OWNER: &str = "owner";
pub const ROLE_WORKER: &str = "worker";
pub const ROLE_CLIENT: &str = "client";

/// Step used by the availability walk when proposing slot starts.
pub const SLOT_STEP_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self, BookingError> {
        match value {
            "pending" => Ok(AppointmentStatus::Pending),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "in_progress" => Ok(AppointmentStatus::InProgress),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            other => Err(BookingError::Validation(format!(
                "unknown appointment status '{other}'"
            ))),
        }
    }

    /// Pending and Confirmed are the only statuses that occupy calendar time.
    pub fn occupies_calendar(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Worker,
    Client,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => ROLE_OWNER,
            Role::Worker => ROLE_WORKER,
            Role::Client => ROLE_CLIENT,
        }
    }

    pub fn parse(value: &str) -> Result<Self, BookingError> {
        match value {
            ROLE_OWNER => Ok(Role::Owner),
            ROLE_WORKER => Ok(Role::Worker),
            ROLE_CLIENT => Ok(Role::Client),
            other => Err(BookingError::Validation(format!("unknown role '{other}'"))),
        }
    }
}

/// The actor behind a lifecycle event, as produced by the auth layer.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub password_hash: String,
    pub salon_id: Option<String>,
    pub phone: Option<String>,
    pub active: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceRow {
    pub id: String,
    pub salon_id: String,
    pub name: String,
    pub price_cents: i64,
    pub duration_minutes: i64,
    pub active: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: String,
    pub salon_id: String,
    pub client_id: Option<String>,
    pub client_name: String,
    pub client_phone: Option<String>,
    pub worker_id: String,
    pub scheduled_start: String,
    pub duration_minutes: i64,
    pub total_price_cents: i64,
    pub status: String,
    pub walk_in: i64,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: String,
    pub accepted_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub rejected_at: Option<String>,
}

/// Snapshot of a catalog service captured at booking time. Never updated
/// after insert, so later catalog edits cannot alter booked appointments.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ServiceLineRow {
    pub id: String,
    pub appointment_id: String,
    pub service_id: String,
    pub name: String,
    pub price_cents: i64,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkingHoursRow {
    pub salon_id: String,
    pub weekday: i64,
    pub open_minutes: i64,
    pub close_minutes: i64,
}

/// Full appointment as returned by the booking and lifecycle entry points.
#[derive(Debug, Clone, Serialize)]
pub struct Appointment {
    pub id: String,
    pub salon_id: String,
    pub client_id: Option<String>,
    pub client_name: String,
    pub client_phone: Option<String>,
    pub worker_id: String,
    pub scheduled_start: String,
    pub duration_minutes: i64,
    pub total_price_cents: i64,
    pub status: AppointmentStatus,
    pub walk_in: bool,
    pub notes: Option<String>,
    pub created_at: String,
    pub accepted_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub rejected_at: Option<String>,
    pub services: Vec<ServiceLineRow>,
}

impl Appointment {
    pub fn from_row(
        row: AppointmentRow,
        services: Vec<ServiceLineRow>,
    ) -> Result<Self, BookingError> {
        let status = AppointmentStatus::parse(&row.status)?;
        Ok(Self {
            id: row.id,
            salon_id: row.salon_id,
            client_id: row.client_id,
            client_name: row.client_name,
            client_phone: row.client_phone,
            worker_id: row.worker_id,
            scheduled_start: row.scheduled_start,
            duration_minutes: row.duration_minutes,
            total_price_cents: row.total_price_cents,
            status,
            walk_in: row.walk_in != 0,
            notes: row.notes,
            created_at: row.created_at,
            accepted_at: row.accepted_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            rejected_at: row.rejected_at,
            services,
        })
    }
}
