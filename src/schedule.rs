use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::errors::BookingError;
use crate::models::{WorkingHoursRow, SLOT_STEP_MINUTES};

/// A bookable candidate interval, half-open `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub start: String,
    pub end: String,
}

/// Half-open interval overlap: touching endpoints do not conflict.
/// Callers pass only Pending/Confirmed intervals as occupied.
pub fn conflicts(
    candidate_start: DateTime<Utc>,
    candidate_end: DateTime<Utc>,
    occupied: &[(DateTime<Utc>, DateTime<Utc>)],
) -> bool {
    occupied
        .iter()
        .any(|(start, end)| candidate_start < *end && candidate_end > *start)
}

/// Walk from `open` to `close` in fixed steps and keep every candidate
/// `[t, t+duration)` that ends by close and clears the occupied intervals.
pub fn day_slots(
    open: DateTime<Utc>,
    close: DateTime<Utc>,
    duration_minutes: i64,
    occupied: &[(DateTime<Utc>, DateTime<Utc>)],
) -> Vec<Slot> {
    let step = Duration::minutes(SLOT_STEP_MINUTES);
    let duration = Duration::minutes(duration_minutes);
    let mut slots = Vec::new();
    let mut cursor = open;
    while cursor < close {
        let end = cursor + duration;
        if end > close {
            break;
        }
        if !conflicts(cursor, end, occupied) {
            slots.push(Slot {
                start: cursor.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        cursor += step;
    }
    slots
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, BookingError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| BookingError::Validation(format!("invalid timestamp '{value}'")))
}

/// The worker's Pending/Confirmed intervals, parsed from the store.
pub async fn occupied_intervals(
    pool: &SqlitePool,
    worker_id: &str,
    exclude_appointment: Option<&str>,
) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, BookingError> {
    let rows = sqlx::query_as::<_, (String, String, i64)>(
        r#"SELECT id, scheduled_start, duration_minutes
           FROM appointments
           WHERE worker_id = ? AND status IN ('pending', 'confirmed')"#,
    )
    .bind(worker_id)
    .fetch_all(pool)
    .await?;

    let mut intervals = Vec::with_capacity(rows.len());
    for (id, start, minutes) in rows {
        if exclude_appointment == Some(id.as_str()) {
            continue;
        }
        let start = parse_timestamp(&start)?;
        intervals.push((start, start + Duration::minutes(minutes)));
    }
    Ok(intervals)
}

/// Bookable slots for a worker on a given day. Resolves the salon's working
/// hours for that weekday (no row means closed), then runs the pure walk
/// against the worker's currently persisted calendar.
pub async fn available_slots(
    pool: &SqlitePool,
    salon_id: &str,
    worker_id: &str,
    date: NaiveDate,
    service_duration_minutes: i64,
) -> Result<Vec<Slot>, BookingError> {
    if service_duration_minutes <= 0 {
        return Err(BookingError::Validation(
            "service duration must be positive".to_string(),
        ));
    }

    let weekday = date.weekday().num_days_from_monday() as i64;
    let hours = sqlx::query_as::<_, WorkingHoursRow>(
        "SELECT salon_id, weekday, open_minutes, close_minutes FROM working_hours WHERE salon_id = ? AND weekday = ?",
    )
    .bind(salon_id)
    .bind(weekday)
    .fetch_optional(pool)
    .await?;

    let Some(hours) = hours else {
        return Ok(Vec::new());
    };

    let midnight = Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN));
    let open = midnight + Duration::minutes(hours.open_minutes);
    let close = midnight + Duration::minutes(hours.close_minutes);

    let occupied = occupied_intervals(pool, worker_id, None).await?;
    // Only intervals touching this day's window matter for the walk.
    let occupied: Vec<_> = occupied
        .into_iter()
        .filter(|(start, end)| *start < close && *end > open)
        .collect();

    Ok(day_slots(open, close, service_duration_minutes, &occupied))
}
