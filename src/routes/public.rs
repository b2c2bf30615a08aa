use actix_web::{web, HttpResponse};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use crate::{
    booking::{book, BookingRequest},
    db::fetch_appointment,
    errors::BookingError,
    models::{Actor, Role},
    schedule,
    state::AppState,
};

/// Public booking request body. `service_ids` is the current shape;
/// `service_id` is kept for legacy single-service callers.
#[derive(Debug, Deserialize)]
pub struct BookingBody {
    pub worker_id: String,
    #[serde(default)]
    pub service_ids: Vec<String>,
    pub service_id: Option<String>,
    pub scheduled_start: String,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub skip_availability_check: bool,
}

impl BookingBody {
    pub fn selections(&self) -> Vec<String> {
        if !self.service_ids.is_empty() {
            self.service_ids.clone()
        } else {
            self.service_id.iter().cloned().collect()
        }
    }
}

#[derive(Debug, Deserialize)]
struct AvailabilityQuery {
    worker_id: String,
    date: String,
    duration_minutes: i64,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/book").route(web::post().to(create_booking)))
        .service(web::resource("/availability").route(web::get().to(availability)))
        .service(web::resource("/status/{id}").route(web::get().to(status)))
        .service(web::resource("/health").route(web::get().to(health)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn create_booking(
    state: web::Data<AppState>,
    body: web::Json<BookingBody>,
) -> Result<HttpResponse, BookingError> {
    let body = body.into_inner();
    let client_name = body.client_name.clone().unwrap_or_default();

    let requester_id = body.client_id.clone().unwrap_or_else(|| "guest".to_string());
    let request = BookingRequest {
        requester: Actor::new(requester_id, Role::Client),
        client_id: body.client_id.clone(),
        client_name,
        client_phone: body.client_phone.clone(),
        worker_id: body.worker_id.clone(),
        service_ids: body.selections(),
        scheduled_start: body.scheduled_start.clone(),
        notes: body.notes.clone(),
        walk_in: false,
        skip_availability_check: body.skip_availability_check,
        idempotency_key: None,
    };

    let appointment = book(&state, request).await?;
    Ok(HttpResponse::Created().json(json!({ "ok": true, "appointment": appointment })))
}

async fn availability(
    state: web::Data<AppState>,
    query: web::Query<AvailabilityQuery>,
) -> Result<HttpResponse, BookingError> {
    let query = query.into_inner();
    let date = NaiveDate::parse_from_str(&query.date, "%Y-%m-%d")
        .map_err(|_| BookingError::Validation(format!("invalid date '{}'", query.date)))?;

    let salon_id = sqlx::query_as::<_, (Option<String>,)>(
        "SELECT salon_id FROM users WHERE id = ? AND role = 'worker' AND active = 1 LIMIT 1",
    )
    .bind(&query.worker_id)
    .fetch_optional(&state.db)
    .await?
    .and_then(|(salon_id,)| salon_id)
    .ok_or_else(|| BookingError::NotFound(format!("worker {}", query.worker_id)))?;

    let slots = schedule::available_slots(
        &state.db,
        &salon_id,
        &query.worker_id,
        date,
        query.duration_minutes,
    )
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "ok": true, "slots": slots })))
}

async fn status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, BookingError> {
    let appointment = fetch_appointment(&state.db, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "appointment": {
            "id": appointment.id,
            "status": appointment.status,
            "scheduled_start": appointment.scheduled_start,
            "duration_minutes": appointment.duration_minutes,
            "services": appointment.services,
        },
    })))
}
