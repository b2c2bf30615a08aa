use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{worker_validator, AuthUser},
    booking::{book, BookingRequest},
    errors::BookingError,
    lifecycle::{apply, LifecycleEvent},
    models::{Actor, AppointmentRow, Role},
    state::AppState,
};

#[derive(Debug, Deserialize)]
struct CompleteBody {
    payment_method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WalkInBody {
    #[serde(default)]
    service_ids: Vec<String>,
    service_id: Option<String>,
    scheduled_start: String,
    client_name: String,
    client_phone: Option<String>,
    notes: Option<String>,
    #[serde(default)]
    skip_availability_check: bool,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/worker")
            .wrap(HttpAuthentication::basic(worker_validator))
            .service(web::resource("/appointments").route(web::get().to(list_appointments)))
            .service(web::resource("/appointments/{id}/accept").route(web::post().to(accept)))
            .service(web::resource("/appointments/{id}/reject").route(web::post().to(reject)))
            .service(web::resource("/appointments/{id}/cancel").route(web::post().to(cancel)))
            .service(web::resource("/appointments/{id}/start").route(web::post().to(start)))
            .service(web::resource("/appointments/{id}/complete").route(web::post().to(complete)))
            .service(web::resource("/walkins").route(web::post().to(create_walk_in))),
    );
}

fn actor(auth: &AuthUser) -> Actor {
    Actor::new(auth.id.clone(), Role::Worker)
}

async fn list_appointments(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, BookingError> {
    let rows = sqlx::query_as::<_, AppointmentRow>(
        "SELECT * FROM appointments WHERE worker_id = ? ORDER BY scheduled_start",
    )
    .bind(&auth.id)
    .fetch_all(&state.db)
    .await?;

    let summaries: Vec<_> = rows
        .iter()
        .map(|row| {
            json!({
                "id": row.id,
                "client_name": row.client_name,
                "scheduled_start": row.scheduled_start,
                "duration_minutes": row.duration_minutes,
                "status": row.status,
                "walk_in": row.walk_in != 0,
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "appointments": summaries })))
}

async fn accept(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse, BookingError> {
    let appointment = apply(&state, &actor(&auth), &path.into_inner(), LifecycleEvent::Accept).await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "appointment": appointment })))
}

async fn reject(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse, BookingError> {
    let appointment = apply(&state, &actor(&auth), &path.into_inner(), LifecycleEvent::Reject).await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "appointment": appointment })))
}

async fn cancel(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse, BookingError> {
    let appointment = apply(&state, &actor(&auth), &path.into_inner(), LifecycleEvent::Cancel).await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "appointment": appointment })))
}

async fn start(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse, BookingError> {
    let appointment = apply(&state, &actor(&auth), &path.into_inner(), LifecycleEvent::Start).await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "appointment": appointment })))
}

async fn complete(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<CompleteBody>,
) -> Result<HttpResponse, BookingError> {
    let payment_method = body
        .into_inner()
        .payment_method
        .unwrap_or_else(|| "cash".to_string());
    let appointment = apply(
        &state,
        &actor(&auth),
        &path.into_inner(),
        LifecycleEvent::Complete { payment_method },
    )
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "appointment": appointment })))
}

/// Server entry point for walk-ins, whether recorded live or replayed by a
/// device's sync engine. `X-Idempotency-Key` makes replays no-ops.
async fn create_walk_in(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    req: HttpRequest,
    body: web::Json<WalkInBody>,
) -> Result<HttpResponse, BookingError> {
    let body = body.into_inner();
    let idempotency_key = req
        .headers()
        .get("X-Idempotency-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    let service_ids = if !body.service_ids.is_empty() {
        body.service_ids
    } else {
        body.service_id.into_iter().collect()
    };

    let request = BookingRequest {
        requester: actor(&auth),
        client_id: None,
        client_name: body.client_name,
        client_phone: body.client_phone,
        worker_id: auth.id.clone(),
        service_ids,
        scheduled_start: body.scheduled_start,
        notes: body.notes,
        walk_in: true,
        skip_availability_check: body.skip_availability_check,
        idempotency_key,
    };

    let appointment = book(&state, request).await?;
    Ok(HttpResponse::Created().json(json!({ "ok": true, "appointment": appointment })))
}
