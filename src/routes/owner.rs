use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{hash_password, new_id, owner_validator, AuthUser},
    db::log_history,
    errors::BookingError,
    lifecycle::{apply, LifecycleEvent},
    models::{Actor, AppointmentRow, Role, ROLE_WORKER},
    state::AppState,
};

#[derive(Debug, Deserialize)]
struct ReassignBody {
    new_worker_id: String,
}

#[derive(Debug, Deserialize)]
struct WorkerCreateBody {
    username: String,
    display_name: String,
    password: String,
    phone: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/owner")
            .wrap(HttpAuthentication::basic(owner_validator))
            .service(web::resource("/appointments").route(web::get().to(list_appointments)))
            .service(web::resource("/appointments/{id}/accept").route(web::post().to(accept)))
            .service(web::resource("/appointments/{id}/reject").route(web::post().to(reject)))
            .service(web::resource("/appointments/{id}/cancel").route(web::post().to(cancel)))
            .service(
                web::resource("/appointments/{id}/reassign").route(web::post().to(reassign)),
            )
            .service(
                web::resource("/workers")
                    .route(web::get().to(list_workers))
                    .route(web::post().to(create_worker)),
            ),
    );
}

fn actor(auth: &AuthUser) -> Actor {
    Actor::new(auth.id.clone(), Role::Owner)
}

async fn list_appointments(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, BookingError> {
    let salon_id = auth
        .salon_id
        .clone()
        .ok_or_else(|| BookingError::NotFound("salon".to_string()))?;
    let rows = sqlx::query_as::<_, AppointmentRow>(
        "SELECT * FROM appointments WHERE salon_id = ? ORDER BY scheduled_start DESC",
    )
    .bind(&salon_id)
    .fetch_all(&state.db)
    .await?;

    let summaries: Vec<_> = rows
        .iter()
        .map(|row| {
            json!({
                "id": row.id,
                "client_name": row.client_name,
                "worker_id": row.worker_id,
                "scheduled_start": row.scheduled_start,
                "duration_minutes": row.duration_minutes,
                "total_price_cents": row.total_price_cents,
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

async fn reassign(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<ReassignBody>,
) -> Result<HttpResponse, BookingError> {
    let appointment = apply(
        &state,
        &actor(&auth),
        &path.into_inner(),
        LifecycleEvent::Reassign {
            new_worker_id: body.into_inner().new_worker_id,
        },
    )
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "appointment": appointment })))
}

async fn list_workers(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, BookingError> {
    let salon_id = auth
        .salon_id
        .clone()
        .ok_or_else(|| BookingError::NotFound("salon".to_string()))?;
    let rows = sqlx::query_as::<_, (String, String, i64)>(
        "SELECT id, display_name, active FROM users WHERE role = 'worker' AND salon_id = ? ORDER BY display_name",
    )
    .bind(&salon_id)
    .fetch_all(&state.db)
    .await?;

    let workers: Vec<_> = rows
        .into_iter()
        .map(|(id, display_name, active)| {
            json!({ "id": id, "display_name": display_name, "active": active == 1 })
        })
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "workers": workers })))
}

async fn create_worker(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<WorkerCreateBody>,
) -> Result<HttpResponse, BookingError> {
    let body = body.into_inner();
    if body.username.trim().is_empty() {
        return Err(BookingError::Validation("username is required".to_string()));
    }
    if body.display_name.trim().is_empty() {
        return Err(BookingError::Validation(
            "display name is required".to_string(),
        ));
    }
    if body.password.trim().len() < 6 {
        return Err(BookingError::Validation(
            "password must be at least 6 characters".to_string(),
        ));
    }
    let salon_id = auth
        .salon_id
        .clone()
        .ok_or_else(|| BookingError::NotFound("salon".to_string()))?;

    let password_hash = hash_password(&body.password)
        .map_err(|_| BookingError::Validation("password hash failed".to_string()))?;
    let worker_id = new_id();
    sqlx::query(
        r#"INSERT INTO users (id, username, display_name, role, password_hash, salon_id, phone, active, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)"#,
    )
    .bind(&worker_id)
    .bind(body.username.trim())
    .bind(body.display_name.trim())
    .bind(ROLE_WORKER)
    .bind(password_hash)
    .bind(&salon_id)
    .bind(&body.phone)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await?;

    log_history(
        &state.db,
        Some(&auth.id),
        "worker_created",
        None,
        Some(json!({ "worker_id": worker_id })),
    )
    .await;

    Ok(HttpResponse::Created().json(json!({ "ok": true, "worker_id": worker_id })))
}
