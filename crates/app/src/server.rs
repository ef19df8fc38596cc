use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use billet_db::{CodeGenerator, ReservationError, ledger, registry};
use billet_models::{
    Availability, AttendeeInfo, BookingCancellation, CancellationResult, CheckInResult, Event,
    NewEvent, NewTicketType, Reservation, ReservationBatch, TicketType,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ApiError;
use crate::version_string;

/// Identity of the caller, set by the upstream auth gateway.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub codes: Arc<CodeGenerator>,
}

/// Opaque account id of the authenticated caller.
pub struct UserId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or(ApiError::MissingIdentity)
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// --- Events & ticket types ---

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": version_string()
    }))
}

async fn api_create_event(
    State(state): State<AppState>,
    Json(body): Json<NewEvent>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let event = registry::create_event(&state.pool, &body).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn api_get_event(State(state): State<AppState>, Path(event_id): Path<i64>) -> ApiResult<Event> {
    Ok(Json(registry::get_event(&state.pool, event_id).await?))
}

async fn api_create_ticket_type(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    Json(body): Json<NewTicketType>,
) -> Result<(StatusCode, Json<TicketType>), ApiError> {
    let ticket_type = registry::create_ticket_type(&state.pool, event_id, &body).await?;
    Ok((StatusCode::CREATED, Json(ticket_type)))
}

#[derive(Deserialize)]
struct TicketTypesQuery {
    event: i64,
}

async fn api_list_ticket_types(
    State(state): State<AppState>,
    Query(params): Query<TicketTypesQuery>,
) -> ApiResult<Vec<TicketType>> {
    Ok(Json(registry::list_for_event(&state.pool, params.event).await?))
}

async fn api_get_ticket_type(
    State(state): State<AppState>,
    Path(ticket_type_id): Path<i64>,
) -> ApiResult<TicketType> {
    Ok(Json(registry::get(&state.pool, ticket_type_id).await?))
}

async fn api_ticket_type_availability(
    State(state): State<AppState>,
    Path(ticket_type_id): Path<i64>,
) -> ApiResult<Availability> {
    Ok(Json(registry::availability(&state.pool, ticket_type_id).await?))
}

// --- Reservations ---

#[derive(Deserialize)]
struct ReserveRequest {
    ticket_type_id: i64,
    attendees: Vec<AttendeeInfo>,
}

async fn api_reserve(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(body): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<ReservationBatch>), ApiError> {
    let batch = billet_db::reserve(
        &state.pool,
        &state.codes,
        &user_id,
        body.ticket_type_id,
        &body.attendees,
        Utc::now(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

#[derive(Deserialize)]
struct CancelRequest {
    reservation_id: i64,
}

async fn api_cancel(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(body): Json<CancelRequest>,
) -> ApiResult<CancellationResult> {
    let result = billet_db::cancel(&state.pool, body.reservation_id, &user_id, Utc::now()).await?;
    Ok(Json(result))
}

async fn api_cancel_booking(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(booking_id): Path<String>,
) -> ApiResult<BookingCancellation> {
    let result = billet_db::cancel_booking(&state.pool, &booking_id, &user_id, Utc::now()).await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct CheckInRequest {
    code: String,
    event_id: i64,
}

async fn api_check_in(
    State(state): State<AppState>,
    Json(body): Json<CheckInRequest>,
) -> ApiResult<CheckInResult> {
    let result = billet_db::check_in(&state.pool, &body.code, body.event_id, Utc::now()).await?;
    Ok(Json(result))
}

async fn api_get_reservation(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(reservation_id): Path<i64>,
) -> ApiResult<Reservation> {
    let reservation = ledger::get(&state.pool, reservation_id).await?;
    if reservation.user_id != user_id {
        return Err(ReservationError::NotOwner.into());
    }
    Ok(Json(reservation))
}

async fn api_get_booking(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(booking_id): Path<String>,
) -> ApiResult<Vec<Reservation>> {
    let reservations = ledger::list_for_booking(&state.pool, &booking_id).await?;
    if reservations.iter().any(|r| r.user_id != user_id) {
        return Err(ReservationError::NotOwner.into());
    }
    Ok(Json(reservations))
}

async fn api_my_reservations(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> ApiResult<Vec<Reservation>> {
    Ok(Json(ledger::list_for_user(&state.pool, &user_id).await?))
}

// --- Router ---

pub fn router(state: AppState, cors_origin: Option<&str>) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/events", post(api_create_event))
        .route("/events/{id}", get(api_get_event))
        .route("/events/{id}/ticket-types", post(api_create_ticket_type))
        .route("/ticket-types", get(api_list_ticket_types))
        .route("/ticket-types/{id}", get(api_get_ticket_type))
        .route("/ticket-types/{id}/availability", get(api_ticket_type_availability))
        .route("/reserve", post(api_reserve))
        .route("/cancel", post(api_cancel))
        .route("/check-in", post(api_check_in))
        .route("/reservations/{id}", get(api_get_reservation))
        .route("/bookings/{id}", get(api_get_booking))
        .route("/bookings/{id}/cancel", post(api_cancel_booking))
        .route("/users/me/reservations", get(api_my_reservations));

    let mut app = Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http());

    if let Some(origin) = cors_origin {
        let cors = CorsLayer::new()
            .allow_origin(origin.parse::<HeaderValue>()?)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any);
        app = app.layer(cors);
    }

    Ok(app.with_state(state))
}

pub async fn run_server(port: u16, state: AppState, cors_origin: Option<&str>) -> anyhow::Result<()> {
    info!("billet v{}", version_string());

    let app = router(state, cors_origin)?;

    let addr = format!("0.0.0.0:{port}");
    info!("Listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
