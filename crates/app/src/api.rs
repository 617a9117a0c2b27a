use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use boxoffice_booking::{BookingEngine, BookingError, EventCatalog};
use boxoffice_models::{BookingStatus, EventUpdate, NewEvent};
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthUser, Customer, Organizer};
use crate::error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub engine: BookingEngine,
    pub catalog: EventCatalog,
    pub jwt_secret: Arc<str>,
}

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/events", get(list_events).post(create_event))
        .route("/events/{id}", get(get_event))
        .route("/events/{id}/book", post(book_event))
        .route("/users/me", get(me))
        .route("/users/me/bookings", get(my_bookings))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/cancel", patch(cancel_booking))
        .route("/organizers/me/events", get(organizer_events))
        .route(
            "/organizers/me/events/{id}",
            get(organizer_event).put(update_event).delete(delete_event),
        )
        .route("/organizers/me/events/{id}/bookings", get(event_bookings))
        .route("/organizers/me/bookings", get(organizer_bookings))
        .route("/organizers/me/dashboard", get(dashboard));

    Router::new()
        .nest("/api", api_routes)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "ok",
        "version": crate::version_string()
    }))
}

async fn not_found() -> ApiError {
    ApiError::Booking(BookingError::NotFound("route"))
}

// --- Bookings ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookRequest {
    #[serde(alias = "seatNumber")]
    seat_count: Option<i64>,
}

async fn book_event(
    State(state): State<AppState>,
    Customer(user): Customer,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<BookRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Path(event_id) = path?;
    let Json(body) = body?;
    let seat_count = body
        .seat_count
        .ok_or_else(|| BookingError::invalid("seatCount is required"))?;
    let booking = state.engine.book_event(user.id, event_id, seat_count).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Event booked successfully",
        "booking": booking
    })))
}

async fn me(AuthUser(user): AuthUser) -> Json<Value> {
    Json(json!({ "success": true, "user": user }))
}

#[derive(Deserialize)]
struct BookingsQuery {
    status: Option<String>,
}

async fn my_bookings(
    State(state): State<AppState>,
    Customer(user): Customer,
    query: Result<Query<BookingsQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(query) = query?;
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(s) => Some(s.parse::<BookingStatus>().map_err(BookingError::invalid)?),
    };
    let bookings = state.engine.user_bookings(user.id, status).await?;
    Ok(Json(json!({
        "success": true,
        "count": bookings.len(),
        "bookings": bookings
    })))
}

async fn get_booking(
    State(state): State<AppState>,
    Customer(user): Customer,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(booking_id) = path?;
    let booking = state.engine.user_booking(user.id, booking_id).await?;
    Ok(Json(json!({ "success": true, "booking": booking })))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Customer(user): Customer,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(booking_id) = path?;
    let booking = state.engine.cancel_booking(user.id, booking_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Booking cancelled",
        "booking": booking
    })))
}

// --- Events ---

async fn list_events(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let events = state.catalog.list_events().await?;
    Ok(Json(json!({
        "success": true,
        "count": events.len(),
        "events": events
    })))
}

async fn get_event(State(state): State<AppState>, path: Result<Path<i64>, PathRejection>) -> ApiResult<Json<Value>> {
    let Path(event_id) = path?;
    let event = state.catalog.get_event(event_id).await?;
    Ok(Json(json!({ "success": true, "event": event })))
}

async fn create_event(
    State(state): State<AppState>,
    Organizer(user): Organizer,
    body: Result<Json<NewEvent>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(new_event) = body?;
    let event = state.catalog.create_event(user.id, new_event).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Event created successfully",
            "event": event
        })),
    ))
}

// --- Organizers ---

async fn organizer_events(State(state): State<AppState>, Organizer(user): Organizer) -> ApiResult<Json<Value>> {
    let events = state.catalog.organizer_events(user.id).await?;
    Ok(Json(json!({
        "success": true,
        "count": events.len(),
        "events": events
    })))
}

async fn organizer_event(
    State(state): State<AppState>,
    Organizer(user): Organizer,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(event_id) = path?;
    let event = state.catalog.owned_event(user.id, event_id).await?;
    Ok(Json(json!({ "success": true, "event": event })))
}

async fn update_event(
    State(state): State<AppState>,
    Organizer(user): Organizer,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<EventUpdate>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Path(event_id) = path?;
    let Json(update) = body?;
    let event = state.catalog.update_event(user.id, event_id, update).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Event updated successfully",
        "event": event
    })))
}

async fn delete_event(
    State(state): State<AppState>,
    Organizer(user): Organizer,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(event_id) = path?;
    state.catalog.delete_event(user.id, event_id).await?;
    Ok(Json(json!({ "success": true, "message": "Event deleted successfully" })))
}

async fn event_bookings(
    State(state): State<AppState>,
    Organizer(user): Organizer,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(event_id) = path?;
    let bookings = state.engine.organizer_event_bookings(user.id, event_id).await?;
    Ok(Json(json!({
        "success": true,
        "count": bookings.len(),
        "bookings": bookings
    })))
}

async fn organizer_bookings(State(state): State<AppState>, Organizer(user): Organizer) -> ApiResult<Json<Value>> {
    let bookings = state.engine.organizer_bookings(user.id).await?;
    Ok(Json(json!({
        "success": true,
        "count": bookings.len(),
        "bookings": bookings
    })))
}

async fn dashboard(State(state): State<AppState>, Organizer(user): Organizer) -> ApiResult<Json<Value>> {
    let stats = state.catalog.dashboard(user.id).await?;
    let mut body = serde_json::to_value(stats).map_err(anyhow::Error::from)?;
    body["success"] = json!(true);
    Ok(Json(body))
}
