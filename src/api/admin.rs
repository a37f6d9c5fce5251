/// Back-office endpoints
///
/// Every handler takes an [`AdminSession`], so non-admin callers are rejected
/// before any manager is reached.
use super::{tickets::TicketListResponse, ApiJson, ApiQuery};
use crate::{
    auth::AdminSession,
    booking::{Booking, BookingStatus, BookingView, StatusCounts},
    context::AppContext,
    error::RentalResult,
    fleet::{Car, CarFilter, CarInput},
    support::TicketStatus,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post, put},
    Json, Router,
};
use axum_extra::extract::WithRejection;
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        // Bookings
        .route("/api/admin/bookings", get(list_bookings))
        .route(
            "/api/admin/bookings/:id",
            patch(set_booking_status).delete(delete_booking),
        )
        .route("/api/admin/stats", get(get_stats))
        // Cars
        .route("/api/admin/cars", post(create_car))
        .route("/api/admin/cars/:id", put(update_car).delete(delete_car))
        // Support
        .route("/api/admin/support", get(list_support_chats))
        .route("/api/admin/tickets", get(list_all_tickets))
}

#[derive(Debug, Default, Deserialize)]
struct BookingViewQuery {
    #[serde(default)]
    view: BookingView,
    /// Exact status, overriding `view`
    #[serde(default)]
    status: Option<BookingStatus>,
}

#[derive(Debug, Serialize)]
struct BookingListResponse {
    bookings: Vec<Booking>,
}

async fn list_bookings(
    State(ctx): State<AppContext>,
    AdminSession(session): AdminSession,
    WithRejection(Query(query), _): ApiQuery<BookingViewQuery>,
) -> RentalResult<Json<BookingListResponse>> {
    let bookings = match query.status {
        Some(status) => ctx.booking_manager.list_by_status(status).await?,
        None => ctx.booking_manager.list_view(&session, query.view).await?,
    };
    Ok(Json(BookingListResponse { bookings }))
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: BookingStatus,
}

async fn set_booking_status(
    State(ctx): State<AppContext>,
    AdminSession(session): AdminSession,
    Path(id): Path<String>,
    WithRejection(Json(request), _): ApiJson<StatusRequest>,
) -> RentalResult<Json<Booking>> {
    let booking = ctx
        .booking_manager
        .transition_status(&session, &id, request.status)
        .await?;
    Ok(Json(booking))
}

async fn delete_booking(
    State(ctx): State<AppContext>,
    AdminSession(session): AdminSession,
    Path(id): Path<String>,
) -> RentalResult<StatusCode> {
    ctx.booking_manager.delete_booking(&session, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct CarStats {
    total: usize,
    available: usize,
    featured: usize,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct TicketStats {
    open: usize,
    accepted: usize,
    closed: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    bookings: StatusCounts,
    cars: CarStats,
    tickets: TicketStats,
}

/// Dashboard overview
async fn get_stats(
    State(ctx): State<AppContext>,
    AdminSession(session): AdminSession,
) -> RentalResult<Json<StatsResponse>> {
    let bookings = ctx.booking_manager.status_counts(None).await?;

    let cars = ctx.car_manager.list_cars(&CarFilter::default()).await?;
    let car_stats = CarStats {
        total: cars.len(),
        available: cars.iter().filter(|c| c.is_available).count(),
        featured: cars.iter().filter(|c| c.is_featured).count(),
    };

    let mut ticket_stats = TicketStats::default();
    for ticket in ctx.ticket_manager.list_all_tickets(&session).await? {
        match ticket.status {
            TicketStatus::Open => ticket_stats.open += 1,
            TicketStatus::Accepted => ticket_stats.accepted += 1,
            TicketStatus::Closed => ticket_stats.closed += 1,
        }
    }

    Ok(Json(StatsResponse {
        bookings,
        cars: car_stats,
        tickets: ticket_stats,
    }))
}

async fn create_car(
    State(ctx): State<AppContext>,
    AdminSession(session): AdminSession,
    WithRejection(Json(input), _): ApiJson<CarInput>,
) -> RentalResult<(StatusCode, Json<Car>)> {
    let car = ctx.car_manager.create_car(&session, input).await?;
    Ok((StatusCode::CREATED, Json(car)))
}

async fn update_car(
    State(ctx): State<AppContext>,
    AdminSession(session): AdminSession,
    Path(id): Path<String>,
    WithRejection(Json(input), _): ApiJson<CarInput>,
) -> RentalResult<Json<Car>> {
    let car = ctx.car_manager.update_car(&session, &id, input).await?;
    Ok(Json(car))
}

async fn delete_car(
    State(ctx): State<AppContext>,
    AdminSession(session): AdminSession,
    Path(id): Path<String>,
) -> RentalResult<StatusCode> {
    ctx.car_manager.delete_car(&session, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_support_chats(
    State(ctx): State<AppContext>,
    AdminSession(session): AdminSession,
) -> RentalResult<Json<TicketListResponse>> {
    let tickets = ctx.ticket_manager.list_support_tickets(&session).await?;
    Ok(Json(TicketListResponse { tickets }))
}

async fn list_all_tickets(
    State(ctx): State<AppContext>,
    AdminSession(session): AdminSession,
) -> RentalResult<Json<TicketListResponse>> {
    let tickets = ctx.ticket_manager.list_all_tickets(&session).await?;
    Ok(Json(TicketListResponse { tickets }))
}
