/// Customer booking endpoints
use super::{ApiJson, ApiQuery};
use crate::{
    auth::Session,
    booking::{
        Booking, BookingFilter, BookingRequest, CreatedBooking, RescheduleRequest, StatusCounts,
        VoucherConfirmation,
    },
    context::AppContext,
    error::RentalResult,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::extract::WithRejection;
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/bookings", post(create_booking))
        .route("/api/bookings/confirm", post(confirm_voucher))
        .route("/api/bookings/mine", get(my_bookings))
        .route("/api/bookings/:id", patch(reschedule))
        .route("/api/bookings/:id/cancel", post(cancel))
        .route("/api/bookings/:id/end", post(end_early))
}

async fn create_booking(
    State(ctx): State<AppContext>,
    session: Session,
    WithRejection(Json(request), _): ApiJson<BookingRequest>,
) -> RentalResult<(StatusCode, Json<CreatedBooking>)> {
    let created = ctx.booking_manager.create_booking(&session, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
struct ConfirmRequest {
    token: String,
}

/// Voucher link target; the token itself is the credential
async fn confirm_voucher(
    State(ctx): State<AppContext>,
    WithRejection(Json(request), _): ApiJson<ConfirmRequest>,
) -> RentalResult<Json<VoucherConfirmation>> {
    let confirmation = ctx.booking_manager.confirm_voucher(&request.token).await?;
    Ok(Json(confirmation))
}

#[derive(Debug, Serialize)]
struct MyBookingsResponse {
    bookings: Vec<Booking>,
    counts: StatusCounts,
}

async fn my_bookings(
    State(ctx): State<AppContext>,
    session: Session,
    WithRejection(Query(filter), _): ApiQuery<BookingFilter>,
) -> RentalResult<Json<MyBookingsResponse>> {
    let bookings = ctx.booking_manager.list_for_owner(&session, &filter).await?;
    let counts = ctx
        .booking_manager
        .status_counts(Some(&session.email))
        .await?;
    Ok(Json(MyBookingsResponse { bookings, counts }))
}

async fn reschedule(
    State(ctx): State<AppContext>,
    session: Session,
    Path(id): Path<String>,
    WithRejection(Json(request), _): ApiJson<RescheduleRequest>,
) -> RentalResult<Json<Booking>> {
    let booking = ctx.booking_manager.reschedule(&session, &id, request).await?;
    Ok(Json(booking))
}

#[derive(Debug, Default, Deserialize)]
struct ReasonBody {
    #[serde(default)]
    reason: Option<String>,
}

async fn cancel(
    State(ctx): State<AppContext>,
    session: Session,
    Path(id): Path<String>,
    body: Option<Json<ReasonBody>>,
) -> RentalResult<Json<Booking>> {
    let Json(body) = body.unwrap_or_default();
    let booking = ctx.booking_manager.cancel(&session, &id, body.reason).await?;
    Ok(Json(booking))
}

async fn end_early(
    State(ctx): State<AppContext>,
    session: Session,
    Path(id): Path<String>,
    body: Option<Json<ReasonBody>>,
) -> RentalResult<Json<Booking>> {
    let Json(body) = body.unwrap_or_default();
    let booking = ctx.booking_manager.end_early(&session, &id, body.reason).await?;
    Ok(Json(booking))
}
