/// API routes and handlers
pub mod admin;
pub mod bookings;
pub mod cars;
pub mod tickets;

use crate::{context::AppContext, error::RentalError};
use axum::{extract::Query, Json, Router};
use axum_extra::extract::WithRejection;

/// JSON body whose rejections answer with the usual error body
pub(crate) type ApiJson<T> = WithRejection<Json<T>, RentalError>;

/// Query string whose rejections answer with the usual error body
pub(crate) type ApiQuery<T> = WithRejection<Query<T>, RentalError>;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(cars::routes())
        .merge(bookings::routes())
        .merge(tickets::routes())
        .merge(admin::routes())
}
