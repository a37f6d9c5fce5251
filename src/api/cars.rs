/// Public catalogue endpoints
use super::ApiQuery;
use crate::{
    booking::Quote,
    context::AppContext,
    error::{RentalError, RentalResult},
    fleet::{Car, CarFilter},
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use axum_extra::extract::WithRejection;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/cars", get(list_cars))
        .route("/api/cars/:id", get(get_car))
        .route("/api/brands", get(list_brands))
        .route("/api/quote", get(quote))
}

#[derive(Debug, Serialize)]
struct CarListResponse {
    cars: Vec<Car>,
}

async fn list_cars(
    State(ctx): State<AppContext>,
    WithRejection(Query(filter), _): ApiQuery<CarFilter>,
) -> RentalResult<Json<CarListResponse>> {
    let cars = ctx.car_manager.list_cars(&filter).await?;
    Ok(Json(CarListResponse { cars }))
}

async fn get_car(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> RentalResult<Json<Car>> {
    let car = ctx
        .car_manager
        .get_car(&id)
        .await?
        .ok_or_else(|| RentalError::NotFound(format!("Car {} not found", id)))?;
    Ok(Json(car))
}

#[derive(Debug, Serialize)]
struct BrandListResponse {
    brands: Vec<String>,
}

async fn list_brands(State(ctx): State<AppContext>) -> RentalResult<Json<BrandListResponse>> {
    let brands = ctx.car_manager.list_brands().await?;
    Ok(Json(BrandListResponse { brands }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteQuery {
    car_id: String,
    pickup_date: NaiveDate,
    dropoff_date: NaiveDate,
}

/// Price preview shown before a booking is placed
async fn quote(
    State(ctx): State<AppContext>,
    WithRejection(Query(query), _): ApiQuery<QuoteQuery>,
) -> RentalResult<Json<Quote>> {
    let quote = ctx
        .booking_manager
        .quote(&query.car_id, query.pickup_date, query.dropoff_date)
        .await?;
    Ok(Json(quote))
}
