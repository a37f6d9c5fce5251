/// Bookings: requests, lifecycle, and pricing
///
/// A booking starts `pending`, is confirmed by an admin or through the emailed
/// voucher link, becomes `active` when the car is handed over, and ends either
/// `completed` (possibly early, with a prorated bill) or `cancelled`.
pub mod manager;
pub mod rules;

pub use manager::BookingManager;

use crate::{
    error::{RentalError, RentalResult},
    fleet::{normalize_text, CarSummary},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

/// Booking status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Active,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Active,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    /// Statuses that hold the car for their date range
    pub const BLOCKING: [BookingStatus; 2] = [BookingStatus::Confirmed, BookingStatus::Active];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Active => "active",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

impl FromStr for BookingStatus {
    type Err = RentalError;

    fn from_str(s: &str) -> RentalResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "active" => Ok(BookingStatus::Active),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            _ => Err(RentalError::Validation(format!("Invalid booking status: {}", s))),
        }
    }
}

/// Whether the customer picks the car up or has it dropped off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingKind {
    #[default]
    Pickup,
    Dropoff,
}

impl BookingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingKind::Pickup => "pickup",
            BookingKind::Dropoff => "dropoff",
        }
    }
}

impl FromStr for BookingKind {
    type Err = RentalError;

    fn from_str(s: &str) -> RentalResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "pickup" => Ok(BookingKind::Pickup),
            "dropoff" => Ok(BookingKind::Dropoff),
            _ => Err(RentalError::Validation(format!("Invalid booking kind: {}", s))),
        }
    }
}

/// Driver identity captured with the booking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub given_names: String,
    pub surname: String,
    pub age: i64,
    pub email: String,
    pub mobile: String,
    pub licence_country_region: String,
}

impl Driver {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.given_names, self.surname).trim().to_string()
    }
}

/// Booking record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub name: String,
    pub status: BookingStatus,
    pub kind: BookingKind,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_fee: Option<i64>,
    pub cancellation_reason: Option<String>,
    pub ended_at: Option<DateTime<Utc>>,
    pub billed_days: Option<i64>,
    pub billed_total: Option<i64>,
    pub ended_reason: Option<String>,
    pub voucher_token: String,
    pub pickup_date: NaiveDate,
    pub dropoff_date: NaiveDate,
    pub total_price: i64,
    pub driver: Driver,
    pub car_id: Option<String>,
    pub car_name: Option<String>,
    /// Current details of the linked car, when it still exists
    pub car: Option<CarSummary>,
    pub created_by_email: String,
}

impl Booking {
    pub fn owner_emails(&self) -> [&str; 2] {
        [self.driver.email.as_str(), self.created_by_email.as_str()]
    }

    /// Label for the car, falling back to the name captured at booking time
    pub fn car_label(&self) -> String {
        match (&self.car, &self.car_name) {
            (Some(car), _) => match &car.brand {
                Some(brand) => format!("{} ({})", car.name, brand),
                None => car.name.clone(),
            },
            (None, Some(name)) => name.clone(),
            (None, None) => "No car linked".to_string(),
        }
    }

    /// Nightly rate for billing: the car's current price, else the booked rate
    pub fn daily_rate(&self) -> i64 {
        if let Some(car) = &self.car {
            return car.price_per_day;
        }
        let days = rules::rental_days(self.pickup_date, self.dropoff_date);
        if days > 0 {
            self.total_price / days
        } else {
            self.total_price
        }
    }
}

/// Customer booking request
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    #[validate(length(min = 1, message = "Car information is missing"))]
    pub car_id: String,
    #[serde(default)]
    pub kind: BookingKind,
    #[serde(default)]
    pub location: Option<String>,
    pub pickup_date: NaiveDate,
    pub dropoff_date: NaiveDate,
    #[validate(length(min = 1, max = 120, message = "Please enter the driver's given names"))]
    pub driver_given_names: String,
    #[validate(length(min = 1, max = 120, message = "Please enter the driver's surname"))]
    pub driver_surname: String,
    #[validate(range(min = 18, max = 120, message = "Driver must be at least 18 years old"))]
    pub driver_age: i64,
    #[validate(email(message = "Please enter a valid driver email address"))]
    pub driver_email: String,
    #[validate(length(min = 1, max = 40, message = "Please enter a mobile number"))]
    pub driver_mobile: String,
    #[validate(length(min = 1, max = 80, message = "Please enter the licence country/region"))]
    pub driver_licence_country_region: String,
}

impl BookingRequest {
    pub fn normalized(mut self) -> Self {
        self.car_id = self.car_id.trim().to_string();
        self.location = normalize_optional(self.location);
        self.driver_given_names = self.driver_given_names.trim().to_string();
        self.driver_surname = self.driver_surname.trim().to_string();
        self.driver_email = self.driver_email.trim().to_lowercase();
        self.driver_mobile = self.driver_mobile.trim().to_string();
        self.driver_licence_country_region = self.driver_licence_country_region.trim().to_string();
        self
    }

    pub fn driver(&self) -> Driver {
        Driver {
            given_names: self.driver_given_names.clone(),
            surname: self.driver_surname.clone(),
            age: self.driver_age,
            email: self.driver_email.clone(),
            mobile: self.driver_mobile.clone(),
            licence_country_region: self.driver_licence_country_region.clone(),
        }
    }
}

/// New dates (and optionally service details) for an existing booking
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    pub pickup_date: NaiveDate,
    pub dropoff_date: NaiveDate,
    #[serde(default)]
    pub kind: Option<BookingKind>,
    #[serde(default)]
    pub location: Option<String>,
}

pub(crate) fn normalize_optional(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Admin booking queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingView {
    /// Confirmed queue: `confirmedAt` set, still confirmed or active
    #[default]
    Confirmed,
    /// Unconfirmed requests
    Pending,
    History,
    Cancelled,
    All,
}

/// Owner-side list filter
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub q: Option<String>,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        if let Some(status) = self.status {
            if booking.status != status {
                return false;
            }
        }
        if let Some(q) = self.q.as_deref().map(normalize_text).filter(|q| !q.is_empty()) {
            let haystack = normalize_text(
                &[
                    booking.car_label(),
                    booking.status.as_str().to_string(),
                    booking.pickup_date.to_string(),
                    booking.dropoff_date.to_string(),
                    booking.location.clone().unwrap_or_default(),
                    booking.kind.as_str().to_string(),
                ]
                .join(" "),
            );
            if !haystack.contains(&q) {
                return false;
            }
        }
        true
    }
}

/// Booking totals per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub total: i64,
    pub pending: i64,
    pub confirmed: i64,
    pub active: i64,
    pub completed: i64,
    pub cancelled: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: BookingStatus, count: i64) {
        self.total += count;
        match status {
            BookingStatus::Pending => self.pending += count,
            BookingStatus::Confirmed => self.confirmed += count,
            BookingStatus::Active => self.active += count,
            BookingStatus::Completed => self.completed += count,
            BookingStatus::Cancelled => self.cancelled += count,
        }
    }
}

/// Price preview for a date range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub car_id: String,
    pub pickup_date: NaiveDate,
    pub dropoff_date: NaiveDate,
    pub days: i64,
    pub price_per_day: i64,
    pub total_price: i64,
}

/// Result of a booking request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedBooking {
    pub booking: Booking,
    /// Voucher link, also shown to the customer in case the email is lost
    pub confirm_url: String,
    pub email_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Result of a voucher confirmation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherConfirmation {
    pub booking: Booking,
    pub already_confirmed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        for status in BookingStatus::ALL {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
        }
        assert_eq!("ACTIVE".parse::<BookingStatus>().unwrap(), BookingStatus::Active);
        assert!("returned".parse::<BookingStatus>().is_err());
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(!BookingStatus::Active.is_terminal());
    }

    #[test]
    fn test_request_validation_messages() {
        let request = BookingRequest {
            car_id: "c1".to_string(),
            kind: BookingKind::Pickup,
            location: Some("  ".to_string()),
            pickup_date: NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
            dropoff_date: NaiveDate::from_ymd_opt(2025, 6, 13).unwrap(),
            driver_given_names: "Juan".to_string(),
            driver_surname: "Cruz".to_string(),
            driver_age: 17,
            driver_email: " Juan@Example.com ".to_string(),
            driver_mobile: "0917".to_string(),
            driver_licence_country_region: "PH".to_string(),
        }
        .normalized();

        assert!(request.location.is_none());
        assert_eq!(request.driver_email, "juan@example.com");

        let err = RentalError::from(request.validate().unwrap_err());
        assert_eq!(err.to_string(), "Driver must be at least 18 years old");
    }

    #[test]
    fn test_counts() {
        let mut counts = StatusCounts::default();
        counts.add(BookingStatus::Pending, 2);
        counts.add(BookingStatus::Active, 1);
        assert_eq!(counts.total, 3);
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.active, 1);
    }
}
