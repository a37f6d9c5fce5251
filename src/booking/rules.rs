/// Booking rules: date validation, overlap, pricing, and the status table
use super::BookingStatus;
use crate::error::{RentalError, RentalResult};
use chrono::NaiveDate;

/// Cancelling before the pickup date is free
pub const PRE_START_CANCELLATION_FEE: i64 = 0;

/// Whole days between pickup and dropoff, zero for empty or inverted ranges
pub fn rental_days(pickup: NaiveDate, dropoff: NaiveDate) -> i64 {
    (dropoff - pickup).num_days().max(0)
}

/// Half-open overlap of `[existing_pickup, existing_dropoff)` and `[pickup, dropoff)`
pub fn overlaps(
    existing_pickup: NaiveDate,
    existing_dropoff: NaiveDate,
    pickup: NaiveDate,
    dropoff: NaiveDate,
) -> bool {
    existing_pickup < dropoff && existing_dropoff > pickup
}

/// Check a requested trip and return its length in days
pub fn validate_trip(
    pickup: NaiveDate,
    dropoff: NaiveDate,
    today: NaiveDate,
    max_days: i64,
) -> RentalResult<i64> {
    if pickup < today {
        return Err(RentalError::Validation(
            "Pickup date cannot be in the past".to_string(),
        ));
    }
    if dropoff <= pickup {
        return Err(RentalError::Validation(
            "Drop-off date must be after pickup date".to_string(),
        ));
    }

    let days = rental_days(pickup, dropoff);
    if days > max_days {
        return Err(RentalError::Validation(format!(
            "Bookings are limited to {} days. Please adjust your dates",
            max_days
        )));
    }

    Ok(days)
}

/// Price of `days` at `rate` per day
pub fn charge(days: i64, rate: i64) -> RentalResult<i64> {
    days.checked_mul(rate).ok_or_else(|| {
        RentalError::Validation("Price is too large for this booking".to_string())
    })
}

/// Days charged when a started rental ends: pickup day through today inclusive, at least one
pub fn billed_days(pickup: NaiveDate, today: NaiveDate) -> i64 {
    ((today - pickup).num_days() + 1).max(1)
}

/// What a cancel request turns into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelPath {
    /// Not started: cancelled with the pre-start fee
    Cancel,
    /// Started (or pickup day reached): completed with a prorated bill
    Prorate,
}

pub fn cancel_path(
    status: BookingStatus,
    pickup: NaiveDate,
    today: NaiveDate,
) -> RentalResult<CancelPath> {
    match status {
        BookingStatus::Completed | BookingStatus::Cancelled => Err(RentalError::Conflict(format!(
            "Booking is already {}",
            status.as_str()
        ))),
        BookingStatus::Active => Ok(CancelPath::Prorate),
        BookingStatus::Pending | BookingStatus::Confirmed => {
            if today < pickup {
                Ok(CancelPath::Cancel)
            } else {
                Ok(CancelPath::Prorate)
            }
        }
    }
}

pub fn ensure_reschedulable(
    status: BookingStatus,
    current_pickup: NaiveDate,
    today: NaiveDate,
) -> RentalResult<()> {
    match status {
        BookingStatus::Pending | BookingStatus::Confirmed => {
            if current_pickup < today {
                Err(RentalError::Conflict(
                    "Bookings whose pickup date has passed cannot be rescheduled".to_string(),
                ))
            } else {
                Ok(())
            }
        }
        BookingStatus::Active | BookingStatus::Completed | BookingStatus::Cancelled => {
            Err(RentalError::Conflict(format!(
                "A {} booking cannot be rescheduled",
                status.as_str()
            )))
        }
    }
}

pub fn ensure_deletable(
    status: BookingStatus,
    pickup: NaiveDate,
    today: NaiveDate,
) -> RentalResult<()> {
    match status {
        BookingStatus::Active | BookingStatus::Completed => Err(RentalError::Conflict(format!(
            "A {} booking cannot be deleted",
            status.as_str()
        ))),
        BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::Cancelled => {
            if pickup > today {
                Ok(())
            } else {
                Err(RentalError::Conflict(
                    "Only bookings whose pickup date is in the future can be deleted".to_string(),
                ))
            }
        }
    }
}

/// Validate a status change and return the car availability it implies
///
/// `None` leaves the car untouched.
pub fn transition(from: BookingStatus, to: BookingStatus) -> RentalResult<Option<bool>> {
    use BookingStatus::*;

    match (from, to) {
        (Pending, Confirmed) => Ok(None),
        (Confirmed, Active) => Ok(Some(false)),
        (Active, Completed) => Ok(Some(true)),
        (Pending | Confirmed | Active, Cancelled) => Ok(Some(true)),
        // Cancelling on or after the pickup day bills the days used
        (Pending | Confirmed, Completed) => Ok(Some(true)),
        (Completed | Cancelled, _) => Err(RentalError::Conflict(format!(
            "Booking is already {}",
            from.as_str()
        ))),
        (Pending | Confirmed | Active, Pending | Confirmed | Active) => {
            Err(RentalError::Conflict(format!(
                "Cannot move a {} booking to {}",
                from.as_str(),
                to.as_str()
            )))
        }
    }
}
