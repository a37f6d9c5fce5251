/// Business calendar
///
/// Booking rules compare calendar dates against "today" as seen from one fixed
/// regional offset, not the server's local clock.
use crate::error::{RentalError, RentalResult};
use chrono::{FixedOffset, NaiveDate, Utc};

#[derive(Debug, Clone, Copy)]
pub enum BusinessCalendar {
    /// Follow the wall clock at a fixed UTC offset
    Offset(FixedOffset),
    /// Always report the same day
    Pinned(NaiveDate),
}

impl BusinessCalendar {
    pub fn from_offset_hours(hours: i32) -> RentalResult<Self> {
        FixedOffset::east_opt(hours * 3600)
            .map(BusinessCalendar::Offset)
            .ok_or_else(|| RentalError::Validation(format!("Invalid UTC offset: {}", hours)))
    }

    pub fn today(&self) -> NaiveDate {
        match self {
            BusinessCalendar::Offset(offset) => Utc::now().with_timezone(offset).date_naive(),
            BusinessCalendar::Pinned(day) => *day,
        }
    }
}
