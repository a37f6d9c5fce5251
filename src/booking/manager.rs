/// Booking lifecycle and persistence
use super::{
    normalize_optional, rules, Booking, BookingFilter, BookingKind, BookingRequest, BookingStatus,
    BookingView, CreatedBooking, Driver, Quote, RescheduleRequest, StatusCounts,
    VoucherConfirmation,
};
use crate::{
    auth::Session,
    calendar::BusinessCalendar,
    db::{format_date, parse_date, parse_optional_timestamp, parse_timestamp},
    error::{RentalError, RentalResult},
    fleet::{CarManager, CarSummary},
    mailer::{VoucherEmail, VoucherNotifier},
};
use chrono::{NaiveDate, Utc};
use rand::{distributions::Alphanumeric, Rng};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

const BOOKING_SELECT: &str = r#"
    SELECT b.id, b.name, b.status, b.kind, b.location, b.created_at, b.confirmed_at,
           b.cancelled_at, b.cancellation_fee, b.cancellation_reason, b.ended_at,
           b.billed_days, b.billed_total, b.ended_reason, b.voucher_token,
           b.pickup_date, b.dropoff_date, b.total_price,
           b.driver_given_names, b.driver_surname, b.driver_age, b.driver_email,
           b.driver_mobile, b.driver_licence_country_region,
           b.car_id, b.car_name, b.created_by_email,
           c.name AS current_car_name, c.brand AS current_car_brand,
           c.price_per_day AS current_car_price
    FROM booking b
    LEFT JOIN car c ON c.id = b.car_id
"#;

const VOUCHER_TOKEN_LEN: usize = 32;

const DATES_TAKEN: &str = "This car is already booked for the selected dates";
const STALE_BOOKING: &str = "Booking was changed by someone else; reload and try again";

/// Booking manager
#[derive(Clone)]
pub struct BookingManager {
    db: SqlitePool,
    cars: CarManager,
    calendar: BusinessCalendar,
    max_rental_days: i64,
    public_url: String,
    notifier: Arc<dyn VoucherNotifier>,
}

impl BookingManager {
    pub fn new(
        db: SqlitePool,
        cars: CarManager,
        calendar: BusinessCalendar,
        max_rental_days: i64,
        public_url: String,
        notifier: Arc<dyn VoucherNotifier>,
    ) -> Self {
        Self {
            db,
            cars,
            calendar,
            max_rental_days,
            public_url: public_url.trim_end_matches('/').to_string(),
            notifier,
        }
    }

    /// Today on the business calendar
    pub fn today(&self) -> NaiveDate {
        self.calendar.today()
    }

    /// Link that confirms the booking holding `token`
    pub fn voucher_url(&self, token: &str) -> String {
        format!(
            "{}/voucher?token={}",
            self.public_url,
            urlencoding::encode(token)
        )
    }

    /// Price preview for a car and date range
    pub async fn quote(
        &self,
        car_id: &str,
        pickup: NaiveDate,
        dropoff: NaiveDate,
    ) -> RentalResult<Quote> {
        let car = self.cars.require_car(car_id).await?;
        let days = rules::validate_trip(pickup, dropoff, self.today(), self.max_rental_days)?;
        let total_price = rules::charge(days, car.price_per_day)?;

        Ok(Quote {
            car_id: car.id,
            pickup_date: pickup,
            dropoff_date: dropoff,
            days,
            price_per_day: car.price_per_day,
            total_price,
        })
    }

    /// Bookings for `car_id` in `statuses` whose dates overlap `[pickup, dropoff)`
    pub async fn find_overlapping(
        &self,
        car_id: &str,
        pickup: NaiveDate,
        dropoff: NaiveDate,
        statuses: &[BookingStatus],
        exclude_id: Option<&str>,
    ) -> RentalResult<Vec<Booking>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "{} WHERE b.car_id = ? AND b.pickup_date < ? AND b.dropoff_date > ? \
             AND b.status IN ({}) AND (? IS NULL OR b.id != ?) ORDER BY b.pickup_date ASC",
            BOOKING_SELECT, placeholders
        );

        let mut query = sqlx::query(&sql)
            .bind(car_id)
            .bind(format_date(dropoff))
            .bind(format_date(pickup));
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query
            .bind(exclude_id)
            .bind(exclude_id)
            .fetch_all(&self.db)
            .await?;

        rows.into_iter().map(parse_booking).collect()
    }

    async fn ensure_dates_free(
        &self,
        car_id: &str,
        pickup: NaiveDate,
        dropoff: NaiveDate,
        exclude_id: Option<&str>,
    ) -> RentalResult<()> {
        let clashes = self
            .find_overlapping(car_id, pickup, dropoff, &BookingStatus::BLOCKING, exclude_id)
            .await?;
        if let Some(clash) = clashes.first() {
            tracing::debug!(
                "Car {} dates {}..{} clash with booking {}",
                car_id,
                pickup,
                dropoff,
                clash.id
            );
            return Err(RentalError::Conflict(DATES_TAKEN.to_string()));
        }
        Ok(())
    }

    /// Create a pending booking and send its voucher
    pub async fn create_booking(
        &self,
        session: &Session,
        request: BookingRequest,
    ) -> RentalResult<CreatedBooking> {
        let request = request.normalized();
        request.validate()?;

        let days = rules::validate_trip(
            request.pickup_date,
            request.dropoff_date,
            self.today(),
            self.max_rental_days,
        )?;

        let car = self.cars.require_car(&request.car_id).await?;
        if !car.is_available {
            return Err(RentalError::Conflict(
                "This car is currently unavailable and cannot be booked".to_string(),
            ));
        }
        self.ensure_dates_free(&car.id, request.pickup_date, request.dropoff_date, None)
            .await?;

        let driver = request.driver();
        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4().to_string(),
            name: format!("{} · {}", car.name, driver.full_name()),
            status: BookingStatus::Pending,
            kind: request.kind,
            location: request.location.clone(),
            created_at: now,
            confirmed_at: None,
            cancelled_at: None,
            cancellation_fee: None,
            cancellation_reason: None,
            ended_at: None,
            billed_days: None,
            billed_total: None,
            ended_reason: None,
            voucher_token: generate_voucher_token(),
            pickup_date: request.pickup_date,
            dropoff_date: request.dropoff_date,
            total_price: rules::charge(days, car.price_per_day)?,
            driver,
            car_id: Some(car.id.clone()),
            car_name: Some(car.name.clone()),
            car: Some(CarSummary::from(&car)),
            created_by_email: session.email.clone(),
        };

        sqlx::query(
            r#"
            INSERT INTO booking (id, name, status, kind, location, created_at, voucher_token,
                                 pickup_date, dropoff_date, total_price,
                                 driver_given_names, driver_surname, driver_age, driver_email,
                                 driver_mobile, driver_licence_country_region,
                                 car_id, car_name, created_by_email)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&booking.id)
        .bind(&booking.name)
        .bind(booking.status.as_str())
        .bind(booking.kind.as_str())
        .bind(&booking.location)
        .bind(now.to_rfc3339())
        .bind(&booking.voucher_token)
        .bind(format_date(booking.pickup_date))
        .bind(format_date(booking.dropoff_date))
        .bind(booking.total_price)
        .bind(&booking.driver.given_names)
        .bind(&booking.driver.surname)
        .bind(booking.driver.age)
        .bind(&booking.driver.email)
        .bind(&booking.driver.mobile)
        .bind(&booking.driver.licence_country_region)
        .bind(&booking.car_id)
        .bind(&booking.car_name)
        .bind(&booking.created_by_email)
        .execute(&self.db)
        .await?;

        tracing::info!(
            "Booking {} created by {} for car {} ({}..{})",
            booking.id,
            session.email,
            car.id,
            booking.pickup_date,
            booking.dropoff_date
        );

        let confirm_url = self.voucher_url(&booking.voucher_token);
        let voucher = VoucherEmail {
            to: booking.driver.email.clone(),
            driver_name: booking.driver.full_name(),
            car_label: booking.car_label(),
            pickup_date: format_date(booking.pickup_date),
            dropoff_date: format_date(booking.dropoff_date),
            total_price: booking.total_price,
            confirm_url: confirm_url.clone(),
        };

        // The booking stands even when the voucher cannot be delivered
        let (email_sent, warning) = match self.notifier.send_voucher(&voucher).await {
            Ok(true) => (true, None),
            Ok(false) => (
                false,
                Some("Voucher email is disabled; use the confirmation link instead".to_string()),
            ),
            Err(e) => {
                tracing::warn!("Voucher email for booking {} failed: {}", booking.id, e);
                (
                    false,
                    Some(
                        "Booking saved, but the voucher email could not be sent; \
                         use the confirmation link instead"
                            .to_string(),
                    ),
                )
            }
        };

        Ok(CreatedBooking {
            booking,
            confirm_url,
            email_sent,
            warning,
        })
    }

    /// Get booking by ID
    pub async fn get_booking(&self, id: &str) -> RentalResult<Option<Booking>> {
        let row = sqlx::query(&format!("{} WHERE b.id = ?", BOOKING_SELECT))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(parse_booking).transpose()
    }

    pub async fn require_booking(&self, id: &str) -> RentalResult<Booking> {
        self.get_booking(id)
            .await?
            .ok_or_else(|| RentalError::NotFound(format!("Booking {} not found", id)))
    }

    async fn require_owned(&self, session: &Session, id: &str) -> RentalResult<Booking> {
        let booking = self.require_booking(id).await?;
        if !session.can_act_for(&booking.owner_emails()) {
            return Err(RentalError::Authorization(format!(
                "{} does not own booking {}",
                session.email, id
            )));
        }
        Ok(booking)
    }

    /// Confirm through the emailed voucher link
    ///
    /// Idempotent: a booking that already carries `confirmed_at` is reported as
    /// already confirmed and left untouched.
    pub async fn confirm_voucher(&self, token: &str) -> RentalResult<VoucherConfirmation> {
        let token = token.trim();
        if token.is_empty() {
            return Err(RentalError::Validation(
                "Missing voucher token".to_string(),
            ));
        }

        let row = sqlx::query(&format!("{} WHERE b.voucher_token = ?", BOOKING_SELECT))
            .bind(token)
            .fetch_optional(&self.db)
            .await?;
        let booking = row
            .map(parse_booking)
            .transpose()?
            .ok_or_else(|| RentalError::NotFound("Voucher not found".to_string()))?;

        if booking.confirmed_at.is_some() {
            return Ok(VoucherConfirmation {
                booking,
                already_confirmed: true,
            });
        }
        if booking.status.is_terminal() {
            return Err(RentalError::Conflict(format!(
                "Booking is already {}",
                booking.status.as_str()
            )));
        }

        match self.stamp_confirmed(&booking).await {
            Ok(confirmed) => Ok(VoucherConfirmation {
                booking: confirmed,
                already_confirmed: false,
            }),
            // Lost a race against another confirmation of the same voucher
            Err(RentalError::Conflict(msg)) if msg == STALE_BOOKING => {
                let current = self.require_booking(&booking.id).await?;
                if current.confirmed_at.is_some() {
                    Ok(VoucherConfirmation {
                        booking: current,
                        already_confirmed: true,
                    })
                } else {
                    Err(RentalError::Conflict(msg))
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Set `confirmed_at` and promote a pending booking, after re-checking its dates
    async fn stamp_confirmed(&self, booking: &Booking) -> RentalResult<Booking> {
        if booking.status == BookingStatus::Pending {
            let car_id = booking.car_id.as_deref().ok_or_else(|| {
                RentalError::Conflict("The car for this booking no longer exists".to_string())
            })?;
            self.ensure_dates_free(
                car_id,
                booking.pickup_date,
                booking.dropoff_date,
                Some(&booking.id),
            )
            .await?;
        }

        let result = sqlx::query(
            r#"
            UPDATE booking
            SET confirmed_at = COALESCE(confirmed_at, ?),
                status = CASE WHEN status = 'pending' THEN 'confirmed' ELSE status END
            WHERE id = ? AND status = ? AND confirmed_at IS NULL
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&booking.id)
        .bind(booking.status.as_str())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RentalError::Conflict(STALE_BOOKING.to_string()));
        }

        tracing::info!("Booking {} confirmed", booking.id);
        self.require_booking(&booking.id).await
    }

    /// Admin status change following the booking state machine
    pub async fn transition_status(
        &self,
        session: &Session,
        id: &str,
        target: BookingStatus,
    ) -> RentalResult<Booking> {
        session.require_admin()?;
        let booking = self.require_booking(id).await?;

        match target {
            BookingStatus::Cancelled => return self.cancel(session, id, None).await,
            BookingStatus::Confirmed => {
                rules::transition(booking.status, target)?;
                return self.stamp_confirmed(&booking).await;
            }
            BookingStatus::Completed if booking.status != BookingStatus::Active => {
                return Err(RentalError::Conflict(format!(
                    "Only active bookings can be marked completed; this one is {}",
                    booking.status.as_str()
                )));
            }
            _ => {}
        }

        let car_available = rules::transition(booking.status, target)?;
        self.write_status(&booking, target).await?;
        self.apply_availability(&booking, car_available).await?;

        tracing::info!(
            "Booking {} moved {} -> {} by {}",
            id,
            booking.status.as_str(),
            target.as_str(),
            session.email
        );
        self.require_booking(id).await
    }

    async fn write_status(&self, booking: &Booking, target: BookingStatus) -> RentalResult<()> {
        let result = sqlx::query("UPDATE booking SET status = ? WHERE id = ? AND status = ?")
            .bind(target.as_str())
            .bind(&booking.id)
            .bind(booking.status.as_str())
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RentalError::Conflict(STALE_BOOKING.to_string()));
        }
        Ok(())
    }

    async fn apply_availability(
        &self,
        booking: &Booking,
        available: Option<bool>,
    ) -> RentalResult<()> {
        let (Some(car_id), Some(available)) = (booking.car_id.as_deref(), available) else {
            return Ok(());
        };

        // Another running rental keeps the car off the lot
        if available && self.cars.active_rentals(car_id, Some(&booking.id)).await? > 0 {
            tracing::debug!(
                "Car {} stays unavailable after booking {}: another rental is active",
                car_id,
                booking.id
            );
            return Ok(());
        }

        self.cars.set_availability(car_id, available).await
    }

    /// Cancel a booking
    ///
    /// Before the pickup day this cancels with no fee. From the pickup day on,
    /// or once the rental is active, it ends the rental with a prorated bill.
    pub async fn cancel(
        &self,
        session: &Session,
        id: &str,
        reason: Option<String>,
    ) -> RentalResult<Booking> {
        let booking = self.require_owned(session, id).await?;
        let reason = normalize_optional(reason);
        let today = self.today();

        match rules::cancel_path(booking.status, booking.pickup_date, today)? {
            rules::CancelPath::Prorate => self.finish_prorated(&booking, reason, today).await,
            rules::CancelPath::Cancel => {
                let car_available = rules::transition(booking.status, BookingStatus::Cancelled)?;

                let result = sqlx::query(
                    r#"
                    UPDATE booking
                    SET status = 'cancelled', cancelled_at = ?, cancellation_fee = ?,
                        cancellation_reason = ?
                    WHERE id = ? AND status = ?
                    "#,
                )
                .bind(Utc::now().to_rfc3339())
                .bind(rules::PRE_START_CANCELLATION_FEE)
                .bind(&reason)
                .bind(id)
                .bind(booking.status.as_str())
                .execute(&self.db)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(RentalError::Conflict(STALE_BOOKING.to_string()));
                }
                self.apply_availability(&booking, car_available).await?;

                tracing::info!("Booking {} cancelled by {}", id, session.email);
                self.require_booking(id).await
            }
        }
    }

    /// End an active rental before its drop-off date
    pub async fn end_early(
        &self,
        session: &Session,
        id: &str,
        reason: Option<String>,
    ) -> RentalResult<Booking> {
        let booking = self.require_owned(session, id).await?;
        if booking.status != BookingStatus::Active {
            return Err(RentalError::Conflict(format!(
                "Only active bookings can be ended early; this one is {}",
                booking.status.as_str()
            )));
        }

        self.finish_prorated(&booking, normalize_optional(reason), self.today())
            .await
    }

    async fn finish_prorated(
        &self,
        booking: &Booking,
        reason: Option<String>,
        today: NaiveDate,
    ) -> RentalResult<Booking> {
        let car_available = rules::transition(booking.status, BookingStatus::Completed)?;
        let billed_days = rules::billed_days(booking.pickup_date, today);
        let billed_total = rules::charge(billed_days, booking.daily_rate())?;

        let result = sqlx::query(
            r#"
            UPDATE booking
            SET status = 'completed', ended_at = ?, billed_days = ?, billed_total = ?,
                ended_reason = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(billed_days)
        .bind(billed_total)
        .bind(&reason)
        .bind(&booking.id)
        .bind(booking.status.as_str())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RentalError::Conflict(STALE_BOOKING.to_string()));
        }
        self.apply_availability(booking, car_available).await?;

        tracing::info!(
            "Booking {} ended after {} day(s), billed {}",
            booking.id,
            billed_days,
            billed_total
        );
        self.require_booking(&booking.id).await
    }

    /// Move a booking to new dates
    pub async fn reschedule(
        &self,
        session: &Session,
        id: &str,
        request: RescheduleRequest,
    ) -> RentalResult<Booking> {
        let booking = self.require_owned(session, id).await?;
        let today = self.today();
        rules::ensure_reschedulable(booking.status, booking.pickup_date, today)?;

        let days = rules::validate_trip(
            request.pickup_date,
            request.dropoff_date,
            today,
            self.max_rental_days,
        )?;

        let car_id = booking.car_id.as_deref().ok_or_else(|| {
            RentalError::Conflict("The car for this booking no longer exists".to_string())
        })?;
        let car = self.cars.require_car(car_id).await?;
        self.ensure_dates_free(car_id, request.pickup_date, request.dropoff_date, Some(id))
            .await?;

        let kind = request.kind.unwrap_or(booking.kind);
        let location = match request.location {
            Some(location) => normalize_optional(Some(location)),
            None => booking.location.clone(),
        };

        let result = sqlx::query(
            r#"
            UPDATE booking
            SET pickup_date = ?, dropoff_date = ?, total_price = ?, kind = ?, location = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(format_date(request.pickup_date))
        .bind(format_date(request.dropoff_date))
        .bind(rules::charge(days, car.price_per_day)?)
        .bind(kind.as_str())
        .bind(&location)
        .bind(id)
        .bind(booking.status.as_str())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RentalError::Conflict(STALE_BOOKING.to_string()));
        }

        tracing::info!(
            "Booking {} rescheduled to {}..{} by {}",
            id,
            request.pickup_date,
            request.dropoff_date,
            session.email
        );
        self.require_booking(id).await
    }

    /// Remove a booking that has not started
    pub async fn delete_booking(&self, session: &Session, id: &str) -> RentalResult<()> {
        session.require_admin()?;
        let booking = self.require_booking(id).await?;
        rules::ensure_deletable(booking.status, booking.pickup_date, self.today())?;

        let result = sqlx::query("DELETE FROM booking WHERE id = ? AND status = ?")
            .bind(id)
            .bind(booking.status.as_str())
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RentalError::Conflict(STALE_BOOKING.to_string()));
        }
        if booking.status == BookingStatus::Confirmed {
            self.apply_availability(&booking, Some(true)).await?;
        }

        tracing::info!("Booking {} deleted by {}", id, session.email);
        Ok(())
    }

    /// Bookings where the caller is the driver or the creator
    pub async fn list_for_owner(
        &self,
        session: &Session,
        filter: &BookingFilter,
    ) -> RentalResult<Vec<Booking>> {
        let rows = sqlx::query(&format!(
            "{} WHERE lower(b.driver_email) = ? OR lower(b.created_by_email) = ? \
             ORDER BY b.pickup_date DESC, b.created_at DESC",
            BOOKING_SELECT
        ))
        .bind(&session.email)
        .bind(&session.email)
        .fetch_all(&self.db)
        .await?;

        let mut bookings = Vec::with_capacity(rows.len());
        for row in rows {
            let booking = parse_booking(row)?;
            if filter.matches(&booking) {
                bookings.push(booking);
            }
        }
        Ok(bookings)
    }

    /// Admin booking queues
    pub async fn list_view(&self, session: &Session, view: BookingView) -> RentalResult<Vec<Booking>> {
        session.require_admin()?;

        let clause = match view {
            BookingView::Confirmed => {
                "WHERE b.confirmed_at IS NOT NULL AND b.status IN ('confirmed', 'active') \
                 ORDER BY b.pickup_date ASC"
            }
            BookingView::Pending => {
                "WHERE b.confirmed_at IS NULL AND b.status = 'pending' ORDER BY b.created_at DESC"
            }
            BookingView::History => {
                "WHERE b.status = 'completed' ORDER BY b.dropoff_date DESC, b.created_at DESC"
            }
            BookingView::Cancelled => {
                "WHERE b.status = 'cancelled' ORDER BY b.cancelled_at DESC, b.created_at DESC"
            }
            BookingView::All => "ORDER BY b.created_at DESC",
        };

        let rows = sqlx::query(&format!("{} {}", BOOKING_SELECT, clause))
            .fetch_all(&self.db)
            .await?;

        rows.into_iter().map(parse_booking).collect()
    }

    pub async fn list_by_status(&self, status: BookingStatus) -> RentalResult<Vec<Booking>> {
        let rows = sqlx::query(&format!(
            "{} WHERE b.status = ? ORDER BY b.pickup_date ASC",
            BOOKING_SELECT
        ))
        .bind(status.as_str())
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(parse_booking).collect()
    }

    /// Count bookings per status, optionally for one owner
    pub async fn status_counts(&self, owner_email: Option<&str>) -> RentalResult<StatusCounts> {
        let owner = owner_email.map(|e| e.trim().to_lowercase());
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS total
            FROM booking
            WHERE ? IS NULL OR lower(driver_email) = ? OR lower(created_by_email) = ?
            GROUP BY status
            "#,
        )
        .bind(&owner)
        .bind(&owner)
        .bind(&owner)
        .fetch_all(&self.db)
        .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let total: i64 = row.try_get("total")?;
            counts.add(status.parse()?, total);
        }
        Ok(counts)
    }
}

fn generate_voucher_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(VOUCHER_TOKEN_LEN)
        .map(char::from)
        .collect()
}

fn parse_booking(row: sqlx::sqlite::SqliteRow) -> RentalResult<Booking> {
    let status: String = row.try_get("status")?;
    let kind: String = row.try_get("kind")?;
    let created_at: String = row.try_get("created_at")?;
    let pickup_date: String = row.try_get("pickup_date")?;
    let dropoff_date: String = row.try_get("dropoff_date")?;
    let car_id: Option<String> = row.try_get("car_id")?;

    let current_name: Option<String> = row.try_get("current_car_name")?;
    let car = match (&car_id, current_name) {
        (Some(id), Some(name)) => Some(CarSummary {
            id: id.clone(),
            name,
            brand: row.try_get("current_car_brand")?,
            price_per_day: row.try_get("current_car_price")?,
        }),
        _ => None,
    };

    Ok(Booking {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status: status.parse()?,
        kind: kind.parse::<BookingKind>()?,
        location: row.try_get("location")?,
        created_at: parse_timestamp(&created_at)?,
        confirmed_at: parse_optional_timestamp(row.try_get("confirmed_at")?)?,
        cancelled_at: parse_optional_timestamp(row.try_get("cancelled_at")?)?,
        cancellation_fee: row.try_get("cancellation_fee")?,
        cancellation_reason: row.try_get("cancellation_reason")?,
        ended_at: parse_optional_timestamp(row.try_get("ended_at")?)?,
        billed_days: row.try_get("billed_days")?,
        billed_total: row.try_get("billed_total")?,
        ended_reason: row.try_get("ended_reason")?,
        voucher_token: row.try_get("voucher_token")?,
        pickup_date: parse_date(&pickup_date)?,
        dropoff_date: parse_date(&dropoff_date)?,
        total_price: row.try_get("total_price")?,
        driver: Driver {
            given_names: row.try_get("driver_given_names")?,
            surname: row.try_get("driver_surname")?,
            age: row.try_get("driver_age")?,
            email: row.try_get("driver_email")?,
            mobile: row.try_get("driver_mobile")?,
            licence_country_region: row.try_get("driver_licence_country_region")?,
        },
        car_id,
        car_name: row.try_get("car_name")?,
        car,
        created_by_email: row.try_get("created_by_email")?,
    })
}

#[cfg(test)]
pub(crate) fn sample_request(car_id: &str, pickup: NaiveDate, dropoff: NaiveDate) -> BookingRequest {
    BookingRequest {
        car_id: car_id.to_string(),
        kind: BookingKind::Pickup,
        location: Some("Makati".to_string()),
        pickup_date: pickup,
        dropoff_date: dropoff,
        driver_given_names: "Juan".to_string(),
        driver_surname: "Cruz".to_string(),
        driver_age: 30,
        driver_email: "juan@example.com".to_string(),
        driver_mobile: "09171234567".to_string(),
        driver_licence_country_region: "Philippines".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::Role,
        db::memory_pool,
        fleet::{manager::sample_car_input, Car},
        mailer::RecordingNotifier,
    };

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn admin() -> Session {
        Session::new("admin@rent.example.com", Role::Admin)
    }

    fn client() -> Session {
        Session::new("juan@example.com", Role::Client)
    }

    fn manager_on(pool: &SqlitePool, today: NaiveDate, notifier: Arc<RecordingNotifier>) -> BookingManager {
        BookingManager::new(
            pool.clone(),
            CarManager::new(pool.clone()),
            BusinessCalendar::Pinned(today),
            30,
            "https://rent.example.com/".to_string(),
            notifier,
        )
    }

    async fn setup(price: i64) -> (SqlitePool, BookingManager, Arc<RecordingNotifier>, Car) {
        let pool = memory_pool().await;
        let notifier = Arc::new(RecordingNotifier::default());
        let manager = manager_on(&pool, d(2025, 6, 1), notifier.clone());
        let car = CarManager::new(pool.clone())
            .create_car(&admin(), sample_car_input("Toyota Vios", price))
            .await
            .unwrap();
        (pool, manager, notifier, car)
    }

    #[tokio::test]
    async fn test_create_booking_prices_and_sends_voucher() {
        let (_pool, manager, notifier, car) = setup(1500).await;

        let quote = manager.quote(&car.id, d(2025, 6, 10), d(2025, 6, 13)).await.unwrap();
        assert_eq!(quote.days, 3);
        assert_eq!(quote.total_price, 4500);

        let created = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 10), d(2025, 6, 13)))
            .await
            .unwrap();
        let booking = &created.booking;

        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.total_price, 4500);
        assert_eq!(booking.name, "Toyota Vios · Juan Cruz");
        assert_eq!(booking.voucher_token.len(), VOUCHER_TOKEN_LEN);
        assert!(created.email_sent);
        assert!(created.warning.is_none());
        assert_eq!(
            created.confirm_url,
            format!("https://rent.example.com/voucher?token={}", booking.voucher_token)
        );

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "juan@example.com");
        assert_eq!(sent[0].confirm_url, created.confirm_url);
        drop(sent);

        let stored = manager.require_booking(&booking.id).await.unwrap();
        assert_eq!(&stored, booking);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_rejected() {
        let (_pool, manager, _notifier, car) = setup(1500).await;

        let past = sample_request(&car.id, d(2025, 5, 31), d(2025, 6, 3));
        assert!(matches!(
            manager.create_booking(&client(), past).await.unwrap_err(),
            RentalError::Validation(_)
        ));

        let too_long = sample_request(&car.id, d(2025, 6, 1), d(2025, 7, 5));
        assert!(matches!(
            manager.create_booking(&client(), too_long).await.unwrap_err(),
            RentalError::Validation(_)
        ));

        let mut young = sample_request(&car.id, d(2025, 6, 2), d(2025, 6, 3));
        young.driver_age = 17;
        assert!(matches!(
            manager.create_booking(&client(), young).await.unwrap_err(),
            RentalError::Validation(_)
        ));

        let unknown = sample_request("missing", d(2025, 6, 2), d(2025, 6, 3));
        assert!(matches!(
            manager.create_booking(&client(), unknown).await.unwrap_err(),
            RentalError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_unavailable_car_cannot_be_booked() {
        let (_pool, manager, _notifier, car) = setup(1500).await;
        manager.cars.set_availability(&car.id, false).await.unwrap();

        let err = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 2), d(2025, 6, 3)))
            .await
            .unwrap_err();
        assert!(matches!(err, RentalError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_confirmed_booking_blocks_overlapping_dates() {
        let (_pool, manager, _notifier, car) = setup(1500).await;

        let first = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 10), d(2025, 6, 13)))
            .await
            .unwrap()
            .booking;
        // Pending bookings do not hold the car
        let rival = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 11), d(2025, 6, 12)))
            .await
            .unwrap()
            .booking;

        manager.confirm_voucher(&first.voucher_token).await.unwrap();

        let err = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 12), d(2025, 6, 15)))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), DATES_TAKEN);

        // The pending rival lost: its confirmation now clashes
        let err = manager.confirm_voucher(&rival.voucher_token).await.unwrap_err();
        assert!(matches!(err, RentalError::Conflict(_)));

        // Back-to-back is fine
        manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 13), d(2025, 6, 15)))
            .await
            .unwrap();

        let overlapping = manager
            .find_overlapping(
                &car.id,
                d(2025, 6, 12),
                d(2025, 6, 14),
                &BookingStatus::BLOCKING,
                None,
            )
            .await
            .unwrap();
        assert_eq!(overlapping.len(), 1);
        assert_eq!(overlapping[0].id, first.id);
    }

    #[tokio::test]
    async fn test_voucher_confirmation_is_idempotent() {
        let (_pool, manager, _notifier, car) = setup(1500).await;
        let booking = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 10), d(2025, 6, 13)))
            .await
            .unwrap()
            .booking;

        let first = manager.confirm_voucher(&booking.voucher_token).await.unwrap();
        assert!(!first.already_confirmed);
        assert_eq!(first.booking.status, BookingStatus::Confirmed);
        assert!(first.booking.confirmed_at.is_some());

        let second = manager.confirm_voucher(&booking.voucher_token).await.unwrap();
        assert!(second.already_confirmed);
        assert_eq!(second.booking.confirmed_at, first.booking.confirmed_at);

        assert!(matches!(
            manager.confirm_voucher("nope").await.unwrap_err(),
            RentalError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_cancel_before_pickup_is_free() {
        let (_pool, manager, _notifier, car) = setup(1500).await;
        let booking = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 10), d(2025, 6, 13)))
            .await
            .unwrap()
            .booking;
        manager.confirm_voucher(&booking.voucher_token).await.unwrap();
        manager.cars.set_availability(&car.id, false).await.unwrap();

        let stranger = Session::new("someone@example.com", Role::Client);
        assert!(matches!(
            manager.cancel(&stranger, &booking.id, None).await.unwrap_err(),
            RentalError::Authorization(_)
        ));

        let cancelled = manager
            .cancel(&client(), &booking.id, Some(" plans changed ".to_string()))
            .await
            .unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(cancelled.cancellation_fee, Some(0));
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("plans changed"));
        assert!(cancelled.cancelled_at.is_some());
        assert!(manager.cars.require_car(&car.id).await.unwrap().is_available);

        assert!(matches!(
            manager.cancel(&client(), &booking.id, None).await.unwrap_err(),
            RentalError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn test_admin_lifecycle_and_early_end() {
        let (pool, manager, notifier, car) = setup(1000).await;
        let booking = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 1), d(2025, 6, 10)))
            .await
            .unwrap()
            .booking;

        assert!(matches!(
            manager
                .transition_status(&admin(), &booking.id, BookingStatus::Active)
                .await
                .unwrap_err(),
            RentalError::Conflict(_)
        ));
        assert!(matches!(
            manager
                .transition_status(&client(), &booking.id, BookingStatus::Confirmed)
                .await
                .unwrap_err(),
            RentalError::Authorization(_)
        ));

        let confirmed = manager
            .transition_status(&admin(), &booking.id, BookingStatus::Confirmed)
            .await
            .unwrap();
        assert!(confirmed.confirmed_at.is_some());

        let active = manager
            .transition_status(&admin(), &booking.id, BookingStatus::Active)
            .await
            .unwrap();
        assert_eq!(active.status, BookingStatus::Active);
        assert!(!manager.cars.require_car(&car.id).await.unwrap().is_available);

        // Three days later the driver brings the car back
        let later = manager_on(&pool, d(2025, 6, 4), notifier);
        let ended = later.end_early(&client(), &booking.id, None).await.unwrap();
        assert_eq!(ended.status, BookingStatus::Completed);
        assert_eq!(ended.billed_days, Some(4));
        assert_eq!(ended.billed_total, Some(4000));
        assert!(ended.ended_at.is_some());
        assert!(later.cars.require_car(&car.id).await.unwrap().is_available);

        assert!(matches!(
            later.reschedule(
                &client(),
                &booking.id,
                RescheduleRequest {
                    pickup_date: d(2025, 6, 20),
                    dropoff_date: d(2025, 6, 21),
                    kind: None,
                    location: None,
                },
            )
            .await
            .unwrap_err(),
            RentalError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn test_natural_completion_has_no_bill() {
        let (_pool, manager, _notifier, car) = setup(1000).await;
        let booking = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 1), d(2025, 6, 3)))
            .await
            .unwrap()
            .booking;

        assert!(matches!(
            manager
                .transition_status(&admin(), &booking.id, BookingStatus::Completed)
                .await
                .unwrap_err(),
            RentalError::Conflict(_)
        ));

        manager.confirm_voucher(&booking.voucher_token).await.unwrap();
        manager
            .transition_status(&admin(), &booking.id, BookingStatus::Active)
            .await
            .unwrap();
        let done = manager
            .transition_status(&admin(), &booking.id, BookingStatus::Completed)
            .await
            .unwrap();

        assert_eq!(done.status, BookingStatus::Completed);
        assert!(done.ended_at.is_none());
        assert!(done.billed_total.is_none());
        assert!(manager.cars.require_car(&car.id).await.unwrap().is_available);
    }

    #[tokio::test]
    async fn test_cancel_on_pickup_day_bills_with_booked_rate_after_car_removed() {
        let (_pool, manager, _notifier, car) = setup(1000).await;
        let booking = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 1), d(2025, 6, 5)))
            .await
            .unwrap()
            .booking;
        assert_eq!(booking.total_price, 4000);

        manager.cars.delete_car(&admin(), &car.id).await.unwrap();

        let orphan = manager.require_booking(&booking.id).await.unwrap();
        assert!(orphan.car_id.is_none());
        assert!(orphan.car.is_none());
        assert_eq!(orphan.car_label(), "Toyota Vios");

        let ended = manager.cancel(&client(), &booking.id, None).await.unwrap();
        assert_eq!(ended.status, BookingStatus::Completed);
        assert_eq!(ended.billed_days, Some(1));
        assert_eq!(ended.billed_total, Some(1000));
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let (_pool, manager, _notifier, car) = setup(1500).await;
        let future = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 10), d(2025, 6, 12)))
            .await
            .unwrap()
            .booking;
        let today = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 1), d(2025, 6, 2)))
            .await
            .unwrap()
            .booking;

        assert!(matches!(
            manager.delete_booking(&client(), &future.id).await.unwrap_err(),
            RentalError::Authorization(_)
        ));
        assert!(matches!(
            manager.delete_booking(&admin(), &today.id).await.unwrap_err(),
            RentalError::Conflict(_)
        ));

        manager.confirm_voucher(&future.voucher_token).await.unwrap();
        manager.cars.set_availability(&car.id, false).await.unwrap();
        manager.delete_booking(&admin(), &future.id).await.unwrap();
        assert!(manager.get_booking(&future.id).await.unwrap().is_none());
        assert!(manager.cars.require_car(&car.id).await.unwrap().is_available);
    }

    #[tokio::test]
    async fn test_running_rental_keeps_car_unavailable() {
        let (_pool, manager, _notifier, car) = setup(1000).await;
        let running = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 1), d(2025, 6, 4)))
            .await
            .unwrap()
            .booking;
        let later = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 10), d(2025, 6, 12)))
            .await
            .unwrap()
            .booking;
        let after = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 20), d(2025, 6, 22)))
            .await
            .unwrap()
            .booking;

        manager.confirm_voucher(&running.voucher_token).await.unwrap();
        manager
            .transition_status(&admin(), &running.id, BookingStatus::Active)
            .await
            .unwrap();
        assert!(!manager.cars.require_car(&car.id).await.unwrap().is_available);

        manager.cancel(&client(), &later.id, None).await.unwrap();
        assert!(!manager.cars.require_car(&car.id).await.unwrap().is_available);

        manager.confirm_voucher(&after.voucher_token).await.unwrap();
        manager.delete_booking(&admin(), &after.id).await.unwrap();
        assert!(!manager.cars.require_car(&car.id).await.unwrap().is_available);

        manager
            .transition_status(&admin(), &running.id, BookingStatus::Completed)
            .await
            .unwrap();
        assert!(manager.cars.require_car(&car.id).await.unwrap().is_available);
    }

    #[tokio::test]
    async fn test_oversized_price_is_rejected() {
        let (pool, manager, _notifier, car) = setup(1000).await;
        sqlx::query("UPDATE car SET price_per_day = ? WHERE id = ?")
            .bind(i64::MAX / 2 + 1)
            .bind(&car.id)
            .execute(&pool)
            .await
            .unwrap();

        assert!(matches!(
            manager
                .quote(&car.id, d(2025, 6, 10), d(2025, 6, 13))
                .await
                .unwrap_err(),
            RentalError::Validation(_)
        ));
        assert!(matches!(
            manager
                .create_booking(&client(), sample_request(&car.id, d(2025, 6, 10), d(2025, 6, 13)))
                .await
                .unwrap_err(),
            RentalError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_reschedule_reprices_and_checks_conflicts() {
        let (_pool, manager, _notifier, car) = setup(1500).await;
        let mine = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 10), d(2025, 6, 12)))
            .await
            .unwrap()
            .booking;
        let other = manager
            .create_booking(&admin(), sample_request(&car.id, d(2025, 6, 20), d(2025, 6, 25)))
            .await
            .unwrap()
            .booking;
        manager.confirm_voucher(&other.voucher_token).await.unwrap();

        let moved = manager
            .reschedule(
                &client(),
                &mine.id,
                RescheduleRequest {
                    pickup_date: d(2025, 6, 14),
                    dropoff_date: d(2025, 6, 18),
                    kind: Some(BookingKind::Dropoff),
                    location: Some("NAIA Terminal 3".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.total_price, 6000);
        assert_eq!(moved.kind, BookingKind::Dropoff);
        assert_eq!(moved.location.as_deref(), Some("NAIA Terminal 3"));

        let err = manager
            .reschedule(
                &client(),
                &mine.id,
                RescheduleRequest {
                    pickup_date: d(2025, 6, 18),
                    dropoff_date: d(2025, 6, 21),
                    kind: None,
                    location: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), DATES_TAKEN);
    }

    #[tokio::test]
    async fn test_listing_views_and_counts() {
        let (_pool, manager, _notifier, car) = setup(1500).await;
        let a = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 10), d(2025, 6, 12)))
            .await
            .unwrap()
            .booking;
        let b = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 15), d(2025, 6, 16)))
            .await
            .unwrap()
            .booking;
        let mut other = sample_request(&car.id, d(2025, 6, 20), d(2025, 6, 21));
        other.driver_email = "maria@example.com".to_string();
        let maria = Session::new("Maria@Example.com", Role::Client);
        manager.create_booking(&maria, other).await.unwrap();

        manager.confirm_voucher(&a.voucher_token).await.unwrap();
        manager.cancel(&client(), &b.id, None).await.unwrap();

        let mine = manager
            .list_for_owner(&client(), &BookingFilter::default())
            .await
            .unwrap();
        assert_eq!(mine.len(), 2);

        let cancelled_only = manager
            .list_for_owner(
                &client(),
                &BookingFilter {
                    status: Some(BookingStatus::Cancelled),
                    q: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(cancelled_only.len(), 1);
        assert_eq!(cancelled_only[0].id, b.id);

        let confirmed = manager.list_view(&admin(), BookingView::Confirmed).await.unwrap();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].id, a.id);
        assert_eq!(manager.list_view(&admin(), BookingView::Pending).await.unwrap().len(), 1);
        assert_eq!(manager.list_view(&admin(), BookingView::All).await.unwrap().len(), 3);
        assert!(manager.list_view(&client(), BookingView::All).await.is_err());

        assert_eq!(
            manager.list_by_status(BookingStatus::Cancelled).await.unwrap().len(),
            1
        );

        let all = manager.status_counts(None).await.unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.confirmed, 1);
        assert_eq!(all.cancelled, 1);
        assert_eq!(all.pending, 1);

        let juan = manager.status_counts(Some("JUAN@example.com")).await.unwrap();
        assert_eq!(juan.total, 2);
    }

    #[tokio::test]
    async fn test_email_failure_keeps_booking() {
        let pool = memory_pool().await;
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let manager = manager_on(&pool, d(2025, 6, 1), notifier);
        let car = manager
            .cars
            .create_car(&admin(), sample_car_input("Vios", 1500))
            .await
            .unwrap();

        let created = manager
            .create_booking(&client(), sample_request(&car.id, d(2025, 6, 2), d(2025, 6, 3)))
            .await
            .unwrap();
        assert!(!created.email_sent);
        assert!(created.warning.is_some());
        assert!(manager.get_booking(&created.booking.id).await.unwrap().is_some());
    }
}
