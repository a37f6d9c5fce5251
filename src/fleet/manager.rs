/// Car catalogue data access
use super::{Car, CarFilter, CarInput};
use crate::{
    auth::Session,
    db::parse_timestamp,
    error::{RentalError, RentalResult},
};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use validator::Validate;

const CAR_COLUMNS: &str = "id, name, car_type, brand, seats, price_per_day, accent, \
                           is_featured, is_available, image_url, created_at, updated_at";

/// Car manager
#[derive(Clone)]
pub struct CarManager {
    db: SqlitePool,
}

impl CarManager {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Add a car to the catalogue
    pub async fn create_car(&self, session: &Session, input: CarInput) -> RentalResult<Car> {
        session.require_admin()?;
        let input = input.normalized();
        input.validate()?;

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO car (id, name, car_type, brand, seats, price_per_day, accent,
                             is_featured, is_available, image_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&input.name)
        .bind(&input.car_type)
        .bind(&input.brand)
        .bind(input.seats)
        .bind(input.price_per_day)
        .bind(&input.accent)
        .bind(input.is_featured)
        .bind(input.is_available)
        .bind(&input.image_url)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.db)
        .await?;

        tracing::info!("Car {} ({}) created by {}", id, input.name, session.email);

        Ok(Car {
            id,
            name: input.name,
            car_type: input.car_type,
            brand: input.brand,
            seats: input.seats,
            price_per_day: input.price_per_day,
            accent: input.accent,
            is_featured: input.is_featured,
            is_available: input.is_available,
            image_url: input.image_url,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get car by ID
    pub async fn get_car(&self, id: &str) -> RentalResult<Option<Car>> {
        let row = sqlx::query(&format!("SELECT {} FROM car WHERE id = ?", CAR_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(parse_car).transpose()
    }

    /// Get car by ID or fail with NotFound
    pub async fn require_car(&self, id: &str) -> RentalResult<Car> {
        self.get_car(id)
            .await?
            .ok_or_else(|| RentalError::NotFound(format!("Car {} not found", id)))
    }

    /// List cars, featured first
    pub async fn list_cars(&self, filter: &CarFilter) -> RentalResult<Vec<Car>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM car ORDER BY is_featured DESC, name ASC",
            CAR_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        let mut cars = Vec::with_capacity(rows.len());
        for row in rows {
            let car = parse_car(row)?;
            if filter.matches(&car) {
                cars.push(car);
            }
        }

        Ok(cars)
    }

    /// Distinct brand names across the catalogue
    pub async fn list_brands(&self) -> RentalResult<Vec<String>> {
        let brands: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT brand FROM car
            WHERE brand IS NOT NULL AND brand != ''
            ORDER BY brand COLLATE NOCASE ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(brands)
    }

    /// Replace a car's details
    ///
    /// The availability flag belongs to the booking lifecycle while a rental is
    /// running, so it cannot be changed here during one.
    pub async fn update_car(
        &self,
        session: &Session,
        id: &str,
        input: CarInput,
    ) -> RentalResult<Car> {
        session.require_admin()?;
        let input = input.normalized();
        input.validate()?;

        let existing = self.require_car(id).await?;
        if existing.is_available != input.is_available && self.active_rentals(id, None).await? > 0 {
            return Err(RentalError::Conflict(
                "Availability cannot be changed while the car is on an active rental".to_string(),
            ));
        }

        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE car
            SET name = ?, car_type = ?, brand = ?, seats = ?, price_per_day = ?, accent = ?,
                is_featured = ?, is_available = ?, image_url = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&input.name)
        .bind(&input.car_type)
        .bind(&input.brand)
        .bind(input.seats)
        .bind(input.price_per_day)
        .bind(&input.accent)
        .bind(input.is_featured)
        .bind(input.is_available)
        .bind(&input.image_url)
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.db)
        .await?;

        tracing::info!("Car {} updated by {}", id, session.email);

        Ok(Car {
            id: existing.id,
            name: input.name,
            car_type: input.car_type,
            brand: input.brand,
            seats: input.seats,
            price_per_day: input.price_per_day,
            accent: input.accent,
            is_featured: input.is_featured,
            is_available: input.is_available,
            image_url: input.image_url,
            created_at: existing.created_at,
            updated_at: now,
        })
    }

    /// Remove a car; bookings keep their car name
    pub async fn delete_car(&self, session: &Session, id: &str) -> RentalResult<()> {
        session.require_admin()?;

        if self.holding_bookings(id).await? > 0 {
            return Err(RentalError::Conflict(
                "Car has confirmed or active bookings and cannot be deleted".to_string(),
            ));
        }

        let result = sqlx::query("DELETE FROM car WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RentalError::NotFound(format!("Car {} not found", id)));
        }

        tracing::info!("Car {} deleted by {}", id, session.email);
        Ok(())
    }

    /// Set the availability flag as a side effect of a booking transition
    pub async fn set_availability(&self, id: &str, available: bool) -> RentalResult<()> {
        sqlx::query("UPDATE car SET is_available = ?, updated_at = ? WHERE id = ?")
            .bind(available)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.db)
            .await?;

        tracing::debug!("Car {} availability set to {}", id, available);
        Ok(())
    }

    /// Active bookings on `car_id`, leaving out `except`
    pub async fn active_rentals(&self, car_id: &str, except: Option<&str>) -> RentalResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM booking WHERE car_id = ? AND status = 'active' AND id IS NOT ?",
        )
        .bind(car_id)
        .bind(except)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    async fn holding_bookings(&self, car_id: &str) -> RentalResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM booking WHERE car_id = ? AND status IN ('confirmed', 'active')",
        )
        .bind(car_id)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }
}

fn parse_car(row: sqlx::sqlite::SqliteRow) -> RentalResult<Car> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Car {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        car_type: row.try_get("car_type")?,
        brand: row.try_get("brand")?,
        seats: row.try_get("seats")?,
        price_per_day: row.try_get("price_per_day")?,
        accent: row.try_get("accent")?,
        is_featured: row.try_get("is_featured")?,
        is_available: row.try_get("is_available")?,
        image_url: row.try_get("image_url")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
pub(crate) fn sample_car_input(name: &str, price_per_day: i64) -> CarInput {
    CarInput {
        name: name.to_string(),
        car_type: "Sedan".to_string(),
        brand: Some("Toyota".to_string()),
        seats: 4,
        price_per_day,
        accent: None,
        image_url: None,
        is_featured: false,
        is_available: true,
    }
}
