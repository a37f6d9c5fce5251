/// Fleet: the cars offered for rent
pub mod manager;

pub use manager::CarManager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Car record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Car {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub car_type: String,
    pub brand: Option<String>,
    pub seats: i64,
    pub price_per_day: i64,
    pub accent: Option<String>,
    pub is_featured: bool,
    pub is_available: bool,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Short car description embedded in bookings and tickets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarSummary {
    pub id: String,
    pub name: String,
    pub brand: Option<String>,
    pub price_per_day: i64,
}

impl From<&Car> for CarSummary {
    fn from(car: &Car) -> Self {
        Self {
            id: car.id.clone(),
            name: car.name.clone(),
            brand: car.brand.clone(),
            price_per_day: car.price_per_day,
        }
    }
}

/// Admin input for creating or replacing a car
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CarInput {
    #[validate(length(min = 1, max = 120, message = "Car name is required"))]
    pub name: String,
    #[serde(rename = "type")]
    #[validate(length(min = 1, max = 60, message = "Car type is required"))]
    pub car_type: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[validate(range(min = 1, max = 60, message = "Seats must be between 1 and 60"))]
    pub seats: i64,
    #[validate(range(
        min = 0,
        max = 10_000_000,
        message = "Price per day must be between 0 and 10,000,000"
    ))]
    pub price_per_day: i64,
    #[serde(default)]
    pub accent: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default = "default_available")]
    pub is_available: bool,
}

fn default_available() -> bool {
    true
}

impl CarInput {
    /// Trim text fields and turn blank optionals into None
    pub fn normalized(mut self) -> Self {
        fn blank_to_none(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }

        self.name = self.name.trim().to_string();
        self.car_type = self.car_type.trim().to_string();
        self.brand = blank_to_none(self.brand);
        self.accent = blank_to_none(self.accent);
        self.image_url = blank_to_none(self.image_url);
        self
    }
}

/// Catalogue filter
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarFilter {
    pub featured: Option<bool>,
    pub available: Option<bool>,
    pub brand: Option<String>,
    /// Free-text match on name, type, and brand
    pub q: Option<String>,
}

impl CarFilter {
    pub fn matches(&self, car: &Car) -> bool {
        if let Some(featured) = self.featured {
            if car.is_featured != featured {
                return false;
            }
        }
        if let Some(available) = self.available {
            if car.is_available != available {
                return false;
            }
        }
        if let Some(brand) = self.brand.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            if !brand.eq_ignore_ascii_case("all")
                && !car
                    .brand
                    .as_deref()
                    .map(|b| b.eq_ignore_ascii_case(brand))
                    .unwrap_or(false)
            {
                return false;
            }
        }
        if let Some(q) = self.q.as_deref().map(normalize_text).filter(|q| !q.is_empty()) {
            let haystack = normalize_text(&format!(
                "{} {} {}",
                car.name,
                car.car_type,
                car.brand.as_deref().unwrap_or("")
            ));
            if !haystack.contains(&q) {
                return false;
            }
        }
        true
    }
}

/// Lowercase and collapse whitespace for search
pub fn normalize_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car(name: &str, brand: Option<&str>, featured: bool) -> Car {
        Car {
            id: "c1".to_string(),
            name: name.to_string(),
            car_type: "Sedan".to_string(),
            brand: brand.map(String::from),
            seats: 4,
            price_per_day: 1500,
            accent: None,
            is_featured: featured,
            is_available: true,
            image_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_filter_by_brand_and_text() {
        let vios = car("Toyota Vios", Some("Toyota"), true);

        let by_brand = CarFilter {
            brand: Some("toyota".to_string()),
            ..Default::default()
        };
        assert!(by_brand.matches(&vios));

        let all_brands = CarFilter {
            brand: Some("All".to_string()),
            ..Default::default()
        };
        assert!(all_brands.matches(&vios));

        let by_text = CarFilter {
            q: Some("  vios   sedan ".to_string()),
            ..Default::default()
        };
        assert!(by_text.matches(&vios));

        let by_text = CarFilter {
            q: Some("honda".to_string()),
            ..Default::default()
        };
        assert!(!by_text.matches(&vios));

        let by_text = CarFilter {
            q: Some("VIOS".to_string()),
            ..Default::default()
        };
        assert!(by_text.matches(&vios));

        let not_featured = CarFilter {
            featured: Some(false),
            ..Default::default()
        };
        assert!(!not_featured.matches(&vios));
    }

    #[test]
    fn test_input_normalization_and_validation() {
        let input = CarInput {
            name: "  Vios ".to_string(),
            car_type: " ".to_string(),
            brand: Some("   ".to_string()),
            seats: 4,
            price_per_day: 1500,
            accent: None,
            image_url: None,
            is_featured: false,
            is_available: true,
        }
        .normalized();

        assert_eq!(input.name, "Vios");
        assert!(input.brand.is_none());
        assert!(input.validate().is_err());
    }
}
