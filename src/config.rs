/// Configuration management for Rental Desk
use crate::error::{RentalError, RentalResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub email: Option<EmailConfig>,
    pub rental: RentalRulesConfig,
    pub support: SupportConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// Public base URL used in voucher links
    pub public_url: String,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Emails granted the admin role regardless of token claims
    pub admin_emails: Vec<String>,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Booking rules that vary per deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RentalRulesConfig {
    /// Offset of the business calendar from UTC, in hours
    pub utc_offset_hours: i32,
    pub max_rental_days: i64,
}

/// Support chat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportConfig {
    pub poll_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> RentalResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("RENTAL_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("RENTAL_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| RentalError::Validation("Invalid port number".to_string()))?;
        let public_url = env::var("RENTAL_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port))
            .trim_end_matches('/')
            .to_string();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let data_directory: PathBuf = env::var("RENTAL_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("RENTAL_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("rental.sqlite"));

        let jwt_secret = env::var("RENTAL_JWT_SECRET")
            .map_err(|_| RentalError::Validation("JWT secret required".to_string()))?;

        let admin_emails = env::var("RENTAL_ADMIN_EMAILS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect::<Vec<String>>();

        let email = if let Ok(smtp_url) = env::var("RENTAL_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("RENTAL_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| format!("noreply@{}", hostname)),
            })
        } else {
            None
        };

        let utc_offset_hours = env::var("RENTAL_UTC_OFFSET_HOURS")
            .unwrap_or_else(|_| "8".to_string())
            .parse()
            .map_err(|_| RentalError::Validation("Invalid UTC offset".to_string()))?;
        let max_rental_days = env::var("RENTAL_MAX_RENTAL_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let poll_interval_secs = env::var("RENTAL_SUPPORT_POLL_SECS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .unwrap_or(3);

        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let json = env::var("RENTAL_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                public_url,
                version,
            },
            storage: StorageConfig {
                data_directory,
                database,
            },
            authentication: AuthConfig {
                jwt_secret,
                admin_emails,
            },
            email,
            rental: RentalRulesConfig {
                utc_offset_hours,
                max_rental_days,
            },
            support: SupportConfig { poll_interval_secs },
            logging: LoggingConfig { level, json },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> RentalResult<()> {
        if self.service.hostname.is_empty() {
            return Err(RentalError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(RentalError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if !(-12..=14).contains(&self.rental.utc_offset_hours) {
            return Err(RentalError::Validation(format!(
                "UTC offset {} is out of range",
                self.rental.utc_offset_hours
            )));
        }

        if self.rental.max_rental_days < 1 {
            return Err(RentalError::Validation(
                "Maximum rental days must be at least 1".to_string(),
            ));
        }

        if self.support.poll_interval_secs == 0 {
            return Err(RentalError::Validation(
                "Support poll interval must be at least one second".to_string(),
            ));
        }

        Ok(())
    }

    /// Is this email configured as an administrator
    pub fn is_admin_email(&self, email: &str) -> bool {
        self.authentication
            .admin_emails
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(email))
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "127.0.0.1".to_string(),
            port: 8080,
            public_url: "https://rent.example.com".to_string(),
            version: "test".to_string(),
        },
        storage: StorageConfig {
            data_directory: PathBuf::from("./data"),
            database: PathBuf::from("./data/rental.sqlite"),
        },
        authentication: AuthConfig {
            jwt_secret: "test-secret-that-is-at-least-32-characters".to_string(),
            admin_emails: vec!["admin@rent.example.com".to_string()],
        },
        email: None,
        rental: RentalRulesConfig {
            utc_offset_hours: 8,
            max_rental_days: 30,
        },
        support: SupportConfig {
            poll_interval_secs: 3,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            json: false,
        },
    }
}
