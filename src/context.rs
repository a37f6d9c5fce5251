/// Application context and dependency injection
use crate::{
    booking::BookingManager,
    calendar::BusinessCalendar,
    config::ServerConfig,
    db,
    error::{RentalError, RentalResult},
    fleet::CarManager,
    mailer::{Mailer, VoucherNotifier},
    support::{TicketManager, TicketPoller},
};
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub car_manager: Arc<CarManager>,
    pub booking_manager: Arc<BookingManager>,
    pub ticket_manager: Arc<TicketManager>,
    pub ticket_poller: Arc<TicketPoller>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> RentalResult<Self> {
        config.validate()?;

        if !config.storage.data_directory.exists() {
            tokio::fs::create_dir_all(&config.storage.data_directory)
                .await
                .map_err(|e| {
                    RentalError::Internal(format!(
                        "Failed to create directory {:?}: {}",
                        config.storage.data_directory, e
                    ))
                })?;
        }

        let db = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        let calendar = BusinessCalendar::from_offset_hours(config.rental.utc_offset_hours)?;

        let mailer = Mailer::new(config.email.clone())?;
        if !mailer.is_configured() {
            tracing::warn!("Email not configured; voucher links are returned to the caller only");
        }

        Ok(Self::assemble(config, db, calendar, Arc::new(mailer)))
    }

    /// Wire managers over an open pool
    pub fn assemble(
        config: ServerConfig,
        db: SqlitePool,
        calendar: BusinessCalendar,
        notifier: Arc<dyn VoucherNotifier>,
    ) -> Self {
        let car_manager = CarManager::new(db.clone());
        let booking_manager = BookingManager::new(
            db.clone(),
            car_manager.clone(),
            calendar,
            config.rental.max_rental_days,
            config.service.public_url.clone(),
            notifier,
        );
        let ticket_manager = TicketManager::new(db.clone(), car_manager.clone());
        let ticket_poller = TicketPoller::new(
            ticket_manager.clone(),
            Duration::from_secs(config.support.poll_interval_secs),
        );

        Self {
            config: Arc::new(config),
            db,
            car_manager: Arc::new(car_manager),
            booking_manager: Arc::new(booking_manager),
            ticket_manager: Arc::new(ticket_manager),
            ticket_poller: Arc::new(ticket_poller),
        }
    }

    pub fn listen_address(&self) -> String {
        format!(
            "{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
