/// Rental Desk
///
/// Storefront and back-office service for a car rental business: the car
/// catalogue, bookings with voucher confirmation and prorated billing, and
/// support tickets with a per-customer chat.
mod api;
mod auth;
mod booking;
mod calendar;
mod config;
mod context;
mod db;
mod error;
mod fleet;
mod mailer;
mod server;
mod support;

use config::ServerConfig;
use context::AppContext;
use error::RentalResult;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> RentalResult<()> {
    let config = ServerConfig::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rental_desk={},tower_http=debug", config.logging.level)));
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    print_banner();

    let ctx = AppContext::new(config).await?;

    server::serve(ctx).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    ____             __        __   ____            __
   / __ \___  ____  / /_____ _/ /  / __ \___  _____/ /__
  / /_/ / _ \/ __ \/ __/ __ `/ /  / / / / _ \/ ___/ //_/
 / _, _/  __/ / / / /_/ /_/ / /  / /_/ /  __(__  ) ,<
/_/ |_|\___/_/ /_/\__/\__,_/_/  /_____/\___/____/_/|_|

        Car rental storefront and back office v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
