use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{router, AppState};
use api_shared::auth::api_key_from_env;
use clinicdesk_core::{core_config_from_env_values, ClinicServices};

/// Main entry point for the ClinicDesk server
///
/// # Environment Variables
/// - `CLINICDESK_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `CLINICDESK_DB_PATH`: SQLite database file (default: "clinicdesk.db")
/// - `CLINICDESK_BUSY_TIMEOUT_MS`: how long a writer waits for the store lock
/// - `API_KEY`: key required on mutating requests
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("clinicdesk=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = core_config_from_env_values(
        std::env::var("CLINICDESK_DB_PATH").ok(),
        std::env::var("CLINICDESK_BUSY_TIMEOUT_MS").ok(),
    )?;
    let services = ClinicServices::open(&cfg)?;
    tracing::info!("++ Using database {}", cfg.database_path().display());

    let api_key = api_key_from_env();
    if api_key.is_none() {
        tracing::warn!("API_KEY is not set; every mutating request will be rejected");
    }

    let rest_addr: SocketAddr = std::env::var("CLINICDESK_REST_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".into())
        .parse()?;
    tracing::info!("++ Starting ClinicDesk REST on {}", rest_addr);

    let app = router(AppState::new(services, api_key));
    let listener = tokio::net::TcpListener::bind(rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
