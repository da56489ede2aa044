mod config;
mod guard;
mod routes;
mod state;
#[cfg(test)]
mod test_support;

use std::process::ExitCode;
use std::sync::Arc;

use session::gateway::{GatewayError, HttpIdentityGateway};

use crate::config::{ServerConfig, ServerConfigError};

#[derive(Debug, thiserror::Error)]
enum ServerError {
    #[error(transparent)]
    Config(#[from] ServerConfigError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("server io failed: {0}")]
    Io(#[from] std::io::Error),
}

async fn run() -> Result<(), ServerError> {
    let config = ServerConfig::from_env()?;
    let gateway = HttpIdentityGateway::new(&config.gateway)?;
    let state = state::AppState::new(Arc::new(gateway), config.route_policy(), config.cookie_secure);

    let app = routes::app(state, &config.site_dir);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    tracing::info!(port = config.port, site_dir = %config.site_dir.display(), "campusmart listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "campusmart server failed");
            ExitCode::FAILURE
        }
    }
}
