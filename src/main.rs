#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Liveness probe for the configured session store
//!
//! Loads settings the same way an embedding service does, builds the store,
//! and exits 0 when it answers a health check, 1 otherwise.

use std::process::ExitCode;

use anyhow::Context;
use authsession::{settings::Settings, SessionServices, VERSION};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<bool> {
    // Also loads .env and initializes the logger
    let settings = Settings::load().context("Failed to load settings")?;

    log::info!(
        "authsession {VERSION} probing {:?} session store",
        settings.store.backend
    );

    let services = SessionServices::from_settings(&settings)
        .await
        .context("Failed to build session services")?;

    let healthy = services.health_check().await;
    if healthy {
        log::info!("Session store is healthy");
    } else {
        log::error!("Session store failed its health check");
    }

    services.close().await;
    Ok(healthy)
}
