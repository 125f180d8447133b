//! Validates the configured cache backend end to end and exits non-zero on failure.

use anyhow::Context;
use server_http::init_tracing;
use server_http::setup::run_self_check;
use shared::config::Config;
use std::process::ExitCode;
use storage_engine::CacheServiceFactory;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    match check().await {
        Ok(()) => {
            info!("Setup check passed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Setup check failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn check() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    info!(
        "Checking {} backend (collection '{}')",
        config.cache.backend, config.cache.collection_name
    );

    // Strict writes so a failing backend surfaces as an error rather than `false`
    let mut cache_config = config.cache;
    cache_config.strict_writes = true;

    let service = CacheServiceFactory::create(&cache_config).context("failed to construct backend")?;
    let report = run_self_check(service.as_ref()).await?;

    info!(
        "Backend {} answered set/get/exists/touch/metadata/delete; cleanup removed {} entries",
        report.backend, report.expired_removed
    );
    Ok(())
}
