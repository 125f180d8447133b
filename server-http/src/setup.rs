use anyhow::{Context, ensure};
use serde_json::json;
use shared::TtlSecs;
use tessera::CacheService;
use tessera::domain::now_utc;
use tessera::session::generate_session_id;
use tracing::info;

const CHECK_TTL: TtlSecs = TtlSecs(60);

/// What a passing self-check observed
#[derive(Debug)]
pub struct CheckReport {
    pub backend: &'static str,
    pub expired_removed: usize,
}

/// Exercise every cache operation once against a throwaway key.
///
/// Expects a service with strict writes so backend failures surface as
/// errors instead of `false`.
pub async fn run_self_check(service: &dyn CacheService) -> anyhow::Result<CheckReport> {
    let backend = service.backend_name();
    let key = format!("__setup_check:{}", generate_session_id());
    let payload = json!({"self_check": true, "written_at": now_utc().to_rfc3339()})
        .as_object()
        .cloned()
        .context("self-check payload is not a JSON object")?;

    info!("Checking {} backend with key {}", backend, key);

    ensure!(
        service.set(&key, payload.clone(), Some(CHECK_TTL)).await?,
        "check write was not persisted"
    );
    ensure!(
        service.get(&key).await.as_ref() == Some(&payload),
        "check read did not return the written payload"
    );
    ensure!(service.exists(&key).await, "check entry does not exist after write");
    ensure!(service.update_access_time(&key).await, "check access time was not updated");

    let metadata = service
        .get_metadata(&key)
        .await
        .context("check metadata is missing")?;
    ensure!(!metadata.is_expired, "check entry reports as expired");
    ensure!(
        metadata.remaining_ttl_secs(now_utc()) <= CHECK_TTL.0,
        "check entry expires later than its ttl"
    );

    ensure!(service.delete(&key).await?, "check delete removed nothing");
    ensure!(!service.exists(&key).await, "check entry survived delete");

    let expired_removed = service.cleanup_expired().await?;
    info!("Cleanup pass removed {} expired entries", expired_removed);

    Ok(CheckReport {
        backend,
        expired_removed,
    })
}
