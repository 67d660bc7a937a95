//! Daemon lifecycle: storage + metadata startup, expiry loop, health endpoint,
//! signal-driven shutdown

use anyhow::{Context, Result};
use cv_core::config::{CvConfig, MetadataConfig, StorageBackend};
use cv_crypto::MasterKey;
use cv_storage::OpendalStore;
use cv_stream::{ExpiryScheduler, JsonRecordStore};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics::{ExpiryMetrics, HealthState};

pub async fn run(config: CvConfig) -> Result<()> {
    info!("daemon starting");

    // Build storage operator and verify connectivity
    let (access_key_id, secret_access_key) = s3_credentials();
    let operator = cv_storage::build_from_core_config(
        &config.storage,
        &access_key_id,
        &secret_access_key,
    )?;
    match cv_storage::check_health(&operator, &config.storage.prefix).await {
        Ok(()) => info!(backend = ?config.storage.backend, "storage: connected"),
        Err(e) => warn!(backend = ?config.storage.backend, "storage: {e}"),
    }
    let store = Arc::new(OpendalStore::new(operator.clone()));

    // Metadata store
    let master = load_master_key(&config.metadata, config.storage.backend)?;
    let metadata = Arc::new(
        JsonRecordStore::open(&config.metadata.path, master)
            .with_context(|| format!("opening record store {}", config.metadata.path.display()))?,
    );
    info!(
        path = %config.metadata.path.display(),
        records = metadata.len().await,
        "record store opened"
    );

    // Metrics + health endpoint
    let mut registry = Registry::default();
    let expiry_metrics = ExpiryMetrics::new(&mut registry);
    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let state = HealthState {
            registry: Arc::new(registry),
            operator,
            prefix: config.storage.prefix.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    // Expiry loop
    let cancel = CancellationToken::new();
    let sweeper = if config.expiry.enabled {
        let scheduler = ExpiryScheduler::new(store, metadata, config.expiry.interval());
        let token = cancel.clone();
        Some(tokio::spawn(async move {
            scheduler
                .run_with(token, move |report| expiry_metrics.record(report))
                .await
        }))
    } else {
        info!("expiry disabled");
        None
    };

    notify_ready();

    // Wait for SIGTERM or SIGINT
    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    cancel.cancel();
    if let Some(handle) = sweeper {
        if let Err(e) = handle.await {
            warn!("expiry task ended abnormally: {e}");
        }
    }

    info!("daemon exiting cleanly");
    Ok(())
}

/// S3 credentials from `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`, falling
/// back to `CV_ACCESS_KEY_ID`/`CV_SECRET_ACCESS_KEY`. Empty when unset.
fn s3_credentials() -> (String, String) {
    let var = |primary: &str, fallback: &str| {
        std::env::var(primary)
            .or_else(|_| std::env::var(fallback))
            .unwrap_or_default()
    };
    (
        var("AWS_ACCESS_KEY_ID", "CV_ACCESS_KEY_ID"),
        var("AWS_SECRET_ACCESS_KEY", "CV_SECRET_ACCESS_KEY"),
    )
}

/// Master key from `metadata.master_key_file`, else `CV_MASTER_KEY`.
///
/// Only the memory backend may run with a throwaway key, since nothing it
/// stores outlives the process anyway.
fn load_master_key(metadata: &MetadataConfig, backend: StorageBackend) -> Result<MasterKey> {
    if let Some(path) = &metadata.master_key_file {
        let encoded = std::fs::read_to_string(path)
            .with_context(|| format!("reading master key {}", path.display()))?;
        return MasterKey::from_base64(&encoded)
            .with_context(|| format!("parsing master key {}", path.display()));
    }

    if let Ok(encoded) = std::env::var("CV_MASTER_KEY") {
        return MasterKey::from_base64(&encoded).context("parsing CV_MASTER_KEY");
    }

    if backend == StorageBackend::Memory {
        warn!("no master key configured, using an ephemeral one");
        return Ok(MasterKey::generate());
    }

    anyhow::bail!(
        "no master key: set metadata.master_key_file or CV_MASTER_KEY \
         (32 random bytes, base64)"
    )
}

fn notify_ready() {
    // sd_notify(READY=1) when running under systemd; no-op without $NOTIFY_SOCKET
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn master_key_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("master.key");
        // 32 bytes of 0x01, base64
        std::fs::write(&path, "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=\n").unwrap();

        let cfg = MetadataConfig {
            master_key_file: Some(path),
            ..Default::default()
        };
        let key = load_master_key(&cfg, StorageBackend::S3).unwrap();
        assert_eq!(key.as_bytes(), &[1u8; 32]);
    }

    #[test]
    fn bad_master_key_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("master.key");
        std::fs::write(&path, "dG9vIHNob3J0").unwrap();

        let cfg = MetadataConfig {
            master_key_file: Some(path),
            ..Default::default()
        };
        assert!(load_master_key(&cfg, StorageBackend::S3).is_err());
    }

    #[test]
    fn missing_master_key_file_is_an_error() {
        let cfg = MetadataConfig {
            master_key_file: Some("/nonexistent/master.key".into()),
            ..Default::default()
        };
        assert!(load_master_key(&cfg, StorageBackend::Memory).is_err());
    }
}
