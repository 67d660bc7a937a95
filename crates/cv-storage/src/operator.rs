//! OpenDAL Operator factory for ciphervault storage backends

use anyhow::{Context, Result};
use cv_core::config::{StorageBackend, StorageConfig};
use opendal::{Builder, Operator};

/// Connection settings for an S3-compatible endpoint
#[derive(Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

/// Wrap a backend with the logging layer every store gets.
fn layered<B: Builder>(builder: B, what: &str) -> Result<Operator> {
    let op = Operator::new(builder)
        .with_context(|| format!("creating OpenDAL {what} operator"))?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();
    Ok(op)
}

/// Retry layer for `attempts` extra tries, or none at all for 0.
///
/// Off by default: a failed fetch reaches the caller as
/// `StorageUnavailable` and the caller decides whether to retry.
fn retry_layer(attempts: usize) -> Option<opendal::layers::RetryLayer> {
    (attempts > 0).then(|| {
        opendal::layers::RetryLayer::new()
            .with_max_times(attempts)
            .with_jitter()
    })
}

fn with_retry(op: Operator, attempts: usize) -> Operator {
    match retry_layer(attempts) {
        Some(layer) => {
            tracing::debug!(attempts, "storage retries enabled");
            op.layer(layer)
        }
        None => op,
    }
}

/// Build an operator for an S3-compatible endpoint (MinIO, SeaweedFS, AWS).
///
/// Path-style addressing is the opendal 0.55 default, which MinIO-style
/// endpoints require.
pub fn build_operator(cfg: &S3Config) -> Result<Operator> {
    let builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(&cfg.access_key_id)
        .secret_access_key(&cfg.secret_access_key);

    layered(builder, "S3")
}

/// Operator rooted at a local directory.
pub fn build_fs_operator(root: &std::path::Path) -> Result<Operator> {
    let root = root
        .to_str()
        .context("storage.root is not valid UTF-8")?;
    layered(opendal::services::Fs::default().root(root), "fs")
}

/// Process-local store; contents vanish on exit.
pub fn build_memory_operator() -> Result<Operator> {
    layered(opendal::services::Memory::default(), "memory")
}

/// Build an operator from the `[storage]` config section plus credentials.
///
/// Credentials are only used by the S3 backend. Retries are added only when
/// `storage.retry_attempts` is non-zero. If `enforce_tls` is set and
/// the S3 endpoint is plain HTTP, this fails. Otherwise a plain HTTP endpoint
/// only logs a warning.
pub fn build_from_core_config(
    storage: &StorageConfig,
    access_key_id: &str,
    secret_access_key: &str,
) -> Result<Operator> {
    let op = match storage.backend {
        StorageBackend::S3 => {
            if storage.endpoint.starts_with("http://") {
                if storage.enforce_tls {
                    anyhow::bail!(
                        "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                         Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                        storage.endpoint
                    );
                }
                tracing::warn!(
                    endpoint = %storage.endpoint,
                    "S3 endpoint uses plaintext HTTP, credentials are transmitted unencrypted. \
                     Set storage.enforce_tls = true and use HTTPS in production."
                );
            }

            build_operator(&S3Config {
                endpoint: storage.endpoint.clone(),
                region: storage.region.clone(),
                bucket: storage.bucket.clone(),
                access_key_id: access_key_id.to_string(),
                secret_access_key: secret_access_key.to_string(),
            })?
        }
        StorageBackend::Fs => build_fs_operator(&storage.root)?,
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage, objects will not survive a restart");
            build_memory_operator()?
        }
    };
    Ok(with_retry(op, storage.retry_attempts))
}
