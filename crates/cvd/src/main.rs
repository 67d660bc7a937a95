//! cvd: ciphervault daemon
//!
//! Usage:
//!   cvd [--config /etc/ciphervault/config.toml] [--log info] [--log-format text|json]
//!   cvd --check-config
//!
//! Runs the expiry sweep against the configured object store and metadata
//! store, and serves `/metrics`, `/healthz` and `/readyz`.

mod daemon;
mod metrics;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use cv_core::config::{CvConfig, StorageBackend};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cvd", version, about = "ciphervault daemon")]
struct Cli {
    /// Path to the ciphervault.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "CV_CONFIG",
        default_value = "/etc/ciphervault/config.toml"
    )]
    config: PathBuf,

    /// Log level for the ciphervault crates, or a full filter directive
    #[arg(long, env = "CV_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "CV_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    check_config: bool,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log, &cli.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "cvd starting"
    );

    let config = load_config(&cli.config).await?;
    if cli.check_config {
        info!(
            backend = ?config.storage.backend,
            prefix = %config.storage.prefix,
            records = %config.metadata.path.display(),
            expiry = config.expiry.enabled,
            "config ok"
        );
        return Ok(());
    }

    daemon::run(config).await
}

/// Read, parse and validate the config. A missing file means defaults.
async fn load_config(path: &Path) -> Result<CvConfig> {
    let config = match tokio::fs::read_to_string(path).await {
        Ok(content) => toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "config file not found, using defaults");
            CvConfig::default()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("reading config {}", path.display()));
        }
    };
    validate(&config)?;
    Ok(config)
}

/// Reject configs the daemon cannot start with; warn about ones it can.
fn validate(config: &CvConfig) -> Result<()> {
    let storage = &config.storage;
    match storage.backend {
        StorageBackend::S3 if storage.bucket.is_empty() => {
            anyhow::bail!("storage.bucket must be set for the s3 backend")
        }
        StorageBackend::Fs if !storage.root.is_absolute() => anyhow::bail!(
            "storage.root must be an absolute path, got {}",
            storage.root.display()
        ),
        _ => {}
    }
    if storage.prefix.trim_matches('/').is_empty() {
        anyhow::bail!("storage.prefix must not be empty");
    }

    if config.stream.effective_chunk_size() != config.stream.chunk_size {
        warn!(
            configured = config.stream.chunk_size,
            effective = config.stream.effective_chunk_size(),
            "stream.chunk_size out of range, clamped"
        );
    }
    if config.metadata.master_key_file.is_none() && storage.backend != StorageBackend::Memory {
        warn!("metadata.master_key_file unset, CV_MASTER_KEY must be provided");
    }
    Ok(())
}

/// Filter directives for `level`. A bare level applies to the ciphervault
/// crates only and keeps OpenDAL's per-call logging at `warn`. Anything
/// containing `=` is taken as a full directive string.
fn filter_directives(level: &str) -> String {
    if level.contains('=') {
        return level.to_string();
    }
    ["cvd", "cv_core", "cv_crypto", "cv_storage", "cv_stream"]
        .iter()
        .map(|target| format!("{target}={level}"))
        .chain(std::iter::once("opendal=warn".to_string()))
        .collect::<Vec<_>>()
        .join(",")
}

/// `RUST_LOG` wins over `--log` when set.
fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(level)));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::parse_from([
            "cvd",
            "--config",
            "/tmp/cv.toml",
            "--log",
            "debug",
            "--log-format",
            "json",
        ]);
        assert_eq!(cli.config, PathBuf::from("/tmp/cv.toml"));
        assert_eq!(cli.log, "debug");
        assert!(matches!(cli.log_format, LogFormat::Json));
    }

    #[tokio::test]
    async fn missing_config_falls_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.storage.backend, StorageBackend::S3);
    }

    #[tokio::test]
    async fn config_file_is_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cv.toml");
        std::fs::write(&path, "[storage]\nbackend = \"memory\"\n").unwrap();

        let config = load_config(&path).await.unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn check_config_flag() {
        let cli = Cli::parse_from(["cvd", "--check-config"]);
        assert!(cli.check_config);
        assert!(!Cli::parse_from(["cvd"]).check_config);
    }

    #[test]
    fn bare_level_scopes_to_ciphervault_crates() {
        let directives = filter_directives("debug");
        assert!(directives.contains("cv_stream=debug"));
        assert!(directives.contains("cvd=debug"));
        assert!(directives.ends_with("opendal=warn"));
    }

    #[test]
    fn full_directive_is_kept() {
        assert_eq!(filter_directives("info,opendal=debug"), "info,opendal=debug");
    }

    #[test]
    fn fs_backend_needs_absolute_root() {
        let mut config = CvConfig::default();
        config.storage.backend = StorageBackend::Fs;
        config.storage.root = PathBuf::from("objects");
        assert!(validate(&config).is_err());

        config.storage.root = PathBuf::from("/srv/objects");
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn empty_bucket_or_prefix_is_rejected() {
        let mut config = CvConfig::default();
        config.storage.bucket.clear();
        assert!(validate(&config).is_err());

        let mut config = CvConfig::default();
        config.storage.prefix = "/".into();
        assert!(validate(&config).is_err());
    }

    #[tokio::test]
    async fn invalid_config_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cv.toml");
        std::fs::write(&path, "[storage\n").unwrap();
        assert!(load_config(&path).await.is_err());
    }
}
