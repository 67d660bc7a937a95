use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level daemon configuration (loaded from ciphervault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CvConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub stream: StreamConfig,
    pub expiry: ExpiryConfig,
    pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Prometheus metrics + health endpoint (default: 127.0.0.1:9100)
    pub metrics_addr: Option<String>,
}

/// Object store backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Fs,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// Key prefix for stored objects
    pub prefix: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
    /// Extra attempts for failed storage calls (0 = errors surface at once)
    pub retry_attempts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Plaintext bytes read per chunk when streaming an upload
    pub chunk_size: usize,
    /// TTL applied to uploads that do not specify one (seconds, 0 = never)
    pub default_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    pub enabled: bool,
    /// Seconds between sweeps
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// JSON metadata store path
    pub path: PathBuf,
    /// File holding the base64 master key used to wrap per-file keys
    pub master_key_file: Option<PathBuf>,
}

/// Upper bound for `stream.chunk_size`
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

impl StreamConfig {
    /// Chunk size clamped to `1..=MAX_CHUNK_SIZE`
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, MAX_CHUNK_SIZE)
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_secs > 0).then(|| Duration::from_secs(self.default_ttl_secs))
    }
}

impl ExpiryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            metrics_addr: Some("127.0.0.1:9100".into()),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::S3,
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "ciphervault".into(),
            root: PathBuf::from("/var/lib/ciphervault/objects"),
            prefix: "files".into(),
            enforce_tls: false,
            retry_attempts: 0,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            default_ttl_secs: 0,
        }
    }
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/ciphervault/records.json"),
            master_key_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[daemon]
metrics_addr = "0.0.0.0:9200"

[storage]
backend = "fs"
root = "/srv/objects"
prefix = "media"
enforce_tls = true
retry_attempts = 3

[stream]
chunk_size = 1048576
default_ttl_secs = 86400

[expiry]
enabled = false
interval_secs = 60

[metadata]
path = "/srv/records.json"
master_key_file = "/etc/ciphervault/master.key"
"#;
        let config: CvConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.daemon.metrics_addr.as_deref(), Some("0.0.0.0:9200"));
        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.storage.root, PathBuf::from("/srv/objects"));
        assert_eq!(config.storage.prefix, "media");
        assert!(config.storage.enforce_tls);
        assert_eq!(config.storage.retry_attempts, 3);
        assert_eq!(config.stream.chunk_size, 1_048_576);
        assert_eq!(config.stream.default_ttl(), Some(Duration::from_secs(86400)));
        assert!(!config.expiry.enabled);
        assert_eq!(config.expiry.interval(), Duration::from_secs(60));
        assert_eq!(
            config.metadata.master_key_file,
            Some(PathBuf::from("/etc/ciphervault/master.key"))
        );
    }

    #[test]
    fn test_parse_defaults() {
        let config: CvConfig = toml::from_str("").unwrap();

        assert_eq!(config.daemon.metrics_addr.as_deref(), Some("127.0.0.1:9100"));
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.storage.bucket, "ciphervault");
        assert_eq!(config.storage.prefix, "files");
        assert_eq!(config.storage.retry_attempts, 0);
        assert_eq!(config.stream.chunk_size, 64 * 1024);
        assert_eq!(config.stream.default_ttl(), None);
        assert!(config.expiry.enabled);
        assert_eq!(config.expiry.interval_secs, 300);
        assert!(config.metadata.master_key_file.is_none());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[storage]
endpoint = "http://192.168.1.100:9000"
"#;
        let config: CvConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.storage.endpoint, "http://192.168.1.100:9000");
        assert_eq!(config.storage.region, "us-east-1");
        assert_eq!(config.stream.chunk_size, 64 * 1024);
    }

    #[test]
    fn test_chunk_size_is_bounded() {
        let huge = StreamConfig {
            chunk_size: usize::MAX,
            default_ttl_secs: 0,
        };
        assert_eq!(huge.effective_chunk_size(), MAX_CHUNK_SIZE);

        let zero = StreamConfig {
            chunk_size: 0,
            default_ttl_secs: 0,
        };
        assert_eq!(zero.effective_chunk_size(), 1);
    }

    #[test]
    fn test_zero_interval_is_raised() {
        let cfg = ExpiryConfig {
            enabled: true,
            interval_secs: 0,
        };
        assert_eq!(cfg.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = CvConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: CvConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.storage.endpoint, parsed.storage.endpoint);
        assert_eq!(config.storage.backend, parsed.storage.backend);
        assert_eq!(config.stream.chunk_size, parsed.stream.chunk_size);
    }
}
