//! cv-stream: encrypted streaming storage engine
//!
//! Ties the cipher in `cv-crypto` to an [`ObjectStore`](cv_storage::ObjectStore)
//! and to HTTP partial-content semantics:
//!
//! - [`upload::UploadPipeline`]: plaintext stream → `iv || ciphertext` object
//! - [`download::DownloadPipeline`]: record + optional range → status, headers and plaintext body
//! - [`expiry::ExpiryScheduler`]: periodic removal of expired files
//! - [`service::FileService`]: the above composed with a [`metadata::MetadataStore`]

pub mod download;
pub mod expiry;
pub mod metadata;
pub mod range;
pub mod service;
pub mod upload;

pub use download::{
    decrypt_range, status_for, Download, DownloadPipeline, PlaintextStream, ResponseEnvelope,
};
pub use expiry::{ExpiryScheduler, SchedulerState, SweepReport};
pub use metadata::{JsonRecordStore, MetadataStore};
pub use range::parse_range_header;
pub use service::FileService;
pub use upload::{UploadConfig, UploadOutcome, UploadPipeline, UploadRequest};

/// Current Unix time in seconds
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
