//! Upload pipeline: plaintext stream → encrypted object + record candidate

use std::io;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use cv_core::config::CvConfig;
use cv_core::{CvError, CvResult, FileRecord};
use cv_crypto::{EncryptingWriter, KeyMaterial, HEADER_LEN};
use cv_storage::{ByteStream, ObjectStore};
use futures::stream::{self, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::unix_now;

/// Upload settings taken from the `[storage]` and `[stream]` config sections
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Objects are written under `{prefix}/objects/`
    pub prefix: String,
    /// Read size used by [`UploadPipeline::upload_reader`]
    pub chunk_size: usize,
    /// TTL for uploads that do not ask for one
    pub default_ttl: Option<Duration>,
}

impl UploadConfig {
    pub fn from_config(config: &CvConfig) -> Self {
        Self {
            prefix: config.storage.prefix.clone(),
            chunk_size: config.stream.effective_chunk_size(),
            default_ttl: config.stream.default_ttl(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self::from_config(&CvConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub mime: String,
    pub owner: String,
    /// `None` falls back to [`UploadConfig::default_ttl`]
    pub ttl: Option<Duration>,
}

impl UploadRequest {
    pub fn new(mime: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            mime: mime.into(),
            owner: owner.into(),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// A written object: the record candidate and the key that decrypts it.
///
/// The caller persists both through its metadata collaborator.
#[derive(Debug)]
pub struct UploadOutcome {
    pub record: FileRecord,
    pub key: KeyMaterial,
}

pub struct UploadPipeline {
    store: Arc<dyn ObjectStore>,
    config: UploadConfig,
}

impl UploadPipeline {
    pub fn new(store: Arc<dyn ObjectStore>, config: UploadConfig) -> Self {
        Self { store, config }
    }

    pub async fn upload(
        &self,
        plaintext: ByteStream,
        mime: &str,
        owner: &str,
    ) -> CvResult<UploadOutcome> {
        self.upload_with(
            plaintext,
            &UploadRequest::new(mime, owner),
            &CancellationToken::new(),
        )
        .await
    }

    /// Upload from any async reader, read in `chunk_size` pieces.
    pub async fn upload_reader<R>(
        &self,
        reader: R,
        request: &UploadRequest,
        cancel: &CancellationToken,
    ) -> CvResult<UploadOutcome>
    where
        R: AsyncRead + Send + 'static,
    {
        let plaintext = ReaderStream::with_capacity(reader, self.config.chunk_size).boxed();
        self.upload_with(plaintext, request, cancel).await
    }

    /// Encrypt `plaintext` into a fresh object.
    ///
    /// On a failed put, a plaintext stream error, a byte count mismatch or
    /// cancellation, the partial object is deleted best-effort and the
    /// upload fails with [`CvError::UploadFailed`].
    pub async fn upload_with(
        &self,
        plaintext: ByteStream,
        request: &UploadRequest,
        cancel: &CancellationToken,
    ) -> CvResult<UploadOutcome> {
        let file_id = uuid::Uuid::new_v4().to_string();
        let storage_path = format!(
            "{}/objects/{}",
            self.config.prefix.trim_end_matches('/'),
            file_id
        );

        let key = KeyMaterial::generate();
        let writer = EncryptingWriter::new(&key)?;
        let plaintext_len = Arc::new(OnceLock::new());
        let body = encrypt_stream(plaintext, writer, plaintext_len.clone(), cancel.clone());

        // Cancellation surfaces as a body error, so the store aborts its own
        // in-flight write before the partial object is discarded.
        let written = match self.store.put(&storage_path, body).await {
            Ok(n) => n,
            Err(e) => {
                self.discard(&storage_path).await;
                if cancel.is_cancelled() {
                    info!(path = %storage_path, "upload cancelled");
                    return Err(CvError::UploadFailed("upload cancelled".into()));
                }
                warn!(path = %storage_path, "upload failed: {e}");
                return Err(match e {
                    e @ CvError::UploadFailed(_) => e,
                    other => CvError::UploadFailed(other.to_string()),
                });
            }
        };

        let size = plaintext_len.get().copied();
        let size = match size {
            Some(size) if written == HEADER_LEN + size => size,
            _ => {
                self.discard(&storage_path).await;
                return Err(CvError::UploadFailed(format!(
                    "byte count mismatch: stored {written} bytes for {size:?} plaintext bytes"
                )));
            }
        };

        let created_at = unix_now();
        let ttl = request.ttl.or(self.config.default_ttl);
        let record = FileRecord {
            file_id: file_id.clone(),
            owner: request.owner.clone(),
            mime: request.mime.clone(),
            size,
            encrypted_size: written,
            storage_path,
            key_ref: file_id,
            created_at,
            expires_at: ttl.map(|t| created_at.saturating_add(t.as_secs())),
        };

        info!(
            file_id = %record.file_id,
            path = %record.storage_path,
            bytes = record.size,
            "upload complete"
        );
        Ok(UploadOutcome { record, key })
    }

    /// Best-effort removal of a partial object.
    pub(crate) async fn discard(&self, path: &str) {
        if let Err(e) = self.store.delete(path).await {
            warn!(path = %path, "cleanup of partial object failed: {e}");
        }
    }
}

/// Ciphertext stream over `plaintext`. The IV header is always emitted, even
/// for an empty plaintext. The plaintext length is recorded once the source
/// ends cleanly.
///
/// Once `cancel` fires, the next pull yields an [`io::ErrorKind::Interrupted`]
/// error and the stream ends.
fn encrypt_stream(
    plaintext: ByteStream,
    writer: EncryptingWriter,
    plaintext_len: Arc<OnceLock<u64>>,
    cancel: CancellationToken,
) -> ByteStream {
    stream::unfold(Some((plaintext, writer)), move |state| {
        let plaintext_len = plaintext_len.clone();
        let cancel = cancel.clone();
        async move {
            let (mut source, mut writer) = state?;
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let err = io::Error::new(io::ErrorKind::Interrupted, "upload cancelled");
                    return Some((Err(err), None));
                }
                next = source.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    let out = writer.write(&chunk);
                    Some((Ok(out), Some((source, writer))))
                }
                Some(Err(e)) => Some((Err(e), None)),
                None => {
                    let (trailer, len) = writer.finish();
                    let _ = plaintext_len.set(len);
                    trailer.map(|header| (Ok(header), None))
                }
            }
        }
    })
    .boxed()
}
