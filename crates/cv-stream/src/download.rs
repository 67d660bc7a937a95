//! Download pipeline: record + optional plaintext range → HTTP envelope and
//! a decrypted body stream.
//!
//! Every download, full or partial, is served by exactly one ranged fetch of
//! the stored object. The body owns the store's reader; dropping it stops the
//! fetch.

use std::sync::Arc;

use bytes::Bytes;
use cv_core::{CvError, CvResult, FileRecord, RangeRequest};
use cv_crypto::{BlockSpan, KeyMaterial, RangeDecryptor};
use cv_storage::ObjectStore;
use futures::stream::{self, BoxStream, StreamExt};
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::StatusCode;
use tracing::debug;

/// Decrypted body bytes. A mid-stream failure surfaces as
/// [`CvError::StorageUnavailable`].
pub type PlaintextStream = BoxStream<'static, CvResult<Bytes>>;

/// Stream plaintext bytes `[start, start + len)` of a stored object.
///
/// `size` is the plaintext size from the record. `len == 0` yields an empty
/// stream without touching the store.
pub async fn decrypt_range(
    store: &dyn ObjectStore,
    storage_path: &str,
    size: u64,
    key: &KeyMaterial,
    start: u64,
    len: u64,
) -> CvResult<PlaintextStream> {
    let out_of_bounds = CvError::RangeOutOfBounds { start, len, size };
    match start.checked_add(len) {
        Some(end) if end <= size => {}
        _ => return Err(out_of_bounds),
    }

    let Some(span) = BlockSpan::new(start, len) else {
        return Ok(stream::empty().boxed());
    };
    let Some(fetch) = span.ciphertext_range(size) else {
        return Err(out_of_bounds);
    };
    let decryptor = RangeDecryptor::new(key.cipher()?, &span);

    debug!(
        path = %storage_path,
        start,
        len,
        fetch_start = fetch.start,
        fetch_end = fetch.end,
        "ranged fetch"
    );

    let ciphertext = store
        .get_range(storage_path, fetch.start, fetch.end)
        .await
        .map_err(|e| unavailable(storage_path, e))?;

    let path = storage_path.to_string();
    let body = stream::unfold(Some((ciphertext, decryptor, path)), |state| async move {
        let (mut ciphertext, mut decryptor, path) = state?;
        loop {
            match ciphertext.next().await {
                Some(Ok(chunk)) => {
                    let out = decryptor.push(&chunk);
                    if decryptor.is_complete() {
                        // Done: drop the reader instead of draining it.
                        return Some((Ok(out), None));
                    }
                    if !out.is_empty() {
                        return Some((Ok(out), Some((ciphertext, decryptor, path))));
                    }
                }
                Some(Err(e)) => {
                    return Some((
                        Err(CvError::StorageUnavailable(format!("{path}: {e}"))),
                        None,
                    ));
                }
                None => {
                    return decryptor
                        .finish()
                        .err()
                        .map(|e| (Err(unavailable(&path, e.into())), None));
                }
            }
        }
    });

    Ok(body.boxed())
}

/// Every fetch failure is transient from the caller's point of view, including
/// an object that vanished under an existing record.
fn unavailable(path: &str, err: CvError) -> CvError {
    match err {
        e @ CvError::StorageUnavailable(_) => e,
        other => CvError::StorageUnavailable(format!("{path}: {other}")),
    }
}

/// Status line and headers for a download response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub status: StatusCode,
    pub content_length: u64,
    /// `bytes start-end/size`, or `bytes */size` on a 416
    pub content_range: Option<String>,
    pub content_type: Option<String>,
}

impl ResponseEnvelope {
    /// Envelope for a failed request. Only a 416 carries a `Content-Range`.
    pub fn for_error(err: &CvError) -> Self {
        let content_range = match err {
            CvError::RangeOutOfBounds { size, .. } => Some(format!("bytes */{size}")),
            _ => None,
        };
        Self {
            status: status_for(err),
            content_length: 0,
            content_range,
            content_type: None,
        }
    }

    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.content_length));
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        if let Some(range) = &self.content_range {
            if let Ok(value) = HeaderValue::from_str(range) {
                headers.insert(header::CONTENT_RANGE, value);
            }
        }
        // A MIME type that is not a valid header value is left out.
        if let Some(mime) = &self.content_type {
            if let Ok(value) = HeaderValue::from_str(mime) {
                headers.insert(header::CONTENT_TYPE, value);
            }
        }
        headers
    }
}

/// HTTP status for an engine error
pub fn status_for(err: &CvError) -> StatusCode {
    match err {
        CvError::RangeOutOfBounds { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
        CvError::UnsupportedMultiRange | CvError::MalformedRange(_) => StatusCode::BAD_REQUEST,
        CvError::NotFound(_) => StatusCode::NOT_FOUND,
        CvError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub struct Download {
    pub envelope: ResponseEnvelope,
    pub body: PlaintextStream,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("envelope", &self.envelope)
            .finish_non_exhaustive()
    }
}

pub struct DownloadPipeline {
    store: Arc<dyn ObjectStore>,
}

impl DownloadPipeline {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// `None` serves the whole file with `200`, a range is validated against
    /// the plaintext size and served with `206`.
    pub async fn download(
        &self,
        record: &FileRecord,
        key: &KeyMaterial,
        range: Option<RangeRequest>,
    ) -> CvResult<Download> {
        let size = record.size;
        let (status, start, len, content_range) = match range {
            None => (StatusCode::OK, 0, size, None),
            Some(range) => {
                let (start, len) = range.resolve(size)?;
                let end = start + len - 1;
                (
                    StatusCode::PARTIAL_CONTENT,
                    start,
                    len,
                    Some(format!("bytes {start}-{end}/{size}")),
                )
            }
        };

        let body = decrypt_range(
            self.store.as_ref(),
            &record.storage_path,
            size,
            key,
            start,
            len,
        )
        .await?;

        Ok(Download {
            envelope: ResponseEnvelope {
                status,
                content_length: len,
                content_range,
                content_type: Some(record.mime.clone()),
            },
            body,
        })
    }
}
