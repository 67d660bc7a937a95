//! The object store seam used by the streaming pipelines

use async_trait::async_trait;
use bytes::Bytes;
use cv_core::{CvError, CvResult};
use futures::stream::{BoxStream, StreamExt};
use opendal::Operator;
use tracing::{debug, warn};

/// A stream of body bytes, either plaintext or ciphertext depending on the side.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Minimal object store contract for encrypted objects.
///
/// Implementations must be safe to share across tasks. Errors from the
/// backend surface as [`CvError::StorageUnavailable`] (retryable) or
/// [`CvError::NotFound`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream `body` into a new object at `path` and return the byte count.
    ///
    /// Nothing is committed unless the whole stream was written. An error
    /// yielded by `body` itself is returned as [`CvError::Io`].
    async fn put(&self, path: &str, body: ByteStream) -> CvResult<u64>;

    /// Read bytes `[start, end)` of the object at `path`.
    async fn get_range(&self, path: &str, start: u64, end: u64) -> CvResult<ByteStream>;

    /// Remove the object at `path`. A missing object is not an error.
    async fn delete(&self, path: &str) -> CvResult<()>;

    async fn exists(&self, path: &str) -> CvResult<bool>;
}

/// [`ObjectStore`] over any OpenDAL operator.
#[derive(Clone, Debug)]
pub struct OpendalStore {
    op: Operator,
}

impl OpendalStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }
}

fn map_err(path: &str, e: opendal::Error) -> CvError {
    if e.kind() == opendal::ErrorKind::NotFound {
        CvError::NotFound(path.to_string())
    } else {
        CvError::StorageUnavailable(format!("{path}: {e}"))
    }
}

#[async_trait]
impl ObjectStore for OpendalStore {
    async fn put(&self, path: &str, mut body: ByteStream) -> CvResult<u64> {
        let mut writer = self.op.writer(path).await.map_err(|e| map_err(path, e))?;
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let result = match chunk {
                Ok(chunk) => {
                    let len = chunk.len() as u64;
                    writer
                        .write(chunk)
                        .await
                        .map(|_| len)
                        .map_err(|e| map_err(path, e))
                }
                Err(e) => Err(CvError::Io(e)),
            };

            match result {
                Ok(len) => written += len,
                Err(err) => {
                    if let Err(e) = writer.abort().await {
                        warn!(path = %path, "aborting partial write failed: {e}");
                    }
                    return Err(err);
                }
            }
        }

        writer.close().await.map_err(|e| map_err(path, e))?;
        debug!(path = %path, bytes = written, "object written");
        Ok(written)
    }

    async fn get_range(&self, path: &str, start: u64, end: u64) -> CvResult<ByteStream> {
        let reader = self.op.reader(path).await.map_err(|e| map_err(path, e))?;
        let stream = reader
            .into_bytes_stream(start..end)
            .await
            .map_err(|e| map_err(path, e))?;
        Ok(stream.boxed())
    }

    async fn delete(&self, path: &str) -> CvResult<()> {
        match self.op.delete(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_err(path, e)),
        }
    }

    async fn exists(&self, path: &str) -> CvResult<bool> {
        self.op.exists(path).await.map_err(|e| map_err(path, e))
    }
}
