//! Upload and download pipelines composed with the metadata store

use std::sync::Arc;
use std::time::Duration;

use cv_core::{CvResult, FileRecord};
use cv_storage::{ByteStream, ObjectStore};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::download::{Download, DownloadPipeline, ResponseEnvelope};
use crate::metadata::MetadataStore;
use crate::range::parse_range_header;
use crate::upload::{UploadConfig, UploadPipeline, UploadRequest};

pub struct FileService {
    store: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    upload: UploadPipeline,
    download: DownloadPipeline,
}

impl FileService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        config: UploadConfig,
    ) -> Self {
        Self {
            upload: UploadPipeline::new(store.clone(), config),
            download: DownloadPipeline::new(store.clone()),
            store,
            metadata,
        }
    }

    pub async fn store(
        &self,
        plaintext: ByteStream,
        mime: &str,
        owner: &str,
        ttl: Option<Duration>,
    ) -> CvResult<FileRecord> {
        let mut request = UploadRequest::new(mime, owner);
        request.ttl = ttl;
        self.store_with(plaintext, &request, &CancellationToken::new())
            .await
    }

    /// Upload, then persist key and record. If either metadata write fails
    /// the new object is removed again.
    pub async fn store_with(
        &self,
        plaintext: ByteStream,
        request: &UploadRequest,
        cancel: &CancellationToken,
    ) -> CvResult<FileRecord> {
        let outcome = self.upload.upload_with(plaintext, request, cancel).await?;
        let record = outcome.record;

        if let Err(e) = self.metadata.put_key(&record.key_ref, &outcome.key).await {
            self.upload.discard(&record.storage_path).await;
            return Err(e);
        }

        if let Err(e) = self.metadata.create_record(&record).await {
            if let Err(cleanup) = self.metadata.delete_key(&record.key_ref).await {
                warn!(file_id = %record.file_id, "removing orphaned key failed: {cleanup}");
            }
            self.upload.discard(&record.storage_path).await;
            return Err(e);
        }

        Ok(record)
    }

    /// Look up a file and stream it, honoring a raw `Range` header value.
    pub async fn open(&self, file_id: &str, range_header: Option<&str>) -> CvResult<Download> {
        let record = self.metadata.get_record(file_id).await?;
        let key = self.metadata.get_key(&record.key_ref).await?;
        let range = range_header
            .map(|value| parse_range_header(value, record.size))
            .transpose()?;

        self.download.download(&record, &key, range).await
    }

    /// [`open`](Self::open) for a response writer: a failure becomes its
    /// error envelope with an empty body.
    pub async fn serve(&self, file_id: &str, range_header: Option<&str>) -> Download {
        match self.open(file_id, range_header).await {
            Ok(download) => download,
            Err(e) => {
                if e.is_client_error() {
                    debug!(file_id = %file_id, "download rejected: {e}");
                } else {
                    warn!(file_id = %file_id, "download failed: {e}");
                }
                Download {
                    envelope: ResponseEnvelope::for_error(&e),
                    body: stream::empty().boxed(),
                }
            }
        }
    }

    /// Delete a file: object first, then its record.
    pub async fn remove(&self, file_id: &str) -> CvResult<()> {
        let record = self.metadata.get_record(file_id).await?;
        self.store.delete(&record.storage_path).await?;
        self.metadata.delete_record(file_id).await?;
        info!(file_id = %file_id, "file removed");
        Ok(())
    }
}
