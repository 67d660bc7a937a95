use thiserror::Error;

pub type CvResult<T> = Result<T, CvError>;

#[derive(Debug, Error)]
pub enum CvError {
    /// Key material of the wrong size reached the cipher. Never caused by
    /// untrusted input.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("range out of bounds: {len} bytes at offset {start} of a {size}-byte file")]
    RangeOutOfBounds { start: u64, len: u64, size: u64 },

    #[error("multiple byte ranges in one request are not supported")]
    UnsupportedMultiRange,

    #[error("malformed range header: {0}")]
    MalformedRange(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CvError {
    /// Transient failures the caller may retry with its own policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CvError::StorageUnavailable(_))
    }

    /// Errors caused by the request itself rather than by the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CvError::RangeOutOfBounds { .. }
                | CvError::UnsupportedMultiRange
                | CvError::MalformedRange(_)
                | CvError::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_errors_are_retryable() {
        assert!(CvError::StorageUnavailable("timeout".into()).is_retryable());
        assert!(!CvError::UploadFailed("boom".into()).is_retryable());
        assert!(!CvError::UnsupportedMultiRange.is_retryable());
    }

    #[test]
    fn range_errors_are_client_errors() {
        let err = CvError::RangeOutOfBounds {
            start: 10,
            len: 5,
            size: 12,
        };
        assert!(err.is_client_error());
        assert!(CvError::MalformedRange("bytes=x".into()).is_client_error());
        assert!(!CvError::StorageUnavailable("down".into()).is_client_error());
    }

    #[test]
    fn range_error_message_has_coordinates() {
        let err = CvError::RangeOutOfBounds {
            start: 10,
            len: 5,
            size: 12,
        };
        let msg = err.to_string();
        assert!(msg.contains("offset 10"));
        assert!(msg.contains("12-byte"));
    }
}
