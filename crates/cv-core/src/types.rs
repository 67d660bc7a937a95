use serde::{Deserialize, Serialize};

use crate::error::{CvError, CvResult};

/// Metadata for one stored file.
///
/// Owned by the metadata store. The streaming engine creates the candidate at
/// the end of an upload and only reads it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: String,
    pub owner: String,
    /// Declared MIME type of the plaintext
    pub mime: String,
    /// Plaintext size in bytes
    pub size: u64,
    /// Size of the stored object: IV header + ciphertext
    pub encrypted_size: u64,
    /// Object store path of the encrypted object
    pub storage_path: String,
    /// Reference under which the key material is kept
    pub key_ref: String,
    /// Unix timestamp (seconds) of the upload
    pub created_at: u64,
    /// Unix timestamp (seconds) after which the file is swept
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl FileRecord {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// A single byte range in plaintext coordinates, as sent in a `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub plaintext_start: u64,
    /// `None` means "to end of file"
    pub plaintext_end_inclusive: Option<u64>,
}

impl RangeRequest {
    pub fn new(plaintext_start: u64, plaintext_end_inclusive: Option<u64>) -> Self {
        Self {
            plaintext_start,
            plaintext_end_inclusive,
        }
    }

    /// Validate against the file size and return `(start, len)`.
    ///
    /// Ranges that do not fit are rejected, never clamped.
    pub fn resolve(&self, size: u64) -> CvResult<(u64, u64)> {
        let start = self.plaintext_start;
        let end = self
            .plaintext_end_inclusive
            .unwrap_or_else(|| size.saturating_sub(1));

        if size == 0 || start > end || end >= size {
            let len = end.saturating_sub(start).saturating_add(1);
            return Err(CvError::RangeOutOfBounds { start, len, size });
        }

        Ok((start, end - start + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_closed_range() {
        let r = RangeRequest::new(7, Some(16));
        assert_eq!(r.resolve(50).unwrap(), (7, 10));
    }

    #[test]
    fn resolve_open_range() {
        let r = RangeRequest::new(40, None);
        assert_eq!(r.resolve(50).unwrap(), (40, 10));
    }

    #[test]
    fn resolve_single_last_byte() {
        let r = RangeRequest::new(49, Some(49));
        assert_eq!(r.resolve(50).unwrap(), (49, 1));
    }

    #[test]
    fn end_past_size_is_rejected() {
        let r = RangeRequest::new(10, Some(50));
        assert!(matches!(
            r.resolve(50),
            Err(CvError::RangeOutOfBounds { size: 50, .. })
        ));
    }

    #[test]
    fn start_past_size_is_rejected() {
        let r = RangeRequest::new(50, None);
        assert!(r.resolve(50).is_err());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let r = RangeRequest::new(20, Some(10));
        assert!(r.resolve(50).is_err());
    }

    #[test]
    fn any_range_on_empty_file_is_rejected() {
        assert!(RangeRequest::new(0, None).resolve(0).is_err());
        assert!(RangeRequest::new(0, Some(0)).resolve(0).is_err());
    }

    #[test]
    fn expiry_check() {
        let mut record = FileRecord {
            file_id: "f1".into(),
            owner: "alice".into(),
            mime: "video/mp4".into(),
            size: 10,
            encrypted_size: 26,
            storage_path: "files/objects/f1".into(),
            key_ref: "f1".into(),
            created_at: 100,
            expires_at: None,
        };
        assert!(!record.is_expired(u64::MAX));

        record.expires_at = Some(200);
        assert!(!record.is_expired(199));
        assert!(record.is_expired(200));
        assert!(record.is_expired(201));
    }
}
