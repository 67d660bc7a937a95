use cv_core::CvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid key material length: expected {expected} bytes, got {actual}")]
    KeyMaterialLength { expected: usize, actual: usize },

    #[error("invalid master key: {0}")]
    InvalidMasterKey(String),

    #[error("key wrapping failed: {0}")]
    KeyWrap(String),

    #[error("ciphertext ended early: {missing} plaintext bytes missing")]
    TruncatedCiphertext { missing: u64 },
}

impl From<CryptoError> for CvError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKeyLength { expected, actual }
            | CryptoError::KeyMaterialLength { expected, actual } => {
                CvError::InvalidKeyLength { expected, actual }
            }
            CryptoError::InvalidMasterKey(msg) => CvError::Config(msg),
            CryptoError::KeyWrap(msg) => CvError::Metadata(msg),
            e @ CryptoError::TruncatedCiphertext { .. } => {
                CvError::StorageUnavailable(e.to_string())
            }
        }
    }
}
