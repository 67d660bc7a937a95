//! Per-file key material, master key, and key wrapping

use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, Zeroizing};

use crate::counter::CounterCipher;
use crate::error::CryptoError;
use crate::{IV_SIZE, KEY_MATERIAL_SIZE, KEY_SIZE, WRAPPED_KEY_SIZE, WRAP_NONCE_SIZE};

/// A per-file AES-256 key and CTR initialization vector. Zeroized on drop.
///
/// Generated once per upload and never reused for another file.
#[derive(Clone)]
pub struct KeyMaterial {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl KeyMaterial {
    /// Fresh random key and IV from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    pub fn from_parts(key: [u8; KEY_SIZE], iv: [u8; IV_SIZE]) -> Self {
        Self { key, iv }
    }

    /// Parse the 48-byte storage form (`key || iv`).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_MATERIAL_SIZE {
            return Err(CryptoError::KeyMaterialLength {
                expected: KEY_MATERIAL_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        let mut iv = [0u8; IV_SIZE];
        key.copy_from_slice(&bytes[..KEY_SIZE]);
        iv.copy_from_slice(&bytes[KEY_SIZE..]);
        Ok(Self { key, iv })
    }

    /// The 48-byte storage form (`key || iv`).
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(KEY_MATERIAL_SIZE));
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.iv);
        out
    }

    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    pub fn cipher(&self) -> Result<CounterCipher, CryptoError> {
        CounterCipher::new(&self.key, &self.iv)
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

/// A 256-bit key that wraps per-file key material at rest. Zeroized on drop.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Decode a standard base64 master key (surrounding whitespace ignored).
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let mut decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidMasterKey(format!("not valid base64: {e}")))?;

        if decoded.len() != KEY_SIZE {
            let actual = decoded.len();
            decoded.zeroize();
            return Err(CryptoError::InvalidMasterKey(format!(
                "expected {KEY_SIZE} bytes, got {actual}"
            )));
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Seal key material under the master key.
///
/// XChaCha20-Poly1305 with a random nonce.
/// Output: `[24-byte nonce][48-byte ciphertext + 16-byte tag]`
pub fn wrap_key_material(
    master: &MasterKey,
    material: &KeyMaterial,
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(master.as_bytes().into());

    let mut nonce_bytes = [0u8; WRAP_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let plaintext = material.to_bytes();
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_slice())
        .map_err(|e| CryptoError::KeyWrap(format!("sealing failed: {e}")))?;

    let mut result = Vec::with_capacity(WRAP_NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Open key material sealed by [`wrap_key_material`].
pub fn unwrap_key_material(
    master: &MasterKey,
    wrapped: &[u8],
) -> Result<KeyMaterial, CryptoError> {
    if wrapped.len() != WRAPPED_KEY_SIZE {
        return Err(CryptoError::KeyWrap(format!(
            "wrapped key material has wrong size: {} bytes (expected {WRAPPED_KEY_SIZE})",
            wrapped.len()
        )));
    }

    let (nonce_bytes, ciphertext) = wrapped.split_at(WRAP_NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(master.as_bytes().into());

    let plaintext = Zeroizing::new(cipher.decrypt(nonce, ciphertext).map_err(|_| {
        CryptoError::KeyWrap("unwrapping failed: wrong master key or corrupted data".into())
    })?);

    KeyMaterial::from_bytes(&plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_random() {
        let a = KeyMaterial::generate();
        let b = KeyMaterial::generate();
        assert_ne!(a.key(), b.key(), "random keys must differ");
        assert_ne!(a.iv(), b.iv(), "random IVs must differ");
    }

    #[test]
    fn test_storage_form_layout() {
        let material = KeyMaterial::from_parts([1u8; KEY_SIZE], [2u8; IV_SIZE]);
        let bytes = material.to_bytes();

        assert_eq!(bytes.len(), KEY_MATERIAL_SIZE);
        assert!(bytes[..KEY_SIZE].iter().all(|&b| b == 1));
        assert!(bytes[KEY_SIZE..].iter().all(|&b| b == 2));

        let parsed = KeyMaterial::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.key(), material.key());
        assert_eq!(parsed.iv(), material.iv());
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        let err = KeyMaterial::from_bytes(&[0u8; 32]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::KeyMaterialLength {
                expected: 48,
                actual: 32
            }
        ));
    }

    #[test]
    fn test_debug_never_prints_key_bytes() {
        let material = KeyMaterial::from_parts([0xAB; KEY_SIZE], [0xCD; IV_SIZE]);
        let dbg = format!("{material:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("171"), "decimal 0xAB must not appear");
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let master = MasterKey::from_bytes([42u8; KEY_SIZE]);
        let material = KeyMaterial::generate();

        let wrapped = wrap_key_material(&master, &material).unwrap();
        assert_eq!(wrapped.len(), WRAPPED_KEY_SIZE);

        let unwrapped = unwrap_key_material(&master, &wrapped).unwrap();
        assert_eq!(unwrapped.key(), material.key());
        assert_eq!(unwrapped.iv(), material.iv());
    }

    #[test]
    fn test_unwrap_wrong_master_fails() {
        let master1 = MasterKey::from_bytes([1u8; KEY_SIZE]);
        let master2 = MasterKey::from_bytes([2u8; KEY_SIZE]);
        let material = KeyMaterial::generate();

        let wrapped = wrap_key_material(&master1, &material).unwrap();
        assert!(unwrap_key_material(&master2, &wrapped).is_err());
    }

    #[test]
    fn test_unwrap_tampered_fails() {
        let master = MasterKey::from_bytes([9u8; KEY_SIZE]);
        let mut wrapped = wrap_key_material(&master, &KeyMaterial::generate()).unwrap();
        wrapped[WRAP_NONCE_SIZE + 3] ^= 0xFF;
        assert!(unwrap_key_material(&master, &wrapped).is_err());
    }

    #[test]
    fn test_unwrap_short_input_fails() {
        let master = MasterKey::from_bytes([9u8; KEY_SIZE]);
        assert!(unwrap_key_material(&master, &[0u8; 10]).is_err());
    }

    #[test]
    fn test_master_key_from_base64() {
        let encoded = STANDARD.encode([5u8; KEY_SIZE]);
        let master = MasterKey::from_base64(&format!("{encoded}\n")).unwrap();
        assert_eq!(master.as_bytes(), &[5u8; KEY_SIZE]);

        assert!(MasterKey::from_base64("not base64!").is_err());
        assert!(MasterKey::from_base64(&STANDARD.encode([1u8; 16])).is_err());
    }
}
