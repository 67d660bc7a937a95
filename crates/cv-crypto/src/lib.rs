//! cv-crypto: seekable stream encryption for stored files
//!
//! Every stored object is `iv (16 bytes) || AES-256-CTR(plaintext)`.
//!
//! ```text
//! keystream block i = AES-256(key, (iv + i) mod 2^128)      (counter::CounterCipher)
//!
//! upload:   plaintext ──▶ EncryptingWriter ──▶ iv || ciphertext
//! download: [start, start+len) ──▶ BlockSpan ──▶ one ranged fetch ──▶ RangeDecryptor ──▶ exactly len bytes
//! ```
//!
//! The ciphertext is not authenticated. CTR keeps any byte offset reachable
//! with a single counter computation, which AEAD modes like GCM do not allow.
//! Integrity, if needed, belongs in a separate block-chunked MAC.
//!
//! Per-file key material is wrapped under a master key (XChaCha20-Poly1305)
//! before a metadata store persists it.

pub mod counter;
pub mod error;
pub mod keys;
pub mod range;
pub mod writer;

pub use counter::{keystream_block, CounterCipher};
pub use error::CryptoError;
pub use keys::{unwrap_key_material, wrap_key_material, KeyMaterial, MasterKey};
pub use range::{BlockSpan, RangeDecryptor};
pub use writer::EncryptingWriter;

/// Size of a per-file AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the per-file IV, equal to one cipher block
pub const IV_SIZE: usize = 16;

/// AES block size; keystream is produced one block at a time
pub const BLOCK_SIZE: usize = 16;

/// Serialized key material: `key || iv`
pub const KEY_MATERIAL_SIZE: usize = KEY_SIZE + IV_SIZE;

/// Bytes in front of the ciphertext in every stored object (the raw IV)
pub const HEADER_LEN: u64 = IV_SIZE as u64;

/// Size of an XChaCha20-Poly1305 nonce used for key wrapping
pub const WRAP_NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of wrapped key material: nonce + sealed key material + tag
pub const WRAPPED_KEY_SIZE: usize = WRAP_NONCE_SIZE + KEY_MATERIAL_SIZE + TAG_SIZE;

pub(crate) fn xor_in_place(buf: &mut [u8], keystream: &[u8]) {
    for (b, k) in buf.iter_mut().zip(keystream) {
        *b ^= k;
    }
}
