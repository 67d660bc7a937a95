//! Incremental plaintext → ciphertext transform for uploads.
//!
//! Output format: `[16-byte raw IV][ciphertext]`, ciphertext the same length
//! as the plaintext. No padding.

use bytes::{Bytes, BytesMut};

use crate::counter::CounterCipher;
use crate::error::CryptoError;
use crate::keys::KeyMaterial;
use crate::{xor_in_place, BLOCK_SIZE, HEADER_LEN, IV_SIZE};

/// Encrypts a plaintext stream chunk by chunk, starting at counter block 0.
///
/// Chunks may have any length. The keystream block of a partially consumed
/// cipher block is carried over to the next call.
pub struct EncryptingWriter {
    cipher: CounterCipher,
    iv: [u8; IV_SIZE],
    /// Plaintext bytes encrypted so far
    offset: u64,
    header_sent: bool,
    /// Keystream of the block `offset` currently points into, when partially used
    carry: Option<(u64, [u8; BLOCK_SIZE])>,
}

impl EncryptingWriter {
    pub fn new(material: &KeyMaterial) -> Result<Self, CryptoError> {
        Ok(Self {
            cipher: material.cipher()?,
            iv: *material.iv(),
            offset: 0,
            header_sent: false,
            carry: None,
        })
    }

    /// Encrypt one chunk. The first call's output starts with the raw IV.
    pub fn write(&mut self, plaintext: &[u8]) -> Bytes {
        let header = if self.header_sent { 0 } else { IV_SIZE };
        let mut out = BytesMut::with_capacity(header + plaintext.len());

        if !self.header_sent {
            out.extend_from_slice(&self.iv);
            self.header_sent = true;
        }

        out.extend_from_slice(plaintext);
        self.encrypt_in_place(&mut out[header..]);
        out.freeze()
    }

    /// Finish the stream.
    ///
    /// Returns the header if nothing was ever written (so an empty file still
    /// becomes a valid 16-byte object) and the total plaintext length.
    pub fn finish(self) -> (Option<Bytes>, u64) {
        let trailer = (!self.header_sent).then(|| Bytes::copy_from_slice(&self.iv));
        (trailer, self.offset)
    }

    pub fn plaintext_len(&self) -> u64 {
        self.offset
    }

    /// Bytes emitted so far, header included once it has been sent.
    pub fn ciphertext_len(&self) -> u64 {
        if self.header_sent {
            HEADER_LEN + self.offset
        } else {
            0
        }
    }

    fn encrypt_in_place(&mut self, buf: &mut [u8]) {
        let mut rest = buf;

        // Finish the block left partially used by the previous call.
        let skip = (self.offset % BLOCK_SIZE as u64) as usize;
        if skip != 0 && !rest.is_empty() {
            let index = self.offset / BLOCK_SIZE as u64;
            let keystream = match self.carry {
                Some((carried, ks)) if carried == index => ks,
                _ => self.cipher.block(index),
            };

            let n = (BLOCK_SIZE - skip).min(rest.len());
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(n);
            xor_in_place(head, &keystream[skip..skip + n]);
            self.offset += n as u64;
            rest = tail;

            if self.offset % BLOCK_SIZE as u64 != 0 {
                self.carry = Some((index, keystream));
                return;
            }
        }

        let aligned = rest.len() / BLOCK_SIZE * BLOCK_SIZE;
        let (full, tail) = rest.split_at_mut(aligned);
        self.cipher.apply_keystream(self.offset, full);
        self.offset += aligned as u64;

        if tail.is_empty() {
            self.carry = None;
        } else {
            let index = self.offset / BLOCK_SIZE as u64;
            let keystream = self.cipher.block(index);
            let n = tail.len();
            xor_in_place(tail, &keystream[..n]);
            self.offset += n as u64;
            self.carry = Some((index, keystream));
        }
    }
}
