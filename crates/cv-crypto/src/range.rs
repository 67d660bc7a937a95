//! Plaintext range → cipher block translation, and the sans-IO decryptor
//! that turns one ranged ciphertext fetch back into exactly the requested
//! plaintext bytes.

use std::ops::Range;

use bytes::{Bytes, BytesMut};

use crate::counter::CounterCipher;
use crate::error::CryptoError;
use crate::{BLOCK_SIZE, HEADER_LEN};

const BLOCK: u64 = BLOCK_SIZE as u64;

/// The cipher blocks covering `len` plaintext bytes starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    pub start: u64,
    pub len: u64,
    pub first_block: u64,
    pub last_block: u64,
    /// Leading bytes of `first_block` that precede `start`
    pub skip: u64,
}

impl BlockSpan {
    /// `None` for an empty range, which needs no fetch at all.
    pub fn new(start: u64, len: u64) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let last_byte = start.checked_add(len - 1)?;
        Some(Self {
            start,
            len,
            first_block: start / BLOCK,
            last_block: last_byte / BLOCK,
            skip: start % BLOCK,
        })
    }

    pub fn block_count(&self) -> u64 {
        self.last_block - self.first_block + 1
    }

    /// Byte range of the stored object to fetch, header included.
    ///
    /// The end is clamped to the object length because the last cipher block
    /// of a file may be partial. `None` when the object length itself does
    /// not fit in a `u64`.
    pub fn ciphertext_range(&self, file_size: u64) -> Option<Range<u64>> {
        let start = self.first_block.checked_mul(BLOCK)?.checked_add(HEADER_LEN)?;
        let object_end = file_size.checked_add(HEADER_LEN)?;
        let block_end = (self.last_block + 1)
            .checked_mul(BLOCK)
            .and_then(|end| end.checked_add(HEADER_LEN));
        let end = block_end.map_or(object_end, |end| end.min(object_end));
        Some(start..end)
    }
}

/// Decrypts the ciphertext of a [`BlockSpan`] as it arrives.
///
/// Feed it the bytes of `span.ciphertext_range(..)` in order, in chunks of
/// any size. Output is trimmed so the concatenation of all returned chunks is
/// exactly `span.len` bytes.
#[derive(Debug)]
pub struct RangeDecryptor {
    cipher: CounterCipher,
    /// Plaintext offset of the next incoming ciphertext byte
    offset: u64,
    to_skip: u64,
    remaining: u64,
}

impl RangeDecryptor {
    pub fn new(cipher: CounterCipher, span: &BlockSpan) -> Self {
        Self {
            cipher,
            offset: span.first_block * BLOCK,
            to_skip: span.skip,
            remaining: span.len,
        }
    }

    pub fn push(&mut self, ciphertext: &[u8]) -> Bytes {
        if self.remaining == 0 {
            return Bytes::new();
        }

        let dropped = self.to_skip.min(ciphertext.len() as u64) as usize;
        self.to_skip -= dropped as u64;
        self.offset += dropped as u64;

        let rest = &ciphertext[dropped..];
        let take = self.remaining.min(rest.len() as u64) as usize;

        let mut out = BytesMut::from(&rest[..take]);
        self.cipher.apply_keystream(self.offset, &mut out);

        self.offset += take as u64;
        self.remaining -= take as u64;
        out.freeze()
    }

    /// Plaintext bytes still owed to the caller.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    /// Fails if the ciphertext ended before the whole range was produced.
    pub fn finish(&self) -> Result<(), CryptoError> {
        if self.remaining > 0 {
            return Err(CryptoError::TruncatedCiphertext {
                missing: self.remaining,
            });
        }
        Ok(())
    }
}
