//! AES-256-CTR keystream as a pure function of the block index.
//!
//! All counter arithmetic lives here. Encryption, seeking and range
//! decryption only ever ask for "the keystream of block `i`", so there is no
//! hidden stream position to get out of sync.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes256, Block};

use crate::error::CryptoError;
use crate::{xor_in_place, BLOCK_SIZE, IV_SIZE, KEY_SIZE};

/// Keystream for one 16-byte block: `AES-256(key, (iv + index) mod 2^128)`.
///
/// The IV is read as a big-endian 128-bit integer.
pub fn keystream_block(
    key: &[u8],
    iv: &[u8; IV_SIZE],
    index: u64,
) -> Result<[u8; BLOCK_SIZE], CryptoError> {
    Ok(CounterCipher::new(key, iv)?.block(index))
}

/// Expanded AES key schedule plus the file's initial counter.
///
/// Immutable after construction, so one instance may serve any number of
/// concurrent readers.
#[derive(Clone)]
pub struct CounterCipher {
    aes: Aes256,
    iv: u128,
}

impl CounterCipher {
    pub fn new(key: &[u8], iv: &[u8; IV_SIZE]) -> Result<Self, CryptoError> {
        let aes = Aes256::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        })?;
        Ok(Self {
            aes,
            iv: u128::from_be_bytes(*iv),
        })
    }

    /// Counter value for a block (wraps at 2^128).
    pub fn counter(&self, index: u64) -> u128 {
        self.iv.wrapping_add(u128::from(index))
    }

    pub fn block(&self, index: u64) -> [u8; BLOCK_SIZE] {
        let mut block = Block::from(self.counter(index).to_be_bytes());
        self.aes.encrypt_block(&mut block);

        let mut out = [0u8; BLOCK_SIZE];
        out.copy_from_slice(block.as_slice());
        out
    }

    /// XOR `buf` with the keystream starting at stream byte `offset`.
    ///
    /// `offset` need not be block-aligned. Applying it twice restores the input.
    pub fn apply_keystream(&self, offset: u64, buf: &mut [u8]) {
        let mut pos = offset;
        let mut rest = buf;

        while !rest.is_empty() {
            let index = pos / BLOCK_SIZE as u64;
            let skip = (pos % BLOCK_SIZE as u64) as usize;
            let keystream = self.block(index);

            let n = (BLOCK_SIZE - skip).min(rest.len());
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(n);
            xor_in_place(head, &keystream[skip..skip + n]);

            pos += n as u64;
            rest = tail;
        }
    }
}

impl std::fmt::Debug for CounterCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}
