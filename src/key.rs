//! Run keys: a 16-byte XOR key plus an engine iteration count.

use std::fmt;
use std::str::FromStr;

use getrandom::fill as getrandom;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::DenisError;

/// Length of the XOR key in bytes.
pub const XOR_KEY_LEN: usize = 16;

/// Length of the canonical text form: 32 hex chars, `:`, 4 hex chars.
pub const KEY_TEXT_LEN: usize = XOR_KEY_LEN * 2 + 1 + 4;

const SEPARATOR_AT: usize = XOR_KEY_LEN * 2;

/// Key for one encode/decode run.
///
/// The text form is `<32 lowercase hex>:<4 lowercase hex>`, e.g.
/// `000102030405060708090a0b0c0d0e0f:0010`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Key {
    xor_key: [u8; XOR_KEY_LEN],
    iterations: u16,
}

impl Key {
    pub fn new(xor_key: [u8; XOR_KEY_LEN], iterations: u16) -> Self {
        Self {
            xor_key,
            iterations,
        }
    }

    /// Generate a key from the OS RNG, including a random iteration count.
    pub fn generate() -> Result<Self, DenisError> {
        let mut iter = [0u8; 2];
        getrandom(&mut iter).map_err(|_| DenisError::Invalid("OS random source unavailable"))?;
        Self::generate_with_iterations(u16::from_le_bytes(iter))
    }

    /// Generate a random XOR key with a caller-chosen iteration count.
    pub fn generate_with_iterations(iterations: u16) -> Result<Self, DenisError> {
        let mut xor_key = [0u8; XOR_KEY_LEN];
        getrandom(&mut xor_key).map_err(|_| DenisError::Invalid("OS random source unavailable"))?;
        Ok(Self::new(xor_key, iterations))
    }

    pub fn xor_key(&self) -> &[u8; XOR_KEY_LEN] {
        &self.xor_key
    }

    pub fn iterations(&self) -> u16 {
        self.iterations
    }
}

impl FromStr for Key {
    type Err = DenisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != KEY_TEXT_LEN {
            return Err(DenisError::InvalidKey("expected 37 characters"));
        }
        let bytes = s.as_bytes();
        if bytes[SEPARATOR_AT] != b':' {
            return Err(DenisError::InvalidKey("missing ':' separator at offset 32"));
        }
        let (xor_hex, iter_hex) = (&s[..SEPARATOR_AT], &s[SEPARATOR_AT + 1..]);

        let mut xor_key = [0u8; XOR_KEY_LEN];
        hex::decode_to_slice(xor_hex, &mut xor_key)
            .map_err(|_| DenisError::InvalidKey("xor key is not 32 hex digits"))?;

        // from_str_radix tolerates a leading '+', so check the digits first.
        if !iter_hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DenisError::InvalidKey("iterations are not 4 hex digits"));
        }
        let iterations = u16::from_str_radix(iter_hex, 16)
            .map_err(|_| DenisError::InvalidKey("iterations are not 4 hex digits"))?;

        Ok(Self::new(xor_key, iterations))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:04x}", hex::encode(self.xor_key), self.iterations)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("xor_key", &"<redacted>")
            .field("iterations", &self.iterations)
            .finish()
    }
}
