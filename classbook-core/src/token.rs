use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::TokenError;

pub const MIN_TOKEN_BYTES: usize = 24;
pub const DEFAULT_TOKEN_BYTES: usize = 32;

/// Source of single-use confirmation tokens.
pub trait TokenGenerator: Send + Sync {
    /// Returns `byte_len` random bytes encoded as unpadded base64url.
    fn generate(&self, byte_len: usize) -> Result<String, TokenError>;
}

/// Length of the encoded token for a given number of random bytes.
pub const fn encoded_len(byte_len: usize) -> usize {
    (byte_len * 4 + 2) / 3
}

/// Draws from the operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsTokenGenerator;

impl TokenGenerator for OsTokenGenerator {
    fn generate(&self, byte_len: usize) -> Result<String, TokenError> {
        if byte_len < MIN_TOKEN_BYTES {
            return Err(TokenError::TooShort {
                requested: byte_len,
                minimum: MIN_TOKEN_BYTES,
            });
        }

        let mut random_bytes = vec![0u8; byte_len];
        OsRng
            .try_fill_bytes(&mut random_bytes)
            .map_err(|e| TokenError::Entropy(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(random_bytes))
    }
}
