// Cryptography module: payload envelope for transfers

pub mod envelope;

pub use envelope::{CryptoBox, SessionCipher, NONCE_SIZE, TAG_SIZE};

use thiserror::Error;

/// Errors from the payload envelope.
///
/// Kept apart from framing errors: a payload that reassembled cleanly but
/// fails to open is a key or tampering problem, not a transport one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Ciphertext of {0} bytes is too short")]
    Truncated(usize),
}

/// Encrypt-before-send and decrypt-after-receive, applied around a transfer
pub trait PayloadCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}
