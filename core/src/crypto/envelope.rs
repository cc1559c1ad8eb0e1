// Session envelope: X25519 ECDH + XChaCha20-Poly1305
//
// Flow:
// 1. Each device holds an X25519 keypair (CryptoBox) and learns the peer's
//    public key out of band (QR code, advertisement payload)
// 2. ECDH: local_secret × peer_public → shared_secret
// 3. KDF: Blake3::derive_key(context, shared_secret) → session key
// 4. Seal: XChaCha20-Poly1305(session_key, random_nonce, payload)
// 5. Output: nonce ‖ ciphertext ‖ tag
//
// Both ends derive the same session key, so either may seal or open.

use super::{CryptoError, PayloadCipher};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// KDF context string for session keys.
/// Changing this breaks compatibility with every deployed peer.
const KDF_CONTEXT: &str = "gattlink v1 transfer session 2026-10-01";

/// XChaCha20 nonce length, prepended to every sealed payload
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag length
pub const TAG_SIZE: usize = 16;

/// Long-lived X25519 keypair for one device
pub struct CryptoBox {
    secret: StaticSecret,
    public: PublicKey,
}

impl CryptoBox {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Restore a keypair from stored secret bytes
    pub fn from_secret_bytes(mut bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        bytes.zeroize();
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Agree on a session key with a peer
    pub fn session_with(&self, peer_public: &[u8]) -> Result<SessionCipher, CryptoError> {
        let peer: [u8; 32] = peer_public.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("peer public key is {} bytes", peer_public.len()))
        })?;

        let shared = self.secret.diffie_hellman(&PublicKey::from(peer));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidKey(
                "peer public key is a low-order point".to_string(),
            ));
        }

        let key = blake3::derive_key(KDF_CONTEXT, shared.as_bytes());
        Ok(SessionCipher { key })
    }
}

/// Symmetric cipher for one connection; key is wiped on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionCipher {
    key: [u8; 32],
}

impl SessionCipher {
    /// Use a pre-shared session key directly
    pub fn from_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    fn cipher(&self) -> Result<XChaCha20Poly1305, CryptoError> {
        XChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }
}

impl PayloadCipher for SessionCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()?
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Truncated(sealed.len()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);

        self.cipher()?
            .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
