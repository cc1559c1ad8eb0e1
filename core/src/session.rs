// Transfer session: encrypt → send, receive → decrypt
//
// The engines move opaque bytes. A session seals the application payload
// before it reaches the sender actor and opens the assembled buffer the
// receiver actor hands back.

use crate::channel::TransferLink;
use crate::config::{ConfigError, TransferConfig};
use crate::crypto::{CryptoError, PayloadCipher};
use crate::engine::{
    payload_digest, spawn_receiver, spawn_sender, ReceiverHandle, ReceiverNotice, SenderHandle,
    SenderNotice, TransferError, TransferSummary,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),
    #[error("Encryption failed: {0}")]
    Encryption(CryptoError),
    #[error("Decryption failed: {0}")]
    Decryption(CryptoError),
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),
}

/// One device's side of a secured transfer session
pub struct TransferSession<C: PayloadCipher> {
    config: TransferConfig,
    cipher: C,
}

impl<C: PayloadCipher> TransferSession<C> {
    pub fn new(config: TransferConfig, cipher: C) -> Result<Self, SessionError> {
        crate::init_tracing();
        config.validate()?;
        Ok(Self { config, cipher })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn start_sender(
        &self,
        link: Arc<dyn TransferLink>,
    ) -> Result<(SenderHandle, mpsc::Receiver<SenderNotice>), SessionError> {
        Ok(spawn_sender(self.config.clone(), link)?)
    }

    pub fn start_receiver(
        &self,
        link: Arc<dyn TransferLink>,
    ) -> Result<(ReceiverHandle, mpsc::Receiver<ReceiverNotice>), SessionError> {
        Ok(spawn_receiver(self.config.clone(), link)?)
    }

    /// Seal `plaintext` and hand it to the sender actor
    pub async fn send(&self, sender: &SenderHandle, plaintext: &[u8]) -> Result<(), SessionError> {
        let sealed = self
            .cipher
            .encrypt(plaintext)
            .map_err(SessionError::Encryption)?;
        tracing::info!(
            plaintext_len = plaintext.len(),
            sealed_len = sealed.len(),
            sha256 = %payload_digest(plaintext),
            "Sending sealed payload"
        );
        sender
            .send(sealed)
            .await
            .map_err(|e| SessionError::EngineUnavailable(e.to_string()))
    }

    /// Wait for the sender's verdict on the payload in flight
    pub async fn await_sent(
        &self,
        notices: &mut mpsc::Receiver<SenderNotice>,
    ) -> Result<TransferSummary, SessionError> {
        match notices.recv().await {
            Some(SenderNotice::Finished(Ok(summary))) => Ok(summary),
            Some(SenderNotice::Finished(Err(e))) | Some(SenderNotice::Rejected(e)) => {
                Err(SessionError::Transfer(e))
            }
            None => Err(SessionError::EngineUnavailable(
                "sender notices closed".to_string(),
            )),
        }
    }

    /// Wait for the next inbound payload and open it
    pub async fn receive(
        &self,
        notices: &mut mpsc::Receiver<ReceiverNotice>,
    ) -> Result<Vec<u8>, SessionError> {
        match notices.recv().await {
            Some(ReceiverNotice::Completed(sealed)) => self.open(&sealed),
            Some(ReceiverNotice::Failed(e)) => Err(SessionError::Transfer(e)),
            None => Err(SessionError::EngineUnavailable(
                "receiver notices closed".to_string(),
            )),
        }
    }

    /// Open an assembled payload
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, SessionError> {
        let plaintext = self.cipher.decrypt(sealed).map_err(|e| {
            tracing::warn!(error = %e, sealed_len = sealed.len(), "Assembled payload did not open");
            SessionError::Decryption(e)
        })?;
        tracing::info!(
            plaintext_len = plaintext.len(),
            sha256 = %payload_digest(&plaintext),
            "Received payload"
        );
        Ok(plaintext)
    }
}
