//! Transfer engines
//!
//! Each transfer direction is a pure state machine (`handle(event) -> actions`)
//! plus a tokio actor that feeds it one event at a time and performs the
//! actions it returns against a [`TransferLink`](crate::channel::TransferLink).
//!
//! Size announcement wire format:
//!
//! ```text
//! [4 bytes]  total payload size (u32 BE)
//! ```

pub mod actor;
pub mod receiver;
pub mod sender;

pub use actor::{
    pipe_to_receiver, pipe_to_sender, spawn_receiver, spawn_sender, ReceiverHandle,
    ReceiverNotice, SenderHandle, SenderNotice,
};
pub use receiver::{ReceiverAction, ReceiverEngine, ReceiverEvent, ReceiverState};
pub use sender::{SenderAction, SenderEngine, SenderEvent, SenderState};

use crate::channel::ChannelId;
use crate::chunk::{ChunkError, ReassemblyError};
use crate::report::ReportError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

/// Size announcement length on the wire
pub const SIZE_ANNOUNCEMENT_LEN: usize = 4;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Transfer-level failures surfaced to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Corrupt transfer announcement: {0}")]
    CorruptAnnouncement(String),

    #[error("Payload of {0} bytes cannot be announced")]
    PayloadTooLarge(usize),

    #[error("Chunk of {size} bytes exceeds transport unit {max}")]
    ChunkTooLarge { size: usize, max: usize },

    #[error("Checksum mismatch on chunk {seq}")]
    ChecksumMismatch { seq: u16 },

    #[error("Malformed chunk: {0}")]
    MalformedChunk(String),

    #[error("Transport write on {channel} failed: {reason}")]
    TransportWriteFailure { channel: ChannelId, reason: String },

    #[error("Unparseable transfer report: {0}")]
    UnparseableReport(ReportError),

    #[error("Unrecognized control signal: {0:?}")]
    UnrecognizedControlSignal(Vec<u8>),

    #[error("Peer reported an error")]
    PeerReportedError,

    #[error("Control channel read failed: {0}")]
    ControlReadFailure(String),

    #[error("Retries exhausted after {rounds} reconciliation rounds")]
    RetriesExhausted { rounds: u32 },

    #[error("No transfer report after {requests} requests")]
    ReportTimeout { requests: u8 },

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("{event} not allowed in state {state}")]
    InvalidState { state: String, event: String },

    #[error("Framing failed: {0}")]
    Framing(#[from] ChunkError),
}

impl From<ReassemblyError> for TransferError {
    fn from(e: ReassemblyError) -> Self {
        match e {
            ReassemblyError::CorruptAnnouncement(size) => {
                TransferError::CorruptAnnouncement(format!("declared size {}", size))
            }
            ReassemblyError::InvalidTransportUnit(inner) => TransferError::Framing(inner),
            ReassemblyError::ChunkTooLarge { size, max } => {
                TransferError::ChunkTooLarge { size, max }
            }
            ReassemblyError::ChecksumMismatch { seq } => TransferError::ChecksumMismatch { seq },
            other => TransferError::MalformedChunk(other.to_string()),
        }
    }
}

// ============================================================================
// SIZE ANNOUNCEMENT
// ============================================================================

/// Encode the total payload size for the size-announcement channel
pub fn encode_size(total_size: usize) -> Result<[u8; SIZE_ANNOUNCEMENT_LEN], TransferError> {
    let size = u32::try_from(total_size).map_err(|_| TransferError::PayloadTooLarge(total_size))?;
    Ok(size.to_be_bytes())
}

/// Decode a size announcement; anything but exactly four bytes is corrupt
pub fn decode_size(data: &[u8]) -> Result<usize, TransferError> {
    let bytes: [u8; SIZE_ANNOUNCEMENT_LEN] = data.try_into().map_err(|_| {
        TransferError::CorruptAnnouncement(format!("{} byte size announcement", data.len()))
    })?;
    Ok(u32::from_be_bytes(bytes) as usize)
}

// ============================================================================
// SUMMARY
// ============================================================================

/// SHA-256 fingerprint of a payload, hex encoded
pub fn payload_digest(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Statistics for a verified send
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    pub total_bytes: usize,
    pub chunk_count: usize,
    /// Reconciliation rounds that required a retransmission
    pub rounds: u32,
    pub retransmitted_chunks: u64,
    pub elapsed: Duration,
    pub sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_announcement_encoding() {
        assert_eq!(encode_size(1000).unwrap(), [0x00, 0x00, 0x03, 0xE8]);
        assert_eq!(decode_size(&[0x00, 0x00, 0x03, 0xE8]).unwrap(), 1000);
    }

    #[test]
    fn test_size_announcement_wrong_length_is_corrupt() {
        assert!(matches!(
            decode_size(&[0x03, 0xE8]),
            Err(TransferError::CorruptAnnouncement(_))
        ));
        assert!(matches!(
            decode_size(b"1000"),
            Ok(0x3130_3030)
        ));
        assert!(decode_size(&[]).is_err());
        assert!(decode_size(&[0; 8]).is_err());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_oversized_payload_rejected() {
        let size = u32::MAX as usize + 1;
        assert_eq!(encode_size(size), Err(TransferError::PayloadTooLarge(size)));
    }

    #[test]
    fn test_reassembly_error_mapping() {
        assert!(matches!(
            TransferError::from(ReassemblyError::CorruptAnnouncement(0)),
            TransferError::CorruptAnnouncement(_)
        ));
        let mismatch = TransferError::from(ReassemblyError::ChecksumMismatch { seq: 4 });
        assert_eq!(mismatch, TransferError::ChecksumMismatch { seq: 4 });
    }

    #[test]
    fn test_payload_digest() {
        assert_eq!(
            payload_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
