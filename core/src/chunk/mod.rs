/// Chunk framing for MTU-bounded transfers
///
/// A payload is split into sequenced, checksummed chunks sized to fit one
/// transport write:
///
/// ```text
/// <------------------------- transport unit ------------------------->
/// +------------------+--------------------------+--------------------+
/// | sequence number  |      chunk payload       |     checksum       |
/// | (u16 BE, 1-based)| (up to unit - 4 bytes)   | (u16 BE, CRC-16)   |
/// +------------------+--------------------------+--------------------+
/// ```
///
/// The checksum covers the sequence number and the payload.
///
/// - **framer**: splits an outbound payload, re-produces any chunk for retry
/// - **reassembler**: rebuilds an inbound payload and tracks missing positions

pub mod framer;
pub mod reassembler;

pub use framer::{Framer, RetryBatch};
pub use reassembler::{AddOutcome, ReassemblyError, Reassembler};

use crate::checksum::{self, Crc16, CHECKSUM_SIZE};
use thiserror::Error;

/// Size of the sequence number prefix in bytes
pub const SEQUENCE_SIZE: usize = 2;

/// Per-chunk metadata overhead: sequence number + checksum
pub const CHUNK_META_SIZE: usize = SEQUENCE_SIZE + CHECKSUM_SIZE;

/// Largest transport unit the two-byte framing can describe
pub const MAX_TRANSPORT_UNIT: usize = u16::MAX as usize;

/// Highest addressable sequence number
pub const MAX_CHUNK_COUNT: usize = u16::MAX as usize;

/// Errors for chunk framing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Transport unit {0} leaves no room for chunk payload")]
    InvalidTransportUnit(usize),
    #[error("Payload is empty")]
    EmptyPayload,
    #[error("Payload needs {chunks} chunks, at most {max} are addressable")]
    TooManyChunks { chunks: usize, max: usize },
    #[error("Sequence number {seq} outside 1..={total}")]
    SequenceOutOfRange { seq: u16, total: usize },
    #[error("Chunk of {0} bytes is shorter than its metadata")]
    TooShort(usize),
    #[error("Checksum mismatch on chunk {seq}")]
    ChecksumMismatch { seq: u16 },
}

/// Payload bytes available per chunk for a given transport unit.
///
/// Recompute whenever the negotiated unit changes.
pub fn effective_payload_size(transport_unit: usize) -> Result<usize, ChunkError> {
    if transport_unit <= CHUNK_META_SIZE || transport_unit > MAX_TRANSPORT_UNIT {
        return Err(ChunkError::InvalidTransportUnit(transport_unit));
    }
    Ok(transport_unit - CHUNK_META_SIZE)
}

/// Number of chunks needed for `total_size` bytes: `ceil(total / effective)`.
///
/// A zero-length payload is never framed.
pub fn chunk_count(total_size: usize, effective_payload_size: usize) -> Result<usize, ChunkError> {
    if total_size == 0 {
        return Err(ChunkError::EmptyPayload);
    }
    if effective_payload_size == 0 {
        return Err(ChunkError::InvalidTransportUnit(CHUNK_META_SIZE));
    }
    let chunks = total_size.div_ceil(effective_payload_size);
    if chunks > MAX_CHUNK_COUNT {
        return Err(ChunkError::TooManyChunks {
            chunks,
            max: MAX_CHUNK_COUNT,
        });
    }
    Ok(chunks)
}

/// Payload length carried by chunk `seq` (1-based).
///
/// Every chunk is full except possibly the last, which carries
/// `total - (count - 1) * effective` bytes; an evenly dividing total yields a
/// full last chunk, never a trailing empty one.
pub fn payload_len_for(seq: u16, total_size: usize, effective_payload_size: usize) -> usize {
    let offset = (seq as usize - 1) * effective_payload_size;
    (total_size - offset).min(effective_payload_size)
}

/// One framed fragment of a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 1-based position within the transfer
    pub sequence_number: u16,
    /// Slice of the payload carried by this chunk
    pub payload: Vec<u8>,
    /// CRC-16 over `sequence_number || payload`
    pub checksum: u16,
}

impl Chunk {
    /// Build a chunk, computing its checksum
    pub fn new(sequence_number: u16, payload: Vec<u8>) -> Self {
        let checksum = checksum_for(sequence_number, &payload);
        Self {
            sequence_number,
            payload,
            checksum,
        }
    }

    /// Encoded length on the wire
    pub fn wire_len(&self) -> usize {
        CHUNK_META_SIZE + self.payload.len()
    }

    /// Serialize to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.extend_from_slice(&self.sequence_number.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_be_bytes());
        buf
    }

    /// Deserialize and verify a chunk
    pub fn from_bytes(raw: &[u8]) -> Result<Self, ChunkError> {
        let view = ChunkView::parse(raw)?;
        if !view.is_intact() {
            return Err(ChunkError::ChecksumMismatch {
                seq: view.sequence_number,
            });
        }
        Ok(Self {
            sequence_number: view.sequence_number,
            payload: view.payload.to_vec(),
            checksum: view.checksum,
        })
    }
}

/// Borrowed view over a raw chunk, before integrity is checked
#[derive(Debug, Clone, Copy)]
pub struct ChunkView<'a> {
    pub sequence_number: u16,
    pub payload: &'a [u8],
    pub checksum: u16,
    covered: &'a [u8],
}

impl<'a> ChunkView<'a> {
    /// Split raw bytes into sequence number, payload and checksum
    pub fn parse(raw: &'a [u8]) -> Result<Self, ChunkError> {
        if raw.len() < CHUNK_META_SIZE {
            return Err(ChunkError::TooShort(raw.len()));
        }
        let checksum_at = raw.len() - CHECKSUM_SIZE;
        let sequence_number = u16::from_be_bytes([raw[0], raw[1]]);
        let checksum = u16::from_be_bytes([raw[checksum_at], raw[checksum_at + 1]]);
        Ok(Self {
            sequence_number,
            payload: &raw[SEQUENCE_SIZE..checksum_at],
            checksum,
            covered: &raw[..checksum_at],
        })
    }

    /// Whether the carried checksum matches the sequence number and payload
    pub fn is_intact(&self) -> bool {
        checksum::verify(self.covered, self.checksum)
    }
}

fn checksum_for(sequence_number: u16, payload: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(&sequence_number.to_be_bytes());
    crc.update(payload);
    crc.finalize()
}
