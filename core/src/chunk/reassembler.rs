/// Receiver-side reconstructor
///
/// Owns a pre-allocated output buffer and one reception marker per sequence
/// position. Chunks may land in any order; a rejected chunk leaves all state
/// untouched and simply stays "missing" until the sender retries it.

use super::{
    chunk_count, effective_payload_size, payload_len_for, ChunkError, ChunkView, CHUNK_META_SIZE,
};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors for reassembly
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("Corrupt transfer announcement: declared size {0}")]
    CorruptAnnouncement(usize),
    #[error("Invalid transport unit: {0}")]
    InvalidTransportUnit(#[from] ChunkError),
    #[error("Chunk of {0} bytes is shorter than its metadata")]
    ChunkTooShort(usize),
    #[error("Chunk of {size} bytes exceeds transport unit {max}")]
    ChunkTooLarge { size: usize, max: usize },
    #[error("Checksum mismatch on chunk {seq}")]
    ChecksumMismatch { seq: u16 },
    #[error("Sequence number {seq} outside 1..={total}")]
    SequenceOutOfRange { seq: u16, total: usize },
    #[error("Chunk {seq} carries {got} payload bytes, expected {expected}")]
    LengthMismatch { seq: u16, expected: usize, got: usize },
}

/// Result of offering a chunk to the reassembler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Chunk stored at a previously empty position
    Accepted(u16),
    /// Valid chunk for a position already filled; nothing changed
    Duplicate(u16),
}

impl AddOutcome {
    pub fn sequence_number(&self) -> u16 {
        match self {
            AddOutcome::Accepted(seq) | AddOutcome::Duplicate(seq) => *seq,
        }
    }
}

/// Rebuilds one inbound payload from its chunks
#[derive(Debug, Clone)]
pub struct Reassembler {
    data: Vec<u8>,
    received: Vec<bool>,
    received_count: usize,
    duplicates: u64,
    transport_unit: usize,
    effective_payload_size: usize,
}

impl Reassembler {
    /// Prepare for an announced transfer of `total_size` bytes.
    ///
    /// A zero size is a corrupt announcement, not an empty transfer.
    pub fn new(total_size: usize, transport_unit: usize) -> Result<Self, ReassemblyError> {
        if total_size == 0 {
            return Err(ReassemblyError::CorruptAnnouncement(total_size));
        }
        let effective = effective_payload_size(transport_unit)?;
        let count = chunk_count(total_size, effective).map_err(|e| match e {
            ChunkError::TooManyChunks { .. } => ReassemblyError::CorruptAnnouncement(total_size),
            other => ReassemblyError::InvalidTransportUnit(other),
        })?;

        debug!(total_size, chunks = count, transport_unit, "Reassembler ready");

        Ok(Self {
            data: vec![0u8; total_size],
            received: vec![false; count],
            received_count: 0,
            duplicates: 0,
            transport_unit,
            effective_payload_size: effective,
        })
    }

    /// Validate and store one raw chunk
    pub fn add_chunk(&mut self, raw: &[u8]) -> Result<AddOutcome, ReassemblyError> {
        if raw.len() < CHUNK_META_SIZE {
            warn!(size = raw.len(), "Dropping chunk shorter than metadata");
            return Err(ReassemblyError::ChunkTooShort(raw.len()));
        }
        if raw.len() > self.transport_unit {
            warn!(size = raw.len(), max = self.transport_unit, "Dropping oversized chunk");
            return Err(ReassemblyError::ChunkTooLarge {
                size: raw.len(),
                max: self.transport_unit,
            });
        }

        let view = ChunkView::parse(raw).map_err(|_| ReassemblyError::ChunkTooShort(raw.len()))?;
        let seq = view.sequence_number;

        if !view.is_intact() {
            warn!(seq, "Dropping chunk with checksum mismatch");
            return Err(ReassemblyError::ChecksumMismatch { seq });
        }

        let total = self.received.len();
        if seq == 0 || seq as usize > total {
            warn!(seq, total, "Dropping chunk with out-of-range sequence");
            return Err(ReassemblyError::SequenceOutOfRange { seq, total });
        }

        let expected = payload_len_for(seq, self.data.len(), self.effective_payload_size);
        if view.payload.len() != expected {
            warn!(seq, expected, got = view.payload.len(), "Dropping chunk with wrong length");
            return Err(ReassemblyError::LengthMismatch {
                seq,
                expected,
                got: view.payload.len(),
            });
        }

        let index = seq as usize - 1;
        if self.received[index] {
            self.duplicates += 1;
            trace!(seq, "Duplicate chunk ignored");
            return Ok(AddOutcome::Duplicate(seq));
        }

        let offset = index * self.effective_payload_size;
        self.data[offset..offset + expected].copy_from_slice(view.payload);
        self.received[index] = true;
        self.received_count += 1;

        trace!(seq, received = self.received_count, total, "Chunk stored");
        Ok(AddOutcome::Accepted(seq))
    }

    /// True once every position has been received
    pub fn is_complete(&self) -> bool {
        self.received_count == self.received.len()
    }

    /// Missing 1-based sequence numbers, ascending
    pub fn missing_sequence_numbers(&self) -> Vec<u16> {
        self.received
            .iter()
            .enumerate()
            .filter(|(_, received)| !**received)
            .map(|(i, _)| (i + 1) as u16)
            .collect()
    }

    /// Assembled buffer; only meaningful once complete
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Hand over the assembled buffer
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn total_size(&self) -> usize {
        self.data.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.received.len()
    }

    pub fn received_count(&self) -> usize {
        self.received_count
    }

    /// Valid chunks delivered more than once
    pub fn duplicate_count(&self) -> u64 {
        self.duplicates
    }
}
