/// Sender-side splitter
///
/// All chunks are sliced once, up front, and kept immutable for the lifetime
/// of the transfer so retries re-send exactly the bytes of the first pass.

use super::{chunk_count, effective_payload_size, payload_len_for, Chunk, ChunkError};
use tracing::{debug, trace, warn};

/// Splits one payload into an ordered sequence of chunks
#[derive(Debug, Clone)]
pub struct Framer {
    chunks: Vec<Chunk>,
    total_size: usize,
    effective_payload_size: usize,
    cursor: usize,
}

impl Framer {
    /// Pre-slice `payload` for the given transport unit
    pub fn new(payload: &[u8], transport_unit: usize) -> Result<Self, ChunkError> {
        let effective = effective_payload_size(transport_unit)?;
        let count = chunk_count(payload.len(), effective)?;

        let chunks: Vec<Chunk> = (1..=count)
            .map(|seq| {
                let seq = seq as u16;
                let from = (seq as usize - 1) * effective;
                let to = from + payload_len_for(seq, payload.len(), effective);
                Chunk::new(seq, payload[from..to].to_vec())
            })
            .collect();

        debug!(
            total_size = payload.len(),
            effective_payload_size = effective,
            chunks = count,
            "Framer pre-sliced payload"
        );

        Ok(Self {
            chunks,
            total_size: payload.len(),
            effective_payload_size: effective,
            cursor: 0,
        })
    }

    /// Total number of chunks
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Size of the framed payload
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn effective_payload_size(&self) -> usize {
        self.effective_payload_size
    }

    /// Chunk by 1-based sequence number. Repeatable, no side effects.
    pub fn chunk(&self, seq: u16) -> Result<&Chunk, ChunkError> {
        if seq == 0 {
            return Err(self.out_of_range(seq));
        }
        self.chunks
            .get(seq as usize - 1)
            .ok_or_else(|| self.out_of_range(seq))
    }

    /// Wire bytes for one chunk
    pub fn frame(&self, seq: u16) -> Result<Vec<u8>, ChunkError> {
        self.chunk(seq).map(Chunk::to_bytes)
    }

    /// Wire bytes for every chunk, in sequence order
    pub fn all_frames(&self) -> Vec<Vec<u8>> {
        self.chunks.iter().map(Chunk::to_bytes).collect()
    }

    /// True once the cursor has handed out the last chunk
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.chunks.len()
    }

    /// Rewind the cursor to the first chunk
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    fn out_of_range(&self, seq: u16) -> ChunkError {
        ChunkError::SequenceOutOfRange {
            seq,
            total: self.chunks.len(),
        }
    }
}

impl Iterator for Framer {
    type Item = Chunk;

    /// Advance the cursor from chunk 1 to the last chunk
    fn next(&mut self) -> Option<Chunk> {
        let chunk = self.chunks.get(self.cursor)?.clone();
        self.cursor += 1;
        trace!(seq = chunk.sequence_number, total = self.chunks.len(), "Framer next");
        Some(chunk)
    }
}

/// Retransmission subset: only the reported sequence numbers, in report order
pub struct RetryBatch<'a> {
    framer: &'a Framer,
    missing: std::vec::IntoIter<u16>,
}

impl<'a> RetryBatch<'a> {
    pub fn new(framer: &'a Framer, missing: Vec<u16>) -> Self {
        Self {
            framer,
            missing: missing.into_iter(),
        }
    }

    /// Remaining number of chunks in the batch
    pub fn remaining(&self) -> usize {
        self.missing.len()
    }
}

impl Iterator for RetryBatch<'_> {
    type Item = Vec<u8>;

    /// Next retry frame; sequence numbers the framer never produced are skipped
    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            let seq = self.missing.next()?;
            match self.framer.frame(seq) {
                Ok(frame) => return Some(frame),
                Err(e) => warn!(seq, error = %e, "Skipping unknown sequence in retry batch"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::CHUNK_META_SIZE;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_scenario_1000_bytes_unit_100() {
        let framer = Framer::new(&payload(1000), 100).expect("framer");
        assert_eq!(framer.effective_payload_size(), 96);
        assert_eq!(framer.chunk_count(), 11);
        assert_eq!(framer.chunk(11).unwrap().payload.len(), 8);
        assert_eq!(framer.frame(11).unwrap().len(), 8 + CHUNK_META_SIZE);
    }

    #[test]
    fn test_exact_multiple_no_trailing_empty_chunk() {
        let framer = Framer::new(&payload(960), 100).expect("framer");
        assert_eq!(framer.chunk_count(), 10);
        assert_eq!(framer.chunk(10).unwrap().payload.len(), 96);
        assert!(framer.chunk(11).is_err());
    }

    #[test]
    fn test_single_byte_payload() {
        let framer = Framer::new(&[0x42], 100).expect("framer");
        assert_eq!(framer.chunk_count(), 1);
        assert_eq!(framer.chunk(1).unwrap().payload, vec![0x42]);
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert_eq!(Framer::new(&[], 100).unwrap_err(), ChunkError::EmptyPayload);
    }

    #[test]
    fn test_invalid_unit_rejected() {
        assert!(matches!(
            Framer::new(&payload(10), 4),
            Err(ChunkError::InvalidTransportUnit(4))
        ));
    }

    #[test]
    fn test_sequence_numbers_are_one_based() {
        let framer = Framer::new(&payload(300), 100).expect("framer");
        assert!(framer.chunk(0).is_err());
        let seqs: Vec<u16> = framer.clone().map(|c| c.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_chunk_is_repeatable() {
        let framer = Framer::new(&payload(500), 64).expect("framer");
        let first = framer.frame(3).unwrap();
        let second = framer.frame(3).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_cursor_completion() {
        let mut framer = Framer::new(&payload(200), 100).expect("framer");
        assert!(!framer.is_complete());
        assert!(framer.next().is_some());
        assert!(framer.next().is_some());
        assert!(framer.next().is_some());
        assert!(framer.is_complete());
        assert!(framer.next().is_none());

        framer.rewind();
        assert!(!framer.is_complete());
    }

    #[test]
    fn test_concatenated_payloads_rebuild_input() {
        let data = payload(777);
        let framer = Framer::new(&data, 50).expect("framer");
        let rebuilt: Vec<u8> = framer.flat_map(|c| c.payload).collect();
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn test_retry_batch_only_missing() {
        let framer = Framer::new(&payload(1000), 100).expect("framer");
        let batch = RetryBatch::new(&framer, vec![2, 11]);
        assert_eq!(batch.remaining(), 2);

        let frames: Vec<Vec<u8>> = batch.collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], framer.frame(2).unwrap());
        assert_eq!(frames[1], framer.frame(11).unwrap());
    }

    #[test]
    fn test_retry_batch_skips_unknown_sequences() {
        let framer = Framer::new(&payload(200), 100).expect("framer");
        let frames: Vec<Vec<u8>> = RetryBatch::new(&framer, vec![0, 1, 99]).collect();
        assert_eq!(frames, vec![framer.frame(1).unwrap()]);
    }
}
