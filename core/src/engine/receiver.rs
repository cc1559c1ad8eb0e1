// Receiver transfer engine
//
// AwaitingSizeAnnouncement → Assembling → Complete
//                          ↘ CorruptAnnouncement
//
// Report requests are answered from every state. Cancel or a peer abort
// discards the reassembler and parks the engine in Idle until the next
// size announcement.

use super::{decode_size, payload_digest, TransferError};
use crate::channel::ChannelId;
use crate::chunk::{AddOutcome, Reassembler};
use crate::config::TransferConfig;
use crate::report::{ControlSignal, TransferReport};
use std::fmt;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    AwaitingSizeAnnouncement,
    Assembling,
    Complete,
    CorruptAnnouncement,
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Inputs to the receiver state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// Bytes written to the size-announcement channel
    SizeAnnounced(Vec<u8>),
    /// Bytes written to the bulk-data channel
    ChunkReceived(Vec<u8>),
    /// Bytes written to the report-request channel
    ReportRequested(Vec<u8>),
    /// The platform failed to read the report-request channel
    ControlReadFailed(String),
    /// Negotiated transport unit changed
    TransportUnitChanged(usize),
    /// Connection torn down
    Cancel,
}

/// Work for the actor to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverAction {
    /// Notification to the peer
    Notify { channel: ChannelId, bytes: Vec<u8> },
    /// Assembled payload, surfaced once per transfer
    Completed(Vec<u8>),
    Failed(TransferError),
}

pub struct ReceiverEngine {
    config: TransferConfig,
    state: ReceiverState,
    reassembler: Option<Reassembler>,
    rejected_chunks: u64,
}

impl ReceiverEngine {
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config,
            state: ReceiverState::AwaitingSizeAnnouncement,
            reassembler: None,
            rejected_chunks: 0,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Chunks dropped by validation during the current transfer
    pub fn rejected_chunks(&self) -> u64 {
        self.rejected_chunks
    }

    /// Missing positions of the transfer being assembled
    pub fn missing_sequence_numbers(&self) -> Vec<u16> {
        self.reassembler
            .as_ref()
            .map(Reassembler::missing_sequence_numbers)
            .unwrap_or_default()
    }

    /// Apply one event and return the resulting actions
    pub fn handle(&mut self, event: ReceiverEvent) -> Vec<ReceiverAction> {
        match (self.state, event) {
            (_, ReceiverEvent::SizeAnnounced(bytes)) => self.announce(&bytes),

            (ReceiverState::Assembling, ReceiverEvent::ChunkReceived(bytes)) => self.accept(&bytes),
            (ReceiverState::Complete, ReceiverEvent::ChunkReceived(_)) => {
                trace!("Chunk after completion ignored");
                Vec::new()
            }
            (state, ReceiverEvent::ChunkReceived(bytes)) => {
                warn!(%state, size = bytes.len(), "Chunk with no transfer announced");
                Vec::new()
            }

            (state, ReceiverEvent::ReportRequested(bytes)) => self.serve_report(state, bytes),

            (_, ReceiverEvent::ControlReadFailed(reason)) => {
                warn!(reason = %reason, "Report-request read failed");
                vec![ReceiverAction::Failed(TransferError::ControlReadFailure(reason))]
            }

            (state, ReceiverEvent::TransportUnitChanged(unit)) => {
                // The reassembler keeps the unit that was in force at announcement
                info!(previous = self.config.transport_unit, unit, %state, "Transport unit changed");
                self.config.transport_unit = unit;
                Vec::new()
            }

            (ReceiverState::Assembling, ReceiverEvent::Cancel) => {
                self.reset();
                vec![ReceiverAction::Failed(TransferError::Cancelled)]
            }
            (state, ReceiverEvent::Cancel) => {
                debug!(%state, "Cancel with no transfer in flight");
                self.reset();
                Vec::new()
            }
        }
    }

    fn transition(&mut self, to: ReceiverState) {
        debug!(from = %self.state, to = %to, "Receiver transition");
        self.state = to;
    }

    fn reset(&mut self) {
        self.reassembler = None;
        self.rejected_chunks = 0;
        self.transition(ReceiverState::Idle);
    }

    fn announce(&mut self, bytes: &[u8]) -> Vec<ReceiverAction> {
        if self.state == ReceiverState::Assembling {
            warn!("New size announcement replaces the transfer in progress");
        }
        self.reassembler = None;
        self.rejected_chunks = 0;

        let created = decode_size(bytes).and_then(|size| {
            Reassembler::new(size, self.config.transport_unit).map_err(TransferError::from)
        });

        match created {
            Ok(reassembler) => {
                info!(
                    total_size = reassembler.total_size(),
                    chunks = reassembler.chunk_count(),
                    "Inbound transfer announced"
                );
                self.reassembler = Some(reassembler);
                self.transition(ReceiverState::Assembling);
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Rejecting size announcement");
                self.transition(ReceiverState::CorruptAnnouncement);
                vec![ReceiverAction::Failed(e)]
            }
        }
    }

    fn accept(&mut self, bytes: &[u8]) -> Vec<ReceiverAction> {
        let Some(reassembler) = self.reassembler.as_mut() else {
            warn!("Assembling without a reassembler");
            return Vec::new();
        };

        match reassembler.add_chunk(bytes) {
            Ok(AddOutcome::Accepted(seq)) => {
                trace!(seq, received = reassembler.received_count(), "Chunk accepted");
            }
            Ok(AddOutcome::Duplicate(seq)) => {
                debug!(seq, "Duplicate chunk");
            }
            Err(e) => {
                // Rejected chunks stay missing and are recovered by the next report
                self.rejected_chunks += 1;
                debug!(error = %TransferError::from(e), rejected = self.rejected_chunks, "Chunk rejected");
            }
        }

        if !reassembler.is_complete() {
            return Vec::new();
        }

        let duplicates = reassembler.duplicate_count();
        let payload = match self.reassembler.take() {
            Some(reassembler) => reassembler.into_data(),
            None => return Vec::new(),
        };
        info!(
            total_size = payload.len(),
            duplicates,
            rejected = self.rejected_chunks,
            sha256 = %payload_digest(&payload),
            "Inbound transfer complete"
        );
        self.transition(ReceiverState::Complete);
        vec![ReceiverAction::Completed(payload)]
    }

    fn serve_report(&mut self, state: ReceiverState, bytes: Vec<u8>) -> Vec<ReceiverAction> {
        match ControlSignal::from_bytes(&bytes) {
            Ok(ControlSignal::RequestReport) => {
                let report = match state {
                    ReceiverState::Complete => TransferReport::success(),
                    ReceiverState::Assembling => {
                        let missing = self.missing_sequence_numbers();
                        TransferReport::missing_chunks(&missing, self.config.report_page_size)
                    }
                    _ => TransferReport::error(),
                };
                debug!(
                    %state,
                    kind = ?report.kind,
                    missing = report.missing.len(),
                    total_pages = report.total_pages,
                    "Answering report request"
                );
                vec![ReceiverAction::Notify {
                    channel: ChannelId::ReportResponse,
                    bytes: report.to_bytes(),
                }]
            }
            Ok(ControlSignal::Error) => {
                warn!(%state, "Sender aborted the transfer");
                let was_active = state == ReceiverState::Assembling;
                self.reset();
                if was_active {
                    vec![ReceiverAction::Failed(TransferError::PeerReportedError)]
                } else {
                    Vec::new()
                }
            }
            Err(_) => {
                warn!(%state, signal = ?bytes, "Unrecognized report-request signal");
                vec![ReceiverAction::Failed(
                    TransferError::UnrecognizedControlSignal(bytes),
                )]
            }
        }
    }
}
