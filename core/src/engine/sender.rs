// Sender transfer engine
//
// Idle → AnnouncingSize → AwaitingSizeAck → Streaming → AwaitingReport → Reconciling
//   Reconciling → Verified                                   (success report)
//   Reconciling → PartiallyTransferred → Streaming (subset)   (missing chunks)
//   Reconciling → Failed                                     (error / unparseable / exhausted)
//   AwaitingReport → AwaitingReport                          (report timeout, re-request)
//
// Any write failure, from any active state, ends in Failed.

use super::{encode_size, payload_digest, TransferError, TransferSummary};
use crate::channel::ChannelId;
use crate::chunk::{Framer, RetryBatch};
use crate::config::TransferConfig;
use crate::report::{ControlSignal, ReportKind, TransferReport};
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    AnnouncingSize,
    AwaitingSizeAck,
    Streaming,
    AwaitingReport,
    Reconciling,
    Verified,
    PartiallyTransferred,
    Failed,
}

impl SenderState {
    /// No transfer in flight; a new payload may start
    pub fn accepts_payload(&self) -> bool {
        matches!(
            self,
            SenderState::Idle | SenderState::Verified | SenderState::Failed
        )
    }
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Inputs to the sender state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderEvent {
    /// New outbound payload (already encrypted)
    Start(Vec<u8>),
    /// The acknowledged size write completed
    SizeWriteAcknowledged { success: bool },
    /// Every frame of the last `Stream` action was written
    StreamComplete,
    /// Report bytes arrived on the report-response channel
    ReportReceived(Vec<u8>),
    /// The outstanding report request went unanswered
    ReportTimedOut,
    /// A channel write failed
    WriteFailed { channel: ChannelId, reason: String },
    /// Negotiated transport unit changed
    TransportUnitChanged(usize),
    /// Connection torn down or caller abandoned the transfer
    Cancel,
}

impl SenderEvent {
    fn name(&self) -> &'static str {
        match self {
            SenderEvent::Start(_) => "Start",
            SenderEvent::SizeWriteAcknowledged { .. } => "SizeWriteAcknowledged",
            SenderEvent::StreamComplete => "StreamComplete",
            SenderEvent::ReportReceived(_) => "ReportReceived",
            SenderEvent::ReportTimedOut => "ReportTimedOut",
            SenderEvent::WriteFailed { .. } => "WriteFailed",
            SenderEvent::TransportUnitChanged(_) => "TransportUnitChanged",
            SenderEvent::Cancel => "Cancel",
        }
    }
}

/// Work for the actor to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderAction {
    /// Single write on a control channel
    Write { channel: ChannelId, bytes: Vec<u8> },
    /// Paced bulk write of frames, in order; completion re-enters as `StreamComplete`
    Stream { frames: Vec<Vec<u8>> },
    /// Transfer ended
    Finished(Result<TransferSummary, TransferError>),
    /// A new payload was refused; the running transfer is unaffected
    Rejected(TransferError),
}

/// Per-transfer state, replaced wholesale on every start or reset
#[derive(Debug)]
struct OutboundTransfer {
    framer: Framer,
    transport_unit: usize,
    digest: String,
    started: Instant,
    rounds: u32,
    round_budget: Option<u32>,
    stalled_rounds: u8,
    report_requests: u8,
    last_report: Option<TransferReport>,
    retransmitted: u64,
}

pub struct SenderEngine {
    config: TransferConfig,
    state: SenderState,
    transfer: Option<OutboundTransfer>,
}

impl SenderEngine {
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config,
            state: SenderState::Idle,
            transfer: None,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Apply one event and return the resulting actions
    pub fn handle(&mut self, event: SenderEvent) -> Vec<SenderAction> {
        let event_name = event.name();
        match (self.state, event) {
            (state, SenderEvent::Start(payload)) if state.accepts_payload() => self.start(payload),
            (state, SenderEvent::Start(_)) => {
                warn!(%state, "Payload refused: transfer already in flight");
                vec![SenderAction::Rejected(TransferError::InvalidState {
                    state: state.to_string(),
                    event: event_name.to_string(),
                })]
            }

            (SenderState::AwaitingSizeAck, SenderEvent::SizeWriteAcknowledged { success: true }) => {
                self.stream_all()
            }
            (SenderState::AwaitingSizeAck, SenderEvent::SizeWriteAcknowledged { success: false }) => {
                self.fail(TransferError::TransportWriteFailure {
                    channel: ChannelId::SizeAnnouncement,
                    reason: "size write not acknowledged".to_string(),
                })
            }

            (SenderState::Streaming, SenderEvent::StreamComplete) => self.request_report(),

            (SenderState::AwaitingReport, SenderEvent::ReportReceived(bytes)) => {
                if let Some(transfer) = self.transfer.as_mut() {
                    transfer.report_requests = 0;
                }
                self.transition(SenderState::Reconciling);
                self.reconcile(&bytes)
            }

            (SenderState::AwaitingReport, SenderEvent::ReportTimedOut) => self.report_timed_out(),

            (state, SenderEvent::WriteFailed { channel, reason }) if self.is_active(state) => {
                self.fail(TransferError::TransportWriteFailure { channel, reason })
            }

            (state, SenderEvent::TransportUnitChanged(unit)) => {
                self.change_transport_unit(state, unit)
            }

            (state, SenderEvent::Cancel) if self.is_active(state) => {
                let mut actions = self.abort_peer();
                actions.extend(self.fail(TransferError::Cancelled));
                actions
            }

            (state, SenderEvent::Cancel) => {
                debug!(%state, "Cancel with no transfer in flight");
                Vec::new()
            }

            (state, _) => {
                warn!(%state, event = event_name, "Ignoring event");
                Vec::new()
            }
        }
    }

    fn is_active(&self, state: SenderState) -> bool {
        !state.accepts_payload()
    }

    fn transition(&mut self, to: SenderState) {
        debug!(from = %self.state, to = %to, "Sender transition");
        self.state = to;
    }

    fn start(&mut self, payload: Vec<u8>) -> Vec<SenderAction> {
        let transport_unit = self.config.transport_unit;
        self.transfer = None;
        self.transition(SenderState::AnnouncingSize);

        let framer = match Framer::new(&payload, transport_unit) {
            Ok(framer) => framer,
            Err(e) => return self.fail(e.into()),
        };
        let size = match encode_size(payload.len()) {
            Ok(size) => size,
            Err(e) => return self.fail(e),
        };

        let digest = payload_digest(&payload);
        info!(
            total_size = payload.len(),
            chunks = framer.chunk_count(),
            transport_unit,
            sha256 = %digest,
            "Starting outbound transfer"
        );

        self.transfer = Some(OutboundTransfer {
            framer,
            transport_unit,
            digest,
            started: Instant::now(),
            rounds: 0,
            round_budget: None,
            stalled_rounds: 0,
            report_requests: 0,
            last_report: None,
            retransmitted: 0,
        });
        self.transition(SenderState::AwaitingSizeAck);

        vec![SenderAction::Write {
            channel: ChannelId::SizeAnnouncement,
            bytes: size.to_vec(),
        }]
    }

    fn stream_all(&mut self) -> Vec<SenderAction> {
        let Some(transfer) = self.transfer.as_ref() else {
            return self.missing_transfer("stream");
        };
        let frames = transfer.framer.all_frames();
        debug!(chunks = frames.len(), "Streaming all chunks");
        self.transition(SenderState::Streaming);
        vec![SenderAction::Stream { frames }]
    }

    fn request_report(&mut self) -> Vec<SenderAction> {
        if let Some(transfer) = self.transfer.as_mut() {
            transfer.report_requests = transfer.report_requests.saturating_add(1);
        }
        self.transition(SenderState::AwaitingReport);
        vec![SenderAction::Write {
            channel: ChannelId::ReportRequest,
            bytes: ControlSignal::RequestReport.to_bytes(),
        }]
    }

    /// An unanswered request counts as a round without progress
    fn report_timed_out(&mut self) -> Vec<SenderAction> {
        let max_stalled = self.config.max_stalled_rounds;
        let Some(transfer) = self.transfer.as_mut() else {
            return self.missing_transfer("report timeout");
        };
        transfer.stalled_rounds = transfer.stalled_rounds.saturating_add(1);

        if transfer.stalled_rounds >= max_stalled {
            let requests = transfer.report_requests;
            error!(requests, "Transfer report never arrived");
            let mut actions = self.abort_peer();
            actions.extend(self.fail(TransferError::ReportTimeout { requests }));
            return actions;
        }

        warn!(
            requests = transfer.report_requests,
            stalled = transfer.stalled_rounds,
            "Transfer report timed out, asking again"
        );
        self.request_report()
    }

    fn reconcile(&mut self, bytes: &[u8]) -> Vec<SenderAction> {
        let report = match TransferReport::from_bytes(bytes) {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Unparseable transfer report");
                let mut actions = self.abort_peer();
                actions.extend(self.fail(TransferError::UnparseableReport(e)));
                return actions;
            }
        };

        match report.kind {
            ReportKind::Success => self.verified(),
            ReportKind::Error => {
                warn!("Receiver reported an error");
                self.fail(TransferError::PeerReportedError)
            }
            ReportKind::MissingChunks if report.missing.is_empty() => {
                let e = crate::report::ReportError::Truncated(bytes.len());
                let mut actions = self.abort_peer();
                actions.extend(self.fail(TransferError::UnparseableReport(e)));
                actions
            }
            ReportKind::MissingChunks => self.retransmit(report),
        }
    }

    fn verified(&mut self) -> Vec<SenderAction> {
        let Some(transfer) = self.transfer.take() else {
            return self.missing_transfer("verify");
        };
        let summary = TransferSummary {
            total_bytes: transfer.framer.total_size(),
            chunk_count: transfer.framer.chunk_count(),
            rounds: transfer.rounds,
            retransmitted_chunks: transfer.retransmitted,
            elapsed: transfer.started.elapsed(),
            sha256: transfer.digest,
        };
        info!(
            total_size = summary.total_bytes,
            rounds = summary.rounds,
            retransmitted = summary.retransmitted_chunks,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Transfer verified"
        );
        self.transition(SenderState::Verified);
        vec![SenderAction::Finished(Ok(summary))]
    }

    fn retransmit(&mut self, report: TransferReport) -> Vec<SenderAction> {
        let max_stalled = self.config.max_stalled_rounds;
        let max_rounds = self.config.max_rounds;

        let Some(transfer) = self.transfer.as_mut() else {
            return self.missing_transfer("retransmit");
        };

        if transfer.last_report.as_ref() == Some(&report) {
            transfer.stalled_rounds = transfer.stalled_rounds.saturating_add(1);
        } else {
            transfer.stalled_rounds = 0;
        }

        // One page clears per round at best
        let budget = *transfer
            .round_budget
            .get_or_insert_with(|| max_rounds.saturating_add(u32::from(report.total_pages)));

        let rounds = transfer.rounds;
        if transfer.stalled_rounds >= max_stalled || rounds >= budget {
            error!(
                rounds,
                budget,
                stalled = transfer.stalled_rounds,
                missing = report.missing.len(),
                "Giving up on transfer"
            );
            let mut actions = self.abort_peer();
            actions.extend(self.fail(TransferError::RetriesExhausted { rounds }));
            return actions;
        }

        transfer.rounds += 1;
        let frames: Vec<Vec<u8>> = RetryBatch::new(&transfer.framer, report.missing.clone()).collect();
        transfer.retransmitted += frames.len() as u64;

        info!(
            round = transfer.rounds,
            missing = report.missing.len(),
            total_pages = report.total_pages,
            "Retransmitting missing chunks"
        );
        transfer.last_report = Some(report);

        self.transition(SenderState::PartiallyTransferred);
        self.transition(SenderState::Streaming);
        vec![SenderAction::Stream { frames }]
    }

    fn change_transport_unit(&mut self, state: SenderState, unit: usize) -> Vec<SenderAction> {
        let previous = self.config.transport_unit;
        self.config.transport_unit = unit;
        info!(previous, unit, %state, "Transport unit changed");

        // In-flight frames keep the unit they were sliced for
        let sliced_for = self
            .transfer
            .as_ref()
            .map(|transfer| transfer.transport_unit)
            .filter(|sliced| self.is_active(state) && unit < *sliced);

        match sliced_for {
            Some(size) => self.fail(TransferError::ChunkTooLarge { size, max: unit }),
            None => Vec::new(),
        }
    }

    /// Tell the receiver the transfer is abandoned
    fn abort_peer(&self) -> Vec<SenderAction> {
        vec![SenderAction::Write {
            channel: ChannelId::ReportRequest,
            bytes: ControlSignal::Error.to_bytes(),
        }]
    }

    fn fail(&mut self, error: TransferError) -> Vec<SenderAction> {
        error!(state = %self.state, error = %error, "Outbound transfer failed");
        self.transfer = None;
        self.transition(SenderState::Failed);
        vec![SenderAction::Finished(Err(error))]
    }

    fn missing_transfer(&mut self, step: &str) -> Vec<SenderAction> {
        let state = self.state.to_string();
        self.fail(TransferError::InvalidState {
            state,
            event: step.to_string(),
        })
    }
}
