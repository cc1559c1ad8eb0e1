// Engine actors: one tokio task per transfer direction.
//
// Events arrive over a bounded queue and are applied strictly in order. The
// actions an event produces are executed before the next event is read, so
// a paced stream holds the queue for its whole duration.
//
// While the sender waits for a transfer report, a deadline races the queue;
// expiry enters the engine as `ReportTimedOut`.

use super::receiver::{ReceiverAction, ReceiverEngine, ReceiverEvent};
use super::sender::{SenderAction, SenderEngine, SenderEvent, SenderState};
use super::{TransferError, TransferSummary};
use crate::channel::{ChannelId, LinkFrame, TransferLink};
use crate::config::{ConfigError, TransferConfig};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Outcomes reported by the sender actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderNotice {
    Finished(Result<TransferSummary, TransferError>),
    Rejected(TransferError),
}

/// Outcomes reported by the receiver actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverNotice {
    /// Assembled payload, still encrypted
    Completed(Vec<u8>),
    Failed(TransferError),
}

enum SenderCommand {
    Event(SenderEvent),
    Shutdown,
}

enum ReceiverCommand {
    Event(ReceiverEvent),
    Shutdown,
}

// ============================================================================
// SENDER
// ============================================================================

/// Handle to a running sender actor
#[derive(Clone)]
pub struct SenderHandle {
    command_tx: mpsc::Sender<SenderCommand>,
}

impl SenderHandle {
    async fn event(&self, event: SenderEvent) -> Result<()> {
        self.command_tx
            .send(SenderCommand::Event(event))
            .await
            .map_err(|_| anyhow::anyhow!("Sender task not running"))
    }

    /// Start sending an (already encrypted) payload
    pub async fn send(&self, payload: Vec<u8>) -> Result<()> {
        self.event(SenderEvent::Start(payload)).await
    }

    /// Report bytes notified by the receiver
    pub async fn report_received(&self, bytes: Vec<u8>) -> Result<()> {
        self.event(SenderEvent::ReportReceived(bytes)).await
    }

    pub async fn transport_unit_changed(&self, unit: usize) -> Result<()> {
        self.event(SenderEvent::TransportUnitChanged(unit)).await
    }

    /// Abandon the transfer in flight
    pub async fn cancel(&self) -> Result<()> {
        self.event(SenderEvent::Cancel).await
    }

    /// Stop the actor
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(SenderCommand::Shutdown)
            .await
            .map_err(|_| anyhow::anyhow!("Sender task not running"))
    }
}

/// Start a sender actor writing to `link`.
///
/// A successful write on an acknowledged channel counts as the peer's
/// acknowledgement.
pub fn spawn_sender(
    config: TransferConfig,
    link: Arc<dyn TransferLink>,
) -> Result<(SenderHandle, mpsc::Receiver<SenderNotice>), ConfigError> {
    config.validate()?;

    let depth = config.event_queue_depth;
    let pacing = config.pacing();
    let report_timeout = config.report_timeout();
    let (command_tx, mut command_rx) = mpsc::channel::<SenderCommand>(depth);
    let (notice_tx, notice_rx) = mpsc::channel::<SenderNotice>(depth);
    let mut engine = SenderEngine::new(config);

    tokio::spawn(async move {
        tracing::debug!("Sender task started");
        let mut report_deadline: Option<Instant> = None;
        loop {
            let command = match report_deadline {
                Some(deadline) => tokio::select! {
                    command = command_rx.recv() => command,
                    _ = tokio::time::sleep_until(deadline) => {
                        report_deadline = None;
                        Some(SenderCommand::Event(SenderEvent::ReportTimedOut))
                    }
                },
                None => command_rx.recv().await,
            };
            let Some(command) = command else {
                break;
            };
            let event = match command {
                SenderCommand::Event(event) => event,
                SenderCommand::Shutdown => {
                    tracing::info!("Sender task shutting down");
                    break;
                }
            };

            let mut pending: VecDeque<SenderAction> = engine.handle(event).into();
            while let Some(action) = pending.pop_front() {
                let follow_up = match action {
                    SenderAction::Write { channel, bytes } => {
                        tracing::trace!(
                            %channel,
                            short_id = channel.short_id(),
                            len = bytes.len(),
                            "Control write"
                        );
                        match link.write(channel, &bytes).await {
                            Ok(()) if channel.is_acknowledged() => {
                                Some(SenderEvent::SizeWriteAcknowledged { success: true })
                            }
                            Ok(()) if engine.state() == SenderState::AwaitingReport => {
                                report_deadline = Some(Instant::now() + report_timeout);
                                None
                            }
                            Ok(()) => None,
                            Err(e) => Some(SenderEvent::WriteFailed {
                                channel,
                                reason: e.to_string(),
                            }),
                        }
                    }
                    SenderAction::Stream { frames } => {
                        Some(stream_frames(link.as_ref(), &frames, pacing).await)
                    }
                    SenderAction::Finished(outcome) => {
                        notify(&notice_tx, SenderNotice::Finished(outcome)).await;
                        None
                    }
                    SenderAction::Rejected(error) => {
                        notify(&notice_tx, SenderNotice::Rejected(error)).await;
                        None
                    }
                };
                if let Some(event) = follow_up {
                    pending.extend(engine.handle(event));
                }
            }
            if engine.state() != SenderState::AwaitingReport {
                report_deadline = None;
            }
        }
        tracing::debug!("Sender task stopped");
    });

    Ok((SenderHandle { command_tx }, notice_rx))
}

/// Write frames in order on the bulk-data channel, sleeping `pacing` between them
async fn stream_frames(link: &dyn TransferLink, frames: &[Vec<u8>], pacing: Duration) -> SenderEvent {
    for (i, frame) in frames.iter().enumerate() {
        if let Err(e) = link.write(ChannelId::BulkData, frame).await {
            tracing::warn!(index = i, error = %e, "Bulk write failed");
            return SenderEvent::WriteFailed {
                channel: ChannelId::BulkData,
                reason: e.to_string(),
            };
        }
        if !pacing.is_zero() && i + 1 < frames.len() {
            tokio::time::sleep(pacing).await;
        }
    }
    tracing::trace!(frames = frames.len(), "Stream written");
    SenderEvent::StreamComplete
}

// ============================================================================
// RECEIVER
// ============================================================================

/// Handle to a running receiver actor
#[derive(Clone)]
pub struct ReceiverHandle {
    command_tx: mpsc::Sender<ReceiverCommand>,
}

impl ReceiverHandle {
    async fn event(&self, event: ReceiverEvent) -> Result<()> {
        self.command_tx
            .send(ReceiverCommand::Event(event))
            .await
            .map_err(|_| anyhow::anyhow!("Receiver task not running"))
    }

    pub async fn size_announced(&self, bytes: Vec<u8>) -> Result<()> {
        self.event(ReceiverEvent::SizeAnnounced(bytes)).await
    }

    pub async fn chunk_received(&self, bytes: Vec<u8>) -> Result<()> {
        self.event(ReceiverEvent::ChunkReceived(bytes)).await
    }

    pub async fn report_requested(&self, bytes: Vec<u8>) -> Result<()> {
        self.event(ReceiverEvent::ReportRequested(bytes)).await
    }

    pub async fn control_read_failed(&self, reason: impl Into<String>) -> Result<()> {
        self.event(ReceiverEvent::ControlReadFailed(reason.into())).await
    }

    pub async fn transport_unit_changed(&self, unit: usize) -> Result<()> {
        self.event(ReceiverEvent::TransportUnitChanged(unit)).await
    }

    pub async fn cancel(&self) -> Result<()> {
        self.event(ReceiverEvent::Cancel).await
    }

    /// Route inbound bytes by the channel they arrived on
    pub async fn deliver(&self, channel: ChannelId, bytes: Vec<u8>) -> Result<()> {
        match channel {
            ChannelId::SizeAnnouncement => self.size_announced(bytes).await,
            ChannelId::BulkData => self.chunk_received(bytes).await,
            ChannelId::ReportRequest => self.report_requested(bytes).await,
            ChannelId::ReportResponse => {
                anyhow::bail!("Receiver does not read {}", channel)
            }
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(ReceiverCommand::Shutdown)
            .await
            .map_err(|_| anyhow::anyhow!("Receiver task not running"))
    }
}

/// Start a receiver actor answering reports on `link`
pub fn spawn_receiver(
    config: TransferConfig,
    link: Arc<dyn TransferLink>,
) -> Result<(ReceiverHandle, mpsc::Receiver<ReceiverNotice>), ConfigError> {
    config.validate()?;

    let depth = config.event_queue_depth;
    let (command_tx, mut command_rx) = mpsc::channel::<ReceiverCommand>(depth);
    let (notice_tx, notice_rx) = mpsc::channel::<ReceiverNotice>(depth);
    let mut engine = ReceiverEngine::new(config);

    tokio::spawn(async move {
        tracing::debug!("Receiver task started");
        while let Some(command) = command_rx.recv().await {
            let event = match command {
                ReceiverCommand::Event(event) => event,
                ReceiverCommand::Shutdown => {
                    tracing::info!("Receiver task shutting down");
                    break;
                }
            };

            for action in engine.handle(event) {
                match action {
                    ReceiverAction::Notify { channel, bytes } => {
                        tracing::trace!(
                            %channel,
                            short_id = channel.short_id(),
                            len = bytes.len(),
                            "Report notify"
                        );
                        if let Err(e) = link.write(channel, &bytes).await {
                            tracing::warn!(%channel, error = %e, "Report notification failed");
                            let error = TransferError::TransportWriteFailure {
                                channel,
                                reason: e.to_string(),
                            };
                            notify(&notice_tx, ReceiverNotice::Failed(error)).await;
                        }
                    }
                    ReceiverAction::Completed(payload) => {
                        notify(&notice_tx, ReceiverNotice::Completed(payload)).await;
                    }
                    ReceiverAction::Failed(error) => {
                        notify(&notice_tx, ReceiverNotice::Failed(error)).await;
                    }
                }
            }
        }
        tracing::debug!("Receiver task stopped");
    });

    Ok((ReceiverHandle { command_tx }, notice_rx))
}

// ============================================================================
// IN-PROCESS WIRING
// ============================================================================

/// Deliver every frame written to a memory link into a receiver
pub fn pipe_to_receiver(
    mut wire: mpsc::UnboundedReceiver<LinkFrame>,
    receiver: ReceiverHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = wire.recv().await {
            if let Err(e) = receiver.deliver(frame.channel, frame.bytes).await {
                tracing::debug!(error = %e, "Receiver pipe closed");
                break;
            }
        }
    })
}

/// Deliver report notifications written to a memory link into a sender
pub fn pipe_to_sender(
    mut wire: mpsc::UnboundedReceiver<LinkFrame>,
    sender: SenderHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = wire.recv().await {
            if frame.channel != ChannelId::ReportResponse {
                tracing::warn!(channel = %frame.channel, "Sender ignores frame");
                continue;
            }
            if let Err(e) = sender.report_received(frame.bytes).await {
                tracing::debug!(error = %e, "Sender pipe closed");
                break;
            }
        }
    })
}

async fn notify<T>(tx: &mpsc::Sender<T>, notice: T) {
    if tx.send(notice).await.is_err() {
        tracing::debug!("Notice dropped: no listener");
    }
}
