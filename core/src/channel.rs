/// Logical channels between the transfer engines and the BLE layer
///
/// The engines never see GATT services or characteristics; they write bytes
/// to a named logical channel and receive inbound bytes as events. Mapping a
/// channel onto a characteristic UUID belongs to the platform layer.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Logical channels used by the transfer protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    /// Sender announces the total payload size (acknowledged write)
    SizeAnnouncement,
    /// Bulk chunk writes (fire-and-forget)
    BulkData,
    /// Sender asks the receiver for a transfer report
    ReportRequest,
    /// Receiver answers with a transfer report (notification)
    ReportResponse,
}

impl ChannelId {
    /// Short characteristic identifier carried in write traces
    pub fn short_id(&self) -> u16 {
        match self {
            ChannelId::SizeAnnouncement => 0x2032,
            ChannelId::BulkData => 0x2033,
            ChannelId::ReportRequest => 0x2034,
            ChannelId::ReportResponse => 0x2035,
        }
    }

    /// Whether a completed write on this channel counts as the peer's
    /// acknowledgement
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, ChannelId::SizeAnnouncement)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::SizeAnnouncement => write!(f, "size-announcement"),
            ChannelId::BulkData => write!(f, "bulk-data"),
            ChannelId::ReportRequest => write!(f, "report-request"),
            ChannelId::ReportResponse => write!(f, "report-response"),
        }
    }
}

/// Errors surfaced by the link
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Write on {channel} failed: {reason}")]
    WriteFailed { channel: ChannelId, reason: String },
    #[error("Link closed")]
    Closed,
}

/// Outbound half of the BLE link, implemented by the platform layer
#[async_trait]
pub trait TransferLink: Send + Sync {
    /// Write bytes to a logical channel
    async fn write(&self, channel: ChannelId, data: &[u8]) -> Result<(), ChannelError>;
}

/// Bytes written to a [`MemoryLink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    pub channel: ChannelId,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct LinkFaults {
    fail_channel: Option<(ChannelId, String)>,
    drop_once: HashSet<u16>,
    drop_always: HashSet<u16>,
    corrupt_once: HashSet<u16>,
    writes: usize,
}

/// In-process link for tests and local loopback.
///
/// Every successful write is forwarded to the paired receiver. Bulk-data
/// writes can be dropped or corrupted by sequence number to simulate a lossy
/// radio; any channel can be made to fail outright.
#[derive(Clone)]
pub struct MemoryLink {
    outbox: mpsc::UnboundedSender<LinkFrame>,
    faults: Arc<Mutex<LinkFaults>>,
}

impl MemoryLink {
    /// Create a link and the receiver its writes are delivered to
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LinkFrame>) {
        let (outbox, inbox) = mpsc::unbounded_channel();
        (
            Self {
                outbox,
                faults: Arc::new(Mutex::new(LinkFaults::default())),
            },
            inbox,
        )
    }

    /// Make every write on `channel` fail
    pub fn fail_writes_on(&self, channel: ChannelId, reason: impl Into<String>) {
        self.faults.lock().fail_channel = Some((channel, reason.into()));
    }

    /// Let writes on every channel succeed again
    pub fn restore_writes(&self) {
        self.faults.lock().fail_channel = None;
    }

    /// Lose the first transmission of each listed chunk
    pub fn drop_once<I: IntoIterator<Item = u16>>(&self, sequences: I) {
        self.faults.lock().drop_once.extend(sequences);
    }

    /// Lose every transmission of each listed chunk
    pub fn drop_always<I: IntoIterator<Item = u16>>(&self, sequences: I) {
        self.faults.lock().drop_always.extend(sequences);
    }

    /// Flip a payload bit in the first transmission of each listed chunk
    pub fn corrupt_once<I: IntoIterator<Item = u16>>(&self, sequences: I) {
        self.faults.lock().corrupt_once.extend(sequences);
    }

    /// Writes accepted so far, including dropped ones
    pub fn write_count(&self) -> usize {
        self.faults.lock().writes
    }
}

#[async_trait]
impl TransferLink for MemoryLink {
    async fn write(&self, channel: ChannelId, data: &[u8]) -> Result<(), ChannelError> {
        let mut bytes = data.to_vec();
        {
            let mut faults = self.faults.lock();
            if let Some((failing, reason)) = &faults.fail_channel {
                if *failing == channel {
                    return Err(ChannelError::WriteFailed {
                        channel,
                        reason: reason.clone(),
                    });
                }
            }
            faults.writes += 1;

            if channel == ChannelId::BulkData && bytes.len() >= 2 {
                let seq = u16::from_be_bytes([bytes[0], bytes[1]]);
                if faults.drop_always.contains(&seq) || faults.drop_once.remove(&seq) {
                    tracing::trace!(seq, "MemoryLink dropped chunk");
                    return Ok(());
                }
                if faults.corrupt_once.remove(&seq) && bytes.len() > 4 {
                    bytes[2] ^= 0x01;
                    tracing::trace!(seq, "MemoryLink corrupted chunk");
                }
            }
        }

        self.outbox
            .send(LinkFrame { channel, bytes })
            .map_err(|_| ChannelError::Closed)
    }
}
