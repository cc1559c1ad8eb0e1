// GattLink Core: reliable chunked transfer over BLE GATT
//
// A GATT link only offers small, MTU-bounded, best-effort writes. This crate
// frames a payload into sequenced, checksummed chunks, reassembles them on the
// other side, and reconciles missing chunks through transfer reports until the
// receiver confirms the whole payload.
#![allow(clippy::empty_line_after_doc_comments)]

pub mod channel;
pub mod checksum;
pub mod chunk;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod report;
pub mod session;

pub use channel::{ChannelError, ChannelId, LinkFrame, MemoryLink, TransferLink};
pub use chunk::{AddOutcome, Chunk, ChunkError, Framer, ReassemblyError, Reassembler, RetryBatch};
pub use config::{ConfigError, TransferConfig};
pub use crypto::{CryptoBox, CryptoError, PayloadCipher, SessionCipher};
pub use engine::{
    ReceiverEngine, ReceiverHandle, ReceiverNotice, ReceiverState, SenderEngine, SenderHandle,
    SenderNotice, SenderState, TransferError, TransferSummary,
};
pub use report::{ControlSignal, ReportError, ReportKind, TransferReport};
pub use session::{SessionError, TransferSession};

/// Install the global tracing subscriber.
///
/// Filter comes from `RUST_LOG`, defaulting to `info`. Safe to call more than
/// once; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
