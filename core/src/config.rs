//! Transfer configuration
//!
//! Tunables shared by both transfer directions:
//! - Negotiated transport unit (MTU-bounded write size)
//! - Report page size
//! - Inter-chunk pacing
//! - Retry ceilings and report timeout for the reconciliation loop

use crate::chunk::{CHUNK_META_SIZE, MAX_TRANSPORT_UNIT};
use crate::report::TransferReport;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default write size; a 3 + 90 * 2 byte report fits exactly
pub const DEFAULT_TRANSPORT_UNIT: usize = 185;

/// Missing sequence numbers per report page
pub const DEFAULT_REPORT_PAGE_SIZE: usize = 90;

/// Fixed delay between bulk chunk writes, in milliseconds
pub const DEFAULT_PACING_MS: u64 = 6;

/// Consecutive no-progress reconciliation rounds before giving up
pub const DEFAULT_MAX_STALLED_ROUNDS: u8 = 3;

/// Reconciliation rounds allowed beyond the page count of the first report
pub const DEFAULT_MAX_ROUNDS: u32 = 64;

/// Wait for a transfer report before asking again, in milliseconds
pub const DEFAULT_REPORT_TIMEOUT_MS: u64 = 2000;

/// Inbound event queue capacity per engine actor
pub const DEFAULT_EVENT_QUEUE_DEPTH: usize = 256;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid transport unit: must be {min}..={max}, got {got}")]
    InvalidTransportUnit { min: usize, max: usize, got: usize },

    #[error("Invalid report page size: must be > 0")]
    ZeroPageSize,

    #[error("Report page of {entries} entries needs {needed} bytes, transport unit is {unit}")]
    PageExceedsTransportUnit {
        entries: usize,
        needed: usize,
        unit: usize,
    },

    #[error("Invalid retry ceiling: {0}")]
    InvalidRetryCeiling(String),

    #[error("Invalid report timeout: must be > 0")]
    ZeroReportTimeout,

    #[error("Invalid event queue depth: must be > 0")]
    ZeroQueueDepth,

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),
}

// ============================================================================
// TRANSFER CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Negotiated maximum bytes per transport write
    pub transport_unit: usize,
    /// Missing entries carried per transfer report
    pub report_page_size: usize,
    /// Throttle between bulk chunk writes; 0 disables pacing.
    ///
    /// This is a fixed delay, not acknowledgement-driven flow control. Where
    /// the transport reports write completion, prefer pacing on that instead.
    pub pacing_ms: u64,
    /// Give up after this many consecutive rounds without progress
    pub max_stalled_rounds: u8,
    /// Round budget on top of the first report's `total_pages`.
    ///
    /// Each round clears at most one page, so a large first-pass loss earns
    /// proportionally more rounds.
    pub max_rounds: u32,
    /// Re-request an unanswered report after this long; each expiry counts as
    /// a stalled round
    pub report_timeout_ms: u64,
    /// Inbound event queue capacity for engine actors
    pub event_queue_depth: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            transport_unit: DEFAULT_TRANSPORT_UNIT,
            report_page_size: DEFAULT_REPORT_PAGE_SIZE,
            pacing_ms: DEFAULT_PACING_MS,
            max_stalled_rounds: DEFAULT_MAX_STALLED_ROUNDS,
            max_rounds: DEFAULT_MAX_ROUNDS,
            report_timeout_ms: DEFAULT_REPORT_TIMEOUT_MS,
            event_queue_depth: DEFAULT_EVENT_QUEUE_DEPTH,
        }
    }
}

impl TransferConfig {
    pub fn new(transport_unit: usize) -> Self {
        Self {
            transport_unit,
            ..Self::default()
        }
    }

    /// Set the negotiated transport unit
    pub fn with_transport_unit(mut self, transport_unit: usize) -> Self {
        self.transport_unit = transport_unit;
        self
    }

    pub fn with_report_page_size(mut self, entries: usize) -> Self {
        self.report_page_size = entries;
        self
    }

    /// Set the inter-chunk pacing delay
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing_ms = pacing.as_millis() as u64;
        self
    }

    pub fn with_max_stalled_rounds(mut self, rounds: u8) -> Self {
        self.max_stalled_rounds = rounds;
        self
    }

    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds;
        self
    }

    pub fn with_report_timeout(mut self, timeout: Duration) -> Self {
        self.report_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_event_queue_depth(mut self, depth: usize) -> Self {
        self.event_queue_depth = depth;
        self
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_millis(self.report_timeout_ms)
    }

    /// Payload bytes per chunk under this configuration
    pub fn effective_payload_size(&self) -> usize {
        self.transport_unit.saturating_sub(CHUNK_META_SIZE)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let min = CHUNK_META_SIZE + 1;
        if self.transport_unit < min || self.transport_unit > MAX_TRANSPORT_UNIT {
            return Err(ConfigError::InvalidTransportUnit {
                min,
                max: MAX_TRANSPORT_UNIT,
                got: self.transport_unit,
            });
        }

        if self.report_page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }

        let needed = TransferReport::encoded_len(self.report_page_size);
        if needed > self.transport_unit {
            return Err(ConfigError::PageExceedsTransportUnit {
                entries: self.report_page_size,
                needed,
                unit: self.transport_unit,
            });
        }

        if self.max_stalled_rounds == 0 {
            return Err(ConfigError::InvalidRetryCeiling(
                "max_stalled_rounds must be > 0".to_string(),
            ));
        }
        if self.max_rounds == 0 {
            return Err(ConfigError::InvalidRetryCeiling(
                "max_rounds must be > 0".to_string(),
            ));
        }

        if self.report_timeout_ms == 0 {
            return Err(ConfigError::ZeroReportTimeout);
        }

        if self.event_queue_depth == 0 {
            return Err(ConfigError::ZeroQueueDepth);
        }

        Ok(())
    }

    /// Parse and validate a JSON config
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TransferConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_payload_size(), 181);
        assert_eq!(config.pacing(), Duration::from_millis(6));
        assert_eq!(config.report_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_transport_unit_bounds() {
        assert!(TransferConfig::new(4).validate().is_err());
        assert!(TransferConfig::new(MAX_TRANSPORT_UNIT + 1).validate().is_err());
        assert!(TransferConfig::new(512).validate().is_ok());
    }

    #[test]
    fn test_page_must_fit_transport_unit() {
        let config = TransferConfig::new(100);
        assert_eq!(
            config.validate(),
            Err(ConfigError::PageExceedsTransportUnit {
                entries: 90,
                needed: 183,
                unit: 100
            })
        );
        assert!(config.with_report_page_size(48).validate().is_ok());
    }

    #[test]
    fn test_zero_ceilings_rejected() {
        assert!(TransferConfig::default()
            .with_max_stalled_rounds(0)
            .validate()
            .is_err());
        assert!(TransferConfig::default().with_max_rounds(0).validate().is_err());
        assert_eq!(
            TransferConfig::default().with_event_queue_depth(0).validate(),
            Err(ConfigError::ZeroQueueDepth)
        );
        assert_eq!(
            TransferConfig::default().with_report_page_size(0).validate(),
            Err(ConfigError::ZeroPageSize)
        );
        assert_eq!(
            TransferConfig::default()
                .with_report_timeout(Duration::ZERO)
                .validate(),
            Err(ConfigError::ZeroReportTimeout)
        );
    }

    #[test]
    fn test_json_roundtrip_and_partial_input() {
        let config = TransferConfig::default()
            .with_transport_unit(512)
            .with_pacing(Duration::ZERO);
        let json = config.to_json().expect("serialize");
        assert_eq!(TransferConfig::from_json(&json).expect("parse"), config);

        let partial = TransferConfig::from_json(r#"{ "transport_unit": 247 }"#).expect("parse");
        assert_eq!(partial.transport_unit, 247);
        assert_eq!(partial.report_page_size, DEFAULT_REPORT_PAGE_SIZE);
    }

    #[test]
    fn test_json_rejects_invalid_values() {
        assert!(matches!(
            TransferConfig::from_json(r#"{ "transport_unit": 2 }"#),
            Err(ConfigError::InvalidTransportUnit { .. })
        ));
        assert!(matches!(
            TransferConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
