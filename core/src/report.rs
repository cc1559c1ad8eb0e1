//! Transfer report: end-of-transfer reconciliation messages
//!
//! The sender asks for a report on the report-request control channel; the
//! receiver answers on the report-response channel with either success or
//! one page of missing sequence numbers.
//!
//! Report wire format:
//!
//! ```text
//! [1 byte]   kind (0x00 success, 0x01 missing chunks, 0x02 error)
//! [2 bytes]  total pages (u16 BE)
//! [2N bytes] missing sequence numbers (u16 BE each, 1-based)
//! ```
//!
//! A report must fit in a single transport write, so at most one page of
//! missing entries is carried; `total_pages` states how many pages the full
//! missing set spans.

use thiserror::Error;

/// Fixed header size: kind + total pages
pub const REPORT_HEADER_SIZE: usize = 3;

/// Bytes per missing entry
pub const REPORT_ENTRY_SIZE: usize = 2;

/// Errors decoding reports and control signals
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReportError {
    #[error("Report truncated: {0} bytes")]
    Truncated(usize),
    #[error("Unknown report kind: {0:#04x}")]
    UnknownKind(u8),
    #[error("Missing-chunk list has a dangling byte ({0} bytes)")]
    OddSequenceBytes(usize),
    #[error("Sequence number 0 in report")]
    ZeroSequence,
    #[error("{kind:?} report must not list sequences")]
    UnexpectedEntries { kind: ReportKind },
    #[error("Unrecognized control signal: {0:?}")]
    UnrecognizedSignal(Vec<u8>),
}

/// Outcome reported by the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReportKind {
    Success = 0x00,
    MissingChunks = 0x01,
    Error = 0x02,
}

impl ReportKind {
    pub fn from_u8(value: u8) -> Result<Self, ReportError> {
        match value {
            0x00 => Ok(ReportKind::Success),
            0x01 => Ok(ReportKind::MissingChunks),
            0x02 => Ok(ReportKind::Error),
            other => Err(ReportError::UnknownKind(other)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Reconciliation message from receiver to sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub kind: ReportKind,
    pub total_pages: u16,
    /// First page of missing sequence numbers; empty unless `MissingChunks`
    pub missing: Vec<u16>,
}

impl TransferReport {
    pub fn success() -> Self {
        Self {
            kind: ReportKind::Success,
            total_pages: 0,
            missing: Vec::new(),
        }
    }

    pub fn error() -> Self {
        Self {
            kind: ReportKind::Error,
            total_pages: 0,
            missing: Vec::new(),
        }
    }

    /// Page the full missing set: keep the first `page_size` entries and
    /// record `ceil(missing / page_size)` as the page count.
    ///
    /// Pages beyond the first are never requested; the sender's next round
    /// picks them up as they become the first page.
    pub fn missing_chunks(all_missing: &[u16], page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let total_pages = all_missing.len().div_ceil(page_size).min(u16::MAX as usize) as u16;
        let first_page = &all_missing[..all_missing.len().min(page_size)];
        Self {
            kind: ReportKind::MissingChunks,
            total_pages,
            missing: first_page.to_vec(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == ReportKind::Success
    }

    /// Encoded size of a report carrying `entries` sequence numbers
    pub fn encoded_len(entries: usize) -> usize {
        REPORT_HEADER_SIZE + entries * REPORT_ENTRY_SIZE
    }

    /// Serialize to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::encoded_len(self.missing.len()));
        buf.push(self.kind.as_u8());
        buf.extend_from_slice(&self.total_pages.to_be_bytes());
        for seq in &self.missing {
            buf.extend_from_slice(&seq.to_be_bytes());
        }
        buf
    }

    /// Deserialize from wire bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, ReportError> {
        if data.len() < REPORT_HEADER_SIZE {
            return Err(ReportError::Truncated(data.len()));
        }
        let kind = ReportKind::from_u8(data[0])?;
        let total_pages = u16::from_be_bytes([data[1], data[2]]);

        let body = &data[REPORT_HEADER_SIZE..];
        if body.len() % REPORT_ENTRY_SIZE != 0 {
            return Err(ReportError::OddSequenceBytes(body.len()));
        }
        if kind != ReportKind::MissingChunks && !body.is_empty() {
            return Err(ReportError::UnexpectedEntries { kind });
        }

        let missing = body
            .chunks_exact(REPORT_ENTRY_SIZE)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect::<Vec<_>>();
        if missing.contains(&0) {
            return Err(ReportError::ZeroSequence);
        }

        Ok(Self {
            kind,
            total_pages,
            missing,
        })
    }
}

/// Single-byte signal written to the report-request control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlSignal {
    /// Ask the receiver for a transfer report
    RequestReport = 0x01,
    /// The sender has aborted the transfer
    Error = 0x02,
}

impl ControlSignal {
    pub fn to_bytes(&self) -> Vec<u8> {
        vec![*self as u8]
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ReportError> {
        match data {
            [0x01] => Ok(ControlSignal::RequestReport),
            [0x02] => Ok(ControlSignal::Error),
            other => Err(ReportError::UnrecognizedSignal(other.to_vec())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_REPORT_PAGE_SIZE;

    #[test]
    fn test_success_encoding() {
        let bytes = TransferReport::success().to_bytes();
        assert_eq!(bytes, vec![0x00, 0x00, 0x00]);
        assert!(TransferReport::from_bytes(&bytes).unwrap().is_success());
    }

    #[test]
    fn test_missing_chunks_encoding() {
        let report = TransferReport::missing_chunks(&[1, 300], 90);
        let bytes = report.to_bytes();
        assert_eq!(bytes, vec![0x01, 0x00, 0x01, 0x00, 0x01, 0x01, 0x2C]);
        assert_eq!(TransferReport::from_bytes(&bytes).unwrap(), report);
    }

    #[test]
    fn test_pagination_caps_entries() {
        let missing: Vec<u16> = (1..=200).collect();
        let report = TransferReport::missing_chunks(&missing, 90);

        assert_eq!(report.missing.len(), 90);
        assert_eq!(report.total_pages, 3);
        assert_eq!(report.missing[0], 1);
        assert_eq!(report.missing[89], 90);
        assert_eq!(report.to_bytes().len(), TransferReport::encoded_len(90));
    }

    #[test]
    fn test_pagination_exact_page() {
        let missing: Vec<u16> = (1..=90).collect();
        let report = TransferReport::missing_chunks(&missing, 90);
        assert_eq!(report.total_pages, 1);
        assert_eq!(report.missing.len(), 90);
    }

    #[test]
    fn test_default_page_fits_ble_minimum_negotiated_unit() {
        // 3 + 90 * 2 = 183 bytes, inside a 185-byte write
        assert_eq!(TransferReport::encoded_len(DEFAULT_REPORT_PAGE_SIZE), 183);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(TransferReport::from_bytes(&[0x01]), Err(ReportError::Truncated(1)));
        assert_eq!(
            TransferReport::from_bytes(&[0x07, 0, 0]),
            Err(ReportError::UnknownKind(0x07))
        );
        assert_eq!(
            TransferReport::from_bytes(&[0x01, 0, 1, 0]),
            Err(ReportError::OddSequenceBytes(1))
        );
        assert_eq!(
            TransferReport::from_bytes(&[0x01, 0, 1, 0, 0]),
            Err(ReportError::ZeroSequence)
        );
        assert!(matches!(
            TransferReport::from_bytes(&[0x00, 0, 0, 0, 1]),
            Err(ReportError::UnexpectedEntries { .. })
        ));
    }

    #[test]
    fn test_control_signal() {
        assert_eq!(
            ControlSignal::from_bytes(&ControlSignal::RequestReport.to_bytes()),
            Ok(ControlSignal::RequestReport)
        );
        assert_eq!(ControlSignal::from_bytes(&[0x02]), Ok(ControlSignal::Error));
        assert!(ControlSignal::from_bytes(&[0x00]).is_err());
        assert!(ControlSignal::from_bytes(&[0x01, 0x01]).is_err());
        assert!(ControlSignal::from_bytes(&[]).is_err());
    }
}
