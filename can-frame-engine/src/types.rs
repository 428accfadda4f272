//! Core types for the frame decode pipeline
//!
//! This module defines the input frame type and the `DecodedFrame` record the
//! engine emits for every input. The engine never throws past its boundary:
//! all failure modes are encoded in [`FrameStatus`] and the error text.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::catalog::Priority;

/// Arrival/update times are seconds since the epoch, as delivered by the
/// transport layer.
pub type Timestamp = f64;

/// Result type for engine-internal fallible operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Raw frame as supplied by the external transport (bus reader)
///
/// This is the engine's only input: an identifier, 0-64 payload bytes and an
/// arrival time. Bus-protocol concerns (arbitration, error frames) are the
/// transport's problem.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Arrival time in seconds
    pub timestamp: Timestamp,
    /// Bus channel the frame arrived on
    pub channel: u8,
    /// Message identifier (11-bit or 29-bit)
    pub id: u32,
    /// Payload bytes (0-8 for classic CAN, up to 64 for CAN-FD)
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn new(channel: u8, id: u32, data: Vec<u8>, timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            channel,
            id,
            data,
        }
    }
}

/// Errors produced while decoding a single frame
///
/// These never cross the `process` boundary; the engine converts them into
/// [`FrameStatus`] + error text. They exist so the decode ladder has a tagged
/// failure to inspect instead of relying on unwinding.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("signal '{signal}' needs {required} bytes but frame has {available}")]
    SignalOutOfFrame {
        signal: String,
        required: usize,
        available: usize,
    },

    #[error("invalid catalog definition: {0}")]
    InvalidDefinition(String),

    #[error("duplicate message identifier 0x{0:X} in catalog")]
    DuplicateMessageId(u32),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Processing status of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    /// Signals decoded (possibly via fallback defaults, see error text)
    Valid,
    /// Rejected by basic validation, no signals produced
    Invalid,
    /// Reserved for cadence supervision; never set by the synchronous path
    Timeout,
    /// Decode ladder exhausted or non-finite signal value detected
    Error,
}

impl fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameStatus::Valid => write!(f, "valid"),
            FrameStatus::Invalid => write!(f, "invalid"),
            FrameStatus::Timeout => write!(f, "timeout"),
            FrameStatus::Error => write!(f, "error"),
        }
    }
}

/// A decoded signal value
///
/// `Text` carries the raw-hex fallback for identifiers absent from the
/// catalog; decoded physical values are `Integer` or `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl SignalValue {
    /// Numeric view of the value, `None` for text fallbacks
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Integer(v) => Some(*v as f64),
            SignalValue::Float(v) => Some(*v),
            SignalValue::Text(_) => None,
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Integer(v) => write!(f, "{}", v),
            SignalValue::Float(v) => write!(f, "{:.3}", v),
            SignalValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// The engine's per-frame output record
///
/// Constructed at the start of `process`, fully populated before return,
/// immutable thereafter. Consumers distinguish clean, approximate and
/// untrustworthy data via [`FrameStatus`] and `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedFrame {
    /// Message identifier
    pub id: u32,
    /// Resolved message name, or `Unknown_<id>` when absent from the catalog
    pub name: String,
    /// Payload bytes after length reconciliation
    pub data: Vec<u8>,
    /// Declared length marker (expected byte count after reconciliation)
    pub dlc: usize,
    /// Decoded signal values by name
    pub signals: BTreeMap<String, SignalValue>,
    /// Arrival time in seconds
    pub timestamp: Timestamp,
    /// Bus channel the frame arrived on
    pub channel: u8,
    /// Processing status
    pub status: FrameStatus,
    /// Message priority class from the catalog
    pub priority: Priority,
    /// Catalog cycle time in milliseconds (0 when unknown)
    pub cycle_time_ms: f64,
    /// Explanation for non-clean outcomes (also set for defaulted decodes)
    pub error: Option<String>,
    /// Number of decode ladder retries taken
    pub retry_count: u8,
    /// Measured processing latency in seconds
    pub processing_time: f64,
}

impl DecodedFrame {
    /// Placeholder name for identifiers the catalog does not know
    pub fn unknown_name(id: u32) -> String {
        format!("Unknown_{}", id)
    }

    /// Start a frame record from raw input; signals and status are filled in
    /// by the engine before the record is returned.
    pub(crate) fn begin(frame: &RawFrame) -> Self {
        Self {
            id: frame.id,
            name: Self::unknown_name(frame.id),
            data: frame.data.clone(),
            dlc: frame.data.len(),
            signals: BTreeMap::new(),
            timestamp: frame.timestamp,
            channel: frame.channel,
            status: FrameStatus::Valid,
            priority: Priority::Low,
            cycle_time_ms: 0.0,
            error: None,
            retry_count: 0,
            processing_time: 0.0,
        }
    }

    /// Numeric value of a signal, if present and numeric
    pub fn signal_f64(&self, name: &str) -> Option<f64> {
        self.signals.get(name).and_then(SignalValue::as_f64)
    }
}

/// Lowercase hex rendering of a payload, used by the unknown-id fallback
pub fn to_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        use fmt::Write;
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_value_as_f64() {
        assert_eq!(SignalValue::Integer(42).as_f64(), Some(42.0));
        assert_eq!(SignalValue::Float(3.5).as_f64(), Some(3.5));
        assert_eq!(SignalValue::Text("0102".into()).as_f64(), None);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(FrameStatus::Valid.to_string(), "valid");
        assert_eq!(FrameStatus::Error.to_string(), "error");
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x01, 0x02]), "0102");
        assert_eq!(to_hex(&[0xAB, 0xCD, 0xEF]), "abcdef");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn test_unknown_name() {
        assert_eq!(DecodedFrame::unknown_name(305), "Unknown_305");
    }

    #[test]
    fn test_decoded_frame_serializes() {
        let mut frame = DecodedFrame::begin(&RawFrame::new(1, 305, vec![0x01, 0x02], 1.5));
        frame
            .signals
            .insert("RawBytes".to_string(), SignalValue::Text("0102".into()));
        frame
            .signals
            .insert("Length".to_string(), SignalValue::Integer(2));

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["name"], "Unknown_305");
        assert_eq!(json["status"], "valid");
        assert_eq!(json["signals"]["RawBytes"], "0102");
        assert_eq!(json["signals"]["Length"], 2);
        assert_eq!(json["timestamp"], 1.5);
    }
}
