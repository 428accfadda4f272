//! Message/signal catalog
//!
//! The catalog maps numeric message identifiers to message definitions
//! (name, expected length, signal layout, cycle time, priority). It is
//! produced by an external schema loader and consumed read-only by the
//! decode engine. [`SharedCatalog`] provides the atomic-replace reload
//! semantics: an in-flight decode keeps the snapshot it took at frame start
//! and never observes a partially loaded catalog.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::types::{EngineError, Result};

/// Identifier band reserved for per-object radar messages
pub const RADAR_ID_BAND: std::ops::RangeInclusive<u32> = 200..=209;

/// Vehicle-state identifiers carried at normal priority
pub const VEHICLE_STATE_IDS: [u32; 3] = [100, 101, 102];

/// Highest legal message identifier (29-bit address space)
pub const MAX_MESSAGE_ID: u32 = 0x1FFF_FFFF;

/// Message priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// Classify an identifier: radar band is high, the fixed vehicle-state
    /// set is normal, everything else low.
    pub fn for_id(id: u32) -> Self {
        if RADAR_ID_BAND.contains(&id) {
            Priority::High
        } else if VEHICLE_STATE_IDS.contains(&id) {
            Priority::Normal
        } else {
            Priority::Low
        }
    }
}

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Little-endian (Intel format)
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Signed,
    Unsigned,
}

/// A signal definition within a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDefinition {
    /// Signal name, unique within its message
    pub name: String,
    /// Start bit in the frame
    pub start_bit: u16,
    /// Length in bits
    pub length: u16,
    /// Byte order for extraction
    #[serde(default = "default_byte_order")]
    pub byte_order: ByteOrder,
    /// Signed/unsigned raw value
    #[serde(default = "default_value_type")]
    pub value_type: ValueType,
    /// Scale factor raw -> physical
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Offset added after scaling
    #[serde(default)]
    pub offset: f64,
    /// Minimum physical value (informative)
    #[serde(default)]
    pub min: Option<f64>,
    /// Maximum physical value (informative)
    #[serde(default)]
    pub max: Option<f64>,
    /// Engineering unit (e.g. "m", "m/s")
    #[serde(default)]
    pub unit: Option<String>,
    /// Initial value used by the default-fill decode fallback
    #[serde(default)]
    pub initial: Option<f64>,
}

fn default_byte_order() -> ByteOrder {
    ByteOrder::LittleEndian
}

fn default_value_type() -> ValueType {
    ValueType::Unsigned
}

fn default_scale() -> f64 {
    1.0
}

impl SignalDefinition {
    /// Default value for the fallback ladder: initial, else minimum, else 0
    pub fn default_value(&self) -> f64 {
        self.initial.or(self.min).unwrap_or(0.0)
    }
}

/// A complete message definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDefinition {
    /// Message identifier
    pub id: u32,
    /// Message name
    pub name: String,
    /// Expected payload length in bytes
    pub length: usize,
    /// Ordered signal list
    pub signals: Vec<SignalDefinition>,
    /// Cycle time in milliseconds (0 = unknown/event driven)
    #[serde(default)]
    pub cycle_time_ms: f64,
}

impl MessageDefinition {
    /// Priority class derived from the identifier
    pub fn priority(&self) -> Priority {
        Priority::for_id(self.id)
    }
}

/// Catalog statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub num_messages: usize,
    pub num_signals: usize,
}

/// The read-only message/signal catalog
#[derive(Debug, Default)]
pub struct Catalog {
    messages: HashMap<u32, MessageDefinition>,
    name_lookup: HashMap<String, u32>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message definition, enforcing the catalog invariants:
    /// identifiers unique, signal names unique within the message,
    /// bit lengths within 1..=64, min <= max wherever both are declared.
    pub fn add_message(&mut self, message: MessageDefinition) -> Result<()> {
        if self.messages.contains_key(&message.id) {
            return Err(EngineError::DuplicateMessageId(message.id));
        }
        let mut seen = std::collections::HashSet::new();
        for signal in &message.signals {
            if !seen.insert(signal.name.as_str()) {
                return Err(EngineError::InvalidDefinition(format!(
                    "duplicate signal '{}' in message '{}'",
                    signal.name, message.name
                )));
            }
            if signal.length == 0 || signal.length > 64 {
                return Err(EngineError::InvalidDefinition(format!(
                    "signal '{}': bit length {} outside 1..=64",
                    signal.name, signal.length
                )));
            }
            if let (Some(min), Some(max)) = (signal.min, signal.max) {
                if min > max {
                    return Err(EngineError::InvalidDefinition(format!(
                        "signal '{}': min {} > max {}",
                        signal.name, min, max
                    )));
                }
            }
        }
        self.name_lookup.insert(message.name.clone(), message.id);
        self.messages.insert(message.id, message);
        Ok(())
    }

    /// Look up a message definition by identifier
    pub fn message(&self, id: u32) -> Option<&MessageDefinition> {
        self.messages.get(&id)
    }

    /// Look up a message definition by name
    pub fn message_by_name(&self, name: &str) -> Option<&MessageDefinition> {
        self.name_lookup.get(name).and_then(|id| self.messages.get(id))
    }

    /// All identifiers in the catalog, sorted
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.messages.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Catalog statistics
    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            num_messages: self.messages.len(),
            num_signals: self.messages.values().map(|m| m.signals.len()).sum(),
        }
    }
}

/// Cloneable handle to a catalog with atomic whole-set replacement
///
/// `snapshot()` hands out an `Arc` to the current definition set; `replace()`
/// swaps in a new set without disturbing snapshots already taken.
#[derive(Clone)]
pub struct SharedCatalog {
    inner: Arc<RwLock<Arc<Catalog>>>,
}

impl SharedCatalog {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    /// Current definition set; the returned snapshot stays coherent even if
    /// a reload happens while it is in use.
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Atomically replace the whole definition set
    pub fn replace(&self, catalog: Catalog) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(catalog);
    }
}
