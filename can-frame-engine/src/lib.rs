//! CAN Frame Engine Library
//!
//! Fault-tolerant decode-and-correlate pipeline for periodic binary frames
//! from a vehicle sensor bus:
//! - Decodes raw frames against a message/signal catalog, reconciling length
//!   mismatches and falling through an explicit decode ladder instead of
//!   dropping data
//! - Maintains a bounded tracked-object store derived from decoded radar
//!   signals (nearest object, eviction by age, range queries)
//! - Dispatches decoded signal tuples through a correlation rule registry,
//!   including the object-of-interest index/position rule pair feeding an
//!   external projection collaborator
//!
//! The library treats the transport layer (bus reader), the catalog schema
//! loader, presentation and persistence as external collaborators: its input
//! is (identifier, payload, arrival time) tuples plus a loaded [`catalog::Catalog`],
//! its output is structured [`types::DecodedFrame`] records and snapshots.
//!
//! # Example Usage
//!
//! ```
//! use can_frame_engine::{Catalog, EngineConfig, FrameEngine, RawFrame};
//!
//! // Catalog normally comes from the external schema loader.
//! let catalog = Catalog::new();
//!
//! let mut engine = FrameEngine::new(
//!     catalog,
//!     EngineConfig::new().with_frequency_monitoring(false),
//! );
//!
//! // Unknown identifiers still yield a frame record.
//! let decoded = engine.process(RawFrame::new(1, 0x123, vec![0x01, 0x02], 0.0));
//! println!("{}: {}", decoded.name, decoded.status);
//! ```

// Public modules
pub mod catalog;
pub mod config;
pub mod correlate;
pub mod dlc;
pub mod engine;
pub mod stats;
pub mod tracking;
pub mod types;

// Internal modules (not exposed in public API)
mod layout;

// Re-export main types for convenience
pub use catalog::{Catalog, MessageDefinition, Priority, SharedCatalog, SignalDefinition};
pub use config::EngineConfig;
pub use correlate::{
    CorrelationDispatcher, ObjectNaming, ObjectOfInterestCorrelator, ProjectionSample, SignalTuple,
};
pub use engine::{CallbackId, FrameEngine};
pub use stats::EngineStats;
pub use tracking::{ObjectStore, TrackedObject};
pub use types::{DecodedFrame, EngineError, FrameStatus, RawFrame, Result, SignalValue, Timestamp};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: an engine over an empty catalog still processes frames
        let mut engine = FrameEngine::new(
            Catalog::new(),
            EngineConfig::new().with_frequency_monitoring(false),
        );
        let decoded = engine.process(RawFrame::new(0, 1, vec![0xFF], 0.0));
        assert_eq!(decoded.status, FrameStatus::Valid);
        assert_eq!(engine.statistics().total_frames, 1);
    }
}
