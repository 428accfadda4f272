//! Frame decode engine
//!
//! [`FrameEngine::process`] turns one raw frame into a [`DecodedFrame`]. The
//! call is total: every input yields a record, with all failure modes folded
//! into the status/error fields. The pipeline is validation -> catalog
//! lookup -> length reconciliation -> decode ladder -> signal
//! post-validation -> bookkeeping, favouring availability of approximate
//! data over dropping frames.
//!
//! `process` takes `&mut self`, so decoding is strictly sequential per
//! engine; run one engine per bus channel to preserve per-channel ordering
//! while channels decode concurrently. An optional ~1 Hz monitor thread
//! recomputes the per-second message rate without ever blocking `process`.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::catalog::{Catalog, MessageDefinition, SharedCatalog, MAX_MESSAGE_ID};
use crate::config::EngineConfig;
use crate::dlc::MAX_PAYLOAD_LEN;
use crate::layout;
use crate::stats::{EngineStats, StatsState};
use crate::types::{to_hex, DecodedFrame, FrameStatus, RawFrame, SignalValue, Timestamp};

/// Per-frame callback; an `Err` result is logged and isolated
pub type FrameCallback = Box<dyn Fn(&DecodedFrame) -> anyhow::Result<()> + Send>;

/// Token identifying a registered callback, returned by
/// [`FrameEngine::register_callback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Outcome of the decode fallback ladder
enum LadderOutcome {
    Decoded {
        signals: std::collections::BTreeMap<String, SignalValue>,
        retries: u8,
    },
    Defaulted {
        signals: std::collections::BTreeMap<String, SignalValue>,
        retries: u8,
        reason: String,
    },
    Failed {
        retries: u8,
        reason: String,
    },
}

struct Monitor {
    running: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

/// The frame decode engine
pub struct FrameEngine {
    catalog: SharedCatalog,
    config: EngineConfig,
    stats: Arc<Mutex<StatsState>>,
    history: VecDeque<DecodedFrame>,
    callbacks: HashMap<u32, Vec<(CallbackId, FrameCallback)>>,
    next_callback_id: u64,
    monitor: Option<Monitor>,
}

impl FrameEngine {
    /// Create an engine owning its catalog
    pub fn new(catalog: Catalog, config: EngineConfig) -> Self {
        Self::with_shared_catalog(SharedCatalog::new(catalog), config)
    }

    /// Create an engine over a shared catalog handle (one catalog, many
    /// channels)
    pub fn with_shared_catalog(catalog: SharedCatalog, config: EngineConfig) -> Self {
        let stats = Arc::new(Mutex::new(StatsState::new()));
        let monitor = if config.frequency_monitoring {
            Some(spawn_monitor(stats.clone()))
        } else {
            None
        };
        Self {
            catalog,
            config,
            stats,
            history: VecDeque::new(),
            callbacks: HashMap::new(),
            next_callback_id: 0,
            monitor,
        }
    }

    /// Process one raw frame. Never panics past this boundary and never
    /// returns an error: consult the returned record's status.
    pub fn process(&mut self, frame: RawFrame) -> DecodedFrame {
        let started = Instant::now();
        let catalog = self.catalog.snapshot();
        let mut decoded = DecodedFrame::begin(&frame);

        if !self.validate_frame(&frame) {
            decoded.status = FrameStatus::Invalid;
            decoded.error = Some("frame validation failed".to_string());
            return self.finish(decoded, started);
        }

        match catalog.message(frame.id) {
            Some(def) => self.decode_known(&mut decoded, def),
            None => self.decode_unknown(&mut decoded),
        }

        self.finish(decoded, started)
    }

    /// Basic validation: payload length within [0, 64] (when enabled) and
    /// identifier inside the 29-bit address space. The only unconditional
    /// rejection path.
    fn validate_frame(&self, frame: &RawFrame) -> bool {
        if self.config.dlc_validation && frame.data.len() > MAX_PAYLOAD_LEN {
            log::warn!(
                "frame 0x{:X}: payload length {} exceeds {} bytes",
                frame.id,
                frame.data.len(),
                MAX_PAYLOAD_LEN
            );
            return false;
        }
        if frame.id > MAX_MESSAGE_ID {
            log::warn!("frame id 0x{:X} outside legal address space", frame.id);
            return false;
        }
        true
    }

    fn decode_known(&mut self, decoded: &mut DecodedFrame, def: &MessageDefinition) {
        decoded.name = def.name.clone();
        decoded.priority = def.priority();
        decoded.cycle_time_ms = def.cycle_time_ms;

        let original_len = decoded.data.len();
        if !self.reconcile_length(decoded, def) {
            return;
        }

        match self.run_decode_ladder(def, &decoded.data, original_len) {
            LadderOutcome::Decoded { signals, retries } => {
                decoded.signals = signals;
                decoded.retry_count = retries;
                decoded.status = FrameStatus::Valid;
                log::debug!(
                    "decoded 0x{:X} ({}): {} signals",
                    decoded.id,
                    decoded.name,
                    decoded.signals.len()
                );
            }
            LadderOutcome::Defaulted {
                signals,
                retries,
                reason,
            } => {
                decoded.signals = signals;
                decoded.retry_count = retries;
                decoded.status = FrameStatus::Valid;
                decoded.error = Some(format!("used default values due to: {}", reason));
                log::warn!("0x{:X}: decode fell back to defaults: {}", decoded.id, reason);
            }
            LadderOutcome::Failed { retries, reason } => {
                decoded.retry_count = retries;
                decoded.status = FrameStatus::Error;
                decoded.error = Some(reason);
                self.lock_stats().note_decode_error();
            }
        }

        if decoded.status == FrameStatus::Valid && self.config.signal_validation {
            self.validate_signals(decoded, def);
        }
    }

    /// Unknown identifier: not an error. Optionally expose the raw payload
    /// as display signals.
    fn decode_unknown(&self, decoded: &mut DecodedFrame) {
        log::debug!("unknown identifier 0x{:X}", decoded.id);
        if self.config.unknown_id_basic_signals {
            decoded
                .signals
                .insert("RawBytes".to_string(), SignalValue::Text(to_hex(&decoded.data)));
            decoded.signals.insert(
                "Length".to_string(),
                SignalValue::Integer(decoded.data.len() as i64),
            );
        }
        decoded.status = FrameStatus::Valid;
    }

    /// Reconcile payload length against the catalog: pad short payloads with
    /// zeros, truncate long ones. Any mismatch counts once regardless of
    /// direction.
    fn reconcile_length(&mut self, decoded: &mut DecodedFrame, def: &MessageDefinition) -> bool {
        let expected = def.length;
        let actual = decoded.data.len();
        if actual == expected {
            return true;
        }

        self.lock_stats().note_dlc_mismatch();
        log::warn!(
            "DLC mismatch on 0x{:X}: expected {} bytes, got {}",
            decoded.id,
            expected,
            actual
        );

        if actual < expected {
            decoded.data.resize(expected, 0);
        } else {
            decoded.data.truncate(expected);
        }
        decoded.dlc = expected;

        if decoded.data.len() != expected {
            decoded.status = FrameStatus::Invalid;
            decoded.error = Some("DLC adjustment failed".to_string());
            return false;
        }
        true
    }

    /// Decode ladder: direct decode, then a retry on the length-adjusted
    /// buffer (only when the original length differed), then default-fill if
    /// configured. Each step runs only after inspecting the previous
    /// failure; no unwinding is used for control flow.
    fn run_decode_ladder(
        &self,
        def: &MessageDefinition,
        data: &[u8],
        original_len: usize,
    ) -> LadderOutcome {
        let first = match layout::decode_signals(data, def) {
            Ok(signals) => return LadderOutcome::Decoded { signals, retries: 0 },
            Err(e) => e,
        };

        let mut retries = 0u8;
        if original_len != def.length && self.config.max_retries >= 1 {
            retries = 1;
            log::debug!(
                "0x{:X}: retrying decode on length-adjusted payload",
                def.id
            );
            if let Ok(signals) = layout::decode_signals(data, def) {
                return LadderOutcome::Decoded { signals, retries };
            }
        }

        if self.config.use_default_on_decode_error {
            let signals = def
                .signals
                .iter()
                .map(|s| (s.name.clone(), SignalValue::Float(s.default_value())))
                .collect();
            return LadderOutcome::Defaulted {
                signals,
                retries,
                reason: first.to_string(),
            };
        }

        LadderOutcome::Failed {
            retries,
            reason: first.to_string(),
        }
    }

    /// Signal post-validation: out-of-range values are warned about but kept
    /// (range is informative, not fatal); a non-finite value downgrades the
    /// frame to `Error` and no further signals are trusted.
    fn validate_signals(&self, decoded: &mut DecodedFrame, def: &MessageDefinition) {
        for (name, value) in &decoded.signals {
            let Some(v) = value.as_f64() else { continue };

            if !v.is_finite() {
                log::warn!("non-finite value for signal '{}'", name);
                decoded.status = FrameStatus::Error;
                decoded.error = Some(format!("Invalid signal value: {}", name));
                break;
            }

            if let Some(sig) = def.signals.iter().find(|s| &s.name == name) {
                if let (Some(min), Some(max)) = (sig.min, sig.max) {
                    if v < min || v > max {
                        log::warn!(
                            "signal '{}' out of range: {} (range {}..{})",
                            name,
                            v,
                            min,
                            max
                        );
                    }
                }
            }
        }
    }

    /// Bookkeeping: latency, counters, bounded history, callbacks. Always
    /// the last step; the record is immutable afterwards.
    fn finish(&mut self, mut decoded: DecodedFrame, started: Instant) -> DecodedFrame {
        decoded.processing_time = started.elapsed().as_secs_f64();

        self.lock_stats()
            .record_frame(decoded.status, decoded.processing_time, wall_seconds());

        if self.config.max_message_history > 0 {
            while self.history.len() >= self.config.max_message_history {
                self.history.pop_front();
            }
            self.history.push_back(decoded.clone());
        }

        self.run_callbacks(&decoded);
        decoded
    }

    /// Invoke callbacks registered for this identifier, isolating each
    /// invocation: an `Err` or a panic is logged and affects neither the
    /// frame's status nor later frames.
    fn run_callbacks(&self, decoded: &DecodedFrame) {
        let Some(callbacks) = self.callbacks.get(&decoded.id) else {
            return;
        };
        for (token, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(decoded))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::error!("callback {:?} for 0x{:X} failed: {:#}", token, decoded.id, e)
                }
                Err(_) => {
                    log::error!("callback {:?} for 0x{:X} panicked", token, decoded.id)
                }
            }
        }
    }

    /// Register a callback for one message identifier
    pub fn register_callback<F>(&mut self, id: u32, callback: F) -> CallbackId
    where
        F: Fn(&DecodedFrame) -> anyhow::Result<()> + Send + 'static,
    {
        let token = CallbackId(self.next_callback_id);
        self.next_callback_id += 1;
        self.callbacks
            .entry(id)
            .or_default()
            .push((token, Box::new(callback)));
        log::info!("registered callback {:?} for 0x{:X}", token, id);
        token
    }

    /// Remove a previously registered callback
    pub fn unregister_callback(&mut self, id: u32, token: CallbackId) -> bool {
        let Some(callbacks) = self.callbacks.get_mut(&id) else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|(t, _)| *t != token);
        before != callbacks.len()
    }

    /// Point-in-time statistics snapshot
    pub fn statistics(&self) -> EngineStats {
        self.lock_stats().snapshot()
    }

    /// Recent frames, optionally filtered by identifier, newest last
    pub fn message_history(&self, id: Option<u32>, limit: usize) -> Vec<DecodedFrame> {
        let matching: Vec<&DecodedFrame> = self
            .history
            .iter()
            .filter(|f| id.map_or(true, |id| f.id == id))
            .collect();
        matching
            .into_iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    /// Recent values of one signal as (time, value) pairs, newest last
    pub fn signal_history(&self, signal: &str, limit: usize) -> Vec<(Timestamp, SignalValue)> {
        let matching: Vec<(Timestamp, SignalValue)> = self
            .history
            .iter()
            .filter_map(|f| f.signals.get(signal).map(|v| (f.timestamp, v.clone())))
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).collect()
    }

    /// Atomically replace the catalog; frames already in flight keep the
    /// snapshot they started with.
    pub fn reload_catalog(&self, catalog: Catalog) {
        self.catalog.replace(catalog);
        log::info!("catalog reloaded");
    }

    /// Handle to the shared catalog (for engines on other channels)
    pub fn shared_catalog(&self) -> SharedCatalog {
        self.catalog.clone()
    }

    /// Stop the background monitor. In-flight frames are unaffected; safe to
    /// call more than once.
    pub fn shutdown(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.running.store(false, Ordering::Relaxed);
            let _ = monitor.handle.join();
            log::info!("statistics monitor stopped");
        }
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, StatsState> {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for FrameEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn the ~1 Hz statistics monitor. It only touches the shared counter
/// state and tolerates slightly stale reads.
fn spawn_monitor(stats: Arc<Mutex<StatsState>>) -> Monitor {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    let handle = thread::spawn(move || {
        while flag.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(200));
            if let Ok(mut state) = stats.lock() {
                state.roll_window(wall_seconds());
            }
        }
    });
    Monitor { running, handle }
}

/// Wall clock in seconds since the epoch
pub(crate) fn wall_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
