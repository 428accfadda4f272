//! Cross-message correlation dispatcher
//!
//! A publish/subscribe mechanism over decoded (channel, message, signal,
//! value, time) tuples. Rules are explicit predicate/handler pairs kept in
//! registration order; a panic inside either is caught and logged per tuple
//! and never stops delivery to other rules or later tuples.
//!
//! The domain rule pair lives in [`ObjectOfInterestCorrelator`]: an index
//! rule stores the current object-of-interest id per channel, and a position
//! rule derives the sibling message's expected signal names from that id and
//! publishes a projection-ready sample once both coordinates arrive.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::types::{DecodedFrame, FrameStatus, Timestamp};

/// One decoded signal observation
#[derive(Debug, Clone, PartialEq)]
pub struct SignalTuple {
    pub channel: u8,
    pub message: String,
    pub signal: String,
    pub value: f64,
    pub time: Timestamp,
}

/// Token identifying a registered rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleId(u64);

type Predicate = Box<dyn Fn(&SignalTuple) -> bool + Send>;
type Handler = Box<dyn FnMut(&SignalTuple) + Send>;

struct Rule {
    id: RuleId,
    predicate: Predicate,
    handler: Handler,
}

/// The rule registry and dispatch loop
#[derive(Default)]
pub struct CorrelationDispatcher {
    rules: Vec<Rule>,
    next_id: u64,
}

impl CorrelationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule; rules sharing a predicate outcome run in
    /// registration order.
    pub fn register<P, H>(&mut self, predicate: P, handler: H) -> RuleId
    where
        P: Fn(&SignalTuple) -> bool + Send + 'static,
        H: FnMut(&SignalTuple) + Send + 'static,
    {
        let id = RuleId(self.next_id);
        self.next_id += 1;
        self.rules.push(Rule {
            id,
            predicate: Box::new(predicate),
            handler: Box::new(handler),
        });
        id
    }

    /// Remove a rule by token
    pub fn unregister(&mut self, id: RuleId) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.id != id);
        before != self.rules.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Deliver one tuple to every rule, isolating panics per invocation
    pub fn dispatch(&mut self, tuple: &SignalTuple) {
        for rule in &mut self.rules {
            let matched = match catch_unwind(AssertUnwindSafe(|| (rule.predicate)(tuple))) {
                Ok(matched) => matched,
                Err(_) => {
                    log::error!(
                        "predicate of rule {:?} panicked on signal '{}'",
                        rule.id,
                        tuple.signal
                    );
                    continue;
                }
            };
            if !matched {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| (rule.handler)(tuple))).is_err() {
                log::error!(
                    "handler of rule {:?} panicked on signal '{}'",
                    rule.id,
                    tuple.signal
                );
            }
        }
    }
}

/// Fan a decoded frame out as one tuple per numeric signal. Frames that did
/// not decode cleanly carry nothing trustworthy and are skipped.
pub fn dispatch_frame(dispatcher: &mut CorrelationDispatcher, frame: &DecodedFrame) {
    if frame.status != FrameStatus::Valid {
        return;
    }
    for (name, value) in &frame.signals {
        let Some(value) = value.as_f64() else { continue };
        dispatcher.dispatch(&SignalTuple {
            channel: frame.channel,
            message: frame.name.clone(),
            signal: name.clone(),
            value,
            time: frame.timestamp,
        });
    }
}

/// Name derivation for per-object radar messages
///
/// The expected names are pure functions of the object id: the message is
/// `<message_prefix><id>`, the position signals are
/// `<signal_prefix><id><x_suffix>` / `<signal_prefix><id><y_suffix>`, with
/// the id zero-padded to `pad` digits (2 by default: object 3 -> "03").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectNaming {
    #[serde(default = "default_message_prefix")]
    pub message_prefix: String,
    #[serde(default = "default_signal_prefix")]
    pub signal_prefix: String,
    #[serde(default = "default_x_suffix")]
    pub x_suffix: String,
    #[serde(default = "default_y_suffix")]
    pub y_suffix: String,
    #[serde(default = "default_pad")]
    pub pad: usize,
}

fn default_message_prefix() -> String {
    "RadarObj".to_string()
}

fn default_signal_prefix() -> String {
    "Obj".to_string()
}

fn default_x_suffix() -> String {
    "_RelPosX".to_string()
}

fn default_y_suffix() -> String {
    "_RelPosY".to_string()
}

fn default_pad() -> usize {
    2
}

impl Default for ObjectNaming {
    fn default() -> Self {
        Self {
            message_prefix: default_message_prefix(),
            signal_prefix: default_signal_prefix(),
            x_suffix: default_x_suffix(),
            y_suffix: default_y_suffix(),
            pad: default_pad(),
        }
    }
}

impl ObjectNaming {
    /// Expected sibling message name for an object id
    pub fn message_name(&self, object_id: u32) -> String {
        format!("{}{:0w$}", self.message_prefix, object_id, w = self.pad)
    }

    /// Expected (X, Y) position signal names for an object id
    pub fn position_signal_names(&self, object_id: u32) -> (String, String) {
        let stem = format!("{}{:0w$}", self.signal_prefix, object_id, w = self.pad);
        (
            format!("{}{}", stem, self.x_suffix),
            format!("{}{}", stem, self.y_suffix),
        )
    }
}

/// Projection-ready output for the external geometric-projection collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProjectionSample {
    pub x: f64,
    pub y: f64,
    pub object_id: u32,
    pub time: Timestamp,
    pub valid: bool,
}

/// Configuration for the object-of-interest rule pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectOfInterestConfig {
    /// Message carrying the zero-based object index
    #[serde(default = "default_index_message")]
    pub index_message: String,
    /// Signal carrying the zero-based object index
    #[serde(default = "default_index_signal")]
    pub index_signal: String,
    #[serde(default)]
    pub naming: ObjectNaming,
}

fn default_index_message() -> String {
    "RadarStatus".to_string()
}

fn default_index_signal() -> String {
    "CipvIndex".to_string()
}

impl Default for ObjectOfInterestConfig {
    fn default() -> Self {
        Self {
            index_message: default_index_message(),
            index_signal: default_index_signal(),
            naming: ObjectNaming::default(),
        }
    }
}

#[derive(Default)]
struct PendingPosition {
    x: Option<f64>,
    y: Option<f64>,
    time: Timestamp,
}

struct OoiState {
    config: ObjectOfInterestConfig,
    current_id: HashMap<u8, u32>,
    pending: HashMap<u8, PendingPosition>,
    latest: HashMap<u8, ProjectionSample>,
    sink: Option<Box<dyn Fn(&ProjectionSample) + Send>>,
}

/// Links the object-of-interest index from one message to the position
/// signals of the dynamically named sibling message, per channel.
///
/// The stored id is `index + 1` (the index signal is zero-based). A position
/// update always reflects the id current when the position frame was
/// processed; when the id changes, any half-built position record is dropped
/// rather than reconciled retroactively.
#[derive(Clone)]
pub struct ObjectOfInterestCorrelator {
    state: Arc<Mutex<OoiState>>,
}

impl ObjectOfInterestCorrelator {
    pub fn new(config: ObjectOfInterestConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(OoiState {
                config,
                current_id: HashMap::new(),
                pending: HashMap::new(),
                latest: HashMap::new(),
                sink: None,
            })),
        }
    }

    /// Push published samples to an external consumer in addition to the
    /// polled per-channel latest sample. The sink must not call back into
    /// this correlator.
    pub fn set_sink<F>(&self, sink: F)
    where
        F: Fn(&ProjectionSample) + Send + 'static,
    {
        self.lock().sink = Some(Box::new(sink));
    }

    /// Register the index and position rules on a dispatcher
    pub fn attach(&self, dispatcher: &mut CorrelationDispatcher) -> (RuleId, RuleId) {
        let state = self.state.clone();
        let index_rule = dispatcher.register(
            {
                let state = state.clone();
                move |tuple: &SignalTuple| {
                    let state = lock_state(&state);
                    tuple.message == state.config.index_message
                        && tuple.signal == state.config.index_signal
                }
            },
            {
                let state = state.clone();
                move |tuple: &SignalTuple| {
                    // A cast would silently map NaN/negative indices to 0.
                    if !tuple.value.is_finite() || tuple.value < 0.0 {
                        log::warn!(
                            "channel {}: ignoring invalid object index {}",
                            tuple.channel,
                            tuple.value
                        );
                        return;
                    }
                    let mut state = lock_state(&state);
                    let id = tuple.value as u32 + 1;
                    let previous = state.current_id.insert(tuple.channel, id);
                    if previous != Some(id) {
                        // Id changed: a half-built position record would mix
                        // coordinates from two objects.
                        state.pending.remove(&tuple.channel);
                        log::debug!(
                            "channel {}: object of interest is now {}",
                            tuple.channel,
                            id
                        );
                    }
                }
            },
        );

        let position_rule = dispatcher.register(
            {
                let state = state.clone();
                move |tuple: &SignalTuple| {
                    let state = lock_state(&state);
                    let Some(&id) = state.current_id.get(&tuple.channel) else {
                        return false;
                    };
                    if tuple.message != state.config.naming.message_name(id) {
                        return false;
                    }
                    let (name_x, name_y) = state.config.naming.position_signal_names(id);
                    tuple.signal == name_x || tuple.signal == name_y
                }
            },
            move |tuple: &SignalTuple| {
                let mut state = lock_state(&state);
                let Some(&id) = state.current_id.get(&tuple.channel) else {
                    return;
                };
                let (name_x, _) = state.config.naming.position_signal_names(id);
                let pending = state.pending.entry(tuple.channel).or_default();
                if tuple.signal == name_x {
                    pending.x = Some(tuple.value);
                } else {
                    pending.y = Some(tuple.value);
                }
                pending.time = tuple.time;

                if let (Some(x), Some(y)) = (pending.x, pending.y) {
                    let sample = ProjectionSample {
                        x,
                        y,
                        object_id: id,
                        time: tuple.time,
                        valid: true,
                    };
                    state.pending.remove(&tuple.channel);
                    state.latest.insert(tuple.channel, sample);
                    if let Some(sink) = &state.sink {
                        sink(&sample);
                    }
                    log::debug!(
                        "channel {}: projection sample for object {} ({:.2}, {:.2})",
                        tuple.channel,
                        id,
                        x,
                        y
                    );
                }
            },
        );

        (index_rule, position_rule)
    }

    /// Current object-of-interest id for a channel
    pub fn current_object_id(&self, channel: u8) -> Option<u32> {
        self.lock().current_id.get(&channel).copied()
    }

    /// Latest published projection sample for a channel (polled interface)
    pub fn projection_sample(&self, channel: u8) -> Option<ProjectionSample> {
        self.lock().latest.get(&channel).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OoiState> {
        lock_state(&self.state)
    }
}

impl Default for ObjectOfInterestCorrelator {
    fn default() -> Self {
        Self::new(ObjectOfInterestConfig::default())
    }
}

fn lock_state(state: &Arc<Mutex<OoiState>>) -> std::sync::MutexGuard<'_, OoiState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tuple(channel: u8, message: &str, signal: &str, value: f64, time: f64) -> SignalTuple {
        SignalTuple {
            channel,
            message: message.to_string(),
            signal: signal.to_string(),
            value,
            time,
        }
    }

    #[test]
    fn test_dispatch_order_and_unregister() {
        let mut dispatcher = CorrelationDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_a = log.clone();
        let a = dispatcher.register(|_| true, move |_| log_a.lock().unwrap().push("a"));
        let log_b = log.clone();
        dispatcher.register(|_| true, move |_| log_b.lock().unwrap().push("b"));

        dispatcher.dispatch(&tuple(1, "M", "S", 1.0, 0.0));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);

        assert!(dispatcher.unregister(a));
        assert!(!dispatcher.unregister(a));
        dispatcher.dispatch(&tuple(1, "M", "S", 1.0, 0.1));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "b"]);
    }

    #[test]
    fn test_panicking_rule_is_isolated() {
        let mut dispatcher = CorrelationDispatcher::new();
        let hits = Arc::new(AtomicU32::new(0));

        dispatcher.register(|_| panic!("bad predicate"), |_| {});
        dispatcher.register(|_| true, |_| panic!("bad handler"));
        let hits_clone = hits.clone();
        dispatcher.register(
            |_| true,
            move |_| {
                hits_clone.fetch_add(1, Ordering::Relaxed);
            },
        );

        dispatcher.dispatch(&tuple(1, "M", "S", 1.0, 0.0));
        dispatcher.dispatch(&tuple(1, "M", "S", 2.0, 0.1));
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_naming_derivation() {
        let naming = ObjectNaming::default();
        assert_eq!(naming.message_name(3), "RadarObj03");
        assert_eq!(naming.message_name(12), "RadarObj12");
        let (x, y) = naming.position_signal_names(3);
        assert_eq!(x, "Obj03_RelPosX");
        assert_eq!(y, "Obj03_RelPosY");
    }

    #[test]
    fn test_index_then_position_publishes_sample() {
        let mut dispatcher = CorrelationDispatcher::new();
        let correlator = ObjectOfInterestCorrelator::default();
        correlator.attach(&mut dispatcher);

        // Zero-based index 2 -> object of interest id 3.
        dispatcher.dispatch(&tuple(1, "RadarStatus", "CipvIndex", 2.0, 1.0));
        assert_eq!(correlator.current_object_id(1), Some(3));
        assert!(correlator.projection_sample(1).is_none());

        dispatcher.dispatch(&tuple(1, "RadarObj03", "Obj03_RelPosX", 25.5, 1.1));
        assert!(correlator.projection_sample(1).is_none());
        dispatcher.dispatch(&tuple(1, "RadarObj03", "Obj03_RelPosY", -3.25, 1.2));

        let sample = correlator.projection_sample(1).unwrap();
        assert_eq!(sample.object_id, 3);
        assert_eq!(sample.x, 25.5);
        assert_eq!(sample.y, -3.25);
        assert_eq!(sample.time, 1.2);
        assert!(sample.valid);
    }

    #[test]
    fn test_invalid_index_values_ignored() {
        let mut dispatcher = CorrelationDispatcher::new();
        let correlator = ObjectOfInterestCorrelator::default();
        correlator.attach(&mut dispatcher);

        dispatcher.dispatch(&tuple(1, "RadarStatus", "CipvIndex", -1.0, 1.0));
        dispatcher.dispatch(&tuple(1, "RadarStatus", "CipvIndex", f64::NAN, 1.1));
        assert_eq!(correlator.current_object_id(1), None);

        // A bad index never clobbers an established id.
        dispatcher.dispatch(&tuple(1, "RadarStatus", "CipvIndex", 2.0, 1.2));
        dispatcher.dispatch(&tuple(1, "RadarStatus", "CipvIndex", -3.0, 1.3));
        assert_eq!(correlator.current_object_id(1), Some(3));
    }

    #[test]
    fn test_other_object_positions_ignored() {
        let mut dispatcher = CorrelationDispatcher::new();
        let correlator = ObjectOfInterestCorrelator::default();
        correlator.attach(&mut dispatcher);

        dispatcher.dispatch(&tuple(1, "RadarStatus", "CipvIndex", 2.0, 1.0));
        // Positions for a different object never match.
        dispatcher.dispatch(&tuple(1, "RadarObj05", "Obj05_RelPosX", 1.0, 1.1));
        dispatcher.dispatch(&tuple(1, "RadarObj05", "Obj05_RelPosY", 2.0, 1.2));
        assert!(correlator.projection_sample(1).is_none());
    }

    #[test]
    fn test_id_change_drops_pending() {
        let mut dispatcher = CorrelationDispatcher::new();
        let correlator = ObjectOfInterestCorrelator::default();
        correlator.attach(&mut dispatcher);

        dispatcher.dispatch(&tuple(1, "RadarStatus", "CipvIndex", 2.0, 1.0));
        dispatcher.dispatch(&tuple(1, "RadarObj03", "Obj03_RelPosX", 10.0, 1.1));

        // Id changes before Y arrives: the stale X must not pair with the
        // new object's Y.
        dispatcher.dispatch(&tuple(1, "RadarStatus", "CipvIndex", 4.0, 1.2));
        dispatcher.dispatch(&tuple(1, "RadarObj05", "Obj05_RelPosY", 20.0, 1.3));
        assert!(correlator.projection_sample(1).is_none());

        dispatcher.dispatch(&tuple(1, "RadarObj05", "Obj05_RelPosX", 15.0, 1.4));
        let sample = correlator.projection_sample(1).unwrap();
        assert_eq!(sample.object_id, 5);
        assert_eq!(sample.x, 15.0);
        assert_eq!(sample.y, 20.0);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut dispatcher = CorrelationDispatcher::new();
        let correlator = ObjectOfInterestCorrelator::default();
        correlator.attach(&mut dispatcher);

        dispatcher.dispatch(&tuple(1, "RadarStatus", "CipvIndex", 0.0, 1.0));
        dispatcher.dispatch(&tuple(2, "RadarStatus", "CipvIndex", 1.0, 1.0));
        assert_eq!(correlator.current_object_id(1), Some(1));
        assert_eq!(correlator.current_object_id(2), Some(2));

        dispatcher.dispatch(&tuple(1, "RadarObj01", "Obj01_RelPosX", 1.0, 1.1));
        dispatcher.dispatch(&tuple(1, "RadarObj01", "Obj01_RelPosY", 2.0, 1.2));
        assert!(correlator.projection_sample(1).is_some());
        assert!(correlator.projection_sample(2).is_none());
    }

    #[test]
    fn test_sink_receives_samples() {
        let mut dispatcher = CorrelationDispatcher::new();
        let correlator = ObjectOfInterestCorrelator::default();
        correlator.attach(&mut dispatcher);

        let published = Arc::new(Mutex::new(Vec::new()));
        let published_clone = published.clone();
        correlator.set_sink(move |sample| published_clone.lock().unwrap().push(*sample));

        dispatcher.dispatch(&tuple(1, "RadarStatus", "CipvIndex", 0.0, 1.0));
        dispatcher.dispatch(&tuple(1, "RadarObj01", "Obj01_RelPosX", 1.0, 1.1));
        dispatcher.dispatch(&tuple(1, "RadarObj01", "Obj01_RelPosY", 2.0, 1.2));

        let published = published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].object_id, 1);
    }
}
