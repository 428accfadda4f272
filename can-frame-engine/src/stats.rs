//! Aggregate processing statistics
//!
//! Counters and rolling windows are owned by the engine and mutated only on
//! its thread; external readers get an [`EngineStats`] copy, never a live
//! reference. The per-second message rate is recomputed over 1-second
//! windows, normally by the engine's background monitor.

use serde::Serialize;
use std::collections::VecDeque;

use crate::types::FrameStatus;

/// Number of recent frames in the rolling latency window
const LATENCY_WINDOW: usize = 1000;

/// Point-in-time statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EngineStats {
    /// Total frames processed
    pub total_frames: u64,
    /// Frames returned with status `Valid`
    pub valid_frames: u64,
    /// Frames returned with any other status
    pub invalid_frames: u64,
    /// Decode ladder exhaustions (status `Error` via the ladder)
    pub decode_errors: u64,
    /// Frames whose payload length differed from the catalog length
    pub dlc_mismatches: u64,
    /// valid / total, in percent
    pub success_rate: f64,
    /// Rolling average processing latency in seconds
    pub average_processing_time: f64,
    /// Frames per second over the last completed 1-second window
    pub messages_per_second: f64,
}

/// Mutable counter state behind the engine
#[derive(Debug)]
pub(crate) struct StatsState {
    total_frames: u64,
    valid_frames: u64,
    invalid_frames: u64,
    decode_errors: u64,
    dlc_mismatches: u64,
    processing_times: VecDeque<f64>,
    window_count: u64,
    window_start: Option<f64>,
    messages_per_second: f64,
}

impl StatsState {
    pub(crate) fn new() -> Self {
        Self {
            total_frames: 0,
            valid_frames: 0,
            invalid_frames: 0,
            decode_errors: 0,
            dlc_mismatches: 0,
            processing_times: VecDeque::with_capacity(LATENCY_WINDOW),
            window_count: 0,
            window_start: None,
            messages_per_second: 0.0,
        }
    }

    /// Record the outcome of one processed frame
    pub(crate) fn record_frame(&mut self, status: FrameStatus, processing_time: f64, now: f64) {
        self.total_frames += 1;
        if status == FrameStatus::Valid {
            self.valid_frames += 1;
        } else {
            self.invalid_frames += 1;
        }

        if self.processing_times.len() == LATENCY_WINDOW {
            self.processing_times.pop_front();
        }
        self.processing_times.push_back(processing_time);

        if self.window_start.is_none() {
            self.window_start = Some(now);
        }
        self.window_count += 1;
    }

    pub(crate) fn note_dlc_mismatch(&mut self) {
        self.dlc_mismatches += 1;
    }

    pub(crate) fn note_decode_error(&mut self) {
        self.decode_errors += 1;
    }

    /// Close the current 1-second window if it has elapsed. Called by the
    /// background monitor; tolerates arbitrary cadence.
    pub(crate) fn roll_window(&mut self, now: f64) {
        if let Some(start) = self.window_start {
            let elapsed = now - start;
            if elapsed >= 1.0 {
                self.messages_per_second = self.window_count as f64 / elapsed;
                self.window_count = 0;
                self.window_start = Some(now);
            }
        }
    }

    /// Copy-on-read snapshot; derived values computed on demand
    pub(crate) fn snapshot(&self) -> EngineStats {
        let success_rate = if self.total_frames > 0 {
            self.valid_frames as f64 / self.total_frames as f64 * 100.0
        } else {
            0.0
        };
        let average_processing_time = if self.processing_times.is_empty() {
            0.0
        } else {
            self.processing_times.iter().sum::<f64>() / self.processing_times.len() as f64
        };
        EngineStats {
            total_frames: self.total_frames,
            valid_frames: self.valid_frames,
            invalid_frames: self.invalid_frames,
            decode_errors: self.decode_errors,
            dlc_mismatches: self.dlc_mismatches,
            success_rate,
            average_processing_time,
            messages_per_second: self.messages_per_second,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_success_rate() {
        let mut state = StatsState::new();
        state.record_frame(FrameStatus::Valid, 0.001, 0.0);
        state.record_frame(FrameStatus::Valid, 0.003, 0.1);
        state.record_frame(FrameStatus::Error, 0.002, 0.2);
        state.record_frame(FrameStatus::Invalid, 0.002, 0.3);

        let snap = state.snapshot();
        assert_eq!(snap.total_frames, 4);
        assert_eq!(snap.valid_frames, 2);
        assert_eq!(snap.invalid_frames, 2);
        assert!((snap.success_rate - 50.0).abs() < 1e-9);
        assert!((snap.average_processing_time - 0.002).abs() < 1e-9);
    }

    #[test]
    fn test_window_roll() {
        let mut state = StatsState::new();
        for i in 0..10 {
            state.record_frame(FrameStatus::Valid, 0.001, i as f64 * 0.1);
        }
        // Window not yet elapsed
        state.roll_window(0.5);
        assert_eq!(state.snapshot().messages_per_second, 0.0);

        state.roll_window(2.0);
        assert!((state.snapshot().messages_per_second - 5.0).abs() < 1e-9);

        // Next window with no traffic reports zero
        state.roll_window(3.0);
        assert_eq!(state.snapshot().messages_per_second, 0.0);
    }

    #[test]
    fn test_latency_window_bounded() {
        let mut state = StatsState::new();
        for _ in 0..(LATENCY_WINDOW + 100) {
            state.record_frame(FrameStatus::Valid, 1.0, 0.0);
        }
        assert_eq!(state.processing_times.len(), LATENCY_WINDOW);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = StatsState::new().snapshot();
        assert_eq!(snap.success_rate, 0.0);
        assert_eq!(snap.average_processing_time, 0.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut state = StatsState::new();
        state.record_frame(FrameStatus::Valid, 0.001, 0.0);
        state.note_dlc_mismatch();

        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(json["total_frames"], 1);
        assert_eq!(json["dlc_mismatches"], 1);
        assert_eq!(json["success_rate"], 100.0);
    }
}
