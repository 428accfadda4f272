//! Run report generation
//!
//! Collects per-channel engine statistics, the tracked-object summary and
//! the latest projection sample into one report, printed as text or dumped
//! as JSON.

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use std::fs;
use std::path::Path;

use can_frame_engine::tracking::StoreSummary;
use can_frame_engine::{EngineStats, ProjectionSample};

/// Everything observed on one bus channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelReport {
    pub channel: u8,
    pub stats: EngineStats,
    pub store: StoreSummary,
    pub projection: Option<ProjectionSample>,
}

/// A complete run report
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated: String,
    pub channels: Vec<ChannelReport>,
}

impl RunReport {
    pub fn new(mut channels: Vec<ChannelReport>) -> Self {
        channels.sort_by_key(|c| c.channel);
        Self {
            generated: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            channels,
        }
    }

    fn title_line(&self) -> String {
        format!("  Frame Pipeline Report - {}", self.generated)
    }

    /// Print the human-readable report to stdout
    pub fn print_text(&self) {
        println!("═══════════════════════════════════════════════");
        println!("{}", self.title_line());
        println!("═══════════════════════════════════════════════");

        for report in &self.channels {
            println!("\nChannel {}", report.channel);
            println!("───────────────────────────────────────────────");
            let stats = &report.stats;
            println!("  Frames:          {}", stats.total_frames);
            println!(
                "  Valid/invalid:   {}/{}",
                stats.valid_frames, stats.invalid_frames
            );
            println!("  Decode errors:   {}", stats.decode_errors);
            println!("  DLC mismatches:  {}", stats.dlc_mismatches);
            println!("  Success rate:    {:.1}%", stats.success_rate);
            println!(
                "  Avg latency:     {:.1} µs",
                stats.average_processing_time * 1e6
            );

            let store = &report.store;
            println!("  Tracked objects: {}", store.object_count);
            match store.nearest_slot {
                Some(slot) => println!(
                    "  Nearest object:  slot {} at {:.2} m",
                    slot, store.nearest_distance
                ),
                None => println!("  Nearest object:  none"),
            }

            match &report.projection {
                Some(sample) => println!(
                    "  Object of interest: #{} at ({:.2}, {:.2})",
                    sample.object_id, sample.x, sample.y
                ),
                None => println!("  Object of interest: none"),
            }
        }
        println!();
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        fs::write(path, json).with_context(|| format!("Failed to write report: {:?}", path))?;
        log::info!("report written to {:?}", path);
        Ok(())
    }
}
