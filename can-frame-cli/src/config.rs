//! Configuration loading and parsing

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use can_frame_engine::correlate::ObjectOfInterestConfig;
use can_frame_engine::{Catalog, EngineConfig, MessageDefinition};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    /// Message catalog, one `[[catalog]]` table per message
    #[serde(default)]
    pub catalog: Vec<MessageDefinition>,
    /// Recorded frames to replay, one `[[replay]]` table per frame
    #[serde(default)]
    pub replay: Vec<ReplayFrame>,
    #[serde(default)]
    pub correlation: ObjectOfInterestConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

/// One recorded frame: payload as a hex string ("0102ff...")
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplayFrame {
    pub channel: u8,
    pub id: u32,
    pub data: String,
    pub time: f64,
}

impl ReplayFrame {
    /// Parse the hex payload; whitespace between bytes is tolerated
    pub fn payload(&self) -> Result<Vec<u8>> {
        let compact: String = self.data.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.len() % 2 != 0 {
            bail!("odd number of hex digits in payload '{}'", self.data);
        }
        (0..compact.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&compact[i..i + 2], 16)
                    .with_context(|| format!("invalid hex payload '{}'", self.data))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackingConfig {
    /// Objects not refreshed within this many seconds are evicted
    #[serde(default = "default_max_age")]
    pub max_age_seconds: f64,
}

fn default_max_age() -> f64 {
    1.0
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_age_seconds: default_max_age(),
        }
    }
}

impl AppConfig {
    /// Build the catalog from the configured message definitions
    pub fn build_catalog(&self) -> Result<Catalog> {
        let mut catalog = Catalog::new();
        for message in &self.catalog {
            catalog
                .add_message(message.clone())
                .with_context(|| format!("invalid catalog entry '{}'", message.name))?;
        }
        Ok(catalog)
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [engine]
        use_default_on_decode_error = true
        frequency_monitoring = false

        [tracking]
        max_age_seconds = 0.5

        [[catalog]]
        id = 200
        name = "RadarStatus"
        length = 2
        cycle_time_ms = 50.0

        [[catalog.signals]]
        name = "CipvIndex"
        start_bit = 0
        length = 8

        [[replay]]
        channel = 1
        id = 200
        data = "02 00"
        time = 1.0
    "#;

    #[test]
    fn test_config_deserialization() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        assert!(config.engine.use_default_on_decode_error);
        assert!(!config.engine.frequency_monitoring);
        assert_eq!(config.tracking.max_age_seconds, 0.5);
        assert_eq!(config.catalog.len(), 1);
        assert_eq!(config.replay.len(), 1);
        assert_eq!(config.correlation.index_signal, "CipvIndex");

        let catalog = config.build_catalog().unwrap();
        assert_eq!(catalog.stats().num_messages, 1);
    }

    #[test]
    fn test_defaults_from_empty_config() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.engine.dlc_validation);
        assert!(config.catalog.is_empty());
        assert_eq!(config.tracking.max_age_seconds, 1.0);
    }

    #[test]
    fn test_payload_parsing() {
        let frame = ReplayFrame {
            channel: 1,
            id: 200,
            data: "02 00 ff".to_string(),
            time: 0.0,
        };
        assert_eq!(frame.payload().unwrap(), vec![0x02, 0x00, 0xFF]);

        let bad = ReplayFrame {
            channel: 1,
            id: 200,
            data: "02f".to_string(),
            time: 0.0,
        };
        assert!(bad.payload().is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.replay[0].payload().unwrap(), vec![0x02, 0x00]);
    }

    #[test]
    fn test_missing_file_is_contextual_error() {
        let err = load_config(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read config file"));
    }
}
