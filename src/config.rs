//! Layered settings for the device session, measurement engine and analysis
//! pipeline.
//!
//! Settings resolve in order: built-in defaults, then an optional TOML file,
//! then `OSPRAD_*` environment variables. All fields have defaults, so an
//! empty file (or none at all) yields a working configuration for the mock
//! device.
//!
//! ```toml
//! [device]
//! port = "/dev/ttyUSB0"
//! calibration_file = "calibration_data.csv"
//!
//! [engine]
//! stability_threshold = 0.005
//!
//! [analysis]
//! daylight_threshold_k = 5000.0
//! ```

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::engine::EngineTuning;
use crate::error::Result;
use crate::protocol;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub device: DeviceSettings,
    pub engine: EngineTuning,
    pub analysis: AnalysisSettings,
}

/// Transport and session timing knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Explicit serial port; `None` means discover exactly one candidate.
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Settling delay after opening the port, before the handshake.
    pub settle_ms: u64,
    /// Handshake attempts before `connect` gives up.
    pub handshake_retries: u32,
    /// Re-sends of the same command after a transport timeout.
    pub command_retries: u32,
    /// Re-requests after a malformed scan frame before forcing a disconnect.
    pub malformed_retries: u32,
    /// Deadline for a settings acknowledgement line.
    pub command_timeout_ms: u64,
    /// Default deadline for a whole `measure()` call when the caller passes
    /// no explicit timeout.
    pub measure_timeout_ms: u64,
    /// Path of the per-unit calibration CSV file.
    pub calibration_file: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: protocol::BAUD_RATE,
            settle_ms: 1000,
            handshake_retries: 3,
            command_retries: 2,
            malformed_retries: 3,
            command_timeout_ms: 1000,
            measure_timeout_ms: 120_000,
            calibration_file: "calibration_data.csv".to_string(),
        }
    }
}

/// Color-analysis choices that are policy, not math.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// CCT at or above which the CRI reference illuminant switches from a
    /// Planckian radiator to the CIE daylight model.
    pub daylight_threshold_k: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            daylight_threshold_k: 5000.0,
        }
    }
}

impl Settings {
    /// Build settings from defaults, an optional TOML file and the
    /// environment (`OSPRAD_DEVICE__PORT=...` style overrides).
    pub fn new(config_path: Option<&str>) -> Result<Self> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&Settings::default())?);

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        builder = builder.add_source(Environment::with_prefix("OSPRAD").separator("__"));

        Ok(builder.build()?.try_deserialize()?)
    }
}
