//! OSpRad serial command protocol.
//!
//! The device speaks a small ASCII protocol over a 115200-baud link.
//! Settings commands are a single letter plus a decimal argument and are
//! acknowledged with one line. A scan command (`r` for radiance, `i` for
//! irradiance) produces one comma-separated frame line:
//!
//! ```text
//! unit,seq,scans,int_time_ms,saturation,p0,...,p287
//! ```
//!
//! with 288 raw pixel counts against a 16-bit full scale. Framing beyond the
//! newline delimiter is not assumed; anything that does not parse as a frame
//! is a retryable fault handled by the session.

use crate::error::{OspradError, Result};
use crate::measurement::MeasurementType;

/// Number of detector pixels per frame.
pub const SENSOR_PIXELS: usize = 288;

/// Full-scale raw count of the 16-bit detector ADC.
pub const FULL_SCALE: f64 = 65535.0;

/// Serial link speed of the device.
pub const BAUD_RATE: u32 = 115_200;

/// Integration time limits accepted by the firmware, in milliseconds.
pub const MIN_INTEGRATION_MS: u32 = 1;
pub const MAX_INTEGRATION_MS: u32 = 10_000;

/// Scan-count limits accepted by the firmware.
pub const MIN_SCANS: u32 = 1;
pub const MAX_SCANS: u32 = 50;

pub const DEFAULT_MIN_SCANS: u32 = 3;
pub const DEFAULT_MAX_SCANS: u32 = 50;

/// `t<ms>` sets the integration time for subsequent scans.
pub fn set_integration(ms: u32) -> String {
    format!("t{ms}")
}

/// `n<count>` sets the firmware minimum-scans hint.
pub fn set_min_scans(count: u32) -> String {
    format!("n{count}")
}

/// `a<count>` sets the firmware maximum-scans hint.
pub fn set_max_scans(count: u32) -> String {
    format!("a{count}")
}

/// Single-letter scan trigger for the given measurement type.
pub fn scan_command(measurement_type: MeasurementType) -> &'static str {
    match measurement_type {
        MeasurementType::Radiance => "r",
        MeasurementType::Irradiance => "i",
    }
}

/// One parsed scan frame as reported by the firmware.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanFrame {
    /// Unit serial number baked into the device at calibration time.
    pub unit: u32,
    /// Frame sequence counter.
    pub seq: u32,
    /// Scans the firmware averaged into this frame.
    pub scans: u32,
    /// Integration time actually used, in milliseconds.
    pub integration_ms: u32,
    /// Fraction of pixels at full scale.
    pub saturation: f64,
    /// Raw detector counts, exactly [`SENSOR_PIXELS`] values.
    pub counts: Vec<f64>,
}

/// Parse one frame line. Any malformed field is a [`OspradError::DeviceFault`];
/// the caller decides whether to retry.
pub fn parse_frame(line: &str) -> Result<ScanFrame> {
    let fields: Vec<&str> = line.trim().split(',').collect();

    if fields.len() != 5 + SENSOR_PIXELS {
        return Err(OspradError::DeviceFault(format!(
            "scan frame has {} fields, expected {}",
            fields.len(),
            5 + SENSOR_PIXELS
        )));
    }

    let header_u32 = |idx: usize, name: &str| -> Result<u32> {
        fields[idx]
            .trim()
            .parse::<f64>()
            .map(|v| v as u32)
            .map_err(|_| {
                OspradError::DeviceFault(format!("unparseable {name} field: '{}'", fields[idx]))
            })
    };

    let unit = header_u32(0, "unit")?;
    let seq = header_u32(1, "seq")?;
    let scans = header_u32(2, "scans")?;
    let integration_ms = header_u32(3, "integration")?;
    let saturation = fields[4].trim().parse::<f64>().map_err(|_| {
        OspradError::DeviceFault(format!("unparseable saturation field: '{}'", fields[4]))
    })?;

    let mut counts = Vec::with_capacity(SENSOR_PIXELS);
    for raw in &fields[5..] {
        let value = raw.trim().parse::<f64>().map_err(|_| {
            OspradError::DeviceFault(format!("unparseable pixel count: '{raw}'"))
        })?;
        counts.push(value);
    }

    Ok(ScanFrame {
        unit,
        seq,
        scans,
        integration_ms,
        saturation,
        counts,
    })
}
