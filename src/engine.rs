//! Measurement engine: exposure search, scan averaging and calibration
//! correction.
//!
//! The engine turns the session's [`Configuration`](crate::session::Configuration)
//! into physical scans:
//!
//! 1. With `integration_time_ms == 0` it performs an exposure search — probe
//!    scan, peak fraction against full scale, proportional rescale toward
//!    the target band, bounded iterations, closest fit accepted on
//!    exhaustion. An explicit integration time is used directly.
//! 2. Scans accumulate until `min_scans` is reached *and* the successive-scan
//!    RMS deviation drops below the stability threshold, or `max_scans` is
//!    reached. This is a simple two-sided bound, not a statistical stopping
//!    rule; the threshold is configurable.
//! 3. The averaged raw scan is corrected through the unit's calibration
//!    table. A unit absent from the store fails the measurement with
//!    `CalibrationMissing` rather than returning uncorrected data.

use std::time::Duration;

use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{OspradError, Result};
use crate::measurement::{MeasurementResult, MeasurementType, Spectrum};
use crate::protocol::{FULL_SCALE, MAX_INTEGRATION_MS, MIN_INTEGRATION_MS, SENSOR_PIXELS};
use crate::session::DeviceSession;

/// Tunable acquisition parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineTuning {
    /// Probe scans allowed before the exposure search settles for the
    /// closest fit found.
    pub probe_iterations: u32,
    /// Initial probe integration time in milliseconds.
    pub probe_integration_ms: u32,
    /// Target band for the peak sample, as fractions of full scale.
    pub target_low: f64,
    pub target_high: f64,
    /// Successive-scan RMS deviation (of full scale) below which the
    /// averaging loop may stop once `min_scans` is reached.
    pub stability_threshold: f64,
    /// Read-deadline headroom added on top of the integration time for each
    /// scan exchange.
    pub scan_timeout_margin_ms: u64,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            probe_iterations: 8,
            probe_integration_ms: 20,
            target_low: 0.70,
            target_high: 0.95,
            stability_threshold: 0.005,
            scan_timeout_margin_ms: 500,
        }
    }
}

/// Highest sample as a fraction of the detector full scale.
pub(crate) fn peak_fraction(counts: &[f64]) -> f64 {
    counts.iter().cloned().fold(0.0, f64::max) / FULL_SCALE
}

/// Proportional rescale of the integration time toward the middle of the
/// target band, clamped to the firmware limits. A dark probe jumps straight
/// to the maximum exposure.
pub(crate) fn next_integration(current: u32, peak: f64, tuning: &EngineTuning) -> u32 {
    let target_mid = (tuning.target_low + tuning.target_high) / 2.0;
    let scaled = if peak <= 1e-6 {
        f64::from(MAX_INTEGRATION_MS)
    } else {
        f64::from(current) * (target_mid / peak)
    };
    (scaled.round() as u32).clamp(MIN_INTEGRATION_MS, MAX_INTEGRATION_MS)
}

/// RMS difference between two scans, normalised to full scale.
pub(crate) fn rms_delta(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return f64::INFINITY;
    }
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| ((x - y) / FULL_SCALE).powi(2))
        .sum();
    (sum / n as f64).sqrt()
}

impl DeviceSession {
    pub(crate) async fn run_measurement(
        &mut self,
        measurement_type: MeasurementType,
    ) -> Result<MeasurementResult> {
        let unit = self.unit_number.ok_or(OspradError::NotConnected)?;
        let table = self
            .calibration
            .lookup(unit)
            .cloned()
            .ok_or(OspradError::CalibrationMissing(unit))?;

        let config = self.config;
        self.ensure_scan_hints(config.min_scans, config.max_scans)
            .await?;

        let integration = if config.integration_time_ms == 0 {
            self.search_exposure(measurement_type).await?
        } else {
            config
                .integration_time_ms
                .clamp(MIN_INTEGRATION_MS, MAX_INTEGRATION_MS)
        };
        self.ensure_integration(integration).await?;

        let timeout = self.scan_timeout(integration);
        let mut sum = vec![0.0; SENSOR_PIXELS];
        let mut previous: Option<Vec<f64>> = None;
        let mut scans = 0u32;
        let mut saturation: f64 = 0.0;
        let mut actual_integration = integration;

        while scans < config.max_scans {
            let frame = self.acquire_scan(measurement_type, timeout).await?;
            scans += 1;
            saturation = saturation.max(frame.saturation);
            actual_integration = frame.integration_ms;
            for (acc, &c) in sum.iter_mut().zip(&frame.counts) {
                *acc += c;
            }

            let stable = previous
                .as_deref()
                .map(|prev| rms_delta(prev, &frame.counts) < self.tuning.stability_threshold)
                .unwrap_or(false);
            previous = Some(frame.counts);

            if scans >= config.min_scans && stable {
                debug!("Scan average stable after {scans} scans");
                break;
            }
        }

        let averaged: Vec<f64> = sum.iter().map(|v| v / f64::from(scans)).collect();
        let (spectral, photometric) =
            table.correct(&averaged, actual_integration, measurement_type)?;
        let spectrum = Spectrum::new(table.wavelengths().to_vec(), spectral)?;

        Ok(MeasurementResult {
            spectrum,
            measurement_type,
            photometric,
            num_scans: scans,
            integration_time_ms: actual_integration,
            saturation,
            raw_counts: averaged,
            unit_number: unit,
            timestamp: Utc::now(),
        })
    }

    fn scan_timeout(&self, integration_ms: u32) -> Duration {
        Duration::from_millis(u64::from(integration_ms) + self.tuning.scan_timeout_margin_ms)
    }

    /// Exposure search for auto-ranging. Terminates within
    /// `probe_iterations` probes; also stops early when clamping at a device
    /// limit makes no further progress possible.
    async fn search_exposure(&mut self, measurement_type: MeasurementType) -> Result<u32> {
        let tuning = self.tuning;
        let target_mid = (tuning.target_low + tuning.target_high) / 2.0;
        let mut t = tuning
            .probe_integration_ms
            .clamp(MIN_INTEGRATION_MS, MAX_INTEGRATION_MS);
        let mut best = (t, f64::INFINITY);

        for iteration in 1..=tuning.probe_iterations.max(1) {
            self.ensure_integration(t).await?;
            let frame = self
                .acquire_scan(measurement_type, self.scan_timeout(t))
                .await?;
            let peak = peak_fraction(&frame.counts);
            debug!("Exposure probe {iteration}: {t} ms -> peak {peak:.3} of full scale");

            if peak >= tuning.target_low && peak <= tuning.target_high {
                return Ok(t);
            }

            let distance = (peak - target_mid).abs();
            if distance < best.1 {
                best = (t, distance);
            }

            let next = next_integration(t, peak, &tuning);
            if next == t {
                // Clamped at a device limit; no further progress possible.
                break;
            }
            t = next;
        }

        debug!("Exposure search exhausted; accepting closest fit {} ms", best.0);
        Ok(best.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_fraction() {
        let counts = vec![0.0, 32767.5, 655.35];
        assert!((peak_fraction(&counts) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_next_integration_scales_toward_band() {
        let tuning = EngineTuning::default();
        // Underexposed by 10x: integration grows.
        let next = next_integration(100, 0.0825, &tuning);
        assert_eq!(next, 1000);
        // Overexposed: integration shrinks.
        let next = next_integration(1000, 0.99, &tuning);
        assert!(next < 1000);
    }

    #[test]
    fn test_next_integration_clamps_at_limits() {
        let tuning = EngineTuning::default();
        assert_eq!(next_integration(5000, 1e-9, &tuning), MAX_INTEGRATION_MS);
        assert_eq!(next_integration(1, 500.0, &tuning), MIN_INTEGRATION_MS);
    }

    #[test]
    fn test_rms_delta() {
        let a = vec![100.0; 4];
        let b = vec![100.0; 4];
        assert_eq!(rms_delta(&a, &b), 0.0);

        let c = vec![100.0 + FULL_SCALE * 0.01; 4];
        assert!((rms_delta(&a, &c) - 0.01).abs() < 1e-9);

        assert!(rms_delta(&[], &[]).is_infinite());
    }
}
