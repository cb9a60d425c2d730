//! Measurement value objects: [`Spectrum`], [`MeasurementResult`] and
//! [`MeasurementType`].
//!
//! Both value objects are immutable once produced. A `Spectrum` validates its
//! wavelength grid at construction, after which the color pipeline may read
//! it from any number of tasks without synchronization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OspradError, Result};

/// Kind of spectral measurement. One session handles both; the type is
/// threaded through `measure()` rather than split into separate drivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementType {
    Radiance,
    Irradiance,
}

impl MeasurementType {
    /// Unit of the per-wavelength spectral values.
    pub fn spectral_unit(&self) -> &'static str {
        match self {
            MeasurementType::Radiance => "W/(sr·m²·nm)",
            MeasurementType::Irradiance => "W/(m²·nm)",
        }
    }

    /// Unit of the integrated photometric scalar.
    pub fn photometric_unit(&self) -> &'static str {
        match self {
            MeasurementType::Radiance => "cd/m²",
            MeasurementType::Irradiance => "lux",
        }
    }
}

impl std::fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeasurementType::Radiance => write!(f, "radiance"),
            MeasurementType::Irradiance => write!(f, "irradiance"),
        }
    }
}

/// An ordered sequence of (wavelength nm, spectral value) pairs with a
/// strictly increasing wavelength grid. Immutable after construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    wavelengths: Vec<f64>,
    values: Vec<f64>,
}

impl Spectrum {
    /// Build a spectrum, validating the grid invariants.
    pub fn new(wavelengths: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        if wavelengths.len() != values.len() {
            return Err(OspradError::MalformedSpectrum(format!(
                "{} wavelengths but {} values",
                wavelengths.len(),
                values.len()
            )));
        }
        if wavelengths.is_empty() {
            return Err(OspradError::MalformedSpectrum("empty spectrum".to_string()));
        }
        if wavelengths.windows(2).any(|w| w[1] <= w[0]) {
            return Err(OspradError::MalformedSpectrum(
                "wavelengths must be strictly increasing".to_string(),
            ));
        }
        Ok(Self {
            wavelengths,
            values,
        })
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.wavelengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelengths.is_empty()
    }

    /// Iterate (wavelength, value) pairs.
    pub fn samples(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.wavelengths
            .iter()
            .copied()
            .zip(self.values.iter().copied())
    }
}

/// Result of one successful `measure()` call. Read-only thereafter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeasurementResult {
    pub spectrum: Spectrum,
    pub measurement_type: MeasurementType,
    /// Luminance (cd/m²) for radiance, illuminance (lux) for irradiance.
    pub photometric: f64,
    /// Scans actually averaged; always within the configured bounds.
    pub num_scans: u32,
    /// Integration time actually used, in milliseconds.
    pub integration_time_ms: u32,
    /// Highest saturated-pixel fraction seen across the averaged scans.
    pub saturation: f64,
    /// Averaged raw detector counts before calibration correction.
    pub raw_counts: Vec<f64>,
    /// Serial number of the measured unit.
    pub unit_number: u32,
    pub timestamp: DateTime<Utc>,
}

impl MeasurementResult {
    /// Luminance in cd/m², present only for radiance measurements.
    pub fn luminance(&self) -> Option<f64> {
        match self.measurement_type {
            MeasurementType::Radiance => Some(self.photometric),
            MeasurementType::Irradiance => None,
        }
    }

    /// Illuminance in lux, present only for irradiance measurements.
    pub fn illuminance(&self) -> Option<f64> {
        match self.measurement_type {
            MeasurementType::Irradiance => Some(self.photometric),
            MeasurementType::Radiance => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spectrum_rejects_unsorted_grid() {
        let err = Spectrum::new(vec![400.0, 400.0, 410.0], vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, OspradError::MalformedSpectrum(_)));
    }

    #[test]
    fn test_spectrum_rejects_length_mismatch() {
        let err = Spectrum::new(vec![400.0, 410.0], vec![1.0]).unwrap_err();
        assert!(matches!(err, OspradError::MalformedSpectrum(_)));
    }

    #[test]
    fn test_spectrum_samples() {
        let s = Spectrum::new(vec![400.0, 410.0], vec![1.0, 2.0]).unwrap();
        let pairs: Vec<_> = s.samples().collect();
        assert_eq!(pairs, vec![(400.0, 1.0), (410.0, 2.0)]);
    }

    #[test]
    fn test_photometric_accessors() {
        let s = Spectrum::new(vec![400.0, 410.0], vec![1.0, 2.0]).unwrap();
        let result = MeasurementResult {
            spectrum: s,
            measurement_type: MeasurementType::Radiance,
            photometric: 120.0,
            num_scans: 3,
            integration_time_ms: 100,
            saturation: 0.0,
            raw_counts: vec![],
            unit_number: 1,
            timestamp: Utc::now(),
        };
        assert_eq!(result.luminance(), Some(120.0));
        assert_eq!(result.illuminance(), None);
    }
}
