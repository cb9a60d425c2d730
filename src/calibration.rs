//! Per-unit calibration tables.
//!
//! Each OSpRad unit ships with a CSV calibration file holding rows of the
//! form `unit,key,v0,v1,...` where `key` is one of `wavCoef` (wavelength
//! polynomial, at least 6 coefficients), `radSens` / `irrSens` (per-pixel
//! sensitivity, 288 values each) and `linCoefs` (detector linearity model,
//! at least 2 coefficients). Rows are ragged, so parsing uses a flexible
//! CSV reader.
//!
//! A [`CalibrationStore`] is loaded once and immutable afterwards. The
//! wavelength grid, bin widths and luminous-efficiency weights are derived
//! at load time; absence of an entry for a connected unit surfaces as
//! `CalibrationMissing` at measure time, never as a silent default.

use std::collections::HashMap;
use std::path::Path;

use log::{debug, warn};

use crate::error::{OspradError, Result};
use crate::measurement::MeasurementType;
use crate::protocol::SENSOR_PIXELS;

/// Maximum luminous efficacy constant (lm/W) used for the photometric
/// integral.
pub const LUMINANCE_CONSTANT: f64 = 683.0;

/// Two-lobe asymmetric Gaussian model of the CIE luminous-efficiency curve,
/// as `[a1, mu1, sigma1_lo, sigma1_hi, a2, mu2, sigma2_lo, sigma2_hi]`.
pub const CIE_Y_COEFFICIENTS: [f64; 8] = [0.821, 568.8, 46.9, 40.5, 0.286, 530.9, 16.3, 31.1];

/// Calibration data for one unit, with derived grids precomputed.
#[derive(Clone, Debug)]
pub struct CalibrationTable {
    unit_number: u32,
    rad_sens: Vec<f64>,
    irr_sens: Vec<f64>,
    lin_coefs: Vec<f64>,
    wavelengths: Vec<f64>,
    bins: Vec<f64>,
    ciey: Vec<f64>,
}

impl CalibrationTable {
    fn build(
        unit_number: u32,
        wav_coef: Vec<f64>,
        rad_sens: Vec<f64>,
        irr_sens: Vec<f64>,
        lin_coefs: Vec<f64>,
    ) -> Result<Self> {
        if wav_coef.len() < 6 {
            return Err(OspradError::InvalidConfiguration(format!(
                "unit #{unit_number}: wavCoef needs at least 6 coefficients, got {}",
                wav_coef.len()
            )));
        }
        if rad_sens.len() != SENSOR_PIXELS || irr_sens.len() != SENSOR_PIXELS {
            return Err(OspradError::InvalidConfiguration(format!(
                "unit #{unit_number}: sensitivity rows must have {SENSOR_PIXELS} values"
            )));
        }
        if lin_coefs.len() < 2 {
            return Err(OspradError::InvalidConfiguration(format!(
                "unit #{unit_number}: linCoefs needs at least 2 coefficients"
            )));
        }

        // Wavelength per pixel from the calibration polynomial.
        let wavelengths: Vec<f64> = (0..SENSOR_PIXELS)
            .map(|i| {
                wav_coef
                    .iter()
                    .enumerate()
                    .map(|(j, c)| c * (i as f64).powi(j as i32))
                    .sum()
            })
            .collect();

        if wavelengths.windows(2).any(|w| w[1] <= w[0]) {
            return Err(OspradError::InvalidConfiguration(format!(
                "unit #{unit_number}: wavelength polynomial is not strictly increasing"
            )));
        }

        // Forward-difference bin widths, last bin repeated.
        let mut bins: Vec<f64> = wavelengths.windows(2).map(|w| w[1] - w[0]).collect();
        let last = *bins.last().unwrap_or(&1.0);
        bins.push(last);

        let ciey = wavelengths.iter().map(|&wl| luminous_efficiency(wl)).collect();

        Ok(Self {
            unit_number,
            rad_sens,
            irr_sens,
            lin_coefs,
            wavelengths,
            bins,
            ciey,
        })
    }

    /// Synthetic table for mock workflows and tests: linear 350–848 nm grid,
    /// unity sensitivity, near-identity linearity model.
    pub fn synthetic(unit_number: u32) -> Self {
        let wav_coef = vec![350.0, 1.7361, 0.0, 0.0, 0.0, 0.0];
        match Self::build(
            unit_number,
            wav_coef,
            vec![1.0; SENSOR_PIXELS],
            vec![1.0; SENSOR_PIXELS],
            vec![1.0, std::f64::consts::E],
        ) {
            Ok(table) => table,
            Err(_) => unreachable!("synthetic calibration is statically valid"),
        }
    }

    pub fn unit_number(&self) -> u32 {
        self.unit_number
    }

    /// The device's native wavelength grid in nm.
    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    /// Per-pixel wavelength bin widths in nm.
    pub fn bins(&self) -> &[f64] {
        &self.bins
    }

    fn sensitivity(&self, measurement_type: MeasurementType) -> &[f64] {
        match measurement_type {
            MeasurementType::Radiance => &self.rad_sens,
            MeasurementType::Irradiance => &self.irr_sens,
        }
    }

    /// Convert averaged raw counts to calibrated spectral values and the
    /// integrated photometric scalar (luminance or illuminance).
    ///
    /// The detector linearity multiplier is `lin0·ln((c+1)·lin1)`, mirrored
    /// for negative counts; each corrected count is then scaled by pixel
    /// sensitivity, integration time and bin width. Pixels with non-positive
    /// sensitivity are dead and stay zero. The photometric scalar is the
    /// luminous-efficiency-weighted sum over the grid times
    /// [`LUMINANCE_CONSTANT`]; it is a fixed weighted sum, reproducible
    /// bit-for-bit for identical input.
    pub fn correct(
        &self,
        counts: &[f64],
        integration_ms: u32,
        measurement_type: MeasurementType,
    ) -> Result<(Vec<f64>, f64)> {
        if counts.len() != SENSOR_PIXELS {
            return Err(OspradError::MalformedSpectrum(format!(
                "expected {SENSOR_PIXELS} counts, got {}",
                counts.len()
            )));
        }
        if integration_ms == 0 {
            return Err(OspradError::InvalidConfiguration(
                "cannot correct a scan with zero integration time".to_string(),
            ));
        }

        let sensitivity = self.sensitivity(measurement_type);
        let t = integration_ms as f64;
        let (lin0, lin1) = (self.lin_coefs[0], self.lin_coefs[1]);

        let mut spectral = vec![0.0; SENSOR_PIXELS];
        let mut photometric = 0.0;

        for i in 0..SENSOR_PIXELS {
            if sensitivity[i] <= 0.0 {
                continue;
            }

            let c = counts[i];
            let lin_mult = if c > 0.0 {
                lin0 * ((c + 1.0) * lin1).ln()
            } else {
                -lin0 * ((-c + 1.0) * lin1).ln()
            };
            if lin_mult == 0.0 {
                continue;
            }

            spectral[i] = (c / lin_mult) / (sensitivity[i] * t * self.bins[i]);
            photometric += spectral[i] * self.bins[i] * self.ciey[i];
        }

        Ok((spectral, photometric * LUMINANCE_CONSTANT))
    }
}

/// CIE luminous-efficiency approximation at a wavelength in nm.
fn luminous_efficiency(wl: f64) -> f64 {
    let c = &CIE_Y_COEFFICIENTS;
    let lobe = |a: f64, mu: f64, sigma_lo: f64, sigma_hi: f64| {
        let sigma = if wl < mu { sigma_lo } else { sigma_hi };
        a * (-0.5 * ((wl - mu) / sigma).powi(2)).exp()
    };
    lobe(c[0], c[1], c[2], c[3]) + lobe(c[4], c[5], c[6], c[7])
}

/// All calibration tables found in one calibration file, keyed by unit.
#[derive(Clone, Debug, Default)]
pub struct CalibrationStore {
    tables: HashMap<u32, CalibrationTable>,
}

impl CalibrationStore {
    /// Load every unit present in a calibration CSV file. Units with
    /// incomplete or invalid rows are skipped with a warning; a missing or
    /// unreadable file is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        #[derive(Default)]
        struct Rows {
            wav_coef: Vec<f64>,
            rad_sens: Vec<f64>,
            irr_sens: Vec<f64>,
            lin_coefs: Vec<f64>,
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path.as_ref())?;

        let mut pending: HashMap<u32, Rows> = HashMap::new();

        for record in reader.records() {
            let record = record?;
            let Some(unit) = record.get(0).and_then(|f| f.trim().parse::<u32>().ok()) else {
                // Header or comment row.
                continue;
            };
            let Some(key) = record.get(1) else {
                continue;
            };

            let values: Vec<f64> = record
                .iter()
                .skip(2)
                .filter(|f| !f.trim().is_empty())
                .filter_map(|f| f.trim().parse::<f64>().ok())
                .collect();

            let rows = pending.entry(unit).or_default();
            match key.trim() {
                "wavCoef" => rows.wav_coef = values,
                "radSens" => rows.rad_sens = values,
                "irrSens" => rows.irr_sens = values,
                "linCoefs" => rows.lin_coefs = values,
                other => debug!("Ignoring unknown calibration row '{other}' for unit #{unit}"),
            }
        }

        let mut tables = HashMap::new();
        for (unit, rows) in pending {
            match CalibrationTable::build(
                unit,
                rows.wav_coef,
                rows.rad_sens,
                rows.irr_sens,
                rows.lin_coefs,
            ) {
                Ok(table) => {
                    tables.insert(unit, table);
                }
                Err(e) => warn!("Skipping calibration for unit #{unit}: {e}"),
            }
        }

        debug!("Loaded calibration for {} unit(s)", tables.len());
        Ok(Self { tables })
    }

    /// Store holding a single prebuilt table.
    pub fn with_table(table: CalibrationTable) -> Self {
        let mut tables = HashMap::new();
        tables.insert(table.unit_number(), table);
        Self { tables }
    }

    /// Deterministic lookup by unit serial number. `None` means the unit is
    /// unregistered; callers decide whether that is `CalibrationMissing`.
    pub fn lookup(&self, unit_number: u32) -> Option<&CalibrationTable> {
        self.tables.get(&unit_number)
    }

    pub fn units(&self) -> Vec<u32> {
        let mut units: Vec<u32> = self.tables.keys().copied().collect();
        units.sort_unstable();
        units
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(unit: u32) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let join = |v: f64| {
            std::iter::repeat(v.to_string())
                .take(SENSOR_PIXELS)
                .collect::<Vec<_>>()
                .join(",")
        };
        writeln!(file, "unit,key,values").unwrap();
        writeln!(file, "{unit},wavCoef,350.0,1.7361,0,0,0,0").unwrap();
        writeln!(file, "{unit},radSens,{}", join(0.8)).unwrap();
        writeln!(file, "{unit},irrSens,{}", join(0.5)).unwrap();
        writeln!(file, "{unit},linCoefs,1.0,2.718281828").unwrap();
        file
    }

    #[test]
    fn test_load_and_lookup() {
        let file = write_fixture(12);
        let store = CalibrationStore::load(file.path()).unwrap();
        assert_eq!(store.units(), vec![12]);

        let table = store.lookup(12).unwrap();
        assert_eq!(table.wavelengths().len(), SENSOR_PIXELS);
        assert!((table.wavelengths()[0] - 350.0).abs() < 1e-9);
        assert!(table.wavelengths().windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_lookup_unregistered_unit_is_none() {
        let file = write_fixture(12);
        let store = CalibrationStore::load(file.path()).unwrap();
        assert!(store.lookup(99).is_none());
    }

    #[test]
    fn test_incomplete_unit_is_skipped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "5,wavCoef,350.0,1.7361,0,0,0,0").unwrap();
        writeln!(file, "5,linCoefs,1.0,2.7").unwrap();
        let store = CalibrationStore::load(file.path()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_correct_flat_counts() {
        let table = CalibrationTable::synthetic(1);
        let counts = vec![1000.0; SENSOR_PIXELS];
        let (spectral, photometric) = table
            .correct(&counts, 100, MeasurementType::Radiance)
            .unwrap();
        assert_eq!(spectral.len(), SENSOR_PIXELS);
        assert!(spectral.iter().all(|&v| v > 0.0));
        assert!(photometric > 0.0);
    }

    #[test]
    fn test_correct_is_deterministic() {
        let table = CalibrationTable::synthetic(1);
        let counts: Vec<f64> = (0..SENSOR_PIXELS).map(|i| 10.0 + i as f64).collect();
        let a = table
            .correct(&counts, 50, MeasurementType::Irradiance)
            .unwrap();
        let b = table
            .correct(&counts, 50, MeasurementType::Irradiance)
            .unwrap();
        assert_eq!(a.0, b.0);
        assert_eq!(a.1.to_bits(), b.1.to_bits());
    }

    #[test]
    fn test_luminous_efficiency_peaks_mid_visible() {
        assert!(luminous_efficiency(555.0) > luminous_efficiency(450.0));
        assert!(luminous_efficiency(555.0) > luminous_efficiency(700.0));
        assert!(luminous_efficiency(380.0) < 0.05);
    }
}
