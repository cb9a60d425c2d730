//! Spectral shape descriptors: peak, centroid, FWHM and summary statistics.

use serde::{Deserialize, Serialize};

use crate::error::{OspradError, Result};
use crate::measurement::Spectrum;

/// Shape descriptors of a spectrum.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ShapeAnalysis {
    /// Wavelength of the highest sample, nm.
    pub peak_wavelength: f64,
    /// Value of the highest sample.
    pub peak_value: f64,
    /// Intensity-weighted mean wavelength, nm.
    pub centroid_wavelength: f64,
    /// Full width at half maximum around the peak, nm. `None` when a
    /// half-maximum crossing is missing on either side (e.g. a spectrum
    /// still rising at the edge of the grid).
    pub fwhm: Option<f64>,
    /// Mean of the spectral values.
    pub mean: f64,
    /// Population standard deviation of the spectral values.
    pub std_dev: f64,
    /// Smallest spectral value.
    pub min: f64,
    /// Largest spectral value.
    pub max: f64,
}

/// Compute shape descriptors for a spectrum.
///
/// Reports `DegenerateSpectrum` when the spectrum is empty or carries no
/// energy above its own baseline.
pub fn analyze_shape(spectrum: &Spectrum) -> Result<ShapeAnalysis> {
    let wavelengths = spectrum.wavelengths();
    let values = spectrum.values();
    if values.is_empty() {
        return Err(OspradError::DegenerateSpectrum);
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let mut peak_index = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[peak_index] {
            peak_index = i;
        }
    }
    let peak_value = values[peak_index];

    // Centroid and FWHM are taken above the spectrum's own baseline so a
    // broadband offset does not wash them out.
    let baseline = min;
    let weight_sum: f64 = values.iter().map(|v| v - baseline).sum();
    if weight_sum < 1e-12 {
        return Err(OspradError::DegenerateSpectrum);
    }
    let centroid = wavelengths
        .iter()
        .zip(values)
        .map(|(wl, v)| wl * (v - baseline))
        .sum::<f64>()
        / weight_sum;

    let half = baseline + (peak_value - baseline) / 2.0;
    let fwhm = match (
        crossing_below(wavelengths, values, peak_index, half),
        crossing_above(wavelengths, values, peak_index, half),
    ) {
        (Some(left), Some(right)) => Some(right - left),
        _ => None,
    };

    Ok(ShapeAnalysis {
        peak_wavelength: wavelengths[peak_index],
        peak_value,
        centroid_wavelength: centroid,
        fwhm,
        mean,
        std_dev: variance.sqrt(),
        min,
        max,
    })
}

/// Walk left from the peak to the first half-maximum crossing, interpolating
/// linearly between the straddling samples.
fn crossing_below(wavelengths: &[f64], values: &[f64], peak: usize, half: f64) -> Option<f64> {
    for i in (0..peak).rev() {
        if values[i] <= half {
            return Some(interpolate_crossing(
                wavelengths[i],
                values[i],
                wavelengths[i + 1],
                values[i + 1],
                half,
            ));
        }
    }
    None
}

/// Walk right from the peak to the first half-maximum crossing.
fn crossing_above(wavelengths: &[f64], values: &[f64], peak: usize, half: f64) -> Option<f64> {
    for i in peak + 1..values.len() {
        if values[i] <= half {
            return Some(interpolate_crossing(
                wavelengths[i - 1],
                values[i - 1],
                wavelengths[i],
                values[i],
                half,
            ));
        }
    }
    None
}

fn interpolate_crossing(wl_a: f64, v_a: f64, wl_b: f64, v_b: f64, half: f64) -> f64 {
    if (v_b - v_a).abs() < 1e-12 {
        return (wl_a + wl_b) / 2.0;
    }
    wl_a + (half - v_a) / (v_b - v_a) * (wl_b - wl_a)
}
