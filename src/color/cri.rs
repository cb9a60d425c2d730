//! Color Rendering Index (CRI) — simplified CIE 13.3 test-colour method.
//!
//! This is explicitly a simplified approximation, not a certified
//! colorimetric implementation:
//!
//! - The 14 test-colour samples are smooth parametric models of the CIE
//!   reflectance curves (base level plus Gaussian bands and sigmoid ramps),
//!   not the official tabulated data.
//! - Daylight components S0/S1/S2 are abridged 10 nm tables.
//! - Chromatic adaptation uses the classic von Kries c/d transform in CIE
//!   1960 UCS, and colour differences are taken in U*V*W*.
//!
//! The reference illuminant is a Planckian radiator below the configured
//! CCT threshold and the CIE daylight model at or above it; the threshold is
//! a policy choice surfaced in [`CriConfig`] (default 5000 K), not a hidden
//! constant.

use serde::{Deserialize, Serialize};

use crate::color::cct::{CCT_MAX_K, CCT_MIN_K};
use crate::color::cie::tristimulus_weighted;
use crate::error::{OspradError, Result};
use crate::measurement::Spectrum;

/// Reference-illuminant policy for CRI.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CriConfig {
    /// CCT at or above which the reference switches from a Planckian
    /// radiator to the CIE daylight model.
    pub daylight_threshold_k: f64,
}

impl Default for CriConfig {
    fn default() -> Self {
        Self {
            daylight_threshold_k: 5000.0,
        }
    }
}

/// CRI result: the general index and the 14 special indices.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CriResult {
    /// General index: mean of R1..R8.
    pub ra: f64,
    /// Special indices R1..R14.
    pub special: [f64; 14],
}

/// Compute the CRI of a test spectrum at a known (or previously derived)
/// CCT.
///
/// Reports `OutOfRange` for a CCT outside the trusted band and
/// `DegenerateSpectrum` when the test spectrum carries no luminous energy.
pub fn cri(spectrum: &Spectrum, cct_k: f64, config: &CriConfig) -> Result<CriResult> {
    if !(CCT_MIN_K..=CCT_MAX_K).contains(&cct_k) {
        return Err(OspradError::OutOfRange(format!(
            "CRI undefined at {cct_k:.0} K"
        )));
    }

    let wavelengths = spectrum.wavelengths();
    let test = spectrum.values();
    let reference = reference_illuminant(cct_k, wavelengths, config);
    let unity = vec![1.0; wavelengths.len()];

    let white_test = tristimulus_weighted(wavelengths, test, &unity);
    let white_ref = tristimulus_weighted(wavelengths, &reference, &unity);
    if white_test.1 < 1e-12 || white_ref.1 < 1e-12 {
        return Err(OspradError::DegenerateSpectrum);
    }

    let (uw_t, vw_t) = uv_1960(white_test);
    let (uw_r, vw_r) = uv_1960(white_ref);
    let (c_t, d_t) = adaptation_terms(uw_t, vw_t);
    let (c_r, d_r) = adaptation_terms(uw_r, vw_r);

    let mut special = [0.0; 14];
    for (idx, slot) in special.iter_mut().enumerate() {
        let reflectance: Vec<f64> = wavelengths
            .iter()
            .map(|&wl| tcs_reflectance(idx, wl))
            .collect();

        let sample_test = tristimulus_weighted(wavelengths, test, &reflectance);
        let sample_ref = tristimulus_weighted(wavelengths, &reference, &reflectance);

        // Relative luminances with each white normalised to 100.
        let y_test = 100.0 * sample_test.1 / white_test.1;
        let y_ref = 100.0 * sample_ref.1 / white_ref.1;

        let (u_i, v_i) = uv_1960(sample_test);
        let (u_ref, v_ref) = uv_1960(sample_ref);

        // Von Kries adaptation of the test-sample chromaticity to the
        // reference white.
        let (c_i, d_i) = adaptation_terms(u_i, v_i);
        let denom = 16.518 + 1.481 * (c_r / c_t) * c_i - (d_r / d_t) * d_i;
        let u_adapted = (10.872 + 0.404 * (c_r / c_t) * c_i - 4.0 * (d_r / d_t) * d_i) / denom;
        let v_adapted = 5.520 / denom;

        // U*V*W* against the reference white.
        let w_test = 25.0 * y_test.max(0.0).cbrt() - 17.0;
        let w_ref = 25.0 * y_ref.max(0.0).cbrt() - 17.0;
        let u_star_test = 13.0 * w_test * (u_adapted - uw_r);
        let v_star_test = 13.0 * w_test * (v_adapted - vw_r);
        let u_star_ref = 13.0 * w_ref * (u_ref - uw_r);
        let v_star_ref = 13.0 * w_ref * (v_ref - vw_r);

        let delta_e = ((u_star_ref - u_star_test).powi(2)
            + (v_star_ref - v_star_test).powi(2)
            + (w_ref - w_test).powi(2))
        .sqrt();

        *slot = 100.0 - 4.6 * delta_e;
    }

    let ra = special[..8].iter().sum::<f64>() / 8.0;
    Ok(CriResult { ra, special })
}

/// Reference SPD on the given grid per the configured switching rule.
fn reference_illuminant(cct_k: f64, wavelengths: &[f64], config: &CriConfig) -> Vec<f64> {
    if cct_k < config.daylight_threshold_k {
        planckian_spd(cct_k, wavelengths)
    } else {
        daylight_spd(cct_k, wavelengths)
    }
}

/// Relative Planckian SPD, normalised to 100 at 560 nm.
pub fn planckian_spd(kelvin: f64, wavelengths: &[f64]) -> Vec<f64> {
    let radiance = |wl_nm: f64| {
        let wl_m = wl_nm * 1e-9;
        // Second radiation constant, m·K. The first constant cancels in the
        // normalisation.
        let c2 = 1.438_777e-2;
        wl_m.powi(-5) / ((c2 / (wl_m * kelvin)).exp() - 1.0)
    };
    let anchor = radiance(560.0);
    wavelengths
        .iter()
        .map(|&wl| 100.0 * radiance(wl) / anchor)
        .collect()
}

/// Relative CIE daylight SPD from the S0/S1/S2 components, normalised to
/// 100 at 560 nm. CCT is clamped to the model's 4000–25000 K domain.
pub fn daylight_spd(kelvin: f64, wavelengths: &[f64]) -> Vec<f64> {
    let t = kelvin.clamp(4000.0, 25_000.0);

    let xd = if t <= 7000.0 {
        -4.6070e9 / t.powi(3) + 2.9678e6 / t.powi(2) + 0.09911e3 / t + 0.244063
    } else {
        -2.0064e9 / t.powi(3) + 1.9018e6 / t.powi(2) + 0.24748e3 / t + 0.237040
    };
    let yd = -3.000 * xd * xd + 2.870 * xd - 0.275;

    let m = 0.0241 + 0.2562 * xd - 0.7341 * yd;
    let m1 = (-1.3515 - 1.7703 * xd + 5.9114 * yd) / m;
    let m2 = (0.0300 - 31.4424 * xd + 30.0717 * yd) / m;

    let component = |wl: f64| {
        let s0 = interp_10nm(&DAYLIGHT_S0, wl);
        let s1 = interp_10nm(&DAYLIGHT_S1, wl);
        let s2 = interp_10nm(&DAYLIGHT_S2, wl);
        s0 + m1 * s1 + m2 * s2
    };

    let anchor = component(560.0);
    wavelengths
        .iter()
        .map(|&wl| 100.0 * component(wl) / anchor)
        .collect()
}

/// CIE 1960 UCS coordinates of a tristimulus triple.
fn uv_1960((x, y, z): (f64, f64, f64)) -> (f64, f64) {
    let denom = x + 15.0 * y + 3.0 * z;
    if denom.abs() < 1e-12 {
        return (0.0, 0.0);
    }
    (4.0 * x / denom, 6.0 * y / denom)
}

/// The c and d terms of the CIE 13.3 von Kries transform.
fn adaptation_terms(u: f64, v: f64) -> (f64, f64) {
    let v = if v.abs() < 1e-9 { 1e-9 } else { v };
    (
        (4.0 - u - 10.0 * v) / v,
        (1.708 * v + 0.404 - 1.481 * u) / v,
    )
}

// =============================================================================
// Test-colour sample reflectance models
// =============================================================================

/// One Gaussian reflectance band: (center nm, width nm, amplitude).
type Band = (f64, f64, f64);

/// Sigmoid reflectance ramp: (center nm, width nm, amplitude). Positive
/// amplitude rises toward long wavelengths.
type Ramp = (f64, f64, f64);

struct TcsModel {
    base: f64,
    bands: &'static [Band],
    ramps: &'static [Ramp],
}

/// Parametric stand-ins for the CIE 13.3 test-colour samples. R1–R8 are the
/// moderate-chroma hue circle used for Ra; R9–R12 are the saturated
/// red/yellow/green/blue; R13 is complexion, R14 leaf green.
static TCS_MODELS: [TcsModel; 14] = [
    // R1: light greyish red
    TcsModel { base: 0.22, bands: &[(620.0, 60.0, 0.18)], ramps: &[] },
    // R2: dark greyish yellow
    TcsModel { base: 0.12, bands: &[(580.0, 70.0, 0.22)], ramps: &[(560.0, 40.0, 0.12)] },
    // R3: strong yellow green
    TcsModel { base: 0.10, bands: &[(555.0, 55.0, 0.30)], ramps: &[] },
    // R4: moderate yellowish green
    TcsModel { base: 0.10, bands: &[(525.0, 50.0, 0.26)], ramps: &[] },
    // R5: light bluish green
    TcsModel { base: 0.14, bands: &[(495.0, 50.0, 0.24)], ramps: &[] },
    // R6: light blue
    TcsModel { base: 0.12, bands: &[(460.0, 45.0, 0.26)], ramps: &[] },
    // R7: light violet
    TcsModel { base: 0.12, bands: &[(435.0, 40.0, 0.22), (640.0, 70.0, 0.14)], ramps: &[] },
    // R8: light reddish purple
    TcsModel { base: 0.14, bands: &[(425.0, 40.0, 0.18), (660.0, 65.0, 0.20)], ramps: &[] },
    // R9: strong red
    TcsModel { base: 0.04, bands: &[], ramps: &[(610.0, 18.0, 0.70)] },
    // R10: strong yellow
    TcsModel { base: 0.06, bands: &[], ramps: &[(510.0, 25.0, 0.68)] },
    // R11: strong green
    TcsModel { base: 0.05, bands: &[(530.0, 40.0, 0.45)], ramps: &[] },
    // R12: strong blue
    TcsModel { base: 0.05, bands: &[(450.0, 35.0, 0.42)], ramps: &[] },
    // R13: light yellowish pink (complexion)
    TcsModel { base: 0.25, bands: &[(600.0, 80.0, 0.20)], ramps: &[(580.0, 50.0, 0.15)] },
    // R14: moderate olive green (leaf)
    TcsModel { base: 0.06, bands: &[(550.0, 35.0, 0.18)], ramps: &[(700.0, 20.0, 0.30)] },
];

/// Reflectance of test-colour sample `index` (0-based) at a wavelength.
fn tcs_reflectance(index: usize, wavelength: f64) -> f64 {
    let model = &TCS_MODELS[index];
    let mut r = model.base;
    for &(center, width, amp) in model.bands {
        let x = (wavelength - center) / width;
        r += amp * (-0.5 * x * x).exp();
    }
    for &(center, width, amp) in model.ramps {
        r += amp / (1.0 + (-(wavelength - center) / width).exp());
    }
    r.clamp(0.02, 0.95)
}

// =============================================================================
// CIE daylight components, 380-780 nm at 10 nm (abridged)
// =============================================================================

const DAYLIGHT_START_NM: f64 = 380.0;
const DAYLIGHT_STEP_NM: f64 = 10.0;

static DAYLIGHT_S0: [f64; 41] = [
    63.4, 64.6, 94.8, 104.8, 105.9, 96.8, 113.9, 125.6, 125.5, 121.3, 121.3, 113.5, 113.1,
    110.8, 106.5, 108.8, 105.3, 104.4, 100.0, 96.0, 95.1, 89.1, 90.5, 90.3, 88.4, 84.0, 85.1,
    81.9, 82.6, 84.9, 81.3, 71.9, 74.3, 76.4, 63.3, 71.7, 77.0, 65.2, 47.7, 68.6, 65.0,
];

static DAYLIGHT_S1: [f64; 41] = [
    38.5, 36.8, 43.4, 46.3, 43.9, 37.1, 36.7, 35.9, 32.6, 27.9, 24.3, 20.1, 16.2, 13.2, 8.6,
    6.1, 4.2, 1.9, 0.0, -1.6, -3.5, -3.5, -5.8, -7.2, -8.6, -9.5, -10.9, -10.7, -12.0, -14.0,
    -13.6, -12.0, -13.3, -12.9, -10.6, -11.6, -12.2, -10.2, -7.8, -11.2, -10.4,
];

static DAYLIGHT_S2: [f64; 41] = [
    3.0, 2.1, -1.1, -0.5, -0.7, -1.2, -2.6, -2.9, -2.8, -2.6, -2.6, -1.8, -1.5, -1.3, -1.2,
    -1.0, -0.5, -0.3, 0.0, 0.2, 0.5, 2.1, 3.2, 4.1, 4.7, 5.1, 6.7, 7.3, 8.6, 9.8, 10.2, 8.3,
    9.6, 8.5, 7.0, 7.6, 8.0, 6.7, 5.2, 7.4, 6.8,
];

/// Linear interpolation of a 10 nm table, clamped to the table edges.
fn interp_10nm(table: &[f64; 41], wavelength: f64) -> f64 {
    let position = (wavelength - DAYLIGHT_START_NM) / DAYLIGHT_STEP_NM;
    if position <= 0.0 {
        return table[0];
    }
    let last = table.len() - 1;
    if position >= last as f64 {
        return table[last];
    }
    let i = position.floor() as usize;
    let t = position - i as f64;
    table[i] + t * (table[i + 1] - table[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<f64> {
        (0..81).map(|i| 380.0 + 5.0 * i as f64).collect()
    }

    fn spectrum_from(wavelengths: Vec<f64>, values: Vec<f64>) -> Spectrum {
        Spectrum::new(wavelengths, values).unwrap()
    }

    #[test]
    fn test_planckian_reference_renders_itself_perfectly() {
        // A test spectrum identical to the reference illuminant has zero
        // colour shift on every sample.
        let wl = grid();
        let spd = planckian_spd(2856.0, &wl);
        let spectrum = spectrum_from(wl, spd);
        let result = cri(&spectrum, 2856.0, &CriConfig::default()).unwrap();
        assert!(result.ra > 99.0, "Ra = {:.2}", result.ra);
        for (i, r) in result.special.iter().enumerate() {
            assert!(*r > 98.0, "R{} = {r:.2}", i + 1);
        }
    }

    #[test]
    fn test_daylight_reference_near_match() {
        let wl = grid();
        let spd = daylight_spd(6504.0, &wl);
        let spectrum = spectrum_from(wl, spd);
        let result = cri(&spectrum, 6504.0, &CriConfig::default()).unwrap();
        assert!(result.ra > 99.0, "Ra = {:.2}", result.ra);
    }

    #[test]
    fn test_narrow_line_source_renders_poorly() {
        // A single narrow line cannot render a hue circle faithfully.
        let wl = grid();
        let values: Vec<f64> = wl
            .iter()
            .map(|&w| {
                let x: f64 = (w - 590.0) / 5.0;
                100.0 * (-0.5 * x * x).exp()
            })
            .collect();
        let spectrum = spectrum_from(wl, values);
        let result = cri(&spectrum, 2000.0, &CriConfig::default()).unwrap();
        assert!(result.ra < 60.0, "Ra = {:.2}", result.ra);
    }

    #[test]
    fn test_cct_outside_band_is_out_of_range() {
        let wl = grid();
        let spd = planckian_spd(2856.0, &wl);
        let spectrum = spectrum_from(wl, spd);
        let err = cri(&spectrum, 500.0, &CriConfig::default()).unwrap_err();
        assert!(matches!(err, OspradError::OutOfRange(_)));
    }

    #[test]
    fn test_dark_spectrum_is_degenerate() {
        let wl = grid();
        let spectrum = spectrum_from(wl.clone(), vec![0.0; wl.len()]);
        let err = cri(&spectrum, 5000.0, &CriConfig::default()).unwrap_err();
        assert!(matches!(err, OspradError::DegenerateSpectrum));
    }

    #[test]
    fn test_threshold_selects_reference_model() {
        let wl = grid();
        let low = reference_illuminant(3000.0, &wl, &CriConfig::default());
        let planck = planckian_spd(3000.0, &wl);
        assert_eq!(low, planck);

        let high = reference_illuminant(6500.0, &wl, &CriConfig::default());
        let daylight = daylight_spd(6500.0, &wl);
        assert_eq!(high, daylight);
    }

    #[test]
    fn test_daylight_spd_shape() {
        let wl = grid();
        let spd = daylight_spd(6504.0, &wl);
        // Normalised at 560 nm.
        let i560 = wl.iter().position(|&w| (w - 560.0).abs() < 0.1).unwrap();
        assert!((spd[i560] - 100.0).abs() < 1e-9);
        // D65 carries more blue than deep red.
        assert!(spd[10] > spd[80]);
    }
}
