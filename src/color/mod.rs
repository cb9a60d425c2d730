//! Color analysis of measured spectra.
//!
//! All entry points here are pure functions over [`Spectrum`]: CIE 1931
//! chromaticity, correlated color temperature, color rendering indices,
//! an sRGB preview color and spectral shape descriptors. Device I/O never
//! reaches this module.

pub mod cct;
pub mod cie;
pub mod cri;
pub mod shape;

pub use cct::{cct, CCT_MAX_K, CCT_MIN_K};
pub use cri::{cri, CriConfig, CriResult};
pub use shape::{analyze_shape, ShapeAnalysis};

use crate::error::{OspradError, Result};
use crate::measurement::Spectrum;

/// CIE 1931 (x, y) chromaticity of a spectrum.
///
/// Reports `DegenerateSpectrum` when the tristimulus sum vanishes, i.e. the
/// spectrum carries no energy inside the visible band.
pub fn chromaticity(spectrum: &Spectrum) -> Result<(f64, f64)> {
    let (x, y, z) = cie::tristimulus(spectrum);
    let total = x + y + z;
    if total < 1e-12 {
        return Err(OspradError::DegenerateSpectrum);
    }
    Ok((x / total, y / total))
}

/// Perceived color of a spectrum as linear-light sRGB scaled to [0, 1].
///
/// The spectrum's tristimulus values are normalised to Y = 1, converted
/// through the sRGB matrix, gamma encoded and clipped. Out-of-gamut
/// components clip rather than desaturating the whole color.
pub fn spectrum_to_rgb(spectrum: &Spectrum) -> Result<(f64, f64, f64)> {
    let (x, y, z) = cie::tristimulus(spectrum);
    if y < 1e-12 {
        return Err(OspradError::DegenerateSpectrum);
    }
    let (x, z) = (x / y, z / y);
    let y = 1.0;

    let r = 3.2406 * x - 1.5372 * y - 0.4986 * z;
    let g = -0.9689 * x + 1.8758 * y + 0.0415 * z;
    let b = 0.0557 * x - 0.2040 * y + 1.0570 * z;

    Ok((srgb_encode(r), srgb_encode(g), srgb_encode(b)))
}

/// Eight-bit convenience form of [`spectrum_to_rgb`].
pub fn spectrum_to_rgb8(spectrum: &Spectrum) -> Result<(u8, u8, u8)> {
    let (r, g, b) = spectrum_to_rgb(spectrum)?;
    let q = |c: f64| (c * 255.0).round() as u8;
    Ok((q(r), q(g), q(b)))
}

/// sRGB transfer function, with clipping to [0, 1].
fn srgb_encode(linear: f64) -> f64 {
    let c = linear.clamp(0.0, 1.0);
    if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}
