//! Correlated color temperature via McCamy's approximation.

use crate::error::{OspradError, Result};

/// Chromaticity epicenter used by McCamy's formula.
const EPICENTER_X: f64 = 0.3320;
const EPICENTER_Y: f64 = 0.1858;

/// CCT output band considered meaningful for this approximation, in Kelvin.
/// Outside it the chromaticity is too far from the Planckian locus for the
/// polynomial to be trusted.
pub const CCT_MIN_K: f64 = 1000.0;
pub const CCT_MAX_K: f64 = 25_000.0;

/// Correlated color temperature of a chromaticity point, in Kelvin.
///
/// McCamy's cubic in `n = (x − 0.3320)/(0.1858 − y)`. Valid only for
/// chromaticities near the Planckian locus; a vanishing denominator or a
/// result outside [`CCT_MIN_K`], [`CCT_MAX_K`] reports `OutOfRange` rather
/// than extrapolating silently.
pub fn cct(x: f64, y: f64) -> Result<f64> {
    let denom = EPICENTER_Y - y;
    if denom.abs() < 1e-6 {
        return Err(OspradError::OutOfRange(format!(
            "chromaticity ({x:.4}, {y:.4}) sits on the approximation singularity"
        )));
    }

    let n = (x - EPICENTER_X) / denom;
    let kelvin = 449.0 * n.powi(3) + 3525.0 * n.powi(2) + 6823.3 * n + 5520.33;

    if !(CCT_MIN_K..=CCT_MAX_K).contains(&kelvin) {
        return Err(OspradError::OutOfRange(format!(
            "chromaticity ({x:.4}, {y:.4}) maps to {kelvin:.0} K, outside \
             {CCT_MIN_K:.0}-{CCT_MAX_K:.0} K"
        )));
    }

    Ok(kelvin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::chromaticity;
    use crate::color::cri::planckian_spd;
    use crate::measurement::Spectrum;

    #[test]
    fn test_cct_round_trip_on_planckian_locus() {
        // Chromaticity of a 6500 K blackbody fed back through McCamy lands
        // on the source temperature. Abridged observer tables plus the
        // polynomial itself keep this within a few K at mid-locus.
        let wavelengths: Vec<f64> = (0..81).map(|i| 380.0 + 5.0 * i as f64).collect();
        let spd = planckian_spd(6500.0, &wavelengths);
        let spectrum = Spectrum::new(wavelengths, spd).unwrap();

        let (x, y) = chromaticity(&spectrum).unwrap();
        let kelvin = cct(x, y).unwrap();
        assert!(
            (kelvin - 6500.0).abs() < 70.0,
            "round trip of 6500 K gave {kelvin:.0} K at ({x:.5}, {y:.5})"
        );
    }

    #[test]
    fn test_cct_of_d65_white_point() {
        // D65 chromaticity should evaluate close to 6504 K.
        let kelvin = cct(0.31271, 0.32902).unwrap();
        assert!(
            (kelvin - 6504.0).abs() < 60.0,
            "D65 expected ~6504 K, got {kelvin:.0}"
        );
    }

    #[test]
    fn test_cct_of_warm_white() {
        // Incandescent-ish chromaticity lands in the 2700-3000 K range.
        let kelvin = cct(0.4476, 0.4074).unwrap();
        assert!((2700.0..3100.0).contains(&kelvin), "got {kelvin:.0}");
    }

    #[test]
    fn test_cct_singularity_is_out_of_range() {
        let err = cct(0.5, EPICENTER_Y).unwrap_err();
        assert!(matches!(err, OspradError::OutOfRange(_)));
    }

    #[test]
    fn test_cct_far_from_locus_is_out_of_range() {
        // Deep violet, far below the locus: n ≈ 1.5 pushes the cubic past
        // the trusted band.
        let err = cct(0.482, 0.0858).unwrap_err();
        assert!(matches!(err, OspradError::OutOfRange(_)));
    }
}
