//! Physical constants and unit conversions.
//!
//! Equations of state work in cgs (g/cm³, erg/cm³ = dyne/cm²). The structure
//! equations are integrated in geometrized units (G = c = 1) with lengths in
//! centimetres, so mass is a length and pressure/energy density are cm⁻².

/// Newton's constant [cm³ g⁻¹ s⁻²].
pub const G_CGS: f64 = 6.67430e-8;

/// Speed of light [cm s⁻¹].
pub const C_CGS: f64 = 2.99792458e10;

/// Solar mass [g].
pub const MSUN_CGS: f64 = 1.98847e33;

/// `c²` in cgs.
pub const C2_CGS: f64 = C_CGS * C_CGS;

/// Solar mass as a geometrized length [cm] (`G M☉ / c²`).
pub const MSUN_GEOM_CM: f64 = G_CGS * MSUN_CGS / C2_CGS;

/// Conversion factor dyne/cm² (or erg/cm³) → cm⁻² (`G / c⁴`).
pub const PRESSURE_TO_GEOM: f64 = G_CGS / (C2_CGS * C2_CGS);

/// Centimetres per kilometre.
pub const CM_PER_KM: f64 = 1.0e5;

/// Convert a cgs pressure or energy density to geometrized units.
#[inline]
pub fn to_geom(value_cgs: f64) -> f64 {
    value_cgs * PRESSURE_TO_GEOM
}

/// Convert a geometrized pressure or energy density back to cgs.
#[inline]
pub fn from_geom(value_geom: f64) -> f64 {
    value_geom / PRESSURE_TO_GEOM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solar_mass_is_about_1p48_km() {
        assert!((MSUN_GEOM_CM / CM_PER_KM - 1.4766).abs() < 1e-3);
    }

    #[test]
    fn geom_conversion_round_trips() {
        let p = 3.7e34;
        assert!((from_geom(to_geom(p)) - p).abs() / p < 1e-14);
    }
}
