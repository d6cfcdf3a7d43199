//! Grid generation and one-dimensional interpolation.

use crate::error::AppError;

/// Generate `steps` points geometrically spaced between `10^log10_min` and
/// `10^log10_max` (inclusive).
///
/// This is the central-density ladder used by the scanner.
pub fn log_ladder(log10_min: f64, log10_max: f64, steps: usize) -> Result<Vec<f64>, AppError> {
    if !(log10_min.is_finite() && log10_max.is_finite() && log10_max > log10_min) {
        return Err(AppError::config(format!(
            "Invalid log-density interval: [{log10_min}, {log10_max}] (must be finite with max>min)."
        )));
    }
    if steps < 2 {
        return Err(AppError::config("Density ladder needs at least 2 points."));
    }

    let step = (log10_max - log10_min) / (steps as f64 - 1.0);
    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push(10f64.powf(log10_min + step * i as f64));
    }
    Ok(out)
}

/// Piecewise-linear interpolation of `ys(xs)` at `x`.
///
/// `xs` must be strictly increasing. Returns `None` if `x` lies outside
/// `[xs[0], xs[n-1]]` or the inputs are too short; no extrapolation is done.
pub fn interp_linear(x: f64, xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() < 2 || xs.len() != ys.len() || !x.is_finite() {
        return None;
    }
    let first = xs[0];
    let last = xs[xs.len() - 1];
    if x < first || x > last {
        return None;
    }

    // First index whose abscissa is >= x.
    let hi = xs.partition_point(|&v| v < x);
    if hi == 0 {
        return Some(ys[0]);
    }
    let lo = hi - 1;
    let (x0, x1) = (xs[lo], xs[hi]);
    let (y0, y1) = (ys[lo], ys[hi]);
    let span = x1 - x0;
    if span <= 0.0 {
        return Some(y1);
    }
    Some(y0 + (y1 - y0) * (x - x0) / span)
}

/// Relative difference `100·|a − b| / |b|` in percent (denominator 1 when `b = 0`).
///
/// Non-finite inputs yield NaN so the classifier flags them.
pub fn rel_diff_pct(a: f64, b: f64) -> f64 {
    if !(a.is_finite() && b.is_finite()) {
        return f64::NAN;
    }
    let denom = if b.abs() > 0.0 { b.abs() } else { 1.0 };
    100.0 * (a - b).abs() / denom
}

/// Largest value, skipping NaN. `None` when nothing remains.
pub fn max_value(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_includes_endpoints() {
        let v = log_ladder(14.2, 15.9, 18).unwrap();
        assert_eq!(v.len(), 18);
        assert!((v[0] / 10f64.powf(14.2) - 1.0).abs() < 1e-12);
        assert!((v[17] / 10f64.powf(15.9) - 1.0).abs() < 1e-12);
        assert!(v.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn ladder_rejects_inverted_interval() {
        assert_eq!(log_ladder(15.0, 14.0, 5).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn interp_hits_knots_and_midpoints() {
        let xs = [1.0, 2.0, 4.0];
        let ys = [10.0, 20.0, 0.0];
        assert_eq!(interp_linear(1.0, &xs, &ys), Some(10.0));
        assert_eq!(interp_linear(4.0, &xs, &ys), Some(0.0));
        assert!((interp_linear(1.5, &xs, &ys).unwrap() - 15.0).abs() < 1e-12);
        assert!((interp_linear(3.0, &xs, &ys).unwrap() - 10.0).abs() < 1e-12);
        assert_eq!(interp_linear(0.5, &xs, &ys), None);
        assert_eq!(interp_linear(4.5, &xs, &ys), None);
    }

    #[test]
    fn max_value_skips_nan() {
        assert_eq!(max_value([1.0, f64::NAN, 3.0]), Some(3.0));
        assert_eq!(max_value([f64::NAN]), None);
        assert_eq!(max_value([1.0, f64::INFINITY]), Some(f64::INFINITY));
    }

    #[test]
    fn rel_diff_handles_zero_and_nan() {
        assert!((rel_diff_pct(1.01, 1.0) - 1.0).abs() < 1e-9);
        assert!((rel_diff_pct(0.5, 0.0) - 50.0).abs() < 1e-12);
        assert!(rel_diff_pct(f64::NAN, 1.0).is_nan());
    }
}
