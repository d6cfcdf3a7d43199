//! Adaptive Dormand–Prince 5(4) integrator with terminal event detection.
//!
//! The structure equations are a three-component first-order system, so the
//! state is a fixed `nalgebra::Vector3<f64>`. The integrator:
//!
//! - takes embedded 5(4) steps with an RMS error norm per component
//! - caps the step length (`max_step`) so that narrow features are resolved
//! - evaluates a scalar event function after every accepted step and, on a
//!   sign change in the configured direction, bisects the step length until
//!   the crossing is located, then stops (events are always terminal here)
//!
//! Error weights are `atol·scale_i + rtol·max(|y_i|, |y_new_i|)`; `scale`
//! lets callers give each component its natural magnitude.

use nalgebra::Vector3;
use thiserror::Error;

pub type State = Vector3<f64>;

/// Right-hand side of `dy/dx = f(x, y)`.
///
/// Implementations may return non-finite components to signal that the state
/// left the domain of the equations; the integrator turns that into an error.
pub trait OdeSystem {
    fn rhs(&self, x: f64, y: &State) -> State;
}

/// Scalar function whose zero crossing terminates the integration.
pub trait EventFunction {
    fn eval(&self, x: f64, y: &State) -> f64;
}

/// Which sign changes count as an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDirection {
    /// Positive to non-positive.
    Falling,
    /// Negative to non-negative.
    Rising,
}

impl EventDirection {
    fn crossed(self, before: f64, after: f64) -> bool {
        match self {
            EventDirection::Falling => before > 0.0 && after <= 0.0,
            EventDirection::Rising => before < 0.0 && after >= 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Tolerances {
    pub rtol: f64,
    pub atol: f64,
    /// Per-component magnitude multiplying `atol`.
    pub scale: State,
}

impl Tolerances {
    pub fn new(rtol: f64, atol: f64) -> Self {
        Self {
            rtol,
            atol,
            scale: State::new(1.0, 1.0, 1.0),
        }
    }

    pub fn with_scale(mut self, scale: State) -> Self {
        self.scale = scale;
        self
    }

    fn weights(&self, a: &State, b: &State) -> State {
        State::from_fn(|i, _| self.atol * self.scale[i] + self.rtol * a[i].abs().max(b[i].abs()))
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IntegrationError {
    #[error("step size underflow at x={x:e}")]
    StepSizeUnderflow { x: f64 },
    #[error("exceeded {max_steps} steps before reaching x={x_end:e}")]
    TooManySteps { max_steps: usize, x_end: f64 },
    #[error("non-finite derivative or state at x={x:e}")]
    NonFinite { x: f64 },
    #[error("invalid integration settings: {0}")]
    InvalidSettings(String),
}

/// Counters for one integration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub accepted: usize,
    pub rejected: usize,
    pub rhs_evals: usize,
}

#[derive(Debug, Clone)]
pub enum IntegrationResult {
    /// The event fired; `x`, `y` are the located crossing.
    Event {
        x: f64,
        y: State,
        /// Error norm of the last accepted step (≤ 1 by construction).
        last_error_norm: f64,
        stats: Stats,
    },
    /// `x_end` was reached without an event.
    Completed { x: f64, y: State, stats: Stats },
}

// Dormand–Prince coefficients (Hairer, Nørsett & Wanner, Table 5.2).
const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;
const MAX_BISECTIONS: usize = 200;

/// Dormand–Prince 5(4) integrator.
#[derive(Debug, Clone)]
pub struct DormandPrince {
    pub tol: Tolerances,
    pub max_step: f64,
    pub max_steps: usize,
}

struct StepOutput {
    y_new: State,
    f_new: State,
    err: State,
}

impl DormandPrince {
    pub fn new(tol: Tolerances, max_step: f64, max_steps: usize) -> Self {
        Self {
            tol,
            max_step,
            max_steps,
        }
    }

    /// Integrate from `x0` towards `x_end`, stopping at the first crossing of
    /// `event` in `direction`.
    ///
    /// `observer` is called with the initial point and with every accepted
    /// step (including the located event point).
    pub fn integrate_to_event<S, E, O>(
        &self,
        sys: &S,
        event: &E,
        direction: EventDirection,
        x0: f64,
        y0: State,
        x_end: f64,
        mut observer: O,
    ) -> Result<IntegrationResult, IntegrationError>
    where
        S: OdeSystem,
        E: EventFunction,
        O: FnMut(f64, &State),
    {
        self.validate(x0, x_end)?;

        let mut stats = Stats::default();
        let mut x = x0;
        let mut y = y0;
        let mut f = sys.rhs(x, &y);
        stats.rhs_evals += 1;
        if !is_finite(&y) || !is_finite(&f) {
            return Err(IntegrationError::NonFinite { x });
        }
        observer(x, &y);

        let mut g = event.eval(x, &y);
        let mut h = self.initial_step(sys, x, &y, &f, &mut stats);

        loop {
            if stats.accepted + stats.rejected >= self.max_steps {
                return Err(IntegrationError::TooManySteps {
                    max_steps: self.max_steps,
                    x_end,
                });
            }

            let remaining = x_end - x;
            if remaining <= 0.0 {
                return Ok(IntegrationResult::Completed { x, y, stats });
            }
            h = h.min(self.max_step).min(remaining);
            if h <= f64::EPSILON * x.abs().max(1.0) {
                return Err(IntegrationError::StepSizeUnderflow { x });
            }

            let step = self.step(sys, x, &y, &f, h, &mut stats);
            let err_norm = if is_finite(&step.y_new) && is_finite(&step.f_new) {
                rms_norm(&step.err, &self.tol.weights(&y, &step.y_new))
            } else {
                f64::INFINITY
            };

            if !err_norm.is_finite() || err_norm > 1.0 {
                stats.rejected += 1;
                let factor = if err_norm.is_finite() {
                    (SAFETY * err_norm.powf(-0.2)).max(MIN_FACTOR)
                } else {
                    MIN_FACTOR
                };
                h *= factor;
                continue;
            }

            stats.accepted += 1;
            let x_new = x + h;
            let g_new = event.eval(x_new, &step.y_new);

            if direction.crossed(g, g_new) {
                let (x_ev, y_ev) = self.locate_event(sys, event, direction, x, &y, &f, h, &mut stats);
                observer(x_ev, &y_ev);
                return Ok(IntegrationResult::Event {
                    x: x_ev,
                    y: y_ev,
                    last_error_norm: err_norm,
                    stats,
                });
            }

            x = x_new;
            y = step.y_new;
            f = step.f_new;
            g = g_new;
            observer(x, &y);

            let factor = if err_norm == 0.0 {
                MAX_FACTOR
            } else {
                (SAFETY * err_norm.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
            };
            h *= factor;
        }
    }

    fn validate(&self, x0: f64, x_end: f64) -> Result<(), IntegrationError> {
        if !(self.tol.rtol.is_finite() && self.tol.rtol > 0.0) {
            return Err(IntegrationError::InvalidSettings(format!("rtol={}", self.tol.rtol)));
        }
        if !(self.tol.atol.is_finite() && self.tol.atol > 0.0) {
            return Err(IntegrationError::InvalidSettings(format!("atol={}", self.tol.atol)));
        }
        if !(self.max_step.is_finite() && self.max_step > 0.0) {
            return Err(IntegrationError::InvalidSettings(format!("max_step={}", self.max_step)));
        }
        if !(x0.is_finite() && x_end.is_finite() && x_end > x0) {
            return Err(IntegrationError::InvalidSettings(format!(
                "interval [{x0}, {x_end}]"
            )));
        }
        if self.max_steps == 0 {
            return Err(IntegrationError::InvalidSettings("max_steps=0".to_string()));
        }
        Ok(())
    }

    /// Starting step following Hairer, Nørsett & Wanner (II.4).
    fn initial_step<S: OdeSystem>(
        &self,
        sys: &S,
        x0: f64,
        y0: &State,
        f0: &State,
        stats: &mut Stats,
    ) -> f64 {
        let w = self.tol.weights(y0, y0);
        let d0 = rms_norm(y0, &w);
        let d1 = rms_norm(f0, &w);
        let h0 = if d0 < 1e-5 || d1 < 1e-5 { 1e-6 } else { 0.01 * d0 / d1 };

        let y1 = y0 + f0 * h0;
        let f1 = sys.rhs(x0 + h0, &y1);
        stats.rhs_evals += 1;
        let d2 = rms_norm(&(f1 - f0), &w) / h0;

        let h1 = if !d2.is_finite() {
            h0
        } else if d1.max(d2) <= 1e-15 {
            (h0 * 1e-3).max(1e-6)
        } else {
            (0.01 / d1.max(d2)).powf(0.2)
        };
        (100.0 * h0).min(h1).min(self.max_step)
    }

    fn step<S: OdeSystem>(
        &self,
        sys: &S,
        x: f64,
        y: &State,
        k1: &State,
        h: f64,
        stats: &mut Stats,
    ) -> StepOutput {
        let k2 = sys.rhs(x + C2 * h, &(y + k1 * (h * A21)));
        let k3 = sys.rhs(x + C3 * h, &(y + (k1 * A31 + k2 * A32) * h));
        let k4 = sys.rhs(x + C4 * h, &(y + (k1 * A41 + k2 * A42 + k3 * A43) * h));
        let k5 = sys.rhs(
            x + C5 * h,
            &(y + (k1 * A51 + k2 * A52 + k3 * A53 + k4 * A54) * h),
        );
        let k6 = sys.rhs(
            x + h,
            &(y + (k1 * A61 + k2 * A62 + k3 * A63 + k4 * A64 + k5 * A65) * h),
        );
        let y_new = y + (k1 * B1 + k3 * B3 + k4 * B4 + k5 * B5 + k6 * B6) * h;
        let k7 = sys.rhs(x + h, &y_new);
        stats.rhs_evals += 6;

        let err = (k1 * E1 + k3 * E3 + k4 * E4 + k5 * E5 + k6 * E6 + k7 * E7) * h;
        StepOutput {
            y_new,
            f_new: k7,
            err,
        }
    }

    /// Bisect the step length inside `(0, h]` until the crossing is bracketed
    /// to machine resolution. Each trial re-takes a single step from `(x, y)`.
    #[allow(clippy::too_many_arguments)]
    fn locate_event<S: OdeSystem, E: EventFunction>(
        &self,
        sys: &S,
        event: &E,
        direction: EventDirection,
        x: f64,
        y: &State,
        f: &State,
        h: f64,
        stats: &mut Stats,
    ) -> (f64, State) {
        let g0 = event.eval(x, y);
        let mut lo = 0.0;
        let mut hi = h;
        let mut y_hi = self.step(sys, x, y, f, hi, stats).y_new;

        for _ in 0..MAX_BISECTIONS {
            if hi - lo <= 4.0 * f64::EPSILON * (x + hi).abs() {
                break;
            }
            let mid = 0.5 * (lo + hi);
            let y_mid = self.step(sys, x, y, f, mid, stats).y_new;
            let g_mid = event.eval(x + mid, &y_mid);
            if direction.crossed(g0, g_mid) {
                hi = mid;
                y_hi = y_mid;
            } else {
                lo = mid;
            }
        }

        (x + hi, y_hi)
    }
}

fn rms_norm(v: &State, weights: &State) -> f64 {
    let sum: f64 = v
        .iter()
        .zip(weights.iter())
        .map(|(a, w)| {
            let r = a / w;
            r * r
        })
        .sum();
    (sum / 3.0).sqrt()
}

fn is_finite(v: &State) -> bool {
    v.iter().all(|c| c.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// y0' = y1, y1' = -y0 (harmonic oscillator), y2' = 0.
    struct Oscillator;

    impl OdeSystem for Oscillator {
        fn rhs(&self, _x: f64, y: &State) -> State {
            State::new(y[1], -y[0], 0.0)
        }
    }

    struct FirstComponent;

    impl EventFunction for FirstComponent {
        fn eval(&self, _x: f64, y: &State) -> f64 {
            y[0]
        }
    }

    fn solver() -> DormandPrince {
        DormandPrince::new(Tolerances::new(1e-10, 1e-12), 0.1, 100_000)
    }

    #[test]
    fn cosine_crosses_zero_at_half_pi() {
        // y0 = cos(x) falls through zero at π/2.
        let result = solver()
            .integrate_to_event(
                &Oscillator,
                &FirstComponent,
                EventDirection::Falling,
                0.0,
                State::new(1.0, 0.0, 0.0),
                10.0,
                |_, _| {},
            )
            .unwrap();
        match result {
            IntegrationResult::Event { x, y, last_error_norm, stats } => {
                assert!((x - std::f64::consts::FRAC_PI_2).abs() < 1e-8, "x={x}");
                assert!(y[0].abs() < 1e-8);
                assert!((y[1] + 1.0).abs() < 1e-8);
                // Norm of the step that crossed, which was accepted.
                assert!((0.0..=1.0).contains(&last_error_norm));
                assert!(stats.accepted > 0);
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn rising_crossing_is_ignored_by_falling_event() {
        // y0 = -cos(x) rises through zero at π/2 and only falls at 3π/2.
        let result = solver()
            .integrate_to_event(
                &Oscillator,
                &FirstComponent,
                EventDirection::Falling,
                0.0,
                State::new(-1.0, 0.0, 0.0),
                10.0,
                |_, _| {},
            )
            .unwrap();
        match result {
            IntegrationResult::Event { x, .. } => {
                assert!((x - 1.5 * std::f64::consts::PI).abs() < 1e-8, "x={x}");
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn completes_without_event_when_interval_is_short() {
        let mut samples = 0usize;
        let result = solver()
            .integrate_to_event(
                &Oscillator,
                &FirstComponent,
                EventDirection::Falling,
                0.0,
                State::new(1.0, 0.0, 0.0),
                1.0,
                |_, _| samples += 1,
            )
            .unwrap();
        match result {
            IntegrationResult::Completed { x, y, stats } => {
                assert!((x - 1.0).abs() < 1e-12);
                assert!((y[0] - 1f64.cos()).abs() < 1e-8);
                assert_eq!(samples, stats.accepted + 1);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_tolerances() {
        let bad = DormandPrince::new(Tolerances::new(0.0, 1e-9), 0.1, 10);
        let err = bad
            .integrate_to_event(
                &Oscillator,
                &FirstComponent,
                EventDirection::Falling,
                0.0,
                State::new(1.0, 0.0, 0.0),
                1.0,
                |_, _| {},
            )
            .unwrap_err();
        assert!(matches!(err, IntegrationError::InvalidSettings(_)));
    }
}
