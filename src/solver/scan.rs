//! Central-density scan with range expansion until the target mass is
//! bracketed.

use rayon::prelude::*;

use crate::domain::{PerturbationParameters, ScanConfig, ScanFamily, SolverSettings, StellarModel};
use crate::eos::{Eos, EquationOfState};
use crate::error::AppError;
use crate::math::log_ladder;

use super::structure::{InertialMapping, SolveError, StructureIntegrator};

/// Drives [`StructureIntegrator`] over a geometric density ladder.
pub struct DensityScanner<'a> {
    eos: &'a Eos,
    params: PerturbationParameters,
    mapping: &'a dyn InertialMapping,
    settings: SolverSettings,
    scan: &'a ScanConfig,
    n_points: usize,
}

impl<'a> DensityScanner<'a> {
    pub fn new(
        eos: &'a Eos,
        params: PerturbationParameters,
        mapping: &'a dyn InertialMapping,
        settings: SolverSettings,
        scan: &'a ScanConfig,
        fast: bool,
    ) -> Self {
        Self {
            eos,
            params,
            mapping,
            settings,
            scan,
            n_points: scan.points(fast),
        }
    }

    /// Override the ladder size (the refinement ladder densifies it).
    pub fn with_points(mut self, n_points: usize) -> Self {
        self.n_points = n_points.max(2);
        self
    }

    pub fn n_points(&self) -> usize {
        self.n_points
    }

    /// Run the scan, widening the density interval up to `max_expansions`
    /// times until at least `min_points` models bracket the target mass.
    pub fn scan(&self) -> Result<ScanFamily, AppError> {
        let mut lo = self.scan.log10_rho_min;
        let mut hi = self.scan.log10_rho_max;
        let mut dropped = 0;
        let mut expansions = 0;

        loop {
            let ladder = log_ladder(lo, hi, self.n_points)?;
            let (models, failed) = self.evaluate(&ladder);
            dropped += failed;

            let bracketed = self.brackets(&models);
            let next_lo = (lo - self.scan.expansion_step).max(self.scan.log10_rho_floor);
            let next_hi = (hi + self.scan.expansion_step).min(self.scan.log10_rho_ceiling);
            // Once both ends sit on their bounds another pass would repeat this one.
            let exhausted = expansions >= self.scan.max_expansions || (next_lo == lo && next_hi == hi);
            if bracketed || exhausted {
                tracing::debug!(
                    eos = self.eos.name(),
                    sigma = self.params.sigma,
                    models = models.len(),
                    dropped,
                    expansions,
                    bracketed,
                    "density scan finished"
                );
                return Ok(ScanFamily {
                    models,
                    dropped,
                    bracketed,
                    expansions,
                    log10_rho_range: (lo, hi),
                });
            }

            expansions += 1;
            tracing::debug!(
                eos = self.eos.name(),
                lo = next_lo,
                hi = next_hi,
                "widening density interval"
            );
            lo = next_lo;
            hi = next_hi;
        }
    }

    /// Integrate every ladder point independently; returns the converged
    /// models sorted by central density plus the number of dropped points.
    fn evaluate(&self, ladder: &[f64]) -> (Vec<StellarModel>, usize) {
        let integrator = StructureIntegrator::new(self.eos, self.params, self.mapping, self.settings);
        let results: Vec<_> = ladder
            .par_iter()
            .map(|&rho_c| (rho_c, integrator.solve(rho_c)))
            .collect();
        keep_converged(self.eos.name(), results)
    }

    fn brackets(&self, models: &[StellarModel]) -> bool {
        if models.len() < self.scan.min_points {
            return false;
        }
        let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
        for m in models.iter().map(|m| m.mass_msun).filter(|m| m.is_finite()) {
            lo = lo.min(m);
            hi = hi.max(m);
        }
        lo <= self.scan.target_mass_msun && self.scan.target_mass_msun <= hi
    }
}

/// Split per-point results into sorted models and a count of dropped points.
fn keep_converged(
    eos: &str,
    results: Vec<(f64, Result<StellarModel, SolveError>)>,
) -> (Vec<StellarModel>, usize) {
    let mut models = Vec::with_capacity(results.len());
    let mut failed = 0;
    for (rho_c, res) in results {
        match res {
            Ok(m) => models.push(m),
            Err(err) => {
                failed += 1;
                tracing::debug!(eos, rho_c, %err, "dropping ladder point");
            }
        }
    }
    models.sort_by(|a, b| a.rho_c.total_cmp(&b.rho_c));
    (models, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eos::catalog;
    use crate::math::to_geom;
    use crate::solver::branch::tests::model;
    use crate::solver::structure::FractionalMapping;

    /// Poisons the pressure gradient above a given energy density, so every
    /// star denser than that fails to integrate.
    struct PoisonAbove {
        eps_geom: f64,
    }

    impl InertialMapping for PoisonAbove {
        fn increment(&self, _params: &PerturbationParameters, eps_grav: f64, _r_cm: f64) -> f64 {
            if eps_grav > self.eps_geom { f64::NAN } else { 0.0 }
        }
    }

    #[test]
    fn non_physical_points_are_dropped_and_the_rest_kept() {
        let results = vec![
            (3e14, Ok(model(3e14, 1.2, 12.5, 800.0))),
            (1e15, Err(SolveError::NonPhysicalCompactness { compactness: 0.52 })),
            (2e14, Ok(model(2e14, 0.9, 12.9, 2000.0))),
            (5e15, Err(SolveError::SurfaceNotFound { r_max_cm: 3e6 })),
        ];
        let (models, dropped) = keep_converged("test", results);
        assert_eq!(dropped, 2);
        let rho: Vec<f64> = models.iter().map(|m| m.rho_c).collect();
        assert_eq!(rho, vec![2e14, 3e14]);
    }

    #[test]
    fn failing_dense_points_do_not_stop_the_scan() {
        let eos = catalog::by_name("SLy").unwrap();
        let eps_geom = to_geom(eos.pressure_and_energy(10f64.powf(15.3)).1);
        let mapping = PoisonAbove { eps_geom };
        let scan_cfg = ScanConfig {
            max_expansions: 0,
            ..ScanConfig::default()
        };
        let family = DensityScanner::new(
            &eos,
            PerturbationParameters::zero(),
            &mapping,
            SolverSettings::default(),
            &scan_cfg,
            true,
        )
        .scan()
        .unwrap();
        assert!(family.dropped > 0);
        assert!(!family.models.is_empty());
        assert_eq!(family.models.len() + family.dropped, scan_cfg.points(true));
        assert!(family.models.iter().all(|m| m.rho_c < 10f64.powf(15.3)));
    }

    #[test]
    fn sly_scan_brackets_canonical_mass() {
        let eos = catalog::by_name("SLy").unwrap();
        let scan_cfg = ScanConfig::default();
        let scanner = DensityScanner::new(
            &eos,
            PerturbationParameters::zero(),
            &FractionalMapping,
            SolverSettings::default(),
            &scan_cfg,
            true,
        );
        let family = scanner.scan().unwrap();
        assert!(family.bracketed);
        assert!(family.models.len() >= 4);
        assert!(family.models.windows(2).all(|w| w[1].rho_c > w[0].rho_c));
        let m_max = family.models.iter().map(|m| m.mass_msun).fold(0.0, f64::max);
        assert!(m_max > 1.8 && m_max < 2.4, "SLy M_max={m_max}");
    }

    #[test]
    fn unreachable_target_exhausts_expansions() {
        let eos = catalog::by_name("SLy").unwrap();
        let scan_cfg = ScanConfig {
            target_mass_msun: 5.0,
            max_expansions: 2,
            ..ScanConfig::default()
        };
        let family = DensityScanner::new(
            &eos,
            PerturbationParameters::zero(),
            &FractionalMapping,
            SolverSettings::default(),
            &scan_cfg,
            true,
        )
        .scan()
        .unwrap();
        assert!(!family.bracketed);
        assert_eq!(family.expansions, 2);
        assert!((family.log10_rho_range.0 - 13.9).abs() < 1e-9);
        assert!((family.log10_rho_range.1 - 16.2).abs() < 1e-9);
    }
}
