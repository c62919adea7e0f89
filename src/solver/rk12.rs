// src/solver/rk12.rs
//
// Adaptive Heun (RK2) with an embedded Euler (RK1) error estimate.

use tracing::debug;

use crate::array::FieldArray;
use crate::engine::{Engine, Equation, Solver};
use crate::error::Result;
use crate::params::HEADROOM;
use crate::quant::{QuantId, Verifier};
use crate::solver::{
    add_scalar, add_step_control, commit_output, input_snapshot, output_snapshot, scalar,
    set_output, set_scalar, step_bounds,
};

/// Default per-step error tolerance on each output.
const DEFAULT_MAX_ERROR: f64 = 1e-4;

struct Tolerance {
    max_error: QuantId,
    error: QuantId,
}

pub struct Rk12Solver {
    tol: Vec<Tolerance>,
    mindt: QuantId,
    maxdt: QuantId,
    badsteps: QuantId,
}

impl Rk12Solver {
    /// Adds `mindt`, `maxdt`, `badsteps` and per-equation `<out>_maxerror`, `<out>_error`.
    pub fn new(e: &mut Engine) -> Result<Self> {
        let (mindt, maxdt, badsteps) = add_step_control(e)?;
        let equations = e.equations().to_vec();
        let mut tol = Vec::with_capacity(equations.len());
        for eq in &equations {
            let out = e.quant_by_id(eq.output);
            let (name, unit) = (out.name().to_string(), out.unit().to_string());
            let max_error = add_scalar(
                e,
                &format!("{name}_maxerror"),
                &unit,
                &format!("Maximum error per step on {name}"),
                DEFAULT_MAX_ERROR,
                Some(Verifier::Positive),
            )?;
            let error = add_scalar(
                e,
                &format!("{name}_error"),
                &unit,
                &format!("Error estimate of the last step on {name}"),
                0.0,
                None,
            )?;
            tol.push(Tolerance { max_error, error });
        }
        Ok(Self {
            tol,
            mindt,
            maxdt,
            badsteps,
        })
    }

    /// Step-size factor for an error estimate, clamped to [0.1, 1.5].
    fn factor(max_error: f64, error: f64) -> f64 {
        if error == 0.0 {
            return 1.5;
        }
        (HEADROOM * (max_error / error).sqrt()).clamp(0.1, 1.5)
    }

    /// Heun trial step of size `dt` from `y0`. Leaves the Heun solution in
    /// the outputs and returns the per-equation error estimates.
    fn trial(
        &self,
        e: &mut Engine,
        equations: &[Equation],
        y0: &[FieldArray],
        t0: f64,
        dt: f64,
    ) -> Result<Vec<f64>> {
        let mut k1 = Vec::with_capacity(equations.len());
        for eq in equations {
            k1.push(input_snapshot(e, eq)?);
        }

        // Euler predictor
        let mut euler = Vec::with_capacity(equations.len());
        for ((eq, y0), k1) in equations.iter().zip(y0).zip(&k1) {
            let mut y = y0.clone();
            y.madd(y0, k1, dt);
            set_output(e, eq, y.clone());
            if eq.unit_length {
                e.finish_output(eq)?;
                euler.push(output_snapshot(e, eq)?);
            } else {
                euler.push(y);
            }
        }
        e.set_time(t0 + dt);

        let mut k2 = Vec::with_capacity(equations.len());
        for eq in equations {
            k2.push(input_snapshot(e, eq)?);
        }

        // Heun corrector
        let mut errors = Vec::with_capacity(equations.len());
        for (i, eq) in equations.iter().enumerate() {
            let mut y = y0[i].clone();
            y.madd(&y0[i], &k1[i], 0.5 * dt);
            let y_half = y.clone();
            y.madd(&y_half, &k2[i], 0.5 * dt);
            commit_output(e, eq, y)?;
            let heun = output_snapshot(e, eq)?;
            errors.push(heun.max_diff(&euler[i]));
        }
        Ok(errors)
    }
}

impl Solver for Rk12Solver {
    fn step(&mut self, e: &mut Engine) -> Result<()> {
        let equations = e.equations().to_vec();
        let t0 = e.time();
        let mut y0 = Vec::with_capacity(equations.len());
        for eq in &equations {
            y0.push(output_snapshot(e, eq)?);
        }
        let (mindt, maxdt) = step_bounds(e, self.mindt, self.maxdt)?;

        let mut dt = e.dt().clamp(mindt, maxdt);
        loop {
            let errors = self.trial(e, &equations, &y0, t0, dt)?;

            let mut new_dt = maxdt;
            let mut bad = false;
            for (tol, &err) in self.tol.iter().zip(&errors) {
                let max_err = scalar(e, tol.max_error);
                set_scalar(e, tol.error, err);
                bad |= err > max_err;
                new_dt = new_dt.min(dt * Self::factor(max_err, err));
            }
            let new_dt = new_dt.clamp(mindt, maxdt);

            if bad && dt > mindt {
                let n = scalar(e, self.badsteps) + 1.0;
                set_scalar(e, self.badsteps, n);
                debug!(dt, new_dt, ?errors, "rk12 step rejected");
                for (eq, y) in equations.iter().zip(&y0) {
                    set_output(e, eq, y.clone());
                }
                e.set_time(t0);
                dt = new_dt;
                continue;
            }

            e.set_time(t0);
            e.advance_time(dt);
            e.set_dt(new_dt);
            return Ok(());
        }
    }

    fn dependencies(&self) -> (Vec<String>, Vec<String>) {
        (
            vec!["t".into(), "step".into(), "dt".into(), "badsteps".into()],
            vec!["mindt".into(), "maxdt".into()],
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::params::GAMMA0;

    fn macrospin(maxerror: f64) -> Engine {
        let mut e = Engine::new(std::env::temp_dir());
        e.set_grid_size([1, 1, 1]).unwrap();
        e.set_cell_size([1e-9; 3]).unwrap();
        e.load("zeeman").unwrap();
        e.load("llg").unwrap();
        e.load("solver/rk12").unwrap();
        e.set_scalar("Msat", 8e5).unwrap();
        e.set_value("H_ext", &[0.0, 0.0, 1e5]).unwrap();
        e.set_scalar("m_maxerror", maxerror).unwrap();
        e
    }

    #[test]
    fn rk12_grows_dt_when_error_is_small() {
        let mut e = macrospin(1e-3);
        e.set_scalar("dt", 1e-15).unwrap();
        e.steps(5).unwrap();
        assert!(e.dt() > 1e-15);
        assert!(e.get_scalar("m_error").unwrap() <= 1e-3);
    }

    #[test]
    fn rk12_rejects_steps_that_are_too_large() {
        let mut e = macrospin(1e-6);
        e.set_scalar("dt", 1e-11).unwrap();
        e.step().unwrap();
        assert!(e.get_scalar("badsteps").unwrap() >= 1.0);
        assert!(e.get_scalar("m_error").unwrap() <= 1e-6);
        assert!(e.time() < 1e-11);
    }

    #[test]
    fn rk12_precession_follows_larmor_frequency() {
        let mut e = macrospin(1e-6);
        let h = 1e5;
        let period = 2.0 * std::f64::consts::PI / (GAMMA0 * h);
        e.run(period / 4.0).unwrap();
        // a quarter turn from +x lands near +y
        let m = e.get_array("m").unwrap().vec3(0);
        let t = e.time();
        let phase = GAMMA0 * h * t;
        assert!((m[0] - phase.cos()).abs() < 1e-2, "m = {m:?}");
        assert!((m[1] - phase.sin()).abs() < 1e-2, "m = {m:?}");
    }

    #[test]
    fn inconsistent_step_bounds_are_an_error() {
        let mut e = macrospin(1e-4);
        e.set_scalar("mindt", 1e-9).unwrap();
        let err = e.step().unwrap_err();
        assert!(matches!(err, crate::error::EngineError::InvalidValue { .. }), "{err}");
        assert!(err.to_string().contains("maxdt"));
        assert_eq!(e.step_count(), 0);

        // fixing the range makes the solver usable again
        e.set_scalar("maxdt", 1e-8).unwrap();
        e.step().unwrap();
        assert_eq!(e.step_count(), 1);
    }
}
