// src/solver/am01.rs
//
// Adaptive implicit solver: a backward-Euler step (order 1) followed by a
// trapezoidal (Adams-Moulton order 2) corrector, both solved by fixed-point
// iteration. The difference between the two gives the local error estimate,
// which drives the step size.

use std::collections::VecDeque;

use tracing::debug;

use crate::array::FieldArray;
use crate::engine::{Engine, Equation, Solver};
use crate::error::{EngineError, Result};
use crate::params::HEADROOM;
use crate::quant::{QuantId, Verifier};
use crate::solver::{
    add_scalar, add_step_control, commit_output, input_snapshot, output_snapshot, scalar,
    set_output, set_scalar, step_bounds,
};

const MAX_TRIES: usize = 3;
const HISTORY: usize = 3;

const DEFAULT_MAX_ABS_ERROR: f64 = 1e-5;
const DEFAULT_MAX_REL_ERROR: f64 = 1e-5;
const DEFAULT_MAX_ITER_ERROR: f64 = 1e-8;
const DEFAULT_MAX_ITERATIONS: f64 = 1000.0;

/// Per-equation tolerances, error output and step-error history.
struct Control {
    max_abs: QuantId,
    max_rel: QuantId,
    max_iter_err: QuantId,
    max_iter: QuantId,
    error: QuantId,
    history: VecDeque<f64>,
}

pub struct Am01Solver {
    control: Vec<Control>,
    mindt: QuantId,
    maxdt: QuantId,
    badsteps: QuantId,
    iterations: QuantId,
}

impl Am01Solver {
    pub fn new(e: &mut Engine) -> Result<Self> {
        let (mindt, maxdt, badsteps) = add_step_control(e)?;
        let iterations = add_scalar(
            e,
            "bdf_iterations",
            "",
            "Fixed-point iterations taken by the last step",
            0.0,
            None,
        )?;
        let equations = e.equations().to_vec();
        let mut control = Vec::with_capacity(equations.len());
        for eq in &equations {
            let out = e.quant_by_id(eq.output);
            let (name, unit) = (out.name().to_string(), out.unit().to_string());
            let pos = Some(Verifier::Positive);
            control.push(Control {
                max_abs: add_scalar(e, &format!("{name}_maxAbsError"), &unit, "Maximum absolute error per step", DEFAULT_MAX_ABS_ERROR, pos)?,
                max_rel: add_scalar(e, &format!("{name}_maxRelError"), "", "Maximum relative error per step", DEFAULT_MAX_REL_ERROR, pos)?,
                max_iter_err: add_scalar(e, &format!("{name}_maxIterError"), &unit, "Convergence threshold of the fixed-point iteration", DEFAULT_MAX_ITER_ERROR, pos)?,
                max_iter: add_scalar(e, &format!("{name}_maxIterations"), "", "Maximum fixed-point iterations per step", DEFAULT_MAX_ITERATIONS, pos)?,
                error: add_scalar(e, &format!("{name}_error"), &unit, &format!("Error estimate of the last step on {name}"), 0.0, None)?,
                history: VecDeque::with_capacity(HISTORY),
            });
        }
        Ok(Self {
            control,
            mindt,
            maxdt,
            badsteps,
            iterations,
        })
    }

    /// Solve y = y0 + h·f(y, dy0) by fixed-point iteration, starting from the
    /// value currently in the output. `combine` maps the fresh input dy to the
    /// increment rate. Stops on convergence or stagnation.
    fn fixed_point(
        &self,
        e: &mut Engine,
        eq: &Equation,
        i: usize,
        y0: &FieldArray,
        h: f64,
        combine: impl Fn(&FieldArray) -> FieldArray,
    ) -> Result<FieldArray> {
        let c = &self.control[i];
        let max_iter_err = scalar(e, c.max_iter_err);
        let max_iter = scalar(e, c.max_iter) as u64;
        let mut prev_err = f64::INFINITY;
        let mut n = 0u64;
        loop {
            let y = output_snapshot(e, eq)?;
            let dy = input_snapshot(e, eq)?;
            let rate = combine(&dy);
            let mut next = y0.clone();
            next.madd(y0, &rate, h);
            let err = y.max_diff(&next);
            if err <= max_iter_err || err / prev_err > 0.99 {
                return Ok(y);
            }
            prev_err = err;
            set_output(e, eq, next);
            n += 1;
            let total = scalar(e, self.iterations) + 1.0;
            set_scalar(e, self.iterations, total);
            if n > max_iter {
                return Err(EngineError::SolverDiverged(format!(
                    "{} iterations exceeded {} (error {:e}, dt {:e})",
                    e.quant_by_id(eq.output).name(),
                    max_iter,
                    err,
                    h
                )));
            }
        }
    }

    /// New step-size ratio from the current step error and its history.
    fn error_ratio(history: &VecDeque<f64>, step_err: f64, max_step_err: f64, bad: bool) -> f64 {
        let ratio = if bad {
            HEADROOM * (max_step_err / step_err).powf(1.0 / 3.0)
        } else if history.len() == HISTORY && step_err > 0.0 {
            let (ep1, ep2) = (history[0], history[1]);
            0.96 * (ep1 / step_err).powf(0.075)
                * (max_step_err / step_err).powf(0.175)
                * (ep1 * ep1 / (step_err * ep2)).powf(0.01)
        } else {
            HEADROOM * (max_step_err / step_err).sqrt()
        };
        if ratio.is_finite() {
            ratio.clamp(0.1, 1.5)
        } else {
            1.5
        }
    }

    /// Integrate one equation from `y0` over at most `dt`, retrying with a
    /// smaller step (up to `tries` attempts) when the error estimate is too
    /// large. Leaves the accepted value in the output and returns (accepted dt,
    /// proposed next dt, step error to record in the history).
    #[allow(clippy::too_many_arguments)]
    fn integrate(
        &self,
        e: &mut Engine,
        eq: &Equation,
        i: usize,
        y0: &FieldArray,
        t0: f64,
        mut dt: f64,
        tries: usize,
        (mindt, maxdt): (f64, f64),
    ) -> Result<(f64, f64, Option<f64>)> {
        let dy0 = input_snapshot(e, eq)?;
        for attempt in 0..tries {
            // Euler predictor
            let mut y = y0.clone();
            y.madd(y0, &dy0, dt);
            set_output(e, eq, y);
            e.set_time(t0 + dt);

            // backward Euler, then trapezoidal corrector
            let y1 = self.fixed_point(e, eq, i, y0, dt, |dy| dy.clone())?;
            let y2 = self.fixed_point(e, eq, i, y0, dt, |dy| {
                let mut r = dy0.clone();
                r.madd(&dy0, dy, 1.0);
                r.as_mut_slice().iter_mut().for_each(|v| *v *= 0.5);
                r
            })?;

            let c = &self.control[i];
            let (max_abs, max_rel) = (scalar(e, c.max_abs), scalar(e, c.max_rel));
            let abs_dy = 1.5 * y2.max_diff(&y1);
            let max_y = y1.max_abs();
            set_scalar(e, c.error, abs_dy);

            let step_err = if abs_dy == 0.0 { HEADROOM * max_abs } else { abs_dy };
            let mut max_step_err = max_abs;
            let bad = step_err > max_abs || step_err > max_rel * max_y;
            if bad {
                max_step_err = max_abs.min(max_rel * max_y);
                let n = scalar(e, self.badsteps) + 1.0;
                set_scalar(e, self.badsteps, n);
            }

            let ratio = Self::error_ratio(&c.history, step_err, max_step_err, bad);
            let new_dt = (dt * ratio).clamp(mindt, maxdt);

            let last = attempt + 1 == tries;
            if !bad || last || new_dt == mindt {
                debug!(attempt, dt, new_dt, step_err, "am01 step accepted");
                let record = (!bad || last).then_some(step_err);
                let y = output_snapshot(e, eq)?;
                commit_output(e, eq, y)?;
                return Ok((dt, new_dt, record));
            }

            debug!(attempt, dt, new_dt, step_err, "am01 step rejected");
            set_output(e, eq, y0.clone());
            e.set_time(t0);
            dt = new_dt;
        }
        Err(EngineError::SolverDiverged(format!(
            "{}: no step accepted after {tries} tries",
            e.quant_by_id(eq.output).name()
        )))
    }
}

impl Solver for Am01Solver {
    /// All equations advance by the same dt: when one of them accepts a
    /// smaller step than the ones before it, every output is restored and the
    /// step starts over once, with that dt taken by every equation.
    fn step(&mut self, e: &mut Engine) -> Result<()> {
        let equations = e.equations().to_vec();
        let t0 = e.time();
        if t0 == 0.0 {
            self.control.iter_mut().for_each(|c| c.history.clear());
        }
        set_scalar(e, self.iterations, 0.0);
        set_scalar(e, self.badsteps, 0.0);
        let bounds = step_bounds(e, self.mindt, self.maxdt)?;
        let (mindt, maxdt) = bounds;

        let mut y0 = Vec::with_capacity(equations.len());
        for eq in &equations {
            y0.push(output_snapshot(e, eq)?);
        }

        let mut dt = e.dt().clamp(mindt, maxdt);
        let mut tries = MAX_TRIES;
        let (next_dt, records) = 'restart: loop {
            let mut next_dt = maxdt;
            let mut records = Vec::with_capacity(equations.len());
            for (i, eq) in equations.iter().enumerate() {
                let (taken, new_dt, record) = self.integrate(e, eq, i, &y0[i], t0, dt, tries, bounds)?;
                if taken < dt && i > 0 {
                    debug!(dt, taken, "am01 restarting step with smaller dt");
                    for (eq, y) in equations.iter().zip(&y0).take(i + 1) {
                        set_output(e, eq, y.clone());
                    }
                    e.set_time(t0);
                    dt = taken;
                    tries = 1;
                    continue 'restart;
                }
                dt = taken;
                next_dt = next_dt.min(new_dt);
                records.push(record);
            }
            break (next_dt, records);
        };

        for (c, record) in self.control.iter_mut().zip(records) {
            if let Some(err) = record {
                c.history.push_front(err);
                c.history.truncate(HISTORY);
            }
        }

        e.set_time(t0);
        e.advance_time(dt);
        e.set_dt(next_dt);
        Ok(())
    }

    fn dependencies(&self) -> (Vec<String>, Vec<String>) {
        (
            vec![
                "t".into(),
                "step".into(),
                "dt".into(),
                "badsteps".into(),
                "bdf_iterations".into(),
            ],
            vec!["mindt".into(), "maxdt".into()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::QuantKind;

    fn relaxing_macrospin() -> Engine {
        let mut e = Engine::new(std::env::temp_dir());
        e.set_grid_size([1, 1, 1]).unwrap();
        e.set_cell_size([1e-9; 3]).unwrap();
        e.load("zeeman").unwrap();
        e.load("llg").unwrap();
        e.load("solver/am01").unwrap();
        e.set_scalar("Msat", 8e5).unwrap();
        e.set_scalar("alpha", 1.0).unwrap();
        e.set_value("H_ext", &[0.0, 0.0, 1e5]).unwrap();
        e.set_scalar("dt", 1e-14).unwrap();
        e
    }

    #[test]
    fn am01_quantities_exist() {
        let e = relaxing_macrospin();
        for name in [
            "mindt",
            "maxdt",
            "badsteps",
            "bdf_iterations",
            "m_error",
            "m_maxAbsError",
            "m_maxRelError",
            "m_maxIterError",
            "m_maxIterations",
        ] {
            assert!(e.has_quant(name), "{name}");
        }
    }

    #[test]
    fn am01_relaxes_towards_field() {
        let mut e = relaxing_macrospin();
        e.steps(2000).unwrap();
        let m = e.get_array("m").unwrap().vec3(0);
        assert!(m[2] > 0.5, "m = {m:?}");
        assert!(((m[0] * m[0] + m[1] * m[1] + m[2] * m[2]).sqrt() - 1.0).abs() < 1e-12);
        assert!(e.get_scalar("bdf_iterations").unwrap() >= 1.0);
    }

    #[test]
    fn error_ratio_is_clamped() {
        let h = VecDeque::new();
        assert_eq!(Am01Solver::error_ratio(&h, 1e-20, 1e-5, false), 1.5);
        assert_eq!(Am01Solver::error_ratio(&h, 1.0, 1e-5, true), 0.1);
        let r = Am01Solver::error_ratio(&h, 1e-5, 1e-5, false);
        assert!((r - HEADROOM).abs() < 1e-12);
    }

    #[test]
    fn slow_fixed_point_reports_divergence() {
        let mut e = relaxing_macrospin();
        e.set_scalar("alpha", 0.1).unwrap();
        e.set_scalar("dt", 1e-12).unwrap();
        e.set_scalar("m_maxIterations", 1.0).unwrap();
        let err = e.step().unwrap_err();
        assert!(matches!(err, EngineError::SolverDiverged(_)), "{err}");
        assert!(err.to_string().contains("m"));
    }

    #[test]
    fn large_error_rejects_and_retries_with_smaller_dt() {
        let mut e = relaxing_macrospin();
        e.set_scalar("alpha", 0.1).unwrap();
        e.set_scalar("dt", 1e-12).unwrap();
        e.set_scalar("m_maxAbsError", 1e-12).unwrap();
        e.step().unwrap();
        assert!(e.get_scalar("badsteps").unwrap() >= 1.0);
        // the accepted step is shorter than the one first tried
        assert!(e.time() > 0.0 && e.time() < 1e-12, "t = {}", e.time());
        assert!(e.dt() < 1e-12);
        let m = e.get_array("m").unwrap().vec3(0);
        assert!(((m[0] * m[0] + m[1] * m[1] + m[2] * m[2]).sqrt() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn equations_share_the_smallest_accepted_dt() {
        let mut e = Engine::new(std::env::temp_dir());
        e.set_grid_size([1, 1, 1]).unwrap();
        e.set_cell_size([1e-9; 3]).unwrap();
        e.load("zeeman").unwrap();
        // u integrates the constant field and accepts any dt; m comes second
        e.add_quant("u", 3, QuantKind::Field, "As/m", "Integrated field").unwrap();
        e.add_pde1("u", "H", false).unwrap();
        e.load("llg").unwrap();
        e.load("solver/am01").unwrap();
        e.set_scalar("Msat", 8e5).unwrap();
        e.set_scalar("alpha", 0.1).unwrap();
        e.set_value("H_ext", &[0.0, 0.0, 1e5]).unwrap();
        e.set_scalar("dt", 1e-14).unwrap();
        e.set_scalar("m_maxAbsError", 1e-12).unwrap();
        e.step().unwrap();

        let taken = e.time();
        assert!(taken > 0.0 && taken < 1e-14, "t = {taken}");
        assert!(e.get_scalar("badsteps").unwrap() >= 1.0);
        // u was redone with the dt m settled on
        let u = e.get_array("u").unwrap().vec3(0);
        assert!((u[2] - taken * 1e5).abs() <= 1e-9 * taken * 1e5, "{u:?}, t = {taken}");
        assert_eq!(u[0], 0.0);
    }

    #[test]
    fn inconsistent_step_bounds_are_an_error() {
        let mut e = relaxing_macrospin();
        e.set_scalar("maxdt", 1e-19).unwrap();
        let err = e.step().unwrap_err();
        assert!(matches!(err, EngineError::InvalidValue { .. }), "{err}");
        assert_eq!(e.time(), 0.0);
    }
}
