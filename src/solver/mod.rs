// src/solver/mod.rs
//
// Time integrators for the engine's first-order equations d(out)/dt = in.
//
// Solvers work on snapshots of the output arrays: they write trial values into
// the output quantity, invalidate it, and let the engine recompute the input
// (e.g. m -> H -> torque) lazily.

pub mod am01;
pub mod euler;
pub mod rk12;

pub use am01::Am01Solver;
pub use euler::EulerSolver;
pub use rk12::Rk12Solver;

use crate::array::FieldArray;
use crate::engine::{Engine, Equation};
use crate::error::{EngineError, Result};
use crate::params::{DEFAULT_MAXDT, DEFAULT_MINDT};
use crate::quant::{QuantId, QuantKind, Verifier, SCALAR};

/// Copy of an equation's output array.
pub(crate) fn output_snapshot(e: &Engine, eq: &Equation) -> Result<FieldArray> {
    let q = e.quant_by_id(eq.output);
    q.array()
        .cloned()
        .ok_or_else(|| EngineError::wrong_kind(q.name(), "equation output has no array"))
}

/// Up-to-date copy of an equation's input (the time derivative).
pub(crate) fn input_snapshot(e: &mut Engine, eq: &Equation) -> Result<FieldArray> {
    e.update_id(eq.input)?;
    let q = e.quant_by_id(eq.input);
    let mut a = q
        .array()
        .cloned()
        .ok_or_else(|| EngineError::wrong_kind(q.name(), "equation input has no array"))?;
    let mul = q.multiplier()[0];
    if mul != 1.0 {
        a.as_mut_slice().iter_mut().for_each(|v| *v *= mul);
    }
    Ok(a)
}

/// Replace the output array with a trial value (no renormalisation).
pub(crate) fn set_output(e: &mut Engine, eq: &Equation, y: FieldArray) {
    e.put_array(eq.output, y);
    e.invalidate_id(eq.output);
}

/// Replace the output array with an accepted value (renormalised if required).
pub(crate) fn commit_output(e: &mut Engine, eq: &Equation, y: FieldArray) -> Result<()> {
    e.put_array(eq.output, y);
    e.finish_output(eq)
}

/// Add a scalar value quantity with a default and optional verifier.
pub(crate) fn add_scalar(
    e: &mut Engine,
    name: &str,
    unit: &str,
    desc: &str,
    value: f64,
    verifier: Option<Verifier>,
) -> Result<QuantId> {
    let id = e.add_quant(name, SCALAR, QuantKind::Value, unit, desc)?;
    e.quant_mut_by_id(id).multiplier[0] = value;
    if let Some(v) = verifier {
        e.set_verifier(id, v);
    }
    Ok(id)
}

/// Shared preconditions for loading a solver.
pub(crate) fn check_loadable(e: &Engine) -> Result<()> {
    if e.has_solver() {
        return Err(EngineError::SolverAlreadySet);
    }
    if e.equations().is_empty() {
        return Err(EngineError::invalid_argument(
            "no equations to solve; load a module with dynamics (e.g. llg) first",
        ));
    }
    Ok(())
}

/// `mindt`, `maxdt` and `badsteps`, shared by the adaptive solvers.
pub(crate) fn add_step_control(e: &mut Engine) -> Result<(QuantId, QuantId, QuantId)> {
    let mindt = add_scalar(e, "mindt", "s", "Minimum time step", DEFAULT_MINDT, Some(Verifier::Positive))?;
    let maxdt = add_scalar(e, "maxdt", "s", "Maximum time step", DEFAULT_MAXDT, Some(Verifier::Positive))?;
    let bad = add_scalar(e, "badsteps", "", "Number of time steps that had to be re-done", 0.0, None)?;
    Ok((mindt, maxdt, bad))
}

/// Scalar value by id (solver tolerances, step bounds).
#[inline]
pub(crate) fn scalar(e: &Engine, id: QuantId) -> f64 {
    e.quant_by_id(id).multiplier()[0]
}

/// Current `(mindt, maxdt)`. Both are verified positive, but not against each other.
pub(crate) fn step_bounds(e: &Engine, mindt: QuantId, maxdt: QuantId) -> Result<(f64, f64)> {
    let (lo, hi) = (scalar(e, mindt), scalar(e, maxdt));
    if lo > hi {
        return Err(EngineError::invalid_value(
            "mindt",
            format!("{lo:e} exceeds maxdt {hi:e}"),
        ));
    }
    Ok((lo, hi))
}

/// Set a scalar value by id, invalidating dependents.
pub(crate) fn set_scalar(e: &mut Engine, id: QuantId, v: f64) {
    e.quant_mut_by_id(id).multiplier[0] = v;
    e.invalidate_id(id);
}

pub fn load_euler(e: &mut Engine) -> Result<()> {
    check_loadable(e)?;
    e.set_solver(Box::new(EulerSolver))
}

pub fn load_rk12(e: &mut Engine) -> Result<()> {
    check_loadable(e)?;
    let s = Rk12Solver::new(e)?;
    e.set_solver(Box::new(s))
}

pub fn load_am01(e: &mut Engine) -> Result<()> {
    check_loadable(e)?;
    let s = Am01Solver::new(e)?;
    e.set_solver(Box::new(s))
}
