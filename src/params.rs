// src/params.rs
//
// Physical constants and module defaults (SI units).

use std::f64::consts::PI;

/// Vacuum permeability (T·m/A).
pub const MU0: f64 = 4.0 * PI * 1e-7;

/// Default gyromagnetic ratio γ0 = μ0·γe (m/As), as used with H in A/m.
pub const GAMMA0: f64 = 2.211e5;

/// Vacuum permittivity (F/m).
pub const EPSILON0: f64 = 8.854_187_817e-12;

/// Default time step for a freshly created engine (s).
pub const DEFAULT_DT: f64 = 1e-15;

/// Default adaptive step bounds (s).
pub const DEFAULT_MINDT: f64 = 1e-18;
pub const DEFAULT_MAXDT: f64 = 1e-10;

/// Safety factor applied to adaptive step-size predictions.
pub const HEADROOM: f64 = 0.8;
