// src/modules/mod.rs
//
// Module registry: named loaders that add quantities, updaters and equations to an
// engine. Loading is idempotent (see Engine::load), so modules freely load the
// modules they build on.

pub mod anisotropy;
pub mod current;
pub mod demag;
pub mod exchange;
pub mod micromag;
pub mod regions;

use std::sync::OnceLock;

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::solver;

pub type Loader = fn(&mut Engine) -> Result<()>;

#[derive(Clone, Copy)]
pub struct ModuleSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub loader: Loader,
}

static REGISTRY: OnceLock<Vec<ModuleSpec>> = OnceLock::new();

fn spec(name: &'static str, description: &'static str, loader: Loader) -> ModuleSpec {
    ModuleSpec {
        name,
        description,
        loader,
    }
}

/// All registered modules, in registration order.
pub fn registry() -> &'static [ModuleSpec] {
    REGISTRY.get_or_init(|| {
        vec![
            spec("magnetization", "Reduced magnetization and saturation magnetization", micromag::load_magnetization),
            spec("hfield", "Total effective field H, the sum of all field terms", micromag::load_hfield),
            spec("zeeman", "Externally applied field", micromag::load_zeeman),
            spec("exchange", "Exchange interaction (6-neighbour)", exchange::load_exchange),
            spec("demag", "Magnetostatic field (Newell kernel, FFT convolution)", demag::load_demag),
            spec("demagexch", "Magnetostatic and exchange fields", demag::load_demagexch),
            spec("anisotropy/uniaxial", "Uniaxial magnetocrystalline anisotropy", anisotropy::load_uniaxial),
            spec("llg", "Landau-Lifshitz-Gilbert torque, dm/dt = torque", micromag::load_llg),
            spec("regions", "Region definition", regions::load_regions),
            spec("micromagnetism", "Basic micromagnetism module", micromag::load_micromagnetism),
            spec("current", "Electrical current paths from a charge distribution", current::load_current),
            spec("solver/euler", "Fixed-step Euler solver", solver::load_euler),
            spec("solver/rk12", "Adaptive Heun solver with Euler error estimate", solver::load_rk12),
            spec("solver/am01", "Adaptive Adams-Moulton 0/1 solver (backward Euler with trapezoidal corrector)", solver::load_am01),
        ]
    })
}

pub fn lookup(name: &str) -> Result<ModuleSpec> {
    registry()
        .iter()
        .find(|m| m.name == name)
        .copied()
        .ok_or_else(|| EngineError::UnknownModule(name.to_string()))
}

/// Human-readable module list (`llg-engine modules`).
pub fn describe() -> String {
    let width = registry().iter().map(|m| m.name.len()).max().unwrap_or(0);
    registry()
        .iter()
        .map(|m| format!("{:<width$}  {}\n", m.name, m.description, width = width))
        .collect()
}
