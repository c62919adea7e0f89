// src/modules/micromag.rs
//
// Core micromagnetic modules: magnetization, hfield, zeeman, llg and the
// micromagnetism meta module.

use crate::array::FieldArray;
use crate::engine::{normalize_cells, Engine, Updater};
use crate::error::{EngineError, Result};
use crate::llg::llg_torque;
use crate::params::GAMMA0;
use crate::quant::{QuantId, QuantKind, Verifier, SCALAR, VECTOR};
use crate::updaters::{AverageUpdater, MaxAbsUpdater, SumUpdater};

pub fn load_magnetization(e: &mut Engine) -> Result<()> {
    if e.has_quant("m") {
        return Ok(());
    }
    let m = e.add_quant("m", VECTOR, QuantKind::Field, "", "Reduced magnetization (unit length)")?;
    let msat = e.add_quant("Msat", SCALAR, QuantKind::Mask, "A/m", "Saturation magnetization")?;
    e.set_verifier(msat, Verifier::NonNegative);

    // Start uniformly along +x
    e.quant_mut_by_id(m).array_mut()?.set_uniform(&[1.0, 0.0, 0.0]);

    let avg = e.add_quant("m_avg", VECTOR, QuantKind::Value, "", "Average magnetization")?;
    e.depends("m_avg", "m")?;
    e.set_updater(avg, Box::new(AverageUpdater::new(avg, m)));
    Ok(())
}

pub fn load_hfield(e: &mut Engine) -> Result<()> {
    if e.has_quant("H") {
        return Ok(());
    }
    let h = e.add_quant("H", VECTOR, QuantKind::Field, "A/m", "Total effective field")?;
    e.set_updater(h, Box::new(SumUpdater::new(h)));
    Ok(())
}

pub fn load_zeeman(e: &mut Engine) -> Result<()> {
    e.load("hfield")?;
    e.add_quant("H_ext", VECTOR, QuantKind::Value, "A/m", "Externally applied field")?;
    e.add_to_sum("H", "H_ext", 1.0)
}

struct TorqueUpdater {
    torque: QuantId,
    m: QuantId,
    h: QuantId,
    alpha: QuantId,
    gamma: QuantId,
    msat: QuantId,
}

impl Updater for TorqueUpdater {
    fn update(&mut self, e: &mut Engine) -> Result<()> {
        let mut out = e.take_array(self.torque)?;
        let gamma = e.quant_by_id(self.gamma).scalar()?;
        let res = match (e.quant_by_id(self.m).array(), e.quant_by_id(self.h).array()) {
            (Some(m), Some(h)) => {
                llg_torque(m, h, e.quant_by_id(self.alpha), gamma, e.quant_by_id(self.msat), &mut out);
                Ok(())
            }
            _ => Err(EngineError::wrong_kind("torque", "m and H must be fields")),
        };
        e.put_array(self.torque, out);
        res
    }
}

pub fn load_llg(e: &mut Engine) -> Result<()> {
    e.load("magnetization")?;
    e.load("hfield")?;

    let alpha = e.add_quant("alpha", SCALAR, QuantKind::Mask, "", "Gilbert damping constant")?;
    e.set_verifier(alpha, Verifier::NonNegative);
    let gamma = e.add_quant("gamma", SCALAR, QuantKind::Value, "m/As", "Gyromagnetic ratio")?;
    e.set_value("gamma", &[GAMMA0])?;

    let torque = e.add_quant("torque", VECTOR, QuantKind::Field, "/s", "Landau-Lifshitz torque dm/dt")?;
    for p in ["m", "H", "alpha", "gamma", "Msat"] {
        e.depends("torque", p)?;
    }
    let (m, h, msat) = (e.id("m")?, e.id("H")?, e.id("Msat")?);
    e.set_updater(
        torque,
        Box::new(TorqueUpdater {
            torque,
            m,
            h,
            alpha,
            gamma,
            msat,
        }),
    );
    e.add_pde1("m", "torque", true)
}

pub fn load_micromagnetism(e: &mut Engine) -> Result<()> {
    for m in ["hfield", "magnetization", "zeeman", "demagexch", "llg", "regions"] {
        e.load(m)?;
    }
    let torque = e.id("torque")?;
    let unit = e.quant_by_id(torque).unit().to_string();
    let max = e.add_quant("maxtorque", SCALAR, QuantKind::Value, &unit, "Maximum torque")?;
    e.depends("maxtorque", "torque")?;
    e.set_updater(max, Box::new(MaxAbsUpdater::new(max, torque)));
    Ok(())
}

/// Set `m` and `Msat` from a full magnetization M (A/m): `m = M/|M|`, the
/// Msat multiplier becomes max |M| and its mask `|M| / max |M|`.
pub fn decompose_magnetization(e: &mut Engine, full: &FieldArray) -> Result<()> {
    if full.ncomp() != 3 {
        return Err(EngineError::ComponentMismatch {
            quant: "M".to_string(),
            expected: 3,
            got: full.ncomp(),
        });
    }
    e.load("magnetization")?;
    let full = full.resample_nearest(e.grid()?.size);

    let mut norm = FieldArray::zeros(1, full.size());
    for idx in 0..full.n_cells() {
        let [x, y, z] = full.vec3(idx);
        norm.set(0, idx, (x * x + y * y + z * z).sqrt());
    }
    let max = norm.max_abs();
    if !max.is_finite() {
        return Err(EngineError::invalid_value("M", "magnetization is not finite"));
    }
    if max > 0.0 {
        norm.as_mut_slice().iter_mut().for_each(|v| *v /= max);
        let mut dir = full;
        normalize_cells(&mut dir);
        e.set_array("m", &dir)?;
    }
    e.set_mask("Msat", &norm)?;
    e.set_scalar("Msat", max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        let mut e = Engine::new(std::env::temp_dir());
        e.set_grid_size([2, 2, 1]).unwrap();
        e.set_cell_size([5e-9; 3]).unwrap();
        e
    }

    #[test]
    fn llg_registers_unit_length_equation() {
        let mut e = engine();
        e.load("llg").unwrap();
        let eq = e.equations()[0];
        assert_eq!(eq.output, e.id("m").unwrap());
        assert_eq!(eq.input, e.id("torque").unwrap());
        assert!(eq.unit_length);
        assert_eq!(e.get_scalar("gamma").unwrap(), GAMMA0);
    }

    #[test]
    fn zeeman_torque_on_macrospin() {
        let mut e = engine();
        e.load("zeeman").unwrap();
        e.load("llg").unwrap();
        e.set_scalar("Msat", 8e5).unwrap();
        e.set_value("H_ext", &[0.0, 0.0, 1e5]).unwrap();
        let t = e.get_array("torque").unwrap();
        // m = +x: τ_y = +γ H
        assert!((t.vec3(3)[1] - GAMMA0 * 1e5).abs() < 1e-3 * GAMMA0);

        // changing alpha invalidates the torque
        e.set_scalar("alpha", 1.0).unwrap();
        let t = e.get_array("torque").unwrap();
        assert!(t.vec3(0)[2] > 0.0);
    }

    #[test]
    fn micromagnetism_provides_maxtorque() {
        let mut e = engine();
        e.load("micromagnetism").unwrap();
        for m in ["hfield", "magnetization", "zeeman", "demag", "exchange", "llg", "regions"] {
            assert!(e.is_loaded(m), "{m}");
        }
        e.set_scalar("Msat", 8e5).unwrap();
        e.set_value("H_ext", &[0.0, 1e4, 0.0]).unwrap();
        let mt = e.get_scalar("maxtorque").unwrap();
        assert!(mt > 0.0);
        assert_eq!(e.quant("maxtorque").unwrap().unit(), "/s");
    }

    #[test]
    fn full_magnetization_splits_into_direction_and_msat() {
        let mut e = engine();
        let mut full = FieldArray::zeros(3, [2, 2, 1]);
        full.set_vec3(0, [0.0, 0.0, 8e5]);
        full.set_vec3(1, [4e5, 0.0, 0.0]);
        full.set_vec3(2, [0.0, -8e5, 0.0]);
        decompose_magnetization(&mut e, &full).unwrap();

        assert_eq!(e.get_scalar("Msat").unwrap(), 8e5);
        let m = e.get_array("m").unwrap();
        assert_eq!(m.vec3(0), [0.0, 0.0, 1.0]);
        assert_eq!(m.vec3(1), [1.0, 0.0, 0.0]);
        assert_eq!(m.vec3(2), [0.0, -1.0, 0.0]);
        let msat = e.get_array("Msat").unwrap();
        assert_eq!(msat.get(0, 1), 4e5);
        assert_eq!(msat.get(0, 3), 0.0);

        assert!(decompose_magnetization(&mut e, &FieldArray::zeros(1, [2, 2, 1])).is_err());
    }
}
