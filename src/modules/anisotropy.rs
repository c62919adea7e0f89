// src/modules/anisotropy.rs

use crate::effective_field::uniaxial_anisotropy_field;
use crate::engine::{Engine, Updater};
use crate::error::{EngineError, Result};
use crate::quant::{QuantId, QuantKind, SCALAR, VECTOR};

struct UniaxialUpdater {
    h_anis: QuantId,
    m: QuantId,
    ku: QuantId,
    anis_u: QuantId,
    msat: QuantId,
}

impl Updater for UniaxialUpdater {
    fn update(&mut self, e: &mut Engine) -> Result<()> {
        let mut out = e.take_array(self.h_anis)?;
        let res = match e.quant_by_id(self.m).array() {
            Some(m) => {
                uniaxial_anisotropy_field(
                    m,
                    e.quant_by_id(self.ku),
                    e.quant_by_id(self.anis_u),
                    e.quant_by_id(self.msat),
                    &mut out,
                );
                Ok(())
            }
            None => Err(EngineError::wrong_kind("m", "magnetization has no array")),
        };
        e.put_array(self.h_anis, out);
        res
    }
}

pub fn load_uniaxial(e: &mut Engine) -> Result<()> {
    e.load("magnetization")?;
    e.load("hfield")?;

    let ku = e.add_quant("Ku", SCALAR, QuantKind::Mask, "J/m3", "Uniaxial anisotropy constant")?;
    let anis_u = e.add_quant("anisU", VECTOR, QuantKind::Mask, "", "Uniaxial anisotropy axis")?;
    e.set_value("anisU", &[0.0, 0.0, 1.0])?;
    let h_anis = e.add_quant("H_anis", VECTOR, QuantKind::Field, "A/m", "Uniaxial anisotropy field")?;
    for p in ["m", "Ku", "anisU", "Msat"] {
        e.depends("H_anis", p)?;
    }
    let updater = UniaxialUpdater {
        h_anis,
        m: e.id("m")?,
        ku,
        anis_u,
        msat: e.id("Msat")?,
    };
    e.set_updater(h_anis, Box::new(updater));
    e.add_to_sum("H", "H_anis", 1.0)
}
