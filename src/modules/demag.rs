// src/modules/demag.rs

use crate::effective_field::DemagField;
use crate::engine::{Engine, Updater};
use crate::error::{EngineError, Result};
use crate::grid::Grid;
use crate::quant::{QuantId, QuantKind, VECTOR};

/// Builds the kernel on first use and keeps it for the engine's lifetime.
struct DemagUpdater {
    grid: Grid,
    h_d: QuantId,
    m: QuantId,
    msat: QuantId,
    field: Option<DemagField>,
}

impl Updater for DemagUpdater {
    fn update(&mut self, e: &mut Engine) -> Result<()> {
        let grid = self.grid;
        let field = self.field.get_or_insert_with(|| DemagField::new(grid));
        let mut out = e.take_array(self.h_d)?;
        let res = match e.quant_by_id(self.m).array() {
            Some(m) => {
                field.compute(m, e.quant_by_id(self.msat), &mut out);
                Ok(())
            }
            None => Err(EngineError::wrong_kind("m", "magnetization has no array")),
        };
        e.put_array(self.h_d, out);
        res
    }
}

pub fn load_demag(e: &mut Engine) -> Result<()> {
    e.load("magnetization")?;
    e.load("hfield")?;

    let h_d = e.add_quant("H_d", VECTOR, QuantKind::Field, "A/m", "Magnetostatic field")?;
    e.depends("H_d", "m")?;
    e.depends("H_d", "Msat")?;
    let updater = DemagUpdater {
        grid: e.grid()?,
        h_d,
        m: e.id("m")?,
        msat: e.id("Msat")?,
        field: None,
    };
    e.set_updater(h_d, Box::new(updater));
    e.add_to_sum("H", "H_d", 1.0)
}

pub fn load_demagexch(e: &mut Engine) -> Result<()> {
    e.load("demag")?;
    e.load("exchange")
}
