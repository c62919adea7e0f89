// src/modules/exchange.rs

use crate::effective_field::exchange_field;
use crate::engine::{Engine, Updater};
use crate::error::{EngineError, Result};
use crate::grid::Grid;
use crate::quant::{QuantId, QuantKind, Verifier, SCALAR, VECTOR};

struct ExchangeUpdater {
    grid: Grid,
    h_ex: QuantId,
    m: QuantId,
    aex: QuantId,
    msat: QuantId,
}

impl Updater for ExchangeUpdater {
    fn update(&mut self, e: &mut Engine) -> Result<()> {
        let mut out = e.take_array(self.h_ex)?;
        let res = match e.quant_by_id(self.m).array() {
            Some(m) => {
                exchange_field(&self.grid, m, e.quant_by_id(self.aex), e.quant_by_id(self.msat), &mut out);
                Ok(())
            }
            None => Err(EngineError::wrong_kind("m", "magnetization has no array")),
        };
        e.put_array(self.h_ex, out);
        res
    }
}

pub fn load_exchange(e: &mut Engine) -> Result<()> {
    e.load("magnetization")?;
    e.load("hfield")?;

    let aex = e.add_quant("Aex", SCALAR, QuantKind::Mask, "J/m", "Exchange coefficient")?;
    e.set_verifier(aex, Verifier::NonNegative);
    let h_ex = e.add_quant("H_ex", VECTOR, QuantKind::Field, "A/m", "Exchange field")?;
    for p in ["m", "Aex", "Msat"] {
        e.depends("H_ex", p)?;
    }
    let updater = ExchangeUpdater {
        grid: e.grid()?,
        h_ex,
        m: e.id("m")?,
        aex,
        msat: e.id("Msat")?,
    };
    e.set_updater(h_ex, Box::new(updater));
    e.add_to_sum("H", "H_ex", 1.0)
}
