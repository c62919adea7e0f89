// src/modules/regions.rs

use crate::engine::Engine;
use crate::error::Result;
use crate::quant::{QuantKind, SCALAR};

/// Region definition: a scalar mask tagging each cell with a region number.
pub fn load_regions(e: &mut Engine) -> Result<()> {
    e.add_quant("regionDefinition", SCALAR, QuantKind::Mask, "", "Region index per cell")?;
    Ok(())
}
