// src/effective_field/anisotropy.rs

use rayon::prelude::*;

use crate::array::FieldArray;
use crate::params::MU0;
use crate::quant::Quant;
use crate::vec3::{dot, normalize};

/// Uniaxial anisotropy field (A/m).
///
/// For w_ani = Ku [1 - (m·u)^2]:
///   H_anis = 2 Ku / (μ0 Msat) (m·u) u
///
/// `anis_u` is normalised per cell. Overwrites `out`.
pub fn uniaxial_anisotropy_field(
    m: &FieldArray,
    ku: &Quant,
    anis_u: &Quant,
    msat: &Quant,
    out: &mut FieldArray,
) {
    let (hx, hy, hz) = out.comps3_mut();
    hx.par_iter_mut()
        .zip(hy.par_iter_mut())
        .zip(hz.par_iter_mut())
        .enumerate()
        .for_each(|(idx, ((hx, hy), hz))| {
            let ms = msat.value_at(0, idx);
            let k = ku.value_at(0, idx);
            if ms == 0.0 || k == 0.0 {
                *hx = 0.0;
                *hy = 0.0;
                *hz = 0.0;
                return;
            }
            let u = normalize(anis_u.vec3_at(idx));
            let coeff = 2.0 * k / (MU0 * ms) * dot(m.vec3(idx), u);
            *hx = coeff * u[0];
            *hy = coeff * u[1];
            *hz = coeff * u[2];
        });
}
