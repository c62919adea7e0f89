// src/llg.rs

use rayon::prelude::*;

use crate::array::FieldArray;
use crate::quant::Quant;
use crate::vec3::cross;

/// Landau-Lifshitz torque dm/dt (1/s), with H in A/m and γ in m/As:
///
///   τ = -γ/(1+α²) [ m × H + α m × (m × H) ]
///
/// Cells with Msat = 0 get zero torque. Overwrites `out`.
pub fn llg_torque(
    m: &FieldArray,
    h: &FieldArray,
    alpha: &Quant,
    gamma: f64,
    msat: &Quant,
    out: &mut FieldArray,
) {
    let (tx, ty, tz) = out.comps3_mut();
    tx.par_iter_mut()
        .zip(ty.par_iter_mut())
        .zip(tz.par_iter_mut())
        .enumerate()
        .for_each(|(idx, ((tx, ty), tz))| {
            if msat.value_at(0, idx) == 0.0 {
                *tx = 0.0;
                *ty = 0.0;
                *tz = 0.0;
                return;
            }
            let a = alpha.value_at(0, idx);
            let mv = m.vec3(idx);
            let mxh = cross(mv, h.vec3(idx));
            let mxmxh = cross(mv, mxh);
            let pref = -gamma / (1.0 + a * a);
            *tx = pref * (mxh[0] + a * mxmxh[0]);
            *ty = pref * (mxh[1] + a * mxmxh[1]);
            *tz = pref * (mxh[2] + a * mxmxh[2]);
        });
}
