// src/effective_field/exchange.rs

use rayon::prelude::*;

use crate::array::FieldArray;
use crate::grid::Grid;
use crate::params::MU0;
use crate::quant::Quant;

/// Exchange field (A/m): H_ex = 2 Aex / (μ0 Msat) ∇²m.
///
/// Six-neighbour Laplacian. Open boundaries and non-magnetic neighbours
/// (Msat = 0) contribute nothing (Neumann); periodic directions wrap.
/// Overwrites `out`.
pub fn exchange_field(grid: &Grid, m: &FieldArray, aex: &Quant, msat: &Quant, out: &mut FieldArray) {
    let inv_d2 = [
        1.0 / (grid.cell[0] * grid.cell[0]),
        1.0 / (grid.cell[1] * grid.cell[1]),
        1.0 / (grid.cell[2] * grid.cell[2]),
    ];
    let (hx, hy, hz) = out.comps3_mut();

    hx.par_iter_mut()
        .zip(hy.par_iter_mut())
        .zip(hz.par_iter_mut())
        .enumerate()
        .for_each(|(idx, ((hx, hy), hz))| {
            let ms = msat.value_at(0, idx);
            let a = aex.value_at(0, idx);
            if ms == 0.0 || a == 0.0 {
                *hx = 0.0;
                *hy = 0.0;
                *hz = 0.0;
                return;
            }
            let (i, j, k) = grid.ijk(idx);
            let m0 = m.vec3(idx);
            let mut lap = [0.0; 3];
            for dim in 0..3 {
                if grid.size[dim] == 1 && !grid.is_periodic(dim) {
                    continue;
                }
                for step in [-1isize, 1] {
                    let n = grid.neighbor(i, j, k, dim, step);
                    if n == idx || msat.value_at(0, n) == 0.0 {
                        continue;
                    }
                    let mn = m.vec3(n);
                    for c in 0..3 {
                        lap[c] += (mn[c] - m0[c]) * inv_d2[dim];
                    }
                }
            }
            let pref = 2.0 * a / (MU0 * ms);
            *hx = pref * lap[0];
            *hy = pref * lap[1];
            *hz = pref * lap[2];
        });
}
