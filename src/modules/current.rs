// src/modules/current.rs
//
// Electrical current paths: the electrostatic field of a charge distribution
// Q (C/m3), and the current density j = E / rho it drives.
//
//   E = kern_el ⊛ Q,   kern_el(r) = V/(4π ε0) r/|r|^3   (zero at r = 0)
//
// kern_el lives on the padded FFT grid, so it can be inspected and saved.

use std::f64::consts::PI;

use rayon::prelude::*;
use tracing::debug;

use crate::array::FieldArray;
use crate::engine::{Engine, Updater};
use crate::error::Result;
use crate::fft::{axis_displacements, pad_idx, padded_size, Fft3, C64};
use crate::grid::Grid;
use crate::params::EPSILON0;
use crate::quant::{QuantId, QuantKind, Verifier, SCALAR, VECTOR};

/// Real-space electrostatic kernel on the padded grid (V/m per C/m3).
pub fn electric_kernel(grid: &Grid) -> FieldArray {
    let pad = padded_size(grid);
    let mut k = FieldArray::zeros(3, pad);
    let pref = grid.cell_volume() / (4.0 * PI * EPSILON0);
    let ax: Vec<_> = (0..3)
        .map(|d| axis_displacements(grid.size[d], grid.periodic[d], pad[d]))
        .collect();
    for &(bz, sz, wz) in &ax[2] {
        for &(by, sy, wy) in &ax[1] {
            for &(bx, sx, wx) in &ax[0] {
                if sx == 0 && sy == 0 && sz == 0 {
                    continue;
                }
                let r = [
                    sx as f64 * grid.cell[0],
                    sy as f64 * grid.cell[1],
                    sz as f64 * grid.cell[2],
                ];
                let r2 = r[0] * r[0] + r[1] * r[1] + r[2] * r[2];
                let f = wx * wy * wz * pref / (r2 * r2.sqrt());
                let idx = pad_idx(pad, bx, by, bz);
                for c in 0..3 {
                    let v = k.get(c, idx) + f * r[c];
                    k.set(c, idx, v);
                }
            }
        }
    }
    k
}

struct ElectricFieldUpdater {
    grid: Grid,
    e_field: QuantId,
    kern: QuantId,
    q: QuantId,
    /// Transformed kernel and the kern_el revision it was built from.
    plan: Option<(u64, Fft3, [Vec<C64>; 3])>,
}

impl Updater for ElectricFieldUpdater {
    fn update(&mut self, e: &mut Engine) -> Result<()> {
        let pad = padded_size(&self.grid);
        let revision = e.quant_by_id(self.kern).revision();
        if self.plan.as_ref().map_or(true, |(r, _, _)| *r != revision) {
            let fft = Fft3::new(pad);
            let kern = e.quant_by_id(self.kern).expanded(pad);
            let k = std::array::from_fn(|c| {
                let mut v: Vec<C64> = kern.comp(c).iter().map(|&x| C64::new(x, 0.0)).collect();
                fft.forward(&mut v);
                v
            });
            debug!(revision, "electrostatic kernel transformed");
            self.plan = Some((revision, fft, k));
        }
        let Some((_, fft, kern)) = self.plan.as_ref() else {
            return Ok(());
        };

        let [nx, ny, nz] = self.grid.size;
        let q = e.quant_by_id(self.q);
        let mut rho = vec![C64::new(0.0, 0.0); fft.len()];
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    rho[pad_idx(pad, i, j, k)] = C64::new(q.value_at(0, self.grid.idx(i, j, k)), 0.0);
                }
            }
        }
        fft.forward(&mut rho);

        let mut out = e.take_array(self.e_field)?;
        for c in 0..3 {
            let mut buf: Vec<C64> = rho.par_iter().zip(kern[c].par_iter()).map(|(a, b)| a * b).collect();
            fft.inverse(&mut buf);
            let dst = out.comp_mut(c);
            for k in 0..nz {
                for j in 0..ny {
                    for i in 0..nx {
                        dst[self.grid.idx(i, j, k)] = buf[pad_idx(pad, i, j, k)].re;
                    }
                }
            }
        }
        e.put_array(self.e_field, out);
        debug!("electric field evaluated");
        Ok(())
    }
}

/// j = E / rho, zero where rho = 0.
struct CurrentDensityUpdater {
    j: QuantId,
    e_field: QuantId,
    rho: QuantId,
}

impl Updater for CurrentDensityUpdater {
    fn update(&mut self, e: &mut Engine) -> Result<()> {
        let mut out = e.take_array(self.j)?;
        let ef = e.quant_by_id(self.e_field);
        let rho = e.quant_by_id(self.rho);
        for c in 0..3 {
            out.comp_mut(c).par_iter_mut().enumerate().for_each(|(idx, v)| {
                let r = rho.value_at(0, idx);
                *v = if r == 0.0 { 0.0 } else { ef.value_at(c, idx) / r };
            });
        }
        e.put_array(self.j, out);
        Ok(())
    }
}

pub fn load_current(e: &mut Engine) -> Result<()> {
    let grid = e.grid()?;
    let rho = e.add_quant("rho", SCALAR, QuantKind::Mask, "Ohm*m", "Electrical resistivity")?;
    e.set_verifier(rho, Verifier::NonNegative);
    let q = e.add_quant("Q", SCALAR, QuantKind::Mask, "C/m3", "Electrical charge density")?;

    let pad = padded_size(&grid);
    let kern = e.add_field_sized("kern_el", VECTOR, pad, "V/m", "Electrostatic kernel")?;
    let k = electric_kernel(&grid);
    e.quant_mut_by_id(kern).array = Some(k);

    let ef = e.add_quant("E", VECTOR, QuantKind::Field, "V/m", "Electrical field")?;
    e.depends("E", "Q")?;
    e.depends("E", "kern_el")?;
    e.set_updater(
        ef,
        Box::new(ElectricFieldUpdater {
            grid,
            e_field: ef,
            kern,
            q,
            plan: None,
        }),
    );

    let j = e.add_quant("j", VECTOR, QuantKind::Field, "A/m2", "Electrical current density")?;
    e.depends("j", "E")?;
    e.depends("j", "rho")?;
    e.set_updater(j, Box::new(CurrentDensityUpdater { j, e_field: ef, rho }));
    Ok(())
}
