// src/effective_field/demag.rs
//
// Magnetostatic (demagnetising) field via FFT-accelerated convolution.
//
//   H_demag_i = -Σ_j N_ij ⊛ M_j,   M = Msat m (A/m)
//
// - Zero padding to 2n per open direction (linear convolution), none for periodic
//   directions (circular convolution over the summed images).
// - N is Newell's cell-averaged tensor, point-dipole beyond the asymptotic radius.
// - The kernel is built and transformed once per grid and kept by the caller.

use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::array::FieldArray;
use crate::effective_field::newell::{demag_tensor, Tensor6, XX, XY, XZ, YY, YZ, ZZ};
use crate::fft::{axis_displacements, pad_idx, padded_size, Fft3, C64};
use crate::grid::Grid;
use crate::quant::Quant;

/// Real-space demag kernel on the padded grid, components ordered as [`Tensor6`].
pub fn demag_kernel(grid: &Grid) -> ([usize; 3], [Vec<f64>; 6]) {
    let pad = padded_size(grid);
    let n_pad = pad[0] * pad[1] * pad[2];

    // Only cell-size ratios matter: normalise by the largest edge.
    let max_edge = grid.cell.iter().cloned().fold(0.0_f64, f64::max);
    let cell = [
        grid.cell[0] / max_edge,
        grid.cell[1] / max_edge,
        grid.cell[2] / max_edge,
    ];

    let ax: Vec<_> = (0..3)
        .map(|d| axis_displacements(grid.size[d], grid.periodic[d], pad[d]))
        .collect();

    // One z-plane of displacements per task; partial sums merged afterwards.
    let partial: Vec<Vec<(usize, Tensor6)>> = ax[2]
        .par_iter()
        .map(|&(bz, sz, wz)| {
            let mut out = Vec::with_capacity(ax[0].len() * ax[1].len());
            for &(by, sy, wy) in &ax[1] {
                for &(bx, sx, wx) in &ax[0] {
                    let r = [
                        sx as f64 * cell[0],
                        sy as f64 * cell[1],
                        sz as f64 * cell[2],
                    ];
                    let mut n = demag_tensor(r, cell);
                    let w = wx * wy * wz;
                    if w != 1.0 {
                        n.iter_mut().for_each(|v| *v *= w);
                    }
                    out.push((pad_idx(pad, bx, by, bz), n));
                }
            }
            out
        })
        .collect();

    let mut k: [Vec<f64>; 6] = std::array::from_fn(|_| vec![0.0; n_pad]);
    for plane in partial {
        for (idx, n) in plane {
            for c in 0..6 {
                k[c][idx] += n[c];
            }
        }
    }
    (pad, k)
}

/// Demag convolution for one grid: k-space kernel plus scratch buffers.
pub struct DemagField {
    grid: Grid,
    pad: [usize; 3],
    fft: Fft3,
    kernel: [Vec<C64>; 6],
    m: [Vec<C64>; 3],
}

impl DemagField {
    pub fn new(grid: Grid) -> Self {
        let start = Instant::now();
        let (pad, real) = demag_kernel(&grid);
        let fft = Fft3::new(pad);
        let kernel = real.map(|re| {
            let mut c: Vec<C64> = re.into_iter().map(|v| C64::new(v, 0.0)).collect();
            fft.forward(&mut c);
            c
        });
        info!(
            nx = grid.size[0],
            ny = grid.size[1],
            nz = grid.size[2],
            px = pad[0],
            py = pad[1],
            pz = pad[2],
            elapsed_ms = start.elapsed().as_millis() as u64,
            "demag kernel ready"
        );
        let n_pad = fft.len();
        Self {
            grid,
            pad,
            fft,
            kernel,
            m: std::array::from_fn(|_| vec![C64::new(0.0, 0.0); n_pad]),
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Compute H_demag (A/m) into `out` (overwrites).
    pub fn compute(&mut self, m: &FieldArray, msat: &Quant, out: &mut FieldArray) {
        let [nx, ny, nz] = self.grid.size;
        let pad = self.pad;

        for c in 0..3 {
            let buf = &mut self.m[c];
            buf.fill(C64::new(0.0, 0.0));
            for k in 0..nz {
                for j in 0..ny {
                    for i in 0..nx {
                        let idx = self.grid.idx(i, j, k);
                        let v = msat.value_at(0, idx) * m.get(c, idx);
                        buf[pad_idx(pad, i, j, k)] = C64::new(v, 0.0);
                    }
                }
            }
            self.fft.forward(buf);
        }

        // k-space tensor product, written back into the M buffers.
        let [mx, my, mz] = &mut self.m;
        let k = &self.kernel;
        mx.par_iter_mut()
            .zip(my.par_iter_mut())
            .zip(mz.par_iter_mut())
            .enumerate()
            .for_each(|(q, ((mx, my), mz))| {
                let (a, b, c) = (*mx, *my, *mz);
                *mx = -(k[XX][q] * a + k[XY][q] * b + k[XZ][q] * c);
                *my = -(k[XY][q] * a + k[YY][q] * b + k[YZ][q] * c);
                *mz = -(k[XZ][q] * a + k[YZ][q] * b + k[ZZ][q] * c);
            });

        for c in 0..3 {
            self.fft.inverse(&mut self.m[c]);
            let buf = &self.m[c];
            let dst = out.comp_mut(c);
            for k in 0..nz {
                for j in 0..ny {
                    for i in 0..nx {
                        dst[self.grid.idx(i, j, k)] = buf[pad_idx(pad, i, j, k)].re;
                    }
                }
            }
        }
        debug!("demag field evaluated");
    }
}
