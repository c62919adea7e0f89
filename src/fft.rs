// src/fft.rs
//
// Zero-padded 3D FFT convolution support shared by the demag and electrostatic kernels.
//
// Layout: padded arrays are flat, x fastest, like Grid::idx.
// A direction of length 1 is skipped by the transforms.

use std::sync::Arc;

use rayon::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::grid::Grid;

pub type C64 = Complex<f64>;

/// Padded transform size per direction: n if periodic, 1 if n = 1, otherwise 2n.
pub fn padded_size(grid: &Grid) -> [usize; 3] {
    let mut p = [1; 3];
    for d in 0..3 {
        let n = grid.size[d];
        p[d] = if grid.is_periodic(d) || n == 1 { n } else { 2 * n };
    }
    p
}

/// Kernel displacements along one direction: `(bin, displacement, weight)`.
///
/// Open: every displacement |s| <= n-1, each in its own wrapped bin.
/// Periodic with p images: all s with |s| <= p*n + n/2, binned modulo n. For even n
/// the two extreme displacements each carry weight 1/2, so every bin sums exactly
/// 2p+1 images and the kernel stays symmetric.
pub fn axis_displacements(n: usize, images: usize, pad: usize) -> Vec<(usize, isize, f64)> {
    let n_i = n as isize;
    if images == 0 {
        return (-(n_i - 1)..=(n_i - 1))
            .map(|s| (s.rem_euclid(pad as isize) as usize, s, 1.0))
            .collect();
    }
    let reach = images as isize * n_i + n_i / 2;
    let half_weight_ends = n % 2 == 0 && n > 1;
    (-reach..=reach)
        .map(|s| {
            let w = if half_weight_ends && s.abs() == reach { 0.5 } else { 1.0 };
            (s.rem_euclid(n_i) as usize, s, w)
        })
        .collect()
}

/// Forward/inverse 3D complex FFT plans for a fixed padded size.
pub struct Fft3 {
    size: [usize; 3],
    fwd: [Arc<dyn Fft<f64>>; 3],
    inv: [Arc<dyn Fft<f64>>; 3],
}

impl Fft3 {
    pub fn new(size: [usize; 3]) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let fwd = [
            planner.plan_fft_forward(size[0]),
            planner.plan_fft_forward(size[1]),
            planner.plan_fft_forward(size[2]),
        ];
        let inv = [
            planner.plan_fft_inverse(size[0]),
            planner.plan_fft_inverse(size[1]),
            planner.plan_fft_inverse(size[2]),
        ];
        Self { size, fwd, inv }
    }

    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    pub fn len(&self) -> usize {
        self.size[0] * self.size[1] * self.size[2]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn forward(&self, data: &mut [C64]) {
        self.transform(data, &self.fwd);
    }

    /// Inverse transform including the 1/N normalisation (rustfft is unnormalised).
    pub fn inverse(&self, data: &mut [C64]) {
        self.transform(data, &self.inv);
        let scale = 1.0 / self.len() as f64;
        data.par_iter_mut().for_each(|v| *v *= scale);
    }

    fn transform(&self, data: &mut [C64], plans: &[Arc<dyn Fft<f64>>; 3]) {
        debug_assert_eq!(data.len(), self.len());
        let [px, py, pz] = self.size;

        // Rows (x): contiguous
        if px > 1 {
            data.par_chunks_mut(px).for_each(|row| plans[0].process(row));
        }

        // Columns (y): strided by px within each z-plane
        if py > 1 {
            data.par_chunks_mut(px * py).for_each(|plane| {
                let mut col = vec![C64::new(0.0, 0.0); py];
                for x in 0..px {
                    for y in 0..py {
                        col[y] = plane[y * px + x];
                    }
                    plans[1].process(&mut col);
                    for y in 0..py {
                        plane[y * px + x] = col[y];
                    }
                }
            });
        }

        // Pillars (z): strided by px*py
        if pz > 1 {
            let plane = px * py;
            let src: &[C64] = data;
            let pillars: Vec<Vec<C64>> = (0..plane)
                .into_par_iter()
                .map(|xy| {
                    let mut p: Vec<C64> = (0..pz).map(|z| src[z * plane + xy]).collect();
                    plans[2].process(&mut p);
                    p
                })
                .collect();
            for (xy, p) in pillars.into_iter().enumerate() {
                for (z, v) in p.into_iter().enumerate() {
                    data[z * plane + xy] = v;
                }
            }
        }
    }
}

/// Flat index in a padded array.
#[inline]
pub fn pad_idx(pad: [usize; 3], i: usize, j: usize, k: usize) -> usize {
    (k * pad[1] + j) * pad[0] + i
}
