// src/magstate.rs
//
// Initial magnetization generators, returned as 3-component arrays on the grid.
//
// Coordinates are cell centres with the origin at the middle of the grid
// (see Grid::cell_center_centered).

use crate::array::FieldArray;
use crate::grid::Grid;
use crate::vec3::normalize;

/// Every cell along `dir` (normalised).
pub fn uniform(grid: &Grid, dir: [f64; 3]) -> FieldArray {
    let mut m = FieldArray::zeros(3, grid.size);
    m.set_uniform(&normalize(dir));
    m
}

/// In-plane vortex around the grid centre.
///
/// `circulation` +1 is counter-clockwise seen from +z, -1 clockwise.
/// `polarization` ±1 is the direction of the out-of-plane core, whose profile
/// falls linearly from ±z at the centre to in-plane at `core_radius`.
pub fn vortex(grid: &Grid, circulation: f64, polarization: f64, core_radius: f64) -> FieldArray {
    let mut m = FieldArray::zeros(3, grid.size);
    let pol = polarization.signum();
    let chi = circulation.signum();
    let [nx, ny, nz] = grid.size;

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let [x, y, _] = grid.cell_center_centered(i, j, k);
                let idx = grid.idx(i, j, k);
                let r = (x * x + y * y).sqrt();
                if r < 1e-15 * (grid.cell[0] + grid.cell[1]) {
                    m.set_vec3(idx, [0.0, 0.0, pol]);
                    continue;
                }

                // azimuthal unit vector e_phi = (-y, x)/r
                let (ex, ey) = (-y / r, x / r);
                let mz = if r <= core_radius {
                    pol * (1.0 - r / core_radius)
                } else {
                    0.0
                };
                let s = (1.0 - mz * mz).max(0.0).sqrt();
                m.set_vec3(idx, normalize([chi * ex * s, chi * ey * s, mz]));
            }
        }
    }
    m
}

/// Random unit vectors from a seeded xorshift generator.
pub fn random(grid: &Grid, seed: u64) -> FieldArray {
    let mut rng = XorShift64::new(seed);
    let mut m = FieldArray::zeros(3, grid.size);
    for idx in 0..m.n_cells() {
        // rejection sampling inside the unit ball gives an isotropic direction
        let v = loop {
            let v = [
                rng.next_f64() * 2.0 - 1.0,
                rng.next_f64() * 2.0 - 1.0,
                rng.next_f64() * 2.0 - 1.0,
            ];
            let r2 = v[0] * v[0] + v[1] * v[1] + v[2] * v[2];
            if r2 > 1e-6 && r2 <= 1.0 {
                break v;
            }
        };
        m.set_vec3(idx, normalize(v));
    }
    m
}

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        let s = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_f64(&mut self) -> f64 {
        // top 53 bits to [0,1)
        let u = self.next_u64() >> 11;
        (u as f64) * (1.0 / ((1u64 << 53) as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vortex_circulates_counter_clockwise() {
        let g = Grid::new([8, 8, 1], [1e-9; 3]);
        let m = vortex(&g, 1.0, 1.0, 1.5e-9);
        // right of centre points +y, top of centre points -x
        let right = m.vec3(g.idx(7, 4, 0));
        let top = m.vec3(g.idx(4, 7, 0));
        assert!(right[1] > 0.9);
        assert!(top[0] < -0.9);
        // the four cells around the centre carry the core
        assert!(m.vec3(g.idx(4, 4, 0))[2] > 0.0);
        assert!(m.vec3(g.idx(3, 3, 0))[2] > 0.0);
        // clockwise, core down
        let m2 = vortex(&g, -1.0, -1.0, 1.5e-9);
        assert!(m2.vec3(g.idx(7, 4, 0))[1] < -0.9);
        assert!(m2.vec3(g.idx(4, 4, 0))[2] < 0.0);
    }

    #[test]
    fn states_are_unit_length() {
        let g = Grid::new([5, 3, 2], [1e-9; 3]);
        for m in [
            uniform(&g, [1.0, 1.0, 0.0]),
            vortex(&g, 1.0, 1.0, 2e-9),
            random(&g, 42),
        ] {
            for idx in 0..m.n_cells() {
                let v = m.vec3(idx);
                let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
                assert!((n - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn random_is_reproducible() {
        let g = Grid::new([4, 4, 1], [1e-9; 3]);
        assert_eq!(random(&g, 7).as_slice(), random(&g, 7).as_slice());
        assert_ne!(random(&g, 7).as_slice(), random(&g, 8).as_slice());
    }
}
