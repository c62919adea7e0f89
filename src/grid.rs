// src/grid.rs

use serde::Serialize;

/// Finite-difference grid: cell counts, cell sizes and periodic image counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Grid {
    pub size: [usize; 3],
    pub cell: [f64; 3],
    /// Number of periodic images per direction (0 = open boundary).
    pub periodic: [usize; 3],
}

impl Grid {
    /// Create an open-boundary grid with nx × ny × nz cells of size dx × dy × dz.
    pub fn new(size: [usize; 3], cell: [f64; 3]) -> Self {
        Self {
            size,
            cell,
            periodic: [0; 3],
        }
    }

    pub fn with_periodic(mut self, periodic: [usize; 3]) -> Self {
        self.periodic = periodic;
        self
    }

    /// Total number of cells.
    pub fn n_cells(&self) -> usize {
        self.size[0] * self.size[1] * self.size[2]
    }

    /// Volume of one cell (m^3).
    pub fn cell_volume(&self) -> f64 {
        self.cell[0] * self.cell[1] * self.cell[2]
    }

    /// Convert (i, j, k) indices to a flat index (x fastest).
    #[inline]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.size[0] && j < self.size[1] && k < self.size[2]);
        (k * self.size[1] + j) * self.size[0] + i
    }

    /// Inverse of [`Grid::idx`].
    #[inline]
    pub fn ijk(&self, idx: usize) -> (usize, usize, usize) {
        let nx = self.size[0];
        let ny = self.size[1];
        (idx % nx, (idx / nx) % ny, idx / (nx * ny))
    }

    /// Cell-centre coordinates with the origin at the lower corner of the grid.
    #[inline]
    pub fn cell_center(&self, i: usize, j: usize, k: usize) -> [f64; 3] {
        [
            (i as f64 + 0.5) * self.cell[0],
            (j as f64 + 0.5) * self.cell[1],
            (k as f64 + 0.5) * self.cell[2],
        ]
    }

    /// Cell-centre coordinates centred on the middle of the grid.
    #[inline]
    pub fn cell_center_centered(&self, i: usize, j: usize, k: usize) -> [f64; 3] {
        let mut c = [0.0; 3];
        for (d, n) in [i, j, k].into_iter().enumerate() {
            let half = self.size[d] as f64 * 0.5;
            c[d] = (n as f64 + 0.5 - half) * self.cell[d];
        }
        c
    }

    /// Physical extent of the grid (m).
    pub fn world_size(&self) -> [f64; 3] {
        [
            self.size[0] as f64 * self.cell[0],
            self.size[1] as f64 * self.cell[1],
            self.size[2] as f64 * self.cell[2],
        ]
    }

    pub fn is_periodic(&self, dim: usize) -> bool {
        self.periodic[dim] > 0
    }

    /// Neighbour index along `dim` in direction `step` (+1/-1).
    ///
    /// Periodic directions wrap; open directions clamp to the cell itself
    /// (Neumann boundary for the exchange Laplacian).
    #[inline]
    pub fn neighbor(&self, i: usize, j: usize, k: usize, dim: usize, step: isize) -> usize {
        let mut c = [i, j, k];
        let n = self.size[dim] as isize;
        let v = c[dim] as isize + step;
        c[dim] = if v < 0 || v >= n {
            if self.is_periodic(dim) {
                v.rem_euclid(n) as usize
            } else {
                c[dim]
            }
        } else {
            v as usize
        };
        self.idx(c[0], c[1], c[2])
    }
}
