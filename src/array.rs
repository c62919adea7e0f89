// src/array.rs
//
// Host-side multi-component field arrays.
//
// Storage is component-major: component c occupies data[c*n .. (c+1)*n], and within a
// component the cell index is (k*ny + j)*nx + i (x fastest), matching Grid::idx.
//
// Scripts exchange arrays as nested lists indexed [comp][x][y][z].

use crate::error::{EngineError, Result};

/// Nested-list representation `[comp][x][y][z]` used by the scripting API.
pub type NestedArray = Vec<Vec<Vec<Vec<f64>>>>;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldArray {
    ncomp: usize,
    size: [usize; 3],
    data: Vec<f64>,
}

impl FieldArray {
    /// Zero-initialised array with `ncomp` components on `size` cells.
    pub fn zeros(ncomp: usize, size: [usize; 3]) -> Self {
        let n = size[0] * size[1] * size[2];
        Self {
            ncomp,
            size,
            data: vec![0.0; ncomp * n],
        }
    }

    /// Wrap existing component-major data.
    pub fn from_vec(ncomp: usize, size: [usize; 3], data: Vec<f64>) -> Result<Self> {
        let n = size[0] * size[1] * size[2];
        if data.len() != ncomp * n {
            return Err(EngineError::invalid_argument(format!(
                "array data length {} does not match {} x {:?}",
                data.len(),
                ncomp,
                size
            )));
        }
        Ok(Self { ncomp, size, data })
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    /// Number of cells per component.
    pub fn n_cells(&self) -> usize {
        self.size[0] * self.size[1] * self.size[2]
    }

    #[inline]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        (k * self.size[1] + j) * self.size[0] + i
    }

    pub fn comp(&self, c: usize) -> &[f64] {
        let n = self.n_cells();
        &self.data[c * n..(c + 1) * n]
    }

    pub fn comp_mut(&mut self, c: usize) -> &mut [f64] {
        let n = self.n_cells();
        &mut self.data[c * n..(c + 1) * n]
    }

    /// Borrow the three components of a vector array mutably at once.
    pub fn comps3_mut(&mut self) -> (&mut [f64], &mut [f64], &mut [f64]) {
        debug_assert_eq!(self.ncomp, 3);
        let n = self.n_cells();
        let (x, rest) = self.data.split_at_mut(n);
        let (y, z) = rest.split_at_mut(n);
        (x, y, &mut z[..n])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    #[inline]
    pub fn get(&self, c: usize, idx: usize) -> f64 {
        self.data[c * self.n_cells() + idx]
    }

    #[inline]
    pub fn set(&mut self, c: usize, idx: usize, v: f64) {
        let n = self.n_cells();
        self.data[c * n + idx] = v;
    }

    /// Vector value at a cell (first three components).
    #[inline]
    pub fn vec3(&self, idx: usize) -> [f64; 3] {
        let n = self.n_cells();
        [self.data[idx], self.data[n + idx], self.data[2 * n + idx]]
    }

    #[inline]
    pub fn set_vec3(&mut self, idx: usize, v: [f64; 3]) {
        let n = self.n_cells();
        self.data[idx] = v[0];
        self.data[n + idx] = v[1];
        self.data[2 * n + idx] = v[2];
    }

    /// Set every cell of every component to the matching entry of `values`.
    pub fn set_uniform(&mut self, values: &[f64]) {
        let n = self.n_cells();
        for (c, chunk) in self.data.chunks_mut(n).enumerate() {
            let v = values.get(c).copied().unwrap_or(0.0);
            chunk.fill(v);
        }
    }

    pub fn fill(&mut self, v: f64) {
        self.data.fill(v);
    }

    pub fn copy_from(&mut self, other: &FieldArray) {
        debug_assert_eq!(self.data.len(), other.data.len());
        self.data.copy_from_slice(&other.data);
    }

    /// y = a + s*b, elementwise over all components.
    pub fn madd(&mut self, a: &FieldArray, b: &FieldArray, s: f64) {
        for ((y, &av), &bv) in self.data.iter_mut().zip(&a.data).zip(&b.data) {
            *y = av + s * bv;
        }
    }

    pub fn sum_comp(&self, c: usize) -> f64 {
        self.comp(c).iter().sum()
    }

    /// Maximum absolute value over all components.
    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }

    /// Maximum absolute elementwise difference.
    pub fn max_diff(&self, other: &FieldArray) -> f64 {
        self.data
            .iter()
            .zip(&other.data)
            .fold(0.0_f64, |acc, (a, b)| acc.max((a - b).abs()))
    }

    /// Nearest-neighbour resample onto a different cell count.
    ///
    /// Each destination cell centre is mapped to the source cell that contains it.
    pub fn resample_nearest(&self, size: [usize; 3]) -> FieldArray {
        if size == self.size {
            return self.clone();
        }
        let mut out = FieldArray::zeros(self.ncomp, size);
        let src = self.size;
        let map = |n_dst: usize, n_src: usize, i: usize| -> usize {
            let x = (i as f64 + 0.5) * n_src as f64 / n_dst as f64;
            (x.floor() as usize).min(n_src - 1)
        };
        for c in 0..self.ncomp {
            for k in 0..size[2] {
                let ks = map(size[2], src[2], k);
                for j in 0..size[1] {
                    let js = map(size[1], src[1], j);
                    for i in 0..size[0] {
                        let is = map(size[0], src[0], i);
                        let v = self.get(c, self.idx(is, js, ks));
                        let d = out.idx(i, j, k);
                        out.set(c, d, v);
                    }
                }
            }
        }
        out
    }

    /// Build from nested lists `[comp][x][y][z]`.
    pub fn from_nested(nested: &NestedArray) -> Result<Self> {
        let ncomp = nested.len();
        if ncomp == 0 {
            return Err(EngineError::invalid_argument("empty array"));
        }
        let nx = nested[0].len();
        let ny = nested[0].first().map_or(0, |v| v.len());
        let nz = nested[0]
            .first()
            .and_then(|v| v.first())
            .map_or(0, |v| v.len());
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(EngineError::invalid_argument("array has a zero dimension"));
        }

        let mut out = FieldArray::zeros(ncomp, [nx, ny, nz]);
        for (c, comp) in nested.iter().enumerate() {
            if comp.len() != nx {
                return Err(EngineError::invalid_argument("ragged array (x)"));
            }
            for (i, plane) in comp.iter().enumerate() {
                if plane.len() != ny {
                    return Err(EngineError::invalid_argument("ragged array (y)"));
                }
                for (j, line) in plane.iter().enumerate() {
                    if line.len() != nz {
                        return Err(EngineError::invalid_argument("ragged array (z)"));
                    }
                    for (k, &v) in line.iter().enumerate() {
                        let d = out.idx(i, j, k);
                        out.set(c, d, v);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Convert to nested lists `[comp][x][y][z]`.
    pub fn to_nested(&self) -> NestedArray {
        let [nx, ny, nz] = self.size;
        (0..self.ncomp)
            .map(|c| {
                (0..nx)
                    .map(|i| {
                        (0..ny)
                            .map(|j| (0..nz).map(|k| self.get(c, self.idx(i, j, k))).collect())
                            .collect()
                    })
                    .collect()
            })
            .collect()
    }
}
