// src/geometry_mask.rs
//
// Geometry masks: scalar arrays with 1 inside the shape and 0 outside, for use
// with setmask (e.g. on Msat).
//
// Coordinates are cell centres, centred at the middle of the grid, in metres.
// Shapes are extruded along z.

use crate::array::FieldArray;
use crate::grid::Grid;

/// Build a mask from a predicate f(x, y) on centred cell centres.
pub fn mask_from_fn<F>(grid: &Grid, f: F) -> FieldArray
where
    F: Fn(f64, f64) -> bool,
{
    let mut mask = FieldArray::zeros(1, grid.size);
    let [nx, ny, nz] = grid.size;
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let [x, y, _] = grid.cell_center_centered(i, j, k);
                if f(x, y) {
                    mask.set(0, grid.idx(i, j, k), 1.0);
                }
            }
        }
    }
    mask
}

/// Ellipse with semi-axes `a`, `b`: (x/a)^2 + (y/b)^2 <= 1.
pub fn mask_ellipse(grid: &Grid, a: f64, b: f64) -> FieldArray {
    let inv_a2 = 1.0 / (a * a);
    let inv_b2 = 1.0 / (b * b);
    mask_from_fn(grid, move |x, y| x * x * inv_a2 + y * y * inv_b2 <= 1.0)
}

/// The largest ellipse that fits the grid in the xy plane.
pub fn inscribed_ellipse(grid: &Grid) -> FieldArray {
    let [w, h, _] = grid.world_size();
    mask_ellipse(grid, 0.5 * w, 0.5 * h)
}
