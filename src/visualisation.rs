// src/visualisation.rs
//
// PNG colour maps of one component of a field (plotters bitmap backend).

use std::path::Path;

use plotters::prelude::*;
use tracing::debug;

use crate::array::FieldArray;
use crate::error::{EngineError, Result};

/// Pixels per cell edge, chosen so small grids stay visible.
fn cell_pixels(nx: usize, ny: usize) -> u32 {
    let longest = nx.max(ny).max(1) as u32;
    (512 / longest).clamp(1, 64)
}

/// Map a value to a blue-white-red colour using a *local* min/max,
/// so small variations are still visible.
///
/// `lo` maps to blue, `hi` to red, the midpoint to white.
fn value_to_color(v: f64, lo: f64, hi: f64) -> RGBColor {
    let (lo, hi) = if !lo.is_finite() || !hi.is_finite() || (hi - lo).abs() < 1e-30 {
        (lo.min(-1.0), hi.max(1.0))
    } else {
        (lo, hi)
    };

    let x = ((v - lo) / (hi - lo)).clamp(0.0, 1.0);

    let r = (255.0 * (2.0 * x).min(1.0)) as u8;
    let b = (255.0 * (2.0 * (1.0 - x)).min(1.0)) as u8;
    let g = (255.0 * (1.0 - 2.0 * (x - 0.5).abs())).clamp(0.0, 255.0) as u8;
    RGBColor(r, g, b)
}

fn plot_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Plot(e.to_string())
}

/// Save component `comp` of layer `k` as a colour map, one square per cell,
/// y pointing up.
pub fn save_component_png(data: &FieldArray, comp: usize, k: usize, path: &Path) -> Result<()> {
    if comp >= data.ncomp() {
        return Err(EngineError::invalid_argument(format!(
            "component {comp} out of range (quantity has {})",
            data.ncomp()
        )));
    }
    let [nx, ny, nz] = data.size();
    let k = k.min(nz.saturating_sub(1));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let values: Vec<f64> = (0..ny)
        .flat_map(|j| (0..nx).map(move |i| (i, j)))
        .map(|(i, j)| data.get(comp, data.idx(i, j, k)))
        .collect();
    let (lo, hi) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    let px = cell_pixels(nx, ny);
    let (w, h) = (nx as u32 * px, ny as u32 * px);
    let root = BitMapBackend::new(path, (w, h)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    for j in 0..ny {
        for i in 0..nx {
            let color = value_to_color(values[j * nx + i], lo, hi);
            let x0 = (i as u32 * px) as i32;
            let y0 = ((ny - 1 - j) as u32 * px) as i32;
            root.draw(&Rectangle::new(
                [(x0, y0), (x0 + px as i32, y0 + px as i32)],
                color.filled(),
            ))
            .map_err(plot_err)?;
        }
    }
    root.present().map_err(plot_err)?;
    debug!(path = %path.display(), comp, lo, hi, "png written");
    Ok(())
}
