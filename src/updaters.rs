// src/updaters.rs
//
// Generic updaters shared by several modules: sums, averages and maxima.

use rayon::prelude::*;

use crate::engine::{Engine, Updater};
use crate::error::Result;
use crate::quant::{QuantId, QuantKind};

/// `sum = Σ weight·term` over the terms registered with [`Engine::add_to_sum`].
///
/// Terms may be values, masks or fields; they are expanded per cell.
pub struct SumUpdater {
    sum: QuantId,
}

impl SumUpdater {
    pub fn new(sum: QuantId) -> Self {
        Self { sum }
    }
}

impl Updater for SumUpdater {
    fn update(&mut self, e: &mut Engine) -> Result<()> {
        let terms = e.sum_terms(self.sum);
        if e.quant_by_id(self.sum).kind() != QuantKind::Field {
            // Space-independent sum: only values contribute.
            let ncomp = e.quant_by_id(self.sum).ncomp();
            let mut acc = vec![0.0; ncomp];
            for (t, w) in terms {
                let q = e.quant_by_id(t);
                for (c, a) in acc.iter_mut().enumerate() {
                    *a += w * q.value_at(c, 0);
                }
            }
            e.quant_mut_by_id(self.sum).multiplier.copy_from_slice(&acc);
            return Ok(());
        }

        let mut out = e.take_array(self.sum)?;
        out.fill(0.0);
        for (t, w) in terms {
            let q = e.quant_by_id(t);
            for c in 0..out.ncomp() {
                let dst = out.comp_mut(c);
                match (q.kind(), q.array()) {
                    (QuantKind::Field, Some(a)) => {
                        dst.par_iter_mut()
                            .zip(a.comp(c).par_iter())
                            .for_each(|(d, &v)| *d += w * v);
                    }
                    (_, None) => {
                        let v = w * q.multiplier()[c];
                        if v != 0.0 {
                            dst.par_iter_mut().for_each(|d| *d += v);
                        }
                    }
                    (_, Some(_)) => {
                        dst.par_iter_mut()
                            .enumerate()
                            .for_each(|(idx, d)| *d += w * q.value_at(c, idx));
                    }
                }
            }
        }
        e.put_array(self.sum, out);
        Ok(())
    }
}

/// Per-component cell average of a field into a space-independent value.
pub struct AverageUpdater {
    out: QuantId,
    field: QuantId,
}

impl AverageUpdater {
    pub fn new(out: QuantId, field: QuantId) -> Self {
        Self { out, field }
    }
}

impl Updater for AverageUpdater {
    fn update(&mut self, e: &mut Engine) -> Result<()> {
        let q = e.quant_by_id(self.field);
        let n = e.n_cells().max(1) as f64;
        let avg: Vec<f64> = (0..q.ncomp())
            .map(|c| {
                (0..e.n_cells())
                    .into_par_iter()
                    .map(|idx| q.value_at(c, idx))
                    .sum::<f64>()
                    / n
            })
            .collect();
        e.quant_mut_by_id(self.out).multiplier.copy_from_slice(&avg);
        Ok(())
    }
}

/// Maximum absolute component value of a field, as a scalar value.
pub struct MaxAbsUpdater {
    out: QuantId,
    field: QuantId,
}

impl MaxAbsUpdater {
    pub fn new(out: QuantId, field: QuantId) -> Self {
        Self { out, field }
    }
}

impl Updater for MaxAbsUpdater {
    fn update(&mut self, e: &mut Engine) -> Result<()> {
        let q = e.quant_by_id(self.field);
        let max = match q.array() {
            Some(a) => a
                .as_slice()
                .par_iter()
                .map(|v| v.abs())
                .reduce(|| 0.0, f64::max),
            None => q.multiplier().iter().fold(0.0_f64, |m, v| m.max(v.abs())),
        };
        e.quant_mut_by_id(self.out).multiplier[0] = max;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::{SCALAR, VECTOR};

    fn engine() -> Engine {
        let mut e = Engine::new(std::env::temp_dir());
        e.set_grid_size([2, 1, 1]).unwrap();
        e.set_cell_size([1e-9; 3]).unwrap();
        e
    }

    #[test]
    fn sum_mixes_values_and_fields() {
        let mut e = engine();
        let h = e.add_quant("H", VECTOR, QuantKind::Field, "A/m", "").unwrap();
        e.set_updater(h, Box::new(SumUpdater::new(h)));
        e.add_quant("H_ext", VECTOR, QuantKind::Value, "A/m", "").unwrap();
        e.add_quant("H_x", VECTOR, QuantKind::Field, "A/m", "").unwrap();
        e.add_to_sum("H", "H_ext", 1.0).unwrap();
        e.add_to_sum("H", "H_x", 1.0).unwrap();

        e.set_value("H_ext", &[1.0, 2.0, 3.0]).unwrap();
        e.set_value("H_x", &[10.0, 0.0, 0.0]).unwrap();
        let a = e.get_array("H").unwrap();
        assert_eq!(a.vec3(0), [11.0, 2.0, 3.0]);
        assert_eq!(a.vec3(1), [11.0, 2.0, 3.0]);

        // Changing a term invalidates the sum
        e.set_value("H_ext", &[0.0, 0.0, -1.0]).unwrap();
        assert_eq!(e.get_array("H").unwrap().vec3(1), [10.0, 0.0, -1.0]);
    }

    #[test]
    fn sum_rejects_mismatched_units() {
        let mut e = engine();
        let h = e.add_quant("H", VECTOR, QuantKind::Field, "A/m", "").unwrap();
        e.set_updater(h, Box::new(SumUpdater::new(h)));
        e.add_quant("B", VECTOR, QuantKind::Value, "T", "").unwrap();
        assert!(e.add_to_sum("H", "B", 1.0).is_err());
        // A weighted term converts units
        assert!(e.add_to_sum("H", "B", 1.0 / crate::params::MU0).is_ok());
    }

    #[test]
    fn average_and_max() {
        let mut e = engine();
        let f = e.add_quant("f", VECTOR, QuantKind::Field, "", "").unwrap();
        let avg = e.add_quant("f_avg", VECTOR, QuantKind::Value, "", "").unwrap();
        let max = e.add_quant("maxf", SCALAR, QuantKind::Value, "", "").unwrap();
        e.depends("f_avg", "f").unwrap();
        e.depends("maxf", "f").unwrap();
        e.set_updater(avg, Box::new(AverageUpdater::new(avg, f)));
        e.set_updater(max, Box::new(MaxAbsUpdater::new(max, f)));

        let mut a = crate::array::FieldArray::zeros(3, [2, 1, 1]);
        a.set_vec3(0, [1.0, 0.0, -4.0]);
        a.set_vec3(1, [3.0, 2.0, 0.0]);
        e.set_array("f", &a).unwrap();
        assert_eq!(e.get_value("f_avg").unwrap(), vec![2.0, 1.0, -2.0]);
        assert_eq!(e.get_scalar("maxf").unwrap(), 4.0);
    }
}
