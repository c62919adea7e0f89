// src/output.rs
//
// Saving quantities: OVF, gnuplot, data tables and PNG colour maps, either on
// request or periodically in simulated time (autosave / autotabulate).

use std::fs::{create_dir_all, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::array::FieldArray;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::ovf::{write_ovf2, OvfData, OvfMeta};
use crate::quant::{QuantId, QuantKind};
use crate::visualisation::save_component_png;

/// Relative slack on due times, so `t` landing a rounding error short of
/// the next multiple of the period still counts.
const DUE_EPS: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Omf,
    Gplot,
    Table,
    Png,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "omf" | "ovf" => Ok(Self::Omf),
            "gplot" => Ok(Self::Gplot),
            "table" | "txt" => Ok(Self::Table),
            "png" => Ok(Self::Png),
            other => Err(EngineError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Omf => "omf",
            Self::Gplot => "gplot",
            Self::Table => "table",
            Self::Png => "png",
        }
    }
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    Ok(())
}

/// Up-to-date, fully expanded data of a quantity. Arrays keep their own size
/// (e.g. kernels on the padded grid), values are expanded to the grid.
fn quant_data(e: &mut Engine, id: QuantId) -> Result<FieldArray> {
    e.update_id(id)?;
    let size = e.grid()?.size;
    let q = e.quant_by_id(id);
    Ok(match (q.kind(), q.array()) {
        (QuantKind::Field, Some(a)) => a.clone(),
        (_, Some(a)) => q.expanded(a.size()),
        (_, None) => q.expanded(size),
    })
}

/// Write one quantity to `path` in `format`.
pub fn save_quant(
    e: &mut Engine,
    id: QuantId,
    format: OutputFormat,
    options: &[String],
    path: &Path,
) -> Result<()> {
    let name = e.quant_by_id(id).name().to_string();
    match format {
        OutputFormat::Omf => {
            let data = quant_data(e, id)?;
            let cell = e.grid()?.cell;
            let q = e.quant_by_id(id);
            let meta = OvfMeta::for_quant(&name, q.unit(), q.ncomp()).with_total_sim_time(e.time());
            write_ovf2(path, &data, cell, &meta, OvfData::from_options(options)?)?;
        }
        OutputFormat::Gplot => {
            let data = quant_data(e, id)?;
            write_gplot(path, &data, e.grid()?.cell)?;
        }
        OutputFormat::Table => {
            e.update_id(id)?;
            let values = e.get_value(&name)?;
            let unit = e.quant_by_id(id).unit().to_string();
            append_table_row(path, e.time(), &[(name.clone(), unit, values)])?;
        }
        OutputFormat::Png => {
            let comp = match options.first() {
                Some(o) => o.trim().parse::<usize>().map_err(|_| {
                    EngineError::invalid_argument(format!("png option must be a component index, got {o:?}"))
                })?,
                None => 0,
            };
            let data = quant_data(e, id)?;
            save_component_png(&data, comp, 0, path)?;
        }
    }
    debug!(quant = %name, format = format.extension(), path = %path.display(), "saved");
    Ok(())
}

/// Gnuplot `splot` layout: `x y z v0 v1 ...` per cell, cell positions in
/// metres, a blank line after every row of x.
pub fn write_gplot(path: &Path, data: &FieldArray, cell: [f64; 3]) -> Result<()> {
    ensure_parent_dir(path)?;
    let [nx, ny, nz] = data.size();
    let mut w = BufWriter::new(std::fs::File::create(path)?);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let idx = data.idx(i, j, k);
                write!(
                    w,
                    "{:e} {:e} {:e}",
                    i as f64 * cell[0],
                    j as f64 * cell[1],
                    k as f64 * cell[2]
                )?;
                for c in 0..data.ncomp() {
                    write!(w, " {:e}", data.get(c, idx))?;
                }
                writeln!(w)?;
            }
            writeln!(w)?;
        }
    }
    w.flush()?;
    Ok(())
}

/// Column headers for one quantity: `name (unit)` or `name_x (unit)` ...
fn column_names(name: &str, unit: &str, ncomp: usize) -> Vec<String> {
    let suffix = |c: usize| match (ncomp, c) {
        (1, _) => String::new(),
        (3, 0) => "_x".into(),
        (3, 1) => "_y".into(),
        (3, 2) => "_z".into(),
        _ => format!("_{c}"),
    };
    (0..ncomp)
        .map(|c| format!("{name}{} ({unit})", suffix(c)))
        .collect()
}

/// Append `t v...` to a tab-separated table, writing the header first if the
/// file is new.
fn append_table_row(path: &Path, t: f64, columns: &[(String, String, Vec<f64>)]) -> Result<()> {
    ensure_parent_dir(path)?;
    let new = !path.exists();
    let mut w = BufWriter::new(OpenOptions::new().create(true).append(true).open(path)?);
    if new {
        let mut header = vec!["t (s)".to_string()];
        for (name, unit, values) in columns {
            header.extend(column_names(name, unit, values.len()));
        }
        writeln!(w, "# {}", header.join("\t"))?;
    }
    let mut row = vec![format!("{:e}", t)];
    for (_, _, values) in columns {
        row.extend(values.iter().map(|v| format!("{:e}", v)));
    }
    writeln!(w, "{}", row.join("\t"))?;
    w.flush()?;
    Ok(())
}

/// Periodic save of one quantity to auto-numbered files.
#[derive(Debug)]
pub struct Autosave {
    quant: QuantId,
    format: OutputFormat,
    options: Vec<String>,
    period: f64,
    next: f64,
}

impl Autosave {
    /// First save is due at `t_now`.
    pub fn new(quant: QuantId, format: OutputFormat, options: Vec<String>, period: f64, t_now: f64) -> Self {
        Self {
            quant,
            format,
            options,
            period,
            next: t_now,
        }
    }

    pub fn due(&self, t: f64) -> bool {
        t >= self.next - DUE_EPS * self.period
    }

    pub fn save(&mut self, e: &mut Engine) -> Result<()> {
        let t = e.time();
        let name = e.quant_by_id(self.quant).name().to_string();
        let path = match self.format {
            // tables accumulate in a single file
            OutputFormat::Table => e.output_dir().join(format!("{name}.table")),
            _ => e.next_output_name(&name, self.format.extension()),
        };
        save_quant(e, self.quant, self.format, &self.options, &path)?;
        info!(quant = %name, t, path = %path.display(), "autosave");
        // skip missed periods rather than saving repeatedly
        while self.next <= t + DUE_EPS * self.period {
            self.next += self.period;
        }
        Ok(())
    }
}

/// A data table: one row per call of `write_row`, optionally periodic.
#[derive(Debug)]
pub struct Tabulator {
    quants: Vec<QuantId>,
    path: PathBuf,
    schedule: Option<(f64, f64)>,
}

impl Tabulator {
    /// `schedule` is `(period, first due time)`, or `None` for on-request rows.
    pub fn new(quants: Vec<QuantId>, path: PathBuf, schedule: Option<(f64, f64)>) -> Self {
        Self {
            quants,
            path,
            schedule,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn due(&self, t: f64) -> bool {
        match self.schedule {
            Some((period, next)) => t >= next - DUE_EPS * period,
            None => false,
        }
    }

    pub fn write_row(&mut self, e: &mut Engine) -> Result<()> {
        let mut columns = Vec::with_capacity(self.quants.len());
        for &id in &self.quants {
            let name = e.quant_by_id(id).name().to_string();
            let values = e.get_value(&name)?;
            let unit = e.quant_by_id(id).unit().to_string();
            columns.push((name, unit, values));
        }
        let t = e.time();
        append_table_row(&self.path, t, &columns)?;
        if let Some((period, next)) = self.schedule.as_mut() {
            while *next <= t + DUE_EPS * *period {
                *next += *period;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_parse() {
        assert_eq!(OutputFormat::parse("omf").unwrap(), OutputFormat::Omf);
        assert_eq!(OutputFormat::parse("GPLOT").unwrap(), OutputFormat::Gplot);
        assert_eq!(OutputFormat::parse("png").unwrap().extension(), "png");
        assert!(matches!(
            OutputFormat::parse("vtk"),
            Err(EngineError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn gplot_has_blank_line_per_row() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.gplot");
        let mut a = FieldArray::zeros(1, [2, 2, 1]);
        a.comp_mut(0).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        write_gplot(&p, &a, [1e-9, 1e-9, 1e-9]).unwrap();
        let text = std::fs::read_to_string(&p).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[2], "");
        assert_eq!(lines[5], "");
        let last: Vec<f64> = lines[4].split_whitespace().map(|v| v.parse().unwrap()).collect();
        assert_eq!(last, vec![1e-9, 1e-9, 0.0, 4.0]);
    }

    #[test]
    fn table_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("t.table");
        let col = |v: Vec<f64>| [("m_avg".to_string(), String::new(), v)];
        append_table_row(&p, 0.0, &col(vec![1.0, 0.0, 0.0])).unwrap();
        append_table_row(&p, 1e-12, &col(vec![0.5, 0.5, 0.0])).unwrap();
        let text = std::fs::read_to_string(&p).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("# t (s)\tm_avg_x ()"));
        assert!(lines[2].starts_with("1e-12\t5e-1"));
    }

    #[test]
    fn autosave_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = Engine::new(dir.path());
        e.set_grid_size([2, 2, 1]).unwrap();
        e.set_cell_size([1e-9; 3]).unwrap();
        e.load("magnetization").unwrap();
        let id = e.id("m").unwrap();
        let mut a = Autosave::new(id, OutputFormat::Omf, vec![], 1e-12, 0.0);
        assert!(a.due(0.0));
        a.save(&mut e).unwrap();
        assert!(!a.due(0.5e-12));
        assert!(a.due(1e-12));
        assert!(e.output_dir().join("m0000000.omf").exists());
    }

    #[test]
    fn saves_padded_kernel_at_its_own_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = Engine::new(dir.path());
        e.set_grid_size([4, 4, 1]).unwrap();
        e.set_cell_size([1e-9; 3]).unwrap();
        e.load("current").unwrap();
        let p = e.save("kern_el", "gplot", &[], "kern_el.gplot").unwrap();
        let text = std::fs::read_to_string(p).unwrap();
        // 8x8 padded cells plus one blank line per row
        assert_eq!(text.lines().count(), 8 * 8 + 8);
    }
}
