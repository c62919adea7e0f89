// src/ovf.rs
//
// OOMMF OVF 2.0 rectangular meshes:
//  - text data
//  - binary4 data (little-endian f32, preceded by the check value 1234567.0)
//  - binary8 data on read (check value 123456789012345.0)
//
// Any number of components (valuedim) and a full 3D mesh. Data runs x fastest,
// then y, then z, with the components of one cell together.

use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use crate::array::FieldArray;
use crate::error::{EngineError, Result};

const CHECK4: f32 = 1234567.0;
const CHECK8: f64 = 123456789012345.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OvfData {
    Text,
    Binary4,
}

impl OvfData {
    /// From save options: `text` (default), `binary` or `binary 4`.
    pub fn from_options(options: &[String]) -> Result<Self> {
        let joined = options.join(" ").to_ascii_lowercase();
        match joined.trim() {
            "" | "text" => Ok(Self::Text),
            "binary" | "binary 4" | "binary4" => Ok(Self::Binary4),
            other => Err(EngineError::UnsupportedFormat(format!("omf {other}"))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct OvfMeta {
    pub title: String,
    pub desc_lines: Vec<String>,
    pub valuelabels: Vec<String>,
    pub valueunits: Vec<String>,
}

impl OvfMeta {
    /// Labels `<name>_0, <name>_1, ...` (or `_x/_y/_z` for vectors), all in `unit`.
    pub fn for_quant(name: &str, unit: &str, ncomp: usize) -> Self {
        let valuelabels = if ncomp == 3 {
            ["x", "y", "z"].iter().map(|c| format!("{name}_{c}")).collect()
        } else if ncomp == 1 {
            vec![name.to_string()]
        } else {
            (0..ncomp).map(|c| format!("{name}_{c}")).collect()
        };
        let unit = if unit.is_empty() { "1" } else { unit };
        Self {
            title: name.to_string(),
            desc_lines: vec![],
            valuelabels,
            valueunits: vec![unit.to_string(); ncomp],
        }
    }

    pub fn with_total_sim_time(mut self, t_s: f64) -> Self {
        self.desc_lines
            .push(format!("Total simulation time:  {:.16e}  s", t_s));
        self
    }
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    Ok(())
}

/// Write `data` with cell size `cell` as an OVF 2.0 file.
pub fn write_ovf2(
    path: &Path,
    data: &FieldArray,
    cell: [f64; 3],
    meta: &OvfMeta,
    format: OvfData,
) -> Result<()> {
    ensure_parent_dir(path)?;
    let [nx, ny, nz] = data.size();
    let ncomp = data.ncomp();
    let [dx, dy, dz] = cell;

    let mut w = BufWriter::new(File::create(path)?);

    writeln!(w, "# OOMMF OVF 2.0")?;
    writeln!(w, "# Segment count: 1")?;
    writeln!(w, "# Begin: Segment")?;
    writeln!(w, "# Begin: Header")?;
    writeln!(w, "# Title: {}", meta.title)?;
    writeln!(w, "# meshtype: rectangular")?;
    writeln!(w, "# meshunit: m")?;

    writeln!(w, "# xmin: 0")?;
    writeln!(w, "# ymin: 0")?;
    writeln!(w, "# zmin: 0")?;
    writeln!(w, "# xmax: {:.16e}", nx as f64 * dx)?;
    writeln!(w, "# ymax: {:.16e}", ny as f64 * dy)?;
    writeln!(w, "# zmax: {:.16e}", nz as f64 * dz)?;

    writeln!(w, "# valuedim: {}", ncomp)?;
    writeln!(w, "# valuelabels: {}", meta.valuelabels.join(" "))?;
    writeln!(w, "# valueunits: {}", meta.valueunits.join(" "))?;

    for d in &meta.desc_lines {
        writeln!(w, "# Desc: {}", d)?;
    }

    writeln!(w, "# xbase: {:.16e}", 0.5 * dx)?;
    writeln!(w, "# ybase: {:.16e}", 0.5 * dy)?;
    writeln!(w, "# zbase: {:.16e}", 0.5 * dz)?;
    writeln!(w, "# xnodes: {}", nx)?;
    writeln!(w, "# ynodes: {}", ny)?;
    writeln!(w, "# znodes: {}", nz)?;
    writeln!(w, "# xstepsize: {:.16e}", dx)?;
    writeln!(w, "# ystepsize: {:.16e}", dy)?;
    writeln!(w, "# zstepsize: {:.16e}", dz)?;

    writeln!(w, "# End: Header")?;

    let n = data.n_cells();
    match format {
        OvfData::Text => {
            writeln!(w, "# Begin: Data Text")?;
            for idx in 0..n {
                let line: Vec<String> = (0..ncomp)
                    .map(|c| format!("{:.10e}", data.get(c, idx)))
                    .collect();
                writeln!(w, "{}", line.join(" "))?;
            }
            writeln!(w, "# End: Data Text")?;
        }
        OvfData::Binary4 => {
            writeln!(w, "# Begin: Data Binary 4")?;
            w.write_all(&CHECK4.to_le_bytes())?;
            for idx in 0..n {
                for c in 0..ncomp {
                    w.write_all(&(data.get(c, idx) as f32).to_le_bytes())?;
                }
            }
            writeln!(w)?;
            writeln!(w, "# End: Data Binary 4")?;
        }
    }
    writeln!(w, "# End: Segment")?;
    w.flush()?;
    Ok(())
}

/// Header fields needed to interpret the data block.
#[derive(Debug, Default)]
struct Header {
    nodes: [usize; 3],
    valuedim: usize,
}

/// Read an OVF 2.0 (or OVF 1.0 vector) file into a component-major array.
pub fn read_ovf(path: &Path) -> Result<FieldArray> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    parse_ovf(&bytes)
}

fn parse_err(msg: impl Into<String>) -> EngineError {
    EngineError::Parse(msg.into())
}

fn parse_ovf(bytes: &[u8]) -> Result<FieldArray> {
    let mut h = Header {
        valuedim: 3,
        ..Default::default()
    };
    let mut pos = 0usize;

    loop {
        let end = bytes[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|e| pos + e)
            .ok_or_else(|| parse_err("no data segment"))?;
        let line = String::from_utf8_lossy(&bytes[pos..end]).trim().to_string();
        pos = end + 1;

        let Some(body) = line.strip_prefix('#') else {
            continue;
        };
        let Some((key, value)) = body.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        let parse_usize = |v: &str| {
            v.parse::<usize>()
                .map_err(|_| parse_err(format!("bad {key}: {v}")))
        };
        match key.as_str() {
            "xnodes" => h.nodes[0] = parse_usize(value)?,
            "ynodes" => h.nodes[1] = parse_usize(value)?,
            "znodes" => h.nodes[2] = parse_usize(value)?,
            "valuedim" => h.valuedim = parse_usize(value)?,
            "begin" if value.to_ascii_lowercase().starts_with("data") => {
                let kind = value[4..].trim().to_ascii_lowercase();
                return read_data(&h, &kind, &bytes[pos..]);
            }
            _ => {}
        }
    }
}

fn read_data(h: &Header, kind: &str, data: &[u8]) -> Result<FieldArray> {
    if h.nodes.iter().any(|&n| n == 0) || h.valuedim == 0 {
        return Err(parse_err("missing xnodes/ynodes/znodes or valuedim"));
    }
    let n = h.nodes[0] * h.nodes[1] * h.nodes[2];
    let ncomp = h.valuedim;
    let mut out = FieldArray::zeros(ncomp, h.nodes);

    match kind {
        "text" => {
            let text = String::from_utf8_lossy(data);
            let values = text
                .lines()
                .take_while(|l| !l.trim_start().starts_with('#'))
                .flat_map(str::split_whitespace)
                .map(|v| v.parse::<f64>().map_err(|_| parse_err(format!("bad number: {v}"))));
            let mut count = 0;
            for (k, v) in values.enumerate() {
                if k >= n * ncomp {
                    break;
                }
                out.set(k % ncomp, k / ncomp, v?);
                count += 1;
            }
            if count != n * ncomp {
                return Err(parse_err(format!("expected {} values, got {count}", n * ncomp)));
            }
        }
        "binary 4" => {
            let need = 4 * (n * ncomp + 1);
            if data.len() < need {
                return Err(parse_err("truncated binary 4 data"));
            }
            let f = |k: usize| f32::from_le_bytes([data[4 * k], data[4 * k + 1], data[4 * k + 2], data[4 * k + 3]]);
            if f(0) != CHECK4 {
                return Err(parse_err("bad binary 4 check value"));
            }
            for k in 0..n * ncomp {
                out.set(k % ncomp, k / ncomp, f(k + 1) as f64);
            }
        }
        "binary 8" => {
            let need = 8 * (n * ncomp + 1);
            if data.len() < need {
                return Err(parse_err("truncated binary 8 data"));
            }
            let f = |k: usize| {
                let mut b = [0u8; 8];
                b.copy_from_slice(&data[8 * k..8 * k + 8]);
                f64::from_le_bytes(b)
            };
            if f(0) != CHECK8 {
                return Err(parse_err("bad binary 8 check value"));
            }
            for k in 0..n * ncomp {
                out.set(k % ncomp, k / ncomp, f(k + 1));
            }
        }
        other => return Err(EngineError::UnsupportedFormat(format!("ovf data {other}"))),
    }
    Ok(out)
}
