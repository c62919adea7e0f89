// src/api.rs
//
// Script-facing API: one command per script function, dispatched from JSON.
//
// `COMMANDS` is the single source of truth for the command set; the Python
// client generator (apigen) writes one wrapper per entry.

use std::path::Path;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::array::{FieldArray, NestedArray};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::geometry_mask::inscribed_ellipse;
use crate::graph::save_graph;
use crate::magstate;
use crate::modules::micromag::decompose_magnetization;
use crate::ovf::read_ovf;
use crate::quant::QuantKind;

/// Which generated Python module a command's wrapper goes into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PyModule {
    Core,
    Geom,
    Magstate,
}

#[derive(Clone, Copy, Debug)]
pub struct Command {
    pub name: &'static str,
    pub args: &'static [&'static str],
    pub doc: &'static str,
    pub module: PyModule,
}

const fn cmd(
    name: &'static str,
    args: &'static [&'static str],
    doc: &'static str,
    module: PyModule,
) -> Command {
    Command {
        name,
        args,
        doc,
        module,
    }
}

use PyModule::{Core, Geom, Magstate};

pub const COMMANDS: &[Command] = &[
    cmd("setgridsize", &["nx", "ny", "nz"], "Set the number of cells (once).", Core),
    cmd("getgridsize", &[], "Number of cells [nx, ny, nz].", Core),
    cmd("setcellsize", &["dx", "dy", "dz"], "Set the cell size in metres (once).", Core),
    cmd("getcellsize", &[], "Cell size [dx, dy, dz] in metres.", Core),
    cmd("setperiodic", &["px", "py", "pz"], "Periodic image counts per direction (0 = open).", Core),
    cmd("load", &["module"], "Load a module by name.", Core),
    cmd("setv", &["quant", "value"], "Set a value (number or list of components).", Core),
    cmd("getv", &["quant"], "Get a value as a list of components (fields: average).", Core),
    cmd("sets", &["quant", "value"], "Set a scalar value.", Core),
    cmd("gets", &["quant"], "Get a scalar value.", Core),
    cmd("setmask", &["quant", "array"], "Set the space-dependent mask of a quantity.", Core),
    cmd("setarray", &["quant", "array"], "Set the full array of a quantity.", Core),
    cmd("setmf", &["array"], "Set m and Msat from a full magnetization [3][x][y][z] in A/m.", Core),
    cmd("setarray_file", &["quant", "file"], "Set the array of a quantity from an OVF file.", Core),
    cmd("getarray", &["quant"], "Get the full array of a quantity as [comp][x][y][z].", Core),
    cmd("getcell", &["quant", "i", "j", "k"], "Components of a quantity in one cell.", Core),
    cmd("setcell", &["quant", "i", "j", "k", "value"], "Set the components of a field in one cell.", Core),
    cmd("autosave", &["quant", "format", "options", "period"], "Save a quantity periodically.", Core),
    cmd("save", &["quant", "format", "options", "file"], "Save a quantity now.", Core),
    cmd("tabulate", &["quants", "file"], "Append a row of values to a table.", Core),
    cmd("autotabulate", &["quants", "file", "period"], "Append table rows periodically.", Core),
    cmd("run", &["duration"], "Run for a duration in seconds.", Core),
    cmd("step", &[], "Take one time step.", Core),
    cmd("steps", &["n"], "Take n time steps.", Core),
    cmd("run_until_smaller", &["quant", "value"], "Run until a scalar drops below a value.", Core),
    cmd("run_until_larger", &["quant", "value"], "Run until a scalar exceeds a value.", Core),
    cmd("printstats", &[], "Log and return per-quantity update timings.", Core),
    cmd("savegraph", &["file"], "Save the physics graph (DOT, rendered by graphviz if available).", Core),
    cmd("echo", &["message"], "Log a message.", Core),
    cmd("ellipse", &[], "Mask of the largest ellipse inscribed in the grid.", Geom),
    cmd("uniform", &["mx", "my", "mz"], "Uniform magnetization array.", Magstate),
    cmd("vortex", &["circulation", "polarization"], "Vortex magnetization array.", Magstate),
];

/// Positional arguments of one call, with errors naming the command.
struct Args<'a> {
    cmd: &'a str,
    args: &'a [Value],
}

impl<'a> Args<'a> {
    fn bad(&self, i: usize, what: &str) -> EngineError {
        EngineError::invalid_argument(format!("{}: argument {} must be {}", self.cmd, i + 1, what))
    }

    fn get(&self, i: usize) -> Result<&'a Value> {
        self.args.get(i).ok_or_else(|| self.bad(i, "given"))
    }

    fn f64(&self, i: usize) -> Result<f64> {
        self.get(i)?.as_f64().ok_or_else(|| self.bad(i, "a number"))
    }

    fn usize(&self, i: usize) -> Result<usize> {
        let v = self.get(i)?;
        if let Some(u) = v.as_u64() {
            return Ok(u as usize);
        }
        // integral floats from scripts (e.g. 4.0)
        match v.as_f64() {
            Some(f) if f >= 0.0 && f.fract() == 0.0 => Ok(f as usize),
            _ => Err(self.bad(i, "a non-negative integer")),
        }
    }

    fn str(&self, i: usize) -> Result<&'a str> {
        self.get(i)?.as_str().ok_or_else(|| self.bad(i, "a string"))
    }

    fn strings(&self, i: usize) -> Result<Vec<String>> {
        match self.get(i)? {
            Value::Null => Ok(vec![]),
            Value::String(s) => Ok(vec![s.clone()]),
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string).ok_or_else(|| self.bad(i, "a list of strings")))
                .collect(),
            _ => Err(self.bad(i, "a list of strings")),
        }
    }

    /// A number or a list of numbers.
    fn f64s(&self, i: usize) -> Result<Vec<f64>> {
        match self.get(i)? {
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_f64().ok_or_else(|| self.bad(i, "a list of numbers")))
                .collect(),
            v => v.as_f64().map(|x| vec![x]).ok_or_else(|| self.bad(i, "a number or list")),
        }
    }

    fn array(&self, i: usize) -> Result<FieldArray> {
        let nested: NestedArray =
            serde_json::from_value(self.get(i)?.clone()).map_err(|_| self.bad(i, "an array [comp][x][y][z]"))?;
        FieldArray::from_nested(&nested)
    }
}

/// The engine behind the script API.
pub struct Api {
    engine: Engine,
}

impl Api {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Execute one command. Unknown commands and wrong argument counts are errors.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        let command = COMMANDS
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| EngineError::invalid_argument(format!("unknown command: {name}")))?;
        if args.len() != command.args.len() {
            return Err(EngineError::invalid_argument(format!(
                "{name} takes {} argument(s) ({}), got {}",
                command.args.len(),
                command.args.join(", "),
                args.len()
            )));
        }
        debug!(command = name, "call");
        let a = Args { cmd: name, args };
        let e = &mut self.engine;

        match name {
            "setgridsize" => e.set_grid_size([a.usize(0)?, a.usize(1)?, a.usize(2)?])?,
            "getgridsize" => return Ok(json!(e.grid_size().ok_or(EngineError::GridNotSet)?)),
            "setcellsize" => e.set_cell_size([a.f64(0)?, a.f64(1)?, a.f64(2)?])?,
            "getcellsize" => return Ok(json!(e.cell_size().ok_or(EngineError::GridNotSet)?)),
            "setperiodic" => e.set_periodic([a.usize(0)?, a.usize(1)?, a.usize(2)?])?,
            "load" => e.load(a.str(0)?)?,
            "setv" => e.set_value(a.str(0)?, &a.f64s(1)?)?,
            "getv" => return Ok(json!(e.get_value(a.str(0)?)?)),
            "sets" => e.set_scalar(a.str(0)?, a.f64(1)?)?,
            "gets" => return Ok(json!(e.get_scalar(a.str(0)?)?)),
            "setmask" => e.set_mask(a.str(0)?, &a.array(1)?)?,
            "setarray" => e.set_array(a.str(0)?, &a.array(1)?)?,
            "setmf" => decompose_magnetization(e, &a.array(0)?)?,
            "setarray_file" => {
                let data = read_ovf(Path::new(a.str(1)?))?;
                e.set_array(a.str(0)?, &data)?;
            }
            "getarray" => return Ok(json!(e.get_array(a.str(0)?)?.to_nested())),
            "getcell" => return Ok(json!(get_cell(e, a.str(0)?, [a.usize(1)?, a.usize(2)?, a.usize(3)?])?)),
            "setcell" => set_cell(e, a.str(0)?, [a.usize(1)?, a.usize(2)?, a.usize(3)?], &a.f64s(4)?)?,
            "autosave" => e.autosave(a.str(0)?, a.str(1)?, &a.strings(2)?, a.f64(3)?)?,
            "save" => {
                let path = e.save(a.str(0)?, a.str(1)?, &a.strings(2)?, a.str(3)?)?;
                return Ok(json!(path.display().to_string()));
            }
            "tabulate" => e.tabulate(&a.strings(0)?, a.str(1)?)?,
            "autotabulate" => e.autotabulate(&a.strings(0)?, a.str(1)?, a.f64(2)?)?,
            "run" => e.run(a.f64(0)?)?,
            "step" => e.step()?,
            "steps" => e.steps(a.usize(0)? as u64)?,
            "run_until_smaller" => e.run_until_smaller(a.str(0)?, a.f64(1)?)?,
            "run_until_larger" => e.run_until_larger(a.str(0)?, a.f64(1)?)?,
            "printstats" => {
                let table = e.stats_table();
                info!("update statistics\n{table}");
                return Ok(json!(table));
            }
            "savegraph" => {
                let file = e.output_dir().join(a.str(0)?);
                let dot = save_graph(e, &file)?;
                return Ok(json!(dot.display().to_string()));
            }
            "echo" => {
                let msg = a.str(0)?;
                info!(target: "llg_engine::script", "{msg}");
                return Ok(json!(msg));
            }
            "ellipse" => return Ok(json!(inscribed_ellipse(&e.grid()?).to_nested())),
            "uniform" => {
                let m = magstate::uniform(&e.grid()?, [a.f64(0)?, a.f64(1)?, a.f64(2)?]);
                return Ok(json!(m.to_nested()));
            }
            "vortex" => {
                let grid = e.grid()?;
                let core = 2.0 * grid.cell[0].max(grid.cell[1]);
                let m = magstate::vortex(&grid, a.f64(0)?, a.f64(1)?, core);
                return Ok(json!(m.to_nested()));
            }
            // every COMMANDS entry is handled above
            other => return Err(EngineError::invalid_argument(format!("unknown command: {other}"))),
        }
        Ok(Value::Null)
    }
}

fn check_cell(e: &Engine, name: &str, ijk: [usize; 3]) -> Result<usize> {
    let grid = e.grid()?;
    if (0..3).any(|d| ijk[d] >= grid.size[d]) {
        return Err(EngineError::invalid_argument(format!(
            "{name}: cell {ijk:?} outside grid {:?}",
            grid.size
        )));
    }
    Ok(grid.idx(ijk[0], ijk[1], ijk[2]))
}

fn get_cell(e: &mut Engine, name: &str, ijk: [usize; 3]) -> Result<Vec<f64>> {
    let idx = check_cell(e, name, ijk)?;
    let id = e.id(name)?;
    e.update_id(id)?;
    let q = e.quant_by_id(id);
    Ok((0..q.ncomp()).map(|c| q.value_at(c, idx)).collect())
}

fn set_cell(e: &mut Engine, name: &str, ijk: [usize; 3], values: &[f64]) -> Result<()> {
    let idx = check_cell(e, name, ijk)?;
    let q = e.quant(name)?;
    if q.kind() != QuantKind::Field {
        return Err(EngineError::wrong_kind(name, "setcell applies to fields only"));
    }
    if values.len() != q.ncomp() {
        return Err(EngineError::ComponentMismatch {
            quant: name.to_string(),
            expected: q.ncomp(),
            got: values.len(),
        });
    }
    let mut a = e.get_array(name)?;
    for (c, &v) in values.iter().enumerate() {
        a.set(c, idx, v);
    }
    e.set_array(name, &a)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> Api {
        Api::new(Engine::new(std::env::temp_dir()))
    }

    fn call(api: &mut Api, cmd: &str, args: Value) -> Result<Value> {
        let args = args.as_array().cloned().unwrap_or_default();
        api.call(cmd, &args)
    }

    #[test]
    fn command_names_are_unique() {
        let mut names: Vec<_> = COMMANDS.iter().map(|c| c.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), COMMANDS.len());
    }

    #[test]
    fn geometry_round_trip() {
        let mut a = api();
        call(&mut a, "setgridsize", json!([4, 2, 1])).unwrap();
        call(&mut a, "setcellsize", json!([1e-9, 2e-9, 3e-9])).unwrap();
        assert_eq!(call(&mut a, "getgridsize", json!([])).unwrap(), json!([4, 2, 1]));
        assert_eq!(call(&mut a, "getcellsize", json!([])).unwrap(), json!([1e-9, 2e-9, 3e-9]));
    }

    #[test]
    fn arity_and_types_are_checked() {
        let mut a = api();
        assert!(call(&mut a, "setgridsize", json!([4, 2])).is_err());
        assert!(call(&mut a, "setgridsize", json!([4, "x", 1])).is_err());
        assert!(call(&mut a, "nosuchcommand", json!([])).is_err());
        // integral floats are accepted as counts
        call(&mut a, "setgridsize", json!([4.0, 2, 1])).unwrap();
    }

    #[test]
    fn values_masks_and_cells() {
        let mut a = api();
        call(&mut a, "setgridsize", json!([4, 4, 1])).unwrap();
        call(&mut a, "setcellsize", json!([1e-9, 1e-9, 1e-9])).unwrap();
        call(&mut a, "load", json!(["micromagnetism"])).unwrap();
        call(&mut a, "setv", json!(["Msat", 800e3])).unwrap();
        assert_eq!(call(&mut a, "gets", json!(["Msat"])).unwrap(), json!(800e3));
        call(&mut a, "setv", json!(["H_ext", [0, 0, 1e3]])).unwrap();
        assert_eq!(call(&mut a, "getv", json!(["H_ext"])).unwrap(), json!([0.0, 0.0, 1e3]));

        // 2x2 mask resampled onto 4x4: only the x >= 2 half keeps Msat
        let mask = json!([[[[0.0], [0.0]], [[1.0], [1.0]]]]);
        call(&mut a, "setmask", json!(["Msat", mask])).unwrap();
        assert_eq!(call(&mut a, "getcell", json!(["Msat", 0, 0, 0])).unwrap(), json!([0.0]));
        assert_eq!(call(&mut a, "getcell", json!(["Msat", 3, 3, 0])).unwrap(), json!([800e3]));

        call(&mut a, "setcell", json!(["m", 1, 1, 0, [0, 0, 2]])).unwrap();
        assert_eq!(call(&mut a, "getcell", json!(["m", 1, 1, 0])).unwrap(), json!([0.0, 0.0, 1.0]));
        assert!(call(&mut a, "getcell", json!(["m", 4, 0, 0])).is_err());
    }

    #[test]
    fn vortex_feeds_setarray() {
        let mut a = api();
        call(&mut a, "setgridsize", json!([8, 8, 1])).unwrap();
        call(&mut a, "setcellsize", json!([2e-9, 2e-9, 2e-9])).unwrap();
        call(&mut a, "load", json!(["magnetization"])).unwrap();
        let v = call(&mut a, "vortex", json!([1, 1])).unwrap();
        call(&mut a, "setarray", json!(["m", v])).unwrap();
        let m = call(&mut a, "getcell", json!(["m", 7, 4, 0])).unwrap();
        assert!(m[1].as_f64().unwrap() > 0.9);
    }

    #[test]
    fn setmf_splits_full_magnetization() {
        let mut a = api();
        call(&mut a, "setgridsize", json!([2, 2, 1])).unwrap();
        call(&mut a, "setcellsize", json!([1e-9, 1e-9, 1e-9])).unwrap();
        // cell (1,0) along z with 8e5 A/m, cell (0,1) along x with half of that
        let mx = json!([[[0.0], [4e5]], [[0.0], [0.0]]]);
        let my = json!([[[0.0], [0.0]], [[0.0], [0.0]]]);
        let mz = json!([[[0.0], [0.0]], [[8e5], [0.0]]]);
        call(&mut a, "setmf", json!([[mx, my, mz]])).unwrap();

        assert_eq!(call(&mut a, "gets", json!(["Msat"])).unwrap(), json!(8e5));
        assert_eq!(call(&mut a, "getcell", json!(["Msat", 0, 1, 0])).unwrap(), json!([4e5]));
        assert_eq!(call(&mut a, "getcell", json!(["Msat", 1, 1, 0])).unwrap(), json!([0.0]));
        assert_eq!(call(&mut a, "getcell", json!(["m", 1, 0, 0])).unwrap(), json!([0.0, 0.0, 1.0]));
        assert_eq!(call(&mut a, "getcell", json!(["m", 0, 1, 0])).unwrap(), json!([1.0, 0.0, 0.0]));
    }

    #[test]
    fn echo_returns_message() {
        let mut a = api();
        assert_eq!(call(&mut a, "echo", json!(["hi"])).unwrap(), json!("hi"));
    }
}
