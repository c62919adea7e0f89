// src/engine.rs
//
// The simulation engine: a graph of named quantities, lazily updated.
//
// - Quantities are stored by id (insertion order) and looked up by name.
// - `depends(child, parent)` records that `child` is computed from `parent`.
// - `update` recomputes out-of-date quantities depth-first (parents before the quantity itself).
// - `invalidate` marks a quantity and everything computed from it as stale.
// - Modules (see `modules`) add quantities, updaters and equations.
// - A solver integrates the registered first-order equations d(out)/dt = in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::array::FieldArray;
use crate::error::{EngineError, Result};
use crate::grid::Grid;
use crate::modules;
use crate::output::{self, Autosave, OutputFormat, Tabulator};
use crate::params::DEFAULT_DT;
use crate::quant::{Quant, QuantId, QuantKind, Verifier, SCALAR};
use crate::vec3::normalize;

/// Recomputes one quantity from its parents.
pub trait Updater {
    fn update(&mut self, engine: &mut Engine) -> Result<()>;
}

/// Time integrator for the engine's equations.
pub trait Solver {
    /// Take one time step, advancing `t`, `step` and (for adaptive solvers) `dt`.
    fn step(&mut self, engine: &mut Engine) -> Result<()>;

    /// Quantities written (children) and read (parents) by the solver, by name.
    fn dependencies(&self) -> (Vec<String>, Vec<String>);
}

/// First-order equation d(output)/dt = input.
#[derive(Debug, Clone, Copy)]
pub struct Equation {
    pub output: QuantId,
    pub input: QuantId,
    /// Renormalise output to unit length per cell after each step.
    pub unit_length: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateStats {
    pub count: u64,
    pub total: Duration,
}

pub struct Engine {
    grid_size: Option<[usize; 3]>,
    cell_size: Option<[f64; 3]>,
    periodic: [usize; 3],

    quants: Vec<Quant>,
    index: HashMap<String, QuantId>,
    updaters: Vec<Option<Box<dyn Updater>>>,
    stats: Vec<UpdateStats>,
    sum_terms: HashMap<QuantId, Vec<(QuantId, f64)>>,

    loaded: Vec<String>,
    equations: Vec<Equation>,
    solver: Option<Box<dyn Solver>>,

    autosaves: Vec<Autosave>,
    tables: Vec<Tabulator>,
    save_counts: HashMap<String, u64>,
    output_dir: PathBuf,

    t: QuantId,
    dt: QuantId,
    step: QuantId,
}

impl Engine {
    /// New engine writing its output files into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let mut e = Self {
            grid_size: None,
            cell_size: None,
            periodic: [0; 3],
            quants: Vec::new(),
            index: HashMap::new(),
            updaters: Vec::new(),
            stats: Vec::new(),
            sum_terms: HashMap::new(),
            loaded: Vec::new(),
            equations: Vec::new(),
            solver: None,
            autosaves: Vec::new(),
            tables: Vec::new(),
            save_counts: HashMap::new(),
            output_dir: output_dir.into(),
            t: 0,
            dt: 0,
            step: 0,
        };
        // Built-in quantities never clash, so these cannot fail.
        e.t = e.push_quant(Quant::new("t", SCALAR, QuantKind::Value, "s", "Time", [1; 3]));
        e.dt = e.push_quant(Quant::new("dt", SCALAR, QuantKind::Value, "s", "Time step", [1; 3]));
        e.step = e.push_quant(Quant::new("step", SCALAR, QuantKind::Value, "", "Solver step", [1; 3]));
        e.quants[e.t].multiplier[0] = 0.0;
        e.quants[e.dt].multiplier[0] = DEFAULT_DT;
        e.quants[e.dt].verifier = Some(Verifier::Positive);
        e.quants[e.step].multiplier[0] = 0.0;
        e
    }

    // ------------------------------------------------------------------ geometry

    pub fn set_grid_size(&mut self, size: [usize; 3]) -> Result<()> {
        if self.grid_size.is_some() {
            return Err(EngineError::GridAlreadySet("grid size"));
        }
        if size.iter().any(|&n| n == 0) {
            return Err(EngineError::invalid_argument(format!(
                "grid size must be positive, got {size:?}"
            )));
        }
        info!(nx = size[0], ny = size[1], nz = size[2], "grid size set");
        self.grid_size = Some(size);
        Ok(())
    }

    pub fn set_cell_size(&mut self, cell: [f64; 3]) -> Result<()> {
        if self.cell_size.is_some() {
            return Err(EngineError::GridAlreadySet("cell size"));
        }
        if cell.iter().any(|&c| !(c.is_finite() && c > 0.0)) {
            return Err(EngineError::invalid_argument(format!(
                "cell size must be positive, got {cell:?}"
            )));
        }
        info!(dx = cell[0], dy = cell[1], dz = cell[2], "cell size set");
        self.cell_size = Some(cell);
        Ok(())
    }

    pub fn set_periodic(&mut self, periodic: [usize; 3]) -> Result<()> {
        if !self.loaded.is_empty() {
            return Err(EngineError::invalid_argument(
                "periodic boundary conditions must be set before loading modules",
            ));
        }
        info!(px = periodic[0], py = periodic[1], pz = periodic[2], "periodicity set");
        self.periodic = periodic;
        Ok(())
    }

    /// Grid geometry. Fails until both grid size and cell size are set.
    pub fn grid(&self) -> Result<Grid> {
        match (self.grid_size, self.cell_size) {
            (Some(size), Some(cell)) => Ok(Grid::new(size, cell).with_periodic(self.periodic)),
            _ => Err(EngineError::GridNotSet),
        }
    }

    pub fn grid_size(&self) -> Option<[usize; 3]> {
        self.grid_size
    }

    pub fn cell_size(&self) -> Option<[f64; 3]> {
        self.cell_size
    }

    pub fn n_cells(&self) -> usize {
        self.grid_size.map_or(0, |s| s[0] * s[1] * s[2])
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    // ------------------------------------------------------------------ quantities

    fn push_quant(&mut self, q: Quant) -> QuantId {
        let id = self.quants.len();
        self.index.insert(q.name.clone(), id);
        self.quants.push(q);
        self.updaters.push(None);
        self.stats.push(UpdateStats::default());
        id
    }

    /// Add a new quantity. Fields and masks require the grid to be set.
    pub fn add_quant(
        &mut self,
        name: &str,
        ncomp: usize,
        kind: QuantKind,
        unit: &str,
        desc: &str,
    ) -> Result<QuantId> {
        if self.index.contains_key(name) {
            return Err(EngineError::DuplicateQuant(name.to_string()));
        }
        let size = match kind {
            QuantKind::Value => [1; 3],
            QuantKind::Mask | QuantKind::Field => self.grid()?.size,
        };
        debug!(name, ncomp, kind = %kind, unit, "add quantity");
        Ok(self.push_quant(Quant::new(name, ncomp, kind, unit, desc, size)))
    }

    /// Add a field quantity with an explicit array size (e.g. a padded kernel).
    pub fn add_field_sized(
        &mut self,
        name: &str,
        ncomp: usize,
        size: [usize; 3],
        unit: &str,
        desc: &str,
    ) -> Result<QuantId> {
        if self.index.contains_key(name) {
            return Err(EngineError::DuplicateQuant(name.to_string()));
        }
        Ok(self.push_quant(Quant::new(name, ncomp, QuantKind::Field, unit, desc, size)))
    }

    pub fn has_quant(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn id(&self, name: &str) -> Result<QuantId> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::UnknownQuant(name.to_string()))
    }

    pub fn quant(&self, name: &str) -> Result<&Quant> {
        Ok(&self.quants[self.id(name)?])
    }

    pub fn quant_by_id(&self, id: QuantId) -> &Quant {
        &self.quants[id]
    }

    pub(crate) fn quant_mut_by_id(&mut self, id: QuantId) -> &mut Quant {
        &mut self.quants[id]
    }

    /// All quantities in insertion order.
    pub fn quants(&self) -> &[Quant] {
        &self.quants
    }

    pub fn set_verifier(&mut self, id: QuantId, v: Verifier) {
        self.quants[id].verifier = Some(v);
    }

    pub fn set_updater(&mut self, id: QuantId, updater: Box<dyn Updater>) {
        self.updaters[id] = Some(updater);
        let q = &mut self.quants[id];
        q.has_updater = true;
        q.up_to_date = false;
    }

    /// Temporarily remove a quantity's array so it can be written while others are read.
    pub(crate) fn take_array(&mut self, id: QuantId) -> Result<FieldArray> {
        let q = &mut self.quants[id];
        let name = q.name.clone();
        q.array
            .take()
            .ok_or_else(|| EngineError::wrong_kind(name, "quantity has no array"))
    }

    pub(crate) fn put_array(&mut self, id: QuantId, array: FieldArray) {
        self.quants[id].array = Some(array);
    }

    // ------------------------------------------------------------------ dependencies

    /// Record that `child` is computed from `parent`.
    pub fn depends(&mut self, child: &str, parent: &str) -> Result<()> {
        let c = self.id(child)?;
        let p = self.id(parent)?;
        if self.quants[c].parents.contains(&p) {
            return Ok(());
        }
        if c == p || self.reaches(p, c) {
            return Err(EngineError::CyclicDependency {
                child: child.to_string(),
                parent: parent.to_string(),
            });
        }
        self.quants[c].parents.push(p);
        self.quants[p].children.push(c);
        Ok(())
    }

    /// True if `from` is (transitively) computed from `to`.
    fn reaches(&self, from: QuantId, to: QuantId) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.quants.len()];
        while let Some(q) = stack.pop() {
            if q == to {
                return true;
            }
            if seen[q] {
                continue;
            }
            seen[q] = true;
            stack.extend(self.quants[q].parents.iter().copied());
        }
        false
    }

    /// Register `term` (times `weight`) as a contribution to the sum quantity `sum`.
    pub fn add_to_sum(&mut self, sum: &str, term: &str, weight: f64) -> Result<()> {
        let s = self.id(sum)?;
        let t = self.id(term)?;
        if weight == 1.0 && self.quants[s].unit != self.quants[t].unit {
            return Err(EngineError::invalid_argument(format!(
                "sum: mismatched units: {} <-> {}",
                self.quants[s].full_name(),
                self.quants[t].full_name()
            )));
        }
        if self.quants[s].ncomp() != self.quants[t].ncomp() {
            return Err(EngineError::ComponentMismatch {
                quant: term.to_string(),
                expected: self.quants[s].ncomp(),
                got: self.quants[t].ncomp(),
            });
        }
        debug!(sum, term, weight, "add sum term");
        self.depends(sum, term)?;
        self.sum_terms.entry(s).or_default().push((t, weight));
        self.invalidate_id(s);
        Ok(())
    }

    pub(crate) fn sum_terms(&self, sum: QuantId) -> Vec<(QuantId, f64)> {
        self.sum_terms.get(&sum).cloned().unwrap_or_default()
    }

    // ------------------------------------------------------------------ update / invalidate

    pub fn update(&mut self, name: &str) -> Result<()> {
        let id = self.id(name)?;
        self.update_id(id)
    }

    pub fn update_id(&mut self, id: QuantId) -> Result<()> {
        if self.quants[id].up_to_date {
            return Ok(());
        }
        let parents = self.quants[id].parents.clone();
        for c in parents {
            self.update_id(c)?;
        }
        if let Some(mut u) = self.updaters[id].take() {
            let start = Instant::now();
            let res = u.update(self);
            self.updaters[id] = Some(u);
            let s = &mut self.stats[id];
            s.count += 1;
            s.total += start.elapsed();
            res?;
        }
        self.quants[id].up_to_date = true;
        Ok(())
    }

    pub fn invalidate(&mut self, name: &str) -> Result<()> {
        let id = self.id(name)?;
        self.invalidate_id(id);
        Ok(())
    }

    pub fn invalidate_id(&mut self, id: QuantId) {
        let mut stack = vec![id];
        let mut seen = vec![false; self.quants.len()];
        while let Some(q) = stack.pop() {
            if seen[q] {
                continue;
            }
            seen[q] = true;
            let quant = &mut self.quants[q];
            if quant.has_updater {
                quant.up_to_date = false;
            }
            stack.extend(quant.children.iter().copied());
        }
    }

    // ------------------------------------------------------------------ values

    /// Set a value/mask multiplier or a uniform field value.
    pub fn set_value(&mut self, name: &str, values: &[f64]) -> Result<()> {
        let id = self.id(name)?;
        if self.quants[id].has_updater {
            return Err(EngineError::wrong_kind(name, "is computed and cannot be set"));
        }
        let unit_length = self.is_unit_length_output(id);
        let q = &mut self.quants[id];
        match q.kind {
            QuantKind::Value | QuantKind::Mask => q.set_multiplier(values)?,
            QuantKind::Field => {
                if values.len() != q.ncomp() {
                    return Err(EngineError::ComponentMismatch {
                        quant: name.to_string(),
                        expected: q.ncomp(),
                        got: values.len(),
                    });
                }
                if let Some(v) = q.verifier {
                    v.check(name, values)?;
                }
                let a = q.array_mut()?;
                a.set_uniform(values);
                if unit_length {
                    normalize_cells(a);
                }
            }
        }
        self.after_set(id);
        Ok(())
    }

    /// Current value: multiplier for values/masks, cell average for fields.
    pub fn get_value(&mut self, name: &str) -> Result<Vec<f64>> {
        let id = self.id(name)?;
        self.update_id(id)?;
        let q = &self.quants[id];
        Ok(match q.kind {
            QuantKind::Value | QuantKind::Mask => q.multiplier.clone(),
            QuantKind::Field => {
                let a = q.array().ok_or_else(|| {
                    EngineError::wrong_kind(name, "field has no array")
                })?;
                let n = a.n_cells() as f64;
                (0..q.ncomp()).map(|c| a.sum_comp(c) / n).collect()
            }
        })
    }

    pub fn set_scalar(&mut self, name: &str, v: f64) -> Result<()> {
        self.set_value(name, &[v])
    }

    pub fn get_scalar(&mut self, name: &str) -> Result<f64> {
        let id = self.id(name)?;
        self.update_id(id)?;
        self.quants[id].scalar()
    }

    /// Set the spatial array of a mask (1 or ncomp components), resampled onto the grid.
    pub fn set_mask(&mut self, name: &str, array: &FieldArray) -> Result<()> {
        let id = self.id(name)?;
        let size = self.grid()?.size;
        let q = &mut self.quants[id];
        if q.kind != QuantKind::Mask {
            return Err(EngineError::wrong_kind(name, format!("is a {}, not a mask", q.kind)));
        }
        if array.ncomp() != 1 && array.ncomp() != q.ncomp() {
            return Err(EngineError::ComponentMismatch {
                quant: name.to_string(),
                expected: q.ncomp(),
                got: array.ncomp(),
            });
        }
        q.array = Some(array.resample_nearest(size));
        self.after_set(id);
        Ok(())
    }

    /// Set the full array of a field (or a mask, resetting its multiplier to 1).
    pub fn set_array(&mut self, name: &str, array: &FieldArray) -> Result<()> {
        let id = self.id(name)?;
        if self.quants[id].has_updater {
            return Err(EngineError::wrong_kind(name, "is computed and cannot be set"));
        }
        let grid_size = self.grid()?.size;
        let unit_length = self.is_unit_length_output(id);
        let q = &mut self.quants[id];
        // fields keep their own size (kernels live on the padded grid)
        let size = q.array.as_ref().map_or(grid_size, FieldArray::size);
        if q.kind == QuantKind::Value {
            return Err(EngineError::wrong_kind(name, "is a space-independent value"));
        }
        if array.ncomp() != q.ncomp() {
            return Err(EngineError::ComponentMismatch {
                quant: name.to_string(),
                expected: q.ncomp(),
                got: array.ncomp(),
            });
        }
        let mut a = array.resample_nearest(size);
        if unit_length && a.ncomp() == 3 {
            normalize_cells(&mut a);
        }
        if q.kind == QuantKind::Mask {
            q.multiplier.iter_mut().for_each(|m| *m = 1.0);
        }
        q.array = Some(a);
        self.after_set(id);
        Ok(())
    }

    /// Fully expanded array of a quantity (multiplier applied).
    pub fn get_array(&mut self, name: &str) -> Result<FieldArray> {
        let id = self.id(name)?;
        self.update_id(id)?;
        let q = &self.quants[id];
        Ok(match (&q.array, q.kind) {
            (Some(a), QuantKind::Field) => a.clone(),
            _ => q.expanded(self.grid()?.size),
        })
    }

    fn after_set(&mut self, id: QuantId) {
        self.quants[id].revision += 1;
        self.invalidate_id(id);
    }

    /// True if the quantity is the output of an equation kept at unit length.
    fn is_unit_length_output(&self, id: QuantId) -> bool {
        self.equations
            .iter()
            .any(|eq| eq.output == id && eq.unit_length)
    }

    // ------------------------------------------------------------------ modules

    /// Load a registered module (no-op if already loaded).
    pub fn load(&mut self, name: &str) -> Result<()> {
        if self.is_loaded(name) {
            return Ok(());
        }
        let spec = modules::lookup(name)?;
        self.grid()?;
        info!(module = name, "loading module");
        (spec.loader)(self)?;
        self.loaded.push(name.to_string());
        Ok(())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.iter().any(|m| m == name)
    }

    pub fn loaded_modules(&self) -> &[String] {
        &self.loaded
    }

    // ------------------------------------------------------------------ equations / solver

    pub fn add_pde1(&mut self, output: &str, input: &str, unit_length: bool) -> Result<()> {
        let output = self.id(output)?;
        let input = self.id(input)?;
        let (o, i) = (&self.quants[output], &self.quants[input]);
        if o.kind != QuantKind::Field || i.kind != QuantKind::Field || o.ncomp() != i.ncomp() {
            return Err(EngineError::wrong_kind(
                &o.name,
                format!("equation d{}/dt = {} needs matching fields", o.name, i.name),
            ));
        }
        self.equations.push(Equation {
            output,
            input,
            unit_length,
        });
        Ok(())
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    pub fn set_solver(&mut self, solver: Box<dyn Solver>) -> Result<()> {
        if self.solver.is_some() {
            return Err(EngineError::SolverAlreadySet);
        }
        let (children, parents) = solver.dependencies();
        debug!(?children, ?parents, "solver dependencies");
        self.solver = Some(solver);
        Ok(())
    }

    pub fn has_solver(&self) -> bool {
        self.solver.is_some()
    }

    pub fn solver_dependencies(&self) -> Option<(Vec<String>, Vec<String>)> {
        self.solver.as_ref().map(|s| s.dependencies())
    }

    pub fn time(&self) -> f64 {
        self.quants[self.t].multiplier[0]
    }

    pub fn dt(&self) -> f64 {
        self.quants[self.dt].multiplier[0]
    }

    pub fn step_count(&self) -> u64 {
        self.quants[self.step].multiplier[0] as u64
    }

    /// Advance `t` by `dt_taken` and `step` by one. Called by solvers.
    pub(crate) fn advance_time(&mut self, dt_taken: f64) {
        self.quants[self.t].multiplier[0] += dt_taken;
        self.quants[self.step].multiplier[0] += 1.0;
        self.invalidate_id(self.t);
        self.invalidate_id(self.step);
    }

    /// Set the next time step. Called by adaptive solvers.
    pub(crate) fn set_dt(&mut self, dt: f64) {
        self.quants[self.dt].multiplier[0] = dt;
        self.invalidate_id(self.dt);
    }

    /// Set `t` directly (implicit solvers evaluate at t + dt before committing).
    pub(crate) fn set_time(&mut self, t: f64) {
        self.quants[self.t].multiplier[0] = t;
        self.invalidate_id(self.t);
    }

    /// Renormalise unit-length equation outputs and mark them changed.
    pub(crate) fn finish_output(&mut self, eq: &Equation) -> Result<()> {
        if eq.unit_length {
            let q = &mut self.quants[eq.output];
            normalize_cells(q.array_mut()?);
        }
        self.invalidate_id(eq.output);
        Ok(())
    }

    /// One solver step followed by output bookkeeping.
    pub fn step(&mut self) -> Result<()> {
        let mut solver = self.solver.take().ok_or(EngineError::NoSolver)?;
        let res = solver.step(self);
        self.solver = Some(solver);
        res?;
        self.notify_outputs()
    }

    /// Take exactly `n` steps.
    pub fn steps(&mut self, n: u64) -> Result<()> {
        self.ensure_solver()?;
        self.notify_outputs()?;
        for _ in 0..n {
            self.step()?;
        }
        Ok(())
    }

    /// Run for `duration` seconds of simulated time.
    pub fn run(&mut self, duration: f64) -> Result<()> {
        self.ensure_solver()?;
        let t_end = self.time() + duration;
        info!(duration, t_end, "run");
        self.notify_outputs()?;
        while self.time() < t_end {
            self.step()?;
        }
        Ok(())
    }

    /// Step until the scalar quantity `name` drops below `value`.
    pub fn run_until_smaller(&mut self, name: &str, value: f64) -> Result<()> {
        self.run_until(name, value, |v, x| v < x)
    }

    /// Step until the scalar quantity `name` exceeds `value`.
    pub fn run_until_larger(&mut self, name: &str, value: f64) -> Result<()> {
        self.run_until(name, value, |v, x| v > x)
    }

    fn run_until(&mut self, name: &str, value: f64, done: fn(f64, f64) -> bool) -> Result<()> {
        self.ensure_solver()?;
        let id = self.id(name)?;
        info!(quant = name, value, "run until condition");
        self.notify_outputs()?;
        loop {
            self.update_id(id)?;
            let v = self.quants[id].scalar()?;
            if done(v, value) {
                info!(quant = name, v, steps = self.step_count(), t = self.time(), "condition met");
                return Ok(());
            }
            self.step()?;
        }
    }

    fn ensure_solver(&self) -> Result<()> {
        if self.solver.is_none() {
            return Err(EngineError::NoSolver);
        }
        Ok(())
    }

    // ------------------------------------------------------------------ output

    /// Save a quantity now. `path` is relative to the output directory unless absolute.
    pub fn save(&mut self, name: &str, format: &str, options: &[String], path: &str) -> Result<PathBuf> {
        let format = OutputFormat::parse(format)?;
        let id = self.id(name)?;
        let path = self.output_dir.join(path);
        output::save_quant(self, id, format, options, &path)?;
        Ok(path)
    }

    /// Save a quantity every `period` seconds of simulated time.
    pub fn autosave(&mut self, name: &str, format: &str, options: &[String], period: f64) -> Result<()> {
        if !(period > 0.0) {
            return Err(EngineError::invalid_argument("autosave period must be positive"));
        }
        let format = OutputFormat::parse(format)?;
        let id = self.id(name)?;
        info!(quant = name, format = format.extension(), period, "autosave");
        self.autosaves
            .push(Autosave::new(id, format, options.to_vec(), period, self.time()));
        Ok(())
    }

    /// Append one row of the given quantities to a data table now.
    pub fn tabulate(&mut self, names: &[String], file: &str) -> Result<()> {
        let ids = names.iter().map(|n| self.id(n)).collect::<Result<Vec<_>>>()?;
        let path = self.output_dir.join(file);
        let idx = match self.tables.iter().position(|t| t.path() == path) {
            Some(i) => i,
            None => {
                self.tables.push(Tabulator::new(ids, path, None));
                self.tables.len() - 1
            }
        };
        let mut table = self.tables.remove(idx);
        let res = table.write_row(self);
        self.tables.insert(idx, table);
        res
    }

    /// Append a table row every `period` seconds.
    pub fn autotabulate(&mut self, names: &[String], file: &str, period: f64) -> Result<()> {
        if !(period > 0.0) {
            return Err(EngineError::invalid_argument("autotabulate period must be positive"));
        }
        let ids = names.iter().map(|n| self.id(n)).collect::<Result<Vec<_>>>()?;
        let path = self.output_dir.join(file);
        self.tables.push(Tabulator::new(ids, path, Some((period, self.time()))));
        Ok(())
    }

    /// Next auto-numbered file name for `quant` with extension `ext`.
    pub(crate) fn next_output_name(&mut self, quant: &str, ext: &str) -> PathBuf {
        let safe: String = quant
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        let n = self.save_counts.entry(safe.clone()).or_insert(0);
        let name = format!("{}{:07}.{}", safe, *n, ext);
        *n += 1;
        self.output_dir.join(name)
    }

    /// Write every autosave/autotabulate output that has come due.
    fn notify_outputs(&mut self) -> Result<()> {
        let t = self.time();
        let mut autosaves = std::mem::take(&mut self.autosaves);
        let mut res = Ok(());
        for a in autosaves.iter_mut() {
            if a.due(t) {
                res = a.save(self);
                if res.is_err() {
                    break;
                }
            }
        }
        self.autosaves = autosaves;
        res?;

        let mut tables = std::mem::take(&mut self.tables);
        let mut res = Ok(());
        for tab in tables.iter_mut() {
            if tab.due(t) {
                res = tab.write_row(self);
                if res.is_err() {
                    break;
                }
            }
        }
        self.tables = tables;
        res
    }

    // ------------------------------------------------------------------ stats

    pub fn stats(&self, id: QuantId) -> UpdateStats {
        self.stats[id]
    }

    /// Per-quantity update timing table.
    pub fn stats_table(&self) -> String {
        let mut s = format!(
            "{:<24} {:>10} {:>14} {:>14}\n",
            "quantity", "updates", "total (ms)", "avg (us)"
        );
        for (q, st) in self.quants.iter().zip(&self.stats) {
            if st.count == 0 {
                continue;
            }
            let total_ms = st.total.as_secs_f64() * 1e3;
            let avg_us = st.total.as_secs_f64() * 1e6 / st.count as f64;
            s.push_str(&format!(
                "{:<24} {:>10} {:>14.3} {:>14.3}\n",
                q.name, st.count, total_ms, avg_us
            ));
        }
        s.push_str(&format!(
            "steps: {}  t: {:e} s  dt: {:e} s\n",
            self.step_count(),
            self.time(),
            self.dt()
        ));
        s
    }
}

/// Normalise each cell of a 3-component array to unit length (zero stays zero).
pub(crate) fn normalize_cells(a: &mut FieldArray) {
    let n = a.n_cells();
    for idx in 0..n {
        let v = normalize(a.vec3(idx));
        a.set_vec3(idx, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Double {
        src: QuantId,
        dst: QuantId,
    }

    impl Updater for Double {
        fn update(&mut self, e: &mut Engine) -> Result<()> {
            let v = e.quant_by_id(self.src).multiplier()[0];
            e.quant_mut_by_id(self.dst).multiplier[0] = 2.0 * v;
            Ok(())
        }
    }

    fn engine() -> Engine {
        let mut e = Engine::new(std::env::temp_dir());
        e.set_grid_size([2, 2, 1]).unwrap();
        e.set_cell_size([1e-9, 1e-9, 1e-9]).unwrap();
        e
    }

    #[test]
    fn builtin_quantities_exist() {
        let mut e = Engine::new(".");
        assert_eq!(e.get_scalar("t").unwrap(), 0.0);
        assert_eq!(e.get_scalar("step").unwrap(), 0.0);
        assert!(e.set_scalar("dt", -1.0).is_err());
        e.set_scalar("dt", 2e-15).unwrap();
        assert_eq!(e.dt(), 2e-15);
    }

    #[test]
    fn grid_can_only_be_set_once() {
        let mut e = engine();
        assert!(matches!(
            e.set_grid_size([4, 4, 1]),
            Err(EngineError::GridAlreadySet(_))
        ));
        assert!(e.set_cell_size([1.0, 1.0, 1.0]).is_err());
    }

    #[test]
    fn fields_need_a_grid() {
        let mut e = Engine::new(".");
        let err = e.add_quant("m", 3, QuantKind::Field, "", "").unwrap_err();
        assert!(matches!(err, EngineError::GridNotSet));
        assert!(e.add_quant("a", 1, QuantKind::Value, "", "").is_ok());
    }

    #[test]
    fn lazy_update_and_invalidation() {
        let mut e = engine();
        let a = e.add_quant("a", 1, QuantKind::Value, "", "").unwrap();
        let b = e.add_quant("b", 1, QuantKind::Value, "", "").unwrap();
        let c = e.add_quant("c", 1, QuantKind::Value, "", "").unwrap();
        e.depends("b", "a").unwrap();
        e.depends("c", "b").unwrap();
        e.set_updater(b, Box::new(Double { src: a, dst: b }));
        e.set_updater(c, Box::new(Double { src: b, dst: c }));

        e.set_scalar("a", 3.0).unwrap();
        assert_eq!(e.get_scalar("c").unwrap(), 12.0);
        assert_eq!(e.stats(c).count, 1);

        // Up to date: no recomputation
        assert_eq!(e.get_scalar("c").unwrap(), 12.0);
        assert_eq!(e.stats(c).count, 1);

        e.set_scalar("a", 1.0).unwrap();
        assert!(!e.quant_by_id(c).is_up_to_date());
        assert_eq!(e.get_scalar("c").unwrap(), 4.0);
        assert_eq!(e.stats(b).count, 2);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut e = engine();
        for n in ["a", "b", "c"] {
            e.add_quant(n, 1, QuantKind::Value, "", "").unwrap();
        }
        e.depends("b", "a").unwrap();
        e.depends("c", "b").unwrap();
        assert!(matches!(
            e.depends("a", "c"),
            Err(EngineError::CyclicDependency { .. })
        ));
        assert!(e.depends("a", "a").is_err());
    }

    #[test]
    fn computed_quantities_cannot_be_set() {
        let mut e = engine();
        let a = e.add_quant("a", 1, QuantKind::Value, "", "").unwrap();
        let b = e.add_quant("b", 1, QuantKind::Value, "", "").unwrap();
        e.set_updater(b, Box::new(Double { src: a, dst: b }));
        assert!(e.set_scalar("b", 1.0).is_err());
    }

    #[test]
    fn mask_is_resampled_onto_grid() {
        let mut e = engine();
        e.add_quant("Msat", 1, QuantKind::Mask, "A/m", "").unwrap();
        e.set_scalar("Msat", 800e3).unwrap();
        let mut coarse = FieldArray::zeros(1, [1, 2, 1]);
        coarse.set(0, 1, 1.0);
        e.set_mask("Msat", &coarse).unwrap();

        let full = e.get_array("Msat").unwrap();
        assert_eq!(full.size(), [2, 2, 1]);
        assert_eq!(full.get(0, full.idx(0, 0, 0)), 0.0);
        assert_eq!(full.get(0, full.idx(1, 1, 0)), 800e3);
    }

    #[test]
    fn run_without_solver_fails() {
        let mut e = engine();
        assert!(matches!(e.run(1e-12), Err(EngineError::NoSolver)));
        assert!(matches!(e.step(), Err(EngineError::NoSolver)));
    }

    #[test]
    fn output_names_are_numbered_per_quantity() {
        let mut e = engine();
        let a = e.next_output_name("m", "omf");
        let b = e.next_output_name("m", "omf");
        let c = e.next_output_name("solver/x", "txt");
        assert!(a.ends_with("m0000000.omf"));
        assert!(b.ends_with("m0000001.omf"));
        assert!(c.ends_with("solver_x0000000.txt"));
    }

    #[test]
    fn load_needs_grid_and_periodicity_comes_first() {
        let mut e = Engine::new(std::env::temp_dir());
        assert!(matches!(e.load("magnetization"), Err(EngineError::GridNotSet)));
        e.set_grid_size([2, 2, 1]).unwrap();
        assert!(matches!(e.load("magnetization"), Err(EngineError::GridNotSet)));
        e.set_cell_size([1e-9; 3]).unwrap();
        e.set_periodic([1, 0, 0]).unwrap();
        e.load("magnetization").unwrap();
        assert!(e.set_periodic([1, 1, 0]).is_err());
        assert_eq!(e.grid().unwrap().periodic, [1, 0, 0]);
    }

    #[test]
    fn setv_keeps_magnetization_unit_length() {
        let mut e = engine();
        e.load("llg").unwrap();
        e.set_value("m", &[3.0, 4.0, 0.0]).unwrap();
        let m = e.get_array("m").unwrap();
        for idx in 0..m.n_cells() {
            let v = m.vec3(idx);
            assert!((v[0] - 0.6).abs() < 1e-12 && (v[1] - 0.8).abs() < 1e-12, "{v:?}");
        }
        // fields that are not equation outputs are stored as given
        e.add_quant("f", 3, QuantKind::Field, "", "").unwrap();
        e.set_value("f", &[3.0, 4.0, 0.0]).unwrap();
        assert_eq!(e.get_value("f").unwrap(), vec![3.0, 4.0, 0.0]);
    }

    fn damped_macrospin() -> Engine {
        let mut e = Engine::new(std::env::temp_dir());
        e.set_grid_size([1, 1, 1]).unwrap();
        e.set_cell_size([2e-9; 3]).unwrap();
        e.load("micromagnetism").unwrap();
        e.load("solver/rk12").unwrap();
        e.set_scalar("Msat", 8e5).unwrap();
        e.set_scalar("alpha", 1.0).unwrap();
        e.set_value("H_ext", &[0.0, 0.0, 1e5]).unwrap();
        e
    }

    #[test]
    fn run_until_smaller_stops_once_torque_is_small() {
        let mut e = damped_macrospin();
        let start = e.get_scalar("maxtorque").unwrap();
        assert!(start > 1e9, "{start}");
        e.run_until_smaller("maxtorque", 1e-3 * start).unwrap();
        assert!(e.step_count() > 0);
        assert!(e.get_scalar("maxtorque").unwrap() < 1e-3 * start);
        assert!(e.get_value("m").unwrap()[2] > 0.99);
    }

    #[test]
    fn run_until_checks_before_stepping() {
        let mut e = damped_macrospin();
        // already true: returns without taking a step
        e.run_until_smaller("maxtorque", f64::INFINITY).unwrap();
        e.run_until_larger("t", -1.0).unwrap();
        assert_eq!(e.step_count(), 0);

        e.run_until_larger("t", 1e-13).unwrap();
        assert!(e.time() > 1e-13);
        assert!(e.step_count() > 0);
    }

    #[test]
    fn run_until_without_solver_fails() {
        let mut e = engine();
        e.load("micromagnetism").unwrap();
        assert!(matches!(
            e.run_until_smaller("maxtorque", 1.0),
            Err(EngineError::NoSolver)
        ));
        assert!(matches!(e.run_until_larger("t", 1.0), Err(EngineError::NoSolver)));
        assert!(e.run_until_smaller("nosuch", 1.0).is_err());
    }
}
