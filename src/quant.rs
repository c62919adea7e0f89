// src/quant.rs
//
// Physical quantities: scalar, vector or tensor values and fields.
//
// Each quantity is A(r) * m(t): a pointwise product of an array A(r) with a
// per-component multiplier m(t).
//  - Value: no array; the multiplier is the value.
//  - Mask:  optional array (absent = uniform 1). A 1-component array is shared by
//           all multiplier components.
//  - Field: array always present, multiplier 1.
// Values and masks start at zero.

use std::fmt;

use crate::array::FieldArray;
use crate::error::{EngineError, Result};

pub type QuantId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantKind {
    Value,
    Mask,
    Field,
}

impl QuantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Mask => "mask",
            Self::Field => "field",
        }
    }
}

impl fmt::Display for QuantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check run on values passed to `setv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verifier {
    Positive,
    NonNegative,
}

impl Verifier {
    pub fn check(&self, quant: &str, values: &[f64]) -> Result<()> {
        for &v in values {
            let ok = match self {
                Self::Positive => v > 0.0,
                Self::NonNegative => v >= 0.0,
            };
            if !ok || !v.is_finite() {
                let want = match self {
                    Self::Positive => "positive",
                    Self::NonNegative => "non-negative",
                };
                return Err(EngineError::invalid_value(
                    quant,
                    format!("{v} is not {want}"),
                ));
            }
        }
        Ok(())
    }
}

pub const SCALAR: usize = 1;
pub const VECTOR: usize = 3;

#[derive(Debug, Clone)]
pub struct Quant {
    pub(crate) name: String,
    pub(crate) kind: QuantKind,
    pub(crate) unit: String,
    pub(crate) desc: String,
    pub(crate) multiplier: Vec<f64>,
    pub(crate) array: Option<FieldArray>,
    pub(crate) up_to_date: bool,
    pub(crate) has_updater: bool,
    pub(crate) verifier: Option<Verifier>,
    /// Bumped on every external set (setv, setmask, setarray).
    pub(crate) revision: u64,
    /// Quantities this one is computed from.
    pub(crate) parents: Vec<QuantId>,
    /// Quantities computed from this one.
    pub(crate) children: Vec<QuantId>,
}

impl Quant {
    pub(crate) fn new(
        name: &str,
        ncomp: usize,
        kind: QuantKind,
        unit: &str,
        desc: &str,
        size: [usize; 3],
    ) -> Self {
        let (array, m0) = match kind {
            QuantKind::Field => (Some(FieldArray::zeros(ncomp, size)), 1.0),
            QuantKind::Value | QuantKind::Mask => (None, 0.0),
        };
        Self {
            name: name.to_string(),
            kind,
            unit: unit.to_string(),
            desc: desc.to_string(),
            multiplier: vec![m0; ncomp],
            array,
            up_to_date: true,
            has_updater: false,
            verifier: None,
            revision: 0,
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> QuantKind {
        self.kind
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    /// Number of value components (1 = scalar, 3 = vector, ...).
    pub fn ncomp(&self) -> usize {
        self.multiplier.len()
    }

    pub fn multiplier(&self) -> &[f64] {
        &self.multiplier
    }

    pub fn array(&self) -> Option<&FieldArray> {
        self.array.as_ref()
    }

    pub fn is_space_dependent(&self) -> bool {
        self.array.is_some()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_up_to_date(&self) -> bool {
        self.up_to_date
    }

    pub fn parents(&self) -> &[QuantId] {
        &self.parents
    }

    pub fn children(&self) -> &[QuantId] {
        &self.children
    }

    /// "name (unit)" for diagnostics.
    pub fn full_name(&self) -> String {
        if self.unit.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.unit)
        }
    }

    /// Scalar value: first multiplier component. Fails for space-dependent quantities.
    pub fn scalar(&self) -> Result<f64> {
        if self.ncomp() != 1 {
            return Err(EngineError::ComponentMismatch {
                quant: self.name.clone(),
                expected: 1,
                got: self.ncomp(),
            });
        }
        if self.kind == QuantKind::Field {
            return Err(EngineError::wrong_kind(
                &self.name,
                "space-dependent field has no single scalar value",
            ));
        }
        Ok(self.multiplier[0])
    }

    /// Value of component `c` at flat cell index `idx`.
    #[inline]
    pub fn value_at(&self, c: usize, idx: usize) -> f64 {
        match &self.array {
            None => self.multiplier[c],
            Some(a) => {
                let ac = if a.ncomp() == 1 { 0 } else { c };
                self.multiplier[c] * a.get(ac, idx)
            }
        }
    }

    /// Vector value at a cell (components 0..3).
    #[inline]
    pub fn vec3_at(&self, idx: usize) -> [f64; 3] {
        [
            self.value_at(0, idx),
            self.value_at(1, idx),
            self.value_at(2, idx),
        ]
    }

    /// Fully expanded array (multiplier applied) on `size` cells.
    pub fn expanded(&self, size: [usize; 3]) -> FieldArray {
        let mut out = FieldArray::zeros(self.ncomp(), size);
        let n = out.n_cells();
        for c in 0..self.ncomp() {
            for idx in 0..n {
                out.set(c, idx, self.value_at(c, idx));
            }
        }
        out
    }

    pub(crate) fn set_multiplier(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.ncomp() {
            return Err(EngineError::ComponentMismatch {
                quant: self.name.clone(),
                expected: self.ncomp(),
                got: values.len(),
            });
        }
        if let Some(v) = self.verifier {
            v.check(&self.name, values)?;
        }
        self.multiplier.copy_from_slice(values);
        Ok(())
    }

    /// Field array for mutation by updaters.
    pub(crate) fn array_mut(&mut self) -> Result<&mut FieldArray> {
        let name = &self.name;
        self.array
            .as_mut()
            .ok_or_else(|| EngineError::wrong_kind(name, "quantity has no array"))
    }
}

impl fmt::Display for Quant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.ncomp() {
            1 => "scalar".to_string(),
            3 => "vector".to_string(),
            n => format!("{n}-component"),
        };
        write!(f, "{} ({} {})", self.full_name(), what, self.kind)
    }
}
