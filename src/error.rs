//! Error types for the engine, its modules and the scripting front-end.

use thiserror::Error;

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while configuring or running a simulation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A quantity name was not found.
    #[error("unknown quantity: {0}")]
    UnknownQuant(String),

    /// A quantity with this name already exists.
    #[error("quantity already defined: {0}")]
    DuplicateQuant(String),

    /// A module name is not registered.
    #[error("unknown module: {0}")]
    UnknownModule(String),

    /// Grid size or cell size has not been set yet.
    #[error("grid size and cell size must be set first")]
    GridNotSet,

    /// Grid geometry may only be set once.
    #[error("{0} already set")]
    GridAlreadySet(&'static str),

    /// Adding an edge would create a dependency cycle.
    #[error("cyclic dependency: {child} <- {parent}")]
    CyclicDependency { child: String, parent: String },

    /// Number of components does not match the quantity.
    #[error("{quant}: expected {expected} components, got {got}")]
    ComponentMismatch {
        quant: String,
        expected: usize,
        got: usize,
    },

    /// Operation does not apply to this kind of quantity.
    #[error("{quant}: {reason}")]
    WrongKind { quant: String, reason: String },

    /// A value failed a quantity verifier or a sanity check.
    #[error("invalid value for {quant}: {reason}")]
    InvalidValue { quant: String, reason: String },

    /// A script/API argument was malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No solver module has been loaded.
    #[error("no solver loaded (load e.g. 'solver/rk12')")]
    NoSolver,

    /// A second solver module was loaded.
    #[error("a solver is already loaded")]
    SolverAlreadySet,

    /// An implicit solver failed to converge.
    #[error("solver diverged: {0}")]
    SolverDiverged(String),

    /// Output format not supported.
    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    /// File could not be parsed.
    #[error("malformed input file: {0}")]
    Parse(String),

    /// External process (interpreter, graphviz) failed.
    #[error("subprocess failed: {0}")]
    Subprocess(String),

    /// Plot backend failure.
    #[error("plot failed: {0}")]
    Plot(String),

    /// I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialisation failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Create an invalid argument error.
    #[must_use]
    pub fn invalid_argument(details: impl Into<String>) -> Self {
        Self::InvalidArgument(details.into())
    }

    /// Create an invalid value error for a quantity.
    #[must_use]
    pub fn invalid_value(quant: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            quant: quant.into(),
            reason: reason.into(),
        }
    }

    /// Create a wrong-kind error for a quantity.
    #[must_use]
    pub fn wrong_kind(quant: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WrongKind {
            quant: quant.into(),
            reason: reason.into(),
        }
    }
}
