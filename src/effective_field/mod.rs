// src/effective_field/mod.rs
//
// Effective-field contributions, all in A/m. Each function overwrites its output
// array; the `hfield` sum adds them up.

pub mod anisotropy;
pub mod demag;
pub mod exchange;
pub mod newell;

pub use anisotropy::uniaxial_anisotropy_field;
pub use demag::DemagField;
pub use exchange::exchange_field;
