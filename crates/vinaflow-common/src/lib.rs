//! vinaflow-common - Shared types, errors, and identifiers used across all vinaflow crates.

pub mod error;
pub mod params;
pub mod upa;

// Re-export commonly used types
pub use error::{Result, VinaflowError};
pub use params::{DockingParams, ParamOverrides};
pub use upa::ObjectRef;
