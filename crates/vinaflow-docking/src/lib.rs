//! vinaflow-docking - Batch docking of ligands against one receptor.
//!
//! This crate drives the whole batch:
//! 1. Fetching receptor and ligand objects from the repository
//! 2. Converting them to PDBQT (Open Babel)
//! 3. Molecular docking (AutoDock Vina), one run per ligand
//! 4. Parsing affinities out of the Vina logs
//! 5. Archiving inputs/outputs and handing the report payload off

pub mod archive;
pub mod assets;
pub mod cache;
pub mod convert;
pub mod docking;
pub mod extract;
pub mod pipeline;
pub mod process;
pub mod report;
pub mod repository;

pub use pipeline::{
    BatchError, BatchOrchestrator, BatchOutcome, BatchProgress, BatchRequest, BatchSettings,
    BatchStage, Capabilities,
};
