//! Remote object repository boundary.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vinaflow_common::{ObjectRef, Result};

/// Metadata about one repository object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub upa: ObjectRef,
    /// Display name, e.g. `6wzu.pdb`.
    pub name: String,
    /// Repository type string, e.g. `KBaseStructure.ModelProteinStructure`.
    pub object_type: String,
}

/// Where receptors and ligands come from.
#[async_trait]
pub trait ObjectRepository: Send + Sync {
    /// Metadata for every reference in one round trip.
    async fn get_object_info(&self, refs: &[ObjectRef]) -> Result<Vec<ObjectInfo>>;

    /// Export one object to `dest_dir/<file_stem>.<ext>`, returning the written path.
    /// The repository picks the extension (`pdb` for structures, `sdf` for compounds).
    async fn export_to_file(&self, upa: &ObjectRef, dest_dir: &Path, file_stem: &str) -> Result<PathBuf>;
}
