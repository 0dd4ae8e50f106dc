//! Local copies of the receptor and ligands taking part in a batch.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vinaflow_common::upa::{sanitize_name, ObjectRef};

/// The receptor structure, downloaded and converted once per batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceptorAsset {
    pub upa: ObjectRef,
    pub name: String,
    /// Structure file as exported from the repository.
    pub source_path: PathBuf,
    /// Converted PDBQT the engine reads.
    pub pdbqt_path: PathBuf,
}

/// One candidate ligand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LigandAsset {
    pub upa: ObjectRef,
    pub name: String,
    /// Position in the batch request; results are reported in this order.
    pub index: usize,
    pub source_path: PathBuf,
    pub pdbqt_path: PathBuf,
}

/// File stem for a downloaded object: encoded reference followed by its name.
///
/// `file_stem_for(67060/5/2, "6wzu.pdb")` is `_w67060o5v2_6wzu`.
pub fn file_stem_for(upa: &ObjectRef, display_name: &str) -> String {
    let name = Path::new(display_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}{}", upa.encode(), sanitize_name(&name))
}

/// The basename used in docking output names: the converted file without `.pdbqt`.
pub fn pdbqt_basename(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
