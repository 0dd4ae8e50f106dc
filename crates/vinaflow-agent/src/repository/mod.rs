//! Filesystem-backed object repository.
//!
//! Objects live as plain structure files in a store directory. A TOML
//! manifest assigns each one its `ws/obj/ver` reference:
//!
//! ```toml
//! [[objects]]
//! ref = "67060/5/2"
//! name = "6wzu.pdb"
//! type = "KBaseStructure.ModelProteinStructure"
//! file = "6wzu.pdb"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;
use tracing::debug;
use vinaflow_common::{ObjectRef, Result, VinaflowError};
use vinaflow_docking::repository::{ObjectInfo, ObjectRepository};

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    objects: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestEntry {
    #[serde(rename = "ref")]
    upa: ObjectRef,
    name: String,
    #[serde(rename = "type", default)]
    object_type: String,
    /// Relative to the store directory.
    file: PathBuf,
}

#[derive(Debug)]
pub struct LocalRepository {
    store_dir: PathBuf,
    entries: HashMap<ObjectRef, ManifestEntry>,
}

impl LocalRepository {
    /// Read the manifest and index it by reference.
    pub fn open<P: AsRef<Path>, M: AsRef<Path>>(store_dir: P, manifest_path: M) -> anyhow::Result<Self> {
        let manifest_path = manifest_path.as_ref();
        let content = std::fs::read_to_string(manifest_path).map_err(|e| {
            anyhow::anyhow!("cannot read object manifest {}: {e}", manifest_path.display())
        })?;
        let store_dir = store_dir.as_ref();
        let store_dir = store_dir.canonicalize().unwrap_or_else(|_| store_dir.to_path_buf());
        Self::from_manifest(store_dir, &content)
    }

    fn from_manifest<P: AsRef<Path>>(store_dir: P, content: &str) -> anyhow::Result<Self> {
        let manifest: Manifest = toml::from_str(content)?;
        let mut entries = HashMap::with_capacity(manifest.objects.len());
        for entry in manifest.objects {
            if let Some(prev) = entries.insert(entry.upa, entry) {
                anyhow::bail!("object {} appears more than once in the manifest", prev.upa);
            }
        }
        Ok(Self {
            store_dir: store_dir.as_ref().to_path_buf(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn entry(&self, upa: &ObjectRef) -> Result<&ManifestEntry> {
        self.entries
            .get(upa)
            .ok_or_else(|| VinaflowError::Repository(format!("object {upa} not found in local store")))
    }
}

/// Extension for an exported copy: the stored file's own, else by object type.
fn export_extension(entry: &ManifestEntry) -> String {
    match entry.file.extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None if entry.object_type.contains("Structure") => "pdb".to_string(),
        None => "sdf".to_string(),
    }
}

#[async_trait]
impl ObjectRepository for LocalRepository {
    async fn get_object_info(&self, refs: &[ObjectRef]) -> Result<Vec<ObjectInfo>> {
        refs.iter()
            .map(|upa| {
                self.entry(upa).map(|e| ObjectInfo {
                    upa: e.upa,
                    name: e.name.clone(),
                    object_type: e.object_type.clone(),
                })
            })
            .collect()
    }

    async fn export_to_file(&self, upa: &ObjectRef, dest_dir: &Path, file_stem: &str) -> Result<PathBuf> {
        let entry = self.entry(upa)?;
        let source = self.store_dir.join(&entry.file);
        let dest = dest_dir.join(format!("{file_stem}.{}", export_extension(entry)));

        fs::create_dir_all(dest_dir).await?;
        fs::copy(&source, &dest).await.map_err(|e| {
            VinaflowError::Repository(format!("export of {upa} from {} failed: {e}", source.display()))
        })?;
        debug!(%upa, "Exported {:?} -> {:?}", source, dest);
        Ok(dest)
    }
}
