//! Receptor and ligand preparation using Open Babel.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};
use vinaflow_common::{Result, VinaflowError};

use crate::process::run_captured;

/// Turns downloaded structures into the PDBQT files the docking engine reads.
#[async_trait]
pub trait StructureConverter: Send + Sync {
    /// Convert a receptor structure (`X.pdb` → `X.pdbqt`), keeping only atom and terminator records.
    async fn convert_receptor(&self, path: &Path) -> Result<PathBuf>;

    /// Convert a ligand file (`Y.sdf` → `Y.sdf.pdbqt`).
    async fn convert_ligand(&self, path: &Path) -> Result<PathBuf>;
}

/// Receptor output path: the input's extension replaced with `pdbqt`.
pub fn receptor_pdbqt_path(path: &Path) -> PathBuf {
    path.with_extension("pdbqt")
}

/// Ligand output path: `.pdbqt` appended to the full input name.
pub fn ligand_pdbqt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".pdbqt");
    path.with_file_name(name)
}

/// Keep only `ATOM` and `TER` records; Vina rejects the REMARK/ROOT/TORSDOF
/// lines Open Babel writes for a rigid receptor.
pub fn filter_receptor_records(pdbqt: &str) -> String {
    let mut kept = String::with_capacity(pdbqt.len());
    for line in pdbqt.lines() {
        if line.starts_with("ATOM") || line.starts_with("TER") {
            kept.push_str(line);
            kept.push('\n');
        }
    }
    kept
}

/// Wrapper for `obabel` execution.
pub struct ObabelConverter {
    executable_path: PathBuf,
    receptor_flags: Vec<String>,
    ligand_flags: Vec<String>,
    timeout: Duration,
}

impl ObabelConverter {
    /// Create a new ObabelConverter with the default flags.
    pub fn new<P: AsRef<Path>>(executable_path: P, timeout: Duration) -> Self {
        Self {
            executable_path: executable_path.as_ref().to_path_buf(),
            receptor_flags: vec!["-xr".to_string()],
            ligand_flags: vec!["-h".to_string(), "-xr".to_string()],
            timeout,
        }
    }

    pub fn with_receptor_flags(mut self, flags: Vec<String>) -> Self {
        self.receptor_flags = flags;
        self
    }

    pub fn with_ligand_flags(mut self, flags: Vec<String>) -> Self {
        self.ligand_flags = flags;
        self
    }

    async fn run(&self, input: &Path, output: &Path, flags: &[String]) -> Result<()> {
        let mut cmd = Command::new(&self.executable_path);
        cmd.arg(input).args(flags).arg("-O").arg(output);

        run_captured(cmd, "obabel", self.timeout)
            .await
            .map_err(|msg| VinaflowError::Conversion(format!("{}: {msg}", input.display())))?;

        // obabel exits 0 even when it converted nothing.
        if !fs::try_exists(output).await.unwrap_or(false) {
            return Err(VinaflowError::Conversion(format!(
                "{}: obabel produced no output file {}",
                input.display(),
                output.display()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StructureConverter for ObabelConverter {
    async fn convert_receptor(&self, path: &Path) -> Result<PathBuf> {
        info!("Converting receptor {:?} to PDBQT", path);
        let out = receptor_pdbqt_path(path);
        self.run(path, &out, &self.receptor_flags).await?;

        let raw = fs::read_to_string(&out).await?;
        let filtered = filter_receptor_records(&raw);
        if filtered.is_empty() {
            return Err(VinaflowError::Conversion(format!(
                "{}: converted receptor contains no ATOM records",
                path.display()
            )));
        }
        fs::write(&out, filtered).await?;

        debug!("Receptor converted to {:?}", out);
        Ok(out)
    }

    async fn convert_ligand(&self, path: &Path) -> Result<PathBuf> {
        info!("Converting ligand {:?} to PDBQT", path);
        let out = ligand_pdbqt_path(path);
        self.run(path, &out, &self.ligand_flags).await?;

        // "0 molecules converted" still exits 0 and may leave an empty file.
        if fs::metadata(&out).await?.len() == 0 {
            return Err(VinaflowError::Conversion(format!(
                "{}: converted ligand is empty",
                path.display()
            )));
        }
        debug!("Ligand converted to {:?}", out);
        Ok(out)
    }
}
