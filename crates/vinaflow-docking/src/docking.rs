//! Molecular docking using AutoDock Vina.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};
use vinaflow_common::{DockingParams, Result, VinaflowError};

use crate::assets::{pdbqt_basename, LigandAsset, ReceptorAsset};
use crate::process::run_captured;

/// One (receptor, ligand) docking run with its resolved parameters.
#[derive(Debug, Clone)]
pub struct DockingJob {
    pub receptor: Arc<ReceptorAsset>,
    pub ligand: LigandAsset,
    pub params: DockingParams,
    /// Directory the pose and log files are written to.
    pub out_dir: PathBuf,
}

impl DockingJob {
    /// Pose and log paths for this pair, see [`output_paths`].
    pub fn output_paths(&self) -> (PathBuf, PathBuf) {
        output_paths(&self.out_dir, &self.receptor.pdbqt_path, &self.ligand.pdbqt_path)
    }
}

/// Files produced by one engine run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockingOutput {
    pub pose_path: PathBuf,
    pub log_path: PathBuf,
}

/// `r<receptor>-l<ligand>.pdbqt` and `.log` inside `out_dir`.
///
/// Both basenames embed their encoded object references, so distinct pairs
/// never share an output name within one batch.
pub fn output_paths(out_dir: &Path, receptor_pdbqt: &Path, ligand_pdbqt: &Path) -> (PathBuf, PathBuf) {
    let stem = format!(
        "r{}-l{}",
        pdbqt_basename(receptor_pdbqt),
        pdbqt_basename(ligand_pdbqt)
    );
    (
        out_dir.join(format!("{stem}.pdbqt")),
        out_dir.join(format!("{stem}.log")),
    )
}

/// Runs the external docking engine for one job.
#[async_trait]
pub trait DockingEngine: Send + Sync {
    async fn run(&self, job: DockingJob) -> Result<DockingOutput>;
}

/// Wrapper for AutoDock Vina execution.
pub struct VinaRunner {
    executable_path: PathBuf,
    timeout: Duration,
}

impl VinaRunner {
    /// Create a new VinaRunner.
    pub fn new<P: AsRef<Path>>(executable_path: P, timeout: Duration) -> Self {
        Self {
            executable_path: executable_path.as_ref().to_path_buf(),
            timeout,
        }
    }

    /// Command-line arguments for `job`, excluding the executable.
    pub fn build_args(job: &DockingJob) -> Vec<String> {
        let (pose_path, log_path) = job.output_paths();
        let p = &job.params;
        let mut args = Vec::with_capacity(28);
        let mut flag = |name: &str, value: String| {
            args.push(format!("--{name}"));
            args.push(value);
        };
        flag("receptor", job.receptor.pdbqt_path.to_string_lossy().into_owned());
        flag("ligand", job.ligand.pdbqt_path.to_string_lossy().into_owned());
        flag("center_x", p.center_x.to_string());
        flag("center_y", p.center_y.to_string());
        flag("center_z", p.center_z.to_string());
        flag("size_x", p.size_x.to_string());
        flag("size_y", p.size_y.to_string());
        flag("size_z", p.size_z.to_string());
        flag("seed", p.seed.to_string());
        flag("exhaustiveness", p.exhaustiveness.to_string());
        flag("num_modes", p.num_modes.to_string());
        flag("energy_range", p.energy_range.to_string());
        flag("out", pose_path.to_string_lossy().into_owned());
        flag("log", log_path.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl DockingEngine for VinaRunner {
    /// Run AutoDock Vina with the given job.
    async fn run(&self, job: DockingJob) -> Result<DockingOutput> {
        info!(ligand = %job.ligand.upa, "Running AutoDock Vina on {:?}", job.ligand.pdbqt_path);

        fs::create_dir_all(&job.out_dir).await?;
        let (pose_path, log_path) = job.output_paths();

        let mut cmd = Command::new(&self.executable_path);
        cmd.args(Self::build_args(&job));

        run_captured(cmd, "vina", self.timeout).await.map_err(|msg| {
            VinaflowError::EngineInvocation(format!("ligand {}: {msg}", job.ligand.upa))
        })?;

        for path in [&pose_path, &log_path] {
            if !fs::try_exists(path).await.unwrap_or(false) {
                return Err(VinaflowError::EngineInvocation(format!(
                    "ligand {}: vina produced no {}",
                    job.ligand.upa,
                    path.display()
                )));
            }
        }

        debug!("AutoDock Vina completed successfully. Output in {:?}", pose_path);
        Ok(DockingOutput { pose_path, log_path })
    }
}
