//! Configuration loading for vinaflow.
//! Reads vinaflow.toml from the current directory or path in VINAFLOW_CONFIG env var.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use vinaflow_common::DockingParams;
use vinaflow_docking::BatchSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Parameter defaults that request overrides are applied to.
    #[serde(default)]
    pub docking: DockingParams,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_path")]
    pub path: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self { path: default_workspace_path() }
    }
}

fn default_workspace_path() -> String { "./workspace".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_obabel_path")]
    pub obabel_path: String,
    #[serde(default = "default_vina_path")]
    pub vina_path: String,
    #[serde(default = "default_converter_timeout")]
    pub converter_timeout_secs: u64,
    #[serde(default = "default_engine_timeout")]
    pub engine_timeout_secs: u64,
    #[serde(default = "default_max_parallel_docks")]
    pub max_parallel_docks: usize,
    #[serde(default = "default_receptor_flags")]
    pub receptor_flags: Vec<String>,
    #[serde(default = "default_ligand_flags")]
    pub ligand_flags: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            obabel_path: default_obabel_path(),
            vina_path: default_vina_path(),
            converter_timeout_secs: default_converter_timeout(),
            engine_timeout_secs: default_engine_timeout(),
            max_parallel_docks: default_max_parallel_docks(),
            receptor_flags: default_receptor_flags(),
            ligand_flags: default_ligand_flags(),
        }
    }
}

fn default_obabel_path()        -> String { "obabel".to_string() }
fn default_vina_path()          -> String { "vina".to_string() }
fn default_converter_timeout()  -> u64    { 300 }
fn default_engine_timeout()     -> u64    { 3600 }
fn default_max_parallel_docks() -> usize  { 4 }
fn default_receptor_flags()     -> Vec<String> { vec!["-xr".to_string()] }
fn default_ligand_flags()       -> Vec<String> { vec!["-h".to_string(), "-xr".to_string()] }

impl ToolsConfig {
    pub fn converter_timeout(&self) -> Duration {
        Duration::from_secs(self.converter_timeout_secs)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }
}

/// Local object store: a directory of structure files plus a manifest
/// mapping `ws/obj/ver` references to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default = "default_store_dir")]
    pub store_dir: String,
    #[serde(default = "default_manifest")]
    pub manifest: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            manifest: default_manifest(),
        }
    }
}

fn default_store_dir() -> String { "./objects".to_string() }
fn default_manifest()  -> String { "objects.toml".to_string() }

impl RepositoryConfig {
    /// Manifest path; relative manifests live inside `store_dir`.
    pub fn manifest_path(&self) -> PathBuf {
        let manifest = Path::new(&self.manifest);
        if manifest.is_absolute() {
            manifest.to_path_buf()
        } else {
            Path::new(&self.store_dir).join(manifest)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_report_prefix")]
    pub name_prefix: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { name_prefix: default_report_prefix() }
    }
}

fn default_report_prefix() -> String { "vinaflow_report".to_string() }


impl Config {
    /// Load configuration from vinaflow.toml.
    /// An explicit path wins, then the VINAFLOW_CONFIG env var, then the current directory.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(
                std::env::var("VINAFLOW_CONFIG").unwrap_or_else(|_| "vinaflow.toml".to_string()),
            ),
        };

        if !path.exists() {
            anyhow::bail!(
                "Config file not found: {}\n\
                 Copy vinaflow.example.toml to vinaflow.toml and edit it.",
                path.display()
            );
        }

        let content = std::fs::read_to_string(&path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.tools.max_parallel_docks == 0 {
            anyhow::bail!("tools.max_parallel_docks must be at least 1");
        }
        if self.tools.engine_timeout_secs == 0 || self.tools.converter_timeout_secs == 0 {
            anyhow::bail!("tool timeouts must be greater than zero");
        }
        self.docking.validate()?;
        Ok(())
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            work_root: PathBuf::from(&self.workspace.path),
            defaults: self.docking.clone(),
            max_parallel_docks: self.tools.max_parallel_docks,
        }
    }
}
