//! Report payload handed to the report renderer, and the sinks that accept it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;
use uuid::Uuid;
use vinaflow_common::{DockingParams, ObjectRef, Result, VinaflowError};

use crate::extract::DockingResult;
use crate::repository::ObjectInfo;

/// Everything a batch produced, in ligand request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportPayload {
    pub batch_id: Uuid,
    pub workspace_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub receptor: ObjectInfo,
    pub ligands: Vec<ObjectInfo>,
    pub params: DockingParams,
    pub results: Vec<DockingResult>,
    /// Strongest predicted binder across `results`.
    pub best: Option<BestLigand>,
    /// Zip bundles of the converted inputs and the engine outputs.
    pub archives: Vec<PathBuf>,
}

impl ReportPayload {
    /// Result keyed by its log file name.
    pub fn result_for_log(&self, log_name: &str) -> Option<&DockingResult> {
        self.results.iter().find(|r| r.log_name == log_name)
    }
}

/// Summary of the best-scoring ligand of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestLigand {
    pub ligand_ref: ObjectRef,
    pub ligand_name: String,
    pub affinity: f64,
    pub log_name: String,
}

impl BestLigand {
    /// Most negative affinity; the earlier result wins a tie.
    pub fn from_results(results: &[DockingResult]) -> Option<Self> {
        results
            .iter()
            .reduce(|best, r| if r.affinity < best.affinity { r } else { best })
            .map(|r| BestLigand {
                ligand_ref: r.ligand_ref,
                ligand_name: r.ligand_name.clone(),
                affinity: r.affinity,
                log_name: r.log_name.clone(),
            })
    }
}

/// What the report renderer hands back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportInfo {
    pub name: String,
    pub reference: String,
}

/// One-way handoff of a finished batch to whatever renders reports.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn emit(&self, payload: &ReportPayload, work_dir: &Path) -> Result<ReportInfo>;
}

/// Optional capability: push docking outputs back to the repository.
#[async_trait]
pub trait OutputUploader: Send + Sync {
    async fn upload(&self, payload: &ReportPayload) -> Result<()>;
}

/// Writes the payload as pretty JSON under `<work>/report/`.
pub struct JsonReportSink {
    prefix: String,
}

impl JsonReportSink {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Default for JsonReportSink {
    fn default() -> Self {
        Self::new("vinaflow_report")
    }
}

#[async_trait]
impl ReportSink for JsonReportSink {
    async fn emit(&self, payload: &ReportPayload, work_dir: &Path) -> Result<ReportInfo> {
        let name = format!("{}_{}", self.prefix, Uuid::new_v4());
        let dir = work_dir.join("report");
        fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{name}.json"));
        let body = serde_json::to_vec_pretty(payload)?;
        fs::write(&path, body)
            .await
            .map_err(|e| VinaflowError::Report(format!("{}: {e}", path.display())))?;

        info!(report = %name, results = payload.results.len(), "Report written to {:?}", path);
        Ok(ReportInfo {
            name,
            reference: path.to_string_lossy().into_owned(),
        })
    }
}
