//! Batch orchestrator.
//!
//! Runs one receptor against a list of ligands:
//!   1. Validate the request (exactly one receptor, unique ligands, parameters)
//!   2. Bulk-fetch object metadata into the batch cache
//!   3. Download the receptor and every ligand
//!   4. Convert everything to PDBQT (one retry per conversion)
//!   5. Dock every ligand, bounded by `max_parallel_docks`
//!   6. Extract affinities and correlate outputs to their objects
//!   7. Archive inputs/outputs, assemble the payload, emit the report
//!
//! Any failure ends the batch: no payload and no report are produced.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use vinaflow_common::{DockingParams, ObjectRef, ParamOverrides, VinaflowError};

use crate::archive::archive_dir;
use crate::assets::{file_stem_for, LigandAsset, ReceptorAsset};
use crate::cache::MetadataCache;
use crate::convert::StructureConverter;
use crate::docking::{DockingEngine, DockingJob, DockingOutput};
use crate::extract::{extract_result, DockingResult};
use crate::report::{BestLigand, OutputUploader, ReportInfo, ReportPayload, ReportSink};
use crate::repository::{ObjectInfo, ObjectRepository};

pub const RECEPTOR_DIR: &str = "receptor";
pub const LIGANDS_DIR: &str = "ligands_input";
pub const OUTPUT_DIR: &str = "vina_output";

// ── Request ───────────────────────────────────────────────────────────────────

/// `receptor_ref` as sent by callers: a single reference or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReceptorSpec {
    One(ObjectRef),
    Many(Vec<ObjectRef>),
}

impl ReceptorSpec {
    pub fn refs(&self) -> Vec<ObjectRef> {
        match self {
            ReceptorSpec::One(r) => vec![*r],
            ReceptorSpec::Many(rs) => rs.clone(),
        }
    }
}

/// One docking batch request.
///
/// Deserializes the flat parameter layout callers already use:
/// `{"receptor_ref": "67060/5/2", "ligand_refs": [...], "seed": 0, ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub workspace_name: Option<String>,
    pub receptor_ref: ReceptorSpec,
    pub ligand_refs: Vec<ObjectRef>,
    #[serde(flatten)]
    pub params: ParamOverrides,
}

impl BatchRequest {
    pub fn new(receptor: ObjectRef, ligands: Vec<ObjectRef>) -> Self {
        Self {
            workspace_name: None,
            receptor_ref: ReceptorSpec::One(receptor),
            ligand_refs: ligands,
            params: ParamOverrides::default(),
        }
    }

    pub fn with_params(mut self, params: ParamOverrides) -> Self {
        self.params = params;
        self
    }
}

// ── State machine ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStage {
    Init,
    Downloading,
    Converting,
    Docking,
    Extracting,
    Aggregating,
    Done,
    /// Terminal; carries the failure description.
    Failed(String),
}

impl fmt::Display for BatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStage::Init => f.write_str("init"),
            BatchStage::Downloading => f.write_str("downloading"),
            BatchStage::Converting => f.write_str("converting"),
            BatchStage::Docking => f.write_str("docking"),
            BatchStage::Extracting => f.write_str("extracting"),
            BatchStage::Aggregating => f.write_str("aggregating"),
            BatchStage::Done => f.write_str("done"),
            BatchStage::Failed(_) => f.write_str("failed"),
        }
    }
}

/// Progress event emitted on stage transitions (cloneable for broadcast).
#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub batch_id: Uuid,
    pub stage: BatchStage,
    pub message: String,
}

/// A failed batch: the stage it stopped in, the object involved, and why.
#[derive(Debug)]
pub struct BatchError {
    pub stage: BatchStage,
    pub object: Option<ObjectRef>,
    pub source: VinaflowError,
}

impl BatchError {
    fn new(stage: BatchStage, object: Option<ObjectRef>, source: VinaflowError) -> Self {
        Self { stage, object, source }
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch failed while {}", self.stage)?;
        if let Some(object) = &self.object {
            write!(f, " (object {object})")?;
        }
        write!(f, ": {}", self.source)
    }
}

impl std::error::Error for BatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

/// The external capabilities a batch depends on, each behind its own trait.
#[derive(Clone)]
pub struct Capabilities {
    pub repository: Arc<dyn ObjectRepository>,
    pub converter: Arc<dyn StructureConverter>,
    pub engine: Arc<dyn DockingEngine>,
    pub report: Arc<dyn ReportSink>,
    pub uploader: Option<Arc<dyn OutputUploader>>,
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Each batch gets its own `batch_<uuid>` directory under this root.
    pub work_root: PathBuf,
    /// Base parameters that request overrides are applied to.
    pub defaults: DockingParams,
    pub max_parallel_docks: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("./workspace"),
            defaults: DockingParams::default(),
            max_parallel_docks: 4,
        }
    }
}

/// A successful batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub payload: ReportPayload,
    pub report: ReportInfo,
    pub work_dir: PathBuf,
}

type StageResult<T> = std::result::Result<T, BatchError>;

/// Where one ligand's docking run ended up.
enum DockSlot {
    Pending,
    /// Never started because a sibling had already failed.
    Skipped,
    Finished(vinaflow_common::Result<DockingOutput>),
}

pub struct BatchOrchestrator {
    caps: Capabilities,
    settings: BatchSettings,
    cache: MetadataCache,
    stage: BatchStage,
    batch_id: Uuid,
    progress_tx: Option<broadcast::Sender<BatchProgress>>,
}

impl BatchOrchestrator {
    pub fn new(caps: Capabilities, settings: BatchSettings) -> Self {
        Self {
            caps,
            settings,
            cache: MetadataCache::new(),
            stage: BatchStage::Init,
            batch_id: Uuid::nil(),
            progress_tx: None,
        }
    }

    /// Send stage transitions to `tx`.
    pub fn with_progress(mut self, tx: broadcast::Sender<BatchProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn stage(&self) -> &BatchStage {
        &self.stage
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    fn advance(&mut self, next: BatchStage, message: &str) {
        debug!(batch_id = %self.batch_id, from = %self.stage, to = %next, "Batch stage transition");
        self.stage = next.clone();
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(BatchProgress {
                batch_id: self.batch_id,
                stage: next,
                message: message.to_string(),
            });
        }
    }

    fn fail(&self, object: Option<ObjectRef>, source: VinaflowError) -> BatchError {
        BatchError::new(self.stage.clone(), object, source)
    }

    /// Run one batch to completion. Either every ligand is docked and a
    /// report is emitted, or the batch fails and nothing is reported.
    #[instrument(skip(self, request), fields(ligands = request.ligand_refs.len()))]
    pub async fn run_batch(&mut self, request: BatchRequest) -> StageResult<BatchOutcome> {
        self.batch_id = Uuid::new_v4();
        self.cache.clear();
        self.stage = BatchStage::Init;
        info!(batch_id = %self.batch_id, "Starting docking batch");

        match self.execute(&request).await {
            Ok(outcome) => {
                self.advance(BatchStage::Done, &format!("report {}", outcome.report.name));
                info!(
                    batch_id = %self.batch_id,
                    results = outcome.payload.results.len(),
                    "Docking batch complete"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(batch_id = %self.batch_id, stage = %e.stage, object = ?e.object, "Docking batch failed: {}", e.source);
                self.advance(BatchStage::Failed(e.to_string()), &e.to_string());
                Err(e)
            }
        }
    }

    async fn execute(&mut self, request: &BatchRequest) -> StageResult<BatchOutcome> {
        let started_at = Utc::now();

        // ── 1. Validate before any I/O ────────────────────────────────────────
        let (receptor_ref, params) = self.validate(request)?;
        let work_dir = self.prepare_work_dir().await?;

        // ── 2–3. Metadata + downloads ─────────────────────────────────────────
        self.advance(BatchStage::Downloading, "fetching metadata and inputs");
        let mut all_refs = vec![receptor_ref];
        all_refs.extend(request.ligand_refs.iter().copied());
        let infos = self
            .caps
            .repository
            .get_object_info(&all_refs)
            .await
            .map_err(|e| self.fail(None, e))?;
        self.cache.populate(&all_refs, infos).map_err(|e| self.fail(None, e))?;

        let receptor_source = self.download(&receptor_ref, &work_dir.join(RECEPTOR_DIR)).await?;
        let mut ligand_sources = Vec::with_capacity(request.ligand_refs.len());
        for upa in &request.ligand_refs {
            ligand_sources.push(self.download(upa, &work_dir.join(LIGANDS_DIR)).await?);
        }

        // ── 4. Conversion ─────────────────────────────────────────────────────
        self.advance(BatchStage::Converting, "converting inputs to PDBQT");
        let receptor_pdbqt = self.convert(&receptor_ref, &receptor_source, true).await?;
        let receptor = Arc::new(ReceptorAsset {
            upa: receptor_ref,
            name: self.cache.name_of(&receptor_ref),
            source_path: receptor_source,
            pdbqt_path: receptor_pdbqt,
        });

        let mut ligands = Vec::with_capacity(ligand_sources.len());
        for (index, (upa, source)) in request.ligand_refs.iter().zip(ligand_sources).enumerate() {
            let pdbqt_path = self.convert(upa, &source, false).await?;
            ligands.push(LigandAsset {
                upa: *upa,
                name: self.cache.name_of(upa),
                index,
                source_path: source,
                pdbqt_path,
            });
        }

        // ── 5. Docking ────────────────────────────────────────────────────────
        self.advance(
            BatchStage::Docking,
            &format!("docking {} ligand(s) against {}", ligands.len(), receptor.upa),
        );
        let outputs = self.dock_all(&receptor, &ligands, &params, &work_dir.join(OUTPUT_DIR)).await?;

        // ── 6. Extraction ─────────────────────────────────────────────────────
        self.advance(BatchStage::Extracting, "parsing docking logs");
        let mut results = Vec::with_capacity(outputs.len());
        for (ligand, output) in ligands.iter().zip(&outputs) {
            results.push(self.extract(&receptor, ligand, output).await?);
        }

        // ── 7. Aggregation ────────────────────────────────────────────────────
        self.advance(BatchStage::Aggregating, "archiving and reporting");
        self.aggregate(request, &receptor, &ligands, params, results, &work_dir, started_at)
            .await
    }

    fn validate(&self, request: &BatchRequest) -> StageResult<(ObjectRef, DockingParams)> {
        let receptors = request.receptor_ref.refs();
        let receptor = match receptors.as_slice() {
            [one] => *one,
            [] => {
                return Err(self.fail(None, VinaflowError::Config("no receptor reference given".into())))
            }
            many => return Err(self.fail(None, VinaflowError::MultipleReceptor(many.len()))),
        };

        if request.ligand_refs.is_empty() {
            return Err(self.fail(None, VinaflowError::Config("no ligand references given".into())));
        }
        let mut seen = HashSet::new();
        for upa in &request.ligand_refs {
            if !seen.insert(*upa) {
                return Err(self.fail(
                    Some(*upa),
                    VinaflowError::Config(format!("ligand {upa} is listed more than once")),
                ));
            }
        }

        let params = self
            .settings
            .defaults
            .resolve(&request.params)
            .map_err(|e| self.fail(None, e))?;
        Ok((receptor, params))
    }

    async fn prepare_work_dir(&self) -> StageResult<PathBuf> {
        let dir = self.settings.work_root.join(format!("batch_{}", self.batch_id));
        let dir = create_layout(&dir).await.map_err(|e| self.fail(None, e.into()))?;
        debug!(batch_id = %self.batch_id, "Working directory {:?}", dir);
        Ok(dir)
    }

    async fn download(&self, upa: &ObjectRef, dest: &Path) -> StageResult<PathBuf> {
        let stem = file_stem_for(upa, &self.cache.name_of(upa));
        let path = self
            .caps
            .repository
            .export_to_file(upa, dest, &stem)
            .await
            .map_err(|e| self.fail(Some(*upa), e))?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(self.fail(
                Some(*upa),
                VinaflowError::Repository(format!("export of {upa} did not produce {}", path.display())),
            ));
        }
        debug!(%upa, "Downloaded to {:?}", path);
        Ok(path)
    }

    async fn convert_once(&self, source: &Path, receptor: bool) -> vinaflow_common::Result<PathBuf> {
        if receptor {
            self.caps.converter.convert_receptor(source).await
        } else {
            self.caps.converter.convert_ligand(source).await
        }
    }

    async fn convert(&self, upa: &ObjectRef, source: &Path, receptor: bool) -> StageResult<PathBuf> {
        let result = match self.convert_once(source, receptor).await {
            Err(e) if e.is_retriable() => {
                warn!(%upa, "Conversion failed, retrying once: {}", e);
                self.convert_once(source, receptor).await
            }
            other => other,
        };
        let path = result.map_err(|e| self.fail(Some(*upa), e))?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(self.fail(
                Some(*upa),
                VinaflowError::Conversion(format!("converter reported {} but it does not exist", path.display())),
            ));
        }
        Ok(path)
    }

    /// Dock every ligand, at most `max_parallel_docks` at a time.
    ///
    /// After the first failure no further engine run is started; runs already
    /// in flight are awaited so their output is not torn down mid-write. The
    /// first failure in request order is reported.
    async fn dock_all(
        &self,
        receptor: &Arc<ReceptorAsset>,
        ligands: &[LigandAsset],
        params: &DockingParams,
        out_dir: &Path,
    ) -> StageResult<Vec<DockingOutput>> {
        let permits = Arc::new(Semaphore::new(self.settings.max_parallel_docks.max(1)));
        let aborted = Arc::new(AtomicBool::new(false));
        let mut set = JoinSet::new();

        for ligand in ligands {
            let job = DockingJob {
                receptor: Arc::clone(receptor),
                ligand: ligand.clone(),
                params: params.clone(),
                out_dir: out_dir.to_path_buf(),
            };
            let engine = Arc::clone(&self.caps.engine);
            let permits = Arc::clone(&permits);
            let aborted = Arc::clone(&aborted);
            set.spawn(async move {
                let index = job.ligand.index;
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        let err = VinaflowError::EngineInvocation(format!("worker pool closed: {e}"));
                        return (index, DockSlot::Finished(Err(err)));
                    }
                };
                if aborted.load(Ordering::SeqCst) {
                    return (index, DockSlot::Skipped);
                }
                let result = engine.run(job).await;
                // Set while the permit is still held, so a waiting job sees it.
                if result.is_err() {
                    aborted.store(true, Ordering::SeqCst);
                }
                (index, DockSlot::Finished(result))
            });
        }

        let mut slots: Vec<DockSlot> = (0..ligands.len()).map(|_| DockSlot::Pending).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, slot)) => {
                    match &slot {
                        DockSlot::Finished(Err(e)) => {
                            warn!(ligand = %ligands[index].upa, "Docking failed: {}", e)
                        }
                        DockSlot::Skipped => {
                            debug!(ligand = %ligands[index].upa, "Docking skipped after sibling failure")
                        }
                        _ => {}
                    }
                    slots[index] = slot;
                }
                Err(e) => warn!("Docking worker aborted: {}", e),
            }
        }

        // A real failure outranks a skip, even one earlier in request order.
        if let Some(index) = slots
            .iter()
            .position(|s| matches!(s, DockSlot::Finished(Err(_))))
        {
            let slot = std::mem::replace(&mut slots[index], DockSlot::Pending);
            if let DockSlot::Finished(Err(e)) = slot {
                return Err(self.fail(Some(ligands[index].upa), e));
            }
        }

        let mut outputs = Vec::with_capacity(ligands.len());
        for (ligand, slot) in ligands.iter().zip(slots) {
            match slot {
                DockSlot::Finished(Ok(output)) => outputs.push(output),
                DockSlot::Skipped => {
                    return Err(self.fail(
                        Some(ligand.upa),
                        VinaflowError::EngineInvocation("skipped after sibling failure".into()),
                    ))
                }
                _ => {
                    return Err(self.fail(
                        Some(ligand.upa),
                        VinaflowError::EngineInvocation("docking worker did not complete".into()),
                    ))
                }
            }
        }
        Ok(outputs)
    }

    async fn extract(
        &self,
        receptor: &ReceptorAsset,
        ligand: &LigandAsset,
        output: &DockingOutput,
    ) -> StageResult<DockingResult> {
        let result = extract_result(output, &ligand.name)
            .await
            .map_err(|e| self.fail(Some(ligand.upa), e))?;

        if result.receptor_ref != receptor.upa || result.ligand_ref != ligand.upa {
            return Err(self.fail(
                Some(ligand.upa),
                VinaflowError::MalformedIdentifier(format!(
                    "{} resolves to {} / {}, expected {} / {}",
                    result.log_name, result.receptor_ref, result.ligand_ref, receptor.upa, ligand.upa
                )),
            ));
        }
        debug!(ligand = %ligand.upa, affinity = result.affinity, "Extracted affinity");
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn aggregate(
        &self,
        request: &BatchRequest,
        receptor: &ReceptorAsset,
        ligands: &[LigandAsset],
        params: DockingParams,
        results: Vec<DockingResult>,
        work_dir: &Path,
        started_at: DateTime<Utc>,
    ) -> StageResult<BatchOutcome> {
        let mut archives = Vec::with_capacity(2);
        for sub in [LIGANDS_DIR, OUTPUT_DIR] {
            archives.push(archive_dir(&work_dir.join(sub)).await.map_err(|e| self.fail(None, e))?);
        }

        let info_for = |upa: &ObjectRef| -> ObjectInfo {
            self.cache.get(upa).cloned().unwrap_or_else(|| ObjectInfo {
                upa: *upa,
                name: upa.to_string(),
                object_type: String::new(),
            })
        };

        let payload = ReportPayload {
            batch_id: self.batch_id,
            workspace_name: request.workspace_name.clone(),
            started_at,
            finished_at: Utc::now(),
            receptor: info_for(&receptor.upa),
            ligands: ligands.iter().map(|l| info_for(&l.upa)).collect(),
            params,
            best: BestLigand::from_results(&results),
            results,
            archives,
        };

        if let Some(uploader) = &self.caps.uploader {
            uploader.upload(&payload).await.map_err(|e| self.fail(None, e))?;
        }

        let report = self
            .caps
            .report
            .emit(&payload, work_dir)
            .await
            .map_err(|e| self.fail(None, e))?;

        Ok(BatchOutcome {
            payload,
            report,
            work_dir: work_dir.to_path_buf(),
        })
    }
}

/// Create the per-batch directory tree and return its absolute path.
async fn create_layout(dir: &Path) -> std::io::Result<PathBuf> {
    for sub in [RECEPTOR_DIR, LIGANDS_DIR, OUTPUT_DIR] {
        fs::create_dir_all(dir.join(sub)).await?;
    }
    fs::canonicalize(dir).await
}
