//! Batch orchestration against in-memory repository, converter and engine.
//!
//! The fakes write real files with the same names the production adapters
//! use, so extraction, correlation and archiving all run for real.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use vinaflow_common::{DockingParams, ObjectRef, ParamOverrides, Result, VinaflowError};
use vinaflow_docking::convert::{ligand_pdbqt_path, receptor_pdbqt_path, StructureConverter};
use vinaflow_docking::docking::{DockingEngine, DockingJob, DockingOutput};
use vinaflow_docking::pipeline::{ReceptorSpec, OUTPUT_DIR};
use vinaflow_docking::report::{JsonReportSink, ReportInfo, ReportPayload, ReportSink};
use vinaflow_docking::repository::{ObjectInfo, ObjectRepository};
use vinaflow_docking::{
    BatchOrchestrator, BatchProgress, BatchRequest, BatchSettings, BatchStage, Capabilities,
};

const VINA_LOG: &str = include_str!("fixtures/vina.log");

fn upa(s: &str) -> ObjectRef {
    s.parse().unwrap()
}

// ── Fakes ─────────────────────────────────────────────────────────────────────

struct FakeRepository {
    objects: HashMap<ObjectRef, ObjectInfo>,
    info_calls: AtomicUsize,
    export_calls: AtomicUsize,
}

impl FakeRepository {
    fn new(receptor: &str, ligands: &[&str]) -> Self {
        let mut objects = HashMap::new();
        objects.insert(
            upa(receptor),
            ObjectInfo {
                upa: upa(receptor),
                name: "6wzu.pdb".into(),
                object_type: "KBaseStructure.ModelProteinStructure".into(),
            },
        );
        for (i, l) in ligands.iter().enumerate() {
            objects.insert(
                upa(l),
                ObjectInfo {
                    upa: upa(l),
                    name: format!("Structure2D_CID_{}.sdf", 49846579 + i),
                    object_type: "KBaseCompounds.CompoundSet".into(),
                },
            );
        }
        Self {
            objects,
            info_calls: AtomicUsize::new(0),
            export_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ObjectRepository for FakeRepository {
    async fn get_object_info(&self, refs: &[ObjectRef]) -> Result<Vec<ObjectInfo>> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        Ok(refs.iter().filter_map(|r| self.objects.get(r).cloned()).collect())
    }

    async fn export_to_file(&self, upa: &ObjectRef, dest_dir: &Path, file_stem: &str) -> Result<PathBuf> {
        self.export_calls.fetch_add(1, Ordering::SeqCst);
        let info = self
            .objects
            .get(upa)
            .ok_or_else(|| VinaflowError::Repository(format!("unknown object {upa}")))?;
        let ext = if info.object_type.contains("Structure") { "pdb" } else { "sdf" };
        let path = dest_dir.join(format!("{file_stem}.{ext}"));
        tokio::fs::write(&path, format!("structure {upa}\n")).await?;
        Ok(path)
    }
}

#[derive(Default)]
struct FakeConverter {
    calls: AtomicUsize,
    /// Remaining failures per input file name fragment.
    failures: Mutex<HashMap<String, usize>>,
}

impl FakeConverter {
    fn failing(fragment: &str, times: usize) -> Self {
        let conv = Self::default();
        conv.failures.lock().unwrap().insert(fragment.to_string(), times);
        conv
    }

    fn should_fail(&self, path: &Path) -> bool {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let mut failures = self.failures.lock().unwrap();
        for (fragment, remaining) in failures.iter_mut() {
            if name.contains(fragment.as_str()) && *remaining > 0 {
                *remaining -= 1;
                return true;
            }
        }
        false
    }

    async fn write(&self, path: &Path, out: PathBuf) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail(path) {
            return Err(VinaflowError::Conversion(format!("{}: obabel exited with exit status: 1", path.display())));
        }
        tokio::fs::write(&out, "ATOM      1  C   LIG     1       0.000   0.000   0.000\n").await?;
        Ok(out)
    }
}

#[async_trait]
impl StructureConverter for FakeConverter {
    async fn convert_receptor(&self, path: &Path) -> Result<PathBuf> {
        self.write(path, receptor_pdbqt_path(path)).await
    }

    async fn convert_ligand(&self, path: &Path) -> Result<PathBuf> {
        self.write(path, ligand_pdbqt_path(path)).await
    }
}

enum Outcome {
    Affinity(f64),
    Crash,
    EmptyLog,
}

struct FakeEngine {
    outcomes: HashMap<ObjectRef, Outcome>,
    calls: AtomicUsize,
    seen_params: Mutex<Vec<DockingParams>>,
}

impl FakeEngine {
    fn new(outcomes: Vec<(&str, Outcome)>) -> Self {
        Self {
            outcomes: outcomes.into_iter().map(|(r, o)| (upa(r), o)).collect(),
            calls: AtomicUsize::new(0),
            seen_params: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DockingEngine for FakeEngine {
    async fn run(&self, job: DockingJob) -> Result<DockingOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_params.lock().unwrap().push(job.params.clone());

        // Earlier ligands finish later, so completion order is the reverse of request order.
        tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(job.ligand.index as u64 * 15))).await;

        let (pose_path, log_path) = job.output_paths();
        let log = match self.outcomes.get(&job.ligand.upa) {
            Some(Outcome::Affinity(a)) => VINA_LOG.replacen("-8.1", &format!("{a:.1}"), 1),
            Some(Outcome::EmptyLog) => String::new(),
            Some(Outcome::Crash) | None => {
                return Err(VinaflowError::EngineInvocation(format!(
                    "ligand {}: vina exited with exit status: 139: Segmentation fault",
                    job.ligand.upa
                )))
            }
        };
        tokio::fs::write(&pose_path, "MODEL 1\nENDMDL\n").await?;
        tokio::fs::write(&log_path, log).await?;
        Ok(DockingOutput { pose_path, log_path })
    }
}

/// JSON sink that also counts emissions.
struct RecordingSink {
    inner: JsonReportSink,
    emitted: AtomicUsize,
}

#[async_trait]
impl ReportSink for RecordingSink {
    async fn emit(&self, payload: &ReportPayload, work_dir: &Path) -> Result<ReportInfo> {
        self.emitted.fetch_add(1, Ordering::SeqCst);
        self.inner.emit(payload, work_dir).await
    }
}

struct Harness {
    repository: Arc<FakeRepository>,
    converter: Arc<FakeConverter>,
    engine: Arc<FakeEngine>,
    sink: Arc<RecordingSink>,
    work_root: tempfile::TempDir,
}

impl Harness {
    fn new(repository: FakeRepository, converter: FakeConverter, engine: FakeEngine) -> Self {
        Self {
            repository: Arc::new(repository),
            converter: Arc::new(converter),
            engine: Arc::new(engine),
            sink: Arc::new(RecordingSink {
                inner: JsonReportSink::new("ADVinaApp"),
                emitted: AtomicUsize::new(0),
            }),
            work_root: tempfile::tempdir().unwrap(),
        }
    }

    fn orchestrator(&self) -> BatchOrchestrator {
        self.orchestrator_with_workers(2)
    }

    fn orchestrator_with_workers(&self, max_parallel_docks: usize) -> BatchOrchestrator {
        let caps = Capabilities {
            repository: self.repository.clone(),
            converter: self.converter.clone(),
            engine: self.engine.clone(),
            report: self.sink.clone(),
            uploader: None,
        };
        let settings = BatchSettings {
            work_root: self.work_root.path().to_path_buf(),
            defaults: DockingParams::default(),
            max_parallel_docks,
        };
        BatchOrchestrator::new(caps, settings)
    }
}

fn standard_harness() -> Harness {
    Harness::new(
        FakeRepository::new("67060/5/2", &["67060/2/1", "67060/4/1"]),
        FakeConverter::default(),
        FakeEngine::new(vec![
            ("67060/2/1", Outcome::Affinity(-8.1)),
            ("67060/4/1", Outcome::Affinity(-7.9)),
        ]),
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_end_to_end_two_ligands() {
    let h = standard_harness();
    let mut orch = h.orchestrator();
    let request = BatchRequest::new(upa("67060/5/2"), vec![upa("67060/2/1"), upa("67060/4/1")]);

    let outcome = orch.run_batch(request).await.unwrap();
    let payload = &outcome.payload;

    assert_eq!(orch.stage(), &BatchStage::Done);
    assert_eq!(payload.results.len(), 2);
    assert_eq!(payload.receptor.upa, upa("67060/5/2"));
    assert_eq!(payload.receptor.name, "6wzu.pdb");

    let expected = [("67060/2/1", -8.1), ("67060/4/1", -7.9)];
    for (result, (ligand, affinity)) in payload.results.iter().zip(expected) {
        assert_eq!(result.receptor_ref, upa("67060/5/2"));
        assert_eq!(result.ligand_ref, upa(ligand));
        assert!(result.affinity < 0.0);
        assert_eq!(result.affinity, affinity);
        for path in [&result.pose_path, &result.log_path] {
            assert!(path.is_absolute());
            assert!(path.exists());
            assert_eq!(path.parent().unwrap().file_name().unwrap(), OUTPUT_DIR);
        }
        assert!(payload.result_for_log(&result.log_name).is_some());
    }
    let best = payload.best.as_ref().unwrap();
    assert_eq!(best.ligand_ref, upa("67060/2/1"));
    assert_eq!(best.affinity, -8.1);
    assert!(payload.result_for_log(&best.log_name).is_some());

    // the best ligand is part of the written report
    let written: ReportPayload =
        serde_json::from_str(&std::fs::read_to_string(&outcome.report.reference).unwrap()).unwrap();
    assert_eq!(written.best, payload.best);

    // one bulk metadata call, one export per object
    assert_eq!(h.repository.info_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.repository.export_calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.converter.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.engine.calls.load(Ordering::SeqCst), 2);

    // archives and report
    assert_eq!(payload.archives.len(), 2);
    for archive in &payload.archives {
        assert!(archive.exists(), "{archive:?}");
    }
    assert!(outcome.report.name.starts_with("ADVinaApp_"));
    assert!(Path::new(&outcome.report.reference).exists());
    assert_eq!(h.sink.emitted.load(Ordering::SeqCst), 1);
    assert!(outcome.work_dir.starts_with(h.work_root.path().canonicalize().unwrap()));
}

#[tokio::test]
async fn test_results_follow_request_order_across_runs() {
    let h = standard_harness();
    let ligands = vec![upa("67060/4/1"), upa("67060/2/1")];

    let first = h
        .orchestrator()
        .run_batch(BatchRequest::new(upa("67060/5/2"), ligands.clone()))
        .await
        .unwrap();
    let second = h
        .orchestrator()
        .run_batch(BatchRequest::new(upa("67060/5/2"), ligands.clone()))
        .await
        .unwrap();

    let order = |o: &vinaflow_docking::BatchOutcome| -> Vec<(ObjectRef, String)> {
        o.payload.results.iter().map(|r| (r.ligand_ref, r.log_name.clone())).collect()
    };
    assert_eq!(order(&first), order(&second));
    assert_eq!(first.payload.results[0].ligand_ref, ligands[0]);
    assert_eq!(first.payload.results[1].ligand_ref, ligands[1]);
    // separate batches never share a working directory
    assert_ne!(first.work_dir, second.work_dir);
}

#[tokio::test]
async fn test_multiple_receptors_rejected_before_any_work() {
    let h = standard_harness();
    let mut orch = h.orchestrator();
    let mut request = BatchRequest::new(upa("67060/5/2"), vec![upa("67060/2/1")]);
    request.receptor_ref = ReceptorSpec::Many(vec![upa("67060/5/2"), upa("67060/6/1")]);

    let err = orch.run_batch(request).await.unwrap_err();
    assert!(matches!(err.source, VinaflowError::MultipleReceptor(2)));
    assert_eq!(err.stage, BatchStage::Init);
    assert!(matches!(orch.stage(), BatchStage::Failed(_)));

    assert_eq!(h.repository.info_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.repository.export_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.converter.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.engine.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.sink.emitted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_second_of_three_docking_failures_aborts_batch() {
    let ligands = ["67060/2/1", "67060/4/1", "67060/7/1"];
    let h = Harness::new(
        FakeRepository::new("67060/5/2", &ligands),
        FakeConverter::default(),
        FakeEngine::new(vec![
            ("67060/2/1", Outcome::Affinity(-8.1)),
            ("67060/4/1", Outcome::Crash),
            ("67060/7/1", Outcome::Affinity(-6.5)),
        ]),
    );
    let mut orch = h.orchestrator();
    let request = BatchRequest::new(upa("67060/5/2"), ligands.iter().map(|l| upa(l)).collect());

    let err = orch.run_batch(request).await.unwrap_err();
    assert_eq!(err.stage, BatchStage::Docking);
    assert_eq!(err.object, Some(upa("67060/4/1")));
    assert!(matches!(err.source, VinaflowError::EngineInvocation(_)));
    assert!(err.to_string().contains("Segmentation fault"));

    // the in-flight first ligand finished, the queued third never started
    assert_eq!(h.engine.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.sink.emitted.load(Ordering::SeqCst), 0);
    assert!(matches!(orch.stage(), BatchStage::Failed(_)));
}

#[tokio::test]
async fn test_no_docking_starts_after_failure_with_one_worker() {
    let ligands = ["67060/2/1", "67060/4/1", "67060/7/1", "67060/8/1"];
    let h = Harness::new(
        FakeRepository::new("67060/5/2", &ligands),
        FakeConverter::default(),
        FakeEngine::new(vec![
            ("67060/2/1", Outcome::Crash),
            ("67060/4/1", Outcome::Affinity(-8.1)),
            ("67060/7/1", Outcome::Affinity(-7.9)),
            ("67060/8/1", Outcome::Affinity(-6.5)),
        ]),
    );
    let mut orch = h.orchestrator_with_workers(1);
    let request = BatchRequest::new(upa("67060/5/2"), ligands.iter().map(|l| upa(l)).collect());

    let err = orch.run_batch(request).await.unwrap_err();
    assert_eq!(err.stage, BatchStage::Docking);
    assert_eq!(err.object, Some(upa("67060/2/1")));
    assert!(err.to_string().contains("Segmentation fault"), "{err}");
    assert_eq!(h.engine.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.sink.emitted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_conversion_retried_once() {
    let h = Harness::new(
        FakeRepository::new("67060/5/2", &["67060/2/1"]),
        FakeConverter::failing("_w67060o2v1_", 1),
        FakeEngine::new(vec![("67060/2/1", Outcome::Affinity(-8.1))]),
    );
    let outcome = h
        .orchestrator()
        .run_batch(BatchRequest::new(upa("67060/5/2"), vec![upa("67060/2/1")]))
        .await
        .unwrap();
    assert_eq!(outcome.payload.results.len(), 1);
    // receptor once, ligand twice
    assert_eq!(h.converter.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_conversion_failing_twice_is_fatal() {
    let h = Harness::new(
        FakeRepository::new("67060/5/2", &["67060/2/1"]),
        FakeConverter::failing("_w67060o2v1_", 2),
        FakeEngine::new(vec![("67060/2/1", Outcome::Affinity(-8.1))]),
    );
    let err = h
        .orchestrator()
        .run_batch(BatchRequest::new(upa("67060/5/2"), vec![upa("67060/2/1")]))
        .await
        .unwrap_err();
    assert_eq!(err.stage, BatchStage::Converting);
    assert_eq!(err.object, Some(upa("67060/2/1")));
    assert!(matches!(err.source, VinaflowError::Conversion(_)));
    assert_eq!(h.engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_log_is_log_format_error() {
    let h = Harness::new(
        FakeRepository::new("67060/5/2", &["67060/2/1", "67060/4/1"]),
        FakeConverter::default(),
        FakeEngine::new(vec![
            ("67060/2/1", Outcome::Affinity(-8.1)),
            ("67060/4/1", Outcome::EmptyLog),
        ]),
    );
    let err = h
        .orchestrator()
        .run_batch(BatchRequest::new(upa("67060/5/2"), vec![upa("67060/2/1"), upa("67060/4/1")]))
        .await
        .unwrap_err();
    assert_eq!(err.stage, BatchStage::Extracting);
    assert_eq!(err.object, Some(upa("67060/4/1")));
    assert!(matches!(err.source, VinaflowError::LogFormat(_)));
    assert_eq!(h.sink.emitted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_duplicate_ligands_rejected() {
    let h = standard_harness();
    let err = h
        .orchestrator()
        .run_batch(BatchRequest::new(upa("67060/5/2"), vec![upa("67060/2/1"), upa("67060/2/1")]))
        .await
        .unwrap_err();
    assert_eq!(err.stage, BatchStage::Init);
    assert!(matches!(err.source, VinaflowError::Config(_)));
    assert_eq!(h.repository.info_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_overrides_reach_engine() {
    let h = standard_harness();
    let overrides = ParamOverrides {
        center_x: Some(1.25),
        seed: Some(42),
        ..Default::default()
    };
    let request = BatchRequest::new(upa("67060/5/2"), vec![upa("67060/2/1")]).with_params(overrides);
    let outcome = h.orchestrator().run_batch(request).await.unwrap();

    let seen = h.engine.seen_params.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].center_x, 1.25);
    assert_eq!(seen[0].seed, 42);
    assert_eq!(seen[0].center_y, 78.0);
    assert_eq!(seen[0].exhaustiveness, 2);
    assert_eq!(outcome.payload.params, seen[0]);
}

#[tokio::test]
async fn test_progress_events_in_stage_order() {
    let h = standard_harness();
    let (tx, mut rx) = broadcast::channel::<BatchProgress>(32);
    let mut orch = h.orchestrator().with_progress(tx);
    orch.run_batch(BatchRequest::new(upa("67060/5/2"), vec![upa("67060/2/1")]))
        .await
        .unwrap();

    let mut stages = Vec::new();
    while let Ok(event) = rx.try_recv() {
        stages.push(event.stage);
    }
    assert_eq!(
        stages,
        vec![
            BatchStage::Downloading,
            BatchStage::Converting,
            BatchStage::Docking,
            BatchStage::Extracting,
            BatchStage::Aggregating,
            BatchStage::Done,
        ]
    );
}
