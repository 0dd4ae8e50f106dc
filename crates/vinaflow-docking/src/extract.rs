//! Parsing of Vina logs into affinities, and correlation of outputs back to
//! the repository objects they came from.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};
use vinaflow_common::{ObjectRef, Result, VinaflowError};

use crate::docking::DockingOutput;

/// Zero-based line of the first-ranked mode in a Vina log.
///
/// The log layout is treated as an ABI of the engine: the banner, run notes
/// and table header always precede the result table, and the row for mode 1
/// is the 27th line. Any engine upgrade must be revalidated against this.
pub const AFFINITY_LINE_INDEX: usize = 26;

const TABLE_SEPARATOR_PREFIX: &str = "-----+";

fn numeric_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?").unwrap())
}

/// A finished (receptor, ligand) pair with its best predicted affinity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockingResult {
    pub receptor_ref: ObjectRef,
    pub ligand_ref: ObjectRef,
    pub ligand_name: String,
    /// kcal/mol; more negative means stronger predicted binding.
    pub affinity: f64,
    pub pose_path: PathBuf,
    pub log_path: PathBuf,
    /// File name of the log; the key results are reported under.
    pub log_name: String,
}

/// Best (mode 1) affinity from the text of a Vina log.
///
/// Reads the line at [`AFFINITY_LINE_INDEX`] and returns its second numeric
/// token; the columns are mode rank, affinity, rmsd l.b., rmsd u.b.
pub fn extract_affinity(log_text: &str) -> Result<f64> {
    if log_text.trim().is_empty() {
        return Err(VinaflowError::LogFormat("docking log is empty".into()));
    }

    let mut lines = log_text.lines().skip(AFFINITY_LINE_INDEX - 1);
    let header = lines.next();
    let line = lines.next().ok_or_else(|| {
        VinaflowError::LogFormat(format!(
            "docking log has no result line {}",
            AFFINITY_LINE_INDEX + 1
        ))
    })?;

    if !header.is_some_and(|h| h.starts_with(TABLE_SEPARATOR_PREFIX)) {
        warn!(
            line = AFFINITY_LINE_INDEX + 1,
            "Vina log layout differs from the expected table position; affinity may be wrong"
        );
    }

    let tokens: Vec<&str> = numeric_token_regex()
        .find_iter(line)
        .map(|m| m.as_str())
        .collect();
    let affinity = tokens.get(1).ok_or_else(|| {
        VinaflowError::LogFormat(format!(
            "result line {:?} has {} numeric field(s), expected at least 2",
            line.trim(),
            tokens.len()
        ))
    })?;

    affinity
        .parse::<f64>()
        .map_err(|e| VinaflowError::LogFormat(format!("affinity {affinity:?}: {e}")))
}

/// Receptor and ligand references embedded in the log file name.
pub fn correlate(pose_path: &Path, log_path: &Path) -> Result<(ObjectRef, ObjectRef)> {
    let log_name = log_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let refs = ObjectRef::decode_all(&log_name)?;
    match refs.as_slice() {
        [receptor, ligand, ..] => {
            debug!(pose = ?pose_path, %receptor, %ligand, "Correlated docking output");
            Ok((*receptor, *ligand))
        }
        _ => Err(VinaflowError::MalformedIdentifier(format!(
            "{log_name:?} does not embed both receptor and ligand references"
        ))),
    }
}

/// Read the log of `output` and build its [`DockingResult`].
pub async fn extract_result(output: &DockingOutput, ligand_name: &str) -> Result<DockingResult> {
    let text = fs::read_to_string(&output.log_path).await?;
    let affinity = extract_affinity(&text).map_err(|e| match e {
        VinaflowError::LogFormat(msg) => {
            VinaflowError::LogFormat(format!("{}: {msg}", output.log_path.display()))
        }
        other => other,
    })?;
    let (receptor_ref, ligand_ref) = correlate(&output.pose_path, &output.log_path)?;

    Ok(DockingResult {
        receptor_ref,
        ligand_ref,
        ligand_name: ligand_name.to_string(),
        affinity,
        pose_path: output.pose_path.clone(),
        log_path: output.log_path.clone(),
        log_name: output
            .log_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    })
}
