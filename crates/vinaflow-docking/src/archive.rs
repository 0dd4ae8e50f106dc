//! Zip bundles of batch inputs and outputs.
//!
//! Every path is explicit; archiving never changes the process working
//! directory, so concurrent batches can archive side by side.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use vinaflow_common::{Result, VinaflowError};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> io::Result<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((rel, path));
        }
    }
    Ok(())
}

fn write_zip(dir: &Path, zip_path: &Path) -> Result<usize> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;

    let mut zip = ZipWriter::new(File::create(zip_path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, path) in &files {
        zip.start_file(name.as_str(), options)
            .map_err(|e| VinaflowError::Archive(format!("{}: {e}", zip_path.display())))?;
        io::copy(&mut File::open(path)?, &mut zip)?;
    }
    zip.finish()
        .map_err(|e| VinaflowError::Archive(format!("{}: {e}", zip_path.display())))?;
    Ok(files.len())
}

/// Zip the contents of `dir` into `<dir>.zip` next to it; returns the archive path.
pub async fn archive_dir(dir: &Path) -> Result<PathBuf> {
    let dir = dir.to_path_buf();
    let mut zip_name = dir.file_name().unwrap_or_default().to_os_string();
    zip_name.push(".zip");
    let zip_path = dir.with_file_name(zip_name);

    let target = zip_path.clone();
    let count = tokio::task::spawn_blocking(move || write_zip(&dir, &target))
        .await
        .map_err(|e| VinaflowError::Archive(format!("archive task failed: {e}")))??;

    debug!(files = count, "Archived {:?}", zip_path);
    Ok(zip_path)
}
