//! Temporary files owned by a single request
//!
//! Every file a request creates in the shared downloads directory starts with
//! the request's prefix. [`TempArtifact`] deletes one file when dropped;
//! [`PrefixSweep`] deletes everything under a prefix.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Suffixes of files the downloader is still writing or has abandoned
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp"];

/// A file deleted when this value goes away
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    armed: bool,
}

impl TempArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now
    ///
    /// A file that is already gone counts as released.
    pub async fn release(mut self) -> std::io::Result<()> {
        self.armed = false;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed temporary file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed temporary file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove temporary file"
            ),
        }
    }
}

/// Deletes every file under a prefix, except one kept path
///
/// [`finish`](Self::finish) sweeps on the blocking pool; dropping an
/// unfinished sweep (error or cancellation) sweeps in place.
pub struct PrefixSweep {
    dir: PathBuf,
    prefix: String,
    keep: Option<PathBuf>,
    armed: bool,
}

impl PrefixSweep {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            keep: None,
            armed: true,
        }
    }

    /// Leave `path` in place; its owner is responsible for it
    pub fn keep(&mut self, path: impl Into<PathBuf>) {
        self.keep = Some(path.into());
    }

    pub async fn finish(mut self) {
        self.armed = false;
        let dir = std::mem::take(&mut self.dir);
        let prefix = std::mem::take(&mut self.prefix);
        let keep = self.keep.take();

        let swept = tokio::task::spawn_blocking(move || {
            let result = purge_prefix(&dir, &prefix, keep.as_deref());
            (prefix, result)
        })
        .await;
        match swept {
            Ok((prefix, result)) => log_sweep(&prefix, result),
            Err(e) => warn!(error = %e, "Sweep task failed"),
        }
    }
}

impl Drop for PrefixSweep {
    fn drop(&mut self) {
        if self.armed {
            log_sweep(
                &self.prefix,
                purge_prefix(&self.dir, &self.prefix, self.keep.as_deref()),
            );
        }
    }
}

fn log_sweep(prefix: &str, result: std::io::Result<usize>) {
    match result {
        Ok(0) => {}
        Ok(removed) => debug!(prefix, removed, "Swept leftover files"),
        Err(e) => warn!(prefix, error = %e, "Failed to sweep leftover files"),
    }
}

pub fn is_partial(name: &str) -> bool {
    PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s)) || name.contains(".part-Frag")
}

/// First complete file in `dir` whose name starts with `prefix`
///
/// Names are compared in sorted order so the result does not depend on
/// directory iteration order.
pub fn find_by_prefix(dir: &Path, prefix: &str) -> std::io::Result<Option<PathBuf>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(prefix) && !is_partial(name))
        .collect();
    names.sort();
    Ok(names.into_iter().next().map(|name| dir.join(name)))
}

/// Delete every file in `dir` starting with `prefix`, except `keep`
pub fn purge_prefix(dir: &Path, prefix: &str, keep: Option<&Path>) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let matches = entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with(prefix))
            .unwrap_or(false);
        if !matches || keep == Some(path.as_path()) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}

/// Caption derived from an artifact name: prefix and extension stripped
pub fn caption_from_artifact(path: &Path, prefix: &str) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let title = stem.strip_prefix(prefix).unwrap_or(stem).replace('_', " ");
    let title = title.trim();
    if title.is_empty() {
        "Video".to_string()
    } else {
        title.to_string()
    }
}
