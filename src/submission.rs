//! Materializes raw submitted bytes into a uniquely named scratch file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

const DEFAULT_EXTENSION: &str = "py";

pub struct Materializer {
    scratch_dir: PathBuf,
}

impl Materializer {
    /// Uses the configured scratch directory, falling back to a per-user
    /// cache location. The directory itself is created lazily on the first
    /// materialized submission.
    pub fn new(scratch_dir: Option<PathBuf>) -> Result<Self> {
        use directories::ProjectDirs;

        let scratch_dir = match scratch_dir {
            Some(dir) => dir,
            None => ProjectDirs::from("", "", "gradebox")
                .ok_or_else(|| anyhow!("Unable to find user directory"))?
                .cache_dir()
                .join("scratch"),
        };

        Ok(Self { scratch_dir })
    }

    /// Writes the submission to `task_{topic}_{task}_{token}.{ext}` in the
    /// scratch directory. IO failure here is an infrastructure error, never a
    /// grading outcome.
    pub fn materialize(
        &self,
        topic_id: usize,
        task_id: usize,
        code: &[u8],
        extension: &str,
        token: &str,
    ) -> std::io::Result<Artifact> {
        fs::create_dir_all(&self.scratch_dir)?;

        let file_name = format!("task_{topic_id}_{task_id}_{token}.{extension}");
        let path = self.scratch_dir.join(&file_name);
        fs::write(&path, code)?;
        log::debug!("Submission materialized at {}", path.display());

        Ok(Artifact {
            path,
            file_name,
            removed: false,
        })
    }
}

/// Scratch file holding one submission for the duration of a check request.
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
    file_name: String,
    removed: bool,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Explicit removal on the normal path; failures are logged, never
    /// blamed on the submitter.
    pub fn remove(mut self) {
        self.remove_inner();
    }

    fn remove_inner(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::error!("Failed to remove scratch file {}: {e}", self.path.display());
            }
        }
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        self.remove_inner();
    }
}

/// Keeps user-supplied extensions to plain alphanumerics before they reach
/// any scratch path.
pub fn sanitize_extension(extension: Option<&str>) -> String {
    let cleaned: String = extension
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();

    if cleaned.is_empty() {
        DEFAULT_EXTENSION.to_string()
    } else {
        cleaned
    }
}
