//! Plain-subprocess backend.
//!
//! The "image" is a staged scratch directory holding the submission and the
//! input fixture; the run executes the same shell entrypoint a container
//! would, in that directory. Only the wall-clock budget is enforced. Intended
//! for development and test environments without a container engine.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;

use super::{BuildSpec, RunOutput, SandboxExecutor, SandboxImage};
use crate::config::SandboxConfig;

pub struct ProcessExecutor {
    work_root: PathBuf,
    run_timeout: Duration,
}

impl ProcessExecutor {
    pub fn new(config: &SandboxConfig) -> Result<Self> {
        let work_root = std::env::temp_dir().join("gradebox-process");
        std::fs::create_dir_all(&work_root)?;

        log::warn!(
            "ProcessExecutor provides NO security isolation - use only in trusted environments"
        );

        Ok(Self {
            work_root,
            run_timeout: Duration::from_millis(config.run_timeout_ms),
        })
    }

    fn staged_dir(&self, tag: &str) -> PathBuf {
        self.work_root.join(tag)
    }
}

#[async_trait]
impl SandboxExecutor for ProcessExecutor {
    async fn build(&self, spec: &BuildSpec) -> Result<SandboxImage> {
        let dir = self.staged_dir(&spec.tag);
        tokio::fs::create_dir_all(&dir).await?;

        let staged = async {
            tokio::fs::copy(&spec.submission_path, dir.join(&spec.submission_name))
                .await
                .context("Failed to stage materialized submission")?;
            tokio::fs::copy(&spec.input_path, dir.join(super::INPUT_NAME))
                .await
                .context("Failed to stage input fixture")?;
            Ok::<_, anyhow::Error>(())
        }
        .await;

        if let Err(e) = staged {
            // A failed build must not leave the staged directory behind
            let _ = tokio::fs::remove_dir_all(&dir).await;
            return Err(e);
        }

        Ok(SandboxImage {
            tag: spec.tag.clone(),
            entry: spec.entry_command(),
        })
    }

    async fn run(&self, image: &SandboxImage) -> Result<RunOutput> {
        if image.entry.is_empty() {
            bail!("empty sandbox entry command");
        }

        let dir = self.staged_dir(&image.tag);
        let mut cmd = tokio::process::Command::new(&image.entry[0]);
        cmd.args(&image.entry[1..])
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let output = match tokio::time::timeout(self.run_timeout, cmd.output()).await {
            Ok(result) => result.context("Failed to spawn sandbox process")?,
            Err(_) => bail!(
                "execution exceeded the {}ms wall-clock budget",
                self.run_timeout.as_millis()
            ),
        };

        // Non-zero exits still return their output for grading
        Ok(RunOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().map(i64::from),
            duration: start.elapsed(),
        })
    }

    async fn remove(&self, image: &SandboxImage) -> Result<()> {
        match tokio::fs::remove_dir_all(self.staged_dir(&image.tag)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn config(run_timeout_ms: u64) -> SandboxConfig {
        SandboxConfig {
            run_timeout_ms,
            ..Default::default()
        }
    }

    fn stage_sources(script: &str, input: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir()
            .join("gradebox-process-test")
            .join(crate::unique_token());
        std::fs::create_dir_all(&dir).unwrap();
        let submission = dir.join("submission.sh");
        let fixture = dir.join("fixture.txt");
        std::fs::write(&submission, script).unwrap();
        std::fs::write(&fixture, input).unwrap();
        (submission, fixture)
    }

    fn spec(submission: PathBuf, fixture: PathBuf) -> BuildSpec {
        BuildSpec {
            tag: BuildSpec::image_tag(0, 1, &crate::unique_token()),
            base_image: "unused".to_string(),
            interpreter: vec!["/bin/sh".to_string()],
            submission_name: "submission.sh".to_string(),
            submission_path: submission,
            input_path: fixture,
        }
    }

    #[tokio::test]
    async fn pipes_fixture_into_submission_stdin() {
        let executor = ProcessExecutor::new(&config(5000)).unwrap();
        let (submission, fixture) =
            stage_sources("read line\necho \"$line\"\n", "Hello, World!\n");
        let spec = spec(submission, fixture);

        let image = executor.build(&spec).await.unwrap();
        let output = executor.run(&image).await.unwrap();

        assert_eq!(output.stdout, "Hello, World!\n");
        assert_eq!(output.exit_code, Some(0));

        executor.remove(&image).await.unwrap();
        assert!(!executor.staged_dir(&image.tag).exists());
        // Removal is idempotent
        executor.remove(&image).await.unwrap();
    }

    #[tokio::test]
    async fn crashing_submission_still_returns_output() {
        let executor = ProcessExecutor::new(&config(5000)).unwrap();
        let (submission, fixture) = stage_sources("echo \"Fail!\"\nexit 3\n", "ignored\n");
        let spec = spec(submission, fixture);

        let image = executor.build(&spec).await.unwrap();
        let output = executor.run(&image).await.unwrap();
        executor.remove(&image).await.unwrap();

        assert_eq!(output.stdout, "Fail!\n");
        assert_eq!(output.exit_code, Some(3));
    }

    #[tokio::test]
    async fn stuck_submission_hits_wall_clock_budget() {
        let executor = ProcessExecutor::new(&config(50)).unwrap();
        let (submission, fixture) = stage_sources("sleep 5\n", "ignored\n");
        let spec = spec(submission, fixture);

        let image = executor.build(&spec).await.unwrap();
        let result = executor.run(&image).await;
        executor.remove(&image).await.unwrap();

        assert!(result.is_err());
    }
}
