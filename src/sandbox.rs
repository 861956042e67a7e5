mod docker;
mod process;

pub use docker::DockerExecutor;
pub use process::ProcessExecutor;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::config::{BackendKind, SandboxConfig};

/// Structured description of one throwaway execution image: base interpreter
/// layer, injected files, and an entrypoint that pipes the input fixture
/// into the submission via standard input. Rendered by a template function
/// instead of splicing raw identifiers into a build string.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    /// Unique per {topic, task, request}; doubles as the container name
    pub tag: String,
    pub base_image: String,
    pub interpreter: Vec<String>,
    pub submission_path: PathBuf,
    pub submission_name: String,
    pub input_path: PathBuf,
}

const INPUT_NAME: &str = "input.txt";
const SANDBOX_DIR: &str = "/sandbox";

impl BuildSpec {
    pub fn image_tag(topic_id: usize, task_id: usize, token: &str) -> String {
        format!("check_{topic_id}_{task_id}_{token}")
    }

    /// Shell entrypoint executed inside the sandbox.
    pub fn entry_command(&self) -> Vec<String> {
        let interpreter = self.interpreter.join(" ");
        vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("cat {INPUT_NAME} | {interpreter} {}", self.submission_name),
        ]
    }

    pub fn render_dockerfile(&self) -> String {
        // CMD in exec form; serde_json produces the JSON array literal
        let cmd = serde_json::to_string(&self.entry_command()).unwrap_or_default();
        format!(
            "FROM {base}\nCOPY {submission} {INPUT_NAME} {SANDBOX_DIR}/\nWORKDIR {SANDBOX_DIR}\nCMD {cmd}\n",
            base = self.base_image,
            submission = self.submission_name,
        )
    }
}

/// Handle to one built, exclusively owned sandbox image.
#[derive(Debug, Clone)]
pub struct SandboxImage {
    pub tag: String,
    /// Entry argv, for backends that do not bake the command into the image
    pub entry: Vec<String>,
}

/// Captured result of one sandboxed run. A crashing process still yields its
/// output here so the comparator can classify it as WRONG; only a run that
/// obtained no output at all is an executor error.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub duration: Duration,
}

/// Trait for different sandbox execution backends
///
/// Abstracts building a throwaway image for one submission, running it as an
/// isolated resource-capped unit, and deleting it. Backends are chosen by
/// startup configuration, never by code editing.
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Builds a throwaway image for one submission. Failure must not leave a
    /// surviving tag behind.
    async fn build(&self, spec: &BuildSpec) -> Result<SandboxImage>;

    /// Runs the image within the wall-clock budget and captures its output.
    async fn run(&self, image: &SandboxImage) -> Result<RunOutput>;

    /// Deletes the image. Idempotent: removing an already-removed image
    /// succeeds.
    async fn remove(&self, image: &SandboxImage) -> Result<()>;
}

/// Creates the sandbox executor selected by configuration
pub fn create_executor(config: &SandboxConfig) -> Result<Arc<dyn SandboxExecutor>> {
    match config.backend {
        BackendKind::Docker => {
            log::info!("Creating DockerExecutor (container engine backend)");
            Ok(Arc::new(DockerExecutor::connect(config)?))
        }
        BackendKind::Process => {
            log::info!("Creating ProcessExecutor (plain subprocess backend)");
            Ok(Arc::new(ProcessExecutor::new(config)?))
        }
    }
}

/// Scoped acquisition of a sandbox image with guaranteed release.
///
/// Wraps build + run + delete as one unit: `release` removes the image on
/// the normal and failing paths, and dropping an unreleased guard (future
/// cancellation included) spawns the removal instead of leaking the image.
pub struct ImageGuard {
    executor: Arc<dyn SandboxExecutor>,
    image: Option<SandboxImage>,
}

impl ImageGuard {
    pub async fn build(executor: Arc<dyn SandboxExecutor>, spec: &BuildSpec) -> Result<Self> {
        let image = executor.build(spec).await?;
        Ok(Self {
            executor,
            image: Some(image),
        })
    }

    pub fn tag(&self) -> &str {
        self.image.as_ref().map(|i| i.tag.as_str()).unwrap_or("")
    }

    /// Runs the guarded image.
    pub async fn run(&self) -> Result<RunOutput> {
        let Some(image) = self.image.as_ref() else {
            bail!("sandbox image already released");
        };
        self.executor.run(image).await
    }

    /// Removes the image exactly once; removal failures are logged and
    /// swallowed so they cannot mask the run outcome.
    pub async fn release(mut self) {
        if let Some(image) = self.image.take() {
            if let Err(e) = self.executor.remove(&image).await {
                log::error!("Failed to remove sandbox image {}: {e:#}", image.tag);
            }
        }
    }
}

impl Drop for ImageGuard {
    fn drop(&mut self) {
        if let Some(image) = self.image.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let executor = Arc::clone(&self.executor);
                    handle.spawn(async move {
                        if let Err(e) = executor.remove(&image).await {
                            log::error!(
                                "Failed to remove sandbox image {} after cancellation: {e:#}",
                                image.tag
                            );
                        }
                    });
                }
                Err(_) => {
                    log::error!(
                        "Sandbox image {} may be leaked: no runtime available for cleanup",
                        image.tag
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    fn spec() -> BuildSpec {
        BuildSpec {
            tag: BuildSpec::image_tag(0, 1, "deadbeef"),
            base_image: "python:3.9-alpine".to_string(),
            interpreter: vec!["python".to_string(), "-u".to_string()],
            submission_path: PathBuf::from("/tmp/task_0_1_deadbeef.py"),
            submission_name: "task_0_1_deadbeef.py".to_string(),
            input_path: PathBuf::from("/materials/basics/input/task_1.txt"),
        }
    }

    #[test]
    fn image_tags_are_scoped_per_request() {
        assert_eq!(BuildSpec::image_tag(2, 7, "abc123"), "check_2_7_abc123");
    }

    struct StubExecutor {
        removes: AtomicU32,
    }

    #[async_trait]
    impl SandboxExecutor for StubExecutor {
        async fn build(&self, spec: &BuildSpec) -> Result<SandboxImage> {
            Ok(SandboxImage {
                tag: spec.tag.clone(),
                entry: spec.entry_command(),
            })
        }

        async fn run(&self, _image: &SandboxImage) -> Result<RunOutput> {
            Ok(RunOutput {
                stdout: "ok\n".to_string(),
                stderr: String::new(),
                exit_code: Some(0),
                duration: Duration::from_millis(1),
            })
        }

        async fn remove(&self, _image: &SandboxImage) -> Result<()> {
            self.removes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn guard_names_and_releases_its_image_exactly_once() {
        let executor = Arc::new(StubExecutor {
            removes: AtomicU32::new(0),
        });

        let guard = ImageGuard::build(executor.clone(), &spec()).await.unwrap();
        assert_eq!(guard.tag(), "check_0_1_deadbeef");

        let output = guard.run().await.unwrap();
        assert_eq!(output.stdout, "ok\n");

        guard.release().await;
        assert_eq!(executor.removes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dockerfile_pipes_fixture_into_submission() {
        let rendered = spec().render_dockerfile();
        assert_eq!(
            rendered,
            "FROM python:3.9-alpine\n\
             COPY task_0_1_deadbeef.py input.txt /sandbox/\n\
             WORKDIR /sandbox\n\
             CMD [\"/bin/sh\",\"-c\",\"cat input.txt | python -u task_0_1_deadbeef.py\"]\n"
        );
    }
}
