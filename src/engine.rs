//! Runs one check request end to end: task lookup, admission, submission
//! materialization, sandbox build + run, comparison, and guaranteed cleanup.
//!
//! Each request is an independent future; isolation between concurrent
//! checks comes from per-request unique tokens and image tags, not locking.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::admission::AdmissionController;
use crate::compare::{Verdict, compare};
use crate::config::Config;
use crate::error::CheckError;
use crate::sandbox::{BuildSpec, ImageGuard, RunOutput, SandboxExecutor, create_executor};
use crate::store::TaskStore;
use crate::submission::{Materializer, sanitize_extension};

/// One user's request to grade one submission, as handed over by the web
/// layer.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub topic_id: usize,
    pub task_id: usize,
    pub code: Vec<u8>,
    pub extension: Option<String>,
    pub caller: String,
}

pub struct CheckEngine {
    store: Arc<TaskStore>,
    executor: Arc<dyn SandboxExecutor>,
    admission: AdmissionController,
    materializer: Materializer,
    base_image: String,
    interpreter: Vec<String>,
}

impl CheckEngine {
    /// Constructs the engine at startup, connecting the configured execution
    /// backend once and passing the handle down to every check.
    pub fn new(config: &Config) -> Result<Self> {
        let executor = create_executor(&config.sandbox)?;
        Self::with_executor(config, executor)
    }

    /// Assembles the engine around an injected executor.
    pub fn with_executor(config: &Config, executor: Arc<dyn SandboxExecutor>) -> Result<Self> {
        let store = Arc::new(TaskStore::open(&config.store.materials_dir)?);
        let materializer = Materializer::new(config.store.scratch_dir.clone())?;
        let admission = AdmissionController::new(
            config.admission.max_checks,
            Duration::from_secs(config.admission.window_secs),
        );

        Ok(Self {
            store,
            executor,
            admission,
            materializer,
            base_image: config.sandbox.base_image.clone(),
            interpreter: config.sandbox.interpreter.clone(),
        })
    }

    /// The store is shared with the task-management flows outside this core.
    pub fn store(&self) -> Arc<TaskStore> {
        Arc::clone(&self.store)
    }

    pub async fn check(&self, request: CheckRequest) -> Result<Verdict, CheckError> {
        // Fail-fast phase: nothing has been allocated yet
        let task = self.store.read_task(request.topic_id, request.task_id)?;
        self.admission.try_admit(&request.caller)?;

        let token = crate::unique_token();
        let extension = sanitize_extension(request.extension.as_deref());
        let artifact = self.materializer.materialize(
            request.topic_id,
            request.task_id,
            &request.code,
            &extension,
            &token,
        )?;
        let input_path = self
            .store
            .input_fixture_path(request.topic_id, request.task_id)?;

        let spec = BuildSpec {
            tag: BuildSpec::image_tag(request.topic_id, request.task_id, &token),
            base_image: self.base_image.clone(),
            interpreter: self.interpreter.clone(),
            submission_name: artifact.file_name().to_string(),
            submission_path: artifact.path().to_path_buf(),
            input_path,
        };

        log::info!("Check {token}: building sandbox image {}", spec.tag);
        let outcome = self.build_and_run(&spec).await;
        artifact.remove();
        let output = outcome?;

        log::info!(
            "Check {token}: run finished in {:?} (exit code {:?})",
            output.duration,
            output.exit_code
        );
        if !output.stderr.is_empty() {
            log::debug!("Check {token}: stderr: {}", output.stderr.trim_end());
        }

        let expected = task.expected_output.join("\n");
        Ok(compare(&expected, &output.stdout))
    }

    /// Build, run, and delete as one scoped unit: the image acquired here is
    /// removed on run success, run failure, and cancellation alike.
    async fn build_and_run(&self, spec: &BuildSpec) -> Result<RunOutput, CheckError> {
        let guard = ImageGuard::build(Arc::clone(&self.executor), spec)
            .await
            .map_err(|e| {
                log::error!("Sandbox build failed for {}: {e:#}", spec.tag);
                CheckError::Unavailable("sandbox image build failed".to_string())
            })?;

        log::debug!("Sandbox image {} acquired", guard.tag());
        let run_result = guard.run().await;
        if let Err(e) = &run_result {
            log::error!("Sandbox run failed for {}: {e:#}", guard.tag());
        }
        guard.release().await;

        run_result.map_err(|_| CheckError::Unavailable("sandbox execution failed".to_string()))
    }
}
