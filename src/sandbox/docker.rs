//! Container-engine backend: throwaway image + container per check, driven
//! over the local engine socket.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::{BuildImageOptions, RemoveImageOptions};
use bollard::models::HostConfig;
use futures_util::{Stream, StreamExt};

use super::{BuildSpec, RunOutput, SandboxExecutor, SandboxImage};
use crate::config::SandboxConfig;

const PIDS_LIMIT: i64 = 64;

pub struct DockerExecutor {
    docker: Docker,
    memory_limit_bytes: i64,
    nano_cpus: i64,
    run_timeout: Duration,
}

impl DockerExecutor {
    /// Connects the engine client once, at startup; the handle is then passed
    /// down to every check.
    pub fn connect(config: &SandboxConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to the container engine. Is it running?")?;

        Ok(Self {
            docker,
            memory_limit_bytes: config.memory_limit_bytes,
            nano_cpus: config.nano_cpus,
            run_timeout: Duration::from_millis(config.run_timeout_ms),
        })
    }

    async fn force_remove_container(&self, name: &str) {
        let options = Some(RemoveContainerOptions {
            force: true,
            ..Default::default()
        });
        if let Err(e) = self.docker.remove_container(name, options).await {
            if !is_not_found(&e) {
                log::debug!("Container {name} removal: {e}");
            }
        }
    }
}

#[async_trait]
impl SandboxExecutor for DockerExecutor {
    async fn build(&self, spec: &BuildSpec) -> Result<SandboxImage> {
        let context = build_context(spec)?;
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: spec.tag.clone(),
            nocache: true,
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(context.into()));
        let mut build_error = None;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(info) => {
                    if let Some(message) = info.error {
                        build_error = Some(message);
                        break;
                    }
                }
                Err(e) => {
                    build_error = Some(e.to_string());
                    break;
                }
            }
        }

        if let Some(message) = build_error {
            // A failed build must not leave the tag behind
            let _ = self
                .docker
                .remove_image(
                    &spec.tag,
                    Some(RemoveImageOptions {
                        force: true,
                        ..Default::default()
                    }),
                    None,
                )
                .await;
            bail!("image build failed for {}: {message}", spec.tag);
        }

        log::debug!("Sandbox image {} built", spec.tag);
        Ok(SandboxImage {
            tag: spec.tag.clone(),
            entry: spec.entry_command(),
        })
    }

    async fn run(&self, image: &SandboxImage) -> Result<RunOutput> {
        let name = image.tag.clone();
        let config = Config {
            image: Some(image.tag.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            // Removal stays with this method: auto-remove would let a
            // fast-exiting container vanish before the log follow attaches
            host_config: Some(HostConfig {
                readonly_rootfs: Some(true),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                memory: Some(self.memory_limit_bytes),
                nano_cpus: Some(self.nano_cpus),
                pids_limit: Some(PIDS_LIMIT),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .context("Failed to create container")?;

        let start = Instant::now();
        if let Err(e) = self
            .docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await
        {
            self.force_remove_container(&name).await;
            return Err(anyhow::Error::new(e).context("Failed to start container"));
        }

        let mut stdout = String::new();
        let mut stderr = String::new();

        let options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });
        let capture = drain_log_stream(self.docker.logs(&name, options), &mut stdout, &mut stderr);

        let captured = match tokio::time::timeout(self.run_timeout, capture).await {
            Ok(captured) => captured,
            Err(_) => {
                let _ = self
                    .docker
                    .kill_container(&name, None::<KillContainerOptions<String>>)
                    .await;
                self.force_remove_container(&name).await;
                bail!(
                    "execution exceeded the {}ms wall-clock budget",
                    self.run_timeout.as_millis()
                );
            }
        };

        // A broken log stream means the output is lost, not empty; that is
        // an infrastructure failure, never a gradable string
        if let Err(e) = captured {
            self.force_remove_container(&name).await;
            return Err(e.context(format!("Failed to capture output from container {name}")));
        }

        let mut exit_code = None;
        let mut wait = self.docker.wait_container(
            &name,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        if let Some(status) = wait.next().await {
            match status {
                Ok(response) => exit_code = Some(response.status_code),
                // A non-zero exit surfaces as a wait error; the crashing
                // process's output is still returned to the comparator
                Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => {
                    exit_code = Some(code);
                }
                Err(e) => log::warn!("Wait on container {name} failed: {e}"),
            }
        }

        self.force_remove_container(&name).await;

        Ok(RunOutput {
            stdout,
            stderr,
            exit_code,
            duration: start.elapsed(),
        })
    }

    async fn remove(&self, image: &SandboxImage) -> Result<()> {
        let options = Some(RemoveImageOptions {
            force: true,
            ..Default::default()
        });
        match self.docker.remove_image(&image.tag, options, None).await {
            Ok(_) => {
                log::debug!("Sandbox image {} removed", image.tag);
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Failed to remove sandbox image {}", image.tag))),
        }
    }
}

/// Folds a follow-mode log stream into captured stdout/stderr. Any stream
/// error is propagated: partially captured text must not be mistaken for the
/// submission's complete (possibly empty) output.
async fn drain_log_stream(
    mut logs: impl Stream<Item = Result<LogOutput, bollard::errors::Error>> + Unpin,
    stdout: &mut String,
    stderr: &mut String,
) -> Result<()> {
    while let Some(chunk) = logs.next().await {
        match chunk? {
            LogOutput::StdOut { message } => {
                stdout.push_str(&String::from_utf8_lossy(&message));
            }
            LogOutput::StdErr { message } => {
                stderr.push_str(&String::from_utf8_lossy(&message));
            }
            _ => {}
        }
    }
    Ok(())
}

fn is_not_found(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// In-memory tar build context: Dockerfile, submission artifact, input
/// fixture. Nothing is read from the host during the build itself.
fn build_context(spec: &BuildSpec) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    append_file(&mut builder, "Dockerfile", spec.render_dockerfile().as_bytes())?;

    let submission = std::fs::read(&spec.submission_path)
        .context("Failed to read materialized submission")?;
    append_file(&mut builder, &spec.submission_name, &submission)?;

    let input = std::fs::read(&spec.input_path).context("Failed to read input fixture")?;
    append_file(&mut builder, super::INPUT_NAME, &input)?;

    Ok(builder.into_inner()?)
}

fn append_file(builder: &mut tar::Builder<Vec<u8>>, name: &str, content: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, content)?;
    Ok(())
}
