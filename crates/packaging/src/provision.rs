use crate::context::copy_tree;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use svcboot_models::{BootstrapError, Recipe, Step};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Seam for running provisioning commands, so the pipeline's control flow
/// can be exercised without a live system.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, cwd: &Path, program: &str, args: &[&str])
        -> anyhow::Result<CommandOutput>;
}

/// Runs commands as real child processes.
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(
        &self,
        cwd: &Path,
        program: &str,
        args: &[&str],
    ) -> anyhow::Result<CommandOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Ok(CommandOutput {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// The launch handed back by a provisioning run. Environment is an explicit
/// immutable value injected into whatever starts the server, not ambient
/// process state.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionReport {
    pub launch: LaunchPlan,
    pub declared_port: Option<u16>,
}

/// Executes a recipe's provisioning steps directly against a target
/// directory instead of inside an image build. Steps run strictly in
/// order; the first failure aborts, except the single legacy-resolver
/// retry inside the dependency install.
pub struct Provisioner<R: CommandRunner> {
    runner: R,
    source: PathBuf,
    target: PathBuf,
}

impl<R: CommandRunner> Provisioner<R> {
    pub fn new(runner: R, source: PathBuf, target: PathBuf) -> Self {
        Self {
            runner,
            source,
            target,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    #[instrument(skip(self, recipe))]
    pub async fn apply(&self, recipe: &Recipe) -> Result<ProvisionReport, BootstrapError> {
        recipe.validate()?;

        // Every command runs with the target as its working directory, so
        // the target must exist before the first step, not only once
        // SetWorkdir is reached.
        std::fs::create_dir_all(&self.target).map_err(|e| BootstrapError::SourceTree {
            reason: e.to_string(),
        })?;

        let mut env = Vec::new();
        let mut declared_port = None;
        let mut launch = None;

        for step in recipe.steps() {
            debug!(step = step.name(), "Applying step");
            match step {
                // The base runtime is the host itself in a direct
                // provisioning run.
                Step::FromBase { image } => {
                    debug!("Provisioning on host; base image {} not pulled", image);
                }
                Step::InstallOsPackages { packages } => {
                    self.exec(step, "apt-get", &["update"]).await?;
                    let mut args = vec!["install", "-y"];
                    args.extend(packages.iter().map(String::as_str));
                    self.exec(step, "apt-get", &args).await?;
                }
                Step::SetWorkdir { .. } => {
                    std::fs::create_dir_all(&self.target).map_err(|e| {
                        BootstrapError::SourceTree {
                            reason: e.to_string(),
                        }
                    })?;
                }
                Step::CopySourceTree => {
                    copy_tree(&self.source, &self.target)?;
                }
                Step::UpgradeInstaller => {
                    self.exec(step, "pip", &["install", "--upgrade", "pip"])
                        .await?;
                }
                Step::InstallDependencies => {
                    self.install_dependencies().await?;
                }
                Step::RebuildFontCache => {
                    self.exec(step, "fc-cache", &["-f", "-v"]).await?;
                }
                Step::MarkScriptsExecutable { dir, pattern } => {
                    mark_scripts_executable(&self.target.join(dir), pattern)?;
                }
                Step::CreateLogsDir { path } => {
                    std::fs::create_dir_all(self.target.join(path)).map_err(|e| {
                        BootstrapError::StepFailed {
                            step: step.name().to_string(),
                            exit_code: None,
                            stderr: e.to_string(),
                        }
                    })?;
                }
                Step::SetEnv { key, value } => {
                    env.push((key.clone(), value.clone()));
                }
                Step::ExposePort { port } => {
                    declared_port = Some(*port);
                }
                Step::Launch {
                    entry_point,
                    bind,
                    port,
                } => {
                    launch = Some(LaunchPlan {
                        program: "uvicorn".to_string(),
                        args: vec![
                            entry_point.clone(),
                            "--host".to_string(),
                            bind.clone(),
                            "--port".to_string(),
                            port.to_string(),
                        ],
                        env: env.clone(),
                    });
                }
            }
        }

        let launch = launch.ok_or_else(|| BootstrapError::ConfigError {
            reason: "recipe has no launch step".to_string(),
        })?;

        if let Some(declared) = declared_port {
            if let Some(bound) = launch_port(&launch) {
                if declared != bound {
                    warn!(
                        declared_port = declared,
                        bound_port = bound,
                        "Declared port metadata does not match the port the server binds"
                    );
                }
            }
        }

        info!("Provisioning complete in {}", self.target.display());
        Ok(ProvisionReport {
            launch,
            declared_port,
        })
    }

    /// Two-phase dependency install: default resolver first, one retry
    /// with the legacy resolver, combined error when both fail. The first
    /// failure reason is never discarded.
    async fn install_dependencies(&self) -> Result<(), BootstrapError> {
        let primary = self
            .run_checked("pip", &["install", "--no-cache-dir", "."])
            .await;
        let primary_err = match primary {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        warn!(
            error = %primary_err,
            "Default resolver failed; retrying with legacy resolver"
        );
        let fallback = self
            .run_checked(
                "pip",
                &[
                    "install",
                    "--no-cache-dir",
                    ".",
                    "--use-deprecated=legacy-resolver",
                ],
            )
            .await;
        match fallback {
            Ok(()) => Ok(()),
            Err(fallback_err) => Err(BootstrapError::DependencyInstallFailed {
                primary: primary_err,
                fallback: fallback_err,
            }),
        }
    }

    async fn run_checked(&self, program: &str, args: &[&str]) -> Result<(), String> {
        match self.runner.run(&self.target, program, args).await {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(format!(
                "exit code {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            )),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn exec(&self, step: &Step, program: &str, args: &[&str]) -> Result<(), BootstrapError> {
        let output = self.runner.run(&self.target, program, args).await.map_err(
            |e| BootstrapError::StepFailed {
                step: step.name().to_string(),
                exit_code: None,
                stderr: e.to_string(),
            },
        )?;
        if !output.success() {
            return Err(BootstrapError::StepFailed {
                step: step.name().to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(())
    }
}

fn launch_port(launch: &LaunchPlan) -> Option<u16> {
    launch
        .args
        .iter()
        .position(|a| a == "--port")
        .and_then(|i| launch.args.get(i + 1))
        .and_then(|p| p.parse().ok())
}

/// Sets the execute bit on every file in `dir` matching `pattern`
/// (a `*.<ext>` glob). A missing directory or zero matches is success.
#[cfg(unix)]
fn mark_scripts_executable(dir: &Path, pattern: &str) -> Result<(), BootstrapError> {
    use std::os::unix::fs::PermissionsExt;

    let suffix = pattern.trim_start_matches('*');
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(()), // no script directory at all
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_match = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(suffix));
        if path.is_file() && is_match {
            let meta = std::fs::metadata(&path).map_err(|e| BootstrapError::StepFailed {
                step: "mark scripts executable".to_string(),
                exit_code: None,
                stderr: e.to_string(),
            })?;
            let mut perms = meta.permissions();
            // chmod +x semantics: add execute bits only, touch nothing else.
            perms.set_mode(perms.mode() | 0o111);
            std::fs::set_permissions(&path, perms).map_err(|e| BootstrapError::StepFailed {
                step: "mark scripts executable".to_string(),
                exit_code: None,
                stderr: e.to_string(),
            })?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn mark_scripts_executable(_dir: &Path, _pattern: &str) -> Result<(), BootstrapError> {
    Ok(())
}
