use crate::config::Config;
use crate::error::BootstrapError;
use serde::{Deserialize, Serialize};

/// One provisioning operation of the bootstrap pipeline. Steps are executed
/// strictly in order; there is no branching and no retry except the single
/// legacy-resolver fallback inside `InstallDependencies`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Step {
    FromBase {
        image: String,
    },
    InstallOsPackages {
        packages: Vec<String>,
    },
    SetWorkdir {
        path: String,
    },
    CopySourceTree,
    UpgradeInstaller,
    /// Two-phase install: the default resolver first, then exactly one
    /// retry with the legacy resolver. The legacy strategy must never run
    /// first; it only exists for dependency sets the strict resolver
    /// rejects as unsatisfiable.
    InstallDependencies,
    RebuildFontCache,
    /// Zero matching scripts is success, not failure.
    MarkScriptsExecutable {
        dir: String,
        pattern: String,
    },
    CreateLogsDir {
        path: String,
    },
    SetEnv {
        key: String,
        value: String,
    },
    /// Advisory image metadata only; does not open the port.
    ExposePort {
        port: u16,
    },
    Launch {
        entry_point: String,
        bind: String,
        port: u16,
    },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::FromBase { .. } => "select base runtime",
            Step::InstallOsPackages { .. } => "install OS packages",
            Step::SetWorkdir { .. } => "set working directory",
            Step::CopySourceTree => "copy source tree",
            Step::UpgradeInstaller => "upgrade package installer",
            Step::InstallDependencies => "install dependencies",
            Step::RebuildFontCache => "rebuild font cache",
            Step::MarkScriptsExecutable { .. } => "mark scripts executable",
            Step::CreateLogsDir { .. } => "create logs directory",
            Step::SetEnv { .. } => "set environment variable",
            Step::ExposePort { .. } => "declare exposed port",
            Step::Launch { .. } => "launch server",
        }
    }
}

/// The ordered bootstrap pipeline for one service image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recipe {
    steps: Vec<Step>,
}

impl Recipe {
    /// Builds the canonical pipeline from configuration: base runtime, OS
    /// prerequisites, source snapshot, two-phase dependency install, font
    /// cache, permissions, logs dir, env, port metadata, launch.
    pub fn for_config(config: &Config) -> Self {
        let build = &config.build;
        let launch = &config.launch;
        let steps = vec![
            Step::FromBase {
                image: build.base_image.clone(),
            },
            Step::InstallOsPackages {
                packages: build.os_packages.clone(),
            },
            Step::SetWorkdir {
                path: build.workdir.clone(),
            },
            Step::CopySourceTree,
            Step::UpgradeInstaller,
            Step::InstallDependencies,
            Step::RebuildFontCache,
            Step::MarkScriptsExecutable {
                dir: build.script_dir.clone(),
                pattern: "*.sh".to_string(),
            },
            Step::CreateLogsDir {
                path: build.logs_dir.clone(),
            },
            Step::SetEnv {
                key: "PYTHONPATH".to_string(),
                value: build.workdir.clone(),
            },
            Step::SetEnv {
                key: "PYTHONUNBUFFERED".to_string(),
                value: "1".to_string(),
            },
            Step::ExposePort {
                port: launch.expose_port,
            },
            Step::Launch {
                entry_point: launch.entry_point.clone(),
                bind: launch.bind.clone(),
                port: launch.port,
            },
        ];
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Enforces the ordering invariant: the working directory must be set
    /// and the source tree copied before anything that mutates it runs,
    /// and the launch step must come last.
    pub fn validate(&self) -> Result<(), BootstrapError> {
        let position = |pred: fn(&Step) -> bool| self.steps.iter().position(pred);

        let base = position(|s| matches!(s, Step::FromBase { .. }));
        let workdir = position(|s| matches!(s, Step::SetWorkdir { .. }));
        let copy = position(|s| matches!(s, Step::CopySourceTree));
        let install = position(|s| matches!(s, Step::InstallDependencies));
        let fonts = position(|s| matches!(s, Step::RebuildFontCache));
        let perms = position(|s| matches!(s, Step::MarkScriptsExecutable { .. }));
        let launch = position(|s| matches!(s, Step::Launch { .. }));

        let ordered = |a: Option<usize>, b: Option<usize>| match (a, b) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        };

        if base != Some(0) {
            return Err(BootstrapError::ConfigError {
                reason: "pipeline must start from a base image".to_string(),
            });
        }
        for (label, later) in [
            ("dependency install", install),
            ("font cache rebuild", fonts),
            ("permissions fix", perms),
        ] {
            if !ordered(workdir, later) || !ordered(copy, later) {
                return Err(BootstrapError::ConfigError {
                    reason: format!(
                        "{label} must run after the working directory and source tree are in place"
                    ),
                });
            }
        }
        match launch {
            Some(idx) if idx == self.steps.len() - 1 => {}
            _ => {
                return Err(BootstrapError::ConfigError {
                    reason: "launch must be the terminal step".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Environment variables bound into the image, in declaration order.
    pub fn env(&self) -> Vec<(String, String)> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                Step::SetEnv { key, value } => Some((key.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn launch(&self) -> Option<&Step> {
        self.steps.iter().find(|s| matches!(s, Step::Launch { .. }))
    }

    /// Returns `(declared, bound)` when the advisory EXPOSE port differs
    /// from the port the launch command binds. The discrepancy is part of
    /// the contract: callers warn about it, nothing reconciles it.
    pub fn port_mismatch(&self) -> Option<(u16, u16)> {
        let declared = self.steps.iter().find_map(|s| match s {
            Step::ExposePort { port } => Some(*port),
            _ => None,
        })?;
        let bound = self.steps.iter().find_map(|s| match s {
            Step::Launch { port, .. } => Some(*port),
            _ => None,
        })?;
        if declared != bound {
            Some((declared, bound))
        } else {
            None
        }
    }
}
