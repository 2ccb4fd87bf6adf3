use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub service: ServiceConfig,
    pub build: BuildConfig,
    pub launch: LaunchConfig,
    pub docker: DockerConfig,
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Directory whose full contents become the Source Tree Snapshot.
    pub context: String,
    pub base_image: String,
    pub workdir: String,
    pub os_packages: Vec<String>,
    pub script_dir: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LaunchConfig {
    pub entry_point: String,
    pub bind: String,
    /// Port the server actually binds.
    pub port: u16,
    /// Port declared in image metadata. Advisory only; may legitimately
    /// differ from `port` and is never reconciled automatically.
    pub expose_port: u16,
    pub startup_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DockerConfig {
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    pub dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "app".to_string(),
            },
            build: BuildConfig {
                context: ".".to_string(),
                base_image: "tiangolo/uvicorn-gunicorn-fastapi:python3.11".to_string(),
                workdir: "/app".to_string(),
                os_packages: vec!["git".to_string()],
                script_dir: "bin".to_string(),
                logs_dir: "logs".to_string(),
            },
            launch: LaunchConfig {
                entry_point: "app.main:app".to_string(),
                bind: "0.0.0.0".to_string(),
                port: 8000,
                expose_port: 8500,
                startup_timeout_ms: 30000, // bounded startup window for readiness
            },
            docker: DockerConfig {
                host: "".to_string(),
            },
            data: DataConfig {
                dir: "data".to_string(),
            },
        }
    }
}
