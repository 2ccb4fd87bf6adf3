use crate::context::BuildContext;
use crate::dockerfile;
use std::process::Stdio;
use svcboot_models::{BootstrapError, Recipe};
use tokio::process::Command;
use tracing::{error, info, instrument};

pub struct ImageBuilder {
    _docker_host: String,
}

impl ImageBuilder {
    pub fn new(docker_host: String) -> Self {
        Self {
            _docker_host: docker_host,
        }
    }

    /// Renders the recipe into the staged context and runs `docker build`.
    /// Any non-zero exit is fatal; no partial image is kept.
    #[instrument(skip(self, recipe, context))]
    pub async fn build_image(
        &self,
        recipe: &Recipe,
        context: &BuildContext,
        image_ref: &str,
    ) -> Result<(), BootstrapError> {
        recipe.validate()?;

        let dockerfile_content = dockerfile::render(recipe);
        let dockerfile_path = context.root().join("Dockerfile.svcboot");
        std::fs::write(&dockerfile_path, dockerfile_content).map_err(|e| {
            BootstrapError::InternalError {
                reason: e.to_string(),
            }
        })?;

        info!("Building image: {}", image_ref);
        info!("Build context: {:?}", context.root());

        let build_result = Command::new("docker")
            .arg("build")
            .arg("-t")
            .arg(image_ref)
            .arg("-f")
            .arg(&dockerfile_path)
            .arg(context.root())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BootstrapError::DockerError {
                message: e.to_string(),
            })?;

        if !build_result.status.success() {
            let stdout = String::from_utf8_lossy(&build_result.stdout);
            let stderr = String::from_utf8_lossy(&build_result.stderr);
            error!("Image build failed - stdout: {}", stdout);
            error!("Image build failed - stderr: {}", stderr);
            return Err(BootstrapError::DockerError {
                message: format!("docker build failed: {stderr}"),
            });
        }

        info!("Built image: {}", image_ref);
        Ok(())
    }
}
