use crate::cache::BuildCache;
use crate::context::BuildContext;
use crate::image_builder::ImageBuilder;
use std::path::{Path, PathBuf};
use svcboot_models::{BootstrapError, Config, Recipe};
use tracing::{info, instrument};

/// Drives one image build end to end: stage the source tree, consult the
/// cache, render and build, record the result.
pub struct PackagingService {
    image_builder: ImageBuilder,
    cache: BuildCache,
    config: Config,
}

impl PackagingService {
    pub fn new(config: Config) -> Result<Self, BootstrapError> {
        let image_builder = ImageBuilder::new(config.docker.host.clone());
        let cache = BuildCache::new(PathBuf::from(&config.data.dir))?;
        Ok(Self {
            image_builder,
            cache,
            config,
        })
    }

    /// Returns the image ref for the current source tree, building only
    /// when the tree digest has not been seen before.
    #[instrument(skip(self))]
    pub async fn build(&mut self) -> Result<String, BootstrapError> {
        let context = BuildContext::stage(Path::new(&self.config.build.context))?;
        let service = self.config.service.name.clone();

        if let Some(cached) = self.cache.get_cached_image(&service, context.digest()) {
            info!(image = %cached, "Source tree unchanged; reusing cached image");
            return Ok(cached);
        }

        let image_ref = image_ref(&service, context.digest());
        let recipe = Recipe::for_config(&self.config);
        self.image_builder
            .build_image(&recipe, &context, &image_ref)
            .await?;

        self.cache
            .cache_image(&service, context.digest(), image_ref.clone());
        self.cache.save()?;
        Ok(image_ref)
    }
}

fn image_ref(service: &str, digest: &str) -> String {
    let short = &digest[..digest.len().min(12)];
    format!("svcboot/{service}:{short}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_ref_uses_short_digest() {
        let digest = "0123456789abcdef0123456789abcdef";
        assert_eq!(image_ref("app", digest), "svcboot/app:0123456789ab");
    }
}
