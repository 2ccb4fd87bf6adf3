use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use svcboot_models::BootstrapError;
use tracing::{info, instrument};

/// Maps source-tree digests to image refs so an unchanged tree never
/// rebuilds. Persisted as JSON under the data directory.
pub struct BuildCache {
    cache_dir: PathBuf,
    image_cache: HashMap<String, String>, // tree digest -> image ref
}

impl BuildCache {
    pub fn new(cache_dir: PathBuf) -> Result<Self, BootstrapError> {
        fs::create_dir_all(&cache_dir).map_err(|e| BootstrapError::InternalError {
            reason: e.to_string(),
        })?;

        let mut cache = Self {
            cache_dir,
            image_cache: HashMap::new(),
        };
        cache.load()?;
        Ok(cache)
    }

    #[instrument(skip(self))]
    pub fn get_cached_image(&self, service: &str, digest: &str) -> Option<String> {
        self.image_cache.get(&cache_key(service, digest)).cloned()
    }

    #[instrument(skip(self))]
    pub fn cache_image(&mut self, service: &str, digest: &str, image_ref: String) {
        self.image_cache.insert(cache_key(service, digest), image_ref);
        info!("Cached image for service {} with digest {}", service, digest);
    }

    fn load(&mut self) -> Result<(), BootstrapError> {
        let cache_file = self.cache_dir.join("image_cache.json");
        if cache_file.exists() {
            let data =
                fs::read_to_string(&cache_file).map_err(|e| BootstrapError::InternalError {
                    reason: e.to_string(),
                })?;
            self.image_cache =
                serde_json::from_str(&data).map_err(|e| BootstrapError::InternalError {
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    pub fn save(&self) -> Result<(), BootstrapError> {
        let cache_file = self.cache_dir.join("image_cache.json");
        let data = serde_json::to_string_pretty(&self.image_cache).map_err(|e| {
            BootstrapError::InternalError {
                reason: e.to_string(),
            }
        })?;
        fs::write(&cache_file, data).map_err(|e| BootstrapError::InternalError {
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

fn cache_key(service: &str, digest: &str) -> String {
    format!("{service}:{digest}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = BuildCache::new(dir.path().to_path_buf()).unwrap();
            cache.cache_image("app", "abc123", "svcboot/app:abc123".to_string());
            cache.save().unwrap();
        }
        let cache = BuildCache::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(
            cache.get_cached_image("app", "abc123"),
            Some("svcboot/app:abc123".to_string())
        );
        assert_eq!(cache.get_cached_image("app", "other"), None);
    }
}
