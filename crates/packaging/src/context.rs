use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use svcboot_models::BootstrapError;
use tracing::{info, instrument};

/// A staged Source Tree Snapshot: the configured context directory copied
/// verbatim into a scratch directory, plus its content digest.
#[derive(Debug)]
pub struct BuildContext {
    _temp: tempfile::TempDir,
    root: PathBuf,
    digest: String,
}

impl BuildContext {
    /// Copies the full contents of `source` into a fresh temp directory.
    /// No exclusion list is applied; every file, the build configuration
    /// included, becomes part of the snapshot.
    #[instrument]
    pub fn stage(source: &Path) -> Result<Self, BootstrapError> {
        if !source.is_dir() {
            return Err(BootstrapError::SourceTree {
                reason: format!("context directory not found: {}", source.display()),
            });
        }

        let temp = tempfile::tempdir().map_err(|e| BootstrapError::InternalError {
            reason: e.to_string(),
        })?;
        let root = temp.path().to_path_buf();

        copy_tree(source, &root)?;
        let digest = tree_digest(&root)?;

        info!(digest = %digest, "Staged build context from {}", source.display());
        Ok(Self {
            _temp: temp,
            root,
            digest,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hex SHA-256 over the snapshot's sorted paths, contents, and execute
    /// bits. Identical trees yield identical digests, which is what makes
    /// the build cache sound.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Recursively copies `src` into `dst`, preserving the execute bit.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<(), BootstrapError> {
    let io_err = |e: std::io::Error| BootstrapError::SourceTree {
        reason: e.to_string(),
    };

    fs::create_dir_all(dst).map_err(io_err)?;
    for entry in fs::read_dir(src).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(io_err)?;
        if file_type.is_dir() {
            copy_tree(&from, &to)?;
        } else if file_type.is_file() {
            fs::copy(&from, &to).map_err(io_err)?;
        }
        // Symlinks and special files are skipped; a build context is plain
        // files and directories.
    }
    Ok(())
}

/// Walks `root` and hashes every regular file in sorted relative-path order.
pub fn tree_digest(root: &Path) -> Result<String, BootstrapError> {
    let mut files = Vec::new();
    collect_files(root, root, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for rel in &files {
        let path = root.join(rel);
        let data = fs::read(&path).map_err(|e| BootstrapError::SourceTree {
            reason: e.to_string(),
        })?;
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(&data);
        hasher.update([exec_bit(&path)]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), BootstrapError> {
    let io_err = |e: std::io::Error| BootstrapError::SourceTree {
        reason: e.to_string(),
    };
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(io_err)?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let rel = path
                .strip_prefix(root)
                .map_err(|e| BootstrapError::InternalError {
                    reason: e.to_string(),
                })?;
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}

#[cfg(unix)]
fn exec_bit(path: &Path) -> u8 {
    use std::os::unix::fs::PermissionsExt;
    match fs::metadata(path) {
        Ok(meta) => u8::from(meta.permissions().mode() & 0o111 != 0),
        Err(_) => 0,
    }
}

#[cfg(not(unix))]
fn exec_bit(_path: &Path) -> u8 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &[u8]) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut f = fs::File::create(path).unwrap();
        f.write_all(content).unwrap();
    }

    #[test]
    fn staging_copies_everything_verbatim() {
        let src = tempfile::tempdir().unwrap();
        write_file(src.path(), "app/main.py", b"app = object()");
        write_file(src.path(), "Dockerfile", b"FROM scratch");
        write_file(src.path(), "bin/migrate.sh", b"#!/bin/sh\n");

        let ctx = BuildContext::stage(src.path()).unwrap();
        assert!(ctx.root().join("app/main.py").exists());
        // The build recipe itself is not excluded from the snapshot.
        assert!(ctx.root().join("Dockerfile").exists());
        assert!(ctx.root().join("bin/migrate.sh").exists());
    }

    #[test]
    fn digest_is_deterministic_for_identical_trees() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        for dir in [a.path(), b.path()] {
            write_file(dir, "pyproject.toml", b"[project]\nname = \"app\"");
            write_file(dir, "app/main.py", b"app = object()");
        }
        assert_eq!(tree_digest(a.path()).unwrap(), tree_digest(b.path()).unwrap());
    }

    #[test]
    fn digest_changes_when_content_changes() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "app/main.py", b"app = object()");
        let before = tree_digest(dir.path()).unwrap();
        write_file(dir.path(), "app/main.py", b"app = object\n");
        let after = tree_digest(dir.path()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn missing_context_is_a_source_tree_error() {
        let err = BuildContext::stage(Path::new("/nonexistent/ctx")).unwrap_err();
        assert!(matches!(err, BootstrapError::SourceTree { .. }));
    }
}
