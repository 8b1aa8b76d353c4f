//! Run-scoped scratch directories.
//!
//! One pipeline invocation owns exactly one [`Workspace`] and one
//! [`BinaryCache`]. Both are released by [`Workspace::release`] /
//! [`BinaryCache::release`] on the normal path and by `Drop` on every other
//! path (early return, panic unwinding).

use crate::config::types::{GradeError, Result};
use crate::safety::safe_cleanup;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Mode for directories submission binaries only traverse and read.
const SHARED_READ_MODE: u32 = 0o755;
/// Mode for directories submission binaries write into.
const SHARED_WRITE_MODE: u32 = 0o777;

/// Random identifier used for every ephemeral path.
pub fn random_name() -> String {
    Uuid::new_v4().simple().to_string()
}

fn create_dir_with_mode(path: &Path, mode: u32) -> Result<()> {
    fs::create_dir(path).map_err(|e| {
        GradeError::Infrastructure(format!(
            "Failed to create directory {}: {}",
            path.display(),
            e
        ))
    })?;
    // Explicit chmod: create_dir is subject to the process umask.
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
        GradeError::Infrastructure(format!(
            "Failed to set permissions {:o} on {}: {}",
            mode,
            path.display(),
            e
        ))
    })
}

/// Scoped directory handle removed on release or drop.
#[derive(Debug)]
struct ScopedDir {
    path: PathBuf,
    released: bool,
}

impl ScopedDir {
    fn create(base_dir: &Path, prefix: &str) -> Result<Self> {
        let path = base_dir.join(format!("{}-{}", prefix, random_name()));
        create_dir_with_mode(&path, SHARED_READ_MODE)?;
        log::debug!("Created run directory {}", path.display());
        Ok(Self {
            path,
            released: false,
        })
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        safe_cleanup::remove_tree_secure(&self.path)?;
        log::debug!("Removed run directory {}", self.path.display());
        Ok(())
    }
}

impl Drop for ScopedDir {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("Failed to remove run directory {}: {}", self.path.display(), e);
        }
    }
}

/// Ephemeral merged filesystem for one grading run.
#[derive(Debug)]
pub struct Workspace {
    dir: ScopedDir,
}

impl Workspace {
    /// Create `<base_dir>/<problem>-<random>` readable by the sandbox user.
    pub fn create(base_dir: &Path, problem: &str) -> Result<Self> {
        Ok(Self {
            dir: ScopedDir::create(base_dir, problem)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.dir.path
    }

    /// Remove the workspace now. Idempotent.
    pub fn release(mut self) -> Result<()> {
        self.dir.release()
    }
}

/// Scratch directory for compiled artifacts and per-run child state.
#[derive(Debug)]
pub struct BinaryCache {
    dir: ScopedDir,
    profiles_dir: PathBuf,
    toolchain_cache_dir: PathBuf,
}

impl BinaryCache {
    /// Create `<base_dir>/bincache-<random>` with `profiles/` and `cache/`
    /// subdirectories writable by the sandbox user.
    pub fn create(base_dir: &Path) -> Result<Self> {
        let dir = ScopedDir::create(base_dir, "bincache")?;
        let profiles_dir = dir.path.join("profiles");
        let toolchain_cache_dir = dir.path.join("cache");
        create_dir_with_mode(&profiles_dir, SHARED_WRITE_MODE)?;
        create_dir_with_mode(&toolchain_cache_dir, SHARED_WRITE_MODE)?;
        Ok(Self {
            dir,
            profiles_dir,
            toolchain_cache_dir,
        })
    }

    pub fn root(&self) -> &Path {
        &self.dir.path
    }

    /// Fresh, never reused path for a compiled artifact.
    pub fn artifact_path(&self) -> PathBuf {
        self.dir.path.join(random_name())
    }

    /// Fresh path for a coverage profile written by a child process.
    pub fn profile_path(&self) -> PathBuf {
        self.profiles_dir.join(random_name())
    }

    /// Dedicated toolchain cache directory exposed to children.
    pub fn toolchain_cache_dir(&self) -> &Path {
        &self.toolchain_cache_dir
    }

    /// Remove the cache now. Idempotent.
    pub fn release(mut self) -> Result<()> {
        self.dir.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_is_removed_on_release() {
        let base = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(base.path(), "sum").unwrap();
        let root = workspace.root().to_path_buf();
        assert!(root.is_dir());
        assert!(root.file_name().unwrap().to_string_lossy().starts_with("sum-"));

        workspace.release().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn workspace_is_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let root = {
            let workspace = Workspace::create(base.path(), "sum").unwrap();
            fs::write(workspace.root().join("go.mod"), b"module x\n").unwrap();
            workspace.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[test]
    fn workspace_is_removed_when_a_panic_unwinds() {
        let base = tempfile::tempdir().unwrap();
        let base_path = base.path().to_path_buf();
        let result = std::panic::catch_unwind(move || {
            let _workspace = Workspace::create(&base_path, "sum").unwrap();
            panic!("stage blew up");
        });
        assert!(result.is_err());
        assert_eq!(fs::read_dir(base.path()).unwrap().count(), 0);
    }

    #[test]
    fn workspace_is_traversable() {
        let base = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(base.path(), "sum").unwrap();
        let mode = fs::metadata(workspace.root()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn cache_paths_are_unique_and_scoped() {
        let base = tempfile::tempdir().unwrap();
        let cache = BinaryCache::create(base.path()).unwrap();
        let a = cache.artifact_path();
        let b = cache.artifact_path();
        assert_ne!(a, b);
        assert!(a.starts_with(cache.root()));
        assert!(cache.profile_path().starts_with(cache.root()));

        let mode = fs::metadata(cache.toolchain_cache_dir())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o777);

        let root = cache.root().to_path_buf();
        cache.release().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn two_caches_never_collide() {
        let base = tempfile::tempdir().unwrap();
        let first = BinaryCache::create(base.path()).unwrap();
        let second = BinaryCache::create(base.path()).unwrap();
        assert_ne!(first.root(), second.root());
    }
}
