//! No-follow tree removal for run directories.
//!
//! Submission code can plant symlinks inside the workspace. `remove_dir_all`
//! resolves paths by name, so everything here walks by directory fd with
//! `openat`/`fstatat(AT_SYMLINK_NOFOLLOW)`/`unlinkat` and never leaves the
//! filesystem the tree root lives on.

use crate::config::types::{GradeError, Result};
use std::ffi::{CStr, CString};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

const DIR_FLAGS: libc::c_int = libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC | libc::O_NOFOLLOW;

fn fs_error(what: impl std::fmt::Display) -> GradeError {
    GradeError::Infrastructure(format!(
        "{}: {}",
        what,
        std::io::Error::last_os_error()
    ))
}

fn open_dir_nofollow(path: &Path) -> Result<OwnedFd> {
    let path_c = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        GradeError::Infrastructure(format!(
            "Path contains NUL byte and cannot be opened safely: {}",
            path.display()
        ))
    })?;

    // SAFETY: path_c is a valid NUL-terminated string for the duration of the call.
    let fd = unsafe { libc::open(path_c.as_ptr(), DIR_FLAGS) };
    if fd < 0 {
        return Err(fs_error(format!("open directory failed for {}", path.display())));
    }
    // SAFETY: fd was just returned by open and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn open_child_dir(parent: RawFd, name: &CStr) -> Result<OwnedFd> {
    // SAFETY: parent is a live directory fd and name is NUL-terminated.
    let fd = unsafe { libc::openat(parent, name.as_ptr(), DIR_FLAGS) };
    if fd < 0 {
        return Err(fs_error(format!("openat failed for child directory {:?}", name)));
    }
    // SAFETY: fd was just returned by openat and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn stat_nofollow(parent: RawFd, name: &CStr) -> Result<libc::stat> {
    let mut st = std::mem::MaybeUninit::<libc::stat>::zeroed();
    // SAFETY: st points to writable storage of the right size.
    let rc = unsafe {
        libc::fstatat(
            parent,
            name.as_ptr(),
            st.as_mut_ptr(),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    };
    if rc != 0 {
        return Err(fs_error(format!("fstatat failed for {:?}", name)));
    }
    // SAFETY: fstatat succeeded and initialised the struct.
    Ok(unsafe { st.assume_init() })
}

fn unlink_at(parent: RawFd, name: &CStr, flags: libc::c_int) -> Result<()> {
    // SAFETY: parent is a live directory fd and name is NUL-terminated.
    let rc = unsafe { libc::unlinkat(parent, name.as_ptr(), flags) };
    if rc != 0 {
        return Err(fs_error(format!("unlinkat failed for entry {:?}", name)));
    }
    Ok(())
}

/// Snapshot the entry names of a directory. Listing before deleting keeps
/// readdir from observing a directory that is being mutated.
fn list_entries(dir: &OwnedFd) -> Result<Vec<CString>> {
    // fdopendir takes ownership of the fd it is given, so hand it a duplicate.
    // SAFETY: dup on a live fd.
    let iter_fd = unsafe { libc::dup(dir.as_raw_fd()) };
    if iter_fd < 0 {
        return Err(fs_error("dup for directory iteration failed"));
    }

    // SAFETY: iter_fd is a valid directory fd that fdopendir now owns.
    let stream = unsafe { libc::fdopendir(iter_fd) };
    if stream.is_null() {
        // SAFETY: fdopendir failed, iter_fd is still ours to close.
        unsafe { libc::close(iter_fd) };
        return Err(fs_error("fdopendir failed"));
    }

    let mut names = Vec::new();
    let outcome = loop {
        // SAFETY: errno is thread-local; resetting it distinguishes end-of-stream from failure.
        unsafe { *libc::__errno_location() = 0 };
        // SAFETY: stream is a live DIR*.
        let entry = unsafe { libc::readdir(stream) };
        if entry.is_null() {
            // SAFETY: reading thread-local errno.
            let errno = unsafe { *libc::__errno_location() };
            break if errno == 0 {
                Ok(())
            } else {
                Err(GradeError::Infrastructure(format!(
                    "readdir failed: {}",
                    std::io::Error::from_raw_os_error(errno)
                )))
            };
        }

        // SAFETY: d_name is NUL-terminated inside the dirent readdir returned.
        let name = unsafe { CStr::from_ptr((*entry).d_name.as_ptr()) };
        let bytes = name.to_bytes();
        if bytes != b"." && bytes != b".." {
            names.push(name.to_owned());
        }
    };

    // SAFETY: stream is live and closed exactly once.
    unsafe { libc::closedir(stream) };
    outcome.map(|()| names)
}

fn remove_contents(dir: &OwnedFd, root_dev: libc::dev_t) -> Result<()> {
    for name in list_entries(dir)? {
        let st = stat_nofollow(dir.as_raw_fd(), &name)?;
        if st.st_mode & libc::S_IFMT == libc::S_IFDIR {
            if st.st_dev != root_dev {
                return Err(GradeError::Infrastructure(format!(
                    "Refusing to cross filesystem boundary at directory {:?}",
                    name
                )));
            }
            let child = open_child_dir(dir.as_raw_fd(), &name)?;
            remove_contents(&child, root_dev)?;
            unlink_at(dir.as_raw_fd(), &name, libc::AT_REMOVEDIR)?;
        } else {
            unlink_at(dir.as_raw_fd(), &name, 0)?;
        }
    }
    Ok(())
}

/// Remove `path` and everything below it without following symlinks.
/// A missing path is not an error.
pub fn remove_tree_secure(path: &Path) -> Result<()> {
    if std::fs::symlink_metadata(path).is_err() {
        return Ok(());
    }

    let parent = path.parent().ok_or_else(|| {
        GradeError::Infrastructure(format!(
            "Cannot remove path without parent: {}",
            path.display()
        ))
    })?;
    let name = path.file_name().ok_or_else(|| {
        GradeError::Infrastructure(format!(
            "Cannot remove path without file name: {}",
            path.display()
        ))
    })?;
    let name = CString::new(name.as_bytes()).map_err(|_| {
        GradeError::Infrastructure(format!(
            "Path contains NUL byte and cannot be removed safely: {}",
            path.display()
        ))
    })?;

    let parent_fd = open_dir_nofollow(parent)?;
    let st = stat_nofollow(parent_fd.as_raw_fd(), &name)?;

    if st.st_mode & libc::S_IFMT == libc::S_IFDIR {
        let dir = open_child_dir(parent_fd.as_raw_fd(), &name)?;
        remove_contents(&dir, st.st_dev)?;
        unlink_at(parent_fd.as_raw_fd(), &name, libc::AT_REMOVEDIR)
    } else {
        unlink_at(parent_fd.as_raw_fd(), &name, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn removes_nested_tree() {
        let scratch = tempfile::tempdir().unwrap();
        let root = scratch.path().join("run");
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("a/file.txt"), b"x").unwrap();
        fs::write(root.join("a/b/c/deep.txt"), b"y").unwrap();

        remove_tree_secure(&root).unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn does_not_follow_planted_symlinks() {
        let scratch = tempfile::tempdir().unwrap();
        let outside = scratch.path().join("outside");
        fs::create_dir(&outside).unwrap();
        fs::write(outside.join("precious.txt"), b"keep").unwrap();

        let root = scratch.path().join("run");
        fs::create_dir(&root).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("escape")).unwrap();

        remove_tree_secure(&root).unwrap();
        assert!(!root.exists());
        assert_eq!(fs::read(outside.join("precious.txt")).unwrap(), b"keep");
    }

    #[test]
    fn missing_path_is_ok() {
        let scratch = tempfile::tempdir().unwrap();
        remove_tree_secure(&scratch.path().join("never-created")).unwrap();
    }

    #[test]
    fn removes_single_file() {
        let scratch = tempfile::tempdir().unwrap();
        let file = scratch.path().join("profile.out");
        fs::write(&file, b"mode: set\n").unwrap();
        remove_tree_secure(&file).unwrap();
        assert!(!file.exists());
    }
}
