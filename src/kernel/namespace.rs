//! Namespace and filesystem-view restriction for sandboxed children.
//!
//! Everything in here runs between `fork` and `exec`: no logging, no
//! allocation, errors are returned as raw errno values.

use nix::errno::Errno;
use nix::mount::{mount, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::unistd::chdir;
use std::ffi::{CStr, CString};

const TMPFS: &CStr = c"tmpfs";
const ROOT: &CStr = c"/";
const HIDE_OPTIONS: &CStr = c"size=16k,mode=0755";
const CONFINE_OPTIONS: &CStr = c"size=64m,mode=1777";

/// Per-run view of the shared run base: the base is replaced by an empty
/// tmpfs and only this run's directories are bound back in, so concurrent
/// runs under the same base stay out of reach.
#[derive(Debug, Clone)]
pub struct RunConfinement {
    base: CString,
    /// (source, target) pairs; sources are `/proc/self/fd/N` links held
    /// open by the parent across fork.
    binds: Vec<(CString, CString)>,
    workdir: CString,
}

impl RunConfinement {
    pub fn new(base: CString, binds: Vec<(CString, CString)>, workdir: CString) -> Self {
        Self {
            base,
            binds,
            workdir,
        }
    }

    pub fn base(&self) -> &CStr {
        &self.base
    }

    pub fn targets(&self) -> impl Iterator<Item = &CStr> {
        self.binds.iter().map(|(_, target)| target.as_c_str())
    }

    fn apply(&self) -> Result<(), Errno> {
        mount(
            Some(TMPFS),
            self.base.as_c_str(),
            Some(TMPFS),
            MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
            Some(CONFINE_OPTIONS),
        )?;

        for (source, target) in &self.binds {
            // SAFETY: target is NUL-terminated and outlives the call.
            if unsafe { libc::mkdir(target.as_ptr(), 0o755) } != 0 {
                let err = Errno::last();
                if err != Errno::EEXIST {
                    return Err(err);
                }
            }
            mount(
                Some(source.as_c_str()),
                target.as_c_str(),
                None::<&CStr>,
                MsFlags::MS_BIND | MsFlags::MS_REC,
                None::<&CStr>,
            )?;
        }

        // The cwd was entered before the base was covered; re-enter it
        // through the new view.
        chdir(self.workdir.as_c_str())
    }
}

/// Namespaces and mounts applied to one child. Built before fork.
#[derive(Debug, Clone)]
pub struct NamespacePlan {
    isolate_network: bool,
    isolate_mounts: bool,
    hidden: Vec<CString>,
}

impl NamespacePlan {
    pub fn new(isolate_network: bool, isolate_mounts: bool, hidden: Vec<CString>) -> Self {
        Self {
            isolate_network,
            isolate_mounts,
            hidden,
        }
    }

    pub fn hidden_paths(&self) -> &[CString] {
        &self.hidden
    }

    pub fn clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::CLONE_NEWIPC | CloneFlags::CLONE_NEWUTS;
        if self.isolate_mounts {
            flags |= CloneFlags::CLONE_NEWNS;
        }
        if self.isolate_network {
            flags |= CloneFlags::CLONE_NEWNET;
        }
        flags
    }

    /// Enter fresh namespaces, privatise mounts, confine the run base, mask
    /// hidden paths and bring up loopback. Must run while still privileged.
    pub fn apply(&self, confinement: Option<&RunConfinement>) -> Result<(), Errno> {
        unshare(self.clone_flags())?;

        if self.isolate_mounts {
            harden_mount_propagation()?;
            if let Some(confinement) = confinement {
                confinement.apply()?;
            }
            for path in &self.hidden {
                hide_path(path)?;
            }
        }

        if self.isolate_network {
            bring_up_loopback()?;
        }
        Ok(())
    }
}

/// mount(NULL, "/", NULL, MS_REC | MS_PRIVATE, NULL) so nothing the child
/// mounts propagates back to the host.
pub fn harden_mount_propagation() -> Result<(), Errno> {
    mount(
        None::<&CStr>,
        ROOT,
        None::<&CStr>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&CStr>,
    )
}

/// Cover `path` with an empty tmpfs.
fn hide_path(path: &CStr) -> Result<(), Errno> {
    mount(
        Some(TMPFS),
        path,
        Some(TMPFS),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        Some(HIDE_OPTIONS),
    )
}

fn bring_up_loopback() -> Result<(), Errno> {
    // SAFETY: plain socket(2); the descriptor is closed on every path below.
    let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
    if sock < 0 {
        return Err(Errno::last());
    }

    // SAFETY: ifreq is plain old data; all-zero is a valid value.
    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    for (idx, b) in b"lo\0".iter().enumerate() {
        ifr.ifr_name[idx] = *b as libc::c_char;
    }

    // SAFETY: ifr is a valid, initialised ifreq for the lifetime of the call.
    let rc = unsafe { libc::ioctl(sock, libc::SIOCGIFFLAGS as _, &mut ifr) };
    if rc != 0 {
        let err = Errno::last();
        // SAFETY: sock is an open descriptor owned here.
        unsafe { libc::close(sock) };
        return Err(err);
    }

    // SAFETY: SIOCGIFFLAGS filled the flags member of the union.
    let flags = unsafe { ifr.ifr_ifru.ifru_flags } as libc::c_int;
    ifr.ifr_ifru.ifru_flags = (flags | libc::IFF_UP) as libc::c_short;

    // SAFETY: as above.
    let rc = unsafe { libc::ioctl(sock, libc::SIOCSIFFLAGS as _, &ifr) };
    let err = Errno::last();
    // SAFETY: sock is an open descriptor owned here.
    unsafe { libc::close(sock) };
    if rc != 0 {
        return Err(err);
    }
    Ok(())
}

/// prctl(PR_SET_NO_NEW_PRIVS, 1): exec can never regain privileges.
pub fn set_no_new_privs() -> Result<(), Errno> {
    // SAFETY: prctl(PR_SET_NO_NEW_PRIVS, 1) is safe and idempotent.
    let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(Errno::last());
    }
    Ok(())
}

/// Whether namespace isolation is usable on this host at all.
pub fn is_supported() -> bool {
    std::fs::read_dir("/proc/self/ns").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_follow_the_plan() {
        let full = NamespacePlan::new(true, true, Vec::new());
        let flags = full.clone_flags();
        assert!(flags.contains(CloneFlags::CLONE_NEWNS));
        assert!(flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(flags.contains(CloneFlags::CLONE_NEWIPC));
        assert!(flags.contains(CloneFlags::CLONE_NEWUTS));

        let shared_net = NamespacePlan::new(false, true, Vec::new());
        assert!(!shared_net.clone_flags().contains(CloneFlags::CLONE_NEWNET));

        let shared_mounts = NamespacePlan::new(true, false, Vec::new());
        assert!(!shared_mounts.clone_flags().contains(CloneFlags::CLONE_NEWNS));
    }

    #[test]
    fn confinement_lists_its_bind_targets() {
        let confinement = RunConfinement::new(
            CString::new("/srv/runs").unwrap(),
            vec![
                (
                    CString::new("/proc/self/fd/7").unwrap(),
                    CString::new("/srv/runs/sum-1").unwrap(),
                ),
                (
                    CString::new("/proc/self/fd/8").unwrap(),
                    CString::new("/srv/runs/bincache-1").unwrap(),
                ),
            ],
            CString::new("/srv/runs/sum-1/sum").unwrap(),
        );
        assert_eq!(confinement.base(), c"/srv/runs");
        let targets: Vec<&CStr> = confinement.targets().collect();
        assert_eq!(targets, vec![c"/srv/runs/sum-1", c"/srv/runs/bincache-1"]);
    }

    #[test]
    fn no_new_privs_is_idempotent() {
        // Only ever tightens the calling test thread; harmless to repeat.
        let first = set_no_new_privs();
        let second = set_no_new_privs();
        assert_eq!(first.is_ok(), second.is_ok());
    }
}
