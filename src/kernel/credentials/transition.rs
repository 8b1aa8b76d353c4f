//! Safe UID/GID transitions to unprivileged credentials.
//!
//! Runs between fork and exec, so failures are raw errno values and
//! nothing is logged.
//!
//! CRITICAL: setresgid MUST be called BEFORE setresuid to prevent
//! privilege escalation through saved-set-user-ID.

use super::validation::SandboxIdentity;
use nix::errno::Errno;
use nix::unistd::{getegid, geteuid, getgid, getuid, setgroups, setresgid, setresuid, Gid, Uid};

/// clear groups -> setresgid -> setresuid -> verify.
pub fn transition_to_unprivileged(identity: SandboxIdentity) -> Result<(), Errno> {
    // validate_ids already ran when the identity was resolved; this only
    // guards against a hand-built identity.
    if identity.uid == 0 || identity.gid == 0 {
        return Err(Errno::EPERM);
    }

    let uid = Uid::from_raw(identity.uid);
    let gid = Gid::from_raw(identity.gid);

    setgroups(&[])?;
    // CRITICAL: GID before UID
    setresgid(gid, gid, gid)?;
    setresuid(uid, uid, uid)?;

    if getuid() != uid || geteuid() != uid || getgid() != gid || getegid() != gid {
        return Err(Errno::EPERM);
    }
    Ok(())
}
