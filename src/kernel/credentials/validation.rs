//! Resolution and validation of the unprivileged identity.

use crate::config::types::{GradeError, Result};
use nix::unistd::User;

/// Target credentials of a sandboxed child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxIdentity {
    pub uid: u32,
    pub gid: u32,
}

/// Reject root UIDs/GIDs (0) in strict mode.
pub fn validate_ids(uid: u32, gid: u32, strict_mode: bool) -> Result<()> {
    if uid == 0 || gid == 0 {
        let msg = format!(
            "Cannot transition to root UID/GID (uid={}, gid={})",
            uid, gid
        );
        if strict_mode {
            return Err(GradeError::Infrastructure(msg));
        } else {
            log::warn!("{} (permissive mode)", msg);
        }
    }
    Ok(())
}

/// Look up `user` in the passwd database. Done once, before any fork.
pub fn resolve_identity(user: &str, strict_mode: bool) -> Result<SandboxIdentity> {
    let entry = User::from_name(user)?.ok_or_else(|| {
        GradeError::Infrastructure(format!("Sandbox user '{}' does not exist", user))
    })?;
    let identity = SandboxIdentity {
        uid: entry.uid.as_raw(),
        gid: entry.gid.as_raw(),
    };
    validate_ids(identity.uid, identity.gid, strict_mode)?;
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_ids_rejects_root_uid_in_strict_mode() {
        assert!(validate_ids(0, 1000, true).is_err());
    }

    #[test]
    fn validate_ids_rejects_root_gid_in_strict_mode() {
        assert!(validate_ids(1000, 0, true).is_err());
    }

    #[test]
    fn validate_ids_accepts_non_root_in_strict_mode() {
        assert!(validate_ids(1000, 1000, true).is_ok());
    }

    #[test]
    fn validate_ids_warns_root_in_permissive_mode() {
        assert!(validate_ids(0, 1000, false).is_ok());
    }

    #[test]
    fn root_user_is_refused() {
        assert!(resolve_identity("root", true).is_err());
    }

    #[test]
    fn unknown_user_is_an_error() {
        assert!(resolve_identity("gradebox-no-such-user", true).is_err());
    }
}
