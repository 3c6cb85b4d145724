//! Directory-ownership and write-permission walk, ported from the original
//! daemon's `path_is_secure()`: every component from the canonicalized path
//! up to `/` must be owned by root or the running UID, and must not be
//! group- or world-writable unless the sticky bit is set.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use log::warn;

use crate::error::{Error, ErrorKind};
use anomaly::format_err;

/// Tunables that shape how strictly [`check_directory`] enforces the walk,
/// both named in the daemon's configuration table (§6).
#[derive(Copy, Clone, Default)]
pub struct CheckOptions {
    /// A GID permitted to share group-write access to daemon directories
    /// without needing the sticky bit set.
    pub trusted_gid: Option<u32>,
    /// Downgrade a failed check to a logged warning instead of an error.
    pub force: bool,
}

/// Walk `path` and every ancestor directory up to `/`, rejecting anything
/// owned by a foreign UID or writable by a party this daemon doesn't trust.
pub fn check_directory(path: &Path) -> Result<(), Error> {
    check_directory_with(path, &CheckOptions::default())
}

/// As [`check_directory`], but honoring `trusted_gid` (group-writable
/// directories owned by this GID are allowed without the sticky bit) and
/// `force` (violations are logged as warnings rather than failing the
/// check, per the daemon's `force` configuration knob).
pub fn check_directory_with(path: &Path, opts: &CheckOptions) -> Result<(), Error> {
    let canonical = fs::canonicalize(path)
        .map_err(|e| format_err!(ErrorKind::Snafu, "cannot canonicalize {}: {}", path.display(), e))?;

    let euid = unsafe { libc::geteuid() };

    let mut current: Option<&Path> = Some(canonical.as_path());
    while let Some(dir) = current {
        let meta = fs::symlink_metadata(dir)
            .map_err(|e| format_err!(ErrorKind::Snafu, "cannot stat {}: {}", dir.display(), e))?;

        if !meta.is_dir() {
            return Err(format_err!(ErrorKind::BadArg, "{} is not a directory", dir.display()).into());
        }

        if meta.uid() != 0 && meta.uid() != euid {
            complain(opts, format!("invalid ownership of {}", dir.display()))?;
        }

        let mode = meta.mode();
        let sticky = mode & libc::S_ISVTX as u32 != 0;
        let trusted = opts.trusted_gid.is_some_and(|gid| meta.gid() == gid);
        if mode & 0o020 != 0 && !sticky && !trusted {
            complain(
                opts,
                format!("group-writable directory without sticky bit: {}", dir.display()),
            )?;
        }
        if mode & 0o002 != 0 && !sticky {
            complain(
                opts,
                format!("world-writable directory without sticky bit: {}", dir.display()),
            )?;
        }

        current = dir.parent();
    }

    Ok(())
}

/// Either fail with `BadArg` or, when `opts.force` downgrades startup
/// security checks to warnings, log and continue.
fn complain(opts: &CheckOptions, message: String) -> Result<(), Error> {
    if opts.force {
        warn!("{} (continuing: force enabled)", message);
        Ok(())
    } else {
        Err(format_err!(ErrorKind::BadArg, "{}", message).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn accepts_private_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o700)).unwrap();
        assert!(check_directory(dir.path()).is_ok());
    }

    #[test]
    fn rejects_world_writable_directory_without_sticky() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o777)).unwrap();
        assert!(check_directory(&sub).is_err());
    }

    #[test]
    fn allows_world_writable_with_sticky_bit() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o1777)).unwrap();
        assert!(check_directory(&sub).is_ok());
    }

    #[test]
    fn allows_group_writable_owned_by_trusted_gid_without_sticky() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o770)).unwrap();
        let gid = fs::metadata(&sub).unwrap().gid();
        let opts = CheckOptions {
            trusted_gid: Some(gid),
            force: false,
        };
        assert!(check_directory_with(&sub, &opts).is_ok());
    }

    #[test]
    fn force_downgrades_a_violation_to_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o777)).unwrap();
        assert!(check_directory(&sub).is_err());

        let opts = CheckOptions {
            trusted_gid: None,
            force: true,
        };
        assert!(check_directory_with(&sub, &opts).is_ok());
    }
}
