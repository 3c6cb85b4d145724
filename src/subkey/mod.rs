//! Subkey derivation from the shared secret key file (§4.2).
//!
//! Both subkeys are derived once, at daemon startup, and held for the life
//! of the process. They are zeroized on drop so a core dump or swapped page
//! doesn't leak the raw key material after shutdown.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use log::warn;
use sha1::{Digest, Sha1};
use zeroize::Zeroize;

use crate::config::path_security::CheckOptions;
use crate::error::{Error, ErrorKind};
use anomaly::format_err;

/// Minimum size enforced on the key file, to keep its entropy comfortably
/// above the widest subkey (`SHA-512`, 64 bytes) it might be asked to seed.
pub const MIN_KEY_LEN: u64 = 1024;

/// `dek_subkey`/`mac_subkey`, derived once from the shared key file and held
/// for the daemon's lifetime.
pub struct Subkeys {
    dek: Vec<u8>,
    mac: Vec<u8>,
}

impl Subkeys {
    /// Read `key_file`, validate its permissions and size, and derive both
    /// subkeys: `SHA1(K || "1")` and `SHA1(K || "2")`.
    pub fn derive(key_file: &Path) -> Result<Self, Error> {
        Self::derive_with(key_file, &CheckOptions::default())
    }

    /// As [`Subkeys::derive`], but honoring the daemon's `trusted_group` and
    /// `force` configuration knobs when walking the key file's directory
    /// ancestry (§6).
    pub fn derive_with(key_file: &Path, opts: &CheckOptions) -> Result<Self, Error> {
        check_key_file_security(key_file, opts)?;

        let mut key = fs::read(key_file)
            .map_err(|e| format_err!(ErrorKind::Snafu, "couldn't read key file: {}", e))?;

        if (key.len() as u64) < MIN_KEY_LEN {
            key.zeroize();
            return Err(format_err!(
                ErrorKind::BadArg,
                "key file shorter than {} bytes",
                MIN_KEY_LEN
            )
            .into());
        }

        let dek = derive_one(&key, b"1");
        let mac = derive_one(&key, b"2");

        key.zeroize();
        Ok(Subkeys { dek, mac })
    }

    /// The subkey used to derive the per-credential data-encryption key
    pub fn dek(&self) -> &[u8] {
        &self.dek
    }

    /// The subkey used as the HMAC key over OUTER||INNER
    pub fn mac(&self) -> &[u8] {
        &self.mac
    }
}

impl Drop for Subkeys {
    fn drop(&mut self) {
        self.dek.zeroize();
        self.mac.zeroize();
    }
}

fn derive_one(key: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(key);
    hasher.update(suffix);
    hasher.finalize().to_vec()
}

/// Enforce the permission/ownership checks from §4.2: a regular file, not a
/// symlink, owned by the running daemon's effective UID, not group/world
/// readable or writable. A symlink or wrong file type is always fatal —
/// `force` only downgrades the ownership and mode checks, matching the
/// directory walk's own leniency.
fn check_key_file_security(path: &Path, opts: &CheckOptions) -> Result<(), Error> {
    let meta = fs::symlink_metadata(path)
        .map_err(|e| format_err!(ErrorKind::Snafu, "couldn't stat key file: {}", e))?;

    if meta.file_type().is_symlink() {
        return Err(format_err!(ErrorKind::BadArg, "key file must not be a symlink").into());
    }
    if !meta.is_file() {
        return Err(format_err!(ErrorKind::BadArg, "key file must be a regular file").into());
    }

    let running_uid = unsafe { libc::geteuid() };
    if meta.uid() != running_uid {
        complain(opts, "key file is not owned by this process".to_string())?;
    }

    if meta.mode() & 0o077 != 0 {
        complain(
            opts,
            "key file must not be group- or world-accessible".to_string(),
        )?;
    }

    crate::config::path_security::check_directory_with(
        path.parent().unwrap_or_else(|| Path::new("/")),
        opts,
    )?;

    Ok(())
}

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
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn write_key(dir: &tempfile::TempDir, len: usize) -> std::path::PathBuf {
        let path = dir.path().join("munge.key");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(&vec![0x5a; len]).unwrap();
        file.set_permissions(fs::Permissions::from_mode(0o600)).unwrap();
        path
    }

    #[test]
    fn derives_distinct_dek_and_mac_subkeys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_key(&dir, 1024);

        let subkeys = Subkeys::derive(&path).unwrap();
        assert_eq!(subkeys.dek().len(), 20);
        assert_eq!(subkeys.mac().len(), 20);
        assert_ne!(subkeys.dek(), subkeys.mac());
    }

    #[test]
    fn rejects_short_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_key(&dir, 16);
        assert!(Subkeys::derive(&path).is_err());
    }

    #[test]
    fn rejects_group_readable_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_key(&dir, 1024);
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();
        assert!(Subkeys::derive(&path).is_err());
    }

    #[test]
    fn force_allows_an_otherwise_rejected_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_key(&dir, 1024);
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        let opts = CheckOptions {
            trusted_gid: None,
            force: true,
        };
        assert!(Subkeys::derive_with(&path, &opts).is_ok());
    }

    #[test]
    fn derivation_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_key(&dir, 1024);

        let a = Subkeys::derive(&path).unwrap();
        let b = Subkeys::derive(&path).unwrap();
        assert_eq!(a.dek(), b.dek());
        assert_eq!(a.mac(), b.mac());
    }
}
