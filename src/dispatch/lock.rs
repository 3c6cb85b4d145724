//! Advisory exclusive lock ensuring only one daemon instance binds a given
//! socket path at a time (§6).
//!
//! The lock file sits next to the socket (`<socket>.lock`) so its lifetime
//! and directory-security posture track the socket's own. It is held open
//! for the life of the process; the kernel drops the `flock` automatically
//! on exit, clean or not.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use anomaly::format_err;

use crate::error::{Error, ErrorKind};

/// An open, `flock`-held lock file. Dropping this releases the lock.
pub struct LockFile {
    path: PathBuf,
    file: File,
}

impl LockFile {
    /// Derive `<socket_path>.lock` and take an exclusive, non-blocking lock
    /// on it. Fails with [`ErrorKind::Socket`] if another daemon already
    /// holds it.
    pub fn acquire(socket_path: &Path) -> Result<Self, Error> {
        let mut path = socket_path.as_os_str().to_owned();
        path.push(".lock");
        let path = PathBuf::from(path);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| format_err!(ErrorKind::Snafu, "couldn't open lock file {}: {}", path.display(), e))?;

        let rv = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rv != 0 {
            let errno = std::io::Error::last_os_error();
            return Err(format_err!(
                ErrorKind::Socket,
                "another daemon already holds the lock on {}: {}",
                path.display(),
                errno
            )
            .into());
        }

        Ok(LockFile { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_on_same_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("munge.socket.2");

        let first = LockFile::acquire(&socket_path).unwrap();
        let second = LockFile::acquire(&socket_path);
        assert!(second.is_err());
        drop(first);

        let third = LockFile::acquire(&socket_path);
        assert!(third.is_ok());
    }
}
