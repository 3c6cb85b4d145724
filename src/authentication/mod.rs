//! Peer-identity resolution: deriving the `(uid, gid)` of the process on
//! the other end of a connection (§6, "Peer identity mechanism").
//!
//! This crate targets Linux/BSD `SO_PEERCRED`-style sockets exclusively;
//! the fd-passing handshake fallback mentioned for systems lacking a native
//! peer-credential socket option is out of scope (no such platform is in
//! this crate's support matrix).

use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;

use crate::error::{Error, ErrorKind};
use anomaly::format_err;

/// The `(uid, gid)` of a connected peer.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PeerIdentity {
    pub uid: u32,
    pub gid: u32,
}

/// Resolve the peer identity of a connected Unix-domain stream socket via
/// `SO_PEERCRED` (Linux) / `LOCAL_PEERCRED` equivalents exposed by `libc`.
pub fn peer_identity(stream: &UnixStream) -> Result<PeerIdentity, Error> {
    let fd = stream.as_raw_fd();

    #[cfg(target_os = "linux")]
    {
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                &mut cred as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if rc != 0 {
            return Err(format_err!(ErrorKind::Socket, "SO_PEERCRED failed: {}", std::io::Error::last_os_error()).into());
        }
        Ok(PeerIdentity {
            uid: cred.uid,
            gid: cred.gid,
        })
    }

    #[cfg(not(target_os = "linux"))]
    {
        let mut euid: libc::uid_t = 0;
        let mut egid: libc::gid_t = 0;
        let rc = unsafe { libc::getpeereid(fd, &mut euid, &mut egid) };
        if rc != 0 {
            return Err(format_err!(ErrorKind::Socket, "getpeereid failed: {}", std::io::Error::last_os_error()).into());
        }
        Ok(PeerIdentity { uid: euid, gid: egid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_identity_of_a_socketpair_matches_our_own_credentials() {
        let (a, _b) = UnixStream::pair().unwrap();
        let identity = peer_identity(&a).unwrap();
        let our_uid = unsafe { libc::geteuid() };
        let our_gid = unsafe { libc::getegid() };
        assert_eq!(identity.uid, our_uid);
        assert_eq!(identity.gid, our_gid);
    }
}
