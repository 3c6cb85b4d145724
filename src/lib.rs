//! `munge-core`: the credential engine behind MUNGE, an authentication
//! service for issuing and validating short-lived, host-cluster-scoped
//! credentials that cryptographically bind a requester's identity (UID,
//! GID), an optional payload, and a set of restrictions.
//!
//! This crate is the engine a daemon embeds, not the daemon itself: it
//! owns the wire format, the encode/decode pipelines, replay detection,
//! the group-membership cache, the timer service and the worker-pool
//! dispatcher. The two binaries in this workspace (`munged`, the daemon,
//! and `mungetool`, a minimal round-trip CLI) are thin front ends over the
//! types exported here.
//!
//! # Example
//!
//! ```no_run
//! use munge_core::authentication::PeerIdentity;
//! use munge_core::crypto::{CipherType, MacType, ZipType};
//! use munge_core::encode::{self, EncodeContext};
//! use munge_core::subkey::Subkeys;
//! use munge_core::wire::EncodeRequest;
//!
//! let subkeys = Subkeys::derive("/etc/munge/munge.key".as_ref())?;
//! let ctx = EncodeContext {
//!     subkeys: &subkeys,
//!     default_cipher: CipherType::Aes128,
//!     default_mac: MacType::Sha256,
//!     default_zip: ZipType::None,
//!     default_ttl: 300,
//!     max_ttl: 3600,
//!     origin_addr: Some([127, 0, 0, 1]),
//! };
//! let peer = PeerIdentity { uid: 1000, gid: 1000 };
//! let armored = encode::encode(&ctx, peer, &EncodeRequest::default(), 0)?;
//! assert!(armored.starts_with("MUNGE:"));
//! # Ok::<(), munge_core::error::Error>(())
//! ```

#[macro_use]
extern crate log;

#[macro_use]
mod macros;

pub mod authentication;
pub mod config;
pub mod cred;
pub mod crypto;
pub mod decode;
pub mod dispatch;
pub mod encode;
pub mod error;
pub mod gids;
pub mod origin;
pub mod replay;
pub mod subkey;
pub mod timer;
pub mod wire;

pub use crate::error::{Error, ErrorKind};
