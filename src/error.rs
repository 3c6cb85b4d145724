//! The crate-wide error taxonomy.
//!
//! Every public operation in this crate maps onto exactly one [`ErrorKind`].
//! Kinds are stable; the `Display` message attached to an [`Error`] is
//! informational only and may change between releases.

use anomaly::{BoxError, Context};
use thiserror::Error;

/// Errors produced by the credential engine
pub type Error = anomaly::Error<ErrorKind>;

/// Stable error kinds, one per outcome documented for the engine.
///
/// `Success` is deliberately not a variant here: it's the absence of an
/// `Err`. For the three "soft" credential failures (`CredExpired`,
/// `CredRewound`, `CredReplayed`) the decoded [`crate::decode::Metadata`] is
/// still made available to the caller alongside the error; see
/// [`crate::decode::DecodeOutcome`].
#[derive(Copy, Clone, Debug, Eq, Error, PartialEq)]
pub enum ErrorKind {
    /// Internal invariant violation or OS call failure not otherwise classified
    #[error("internal error")]
    Snafu,

    /// Caller supplied a null or malformed request
    #[error("invalid argument")]
    BadArg,

    /// Request or field exceeded the configured maximum
    #[error("exceeded maximum message length")]
    BadLength,

    /// Output buffer too small
    #[error("buffer overflow")]
    Overflow,

    /// Allocation failure
    #[error("out of memory")]
    NoMemory,

    /// Transport failure, including retry-count exhaustion
    #[error("socket communication error")]
    Socket,

    /// Structural credential error (truncation, unknown enum value, bad padding)
    #[error("invalid credential format")]
    BadCred,

    /// Unrecognized credential wire version
    #[error("invalid credential version")]
    BadVersion,

    /// `cipher_type` names an algorithm this build doesn't enable
    #[error("invalid cipher type")]
    BadCipher,

    /// `mac_type` names an algorithm this build doesn't enable, or is `NONE`
    #[error("invalid MAC type")]
    BadMac,

    /// `zip_type` names an algorithm this build doesn't enable
    #[error("invalid compression type")]
    BadZip,

    /// Realm named in the credential is not recognized by this daemon
    #[error("unrecognized security realm")]
    BadRealm,

    /// MAC mismatch **or** ciphertext padding error; the two are
    /// deliberately indistinguishable to the caller (see §9, Vaudenay)
    #[error("invalid credential")]
    CredInvalid,

    /// `decode_time > encode_time + effective_ttl`
    #[error("expired credential")]
    CredExpired,

    /// `decode_time < encode_time - skew`
    #[error("rewound credential, future ctime")]
    CredRewound,

    /// Fingerprint already present in the replay store
    #[error("replayed credential")]
    CredReplayed,

    /// `auth_uid`/`auth_gid` restriction not satisfied
    #[error("unauthorized credential decode")]
    CredUnauthorized,
}

impl ErrorKind {
    /// Attach a source error to this kind, producing an error [`Context`]
    pub fn context(self, source: impl Into<BoxError>) -> Context<ErrorKind> {
        Context::new(self, Some(source.into()))
    }

    /// Stable numeric code sent over the wire in a response's error field
    pub fn to_u8(self) -> u8 {
        match self {
            ErrorKind::Snafu => 1,
            ErrorKind::BadArg => 2,
            ErrorKind::BadLength => 3,
            ErrorKind::Overflow => 4,
            ErrorKind::NoMemory => 5,
            ErrorKind::Socket => 6,
            ErrorKind::BadCred => 7,
            ErrorKind::BadVersion => 8,
            ErrorKind::BadCipher => 9,
            ErrorKind::BadMac => 10,
            ErrorKind::BadZip => 11,
            ErrorKind::BadRealm => 12,
            ErrorKind::CredInvalid => 13,
            ErrorKind::CredExpired => 14,
            ErrorKind::CredRewound => 15,
            ErrorKind::CredReplayed => 16,
            ErrorKind::CredUnauthorized => 17,
        }
    }

    /// Inverse of [`Self::to_u8`]
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            1 => ErrorKind::Snafu,
            2 => ErrorKind::BadArg,
            3 => ErrorKind::BadLength,
            4 => ErrorKind::Overflow,
            5 => ErrorKind::NoMemory,
            6 => ErrorKind::Socket,
            7 => ErrorKind::BadCred,
            8 => ErrorKind::BadVersion,
            9 => ErrorKind::BadCipher,
            10 => ErrorKind::BadMac,
            11 => ErrorKind::BadZip,
            12 => ErrorKind::BadRealm,
            13 => ErrorKind::CredInvalid,
            14 => ErrorKind::CredExpired,
            15 => ErrorKind::CredRewound,
            16 => ErrorKind::CredReplayed,
            17 => ErrorKind::CredUnauthorized,
            _ => return None,
        })
    }

    /// Whether decode should still return metadata alongside this error,
    /// per §4.7's closing note on soft failures.
    pub fn is_soft_decode_failure(self) -> bool {
        matches!(self, ErrorKind::CredExpired | ErrorKind::CredRewound | ErrorKind::CredReplayed)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Context::new(kind, None).into()
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(context: Context<ErrorKind>) -> Self {
        Self::from(Box::new(context))
    }
}
