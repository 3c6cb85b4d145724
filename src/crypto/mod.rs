//! Cryptographic primitives used by the encode/decode pipelines: block
//! ciphers, MACs, compression, the CSPRNG, constant-time comparison and the
//! base64 "MUNGE armor" used to make a credential safe to pass around as
//! text (§4.1).

pub mod cipher;
pub mod mac;
pub mod rand;
pub mod zip;

pub use cipher::{CipherType, Decrypted};
pub use mac::MacType;
pub use rand::{pseudo_bytes, rand_bytes, Prng};
pub use zip::ZipType;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use subtle::ConstantTimeEq;

use crate::error::{Error, ErrorKind};
use anomaly::format_err;

/// The text prefix every armored credential begins with.
pub const ARMOR_PREFIX: &str = "MUNGE:";

/// The text suffix appended after the base64 payload.
pub const ARMOR_SUFFIX: &str = ":";

/// Compare two byte slices for equality in constant time, regardless of
/// where the first difference falls. Used for the MAC comparison in decode
/// (§4.7 step 7) so that timing cannot leak how many leading bytes matched.
pub fn consttime_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Upper bound on the base64 text length for an `n`-byte binary input
pub fn base64_encode_len(n: usize) -> usize {
    ARMOR_PREFIX.len() + ARMOR_SUFFIX.len() + (n + 2) / 3 * 4
}

/// Upper bound on the decoded binary length for an `n`-byte base64 input
pub fn base64_decode_len(n: usize) -> usize {
    n / 4 * 3 + 3
}

/// Wrap a binary credential in `MUNGE:<base64>:` armor
pub fn base64_encode(data: &[u8]) -> String {
    format!("{}{}{}", ARMOR_PREFIX, BASE64.encode(data), ARMOR_SUFFIX)
}

/// Strip `MUNGE:...:` armor and base64-decode the payload. Whitespace
/// anywhere in the body is ignored (§4.1), so a credential that's been
/// wrapped across multiple lines still decodes.
pub fn base64_decode(text: &str) -> Result<Vec<u8>, Error> {
    let body = text
        .strip_prefix(ARMOR_PREFIX)
        .ok_or_else(|| Error::from(ErrorKind::BadCred))?;
    let body = body.strip_suffix(ARMOR_SUFFIX).unwrap_or(body);
    let body: String = body.chars().filter(|c| !c.is_whitespace()).collect();

    BASE64
        .decode(body)
        .map_err(|e| format_err!(ErrorKind::BadCred, "malformed base64: {}", e).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consttime_equal_rejects_length_mismatch_and_content_mismatch() {
        assert!(consttime_equal(b"abc", b"abc"));
        assert!(!consttime_equal(b"abc", b"abd"));
        assert!(!consttime_equal(b"abc", b"ab"));
    }

    #[test]
    fn armor_round_trips() {
        let data = b"some credential bytes, not actually valid";
        let armored = base64_encode(data);
        assert!(armored.starts_with(ARMOR_PREFIX));
        let decoded = base64_decode(&armored).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn armor_rejects_missing_prefix() {
        assert!(base64_decode("not armored at all").is_err());
    }

    #[test]
    fn armor_tolerates_whitespace_wrapped_across_lines() {
        let data = b"some credential bytes, not actually valid";
        let armored = base64_encode(data);
        let body = armored
            .strip_prefix(ARMOR_PREFIX)
            .unwrap()
            .strip_suffix(ARMOR_SUFFIX)
            .unwrap();
        let wrapped = format!(
            "{}\n {}\t{}\n{}",
            ARMOR_PREFIX,
            &body[..body.len() / 2],
            &body[body.len() / 2..],
            ARMOR_SUFFIX
        );
        assert_eq!(base64_decode(&wrapped).unwrap(), data);
    }
}
