//! HMAC backends: MD5, SHA-1, RIPEMD-160, SHA-256 and SHA-512, exactly the
//! five algorithms named by the `mac_type` field of the credential's OUTER
//! region. `mac_type = NONE` is a valid wire tag but is rejected by the
//! encode pipeline (a MAC is always required, §4.6 step 1).

use hmac::{Hmac, Mac as _};
use md5::Md5;
use ripemd::Ripemd160;
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use crate::error::{Error, ErrorKind};
use anomaly::format_err;

/// Algorithms usable for `mac_type`, dense and matching the wire tags exactly.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum MacType {
    /// MAC disabled -- invalid for encode, rejected as `BadMac`
    None = 0,
    /// HMAC-MD5, 128-bit digest
    Md5 = 1,
    /// HMAC-SHA-1, 160-bit digest
    Sha1 = 2,
    /// HMAC-RIPEMD-160, 160-bit digest
    Ripemd160 = 3,
    /// HMAC-SHA-256, 256-bit digest
    Sha256 = 4,
    /// HMAC-SHA-512, 512-bit digest
    Sha512 = 5,
}

impl MacType {
    /// Parse a wire-format tag
    pub fn from_u8(tag: u8) -> Result<Self, Error> {
        Ok(match tag {
            0 => MacType::None,
            1 => MacType::Md5,
            2 => MacType::Sha1,
            3 => MacType::Ripemd160,
            4 => MacType::Sha256,
            5 => MacType::Sha512,
            other => return Err(format_err!(ErrorKind::BadMac, "unknown MAC type: {}", other).into()),
        })
    }

    /// Serialize as the wire-format tag
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Tag size in bytes (0 for `None`)
    pub fn size(self) -> usize {
        match self {
            MacType::None => 0,
            MacType::Md5 => 16,
            MacType::Sha1 | MacType::Ripemd160 => 20,
            MacType::Sha256 => 32,
            MacType::Sha512 => 64,
        }
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            MacType::None => "none",
            MacType::Md5 => "md5",
            MacType::Sha1 => "sha1",
            MacType::Ripemd160 => "ripemd160",
            MacType::Sha256 => "sha256",
            MacType::Sha512 => "sha512",
        }
    }
}

impl std::str::FromStr for MacType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(match s {
            "none" => MacType::None,
            "md5" => MacType::Md5,
            "sha1" => MacType::Sha1,
            "ripemd160" => MacType::Ripemd160,
            "sha256" => MacType::Sha256,
            "sha512" => MacType::Sha512,
            other => return Err(format_err!(ErrorKind::BadMac, "unknown MAC name: {}", other).into()),
        })
    }
}

/// Compute `HMAC(key; data)`, returning the full-length tag for `mac_type`
pub fn compute(mac_type: MacType, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    Ok(match mac_type {
        MacType::None => {
            return Err(format_err!(ErrorKind::BadMac, "MAC is required").into());
        }
        MacType::Md5 => run::<Hmac<Md5>>(key, data),
        MacType::Sha1 => run::<Hmac<Sha1>>(key, data),
        MacType::Ripemd160 => run::<Hmac<Ripemd160>>(key, data),
        MacType::Sha256 => run::<Hmac<Sha256>>(key, data),
        MacType::Sha512 => run::<Hmac<Sha512>>(key, data),
    })
}

fn run<M: hmac::Mac + hmac::digest::KeyInit>(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = <M as hmac::digest::KeyInit>::new_from_slice(key).expect("HMAC accepts any key length");
    hmac::Mac::update(&mut mac, data);
    hmac::Mac::finalize(mac).into_bytes().to_vec()
}
