//! Compression backends for the INNER region: zlib and bzip2, matching the
//! two non-`NONE` tags of `zip_type`.

use std::io::{Read, Write};

use bzip2::read::{BzDecoder, BzEncoder};
use bzip2::Compression as BzCompression;
use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression as ZlibCompression;

use crate::error::{Error, ErrorKind};
use anomaly::format_err;

/// Hard cap on decompressed size, independent of `MAX_MESSAGE_LEN`, to bound
/// zip-bomb style inputs during decode (§4.7 step 8).
pub const MAX_DECOMPRESSED_LEN: usize = 16 * 1024 * 1024;

/// Algorithms usable for `zip_type`, dense and matching the wire tags exactly.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum ZipType {
    /// Compression disabled
    None = 0,
    /// bzip2, by Julian Seward
    Bzlib = 1,
    /// zlib "deflate", by Gailly & Adler
    Zlib = 2,
}

impl ZipType {
    /// Parse a wire-format tag
    pub fn from_u8(tag: u8) -> Result<Self, Error> {
        Ok(match tag {
            0 => ZipType::None,
            1 => ZipType::Bzlib,
            2 => ZipType::Zlib,
            other => return Err(format_err!(ErrorKind::BadZip, "unknown zip type: {}", other).into()),
        })
    }

    /// Serialize as the wire-format tag
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            ZipType::None => "none",
            ZipType::Bzlib => "bzlib",
            ZipType::Zlib => "zlib",
        }
    }
}

impl std::str::FromStr for ZipType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(match s {
            "none" => ZipType::None,
            "bzlib" => ZipType::Bzlib,
            "zlib" => ZipType::Zlib,
            other => return Err(format_err!(ErrorKind::BadZip, "unknown zip name: {}", other).into()),
        })
    }
}

/// Compress `data`. Returns `None` if compression produced output that is
/// not strictly shorter than the input -- per §4.6 step 8 the caller must
/// then disable compression entirely rather than keep the larger output.
pub fn compress(zip: ZipType, data: &[u8]) -> Result<Option<Vec<u8>>, Error> {
    let compressed = match zip {
        ZipType::None => return Ok(None),
        ZipType::Zlib => {
            let mut encoder = ZlibEncoder::new(data, ZlibCompression::default());
            let mut out = Vec::new();
            encoder
                .read_to_end(&mut out)
                .map_err(|e| format_err!(ErrorKind::Snafu, "zlib compress failed: {}", e))?;
            out
        }
        ZipType::Bzlib => {
            let mut encoder = BzEncoder::new(data, BzCompression::default());
            let mut out = Vec::new();
            encoder
                .read_to_end(&mut out)
                .map_err(|e| format_err!(ErrorKind::Snafu, "bzip2 compress failed: {}", e))?;
            out
        }
    };

    if compressed.len() < data.len() {
        Ok(Some(compressed))
    } else {
        Ok(None)
    }
}

/// Decompress `data`, rejecting anything that would exceed
/// [`MAX_DECOMPRESSED_LEN`] once inflated.
pub fn decompress(zip: ZipType, data: &[u8]) -> Result<Vec<u8>, Error> {
    match zip {
        ZipType::None => Ok(data.to_vec()),
        ZipType::Zlib => {
            let mut decoder = ZlibDecoder::new(data).take(MAX_DECOMPRESSED_LEN as u64 + 1);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|_| Error::from(ErrorKind::CredInvalid))?;
            if out.len() > MAX_DECOMPRESSED_LEN {
                return Err(ErrorKind::CredInvalid.into());
            }
            Ok(out)
        }
        ZipType::Bzlib => {
            let mut decoder = BzDecoder::new(data).take(MAX_DECOMPRESSED_LEN as u64 + 1);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|_| Error::from(ErrorKind::CredInvalid))?;
            if out.len() > MAX_DECOMPRESSED_LEN {
                return Err(ErrorKind::CredInvalid.into());
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zlib_round_trips() {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let compressed = compress(ZipType::Zlib, data).unwrap().expect("should shrink");
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(ZipType::Zlib, &compressed).unwrap(), data);
    }

    #[test]
    fn bzlib_round_trips() {
        let data = vec![0x42u8; 4096];
        let compressed = compress(ZipType::Bzlib, &data).unwrap().expect("should shrink");
        assert_eq!(decompress(ZipType::Bzlib, &compressed).unwrap(), data);
    }

    #[test]
    fn incompressible_short_input_disables_compression() {
        // Random-looking short input rarely shrinks under either codec.
        let data = [0xde, 0xad, 0xbe, 0xef];
        assert!(compress(ZipType::Zlib, &data).unwrap().is_none());
    }
}
