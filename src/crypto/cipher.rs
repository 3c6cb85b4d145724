//! Block cipher backends: AES-128/256, CAST5 and Blowfish, all run in CBC
//! mode with PKCS#5/7 padding, exactly as named by the `cipher_type` field of
//! the credential's OUTER region.

use aes::{Aes128, Aes256};
use blowfish::Blowfish;
use cast5::Cast5;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cbc::{Decryptor, Encryptor};

use crate::error::{Error, ErrorKind};
use anomaly::format_err;

/// Algorithms usable for `cipher_type`, dense and matching the wire tags
/// exactly (`NONE = 0 .. AES256 = 4`).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum CipherType {
    /// Encryption disabled
    None = 0,
    /// Blowfish CBC, 64-bit block, 128-bit key
    Blowfish = 1,
    /// CAST5 CBC, 64-bit block, 128-bit key
    Cast5 = 2,
    /// AES-128 CBC, 128-bit block, 128-bit key
    Aes128 = 3,
    /// AES-256 CBC, 128-bit block, 256-bit key
    Aes256 = 4,
}

impl CipherType {
    /// Parse a wire-format tag, rejecting anything not enabled in this build
    pub fn from_u8(tag: u8) -> Result<Self, Error> {
        Ok(match tag {
            0 => CipherType::None,
            1 => CipherType::Blowfish,
            2 => CipherType::Cast5,
            3 => CipherType::Aes128,
            4 => CipherType::Aes256,
            other => return Err(format_err!(ErrorKind::BadCipher, "unknown cipher type: {}", other).into()),
        })
    }

    /// Serialize as the wire-format tag
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Block size in bytes (0 for `None`)
    pub fn block_size(self) -> usize {
        match self {
            CipherType::None => 0,
            CipherType::Blowfish | CipherType::Cast5 => 8,
            CipherType::Aes128 | CipherType::Aes256 => 16,
        }
    }

    /// IV size in bytes; equal to the block size, 0 for `None`
    pub fn iv_size(self) -> usize {
        self.block_size()
    }

    /// Data-encryption key size in bytes (0 for `None`)
    pub fn key_size(self) -> usize {
        match self {
            CipherType::None => 0,
            CipherType::Blowfish | CipherType::Cast5 | CipherType::Aes128 => 16,
            CipherType::Aes256 => 32,
        }
    }

    /// Human-readable name, used by config parsing and `mungetool`
    pub fn name(self) -> &'static str {
        match self {
            CipherType::None => "none",
            CipherType::Blowfish => "blowfish",
            CipherType::Cast5 => "cast5",
            CipherType::Aes128 => "aes128",
            CipherType::Aes256 => "aes256",
        }
    }
}

impl std::str::FromStr for CipherType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(match s {
            "none" => CipherType::None,
            "blowfish" => CipherType::Blowfish,
            "cast5" => CipherType::Cast5,
            "aes128" => CipherType::Aes128,
            "aes256" => CipherType::Aes256,
            other => return Err(format_err!(ErrorKind::BadCipher, "unknown cipher name: {}", other).into()),
        })
    }
}

/// Result of a CBC decryption attempt. `padding_ok` is reported rather than
/// surfaced as an error so callers (the decode pipeline) can defer the
/// failure past the MAC check, per the padding-oracle discipline in §9 of
/// the design notes: a padding failure and a MAC mismatch must be
/// indistinguishable to the remote caller.
pub struct Decrypted {
    /// Decrypted bytes. If `padding_ok` is false this is the raw,
    /// still-padded CBC output and MUST NOT be trusted as real plaintext;
    /// it exists only so the MAC check downstream has *something* to hash.
    pub data: Vec<u8>,
    /// Whether PKCS#5/7 unpadding succeeded
    pub padding_ok: bool,
}

/// Encrypt `plaintext` under `cipher`/`key`/`iv` using CBC + PKCS#5/7 padding
pub fn encrypt(cipher: CipherType, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    match cipher {
        CipherType::None => Ok(plaintext.to_vec()),
        CipherType::Blowfish => encrypt_generic::<Blowfish>(key, iv, plaintext),
        CipherType::Cast5 => encrypt_generic::<Cast5>(key, iv, plaintext),
        CipherType::Aes128 => encrypt_generic::<Aes128>(key, iv, plaintext),
        CipherType::Aes256 => encrypt_generic::<Aes256>(key, iv, plaintext),
    }
}

/// Decrypt `ciphertext` under `cipher`/`key`/`iv`. See [`Decrypted`] for why
/// this never returns an `Err` for a padding failure.
pub fn decrypt(cipher: CipherType, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Decrypted, Error> {
    match cipher {
        CipherType::None => Ok(Decrypted {
            data: ciphertext.to_vec(),
            padding_ok: true,
        }),
        CipherType::Blowfish => decrypt_generic::<Blowfish>(key, iv, ciphertext),
        CipherType::Cast5 => decrypt_generic::<Cast5>(key, iv, ciphertext),
        CipherType::Aes128 => decrypt_generic::<Aes128>(key, iv, ciphertext),
        CipherType::Aes256 => decrypt_generic::<Aes256>(key, iv, ciphertext),
    }
}

fn encrypt_generic<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error>
where
    C: cbc::cipher::BlockCipher + cbc::cipher::BlockSizeUser + cbc::cipher::KeySizeUser + KeyIvInit + BlockEncryptMut,
{
    let encryptor = Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| format_err!(ErrorKind::Snafu, "bad cipher key/iv length: {}", e))?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn decrypt_generic<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Decrypted, Error>
where
    C: cbc::cipher::BlockCipher + cbc::cipher::BlockSizeUser + cbc::cipher::KeySizeUser + KeyIvInit + BlockDecryptMut,
{
    let decryptor = Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| format_err!(ErrorKind::Snafu, "bad cipher key/iv length: {}", e))?;

    let mut buf = ciphertext.to_vec();
    match decryptor.decrypt_padded_mut::<Pkcs7>(&mut buf) {
        Ok(plaintext) => {
            let len = plaintext.len();
            buf.truncate(len);
            Ok(Decrypted { data: buf, padding_ok: true })
        }
        Err(_) => Ok(Decrypted { data: buf, padding_ok: false }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes128_round_trips() {
        let key = [0x42u8; 16];
        let iv = [0x24u8; 16];
        let plaintext = b"the quick brown fox";

        let ciphertext = encrypt(CipherType::Aes128, &key, &iv, plaintext).unwrap();
        let decrypted = decrypt(CipherType::Aes128, &key, &iv, &ciphertext).unwrap();

        assert!(decrypted.padding_ok);
        assert_eq!(decrypted.data, plaintext);
    }

    #[test]
    fn corrupted_ciphertext_flags_bad_padding_without_panicking() {
        let key = [0x11u8; 16];
        let iv = [0x22u8; 16];
        let mut ciphertext = encrypt(CipherType::Aes128, &key, &iv, b"hello world").unwrap();
        *ciphertext.last_mut().unwrap() ^= 0xff;

        let decrypted = decrypt(CipherType::Aes128, &key, &iv, &ciphertext).unwrap();
        assert!(!decrypted.padding_ok);
    }

    #[test]
    fn blowfish_and_cast5_round_trip() {
        let key = [0x7au8; 16];
        let iv = [0x01u8; 8];
        for cipher in [CipherType::Blowfish, CipherType::Cast5] {
            let ciphertext = encrypt(cipher, &key, &iv, b"short msg").unwrap();
            let decrypted = decrypt(cipher, &key, &iv, &ciphertext).unwrap();
            assert!(decrypted.padding_ok);
            assert_eq!(decrypted.data, b"short msg");
        }
    }

    #[test]
    fn key_size_covers_mac_size_invariant() {
        assert!(CipherType::Aes256.key_size() <= 64); // SHA512 tag length
        assert!(CipherType::Aes128.key_size() <= 16); // MD5 tag length
    }
}
