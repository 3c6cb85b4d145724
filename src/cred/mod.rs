//! The credential wire structures: OUTER, INNER, and the assembled
//! [`Credential`] the encode/decode pipelines pack and unpack (§3).

use byteorder::{BigEndian, ByteOrder};
use zeroize::Zeroize;

use crate::crypto::{CipherType, MacType, ZipType};
use crate::error::{Error, ErrorKind};
use anomaly::format_err;

/// Current wire version this crate encodes and requires on decode.
pub const VERSION: u8 = 3;

/// Sentinel meaning "credential represents/authorizes any uid".
pub const UID_ANY: u32 = u32::MAX;

/// Sentinel meaning "credential represents/authorizes any gid".
pub const GID_ANY: u32 = u32::MAX;

/// Fixed length of the random salt at the head of INNER.
pub const SALT_LEN: usize = 8;

/// The cleartext-but-MAC-covered header of a credential.
#[derive(Clone, Debug)]
pub struct Outer {
    pub version: u8,
    pub cipher_type: CipherType,
    pub mac_type: MacType,
    pub zip_type: ZipType,
    pub realm: Vec<u8>,
    /// Present iff `cipher_type != CipherType::None`
    pub iv: Vec<u8>,
}

impl Outer {
    /// Serialize per §3's field order: version, cipher, mac, zip, realm_len,
    /// realm, iv (iv omitted entirely when cipher is `NONE`).
    pub fn pack(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5 + self.realm.len() + self.iv.len());
        buf.push(self.version);
        buf.push(self.cipher_type.to_u8());
        buf.push(self.mac_type.to_u8());
        buf.push(self.zip_type.to_u8());
        buf.push(self.realm.len() as u8);
        buf.extend_from_slice(&self.realm);
        if self.cipher_type != CipherType::None {
            buf.extend_from_slice(&self.iv);
        }
        buf
    }

    /// Parse OUTER from the front of `buf`, returning it plus the number of
    /// bytes consumed.
    pub fn unpack(buf: &[u8]) -> Result<(Self, usize), Error> {
        if buf.len() < 5 {
            return Err(Error::from(ErrorKind::BadCred));
        }
        let version = buf[0];
        if version != VERSION {
            return Err(Error::from(ErrorKind::BadVersion));
        }
        let cipher_type = CipherType::from_u8(buf[1])?;
        let mac_type = MacType::from_u8(buf[2])?;
        let zip_type = ZipType::from_u8(buf[3])?;
        let realm_len = buf[4] as usize;

        let mut offset = 5;
        if buf.len() < offset + realm_len {
            return Err(Error::from(ErrorKind::BadCred));
        }
        let realm = buf[offset..offset + realm_len].to_vec();
        offset += realm_len;

        let iv_len = cipher_type.iv_size();
        if buf.len() < offset + iv_len {
            return Err(Error::from(ErrorKind::BadCred));
        }
        let iv = buf[offset..offset + iv_len].to_vec();
        offset += iv_len;

        Ok((
            Outer {
                version,
                cipher_type,
                mac_type,
                zip_type,
                realm,
                iv,
            },
            offset,
        ))
    }
}

/// The (possibly compressed, possibly encrypted) payload region, covered by
/// the MAC in its plaintext, decompressed form.
#[derive(Clone, Debug)]
pub struct Inner {
    pub salt: [u8; SALT_LEN],
    /// IPv4 origin address, empty if not stamped
    pub addr: Vec<u8>,
    pub encode_time: u32,
    pub ttl: u32,
    pub cred_uid: u32,
    pub cred_gid: u32,
    pub auth_uid: u32,
    pub auth_gid: u32,
    pub data: Vec<u8>,
}

impl Inner {
    /// Serialize per §3's field order.
    pub fn pack(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SALT_LEN + 1 + self.addr.len() + 24 + self.data.len());
        buf.extend_from_slice(&self.salt);
        buf.push(self.addr.len() as u8);
        buf.extend_from_slice(&self.addr);

        let mut scratch = [0u8; 4];
        for field in [
            self.encode_time,
            self.ttl,
            self.cred_uid,
            self.cred_gid,
            self.auth_uid,
            self.auth_gid,
        ] {
            BigEndian::write_u32(&mut scratch, field);
            buf.extend_from_slice(&scratch);
        }

        BigEndian::write_u32(&mut scratch, self.data.len() as u32);
        buf.extend_from_slice(&scratch);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Parse INNER from the full decrypted/decompressed plaintext buffer.
    pub fn unpack(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < SALT_LEN + 1 {
            return Err(Error::from(ErrorKind::BadCred));
        }
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&buf[..SALT_LEN]);
        let mut offset = SALT_LEN;

        let addr_len = buf[offset] as usize;
        offset += 1;
        if addr_len != 0 && addr_len != 4 {
            return Err(Error::from(ErrorKind::BadCred));
        }
        if buf.len() < offset + addr_len + 24 {
            return Err(Error::from(ErrorKind::BadCred));
        }
        let addr = buf[offset..offset + addr_len].to_vec();
        offset += addr_len;

        let mut fields = [0u32; 6];
        for field in fields.iter_mut() {
            *field = BigEndian::read_u32(&buf[offset..offset + 4]);
            offset += 4;
        }

        if buf.len() < offset + 4 {
            return Err(Error::from(ErrorKind::BadCred));
        }
        let data_len = BigEndian::read_u32(&buf[offset..offset + 4]) as usize;
        offset += 4;

        if buf.len() < offset + data_len {
            return Err(Error::from(ErrorKind::BadCred));
        }
        let data = buf[offset..offset + data_len].to_vec();

        Ok(Inner {
            salt,
            addr,
            encode_time: fields[0],
            ttl: fields[1],
            cred_uid: fields[2],
            cred_gid: fields[3],
            auth_uid: fields[4],
            auth_gid: fields[5],
            data,
        })
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.salt.zeroize();
        self.data.zeroize();
    }
}

/// An assembled, decoded credential, owning its buffers for the life of the
/// pipeline. Buffers are zeroed on drop (§3, "Lifecycles").
pub struct Credential {
    pub outer: Outer,
    pub inner: Inner,
    pub tag: Vec<u8>,
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.outer.realm.zeroize();
        self.outer.iv.zeroize();
        self.tag.zeroize();
    }
}

/// Validate the cross-field invariants from §3 that don't belong to a
/// single struct's pack/unpack: MAC size ≥ cipher key size, IV presence
/// matching cipher, and zip disabled when there's no data.
pub fn check_invariants(outer: &Outer, data_len: usize) -> Result<(), Error> {
    if outer.mac_type.size() < outer.cipher_type.key_size() {
        return Err(format_err!(ErrorKind::BadMac, "MAC too short to supply cipher key").into());
    }
    if outer.cipher_type == CipherType::None && !outer.iv.is_empty() {
        return Err(format_err!(ErrorKind::BadCred, "IV present with cipher NONE").into());
    }
    if outer.cipher_type != CipherType::None && outer.iv.len() != outer.cipher_type.iv_size() {
        return Err(format_err!(ErrorKind::BadCred, "IV length mismatch").into());
    }
    if data_len == 0 && outer.zip_type != ZipType::None {
        return Err(format_err!(ErrorKind::BadCred, "compression set with zero-length payload").into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_outer() -> Outer {
        Outer {
            version: VERSION,
            cipher_type: CipherType::Aes128,
            mac_type: MacType::Sha256,
            zip_type: ZipType::None,
            realm: b"cluster".to_vec(),
            iv: vec![0x11; 16],
        }
    }

    fn sample_inner() -> Inner {
        Inner {
            salt: [0x22; SALT_LEN],
            addr: vec![10, 0, 0, 1],
            encode_time: 1_700_000_000,
            ttl: 300,
            cred_uid: 1000,
            cred_gid: 1000,
            auth_uid: UID_ANY,
            auth_gid: GID_ANY,
            data: b"payload".to_vec(),
        }
    }

    #[test]
    fn outer_round_trips() {
        let outer = sample_outer();
        let packed = outer.pack();
        let (parsed, consumed) = Outer::unpack(&packed).unwrap();
        assert_eq!(consumed, packed.len());
        assert_eq!(parsed.version, outer.version);
        assert_eq!(parsed.cipher_type, outer.cipher_type);
        assert_eq!(parsed.realm, outer.realm);
        assert_eq!(parsed.iv, outer.iv);
    }

    #[test]
    fn outer_with_no_cipher_omits_iv() {
        let mut outer = sample_outer();
        outer.cipher_type = CipherType::None;
        outer.iv = vec![];
        let packed = outer.pack();
        let (parsed, _) = Outer::unpack(&packed).unwrap();
        assert!(parsed.iv.is_empty());
    }

    #[test]
    fn outer_rejects_wrong_version() {
        let mut outer = sample_outer();
        outer.version = 99;
        let packed = outer.pack();
        assert!(Outer::unpack(&packed).is_err());
    }

    #[test]
    fn inner_round_trips() {
        let inner = sample_inner();
        let packed = inner.pack();
        let parsed = Inner::unpack(&packed).unwrap();
        assert_eq!(parsed.salt, inner.salt);
        assert_eq!(parsed.addr, inner.addr);
        assert_eq!(parsed.encode_time, inner.encode_time);
        assert_eq!(parsed.cred_uid, inner.cred_uid);
        assert_eq!(parsed.data, inner.data);
    }

    #[test]
    fn inner_rejects_truncated_buffer() {
        let inner = sample_inner();
        let mut packed = inner.pack();
        packed.truncate(packed.len() - 1);
        assert!(Inner::unpack(&packed).is_err());
    }

    #[test]
    fn invariants_reject_mac_too_short_for_cipher_key() {
        let mut outer = sample_outer();
        outer.cipher_type = CipherType::Aes256;
        outer.mac_type = MacType::Md5;
        outer.iv = vec![0; outer.cipher_type.iv_size()];
        assert!(check_invariants(&outer, 10).is_err());
    }

    #[test]
    fn invariants_reject_zip_with_empty_payload() {
        let mut outer = sample_outer();
        outer.zip_type = ZipType::Zlib;
        assert!(check_invariants(&outer, 0).is_err());
    }
}
