//! Request payloads for `ENC_REQ`/`DEC_REQ` frames.

use super::fields::{get_bytes, get_bytes_opt, get_u32, get_u8, read_fields, FieldWriter};
use crate::cred::{GID_ANY, UID_ANY};
use crate::crypto::{CipherType, MacType, ZipType};
use crate::error::Error;

mod tag {
    pub const CIPHER_TYPE: u8 = 1;
    pub const MAC_TYPE: u8 = 2;
    pub const ZIP_TYPE: u8 = 3;
    pub const REALM: u8 = 4;
    pub const TTL: u8 = 5;
    pub const AUTH_UID: u8 = 6;
    pub const AUTH_GID: u8 = 7;
    pub const DATA: u8 = 8;
    pub const ARMORED: u8 = 9;
}

/// `DEFAULT` sentinel for the request-side enums: resolved against the
/// daemon's configured defaults before anything touches the wire format
/// (§4.6 step 1). The wire-format enums themselves never carry this value.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Choice<T> {
    Default,
    Explicit(T),
}

impl<T: Copy> Choice<T> {
    pub fn resolve(self, default: T) -> T {
        match self {
            Choice::Default => default,
            Choice::Explicit(t) => t,
        }
    }
}

/// An `ENC_REQ` payload: the fields a client supplies to ask the daemon to
/// mint a new credential.
#[derive(Clone, Debug)]
pub struct EncodeRequest {
    pub cipher_type: Choice<CipherType>,
    pub mac_type: Choice<MacType>,
    pub zip_type: Choice<ZipType>,
    pub realm: Vec<u8>,
    pub ttl: Choice<u32>,
    pub auth_uid: u32,
    pub auth_gid: u32,
    pub data: Vec<u8>,
}

impl Default for EncodeRequest {
    fn default() -> Self {
        EncodeRequest {
            cipher_type: Choice::Default,
            mac_type: Choice::Default,
            zip_type: Choice::Default,
            realm: Vec::new(),
            ttl: Choice::Default,
            auth_uid: UID_ANY,
            auth_gid: GID_ANY,
            data: Vec::new(),
        }
    }
}

impl EncodeRequest {
    pub fn pack(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        if let Choice::Explicit(c) = self.cipher_type {
            w.put_u8(tag::CIPHER_TYPE, c.to_u8());
        }
        if let Choice::Explicit(m) = self.mac_type {
            w.put_u8(tag::MAC_TYPE, m.to_u8());
        }
        if let Choice::Explicit(z) = self.zip_type {
            w.put_u8(tag::ZIP_TYPE, z.to_u8());
        }
        if !self.realm.is_empty() {
            w.put_bytes(tag::REALM, &self.realm);
        }
        if let Choice::Explicit(ttl) = self.ttl {
            w.put_u32(tag::TTL, ttl);
        }
        w.put_u32(tag::AUTH_UID, self.auth_uid);
        w.put_u32(tag::AUTH_GID, self.auth_gid);
        w.put_bytes(tag::DATA, &self.data);
        w.finish()
    }

    pub fn unpack(buf: &[u8]) -> Result<Self, Error> {
        let fields = read_fields(buf)?;

        let cipher_type = match fields.get(&tag::CIPHER_TYPE) {
            Some(b) if b.len() == 1 => Choice::Explicit(CipherType::from_u8(b[0])?),
            _ => Choice::Default,
        };
        let mac_type = match fields.get(&tag::MAC_TYPE) {
            Some(b) if b.len() == 1 => Choice::Explicit(MacType::from_u8(b[0])?),
            _ => Choice::Default,
        };
        let zip_type = match fields.get(&tag::ZIP_TYPE) {
            Some(b) if b.len() == 1 => Choice::Explicit(ZipType::from_u8(b[0])?),
            _ => Choice::Default,
        };
        let realm = get_bytes_opt(&fields, tag::REALM).unwrap_or_default();
        let ttl = match get_u32(&fields, tag::TTL) {
            Ok(v) => Choice::Explicit(v),
            Err(_) => Choice::Default,
        };
        let auth_uid = get_u32(&fields, tag::AUTH_UID).unwrap_or(UID_ANY);
        let auth_gid = get_u32(&fields, tag::AUTH_GID).unwrap_or(GID_ANY);
        let data = get_bytes(&fields, tag::DATA).unwrap_or_default();

        Ok(EncodeRequest {
            cipher_type,
            mac_type,
            zip_type,
            realm,
            ttl,
            auth_uid,
            auth_gid,
            data,
        })
    }
}

/// A `DEC_REQ` payload: just the armored credential string to decode.
#[derive(Clone, Debug)]
pub struct DecodeRequest {
    pub armored: String,
}

impl DecodeRequest {
    pub fn pack(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        w.put_bytes(tag::ARMORED, self.armored.as_bytes());
        w.finish()
    }

    pub fn unpack(buf: &[u8]) -> Result<Self, Error> {
        let fields = read_fields(buf)?;
        let bytes = get_bytes(&fields, tag::ARMORED)?;
        let armored = String::from_utf8(bytes).map_err(|_| Error::from(crate::error::ErrorKind::BadCred))?;
        Ok(DecodeRequest { armored })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_request_round_trips_with_explicit_choices() {
        let req = EncodeRequest {
            cipher_type: Choice::Explicit(CipherType::Aes256),
            mac_type: Choice::Explicit(MacType::Sha512),
            zip_type: Choice::Default,
            realm: b"cluster".to_vec(),
            ttl: Choice::Explicit(60),
            auth_uid: 1000,
            auth_gid: GID_ANY,
            data: b"payload".to_vec(),
        };
        let packed = req.pack();
        let parsed = EncodeRequest::unpack(&packed).unwrap();
        assert_eq!(parsed.cipher_type, Choice::Explicit(CipherType::Aes256));
        assert_eq!(parsed.zip_type, Choice::Default);
        assert_eq!(parsed.realm, b"cluster");
        assert_eq!(parsed.auth_uid, 1000);
        assert_eq!(parsed.data, b"payload");
    }

    #[test]
    fn default_request_resolves_to_bare_defaults() {
        let req = EncodeRequest::default();
        let packed = req.pack();
        let parsed = EncodeRequest::unpack(&packed).unwrap();
        assert_eq!(parsed.cipher_type, Choice::Default);
        assert_eq!(parsed.auth_uid, UID_ANY);
    }

    #[test]
    fn decode_request_round_trips() {
        let req = DecodeRequest {
            armored: "MUNGE:abcd:".to_string(),
        };
        let packed = req.pack();
        let parsed = DecodeRequest::unpack(&packed).unwrap();
        assert_eq!(parsed.armored, req.armored);
    }
}
