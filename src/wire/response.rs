//! Response payloads for `ENC_RSP`/`DEC_RSP` frames.

use super::fields::{get_bytes, get_bytes_opt, get_u32, get_u8, read_fields, FieldWriter};
use crate::error::{Error, ErrorKind};

mod tag {
    pub const ARMORED: u8 = 1;
    pub const ERROR_KIND: u8 = 2;
    pub const ERROR_MESSAGE: u8 = 3;
    pub const CRED_UID: u8 = 4;
    pub const CRED_GID: u8 = 5;
    pub const ENCODE_TIME: u8 = 6;
    pub const DECODE_TIME: u8 = 7;
    pub const TTL: u8 = 8;
    pub const CIPHER_TYPE: u8 = 9;
    pub const MAC_TYPE: u8 = 10;
    pub const ZIP_TYPE: u8 = 11;
    pub const REALM: u8 = 12;
    pub const AUTH_UID: u8 = 13;
    pub const AUTH_GID: u8 = 14;
    pub const ADDR: u8 = 15;
    pub const DATA: u8 = 16;
}

/// An `ENC_RSP` payload: the armored string, or an error kind/message pair.
#[derive(Clone, Debug)]
pub struct EncodeResponse {
    pub armored: Option<String>,
    pub error: Option<(u8, String)>,
}

impl EncodeResponse {
    pub fn success(armored: String) -> Self {
        EncodeResponse {
            armored: Some(armored),
            error: None,
        }
    }

    pub fn failure(kind: u8, message: String) -> Self {
        EncodeResponse {
            armored: None,
            error: Some((kind, message)),
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        if let Some(armored) = &self.armored {
            w.put_bytes(tag::ARMORED, armored.as_bytes());
        }
        if let Some((kind, message)) = &self.error {
            w.put_u8(tag::ERROR_KIND, *kind);
            w.put_bytes(tag::ERROR_MESSAGE, message.as_bytes());
        }
        w.finish()
    }

    pub fn unpack(buf: &[u8]) -> Result<Self, Error> {
        let fields = read_fields(buf)?;
        let armored = get_bytes_opt(&fields, tag::ARMORED)
            .map(|b| String::from_utf8(b).map_err(|_| Error::from(ErrorKind::BadCred)))
            .transpose()?;
        let error = match get_u8(&fields, tag::ERROR_KIND) {
            Ok(kind) => {
                let message = get_bytes(&fields, tag::ERROR_MESSAGE)
                    .ok()
                    .map(|b| String::from_utf8_lossy(&b).into_owned())
                    .unwrap_or_default();
                Some((kind, message))
            }
            Err(_) => None,
        };
        Ok(EncodeResponse { armored, error })
    }
}

/// The full decoded metadata carried by a `DEC_RSP`, present for a pure
/// success and also for the three soft-fail kinds (expired/rewound/replayed)
/// per §4.7's closing note.
#[derive(Clone, Debug, Default)]
pub struct DecodeMetadata {
    pub cred_uid: u32,
    pub cred_gid: u32,
    pub encode_time: u32,
    pub decode_time: u32,
    pub ttl: u32,
    pub cipher_type: u8,
    pub mac_type: u8,
    pub zip_type: u8,
    pub realm: Vec<u8>,
    pub auth_uid: u32,
    pub auth_gid: u32,
    pub addr: Vec<u8>,
    pub data: Vec<u8>,
}

/// A `DEC_RSP` payload: an error kind (0 means success) plus metadata.
#[derive(Clone, Debug)]
pub struct DecodeResponse {
    pub error_kind: Option<u8>,
    pub error_message: String,
    pub metadata: DecodeMetadata,
}

impl DecodeResponse {
    pub fn pack(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        if let Some(kind) = self.error_kind {
            w.put_u8(tag::ERROR_KIND, kind);
            w.put_bytes(tag::ERROR_MESSAGE, self.error_message.as_bytes());
        }
        let m = &self.metadata;
        w.put_u32(tag::CRED_UID, m.cred_uid);
        w.put_u32(tag::CRED_GID, m.cred_gid);
        w.put_u32(tag::ENCODE_TIME, m.encode_time);
        w.put_u32(tag::DECODE_TIME, m.decode_time);
        w.put_u32(tag::TTL, m.ttl);
        w.put_u8(tag::CIPHER_TYPE, m.cipher_type);
        w.put_u8(tag::MAC_TYPE, m.mac_type);
        w.put_u8(tag::ZIP_TYPE, m.zip_type);
        w.put_bytes(tag::REALM, &m.realm);
        w.put_u32(tag::AUTH_UID, m.auth_uid);
        w.put_u32(tag::AUTH_GID, m.auth_gid);
        w.put_bytes(tag::ADDR, &m.addr);
        w.put_bytes(tag::DATA, &m.data);
        w.finish()
    }

    pub fn unpack(buf: &[u8]) -> Result<Self, Error> {
        let fields = read_fields(buf)?;

        let error_kind = get_u8(&fields, tag::ERROR_KIND).ok();
        let error_message = get_bytes(&fields, tag::ERROR_MESSAGE)
            .ok()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();

        let metadata = DecodeMetadata {
            cred_uid: get_u32(&fields, tag::CRED_UID).unwrap_or(0),
            cred_gid: get_u32(&fields, tag::CRED_GID).unwrap_or(0),
            encode_time: get_u32(&fields, tag::ENCODE_TIME).unwrap_or(0),
            decode_time: get_u32(&fields, tag::DECODE_TIME).unwrap_or(0),
            ttl: get_u32(&fields, tag::TTL).unwrap_or(0),
            cipher_type: get_u8(&fields, tag::CIPHER_TYPE).unwrap_or(0),
            mac_type: get_u8(&fields, tag::MAC_TYPE).unwrap_or(0),
            zip_type: get_u8(&fields, tag::ZIP_TYPE).unwrap_or(0),
            realm: get_bytes_opt(&fields, tag::REALM).unwrap_or_default(),
            auth_uid: get_u32(&fields, tag::AUTH_UID).unwrap_or(0),
            auth_gid: get_u32(&fields, tag::AUTH_GID).unwrap_or(0),
            addr: get_bytes_opt(&fields, tag::ADDR).unwrap_or_default(),
            data: get_bytes_opt(&fields, tag::DATA).unwrap_or_default(),
        };

        Ok(DecodeResponse {
            error_kind,
            error_message,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_response_success_round_trips() {
        let resp = EncodeResponse::success("MUNGE:abcd:".to_string());
        let packed = resp.pack();
        let parsed = EncodeResponse::unpack(&packed).unwrap();
        assert_eq!(parsed.armored.as_deref(), Some("MUNGE:abcd:"));
        assert!(parsed.error.is_none());
    }

    #[test]
    fn encode_response_failure_round_trips() {
        let resp = EncodeResponse::failure(7, "invalid credential".to_string());
        let packed = resp.pack();
        let parsed = EncodeResponse::unpack(&packed).unwrap();
        assert!(parsed.armored.is_none());
        assert_eq!(parsed.error, Some((7, "invalid credential".to_string())));
    }

    #[test]
    fn decode_response_round_trips_with_metadata() {
        let resp = DecodeResponse {
            error_kind: None,
            error_message: String::new(),
            metadata: DecodeMetadata {
                cred_uid: 1000,
                cred_gid: 1000,
                encode_time: 1_700_000_000,
                decode_time: 1_700_000_010,
                ttl: 300,
                cipher_type: 3,
                mac_type: 4,
                zip_type: 0,
                realm: b"cluster".to_vec(),
                auth_uid: u32::MAX,
                auth_gid: u32::MAX,
                addr: vec![10, 0, 0, 1],
                data: b"payload".to_vec(),
            },
        };
        let packed = resp.pack();
        let parsed = DecodeResponse::unpack(&packed).unwrap();
        assert_eq!(parsed.metadata.cred_uid, 1000);
        assert_eq!(parsed.metadata.data, b"payload");
        assert!(parsed.error_kind.is_none());
    }

    #[test]
    fn decode_response_soft_failure_still_carries_metadata() {
        let resp = DecodeResponse {
            error_kind: Some(11), // CRED_EXPIRED
            error_message: "expired credential".to_string(),
            metadata: DecodeMetadata {
                cred_uid: 42,
                ..Default::default()
            },
        };
        let packed = resp.pack();
        let parsed = DecodeResponse::unpack(&packed).unwrap();
        assert_eq!(parsed.error_kind, Some(11));
        assert_eq!(parsed.metadata.cred_uid, 42);
    }
}
