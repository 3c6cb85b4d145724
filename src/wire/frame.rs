//! The fixed frame header every client/daemon message begins with (§6).

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, ErrorKind};

/// Constant sentinel identifying a MUNGE wire frame.
pub const MAGIC: [u8; 4] = *b"MNG4";

/// Current frame-header version.
pub const VERSION: u8 = 4;

/// Fixed header length: magic + version + type + retry + pkt_len.
pub const HEADER_LEN: usize = 4 + 1 + 1 + 1 + 4;

/// The five frame kinds exchanged between a client and the daemon.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum MessageType {
    EncodeRequest = 0,
    EncodeResponse = 1,
    DecodeRequest = 2,
    DecodeResponse = 3,
    AuthFdRequest = 4,
}

impl MessageType {
    pub fn from_u8(tag: u8) -> Result<Self, Error> {
        Ok(match tag {
            0 => MessageType::EncodeRequest,
            1 => MessageType::EncodeResponse,
            2 => MessageType::DecodeRequest,
            3 => MessageType::DecodeResponse,
            4 => MessageType::AuthFdRequest,
            _ => return Err(Error::from(ErrorKind::BadCred)),
        })
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// A full frame: header plus opaque payload bytes (the tagged record
/// defined by [`crate::wire::request`]/[`crate::wire::response`]).
pub struct Frame {
    pub msg_type: MessageType,
    pub retry: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn pack(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&MAGIC);
        buf.push(VERSION);
        buf.push(self.msg_type.to_u8());
        buf.push(self.retry);

        let mut len_buf = [0u8; 4];
        BigEndian::write_u32(&mut len_buf, self.payload.len() as u32);
        buf.extend_from_slice(&len_buf);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a complete frame (header already validated to be present) from
    /// `buf`. Callers performing stream I/O should read [`HEADER_LEN`] bytes
    /// first to learn `pkt_len`, then read that many more before calling this.
    pub fn unpack(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_LEN {
            return Err(Error::from(ErrorKind::BadCred));
        }
        if buf[0..4] != MAGIC {
            return Err(Error::from(ErrorKind::BadCred));
        }
        if buf[4] != VERSION {
            return Err(Error::from(ErrorKind::BadVersion));
        }
        let msg_type = MessageType::from_u8(buf[5])?;
        let retry = buf[6];
        let pkt_len = BigEndian::read_u32(&buf[7..11]) as usize;

        if buf.len() < HEADER_LEN + pkt_len {
            return Err(Error::from(ErrorKind::BadCred));
        }
        let payload = buf[HEADER_LEN..HEADER_LEN + pkt_len].to_vec();

        Ok(Frame {
            msg_type,
            retry,
            payload,
        })
    }

    /// Read `pkt_len` out of a header-only buffer, to size the follow-up read.
    pub fn peek_payload_len(header: &[u8]) -> Result<usize, Error> {
        if header.len() < HEADER_LEN {
            return Err(Error::from(ErrorKind::BadCred));
        }
        Ok(BigEndian::read_u32(&header[7..11]) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let frame = Frame {
            msg_type: MessageType::EncodeRequest,
            retry: 0,
            payload: b"hello".to_vec(),
        };
        let packed = frame.pack();
        let parsed = Frame::unpack(&packed).unwrap();
        assert_eq!(parsed.msg_type, MessageType::EncodeRequest);
        assert_eq!(parsed.payload, b"hello");
    }

    #[test]
    fn rejects_bad_magic() {
        let mut packed = Frame {
            msg_type: MessageType::EncodeRequest,
            retry: 0,
            payload: vec![],
        }
        .pack();
        packed[0] = 0xff;
        assert!(Frame::unpack(&packed).is_err());
    }
}
