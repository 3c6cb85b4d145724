//! Minimal tagged-field (TLV) codec shared by the request/response payloads.
//! Manual byte framing, in the style of a length-prefixed command buffer
//! rather than a generic serde format: each field is `tag(1) len(4) value`.

use byteorder::{BigEndian, ByteOrder};
use std::collections::HashMap;

use crate::error::{Error, ErrorKind};

pub struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    pub fn new() -> Self {
        FieldWriter { buf: Vec::new() }
    }

    pub fn put_bytes(&mut self, tag: u8, value: &[u8]) {
        self.buf.push(tag);
        let mut len_buf = [0u8; 4];
        BigEndian::write_u32(&mut len_buf, value.len() as u32);
        self.buf.extend_from_slice(&len_buf);
        self.buf.extend_from_slice(value);
    }

    pub fn put_u32(&mut self, tag: u8, value: u32) {
        let mut v = [0u8; 4];
        BigEndian::write_u32(&mut v, value);
        self.put_bytes(tag, &v);
    }

    pub fn put_u8(&mut self, tag: u8, value: u8) {
        self.put_bytes(tag, &[value]);
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for FieldWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a flat buffer of `tag(1) len(4) value` records into a tag -> bytes map.
pub fn read_fields(buf: &[u8]) -> Result<HashMap<u8, Vec<u8>>, Error> {
    let mut fields = HashMap::new();
    let mut offset = 0;
    while offset < buf.len() {
        if buf.len() < offset + 5 {
            return Err(Error::from(ErrorKind::BadCred));
        }
        let tag = buf[offset];
        let len = BigEndian::read_u32(&buf[offset + 1..offset + 5]) as usize;
        offset += 5;
        if buf.len() < offset + len {
            return Err(Error::from(ErrorKind::BadCred));
        }
        fields.insert(tag, buf[offset..offset + len].to_vec());
        offset += len;
    }
    Ok(fields)
}

pub fn get_u32(fields: &HashMap<u8, Vec<u8>>, tag: u8) -> Result<u32, Error> {
    let bytes = fields.get(&tag).ok_or(Error::from(ErrorKind::BadCred))?;
    if bytes.len() != 4 {
        return Err(Error::from(ErrorKind::BadCred));
    }
    Ok(BigEndian::read_u32(bytes))
}

pub fn get_u8(fields: &HashMap<u8, Vec<u8>>, tag: u8) -> Result<u8, Error> {
    let bytes = fields.get(&tag).ok_or(Error::from(ErrorKind::BadCred))?;
    if bytes.len() != 1 {
        return Err(Error::from(ErrorKind::BadCred));
    }
    Ok(bytes[0])
}

pub fn get_bytes(fields: &HashMap<u8, Vec<u8>>, tag: u8) -> Result<Vec<u8>, Error> {
    fields.get(&tag).cloned().ok_or(Error::from(ErrorKind::BadCred))
}

pub fn get_bytes_opt(fields: &HashMap<u8, Vec<u8>>, tag: u8) -> Option<Vec<u8>> {
    fields.get(&tag).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_and_reader_round_trip() {
        let mut writer = FieldWriter::new();
        writer.put_u8(1, 7);
        writer.put_u32(2, 424_242);
        writer.put_bytes(3, b"hello");
        let buf = writer.finish();

        let fields = read_fields(&buf).unwrap();
        assert_eq!(get_u8(&fields, 1).unwrap(), 7);
        assert_eq!(get_u32(&fields, 2).unwrap(), 424_242);
        assert_eq!(get_bytes(&fields, 3).unwrap(), b"hello");
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let mut writer = FieldWriter::new();
        writer.put_bytes(1, b"hello world");
        let mut buf = writer.finish();
        buf.truncate(buf.len() - 1);
        assert!(read_fields(&buf).is_err());
    }
}
