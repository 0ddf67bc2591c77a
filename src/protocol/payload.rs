//! Typed payload encoding
//!
//! Little-endian numbers, `i32`-length-prefixed byte arrays and strings, and
//! JSON maps stored as byte arrays. Handlers use it to build and read Tcp0
//! payloads without hand-packing bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::tcp0::length_prefix;
use crate::config::LENGTH_HEADER_SIZE;
use crate::error::{Error, Result};

/// Growable payload builder
#[derive(Debug, Default, Clone)]
pub struct PayloadEncoder {
    buffer: BytesMut,
}

impl PayloadEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clears the buffer, keeping its allocation.
    #[inline(always)]
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn put_raw(&mut self, data: &[u8]) -> &mut Self {
        self.buffer.put_slice(data);
        self
    }

    pub fn put_bool(&mut self, v: bool) -> &mut Self {
        self.buffer.put_u8(v as u8);
        self
    }

    pub fn put_i8(&mut self, v: i8) -> &mut Self {
        self.buffer.put_i8(v);
        self
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buffer.put_u8(v);
        self
    }

    pub fn put_i16(&mut self, v: i16) -> &mut Self {
        self.buffer.put_i16_le(v);
        self
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buffer.put_u16_le(v);
        self
    }

    pub fn put_i32(&mut self, v: i32) -> &mut Self {
        self.buffer.put_i32_le(v);
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buffer.put_u32_le(v);
        self
    }

    pub fn put_i64(&mut self, v: i64) -> &mut Self {
        self.buffer.put_i64_le(v);
        self
    }

    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        self.buffer.put_u64_le(v);
        self
    }

    pub fn put_f32(&mut self, v: f32) -> &mut Self {
        self.buffer.put_f32_le(v);
        self
    }

    pub fn put_f64(&mut self, v: f64) -> &mut Self {
        self.buffer.put_f64_le(v);
        self
    }

    /// `[i32 length][bytes]`. Fails, writing nothing, if the length does not
    /// fit an `i32`.
    pub fn put_bytes(&mut self, v: &[u8]) -> Result<&mut Self> {
        let prefix = length_prefix(v.len())?;
        self.buffer.put_slice(&prefix);
        self.buffer.put_slice(v);
        Ok(self)
    }

    pub fn put_str(&mut self, v: &str) -> Result<&mut Self> {
        self.put_bytes(v.as_bytes())
    }

    /// Serializes `v` as JSON and stores it like a byte array.
    pub fn put_json<T: Serialize + ?Sized>(&mut self, v: &T) -> Result<&mut Self> {
        let encoded =
            serde_json::to_vec(v).map_err(|e| Error::framing(format!("json encode: {}", e)))?;
        self.put_bytes(&encoded)
    }

    /// Payload as built, without a length prefix.
    pub fn freeze(self) -> Bytes {
        self.buffer.freeze()
    }

    /// Payload with its Tcp0 `i32` length prefix in front.
    pub fn into_frame(self) -> Result<Bytes> {
        let prefix = length_prefix(self.buffer.len())?;
        let mut framed = BytesMut::with_capacity(LENGTH_HEADER_SIZE + self.buffer.len());
        framed.put_slice(&prefix);
        framed.put_slice(&self.buffer);
        Ok(framed.freeze())
    }
}

/// Cursor over a received payload.
///
/// Every `get_*` fails with [`Error::Underflow`] instead of reading past the end,
/// and leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct PayloadDecoder {
    buffer: Bytes,
}

impl PayloadDecoder {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            buffer: data.into(),
        }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// Remaining bytes
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    #[inline(always)]
    fn need(&self, requested: usize) -> Result<()> {
        if self.buffer.remaining() < requested {
            return Err(Error::Underflow {
                requested,
                available: self.buffer.remaining(),
            });
        }
        Ok(())
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_i8(&mut self) -> Result<i8> {
        self.need(1)?;
        Ok(self.buffer.get_i8())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buffer.get_u8())
    }

    pub fn get_i16(&mut self) -> Result<i16> {
        self.need(2)?;
        Ok(self.buffer.get_i16_le())
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buffer.get_u16_le())
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.buffer.get_i32_le())
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buffer.get_u32_le())
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        self.need(8)?;
        Ok(self.buffer.get_i64_le())
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buffer.get_u64_le())
    }

    pub fn get_f32(&mut self) -> Result<f32> {
        self.need(4)?;
        Ok(self.buffer.get_f32_le())
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        self.need(8)?;
        Ok(self.buffer.get_f64_le())
    }

    /// Reads an `[i32 length][bytes]` array without copying.
    pub fn get_bytes(&mut self) -> Result<Bytes> {
        self.need(LENGTH_HEADER_SIZE)?;
        let length = i32::from_le_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]);
        if length < 0 {
            return Err(Error::framing(format!("negative array length {}", length)));
        }
        self.need(LENGTH_HEADER_SIZE + length as usize)?;
        self.buffer.advance(LENGTH_HEADER_SIZE);
        Ok(self.buffer.split_to(length as usize))
    }

    pub fn get_string(&mut self) -> Result<String> {
        self.get_bytes_as(|raw| {
            String::from_utf8(raw.to_vec()).map_err(|e| Error::framing(format!("utf-8: {}", e)))
        })
    }

    pub fn get_json<T: DeserializeOwned>(&mut self) -> Result<T> {
        self.get_bytes_as(|raw| {
            serde_json::from_slice(raw).map_err(|e| Error::framing(format!("json decode: {}", e)))
        })
    }

    /// Reads a byte array and converts it, rewinding if the conversion fails.
    fn get_bytes_as<T, F>(&mut self, convert: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> Result<T>,
    {
        let mark = self.buffer.clone();
        let raw = self.get_bytes()?;
        convert(&raw).map_err(|err| {
            self.buffer = mark;
            err
        })
    }

    /// Everything not read yet.
    pub fn rest(&mut self) -> Bytes {
        self.buffer.split_off(0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_mixed_fields() {
        let mut encoder = PayloadEncoder::new();
        encoder
            .put_bool(true)
            .put_i16(-2)
            .put_u32(70_000)
            .put_f64(1.5)
            .put_str("tick")
            .unwrap()
            .put_i64(i64::MIN);

        let mut decoder = PayloadDecoder::new(encoder.freeze());
        assert!(decoder.get_bool().unwrap());
        assert_eq!(decoder.get_i16().unwrap(), -2);
        assert_eq!(decoder.get_u32().unwrap(), 70_000);
        assert_eq!(decoder.get_f64().unwrap(), 1.5);
        assert_eq!(decoder.get_string().unwrap(), "tick");
        assert_eq!(decoder.get_i64().unwrap(), i64::MIN);
        assert_eq!(decoder.remaining(), 0);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut encoder = PayloadEncoder::new();
        encoder.put_i32(1).put_bytes(b"ab").unwrap();
        assert_eq!(encoder.as_bytes(), &[1, 0, 0, 0, 2, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn test_into_frame_prefixes_length() {
        let mut encoder = PayloadEncoder::new();
        encoder.put_raw(b"hello");
        let frame = encoder.into_frame().unwrap();
        assert_eq!(&frame[..], &[5, 0, 0, 0, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_underflow_leaves_cursor() {
        let mut decoder = PayloadDecoder::from_slice(&[1, 2]);
        assert!(matches!(
            decoder.get_u32(),
            Err(Error::Underflow { requested: 4, available: 2 })
        ));
        assert_eq!(decoder.get_u16().unwrap(), 0x0201);
    }

    #[test]
    fn test_truncated_array() {
        let mut decoder = PayloadDecoder::from_slice(&[10, 0, 0, 0, b'x']);
        assert!(matches!(decoder.get_bytes(), Err(Error::Underflow { .. })));
        assert_eq!(decoder.remaining(), 5);
    }

    #[test]
    fn test_bad_utf8_leaves_cursor() {
        let mut decoder = PayloadDecoder::from_slice(&[2, 0, 0, 0, 0xff, 0xfe]);
        assert!(matches!(decoder.get_string(), Err(Error::Framing(_))));
        assert_eq!(decoder.remaining(), 6);

        // The same bytes are still readable as a raw array
        assert_eq!(&decoder.get_bytes().unwrap()[..], &[0xff, 0xfe]);
        assert_eq!(decoder.remaining(), 0);
    }

    #[test]
    fn test_bad_json_leaves_cursor() {
        let mut decoder = PayloadDecoder::from_slice(&[3, 0, 0, 0, b'{', b'x', b'}']);
        assert!(decoder.get_json::<HashMap<String, String>>().is_err());
        assert_eq!(decoder.remaining(), 7);
    }

    #[test]
    fn test_json_map() {
        let mut map = HashMap::new();
        map.insert("room".to_string(), "7".to_string());

        let mut encoder = PayloadEncoder::new();
        encoder.put_json(&map).unwrap();

        let mut decoder = PayloadDecoder::new(encoder.freeze());
        let back: HashMap<String, String> = decoder.get_json().unwrap();
        assert_eq!(back, map);
    }
}
