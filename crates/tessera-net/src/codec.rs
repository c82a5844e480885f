//! Primitive binary codec shared by every protocol layer.
//!
//! All multi-byte values are big-endian:
//!
//! ```text
//! +---------+----------------------------------------------+
//! | i32     | 4 bytes                                      |
//! | i64     | 8 bytes                                      |
//! | f64     | 8 bytes, IEEE 754                            |
//! | bool    | 1 byte, non-zero is true                     |
//! | string  | u16 byte length, then UTF-8 bytes            |
//! | blob    | i32 byte length, then raw bytes              |
//! +---------+----------------------------------------------+
//! ```
//!
//! [`ByteReader`] works over an in-memory slice. A failed read never panics;
//! it reports [`DecodeError::Truncated`] so the caller can retry the whole
//! message once more bytes have arrived.

use crate::error::{DecodeError, EncodeError};

/// Cursor over a byte slice with big-endian primitive reads.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read one unsigned byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a one-byte boolean.
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a big-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    /// Read a big-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    /// Read a big-endian `i32` without consuming it.
    pub fn peek_i32(&self) -> Result<i32, DecodeError> {
        self.clone().read_i32()
    }

    /// Read a big-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    /// Read a big-endian IEEE 754 double.
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    /// Read a `u16`-length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DecodeError::malformed("string is not valid UTF-8"))
    }

    /// Read exactly `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.take(n)
    }

    /// Read an `i32`-length-prefixed byte blob.
    pub fn read_blob(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(DecodeError::malformed(format!("negative blob length {len}")));
        }
        Ok(self.take(len as usize)?.to_vec())
    }
}

/// Growable buffer with big-endian primitive writes.
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer and return its bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a `u16`-length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) -> Result<(), EncodeError> {
        let len =
            u16::try_from(value.len()).map_err(|_| EncodeError::StringTooLong(value.len()))?;
        self.write_u16(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Write raw bytes with no prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write an `i32`-length-prefixed byte blob.
    pub fn write_blob(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        let len = i32::try_from(bytes.len()).map_err(|_| EncodeError::BlobTooLong(bytes.len()))?;
        self.write_i32(len);
        self.buf.extend_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_are_big_endian() {
        let mut w = ByteWriter::new();
        w.write_i32(0x0102_0304);
        w.write_i64(-2);
        assert_eq!(
            w.as_slice(),
            &[1, 2, 3, 4, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]
        );
    }

    #[test]
    fn test_primitive_sequence_reads_back() {
        let mut w = ByteWriter::new();
        w.write_bool(true);
        w.write_i32(i32::MIN);
        w.write_i64(i64::MAX);
        w.write_f64(-3.25);
        w.write_str("héllo").unwrap();
        w.write_blob(&[9, 8, 7]).unwrap();
        let bytes = w.into_inner();

        let mut r = ByteReader::new(&bytes);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_i32().unwrap(), i32::MIN);
        assert_eq!(r.read_i64().unwrap(), i64::MAX);
        assert_eq!(r.read_f64().unwrap(), -3.25);
        assert_eq!(r.read_str().unwrap(), "héllo");
        assert_eq!(r.read_blob().unwrap(), vec![9, 8, 7]);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_string_prefix_counts_bytes_not_chars() {
        let mut w = ByteWriter::new();
        w.write_str("é").unwrap();
        assert_eq!(w.as_slice(), &[0, 2, 0xC3, 0xA9]);
    }

    #[test]
    fn test_short_read_reports_truncated() {
        let mut r = ByteReader::new(&[0, 0, 1]);
        let err = r.read_i32().unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                needed: 4,
                available: 3
            }
        );
        // A failed read does not advance the cursor.
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn test_string_body_shorter_than_prefix_is_truncated() {
        let mut r = ByteReader::new(&[0, 5, b'a', b'b']);
        assert!(r.read_str().unwrap_err().is_truncated());
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let mut r = ByteReader::new(&[0, 1, 0xFF]);
        assert!(matches!(
            r.read_str(),
            Err(DecodeError::MalformedBody(_))
        ));
    }

    #[test]
    fn test_negative_blob_length_is_malformed() {
        let bytes = (-1i32).to_be_bytes();
        let mut r = ByteReader::new(&bytes);
        assert!(matches!(r.read_blob(), Err(DecodeError::MalformedBody(_))));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let bytes = 7i32.to_be_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.peek_i32().unwrap(), 7);
        assert_eq!(r.read_i32().unwrap(), 7);
    }

    #[test]
    fn test_oversized_string_rejected() {
        let long = "x".repeat(u16::MAX as usize + 1);
        let mut w = ByteWriter::new();
        assert_eq!(
            w.write_str(&long),
            Err(EncodeError::StringTooLong(u16::MAX as usize + 1))
        );
        assert!(w.as_slice().is_empty());
    }
}
