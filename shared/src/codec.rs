//! Fixed-layout binary codec for the game protocol.
//!
//! Packets have no framing: each kind is a single leading id byte followed by
//! fields at static offsets. The only variable-length field is text, which is
//! prefixed by an unsigned 16-bit byte count. Every multi-byte field uses the
//! one byte order selected by [`NETWORK_BIG_ENDIAN`].

use std::error::Error;
use std::f32::consts::PI;
use std::fmt;

use crate::MAX_PAYLOAD_LEN;

/// Byte order of every multi-byte field on the wire.
pub const NETWORK_BIG_ENDIAN: bool = true;

/// Quantizes an angle in radians to a signed byte: `floor(rad / pi * 128)`
/// wrapped mod 256. The wrap identifies +pi with -pi, which is exact for a
/// periodic quantity.
pub fn encode_angle(rad: f32) -> i8 {
    ((rad / PI * 128.0).floor() as i32) as i8
}

/// Inverse of [`encode_angle`], accurate to one quantization step (pi/128).
pub fn decode_angle(v: i8) -> f32 {
    v as f32 / 128.0 * PI
}

macro_rules! endian_bytes {
    ($v:expr) => {
        if NETWORK_BIG_ENDIAN {
            $v.to_be_bytes()
        } else {
            $v.to_le_bytes()
        }
    };
}

macro_rules! endian_from {
    ($ty:ty, $bytes:expr) => {
        if NETWORK_BIG_ENDIAN {
            <$ty>::from_be_bytes($bytes)
        } else {
            <$ty>::from_le_bytes($bytes)
        }
    };
}

/// Failure reading an inbound packet. Every variant closes the connection;
/// none may leave a partially applied packet behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// A field extends past the end of the payload.
    UnexpectedEnd,
    /// A text field was not valid UTF-8.
    InvalidText,
    /// A text field declared more bytes than the protocol permits.
    TextTooLong,
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::UnexpectedEnd => write!(f, "read past end of payload"),
            ReadError::InvalidText => write!(f, "text field is not valid UTF-8"),
            ReadError::TextTooLong => write!(f, "text field exceeds protocol limit"),
        }
    }
}

impl Error for ReadError {}

/// Growable cursor writer for packets assembled per send (chat, batched
/// remove/meet/update payloads).
#[derive(Debug, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Starts a packet with its leading kind byte.
    pub fn packet(kind: u8) -> Self {
        Writer { buf: vec![kind] }
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn put_i8(&mut self, v: i8) -> &mut Self {
        self.buf.push(v as u8);
        self
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&endian_bytes!(v));
        self
    }

    pub fn put_i16(&mut self, v: i16) -> &mut Self {
        self.buf.extend_from_slice(&endian_bytes!(v));
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&endian_bytes!(v));
        self
    }

    pub fn put_f32(&mut self, v: f32) -> &mut Self {
        self.buf.extend_from_slice(&endian_bytes!(v));
        self
    }

    pub fn put_f64(&mut self, v: f64) -> &mut Self {
        self.buf.extend_from_slice(&endian_bytes!(v));
        self
    }

    pub fn put_angle(&mut self, rad: f32) -> &mut Self {
        self.put_i8(encode_angle(rad))
    }

    /// Length-prefixed UTF-8 text.
    pub fn put_text(&mut self, s: &str) -> &mut Self {
        self.put_u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    /// Appends a pre-serialized record (an entity's meet or update buffer).
    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Fixed-size buffer written at absolute offsets. Used for the per-entity
/// meet/update records and the single-purpose packets (Init, Spawn, Pong,
/// UpdateResources) that are re-encoded in place when a field changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticBuffer {
    buf: Vec<u8>,
}

impl StaticBuffer {
    pub fn new(len: usize) -> Self {
        StaticBuffer { buf: vec![0; len] }
    }

    pub fn set_u8(&mut self, at: usize, v: u8) -> &mut Self {
        self.buf[at] = v;
        self
    }

    pub fn set_i8(&mut self, at: usize, v: i8) -> &mut Self {
        self.buf[at] = v as u8;
        self
    }

    pub fn set_u16(&mut self, at: usize, v: u16) -> &mut Self {
        self.buf[at..at + 2].copy_from_slice(&endian_bytes!(v));
        self
    }

    pub fn set_f32(&mut self, at: usize, v: f32) -> &mut Self {
        self.buf[at..at + 4].copy_from_slice(&endian_bytes!(v));
        self
    }

    pub fn set_f64(&mut self, at: usize, v: f64) -> &mut Self {
        self.buf[at..at + 8].copy_from_slice(&endian_bytes!(v));
        self
    }

    pub fn set_angle(&mut self, at: usize, rad: f32) -> &mut Self {
        self.set_i8(at, encode_angle(rad))
    }

    /// Length-prefixed UTF-8 text at an absolute offset. The buffer must have
    /// been sized for the text when it was laid out.
    pub fn set_text(&mut self, at: usize, s: &str) -> &mut Self {
        self.set_u16(at, s.len() as u16);
        self.buf[at + 2..at + 2 + s.len()].copy_from_slice(s.as_bytes());
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.buf.clone()
    }
}

/// Borrowed-slice cursor with eager bounds checks. Fields are read in wire
/// order; the first failed read aborts the whole packet, so no state mutation
/// can have happened on a malformed payload as long as callers decode fully
/// before applying.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ReadError> {
        if self.pos + n > self.buf.len() {
            return Err(ReadError::UnexpectedEnd);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ReadError> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, ReadError> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8, ReadError> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn u16(&mut self) -> Result<u16, ReadError> {
        Ok(endian_from!(u16, self.take_array()?))
    }

    pub fn i16(&mut self) -> Result<i16, ReadError> {
        Ok(endian_from!(i16, self.take_array()?))
    }

    pub fn u32(&mut self) -> Result<u32, ReadError> {
        Ok(endian_from!(u32, self.take_array()?))
    }

    pub fn f32(&mut self) -> Result<f32, ReadError> {
        Ok(endian_from!(f32, self.take_array()?))
    }

    pub fn f64(&mut self) -> Result<f64, ReadError> {
        Ok(endian_from!(f64, self.take_array()?))
    }

    pub fn angle(&mut self) -> Result<f32, ReadError> {
        Ok(decode_angle(self.i8()?))
    }

    pub fn text(&mut self) -> Result<String, ReadError> {
        let len = self.u16()? as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(ReadError::TextTooLong);
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ReadError::InvalidText)
    }
}
