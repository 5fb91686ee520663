//! Pluggable value serialization.
//!
//! The [`Codec`] trait is the boundary between the value model and bytes on
//! the wire. [`MsgpackCodec`] is the provided implementation; it converts
//! through [`rmpv`] so every [`Value`] is encodable and every encoded value
//! decodes back to a structurally equal one.
//!
//! MessagePack streams carry no length prefix: values are self-delimiting.
//! [`FrameDecoder`] buffers stream bytes and yields complete values as they
//! become available.
//!
//! # Example
//!
//! ```rust
//! use mprpc_core::{Codec, MsgpackCodec, Value};
//!
//! let codec = MsgpackCodec;
//! let value = Value::from(vec![Value::from(1), Value::from("two")]);
//!
//! let bytes = codec.encode(&value).unwrap();
//! let decoded = codec.decode(&bytes).unwrap();
//! assert_eq!(decoded, value);
//! ```

use std::io::{self, Cursor};

use bytes::{Buf, Bytes, BytesMut};

use crate::value::{Value, ValueMap};

/// Default upper bound on a single buffered frame (8 MiB).
///
/// A peer that streams more than this without completing a value is treated
/// as broken rather than allowed to grow the buffer without bound.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Error type for codec operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a value to bytes.
    #[error("encode error: {0}")]
    Encode(String),

    /// Bytes are not a valid encoded value.
    #[error("decode error: {0}")]
    Decode(String),

    /// The decoded value has no representation in the value model.
    #[error("unsupported value: {0}")]
    Unsupported(String),

    /// Bytes remained after a complete value was decoded.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    /// A partial frame grew past the configured limit.
    #[error("frame too large: {size} bytes buffered (max {max})")]
    FrameTooLarge {
        /// Bytes buffered without completing a value.
        size: usize,
        /// Configured limit.
        max: usize,
    },
}

/// Pluggable value serialization format.
///
/// `encode` must be total over [`Value`] and `decode` must be its exact
/// structural inverse: `decode(encode(v)) == v` for every `v`.
pub trait Codec: Clone + Send + Sync + 'static {
    /// Encode a value to bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if the underlying writer fails.
    fn encode(&self, value: &Value) -> Result<Bytes, CodecError>;

    /// Decode exactly one value occupying all of `buf`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` for malformed or incomplete input and
    /// `CodecError::TrailingBytes` if `buf` holds more than one value.
    fn decode(&self, buf: &[u8]) -> Result<Value, CodecError>;

    /// Decode one value from the front of a stream buffer.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when it does not yet hold
    /// a complete value. On success the consumed bytes are removed from `buf`.
    fn try_decode(&self, buf: &mut BytesMut) -> Result<Option<Value>, CodecError>;
}

/// MessagePack codec backed by `rmpv`.
///
/// Raw bytes are written as `str` when they are valid UTF-8 and as `bin`
/// otherwise; both decode to [`Value::Raw`]. Unsigned integers above
/// `i64::MAX` and extension types are rejected on decode.
#[derive(Clone, Default, Debug, Copy)]
pub struct MsgpackCodec;

impl Codec for MsgpackCodec {
    fn encode(&self, value: &Value) -> Result<Bytes, CodecError> {
        let mut out = Vec::with_capacity(64);
        rmpv::encode::write_value(&mut out, &to_rmpv(value))
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(Bytes::from(out))
    }

    fn decode(&self, buf: &[u8]) -> Result<Value, CodecError> {
        let mut cursor = Cursor::new(buf);
        let raw = rmpv::decode::read_value(&mut cursor)
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        let consumed = cursor.position() as usize;
        if consumed < buf.len() {
            return Err(CodecError::TrailingBytes(buf.len() - consumed));
        }
        from_rmpv(raw)
    }

    fn try_decode(&self, buf: &mut BytesMut) -> Result<Option<Value>, CodecError> {
        if buf.is_empty() {
            return Ok(None);
        }
        let mut cursor = Cursor::new(&buf[..]);
        match rmpv::decode::read_value(&mut cursor) {
            Ok(raw) => {
                let consumed = cursor.position() as usize;
                buf.advance(consumed);
                from_rmpv(raw).map(Some)
            }
            Err(e) if is_incomplete(&e) => Ok(None),
            Err(e) => Err(CodecError::Decode(e.to_string())),
        }
    }
}

fn is_incomplete(err: &rmpv::decode::Error) -> bool {
    match err {
        rmpv::decode::Error::InvalidMarkerRead(e) | rmpv::decode::Error::InvalidDataRead(e) => {
            e.kind() == io::ErrorKind::UnexpectedEof
        }
        #[allow(unreachable_patterns)]
        _ => false,
    }
}

fn to_rmpv(value: &Value) -> rmpv::Value {
    match value {
        Value::Nil => rmpv::Value::Nil,
        Value::Boolean(b) => rmpv::Value::Boolean(*b),
        Value::Integer(i) => rmpv::Value::from(*i),
        Value::Float32(f) => rmpv::Value::F32(*f),
        Value::Float64(f) => rmpv::Value::F64(*f),
        Value::Raw(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => rmpv::Value::from(s),
            Err(_) => rmpv::Value::Binary(bytes.clone()),
        },
        Value::Array(items) => rmpv::Value::Array(items.iter().map(to_rmpv).collect()),
        Value::Map(map) => rmpv::Value::Map(
            map.iter()
                .map(|(k, v)| (to_rmpv(k), to_rmpv(v)))
                .collect(),
        ),
    }
}

fn from_rmpv(raw: rmpv::Value) -> Result<Value, CodecError> {
    Ok(match raw {
        rmpv::Value::Nil => Value::Nil,
        rmpv::Value::Boolean(b) => Value::Boolean(b),
        rmpv::Value::Integer(i) => match i.as_i64() {
            Some(v) => Value::Integer(v),
            None => {
                return Err(CodecError::Unsupported(format!(
                    "integer {:?} does not fit in i64",
                    i
                )));
            }
        },
        rmpv::Value::F32(f) => Value::Float32(f),
        rmpv::Value::F64(f) => Value::Float64(f),
        rmpv::Value::String(s) => Value::Raw(s.into_bytes()),
        rmpv::Value::Binary(bytes) => Value::Raw(bytes),
        rmpv::Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_rmpv)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        rmpv::Value::Map(entries) => {
            let mut map = ValueMap::with_capacity(entries.len());
            for (k, v) in entries {
                map.insert(from_rmpv(k)?, from_rmpv(v)?);
            }
            Value::Map(map)
        }
        rmpv::Value::Ext(tag, _) => {
            return Err(CodecError::Unsupported(format!("ext type {}", tag)));
        }
    })
}

/// Incremental decoder turning a byte stream into values.
///
/// Feed bytes with [`FrameDecoder::extend`] (or read directly into
/// [`FrameDecoder::buffer_mut`]) and drain complete values with
/// [`FrameDecoder::next_value`].
#[derive(Debug)]
pub struct FrameDecoder<C: Codec> {
    codec: C,
    buffer: BytesMut,
    max_frame_size: usize,
}

impl<C: Codec> FrameDecoder<C> {
    /// Create a decoder with the given frame size limit.
    pub fn new(codec: C, max_frame_size: usize) -> Self {
        Self {
            codec,
            buffer: BytesMut::with_capacity(4096),
            max_frame_size,
        }
    }

    /// Append received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Mutable access to the receive buffer, for `read_buf`-style reads.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete value, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns the codec's error for malformed input, or
    /// `CodecError::FrameTooLarge` when an incomplete value exceeds the limit.
    /// After an error the stream is unusable.
    pub fn next_value(&mut self) -> Result<Option<Value>, CodecError> {
        match self.codec.try_decode(&mut self.buffer)? {
            Some(value) => Ok(Some(value)),
            None if self.buffer.len() > self.max_frame_size => Err(CodecError::FrameTooLarge {
                size: self.buffer.len(),
                max: self.max_frame_size,
            }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: &Value) -> Value {
        let codec = MsgpackCodec;
        let bytes = codec.encode(value).expect("encode");
        codec.decode(&bytes).expect("decode")
    }

    #[test]
    fn test_scalars_roundtrip() {
        for value in [
            Value::Nil,
            Value::Boolean(false),
            Value::Boolean(true),
            Value::Integer(0),
            Value::Integer(-1),
            Value::Integer(i64::MAX),
            Value::Integer(i64::MIN),
            Value::Float32(1.5),
            Value::Float64(-2.25),
            Value::from("1"),
            Value::from(vec![0xffu8, 0x00, 0x80]),
        ] {
            assert_eq!(roundtrip(&value), value);
        }
    }

    #[test]
    fn test_float_tags_preserved() {
        let encoded = MsgpackCodec.encode(&Value::Float32(1.0)).expect("encode");
        assert_eq!(encoded[0], 0xca);
        let encoded = MsgpackCodec.encode(&Value::Float64(1.0)).expect("encode");
        assert_eq!(encoded[0], 0xcb);
    }

    #[test]
    fn test_raw_encoding_choice() {
        let text = MsgpackCodec.encode(&Value::from("ab")).expect("encode");
        assert_eq!(&text[..], &[0xa2, b'a', b'b']);
        let binary = MsgpackCodec
            .encode(&Value::from(vec![0xffu8]))
            .expect("encode");
        assert_eq!(&binary[..], &[0xc4, 0x01, 0xff]);
    }

    #[test]
    fn test_u64_overflow_rejected() {
        // uint64 0xffffffffffffffff
        let bytes = [0xcf, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(
            MsgpackCodec.decode(&bytes),
            Err(CodecError::Unsupported(_))
        ));
    }

    #[test]
    fn test_ext_rejected() {
        // fixext1, type 5, data 0x01
        let bytes = [0xd4, 0x05, 0x01];
        assert!(matches!(
            MsgpackCodec.decode(&bytes),
            Err(CodecError::Unsupported(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let bytes = [0xc0, 0xc0];
        assert_eq!(MsgpackCodec.decode(&bytes), Err(CodecError::TrailingBytes(1)));
    }

    #[test]
    fn test_frame_decoder_handles_split_values() {
        let codec = MsgpackCodec;
        let first = codec
            .encode(&Value::from(vec![Value::from(1), Value::from("hello")]))
            .expect("encode");
        let second = codec.encode(&Value::Integer(42)).expect("encode");

        let mut stream = first.to_vec();
        stream.extend_from_slice(&second);

        let mut decoder = FrameDecoder::new(codec, DEFAULT_MAX_FRAME_SIZE);
        let mut decoded = Vec::new();
        for byte in stream {
            decoder.extend(&[byte]);
            while let Some(value) = decoder.next_value().expect("decode") {
                decoded.push(value);
            }
        }

        assert_eq!(
            decoded,
            vec![
                Value::from(vec![Value::from(1), Value::from("hello")]),
                Value::Integer(42),
            ]
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_frame_decoder_limit() {
        // array32 header announcing many elements, never completed
        let mut decoder = FrameDecoder::new(MsgpackCodec, 8);
        decoder.extend(&[0xdd, 0x00, 0x00, 0x10, 0x00]);
        decoder.extend(&[0x01; 8]);
        assert!(matches!(
            decoder.next_value(),
            Err(CodecError::FrameTooLarge { max: 8, .. })
        ));
    }
}
