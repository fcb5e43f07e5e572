//! AMF0 encoder and decoder
//!
//! AMF0 is the serialization RTMP command messages use on the wire.
//!
//! Type markers:
//! ```text
//! 0x00 Number        0x01 Boolean      0x02 String       0x03 Object
//! 0x05 Null          0x06 Undefined    0x07 Reference    0x08 ECMA Array
//! 0x09 Object End    0x0A Strict Array 0x0B Date         0x0C Long String
//! 0x0F XML Document  0x10 Typed Object 0x11 AVM+ (switch to AMF3)
//! ```
//!
//! `Reference` (0x07) is declined with a typed error; nothing in RTMP
//! command traffic emits it.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::amf3::Amf3Decoder;
use super::value::AmfValue;
use crate::error::AmfError;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_REFERENCE: u8 = 0x07;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;
const MARKER_XML_DOCUMENT: u8 = 0x0F;
const MARKER_TYPED_OBJECT: u8 = 0x10;
const MARKER_AVMPLUS: u8 = 0x11;

/// Longest string the short form can carry
const SHORT_STRING_MAX: usize = 0xFFFF;

/// Nesting bound (malformed input must not blow the stack)
const MAX_DEPTH: usize = 64;

/// AMF0 decoder
///
/// Holds an embedded AMF3 decoder for the 0x11 switch; its reference
/// tables persist for the message and are cleared by [`reset`].
///
/// [`reset`]: Amf0Decoder::reset
#[derive(Debug, Default)]
pub struct Amf0Decoder {
    amf3: Amf3Decoder,
    depth: usize,
}

impl Amf0Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear embedded AMF3 reference tables (call between messages)
    pub fn reset(&mut self) {
        self.amf3.reset();
        self.depth = 0;
    }

    /// Decode a single AMF0 value
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }

        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(AmfError::NestingTooDeep);
        }
        let result = self.decode_inner(buf);
        self.depth -= 1;
        result
    }

    fn decode_inner(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let marker = buf.get_u8();
        match marker {
            MARKER_NUMBER => {
                if buf.remaining() < 8 {
                    return Err(AmfError::UnexpectedEof);
                }
                Ok(AmfValue::Number(buf.get_f64()))
            }
            MARKER_BOOLEAN => {
                if buf.is_empty() {
                    return Err(AmfError::UnexpectedEof);
                }
                Ok(AmfValue::Boolean(buf.get_u8() != 0))
            }
            MARKER_STRING => Ok(AmfValue::String(read_short_string(buf)?)),
            MARKER_LONG_STRING => Ok(AmfValue::String(read_long_string(buf)?)),
            MARKER_XML_DOCUMENT => Ok(AmfValue::Xml(read_long_string(buf)?)),
            MARKER_OBJECT => Ok(AmfValue::Object(self.read_properties(buf)?)),
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_UNDEFINED => Ok(AmfValue::Undefined),
            MARKER_REFERENCE => Err(AmfError::Unsupported(MARKER_REFERENCE)),
            MARKER_ECMA_ARRAY => {
                if buf.remaining() < 4 {
                    return Err(AmfError::UnexpectedEof);
                }
                // declared count is advisory; the body ends at the end marker
                let _count = buf.get_u32();
                Ok(AmfValue::EcmaArray(self.read_properties(buf)?))
            }
            MARKER_STRICT_ARRAY => {
                if buf.remaining() < 4 {
                    return Err(AmfError::UnexpectedEof);
                }
                let count = buf.get_u32();
                let mut items = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    items.push(self.decode(buf)?);
                }
                Ok(AmfValue::Array(items))
            }
            MARKER_DATE => {
                if buf.remaining() < 10 {
                    return Err(AmfError::UnexpectedEof);
                }
                let ms = buf.get_f64();
                let _tz = buf.get_i16(); // reserved, always zero
                Ok(AmfValue::Date(ms))
            }
            MARKER_TYPED_OBJECT => {
                let class_name = read_short_string(buf)?;
                Ok(AmfValue::TypedObject {
                    class_name,
                    properties: self.read_properties(buf)?,
                })
            }
            MARKER_AVMPLUS => self.amf3.decode(buf),
            m => Err(AmfError::UnknownMarker(m)),
        }
    }

    /// Decode values until the buffer is exhausted
    pub fn decode_batch(&mut self, buf: &mut Bytes) -> Result<Vec<AmfValue>, AmfError> {
        let mut out = Vec::new();
        while !buf.is_empty() {
            out.push(self.decode(buf)?);
        }
        Ok(out)
    }

    /// key/value pairs terminated by the empty key + object-end marker
    fn read_properties(&mut self, buf: &mut Bytes) -> Result<HashMap<String, AmfValue>, AmfError> {
        let mut props = HashMap::new();
        loop {
            let key = read_short_string(buf)?;
            if key.is_empty() {
                if buf.is_empty() {
                    return Err(AmfError::UnexpectedEof);
                }
                let end = buf.get_u8();
                if end != MARKER_OBJECT_END {
                    return Err(AmfError::UnknownMarker(end));
                }
                return Ok(props);
            }
            let val = self.decode(buf)?;
            props.insert(key, val);
        }
    }
}

/// AMF0 encoder
///
/// Objects and ECMA arrays write their properties sorted so output bytes
/// are deterministic. Strings longer than 65535 bytes pick the long form.
#[derive(Debug, Default)]
pub struct Amf0Encoder;

impl Amf0Encoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode a single value
    pub fn encode(&self, buf: &mut BytesMut, val: &AmfValue) -> Result<(), AmfError> {
        match val {
            AmfValue::Number(n) => {
                buf.put_u8(MARKER_NUMBER);
                buf.put_f64(*n);
            }
            AmfValue::Integer(i) => {
                buf.put_u8(MARKER_NUMBER);
                buf.put_f64(*i as f64);
            }
            AmfValue::Boolean(b) => {
                buf.put_u8(MARKER_BOOLEAN);
                buf.put_u8(u8::from(*b));
            }
            AmfValue::String(s) => {
                if s.len() > SHORT_STRING_MAX {
                    buf.put_u8(MARKER_LONG_STRING);
                    write_long_string(buf, s);
                } else {
                    buf.put_u8(MARKER_STRING);
                    write_short_string(buf, s);
                }
            }
            AmfValue::Xml(s) => {
                buf.put_u8(MARKER_XML_DOCUMENT);
                write_long_string(buf, s);
            }
            AmfValue::Object(props) => {
                buf.put_u8(MARKER_OBJECT);
                self.write_properties(buf, props)?;
            }
            AmfValue::Null => buf.put_u8(MARKER_NULL),
            AmfValue::Undefined => buf.put_u8(MARKER_UNDEFINED),
            AmfValue::EcmaArray(props) => {
                buf.put_u8(MARKER_ECMA_ARRAY);
                buf.put_u32(props.len() as u32);
                self.write_properties(buf, props)?;
            }
            AmfValue::Array(items) => {
                buf.put_u8(MARKER_STRICT_ARRAY);
                buf.put_u32(items.len() as u32);
                for item in items {
                    self.encode(buf, item)?;
                }
            }
            AmfValue::Date(ms) => {
                buf.put_u8(MARKER_DATE);
                buf.put_f64(*ms);
                buf.put_i16(0);
            }
            AmfValue::TypedObject {
                class_name,
                properties,
            } => {
                buf.put_u8(MARKER_TYPED_OBJECT);
                write_short_string(buf, class_name);
                self.write_properties(buf, properties)?;
            }
            AmfValue::ByteArray(_) => return Err(AmfError::NotEncodable),
        }
        Ok(())
    }

    /// Encode values in order
    pub fn encode_batch(&self, buf: &mut BytesMut, vals: &[AmfValue]) -> Result<(), AmfError> {
        for v in vals {
            self.encode(buf, v)?;
        }
        Ok(())
    }

    fn write_properties(
        &self,
        buf: &mut BytesMut,
        props: &HashMap<String, AmfValue>,
    ) -> Result<(), AmfError> {
        let mut keys: Vec<&String> = props.keys().collect();
        keys.sort();
        for k in keys {
            write_short_string(buf, k);
            self.encode(buf, &props[k.as_str()])?;
        }
        write_short_string(buf, "");
        buf.put_u8(MARKER_OBJECT_END);
        Ok(())
    }
}

fn read_short_string(buf: &mut Bytes) -> Result<String, AmfError> {
    if buf.remaining() < 2 {
        return Err(AmfError::UnexpectedEof);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEof);
    }
    String::from_utf8(buf.copy_to_bytes(len).to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

fn read_long_string(buf: &mut Bytes) -> Result<String, AmfError> {
    if buf.remaining() < 4 {
        return Err(AmfError::UnexpectedEof);
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEof);
    }
    String::from_utf8(buf.copy_to_bytes(len).to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

fn write_short_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn write_long_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}
