//! AMF3 encoder and decoder
//!
//! AMF3 adds U29 variable-length integers and per-message reference tables
//! for strings, complex objects and traits. RTMP carries AMF3 command
//! payloads as message type 17 (one leading format byte, then AMF0 with the
//! 0x11 switch) so this codec is reached through [`super::amf0`] as well.
//!
//! Type markers:
//! ```text
//! 0x00 Undefined   0x01 Null      0x02 False     0x03 True
//! 0x04 Integer     0x05 Double    0x06 String    0x07 XMLDocument
//! 0x08 Date        0x09 Array     0x0A Object    0x0B XML
//! 0x0C ByteArray
//! ```

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::value::{AmfValue, Trait};
use crate::error::AmfError;

pub(super) const MARKER_UNDEFINED: u8 = 0x00;
pub(super) const MARKER_NULL: u8 = 0x01;
pub(super) const MARKER_FALSE: u8 = 0x02;
pub(super) const MARKER_TRUE: u8 = 0x03;
pub(super) const MARKER_INTEGER: u8 = 0x04;
pub(super) const MARKER_DOUBLE: u8 = 0x05;
pub(super) const MARKER_STRING: u8 = 0x06;
pub(super) const MARKER_XML_DOC: u8 = 0x07;
pub(super) const MARKER_DATE: u8 = 0x08;
pub(super) const MARKER_ARRAY: u8 = 0x09;
pub(super) const MARKER_OBJECT: u8 = 0x0A;
pub(super) const MARKER_XML: u8 = 0x0B;
pub(super) const MARKER_BYTE_ARRAY: u8 = 0x0C;

/// Largest value a U29 can carry
pub const U29_MAX: u32 = 0x1FFF_FFFF;

/// Largest positive AMF3 integer (29-bit signed)
pub const INTEGER_MAX: i32 = 0x0FFF_FFFF;

/// Smallest negative AMF3 integer
pub const INTEGER_MIN: i32 = -0x1000_0000;

/// AMF3 decoder with per-instance reference tables
///
/// Tables accumulate across values within one message; call [`reset`]
/// between messages.
///
/// [`reset`]: Amf3Decoder::reset
#[derive(Debug, Default)]
pub struct Amf3Decoder {
    string_refs: Vec<String>,
    object_refs: Vec<AmfValue>,
    trait_refs: Vec<Trait>,
}

impl Amf3Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the reference tables (call between messages)
    pub fn reset(&mut self) {
        self.string_refs.clear();
        self.object_refs.clear();
        self.trait_refs.clear();
    }

    /// Decode a single AMF3 value
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }
        let marker = buf.get_u8();
        match marker {
            MARKER_UNDEFINED => Ok(AmfValue::Undefined),
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_FALSE => Ok(AmfValue::Boolean(false)),
            MARKER_TRUE => Ok(AmfValue::Boolean(true)),
            MARKER_INTEGER => {
                let u29 = decode_u29(buf)?;
                // sign extend from 29 bits
                let val = if u29 > INTEGER_MAX as u32 {
                    (u29 as i64 - 0x2000_0000) as i32
                } else {
                    u29 as i32
                };
                Ok(AmfValue::Integer(val))
            }
            MARKER_DOUBLE => {
                if buf.remaining() < 8 {
                    return Err(AmfError::UnexpectedEof);
                }
                Ok(AmfValue::Number(buf.get_f64()))
            }
            MARKER_STRING => Ok(AmfValue::String(self.decode_string(buf)?)),
            MARKER_XML_DOC | MARKER_XML => self.decode_xml(buf),
            MARKER_DATE => self.decode_date(buf),
            MARKER_ARRAY => self.decode_array(buf),
            MARKER_OBJECT => self.decode_object(buf),
            MARKER_BYTE_ARRAY => self.decode_byte_array(buf),
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

    /// U29 reference int: low bit clear means the rest is a table index,
    /// set means the rest is an inline length/flag word.
    fn decode_ref_int(&mut self, buf: &mut Bytes) -> Result<(bool, u32), AmfError> {
        let u29 = decode_u29(buf)?;
        let is_ref = (u29 & 0x01) == 0;
        Ok((is_ref, u29 >> 1))
    }

    pub(super) fn decode_string(&mut self, buf: &mut Bytes) -> Result<String, AmfError> {
        let (is_ref, val) = self.decode_ref_int(buf)?;
        if is_ref {
            return self
                .string_refs
                .get(val as usize)
                .cloned()
                .ok_or(AmfError::BadReference(val as usize));
        }
        let len = val as usize;
        if buf.remaining() < len {
            return Err(AmfError::UnexpectedEof);
        }
        let s = String::from_utf8(buf.copy_to_bytes(len).to_vec())
            .map_err(|_| AmfError::InvalidUtf8)?;
        if !s.is_empty() {
            self.string_refs.push(s.clone());
        }
        Ok(s)
    }

    fn decode_xml(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let (is_ref, val) = self.decode_ref_int(buf)?;
        if is_ref {
            return self
                .object_refs
                .get(val as usize)
                .cloned()
                .ok_or(AmfError::BadReference(val as usize));
        }
        let len = val as usize;
        if buf.remaining() < len {
            return Err(AmfError::UnexpectedEof);
        }
        let s = String::from_utf8(buf.copy_to_bytes(len).to_vec())
            .map_err(|_| AmfError::InvalidUtf8)?;
        let v = AmfValue::Xml(s);
        self.object_refs.push(v.clone());
        Ok(v)
    }

    fn decode_date(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let (is_ref, val) = self.decode_ref_int(buf)?;
        if is_ref {
            return self
                .object_refs
                .get(val as usize)
                .cloned()
                .ok_or(AmfError::BadReference(val as usize));
        }
        if buf.remaining() < 8 {
            return Err(AmfError::UnexpectedEof);
        }
        let v = AmfValue::Date(buf.get_f64());
        self.object_refs.push(v.clone());
        Ok(v)
    }

    fn decode_byte_array(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let (is_ref, val) = self.decode_ref_int(buf)?;
        if is_ref {
            return self
                .object_refs
                .get(val as usize)
                .cloned()
                .ok_or(AmfError::BadReference(val as usize));
        }
        let len = val as usize;
        if buf.remaining() < len {
            return Err(AmfError::UnexpectedEof);
        }
        let v = AmfValue::ByteArray(buf.copy_to_bytes(len));
        self.object_refs.push(v.clone());
        Ok(v)
    }

    fn decode_array(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let (is_ref, val) = self.decode_ref_int(buf)?;
        if is_ref {
            return self
                .object_refs
                .get(val as usize)
                .cloned()
                .ok_or(AmfError::BadReference(val as usize));
        }
        // associative portion: key/value pairs until the empty key
        let first_key = self.decode_string(buf)?;
        if !first_key.is_empty() {
            // mixed arrays do not occur in RTMP command traffic
            return Err(AmfError::Unsupported(MARKER_ARRAY));
        }
        let mut out = Vec::with_capacity(val as usize);
        for _ in 0..val {
            out.push(self.decode(buf)?);
        }
        let v = AmfValue::Array(out);
        self.object_refs.push(v.clone());
        Ok(v)
    }

    fn decode_object(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let (is_ref, flags) = self.decode_ref_int(buf)?;
        if is_ref {
            return self
                .object_refs
                .get(flags as usize)
                .cloned()
                .ok_or(AmfError::BadReference(flags as usize));
        }

        let class_trait = if (flags & 0x01) == 0 {
            let idx = (flags >> 1) as usize;
            self.trait_refs
                .get(idx)
                .cloned()
                .ok_or(AmfError::BadReference(idx))?
        } else {
            let mut t = Trait {
                externalizable: (flags & 0x02) != 0,
                dynamic: (flags & 0x04) != 0,
                ..Trait::default()
            };
            t.class_name = self.decode_string(buf)?;
            let sealed = flags >> 3;
            for _ in 0..sealed {
                t.properties.push(self.decode_string(buf)?);
            }
            self.trait_refs.push(t.clone());
            t
        };

        if class_trait.externalizable {
            let v = match class_trait.class_name.as_str() {
                // flex AsyncMessageExt
                "DSA" => {
                    let mut obj = self.decode_abstract_message(buf)?;
                    self.decode_external(buf, &mut obj, &[&["correlationId", "correlationIdBytes"]])?;
                    AmfValue::Object(obj)
                }
                // flex AcknowledgeMessageExt
                "DSK" => {
                    let mut obj = self.decode_abstract_message(buf)?;
                    self.decode_external(buf, &mut obj, &[&["correlationId", "correlationIdBytes"]])?;
                    self.decode_external(buf, &mut obj, &[])?;
                    AmfValue::Object(obj)
                }
                "flex.messaging.io.ArrayCollection" => {
                    let inner = self.decode(buf)?;
                    self.object_refs.push(inner.clone());
                    inner
                }
                _ => return Err(AmfError::Unsupported(MARKER_OBJECT)),
            };
            self.object_refs.push(v.clone());
            return Ok(v);
        }

        let mut obj = HashMap::new();
        for key in &class_trait.properties {
            obj.insert(key.clone(), self.decode(buf)?);
        }
        if class_trait.dynamic {
            loop {
                let key = self.decode_string(buf)?;
                if key.is_empty() {
                    break;
                }
                let val = self.decode(buf)?;
                obj.insert(key, val);
            }
        }

        let v = if class_trait.class_name.is_empty() {
            AmfValue::Object(obj)
        } else {
            AmfValue::TypedObject {
                class_name: class_trait.class_name,
                properties: obj,
            }
        };
        self.object_refs.push(v.clone());
        Ok(v)
    }

    /// flex AbstractMessage boilerplate shared by DSA/DSK
    fn decode_abstract_message(
        &mut self,
        buf: &mut Bytes,
    ) -> Result<HashMap<String, AmfValue>, AmfError> {
        let mut obj = HashMap::new();
        self.decode_external(
            buf,
            &mut obj,
            &[
                &[
                    "body",
                    "clientId",
                    "destination",
                    "headers",
                    "messageId",
                    "timeStamp",
                    "timeToLive",
                ],
                &["clientIdBytes", "messageIdBytes"],
            ],
        )?;
        Ok(obj)
    }

    /// Externalizable field scheme: flag bytes (high bit continues), one bit
    /// per named field, reserved high bits decode as anonymous extras.
    fn decode_external(
        &mut self,
        buf: &mut Bytes,
        obj: &mut HashMap<String, AmfValue>,
        field_sets: &[&[&str]],
    ) -> Result<(), AmfError> {
        let mut flag_set = Vec::new();
        loop {
            if buf.is_empty() {
                return Err(AmfError::UnexpectedEof);
            }
            let flag = buf.get_u8();
            flag_set.push(flag);
            if (flag & 0x80) == 0 {
                break;
            }
        }

        for (i, flags) in flag_set.iter().enumerate() {
            let fields: &[&str] = field_sets.get(i).copied().unwrap_or(&[]);
            for (p, field) in fields.iter().enumerate() {
                if (flags & (1 << p)) != 0 {
                    let val = self.decode(buf)?;
                    obj.insert((*field).to_string(), val);
                }
            }
            let reserved = fields.len() as u8;
            if (flags >> reserved) != 0 {
                for j in reserved..6 {
                    if ((flags >> j) & 0x01) != 0 {
                        let val = self.decode(buf)?;
                        obj.insert(format!("extra_{}_{}", i, j), val);
                    }
                }
            }
        }
        Ok(())
    }
}

/// AMF3 encoder
///
/// Encoding always writes literals (no reference-table lookups); objects
/// encode their properties sorted so output bytes are deterministic.
#[derive(Debug, Default)]
pub struct Amf3Encoder;

impl Amf3Encoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode a single value
    pub fn encode(&self, buf: &mut BytesMut, val: &AmfValue) -> Result<(), AmfError> {
        match val {
            AmfValue::Undefined => buf.put_u8(MARKER_UNDEFINED),
            AmfValue::Null => buf.put_u8(MARKER_NULL),
            AmfValue::Boolean(false) => buf.put_u8(MARKER_FALSE),
            AmfValue::Boolean(true) => buf.put_u8(MARKER_TRUE),
            AmfValue::Integer(i) => {
                if (INTEGER_MIN..=INTEGER_MAX).contains(i) {
                    buf.put_u8(MARKER_INTEGER);
                    let u29 = if *i < 0 {
                        (*i as i64 + 0x2000_0000) as u32
                    } else {
                        *i as u32
                    };
                    encode_u29(buf, u29)?;
                } else {
                    buf.put_u8(MARKER_DOUBLE);
                    buf.put_f64(*i as f64);
                }
            }
            AmfValue::Number(n) => {
                buf.put_u8(MARKER_DOUBLE);
                buf.put_f64(*n);
            }
            AmfValue::String(s) => {
                buf.put_u8(MARKER_STRING);
                encode_utf8(buf, s)?;
            }
            AmfValue::Xml(s) => {
                buf.put_u8(MARKER_XML);
                encode_utf8(buf, s)?;
            }
            AmfValue::Date(ms) => {
                buf.put_u8(MARKER_DATE);
                encode_u29(buf, 0x01)?;
                buf.put_f64(*ms);
            }
            AmfValue::ByteArray(b) => {
                buf.put_u8(MARKER_BYTE_ARRAY);
                encode_u29(buf, ((b.len() as u32) << 1) | 0x01)?;
                buf.put_slice(b);
            }
            AmfValue::Array(items) => {
                buf.put_u8(MARKER_ARRAY);
                encode_u29(buf, ((items.len() as u32) << 1) | 0x01)?;
                encode_utf8(buf, "")?;
                for item in items {
                    self.encode(buf, item)?;
                }
            }
            AmfValue::Object(props) => {
                self.encode_object(buf, "", props)?;
            }
            AmfValue::EcmaArray(props) => {
                self.encode_object(buf, "", props)?;
            }
            AmfValue::TypedObject {
                class_name,
                properties,
            } => {
                self.encode_object(buf, class_name, properties)?;
            }
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

    /// Objects encode as a sealed trait literal with sorted property names.
    fn encode_object(
        &self,
        buf: &mut BytesMut,
        class_name: &str,
        props: &HashMap<String, AmfValue>,
    ) -> Result<(), AmfError> {
        buf.put_u8(MARKER_OBJECT);

        let mut keys: Vec<&String> = props.keys().collect();
        keys.sort();

        // trait literal, not externalizable, not dynamic
        let u29 = 0x03 | ((keys.len() as u32) << 4);
        encode_u29(buf, u29)?;
        encode_utf8(buf, class_name)?;
        for k in &keys {
            encode_utf8(buf, k)?;
        }
        for k in &keys {
            self.encode(buf, &props[k.as_str()])?;
        }
        Ok(())
    }
}

/// Read a U29: 1-4 bytes, high bit continues for the first three,
/// the fourth byte contributes all 8 bits.
pub(super) fn decode_u29(buf: &mut Bytes) -> Result<u32, AmfError> {
    let mut result: u32 = 0;
    for i in 0..4 {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }
        let b = buf.get_u8();
        if i == 3 {
            result = (result << 8) | b as u32;
            break;
        }
        result = (result << 7) | (b & 0x7F) as u32;
        if (b & 0x80) == 0 {
            break;
        }
    }
    Ok(result)
}

/// Write a U29; values above [`U29_MAX`] fail
pub(super) fn encode_u29(buf: &mut BytesMut, val: u32) -> Result<(), AmfError> {
    match val {
        0..=0x7F => buf.put_u8(val as u8),
        0x80..=0x3FFF => {
            buf.put_u8((val >> 7) as u8 | 0x80);
            buf.put_u8((val & 0x7F) as u8);
        }
        0x4000..=0x1F_FFFF => {
            buf.put_u8((val >> 14) as u8 | 0x80);
            buf.put_u8(((val >> 7) & 0x7F) as u8 | 0x80);
            buf.put_u8((val & 0x7F) as u8);
        }
        0x20_0000..=U29_MAX => {
            buf.put_u8((val >> 22) as u8 | 0x80);
            buf.put_u8(((val >> 15) & 0x7F) as u8 | 0x80);
            buf.put_u8(((val >> 8) & 0x7F) as u8 | 0x80);
            buf.put_u8((val & 0xFF) as u8);
        }
        _ => return Err(AmfError::InvalidU29),
    }
    Ok(())
}

fn encode_utf8(buf: &mut BytesMut, s: &str) -> Result<(), AmfError> {
    encode_u29(buf, ((s.len() as u32) << 1) | 0x01)?;
    buf.put_slice(s.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf_object;

    fn round_trip(val: &AmfValue) -> AmfValue {
        let enc = Amf3Encoder::new();
        let mut buf = BytesMut::new();
        enc.encode(&mut buf, val).unwrap();
        let mut dec = Amf3Decoder::new();
        let mut bytes = buf.freeze();
        let out = dec.decode(&mut bytes).unwrap();
        assert!(bytes.is_empty(), "decoder left {} bytes", bytes.len());
        out
    }

    #[test]
    fn test_u29_boundaries() {
        for val in [0u32, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1F_FFFF, 0x20_0000, U29_MAX] {
            let mut buf = BytesMut::new();
            encode_u29(&mut buf, val).unwrap();
            let mut bytes = buf.freeze();
            assert_eq!(decode_u29(&mut bytes).unwrap(), val, "u29 {:#x}", val);
            assert!(bytes.is_empty());
        }
    }

    #[test]
    fn test_u29_lengths() {
        let cases = [(0x7Fu32, 1usize), (0x3FFF, 2), (0x1F_FFFF, 3), (U29_MAX, 4)];
        for (val, len) in cases {
            let mut buf = BytesMut::new();
            encode_u29(&mut buf, val).unwrap();
            assert_eq!(buf.len(), len);
        }
    }

    #[test]
    fn test_u29_overflow_rejected() {
        let mut buf = BytesMut::new();
        assert_eq!(
            encode_u29(&mut buf, U29_MAX + 1),
            Err(AmfError::InvalidU29)
        );
    }

    #[test]
    fn test_scalar_round_trips() {
        for val in [
            AmfValue::Undefined,
            AmfValue::Null,
            AmfValue::Boolean(true),
            AmfValue::Boolean(false),
            AmfValue::Number(2.5),
            AmfValue::Number(-0.0),
            AmfValue::Integer(0),
            AmfValue::Integer(1234),
            AmfValue::Integer(INTEGER_MAX),
            AmfValue::Integer(-1),
            AmfValue::Integer(INTEGER_MIN),
            AmfValue::String("hello".into()),
            AmfValue::String(String::new()),
            AmfValue::Date(1_600_000_000_000.0),
            AmfValue::Xml("<a/>".into()),
            AmfValue::ByteArray(Bytes::from_static(&[1, 2, 3])),
        ] {
            assert_eq!(round_trip(&val), val);
        }
    }

    #[test]
    fn test_integer_out_of_range_becomes_double() {
        let out = round_trip(&AmfValue::Integer(i32::MAX));
        assert_eq!(out, AmfValue::Number(i32::MAX as f64));
    }

    #[test]
    fn test_array_round_trip() {
        let val = AmfValue::Array(vec![
            AmfValue::Integer(1),
            AmfValue::String("two".into()),
            AmfValue::Null,
        ]);
        assert_eq!(round_trip(&val), val);
    }

    #[test]
    fn test_object_round_trip() {
        let val = amf_object! {
            "app" => "live",
            "count" => 3.0,
            "ok" => true,
        };
        assert_eq!(round_trip(&val), val);
    }

    #[test]
    fn test_typed_object_round_trip() {
        let val = AmfValue::TypedObject {
            class_name: "org.example.Point".to_string(),
            properties: {
                let mut m = std::collections::HashMap::new();
                m.insert("x".to_string(), AmfValue::Number(1.0));
                m.insert("y".to_string(), AmfValue::Number(2.0));
                m
            },
        };
        assert_eq!(round_trip(&val), val);
    }

    #[test]
    fn test_string_reference_decoding() {
        // ["ab", "ab"] where the second occurrence is a table reference
        let mut buf = BytesMut::new();
        buf.put_u8(MARKER_STRING);
        buf.put_u8(0x05); // len 2, literal
        buf.put_slice(b"ab");
        buf.put_u8(MARKER_STRING);
        buf.put_u8(0x00); // reference 0

        let mut dec = Amf3Decoder::new();
        let mut bytes = buf.freeze();
        let vals = dec.decode_batch(&mut bytes).unwrap();
        assert_eq!(vals.len(), 2);
        assert_eq!(vals[0], vals[1]);
        assert_eq!(vals[0].as_str(), Some("ab"));
    }

    #[test]
    fn test_trait_reference_decoding() {
        // two objects of the same class; the second uses a trait reference
        let obj = amf_object! { "a" => 1.0 };
        let enc = Amf3Encoder::new();
        let mut buf = BytesMut::new();
        enc.encode(&mut buf, &obj).unwrap();
        // hand-build the second object with a trait ref (index 0): u29 = 0b01
        buf.put_u8(MARKER_OBJECT);
        buf.put_u8(0x01); // low bit set: not an object ref; bit1 clear: trait ref 0
        buf.put_u8(MARKER_DOUBLE);
        buf.put_f64(9.0);

        let mut dec = Amf3Decoder::new();
        let mut bytes = buf.freeze();
        let vals = dec.decode_batch(&mut bytes).unwrap();
        assert_eq!(vals[0].get_number("a"), Some(1.0));
        assert_eq!(vals[1].get_number("a"), Some(9.0));
    }

    #[test]
    fn test_dynamic_object_decoding() {
        // dynamic anonymous object {k: 5} built by hand
        let mut buf = BytesMut::new();
        buf.put_u8(MARKER_OBJECT);
        buf.put_u8(0x0B); // literal trait, dynamic, 0 sealed
        buf.put_u8(0x01); // class name ""
        buf.put_u8(0x03); // key "k" (len 1)
        buf.put_slice(b"k");
        buf.put_u8(MARKER_INTEGER);
        buf.put_u8(0x05);
        buf.put_u8(0x01); // empty key terminator

        let mut dec = Amf3Decoder::new();
        let mut bytes = buf.freeze();
        let val = dec.decode(&mut bytes).unwrap();
        assert_eq!(val.get_number("k"), Some(5.0));
    }

    #[test]
    fn test_array_collection_unwraps() {
        // externalizable flex.messaging.io.ArrayCollection wrapping [1.0]
        let mut buf = BytesMut::new();
        buf.put_u8(MARKER_OBJECT);
        buf.put_u8(0x07); // literal trait, externalizable
        let name = "flex.messaging.io.ArrayCollection";
        encode_u29(&mut buf, ((name.len() as u32) << 1) | 1).unwrap();
        buf.put_slice(name.as_bytes());
        // wrapped dense array of one double
        buf.put_u8(MARKER_ARRAY);
        buf.put_u8(0x03); // len 1
        buf.put_u8(0x01); // empty assoc
        buf.put_u8(MARKER_DOUBLE);
        buf.put_f64(1.0);

        let mut dec = Amf3Decoder::new();
        let mut bytes = buf.freeze();
        let val = dec.decode(&mut bytes).unwrap();
        assert_eq!(val, AmfValue::Array(vec![AmfValue::Number(1.0)]));
    }

    #[test]
    fn test_reset_clears_tables() {
        let mut dec = Amf3Decoder::new();
        let mut buf = BytesMut::new();
        buf.put_u8(MARKER_STRING);
        buf.put_u8(0x05);
        buf.put_slice(b"ab");
        let mut bytes = buf.freeze();
        dec.decode(&mut bytes).unwrap();
        dec.reset();

        // a reference now dangles
        let mut buf = BytesMut::new();
        buf.put_u8(MARKER_STRING);
        buf.put_u8(0x00);
        let mut bytes = buf.freeze();
        assert!(matches!(
            dec.decode(&mut bytes),
            Err(AmfError::BadReference(0))
        ));
    }

    #[test]
    fn test_truncated_input_fails() {
        let mut dec = Amf3Decoder::new();
        let mut bytes = Bytes::from_static(&[MARKER_DOUBLE, 0x00, 0x01]);
        assert_eq!(dec.decode(&mut bytes), Err(AmfError::UnexpectedEof));
    }
}
