//! AMF value types
//!
//! AMF0 and AMF3 share one value representation. Commands built by the
//! session and client layers construct these directly; the codecs in
//! [`super::amf0`] and [`super::amf3`] serialize them.

use std::collections::HashMap;

use bytes::Bytes;

/// Unified AMF value representation
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    /// Null (AMF0: 0x05, AMF3: 0x01)
    Null,

    /// Undefined (AMF0: 0x06, AMF3: 0x00)
    Undefined,

    /// Boolean (AMF0: 0x01, AMF3: 0x02/0x03)
    Boolean(bool),

    /// IEEE 754 double (AMF0: 0x00, AMF3: 0x05)
    Number(f64),

    /// 29-bit signed integer (AMF3 only: 0x04; encoded as Number in AMF0)
    Integer(i32),

    /// UTF-8 string (AMF0: 0x02/0x0C, AMF3: 0x06)
    String(String),

    /// Dense array (AMF0 strict array 0x0A, AMF3 array 0x09)
    Array(Vec<AmfValue>),

    /// Anonymous object (AMF0: 0x03, AMF3: 0x0A dynamic)
    Object(HashMap<String, AmfValue>),

    /// Associative array (AMF0 ECMA array 0x08)
    EcmaArray(HashMap<String, AmfValue>),

    /// Object with a class name (AMF0: 0x10, AMF3: 0x0A with typed trait)
    TypedObject {
        class_name: String,
        properties: HashMap<String, AmfValue>,
    },

    /// Milliseconds since the Unix epoch (AMF0: 0x0B, AMF3: 0x08)
    Date(f64),

    /// XML document (AMF0: 0x0F, AMF3: 0x07/0x0B)
    Xml(String),

    /// Raw bytes (AMF3 only: 0x0C)
    ByteArray(Bytes),
}

impl AmfValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            AmfValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, AmfValue>> {
        match self {
            AmfValue::Object(m) => Some(m),
            AmfValue::EcmaArray(m) => Some(m),
            AmfValue::TypedObject { properties, .. } => Some(properties),
            _ => None,
        }
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    /// Property lookup on any object-like value
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }
}

impl Default for AmfValue {
    fn default() -> Self {
        AmfValue::Null
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}

/// Builder for command info objects; keeps call sites terse
#[macro_export]
macro_rules! amf_object {
    ( $( $key:expr => $val:expr ),* $(,)? ) => {{
        let mut m = ::std::collections::HashMap::new();
        $( m.insert($key.to_string(), $crate::amf::AmfValue::from($val)); )*
        $crate::amf::AmfValue::Object(m)
    }};
}

/// Class trait for AMF3 objects (sealed property layout, flags)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trait {
    pub class_name: String,
    pub externalizable: bool,
    pub dynamic: bool,
    pub properties: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        let s = AmfValue::String("test".into());
        assert_eq!(s.as_str(), Some("test"));
        assert_eq!(s.as_number(), None);

        let n = AmfValue::Number(42.0);
        assert_eq!(n.as_number(), Some(42.0));
        assert_eq!(AmfValue::Integer(7).as_number(), Some(7.0));
    }

    #[test]
    fn test_object_lookup() {
        let obj = amf_object! {
            "app" => "live",
            "objectEncoding" => 0.0,
        };
        assert_eq!(obj.get_string("app"), Some("live"));
        assert_eq!(obj.get_number("objectEncoding"), Some(0.0));
        assert!(obj.get("missing").is_none());
    }

    #[test]
    fn test_lookup_works_across_object_kinds() {
        let mut m = HashMap::new();
        m.insert("k".to_string(), AmfValue::Number(1.0));

        let ecma = AmfValue::EcmaArray(m.clone());
        assert_eq!(ecma.get_number("k"), Some(1.0));

        let typed = AmfValue::TypedObject {
            class_name: "Point".to_string(),
            properties: m,
        };
        assert_eq!(typed.get_number("k"), Some(1.0));

        assert!(AmfValue::Null.get("k").is_none());
    }

    #[test]
    fn test_is_null_or_undefined() {
        assert!(AmfValue::Null.is_null_or_undefined());
        assert!(AmfValue::Undefined.is_null_or_undefined());
        assert!(!AmfValue::Boolean(false).is_null_or_undefined());
    }
}
