//! Action Message Format (AMF0 + AMF3)
//!
//! RTMP command messages carry AMF0 (or AMF3 behind the 0x11 switch);
//! script-data tags carry AMF0. The decoders keep reference tables per
//! instance; create one per message or call `reset` between messages.

pub mod amf0;
pub mod amf3;
pub mod metadata;
pub mod value;

pub use amf0::{Amf0Decoder, Amf0Encoder};
pub use amf3::{Amf3Decoder, Amf3Encoder};
pub use metadata::{reform, Reform, ON_META_DATA, SET_DATA_FRAME};
pub use value::{AmfValue, Trait};

use bytes::{Bytes, BytesMut};

use crate::error::AmfError;

/// AMF serialization version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Amf0,
    Amf3,
}

/// Decode a whole message body with a fresh decoder
pub fn decode_batch(mut data: Bytes, version: Version) -> Result<Vec<AmfValue>, AmfError> {
    match version {
        Version::Amf0 => Amf0Decoder::new().decode_batch(&mut data),
        Version::Amf3 => Amf3Decoder::new().decode_batch(&mut data),
    }
}

/// Encode values into a fresh buffer
pub fn encode_batch(vals: &[AmfValue], version: Version) -> Result<Bytes, AmfError> {
    let mut buf = BytesMut::new();
    match version {
        Version::Amf0 => Amf0Encoder::new().encode_batch(&mut buf, vals)?,
        Version::Amf3 => Amf3Encoder::new().encode_batch(&mut buf, vals)?,
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf_object;

    #[test]
    fn test_both_versions_invert() {
        let vals = vec![
            AmfValue::String("onStatus".into()),
            AmfValue::Number(0.0),
            AmfValue::Null,
            amf_object! { "level" => "status", "code" => "NetStream.Play.Start" },
        ];
        for version in [Version::Amf0, Version::Amf3] {
            let encoded = encode_batch(&vals, version).unwrap();
            let decoded = decode_batch(encoded, version).unwrap();
            assert_eq!(decoded, vals, "{:?}", version);
        }
    }
}
