//! Script-data metadata reform
//!
//! Publishing clients send metadata as `@setDataFrame("onMetaData", {...})`
//! per the RTMP ScriptData convention; players expect plain
//! `onMetaData`. Ingest toward an upstream adds the wrapper, egress toward
//! a player strips it.

use bytes::{Bytes, BytesMut};

use super::amf0::{Amf0Decoder, Amf0Encoder};
use super::value::AmfValue;
use crate::error::AmfError;

pub const SET_DATA_FRAME: &str = "@setDataFrame";
pub const ON_META_DATA: &str = "onMetaData";

/// Which direction the payload is being reformed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reform {
    /// Prepend `@setDataFrame` when absent (publish toward an upstream)
    Add,
    /// Strip `@setDataFrame` when present (egress toward a player)
    Del,
}

/// Reform an AMF0 script payload in either direction.
///
/// The payload's first value must be a string; anything else is not a
/// metadata message.
pub fn reform(data: Bytes, direction: Reform) -> Result<Bytes, AmfError> {
    let mut probe = data.clone();
    let first = Amf0Decoder::new().decode(&mut probe)?;
    let name = match first {
        AmfValue::String(s) => s,
        _ => return Err(AmfError::NotEncodable),
    };

    match direction {
        Reform::Add => {
            if name == SET_DATA_FRAME {
                return Ok(data);
            }
            let mut buf = BytesMut::with_capacity(data.len() + SET_DATA_FRAME.len() + 3);
            Amf0Encoder::new().encode(&mut buf, &AmfValue::String(SET_DATA_FRAME.into()))?;
            buf.extend_from_slice(&data);
            Ok(buf.freeze())
        }
        Reform::Del => {
            if name != SET_DATA_FRAME {
                return Ok(data);
            }
            // the prefix is marker + u16 length + bytes
            let prefix_len = 3 + SET_DATA_FRAME.len();
            Ok(data.slice(prefix_len..))
        }
    }
}
