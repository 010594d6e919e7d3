//! Extension protocol handshake (BEP-10).

use super::error::PeerError;
use crate::bencode::{decode, encode_to_bytes, Value};
use bytes::Bytes;
use std::collections::BTreeMap;

/// The bencoded dictionary exchanged as extended message 0.
///
/// `extensions` is the `m` dictionary: extension name to the message id the
/// sender wants to receive that extension on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionHandshake {
    pub extensions: BTreeMap<String, u8>,
    pub client: Option<String>,
    pub port: Option<u16>,
    pub yourip: Option<Vec<u8>>,
    pub reqq: Option<i64>,
    pub metadata_size: Option<i64>,
}

impl ExtensionHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extensions(extensions: &[(&str, u8)]) -> Self {
        let mut hs = Self::new();
        for (name, id) in extensions {
            hs.extensions.insert((*name).to_string(), *id);
        }
        hs
    }

    pub fn encode(&self) -> Bytes {
        encode_to_bytes(&self.to_value())
    }

    /// The handshake as a bencode dictionary.
    pub fn to_value(&self) -> Value {
        let mut dict = BTreeMap::new();

        let m = self
            .extensions
            .iter()
            .map(|(name, id)| {
                (
                    Bytes::copy_from_slice(name.as_bytes()),
                    Value::Integer(*id as i64),
                )
            })
            .collect();
        dict.insert(Bytes::from_static(b"m"), Value::Dict(m));

        if let Some(port) = self.port {
            dict.insert(Bytes::from_static(b"p"), Value::Integer(port as i64));
        }

        if let Some(ref client) = self.client {
            dict.insert(Bytes::from_static(b"v"), Value::string(client));
        }

        if let Some(ref ip) = self.yourip {
            dict.insert(Bytes::from_static(b"yourip"), Value::bytes(ip));
        }

        if let Some(reqq) = self.reqq {
            dict.insert(Bytes::from_static(b"reqq"), Value::Integer(reqq));
        }

        if let Some(size) = self.metadata_size {
            dict.insert(Bytes::from_static(b"metadata_size"), Value::Integer(size));
        }

        Value::Dict(dict)
    }

    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        Self::from_value(&decode(data)?)
    }

    pub fn from_value(value: &Value) -> Result<Self, PeerError> {
        let dict = value
            .as_dict()
            .ok_or_else(|| PeerError::Extension("expected dict".into()))?;

        let mut hs = Self::new();

        if let Some(m) = dict.get(b"m".as_slice()).and_then(|v| v.as_dict()) {
            for (key, val) in m {
                // An id of 0 means the peer disabled that extension.
                if let (Ok(name), Some(id)) = (std::str::from_utf8(key), val.as_integer()) {
                    if let Ok(id @ 1..) = u8::try_from(id) {
                        hs.extensions.insert(name.to_string(), id);
                    }
                }
            }
        }

        hs.client = dict
            .get(b"v".as_slice())
            .and_then(|v| v.as_str())
            .map(String::from);

        hs.port = dict
            .get(b"p".as_slice())
            .and_then(|v| v.as_integer())
            .and_then(|p| u16::try_from(p).ok());

        hs.yourip = dict
            .get(b"yourip".as_slice())
            .and_then(|v| v.as_bytes())
            .map(|b| b.to_vec());

        hs.reqq = dict.get(b"reqq".as_slice()).and_then(|v| v.as_integer());

        hs.metadata_size = dict
            .get(b"metadata_size".as_slice())
            .and_then(|v| v.as_integer());

        Ok(hs)
    }

    pub fn get_extension_id(&self, name: &str) -> Option<u8> {
        self.extensions.get(name).copied()
    }
}
