//! Bencode encoding and decoding ([BEP-3]).
//!
//! Bencode is the serialization format BitTorrent uses on the wire: extension
//! handshakes, `ut_metadata` messages and every DHT datagram are bencoded
//! dictionaries.
//!
//! # Data Types
//!
//! | Type | Format | Example |
//! |------|--------|---------|
//! | Integer | `i<number>e` | `i42e` → 42 |
//! | Byte String | `<length>:<data>` | `4:spam` → "spam" |
//! | List | `l<items>e` | `l4:spami42ee` → ["spam", 42] |
//! | Dictionary | `d<key><value>...e` | `d3:foo3:bare` → {"foo": "bar"} |
//!
//! # Examples
//!
//! ```
//! use swarmwire::bencode::{decode, decode_prefix, encode, Value};
//!
//! let value = decode(b"l4:spami42ee").unwrap();
//! assert_eq!(value.as_list().map(|l| l.len()), Some(2));
//! assert_eq!(encode(&value), b"l4:spami42ee");
//!
//! // A bencoded header followed by raw bytes.
//! let (header, consumed) = decode_prefix(b"d8:msg_typei1eeRAW").unwrap();
//! assert_eq!(header.get(b"msg_type").and_then(Value::as_integer), Some(1));
//! assert_eq!(consumed, 15);
//! ```
//!
//! # Error Handling
//!
//! Malformed input always surfaces as a [`BencodeError`]; nothing is coerced
//! into a default value:
//!
//! - [`BencodeError::MalformedInteger`] - e.g. `i-e`, `i03e`, overflow
//! - [`BencodeError::UnterminatedList`] / [`BencodeError::UnterminatedDict`]
//! - [`BencodeError::NegativeLength`] - e.g. `-1:x`
//! - [`BencodeError::TruncatedString`] - e.g. `5:ab`
//! - [`BencodeError::InvalidKeyType`] - a dictionary key that is not a string
//! - [`BencodeError::UnrecognizedToken`] - a byte that starts no value
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_prefix};
pub use encode::{encode, encode_to_bytes};
pub use error::BencodeError;
pub use value::Value;
