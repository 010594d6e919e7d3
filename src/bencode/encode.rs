use super::value::Value;
use bytes::{BufMut, Bytes, BytesMut};

/// Encodes a bencode value to a byte vector.
///
/// The output follows the canonical bencode format:
/// - Integers: `i<number>e`
/// - Byte strings: `<length>:<data>`
/// - Lists: `l<items>e`
/// - Dictionaries: `d<key><value>...e` (keys sorted byte-wise)
///
/// Encoding cannot fail; every byte string is written verbatim.
///
/// # Examples
///
/// ```
/// use swarmwire::bencode::{encode, Value};
///
/// assert_eq!(encode(&Value::Integer(42)), b"i42e");
/// assert_eq!(encode(&Value::string("hello")), b"5:hello");
///
/// let list = Value::List(vec![Value::Integer(1), Value::string("two")]);
/// assert_eq!(encode(&list), b"li1e3:twoe");
///
/// let dict = Value::dict([("b", Value::Integer(2)), ("a", Value::Integer(1))]);
/// assert_eq!(encode(&dict), b"d1:ai1e1:bi2ee");
/// ```
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_value(value, &mut buf);
    buf.to_vec()
}

/// Encodes a value straight into a [`Bytes`] buffer.
pub fn encode_to_bytes(value: &Value) -> Bytes {
    let mut buf = BytesMut::new();
    encode_value(value, &mut buf);
    buf.freeze()
}

fn encode_value(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::Integer(i) => {
            buf.put_u8(b'i');
            buf.put_slice(i.to_string().as_bytes());
            buf.put_u8(b'e');
        }
        Value::Bytes(b) => encode_bytes(b, buf),
        Value::List(l) => {
            buf.put_u8(b'l');
            for item in l {
                encode_value(item, buf);
            }
            buf.put_u8(b'e');
        }
        Value::Dict(d) => {
            buf.put_u8(b'd');
            for (key, val) in d {
                encode_bytes(key, buf);
                encode_value(val, buf);
            }
            buf.put_u8(b'e');
        }
    }
}

fn encode_bytes(bytes: &[u8], buf: &mut BytesMut) {
    buf.put_slice(bytes.len().to_string().as_bytes());
    buf.put_u8(b':');
    buf.put_slice(bytes);
}
