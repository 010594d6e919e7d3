use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;

/// Binary strings longer than this are shortened when displayed.
const DISPLAY_HEX_LIMIT: usize = 32;

/// A bencode value.
///
/// Byte strings are kept as raw [`Bytes`]; they are only interpreted as text
/// on request through [`Value::as_str`]. Dictionaries are byte-ordered maps,
/// so encoding always emits keys in the sorted order strict peers expect.
///
/// # Examples
///
/// ```
/// use swarmwire::bencode::Value;
///
/// let int: Value = 42i64.into();
/// let string: Value = "hello".into();
/// let msg = Value::dict([("msg_type", Value::Integer(0)), ("piece", Value::Integer(3))]);
///
/// assert_eq!(int.as_integer(), Some(42));
/// assert_eq!(string.as_str(), Some("hello"));
/// assert_eq!(msg.get(b"piece").and_then(|v| v.as_integer()), Some(3));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A signed 64-bit integer.
    Integer(i64),
    /// A byte string (may or may not be valid UTF-8).
    Bytes(Bytes),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A dictionary with byte string keys.
    Dict(BTreeMap<Bytes, Value>),
}

impl Value {
    /// Creates a byte string value from a UTF-8 string.
    pub fn string(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// Creates a byte string value from raw bytes.
    pub fn bytes(b: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(b))
    }

    /// Builds a dictionary from `(key, value)` pairs.
    ///
    /// Later pairs overwrite earlier ones with the same key.
    pub fn dict<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<[u8]>,
    {
        Value::Dict(
            pairs
                .into_iter()
                .map(|(k, v)| (Bytes::copy_from_slice(k.as_ref()), v))
                .collect(),
        )
    }

    /// Returns the value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a byte string, if it is one.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the value as a UTF-8 string, if it is a valid UTF-8 byte string.
    ///
    /// # Examples
    ///
    /// ```
    /// use swarmwire::bencode::Value;
    ///
    /// assert_eq!(Value::string("hello").as_str(), Some("hello"));
    /// assert_eq!(Value::bytes(&[0xff, 0xfe]).as_str(), None);
    /// assert_eq!(Value::Integer(42).as_str(), None);
    /// ```
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Returns the value as a list, if it is one.
    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Returns the value as a dictionary reference, if it is one.
    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Consumes the value and returns the dictionary, if it is one.
    pub fn into_dict(self) -> Option<BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up a key in this value if it is a dictionary.
    ///
    /// Returns `None` if the value is not a dictionary or the key is absent.
    ///
    /// # Examples
    ///
    /// ```
    /// use swarmwire::bencode::decode;
    ///
    /// let value = decode(b"d3:foo3:bare").unwrap();
    /// assert_eq!(value.get(b"foo").and_then(|v| v.as_str()), Some("bar"));
    /// assert_eq!(value.get(b"missing"), None);
    /// ```
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?.get(key)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<BTreeMap<Bytes, Value>> for Value {
    fn from(d: BTreeMap<Bytes, Value>) -> Self {
        Value::Dict(d)
    }
}

/// Human-readable rendering for logs.
///
/// Printable UTF-8 strings are quoted, other byte strings are shown as hex
/// (shortened past 32 bytes). Dictionary keys are printed bare.
///
/// ```
/// use swarmwire::bencode::Value;
///
/// let hs = Value::dict([
///     ("m", Value::dict([("ut_metadata", Value::Integer(2))])),
///     ("yourip", Value::bytes(&[127, 0, 0, 1])),
/// ]);
/// assert_eq!(hs.to_string(), "{m: {ut_metadata: 2}, yourip: <7f000001>}");
/// ```
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Bytes(b) => match printable(b) {
                Some(s) => write!(f, "\"{}\"", s),
                None => write_hex(f, b),
            },
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Dict(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match printable(key) {
                        Some(s) => f.write_str(s)?,
                        None => write_hex(f, key)?,
                    }
                    write!(f, ": {}", value)?;
                }
                f.write_str("}")
            }
        }
    }
}

fn printable(b: &[u8]) -> Option<&str> {
    std::str::from_utf8(b)
        .ok()
        .filter(|s| !s.chars().any(char::is_control))
}

fn write_hex(f: &mut fmt::Formatter<'_>, b: &[u8]) -> fmt::Result {
    f.write_str("<")?;
    for byte in b.iter().take(DISPLAY_HEX_LIMIT) {
        write!(f, "{:02x}", byte)?;
    }
    if b.len() > DISPLAY_HEX_LIMIT {
        write!(f, "... {} bytes", b.len())?;
    }
    f.write_str(">")
}
