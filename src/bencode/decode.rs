use super::error::BencodeError;
use super::value::Value;
use bytes::Bytes;
use std::collections::BTreeMap;

const MAX_DEPTH: usize = 64;

type Decoded<'a> = Result<(Value, &'a [u8]), BencodeError>;

/// Decodes a single bencode value that must span the whole input.
///
/// # Errors
///
/// Returns [`BencodeError::TrailingData`] if bytes remain after the value, or
/// the error describing why the value itself is malformed.
///
/// # Examples
///
/// ```
/// use swarmwire::bencode::{decode, Value};
///
/// assert_eq!(decode(b"i42e").unwrap(), Value::Integer(42));
/// assert!(decode(b"i42eextra").is_err());
/// ```
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let (value, consumed) = decode_prefix(data)?;

    if consumed != data.len() {
        return Err(BencodeError::TrailingData);
    }

    Ok(value)
}

/// Decodes the first bencode value in `data` and reports how many bytes it
/// occupied.
///
/// Anything after the value is left untouched, which lets callers split a
/// bencoded header from a raw trailer (as `ut_metadata` data messages do).
///
/// # Examples
///
/// ```
/// use swarmwire::bencode::decode_prefix;
///
/// let (value, consumed) = decode_prefix(b"d5:piecei0eeRAW").unwrap();
/// assert_eq!(consumed, 12);
/// assert_eq!(value.get(b"piece").and_then(|v| v.as_integer()), Some(0));
/// ```
pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), BencodeError> {
    let (value, rest) = decode_value(data, 0)?;
    Ok((value, data.len() - rest.len()))
}

fn decode_value(data: &[u8], depth: usize) -> Decoded<'_> {
    if depth > MAX_DEPTH {
        return Err(BencodeError::NestingTooDeep);
    }

    match data.first() {
        None => Err(BencodeError::UnexpectedEof),
        Some(b'i') => decode_integer(&data[1..]),
        Some(b'l') => decode_list(&data[1..], depth),
        Some(b'd') => decode_dict(&data[1..], depth),
        Some(b'0'..=b'9') | Some(b'-') => decode_bytes(data),
        Some(&c) => Err(BencodeError::UnrecognizedToken(c)),
    }
}

fn decode_integer(data: &[u8]) -> Decoded<'_> {
    let end = data
        .iter()
        .position(|&b| b == b'e')
        .ok_or_else(|| BencodeError::MalformedInteger("missing terminator".into()))?;

    let digits = &data[..end];
    let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);

    if unsigned.is_empty() || !unsigned.iter().all(u8::is_ascii_digit) {
        return Err(BencodeError::MalformedInteger(
            String::from_utf8_lossy(digits).into_owned(),
        ));
    }

    if digits.starts_with(b"-0") || (unsigned[0] == b'0' && unsigned.len() > 1) {
        return Err(BencodeError::MalformedInteger("leading zeros".into()));
    }

    // Only ASCII digits and an optional sign remain, so this is valid UTF-8.
    let text = std::str::from_utf8(digits)
        .map_err(|_| BencodeError::MalformedInteger("invalid utf8".into()))?;
    let value: i64 = text
        .parse()
        .map_err(|_| BencodeError::MalformedInteger(format!("out of range: {}", text)))?;

    Ok((Value::Integer(value), &data[end + 1..]))
}

fn decode_bytes(data: &[u8]) -> Decoded<'_> {
    let colon = data
        .iter()
        .position(|&b| b == b':')
        .ok_or(BencodeError::TruncatedString {
            declared: 0,
            available: 0,
        })?;

    let prefix = &data[..colon];
    if prefix.first() == Some(&b'-') {
        return Err(BencodeError::NegativeLength);
    }

    if !prefix.iter().all(u8::is_ascii_digit) || (prefix[0] == b'0' && prefix.len() > 1) {
        return Err(BencodeError::InvalidLength);
    }

    let len: usize = std::str::from_utf8(prefix)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(BencodeError::InvalidLength)?;

    let body = &data[colon + 1..];
    if body.len() < len {
        return Err(BencodeError::TruncatedString {
            declared: len,
            available: body.len(),
        });
    }

    let (bytes, rest) = body.split_at(len);
    Ok((Value::Bytes(Bytes::copy_from_slice(bytes)), rest))
}

fn decode_list(mut data: &[u8], depth: usize) -> Decoded<'_> {
    let mut list = Vec::new();

    loop {
        match data.first() {
            None => return Err(BencodeError::UnterminatedList),
            Some(b'e') => return Ok((Value::List(list), &data[1..])),
            Some(_) => {
                let (item, rest) = decode_value(data, depth + 1)?;
                list.push(item);
                data = rest;
            }
        }
    }
}

fn decode_dict(mut data: &[u8], depth: usize) -> Decoded<'_> {
    let mut dict = BTreeMap::new();

    loop {
        match data.first() {
            None => return Err(BencodeError::UnterminatedDict),
            Some(b'e') => return Ok((Value::Dict(dict), &data[1..])),
            Some(b'0'..=b'9') | Some(b'-') => {
                let (key, rest) = decode_bytes(data)?;
                let Value::Bytes(key) = key else {
                    return Err(BencodeError::InvalidKeyType);
                };

                if rest.is_empty() {
                    return Err(BencodeError::UnterminatedDict);
                }

                let (value, rest) = decode_value(rest, depth + 1)?;
                // Duplicate keys: the last occurrence wins.
                dict.insert(key, value);
                data = rest;
            }
            Some(_) => return Err(BencodeError::InvalidKeyType),
        }
    }
}
