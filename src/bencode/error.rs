use thiserror::Error;

/// Errors produced while decoding bencode.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BencodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("malformed integer: {0}")]
    MalformedInteger(String),

    #[error("unterminated list")]
    UnterminatedList,

    #[error("unterminated dictionary")]
    UnterminatedDict,

    #[error("negative string length")]
    NegativeLength,

    #[error("invalid string length")]
    InvalidLength,

    #[error("truncated string: declared {declared} bytes, {available} available")]
    TruncatedString { declared: usize, available: usize },

    #[error("dictionary key is not a byte string")]
    InvalidKeyType,

    #[error("unrecognized token: 0x{0:02x}")]
    UnrecognizedToken(u8),

    #[error("trailing data after value")]
    TrailingData,

    #[error("nesting too deep")]
    NestingTooDeep,
}
