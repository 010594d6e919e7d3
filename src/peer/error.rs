use thiserror::Error;

/// Errors that can occur while connecting to or talking with a peer.
///
/// Every handshake failure closes the underlying stream before it is returned.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The TCP connection could not be established in time.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The peer did not answer with the `BitTorrent protocol` header.
    #[error("protocol header mismatch")]
    ProtocolMismatch,

    /// The peer's info hash doesn't match ours.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// The first message after the handshake was not an extension handshake.
    #[error("unexpected extended message (id {id}, extended id {extended_id:?})")]
    UnexpectedExtendedMessageId { id: u8, extended_id: Option<u8> },

    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation timed out.
    #[error("timeout")]
    Timeout,

    /// The connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Received a malformed protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Received an unknown message ID.
    #[error("invalid message id: {0}")]
    InvalidMessageId(u8),

    /// Extension protocol error.
    #[error("extension error: {0}")]
    Extension(String),

    /// Error decoding bencode in extension messages.
    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),
}

/// Errors from the `ut_metadata` exchange.
///
/// These never fail an otherwise successful handshake; the connection stays
/// usable and the caller may try another peer.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The peer refused to send a piece.
    #[error("peer rejected metadata piece {piece}")]
    PieceRejected { piece: u32 },

    /// A piece or the assembled metadata had the wrong length.
    #[error("metadata size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// The peer went quiet or hung up before answering.
    #[error("no response from peer")]
    NoResponse,

    /// The advertised `metadata_size` is unusable.
    #[error("invalid metadata size: {0}")]
    InvalidSize(i64),

    /// Malformed `ut_metadata` envelope or dictionary.
    #[error("invalid metadata message: {0}")]
    InvalidMessage(String),

    /// Error decoding the bencoded part of a message.
    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    /// Transport-level failure.
    #[error("peer error: {0}")]
    Peer(#[from] PeerError),
}
