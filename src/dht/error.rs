use thiserror::Error;

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid node id length")]
    InvalidNodeId,

    #[error("query timed out")]
    QueryTimeout,

    #[error("no known good nodes")]
    NoGoodNodes,

    #[error("no peers found")]
    NoPeersFound,

    #[error("remote error {code}: {message}")]
    PeerError { code: i64, message: String },

    #[error("a query with this token is already pending for the node")]
    DuplicateQuery,

    #[error("rate limited")]
    RateLimited,

    #[error("dht client shut down")]
    Shutdown,
}
