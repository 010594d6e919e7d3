//! Distributed Hash Table (BEP-5)
//!
//! A passive DHT client used for trackerless peer discovery. It pings nodes,
//! runs iterative `get_peers` lookups and correlates replies by source
//! address and transaction token. Inbound queries are not answered.

mod client;
mod error;
mod message;
mod node;

pub use client::DhtClient;
pub use error::DhtError;
pub use message::{
    response_node_id, DhtMessage, DhtMessageKind, DhtQuery, GetPeersResponse, TransactionId,
};
pub use node::{
    encode_compact_peer, parse_compact_nodes, parse_compact_peer, Node, NodeId, COMPACT_NODE_LEN,
};
