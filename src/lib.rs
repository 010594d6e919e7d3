//! swarmwire - BitTorrent peer discovery and metadata transport
//!
//! This library covers the parts of BitTorrent a magnet-link client needs
//! before it can download anything: finding peers, shaking hands with them
//! and fetching the torrent's info dictionary.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 Bencode encoding/decoding
//! - [`peer`] - BEP-3/9/10 Peer handshake, extension protocol, metadata exchange
//! - [`dht`] - BEP-5 DHT client (`ping`, `get_peers`)
//! - [`config`] - Per-instance settings for peers and the DHT client
//! - [`constants`] - Protocol constants, timeouts and limits

pub mod bencode;
pub mod config;
pub mod constants;
pub mod dht;
pub mod peer;

pub use bencode::{decode, decode_prefix, encode, BencodeError, Value};
pub use config::{DhtConfig, PeerConfig};
pub use dht::{DhtClient, DhtError, DhtMessage, Node, NodeId};
pub use peer::{
    fetch_metadata, ExtensionHandshake, Handshake, HandshakeResult, MagnetTorrent, Message,
    MetadataError, PeerConnection, PeerError, PeerId, PeerState, TorrentHandle,
};
