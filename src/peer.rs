//! Peer wire protocol (BEP-3, BEP-9, BEP-10)
//!
//! This module implements the outgoing side of a peer connection: the fixed
//! 68-byte handshake, extension protocol negotiation, and the `ut_metadata`
//! exchange used to resolve magnet links.

mod connection;
mod error;
mod extension;
mod message;
mod metadata;
mod peer_id;
mod torrent;
mod transport;

pub use connection::{HandshakeResult, PeerConnection, PeerState};
pub use error::{MetadataError, PeerError};
pub use extension::ExtensionHandshake;
pub use message::{Handshake, Message, MessageId, HANDSHAKE_LEN, PROTOCOL, PROTOCOL_HEADER};
pub use metadata::{
    fetch_metadata, metadata_piece_count, metadata_piece_size, verify_metadata, MetadataMessage,
    MetadataMessageType,
};
pub use peer_id::PeerId;
pub use torrent::{MagnetTorrent, TorrentHandle};
pub use transport::PeerTransport;

#[cfg(test)]
mod tests;
