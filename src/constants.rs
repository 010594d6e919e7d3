//! Protocol constants and tuning parameters.
//!
//! Wire-level values come from BEP-3, BEP-5, BEP-9 and BEP-10. Timeouts are
//! defaults; [`PeerConfig`](crate::config::PeerConfig) and
//! [`DhtConfig`](crate::config::DhtConfig) override them per instance.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style)
pub const CLIENT_PREFIX: &[u8; 8] = b"-SW0001-";

/// Client name advertised in the extension handshake `v` field
pub const CLIENT_VERSION: &str = "swarmwire 0.1.0";

// ============================================================================
// Ports
// ============================================================================

/// Default BitTorrent listen port, also the default DHT port
pub const DEFAULT_PORT: u16 = 6881;

// ============================================================================
// Peer wire
// ============================================================================

/// TCP connect timeout for outgoing peer connections
pub const PEER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read timeout for a single peer message
pub const PEER_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Write timeout for a single peer message
pub const PEER_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest frame accepted from a peer
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

// ============================================================================
// Extension protocol (BEP-10) and metadata exchange (BEP-9)
// ============================================================================

/// Extended message id of the extension handshake itself
pub const EXTENSION_HANDSHAKE_ID: u8 = 0;

/// Extended message id we ask peers to use for `ut_metadata`
pub const LOCAL_UT_METADATA_ID: u8 = 2;

/// Extension name for metadata exchange
pub const UT_METADATA: &str = "ut_metadata";

/// Metadata is exchanged in 16 KiB pieces
pub const METADATA_PIECE_SIZE: usize = 16384;

/// Upper bound on an advertised `metadata_size`
pub const MAX_METADATA_SIZE: usize = 16 * 1024 * 1024;

// ============================================================================
// DHT (BEP-5)
// ============================================================================

/// How long a DHT query may stay unanswered
pub const DHT_QUERY_TIMEOUT: Duration = Duration::from_secs(15);

/// How many `nodes` referrals a `get_peers` lookup follows
pub const DHT_MAX_HOPS: usize = 8;

/// Total queries a single `get_peers` lookup may issue
pub const MAX_LOOKUP_QUERIES: usize = 64;

/// In-flight query cap
pub const MAX_PENDING_QUERIES: usize = 128;

/// Largest datagram we read from the DHT socket
pub const DHT_MAX_DATAGRAM: usize = 65535;

/// Well-known routers used by [`DhtClient::bootstrap`](crate::dht::DhtClient::bootstrap)
pub const BOOTSTRAP_NODES: &[&str] = &[
    "router.bittorrent.com:6881",
    "dht.transmissionbt.com:6881",
    "router.utorrent.com:6881",
];
