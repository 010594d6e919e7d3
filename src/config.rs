//! Per-instance configuration.
//!
//! Everything the protocol layers used to read from process-wide state (our
//! peer id, whether extensions are on, the listen port, the DHT port) lives
//! here and is handed to the component that needs it.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::constants::{
    BOOTSTRAP_NODES, CLIENT_VERSION, DEFAULT_PORT, DHT_MAX_HOPS, DHT_QUERY_TIMEOUT,
    LOCAL_UT_METADATA_ID, PEER_CONNECT_TIMEOUT, PEER_READ_TIMEOUT, PEER_WRITE_TIMEOUT,
};
use crate::peer::PeerId;

/// Settings for outgoing peer connections.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Our 20-byte peer id, constant for the life of the client.
    pub peer_id: PeerId,
    /// Set the BEP-10 reserved bit and negotiate extensions.
    pub extensions_enabled: bool,
    /// Port advertised as `p` in the extension handshake.
    pub listen_port: u16,
    /// Advertised as `v` in the extension handshake.
    pub client_version: String,
    /// Extended message id we assign to `ut_metadata`.
    pub ut_metadata_id: u8,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl PeerConfig {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            extensions_enabled: true,
            listen_port: DEFAULT_PORT,
            client_version: CLIENT_VERSION.to_string(),
            ut_metadata_id: LOCAL_UT_METADATA_ID,
            connect_timeout: PEER_CONNECT_TIMEOUT,
            read_timeout: PEER_READ_TIMEOUT,
            write_timeout: PEER_WRITE_TIMEOUT,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self::new(PeerId::generate())
    }
}

/// Settings for the DHT client.
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// Local UDP endpoint to bind.
    pub bind_addr: SocketAddr,
    /// How long a single query may wait for its reply.
    pub query_timeout: Duration,
    /// How many `nodes` referrals `get_peers` follows.
    pub max_hops: usize,
    /// Send `"ro": 1` (BEP-43) so other nodes don't add us to their tables.
    pub read_only: bool,
    /// Routers pinged by `bootstrap`.
    pub bootstrap_nodes: Vec<String>,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            query_timeout: DHT_QUERY_TIMEOUT,
            max_hops: DHT_MAX_HOPS,
            read_only: true,
            bootstrap_nodes: BOOTSTRAP_NODES.iter().map(|s| s.to_string()).collect(),
        }
    }
}
