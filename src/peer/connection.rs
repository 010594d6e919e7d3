use super::error::PeerError;
use super::extension::ExtensionHandshake;
use super::message::{reserved_supports_extensions, Handshake, Message, PROTOCOL_HEADER};
use super::metadata::{fetch_metadata, verify_metadata};
use super::peer_id::PeerId;
use super::torrent::TorrentHandle;
use super::transport::PeerTransport;
use crate::bencode::decode;
use crate::config::PeerConfig;
use crate::constants::{EXTENSION_HANDSHAKE_ID, UT_METADATA};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// The connection state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// TCP connection in progress.
    Connecting,
    /// Our handshake is on the wire.
    HandshakeSent,
    /// The peer's handshake matched our protocol and info hash.
    HandshakeVerified,
    /// Extension handshakes exchanged and `interested` sent.
    ExtensionNegotiated,
    /// One side lacks extension support; plain peer wire only.
    PlainConnected,
    /// Post-handshake work is done and the connection is in use.
    Active,
    /// The handshake failed or the connection was dropped.
    Aborted,
}

/// What a peer told us about itself during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    pub peer_id: PeerId,
    /// The peer set the BEP-10 reserved bit.
    pub supports_extensions: bool,
    /// Extension name to the message id the peer wants for it.
    pub extensions: BTreeMap<String, u8>,
    /// Present when the peer holds the metadata.
    pub metadata_size: Option<i64>,
    pub client: Option<String>,
    pub port: Option<u16>,
}

impl HandshakeResult {
    fn plain(peer_id: PeerId, supports_extensions: bool) -> Self {
        Self {
            peer_id,
            supports_extensions,
            extensions: BTreeMap::new(),
            metadata_size: None,
            client: None,
            port: None,
        }
    }

    /// The peer's message id for `ut_metadata`, if it offers metadata exchange.
    pub fn ut_metadata_id(&self) -> Option<u8> {
        self.extensions.get(UT_METADATA).copied()
    }
}

/// A connection to a BitTorrent peer.
///
/// # Examples
///
/// ```no_run
/// use swarmwire::config::PeerConfig;
/// use swarmwire::peer::{MagnetTorrent, PeerConnection};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let addr = "192.168.1.100:6881".parse()?;
/// let mut torrent = MagnetTorrent::new([0u8; 20]);
/// let config = PeerConfig::default();
///
/// let (conn, result) = PeerConnection::initiate(addr, &mut torrent, &config).await?;
/// println!("{} speaks {:?}", result.peer_id, result.extensions);
/// # Ok(())
/// # }
/// ```
pub struct PeerConnection {
    /// The peer's socket address.
    pub addr: SocketAddr,
    /// The peer's ID (once its handshake has been read).
    pub peer_id: Option<PeerId>,
    /// Current connection state.
    pub state: PeerState,
    /// The peer's extension handshake, if one was exchanged.
    pub extension_handshake: Option<ExtensionHandshake>,
    /// When the TCP connection was established.
    pub connected_at: Instant,
    /// When the last message was received.
    pub last_message_at: Instant,
    transport: Option<PeerTransport>,
}

impl PeerConnection {
    /// Connects to `addr` and runs the BitTorrent handshake, negotiating
    /// extensions when both sides support them.
    ///
    /// On failure the stream is shut down before the error is returned.
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        config: &PeerConfig,
    ) -> Result<(Self, HandshakeResult), PeerError> {
        debug!("Connecting to peer {}", addr);

        let stream = match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(PeerError::ConnectFailed(e.to_string())),
            Err(_) => return Err(PeerError::ConnectFailed("timed out".into())),
        };

        let now = Instant::now();
        let mut conn = Self {
            addr,
            peer_id: None,
            state: PeerState::Connecting,
            extension_handshake: None,
            connected_at: now,
            last_message_at: now,
            transport: Some(PeerTransport::with_timeouts(
                stream,
                config.read_timeout,
                config.write_timeout,
            )),
        };

        match conn.handshake(info_hash, config).await {
            Ok(result) => Ok((conn, result)),
            Err(e) => {
                warn!("Handshake with {} failed: {}", addr, e);
                conn.abort().await;
                Err(e)
            }
        }
    }

    /// Connects, handshakes, and fetches metadata for a torrent that lacks it.
    ///
    /// A failed metadata exchange is logged and otherwise ignored: the
    /// handshake has already succeeded and the connection stays usable.
    pub async fn initiate<T: TorrentHandle + ?Sized>(
        addr: SocketAddr,
        torrent: &mut T,
        config: &PeerConfig,
    ) -> Result<(Self, HandshakeResult), PeerError> {
        let info_hash = torrent.info_hash();
        let (mut conn, result) = Self::connect(addr, info_hash, config).await?;

        if !torrent.has_metadata() {
            if let Some(remote_ext) = result.ut_metadata_id() {
                conn.exchange_metadata(torrent, &result, config.ut_metadata_id, remote_ext)
                    .await;
            }
        }

        // A peer that hung up during the exchange leaves the connection aborted.
        if conn.transport.is_some() {
            conn.state = PeerState::Active;
        }
        Ok((conn, result))
    }

    async fn exchange_metadata<T: TorrentHandle + ?Sized>(
        &mut self,
        torrent: &mut T,
        result: &HandshakeResult,
        local_ext: u8,
        remote_ext: u8,
    ) {
        let Some(size) = result.metadata_size else {
            debug!("{} offers ut_metadata without metadata_size", self.addr);
            return;
        };

        info!("Requesting metadata from {}", self.addr);
        match fetch_metadata(self, local_ext, remote_ext, size).await {
            Ok(metadata) if verify_metadata(&torrent.info_hash(), &metadata) => {
                torrent.set_metadata(metadata);
            }
            Ok(_) => warn!("Metadata from {} does not match the info hash", self.addr),
            Err(e) => warn!("Unable to get metadata from {}: {}", self.addr, e),
        }
    }

    async fn handshake(
        &mut self,
        info_hash: [u8; 20],
        config: &PeerConfig,
    ) -> Result<HandshakeResult, PeerError> {
        let addr = self.addr;
        let transport = self.transport.as_mut().ok_or(PeerError::ConnectionClosed)?;

        let ours = Handshake::new(info_hash, *config.peer_id.as_bytes(), config.extensions_enabled);
        transport.send_handshake(&ours).await?;
        self.state = PeerState::HandshakeSent;
        debug!("Sent handshake to {}", addr);

        if transport.read_exact(PROTOCOL_HEADER.len()).await?[..] != PROTOCOL_HEADER {
            return Err(PeerError::ProtocolMismatch);
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&transport.read_exact(8).await?);
        let supports_extensions = reserved_supports_extensions(&reserved);

        if transport.read_exact(20).await?[..] != info_hash {
            return Err(PeerError::InfoHashMismatch);
        }

        let peer_id = PeerId::from_bytes(&transport.read_exact(20).await?)
            .ok_or_else(|| PeerError::InvalidMessage("short peer id".into()))?;
        self.peer_id = Some(peer_id);
        self.state = PeerState::HandshakeVerified;
        self.last_message_at = Instant::now();
        info!(
            "Handshake with {} verified, peer {} ({})",
            addr,
            peer_id,
            peer_id.client_id().unwrap_or("unknown client")
        );

        if !(config.extensions_enabled && supports_extensions) {
            self.state = PeerState::PlainConnected;
            return Ok(HandshakeResult::plain(peer_id, supports_extensions));
        }

        let theirs = self.receive_extension_handshake().await?;
        info!(
            "Extensions negotiated with {}: {} offered, metadata_size {:?}",
            addr,
            theirs.extensions.len(),
            theirs.metadata_size
        );

        let mut ours = ExtensionHandshake::with_extensions(&[(UT_METADATA, config.ut_metadata_id)]);
        ours.port = Some(config.listen_port);
        ours.client = Some(config.client_version.clone());
        debug!("Sending extension handshake to {}: {}", addr, ours.to_value());

        self.send(Message::Extended {
            id: EXTENSION_HANDSHAKE_ID,
            payload: ours.encode(),
        })
        .await?;
        self.send(Message::Interested).await?;
        debug!("Sent interested to {}", addr);

        let result = HandshakeResult {
            peer_id,
            supports_extensions,
            extensions: theirs.extensions.clone(),
            metadata_size: theirs.metadata_size,
            client: theirs.client.clone(),
            port: theirs.port,
        };
        self.extension_handshake = Some(theirs);
        self.state = PeerState::ExtensionNegotiated;
        Ok(result)
    }

    async fn receive_extension_handshake(&mut self) -> Result<ExtensionHandshake, PeerError> {
        loop {
            match self.receive().await? {
                Message::KeepAlive => continue,
                Message::Extended {
                    id: EXTENSION_HANDSHAKE_ID,
                    payload,
                } => {
                    let header = decode(&payload)?;
                    debug!("Extension handshake from {}: {}", self.addr, header);
                    return ExtensionHandshake::from_value(&header);
                }
                Message::Extended { id, .. } => {
                    return Err(PeerError::UnexpectedExtendedMessageId {
                        id: 20,
                        extended_id: Some(id),
                    })
                }
                other => {
                    return Err(PeerError::UnexpectedExtendedMessageId {
                        id: other.id().unwrap_or_default(),
                        extended_id: None,
                    })
                }
            }
        }
    }

    pub async fn send(&mut self, message: Message) -> Result<(), PeerError> {
        let transport = self.transport.as_mut().ok_or(PeerError::ConnectionClosed)?;
        let result = transport.send_message(&message).await;
        self.check_stream(result)
    }

    pub async fn receive(&mut self) -> Result<Message, PeerError> {
        let transport = self.transport.as_mut().ok_or(PeerError::ConnectionClosed)?;
        let result = transport.receive_message().await;
        let message = self.check_stream(result)?;
        self.last_message_at = Instant::now();
        Ok(message)
    }

    /// Drops the stream once the peer has hung up or the socket failed.
    fn check_stream<T>(&mut self, result: Result<T, PeerError>) -> Result<T, PeerError> {
        if let Err(e @ (PeerError::ConnectionClosed | PeerError::Io(_))) = &result {
            debug!("Connection to {} lost: {}", self.addr, e);
            self.transport = None;
            self.state = PeerState::Aborted;
        }
        result
    }

    async fn abort(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await;
        }
        self.state = PeerState::Aborted;
    }

    pub fn disconnect(&mut self) {
        self.transport = None;
        self.state = PeerState::Aborted;
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
            && matches!(
                self.state,
                PeerState::ExtensionNegotiated | PeerState::PlainConnected | PeerState::Active
            )
    }
}
