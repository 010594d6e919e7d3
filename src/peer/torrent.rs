use bytes::Bytes;

/// The torrent a peer connection is opened for.
///
/// The handshake layer reads the info hash from it and, when the torrent was
/// started from a magnet link, hands it the metadata fetched from the peer.
pub trait TorrentHandle {
    fn info_hash(&self) -> [u8; 20];

    fn has_metadata(&self) -> bool;

    /// Receives the verified, bencoded info dictionary.
    fn set_metadata(&mut self, metadata: Bytes);
}

/// A torrent known only by its info hash until a peer supplies the metadata.
#[derive(Debug, Clone)]
pub struct MagnetTorrent {
    info_hash: [u8; 20],
    metadata: Option<Bytes>,
}

impl MagnetTorrent {
    pub fn new(info_hash: [u8; 20]) -> Self {
        Self {
            info_hash,
            metadata: None,
        }
    }

    pub fn metadata(&self) -> Option<&Bytes> {
        self.metadata.as_ref()
    }
}

impl TorrentHandle for MagnetTorrent {
    fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }

    fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    fn set_metadata(&mut self, metadata: Bytes) {
        self.metadata = Some(metadata);
    }
}
