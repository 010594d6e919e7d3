//! Metadata exchange extension (ut_metadata, BEP-9).
//!
//! Lets a client that only knows a torrent's info hash (a magnet link) fetch
//! the bencoded info dictionary from a peer. The metadata is split into
//! 16 KiB pieces, requested one at a time and reassembled in order.

use std::collections::BTreeMap;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tracing::{debug, info, trace};

use super::connection::PeerConnection;
use super::error::{MetadataError, PeerError};
use super::message::Message;
use crate::bencode::{decode_prefix, encode, Value};
use crate::constants::{MAX_METADATA_SIZE, METADATA_PIECE_SIZE};

/// Unrelated frames tolerated while waiting for one piece.
const MAX_SKIPPED_FRAMES: usize = 256;

/// Message types for the ut_metadata extension (BEP-9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMessageType {
    /// Request a piece of metadata.
    Request = 0,
    /// Provide a piece of metadata.
    Data = 1,
    /// Reject a metadata request.
    Reject = 2,
}

impl MetadataMessageType {
    pub fn from_integer(value: i64) -> Option<Self> {
        match value {
            0 => Some(MetadataMessageType::Request),
            1 => Some(MetadataMessageType::Data),
            2 => Some(MetadataMessageType::Reject),
            _ => None,
        }
    }
}

/// A metadata exchange message (ut_metadata, BEP-9).
///
/// On the wire this is a bencoded dictionary; data messages carry the raw
/// piece bytes directly after the dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataMessage {
    pub msg_type: MetadataMessageType,
    pub piece: u32,
    /// Only present in data messages.
    pub total_size: Option<u32>,
    /// Only present in data messages.
    pub data: Option<Bytes>,
}

impl MetadataMessage {
    pub fn request(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Request,
            piece,
            total_size: None,
            data: None,
        }
    }

    pub fn data(piece: u32, total_size: u32, data: Bytes) -> Self {
        Self {
            msg_type: MetadataMessageType::Data,
            piece,
            total_size: Some(total_size),
            data: Some(data),
        }
    }

    pub fn reject(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Reject,
            piece,
            total_size: None,
            data: None,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut dict = BTreeMap::new();

        dict.insert(
            Bytes::from_static(b"msg_type"),
            Value::Integer(self.msg_type as i64),
        );
        dict.insert(
            Bytes::from_static(b"piece"),
            Value::Integer(self.piece as i64),
        );

        if let Some(total_size) = self.total_size {
            dict.insert(
                Bytes::from_static(b"total_size"),
                Value::Integer(total_size as i64),
            );
        }

        let mut out = encode(&Value::Dict(dict));
        if let Some(ref data) = self.data {
            out.extend_from_slice(data);
        }
        Bytes::from(out)
    }

    /// Decodes an extended message payload.
    ///
    /// The dictionary is decoded as a prefix; whatever follows it is the piece
    /// data of a data message.
    pub fn decode(payload: &[u8]) -> Result<Self, MetadataError> {
        let (value, dict_end) = decode_prefix(payload)?;
        let dict = value
            .as_dict()
            .ok_or_else(|| MetadataError::InvalidMessage("expected dict".into()))?;

        let msg_type = dict
            .get(b"msg_type".as_slice())
            .and_then(|v| v.as_integer())
            .ok_or_else(|| MetadataError::InvalidMessage("missing msg_type".into()))?;
        let msg_type = MetadataMessageType::from_integer(msg_type)
            .ok_or_else(|| MetadataError::InvalidMessage(format!("invalid msg_type {}", msg_type)))?;

        let piece = dict
            .get(b"piece".as_slice())
            .and_then(|v| v.as_integer())
            .and_then(|p| u32::try_from(p).ok())
            .ok_or_else(|| MetadataError::InvalidMessage("missing piece".into()))?;

        let total_size = dict
            .get(b"total_size".as_slice())
            .and_then(|v| v.as_integer())
            .and_then(|v| u32::try_from(v).ok());

        let data = (msg_type == MetadataMessageType::Data)
            .then(|| Bytes::copy_from_slice(&payload[dict_end..]));

        Ok(Self {
            msg_type,
            piece,
            total_size,
            data,
        })
    }
}

/// Calculates the number of metadata pieces for a given metadata size.
pub fn metadata_piece_count(metadata_size: usize) -> usize {
    metadata_size.div_ceil(METADATA_PIECE_SIZE)
}

/// Calculates the size of a specific metadata piece.
pub fn metadata_piece_size(piece: u32, total_size: usize) -> usize {
    let offset = piece as usize * METADATA_PIECE_SIZE;
    if offset >= total_size {
        0
    } else {
        (total_size - offset).min(METADATA_PIECE_SIZE)
    }
}

/// Checks fetched metadata against the info hash it was requested for.
pub fn verify_metadata(info_hash: &[u8; 20], metadata: &[u8]) -> bool {
    Sha1::digest(metadata).as_slice() == info_hash
}

/// Fetches the complete metadata from a peer over an established connection.
///
/// `local_ext` is the id we advertised for `ut_metadata` (replies arrive on
/// it), `remote_ext` the id the peer advertised (requests go out on it), and
/// `declared_size` the peer's `metadata_size`. Pieces are requested in order.
///
/// # Errors
///
/// - [`MetadataError::InvalidSize`] if `declared_size` is zero, negative or
///   larger than 16 MiB
/// - [`MetadataError::PieceRejected`] if the peer rejects a piece
/// - [`MetadataError::SizeMismatch`] if a piece or the result has the wrong length
/// - [`MetadataError::NoResponse`] if the peer goes quiet or hangs up
pub async fn fetch_metadata(
    conn: &mut PeerConnection,
    local_ext: u8,
    remote_ext: u8,
    declared_size: i64,
) -> Result<Bytes, MetadataError> {
    let total_size = usize::try_from(declared_size)
        .ok()
        .filter(|size| (1..=MAX_METADATA_SIZE).contains(size))
        .ok_or(MetadataError::InvalidSize(declared_size))?;

    let piece_count = metadata_piece_count(total_size);
    let mut metadata = vec![0u8; total_size];
    let mut assembled = 0;

    debug!(
        "Fetching {} bytes of metadata from {} in {} pieces",
        total_size, conn.addr, piece_count
    );

    for piece in 0..piece_count as u32 {
        conn.send(Message::Extended {
            id: remote_ext,
            payload: MetadataMessage::request(piece).encode(),
        })
        .await?;

        let data = receive_piece(conn, local_ext, remote_ext, piece).await?;

        let expected = metadata_piece_size(piece, total_size);
        if data.len() != expected {
            return Err(MetadataError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        let offset = piece as usize * METADATA_PIECE_SIZE;
        metadata[offset..offset + expected].copy_from_slice(&data);
        assembled += expected;

        trace!("Metadata piece {}/{} from {}", piece + 1, piece_count, conn.addr);
    }

    if assembled != total_size {
        return Err(MetadataError::SizeMismatch {
            expected: total_size,
            actual: assembled,
        });
    }

    info!("Fetched {} bytes of metadata from {}", total_size, conn.addr);
    Ok(Bytes::from(metadata))
}

async fn receive_piece(
    conn: &mut PeerConnection,
    local_ext: u8,
    remote_ext: u8,
    piece: u32,
) -> Result<Bytes, MetadataError> {
    for _ in 0..MAX_SKIPPED_FRAMES {
        let message = conn.receive().await.map_err(|e| match e {
            PeerError::Timeout | PeerError::ConnectionClosed => MetadataError::NoResponse,
            other => MetadataError::Peer(other),
        })?;

        let payload = match message {
            Message::Extended { id, payload } if id == local_ext => payload,
            other => {
                trace!("Skipping {:?} from {} while awaiting metadata", other, conn.addr);
                continue;
            }
        };

        let reply = MetadataMessage::decode(&payload)?;
        match reply.msg_type {
            MetadataMessageType::Data if reply.piece == piece => {
                return Ok(reply.data.unwrap_or_default());
            }
            MetadataMessageType::Reject if reply.piece == piece => {
                return Err(MetadataError::PieceRejected { piece });
            }
            MetadataMessageType::Request => {
                // We hold no metadata to serve.
                conn.send(Message::Extended {
                    id: remote_ext,
                    payload: MetadataMessage::reject(reply.piece).encode(),
                })
                .await?;
            }
            _ => {
                return Err(MetadataError::InvalidMessage(format!(
                    "expected piece {}, got {:?} for piece {}",
                    piece, reply.msg_type, reply.piece
                )));
            }
        }
    }

    Err(MetadataError::NoResponse)
}
