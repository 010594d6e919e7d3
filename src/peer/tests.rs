use super::*;
use crate::config::PeerConfig;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const INFO_HASH: [u8; 20] = [0xAA; 20];
const REMOTE_PEER_ID: [u8; 20] = *b"-XX0001-remotepeer00";

fn test_config() -> PeerConfig {
    let mut config = PeerConfig::new(PeerId::generate());
    config.connect_timeout = Duration::from_secs(2);
    config.read_timeout = Duration::from_secs(2);
    config.write_timeout = Duration::from_secs(2);
    config.listen_port = 51413;
    config
}

async fn listen() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Reads one length-prefixed frame, returning its message id and body.
async fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await.unwrap();
    let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
    stream.read_exact(&mut body).await.unwrap();
    (body[0], body[1..].to_vec())
}

/// Accepts one connection and answers our handshake.
async fn accept_and_handshake(
    listener: &TcpListener,
    info_hash: [u8; 20],
    extensions: bool,
) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut theirs = [0u8; HANDSHAKE_LEN];
    stream.read_exact(&mut theirs).await.unwrap();
    stream
        .write_all(&Handshake::new(info_hash, REMOTE_PEER_ID, extensions).encode())
        .await
        .unwrap();
    stream
}

async fn send_extension_handshake(stream: &mut TcpStream, hs: &ExtensionHandshake) {
    let msg = Message::Extended {
        id: 0,
        payload: hs.encode(),
    };
    stream.write_all(&msg.encode()).await.unwrap();
}

/// Waits until the other side closes the connection.
async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    loop {
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("connection left open")
            .unwrap_or(0);
        if n == 0 {
            return;
        }
    }
}

fn test_metadata(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_peer_id_generate() {
    let id1 = PeerId::generate();
    let id2 = PeerId::generate();
    assert_ne!(id1.0, id2.0);
    assert_eq!(id1.client_id(), Some("SW0001"));
    assert!(PeerId::from_bytes(&[0u8; 19]).is_none());
}

#[test]
fn test_handshake_layout() {
    let handshake = Handshake::new([1u8; 20], [2u8; 20], true);
    let encoded = handshake.encode();

    assert_eq!(encoded.len(), 68);
    assert_eq!(encoded[0], 0x13);
    assert_eq!(&encoded[1..20], PROTOCOL);
    assert_eq!(&encoded[20..28], &[0, 0, 0, 0, 0, 0x10, 0, 0]);
    assert_eq!(&encoded[28..48], &[1u8; 20]);
    assert_eq!(&encoded[48..68], &[2u8; 20]);

    let decoded = Handshake::decode(&encoded).unwrap();
    assert!(decoded.supports_extension_protocol());
    assert!(!Handshake::new([1u8; 20], [2u8; 20], false).supports_extension_protocol());
}

#[test]
fn test_handshake_decode_wrong_protocol() {
    let mut encoded = Handshake::new([1u8; 20], [2u8; 20], true).encode().to_vec();
    encoded[3] = b'X';
    assert!(matches!(
        Handshake::decode(&encoded),
        Err(PeerError::ProtocolMismatch)
    ));
}

#[test]
fn test_message_encode_decode() {
    let messages = vec![
        Message::KeepAlive,
        Message::Choke,
        Message::Unchoke,
        Message::Interested,
        Message::NotInterested,
        Message::Have { piece: 42 },
        Message::Bitfield(Bytes::from_static(&[0xff, 0x80])),
        Message::Request {
            index: 1,
            begin: 0,
            length: 16384,
        },
        Message::Piece {
            index: 0,
            begin: 0,
            data: Bytes::from_static(b"hello world"),
        },
        Message::Cancel {
            index: 1,
            begin: 0,
            length: 16384,
        },
        Message::Port(6881),
        Message::Extended {
            id: 3,
            payload: Bytes::from_static(b"d1:ai1ee"),
        },
    ];

    for msg in messages {
        assert_eq!(Message::decode(msg.encode()).unwrap(), msg);
    }
}

#[test]
fn test_interested_wire_format() {
    assert_eq!(Message::Interested.encode().as_ref(), &[0, 0, 0, 1, 2]);
}

#[test]
fn test_message_decode_unknown_id() {
    let frame = Bytes::from_static(&[0, 0, 0, 3, 99, 0xab, 0xcd]);
    let msg = Message::decode(frame.clone()).unwrap();
    assert_eq!(
        msg,
        Message::Unknown {
            id: 99,
            payload: Bytes::from_static(&[0xab, 0xcd])
        }
    );
    assert_eq!(msg.id(), Some(99));
    assert_eq!(msg.encode(), frame);
}

#[test]
fn test_peer_id_client_tag() {
    let remote = PeerId::from(REMOTE_PEER_ID);
    assert_eq!(remote.client_id(), Some("XX0001"));
    assert_eq!(remote.to_string(), "-XX0001-remotepeer00");

    let mut binary = [0u8; 20];
    binary[..8].copy_from_slice(b"-A\xff0001-");
    assert_eq!(PeerId(binary).client_id(), None);
    assert!(PeerId(binary).to_string().starts_with("-A%ff0001-%00"));
}

#[test]
fn test_extension_handshake() {
    let mut hs = ExtensionHandshake::new();
    hs.extensions.insert("ut_pex".to_string(), 1);
    hs.extensions.insert("ut_metadata".to_string(), 2);
    hs.client = Some("swarmwire 0.1.0".to_string());
    hs.port = Some(6881);
    hs.metadata_size = Some(31235);

    let decoded = ExtensionHandshake::decode(&hs.encode()).unwrap();
    assert_eq!(decoded, hs);
    assert_eq!(decoded.get_extension_id("ut_metadata"), Some(2));
}

#[test]
fn test_extension_handshake_ignores_disabled() {
    let decoded = ExtensionHandshake::decode(b"d1:md6:ut_pexi0e11:ut_metadatai3eee").unwrap();
    assert_eq!(decoded.get_extension_id("ut_pex"), None);
    assert_eq!(decoded.get_extension_id("ut_metadata"), Some(3));
}

#[tokio::test]
async fn test_connect_failed() {
    let (listener, addr) = listen().await;
    drop(listener);

    let result = PeerConnection::connect(addr, INFO_HASH, &test_config()).await;
    assert!(matches!(result, Err(PeerError::ConnectFailed(_))));
}

#[tokio::test]
async fn test_info_hash_mismatch_closes_connection() {
    let (listener, addr) = listen().await;

    let peer = tokio::spawn(async move {
        let mut stream = accept_and_handshake(&listener, [0xBB; 20], true).await;
        assert_closed(&mut stream).await;
    });

    let result = PeerConnection::connect(addr, INFO_HASH, &test_config()).await;
    assert!(matches!(result, Err(PeerError::InfoHashMismatch)));
    peer.await.unwrap();
}

#[tokio::test]
async fn test_protocol_mismatch_closes_connection() {
    let (listener, addr) = listen().await;

    let peer = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut theirs = [0u8; HANDSHAKE_LEN];
        stream.read_exact(&mut theirs).await.unwrap();
        stream.write_all(b"\x13BitTorrent protocoX").await.unwrap();
        assert_closed(&mut stream).await;
    });

    let result = PeerConnection::connect(addr, INFO_HASH, &test_config()).await;
    assert!(matches!(result, Err(PeerError::ProtocolMismatch)));
    peer.await.unwrap();
}

#[tokio::test]
async fn test_plain_connection_without_extension_bit() {
    let (listener, addr) = listen().await;

    let peer = tokio::spawn(async move {
        let stream = accept_and_handshake(&listener, INFO_HASH, false).await;
        // Keep the stream open until the client is done.
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(stream);
    });

    let (conn, result) = PeerConnection::connect(addr, INFO_HASH, &test_config())
        .await
        .unwrap();
    assert_eq!(conn.state, PeerState::PlainConnected);
    assert!(conn.is_connected());
    assert!(!result.supports_extensions);
    assert_eq!(result.peer_id.as_bytes(), &REMOTE_PEER_ID);
    assert!(result.extensions.is_empty());
    peer.await.unwrap();
}

#[tokio::test]
async fn test_extension_handshake_then_interested() {
    let (listener, addr) = listen().await;

    let peer = tokio::spawn(async move {
        let mut stream = accept_and_handshake(&listener, INFO_HASH, true).await;
        let mut hs = ExtensionHandshake::with_extensions(&[("ut_metadata", 3)]);
        hs.client = Some("Remote 1.0".to_string());
        send_extension_handshake(&mut stream, &hs).await;

        let (id, payload) = read_frame(&mut stream).await;
        assert_eq!(id, 20);
        assert_eq!(payload[0], 0);
        let ours = ExtensionHandshake::decode(&payload[1..]).unwrap();

        let mut next = [0u8; 5];
        stream.read_exact(&mut next).await.unwrap();
        assert_eq!(next, [0, 0, 0, 1, 2]);
        ours
    });

    let config = test_config();
    let (conn, result) = PeerConnection::connect(addr, INFO_HASH, &config)
        .await
        .unwrap();

    assert_eq!(conn.state, PeerState::ExtensionNegotiated);
    assert_eq!(result.ut_metadata_id(), Some(3));
    assert_eq!(result.client.as_deref(), Some("Remote 1.0"));
    assert_eq!(result.metadata_size, None);

    let ours = peer.await.unwrap();
    assert_eq!(ours.get_extension_id("ut_metadata"), Some(config.ut_metadata_id));
    assert_eq!(ours.port, Some(51413));
    assert_eq!(ours.client.as_deref(), Some(config.client_version.as_str()));
}

#[tokio::test]
async fn test_unexpected_message_instead_of_extension_handshake() {
    let (listener, addr) = listen().await;

    let peer = tokio::spawn(async move {
        let mut stream = accept_and_handshake(&listener, INFO_HASH, true).await;
        stream
            .write_all(&Message::Bitfield(Bytes::from_static(&[0xff])).encode())
            .await
            .unwrap();
        assert_closed(&mut stream).await;
    });

    let result = PeerConnection::connect(addr, INFO_HASH, &test_config()).await;
    assert!(matches!(
        result,
        Err(PeerError::UnexpectedExtendedMessageId {
            id: 5,
            extended_id: None
        })
    ));
    peer.await.unwrap();
}

#[tokio::test]
async fn test_extended_message_with_wrong_extended_id() {
    let (listener, addr) = listen().await;

    let peer = tokio::spawn(async move {
        let mut stream = accept_and_handshake(&listener, INFO_HASH, true).await;
        let msg = Message::Extended {
            id: 4,
            payload: Bytes::from_static(b"de"),
        };
        stream.write_all(&msg.encode()).await.unwrap();
        assert_closed(&mut stream).await;
    });

    let result = PeerConnection::connect(addr, INFO_HASH, &test_config()).await;
    assert!(matches!(
        result,
        Err(PeerError::UnexpectedExtendedMessageId {
            id: 20,
            extended_id: Some(4)
        })
    ));
    peer.await.unwrap();
}

/// Plays a metadata holder: negotiates, then serves every requested piece.
/// Returns the piece indices in the order they were requested.
async fn serve_metadata(
    listener: TcpListener,
    info_hash: [u8; 20],
    metadata: Vec<u8>,
    local_ext: u8,
) -> Vec<u32> {
    let mut stream = accept_and_handshake(&listener, info_hash, true).await;
    let mut hs = ExtensionHandshake::with_extensions(&[("ut_metadata", 3)]);
    hs.metadata_size = Some(metadata.len() as i64);
    send_extension_handshake(&mut stream, &hs).await;

    let (id, _) = read_frame(&mut stream).await;
    assert_eq!(id, 20);
    let (id, _) = read_frame(&mut stream).await;
    assert_eq!(id, 2);

    // Unrelated traffic the client has to skip.
    stream
        .write_all(&Message::Bitfield(Bytes::from_static(&[0x80])).encode())
        .await
        .unwrap();

    let mut requested = Vec::new();
    for _ in 0..metadata_piece_count(metadata.len()) {
        let (id, payload) = read_frame(&mut stream).await;
        assert_eq!(id, 20);
        assert_eq!(payload[0], 3);

        let request = MetadataMessage::decode(&payload[1..]).unwrap();
        assert_eq!(request.msg_type, MetadataMessageType::Request);
        requested.push(request.piece);

        let start = request.piece as usize * 16384;
        let end = (start + 16384).min(metadata.len());
        let reply = MetadataMessage::data(
            request.piece,
            metadata.len() as u32,
            Bytes::copy_from_slice(&metadata[start..end]),
        );
        let msg = Message::Extended {
            id: local_ext,
            payload: reply.encode(),
        };
        stream.write_all(&msg.encode()).await.unwrap();
    }

    requested
}

#[tokio::test]
async fn test_fetch_metadata_two_pieces() {
    let (listener, addr) = listen().await;
    let metadata = test_metadata(20000);
    let config = test_config();

    let peer = tokio::spawn(serve_metadata(
        listener,
        INFO_HASH,
        metadata.clone(),
        config.ut_metadata_id,
    ));

    let (mut conn, result) = PeerConnection::connect(addr, INFO_HASH, &config)
        .await
        .unwrap();
    assert_eq!(result.metadata_size, Some(20000));

    let fetched = fetch_metadata(&mut conn, config.ut_metadata_id, 3, 20000)
        .await
        .unwrap();

    assert_eq!(peer.await.unwrap(), vec![0, 1]);
    assert_eq!(fetched.len(), 20000);
    assert_eq!(&fetched[16384..], &metadata[16384..]);
    assert_eq!(fetched.as_ref(), metadata.as_slice());
}

#[tokio::test]
async fn test_initiate_stores_verified_metadata() {
    let (listener, addr) = listen().await;
    let metadata = test_metadata(20000);
    let info_hash: [u8; 20] = Sha1::digest(&metadata).into();
    let config = test_config();

    let peer = tokio::spawn(serve_metadata(
        listener,
        info_hash,
        metadata.clone(),
        config.ut_metadata_id,
    ));

    let mut torrent = MagnetTorrent::new(info_hash);
    let (conn, _) = PeerConnection::initiate(addr, &mut torrent, &config)
        .await
        .unwrap();

    assert_eq!(conn.state, PeerState::Active);
    assert_eq!(peer.await.unwrap(), vec![0, 1]);
    assert_eq!(torrent.metadata().map(|m| m.as_ref()), Some(metadata.as_slice()));
}

#[tokio::test]
async fn test_initiate_discards_metadata_with_wrong_hash() {
    let (listener, addr) = listen().await;
    let metadata = test_metadata(100);
    let config = test_config();

    let peer = tokio::spawn(serve_metadata(
        listener,
        INFO_HASH,
        metadata,
        config.ut_metadata_id,
    ));

    let mut torrent = MagnetTorrent::new(INFO_HASH);
    let (conn, _) = PeerConnection::initiate(addr, &mut torrent, &config)
        .await
        .unwrap();

    assert!(conn.is_connected());
    assert!(!torrent.has_metadata());
    peer.await.unwrap();
}

#[tokio::test]
async fn test_rejected_piece_keeps_connection() {
    let (listener, addr) = listen().await;
    let config = test_config();
    let local_ext = config.ut_metadata_id;

    let peer = tokio::spawn(async move {
        let mut stream = accept_and_handshake(&listener, INFO_HASH, true).await;
        let mut hs = ExtensionHandshake::with_extensions(&[("ut_metadata", 3)]);
        hs.metadata_size = Some(5000);
        send_extension_handshake(&mut stream, &hs).await;
        read_frame(&mut stream).await;
        read_frame(&mut stream).await;

        let (_, payload) = read_frame(&mut stream).await;
        let request = MetadataMessage::decode(&payload[1..]).unwrap();
        let msg = Message::Extended {
            id: local_ext,
            payload: MetadataMessage::reject(request.piece).encode(),
        };
        stream.write_all(&msg.encode()).await.unwrap();

        // The connection must survive the failed exchange.
        let (id, _) = read_frame(&mut stream).await;
        id
    });

    let (mut conn, result) = PeerConnection::connect(addr, INFO_HASH, &config)
        .await
        .unwrap();
    let remote_ext = result.ut_metadata_id().unwrap();

    let err = fetch_metadata(&mut conn, local_ext, remote_ext, 5000)
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::PieceRejected { piece: 0 }));

    conn.send(Message::NotInterested).await.unwrap();
    assert_eq!(peer.await.unwrap(), 3);
}

#[tokio::test]
async fn test_short_piece_is_size_mismatch() {
    let (listener, addr) = listen().await;
    let config = test_config();
    let local_ext = config.ut_metadata_id;

    let peer = tokio::spawn(async move {
        let mut stream = accept_and_handshake(&listener, INFO_HASH, true).await;
        let mut hs = ExtensionHandshake::with_extensions(&[("ut_metadata", 3)]);
        hs.metadata_size = Some(5000);
        send_extension_handshake(&mut stream, &hs).await;
        read_frame(&mut stream).await;
        read_frame(&mut stream).await;
        read_frame(&mut stream).await;

        let reply = MetadataMessage::data(0, 5000, Bytes::from(vec![0u8; 10]));
        let msg = Message::Extended {
            id: local_ext,
            payload: reply.encode(),
        };
        stream.write_all(&msg.encode()).await.unwrap();
        stream
    });

    let (mut conn, _) = PeerConnection::connect(addr, INFO_HASH, &config)
        .await
        .unwrap();
    let err = fetch_metadata(&mut conn, local_ext, 3, 5000)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MetadataError::SizeMismatch {
            expected: 5000,
            actual: 10
        }
    ));
    drop(peer.await.unwrap());
}

#[tokio::test]
async fn test_silent_peer_is_no_response() {
    let (listener, addr) = listen().await;
    let mut config = test_config();
    config.read_timeout = Duration::from_millis(300);

    let peer = tokio::spawn(async move {
        let mut stream = accept_and_handshake(&listener, INFO_HASH, true).await;
        let mut hs = ExtensionHandshake::with_extensions(&[("ut_metadata", 3)]);
        hs.metadata_size = Some(100);
        send_extension_handshake(&mut stream, &hs).await;
        assert_closed(&mut stream).await;
    });

    let (mut conn, _) = PeerConnection::connect(addr, INFO_HASH, &config)
        .await
        .unwrap();
    let err = fetch_metadata(&mut conn, config.ut_metadata_id, 3, 100)
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::NoResponse));

    conn.disconnect();
    assert!(!conn.is_connected());
    peer.await.unwrap();
}

#[tokio::test]
async fn test_invalid_declared_size() {
    let (listener, addr) = listen().await;

    let peer = tokio::spawn(async move {
        let stream = accept_and_handshake(&listener, INFO_HASH, false).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(stream);
    });

    let (mut conn, _) = PeerConnection::connect(addr, INFO_HASH, &test_config())
        .await
        .unwrap();
    for size in [0, -1, 17 * 1024 * 1024] {
        assert!(matches!(
            fetch_metadata(&mut conn, 2, 3, size).await,
            Err(MetadataError::InvalidSize(s)) if s == size
        ));
    }
    peer.await.unwrap();
}

#[tokio::test]
async fn test_unknown_message_instead_of_extension_handshake() {
    let (listener, addr) = listen().await;

    let peer = tokio::spawn(async move {
        let mut stream = accept_and_handshake(&listener, INFO_HASH, true).await;
        stream.write_all(&[0, 0, 0, 1, 0x0e]).await.unwrap();
        assert_closed(&mut stream).await;
    });

    let result = PeerConnection::connect(addr, INFO_HASH, &test_config()).await;
    assert!(matches!(
        result,
        Err(PeerError::UnexpectedExtendedMessageId {
            id: 14,
            extended_id: None
        })
    ));
    peer.await.unwrap();
}

#[tokio::test]
async fn test_unknown_message_skipped_during_metadata_fetch() {
    let (listener, addr) = listen().await;
    let metadata = test_metadata(100);
    let config = test_config();
    let local_ext = config.ut_metadata_id;

    let served = metadata.clone();
    let peer = tokio::spawn(async move {
        let mut stream = accept_and_handshake(&listener, INFO_HASH, true).await;
        let mut hs = ExtensionHandshake::with_extensions(&[("ut_metadata", 3)]);
        hs.metadata_size = Some(100);
        send_extension_handshake(&mut stream, &hs).await;
        read_frame(&mut stream).await;
        read_frame(&mut stream).await;
        read_frame(&mut stream).await;

        stream.write_all(&[0, 0, 0, 1, 0x15]).await.unwrap();
        let reply = MetadataMessage::data(0, 100, Bytes::from(served));
        let msg = Message::Extended {
            id: local_ext,
            payload: reply.encode(),
        };
        stream.write_all(&msg.encode()).await.unwrap();
        stream
    });

    let (mut conn, _) = PeerConnection::connect(addr, INFO_HASH, &config)
        .await
        .unwrap();
    let fetched = fetch_metadata(&mut conn, local_ext, 3, 100).await.unwrap();

    assert_eq!(fetched.as_ref(), metadata.as_slice());
    drop(peer.await.unwrap());
}

#[tokio::test]
async fn test_initiate_aborts_when_peer_hangs_up_during_fetch() {
    let (listener, addr) = listen().await;

    let peer = tokio::spawn(async move {
        let mut stream = accept_and_handshake(&listener, INFO_HASH, true).await;
        let mut hs = ExtensionHandshake::with_extensions(&[("ut_metadata", 3)]);
        hs.metadata_size = Some(100);
        send_extension_handshake(&mut stream, &hs).await;
        read_frame(&mut stream).await;
        read_frame(&mut stream).await;
        read_frame(&mut stream).await;
        drop(stream);
    });

    let mut torrent = MagnetTorrent::new(INFO_HASH);
    let (mut conn, result) = PeerConnection::initiate(addr, &mut torrent, &test_config())
        .await
        .unwrap();

    assert_eq!(result.ut_metadata_id(), Some(3));
    assert_eq!(conn.state, PeerState::Aborted);
    assert!(!conn.is_connected());
    assert!(!torrent.has_metadata());
    assert!(matches!(
        conn.send(Message::Interested).await,
        Err(PeerError::ConnectionClosed)
    ));
    peer.await.unwrap();
}
