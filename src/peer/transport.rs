use super::error::PeerError;
use super::message::{Handshake, Message};
use crate::constants::MAX_MESSAGE_SIZE;
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Framed access to a peer's TCP stream.
///
/// Every read and write is bounded by a timeout.
pub struct PeerTransport {
    stream: TcpStream,
    read_buf: BytesMut,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl PeerTransport {
    pub fn with_timeouts(stream: TcpStream, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(32 * 1024),
            read_timeout,
            write_timeout,
        }
    }

    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<(), PeerError> {
        self.send_raw(&handshake.encode()).await
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), PeerError> {
        self.send_raw(&message.encode()).await
    }

    async fn send_raw(&mut self, data: &[u8]) -> Result<(), PeerError> {
        timeout(self.write_timeout, self.stream.write_all(data))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    /// Reads exactly `n` bytes, buffering anything extra the peer already sent.
    pub async fn read_exact(&mut self, n: usize) -> Result<Bytes, PeerError> {
        self.fill(n).await?;
        Ok(self.read_buf.split_to(n).freeze())
    }

    pub async fn receive_message(&mut self) -> Result<Message, PeerError> {
        self.fill(4).await?;

        let length = u32::from_be_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;

        if length > MAX_MESSAGE_SIZE {
            return Err(PeerError::InvalidMessage(format!(
                "message too large: {}",
                length
            )));
        }

        let total_len = 4 + length;
        self.fill(total_len).await?;

        let data = self.read_buf.split_to(total_len);
        Message::decode(data.freeze())
    }

    async fn fill(&mut self, n: usize) -> Result<(), PeerError> {
        while self.read_buf.len() < n {
            let read = timeout(self.read_timeout, self.stream.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| PeerError::Timeout)??;

            if read == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }
        Ok(())
    }

    /// Flushes and closes the write half; errors are ignored because the
    /// stream is being torn down anyway.
    pub async fn shutdown(&mut self) {
        let _ = timeout(self.write_timeout, self.stream.shutdown()).await;
    }
}
