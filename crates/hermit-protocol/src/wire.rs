// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! NUL-delimited JSON framing over a stream socket.
//!
//! Wire format per message:
//!   [UTF-8 JSON document][0x00]
//!
//! There is no length prefix; the delimiter is sufficient because JSON
//! escapes embedded NULs.  The receive buffer belongs to the connection and
//! persists across calls so that several frames arriving in one segment are
//! handed out one at a time.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::ProtocolError;

const FRAME_DELIMITER: u8 = 0x00;
const READ_CHUNK: usize = 4096;
// Backstop against a runaway peer; a frame is normally a few KB of output.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Serialize `value`, append the delimiter, and write the frame atomically.
pub async fn send_frame<W, T>(io: &mut W, value: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut frame = serde_json::to_vec(value)
        .map_err(|e| ProtocolError::Validation(format!("serialize: {e}")))?;
    if frame.contains(&FRAME_DELIMITER) {
        return Err(ProtocolError::Validation(
            "payload contains a NUL byte".into(),
        ));
    }
    frame.push(FRAME_DELIMITER);
    io.write_all(&frame).await.map_err(|e| {
        debug!("write failed: {e}");
        ProtocolError::ConnectionClosed
    })?;
    io.flush().await.map_err(|e| {
        debug!("flush failed: {e}");
        ProtocolError::ConnectionClosed
    })?;
    Ok(())
}

/// Buffered frame receiver.  One per connection; the buffer must outlive
/// individual `recv` calls so partial and coalesced frames are handled.
#[derive(Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read until a complete frame is buffered and return its payload text.
    ///
    /// A zero-byte read means the peer closed the socket.
    pub async fn recv<R>(&mut self, io: &mut R) -> Result<String, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == FRAME_DELIMITER) {
                let rest = self.buf.split_off(pos + 1);
                let mut frame = std::mem::replace(&mut self.buf, rest);
                frame.pop();
                return String::from_utf8(frame)
                    .map_err(|e| ProtocolError::Validation(format!("frame is not UTF-8: {e}")));
            }
            if self.buf.len() > MAX_FRAME_BYTES {
                return Err(ProtocolError::Validation("frame exceeds size limit".into()));
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = io.read(&mut chunk).await.map_err(|e| {
                debug!("read failed: {e}");
                ProtocolError::ConnectionClosed
            })?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Receive one frame and parse it as `T`.
    pub async fn recv_message<R, T>(&mut self, io: &mut R) -> Result<T, ProtocolError>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        let raw = self.recv(io).await?;
        serde_json::from_str(&raw).map_err(|e| {
            debug!("rejected frame: {raw}");
            ProtocolError::Validation(format!("parse: {e}"))
        })
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Command, ControlMessage};
    use serde_json::json;

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        send_frame(&mut a, &Command::shell("echo hi")).await.unwrap();
        let mut reader = FrameReader::new();
        let got: Command = reader.recv_message(&mut b).await.unwrap();
        assert_eq!(got, Command::shell("echo hi"));
    }

    #[tokio::test]
    async fn coalesced_frames_arrive_as_the_same_sequence() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        // Three frames written back-to-back land in one segment.
        for value in [json!({"n": 1}), json!({"n": 2}), json!({"n": 3})] {
            send_frame(&mut a, &value).await.unwrap();
        }
        let mut reader = FrameReader::new();
        for expected in 1..=3 {
            let got: serde_json::Value = reader.recv_message(&mut b).await.unwrap();
            assert_eq!(got["n"], expected);
        }
    }

    #[tokio::test]
    async fn split_frame_is_reassembled() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let payload = serde_json::to_vec(&json!({"text": "split across writes"})).unwrap();
        let (head, tail) = payload.split_at(7);

        let head = head.to_vec();
        let tail = tail.to_vec();
        let writer = tokio::spawn(async move {
            a.write_all(&head).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            a.write_all(&tail).await.unwrap();
            a.write_all(&[0u8]).await.unwrap();
        });

        let mut reader = FrameReader::new();
        let got: serde_json::Value = reader.recv_message(&mut b).await.unwrap();
        assert_eq!(got["text"], "split across writes");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn closed_peer_is_connection_closed() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let mut reader = FrameReader::new();
        let err = reader.recv(&mut b).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn partial_frame_then_close_is_connection_closed() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(b"{\"incomplete\":").await.unwrap();
        drop(a);
        let mut reader = FrameReader::new();
        let err = reader.recv(&mut b).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn control_and_command_share_one_connection() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        send_frame(&mut a, &ControlMessage::Syn).await.unwrap();
        send_frame(&mut a, &Command::file_read("/tmp/x")).await.unwrap();
        let mut reader = FrameReader::new();
        let first: crate::messages::ServerMessage = reader.recv_message(&mut b).await.unwrap();
        assert_eq!(
            first,
            crate::messages::ServerMessage::Control(ControlMessage::Syn)
        );
        let second: crate::messages::ServerMessage = reader.recv_message(&mut b).await.unwrap();
        assert_eq!(
            second,
            crate::messages::ServerMessage::Command(Command::file_read("/tmp/x"))
        );
    }

    #[tokio::test]
    async fn garbage_frame_is_validation_not_close() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(b"not json\0").await.unwrap();
        let mut reader = FrameReader::new();
        let err = reader
            .recv_message::<_, ControlMessage>(&mut b)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Validation(_)));
    }
}
