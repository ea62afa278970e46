// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Client connection loop.
//!
//! Connects to the server, completes the SYN/ACK/ACK handshake, then mirrors
//! the server's dispatch loop: one command in, one result out.  Connection
//! loss of any kind drops back to the outer loop, which sleeps and
//! reconnects; only an unrecoverable sandbox puts the process down.

use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use hermit_config::{ClientConfig, RECONNECT_DELAY};
use hermit_protocol::{send_frame, ControlMessage, FrameReader, ProtocolError, ServerMessage};
use hermit_sandbox::{SandboxError, Shell};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Connection(#[from] ProtocolError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

pub struct Client {
    shell: Shell,
    config: ClientConfig,
}

impl Client {
    pub fn new(shell: Shell, config: ClientConfig) -> Self {
        Self { shell, config }
    }

    /// Connect and serve forever, reconnecting after every lost connection.
    ///
    /// Returns only when the sandbox itself fails beyond repair.
    pub async fn run(&mut self) -> Result<(), SandboxError> {
        loop {
            match self.handle_connection().await {
                Ok(()) => {}
                Err(ClientError::Connection(e)) => {
                    warn!("connection closed");
                    debug!("{e}");
                }
                Err(ClientError::Sandbox(e)) => return Err(e),
            }
            info!("waiting {}s before reconnecting", RECONNECT_DELAY.as_secs());
            sleep(RECONNECT_DELAY).await;
        }
    }

    /// One connection: handshake, then execute commands until it drops.
    pub async fn handle_connection(&mut self) -> Result<(), ClientError> {
        info!("connecting to {}:{}", self.config.host, self.config.port);
        let mut conn = timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((self.config.host.as_str(), self.config.port)),
        )
        .await
        .map_err(|_| ProtocolError::ConnectionClosed)?
        .map_err(|e| {
            debug!("connect failed: {e}");
            ProtocolError::ConnectionClosed
        })?;
        let mut reader = FrameReader::new();

        // Handshake reads are bounded; the dispatch loop below blocks freely.
        let handshake_timeout = self.config.exit_timeout + Duration::from_secs(1);
        send_frame(&mut conn, &ControlMessage::Syn).await?;
        let ack: ControlMessage = timeout(handshake_timeout, reader.recv_message(&mut conn))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?
            .map_err(ClientError::Connection)?;
        if ack != ControlMessage::Ack {
            return Err(ProtocolError::Validation(format!("expected ACK, got {ack:?}")).into());
        }
        send_frame(&mut conn, &ControlMessage::Ack).await?;
        info!("connected to server");

        loop {
            let message: ServerMessage = reader.recv_message(&mut conn).await?;
            match message {
                ServerMessage::Control(ControlMessage::Fin) => {
                    warn!("received FIN from server");
                    let _ = conn.shutdown().await;
                    return Err(ProtocolError::ConnectionClosed.into());
                }
                ServerMessage::Control(other) => {
                    return Err(ProtocolError::Validation(format!(
                        "unexpected control message: {other:?}"
                    ))
                    .into());
                }
                ServerMessage::Command(command) => {
                    let result = self.shell.execute(command).await?;
                    debug!("sending result");
                    send_frame(&mut conn, &result).await?;
                }
            }
        }
    }

    /// Close the sandbox shell (children first) before exiting.
    pub async fn shutdown(&mut self) -> Result<(), SandboxError> {
        self.shell.close().await
    }
}
