// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The connection state machine: accept → handshake → dispatch.
//!
//! Exactly one client is served at a time.  The dispatch loop is strictly
//! synchronous request/response: one command out, one result back.  A batch
//! of commands reaches the history only after every result of the batch has
//! arrived — a half-executed batch from a dropped connection teaches the
//! model nothing reliable, so it is discarded.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{info, warn};

use hermit_config::ServerConfig;
use hermit_model::CommandGenerator;
use hermit_protocol::{
    send_frame, ClientMessage, Command, CommandResult, ControlMessage, FrameReader, ProtocolError,
};

use crate::error::ServerError;
use crate::history::ChatLog;
use crate::seed;
use crate::terminal::Terminal;

pub struct Server {
    listener: TcpListener,
    chat: ChatLog,
    generator: Arc<dyn CommandGenerator>,
    terminal: Terminal,
    config: ServerConfig,
    seed: Vec<Command>,
    initialized: bool,
    last_prompt: Option<String>,
}

impl Server {
    /// Bind `127.0.0.1:<port>` and prepare to serve.
    pub async fn bind(
        config: ServerConfig,
        chat: ChatLog,
        generator: Arc<dyn CommandGenerator>,
        terminal: Terminal,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(("127.0.0.1", config.port))
            .await
            .map_err(|e| ServerError::Listener(e.to_string()))?;
        if let Ok(addr) = listener.local_addr() {
            info!("listening on {addr}");
        }
        Ok(Self {
            listener,
            chat,
            generator,
            terminal,
            config,
            seed: seed::initial_commands(),
            initialized: false,
            last_prompt: None,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Replace the intro-phase commands (tests use a shorter seed).
    pub fn set_seed(&mut self, seed: Vec<Command>) {
        self.seed = seed;
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    /// Accept and serve connections until a fatal error.
    pub async fn serve(&mut self) -> Result<(), ServerError> {
        loop {
            self.handle_connection().await?;
        }
    }

    /// Serve one connection from accept to close.
    ///
    /// Returns `Ok` when the connection ended (FIN, disconnect, protocol
    /// violation, liveness probe) and the server should re-accept; `Err`
    /// only for conditions that must stop the process.
    pub async fn handle_connection(&mut self) -> Result<(), ServerError> {
        info!("waiting for connection");
        let (mut conn, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| ServerError::Listener(e.to_string()))?;
        info!(
            %peer,
            timeout_secs = self.config.handshake_timeout().as_secs_f64(),
            "connection accepted"
        );
        let mut reader = FrameReader::new();

        match self.handshake(&mut conn, &mut reader).await {
            Ok(true) => {}
            Ok(false) => {
                info!("liveness probe; closing");
                return Ok(());
            }
            Err(e) => {
                warn!("handshake failed: {e}");
                return Ok(());
            }
        }

        let outcome = self.dispatch_loop(&mut conn, &mut reader).await;
        info!("connection closed");
        outcome
    }

    /// SYN/ACK/ACK with a read timeout; a NOP instead of SYN requests an
    /// immediate close (`Ok(false)`).
    async fn handshake(
        &self,
        conn: &mut TcpStream,
        reader: &mut FrameReader,
    ) -> Result<bool, ProtocolError> {
        let deadline = self.config.handshake_timeout();
        let first: ControlMessage = timeout(deadline, reader.recv_message(conn))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)??;
        match first {
            ControlMessage::Nop => return Ok(false),
            ControlMessage::Syn => {}
            other => {
                return Err(ProtocolError::Validation(format!(
                    "expected SYN, got {other:?}"
                )))
            }
        }
        send_frame(conn, &ControlMessage::Ack).await?;
        let second: ControlMessage = timeout(deadline, reader.recv_message(conn))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)??;
        match second {
            ControlMessage::Ack => Ok(true),
            other => Err(ProtocolError::Validation(format!(
                "expected ACK, got {other:?}"
            ))),
        }
    }

    async fn dispatch_loop(
        &mut self,
        conn: &mut TcpStream,
        reader: &mut FrameReader,
    ) -> Result<(), ServerError> {
        // Intro phase: once per server lifetime, seed the history through the
        // normal dispatch path so the model starts with worked examples.
        if !self.initialized {
            if self.seed.is_empty() {
                self.initialized = true;
            } else {
                let seed = self.seed.clone();
                match self
                    .dispatch_batch(conn, reader, &seed, Some("Initial commands"))
                    .await
                {
                    Ok(results) => {
                        self.chat.append_all(results);
                        self.initialized = true;
                    }
                    Err(e) => {
                        warn!("client lost during intro phase: {e}");
                        return Ok(());
                    }
                }
            }
        }

        loop {
            let commands = match self.chat.get_commands(self.generator.as_ref()).await {
                Ok(commands) => commands,
                Err(ServerError::Validation(e)) => {
                    warn!("skipping generation: {e}");
                    continue;
                }
                Err(fatal) => return Err(fatal),
            };
            match self.dispatch_batch(conn, reader, &commands, None).await {
                Ok(results) => self.chat.append_all(results),
                Err(ProtocolError::ConnectionClosed) => return Ok(()),
                Err(ProtocolError::Validation(e)) => {
                    warn!("protocol violation from client: {e}");
                    return Ok(());
                }
            }
        }
    }

    /// Ship one batch, command by command, collecting results.
    ///
    /// The caller appends the results to history only when the whole batch
    /// round-tripped; any error here drops the partial batch.
    async fn dispatch_batch(
        &mut self,
        conn: &mut TcpStream,
        reader: &mut FrameReader,
        commands: &[Command],
        comment: Option<&str>,
    ) -> Result<Vec<CommandResult>, ProtocolError> {
        let total = commands.len();
        let mut results = Vec::with_capacity(total);
        for (i, command) in commands.iter().enumerate() {
            send_frame(conn, command).await?;
            if self.terminal.stream() {
                self.terminal.render_command(command);
            }
            let message: ClientMessage = reader.recv_message(conn).await?;
            let result = match message {
                ClientMessage::Result(result) => *result,
                ClientMessage::Control(ControlMessage::Fin) => {
                    warn!("FIN received");
                    return Err(ProtocolError::ConnectionClosed);
                }
                ClientMessage::Control(other) => {
                    return Err(ProtocolError::Validation(format!(
                        "unexpected control message: {other:?}"
                    )))
                }
            };
            let note = comment.map(|c| format!("{c} ({}/{total})", i + 1));
            self.terminal
                .render(self.last_prompt.as_deref(), &result, note.as_deref());
            if let Some(prompt) = result.prompt() {
                self.last_prompt = Some(prompt.to_string());
            }
            results.push(result);
        }
        Ok(results)
    }
}
