// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! End-to-end scenarios over real sockets on 127.0.0.1.
//!
//! The server runs with a scripted generator; the client side is either the
//! real client (with a real `/bin/bash` sandbox) or a raw socket speaking the
//! frame protocol directly, which lets the tests drop connections at exact
//! points in a batch.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use hermit_client::{Client, ClientError};
use hermit_config::{ClientConfig, SandboxPaths, ServerConfig};
use hermit_model::ScriptedGenerator;
use hermit_protocol::{
    send_frame, ClientMessage, Command, CommandResult, ControlMessage, FrameReader, OutputLine,
    Prompt, ProtocolError, ShellCommand, ShellResult, Snapshot,
};
use hermit_sandbox::Shell;
use hermit_server::{ChatLog, Server, ServerError, Terminal};

const PS1: &str = r"$? \u@\h:\w \$ ";

fn server_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        exit_timeout: Duration::from_secs(2),
        default_goal: "explore".into(),
        system_path: "system.md".into(),
        // Keep the terminal quiet: pretend the response streams to the log.
        stream_response: true,
    }
}

async fn build_server(scripts: Vec<String>) -> Server {
    let generator = Arc::new(ScriptedGenerator::new(100_000, scripts));
    let chat = ChatLog::new("You drive a shell.".into(), "explore".into());
    Server::bind(server_config(), chat, generator, Terminal::new(true))
        .await
        .expect("bind server")
}

fn sandbox_paths(dir: &std::path::Path) -> SandboxPaths {
    SandboxPaths {
        system: dir.join("system.md"),
        goal: dir.join("goal"),
        config: dir.join("config.json"),
    }
}

fn client_config(port: u16, dir: &std::path::Path) -> ClientConfig {
    ClientConfig {
        host: "127.0.0.1".into(),
        port,
        exit_timeout: Duration::from_secs(5),
        ps1: PS1.into(),
        paths: sandbox_paths(dir),
    }
}

fn fake_shell_result(command: ShellCommand) -> CommandResult {
    CommandResult::Shell(ShellResult {
        command,
        stdout: vec![OutputLine(1.0, "ok\n".into())],
        stderr: vec![],
        exit_code: 0,
        prompt: Prompt::parse("0 agent@box:/tmp $ ").unwrap(),
        base: Snapshot::default(),
    })
}

/// Complete the client side of the handshake on a raw socket.
async fn raw_handshake(conn: &mut TcpStream, reader: &mut FrameReader) {
    send_frame(conn, &ControlMessage::Syn).await.unwrap();
    let ack: ControlMessage = reader.recv_message(conn).await.unwrap();
    assert_eq!(ack, ControlMessage::Ack);
    send_frame(conn, &ControlMessage::Ack).await.unwrap();
}

// ── Scenario: the full loop with a real client and shell ──────────────────────

#[tokio::test]
async fn full_loop_executes_commands_and_grows_history() {
    let dir = tempfile::tempdir().unwrap();
    let note = dir.path().join("note").display().to_string();
    let batch = format!(
        r#"[{{"kind":"shell","command":"echo hi"}},{{"kind":"file_write","file":"{note}","content":"hello"}}]"#
    );
    let mut server = build_server(vec![batch]).await;
    server.set_seed(vec![Command::shell("echo seeded")]);
    let port = server.local_addr().unwrap().port();

    let config = client_config(port, dir.path());
    let shell = Shell::from_config(&config).await.unwrap();
    let mut client = Client::new(shell, config);
    let client_task = tokio::spawn(async move {
        // One connection is enough; the server hangs up when its script ends.
        let _ = client.handle_connection().await;
        client
    });

    // Seed (1 command) + batch (2 commands) land in history, then the
    // exhausted script stops the loop.
    let err = server.handle_connection().await.unwrap_err();
    assert!(matches!(err, ServerError::Generation(_)), "got {err:?}");
    assert_eq!(server.chat().len(), 3);

    // The file-write command really happened inside the sandbox.
    let written = tokio::fs::read_to_string(dir.path().join("note")).await.unwrap();
    assert_eq!(written, "hello");

    let mut client = client_task.await.unwrap();
    client.shutdown().await.unwrap();
}

// ── Scenario: liveness probe ──────────────────────────────────────────────────

#[tokio::test]
async fn nop_closes_the_connection_without_dispatch() {
    let mut server = build_server(vec![]).await;
    server.set_seed(vec![]);
    let addr = server.local_addr().unwrap();

    let probe = tokio::spawn(async move {
        let mut conn = TcpStream::connect(addr).await.unwrap();
        send_frame(&mut conn, &ControlMessage::Nop).await.unwrap();
        let mut reader = FrameReader::new();
        let reply: Result<ControlMessage, _> = reader.recv_message(&mut conn).await;
        assert!(reply.is_err(), "server must close after NOP");
    });

    server.handle_connection().await.unwrap();
    assert_eq!(server.chat().len(), 0);
    probe.await.unwrap();
}

// ── Scenario: mid-batch disconnect drops the partial batch ────────────────────

#[tokio::test]
async fn partial_batches_never_reach_history() {
    let abandoned = r#"[
        {"kind":"shell","command":"echo one"},
        {"kind":"shell","command":"echo two"},
        {"kind":"shell","command":"echo three"}
    ]"#;
    let completed = r#"[{"kind":"shell","command":"echo later"}]"#;
    let mut server = build_server(vec![abandoned.to_string(), completed.to_string()]).await;
    server.set_seed(vec![]);
    let addr = server.local_addr().unwrap();

    // First connection: one result, then vanish mid-batch.
    let quitter = tokio::spawn(async move {
        let mut conn = TcpStream::connect(addr).await.unwrap();
        let mut reader = FrameReader::new();
        raw_handshake(&mut conn, &mut reader).await;
        let first: Command = reader.recv_message(&mut conn).await.unwrap();
        let Command::Shell(shell_command) = first else {
            panic!("expected a shell command");
        };
        send_frame(&mut conn, &fake_shell_result(shell_command))
            .await
            .unwrap();
        let _second: Command = reader.recv_message(&mut conn).await.unwrap();
        // Disconnect with two results outstanding.
        drop(conn);
    });
    server.handle_connection().await.unwrap();
    quitter.await.unwrap();
    assert_eq!(
        server.chat().len(),
        0,
        "a partial batch must not grow history"
    );

    // Second connection: the server re-accepts and the next batch lands.
    let finisher = tokio::spawn(async move {
        let mut conn = TcpStream::connect(addr).await.unwrap();
        let mut reader = FrameReader::new();
        raw_handshake(&mut conn, &mut reader).await;
        let command: Command = reader.recv_message(&mut conn).await.unwrap();
        let Command::Shell(shell_command) = command else {
            panic!("expected a shell command");
        };
        send_frame(&mut conn, &fake_shell_result(shell_command))
            .await
            .unwrap();
        // Stay connected until the server hangs up on script exhaustion.
        let _: Result<Command, _> = reader.recv_message(&mut conn).await;
    });
    let err = server.handle_connection().await.unwrap_err();
    assert!(matches!(err, ServerError::Generation(_)));
    assert_eq!(server.chat().len(), 1);
    finisher.await.unwrap();
}

// ── Scenario: FIN from the client closes cleanly ──────────────────────────────

#[tokio::test]
async fn client_fin_returns_the_server_to_accept() {
    let batch = r#"[{"kind":"shell","command":"echo unreached"}]"#;
    let mut server = build_server(vec![batch.to_string()]).await;
    server.set_seed(vec![]);
    let addr = server.local_addr().unwrap();

    let finisher = tokio::spawn(async move {
        let mut conn = TcpStream::connect(addr).await.unwrap();
        let mut reader = FrameReader::new();
        raw_handshake(&mut conn, &mut reader).await;
        let _command: Command = reader.recv_message(&mut conn).await.unwrap();
        send_frame(&mut conn, &ControlMessage::Fin).await.unwrap();
    });

    server.handle_connection().await.unwrap();
    assert_eq!(server.chat().len(), 0);
    finisher.await.unwrap();
}

// ── Scenario: the client executes commands for a raw server ───────────────────

#[tokio::test]
async fn client_round_trips_a_command_and_honors_fin() {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let fake_server = tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        let mut reader = FrameReader::new();
        let syn: ControlMessage = reader.recv_message(&mut conn).await.unwrap();
        assert_eq!(syn, ControlMessage::Syn);
        send_frame(&mut conn, &ControlMessage::Ack).await.unwrap();
        let ack: ControlMessage = reader.recv_message(&mut conn).await.unwrap();
        assert_eq!(ack, ControlMessage::Ack);

        send_frame(&mut conn, &Command::shell("echo hi")).await.unwrap();
        let message: ClientMessage = reader.recv_message(&mut conn).await.unwrap();
        let ClientMessage::Result(result) = message else {
            panic!("expected a result");
        };
        match *result {
            CommandResult::Shell(r) => {
                let stdout: String = r.stdout.iter().map(|l| l.1.as_str()).collect();
                assert_eq!(stdout, "hi\n");
                assert_eq!(r.exit_code, 0);
            }
            other => panic!("expected shell result, got {other:?}"),
        }

        send_frame(&mut conn, &ControlMessage::Fin).await.unwrap();
        // Give the client time to read the FIN before the socket drops.
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let dir = tempfile::tempdir().unwrap();
    let config = client_config(port, dir.path());
    let shell = Shell::from_config(&config).await.unwrap();
    let mut client = Client::new(shell, config);

    let err = client.handle_connection().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Connection(ProtocolError::ConnectionClosed)
    ));

    client.shutdown().await.unwrap();
    fake_server.await.unwrap();
}
