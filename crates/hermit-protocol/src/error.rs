// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Failures on the framed connection.
///
/// A peer closing the socket, an in-band FIN, and a hard I/O failure are all
/// `ConnectionClosed` — the outer loops recover from them identically
/// (reconnect on the client, re-accept on the server).  `Validation` means a
/// frame arrived but did not parse as the expected message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("message failed validation: {0}")]
    Validation(String),
}
