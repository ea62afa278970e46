// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Wire protocol between the LLM server and the sandboxed client.
//!
//! Frames are UTF-8 JSON documents separated by single NUL bytes — no length
//! prefix, no NULs inside payloads (JSON escapes them).  Every message is a
//! discriminated union tagged by a `kind` field.
mod error;
mod messages;
mod wire;

pub use error::ProtocolError;
pub use messages::*;
pub use wire::{send_frame, FrameReader};
