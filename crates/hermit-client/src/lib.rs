// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The sandbox-side process: connect, handshake, execute, reconnect.
mod client;

pub use client::{Client, ClientError};
