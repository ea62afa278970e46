// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The LLM-side process: chat history with context budgeting, the accept /
//! handshake / dispatch state machine, and the operator terminal.
mod error;
mod history;
mod seed;
mod server;
mod terminal;

pub use error::ServerError;
pub use history::ChatLog;
pub use seed::initial_commands;
pub use server::Server;
pub use terminal::Terminal;
