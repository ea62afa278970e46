// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The generation boundary: a schema-constrained text generator plus the
//! tokenizer access the history compactor needs for context budgeting.
//!
//! The server core depends only on the [`CommandGenerator`] contract; the
//! llama.cpp-server binding here is the default collaborator, not part of the
//! core.  Any generator that returns JSON valid under the published command
//! schema is a valid dependency.
mod generator;
mod llama;
mod mock;
mod schema;

pub use generator::{ChatMessage, CommandGenerator, Role};
pub use llama::LlamaGenerator;
pub use mock::ScriptedGenerator;
pub use schema::commands_schema;
