// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use clap::{Parser, Subcommand};

/// An autonomous agent loop driving a sandboxed shell from a local LLM.
#[derive(Parser, Debug)]
#[command(name = "hermit", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Host the model: accept the sandbox client and drive the loop.
    ///
    /// Requires a running llama.cpp server (`LLAMA_BASE_URL`), a `system.md`
    /// next to the working directory, and `LLAMA_DEFAULT_GOAL` in the
    /// environment.  Binds 127.0.0.1 only.
    Server,

    /// Run inside the sandbox: own the shell, execute commands.
    ///
    /// Requires `PS1` (the prompt template the probe expands) and reaches
    /// the server at `LLAMA_HOST:LLAMA_PORT`.
    Client,
}
