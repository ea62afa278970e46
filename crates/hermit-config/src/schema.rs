// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Safety margin subtracted from `n_ctx` when deciding whether a prompt fits.
pub const TOKEN_BUFFER: usize = 512;

/// Grace period between SIGTERM and SIGKILL when clearing shell children.
pub const KILL_TIMEOUT: Duration = Duration::from_secs(1);

/// Delay before the client retries a lost server connection.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Command words refused by the sandbox because they expect a terminal.
pub const INTERACTIVE_COMMANDS: &[&str] = &["vim", "nano", "less", "more"];

// ─── Server ───────────────────────────────────────────────────────────────────

/// Settings for the LLM-hosting server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind port on 127.0.0.1 (`POCKET_ASI_PORT`, default 1199).
    pub port: u16,
    /// Per-command execution timeout (`LLAMA_EXIT_TIMEOUT`, default 10 s).
    /// The handshake read timeout is this value plus one second.
    pub exit_timeout: Duration,
    /// Fallback goal when the sandbox has no `/app/goal` (`LLAMA_DEFAULT_GOAL`).
    pub default_goal: String,
    /// Path of the immutable system prompt, read once at startup.
    pub system_path: PathBuf,
    /// When the model response is streamed to the log, the terminal renderer
    /// must not interleave its own prompt echo (`LLAMA_STREAM_RESPONSE`).
    pub stream_response: bool,
}

impl ServerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        self.exit_timeout + Duration::from_secs(1)
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

/// Settings for the sandboxed client process.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host (`LLAMA_HOST`, default `host.docker.internal`).
    pub host: String,
    /// Server port (`LLAMA_PORT`, default 1199).
    pub port: u16,
    /// Per-command execution timeout (`LLAMA_EXIT_TIMEOUT`, default 10 s).
    pub exit_timeout: Duration,
    /// The PS1 template the prompt probe expands inside the shell.
    /// Must render to the form `<exit> <user>@<host>:<cwd> <$|#> `.
    pub ps1: String,
    /// Sandbox files that feed configuration back into generation.
    pub paths: SandboxPaths,
}

/// Locations of the operator-visible files the model itself may rewrite.
#[derive(Debug, Clone)]
pub struct SandboxPaths {
    pub system: PathBuf,
    pub goal: PathBuf,
    pub config: PathBuf,
}

impl Default for SandboxPaths {
    fn default() -> Self {
        Self {
            system: PathBuf::from("/app/system.md"),
            goal: PathBuf::from("/app/goal"),
            config: PathBuf::from("/app/config.json"),
        }
    }
}

// ─── Generator ────────────────────────────────────────────────────────────────

/// Endpoint settings for the llama.cpp server binding.
#[derive(Debug, Clone)]
pub struct LlamaConfig {
    /// Base URL of a running `llama-server` (`LLAMA_BASE_URL`).
    pub base_url: String,
    /// Context window override (`LLAMA_N_CTX`); probed from the server
    /// when unset.
    pub n_ctx: Option<usize>,
}

/// Sampling options forwarded to the generator with every request.
///
/// Every field is optional; unset fields are omitted from the request body so
/// the server's own defaults apply.  The sandbox writes this struct to
/// `/app/config.json` — it is part of the wire format, so additions here
/// change what the model can reconfigure about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typical_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirostat_mode: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirostat_tau: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirostat_eta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gen_options_omit_unset_fields() {
        let opts = GenOptions {
            temperature: Some(0.7),
            ..Default::default()
        };
        let json = serde_json::to_value(&opts).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert_eq!(obj["temperature"], 0.7);
    }

    #[test]
    fn gen_options_tolerate_unknown_defaults() {
        let opts: GenOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, GenOptions::default());
    }

    #[test]
    fn gen_options_round_trip() {
        let opts = GenOptions {
            temperature: Some(1.0),
            top_k: Some(40),
            max_tokens: Some(1024),
            ..Default::default()
        };
        let json = serde_json::to_string(&opts).unwrap();
        let back: GenOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opts);
    }

    #[test]
    fn handshake_timeout_is_exit_timeout_plus_one() {
        let config = ServerConfig {
            port: 1199,
            exit_timeout: Duration::from_secs(10),
            default_goal: "explore".into(),
            system_path: "system.md".into(),
            stream_response: false,
        };
        assert_eq!(config.handshake_timeout(), Duration::from_secs(11));
    }

    #[test]
    fn default_sandbox_paths_point_at_app() {
        let paths = SandboxPaths::default();
        assert_eq!(paths.system, PathBuf::from("/app/system.md"));
        assert_eq!(paths.goal, PathBuf::from("/app/goal"));
        assert_eq!(paths.config, PathBuf::from("/app/config.json"));
    }
}
