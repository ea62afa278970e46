// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Environment-variable loading for the three process configurations.
//!
//! hermit is configured entirely through the environment (it runs inside a
//! container where files are the model's territory, not the operator's).
//! Values are read once at startup and threaded through constructors; nothing
//! in the library reads the environment behind the caller's back.

use std::env;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::debug;

use crate::schema::{ClientConfig, LlamaConfig, SandboxPaths, ServerConfig};

const DEFAULT_PORT: u16 = 1199;
const DEFAULT_EXIT_TIMEOUT_SECS: f64 = 10.0;
const DEFAULT_HOST: &str = "host.docker.internal";
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {name}={raw}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn exit_timeout_from_env() -> anyhow::Result<Duration> {
    let secs: f64 = env_parse("LLAMA_EXIT_TIMEOUT", DEFAULT_EXIT_TIMEOUT_SECS)?;
    if !secs.is_finite() || secs <= 0.0 {
        bail!("LLAMA_EXIT_TIMEOUT must be a positive number of seconds, got {secs}");
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Load the server configuration from the environment.
pub fn server_from_env() -> anyhow::Result<ServerConfig> {
    let config = ServerConfig {
        port: env_parse("POCKET_ASI_PORT", DEFAULT_PORT)?,
        exit_timeout: exit_timeout_from_env()?,
        default_goal: env::var("LLAMA_DEFAULT_GOAL")
            .context("LLAMA_DEFAULT_GOAL must be set for the server")?,
        system_path: env_or("LLAMA_SYSTEM_PATH", "system.md").into(),
        stream_response: env_bool("LLAMA_STREAM_RESPONSE"),
    };
    debug!(port = config.port, "loaded server config");
    Ok(config)
}

/// Load the client configuration from the environment.
///
/// `PS1` is required: the sandbox cannot recover exit codes without a prompt
/// template that matches the parser (see the protocol crate's `Prompt`).
pub fn client_from_env() -> anyhow::Result<ClientConfig> {
    let config = ClientConfig {
        host: env_or("LLAMA_HOST", DEFAULT_HOST),
        port: env_parse("LLAMA_PORT", DEFAULT_PORT)?,
        exit_timeout: exit_timeout_from_env()?,
        ps1: env::var("PS1").context("PS1 must be set for the sandbox prompt probe")?,
        paths: SandboxPaths::default(),
    };
    debug!(host = %config.host, port = config.port, "loaded client config");
    Ok(config)
}

/// Load the llama.cpp server endpoint configuration from the environment.
pub fn llama_from_env() -> anyhow::Result<LlamaConfig> {
    let n_ctx = match env::var("LLAMA_N_CTX") {
        Ok(raw) => Some(
            raw.parse()
                .map_err(|e| anyhow::anyhow!("invalid LLAMA_N_CTX={raw}: {e}"))?,
        ),
        Err(_) => None,
    };
    Ok(LlamaConfig {
        base_url: env_or("LLAMA_BASE_URL", DEFAULT_BASE_URL),
        n_ctx,
    })
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // Environment mutation is process-wide, so everything that touches the
    // same variables lives in one test.
    #[test]
    fn configs_load_from_environment() {
        env::set_var("POCKET_ASI_PORT", "4242");
        env::set_var("LLAMA_PORT", "4243");
        env::set_var("LLAMA_HOST", "127.0.0.1");
        env::set_var("LLAMA_EXIT_TIMEOUT", "2.5");
        env::set_var("LLAMA_DEFAULT_GOAL", "explore the filesystem");
        env::set_var("PS1", r"$? \u@\h:\w \$ ");
        env::set_var("LLAMA_BASE_URL", "http://127.0.0.1:9999");
        env::set_var("LLAMA_N_CTX", "2048");

        let server = server_from_env().unwrap();
        assert_eq!(server.port, 4242);
        assert_eq!(server.exit_timeout, Duration::from_secs_f64(2.5));
        assert_eq!(server.default_goal, "explore the filesystem");

        let client = client_from_env().unwrap();
        assert_eq!(client.host, "127.0.0.1");
        assert_eq!(client.port, 4243);
        assert_eq!(client.ps1, r"$? \u@\h:\w \$ ");

        let llama = llama_from_env().unwrap();
        assert_eq!(llama.base_url, "http://127.0.0.1:9999");
        assert_eq!(llama.n_ctx, Some(2048));

        env::set_var("LLAMA_EXIT_TIMEOUT", "-1");
        assert!(client_from_env().is_err());
        env::set_var("LLAMA_EXIT_TIMEOUT", "2.5");

        env::remove_var("LLAMA_DEFAULT_GOAL");
        assert!(server_from_env().is_err());
    }

    #[test]
    fn env_bool_accepts_common_truthy_spellings() {
        env::set_var("HERMIT_TEST_BOOL", "TRUE");
        assert!(env_bool("HERMIT_TEST_BOOL"));
        env::set_var("HERMIT_TEST_BOOL", "0");
        assert!(!env_bool("HERMIT_TEST_BOOL"));
        env::remove_var("HERMIT_TEST_BOOL");
        assert!(!env_bool("HERMIT_TEST_BOOL"));
    }
}
