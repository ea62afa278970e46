// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Binding to a running llama.cpp `llama-server`.
//!
//! Uses the OpenAI-compatible `/v1/chat/completions` endpoint with a
//! `json_schema` response format so decoding is grammar-constrained to the
//! published command schema.  Context budgeting goes through the server's own
//! template and tokenizer (`POST /apply-template` + `POST /tokenize`), so
//! token counts match what the model actually consumes.  The context window
//! is discovered from `GET /props` unless overridden.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use hermit_config::{GenOptions, LlamaConfig};

use crate::generator::{ChatMessage, CommandGenerator};
use crate::schema::commands_schema;

pub struct LlamaGenerator {
    client: reqwest::Client,
    base_url: String,
    n_ctx: usize,
    /// Server-side fallbacks merged below the per-request options.
    defaults: GenOptions,
}

impl LlamaGenerator {
    /// Connect to `llama-server`, probing the loaded context window when the
    /// config does not pin one.
    pub async fn connect(config: &LlamaConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::new();
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let n_ctx = match config.n_ctx {
            Some(n) => n,
            None => probe_n_ctx(&client, &base_url)
                .await
                .context("probing n_ctx from /props")?,
        };
        info!(n_ctx, base_url = %base_url, "connected to llama server");
        Ok(Self {
            client,
            base_url,
            n_ctx,
            defaults: GenOptions {
                temperature: Some(1.0),
                max_tokens: Some(1024),
                ..Default::default()
            },
        })
    }

    async fn post(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .with_context(|| format!("POST {url}"))?;
        Ok(resp.json().await?)
    }
}

async fn probe_n_ctx(client: &reqwest::Client, base_url: &str) -> anyhow::Result<usize> {
    let props: Value = client
        .get(format!("{base_url}/props"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    props["default_generation_settings"]["n_ctx"]
        .as_u64()
        .map(|n| n as usize)
        .context("/props carries no default_generation_settings.n_ctx")
}

/// Assemble the chat-completion request body.
///
/// `options` wins over `defaults`; the `stream` option is ignored — the
/// response is always read in one piece because the result must parse as a
/// whole JSON document anyway.
fn build_body(messages: &[ChatMessage], defaults: &GenOptions, options: &GenOptions) -> Value {
    let mut body = json!({
        "messages": messages,
        "response_format": {
            "type": "json_schema",
            "json_schema": { "name": "commands", "schema": commands_schema() },
        },
        "stream": false,
    });
    for layer in [defaults, options] {
        if let Value::Object(map) = serde_json::to_value(layer).unwrap_or_default() {
            for (key, value) in map {
                if key == "stream" {
                    continue;
                }
                body[key] = value;
            }
        }
    }
    body
}

#[async_trait]
impl CommandGenerator for LlamaGenerator {
    fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    async fn count_tokens(&self, messages: &[ChatMessage]) -> anyhow::Result<usize> {
        let templated = self
            .post("/apply-template", &json!({ "messages": messages }))
            .await?;
        let prompt = templated["prompt"]
            .as_str()
            .context("/apply-template returned no prompt")?;
        let tokenized = self
            .post(
                "/tokenize",
                &json!({ "content": prompt, "add_special": true }),
            )
            .await?;
        let tokens = tokenized["tokens"]
            .as_array()
            .context("/tokenize returned no tokens")?;
        Ok(tokens.len())
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenOptions,
    ) -> anyhow::Result<String> {
        let body = build_body(messages, &self.defaults, options);
        debug!(message_count = messages.len(), "requesting completion");
        let resp = self.post("/v1/chat/completions", &body).await?;
        let content = resp["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default();
        if content.is_empty() {
            bail!("completion returned no content");
        }
        Ok(content.to_string())
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
