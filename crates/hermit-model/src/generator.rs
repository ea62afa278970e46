// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use hermit_config::GenOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat turn as handed to the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A schema-constrained text generator with tokenizer access.
///
/// `generate` must return a string that parses as a JSON list of commands —
/// constrained decoding is the generator's job, validation is the caller's.
/// `count_tokens` must measure messages with the same template and tokenizer
/// the generator itself uses, or the context budget drifts.
#[async_trait]
pub trait CommandGenerator: Send + Sync {
    /// Context-window length in tokens.
    fn n_ctx(&self) -> usize;

    /// Token count of `messages` after chat-template rendering.
    async fn count_tokens(&self, messages: &[ChatMessage]) -> anyhow::Result<usize>;

    /// Produce the next model response for `messages`.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenOptions,
    ) -> anyhow::Result<String>;
}
