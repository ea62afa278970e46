// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::bail;
use async_trait::async_trait;

use hermit_config::GenOptions;

use crate::generator::{ChatMessage, CommandGenerator};

/// Pre-scripted generator for tests.  Each `generate` call pops the next
/// canned response; an exhausted script is an error, which doubles as a
/// natural way to end a test server loop.  Token counting is a deterministic
/// chars/4 estimate so budget tests can size their inputs exactly.
pub struct ScriptedGenerator {
    scripts: Mutex<VecDeque<String>>,
    n_ctx: usize,
    /// The messages seen by the most recent `generate` call.
    pub last_messages: Mutex<Option<Vec<ChatMessage>>>,
    /// The options seen by the most recent `generate` call.
    pub last_options: Mutex<Option<GenOptions>>,
}

impl ScriptedGenerator {
    pub fn new(n_ctx: usize, scripts: Vec<impl Into<String>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().map(Into::into).collect()),
            n_ctx,
            last_messages: Mutex::new(None),
            last_options: Mutex::new(None),
        }
    }

    /// Deterministic token estimate: one token per four characters of
    /// content, plus one per message for the template overhead.
    pub fn estimate(messages: &[ChatMessage]) -> usize {
        messages
            .iter()
            .map(|m| m.content.len().div_ceil(4) + 1)
            .sum()
    }
}

#[async_trait]
impl CommandGenerator for ScriptedGenerator {
    fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    async fn count_tokens(&self, messages: &[ChatMessage]) -> anyhow::Result<usize> {
        Ok(Self::estimate(messages))
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenOptions,
    ) -> anyhow::Result<String> {
        *self.last_messages.lock().unwrap() = Some(messages.to_vec());
        *self.last_options.lock().unwrap() = Some(options.clone());
        match self.scripts.lock().unwrap().pop_front() {
            Some(s) => Ok(s),
            None => bail!("scripted generator exhausted"),
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
