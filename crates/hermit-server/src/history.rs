// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The rolling conversation log and its token-budget compactor.
//!
//! Every executed command comes back as a result and becomes two chat turns:
//! the command's own JSON as the assistant turn (the exact shape the
//! constrained decoder emits, so history doubles as few-shot examples) and a
//! compact rendering of the outcome as the user turn.  Before each
//! generation the prompt is tokenized with the model's own tokenizer and the
//! oldest entries are dropped until it fits `n_ctx - TOKEN_BUFFER`.

use std::collections::VecDeque;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use hermit_config::{GenOptions, TOKEN_BUFFER};
use hermit_model::{ChatMessage, CommandGenerator};
use hermit_protocol::{Command, CommandResult, OutputLine};

use crate::error::ServerError;

const MUTABLE_SYSTEM_HINT: &str = "Write your system prompt to /app/system.md.";

/// Ordered result history plus the preamble state that frames it.
pub struct ChatLog {
    entries: VecDeque<CommandResult>,
    /// Immutable system prompt, read once at server startup.
    system: String,
    /// Mutable system prompt — whatever the sandbox's `/app/system.md` held
    /// at the last result.
    system_mutable: String,
    goal: String,
    default_goal: String,
    options: GenOptions,
}

impl ChatLog {
    pub fn new(system: String, default_goal: String) -> Self {
        Self {
            entries: VecDeque::new(),
            system,
            system_mutable: MUTABLE_SYSTEM_HINT.to_string(),
            goal: default_goal.clone(),
            default_goal,
            options: GenOptions::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn options(&self) -> &GenOptions {
        &self.options
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    /// Append one result and adopt its snapshot for the next generation.
    ///
    /// Missing snapshot fields fall back to the defaults, so deleting
    /// `/app/goal` returns the session to the operator's goal.
    pub fn append(&mut self, result: CommandResult) {
        let base = result.base();
        self.options = base.config.clone().unwrap_or_default();
        self.system_mutable = base
            .system
            .clone()
            .unwrap_or_else(|| MUTABLE_SYSTEM_HINT.to_string());
        self.goal = base.goal.clone().unwrap_or_else(|| self.default_goal.clone());
        self.entries.push_back(result);
    }

    pub fn append_all(&mut self, results: Vec<CommandResult>) {
        for result in results {
            self.append(result);
        }
    }

    /// Run one generation: fit the prompt, call the generator, parse.
    pub async fn get_commands(
        &mut self,
        generator: &dyn CommandGenerator,
    ) -> Result<Vec<Command>, ServerError> {
        let prompt = self.fit_prompt(generator).await?;
        let response = generator
            .generate(&prompt, &self.options)
            .await
            .map_err(|e| ServerError::Generation(e.to_string()))?;
        let commands: Vec<Command> = serde_json::from_str(&response).map_err(|e| {
            warn!(%response, "model output rejected");
            ServerError::Validation(e.to_string())
        })?;
        debug!("received {} commands", commands.len());
        Ok(commands)
    }

    /// Assemble `[system] + flatten(history)`, dropping the oldest entries
    /// until the prompt fits the generator's context window.
    pub async fn fit_prompt(
        &mut self,
        generator: &dyn CommandGenerator,
    ) -> Result<Vec<ChatMessage>, ServerError> {
        let n_ctx = generator.n_ctx();
        let budget = n_ctx.saturating_sub(TOKEN_BUFFER);
        let mut removed = 0usize;
        let mut initial = None;
        loop {
            let mut prompt = vec![self.system_message()];
            prompt.extend(self.flatten());
            let tokens = generator
                .count_tokens(&prompt)
                .await
                .map_err(|e| ServerError::Generation(e.to_string()))?;
            let initial = *initial.get_or_insert(tokens);
            if tokens <= budget {
                debug!(removed, "prompt fits ({tokens}/{budget} tokens)");
                return Ok(prompt);
            }
            match self.entries.pop_front() {
                Some(dropped) => {
                    removed += 1;
                    debug!("removed from history: {:?}", dropped.command());
                }
                // Happens when the context is small and a command produced
                // huge output; there is nothing left to drop.
                None => {
                    return Err(ServerError::ContextExhausted {
                        n_ctx,
                        initial,
                        now: tokens,
                    })
                }
            }
        }
    }

    fn system_message(&self) -> ChatMessage {
        ChatMessage::system(format!(
            "# Primary goal: {}\n\n{}\n\n=====\n\n{}",
            self.goal, self.system, self.system_mutable
        ))
    }

    fn flatten(&self) -> Vec<ChatMessage> {
        self.entries.iter().flat_map(result_to_turns).collect()
    }
}

/// One result → one assistant turn (the command JSON) + one user turn (the
/// compact outcome).
fn result_to_turns(result: &CommandResult) -> Vec<ChatMessage> {
    let assistant = serde_json::to_string(&result.command()).unwrap_or_default();
    let user = serde_json::to_string_pretty(&simplify(result)).unwrap_or_default();
    vec![
        ChatMessage::assistant(assistant),
        ChatMessage::user(user),
    ]
}

/// The model-facing view of a result: timestamps discarded, output joined,
/// empty fields (and a zero exit code) omitted.
fn simplify(result: &CommandResult) -> Value {
    let mut fields = Map::new();
    match result {
        CommandResult::Shell(r) => {
            fields.insert("prompt".into(), json!(r.prompt.prompt));
            fields.insert("command".into(), json!(r.command.command));
            insert_text(&mut fields, "stdout", join_output(&r.stdout));
            insert_text(&mut fields, "stderr", join_output(&r.stderr));
            if r.exit_code != 0 {
                fields.insert("exit_code".into(), json!(r.exit_code));
            }
        }
        CommandResult::FileRead(r) => {
            fields.insert("file".into(), json!(r.file));
            insert_opt(&mut fields, "content", &r.content);
            insert_opt(&mut fields, "error", &r.error);
        }
        CommandResult::FileWrite(r) => {
            fields.insert("file".into(), json!(r.file));
            // Echo the written content so the model sees what landed on disk.
            insert_text(&mut fields, "content", r.command.content.clone());
            if let Some(written) = r.written.filter(|&n| n > 0) {
                fields.insert("written".into(), json!(written));
            }
            insert_opt(&mut fields, "error", &r.error);
        }
    }
    Value::Object(fields)
}

fn insert_text(fields: &mut Map<String, Value>, key: &str, text: String) {
    if !text.is_empty() {
        fields.insert(key.into(), json!(text));
    }
}

fn insert_opt(fields: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(text) = value {
        insert_text(fields, key, text.clone());
    }
}

/// Concatenate captured lines in chronological order.
fn join_output(lines: &[OutputLine]) -> String {
    let mut ordered: Vec<&OutputLine> = lines.iter().collect();
    ordered.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    ordered.iter().map(|l| l.1.as_str()).collect()
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
