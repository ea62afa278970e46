// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The model's output did not parse as a command list.  The dispatch
    /// loop skips the generation and tries again.
    #[error("model output failed validation: {0}")]
    Validation(String),

    /// The generator itself failed (endpoint down, HTTP error).
    #[error("generation failed: {0}")]
    Generation(String),

    /// Even an empty history does not fit the context window.  The operator
    /// must shrink the system prompt or raise `n_ctx`.
    #[error("no commands fit in {n_ctx} tokens (initial: {initial}, now: {now})")]
    ContextExhausted {
        n_ctx: usize,
        initial: usize,
        now: usize,
    },

    /// The listener itself failed; there is no connection to recover.
    #[error("listener failed: {0}")]
    Listener(String),
}
