// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Executor failures.
///
/// Refused, timed-out, and parse-failed commands are *results*, not errors —
/// they flow back to the model through the protocol.  Only conditions the
/// executor cannot repair surface here.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("shell I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("fatal sandbox failure: {0}")]
    Fatal(String),
}
