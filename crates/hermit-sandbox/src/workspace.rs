// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The operator-visible sandbox files.
//!
//! Every result carries a snapshot of `/app/system.md`, `/app/goal`, and
//! `/app/config.json`, re-read at the moment the result is produced.  The
//! model writes these files with its own commands — this is how it
//! reconfigures its next generation.

use std::fs;
use std::path::Path;

use tracing::debug;

use hermit_config::{GenOptions, SandboxPaths};
use hermit_protocol::Snapshot;

pub(crate) fn snapshot(paths: &SandboxPaths) -> Snapshot {
    Snapshot {
        system: read_text(&paths.system),
        goal: read_text(&paths.goal).map(|s| s.trim().to_string()),
        config: read_config(&paths.config),
    }
}

fn read_text(path: &Path) -> Option<String> {
    if path.is_dir() {
        debug!(path = %path.display(), "sandbox file is a directory");
        return None;
    }
    match fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) => {
            debug!(path = %path.display(), "sandbox file unreadable: {e}");
            None
        }
    }
}

fn read_config(path: &Path) -> Option<GenOptions> {
    let raw = read_text(path)?;
    match serde_json::from_str(&raw) {
        Ok(config) => Some(config),
        Err(e) => {
            debug!("invalid generation config: {e}");
            None
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
