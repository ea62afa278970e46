// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! One-shot named pipes for the prompt probe.
//!
//! The shell writes the expanded prompt into the FIFO; the executor opens the
//! read end non-blocking *first*, so the shell's append never blocks and the
//! read end stays unreadable until the prompt actually arrives.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::net::unix::pipe;
use tracing::debug;

/// A FIFO inside its own temporary directory; both disappear on drop.
pub(crate) struct TempFifo {
    _dir: TempDir,
    path: PathBuf,
}

impl TempFifo {
    pub(crate) fn create() -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("prompt");
        let cpath = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        if unsafe { libc::mkfifo(cpath.as_ptr(), 0o600) } != 0 {
            return Err(io::Error::last_os_error());
        }
        debug!(path = %path.display(), "created FIFO");
        Ok(Self { _dir: dir, path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Open the read end without blocking on a writer.
    pub(crate) fn open_receiver(&self) -> io::Result<pipe::Receiver> {
        pipe::OpenOptions::new().open_receiver(&self.path)
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
