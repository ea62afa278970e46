// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Process-tree bookkeeping for the shell.
//!
//! The shell runs in its own session (`setsid`), but descendants can outlive
//! a command — the model may start background jobs, and timed-out commands
//! leave children behind.  Before every command, on timeout, and on teardown
//! the tree below the shell is cleared: SIGTERM, a grace period, then SIGKILL
//! for survivors.

use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Parent pid from `/proc/<pid>/stat`.  The command name field may contain
/// spaces and parentheses, so fields are taken after the last `)`.
fn ppid_of(pid: u32) -> Option<u32> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let rest = stat.rsplit_once(')')?.1;
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

/// All live descendants of `root`, found by scanning `/proc`.
pub(crate) fn descendants(root: u32) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        if let Some(ppid) = ppid_of(pid) {
            children.entry(ppid).or_default().push(pid);
        }
    }
    let mut found = Vec::new();
    let mut frontier = vec![root];
    while let Some(pid) = frontier.pop() {
        if let Some(kids) = children.get(&pid) {
            for &kid in kids {
                found.push(kid);
                frontier.push(kid);
            }
        }
    }
    found
}

pub(crate) fn alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

fn signal(pid: u32, sig: i32) {
    // ESRCH just means the process is already gone.
    unsafe {
        libc::kill(pid as i32, sig);
    }
}

/// Terminate `pids`, wait up to `grace` for them to exit, and report whether
/// all of them are gone.
async fn terminate(pids: &[u32], grace: Duration) -> bool {
    warn!("will terminate {} processes", pids.len());
    for &pid in pids {
        signal(pid, libc::SIGTERM);
    }
    let deadline = Instant::now() + grace;
    loop {
        let survivors = pids.iter().filter(|&&pid| alive(pid)).count();
        if survivors == 0 {
            debug!("terminated {} processes", pids.len());
            return true;
        }
        if Instant::now() >= deadline {
            error!("failed to terminate {survivors}/{} processes", pids.len());
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Clear a set of processes: SIGTERM with a grace period, then SIGKILL for
/// anything still alive.
pub(crate) async fn reap(pids: &[u32], grace: Duration) {
    if pids.is_empty() {
        return;
    }
    if terminate(pids, grace).await {
        return;
    }
    warn!("will kill surviving processes");
    for &pid in pids {
        if alive(pid) {
            signal(pid, libc::SIGKILL);
        }
    }
}

/// Clear everything below the shell.
pub(crate) async fn reap_children(shell_pid: u32, grace: Duration) {
    reap(&descendants(shell_pid), grace).await;
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
