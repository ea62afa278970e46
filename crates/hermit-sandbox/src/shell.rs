// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The persistent shell and its command dispatcher.
//!
//! One `/bin/bash` lives for the whole client session, so working directory,
//! exported variables, and shell options persist across commands.  Bash is
//! started without `-i` and therefore has no PS1; exit codes and prompt state
//! are recovered through a FIFO probe written after every command:
//!
//! ```text
//! (R="$?"; PS1="…"; (exit "$R"); echo -n "${PS1@P}" >> <fifo>; exit "$R")
//! ```
//!
//! The subshell captures the user command's `$?`, restores it so the `@P`
//! expansion sees the right exit code, and writes the expanded prompt into
//! the FIFO without touching the outer shell's state.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command as ProcessCommand};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use hermit_config::{ClientConfig, SandboxPaths, KILL_TIMEOUT};
use hermit_protocol::{
    Command, CommandResult, FileReadCommand, FileReadResult, FileWriteCommand, FileWriteResult,
    OutputLine, Prompt, ShellCommand, ShellResult,
};

use crate::error::SandboxError;
use crate::fifo::TempFifo;
use crate::lex::{self, Gate};
use crate::{proc, workspace};

/// The FIFO write can land before the pipe readers have flushed the last
/// output lines; give them a scheduler tick before draining.
const DRAIN_SETTLE: Duration = Duration::from_millis(50);

/// The sandbox executor.
pub struct Shell {
    proc: ShellProc,
    ps1: String,
    exit_timeout: Duration,
    paths: SandboxPaths,
}

/// One incarnation of the bash process and its stream plumbing.
struct ShellProc {
    child: Child,
    stdin: ChildStdin,
    stdout_rx: UnboundedReceiver<OutputLine>,
    stderr_rx: UnboundedReceiver<OutputLine>,
    readers: Vec<JoinHandle<()>>,
}

async fn drain_lines<R>(reader: R, tx: UnboundedSender<OutputLine>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(OutputLine::now(format!("{line}\n"))).is_err() {
            break;
        }
    }
}

/// Installed into every shell incarnation before the first command.
///
/// `exit` at the top level of the outer shell must not kill it — the model
/// issues `exit` freely and the session has to survive with `$?` set and the
/// working directory intact.  Shadowing the builtin with a function keeps
/// subshell semantics: `(exit 7)` still yields 7, and the prompt probe's own
/// `exit "$R"` lines behave identically because `return` ends the function
/// with the same status the builtin would have produced.
const EXIT_SHIM: &str = "exit() { return \"${1:-$?}\"; }";

async fn spawn_shell() -> Result<ShellProc, SandboxError> {
    info!("opening shell");
    let mut cmd = ProcessCommand::new("/bin/bash");
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own session: descendants can be found and killed as a unit, and the
    // shell cannot reach the client's controlling terminal.
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }
    let mut child = cmd.spawn()?;
    let missing =
        || SandboxError::Fatal("shell streams are not available".into());
    let mut stdin = child.stdin.take().ok_or_else(missing)?;
    let stdout = child.stdout.take().ok_or_else(missing)?;
    let stderr = child.stderr.take().ok_or_else(missing)?;

    stdin.write_all(EXIT_SHIM.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;

    let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
    let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
    let readers = vec![
        tokio::spawn(drain_lines(stdout, stdout_tx)),
        tokio::spawn(drain_lines(stderr, stderr_tx)),
    ];
    info!(pid = child.id(), "shell started");
    Ok(ShellProc {
        child,
        stdin,
        stdout_rx,
        stderr_rx,
        readers,
    })
}

impl Shell {
    pub async fn from_config(config: &ClientConfig) -> Result<Self, SandboxError> {
        Self::new(&config.ps1, config.exit_timeout, config.paths.clone()).await
    }

    pub async fn new(
        ps1: &str,
        exit_timeout: Duration,
        paths: SandboxPaths,
    ) -> Result<Self, SandboxError> {
        Ok(Self {
            proc: spawn_shell().await?,
            ps1: ps1.to_string(),
            exit_timeout,
            paths,
        })
    }

    /// Execute one command and return its structured result.
    ///
    /// Synthetic failures (refusals, timeouts) come back as ordinary results;
    /// an `Err` here means the sandbox itself is broken.
    pub async fn execute(&mut self, command: Command) -> Result<CommandResult, SandboxError> {
        match command {
            Command::Shell(c) => Ok(CommandResult::Shell(self.execute_shell(c).await?)),
            Command::FileRead(c) => Ok(CommandResult::FileRead(self.execute_file_read(c).await)),
            Command::FileWrite(c) => Ok(CommandResult::FileWrite(self.execute_file_write(c).await)),
        }
    }

    /// Tear the shell down: children first, then the shell, then the readers.
    pub async fn close(&mut self) -> Result<(), SandboxError> {
        warn!("closing shell");
        if self.proc.child.try_wait()?.is_none() {
            if let Some(pid) = self.proc.child.id() {
                proc::reap_children(pid, KILL_TIMEOUT).await;
                proc::reap(&[pid], KILL_TIMEOUT).await;
            }
        }
        self.wait_shell().await;
        warn!("shell closed");
        Ok(())
    }

    // ── Shell commands ────────────────────────────────────────────────────────

    async fn execute_shell(&mut self, command: ShellCommand) -> Result<ShellResult, SandboxError> {
        if let Some(gate) = lex::gate(&command.command) {
            let (exit_code, message) = match gate {
                Gate::Empty => (0, None),
                Gate::SyntaxError(msg) => {
                    error!(command = %command.command, "command refused: {msg}");
                    (2, Some(msg))
                }
                Gate::Interactive(names) => {
                    let msg = format!("Not a terminal: {names}");
                    error!(command = %command.command, "command refused: {msg}");
                    (-3, Some(msg))
                }
            };
            return self.synthetic(command, exit_code, message).await;
        }

        debug!(command = %command.command, "running command");
        self.ensure_shell().await?;
        let pid = self.pid()?;

        let stale = proc::descendants(pid);
        if !stale.is_empty() {
            // Background jobs from an earlier command; they do not survive.
            error!("shell still has {} old children", stale.len());
            proc::reap(&stale, KILL_TIMEOUT).await;
        }

        self.put_stdin(&command.command).await?;
        let start = Instant::now();
        match self.probe().await? {
            Some(raw) => {
                let prompt = parse_prompt(&raw)?;
                debug!(
                    exit_code = prompt.exit_code,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "command finished"
                );
                let (stdout, stderr) = self.drain().await;
                Ok(ShellResult {
                    command,
                    stdout,
                    stderr,
                    exit_code: prompt.exit_code,
                    prompt,
                    base: workspace::snapshot(&self.paths),
                })
            }
            None => {
                error!("shell did not finish in time");
                proc::reap_children(pid, KILL_TIMEOUT).await;
                self.synthetic(command, -2, Some("Command timed out".into()))
                    .await
            }
        }
    }

    /// Build a result that never ran (or never finished) in the shell.
    ///
    /// The prompt is still probed live so the result reflects the shell's
    /// actual state; output accumulated since the last drain is attached.
    async fn synthetic(
        &mut self,
        command: ShellCommand,
        exit_code: i32,
        message: Option<String>,
    ) -> Result<ShellResult, SandboxError> {
        debug!(exit_code, command = %command.command, "synthetic result");
        let prompt = self.current_prompt().await?;
        let (stdout, mut stderr) = self.drain().await;
        if let Some(msg) = message {
            stderr.push(OutputLine::now(format!("{msg}\n")));
        }
        Ok(ShellResult {
            command,
            stdout,
            stderr,
            exit_code,
            prompt,
            base: workspace::snapshot(&self.paths),
        })
    }

    // ── Prompt probe ──────────────────────────────────────────────────────────

    /// Ask the shell for its expanded prompt.  `Ok(None)` is a probe timeout.
    async fn probe(&mut self) -> Result<Option<String>, SandboxError> {
        let fifo = TempFifo::create()?;
        let mut rx = fifo.open_receiver()?;
        // The template goes inside a double-quoted assignment, so every
        // double-quote special must be escaped — otherwise the `$?` in it
        // expands at assignment time and every prompt would report exit 0.
        let ps1 = self
            .ps1
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('$', "\\$")
            .replace('`', "\\`");
        let line = format!(
            r#"(R="$?"; PS1="{ps1}"; (exit "$R"); echo -n "${{PS1@P}}" >> {}; exit "$R")"#,
            fifo.path().display()
        );
        // A dead shell surfaces here as a broken pipe; let the recovery path
        // respawn it instead of treating the write as fatal.
        if let Err(e) = self.put_stdin(&line).await {
            warn!("probe write failed: {e}");
            return Ok(None);
        }

        debug!("waiting {:?} for the shell to finish", self.exit_timeout);
        let read_to_eof = async {
            let mut out = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                match rx.read(&mut buf).await {
                    Ok(0) => break Ok::<_, std::io::Error>(out),
                    Ok(n) => out.extend_from_slice(&buf[..n]),
                    Err(e) => break Err(e),
                }
            }
        };
        match timeout(self.exit_timeout, read_to_eof).await {
            Ok(Ok(bytes)) => {
                let raw = String::from_utf8_lossy(&bytes).into_owned();
                debug!(prompt = %raw, "got prompt");
                Ok(Some(raw))
            }
            Ok(Err(e)) => Err(SandboxError::Io(e)),
            Err(_) => Ok(None),
        }
    }

    /// Probe the prompt of an idle shell, recovering once via respawn if the
    /// probe itself times out.
    async fn current_prompt(&mut self) -> Result<Prompt, SandboxError> {
        self.ensure_shell().await?;
        if let Some(raw) = self.probe().await? {
            return parse_prompt(&raw);
        }
        warn!("prompt probe timed out; respawning shell");
        if let Some(pid) = self.proc.child.id() {
            proc::reap_children(pid, KILL_TIMEOUT).await;
        }
        self.respawn().await?;
        match self.probe().await? {
            Some(raw) => parse_prompt(&raw),
            None => Err(SandboxError::Fatal(
                "shell produced no prompt after respawn".into(),
            )),
        }
    }

    // ── File commands ─────────────────────────────────────────────────────────

    async fn execute_file_read(&self, command: FileReadCommand) -> FileReadResult {
        debug!(file = %command.file, "reading file");
        let file = command.file.clone();
        let outcome = read_file(Path::new(&file)).await;
        if let Err(e) = &outcome {
            debug!("failed to read {file}: {e}");
        }
        let (content, error) = split(outcome);
        FileReadResult {
            command,
            file,
            content,
            error,
            base: workspace::snapshot(&self.paths),
        }
    }

    async fn execute_file_write(&self, command: FileWriteCommand) -> FileWriteResult {
        debug!(file = %command.file, "writing file");
        let file = command.file.clone();
        let outcome = write_file(Path::new(&file), &command.content).await;
        if let Err(e) = &outcome {
            debug!("failed to write {file}: {e}");
        }
        let (written, error) = split(outcome);
        FileWriteResult {
            command,
            file,
            written,
            error,
            base: workspace::snapshot(&self.paths),
        }
    }

    // ── Shell lifecycle ───────────────────────────────────────────────────────

    /// Make sure a live shell is attached.  Returns `false` when the previous
    /// incarnation had died and a fresh one was spawned.
    async fn ensure_shell(&mut self) -> Result<bool, SandboxError> {
        if self.proc.child.try_wait()?.is_none() {
            return Ok(true);
        }
        error!("shell has exited");
        self.wait_shell().await;
        self.proc = spawn_shell().await?;
        Ok(false)
    }

    async fn respawn(&mut self) -> Result<(), SandboxError> {
        self.close().await?;
        self.proc = spawn_shell().await?;
        Ok(())
    }

    /// Wait for the shell to finish and the readers to drain out.
    async fn wait_shell(&mut self) {
        let _ = self.proc.child.wait().await;
        for reader in self.proc.readers.drain(..) {
            let _ = reader.await;
        }
        let (stdout, stderr) = self.drain().await;
        if !stdout.is_empty() {
            warn!("leftover stdout: {stdout:?}");
        }
        if !stderr.is_empty() {
            warn!("leftover stderr: {stderr:?}");
        }
        info!("shell finished");
    }

    fn pid(&self) -> Result<u32, SandboxError> {
        self.proc
            .child
            .id()
            .ok_or_else(|| SandboxError::Fatal("shell has no pid".into()))
    }

    async fn put_stdin(&mut self, line: &str) -> Result<(), SandboxError> {
        self.proc.stdin.write_all(line.as_bytes()).await?;
        self.proc.stdin.write_all(b"\n").await?;
        self.proc.stdin.flush().await?;
        Ok(())
    }

    /// Take everything captured since the last drain, in arrival order.
    async fn drain(&mut self) -> (Vec<OutputLine>, Vec<OutputLine>) {
        tokio::time::sleep(DRAIN_SETTLE).await;
        let mut stdout = Vec::new();
        while let Ok(line) = self.proc.stdout_rx.try_recv() {
            stdout.push(line);
        }
        let mut stderr = Vec::new();
        while let Ok(line) = self.proc.stderr_rx.try_recv() {
            stderr.push(line);
        }
        (stdout, stderr)
    }
}

fn parse_prompt(raw: &str) -> Result<Prompt, SandboxError> {
    Prompt::parse(raw).map_err(|e| SandboxError::Fatal(e.to_string()))
}

async fn read_file(path: &Path) -> Result<String, String> {
    if path.is_dir() {
        return Err("Is a directory".into());
    }
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err("File not found".into()),
        Err(e) => Err(e.to_string()),
    }
}

async fn write_file(path: &Path, content: &str) -> Result<usize, String> {
    if path.is_dir() {
        return Err("Is a directory".into());
    }
    match tokio::fs::write(path, content.as_bytes()).await {
        Ok(()) => Ok(content.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err("File not found".into()),
        Err(e) => Err(e.to_string()),
    }
}

fn split<T>(outcome: Result<T, String>) -> (Option<T>, Option<String>) {
    match outcome {
        Ok(value) => (Some(value), None),
        Err(error) => (None, Some(error)),
    }
}
