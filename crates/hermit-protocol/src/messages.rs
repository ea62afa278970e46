// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Message taxonomy: commands, results, control messages, and the parsed
//! shell prompt.
//!
//! The `kind` tag is the published protocol discriminator.  Both peers accept
//! any member of the envelope unions (`ServerMessage`, `ClientMessage`) and
//! match on the variant they expect; a `Fin` is an in-band close request.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::{Deserialize, Serialize};

use hermit_config::GenOptions;

use crate::error::ProtocolError;

// ─── Commands ─────────────────────────────────────────────────────────────────

/// One bash source line (or several) to run in the persistent shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellCommand {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Read a file from the sandbox, UTF-8 decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReadCommand {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Write a file into the sandbox, UTF-8 encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileWriteCommand {
    pub file: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// One unit of work the model wants performed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    Shell(ShellCommand),
    FileRead(FileReadCommand),
    FileWrite(FileWriteCommand),
}

impl Command {
    pub fn shell(command: impl Into<String>) -> Self {
        Self::Shell(ShellCommand {
            command: command.into(),
            comment: None,
        })
    }

    pub fn file_read(file: impl Into<String>) -> Self {
        Self::FileRead(FileReadCommand {
            file: file.into(),
            comment: None,
        })
    }

    pub fn file_write(file: impl Into<String>, content: impl Into<String>) -> Self {
        Self::FileWrite(FileWriteCommand {
            file: file.into(),
            content: content.into(),
            comment: None,
        })
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        let slot = match &mut self {
            Self::Shell(c) => &mut c.comment,
            Self::FileRead(c) => &mut c.comment,
            Self::FileWrite(c) => &mut c.comment,
        };
        *slot = Some(comment.into());
        self
    }

    pub fn comment(&self) -> Option<&str> {
        match self {
            Self::Shell(c) => c.comment.as_deref(),
            Self::FileRead(c) => c.comment.as_deref(),
            Self::FileWrite(c) => c.comment.as_deref(),
        }
    }
}

// ─── Output and prompt ────────────────────────────────────────────────────────

/// One captured output line: seconds since the epoch at arrival, and the line
/// text including its trailing newline.  stdout and stderr interleave by
/// sorting on the timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputLine(pub f64, pub String);

impl OutputLine {
    /// Stamp `text` with the current wall clock.
    pub fn now(text: impl Into<String>) -> Self {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self(ts, text.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Root,
    User,
}

/// Parsed form of the shell's expanded PS1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub prompt: String,
    pub exit_code: i32,
    pub user: String,
    pub host: String,
    pub cwd: String,
    pub usertype: UserType,
}

impl Prompt {
    /// Parse an expanded prompt of the form `<exit> <user>@<host>:<cwd> <$|#> `.
    ///
    /// The operator-configured PS1 template must render to exactly this shape;
    /// anything else means the sandbox cannot recover exit codes and the
    /// executor treats the mismatch as fatal.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(
                r"^(?P<exit_code>[0-9]+) (?P<user>.+)@(?P<host>.+):(?P<cwd>.+) (?P<usertype>[$#]) $",
            )
            .expect("prompt regex is valid")
        });
        let caps = re.captures(raw).ok_or_else(|| {
            ProtocolError::Validation(format!("prompt does not match expected format: {raw:?}"))
        })?;
        let exit_code = caps["exit_code"]
            .parse()
            .map_err(|e| ProtocolError::Validation(format!("prompt exit code: {e}")))?;
        let usertype = match &caps["usertype"] {
            "#" => UserType::Root,
            _ => UserType::User,
        };
        Ok(Self {
            prompt: raw.to_string(),
            exit_code,
            user: caps["user"].to_string(),
            host: caps["host"].to_string(),
            cwd: caps["cwd"].to_string(),
            usertype,
        })
    }
}

// ─── Results ──────────────────────────────────────────────────────────────────

/// Operator-visible configuration read back from the sandbox at the moment a
/// result is produced.  This is the channel through which commands executed
/// inside the sandbox feed back into generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub config: Option<GenOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellResult {
    pub command: ShellCommand,
    pub stdout: Vec<OutputLine>,
    pub stderr: Vec<OutputLine>,
    pub exit_code: i32,
    pub prompt: Prompt,
    #[serde(flatten)]
    pub base: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReadResult {
    pub command: FileReadCommand,
    pub file: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub base: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileWriteResult {
    pub command: FileWriteCommand,
    pub file: String,
    #[serde(default)]
    pub written: Option<usize>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub base: Snapshot,
}

/// One structured outcome, echoing the command that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandResult {
    Shell(ShellResult),
    FileRead(FileReadResult),
    FileWrite(FileWriteResult),
}

impl CommandResult {
    /// The command this result echoes.
    pub fn command(&self) -> Command {
        match self {
            Self::Shell(r) => Command::Shell(r.command.clone()),
            Self::FileRead(r) => Command::FileRead(r.command.clone()),
            Self::FileWrite(r) => Command::FileWrite(r.command.clone()),
        }
    }

    pub fn base(&self) -> &Snapshot {
        match self {
            Self::Shell(r) => &r.base,
            Self::FileRead(r) => &r.base,
            Self::FileWrite(r) => &r.base,
        }
    }

    /// The expanded prompt string, when the result carries one.
    pub fn prompt(&self) -> Option<&str> {
        match self {
            Self::Shell(r) => Some(r.prompt.prompt.as_str()),
            _ => None,
        }
    }
}

// ─── Control messages and envelopes ───────────────────────────────────────────

/// Connection lifecycle messages.  They carry no data; the `kind` tag is the
/// whole payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlMessage {
    Syn,
    Ack,
    Fin,
    Nop,
}

/// Anything the client may receive from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Control(ControlMessage),
    Command(Command),
}

/// Anything the server may receive from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Control(ControlMessage),
    Result(Box<CommandResult>),
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
