// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Operator-facing rendering of the session.
//!
//! In streaming mode the prompt and command are echoed before the result
//! arrives, so the operator watches the session like a terminal.  Streaming
//! is disabled when the model response itself streams to the log or when
//! debug logging would interleave with it.

use std::io::Write;

use crossterm::style::Stylize;

use hermit_protocol::{Command, CommandResult, OutputLine};

pub struct Terminal {
    stream: bool,
}

impl Terminal {
    pub fn new(stream_response: bool) -> Self {
        let stream = !stream_response && !tracing::enabled!(tracing::Level::DEBUG);
        Self { stream }
    }

    pub fn stream(&self) -> bool {
        self.stream
    }

    /// Echo the command being dispatched (streaming mode: the prompt is
    /// already on screen without a newline).
    pub fn render_command(&self, command: &Command) {
        println!("{}", describe(command).yellow());
    }

    /// Render one result: prompt + command (when not streaming), the batch
    /// comment, interleaved output, and the next prompt (streaming).
    pub fn render(&self, prev_prompt: Option<&str>, result: &CommandResult, comment: Option<&str>) {
        if !self.stream {
            let prompt = prev_prompt.unwrap_or_default();
            println!("{}{}", prompt.white(), describe(&result.command()).yellow());
        }
        let note = comment
            .map(str::to_string)
            .or_else(|| result.command().comment().map(str::to_string));
        if let Some(note) = note {
            println!("{}", note.cyan());
        }
        self.render_output(result);
        if self.stream {
            if let Some(prompt) = result.prompt() {
                print!("{}", prompt.white());
                let _ = std::io::stdout().flush();
            }
        }
    }

    fn render_output(&self, result: &CommandResult) {
        match result {
            CommandResult::Shell(r) => {
                let mut lines: Vec<(&OutputLine, bool)> = r
                    .stdout
                    .iter()
                    .map(|l| (l, false))
                    .chain(r.stderr.iter().map(|l| (l, true)))
                    .collect();
                lines.sort_by(|a, b| {
                    a.0 .0
                        .partial_cmp(&b.0 .0)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                for (line, is_err) in lines {
                    let text = line.1.trim_end_matches('\n');
                    if is_err {
                        println!("{}", text.red());
                    } else {
                        println!("{}", text.grey());
                    }
                }
                if r.exit_code != 0 {
                    println!("{}", format!("Exited with code {}", r.exit_code).red());
                }
            }
            CommandResult::FileRead(r) => {
                if let Some(content) = &r.content {
                    for line in content.lines() {
                        println!("{}", line.grey());
                    }
                }
                if let Some(error) = &r.error {
                    println!("{}", error.as_str().red());
                }
            }
            CommandResult::FileWrite(r) => {
                if let Some(written) = r.written {
                    println!("{}", format!("wrote {written} bytes").grey());
                }
                if let Some(error) = &r.error {
                    println!("{}", error.as_str().red());
                }
            }
        }
    }
}

fn describe(command: &Command) -> String {
    match command {
        Command::Shell(c) => c.command.clone(),
        Command::FileRead(c) => format!("read {}", c.file),
        Command::FileWrite(c) => format!("write {} ({} bytes)", c.file, c.content.len()),
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use hermit_protocol::{Prompt, ShellCommand, ShellResult, Snapshot};

    fn result() -> CommandResult {
        CommandResult::Shell(ShellResult {
            command: ShellCommand {
                command: "echo hi".into(),
                comment: Some("greet".into()),
            },
            stdout: vec![OutputLine(1.0, "hi\n".into())],
            stderr: vec![OutputLine(0.5, "warn\n".into())],
            exit_code: 1,
            prompt: Prompt::parse("1 a@b:/ $ ").unwrap(),
            base: Snapshot::default(),
        })
    }

    #[test]
    fn describe_summarizes_each_command_kind() {
        assert_eq!(describe(&Command::shell("pwd")), "pwd");
        assert_eq!(describe(&Command::file_read("/tmp/x")), "read /tmp/x");
        assert_eq!(
            describe(&Command::file_write("/tmp/x", "abcde")),
            "write /tmp/x (5 bytes)"
        );
    }

    #[test]
    fn render_does_not_panic_in_either_mode() {
        for terminal in [Terminal { stream: true }, Terminal { stream: false }] {
            terminal.render(Some("0 a@b:/ $ "), &result(), Some("seed (1/3)"));
            terminal.render(None, &result(), None);
            terminal.render_command(&Command::shell("ls"));
        }
    }
}
