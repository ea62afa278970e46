// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use hermit_protocol::Command;

const HELLO_SCRIPT: &str = "#!/bin/sh\necho \"hello from the sandbox\" > /app/output.txt\n";

/// Commands injected through the normal dispatch path after the first-ever
/// handshake, so the history starts non-empty and the model sees concrete
/// examples of every command shape and its result format.
pub fn initial_commands() -> Vec<Command> {
    vec![
        Command::shell("ls -la").with_comment("List files in the current directory"),
        Command::file_write("/app/hello.sh", HELLO_SCRIPT).with_comment("Write to a file"),
        Command::shell("sh /app/hello.sh").with_comment("Run the script"),
        Command::file_read("/app/output.txt").with_comment("Read the output file"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_covers_every_command_kind() {
        let seed = initial_commands();
        assert!(seed
            .iter()
            .any(|c| matches!(c, Command::Shell(_))));
        assert!(seed
            .iter()
            .any(|c| matches!(c, Command::FileRead(_))));
        assert!(seed
            .iter()
            .any(|c| matches!(c, Command::FileWrite(_))));
    }

    #[test]
    fn seed_commands_all_carry_comments() {
        for command in initial_commands() {
            assert!(command.comment().is_some());
        }
    }
}
