// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Pre-execution gate for shell commands.
//!
//! Commands are parsed with tree-sitter-bash before they reach the shell so
//! that malformed input and interactive TUIs are refused with a synthetic
//! result instead of wedging the session.  Detection of interactive programs
//! is by command word; `env VAR=1 vim` slips through.

use tree_sitter::{Node, Parser, Tree};
use tree_sitter_bash::LANGUAGE as BASH;

use hermit_config::INTERACTIVE_COMMANDS;

/// Verdict of the gate.  `None` from [`gate`] means "send it to the shell".
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Gate {
    /// Whitespace or comments only — synthetic success, nothing to run.
    Empty,
    /// The command does not parse; carries the refusal message.
    SyntaxError(String),
    /// Interactive programs that expect a terminal; carries their names.
    Interactive(String),
}

pub(crate) fn gate(command: &str) -> Option<Gate> {
    let stripped: String = command
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n");
    if stripped.trim().is_empty() {
        return Some(Gate::Empty);
    }

    let Some(tree) = parse(command) else {
        return Some(Gate::SyntaxError("bash parser failed".into()));
    };
    if tree.root_node().has_error() {
        return Some(Gate::SyntaxError(describe_error(&tree)));
    }

    let mut interactive: Vec<&str> = Vec::new();
    for word in command_words(&tree, command) {
        if INTERACTIVE_COMMANDS.contains(&word) && !interactive.contains(&word) {
            interactive.push(word);
        }
    }
    if !interactive.is_empty() {
        return Some(Gate::Interactive(interactive.join(", ")));
    }
    None
}

fn parse(src: &str) -> Option<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&BASH.into())
        .expect("load bash grammar");
    parser.parse(src, None)
}

fn describe_error(tree: &Tree) -> String {
    fn find(node: Node) -> Option<Node> {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if let Some(found) = find(child) {
                return Some(found);
            }
        }
        None
    }
    match find(tree.root_node()) {
        Some(node) => {
            let pos = node.start_position();
            format!(
                "syntax error near line {}, column {}",
                pos.row + 1,
                pos.column + 1
            )
        }
        None => "syntax error".to_string(),
    }
}

/// First word of every command in the tree, pipelines and subshells included.
fn command_words<'a>(tree: &Tree, src: &'a str) -> Vec<&'a str> {
    fn collect<'a>(node: Node, src: &'a str, out: &mut Vec<&'a str>) {
        if node.kind() == "command_name" {
            if let Ok(text) = node.utf8_text(src.as_bytes()) {
                out.push(text);
            }
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            collect(child, src, out);
        }
    }
    let mut out = Vec::new();
    collect(tree.root_node(), src, &mut out);
    out
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Empty and comment-only input ──────────────────────────────────────────

    #[test]
    fn whitespace_only_is_empty() {
        assert_eq!(gate(""), Some(Gate::Empty));
        assert_eq!(gate("   \n\t"), Some(Gate::Empty));
    }

    #[test]
    fn comment_only_is_empty() {
        assert_eq!(gate("# just a note"), Some(Gate::Empty));
        assert_eq!(gate("# one\n  # two\n"), Some(Gate::Empty));
    }

    #[test]
    fn comment_followed_by_command_is_not_empty() {
        assert_eq!(gate("# explain\necho hi"), None);
    }

    // ── Well-formed commands pass ─────────────────────────────────────────────

    #[test]
    fn ordinary_commands_pass() {
        for cmd in [
            "echo hi",
            "ls -la /tmp",
            "cd /tmp && pwd",
            "for i in 1 2 3; do echo $i; done",
            "cat /etc/os-release | grep ID",
            "VAR=1 printenv VAR",
        ] {
            assert_eq!(gate(cmd), None, "refused {cmd:?}");
        }
    }

    // ── Syntax errors ─────────────────────────────────────────────────────────

    #[test]
    fn unmatched_pairs_are_syntax_errors() {
        for cmd in ["echo (", "echo \"unterminated", "if true; then echo hi"] {
            match gate(cmd) {
                Some(Gate::SyntaxError(msg)) => {
                    assert!(msg.contains("syntax error"), "message: {msg}");
                }
                other => panic!("{cmd:?} should be a syntax error, got {other:?}"),
            }
        }
    }

    // ── Interactive programs ──────────────────────────────────────────────────

    #[test]
    fn interactive_commands_are_refused_by_name() {
        match gate("vim foo.txt") {
            Some(Gate::Interactive(names)) => assert_eq!(names, "vim"),
            other => panic!("expected interactive refusal, got {other:?}"),
        }
    }

    #[test]
    fn interactive_inside_a_pipeline_is_caught() {
        match gate("cat foo | less") {
            Some(Gate::Interactive(names)) => assert_eq!(names, "less"),
            other => panic!("expected interactive refusal, got {other:?}"),
        }
    }

    #[test]
    fn repeated_interactive_names_are_reported_once() {
        match gate("vim a; vim b; nano c") {
            Some(Gate::Interactive(names)) => assert_eq!(names, "vim, nano"),
            other => panic!("expected interactive refusal, got {other:?}"),
        }
    }

    #[test]
    fn interactive_name_as_argument_is_not_refused() {
        // Only command words count; file arguments may mention the editors.
        assert_eq!(gate("echo vim"), None);
        assert_eq!(gate("cat less.txt"), None);
    }
}
