// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::{json, Value};

/// JSON schema for the generator's output: a list of tagged commands.
///
/// This is the contract handed to the constrained decoder.  It must stay in
/// lockstep with the protocol crate's `Command` union — the assistant turns in
/// the chat history replay exactly this shape back to the model.
pub fn commands_schema() -> Value {
    json!({
        "type": "array",
        "minItems": 1,
        "items": {
            "oneOf": [
                {
                    "type": "object",
                    "properties": {
                        "kind": { "const": "shell" },
                        "command": { "type": "string" },
                        "comment": { "type": "string" }
                    },
                    "required": ["kind", "command"],
                    "additionalProperties": false
                },
                {
                    "type": "object",
                    "properties": {
                        "kind": { "const": "file_read" },
                        "file": { "type": "string" },
                        "comment": { "type": "string" }
                    },
                    "required": ["kind", "file"],
                    "additionalProperties": false
                },
                {
                    "type": "object",
                    "properties": {
                        "kind": { "const": "file_write" },
                        "file": { "type": "string" },
                        "content": { "type": "string" },
                        "comment": { "type": "string" }
                    },
                    "required": ["kind", "file", "content"],
                    "additionalProperties": false
                }
            ]
        }
    })
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
