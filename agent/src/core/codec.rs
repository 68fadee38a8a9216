//! Decoding of raw responder output into [`Action`] values.
//!
//! Malformed output is a protocol event, not an error: anything that does not
//! decode into a recognized variant with all required fields becomes
//! [`Action::Unknown`] carrying the raw text. No repair is attempted.

use serde_json::Value;
use tracing::debug;

use crate::core::types::Action;

/// Decode a responder payload. Never fails.
///
/// The `unknown` discriminant is not an action a responder can request, so a
/// payload naming it also decodes to `Unknown` holding the whole payload.
pub fn decode(raw: &str) -> Action {
    let value: Value = match serde_json::from_str(raw.trim()) {
        Ok(value) => value,
        Err(err) => {
            debug!(err = %err, "responder output is not json");
            return unknown(raw);
        }
    };
    if !value.is_object() {
        debug!("responder output is not a json object");
        return unknown(raw);
    }
    match serde_json::from_value::<Action>(value) {
        Ok(Action::Unknown { .. }) => {
            debug!("responder output names the unknown discriminant");
            unknown(raw)
        }
        Ok(action) => action,
        Err(err) => {
            debug!(err = %err, "responder output does not match any action");
            unknown(raw)
        }
    }
}

/// Canonical wire form for an action.
pub fn encode(action: &Action) -> String {
    // Every variant holds only strings, so serialization cannot fail.
    serde_json::to_string(action).unwrap_or_else(|_| String::from("{\"action\":\"unknown\"}"))
}

fn unknown(raw: &str) -> Action {
    Action::Unknown {
        raw_text: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<Action> {
        vec![
            Action::Finish {
                message: "done".to_string(),
            },
            Action::RunShellCommand {
                command: "cargo test".to_string(),
            },
            Action::ReadFile {
                path: "src/lib.rs".to_string(),
            },
            Action::WriteFile {
                path: "x.txt".to_string(),
                content: "hi\n".to_string(),
            },
            Action::ListDirectory {
                path: "src".to_string(),
            },
            Action::GlobFiles {
                pattern: "*.rs".to_string(),
                path: ".".to_string(),
            },
            Action::GrepContent {
                pattern: "needle".to_string(),
                path: "src".to_string(),
                file_type: Some("rs".to_string()),
            },
            Action::Unknown {
                raw_text: "I think we should refactor".to_string(),
            },
        ]
    }

    #[test]
    fn requestable_variants_survive_encode_decode() {
        for action in all_variants() {
            if let Action::Unknown { .. } = action {
                continue;
            }
            assert_eq!(decode(&encode(&action)), action, "{}", action.name());
        }
    }

    #[test]
    fn responder_cannot_choose_the_unknown_text() {
        let raw = r#"{"action":"unknown","raw_text":"x"}"#;
        assert_eq!(
            decode(raw),
            Action::Unknown {
                raw_text: raw.to_string()
            }
        );

        let original = Action::Unknown {
            raw_text: "I think we should refactor".to_string(),
        };
        let wire = encode(&original);
        assert_eq!(decode(&wire), Action::Unknown { raw_text: wire });
    }

    #[test]
    fn decodes_write_file_with_wire_field_names() {
        let action = decode(r#"{"action":"write_file","file_path":"x.txt","content":"hi"}"#);
        assert_eq!(
            action,
            Action::WriteFile {
                path: "x.txt".to_string(),
                content: "hi".to_string(),
            }
        );
    }

    #[test]
    fn free_text_is_unknown() {
        let raw = "Sure! First I will look at the repository.";
        assert_eq!(
            decode(raw),
            Action::Unknown {
                raw_text: raw.to_string()
            }
        );
    }

    #[test]
    fn missing_required_field_is_unknown_with_raw_payload() {
        let raw = r#"{"action":"run_shell_command"}"#;
        assert_eq!(
            decode(raw),
            Action::Unknown {
                raw_text: raw.to_string()
            }
        );
    }

    #[test]
    fn unrecognized_or_absent_discriminant_is_unknown() {
        for raw in [
            r#"{"action":"delete_repository","path":"/"}"#,
            r#"{"command":"ls"}"#,
            r#"["finish"]"#,
            "",
        ] {
            assert!(
                matches!(decode(raw), Action::Unknown { ref raw_text } if raw_text == raw),
                "{raw}"
            );
        }
    }

    #[test]
    fn search_tools_default_path_to_current_dir() {
        let action = decode(r#"{"action":"grep_content","pattern":"fn main"}"#);
        assert_eq!(
            action,
            Action::GrepContent {
                pattern: "fn main".to_string(),
                path: ".".to_string(),
                file_type: None,
            }
        );
    }

    #[test]
    fn surrounding_whitespace_is_ignored_but_fences_are_not() {
        let action = decode("\n  {\"action\":\"finish\",\"message\":\"ok\"}  \n");
        assert!(action.is_finish());

        let fenced = "```json\n{\"action\":\"finish\",\"message\":\"ok\"}\n```";
        assert!(matches!(decode(fenced), Action::Unknown { .. }));
    }
}
