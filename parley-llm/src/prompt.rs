//! Prompt and context assembly for NPC dialogue.
//!
//! Context is a list of plain lines: the system prompt, optionally who is
//! speaking, then the conversation so far. Each backend flattens it its
//! own way (see [`crate::client`]).

use crate::error::PromptError;

/// Used when a session has no configured farewell.
pub const FAREWELL_PROMPT: &str =
    "{npc_name} is ending the conversation with {other_name}. Reply with one short, in-character farewell line addressed to {other_name}.";

/// Used for a player's turn in a dynamic session.
pub const REPLY_PROMPT: &str =
    "{other_name} says: \"{input}\"\nReply as {npc_name} in one to three sentences. Stay in character.";

/// Last-resort farewell when generation is unavailable.
pub const STATIC_FAREWELL: &str = "Farewell, {other_name}.";

/// Inputs for [`build_context`].
#[derive(Debug, Clone, Copy)]
pub struct ContextSpec<'a> {
    /// Session system prompt. Skipped when empty.
    pub system_prompt: &'a str,
    /// Name of `#1`.
    pub first_name: &'a str,
    /// Name of `#2`.
    pub second_name: &'a str,
    /// Whether to add `NPC1:` / `NPC2:` lines.
    pub include_names: bool,
    /// Prior lines, oldest first.
    pub history: &'a [String],
}

/// Assemble the generation context.
///
/// # Errors
/// Returns [`PromptError::MissingName`] if either name is empty, even when
/// names are not included. Every generation is addressed to someone.
pub fn build_context(spec: &ContextSpec<'_>) -> Result<Vec<String>, PromptError> {
    if spec.first_name.trim().is_empty() {
        return Err(PromptError::MissingName("#1"));
    }
    if spec.second_name.trim().is_empty() {
        return Err(PromptError::MissingName("#2"));
    }

    let mut lines = Vec::with_capacity(spec.history.len() + 3);
    if !spec.system_prompt.trim().is_empty() {
        lines.push(spec.system_prompt.trim().to_string());
    }
    if spec.include_names {
        lines.push(format!("NPC1: {}", spec.first_name));
        lines.push(format!("NPC2: {}", spec.second_name));
    }
    lines.extend(spec.history.iter().cloned());
    Ok(lines)
}

/// Render a template with variable substitution.
///
/// Replaces `{key}` with the corresponding value.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result
}

/// Strip a speaker prefix the model sometimes echoes back (`"guard: Hi"`),
/// and surrounding quotes.
#[must_use]
pub fn clean_reply(text: &str, speaker: &str) -> String {
    let mut reply = text.trim();
    if let Some(head) = reply.get(..speaker.len()) {
        if !speaker.is_empty() && head.eq_ignore_ascii_case(speaker) {
            if let Some(rest) = reply[speaker.len()..].strip_prefix(':') {
                reply = rest.trim_start();
            }
        }
    }
    reply.trim_matches('"').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_has_system_names_then_history() {
        let history = vec!["merchant: Evening.".to_string()];
        let lines = build_context(&ContextSpec {
            system_prompt: "You are a merchant.",
            first_name: "merchant",
            second_name: "guard",
            include_names: true,
            history: &history,
        })
        .expect("names present");
        assert_eq!(
            lines,
            vec!["You are a merchant.", "NPC1: merchant", "NPC2: guard", "merchant: Evening."]
        );
    }

    #[test]
    fn names_can_be_left_out() {
        let lines = build_context(&ContextSpec {
            system_prompt: "",
            first_name: "a",
            second_name: "b",
            include_names: false,
            history: &[],
        })
        .expect("names present");
        assert!(lines.is_empty());
    }

    #[test]
    fn empty_name_is_an_error() {
        let err = build_context(&ContextSpec {
            system_prompt: "x",
            first_name: "merchant",
            second_name: " ",
            include_names: true,
            history: &[],
        })
        .expect_err("missing name");
        assert_eq!(err, PromptError::MissingName("#2"));
    }

    #[test]
    fn templates_substitute_all_occurrences() {
        let out = render_template(STATIC_FAREWELL, &[("other_name", "alice")]);
        assert_eq!(out, "Farewell, alice.");
        let out = render_template(FAREWELL_PROMPT, &[("npc_name", "guard"), ("other_name", "bob")]);
        assert!(!out.contains('{'));
        assert_eq!(out.matches("bob").count(), 2);
    }

    #[test]
    fn echoed_speaker_prefix_is_removed() {
        assert_eq!(clean_reply("Guard: \"Halt!\"", "guard"), "Halt!");
        assert_eq!(clean_reply("Halt: who goes there", "guard"), "Halt: who goes there");
        assert_eq!(clean_reply("  fine  ", ""), "fine");
    }
}
