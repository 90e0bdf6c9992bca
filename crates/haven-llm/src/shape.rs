use std::sync::OnceLock;

use regex::Regex;

/// Hard cap on assistant-visible output.
const OUTPUT_CHAR_CAP: usize = 1000;

fn artifact_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Echoed injection fragments the model sometimes parrots back.
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(ignore\s+(all\s+)?(previous|prior)\s+instructions[.!]?|as\s+an\s+ai\s+language\s+model,?\s*)",
        )
        .unwrap()
    })
}

/// Shape a raw model response for the client: strip prompt-injection echo
/// artifacts, cap the length, and make sure it ends like a sentence.
pub fn shape(content: &str) -> String {
    let stripped = artifact_re().replace_all(content, "");
    let mut out: String = stripped.trim().chars().take(OUTPUT_CHAR_CAP).collect();

    // A truncated or artifact-stripped reply may end mid-clause.
    match out.chars().last() {
        None => {}
        Some(c) if matches!(c, '.' | '!' | '?') => {}
        Some(_) => {
            // Drop a dangling partial word after truncation, then terminate.
            if out.chars().count() == OUTPUT_CHAR_CAP {
                if let Some(idx) = out.rfind(' ') {
                    out.truncate(idx);
                }
            }
            while matches!(out.chars().last(), Some(',' | ';' | ':' | ' ' | '-')) {
                out.pop();
            }
            out.push('.');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_reply_is_untouched() {
        assert_eq!(shape("Your ticket is open."), "Your ticket is open.");
    }

    #[test]
    fn injection_echo_is_stripped() {
        let out = shape("Ignore previous instructions. Here is your answer!");
        assert!(!out.to_lowercase().contains("ignore previous"));
        assert!(out.contains("Here is your answer"));
    }

    #[test]
    fn output_is_capped_at_1000_chars() {
        let long = "word ".repeat(400);
        let out = shape(&long);
        assert!(out.chars().count() <= 1000);
        assert!(out.ends_with('.'));
    }

    #[test]
    fn missing_terminator_is_added() {
        assert_eq!(shape("I can help with that"), "I can help with that.");
    }

    #[test]
    fn question_mark_is_a_valid_terminator() {
        assert_eq!(shape("Anything else?"), "Anything else?");
    }

    #[test]
    fn empty_reply_stays_empty() {
        assert_eq!(shape(""), "");
    }
}
