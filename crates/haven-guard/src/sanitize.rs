/// Input sanitization — the last gate stage before the pipeline sees the
/// message.
///
/// Entity-encodes HTML-special characters, drops control characters (keeping
/// newlines and tabs), and collapses runs of horizontal whitespace.
pub fn sanitize(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for c in content.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '\n' | '\t' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    normalize_whitespace(&out)
}

/// Collapse runs of spaces/tabs into a single space and trim the ends.
/// Newlines are preserved so multi-line messages keep their shape.
fn normalize_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_run = false;
    for c in s.chars() {
        if c == ' ' || c == '\t' {
            if !in_run {
                out.push(' ');
            }
            in_run = true;
        } else {
            in_run = false;
            out.push(c);
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_is_entity_encoded() {
        assert_eq!(
            sanitize("<script>alert('x')</script>"),
            "&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;"
        );
    }

    #[test]
    fn control_chars_are_stripped() {
        assert_eq!(sanitize("a\u{0000}b\u{0007}c"), "abc");
    }

    #[test]
    fn whitespace_runs_collapse() {
        assert_eq!(sanitize("  hello   \t world  "), "hello world");
    }

    #[test]
    fn newlines_survive() {
        assert_eq!(sanitize("line one\nline   two"), "line one\nline two");
    }
}
