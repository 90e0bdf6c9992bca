use std::collections::BTreeSet;

/// Domain lexicon: keyword → topic label.
///
/// Deliberately small and literal; topic extraction is a cheap heuristic over
/// the recent window, not NLP. Keywords are matched as lowercase substrings
/// on token boundaries.
const LEXICON: &[(&str, &str)] = &[
    ("password", "authentication"),
    ("login", "authentication"),
    ("log in", "authentication"),
    ("sign in", "authentication"),
    ("signin", "authentication"),
    ("2fa", "authentication"),
    ("two-factor", "authentication"),
    ("authentication", "authentication"),
    ("locked out", "authentication"),
    ("billing", "billing"),
    ("invoice", "billing"),
    ("charge", "billing"),
    ("charged", "billing"),
    ("refund", "billing"),
    ("payment", "billing"),
    ("subscription", "billing"),
    ("plan", "billing"),
    ("account", "account"),
    ("profile", "account"),
    ("username", "account"),
    ("settings", "account"),
    ("error", "technical"),
    ("bug", "technical"),
    ("crash", "technical"),
    ("broken", "technical"),
    ("connection", "technical"),
    ("timeout", "technical"),
    ("slow", "technical"),
    ("security", "security"),
    ("phishing", "security"),
    ("breach", "security"),
    ("suspicious", "security"),
    ("fraud", "security"),
];

/// Topics mentioned in `text`.
pub fn extract(text: &str) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    let mut topics = BTreeSet::new();
    for (keyword, topic) in LEXICON {
        if keyword.contains(' ') {
            if lower.contains(keyword) {
                topics.insert(topic.to_string());
            }
        } else if lower
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .any(|token| token == *keyword)
        {
            topics.insert(topic.to_string());
        }
    }
    topics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_maps_to_authentication() {
        let topics = extract("I forgot my password");
        assert!(topics.contains("authentication"));
    }

    #[test]
    fn multiple_topics_in_one_message() {
        let topics = extract("The invoice page shows an error after login");
        assert!(topics.contains("billing"));
        assert!(topics.contains("technical"));
        assert!(topics.contains("authentication"));
    }

    #[test]
    fn keyword_must_be_a_whole_token() {
        // "planet" must not trigger the billing keyword "plan".
        let topics = extract("I love this planet");
        assert!(topics.is_empty());
    }

    #[test]
    fn multiword_keywords_match_as_phrases() {
        assert!(extract("I am locked out of everything").contains("authentication"));
    }

    #[test]
    fn case_is_ignored() {
        assert!(extract("REFUND NOW").contains("billing"));
    }
}
