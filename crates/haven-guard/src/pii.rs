use std::sync::OnceLock;

use regex::Regex;

/// Redact personally identifying information from message content.
///
/// Applied before storage and before prompt assembly, so neither the
/// conversation log nor the model ever sees the raw values. Order matters:
/// cards and IPs are matched before phone numbers so their digit runs are
/// not half-eaten by the looser phone pattern.
pub fn redact(content: &str) -> String {
    let mut out = content.to_string();
    out = redact_emails(&out);
    out = redact_cards(&out);
    out = redact_national_ids(&out);
    out = redact_ips(&out);
    out = redact_phones(&out);
    out
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap()
    })
}

fn card_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 13-19 digits, optionally separated by single spaces or dashes.
    RE.get_or_init(|| Regex::new(r"\b\d(?:[ -]?\d){12,18}\b").unwrap())
}

fn national_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap())
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:\+\d{1,3}[ .-]?)?(?:\(\d{1,4}\)[ .-]?)?\d{2,4}(?:[ .-]?\d{2,4}){1,4}")
            .unwrap()
    })
}

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap())
}

fn ipv4_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap())
}

fn ipv6_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:[0-9A-Fa-f]{1,4}:){2,7}[0-9A-Fa-f]{1,4}\b").unwrap()
    })
}

fn redact_emails(s: &str) -> String {
    email_re().replace_all(s, "[EMAIL_REDACTED]").into_owned()
}

/// Card candidates are only redacted when the digits pass the Luhn check;
/// arbitrary long numbers (order ids, tracking numbers) are left alone.
fn redact_cards(s: &str) -> String {
    card_re()
        .replace_all(s, |caps: &regex::Captures<'_>| {
            let raw = &caps[0];
            let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();
            if (13..=19).contains(&digits.len()) && luhn_valid(&digits) {
                "[CARD_REDACTED]".to_string()
            } else {
                raw.to_string()
            }
        })
        .into_owned()
}

fn redact_national_ids(s: &str) -> String {
    national_id_re().replace_all(s, "[ID_REDACTED]").into_owned()
}

/// Phone candidates need 8–12 digits (E.164 territory). Shorter runs are
/// room numbers and dates; longer runs are order ids or non-Luhn card-like
/// numbers that the card pass already declined to touch.
fn redact_phones(s: &str) -> String {
    phone_re()
        .replace_all(s, |caps: &regex::Captures<'_>| {
            let raw = &caps[0];
            let digit_count = raw.chars().filter(|c| c.is_ascii_digit()).count();
            if (8..=12).contains(&digit_count) && !iso_date_re().is_match(raw) {
                "[PHONE_REDACTED]".to_string()
            } else {
                raw.to_string()
            }
        })
        .into_owned()
}

fn redact_ips(s: &str) -> String {
    let s = ipv4_re().replace_all(s, "[IP_REDACTED]").into_owned();
    ipv6_re().replace_all(&s, "[IP_REDACTED]").into_owned()
}

/// Standard Luhn checksum over a digit sequence.
fn luhn_valid(digits: &[u32]) -> bool {
    let mut sum = 0u32;
    for (i, d) in digits.iter().rev().enumerate() {
        let mut d = *d;
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_redacted() {
        let out = redact("reach me at jane.doe+work@example.co.uk thanks");
        assert_eq!(out, "reach me at [EMAIL_REDACTED] thanks");
    }

    #[test]
    fn luhn_valid_card_is_redacted() {
        // 4111 1111 1111 1111 is the classic Visa test number.
        let out = redact("card: 4111 1111 1111 1111");
        assert_eq!(out, "card: [CARD_REDACTED]");
    }

    #[test]
    fn luhn_invalid_number_is_kept() {
        let out = redact("order 4111 1111 1111 1112");
        assert!(out.contains("1112"), "non-card digit run must survive: {out}");
    }

    #[test]
    fn national_id_is_redacted() {
        assert_eq!(redact("ssn 123-45-6789."), "ssn [ID_REDACTED].");
    }

    #[test]
    fn phone_numbers_are_redacted() {
        let out = redact("call +1 555-123-4567 or (020) 7946 0958");
        assert!(!out.contains("4567"), "{out}");
        assert!(!out.contains("0958"), "{out}");
        assert!(out.contains("[PHONE_REDACTED]"));
    }

    #[test]
    fn ip_addresses_are_redacted() {
        let out = redact("from 192.168.1.100 and 2001:db8:85a3::8a2e:370:7334");
        assert!(out.contains("[IP_REDACTED]"));
        assert!(!out.contains("192.168"));
    }

    #[test]
    fn no_pii_survives_redaction() {
        let input = "mail a@b.io, ip 10.0.0.1, ssn 123-45-6789, card 4111111111111111";
        let out = redact(input);
        assert!(!email_re().is_match(&out));
        assert!(!national_id_re().is_match(&out));
        assert!(!ipv4_re().is_match(&out));
        let digits: Vec<u32> = out.chars().filter_map(|c| c.to_digit(10)).collect();
        assert!(digits.len() < 13, "no card-length digit runs may remain");
    }

    #[test]
    fn clean_text_passes_through() {
        let input = "I forgot my password, please help";
        assert_eq!(redact(input), input);
    }
}
