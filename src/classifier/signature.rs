use std::sync::LazyLock;

use regex::Regex;

use crate::message::{truncate_chars, SignatureFields, MAX_SIGNATURE_CHARS};

static DELIMITER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:--[ \t]*|_{3,}[ \t]*|-{3,}[ \t]*|sent from my\b.*|enviado desde mi\b.*|(?:saludos|un saludo|saludos cordiales|atentamente|cordialmente|un abrazo|best regards|kind regards|warm regards|regards|best|cheers|thanks|many thanks|sincerely)[ \t]*[,.!]?[ \t]*)\r?$",
    )
    .expect("compile signature delimiter regex")
});

static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d[\d \t().-]{7,}\d").expect("compile phone regex"));

static LINKEDIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)linkedin\.com/(in|company)/([A-Za-z0-9_%-]+)").expect("compile linkedin regex")
});

static WEBSITE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:https?://|www\.)[^\s<>()\[\]]+").expect("compile website regex")
});

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("compile email regex")
});

const MIN_PHONE_DIGITS: usize = 9;
const MAX_TEXT_LINE_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedSignature {
    pub raw: String,
    pub fields: SignatureFields,
}

/// Finds the earliest signature delimiter in `body` and parses what follows.
pub fn extract_signature(body: &str) -> Option<ExtractedSignature> {
    let found = DELIMITER.find(body)?;
    let raw = truncate_chars(body[found.start()..].trim(), MAX_SIGNATURE_CHARS);
    if raw.is_empty() {
        return None;
    }

    let fields = parse_fields(&raw);
    Some(ExtractedSignature { raw, fields })
}

fn parse_fields(raw: &str) -> SignatureFields {
    let phone = PHONE
        .find_iter(raw)
        .map(|m| normalize_phone(m.as_str()))
        .find(|p| p.chars().filter(char::is_ascii_digit).count() >= MIN_PHONE_DIGITS);

    let linkedin = LINKEDIN
        .captures(raw)
        .map(|caps| format!("linkedin.com/{}/{}", caps[1].to_ascii_lowercase(), &caps[2]));

    let website = WEBSITE
        .find_iter(raw)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']))
        .find(|url| !url.to_ascii_lowercase().contains("linkedin.com"))
        .map(str::to_string);

    let email = EMAIL.find(raw).map(|m| m.as_str().to_string());

    // first line is the delimiter itself, then name, title, organization
    let lines: Vec<&str> = raw
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    SignatureFields {
        phone,
        linkedin,
        website,
        title: lines.get(1).filter(|l| looks_like_text(l)).map(|l| l.to_string()),
        organization: lines.get(2).filter(|l| looks_like_text(l)).map(|l| l.to_string()),
        email,
    }
}

fn normalize_phone(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '.' | '-' | '(' | ')'))
        .collect()
}

fn looks_like_text(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    if line.chars().count() > MAX_TEXT_LINE_CHARS
        || line.contains('@')
        || lower.contains("http")
        || lower.contains("www.")
        || lower.contains("linkedin")
    {
        return false;
    }

    let letters = line.chars().filter(|c| c.is_alphabetic()).count();
    let digits = line.chars().filter(|c| c.is_ascii_digit()).count();
    letters > 0 && digits * 2 < letters
}

#[cfg(test)]
mod tests {
    use super::extract_signature;

    #[test]
    fn spanish_valediction_yields_title_organization_and_phone() {
        let body = "Hola,\nte paso el presupuesto.\n\nSaludos,\nJuan Pérez\nDirector de Ventas\nAcme S.L.\n+34 600 123 456";
        let signature = extract_signature(body).expect("signature");

        assert!(signature.raw.starts_with("Saludos,"));
        assert_eq!(signature.fields.title.as_deref(), Some("Director de Ventas"));
        assert_eq!(signature.fields.organization.as_deref(), Some("Acme S.L."));
        assert_eq!(signature.fields.phone.as_deref(), Some("+34600123456"));
    }

    #[test]
    fn earliest_delimiter_wins_and_contact_data_is_extracted() {
        let body = "See you tomorrow.\n-- \nAna Gómez\nhttps://linkedin.com/in/anagomez\nana@acme.io\nhttps://acme.io/team\n\nSent from my phone";
        let signature = extract_signature(body).expect("signature");

        assert!(signature.raw.starts_with("--"));
        assert!(signature.raw.contains("Sent from my phone"));
        assert_eq!(signature.fields.linkedin.as_deref(), Some("linkedin.com/in/anagomez"));
        assert_eq!(signature.fields.website.as_deref(), Some("https://acme.io/team"));
        assert_eq!(signature.fields.email.as_deref(), Some("ana@acme.io"));
        // the second line is a URL, not a title
        assert!(signature.fields.title.is_none());
    }

    #[test]
    fn short_digit_runs_are_not_phones() {
        let body = "Best regards,\nTom\nMeeting on 2026-03-01";
        let signature = extract_signature(body).expect("signature");
        assert!(signature.fields.phone.is_none());
    }

    #[test]
    fn valediction_inside_a_sentence_is_not_a_delimiter() {
        assert!(extract_signature("I think this is the best option for us.").is_none());
        assert!(extract_signature("").is_none());
    }
}
