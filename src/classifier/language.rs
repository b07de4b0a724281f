use crate::message::Language;

const SAMPLE_CHARS: usize = 500;
const MIN_TOKENS: usize = 3;

const SPANISH: &[&str] = &[
    "el", "que", "y", "los", "las", "por", "para", "con", "una", "es", "del", "se", "gracias",
    "hola", "saludos", "está", "muy", "pero", "como", "su", "estimado", "adjunto",
];

const ENGLISH: &[&str] = &[
    "the", "and", "to", "of", "is", "you", "for", "with", "this", "that", "are", "be", "have",
    "please", "thanks", "hello", "regards", "will", "your", "on", "dear", "attached",
];

const FRENCH: &[&str] = &[
    "le", "les", "des", "et", "est", "pour", "avec", "dans", "vous", "nous", "pas", "merci",
    "bonjour", "cordialement", "sur", "qui", "au", "du", "ce", "une", "ci-joint",
];

/// Scores the opening of `text` against small stopword lists. Ties, empty
/// input and very short input come back as `Unknown`.
pub fn detect_language(text: &str) -> Language {
    let sample: String = text.chars().take(SAMPLE_CHARS).collect::<String>().to_lowercase();
    let tokens: Vec<&str> = sample
        .split(|c: char| !(c.is_alphabetic() || c == '-'))
        .map(|token| token.trim_matches('-'))
        .filter(|token| !token.is_empty())
        .collect();

    if tokens.len() < MIN_TOKENS {
        return Language::Unknown;
    }

    let score = |vocabulary: &[&str]| {
        tokens
            .iter()
            .filter(|token| vocabulary.contains(token))
            .count()
    };

    let scores = [
        (Language::Es, score(SPANISH)),
        (Language::En, score(ENGLISH)),
        (Language::Fr, score(FRENCH)),
    ];

    let best = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
    if best == 0 {
        return Language::Unknown;
    }

    let mut leaders = scores.iter().filter(|(_, s)| *s == best);
    match (leaders.next(), leaders.next()) {
        (Some((language, _)), None) => *language,
        _ => Language::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::detect_language;
    use crate::message::Language;

    #[test]
    fn detects_three_languages() {
        assert_eq!(
            detect_language("Hola Ana, gracias por el documento. Te envío los cambios para que los revises."),
            Language::Es
        );
        assert_eq!(
            detect_language("Hi team, please find attached the report for this week and let me know."),
            Language::En
        );
        assert_eq!(
            detect_language("Bonjour, merci pour votre retour. Nous avons mis à jour le document pour vous."),
            Language::Fr
        );
    }

    #[test]
    fn short_or_empty_input_is_unknown() {
        assert_eq!(detect_language(""), Language::Unknown);
        assert_eq!(detect_language("ok thanks"), Language::Unknown);
    }

    #[test]
    fn tie_is_unknown() {
        // one English and one Spanish stopword, nothing else scores
        assert_eq!(detect_language("the zzz que qqq www"), Language::Unknown);
    }

    #[test]
    fn only_the_opening_is_scored() {
        let text = format!("{} the and you please thanks", "x ".repeat(300));
        assert_eq!(detect_language(&text), Language::Unknown);
    }
}
