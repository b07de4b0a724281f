//! Address, header and body helpers shared by the adapters.

const REDACTED_BODY_MAX_LEN: usize = 200;
const HTML_TEXT_WIDTH: usize = 120;

pub fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    let total = trimmed.chars().count();
    if total <= REDACTED_BODY_MAX_LEN {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(REDACTED_BODY_MAX_LEN).collect();
        format!("{head}…[truncated {} bytes]", trimmed.len())
    }
}

/// Comma-separated address list, ignoring commas inside quoted names.
pub fn parse_address_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    let mut addresses = Vec::new();
    let mut in_quotes = false;
    let mut current = String::new();

    for ch in raw.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                if let Some(addr) = extract_email_from_entry(current.trim()) {
                    addresses.push(addr);
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if let Some(addr) = extract_email_from_entry(current.trim()) {
        addresses.push(addr);
    }

    addresses
}

/// Joins a list for storage in a single text column; `None` when empty.
pub fn join_addresses(addresses: &[String]) -> Option<String> {
    (!addresses.is_empty()).then(|| addresses.join(", "))
}

fn extract_email_from_entry(entry: &str) -> Option<String> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }

    if let (Some(start), Some(end)) = (entry.rfind('<'), entry.rfind('>')) {
        if start < end {
            let addr = entry[start + 1..end].trim();
            if !addr.is_empty() {
                return Some(addr.to_string());
            }
        }
    }

    entry.contains('@').then(|| entry.to_string())
}

/// Decodes RFC 2047 encoded-words by letting mailparse parse a synthetic header.
pub fn decode_rfc2047(input: &str) -> String {
    if !input.contains("=?") {
        return input.to_string();
    }
    let synthetic = format!("X: {input}");
    match mailparse::parse_header(synthetic.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => input.to_string(),
    }
}

/// Plain-text rendering of an html body. html2text can panic on hostile
/// markup, so the conversion is isolated.
pub fn html_to_text(html: &str) -> Option<String> {
    let text = std::panic::catch_unwind(|| {
        html2text::from_read(html.as_bytes(), HTML_TEXT_WIDTH)
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    })
    .ok()?;

    (!text.is_empty()).then_some(text)
}
