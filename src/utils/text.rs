/// Keep at most `max_chars` characters, never splitting a UTF-8 sequence.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

/// Crude HTML to text for previews of HTML-only messages.
pub fn strip_tags(html: &str) -> String {
    html.replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("</p>", "\n")
        .split('<')
        .map(|s| s.split_once('>').map(|(_, rest)| rest).unwrap_or(s))
        .collect::<String>()
        .trim()
        .to_string()
}
