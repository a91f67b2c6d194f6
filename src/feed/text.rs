use std::borrow::Cow;
use std::sync::LazyLock;

use quick_xml::escape::resolve_html5_entity;
use regex::{Captures, Regex};

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,8}|#[xX][0-9a-fA-F]{1,8}|[A-Za-z][A-Za-z0-9]{1,31});")
        .expect("entity pattern is valid")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^>]*)>").expect("tag pattern is valid"));
static LEFTOVER_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&\S+;").expect("entity pattern is valid"));
static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\S+\]").expect("citation pattern is valid"));
static WHITESPACE_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{3,}").expect("whitespace pattern is valid"));

/// Decodes HTML and XML character references. Unknown names are left as written;
/// references to surrogates or invalid code points become U+FFFD.
pub fn decode_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }
    ENTITY_RE.replace_all(input, |caps: &Captures| {
        let body = &caps[1];
        if let Some(num) = body.strip_prefix('#') {
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => num.parse::<u32>().ok(),
            };
            return code
                .and_then(char::from_u32)
                .unwrap_or(char::REPLACEMENT_CHARACTER)
                .to_string();
        }
        match resolve_html5_entity(body) {
            Some(resolved) => resolved.to_string(),
            None => caps[0].to_string(),
        }
    })
}

/// First `max` characters, never splitting a code point.
pub fn truncate_chars(input: &str, max: usize) -> &str {
    match input.char_indices().nth(max) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

/// Turns a feed description into short plain text.
pub fn clean_description(raw: &str) -> String {
    let decoded = decode_entities(raw);
    let text = decoded.trim();
    let text = TAG_RE.replace_all(text, "");
    let text = LEFTOVER_ENTITY_RE.replace_all(&text, "");
    let text = CITATION_RE.replace_all(&text, "");
    let text = truncate_chars(&text, 1024);
    let text = text.replacen(|c: char| c.is_whitespace() && c != ' ', " ", 1);
    WHITESPACE_RUN_RE.replace_all(&text, " ").into_owned()
}

/// Latin-1 maps every byte straight onto the first 256 code points.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// UTF-8 first; a replacement character means the bytes were something else,
/// so fall back to ISO-8859-1.
pub fn decode_body(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.contains(char::REPLACEMENT_CHARACTER) {
        decode_latin1(bytes)
    } else {
        text.into_owned()
    }
}
