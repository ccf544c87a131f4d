//! Text normalization for identity keys and author matching.

use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

fn html_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").unwrap_or_else(|_| Regex::new("$^").expect("Empty regex")))
}

/// Lowercase a DOI, strip resolver prefixes and all whitespace.
///
/// Returns `None` for empty input.
pub fn normalize_doi(raw: &str) -> Option<String> {
    let mut doi: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    doi = doi.to_lowercase();
    for prefix in DOI_PREFIXES {
        if let Some(stripped) = doi.strip_prefix(prefix) {
            doi = stripped.to_string();
            break;
        }
    }
    if doi.is_empty() {
        None
    } else {
        Some(doi)
    }
}

/// Remove diacritics: NFKD decomposition, then drop combining marks.
///
/// A handful of letters that do not decompose are transliterated.
pub fn strip_diacritics(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.nfkd().filter(|c| !is_combining_mark(*c)) {
        match c {
            'ø' => out.push('o'),
            'Ø' => out.push('O'),
            'ł' => out.push('l'),
            'Ł' => out.push('L'),
            'đ' => out.push('d'),
            'Đ' => out.push('D'),
            'ß' => out.push_str("ss"),
            'æ' => out.push_str("ae"),
            'Æ' => out.push_str("AE"),
            'œ' => out.push_str("oe"),
            'Œ' => out.push_str("OE"),
            _ => out.push(c),
        }
    }
    out
}

/// Replace every non-alphanumeric character with a space and collapse runs.
fn collapse_punctuation(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Exact-match title key: no markup, no case, no diacritics, no punctuation.
pub fn normalize_title(raw: &str) -> String {
    let without_tags = html_tag_regex().replace_all(raw, " ");
    collapse_punctuation(&strip_diacritics(&without_tags).to_lowercase())
}

/// Exact-match author key used when unioning author lists.
pub fn normalize_name_key(raw: &str) -> String {
    collapse_punctuation(&strip_diacritics(raw).to_lowercase())
}
