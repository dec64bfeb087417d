use std::collections::HashSet;
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use url::Url;

/// Sentence punctuation that ends a URL token rather than belonging to it.
pub const TRAILING_PUNCTUATION: [char; 10] = ['.', ',', ';', ':', '!', '?', ')', ']', '"', '\''];

/// Upper bound on tokens scanned from one piece of text.
pub const MAX_URL_MATCHES: usize = 100;

static SCHEME_PREFIX: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^https?://")
        .case_insensitive(true)
        .build()
        .expect("valid scheme pattern")
});

static BARE_DOMAIN: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^[\w.-]+\.[a-z]{2,}(/.*)?$")
        .case_insensitive(true)
        .build()
        .expect("valid bare domain pattern")
});

static URL_TOKEN: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"https?://[^\s]+|\b[\w.-]+\.[a-z]{2,}(?:/[^\s]*)?")
        .case_insensitive(true)
        .build()
        .expect("valid url token pattern")
});

/// Prefixes `https://` onto bare domains; anything else is returned trimmed.
pub fn normalize_url(input: &str) -> String {
    let s = input.trim();
    if SCHEME_PREFIX.is_match(s) {
        return s.to_string();
    }
    if BARE_DOMAIN.is_match(s) {
        return format!("https://{s}");
    }
    s.to_string()
}

pub fn is_likely_url(candidate: &str) -> bool {
    Url::parse(candidate).is_ok()
}

/// Normalizes and validates in one go.
pub fn parse_url(input: &str) -> Option<String> {
    let normalized = normalize_url(input);
    is_likely_url(&normalized).then_some(normalized)
}

pub fn hostname(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
}

/// Byte spans of URL-looking tokens in `text`, in order of appearance.
/// Scanning stops after [`MAX_URL_MATCHES`] tokens.
pub fn url_spans(text: &str) -> Vec<Range<usize>> {
    URL_TOKEN
        .find_iter(text)
        .take(MAX_URL_MATCHES)
        .filter(|found| {
            // Either half of an email address is not a link.
            !text[..found.start()].ends_with('@') && !text[found.end()..].starts_with('@')
        })
        .filter_map(|found| {
            let token = found.as_str().trim_end_matches(TRAILING_PUNCTUATION);
            (!token.is_empty()).then(|| found.start()..found.start() + token.len())
        })
        .collect()
}

/// Distinct URL-looking tokens in `text`, first occurrence first.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    url_spans(text)
        .into_iter()
        .map(|span| text[span].to_string())
        .filter(|token| seen.insert(token.clone()))
        .collect()
}
