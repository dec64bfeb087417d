use crate::error::ValidationError;
use crate::preview::urls::{parse_url, url_spans, TRAILING_PUNCTUATION};

/// What a user typed, split into normalized links and the leftover text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub text: Option<String>,
    pub urls: Vec<String>,
}

/// Splits free text into links and prose. Tokens that look like URLs but do
/// not parse stay in the text, as do email addresses. Punctuation that trailed
/// a removed link goes with it. Duplicate links collapse to the first one.
pub fn compose(input: &str) -> Result<Draft, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }

    let mut urls: Vec<String> = Vec::new();
    let mut remainder = String::with_capacity(trimmed.len());
    let mut cursor = 0;
    for span in url_spans(trimmed) {
        let Some(url) = parse_url(&trimmed[span.clone()]) else {
            continue;
        };
        remainder.push_str(&trimmed[cursor..span.start]);
        remainder.push(' ');
        let rest = &trimmed[span.end..];
        cursor = span.end + (rest.len() - rest.trim_start_matches(TRAILING_PUNCTUATION).len());
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    remainder.push_str(&trimmed[cursor..]);

    let text = remainder.split_whitespace().collect::<Vec<_>>().join(" ");
    if urls.is_empty() && text.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    Ok(Draft {
        text: (!text.is_empty()).then_some(text),
        urls,
    })
}
