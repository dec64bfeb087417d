use crate::store::{Link, Message};

/// Case-insensitive substring filter over a message's text and every link's
/// url, title and description.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    needle: Option<String>,
}

impl SearchFilter {
    pub fn new(input: &str) -> Self {
        let trimmed = input.trim();
        Self {
            needle: (!trimmed.is_empty()).then(|| trimmed.to_lowercase()),
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        let Some(needle) = self.needle.as_deref() else {
            return true;
        };
        if message
            .text
            .as_deref()
            .is_some_and(|text| contains(text, needle))
        {
            return true;
        }
        message.links().iter().any(|link| link_matches(link, needle))
    }
}

fn link_matches(link: &Link, needle: &str) -> bool {
    [&link.url, &link.title, &link.description]
        .into_iter()
        .any(|field| contains(field, needle))
}

fn contains(haystack: &str, needle: &str) -> bool {
    !haystack.is_empty() && haystack.to_lowercase().contains(needle)
}
