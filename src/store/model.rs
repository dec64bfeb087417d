use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;

pub const GENERAL: &str = "General";
pub const STARRED: &str = "Starred";

/// `General` and `Starred` can never be deleted.
pub fn is_reserved(name: &str) -> bool {
    name == GENERAL || name == STARRED
}

/// `Starred` is computed from the other categories and owns no messages.
pub fn is_virtual(name: &str) -> bool {
    name == STARRED
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LinkStatus {
    Ok,
    Error,
    /// Also what unrecognised tokens read as, so the next sweep settles them.
    #[default]
    #[serde(other)]
    Pending,
}

impl LinkStatus {
    pub fn is_pending(self) -> bool {
        self == LinkStatus::Pending
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Link {
    pub url: String,
    pub title: String,
    pub description: String,
    pub image: String,
    pub status: LinkStatus,
}

impl Link {
    pub fn pending(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            title: url.clone(),
            url,
            ..Self::default()
        }
    }
}

/// Where a message keeps its links. Older documents stored one link inline on
/// the message; newer ones keep an ordered list. Both are written back in the
/// shape they were read in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkContent {
    Single(Link),
    Multi(Vec<Link>),
}

impl LinkContent {
    pub fn links(&self) -> &[Link] {
        match self {
            LinkContent::Single(link) => std::slice::from_ref(link),
            LinkContent::Multi(links) => links,
        }
    }

    pub fn links_mut(&mut self) -> &mut [Link] {
        match self {
            LinkContent::Single(link) => std::slice::from_mut(link),
            LinkContent::Multi(links) => links,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "MessageRecord", into = "MessageRecord")]
pub struct Message {
    pub id: String,
    /// Creation time, unix milliseconds.
    pub time: i64,
    pub text: Option<String>,
    pub starred: bool,
    pub content: LinkContent,
}

impl Message {
    pub fn links(&self) -> &[Link] {
        self.content.links()
    }

    pub fn has_pending(&self) -> bool {
        self.links().iter().any(|link| link.status.is_pending())
    }
}

/// On-disk shape of a message covering both link layouts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MessageRecord {
    id: String,
    #[serde(default)]
    time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default)]
    starred: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    links: Option<Vec<Link>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<LinkStatus>,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        let content = match (record.links, record.url) {
            (Some(links), _) => LinkContent::Multi(links),
            (None, Some(url)) => LinkContent::Single(Link {
                url,
                title: record.title.unwrap_or_default(),
                description: record.description.unwrap_or_default(),
                image: record.image.unwrap_or_default(),
                status: record.status.unwrap_or_default(),
            }),
            (None, None) => LinkContent::Multi(Vec::new()),
        };
        Message {
            id: record.id,
            time: record.time,
            text: record.text,
            starred: record.starred,
            content,
        }
    }
}

impl From<Message> for MessageRecord {
    fn from(message: Message) -> Self {
        let mut record = MessageRecord {
            id: message.id,
            time: message.time,
            text: message.text,
            starred: message.starred,
            ..MessageRecord::default()
        };
        match message.content {
            LinkContent::Multi(links) => record.links = Some(links),
            LinkContent::Single(link) => {
                record.url = Some(link.url);
                record.title = Some(link.title);
                record.description = Some(link.description);
                record.image = Some(link.image);
                record.status = Some(link.status);
            }
        }
        record
    }
}

/// The whole persisted store, written under a single key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDocument {
    pub version: u32,
    pub categories: Vec<String>,
    #[serde(rename = "lastCategory")]
    pub last_category: String,
    pub links: IndexMap<String, Vec<Message>>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        let mut links = IndexMap::new();
        links.insert(GENERAL.to_string(), Vec::new());
        Self {
            version: super::migrate::CURRENT_SCHEMA_VERSION,
            categories: vec![GENERAL.to_string(), STARRED.to_string()],
            last_category: GENERAL.to_string(),
            links,
        }
    }
}
