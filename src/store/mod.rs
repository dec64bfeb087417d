use std::collections::HashSet;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use indexmap::IndexSet;
use parking_lot::Mutex;
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{StorageError, ValidationError};
use crate::search::SearchFilter;
use crate::storage::{StorageHandle, STORE_KEY};

pub mod compose;
pub mod migrate;
pub mod model;

pub use compose::{compose, Draft};
pub use model::{
    is_reserved, is_virtual, Link, LinkContent, LinkStatus, Message, StoreDocument, GENERAL,
    STARRED,
};

/// The store as shared between the capture path and the sync sweep.
pub type SharedStore = Arc<Mutex<MessageStore>>;

/// Emitted after background updates so a renderer can redraw one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    MessageReplaced { category: String, message: Message },
}

/// Addresses one link that is still waiting for its preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLink {
    pub category: String,
    pub message_id: String,
    pub index: usize,
    pub url: String,
}

/// Terminal result of resolving one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkResolution {
    Resolved {
        title: String,
        description: String,
        image: String,
    },
    Failed,
}

pub struct MessageStore {
    storage: StorageHandle,
    doc: StoreDocument,
    selection: IndexSet<String>,
    subscribers: Vec<Sender<StoreEvent>>,
}

impl MessageStore {
    /// Reads the store document, upgrading older shapes. A missing document
    /// is seeded with the defaults and written straight away.
    pub fn load(storage: StorageHandle) -> Result<Self, StorageError> {
        let doc = match storage.read_document(STORE_KEY)? {
            Some(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(mut value) => {
                    let from = migrate::upgrade(&mut value);
                    if from != migrate::CURRENT_SCHEMA_VERSION {
                        tracing::info!(
                            from,
                            to = migrate::CURRENT_SCHEMA_VERSION,
                            "upgraded store document"
                        );
                    }
                    match serde_json::from_value(value) {
                        Ok(doc) => doc,
                        Err(err) => {
                            tracing::warn!(?err, "store document malformed, starting fresh");
                            StoreDocument::default()
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(?err, "store document unreadable, starting fresh");
                    StoreDocument::default()
                }
            },
            None => {
                tracing::info!("seeding first-run store document");
                let doc = StoreDocument::default();
                storage.write_document(STORE_KEY, &serde_json::to_string(&doc)?)?;
                doc
            }
        };
        Ok(Self {
            storage,
            doc,
            selection: IndexSet::new(),
            subscribers: Vec::new(),
        })
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    pub fn document(&self) -> &StoreDocument {
        &self.doc
    }

    /// Display order, most recently used first.
    pub fn categories(&self) -> &[String] {
        &self.doc.categories
    }

    pub fn active_category(&self) -> &str {
        &self.doc.last_category
    }

    pub fn has_category(&self, name: &str) -> bool {
        self.doc.categories.iter().any(|c| c == name)
    }

    pub fn create_category(&mut self, name: &str) -> Result<(), ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyCategoryName);
        }
        if self.has_category(name) {
            return Err(ValidationError::DuplicateCategory(name.to_string()));
        }
        self.doc.categories.insert(0, name.to_string());
        self.doc.links.insert(name.to_string(), Vec::new());
        self.doc.last_category = name.to_string();
        self.selection.clear();
        self.persist();
        Ok(())
    }

    /// Removes a category together with every message in it. Returns how many
    /// messages went with it.
    pub fn delete_category(&mut self, name: &str) -> Result<usize, ValidationError> {
        if is_reserved(name) {
            return Err(ValidationError::ReservedCategory(name.to_string()));
        }
        if !self.has_category(name) {
            return Err(ValidationError::UnknownCategory(name.to_string()));
        }
        self.doc.categories.retain(|c| c != name);
        let removed = self
            .doc
            .links
            .shift_remove(name)
            .map(|list| list.len())
            .unwrap_or(0);
        if self.doc.last_category == name {
            self.doc.last_category = self
                .doc
                .categories
                .first()
                .cloned()
                .unwrap_or_else(|| GENERAL.to_string());
            self.selection.clear();
        }
        self.persist();
        Ok(removed)
    }

    pub fn select_category(&mut self, name: &str) -> Result<(), ValidationError> {
        if self.doc.last_category == name {
            return Ok(());
        }
        if !self.has_category(name) {
            return Err(ValidationError::UnknownCategory(name.to_string()));
        }
        self.doc.categories.retain(|c| c != name);
        self.doc.categories.insert(0, name.to_string());
        self.doc.last_category = name.to_string();
        self.selection.clear();
        self.persist();
        Ok(())
    }

    pub fn append_message(
        &mut self,
        category: &str,
        message: Message,
    ) -> Result<(), ValidationError> {
        if is_virtual(category) {
            return Err(ValidationError::VirtualCategory(category.to_string()));
        }
        if self.find_message(&message.id).is_some() {
            return Err(ValidationError::DuplicateMessageId(message.id));
        }
        let list = self
            .doc
            .links
            .get_mut(category)
            .ok_or_else(|| ValidationError::UnknownCategory(category.to_string()))?;
        list.push(message);
        self.persist();
        Ok(())
    }

    /// Builds a message from a draft with every link pending.
    pub fn new_message(draft: &Draft) -> Message {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            time: now_millis(),
            text: draft.text.clone(),
            starred: false,
            content: LinkContent::Multi(draft.urls.iter().map(Link::pending).collect()),
        }
    }

    pub fn delete_message(&mut self, id: &str, category: &str) -> bool {
        let Some(list) = self.doc.links.get_mut(category) else {
            return false;
        };
        let before = list.len();
        list.retain(|m| m.id != id);
        let removed = list.len() != before;
        if removed {
            self.selection.shift_remove(id);
            self.persist();
        }
        removed
    }

    /// Removes the given ids from whichever categories hold them. Unknown ids
    /// are skipped.
    pub fn delete_messages(&mut self, ids: &[String]) -> usize {
        let targets: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut removed = 0;
        for list in self.doc.links.values_mut() {
            let before = list.len();
            list.retain(|m| !targets.contains(m.id.as_str()));
            removed += before - list.len();
        }
        self.selection.retain(|id| !targets.contains(id.as_str()));
        if removed > 0 {
            self.persist();
        }
        removed
    }

    /// Stars every target when any of them is unstarred, otherwise unstars
    /// them all. Returns the new state, or `None` when no id matched.
    pub fn toggle_star(&mut self, ids: &[String]) -> Option<bool> {
        let targets: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let matched = self
            .doc
            .links
            .values()
            .flatten()
            .filter(|m| targets.contains(m.id.as_str()))
            .collect::<Vec<_>>();
        if matched.is_empty() {
            return None;
        }
        let star = matched.iter().any(|m| !m.starred);
        for message in self.doc.links.values_mut().flatten() {
            if targets.contains(message.id.as_str()) {
                message.starred = star;
            }
        }
        self.persist();
        Some(star)
    }

    /// Messages of `category` (or the starred projection) that match
    /// `search`, in store order. Clone the iterator to walk it again.
    pub fn query<'a>(&'a self, category: &str, search: &str) -> Query<'a> {
        let starred_only = is_virtual(category);
        let lists = if starred_only {
            self.doc
                .categories
                .iter()
                .filter(|name| !is_virtual(name))
                .filter_map(|name| self.doc.links.get(name))
                .map(Vec::as_slice)
                .collect()
        } else {
            self.doc
                .links
                .get(category)
                .map(|list| vec![list.as_slice()])
                .unwrap_or_default()
        };
        Query {
            lists,
            list: 0,
            pos: 0,
            filter: SearchFilter::new(search),
            starred_only,
        }
    }

    pub fn find_message(&self, id: &str) -> Option<(&str, &Message)> {
        self.doc.links.iter().find_map(|(category, list)| {
            list.iter()
                .find(|m| m.id == id)
                .map(|m| (category.as_str(), m))
        })
    }

    pub fn select_message(&mut self, id: &str) -> bool {
        self.find_message(id).is_some() && self.selection.insert(id.to_string())
    }

    pub fn deselect_message(&mut self, id: &str) -> bool {
        self.selection.shift_remove(id)
    }

    pub fn selection(&self) -> impl Iterator<Item = &str> {
        self.selection.iter().map(String::as_str)
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn delete_selected(&mut self) -> usize {
        let ids: Vec<String> = self.selection.drain(..).collect();
        self.delete_messages(&ids)
    }

    pub fn toggle_star_selected(&mut self) -> Option<bool> {
        let ids: Vec<String> = self.selection.iter().cloned().collect();
        self.toggle_star(&ids)
    }

    /// Every link still waiting for a preview, category by category.
    pub fn pending_links(&self) -> Vec<PendingLink> {
        let mut pending = Vec::new();
        for (category, list) in &self.doc.links {
            for message in list {
                for (index, link) in message.links().iter().enumerate() {
                    if link.status.is_pending() {
                        pending.push(PendingLink {
                            category: category.clone(),
                            message_id: message.id.clone(),
                            index,
                            url: link.url.clone(),
                        });
                    }
                }
            }
        }
        pending
    }

    /// Moves a pending link to its terminal status. Links that already left
    /// `pending`, or whose message is gone, are untouched. Does not persist;
    /// the caller batches and calls [`MessageStore::persist`].
    pub fn record_resolution(&mut self, target: &PendingLink, outcome: &LinkResolution) -> bool {
        let Some(message) = self
            .doc
            .links
            .get_mut(&target.category)
            .and_then(|list| list.iter_mut().find(|m| m.id == target.message_id))
        else {
            return false;
        };
        let Some(link) = message.content.links_mut().get_mut(target.index) else {
            return false;
        };
        if !link.status.is_pending() || link.url != target.url {
            return false;
        }
        match outcome {
            LinkResolution::Resolved {
                title,
                description,
                image,
            } => {
                link.title = title.clone();
                link.description = description.clone();
                link.image = image.clone();
                link.status = LinkStatus::Ok;
            }
            LinkResolution::Failed => link.status = LinkStatus::Error,
        }
        true
    }

    pub fn subscribe(&mut self) -> Receiver<StoreEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn notify_replaced(&mut self, category: &str, message_id: &str) {
        let Some(message) = self
            .doc
            .links
            .get(category)
            .and_then(|list| list.iter().find(|m| m.id == message_id))
            .cloned()
        else {
            return;
        };
        let event = StoreEvent::MessageReplaced {
            category: category.to_string(),
            message,
        };
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Drops everything back to the first-run document.
    pub fn reset(&mut self) {
        self.doc = StoreDocument::default();
        self.selection.clear();
        self.persist();
    }

    /// Writes the whole document. Failures are logged and swallowed: memory
    /// stays authoritative and the on-disk copy may lag until the next write.
    pub fn persist(&self) {
        if let Err(err) = self.try_persist() {
            tracing::warn!(?err, "failed to persist store document");
        }
    }

    pub fn try_persist(&self) -> Result<(), StorageError> {
        let json = serde_json::to_string(&self.doc)?;
        self.storage.write_document(STORE_KEY, &json)
    }
}

/// Lazy, restartable walk over a category or the starred projection.
#[derive(Clone)]
pub struct Query<'a> {
    lists: Vec<&'a [Message]>,
    list: usize,
    pos: usize,
    filter: SearchFilter,
    starred_only: bool,
}

impl<'a> Iterator for Query<'a> {
    type Item = &'a Message;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(list) = self.lists.get(self.list) {
            let Some(message) = list.get(self.pos) else {
                self.list += 1;
                self.pos = 0;
                continue;
            };
            self.pos += 1;
            if self.starred_only && !message.starred {
                continue;
            }
            if self.filter.matches(message) {
                return Some(message);
            }
        }
        None
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
