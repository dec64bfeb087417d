//! Versioned upgrades for the persisted store document.
//!
//! Each step takes the raw JSON at version `n` to `n + 1`. Steps run in order
//! starting from the version recorded in the document (absent means 0) and the
//! result is stamped with [`CURRENT_SCHEMA_VERSION`]. Message-level defaults
//! are filled on every load whatever the version.

use serde_json::{Map, Value};

use super::model::{is_virtual, GENERAL, STARRED};

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

type Step = fn(&mut Map<String, Value>);

const STEPS: [Step; CURRENT_SCHEMA_VERSION as usize] = [fill_defaults, inject_starred];

/// Returns the version the document was at before upgrading.
pub fn upgrade(doc: &mut Value) -> u32 {
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let Some(root) = doc.as_object_mut() else {
        return 0;
    };
    let from = root
        .get("version")
        .and_then(Value::as_u64)
        .map(|v| v.min(u64::from(CURRENT_SCHEMA_VERSION)) as u32)
        .unwrap_or(0);
    for step in STEPS.iter().skip(from as usize) {
        step(root);
    }
    repair_messages(root);
    root.insert("version".into(), Value::from(CURRENT_SCHEMA_VERSION));
    from
}

/// v0 -> v1: every field the store relies on is present.
fn fill_defaults(root: &mut Map<String, Value>) {
    let mut categories: Vec<String> = root
        .get("categories")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let mut seen = std::collections::HashSet::new();
    categories.retain(|name| !name.is_empty() && seen.insert(name.clone()));
    if !categories.iter().any(|name| name == GENERAL) {
        categories.push(GENERAL.to_string());
    }

    let last = root
        .get("lastCategory")
        .and_then(Value::as_str)
        .filter(|name| categories.iter().any(|c| c == name))
        .map(str::to_string)
        .unwrap_or_else(|| categories[0].clone());

    let mut links = match root.remove("links") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    links.remove(STARRED);
    links.retain(|name, _| categories.iter().any(|c| c == name));
    for name in categories.iter().filter(|name| !is_virtual(name)) {
        let list = links
            .entry(name.clone())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !list.is_array() {
            *list = Value::Array(Vec::new());
        }
    }

    root.insert(
        "categories".into(),
        Value::Array(categories.into_iter().map(Value::String).collect()),
    );
    root.insert("lastCategory".into(), Value::String(last));
    root.insert("links".into(), Value::Object(links));
}

/// Drops non-object entries and gives every message an id, time and star flag.
fn repair_messages(root: &mut Map<String, Value>) {
    let Some(Value::Object(links)) = root.get_mut("links") else {
        return;
    };
    for messages in links.values_mut().filter_map(Value::as_array_mut) {
        messages.retain(Value::is_object);
        messages.iter_mut().for_each(fill_message_defaults);
    }
}

fn fill_message_defaults(message: &mut Value) {
    let Some(fields) = message.as_object_mut() else {
        return;
    };
    let has_id = fields
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty());
    if !has_id {
        fields.insert(
            "id".into(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
    }
    if !fields.get("time").is_some_and(Value::is_i64) {
        fields.insert("time".into(), Value::from(0));
    }
    if !fields.get("starred").is_some_and(Value::is_boolean) {
        fields.insert("starred".into(), Value::Bool(false));
    }
}

/// v1 -> v2: the virtual `Starred` category is listed.
fn inject_starred(root: &mut Map<String, Value>) {
    let Some(categories) = root.get_mut("categories").and_then(Value::as_array_mut) else {
        return;
    };
    if !categories.iter().any(|c| c.as_str() == Some(STARRED)) {
        categories.push(Value::String(STARRED.to_string()));
    }
}
