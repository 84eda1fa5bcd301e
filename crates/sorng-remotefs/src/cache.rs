//! Per-session attribute and directory-listing cache.
//!
//! Invalidation is always scoped to the mutated path and its immediate
//! parent; there is no subtree walk.

use crate::path_utils;
use crate::types::{Attributes, Entry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Children of a directory as last seen on the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub entries: Vec<Entry>,
    /// `false` when the server refused the listing.
    pub readable: bool,
}

impl Listing {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            readable: true,
        }
    }

    /// Listing of a directory that was just created.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn unreadable() -> Self {
        Self {
            entries: Vec::new(),
            readable: false,
        }
    }

    pub fn find(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// One cached path.
#[derive(Debug, Clone, Default)]
pub struct CachedEntry {
    pub attributes: Option<Attributes>,
    pub listing: Option<Listing>,
}

/// Thread-safe cache keyed by normalised absolute path.
#[derive(Debug, Default)]
pub struct AttributeCache {
    entries: Mutex<HashMap<String, CachedEntry>>,
}

impl AttributeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<CachedEntry> {
        let key = path_utils::normalize(path);
        self.lock().get(&key).cloned()
    }

    pub fn put(&self, path: &str, attributes: Attributes) {
        let key = path_utils::normalize(path);
        self.lock().entry(key).or_default().attributes = Some(attributes);
    }

    /// Store a directory's children; each child's attributes are cached too.
    pub fn put_listing(&self, path: &str, listing: Listing) {
        let key = path_utils::normalize(path);
        let mut map = self.lock();
        for entry in &listing.entries {
            let child = path_utils::join(&key, &entry.name);
            map.entry(child).or_default().attributes = Some(entry.attributes.clone());
        }
        map.entry(key).or_default().listing = Some(listing);
    }

    pub fn listing(&self, path: &str) -> Option<Listing> {
        let key = path_utils::normalize(path);
        self.lock().get(&key).and_then(|e| e.listing.clone())
    }

    pub fn attributes(&self, path: &str) -> Option<Attributes> {
        let key = path_utils::normalize(path);
        self.lock().get(&key).and_then(|e| e.attributes.clone())
    }

    /// Remove just this entry.
    pub fn invalidate(&self, path: &str) {
        let key = path_utils::normalize(path);
        if self.lock().remove(&key).is_some() {
            log::trace!("cache: invalidated {}", key);
        }
    }

    /// Remove the entry and its parent's listing.
    pub fn invalidate_with_parent(&self, path: &str) {
        self.invalidate(path);
        self.invalidate(&path_utils::parent(path));
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().contains_key(&path_utils::normalize(path))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedEntry>> {
        // A poisoned cache only ever holds plain data; keep using it.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
