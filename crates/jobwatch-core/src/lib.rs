//! Core domain model for jobwatch: extracted postings and the durable seen-set.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "jobwatch-core";

/// One job-listing row pulled out of a scraped page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    /// Dedup identifier. Currently the link target, so rows sharing a link share an id.
    pub id: String,
    /// Row cells joined with `" | "`.
    pub display_text: String,
    pub url: String,
}

impl Posting {
    pub fn from_link(url: impl Into<String>, display_text: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: url.clone(),
            display_text: display_text.into(),
            url,
        }
    }
}

/// Ordered, duplicate-free set of posting ids that were already reported.
///
/// Serializes as a plain JSON array. Duplicates in persisted input are dropped on load,
/// keeping the first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct SeenSet {
    ids: Vec<String>,
    index: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Appends `id` if absent. Returns `true` when the set grew.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.index.contains(&id) {
            return false;
        }
        self.index.insert(id.clone());
        self.ids.push(id);
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn is_superset_of(&self, other: &SeenSet) -> bool {
        other.iter().all(|id| self.contains(id))
    }
}

impl<S: Into<String>> FromIterator<S> for SeenSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = SeenSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl From<Vec<String>> for SeenSet {
    fn from(ids: Vec<String>) -> Self {
        ids.into_iter().collect()
    }
}

impl From<SeenSet> for Vec<String> {
    fn from(set: SeenSet) -> Self {
        set.ids
    }
}
