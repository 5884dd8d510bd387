use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::feed::Post;

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: String,
    pub last_content: Post,
    pub visible: bool,
}

/// Classification of one due snapshot against what was seen before.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreDiff {
    pub created: Vec<(String, Post)>,
    pub updated: Vec<(String, Post)>,
    /// Every due id of the snapshot, newest first.
    pub order: Vec<String>,
    /// `(id, created)` in `order`, so callers can replay changes in feed order.
    pub changes: Vec<(String, bool)>,
}

impl StoreDiff {
    pub fn is_unchanged(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty()
    }
}

/// Keyed table of every post rendered this session. Entries are never
/// removed; ids missing from a later snapshot keep their last content.
#[derive(Debug, Default)]
pub struct PostStore {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
}

impl PostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.entries.get(id)
    }

    /// Visible ids of the most recent snapshot, newest first.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Pinned subset of `order`, same relative order.
    pub fn pinned(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                self.entries
                    .get(id.as_str())
                    .is_some_and(|entry| entry.last_content.pinned)
            })
            .cloned()
            .collect()
    }

    /// Hides stored posts whose latest time lies in the future. Returns how
    /// many entries went from visible to hidden.
    pub fn hold_back(&mut self, ids: &[String]) -> usize {
        let mut hidden = 0;
        for id in ids {
            if let Some(entry) = self.entries.get_mut(id) {
                if entry.visible {
                    entry.visible = false;
                    hidden += 1;
                }
            }
        }
        if hidden > 0 {
            tracing::debug!(hidden, "rendered posts moved into the future");
        }
        hidden
    }

    /// Folds the due posts of a snapshot into the store and reports what
    /// changed. Callers must have removed posts that are not yet due.
    pub fn diff(&mut self, posts: Vec<Post>) -> StoreDiff {
        let mut diff = StoreDiff::default();
        let mut seen = HashSet::new();

        for post in sort_newest_first(posts) {
            let id = post.key();
            if !seen.insert(id.clone()) {
                tracing::warn!(%id, "duplicate post id in snapshot; keeping the newest copy");
                continue;
            }
            diff.order.push(id.clone());

            match self.entries.get_mut(&id) {
                None => {
                    self.entries.insert(
                        id.clone(),
                        Entry {
                            id: id.clone(),
                            last_content: post.clone(),
                            visible: true,
                        },
                    );
                    diff.changes.push((id.clone(), true));
                    diff.created.push((id, post));
                }
                Some(entry) if entry.last_content != post => {
                    entry.last_content = post.clone();
                    entry.visible = true;
                    diff.changes.push((id.clone(), false));
                    diff.updated.push((id, post));
                }
                Some(entry) => entry.visible = true,
            }
        }

        self.order = diff.order.clone();
        diff
    }
}

/// Stable sort by timestamp, newest first. Posts without a readable time go
/// after every dated post.
pub fn sort_newest_first(mut posts: Vec<Post>) -> Vec<Post> {
    posts.sort_by(|a, b| compare_newest_first(a, b));
    posts
}

fn compare_newest_first(a: &Post, b: &Post) -> Ordering {
    match (a.timestamp(), b.timestamp()) {
        (Some(a), Some(b)) => b.timestamp_millis().cmp(&a.timestamp_millis()),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
