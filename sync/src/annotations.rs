//! Annotation synchronization state.
//!
//! DESIGN
//! ======
//! Creation is a request/response exchange: the broker assigns the id
//! and the ack carries the canonical record, so there is no optimistic
//! pre-insert with a temporary id. Update and delete are
//! fire-and-forget with an immediate optimistic local apply; the
//! broadcast echo is the authoritative copy and every apply path is
//! idempotent by id, because the local apply, the echo of our own
//! edit, and a peer's identical edit may all arrive for the same
//! record in any order.

#[cfg(test)]
#[path = "annotations_test.rs"]
mod tests;

use std::collections::HashMap;

use crate::types::{Annotation, AnnotationPatch};

/// Local view of the room's annotations, keyed by server-assigned id.
#[derive(Debug, Default)]
pub struct AnnotationStore {
    items: HashMap<String, Annotation>,
}

impl AnnotationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a REST backlog fetch into the store. A broadcast applied
    /// while the fetch was in flight supersedes the snapshot copy, so
    /// a fetched record only lands where the local copy is absent or
    /// older by `updated_at`.
    pub fn hydrate(&mut self, items: Vec<Annotation>) {
        for item in items {
            match self.items.get(&item.id) {
                Some(existing) if existing.updated_at >= item.updated_at => {}
                _ => {
                    self.items.insert(item.id.clone(), item);
                }
            }
        }
    }

    /// Insert or overwrite a canonical record (create ack or broadcast
    /// echo). Applying the same record twice is a no-op. Returns
    /// whether the store changed.
    pub fn upsert(&mut self, annotation: Annotation) -> bool {
        match self.items.get(&annotation.id) {
            Some(existing) if *existing == annotation => false,
            _ => {
                self.items.insert(annotation.id.clone(), annotation);
                true
            }
        }
    }

    /// Apply a partial update. A patch that changes nothing (already
    /// applied optimistically, or echoed back) is a no-op. Returns
    /// whether the record changed.
    pub fn apply_patch(&mut self, id: &str, patch: &AnnotationPatch, updated_at: i64) -> bool {
        let Some(annotation) = self.items.get_mut(id) else {
            return false;
        };

        let mut changed = false;
        if let Some(text) = &patch.text {
            if annotation.text != *text {
                annotation.text = text.clone();
                changed = true;
            }
        }
        if let Some(anchor) = patch.anchor {
            if annotation.anchor != anchor {
                annotation.anchor = anchor;
                changed = true;
            }
        }
        if let Some(color_tag) = &patch.color_tag {
            if annotation.color_tag != *color_tag {
                annotation.color_tag = color_tag.clone();
                changed = true;
            }
        }
        if let Some(visible) = patch.visible {
            if annotation.visible != visible {
                annotation.visible = visible;
                changed = true;
            }
        }
        if changed {
            annotation.updated_at = updated_at;
        }
        changed
    }

    /// Remove by id. Deleting an already-deleted record is a no-op.
    /// Returns whether the store changed.
    pub fn remove(&mut self, id: &str) -> bool {
        self.items.remove(id).is_some()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Annotation> {
        self.items.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Annotations ordered by creation time, oldest first, for display.
    #[must_use]
    pub fn ordered(&self) -> Vec<Annotation> {
        let mut items: Vec<_> = self.items.values().cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        items
    }
}
