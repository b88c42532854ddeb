//! Registry of in-flight calls, keyed by tag.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::call::{CallId, CallShared};
use crate::tag::Tag;

/// Maps each tag to its active calls. Empty tags are dropped eagerly so
/// `len_for` of a settled tag is zero.
#[derive(Debug, Default)]
pub struct CallRegistry {
    calls: Mutex<HashMap<Tag, HashMap<CallId, Arc<CallShared>>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the maps half-updated, so
    // a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<Tag, HashMap<CallId, Arc<CallShared>>>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, call: Arc<CallShared>) {
        self.lock()
            .entry(call.tag.clone())
            .or_default()
            .insert(call.id, call);
    }

    pub(crate) fn remove(&self, tag: &Tag, id: CallId) -> Option<Arc<CallShared>> {
        let mut calls = self.lock();
        let group = calls.get_mut(tag)?;
        let removed = group.remove(&id);
        if group.is_empty() {
            calls.remove(tag);
        }
        removed
    }

    pub(crate) fn take_tag(&self, tag: &Tag) -> Vec<Arc<CallShared>> {
        self.lock()
            .remove(tag)
            .map(|group| group.into_values().collect())
            .unwrap_or_default()
    }

    pub(crate) fn take_all(&self) -> Vec<Arc<CallShared>> {
        self.lock()
            .drain()
            .flat_map(|(_, group)| group.into_values())
            .collect()
    }

    /// Number of active calls under `tag`.
    pub fn len_for(&self, tag: &Tag) -> usize {
        self.lock().get(tag).map_or(0, HashMap::len)
    }

    /// Number of active calls across all tags.
    pub fn len(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Tags with at least one active call.
    pub fn tags(&self) -> Vec<Tag> {
        self.lock().keys().cloned().collect()
    }
}
