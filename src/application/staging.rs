//! Ephemeral key→bytes store bridging an HTTP upload and the rendering
//! engine's own fetch of that content.
//!
//! Entries live for the duration of a single render request. Expected
//! concurrency is bounded by the session-pool size, so one coarse lock
//! over the whole map is sufficient.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use metrics::gauge;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

/// Content type of every staged item.
pub const SVG_CONTENT_TYPE: &str = "image/svg+xml";

type Entries = Arc<Mutex<HashMap<String, Bytes>>>;

#[derive(Default)]
pub struct StagingStore {
    entries: Entries,
}

impl StagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or overwrite the entry for `key`, visible to subsequent
    /// `get` calls immediately.
    pub fn put(&self, key: &str, content: Bytes) {
        let len = {
            let mut entries = self.entries.lock().expect("staging lock poisoned");
            entries.insert(key.to_string(), content);
            entries.len()
        };
        gauge!("svgsnap_staged_entries").set(len as f64);
        debug!(target = "svgsnap::staging", key, "staged entry");
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.entries
            .lock()
            .expect("staging lock poisoned")
            .get(key)
            .cloned()
    }

    /// Delete the entry if present. Idempotent.
    pub fn remove(&self, key: &str) {
        remove_entry(&self.entries, key);
    }

    /// Stage content under `key` and return a guard that removes the
    /// entry when dropped, so cleanup runs on every exit path of the
    /// owning request.
    pub fn stage(&self, key: String, content: Bytes) -> StagedEntry {
        self.put(&key, content);
        StagedEntry {
            entries: Arc::clone(&self.entries),
            key,
        }
    }
}

fn remove_entry(entries: &Entries, key: &str) {
    let len = {
        let mut entries = entries.lock().expect("staging lock poisoned");
        entries.remove(key);
        entries.len()
    };
    gauge!("svgsnap_staged_entries").set(len as f64);
    debug!(target = "svgsnap::staging", key, "removed entry");
}

/// Scoped handle to one staged entry; dropping it removes the entry.
pub struct StagedEntry {
    entries: Entries,
    key: String,
}

impl StagedEntry {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for StagedEntry {
    fn drop(&mut self) {
        remove_entry(&self.entries, &self.key);
    }
}

/// Derive a staging key from the uploaded content plus a per-request
/// salt. The salt keeps keys unique even for identical concurrent
/// uploads, so one request's cleanup can never delete another's
/// in-flight staged content.
pub fn derive_key(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hasher.update(Uuid::new_v4().as_bytes());
    format!("{}.svg", hex::encode(hasher.finalize()))
}
