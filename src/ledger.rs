//! # Transient handles
//!
//! Extracted files and recompressed images are exposed to a UI through
//! short-lived `blob:` URLs. An [`ObjectUrlRegistry`] plays the role of the
//! host's URL table: it maps each live URL to its in-memory blob. A
//! [`ResourceLedger`] owns the URLs created for one batch and revokes every
//! one of them on `release_all` or when it is dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ForgeError, Result};

const URL_PREFIX: &str = "blob:fileforge/";

/// Immutable in-memory binary data with a MIME type.
#[derive(Clone, PartialEq, Eq)]
pub struct Blob {
    data: Arc<[u8]>,
    mime_type: String,
}

impl Blob {
    pub fn new(data: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        Self { data: data.into(), mime_type: mime_type.into() }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("len", &self.data.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// A URL bound to a blob in a registry. Cloning the handle does not extend the
/// blob's lifetime in the registry; only an explicit revoke ends it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransientHandle {
    url: String,
}

impl TransientHandle {
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for TransientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

#[derive(Default)]
struct RegistryInner {
    live: HashMap<String, Blob>,
    limit: Option<usize>,
}

/// Shared table of live object URLs. Cheap to clone.
#[derive(Clone, Default)]
pub struct ObjectUrlRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that refuses to hold more than `limit` live URLs.
    pub fn with_limit(limit: usize) -> Self {
        let registry = Self::default();
        registry.inner.lock().limit = Some(limit);
        registry
    }

    /// Bind a new URL to `blob`.
    pub fn create_handle(&self, blob: Blob) -> Result<TransientHandle> {
        let mut inner = self.inner.lock();
        if let Some(limit) = inner.limit {
            if inner.live.len() >= limit {
                return Err(ForgeError::HandleUnavailable(format!(
                    "{} object URLs already live",
                    inner.live.len()
                )));
            }
        }
        let url = format!("{}{}", URL_PREFIX, Uuid::new_v4());
        inner.live.insert(url.clone(), blob);
        Ok(TransientHandle { url })
    }

    /// Release a URL. Returns false if it was not live.
    pub fn revoke(&self, handle: &TransientHandle) -> bool {
        self.inner.lock().live.remove(&handle.url).is_some()
    }

    /// Resolve a live URL to its blob.
    pub fn resolve(&self, handle: &TransientHandle) -> Option<Blob> {
        self.inner.lock().live.get(&handle.url).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().live.len()
    }
}

impl fmt::Debug for ObjectUrlRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectUrlRegistry").field("live", &self.live_count()).finish()
    }
}

/// Owns the handles created for one batch of results.
///
/// Every handle tracked here is revoked exactly once: by `release_all`, by
/// `release`, or when the ledger is dropped.
#[derive(Debug)]
pub struct ResourceLedger {
    registry: ObjectUrlRegistry,
    live: Vec<TransientHandle>,
}

impl ResourceLedger {
    pub fn new(registry: ObjectUrlRegistry) -> Self {
        Self { registry, live: Vec::new() }
    }

    pub fn registry(&self) -> &ObjectUrlRegistry {
        &self.registry
    }

    /// Create a handle for `blob` and track it.
    pub fn create(&mut self, blob: Blob) -> Result<TransientHandle> {
        let handle = self.registry.create_handle(blob)?;
        self.track(handle.clone());
        Ok(handle)
    }

    /// Take ownership of an already-created handle.
    pub fn track(&mut self, handle: TransientHandle) {
        if !self.live.contains(&handle) {
            self.live.push(handle);
        }
    }

    /// Revoke a single tracked handle.
    pub fn release(&mut self, handle: &TransientHandle) {
        if let Some(pos) = self.live.iter().position(|h| h == handle) {
            let handle = self.live.swap_remove(pos);
            self.registry.revoke(&handle);
        }
    }

    /// Revoke everything. Safe to call when nothing is tracked.
    pub fn release_all(&mut self) {
        if self.live.is_empty() {
            return;
        }
        let count = self.live.len();
        for handle in self.live.drain(..) {
            if !self.registry.revoke(&handle) {
                warn!(url = %handle, "handle was already revoked outside its ledger");
            }
        }
        debug!(count, "released transient handles");
    }

    /// Move every handle from `other` into this ledger without revoking.
    pub fn absorb(&mut self, mut other: ResourceLedger) {
        for handle in other.live.drain(..) {
            self.track(handle);
        }
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn handles(&self) -> &[TransientHandle] {
        &self.live
    }
}

impl Drop for ResourceLedger {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(text: &str) -> Blob {
        Blob::new(text.as_bytes().to_vec(), "text/plain")
    }

    #[test]
    fn release_all_revokes_every_tracked_handle() {
        let registry = ObjectUrlRegistry::new();
        let mut ledger = ResourceLedger::new(registry.clone());
        let a = ledger.create(blob("a")).unwrap();
        let _b = ledger.create(blob("b")).unwrap();
        assert!(a.url().starts_with("blob:fileforge/"));
        assert_eq!(registry.live_count(), 2);
        assert_eq!(registry.resolve(&a).unwrap().bytes(), b"a");

        ledger.release_all();
        assert_eq!(registry.live_count(), 0);
        assert!(ledger.is_empty());
        ledger.release_all();
    }

    #[test]
    fn drop_releases_and_absorb_transfers() {
        let registry = ObjectUrlRegistry::new();
        let mut owner = ResourceLedger::new(registry.clone());
        {
            let mut batch = ResourceLedger::new(registry.clone());
            batch.create(blob("kept")).unwrap();
            owner.absorb(batch);
        }
        assert_eq!(registry.live_count(), 1);
        {
            let mut abandoned = ResourceLedger::new(registry.clone());
            abandoned.create(blob("lost")).unwrap();
        }
        assert_eq!(registry.live_count(), 1);
        drop(owner);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn limit_turns_creation_into_a_per_item_error() {
        let registry = ObjectUrlRegistry::with_limit(1);
        let mut ledger = ResourceLedger::new(registry);
        ledger.create(blob("one")).unwrap();
        let err = ledger.create(blob("two")).unwrap_err();
        assert!(err.is_per_item());
        assert_eq!(ledger.len(), 1);
    }
}
