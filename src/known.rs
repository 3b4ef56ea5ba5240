//! The last-observed state view, owned outside the cache.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::key::ObjectKey;

/// A read-only view of the last known state of resources, keyed the same
/// way the cache keys its queues.
///
/// The view is owned and kept current by the consumer side of the pipeline;
/// the cache only reads it, to derive deletions during replace and to drive
/// periodic synchronization. `entries` is called with the cache lock held,
/// so implementations must take their own lock for the snapshot and must
/// not call back into the cache.
pub trait KnownObjects<T>: Send + Sync {
    /// Snapshot the current entries.
    fn entries(&self) -> Vec<(ObjectKey, T)>;
}

/// Known-state tracking for consumers that keep a plain map under a lock.
pub type SharedObjects<T> = Arc<RwLock<HashMap<ObjectKey, T>>>;

impl<T> KnownObjects<T> for RwLock<HashMap<ObjectKey, T>>
where
    T: Clone + Send + Sync,
{
    fn entries(&self) -> Vec<(ObjectKey, T)> {
        self.read()
            .iter()
            .map(|(key, resource)| (key.clone(), resource.clone()))
            .collect()
    }
}
