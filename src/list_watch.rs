//! The remote-store operations the reflector consumes.

use async_trait::async_trait;
use futures::Stream;

/// A point-in-time listing of resources plus the version it was served at.
#[derive(Clone, Debug)]
pub struct ResourceList<T> {
    pub items: Vec<T>,
    pub resource_version: String,
}

/// One notification from a watch stream.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchNotification<T> {
    Added(T),
    Modified(T),
    Deleted(T),

    /// The server reported a watch-level error, typically an expired
    /// resource version. The watch position is unusable and must be
    /// rebuilt from a fresh list.
    Error(String),
}

/// List and watch primitives against the authoritative store.
///
/// The resource version threads through both calls so implementations can
/// resume a watch exactly where a list left off. Transport failures
/// surface as stream errors; a stream that ends without one is a clean
/// close.
#[async_trait]
pub trait ListWatch<T>: Send + Sync + 'static {
    type Stream: Stream<Item = crate::Result<WatchNotification<T>>> + Send + Unpin + 'static;

    /// Snapshot the current state, starting from `resource_version`.
    async fn list(&self, resource_version: &str) -> crate::Result<ResourceList<T>>;

    /// Open a watch beginning at `resource_version`.
    async fn watch(&self, resource_version: &str) -> crate::Result<Self::Stream>;
}
