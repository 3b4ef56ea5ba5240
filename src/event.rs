//! Typed resource change events.

use crate::key::ObjectKey;

/// The kind of change an event describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Addition,
    Modification,
    Deletion,
}

/// A single change to a keyed resource, either observed on a watch stream
/// or synthesized by the cache during replace and synchronize operations.
#[derive(Clone, Debug)]
pub struct Event<T> {
    pub kind: EventKind,
    /// True for events manufactured by the cache itself (replace seeds and
    /// periodic synchronization) rather than observed upstream. Synthesized
    /// events are only ever additions or modifications.
    pub synthetic: bool,
    pub key: ObjectKey,
    /// Prior state of the resource, when the producer knows it. Not
    /// consulted by the cache; carried through for consumers.
    pub prior: Option<T>,
    pub resource: T,
    /// Origin attribution, for diagnostics only.
    pub source: &'static str,
}

impl<T> Event<T> {
    /// An event observed on the watch stream, or a deletion derived from
    /// replace reconciliation.
    pub fn new(source: &'static str, kind: EventKind, key: ObjectKey, resource: T) -> Self {
        Self {
            kind,
            synthetic: false,
            key,
            prior: None,
            resource,
            source,
        }
    }

    /// An event synthesized out of already-known state.
    pub(crate) fn synthesized(
        source: &'static str,
        kind: EventKind,
        key: ObjectKey,
        resource: T,
    ) -> Self {
        debug_assert!(
            kind != EventKind::Deletion,
            "synthesized events describe state that still exists"
        );

        Self {
            kind,
            synthetic: true,
            key,
            prior: None,
            resource,
            source,
        }
    }

    pub fn with_prior(mut self, prior: T) -> Self {
        self.prior = Some(prior);
        self
    }
}
