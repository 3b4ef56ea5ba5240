//! Building blocks of a Kubernetes-style controller: a per-key event queue
//! cache and a reflector that continuously pulls cluster state into it.
//!
//! The [`Reflector`] lists and watches an authoritative resource store
//! through the [`ListWatch`] seam and feeds every observed change into an
//! [`EventQueueCache`]. The cache buffers changes per resource key,
//! compresses redundant ones, and hands one key's queue at a time to a
//! single consumer attached with [`EventQueueCache::start`].

#![allow(clippy::type_complexity)]

pub mod backoff;
mod cache;
mod event;
mod key;
mod known;
pub mod list_watch;
mod observe;
mod queue;
mod reflector;

pub use cache::{AddError, Disposition, EventQueueCache, EventSink};
pub use event::{Event, EventKind};
pub use key::ObjectKey;
pub use known::{KnownObjects, SharedObjects};
pub use list_watch::{ListWatch, ResourceList, WatchNotification};
pub use observe::{Property, PropertyChange, Subscription};
pub use queue::EventQueue;
pub use reflector::Reflector;

#[macro_use]
extern crate metrics;
#[macro_use]
extern crate tracing;

/// Basic error type, dynamically dispatched and safe to send across threads
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Basic result type, defined in terms of [`Error`] and generic over `T`
pub type Result<T> = std::result::Result<T, Error>;
