//! The per-key event queue cache.
//!
//! Events land in one [`EventQueue`] per resource key, held in insertion
//! order. A single consumer worker repeatedly takes the oldest queue and
//! hands it to an [`EventSink`]. Replace reconciles the cache against an
//! authoritative snapshot, synthesizing additions and deletions as needed;
//! synchronize re-emits known state for keys the consumer has caught up on.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::Metadata;
use parking_lot::Mutex;
use snafu::{OptionExt, Snafu};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::event::{Event, EventKind};
use crate::key::ObjectKey;
use crate::known::KnownObjects;
use crate::observe::{Property, PropertyChange, PropertyChanges, Subscription};
use crate::queue::EventQueue;

/// Attribution for events the cache synthesizes itself.
const SOURCE: &str = "cache";

/// How long `close` waits for the consumer worker to finish the queue it is
/// on before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

/// Errors from feeding the cache.
#[derive(Debug, Snafu)]
pub enum AddError {
    /// The resource does not carry enough metadata to form a key.
    #[snafu(display("resource yields no key"))]
    InvalidKey,

    /// The cache is shutting down and no longer accepts events.
    #[snafu(display("cache is closing"))]
    Closed,
}

/// What the consumer wants done with a queue it was handed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The queue was fully processed.
    Done,

    /// Processing failed transiently; put the queue back, unless a newer
    /// queue has shown up under the same key in the meantime.
    Requeue,
}

/// Drains the event queues handed out by the cache's consumer worker.
///
/// `drain` must process the whole queue before returning. Returning an
/// error drops the queue; the worker logs it and moves on.
#[async_trait]
pub trait EventSink<T>: Send + 'static {
    async fn drain(&mut self, queue: &EventQueue<T>) -> crate::Result<Disposition>;
}

#[async_trait]
impl<T, F, Fut> EventSink<T> for F
where
    T: Send + Sync + 'static,
    F: FnMut(&EventQueue<T>) -> Fut + Send + 'static,
    Fut: Future<Output = crate::Result<Disposition>> + Send,
{
    async fn drain(&mut self, queue: &EventQueue<T>) -> crate::Result<Disposition> {
        (self)(queue).await
    }
}

struct Inner<T> {
    queues: IndexMap<ObjectKey, EventQueue<T>>,
    populated: bool,
    initial_population_count: usize,
    closing: bool,
    worker: Option<JoinHandle<()>>,
}

impl<T> Inner<T> {
    fn is_synchronized(&self) -> bool {
        self.populated && self.initial_population_count == 0
    }
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    wakeup: Notify,
    changes: PropertyChanges,
    known: Option<Arc<dyn KnownObjects<T>>>,
}

/// A cache of resource change events, one queue per key.
///
/// Cheap to clone; clones share the same underlying state.
pub struct EventQueueCache<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for EventQueueCache<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> EventQueueCache<T>
where
    T: Metadata<Ty = ObjectMeta> + Clone + Send + Sync + 'static,
{
    /// A cache that is not interested in tracking deletions of resources
    /// it no longer holds events for.
    pub fn new() -> Self {
        Self::with(None)
    }

    /// A cache backed by an externally owned view of last-observed state,
    /// consulted to derive deletions during replace and to drive
    /// synchronization.
    pub fn with_known_objects(known: Arc<dyn KnownObjects<T>>) -> Self {
        Self::with(Some(known))
    }

    fn with(known: Option<Arc<dyn KnownObjects<T>>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    queues: IndexMap::new(),
                    populated: false,
                    initial_population_count: 0,
                    closing: false,
                    worker: None,
                }),
                wakeup: Notify::new(),
                changes: PropertyChanges::new(),
                known,
            }),
        }
    }

    /// Record an observed change and mark the cache populated.
    ///
    /// Returns the queued event, or `None` when compression swallowed it.
    pub fn add(
        &self,
        source: &'static str,
        kind: EventKind,
        resource: T,
    ) -> Result<Option<Event<T>>, AddError> {
        let key = ObjectKey::from_resource(&resource).context(InvalidKeySnafu)?;
        self.insert(Event::new(source, kind, key, resource), true)
    }

    /// Queue an already-built event without marking the cache populated.
    ///
    /// Replace and synchronize feed their synthesized events through the
    /// same non-populating path, so the populated flag only ever tracks
    /// real observations and initial seeding.
    pub fn enqueue(&self, event: Event<T>) -> Result<Option<Event<T>>, AddError> {
        self.insert(event, false)
    }

    /// Reconcile the cache against an authoritative snapshot.
    ///
    /// Every incoming resource is queued as a synthesized addition. Keys
    /// that the snapshot no longer contains get a deletion: derived from
    /// the known-objects view when one is attached, otherwise from the
    /// newest event already queued under the key. The first replace marks
    /// the cache populated and starts the initial-population accounting.
    ///
    /// `resource_version` is recorded in diagnostics only.
    pub fn replace(&self, incoming: Vec<T>, resource_version: &str) -> Result<(), AddError> {
        debug!(
            message = "Replacing cache contents",
            items = incoming.len(),
            resource_version
        );

        let mut fired = Vec::new();
        {
            let mut inner = self.shared.inner.lock();
            if inner.closing {
                return Err(AddError::Closed);
            }

            let was_synchronized = inner.is_synchronized();
            let seeded = incoming.len();
            let mut replacement_keys = HashSet::with_capacity(seeded);

            for resource in incoming {
                let key = ObjectKey::from_resource(&resource).context(InvalidKeySnafu)?;
                replacement_keys.insert(key.clone());
                Self::insert_locked(
                    &mut inner,
                    Event::synthesized(SOURCE, EventKind::Addition, key, resource),
                );
            }

            let mut queued_deletions = 0;
            match &self.shared.known {
                None => {
                    // Without a known-state view, the best guess at a
                    // vanished resource's final state is the newest event
                    // queued for it. This can line up two identical
                    // deletions back to back; queue compression absorbs the
                    // duplicate, so nothing is pre-filtered here.
                    let deletions = inner
                        .queues
                        .values()
                        .filter(|queue| !replacement_keys.contains(queue.key()))
                        .filter_map(|queue| {
                            queue.last().map(|newest| {
                                Event::new(
                                    SOURCE,
                                    EventKind::Deletion,
                                    queue.key().clone(),
                                    newest.resource.clone(),
                                )
                            })
                        })
                        .collect::<Vec<_>>();

                    for event in deletions {
                        Self::insert_locked(&mut inner, event);
                    }
                }
                Some(known) => {
                    for (key, resource) in known.entries() {
                        if !replacement_keys.contains(&key) {
                            Self::insert_locked(
                                &mut inner,
                                Event::new(SOURCE, EventKind::Deletion, key, resource),
                            );
                            queued_deletions += 1;
                        }
                    }
                }
            }

            if !inner.populated {
                inner.populated = true;
                fired.push(PropertyChange::Populated {
                    from: false,
                    to: true,
                });

                let from = inner.initial_population_count;
                inner.initial_population_count = seeded + queued_deletions;
                fired.push(PropertyChange::InitialPopulationCount {
                    from,
                    to: inner.initial_population_count,
                });

                if inner.initial_population_count == 0 {
                    fired.push(PropertyChange::Synchronized {
                        from: was_synchronized,
                        to: true,
                    });
                }
            }

            self.shared.wakeup.notify_waiters();
        }

        self.shared.changes.publish(fired);
        Ok(())
    }

    /// Re-emit known state for every key the consumer has caught up on.
    ///
    /// A key with pending events already has fresher state queued, so
    /// layering a synchronization on top would be redundant; those keys
    /// are left alone. No-op without a known-objects view.
    pub fn synchronize(&self) -> Result<(), AddError> {
        let Some(known) = &self.shared.known else {
            return Ok(());
        };

        let mut inner = self.shared.inner.lock();
        if inner.closing {
            return Err(AddError::Closed);
        }

        for (_, resource) in known.entries() {
            // The queue index is keyed by our own extraction, not by
            // whatever the view used, so re-derive the key here.
            let Some(key) = ObjectKey::from_resource(&resource) else {
                continue;
            };

            let pending = inner
                .queues
                .get(&key)
                .map_or(false, |queue| !queue.is_empty());
            if pending {
                continue;
            }

            Self::insert_locked(
                &mut inner,
                Event::synthesized(SOURCE, EventKind::Modification, key, resource),
            );
        }

        self.shared.wakeup.notify_waiters();
        Ok(())
    }

    /// Remove and return the oldest queue, waiting for one to show up.
    ///
    /// Returns `None` only once the cache is closing and nothing is left
    /// to drain.
    pub async fn take(&self) -> Option<EventQueue<T>> {
        loop {
            let notified = self.shared.wakeup.notified();
            tokio::pin!(notified);

            let mut fired = Vec::new();
            let taken = {
                let mut inner = self.shared.inner.lock();
                match inner.queues.shift_remove_index(0) {
                    Some((_, queue)) => {
                        if inner.initial_population_count > 0 {
                            let from = inner.initial_population_count;
                            inner.initial_population_count = from - 1;
                            fired.push(PropertyChange::InitialPopulationCount {
                                from,
                                to: from - 1,
                            });
                            fired.push(PropertyChange::Synchronized {
                                from: false,
                                to: inner.is_synchronized(),
                            });
                        }
                        fired.push(PropertyChange::Empty {
                            from: false,
                            to: inner.queues.is_empty(),
                        });
                        Some(queue)
                    }
                    None => {
                        if inner.closing {
                            return None;
                        }
                        notified.as_mut().enable();
                        None
                    }
                }
            };

            match taken {
                Some(queue) => {
                    self.shared.changes.publish(fired);
                    counter!("cache_queues_taken_total", 1);
                    return Some(queue);
                }
                None => notified.await,
            }
        }
    }

    /// Attach the consumer worker.
    ///
    /// Idempotent: only one worker runs at a time. Also re-arms a cache
    /// that was previously closed, so additions are accepted again.
    pub fn start<S>(&self, sink: S)
    where
        S: EventSink<T>,
    {
        let mut inner = self.shared.inner.lock();
        inner.closing = false;

        if inner.worker.as_ref().map_or(false, |w| !w.is_finished()) {
            return;
        }

        let cache = self.clone();
        inner.worker = Some(tokio::spawn(async move { cache.consume(sink).await }));
    }

    async fn consume<S>(self, mut sink: S)
    where
        S: EventSink<T>,
    {
        while let Some(queue) = self.take().await {
            match sink.drain(&queue).await {
                Ok(Disposition::Done) => {}
                Ok(Disposition::Requeue) => self.requeue(queue),
                Err(err) => {
                    error!(
                        message = "Event sink failed, dropping queue",
                        key = %queue.key(),
                        %err
                    );
                }
            }
        }

        debug!(message = "Consumer worker stopped");
    }

    /// Put a queue back after a transient sink failure. A queue that
    /// arrived for the same key in the meantime wins.
    fn requeue(&self, queue: EventQueue<T>) {
        let mut inner = self.shared.inner.lock();
        if !inner.queues.contains_key(queue.key()) {
            inner.queues.insert(queue.key().clone(), queue);
            self.shared.wakeup.notify_waiters();
            counter!("cache_requeues_total", 1);
        }
    }

    /// Detach the consumer and stop accepting events.
    ///
    /// The worker gets a bounded grace period to finish the queue it is
    /// draining, then is aborted. A subsequent `start` re-enables the
    /// cache.
    pub async fn close(&self) {
        let worker = {
            let mut inner = self.shared.inner.lock();
            inner.closing = true;
            inner.worker.take()
        };
        self.shared.wakeup.notify_waiters();

        if let Some(mut worker) = worker {
            if timeout(SHUTDOWN_GRACE, &mut worker).await.is_err() {
                warn!(message = "Consumer worker outlived the grace period, aborting");
                worker.abort();
            }
        }
    }

    /// True once a replace or addition has happened.
    pub fn is_populated(&self) -> bool {
        self.shared.inner.lock().populated
    }

    /// True once the queues seeded by the first replace have all been
    /// taken.
    pub fn is_synchronized(&self) -> bool {
        self.shared.inner.lock().is_synchronized()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.inner.lock().queues.is_empty()
    }

    /// Keys of the queues currently pending, in take order.
    pub fn keys(&self) -> Vec<ObjectKey> {
        self.shared.inner.lock().queues.keys().cloned().collect()
    }

    /// Visit every pending queue in take order, under the cache lock.
    ///
    /// `visit` must not call back into the cache.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&EventQueue<T>),
    {
        for queue in self.shared.inner.lock().queues.values() {
            visit(queue);
        }
    }

    /// Subscribe to every bound-property transition.
    pub fn subscribe(&self) -> Subscription {
        self.shared.changes.subscribe(None)
    }

    /// Subscribe to transitions of a single bound property.
    pub fn subscribe_property(&self, property: Property) -> Subscription {
        self.shared.changes.subscribe(Some(property))
    }

    fn insert(&self, event: Event<T>, populate: bool) -> Result<Option<Event<T>>, AddError> {
        let mut fired = Vec::new();
        let returned = {
            let mut inner = self.shared.inner.lock();
            if inner.closing {
                return Err(AddError::Closed);
            }

            if populate && !inner.populated {
                inner.populated = true;
                fired.push(PropertyChange::Populated {
                    from: false,
                    to: true,
                });
            }

            let returned = Self::insert_locked(&mut inner, event);
            self.shared.wakeup.notify_waiters();
            returned
        };

        self.shared.changes.publish(fired);
        if returned.is_some() {
            counter!("cache_events_total", 1);
        }

        Ok(returned)
    }

    fn insert_locked(inner: &mut Inner<T>, event: Event<T>) -> Option<Event<T>> {
        let key = event.key.clone();

        if let Some(queue) = inner.queues.get_mut(&key) {
            let accepted = queue.add_event(event);
            let returned = if accepted { queue.last().cloned() } else { None };
            if queue.is_empty() {
                // Compression can erase a queue outright; an empty queue
                // must never be left visible to take.
                inner.queues.shift_remove(&key);
                return None;
            }
            returned
        } else {
            let mut queue = EventQueue::new(key.clone());
            let accepted = queue.add_event(event);
            if queue.is_empty() {
                return None;
            }
            let returned = if accepted { queue.last().cloned() } else { None };
            inner.queues.insert(key, queue);
            returned
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use k8s_openapi::api::core::v1::Pod;
    use parking_lot::RwLock;
    use tokio::sync::mpsc;

    use super::*;
    use crate::known::SharedObjects;

    fn pod(name: &str, version: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some("default".to_owned()),
                resource_version: Some(version.to_owned()),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        }
    }

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new(Some("default".into()), name)
    }

    fn known(pods: &[Pod]) -> SharedObjects<Pod> {
        let map = pods
            .iter()
            .map(|pod| (ObjectKey::from_resource(pod).unwrap(), pod.clone()))
            .collect::<HashMap<_, _>>();
        Arc::new(RwLock::new(map))
    }

    struct CollectingSink {
        drained: mpsc::UnboundedSender<ObjectKey>,
    }

    #[async_trait]
    impl EventSink<Pod> for CollectingSink {
        async fn drain(&mut self, queue: &EventQueue<Pod>) -> crate::Result<Disposition> {
            self.drained.send(queue.key().clone()).ok();
            Ok(Disposition::Done)
        }
    }

    #[tokio::test]
    async fn empty_replace_synchronizes_immediately() {
        let cache = EventQueueCache::<Pod>::new();
        cache.replace(Vec::new(), "v1").unwrap();

        assert!(cache.is_populated());
        assert!(cache.is_synchronized());

        let pending = timeout(Duration::from_millis(50), cache.take()).await;
        assert!(pending.is_err(), "take should block while nothing is queued");

        cache.close().await;
        assert!(cache.take().await.is_none());
    }

    #[tokio::test]
    async fn seed_and_drain_reports_synchronized() {
        let cache = EventQueueCache::new();
        let mut counts = cache.subscribe_property(Property::InitialPopulationCount);
        let mut synchronized = cache.subscribe_property(Property::Synchronized);

        cache
            .replace(vec![pod("a", "v1"), pod("b", "v1")], "v1")
            .unwrap();
        assert!(cache.is_populated());
        assert!(!cache.is_synchronized());
        assert_eq!(
            counts.recv().await,
            Some(PropertyChange::InitialPopulationCount { from: 0, to: 2 })
        );

        let first = cache.take().await.unwrap();
        assert_eq!(first.key(), &key("a"));
        assert_eq!(first.len(), 1);
        let event = first.last().unwrap();
        assert!(event.synthetic);
        assert_eq!(event.kind, EventKind::Addition);

        let second = cache.take().await.unwrap();
        assert_eq!(second.key(), &key("b"));

        assert_eq!(
            counts.recv().await,
            Some(PropertyChange::InitialPopulationCount { from: 2, to: 1 })
        );
        assert_eq!(
            counts.recv().await,
            Some(PropertyChange::InitialPopulationCount { from: 1, to: 0 })
        );
        assert_eq!(
            synchronized.recv().await,
            Some(PropertyChange::Synchronized {
                from: false,
                to: true
            })
        );
        assert!(cache.is_synchronized());
    }

    #[tokio::test]
    async fn addition_then_deletion_is_delivered_once() {
        let cache = EventQueueCache::new();
        cache
            .add("test", EventKind::Addition, pod("a", "v1"))
            .unwrap();
        cache
            .add("test", EventKind::Deletion, pod("a", "v1"))
            .unwrap();

        let queue = cache.take().await.unwrap();
        assert_eq!(queue.key(), &key("a"));
        assert_eq!(queue.last().unwrap().kind, EventKind::Deletion);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn replace_derives_deletions_from_known_objects() {
        let objects = known(&[pod("a", "v1"), pod("b", "v1")]);
        let cache = EventQueueCache::with_known_objects(objects);
        let mut counts = cache.subscribe_property(Property::InitialPopulationCount);

        cache.replace(vec![pod("a", "v2")], "v2").unwrap();
        assert_eq!(
            counts.recv().await,
            Some(PropertyChange::InitialPopulationCount { from: 0, to: 2 })
        );

        let first = cache.take().await.unwrap();
        assert_eq!(first.key(), &key("a"));
        let event = first.last().unwrap();
        assert!(event.synthetic);
        assert_eq!(event.kind, EventKind::Addition);
        assert_eq!(
            event.resource.metadata.resource_version.as_deref(),
            Some("v2")
        );

        let second = cache.take().await.unwrap();
        assert_eq!(second.key(), &key("b"));
        assert_eq!(second.last().unwrap().kind, EventKind::Deletion);

        assert!(cache.is_synchronized());
    }

    #[tokio::test]
    async fn replace_without_known_objects_deletes_mapped_strays() {
        let cache = EventQueueCache::new();
        cache
            .add("test", EventKind::Addition, pod("stale", "v1"))
            .unwrap();

        cache.replace(vec![pod("fresh", "v2")], "v2").unwrap();

        let stray = cache.take().await.unwrap();
        assert_eq!(stray.key(), &key("stale"));
        assert_eq!(stray.last().unwrap().kind, EventKind::Deletion);
    }

    #[tokio::test]
    async fn synchronize_skips_pending_queues() {
        let objects = known(&[pod("a", "v1"), pod("b", "v1")]);
        let cache = EventQueueCache::with_known_objects(objects);

        cache
            .add("test", EventKind::Modification, pod("a", "v2"))
            .unwrap();
        cache.synchronize().unwrap();

        let first = cache.take().await.unwrap();
        assert_eq!(first.key(), &key("a"));
        assert_eq!(first.len(), 1);
        assert!(!first.last().unwrap().synthetic);

        let second = cache.take().await.unwrap();
        assert_eq!(second.key(), &key("b"));
        let event = second.last().unwrap();
        assert!(event.synthetic);
        assert_eq!(event.kind, EventKind::Modification);
    }

    #[tokio::test]
    async fn requeue_yields_to_newer_queue() {
        let cache = EventQueueCache::new();
        cache
            .add("test", EventKind::Addition, pod("a", "v1"))
            .unwrap();

        let taken = cache.take().await.unwrap();

        // A fresh event for the same key lands before the requeue.
        cache
            .add("test", EventKind::Modification, pod("a", "v3"))
            .unwrap();
        cache.requeue(taken);

        let queue = cache.take().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.last().unwrap().kind, EventKind::Modification);

        let pending = timeout(Duration::from_millis(50), cache.take()).await;
        assert!(pending.is_err(), "the stale queue must have been dropped");
    }

    #[tokio::test]
    async fn transient_sink_failure_requeues() {
        struct FlakySink {
            attempts: Arc<AtomicUsize>,
            drained: mpsc::UnboundedSender<ObjectKey>,
        }

        #[async_trait]
        impl EventSink<Pod> for FlakySink {
            async fn drain(&mut self, queue: &EventQueue<Pod>) -> crate::Result<Disposition> {
                if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Ok(Disposition::Requeue);
                }
                self.drained.send(queue.key().clone()).ok();
                Ok(Disposition::Done)
            }
        }

        let cache = EventQueueCache::new();
        let (drained, mut observed) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicUsize::new(0));
        cache.start(FlakySink {
            attempts: attempts.clone(),
            drained,
        });

        cache
            .add("test", EventKind::Addition, pod("a", "v1"))
            .unwrap();

        assert_eq!(observed.recv().await, Some(key("a")));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        cache.close().await;
    }

    #[tokio::test]
    async fn sink_errors_do_not_stop_the_worker() {
        struct FailingSink {
            drained: mpsc::UnboundedSender<ObjectKey>,
        }

        #[async_trait]
        impl EventSink<Pod> for FailingSink {
            async fn drain(&mut self, queue: &EventQueue<Pod>) -> crate::Result<Disposition> {
                if queue.key().name == "poison" {
                    return Err("sink exploded".into());
                }
                self.drained.send(queue.key().clone()).ok();
                Ok(Disposition::Done)
            }
        }

        let cache = EventQueueCache::new();
        let (drained, mut observed) = mpsc::unbounded_channel();
        cache.start(FailingSink { drained });

        cache
            .add("test", EventKind::Addition, pod("poison", "v1"))
            .unwrap();
        cache
            .add("test", EventKind::Addition, pod("a", "v1"))
            .unwrap();

        assert_eq!(observed.recv().await, Some(key("a")));
        cache.close().await;
    }

    #[tokio::test]
    async fn restart_after_close() {
        let cache = EventQueueCache::new();
        let (drained, mut observed) = mpsc::unbounded_channel();

        cache.close().await;
        assert!(matches!(
            cache.add("test", EventKind::Addition, pod("a", "v1")),
            Err(AddError::Closed)
        ));

        cache.start(CollectingSink { drained });
        cache
            .add("test", EventKind::Addition, pod("a", "v2"))
            .unwrap();

        assert_eq!(observed.recv().await, Some(key("a")));
        cache.close().await;
    }

    #[tokio::test]
    async fn add_without_key_is_rejected() {
        let cache = EventQueueCache::new();
        assert!(matches!(
            cache.add("test", EventKind::Addition, Pod::default()),
            Err(AddError::InvalidKey)
        ));
    }

    #[tokio::test]
    async fn events_for_a_key_stay_ordered() {
        let cache = EventQueueCache::new();
        cache
            .add("test", EventKind::Addition, pod("a", "v1"))
            .unwrap();
        cache
            .add("test", EventKind::Modification, pod("a", "v2"))
            .unwrap();
        cache
            .add("test", EventKind::Modification, pod("a", "v3"))
            .unwrap();

        let queue = cache.take().await.unwrap();
        let versions = queue
            .iter()
            .map(|event| {
                event
                    .resource
                    .metadata
                    .resource_version
                    .clone()
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>();

        assert_eq!(versions, vec!["v1", "v2", "v3"]);
    }

    #[tokio::test]
    async fn queues_are_taken_in_first_insertion_order() {
        let cache = EventQueueCache::new();
        cache
            .add("test", EventKind::Addition, pod("a", "v1"))
            .unwrap();
        cache
            .add("test", EventKind::Addition, pod("b", "v1"))
            .unwrap();
        cache
            .add("test", EventKind::Modification, pod("a", "v2"))
            .unwrap();

        assert_eq!(cache.take().await.unwrap().key(), &key("a"));
        assert_eq!(cache.take().await.unwrap().key(), &key("b"));
    }

    #[tokio::test]
    async fn exposes_pending_queues() {
        let cache = EventQueueCache::new();
        cache
            .add("test", EventKind::Addition, pod("a", "v1"))
            .unwrap();
        cache
            .add("test", EventKind::Addition, pod("b", "v1"))
            .unwrap();

        assert_eq!(cache.keys(), vec![key("a"), key("b")]);

        let mut seen = Vec::new();
        cache.for_each(|queue| seen.push((queue.key().clone(), queue.len())));
        assert_eq!(seen, vec![(key("a"), 1), (key("b"), 1)]);
    }

    #[tokio::test]
    async fn enqueue_does_not_populate() {
        let cache = EventQueueCache::new();
        let event = Event::new("test", EventKind::Modification, key("a"), pod("a", "v1"));

        cache.enqueue(event).unwrap();
        assert!(!cache.is_populated());

        let queue = cache.take().await.unwrap();
        assert_eq!(queue.key(), &key("a"));
    }
}
