//! Pulls resource state out of the remote store and into the event cache.
//!
//! Starting a reflector lists the store, seeds the cache with a replace,
//! schedules periodic cache synchronization, and opens a long-lived watch
//! whose notifications become cache additions. An abnormally closed watch
//! is rebuilt from a fresh list under exponential backoff, so the cache
//! eventually reflects the remote state again after any disconnect.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::Metadata;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::backoff::ExponentialBackoff;
use crate::cache::{AddError, EventQueueCache};
use crate::event::EventKind;
use crate::list_watch::{ListWatch, WatchNotification};

/// Attribution for events fed in off the watch stream.
const SOURCE: &str = "reflector";

/// How many consecutive failed rebuilds the watch driver tolerates before
/// giving up.
const REBUILD_ATTEMPTS: usize = 8;

#[derive(Default)]
struct Tasks {
    watch: Option<JoinHandle<()>>,
    resync: Option<JoinHandle<()>>,
}

/// The list+watch driver feeding an [`EventQueueCache`].
pub struct Reflector<L, T> {
    list_watch: Arc<L>,
    cache: EventQueueCache<T>,
    resync_interval: Option<Duration>,
    on_resync_error: Arc<dyn Fn(&AddError) -> bool + Send + Sync>,
    tasks: Arc<Mutex<Tasks>>,
    last_resource_version: Arc<Mutex<Option<String>>>,
}

impl<L, T> Reflector<L, T>
where
    L: ListWatch<T>,
    T: Metadata<Ty = ObjectMeta> + Clone + Send + Sync + 'static,
{
    pub fn new(list_watch: L, cache: EventQueueCache<T>) -> Self {
        Self {
            list_watch: Arc::new(list_watch),
            cache,
            resync_interval: None,
            on_resync_error: Arc::new(|err| {
                error!(message = "Periodic synchronization failed", %err);
                true
            }),
            tasks: Arc::new(Mutex::new(Tasks::default())),
            last_resource_version: Arc::new(Mutex::new(None)),
        }
    }

    /// Synchronize the cache on this period. Zero disables resync.
    pub fn with_resync_interval(mut self, period: Duration) -> Self {
        self.resync_interval = Some(period);
        self
    }

    /// Decide whether a failed periodic synchronization is survivable.
    /// Returning false stops the resync schedule. The default logs the
    /// failure and keeps going.
    pub fn with_resync_error_policy<F>(mut self, policy: F) -> Self
    where
        F: Fn(&AddError) -> bool + Send + Sync + 'static,
    {
        self.on_resync_error = Arc::new(policy);
        self
    }

    /// List, seed the cache, schedule resynchronization, and open the
    /// watch.
    ///
    /// Returns once the watch driver is running. A list or watch failure
    /// propagates to the caller with nothing left running, so the call can
    /// simply be retried.
    pub async fn start(&self) -> crate::Result<()> {
        // A driver left over from an earlier start is replaced wholesale.
        if let Some(watch) = self.tasks.lock().watch.take() {
            watch.abort();
        }

        let list = self.list_watch.list("0").await?;
        let resource_version = list.resource_version;
        info!(
            message = "Seeding cache from list",
            items = list.items.len(),
            %resource_version
        );

        self.cache.replace(list.items, &resource_version)?;
        *self.last_resource_version.lock() = Some(resource_version.clone());

        self.schedule_resync();

        let stream = match self.list_watch.watch(&resource_version).await {
            Ok(stream) => stream,
            Err(err) => {
                self.cancel_resync();
                return Err(err);
            }
        };

        let task = tokio::spawn(drive(
            Arc::clone(&self.list_watch),
            self.cache.clone(),
            Arc::clone(&self.last_resource_version),
            Arc::clone(&self.tasks),
            stream,
        ));
        self.tasks.lock().watch = Some(task);

        Ok(())
    }

    /// The resource version of the newest list or watch observation.
    pub fn last_resource_version(&self) -> Option<String> {
        self.last_resource_version.lock().clone()
    }

    /// Stop the resync schedule and the watch driver.
    pub fn close(&self) {
        self.cancel_resync();
        if let Some(watch) = self.tasks.lock().watch.take() {
            watch.abort();
        }
    }

    fn schedule_resync(&self) {
        let Some(period) = self.resync_interval.filter(|period| !period.is_zero()) else {
            return;
        };

        let mut tasks = self.tasks.lock();
        if tasks.resync.as_ref().map_or(false, |task| !task.is_finished()) {
            return;
        }

        info!(message = "Scheduling cache synchronization", ?period);
        let cache = self.cache.clone();
        let on_error = Arc::clone(&self.on_resync_error);

        tasks.resync = Some(tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticks.tick().await;
                trace!(message = "Synchronizing cache with its known objects");

                match cache.synchronize() {
                    Ok(()) => counter!("reflector_resyncs_total", 1),
                    Err(err) => {
                        if !(on_error)(&err) {
                            error!(message = "Stopping periodic synchronization", %err);
                            break;
                        }
                    }
                }
            }
        }));
    }

    fn cancel_resync(&self) {
        stop_resync(&self.tasks);
    }
}

fn stop_resync(tasks: &Mutex<Tasks>) {
    if let Some(task) = tasks.lock().resync.take() {
        task.abort();
    }
}

impl<L, T> Drop for Reflector<L, T> {
    fn drop(&mut self) {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.resync.take() {
            task.abort();
        }
        if let Some(task) = tasks.watch.take() {
            task.abort();
        }
    }
}

enum StreamEnd {
    Clean,
    Abnormal,
}

/// The long-lived watch driver: consume the stream, and rebuild it from a
/// fresh list whenever it ends abnormally.
async fn drive<L, T>(
    list_watch: Arc<L>,
    cache: EventQueueCache<T>,
    last_resource_version: Arc<Mutex<Option<String>>>,
    tasks: Arc<Mutex<Tasks>>,
    stream: L::Stream,
) where
    L: ListWatch<T>,
    T: Metadata<Ty = ObjectMeta> + Clone + Send + Sync + 'static,
{
    let mut stream = Some(stream);
    let mut backoff = ExponentialBackoff::from_millis(500, Duration::from_secs(30));
    let mut failures = 0;

    loop {
        let watch = match stream.take() {
            Some(watch) => watch,
            None => match rebuild(list_watch.as_ref(), &cache, &last_resource_version).await {
                Ok(watch) => watch,
                Err(err) => {
                    failures += 1;
                    if failures >= REBUILD_ATTEMPTS {
                        error!(
                            message = "Giving up rebuilding the watch",
                            attempts = failures,
                            %err
                        );
                        // Reflection has stopped; the heartbeat must not
                        // keep firing into a cache nothing feeds.
                        stop_resync(&tasks);
                        return;
                    }

                    let delay = backoff.next().unwrap_or(Duration::from_secs(30));
                    warn!(
                        message = "Rebuilding watch failed, backing off",
                        %err,
                        ?delay
                    );
                    sleep(delay).await;
                    continue;
                }
            },
        };

        failures = 0;
        backoff.reset();

        match consume(watch, &cache, &last_resource_version).await {
            StreamEnd::Clean => {
                debug!(message = "Watch stream closed");
                stop_resync(&tasks);
                return;
            }
            StreamEnd::Abnormal => {
                counter!("reflector_watch_restarts_total", 1);
                // Leave `stream` empty so the next turn re-lists.
            }
        }
    }
}

async fn consume<S, T>(
    mut stream: S,
    cache: &EventQueueCache<T>,
    last_resource_version: &Mutex<Option<String>>,
) -> StreamEnd
where
    S: futures::Stream<Item = crate::Result<WatchNotification<T>>> + Unpin,
    T: Metadata<Ty = ObjectMeta> + Clone + Send + Sync + 'static,
{
    while let Some(item) = stream.next().await {
        match item {
            Ok(notification) => {
                let (kind, resource) = match notification {
                    WatchNotification::Added(resource) => (EventKind::Addition, resource),
                    WatchNotification::Modified(resource) => (EventKind::Modification, resource),
                    WatchNotification::Deleted(resource) => (EventKind::Deletion, resource),
                    WatchNotification::Error(status) => {
                        warn!(message = "Watch reported an error status", %status);
                        return StreamEnd::Abnormal;
                    }
                };

                let version = resource.metadata().resource_version.clone();
                if let Err(err) = cache.add(SOURCE, kind, resource) {
                    warn!(message = "Cache rejected watch event", %err);
                    return StreamEnd::Abnormal;
                }

                if let Some(version) = version {
                    *last_resource_version.lock() = Some(version);
                }
                counter!("reflector_events_total", 1);
            }
            Err(err) => {
                warn!(message = "Watch transport failed", %err);
                counter!("reflector_watch_errors_total", 1);
                return StreamEnd::Abnormal;
            }
        }
    }

    StreamEnd::Clean
}

async fn rebuild<L, T>(
    list_watch: &L,
    cache: &EventQueueCache<T>,
    last_resource_version: &Mutex<Option<String>>,
) -> crate::Result<L::Stream>
where
    L: ListWatch<T>,
    T: Metadata<Ty = ObjectMeta> + Clone + Send + Sync + 'static,
{
    let list = list_watch.list("0").await?;
    let resource_version = list.resource_version;
    debug!(
        message = "Re-listed after abnormal watch close",
        items = list.items.len(),
        %resource_version
    );

    cache.replace(list.items, &resource_version)?;
    *last_resource_version.lock() = Some(resource_version.clone());
    counter!("reflector_relists_total", 1);

    list_watch.watch(&resource_version).await
}
