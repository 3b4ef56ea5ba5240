//! Bound-property change notifications.
//!
//! The cache exposes a handful of observable properties that track the
//! initial-load drain. Subscribers register against one property or all of
//! them; only real transitions are delivered, and publishing happens after
//! the cache lock is released so a slow listener can never wedge the cache.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const CAPACITY: usize = 64;

/// The observable cache properties.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Property {
    Populated,
    InitialPopulationCount,
    Synchronized,
    Empty,
}

/// One observed transition of a bound property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyChange {
    Populated { from: bool, to: bool },
    InitialPopulationCount { from: usize, to: usize },
    Synchronized { from: bool, to: bool },
    Empty { from: bool, to: bool },
}

impl PropertyChange {
    pub fn property(&self) -> Property {
        match self {
            PropertyChange::Populated { .. } => Property::Populated,
            PropertyChange::InitialPopulationCount { .. } => Property::InitialPopulationCount,
            PropertyChange::Synchronized { .. } => Property::Synchronized,
            PropertyChange::Empty { .. } => Property::Empty,
        }
    }

    fn is_transition(&self) -> bool {
        match self {
            PropertyChange::Populated { from, to } => from != to,
            PropertyChange::InitialPopulationCount { from, to } => from != to,
            PropertyChange::Synchronized { from, to } => from != to,
            PropertyChange::Empty { from, to } => from != to,
        }
    }
}

/// The registry the cache publishes through.
pub(crate) struct PropertyChanges {
    sender: broadcast::Sender<PropertyChange>,
}

impl PropertyChanges {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(CAPACITY);
        Self { sender }
    }

    pub(crate) fn subscribe(&self, filter: Option<Property>) -> Subscription {
        Subscription {
            filter,
            receiver: self.sender.subscribe(),
        }
    }

    /// Deliver every real transition in the batch. Must be called without
    /// the cache lock held.
    pub(crate) fn publish(&self, changes: Vec<PropertyChange>) {
        for change in changes {
            if change.is_transition() {
                // Send only fails when nobody is listening, which is fine.
                let _ = self.sender.send(change);
            }
        }
    }
}

/// A live property-change subscription.
pub struct Subscription {
    filter: Option<Property>,
    receiver: broadcast::Receiver<PropertyChange>,
}

impl Subscription {
    /// Receive the next matching transition.
    ///
    /// Returns `None` once the cache is gone. A subscriber that lags far
    /// enough behind to be overrun skips the overwritten transitions.
    pub async fn recv(&mut self) -> Option<PropertyChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => {
                    if self.filter.map_or(true, |p| change.property() == p) {
                        return Some(change);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    debug!(message = "Property subscriber lagging", missed);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn filters_by_property() {
        let changes = PropertyChanges::new();
        let mut subscription = changes.subscribe(Some(Property::Synchronized));

        changes.publish(vec![
            PropertyChange::Populated { from: false, to: true },
            PropertyChange::InitialPopulationCount { from: 2, to: 1 },
            PropertyChange::Synchronized { from: false, to: true },
        ]);

        assert_eq!(
            subscription.recv().await,
            Some(PropertyChange::Synchronized {
                from: false,
                to: true
            })
        );
    }

    #[tokio::test]
    async fn suppresses_non_transitions() {
        let changes = PropertyChanges::new();
        let mut subscription = changes.subscribe(None);

        changes.publish(vec![
            PropertyChange::Synchronized {
                from: false,
                to: false,
            },
            PropertyChange::Empty { from: false, to: true },
        ]);

        assert_eq!(
            subscription.recv().await,
            Some(PropertyChange::Empty { from: false, to: true })
        );
    }

    #[tokio::test]
    async fn ends_with_the_publisher() {
        let changes = PropertyChanges::new();
        let mut subscription = changes.subscribe(None);
        drop(changes);

        assert_eq!(subscription.recv().await, None);
    }
}
