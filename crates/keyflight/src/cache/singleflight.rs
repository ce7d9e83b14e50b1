//! Single-flight table for de-duplicating concurrent computations per key.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::CacheError;

/// Outcome broadcast to every waiter of one flight.
pub(crate) type FlightResult<V> = Result<V, CacheError>;

/// Result of trying to acquire a single-flight slot.
pub(crate) enum FlightSlot<V> {
    /// We won the race and must run the computation.
    /// Contains the sender to broadcast results.
    Leader(broadcast::Sender<FlightResult<V>>),
    /// Another task is computing; wait for its result.
    Follower(broadcast::Receiver<FlightResult<V>>),
}

/// Map of in-flight computations to their broadcast senders.
///
/// A leader must remove its slot (via [`Singleflight::complete`]) *before*
/// sending the result. Followers subscribe while holding the map's shard lock,
/// so any follower that found the slot is subscribed before the send.
pub(crate) struct Singleflight<V> {
    in_flight: DashMap<String, broadcast::Sender<FlightResult<V>>>,
}

impl<V: Clone> Singleflight<V> {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }

    /// Atomically try to acquire a slot for this key.
    ///
    /// Returns `Leader` if this caller should run the computation,
    /// or `Follower` if another caller is already running it.
    pub fn acquire(&self, key: &str) -> FlightSlot<V> {
        use dashmap::mapref::entry::Entry;

        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => FlightSlot::Follower(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                FlightSlot::Leader(tx)
            }
        }
    }

    /// Remove a completed in-flight computation.
    pub fn complete(&self, key: &str) {
        self.in_flight.remove(key);
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }
}

/// Guard that releases a flight slot even if the computation panics.
///
/// Dropping the guard (and the leader's sender with it) makes waiting
/// followers observe a closed channel instead of hanging.
pub(crate) struct FlightGuard<V: Clone> {
    flights: Arc<Singleflight<V>>,
    key: String,
    completed: bool,
}

impl<V: Clone> FlightGuard<V> {
    pub fn new(flights: Arc<Singleflight<V>>, key: String) -> Self {
        Self {
            flights,
            key,
            completed: false,
        }
    }

    /// Mark as completed (normal path, not panic).
    pub fn complete(mut self) {
        self.flights.complete(&self.key);
        self.completed = true;
    }
}

impl<V: Clone> Drop for FlightGuard<V> {
    fn drop(&mut self) {
        if !self.completed {
            self.flights.complete(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_follows() {
        let flights: Singleflight<u32> = Singleflight::new();

        let FlightSlot::Leader(tx) = flights.acquire("k") else {
            panic!("first acquire must lead");
        };
        let FlightSlot::Follower(mut rx) = flights.acquire("k") else {
            panic!("second acquire must follow");
        };
        assert_eq!(flights.len(), 1);

        flights.complete("k");
        tx.send(Ok(7)).unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap(), 7);
        assert_eq!(flights.len(), 0);
    }

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let flights = Arc::new(Singleflight::<u32>::new());
        let FlightSlot::Leader(tx) = flights.acquire("k") else {
            panic!("first acquire must lead");
        };
        let FlightSlot::Follower(mut rx) = flights.acquire("k") else {
            panic!("second acquire must follow");
        };

        {
            let _guard = FlightGuard::new(Arc::clone(&flights), "k".to_string());
        }
        drop(tx);

        assert_eq!(flights.len(), 0);
        assert!(rx.recv().await.is_err());
        assert!(matches!(flights.acquire("k"), FlightSlot::Leader(_)));
    }
}
