//! Single-flight table: at most one backend fetch per (bucket id, key).
//!
//! The first caller to miss becomes the leader and registers a flight;
//! everyone arriving while it is registered subscribes to the same outcome.
//! The leader's task removes the flight before publishing, so a caller that
//! finds no flight either sees the stored entry or starts a new fetch.

use crate::cache::CacheEntry;
use crate::error::{GatewayError, Result};
use crate::resolver::BucketId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

pub(crate) type FlightOutcome = Result<CacheEntry>;

type FlightKey = (BucketId, String);
type Slot = watch::Receiver<Option<Arc<FlightOutcome>>>;

/// What a caller should do about a missing or stale key.
pub(crate) enum Flight {
    /// Someone else is fetching; wait on their outcome.
    Join(Slot),
    /// This caller leads the fetch and must publish through the guard.
    Lead(FlightGuard, Slot),
    /// A flight finished while we were deciding and left a fresh entry.
    Fresh(CacheEntry),
}

#[derive(Default)]
pub(crate) struct FlightTable {
    flights: Mutex<HashMap<FlightKey, Slot>>,
}

impl FlightTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<FlightKey, Slot>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the in-flight fetch for a key, or become its leader.
    ///
    /// `recheck` runs under the table lock when no flight exists; returning a
    /// fresh entry short-circuits the fetch.
    pub(crate) fn join_or_lead(
        self: &Arc<Self>,
        bucket: &BucketId,
        key: &str,
        recheck: impl FnOnce() -> Result<Option<CacheEntry>>,
    ) -> Result<Flight> {
        let mut flights = self.lock();
        let flight_key = (bucket.clone(), key.to_string());
        if let Some(slot) = flights.get(&flight_key) {
            return Ok(Flight::Join(slot.clone()));
        }
        if let Some(entry) = recheck()? {
            return Ok(Flight::Fresh(entry));
        }

        let (tx, rx) = watch::channel(None);
        flights.insert(flight_key.clone(), rx.clone());
        Ok(Flight::Lead(
            FlightGuard {
                table: Arc::clone(self),
                key: flight_key,
                tx: Some(tx),
            },
            rx,
        ))
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn remove(&self, key: &FlightKey) {
        self.lock().remove(key);
    }
}

/// Leader's handle on a registered flight.
///
/// Dropping it without publishing (the fetch task panicked or was aborted)
/// still removes the flight, and waiters see the channel close.
pub(crate) struct FlightGuard {
    table: Arc<FlightTable>,
    key: FlightKey,
    tx: Option<watch::Sender<Option<Arc<FlightOutcome>>>>,
}

impl FlightGuard {
    /// Unregister the flight, then hand the outcome to every waiter.
    pub(crate) fn publish(mut self, outcome: FlightOutcome) {
        self.table.remove(&self.key);
        if let Some(tx) = self.tx.take() {
            // No receivers left is fine: every caller gave up.
            let _ = tx.send(Some(Arc::new(outcome)));
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.table.remove(&self.key);
        }
    }
}

/// Wait for a flight's outcome. Errors are duplicated per waiter.
pub(crate) async fn wait(mut slot: Slot) -> Result<CacheEntry> {
    let outcome = {
        let published = slot
            .wait_for(|outcome| outcome.is_some())
            .await
            .map_err(|_| GatewayError::Other("cache fill ended without a result".to_string()))?;
        published.as_ref().map(Arc::clone)
    };
    match outcome.as_deref() {
        Some(Ok(entry)) => Ok(entry.clone()),
        Some(Err(e)) => Err(e.duplicate()),
        None => Err(GatewayError::Other(
            "cache fill ended without a result".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FetchedObject, ObjectMeta};
    use bytes::Bytes;
    use chrono::Utc;
    use std::time::Duration;

    fn entry() -> CacheEntry {
        CacheEntry::new(
            "k",
            FetchedObject {
                body: Bytes::from_static(b"v"),
                meta: ObjectMeta::default(),
            },
            Utc::now(),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_second_caller_joins() {
        let table = Arc::new(FlightTable::default());
        let bucket = BucketId::generate();

        let Ok(Flight::Lead(guard, leader_slot)) = table.join_or_lead(&bucket, "k", || Ok(None))
        else {
            panic!("first caller should lead");
        };
        let Ok(Flight::Join(joined_slot)) = table.join_or_lead(&bucket, "k", || Ok(None)) else {
            panic!("second caller should join");
        };
        assert_eq!(table.in_flight(), 1);

        guard.publish(Ok(entry()));
        assert_eq!(table.in_flight(), 0);
        assert_eq!(&wait(leader_slot).await.unwrap().body[..], b"v");
        assert_eq!(&wait(joined_slot).await.unwrap().body[..], b"v");
    }

    #[tokio::test]
    async fn test_errors_reach_every_waiter() {
        let table = Arc::new(FlightTable::default());
        let bucket = BucketId::generate();

        let Ok(Flight::Lead(guard, a)) = table.join_or_lead(&bucket, "k", || Ok(None)) else {
            panic!("first caller should lead");
        };
        let Ok(Flight::Join(b)) = table.join_or_lead(&bucket, "k", || Ok(None)) else {
            panic!("second caller should join");
        };
        guard.publish(Err(GatewayError::unavailable("h1", "connection refused")));

        for slot in [a, b] {
            let err = wait(slot).await.unwrap_err();
            assert!(matches!(err, GatewayError::BackendUnavailable { .. }));
        }
    }

    #[tokio::test]
    async fn test_dropped_guard_unblocks_waiters() {
        let table = Arc::new(FlightTable::default());
        let bucket = BucketId::generate();

        let Ok(Flight::Lead(guard, slot)) = table.join_or_lead(&bucket, "k", || Ok(None)) else {
            panic!("first caller should lead");
        };
        drop(guard);
        assert_eq!(table.in_flight(), 0);
        assert!(wait(slot).await.is_err());
    }

    #[test]
    fn test_recheck_short_circuits() {
        let table = Arc::new(FlightTable::default());
        let bucket = BucketId::generate();
        let flight = table
            .join_or_lead(&bucket, "k", || Ok(Some(entry())))
            .unwrap();
        assert!(matches!(flight, Flight::Fresh(_)));
        assert_eq!(table.in_flight(), 0);
    }
}
