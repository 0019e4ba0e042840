//! Fill fencing shared by the cache stores.
//!
//! Every fill ticket and every fence draws from one sequence counter. A fill
//! is admitted only if no fence covering its key was raised after its
//! ticket. Fences are only recorded while fills are outstanding and are
//! dropped once the last outstanding ticket is released.
//!
//! Lock order: a store takes its own lock before calling into the fences.

use super::traits::FillToken;
use crate::resolver::BucketId;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct FenceState {
    next_seq: u64,
    outstanding: BTreeSet<u64>,
    key_fences: HashMap<(BucketId, String), u64>,
    bucket_fences: HashMap<BucketId, u64>,
}

impl FenceState {
    fn next(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

#[derive(Debug, Default)]
pub(crate) struct FillFences {
    state: Mutex<FenceState>,
}

impl FillFences {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, FenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn begin(self: &Arc<Self>, bucket: &BucketId, key: &str) -> FillToken {
        let mut state = self.lock();
        let seq = state.next();
        state.outstanding.insert(seq);
        FillToken {
            bucket: bucket.clone(),
            key: key.to_string(),
            seq,
            fences: Arc::clone(self),
        }
    }

    /// Whether the ticket's fill may still be stored.
    pub(crate) fn admits(&self, token: &FillToken) -> bool {
        let state = self.lock();
        let key_fence = state
            .key_fences
            .get(&(token.bucket.clone(), token.key.clone()))
            .copied()
            .unwrap_or(0);
        let bucket_fence = state.bucket_fences.get(&token.bucket).copied().unwrap_or(0);
        key_fence < token.seq && bucket_fence < token.seq
    }

    pub(crate) fn fence_key(&self, bucket: &BucketId, key: &str) {
        let mut state = self.lock();
        if state.outstanding.is_empty() {
            return;
        }
        let seq = state.next();
        state.key_fences.insert((bucket.clone(), key.to_string()), seq);
    }

    pub(crate) fn fence_bucket(&self, bucket: &BucketId) {
        let mut state = self.lock();
        if state.outstanding.is_empty() {
            return;
        }
        let seq = state.next();
        state.bucket_fences.insert(bucket.clone(), seq);
    }

    /// Called when a ticket is dropped, stored or not.
    pub(crate) fn release(&self, seq: u64) {
        let mut state = self.lock();
        state.outstanding.remove(&seq);
        if state.outstanding.is_empty() {
            state.key_fences.clear();
            state.bucket_fences.clear();
        }
    }

    #[cfg(test)]
    fn recorded_fences(&self) -> usize {
        let state = self.lock();
        state.key_fences.len() + state.bucket_fences.len()
    }
}
