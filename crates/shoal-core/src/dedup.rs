//! Delivery deduplication
//!
//! Remembers, per fragment fingerprint, the last address the fragment was
//! delivered to, so the same content is not sent to the same address twice.
//! Other recipients are unaffected: a record only ever suppresses resending
//! to the exact address it names.
//!
//! The table is bounded. When `capacity` is exceeded the least recently
//! recorded fingerprints are forgotten first, and with a TTL a record
//! expires on its own.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::DedupConfig;
use crate::types::{Fingerprint, Knowledge, PeerAddress};

#[derive(Debug)]
struct DeliveryRecord {
    address: PeerAddress,
    recorded_at: Instant,
    seq: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    records: HashMap<Fingerprint, DeliveryRecord>,
    // Recording order; entries whose seq no longer matches the record are stale
    order: VecDeque<(Fingerprint, u64)>,
    next_seq: u64,
}

impl CacheState {
    fn delivered_to(
        &self,
        fingerprint: &Fingerprint,
        address: &PeerAddress,
        ttl: Option<Duration>,
    ) -> bool {
        self.records.get(fingerprint).is_some_and(|record| {
            record.address.eq_ignore_case(address)
                && ttl.map_or(true, |ttl| record.recorded_at.elapsed() < ttl)
        })
    }

    fn evict(&mut self, capacity: usize, ttl: Option<Duration>) {
        while let Some(&(fingerprint, seq)) = self.order.front() {
            let live = self.records.get(&fingerprint).is_some_and(|r| r.seq == seq);
            let expired = live
                && ttl.is_some_and(|ttl| {
                    self.records
                        .get(&fingerprint)
                        .is_some_and(|r| r.recorded_at.elapsed() >= ttl)
                });
            let over_capacity = self.records.len() > capacity;

            if !live {
                self.order.pop_front();
            } else if expired || over_capacity {
                self.order.pop_front();
                self.records.remove(&fingerprint);
            } else {
                break;
            }
        }
    }
}

/// Fingerprint → last recipient table
#[derive(Debug)]
pub struct DeliveryCache {
    state: Mutex<CacheState>,
    allow_empty_containers: bool,
    capacity: usize,
    ttl: Option<Duration>,
}

impl DeliveryCache {
    /// Cache configured by `config`
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            allow_empty_containers: config.allow_empty_containers,
            capacity: config.capacity.max(1),
            ttl: config.ttl(),
        }
    }

    /// Drop the fragments already delivered to `address`.
    ///
    /// A context point left without fragments is kept only with
    /// `allow_empty_containers`. Knowledge with nothing filtered comes back
    /// unchanged. Returns `None` only when filtering left no context point.
    pub fn filter(&self, knowledge: &Knowledge, address: &PeerAddress) -> Option<Knowledge> {
        let state = self.state.lock();

        let mut filtered = Knowledge::default();
        let mut dropped = 0usize;
        for point in &knowledge.context_points {
            let mut kept = point.empty_copy();
            for fragment in &point.fragments {
                if state.delivered_to(&fragment.fingerprint(), address, self.ttl) {
                    dropped += 1;
                } else {
                    kept.fragments.push(fragment.clone());
                }
            }
            if !kept.fragments.is_empty() || self.allow_empty_containers {
                filtered.context_points.push(kept);
            }
        }

        if dropped == 0 {
            return Some(knowledge.clone());
        }
        debug!(%address, dropped, "Filtered already delivered fragments");

        if filtered.is_empty() {
            None
        } else {
            Some(filtered)
        }
    }

    /// Record every fragment of `knowledge` as delivered to `address`,
    /// replacing whatever address was recorded before
    pub fn record(&self, knowledge: &Knowledge, address: &PeerAddress) {
        let mut state = self.state.lock();
        let now = Instant::now();

        for fragment in knowledge.fragments() {
            let fingerprint = fragment.fingerprint();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.records.insert(
                fingerprint,
                DeliveryRecord {
                    address: address.clone(),
                    recorded_at: now,
                    seq,
                },
            );
            state.order.push_back((fingerprint, seq));
        }

        state.evict(self.capacity, self.ttl);

        // Overwrites leave stale order entries behind the live front
        if state.order.len() > self.capacity.saturating_mul(2) {
            let CacheState { records, order, .. } = &mut *state;
            order.retain(|(fp, seq)| records.get(fp).is_some_and(|r| r.seq == *seq));
        }
    }

    /// Last address a fragment was delivered to
    pub fn last_recipient(&self, fingerprint: &Fingerprint) -> Option<PeerAddress> {
        let state = self.state.lock();
        let record = state.records.get(fingerprint)?;
        if self.ttl.is_some_and(|ttl| record.recorded_at.elapsed() >= ttl) {
            return None;
        }
        Some(record.address.clone())
    }

    /// Number of tracked fingerprints
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    /// Forget the whole delivery history
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.records.clear();
        state.order.clear();
    }
}
