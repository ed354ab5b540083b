//! Per-plate violation cooldown
//!
//! A vehicle that stays in frame produces many detections a second apart.
//! Only the first one within `cooldown` of the last persisted violation for
//! that plate becomes a new violation; the rest are suppressed.
//!
//! State is process-local and volatile: a restart forgets every timer, so a
//! violation that would have been suppressed can be persisted again after a
//! restart. Memory stays bounded: entries older than `EVICTION_FACTOR`
//! cooldowns (relative to the newest mark) are dropped, since they can no
//! longer suppress anything.

use chrono::{NaiveDateTime, TimeDelta};
use placa_common::Plate;
use std::collections::HashMap;
use std::time::Duration;

/// Entries older than this many cooldowns are evicted
pub const EVICTION_FACTOR: i32 = 6;

/// Cooldown decision for one restricted detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    /// Persist a new violation
    Permit,
    /// Duplicate of the violation persisted at `since`
    Suppress { since: NaiveDateTime },
}

/// In-memory cooldown timers keyed by plate
///
/// Owned by the single ingest worker; no internal locking.
#[derive(Debug)]
pub struct CooldownGuard {
    cooldown: TimeDelta,
    last_persisted: HashMap<Plate, NaiveDateTime>,
    newest: Option<NaiveDateTime>,
}

impl CooldownGuard {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown: TimeDelta::from_std(cooldown).unwrap_or(TimeDelta::MAX),
            last_persisted: HashMap::new(),
            newest: None,
        }
    }

    pub fn cooldown(&self) -> TimeDelta {
        self.cooldown
    }

    /// Permit unless a violation was persisted for `plate` within the cooldown
    ///
    /// The interval must strictly exceed the cooldown to permit.
    pub fn check(&self, plate: &Plate, now: NaiveDateTime) -> CooldownDecision {
        match self.last_persisted.get(plate) {
            Some(&last) if now - last <= self.cooldown => CooldownDecision::Suppress { since: last },
            _ => CooldownDecision::Permit,
        }
    }

    /// Record a persisted violation for `plate` at `now`
    ///
    /// Call only once the violation write has committed.
    pub fn mark(&mut self, plate: &Plate, now: NaiveDateTime) {
        self.last_persisted.insert(plate.clone(), now);
        if self.newest.map_or(true, |newest| now > newest) {
            self.newest = Some(now);
        }
        self.evict_stale();
    }

    /// Number of plates currently tracked
    pub fn len(&self) -> usize {
        self.last_persisted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_persisted.is_empty()
    }

    fn evict_stale(&mut self) {
        let Some(newest) = self.newest else {
            return;
        };
        let retention = self
            .cooldown
            .checked_mul(EVICTION_FACTOR)
            .unwrap_or(TimeDelta::MAX);

        let before = self.last_persisted.len();
        self.last_persisted
            .retain(|_, last| newest.signed_duration_since(*last) <= retention);

        let evicted = before - self.last_persisted.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.last_persisted.len(), "Evicted stale cooldown entries");
        }
    }
}
