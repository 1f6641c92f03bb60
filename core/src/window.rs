//! Sliding sampling window for call outcomes
//!
//! Counts are kept in a fixed number of time buckets spanning
//! `sampling_duration`. A bucket is dropped once its start is older than the
//! sampling period, so counts never include outcomes older than that period
//! and memory stays bounded regardless of call rate. A separate, capped log
//! of individual outcomes is kept for inspection only and never feeds the
//! failure ratio.

use crate::{Outcome, OutcomeKind};
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Default cap on outcomes kept in the inspection log
pub const DEFAULT_MAX_EVENTS: usize = 1000;

/// Number of buckets the sampling duration is split into
const BUCKET_COUNT: u32 = 10;

/// Counts taken from the window at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub successes: usize,
    pub failures: usize,
    /// Unhandled failures, kept for inspection but never counted
    pub ignored: usize,
}

impl WindowSnapshot {
    /// Number of outcomes that take part in the failure ratio
    pub fn total(&self) -> usize {
        self.successes + self.failures
    }

    pub fn failure_ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.failures as f64 / total as f64
        }
    }

    /// True once `minimum_throughput` is reached and the ratio is at or above `ratio`
    pub fn exceeds(&self, ratio: f64, minimum_throughput: usize) -> bool {
        let total = self.total();
        total > 0 && total >= minimum_throughput && self.failure_ratio() >= ratio
    }
}

#[derive(Debug)]
struct Bucket {
    started_at: Duration,
    counts: WindowSnapshot,
}

impl Bucket {
    fn new(started_at: Duration) -> Self {
        Self {
            started_at,
            counts: WindowSnapshot::default(),
        }
    }

    fn update(&mut self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Success => self.counts.successes += 1,
            OutcomeKind::HandledFailure => self.counts.failures += 1,
            OutcomeKind::UnhandledFailure => self.counts.ignored += 1,
        }
    }
}

#[derive(Debug, Default)]
struct WindowState {
    buckets: VecDeque<Bucket>,
    log: VecDeque<Outcome>,
}

impl WindowState {
    fn purge(&mut self, now: Duration, sampling_duration: Duration) {
        while self
            .buckets
            .front()
            .is_some_and(|b| now.saturating_sub(b.started_at) > sampling_duration)
        {
            self.buckets.pop_front();
        }
    }

    fn totals(&self) -> WindowSnapshot {
        self.buckets
            .iter()
            .fold(WindowSnapshot::default(), |mut snapshot, bucket| {
                snapshot.successes += bucket.counts.successes;
                snapshot.failures += bucket.counts.failures;
                snapshot.ignored += bucket.counts.ignored;
                snapshot
            })
    }
}

/// Thread-safe in-memory window of recent outcomes
#[derive(Debug)]
pub struct SlidingWindow {
    state: RwLock<WindowState>,
    sampling_duration: Duration,
    bucket_duration: Duration,
    /// Maximum outcomes kept in the inspection log
    max_events: usize,
    /// Monotonic time anchor (prevents clock skew issues from NTP)
    start_time: Instant,
}

impl SlidingWindow {
    pub fn new(sampling_duration: Duration) -> Self {
        Self::with_max_events(sampling_duration, DEFAULT_MAX_EVENTS)
    }

    pub fn with_max_events(sampling_duration: Duration, max_events: usize) -> Self {
        Self {
            state: RwLock::new(WindowState::default()),
            sampling_duration,
            bucket_duration: sampling_duration / BUCKET_COUNT,
            max_events: max_events.max(1),
            start_time: Instant::now(),
        }
    }

    pub fn sampling_duration(&self) -> Duration {
        self.sampling_duration
    }

    /// Count an outcome stamped with the current monotonic time
    pub fn record(&self, kind: OutcomeKind, duration: Duration) {
        let now = self.monotonic_time();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        state.purge(now, self.sampling_duration);
        match state.buckets.back_mut() {
            Some(bucket) if now.saturating_sub(bucket.started_at) < self.bucket_duration => {
                bucket.update(kind);
            }
            _ => {
                let mut bucket = Bucket::new(now);
                bucket.update(kind);
                state.buckets.push_back(bucket);
            }
        }

        state.log.push_back(Outcome {
            kind,
            timestamp: now,
            duration,
        });
        // Drop the oldest 10% at once to avoid trimming on every record
        if state.log.len() > self.max_events {
            let remove_count = (self.max_events / 10).max(1);
            state.log.drain(..remove_count);
        }
    }

    /// Count outcomes inside the sampling period, purging expired buckets
    pub fn snapshot(&self) -> WindowSnapshot {
        let now = self.monotonic_time();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        state.purge(now, self.sampling_duration);
        state.totals()
    }

    /// Forget every recorded outcome
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.buckets.clear();
        state.log.clear();
    }

    /// Number of outcomes held by live buckets, counted or not
    pub fn len(&self) -> usize {
        let totals = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .totals();
        totals.total() + totals.ignored
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last `limit` outcomes from the inspection log, oldest first
    pub fn event_log(&self, limit: usize) -> Vec<Outcome> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let start = state.log.len().saturating_sub(limit);
        state.log.iter().skip(start).copied().collect()
    }

    /// Monotonic time elapsed since the window was created
    pub fn monotonic_time(&self) -> Duration {
        self.start_time.elapsed()
    }
}
