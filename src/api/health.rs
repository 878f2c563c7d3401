//! Shared health state for the /health endpoint.
//! Updated by the ingest service, read by the API.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::types::SnapshotKind;

/// Shared health counters.
#[derive(Default)]
pub struct HealthState {
    pub history_enabled: AtomicBool,
    pub full_ingests: AtomicU64,
    pub fast_ingests: AtomicU64,
    /// Millisecond timestamp of the last stored full snapshot (0 = none).
    pub last_full_ingest_ms: AtomicU64,
    /// Millisecond timestamp of the last stored overlay snapshot (0 = none).
    pub last_fast_ingest_ms: AtomicU64,
    /// Broadcasts that could not be handed to the broadcaster.
    pub broadcast_failures: AtomicU64,
    /// History jobs dropped because the writer queue was full or closed.
    pub history_dropped: AtomicU64,
}

impl HealthState {
    pub fn new(history_enabled: bool) -> Self {
        let state = Self::default();
        state.history_enabled.store(history_enabled, Ordering::Relaxed);
        state
    }

    pub fn record_ingest(&self, kind: SnapshotKind, at_ms: u64) {
        match kind {
            SnapshotKind::Full => {
                self.full_ingests.fetch_add(1, Ordering::Relaxed);
                self.last_full_ingest_ms.store(at_ms, Ordering::Relaxed);
            }
            SnapshotKind::Fast => {
                self.fast_ingests.fetch_add(1, Ordering::Relaxed);
                self.last_fast_ingest_ms.store(at_ms, Ordering::Relaxed);
            }
        }
    }

    pub fn inc_broadcast_failures(&self) {
        self.broadcast_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_history_dropped(&self) {
        self.history_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn history_enabled(&self) -> bool {
        self.history_enabled.load(Ordering::Relaxed)
    }

    pub fn ingests(&self, kind: SnapshotKind) -> u64 {
        match kind {
            SnapshotKind::Full => self.full_ingests.load(Ordering::Relaxed),
            SnapshotKind::Fast => self.fast_ingests.load(Ordering::Relaxed),
        }
    }

    pub fn last_ingest_ms(&self, kind: SnapshotKind) -> Option<u64> {
        let ms = match kind {
            SnapshotKind::Full => self.last_full_ingest_ms.load(Ordering::Relaxed),
            SnapshotKind::Fast => self.last_fast_ingest_ms.load(Ordering::Relaxed),
        };
        (ms > 0).then_some(ms)
    }

    pub fn broadcast_failures(&self) -> u64 {
        self.broadcast_failures.load(Ordering::Relaxed)
    }

    pub fn history_dropped(&self) -> u64 {
        self.history_dropped.load(Ordering::Relaxed)
    }
}
