use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

// Metric name constants to avoid typos across crates.

/// Webhook payloads accepted by a destination (counter).
pub const WEBHOOK_DELIVERED_TOTAL: &str = "webhook_delivered_total";
/// Webhook payloads dropped after exhausting retries (counter).
pub const WEBHOOK_FAILED_TOTAL: &str = "webhook_failed_total";
/// Webhook retry attempts (counter).
pub const WEBHOOK_RETRIES_TOTAL: &str = "webhook_retries_total";
/// Events that failed serialization (counter).
pub const WEBHOOK_SERIALIZE_ERRORS_TOTAL: &str = "webhook_serialize_errors_total";
/// Transport events consumed by connection pumps (counter).
pub const TRANSPORT_EVENTS_TOTAL: &str = "transport_events_total";
/// Live connection handles (gauge).
pub const SESSIONS_LIVE: &str = "sessions_live";
/// Active QR pairing loops (gauge).
pub const QR_LOOPS_ACTIVE: &str = "qr_loops_active";

/// Point-in-time copy of every metric.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, i64>,
}

/// In-memory counters and gauges, shared behind an `Arc`.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: DashMap<String, AtomicU64>,
    gauges: DashMap<String, AtomicI64>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &str, n: u64) {
        if let Some(counter) = self.counters.get(name) {
            counter.fetch_add(n, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn set_gauge(&self, name: &str, value: i64) {
        self.gauges
            .entry(name.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .store(value, Ordering::Relaxed);
    }

    pub fn add_gauge(&self, name: &str, delta: i64) {
        self.gauges
            .entry(name.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn gauge(&self, name: &str) -> i64 {
        self.gauges
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .iter()
                .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
                .collect(),
            gauges: self
                .gauges
                .iter()
                .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
                .collect(),
        }
    }
}
