//! Process-wide decode and wire counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Track decoder and protocol counters without external dependencies.
pub(crate) struct Metrics;

static WORDS_DECODED: AtomicU64 = AtomicU64::new(0);
static NEUTRON_EVENTS: AtomicU64 = AtomicU64::new(0);
static FRAME_MARKERS: AtomicU64 = AtomicU64::new(0);
static GENERIC_EVENTS: AtomicU64 = AtomicU64::new(0);
static TRIGGER_EVENTS: AtomicU64 = AtomicU64::new(0);
static BYTES_SKIPPED: AtomicU64 = AtomicU64::new(0);
static RAW_FRAMES: AtomicU64 = AtomicU64::new(0);
static GOOD_FRAMES: AtomicU64 = AtomicU64::new(0);
static WIRE_REQUESTS: AtomicU64 = AtomicU64::new(0);
static WIRE_ERRORS: AtomicU64 = AtomicU64::new(0);
static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);
static REQUEST_LATENCY_TOTAL_NS: AtomicU64 = AtomicU64::new(0);
static REQUEST_LATENCY_MAX_NS: AtomicU64 = AtomicU64::new(0);

const NANOSECONDS_PER_MICROSECOND: u128 = 1_000;

/// Kind of classified event word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    Neutron,
    FrameMarker,
    Generic,
    /// Trigger on a channel that does not delimit frames
    Trigger,
}

impl Metrics {
    #[inline]
    pub(crate) fn record_words(count: u64) {
        WORDS_DECODED.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_event(kind: EventKind) {
        let counter = match kind {
            EventKind::Neutron => &NEUTRON_EVENTS,
            EventKind::FrameMarker => &FRAME_MARKERS,
            EventKind::Generic => &GENERIC_EVENTS,
            EventKind::Trigger => &TRIGGER_EVENTS,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_skipped(bytes: u64) {
        BYTES_SKIPPED.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_frame(accepted: bool) {
        RAW_FRAMES.fetch_add(1, Ordering::Relaxed);
        if accepted {
            GOOD_FRAMES.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_request(duration: Duration) {
        WIRE_REQUESTS.fetch_add(1, Ordering::Relaxed);
        let nanos = duration
            .as_nanos()
            .min(u128::from(u64::MAX))
            .try_into()
            .unwrap_or(u64::MAX);
        REQUEST_LATENCY_TOTAL_NS.fetch_add(nanos, Ordering::Relaxed);
        update_max(&REQUEST_LATENCY_MAX_NS, nanos);
    }

    #[inline]
    pub(crate) fn record_wire_error() {
        WIRE_ERRORS.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_connection_open() {
        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_connection_close() {
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn totals() -> MetricsSnapshot {
        MetricsSnapshot {
            words_decoded: WORDS_DECODED.load(Ordering::Relaxed),
            neutron_events: NEUTRON_EVENTS.load(Ordering::Relaxed),
            frame_markers: FRAME_MARKERS.load(Ordering::Relaxed),
            generic_events: GENERIC_EVENTS.load(Ordering::Relaxed),
            trigger_events: TRIGGER_EVENTS.load(Ordering::Relaxed),
            bytes_skipped: BYTES_SKIPPED.load(Ordering::Relaxed),
            raw_frames: RAW_FRAMES.load(Ordering::Relaxed),
            good_frames: GOOD_FRAMES.load(Ordering::Relaxed),
            wire_requests: WIRE_REQUESTS.load(Ordering::Relaxed),
            wire_errors: WIRE_ERRORS.load(Ordering::Relaxed),
            active_connections: ACTIVE_CONNECTIONS.load(Ordering::Relaxed),
            request_latency_total_ns: REQUEST_LATENCY_TOTAL_NS.load(Ordering::Relaxed),
            request_latency_max_ns: REQUEST_LATENCY_MAX_NS.load(Ordering::Relaxed),
        }
    }
}

fn update_max(target: &AtomicU64, candidate: u64) {
    let mut current = target.load(Ordering::Relaxed);
    while candidate > current {
        match target.compare_exchange_weak(
            current,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(old) => current = old,
        }
    }
}

/// Read the current counters.
#[must_use]
pub fn snapshot() -> MetricsSnapshot {
    Metrics::totals()
}

/// Lightweight snapshot of the process-wide counters.
#[derive(Default, Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub words_decoded: u64,
    pub neutron_events: u64,
    pub frame_markers: u64,
    pub generic_events: u64,
    pub trigger_events: u64,
    pub bytes_skipped: u64,
    pub raw_frames: u64,
    pub good_frames: u64,
    pub wire_requests: u64,
    pub wire_errors: u64,
    pub active_connections: u64,
    pub request_latency_total_ns: u64,
    pub request_latency_max_ns: u64,
}

impl MetricsSnapshot {
    /// Average wire request latency in microseconds.
    #[must_use]
    pub fn avg_request_latency_us(&self) -> Option<u64> {
        if self.wire_requests == 0 {
            return None;
        }
        let total = u128::from(self.request_latency_total_ns);
        let avg = total / (u128::from(self.wire_requests) * NANOSECONDS_PER_MICROSECOND);
        Some(u64::try_from(avg).unwrap_or(u64::MAX))
    }
}
