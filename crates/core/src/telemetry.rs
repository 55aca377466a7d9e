//! In-memory operational telemetry.
//!
//! One store is shared by every request, so each operation is a single
//! short critical section: take the mutex, bump counters, drop it. No
//! I/O ever happens under the lock.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Capacity of the latency sample ring used for percentile estimation.
pub const LATENCY_SAMPLE_CAPACITY: usize = 2048;

const MIN_RECENT_CAPACITY: usize = 10;

/// Consistent point-in-time copy of the aggregated metrics.
///
/// `p95_latency_ms`/`p99_latency_ms` are nearest-rank order statistics over
/// the retained sample ring only — approximate once more than
/// [`LATENCY_SAMPLE_CAPACITY`] requests have been observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub uptime_seconds: u64,
    pub requests_total: u64,
    pub errors_total: u64,
    pub detections_total: u64,
    pub cache_hits: u64,
    pub average_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub requests_by_path: BTreeMap<String, u64>,
    pub requests_by_status_class: BTreeMap<String, u64>,
}

/// One entry in the recent-detections ring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentDetection {
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Where the payload came from: upload, base64_upload, remote_url, ...
    pub source: String,
    pub principal_id: String,
    pub request_id: String,
    pub tags: Vec<String>,
    pub total_detections: usize,
    pub inference_ms: f64,
    pub cached: bool,
}

impl RecentDetection {
    /// Current wall-clock time in Unix milliseconds.
    pub fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

struct TelemetryInner {
    requests_total: u64,
    errors_total: u64,
    detections_total: u64,
    cache_hits: u64,
    latency_total_ms: f64,
    latency_samples: VecDeque<f64>,
    requests_by_path: BTreeMap<String, u64>,
    requests_by_status_class: BTreeMap<String, u64>,
    /// Newest first; oldest silently dropped past capacity.
    recent: VecDeque<RecentDetection>,
    recent_capacity: usize,
}

/// Thread-safe counter/histogram store fed by every request.
pub struct TelemetryStore {
    started_at: Instant,
    inner: Mutex<TelemetryInner>,
}

impl TelemetryStore {
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            started_at: Instant::now(),
            inner: Mutex::new(TelemetryInner {
                requests_total: 0,
                errors_total: 0,
                detections_total: 0,
                cache_hits: 0,
                latency_total_ms: 0.0,
                latency_samples: VecDeque::with_capacity(LATENCY_SAMPLE_CAPACITY),
                requests_by_path: BTreeMap::new(),
                requests_by_status_class: BTreeMap::new(),
                recent: VecDeque::new(),
                recent_capacity: recent_capacity.max(MIN_RECENT_CAPACITY),
            }),
        }
    }

    /// Record one completed HTTP request. Status >= 400 counts as an error.
    pub fn record_request(&self, path: &str, status_code: u16, latency_ms: f64) {
        let latency_ms = latency_ms.max(0.0);
        let status_class = format!("{}xx", (u32::from(status_code) / 100).max(1));

        let mut inner = self.lock();
        inner.requests_total += 1;
        inner.latency_total_ms += latency_ms;
        if inner.latency_samples.len() >= LATENCY_SAMPLE_CAPACITY {
            inner.latency_samples.pop_front();
        }
        inner.latency_samples.push_back(latency_ms);
        *inner.requests_by_path.entry(path.to_string()).or_insert(0) += 1;
        *inner
            .requests_by_status_class
            .entry(status_class)
            .or_insert(0) += 1;
        if status_code >= 400 {
            inner.errors_total += 1;
        }
    }

    /// Record the outcome of one detection (cache hit or fresh inference).
    pub fn record_detection(&self, detections_count: usize, cached: bool) {
        let mut inner = self.lock();
        inner.detections_total += detections_count as u64;
        if cached {
            inner.cache_hits += 1;
        }
    }

    /// Push a full detection event onto the recent-activity ring.
    pub fn record_analysis(&self, entry: RecentDetection) {
        let mut inner = self.lock();
        let recent_capacity = inner.recent_capacity;
        inner.recent.push_front(entry);
        if inner.recent.len() > recent_capacity {
            inner.recent.truncate(recent_capacity);
        }
    }

    /// Newest-first slice of recent detection events, at most `limit` long.
    pub fn recent(&self, limit: usize) -> Vec<RecentDetection> {
        let inner = self.lock();
        inner.recent.iter().take(limit.max(1)).cloned().collect()
    }

    /// Consistent point-in-time copy of every aggregate.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let inner = self.lock();
        let average = if inner.requests_total > 0 {
            inner.latency_total_ms / inner.requests_total as f64
        } else {
            0.0
        };
        let mut samples: Vec<f64> = inner.latency_samples.iter().copied().collect();
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        TelemetrySnapshot {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            requests_total: inner.requests_total,
            errors_total: inner.errors_total,
            detections_total: inner.detections_total,
            cache_hits: inner.cache_hits,
            average_latency_ms: round2(average),
            p95_latency_ms: round2(percentile(&samples, 0.95)),
            p99_latency_ms: round2(percentile(&samples, 0.99)),
            requests_by_path: inner.requests_by_path.clone(),
            requests_by_status_class: inner.requests_by_status_class.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TelemetryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
fn percentile(sorted: &[f64], ratio: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let index = (((len - 1) as f64) * ratio).round() as usize;
            sorted[index.min(len - 1)]
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
