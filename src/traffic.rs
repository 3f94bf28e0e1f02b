//! Traffic accounting sink. Persistence of per-day byte counters and pull
//! history is out of scope for the core proxy logic; this module defines
//! the boundary trait and a default in-memory implementation so the proxy
//! runs standalone, with daily counters keyed by ISO date and an
//! append-only pull-history list.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default)]
pub struct DailyCounters {
    pub download_bytes: u64,
    pub upload_bytes: u64,
    pub request_count: u64,
}

#[derive(Debug, Clone)]
pub struct PullRecord {
    pub timestamp: chrono::DateTime<Utc>,
    pub image: String,
    pub reference: String,
    pub client_ip: IpAddr,
}

/// Accepts byte counters, request counts, and pull events. Failure of the
/// sink must never abort the proxied request.
///
/// `record_bytes` and `record_request` are separate calls because a single
/// request's response body may stream through many chunks, each reporting
/// its own downloaded bytes — `record_request` must be called exactly once
/// per request regardless of how many `record_bytes` calls that request
/// produced.
#[async_trait]
pub trait TrafficSink: Send + Sync {
    async fn record_bytes(&self, download_bytes: u64, upload_bytes: u64);
    async fn record_request(&self);
    async fn record_pull(&self, image: &str, reference: &str, client_ip: IpAddr);
}

/// Default in-memory sink. Daily byte counters use atomics internally:
/// increments are atomic per day-key but not ordered across requests. Pull
/// history is capped to bound memory use.
pub struct InMemoryTrafficSink {
    days: DashMap<String, Arc<DayCounters>>,
    pulls: Mutex<Vec<PullRecord>>,
    pull_cap: usize,
}

struct DayCounters {
    download_bytes: AtomicU64,
    upload_bytes: AtomicU64,
    request_count: AtomicU64,
}

impl Default for InMemoryTrafficSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl InMemoryTrafficSink {
    pub fn new(pull_cap: usize) -> Self {
        Self {
            days: DashMap::new(),
            pulls: Mutex::new(Vec::new()),
            pull_cap,
        }
    }

    pub fn today_counters(&self) -> DailyCounters {
        let key = Utc::now().format("%Y-%m-%d").to_string();
        match self.days.get(&key) {
            Some(c) => DailyCounters {
                download_bytes: c.download_bytes.load(Ordering::Relaxed),
                upload_bytes: c.upload_bytes.load(Ordering::Relaxed),
                request_count: c.request_count.load(Ordering::Relaxed),
            },
            None => DailyCounters::default(),
        }
    }

    pub async fn recent_pulls(&self, limit: usize) -> Vec<PullRecord> {
        let pulls = self.pulls.lock().await;
        pulls.iter().rev().take(limit).cloned().collect()
    }

    fn day_entry(&self) -> Arc<DayCounters> {
        let key = Utc::now().format("%Y-%m-%d").to_string();
        self.days
            .entry(key)
            .or_insert_with(|| {
                Arc::new(DayCounters {
                    download_bytes: AtomicU64::new(0),
                    upload_bytes: AtomicU64::new(0),
                    request_count: AtomicU64::new(0),
                })
            })
            .clone()
    }
}

#[async_trait]
impl TrafficSink for InMemoryTrafficSink {
    async fn record_bytes(&self, download_bytes: u64, upload_bytes: u64) {
        let entry = self.day_entry();
        if download_bytes > 0 {
            entry.download_bytes.fetch_add(download_bytes, Ordering::Relaxed);
        }
        if upload_bytes > 0 {
            entry.upload_bytes.fetch_add(upload_bytes, Ordering::Relaxed);
        }
    }

    async fn record_request(&self) {
        self.day_entry().request_count.fetch_add(1, Ordering::Relaxed);
    }

    async fn record_pull(&self, image: &str, reference: &str, client_ip: IpAddr) {
        let mut pulls = self.pulls.lock().await;
        pulls.push(PullRecord {
            timestamp: Utc::now(),
            image: image.to_string(),
            reference: reference.to_string(),
            client_ip,
        });
        if pulls.len() > self.pull_cap {
            let excess = pulls.len() - self.pull_cap;
            pulls.drain(0..excess);
        }
    }
}
