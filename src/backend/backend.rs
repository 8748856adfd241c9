// src/backend/backend.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Not probed yet; routed around exactly like `Unhealthy`.
    Unknown,
}

/// Why a probe ended the way it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum ProbeReason {
    /// HTTP check passed and no readiness source is configured.
    HttpOk,
    HttpFailed(String),
    /// Readiness source could not be queried; the HTTP result stands.
    ReadinessUnavailable(String),
    WarmingUp,
    NodeNotReady,
    NodeReady,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub healthy: bool,
    #[serde(flatten)]
    pub reason: ProbeReason,
    pub at: DateTime<Utc>,
    pub latency_ms: u64,
}

impl ProbeOutcome {
    pub fn new(healthy: bool, reason: ProbeReason, latency_ms: u64) -> Self {
        Self {
            healthy,
            reason,
            at: Utc::now(),
            latency_ms,
        }
    }
}

#[derive(Debug)]
pub struct Backend {
    pub name: String,
    pub address: IpAddr,

    // Runtime state
    last_probe: RwLock<Option<ProbeOutcome>>,
    consecutive_failures: AtomicU32,
}

impl Backend {
    pub fn new(name: impl Into<String>, address: IpAddr) -> Self {
        Self {
            name: name.into(),
            address,
            last_probe: RwLock::new(None),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn last_probe(&self) -> Option<ProbeOutcome> {
        self.last_probe
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Store a probe outcome and return the updated consecutive failure count.
    pub fn record_probe(&self, outcome: ProbeOutcome) -> u32 {
        let failures = if outcome.healthy {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            0
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
        };

        *self
            .last_probe
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(outcome);

        failures
    }
}
