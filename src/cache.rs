use crate::prelude::*;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// Latest decoded snapshot, replaced wholesale on every poll so readers
/// never observe a half-updated value.
#[derive(Clone, Default)]
pub struct SnapshotCache {
    inner: Arc<Mutex<Arc<DeviceSnapshot>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: DeviceSnapshot) {
        *self.inner.lock().unwrap() = Arc::new(snapshot);
    }

    pub fn latest(&self) -> Arc<DeviceSnapshot> {
        self.inner.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Http,
    Mqtt,
}

/// Most recent Sol-Ark reading. `soc_pptt` is battery SOC in hundredths
/// of a percent, taken from whichever source last produced a good value.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExternalReading {
    pub soc_pptt: Option<u16>,
    pub payload: serde_json::Value,
    pub ts: Option<DateTime<Utc>>,
    pub source: Option<Source>,
    pub last_error: Option<String>,
}

impl ExternalReading {
    pub fn is_fresh(&self, max_age: chrono::Duration) -> bool {
        match (self.soc_pptt, self.ts) {
            (Some(_), Some(ts)) => Utc::now() - ts <= max_age,
            _ => false,
        }
    }
}

#[derive(Clone, Default)]
pub struct ExternalCache {
    inner: Arc<Mutex<ExternalReading>>,
}

impl ExternalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A good value from either source overwrites everything.
    pub fn update(&self, source: Source, payload: serde_json::Value, soc_pptt: u16) {
        let mut reading = self.inner.lock().unwrap();
        *reading = ExternalReading {
            soc_pptt: Some(soc_pptt),
            payload,
            ts: Some(Utc::now()),
            source: Some(source),
            last_error: None,
        };
    }

    /// A failure from one source must not clear a good value the other
    /// source produced; only record it while we have no data at all.
    pub fn record_error(&self, source: Source, err: String) {
        let mut reading = self.inner.lock().unwrap();
        if reading.soc_pptt.is_none() {
            reading.source = Some(source);
            reading.last_error = Some(err);
            if reading.ts.is_none() {
                reading.ts = Some(Utc::now());
            }
        }
    }

    pub fn latest(&self) -> ExternalReading {
        self.inner.lock().unwrap().clone()
    }
}
