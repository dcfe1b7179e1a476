//! Zone Guard
//!
//! This crate implements the core of a zone intrusion monitor for video streams.
//!
//! # Architecture
//!
//! Each frame flows through one synchronous step:
//!
//! 1. **Intake**: detector output arrives as plain `Detection` records and is
//!    filtered by confidence and class before anything else sees it.
//! 2. **Tracking**: the `CentroidTracker` assigns stable ids by greedy
//!    nearest-centroid matching.
//! 3. **Intrusion**: the `IntrusionEngine` keeps a per (object, zone) membership
//!    flag and emits `Entered`, `Exited` and in-zone `Moved` events.
//! 4. **Sink**: events are appended to the event log (system of record) and
//!    forwarded, best effort, to the alert channel.
//!
//! # Module Structure
//!
//! - `zone`: zone polygons, containment, zones file loading
//! - `detect`: detections, detection sources, confidence/class filter
//! - `tracker`: centroid tracker
//! - `intrusion`: membership state machine
//! - `storage`, `chain`, `verify`: event log stores and hash chain
//! - `alert`: alert dispatchers
//! - `sink`, `pipeline`: per-frame wiring
//! - Core types: `Point`, `Event`, `EventKind`

use anyhow::{anyhow, Result};
use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod alert;
pub mod chain;
pub mod config;
pub mod detect;
pub mod intrusion;
pub mod pipeline;
pub mod sink;
pub mod storage;
pub mod tracker;
pub mod verify;
pub mod zone;

pub use alert::{
    AlertDispatcher, ConsoleAlerter, DisabledAlerter, MqttAlertConfig, MqttAlerter, QueuedAlerter,
};
pub use chain::{hash_entry, GENESIS_HASH};
pub use detect::{
    BoundingBox, Detection, DetectionFilter, DetectionSource, FrameDetections, ReplaySource,
    StubSource,
};
pub use intrusion::{DisappearPolicy, IntrusionEngine, MembershipState};
pub use pipeline::{step, FrameOutcome, Pipeline, PipelineConfig, PipelineState, RunStats};
pub use sink::{EventSink, SinkError};
pub use storage::{CsvEventLog, EventLogStore, InMemoryEventLog, SqliteEventLog};
pub use tracker::{CentroidTracker, TrackedObject, TrackerConfig, TrackerState, TrackerUpdate};
pub use zone::{Zone, ZoneError, ZoneRegistry};

/// Timestamp layout used by the event log and detection streams.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .map_err(|e| {
            anyhow!(
                "invalid timestamp {:?} (expected YYYY-MM-DD HH:MM:SS): {}",
                value,
                e
            )
        })
}

/// Local wall clock truncated to whole seconds.
pub fn now_local() -> NaiveDateTime {
    let now = chrono::Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

// -------------------- Geometry --------------------

/// A position in frame pixel space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

// -------------------- Event Types --------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    Entered,
    Exited,
    /// In-zone heartbeat, only emitted while the object stays inside.
    Moved,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Entered => "Entered",
            EventKind::Exited => "Exited",
            EventKind::Moved => "Moved",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Entered" => Ok(EventKind::Entered),
            "Exited" => Ok(EventKind::Exited),
            "Moved" => Ok(EventKind::Moved),
            other => Err(anyhow!("unknown event kind {:?}", other)),
        }
    }
}

// -------------------- Events --------------------

/// A membership transition (or in-zone heartbeat) for one object and one zone.
///
/// Events are immutable once created; stores only ever append them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub timestamp: NaiveDateTime,
    pub object_id: u64,
    pub zone: String,
    pub kind: EventKind,
    pub class_name: String,
    pub confidence: f32,
}

impl Event {
    /// One-line human readable summary, shared by console output and alerts.
    pub fn summary(&self) -> String {
        format!(
            "[{}] Object {} ({}) {} {}",
            format_timestamp(&self.timestamp),
            self.object_id,
            self.class_name,
            self.kind,
            self.zone
        )
    }
}
