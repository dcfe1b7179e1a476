//! Centroid tracker.
//!
//! Gives detections persistent identities across frames by greedy
//! nearest-centroid matching under a fixed distance threshold. Greedy matching
//! is the tracking-quality ceiling of the system: detections are sparse and
//! per-frame displacement is small relative to inter-object spacing, so an
//! optimal assignment is not attempted.
//!
//! Class labels are informational. A detection of a different class may take
//! over an existing identity if it is the nearest candidate.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::detect::Detection;
use crate::Point;

pub const DEFAULT_TRACKING_DISTANCE_THRESHOLD: f32 = 50.0;
pub const DEFAULT_MAX_DISAPPEARED_FRAMES: u32 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Maximum centroid displacement (pixels, inclusive) for a match.
    pub tracking_distance_threshold: f32,
    /// An object is dropped once it has been unmatched for more than this many
    /// consecutive frames.
    pub max_disappeared_frames: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tracking_distance_threshold: DEFAULT_TRACKING_DISTANCE_THRESHOLD,
            max_disappeared_frames: DEFAULT_MAX_DISAPPEARED_FRAMES,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub id: u64,
    pub centroid: Point,
    pub class_name: String,
    pub confidence: f32,
    /// Consecutive frames since the object was last matched.
    pub disappeared: u32,
    pub created_at: NaiveDateTime,
}

impl TrackedObject {
    fn spawn(id: u64, det: &Detection, now: NaiveDateTime) -> Self {
        Self {
            id,
            centroid: det.centroid(),
            class_name: det.class_name.clone(),
            confidence: det.confidence,
            disappeared: 0,
            created_at: now,
        }
    }

    fn absorb(&mut self, det: &Detection) {
        self.centroid = det.centroid();
        self.class_name = det.class_name.clone();
        self.confidence = det.confidence;
        self.disappeared = 0;
    }
}

/// What one `update` did, by object id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackerUpdate {
    pub matched: Vec<u64>,
    pub spawned: Vec<u64>,
    /// Objects dropped this frame, as they were when dropped.
    pub removed: Vec<TrackedObject>,
}

/// Active objects plus the id counter. Ids start at 1 and are never reused.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerState {
    /// Kept sorted by id.
    objects: Vec<TrackedObject>,
    next_id: u64,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            objects: Vec::new(),
            next_id: 1,
        }
    }
}

impl TrackerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> &[TrackedObject] {
        &self.objects
    }

    pub fn get(&self, id: u64) -> Option<&TrackedObject> {
        self.objects
            .binary_search_by_key(&id, |obj| obj.id)
            .ok()
            .map(|idx| &self.objects[idx])
    }

    /// Id the next spawned object will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Advance by one frame of (already filtered) detections.
    pub fn update(
        &mut self,
        config: &TrackerConfig,
        detections: &[Detection],
        now: NaiveDateTime,
    ) -> TrackerUpdate {
        let mut out = TrackerUpdate::default();
        let mut object_matched = vec![false; self.objects.len()];
        let mut detection_used = vec![false; detections.len()];

        // Every admissible pair, smallest distance first; ties go to the lowest
        // object id (objects are id-sorted) and then to the earliest detection.
        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for (oi, obj) in self.objects.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                let dist = obj.centroid.distance(&det.centroid());
                if dist <= config.tracking_distance_threshold {
                    pairs.push((dist, oi, di));
                }
            }
        }
        pairs.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        for (_, oi, di) in pairs {
            if object_matched[oi] || detection_used[di] {
                continue;
            }
            object_matched[oi] = true;
            detection_used[di] = true;
            self.objects[oi].absorb(&detections[di]);
            out.matched.push(self.objects[oi].id);
        }
        out.matched.sort_unstable();

        let mut kept = Vec::with_capacity(self.objects.len() + detections.len());
        for (obj, matched) in self.objects.drain(..).zip(object_matched) {
            if matched {
                kept.push(obj);
                continue;
            }
            let mut obj = obj;
            obj.disappeared += 1;
            if obj.disappeared > config.max_disappeared_frames {
                log::debug!(
                    "tracker: object {} ({}) lost after {} missed frames",
                    obj.id,
                    obj.class_name,
                    obj.disappeared
                );
                out.removed.push(obj);
            } else {
                kept.push(obj);
            }
        }
        self.objects = kept;

        for (det, used) in detections.iter().zip(detection_used) {
            if used {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            log::debug!(
                "tracker: new object {} ({}) at ({:.1}, {:.1})",
                id,
                det.class_name,
                det.centroid().x,
                det.centroid().y
            );
            self.objects.push(TrackedObject::spawn(id, det, now));
            out.spawned.push(id);
        }

        debug_assert!(
            self.objects.windows(2).all(|w| w[0].id < w[1].id),
            "tracker objects must stay sorted by id"
        );
        out
    }
}

/// Tracker configuration bundled with its state.
#[derive(Clone, Debug, Default)]
pub struct CentroidTracker {
    config: TrackerConfig,
    state: TrackerState,
}

impl CentroidTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            state: TrackerState::new(),
        }
    }

    pub fn with_state(config: TrackerConfig, state: TrackerState) -> Self {
        Self { config, state }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn into_state(self) -> TrackerState {
        self.state
    }

    /// Process one frame and return the active set, sorted by id.
    pub fn update(&mut self, detections: &[Detection], now: NaiveDateTime) -> Vec<TrackedObject> {
        self.update_detailed(detections, now);
        self.state.active().to_vec()
    }

    pub fn update_detailed(
        &mut self,
        detections: &[Detection],
        now: NaiveDateTime,
    ) -> TrackerUpdate {
        self.state.update(&self.config, detections, now)
    }
}
