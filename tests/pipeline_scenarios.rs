use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use zone_guard::{
    parse_timestamp, step, AlertDispatcher, Detection, DetectionFilter, DisappearPolicy, Event,
    EventKind, EventLogStore, EventSink, InMemoryEventLog, Pipeline, PipelineConfig,
    PipelineState, Point, SinkError, StubSource, Zone, ZoneRegistry,
};

fn ts(sec: u32) -> NaiveDateTime {
    parse_timestamp(&format!("2024-05-01 12:00:{:02}", sec)).expect("timestamp")
}

fn gate() -> ZoneRegistry {
    ZoneRegistry::load(vec![Zone::new(
        "Gate",
        vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ],
    )])
    .expect("gate zone")
}

fn at(x: f32, y: f32) -> Detection {
    Detection::centered(Point::new(x, y), "person", 0.9)
}

/// Runs frames through `step` and returns every event tagged with its frame.
fn replay(
    config: &PipelineConfig,
    zones: &ZoneRegistry,
    frames: Vec<Vec<Detection>>,
) -> Vec<(usize, u64, String, EventKind)> {
    let mut state = PipelineState::default();
    let mut out = Vec::new();
    for (idx, detections) in frames.into_iter().enumerate() {
        let outcome = step(config, state, detections, zones, ts(idx as u32));
        state = outcome.state;
        out.extend(
            outcome
                .events
                .into_iter()
                .map(|e| (idx, e.object_id, e.zone, e.kind)),
        );
    }
    out
}

#[test]
fn gate_walkthrough_enters_moves_and_exits() {
    let events = replay(
        &PipelineConfig::default(),
        &gate(),
        vec![
            vec![at(20.0, 20.0)],
            vec![at(5.0, 5.0)],
            vec![at(5.0, 5.0)],
            vec![at(20.0, 20.0)],
        ],
    );
    assert_eq!(
        events,
        vec![
            (1, 1, "Gate".to_string(), EventKind::Entered),
            (2, 1, "Gate".to_string(), EventKind::Moved),
            (3, 1, "Gate".to_string(), EventKind::Exited),
        ]
    );
}

#[test]
fn reappearing_object_gets_new_id_and_fresh_entry() {
    let config = PipelineConfig {
        tracker: zone_guard::TrackerConfig {
            max_disappeared_frames: 2,
            ..Default::default()
        },
        ..PipelineConfig::default()
    };
    let events = replay(
        &config,
        &gate(),
        vec![
            vec![at(5.0, 5.0)],
            vec![],
            vec![],
            vec![],
            vec![at(5.0, 5.0)],
        ],
    );
    assert_eq!(
        events,
        vec![
            (0, 1, "Gate".to_string(), EventKind::Entered),
            // Still tracked while missing, so the stale centroid keeps it inside.
            (1, 1, "Gate".to_string(), EventKind::Moved),
            (2, 1, "Gate".to_string(), EventKind::Moved),
            (4, 2, "Gate".to_string(), EventKind::Entered),
        ]
    );
}

#[test]
fn identical_inputs_produce_identical_event_sequences() {
    let frames = || {
        vec![
            vec![at(20.0, 20.0), at(40.0, 2.0), at(3.0, 30.0)],
            vec![at(8.0, 8.0), at(30.0, 2.0), at(3.0, 9.0)],
            vec![at(9.0, 1.0), at(3.0, 2.0)],
            vec![at(60.0, 60.0)],
        ]
    };
    let config = PipelineConfig::default();
    let zones = gate();
    let first = replay(&config, &zones, frames());
    let second = replay(&config, &zones, frames());
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn objects_roaming_outside_zones_never_reach_the_log() {
    let frames = (0..10).map(|i| vec![at(50.0 + i as f32 * 5.0, 50.0)]).collect();
    assert!(replay(&PipelineConfig::default(), &gate(), frames).is_empty());
}

#[test]
fn crossing_objects_keep_their_nearest_identity() {
    let config = PipelineConfig::default();
    let zones = gate();
    let first = step(
        &config,
        PipelineState::default(),
        vec![at(0.0, 100.0), at(100.0, 100.0)],
        &zones,
        ts(0),
    );
    let second = step(
        &config,
        first.state,
        vec![at(90.0, 100.0), at(10.0, 100.0)],
        &zones,
        ts(1),
    );
    let objects = second.state.tracker.active();
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0].centroid, Point::new(10.0, 100.0));
    assert_eq!(objects[1].centroid, Point::new(90.0, 100.0));
}

#[test]
fn low_confidence_detections_are_ignored() {
    let config = PipelineConfig {
        filter: DetectionFilter::confidence_only(0.5),
        ..PipelineConfig::default()
    };
    let weak = Detection::centered(Point::new(5.0, 5.0), "person", 0.3);
    assert!(replay(&config, &gate(), vec![vec![weak]]).is_empty());
}

#[test]
fn emit_exited_policy_closes_membership_on_disappearance() {
    let config = PipelineConfig {
        disappear_policy: DisappearPolicy::EmitExited,
        ..PipelineConfig::default()
    };
    let events = replay(&config, &gate(), vec![vec![at(5.0, 5.0)], vec![]]);
    assert_eq!(
        events,
        vec![
            (0, 1, "Gate".to_string(), EventKind::Entered),
            (1, 1, "Gate".to_string(), EventKind::Exited),
        ]
    );
}

struct BrokenLog;

impl EventLogStore for BrokenLog {
    fn describe(&self) -> String {
        "broken".to_string()
    }

    fn append_event(&mut self, _ev: &Event) -> Result<()> {
        Err(anyhow!("read-only filesystem"))
    }
}

#[test]
fn event_log_failure_stops_the_run() {
    let mut pipeline = Pipeline::new(
        PipelineConfig::default(),
        gate(),
        EventSink::new(Box::new(BrokenLog)),
    );
    let mut source = StubSource::from_frames(vec![vec![at(5.0, 5.0)], vec![at(5.0, 5.0)]]);
    let err = pipeline
        .run(&mut source, &AtomicBool::new(false))
        .unwrap_err();
    assert!(err.downcast_ref::<SinkError>().is_some());
    assert_eq!(source.remaining(), 1);
}

struct FlakyAlerts {
    attempts: Arc<Mutex<u32>>,
}

impl AlertDispatcher for FlakyAlerts {
    fn name(&self) -> &str {
        "flaky"
    }

    fn notify(&mut self, _ev: &Event) -> Result<()> {
        *self.attempts.lock().unwrap() += 1;
        Err(anyhow!("alert channel down"))
    }
}

#[test]
fn alert_failures_do_not_affect_logging() -> Result<()> {
    let log = InMemoryEventLog::new();
    let attempts = Arc::new(Mutex::new(0));
    let sink = EventSink::new(Box::new(log.clone())).with_dispatcher(Box::new(FlakyAlerts {
        attempts: attempts.clone(),
    }));
    let mut pipeline = Pipeline::new(PipelineConfig::default(), gate(), sink);
    let mut source = StubSource::from_frames(vec![
        vec![at(5.0, 5.0)],
        vec![at(6.0, 6.0)],
        vec![at(30.0, 30.0)],
    ]);
    let stats = pipeline.run(&mut source, &AtomicBool::new(false))?;
    assert_eq!(stats.events, 3);
    assert_eq!(*attempts.lock().unwrap(), 3);
    let kinds: Vec<_> = log.events().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Entered, EventKind::Moved, EventKind::Exited]
    );
    Ok(())
}
