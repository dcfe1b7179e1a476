//! Per-frame wiring: filter, track, evaluate zones, emit.
//!
//! [`step`] is the whole algorithm as a pure function over [`PipelineState`];
//! [`Pipeline`] adds the zone registry, the event sink and a run loop.

use anyhow::Result;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::detect::{Detection, DetectionFilter, DetectionSource, FrameDetections};
use crate::intrusion::{forget_object, DisappearPolicy, MembershipState};
use crate::sink::EventSink;
use crate::tracker::{TrackerConfig, TrackerState, TrackerUpdate};
use crate::zone::ZoneRegistry;
use crate::{now_local, Event, EventKind};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub filter: DetectionFilter,
    pub tracker: TrackerConfig,
    pub disappear_policy: DisappearPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter: DetectionFilter::confidence_only(0.0),
            tracker: TrackerConfig::default(),
            disappear_policy: DisappearPolicy::default(),
        }
    }
}

/// Everything that survives from one frame to the next.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineState {
    pub tracker: TrackerState,
    pub membership: MembershipState,
}

#[derive(Clone, Debug)]
pub struct FrameOutcome {
    pub state: PipelineState,
    /// In emission order: disappearance exits first, then objects by id and
    /// zones in registry order.
    pub events: Vec<Event>,
    pub update: TrackerUpdate,
}

/// Advance the pipeline by one frame.
///
/// Identical inputs always produce identical outcomes.
pub fn step(
    config: &PipelineConfig,
    mut state: PipelineState,
    detections: Vec<Detection>,
    zones: &ZoneRegistry,
    now: NaiveDateTime,
) -> FrameOutcome {
    let detections = config.filter.apply(detections);
    let update = state.tracker.update(&config.tracker, &detections, now);

    let mut events = Vec::new();
    for removed in &update.removed {
        events.extend(forget_object(
            &mut state.membership,
            config.disappear_policy,
            removed,
            zones,
            now,
        ));
    }
    events.extend(
        state
            .membership
            .evaluate(state.tracker.active(), zones, now),
    );

    FrameOutcome {
        state,
        events,
        update,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub frames: u64,
    pub events: u64,
    pub by_kind: BTreeMap<String, u64>,
    /// True when the run ended on the stop flag rather than end of input.
    pub interrupted: bool,
}

impl RunStats {
    fn count(&mut self, kind: EventKind) {
        self.events += 1;
        *self.by_kind.entry(kind.to_string()).or_insert(0) += 1;
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    zones: ZoneRegistry,
    sink: EventSink,
    state: PipelineState,
    stats: RunStats,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, zones: ZoneRegistry, sink: EventSink) -> Self {
        Self {
            config,
            zones,
            sink,
            state: PipelineState::default(),
            stats: RunStats::default(),
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn zones(&self) -> &ZoneRegistry {
        &self.zones
    }

    /// Run one frame through the pipeline. Each event is logged before it is
    /// alerted; a log failure stops processing and is returned.
    pub fn process_frame(&mut self, frame: FrameDetections) -> Result<Vec<Event>> {
        let now = frame.timestamp.unwrap_or_else(now_local);
        let state = std::mem::take(&mut self.state);
        let outcome = step(&self.config, state, frame.detections, &self.zones, now);
        self.state = outcome.state;
        self.stats.frames += 1;

        for ev in &outcome.events {
            self.sink.record(ev)?;
            self.sink.notify(ev);
            self.stats.count(ev.kind);
        }
        Ok(outcome.events)
    }

    /// Drain `source` until it is exhausted or `stop` is set. The flag is
    /// checked between frames only.
    pub fn run(&mut self, source: &mut dyn DetectionSource, stop: &AtomicBool) -> Result<RunStats> {
        self.run_with(source, stop, |_, _| {})
    }

    /// Like [`Pipeline::run`], calling `on_frame` with the running totals and
    /// the frame's events after every processed frame.
    pub fn run_with<F>(
        &mut self,
        source: &mut dyn DetectionSource,
        stop: &AtomicBool,
        mut on_frame: F,
    ) -> Result<RunStats>
    where
        F: FnMut(&RunStats, &[Event]),
    {
        log::info!(
            "processing {} against {} zone(s)",
            source.name(),
            self.zones.len()
        );
        loop {
            if stop.load(Ordering::SeqCst) {
                log::info!("stop requested after {} frame(s)", self.stats.frames);
                self.stats.interrupted = true;
                break;
            }
            let Some(frame) = source.next_frame()? else {
                break;
            };
            let events = self.process_frame(frame)?;
            on_frame(&self.stats, &events);
        }
        Ok(self.stats.clone())
    }

    /// Flush alerts and hand back the final state.
    pub fn finish(mut self) -> (PipelineState, RunStats) {
        self.sink.close();
        (std::mem::take(&mut self.state), std::mem::take(&mut self.stats))
    }
}
