use anyhow::Result;
use std::collections::VecDeque;

use crate::detect::result::{Detection, FrameDetections};
use crate::detect::source::DetectionSource;

/// Scripted source for tests and demos. Frames are handed out in push order.
#[derive(Debug, Default)]
pub struct StubSource {
    frames: VecDeque<Vec<Detection>>,
    next_index: u64,
}

impl StubSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_frames(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            frames: frames.into(),
            next_index: 0,
        }
    }

    pub fn push_frame(&mut self, detections: Vec<Detection>) {
        self.frames.push_back(detections);
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl DetectionSource for StubSource {
    fn name(&self) -> &str {
        "stub"
    }

    fn next_frame(&mut self) -> Result<Option<FrameDetections>> {
        let Some(detections) = self.frames.pop_front() else {
            return Ok(None);
        };
        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(FrameDetections {
            index,
            timestamp: None,
            detections,
        }))
    }
}
