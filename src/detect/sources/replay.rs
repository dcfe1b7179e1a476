use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::detect::result::{Detection, FrameDetections};
use crate::detect::source::DetectionSource;
use crate::parse_timestamp;

/// Replays detector output recorded as JSON lines, one frame per line.
///
/// Line layout:
///
/// ```text
/// {"timestamp": "2024-05-01 12:00:00", "detections": [{"x": 0, "y": 0, "width": 10, "height": 10, "classId": 0, "confidence": 0.9}]}
/// ```
///
/// `timestamp` is optional. Blank lines are skipped and do not count as frames.
pub struct ReplaySource {
    name: String,
    lines: Box<dyn Iterator<Item = std::io::Result<String>>>,
    line_no: usize,
    frame_index: u64,
}

#[derive(Debug, Deserialize)]
struct ReplayFrame {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    detections: Vec<Detection>,
}

impl ReplaySource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open detections file {}", path.display()))?;
        Ok(Self::from_reader(
            path.display().to_string(),
            BufReader::new(file),
        ))
    }

    pub fn from_reader<R: BufRead + 'static>(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            lines: Box::new(reader.lines()),
            line_no: 0,
            frame_index: 0,
        }
    }

    fn parse_line(&self, line: &str) -> Result<FrameDetections> {
        let frame: ReplayFrame = serde_json::from_str(line)
            .map_err(|e| anyhow!("{}:{}: invalid frame record: {}", self.name, self.line_no, e))?;
        let timestamp = match frame.timestamp.as_deref() {
            Some(raw) => Some(
                parse_timestamp(raw)
                    .with_context(|| format!("{}:{}", self.name, self.line_no))?,
            ),
            None => None,
        };
        Ok(FrameDetections {
            index: self.frame_index,
            timestamp,
            detections: frame.detections,
        })
    }
}

impl DetectionSource for ReplaySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> Result<Option<FrameDetections>> {
        loop {
            let Some(line) = self.lines.next() else {
                return Ok(None);
            };
            let line = line.with_context(|| format!("failed to read {}", self.name))?;
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let frame = self.parse_line(&line)?;
            self.frame_index += 1;
            return Ok(Some(frame));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn source(raw: &'static str) -> ReplaySource {
        ReplaySource::from_reader("test.jsonl", Cursor::new(raw))
    }

    #[test]
    fn replays_frames_in_order_and_skips_blank_lines() {
        let mut src = source(concat!(
            r#"{"timestamp": "2024-05-01 12:00:00", "detections": [{"x": 10, "y": 10, "width": 20, "height": 20, "classId": 0, "confidence": 0.9}]}"#,
            "\n\n",
            r#"{"detections": []}"#,
            "\n"
        ));
        let first = src.next_frame().unwrap().expect("frame 1");
        assert_eq!(first.index, 0);
        assert_eq!(first.detections.len(), 1);
        assert_eq!(first.detections[0].centroid(), crate::Point::new(20.0, 20.0));
        assert!(first.timestamp.is_some());

        let second = src.next_frame().unwrap().expect("frame 2");
        assert_eq!(second.index, 1);
        assert!(second.detections.is_empty());
        assert!(second.timestamp.is_none());

        assert!(src.next_frame().unwrap().is_none());
    }

    #[test]
    fn malformed_line_names_its_position() {
        let mut src = source("{\"detections\": []}\nnot json\n");
        assert!(src.next_frame().unwrap().is_some());
        let err = src.next_frame().unwrap_err();
        assert!(format!("{err}").contains("test.jsonl:2"));
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let mut src = source(r#"{"timestamp": "yesterday", "detections": []}"#);
        assert!(src.next_frame().is_err());
    }
}
