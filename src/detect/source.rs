use anyhow::Result;

use crate::detect::result::FrameDetections;

/// Detector output boundary.
///
/// The detector itself (decoding plus model inference) lives outside this crate.
/// A source hands over one frame's detections at a time, in capture order, and
/// returns `None` once the stream is exhausted.
pub trait DetectionSource {
    /// Source identifier for logs.
    fn name(&self) -> &str;

    fn next_frame(&mut self) -> Result<Option<FrameDetections>>;
}
