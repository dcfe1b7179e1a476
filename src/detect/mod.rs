mod filter;
mod result;
mod source;
mod sources;

pub use filter::{default_detection_classes, DetectionFilter};
pub use result::{BoundingBox, Detection, FrameDetections};
pub use source::DetectionSource;
pub use sources::{ReplaySource, StubSource};
