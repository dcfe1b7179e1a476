use std::collections::BTreeMap;

use crate::detect::result::Detection;

/// Classes monitored when the configuration does not say otherwise (COCO ids).
pub fn default_detection_classes() -> BTreeMap<String, u32> {
    [("person", 0), ("car", 2), ("motorcycle", 3), ("bus", 5), ("truck", 7)]
        .into_iter()
        .map(|(name, id)| (name.to_string(), id))
        .collect()
}

/// Confidence and class pre-filter applied before tracking.
///
/// A detection survives when `confidence >= confidence_threshold` and its class
/// id is one of the monitored classes; it is then labelled with the class name.
/// An empty class map monitors every class.
#[derive(Clone, Debug)]
pub struct DetectionFilter {
    confidence_threshold: f32,
    classes: BTreeMap<u32, String>,
}

impl DetectionFilter {
    pub fn new(confidence_threshold: f32, detection_classes: &BTreeMap<String, u32>) -> Self {
        let mut classes = BTreeMap::new();
        for (name, id) in detection_classes {
            classes.entry(*id).or_insert_with(|| name.clone());
        }
        Self {
            confidence_threshold,
            classes,
        }
    }

    /// Keeps every class, filtering on confidence only.
    pub fn confidence_only(confidence_threshold: f32) -> Self {
        Self::new(confidence_threshold, &BTreeMap::new())
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections
            .into_iter()
            .filter(|det| det.confidence >= self.confidence_threshold)
            .filter_map(|mut det| {
                if self.classes.is_empty() {
                    if det.class_name.is_empty() {
                        det.class_name = format!("class_{}", det.class_id);
                    }
                    return Some(det);
                }
                let name = self.classes.get(&det.class_id)?;
                det.class_name = name.clone();
                Some(det)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;

    fn det(class_id: u32, confidence: f32) -> Detection {
        Detection::new(BoundingBox::default(), class_id, confidence)
    }

    #[test]
    fn drops_low_confidence_and_unmonitored_classes() {
        let filter = DetectionFilter::new(0.5, &default_detection_classes());
        let kept = filter.apply(vec![det(0, 0.9), det(0, 0.49), det(1, 0.99), det(7, 0.5)]);
        let names: Vec<_> = kept.iter().map(|d| d.class_name.as_str()).collect();
        assert_eq!(names, vec!["person", "truck"]);
    }

    #[test]
    fn empty_class_map_keeps_all_classes() {
        let filter = DetectionFilter::confidence_only(0.3);
        let kept = filter.apply(vec![det(42, 0.4), det(1, 0.2)]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].class_name, "class_42");
    }

    #[test]
    fn existing_label_survives_when_all_classes_kept() {
        let filter = DetectionFilter::confidence_only(0.0);
        let mut labelled = det(0, 0.8);
        labelled.class_name = "forklift".to_string();
        assert_eq!(filter.apply(vec![labelled])[0].class_name, "forklift");
    }

    #[test]
    fn nan_confidence_is_dropped() {
        let filter = DetectionFilter::confidence_only(0.0);
        assert!(filter.apply(vec![det(0, f32::NAN)]).is_empty());
    }
}
