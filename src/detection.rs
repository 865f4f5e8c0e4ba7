use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Player,
    Goalkeeper,
    Ball,
    Referee,
}

impl ObjectClass {
    /// Goalkeepers are tracked in the same pool as other players.
    #[inline]
    pub fn normalized(self) -> Self {
        match self {
            ObjectClass::Goalkeeper => ObjectClass::Player,
            other => other,
        }
    }
}

/// One detector output: box in pixels, confidence in `[0, 1]`, class label.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BBox<Ltrb>,
    #[serde(rename = "p")]
    pub confidence: f32,
    #[serde(rename = "c")]
    pub class: ObjectClass,
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class: ObjectClass) -> Self {
        Self {
            bbox: BBox::ltrb(x1, y1, x2, y2),
            confidence,
            class,
        }
    }

    /// Drops detections that are below `threshold` or have a degenerate box,
    /// and remaps goalkeepers to players.
    pub fn filtered(&self, threshold: f32) -> Option<Detection> {
        if self.confidence.is_nan() || self.confidence < threshold || !self.bbox.is_valid() {
            return None;
        }

        Some(Detection {
            class: self.class.normalized(),
            ..*self
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_remaps_goalkeeper() {
        let det = Detection::new(0.0, 0.0, 10.0, 20.0, 0.9, ObjectClass::Goalkeeper);

        assert_eq!(det.filtered(0.5).unwrap().class, ObjectClass::Player);
    }

    #[test]
    fn test_filter_drops_low_confidence_and_bad_boxes() {
        let weak = Detection::new(0.0, 0.0, 10.0, 20.0, 0.49, ObjectClass::Player);
        let flipped = Detection::new(10.0, 0.0, 0.0, 20.0, 0.9, ObjectClass::Player);
        let nan = Detection::new(0.0, 0.0, 10.0, 20.0, f32::NAN, ObjectClass::Player);

        assert!(weak.filtered(0.5).is_none());
        assert!(flipped.filtered(0.5).is_none());
        assert!(nan.filtered(0.5).is_none());
        assert!(Detection::new(0.0, 0.0, 1.0, 1.0, 0.5, ObjectClass::Ball)
            .filtered(0.5)
            .is_some());
    }

    #[test]
    fn test_deserialize() {
        let det: Detection =
            serde_json::from_str(r#"{"box":[1,2,3,4],"p":0.7,"c":"goalkeeper"}"#).unwrap();

        assert_eq!(det.class, ObjectClass::Goalkeeper);
        assert_eq!(det.bbox.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
    }
}
