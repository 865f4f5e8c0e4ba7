use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::frame::Frame;

/// Single-object tracker used to predict where a live track moved to
/// before it is compared against the frame's detections.
pub trait Relocalizer {
    /// (Re)seeds the tracker on `bbox` in `frame`.
    fn init(&mut self, frame: &Frame, bbox: &BBox<Ltrb>);

    /// Searches `frame` for the object, `None` when it could not be found.
    fn update(&mut self, frame: &Frame) -> Option<BBox<Ltrb>>;
}

pub trait RelocalizerFactory {
    fn create(&self) -> Box<dyn Relocalizer>;
}

impl<F> RelocalizerFactory for F
where
    F: Fn() -> Box<dyn Relocalizer>,
{
    #[inline]
    fn create(&self) -> Box<dyn Relocalizer> {
        self()
    }
}

/// Always reports the box it was last seeded with. Matching then reduces to
/// comparing detections against the last known box, which is what a
/// detection-only run (no pixel data) needs.
#[derive(Debug, Default, Clone)]
pub struct StaticRelocalizer {
    bbox: Option<BBox<Ltrb>>,
}

impl Relocalizer for StaticRelocalizer {
    fn init(&mut self, _frame: &Frame, bbox: &BBox<Ltrb>) {
        self.bbox = Some(*bbox);
    }

    fn update(&mut self, _frame: &Frame) -> Option<BBox<Ltrb>> {
        self.bbox
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TemplateConfig {
    /// Max shift in pixels searched around the previous position.
    pub search_radius: i32,
    pub search_step: i32,
    /// Template samples per axis, boxes larger than this are subsampled.
    pub max_samples: usize,
    /// Largest mean squared intensity difference accepted as a hit.
    pub max_error: f32,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            search_radius: 24,
            search_step: 2,
            max_samples: 16,
            max_error: 900.0,
        }
    }
}

/// Appearance tracker: remembers a subsampled intensity patch of the seeded
/// box and relocates it with an exhaustive SSD search around the last
/// position.
#[derive(Debug, Clone)]
pub struct TemplateRelocalizer {
    config: TemplateConfig,
    bbox: Option<BBox<Ltrb>>,
    // (offset from box center, intensity)
    template: Vec<(f32, f32, f32)>,
}

impl TemplateRelocalizer {
    pub fn new(config: TemplateConfig) -> Self {
        Self {
            config,
            bbox: None,
            template: Vec::new(),
        }
    }

    fn error_at(&self, frame: &Frame, cx: f32, cy: f32) -> f32 {
        let sum: f32 = self
            .template
            .iter()
            .map(|&(ox, oy, v)| {
                let d = frame.sample(cx + ox, cy + oy) - v;
                d * d
            })
            .sum();

        sum / self.template.len() as f32
    }
}

impl Default for TemplateRelocalizer {
    fn default() -> Self {
        Self::new(TemplateConfig::default())
    }
}

impl Relocalizer for TemplateRelocalizer {
    fn init(&mut self, frame: &Frame, bbox: &BBox<Ltrb>) {
        let n = self.config.max_samples.max(2);
        let nx = (bbox.width().ceil() as usize).clamp(2, n);
        let ny = (bbox.height().ceil() as usize).clamp(2, n);
        let c = bbox.center();

        self.template.clear();
        for j in 0..ny {
            let y = bbox.top() + bbox.height() * j as f32 / (ny - 1) as f32;
            for i in 0..nx {
                let x = bbox.left() + bbox.width() * i as f32 / (nx - 1) as f32;
                self.template.push((x - c.x, y - c.y, frame.sample(x, y)));
            }
        }

        self.bbox = Some(*bbox);
    }

    fn update(&mut self, frame: &Frame) -> Option<BBox<Ltrb>> {
        let bbox = self.bbox?;
        if self.template.is_empty() {
            return None;
        }

        let c = bbox.center();
        let r = self.config.search_radius.max(0);
        let step = self.config.search_step.max(1);

        let mut best = (0, 0, self.error_at(frame, c.x, c.y));

        let mut dy = -r;
        while dy <= r {
            let mut dx = -r;
            while dx <= r {
                let err = self.error_at(frame, c.x + dx as f32, c.y + dy as f32);
                if err < best.2 {
                    best = (dx, dy, err);
                }
                dx += step;
            }
            dy += step;
        }

        if best.2 > self.config.max_error {
            return None;
        }

        let moved = bbox
            .as_xywh()
            .moved_to(c.x + best.0 as f32, c.y + best.1 as f32)
            .as_ltrb();

        self.bbox = Some(moved);

        Some(moved)
    }
}
