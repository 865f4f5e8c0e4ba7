use tracing::debug;

use crate::bbox::{BBox, Ltrb};
use crate::detection::{Detection, ObjectClass};
use crate::frame::Frame;
use crate::math;
use crate::relocalizer::{Relocalizer, RelocalizerFactory};

/// Lifecycle of a track.
///
/// `Active` tracks were matched on the last processed frame, `Lost(n)` ones
/// have missed `n` consecutive frames and can still be re-matched, `Dead`
/// ones missed more than `max_lost` frames and never come back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Active,
    Lost(u32),
    Dead,
}

impl TrackState {
    #[inline]
    pub fn is_alive(&self) -> bool {
        !matches!(self, TrackState::Dead)
    }
}

#[derive(Debug, Clone, Copy)]
enum Prediction {
    Pending,
    Lost,
    At(BBox<Ltrb>),
}

pub struct Participant {
    pub id: u32,
    pub class: ObjectClass,
    pub state: TrackState,
    pub lost_count: u32,
    pub last_bbox: BBox<Ltrb>,
    relocalizer: Option<Box<dyn Relocalizer>>,
    prediction: Prediction,
    matched: bool,
}

impl Participant {
    fn new(id: u32, frame: &Frame, det: &Detection, mut relocalizer: Box<dyn Relocalizer>) -> Self {
        relocalizer.init(frame, &det.bbox);

        Self {
            id,
            class: det.class,
            state: TrackState::Active,
            lost_count: 0,
            last_bbox: det.bbox,
            relocalizer: Some(relocalizer),
            prediction: Prediction::Pending,
            matched: true,
        }
    }

    /// Relocalizes at most once per frame; the result is reused for every
    /// detection compared against this track.
    fn predict(&mut self, frame: &Frame) -> Option<BBox<Ltrb>> {
        if let Prediction::Pending = self.prediction {
            self.prediction = match self.relocalizer.as_mut().and_then(|r| r.update(frame)) {
                Some(bbox) => Prediction::At(bbox),
                None => Prediction::Lost,
            };
        }

        match self.prediction {
            Prediction::At(bbox) => Some(bbox),
            _ => None,
        }
    }

    fn hit(&mut self, frame: &Frame, det: &Detection) {
        if let Some(r) = self.relocalizer.as_mut() {
            r.init(frame, &det.bbox);
        }

        self.last_bbox = det.bbox;
        self.lost_count = 0;
        self.state = TrackState::Active;
        self.matched = true;
    }

    fn miss(&mut self, max_lost: u32) {
        self.lost_count += 1;

        if self.lost_count > max_lost {
            self.state = TrackState::Dead;
            self.relocalizer = None;
        } else {
            self.state = TrackState::Lost(self.lost_count);
        }
    }
}

/// Live track table of one tracking run, owns the id sequence.
pub struct Scene {
    pub tracks: Vec<Participant>,
    next_id: u32,
    match_distance: f32,
    max_lost: u32,
}

impl Scene {
    pub fn new(match_distance: f32, max_lost: u32) -> Self {
        Self {
            tracks: Vec::with_capacity(64),
            next_id: 1,
            match_distance,
            max_lost,
        }
    }

    pub fn begin_frame(&mut self) {
        for t in &mut self.tracks {
            t.prediction = Prediction::Pending;
            t.matched = false;
        }
    }

    /// Greedy association: the first live track of the same class, in id
    /// order, whose predicted center is within `match_distance` of the
    /// detection's center claims it. Tracks already claimed this frame are
    /// skipped.
    pub fn match_detection(&mut self, frame: &Frame, det: &Detection) -> Option<u32> {
        let center = det.bbox.center();
        let match_distance = self.match_distance;

        for t in &mut self.tracks {
            if !t.state.is_alive() || t.matched || t.class != det.class {
                continue;
            }

            let predicted = match t.predict(frame) {
                Some(bbox) => bbox,
                None => continue,
            };

            if math::distance(&center, &predicted.center()) < match_distance {
                t.hit(frame, det);
                return Some(t.id);
            }
        }

        None
    }

    pub fn spawn<R: RelocalizerFactory + ?Sized>(
        &mut self,
        frame: &Frame,
        det: &Detection,
        factory: &R,
    ) -> u32 {
        let id = self.next_id;
        self.next_id += 1;

        debug!(id, class = ?det.class, "spawned track");
        self.tracks.push(Participant::new(id, frame, det, factory.create()));

        id
    }

    /// Ages every live track that was not matched this frame.
    pub fn end_frame(&mut self) {
        let max_lost = self.max_lost;

        for t in &mut self.tracks {
            if !t.state.is_alive() || t.matched {
                continue;
            }

            t.miss(max_lost);

            if !t.state.is_alive() {
                debug!(id = t.id, class = ?t.class, "track expired");
            }
        }
    }

    pub fn get(&self, id: u32) -> Option<&Participant> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn num_alive(&self) -> usize {
        self.tracks.iter().filter(|t| t.state.is_alive()).count()
    }
}
