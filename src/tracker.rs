use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bbox::{BBox, Ltrb};
use crate::cache::Stub;
use crate::detection::{Detection, ObjectClass};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::relocalizer::{Relocalizer, RelocalizerFactory, TemplateConfig, TemplateRelocalizer};
use crate::scene::{Scene, TrackState};
use crate::track::{FrameTracks, TrackRecord, Tracks, BALL_ID};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    pub confidence_threshold: f32,
    /// Max pixel distance between a detection center and a track's
    /// predicted center.
    pub match_distance: f32,
    /// Consecutive missed frames tolerated before a track dies.
    pub max_lost: u32,
    pub template: TemplateConfig,
}

impl TrackerConfig {
    pub fn new(confidence_threshold: f32, max_lost: u32) -> Self {
        Self {
            confidence_threshold,
            max_lost,
            ..Default::default()
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            match_distance: 50.0,
            max_lost: 30,
            template: TemplateConfig::default(),
        }
    }
}

/// Tracks of one frame, split by category.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameOutput {
    pub players: FrameTracks,
    pub referees: FrameTracks,
    pub ball: FrameTracks,
}

pub struct ObjectTracker {
    config: TrackerConfig,
    scene: Scene,
    factory: Box<dyn RelocalizerFactory>,
}

impl ObjectTracker {
    /// Tracker relocalizing with [`TemplateRelocalizer`].
    pub fn new(config: TrackerConfig) -> Self {
        let template = config.template.clone();

        Self::with_relocalizer(
            config,
            Box::new(move || -> Box<dyn Relocalizer> {
                Box::new(TemplateRelocalizer::new(template.clone()))
            }),
        )
    }

    pub fn with_relocalizer(config: TrackerConfig, factory: Box<dyn RelocalizerFactory>) -> Self {
        let scene = Scene::new(config.match_distance, config.max_lost);

        Self {
            config,
            scene,
            factory,
        }
    }

    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn track_state(&self, id: u32) -> Option<TrackState> {
        self.scene.get(id).map(|t| t.state)
    }

    pub fn lost_count(&self, id: u32) -> Option<u32> {
        self.scene.get(id).map(|t| t.lost_count)
    }

    /// Associates one frame's detections with the live tracks. Frames must
    /// be fed in temporal order.
    pub fn update(&mut self, frame: &Frame, detections: &[Detection]) -> FrameOutput {
        let mut out = FrameOutput::default();
        let mut ball: Option<Detection> = None;

        self.scene.begin_frame();

        for det in detections {
            let det = match det.filtered(self.config.confidence_threshold) {
                Some(det) => det,
                None => continue,
            };

            let id = match self.scene.match_detection(frame, &det) {
                Some(id) => id,
                None => self.scene.spawn(frame, &det, self.factory.as_ref()),
            };

            match det.class {
                ObjectClass::Player | ObjectClass::Goalkeeper => {
                    out.players.insert(id, TrackRecord::new(det.bbox));
                }
                ObjectClass::Referee => {
                    out.referees.insert(id, TrackRecord::new(det.bbox));
                }
                ObjectClass::Ball => {
                    if ball.map_or(true, |b| det.confidence > b.confidence) {
                        ball = Some(det);
                    }
                }
            }
        }

        if let Some(det) = ball {
            out.ball.insert(BALL_ID, TrackRecord::new(det.bbox));
        }

        self.scene.end_frame();

        out
    }

    /// Runs the tracker over the whole sequence, or returns the stub stored
    /// for it. The result is written back to the stub when one is given.
    pub fn get_object_tracks(
        &mut self,
        frames: &[Frame],
        detections: &[Vec<Detection>],
        stub: Option<Stub<'_>>,
    ) -> Result<Tracks> {
        if frames.is_empty() {
            return Err(Error::EmptySequence);
        }

        if frames.len() != detections.len() {
            return Err(Error::FrameCountMismatch {
                frames: frames.len(),
                detections: detections.len(),
            });
        }

        if let Some(tracks) = stub.and_then(|s| s.read::<Tracks>()) {
            if tracks.num_frames() == frames.len() {
                return Ok(tracks);
            }
        }

        info!(frames = frames.len(), "tracking objects");

        let mut tracks = Tracks::with_frames(frames.len());
        for (idx, (frame, dets)) in frames.iter().zip(detections).enumerate() {
            let out = self.update(frame, dets);

            tracks.players[idx] = out.players;
            tracks.referees[idx] = out.referees;
            tracks.ball[idx] = out.ball;
        }

        debug!(alive = self.scene.num_alive(), "tracking done");

        if let Some(s) = stub {
            s.write(&tracks);
        }

        Ok(tracks)
    }
}

/// Sets `position`: center for the ball, foot point for everybody else.
pub fn add_position_to_tracks(tracks: &mut Tracks) {
    for (class, frames) in tracks.categories_mut() {
        for record in frames.iter_mut().flat_map(|f| f.values_mut()) {
            record.position = Some(match class {
                ObjectClass::Ball => record.bbox.center(),
                _ => record.bbox.foot(),
            });
        }
    }
}

/// Fills frames without a ball by linear interpolation of each box
/// coordinate over the frame index. Frames before the first or after the
/// last detection repeat the nearest detection. With no detection at all
/// the input is returned unchanged.
pub fn interpolate_ball_positions(ball: &[FrameTracks]) -> Vec<FrameTracks> {
    let known: Vec<(usize, BBox<Ltrb>)> = ball
        .iter()
        .enumerate()
        .filter_map(|(idx, f)| f.get(&BALL_ID).map(|r| (idx, r.bbox)))
        .collect();

    if known.is_empty() {
        return ball.to_vec();
    }

    let mut out = Vec::with_capacity(ball.len());
    let mut next = 0;

    for (idx, frame) in ball.iter().enumerate() {
        if frame.contains_key(&BALL_ID) {
            out.push(frame.clone());
            continue;
        }

        while next < known.len() && known[next].0 < idx {
            next += 1;
        }

        let bbox = match (next.checked_sub(1).map(|i| known[i]), known.get(next).copied()) {
            (Some((i0, b0)), Some((i1, b1))) => {
                b0.lerp(&b1, (idx - i0) as f32 / (i1 - i0) as f32)
            }
            (Some((_, b)), None) | (None, Some((_, b))) => b,
            (None, None) => {
                out.push(frame.clone());
                continue;
            }
        };

        let mut filled = frame.clone();
        filled.insert(BALL_ID, TrackRecord::new(bbox));
        out.push(filled);
    }

    out
}
