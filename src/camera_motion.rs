use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::Stub;
use crate::error::{Error, Result};
use crate::flow::{FlowParams, LucasKanade, OpticalFlow};
use crate::frame::Frame;
use crate::math;
use crate::track::Tracks;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CameraMotionConfig {
    /// Displacements up to this many pixels count as a still camera.
    pub minimum_distance: f32,
    /// `[start, end)` column bands features are picked from; the rest of the
    /// frame is masked out to keep players out of the estimate.
    pub mask_strips: Vec<(usize, usize)>,
    pub flow: FlowParams,
}

impl Default for CameraMotionConfig {
    fn default() -> Self {
        Self {
            minimum_distance: 5.0,
            mask_strips: vec![(0, 20), (900, 1050)],
            flow: FlowParams::default(),
        }
    }
}

pub struct CameraMotionEstimator {
    config: CameraMotionConfig,
    flow: Box<dyn OpticalFlow>,
}

impl CameraMotionEstimator {
    pub fn new(config: CameraMotionConfig) -> Self {
        let flow = LucasKanade::new(config.flow.clone());

        Self::with_flow(config, Box::new(flow))
    }

    pub fn with_flow(config: CameraMotionConfig, flow: Box<dyn OpticalFlow>) -> Self {
        Self { config, flow }
    }

    /// Per-frame camera displacement, `(0, 0)` for frame 0 and for every
    /// frame without noticeable motion.
    pub fn get_camera_movement(
        &self,
        frames: &[Frame],
        stub: Option<Stub<'_>>,
    ) -> Result<Vec<na::Vector2<f32>>> {
        let first = frames.first().ok_or(Error::EmptySequence)?;

        if let Some(movement) = stub.and_then(|s| s.read::<Vec<na::Vector2<f32>>>()) {
            if movement.len() == frames.len() {
                return Ok(movement);
            }
        }

        let dims = first.dims();
        if let Some((index, frame)) = frames.iter().enumerate().find(|(_, f)| f.dims() != dims) {
            return Err(Error::FrameSizeMismatch {
                index,
                expected: dims,
                got: frame.dims(),
            });
        }

        info!(frames = frames.len(), "estimating camera movement");

        let strips = &self.config.mask_strips;
        let mut movement = vec![na::Vector2::zeros(); frames.len()];
        let mut features = self.flow.good_features(first, strips);

        for (idx, pair) in frames.windows(2).enumerate() {
            let (prev, curr) = (&pair[0], &pair[1]);
            let frame_num = idx + 1;

            if features.is_empty() {
                features = self.flow.good_features(curr, strips);
                continue;
            }

            let tracked = self.flow.track(prev, curr, &features);

            let mut max_distance = 0.0;
            let mut camera_movement = na::Vector2::zeros();

            for (old, new) in features.iter().zip(tracked.iter()) {
                let new = match new {
                    Some(p) => p,
                    None => continue,
                };

                let distance = math::distance(new, old);
                if distance > max_distance {
                    max_distance = distance;
                    camera_movement = math::xy_distance(old, new);
                }
            }

            if max_distance > self.config.minimum_distance {
                debug!(frame_num, x = camera_movement.x, y = camera_movement.y, "camera moved");

                movement[frame_num] = camera_movement;
                features = self.flow.good_features(curr, strips);
            }
        }

        if let Some(s) = stub {
            s.write(&movement);
        }

        Ok(movement)
    }
}

/// `position_adjusted = position - camera movement of that frame`, for every
/// category.
pub fn add_adjust_positions_to_tracks(tracks: &mut Tracks, movement: &[na::Vector2<f32>]) {
    for (frame_num, record) in tracks.iter_records_mut() {
        let shift = movement.get(frame_num).copied().unwrap_or_else(na::Vector2::zeros);

        record.position_adjusted = record.position.map(|p| p - shift);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use crate::cache::MemoryStubCache;
    use crate::track::TrackRecord;
    use ndarray::Array2;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Replays scripted per-frame displacements for every point.
    struct ScriptedFlow {
        shifts: Vec<Option<na::Vector2<f32>>>,
        call: Cell<usize>,
        selections: Rc<Cell<usize>>,
    }

    impl ScriptedFlow {
        fn new(shifts: Vec<Option<na::Vector2<f32>>>) -> Self {
            Self {
                shifts,
                call: Cell::new(0),
                selections: Rc::new(Cell::new(0)),
            }
        }
    }

    impl OpticalFlow for ScriptedFlow {
        fn good_features(&self, _: &Frame, _: &[(usize, usize)]) -> Vec<na::Point2<f32>> {
            self.selections.set(self.selections.get() + 1);
            vec![na::Point2::new(10.0, 10.0), na::Point2::new(20.0, 20.0)]
        }

        fn track(&self, _: &Frame, _: &Frame, pts: &[na::Point2<f32>]) -> Vec<Option<na::Point2<f32>>> {
            let i = self.call.get();
            self.call.set(i + 1);

            match self.shifts[i] {
                Some(s) => pts.iter().map(|p| Some(p + s)).collect(),
                None => vec![None; pts.len()],
            }
        }
    }

    fn frames(n: usize) -> Vec<Frame> {
        vec![Frame::new(Array2::zeros((16, 16))); n]
    }

    #[test]
    fn test_movement_rules() {
        let flow = ScriptedFlow::new(vec![
            Some(na::Vector2::new(3.0, 0.0)),
            Some(na::Vector2::new(-8.0, 6.0)),
            None,
        ]);
        let est = CameraMotionEstimator::with_flow(CameraMotionConfig::default(), Box::new(flow));

        let movement = est.get_camera_movement(&frames(4), None).unwrap();

        assert_eq!(movement.len(), 4);
        assert_eq!(movement[0], na::Vector2::zeros());
        assert_eq!(movement[1], na::Vector2::zeros());
        assert_eq!(movement[2], na::Vector2::new(8.0, -6.0));
        assert_eq!(movement[3], na::Vector2::zeros());
    }

    #[test]
    fn test_features_reselected_only_on_motion() {
        let flow = ScriptedFlow::new(vec![
            Some(na::Vector2::new(1.0, 0.0)),
            Some(na::Vector2::new(10.0, 0.0)),
            Some(na::Vector2::new(1.0, 0.0)),
        ]);
        let selections = flow.selections.clone();
        let est = CameraMotionEstimator::with_flow(CameraMotionConfig::default(), Box::new(flow));

        let movement = est.get_camera_movement(&frames(4), None).unwrap();

        assert_eq!(movement[2], na::Vector2::new(-10.0, 0.0));
        assert_eq!(selections.get(), 2);
    }

    #[test]
    fn test_empty_and_mismatched() {
        let est = CameraMotionEstimator::new(CameraMotionConfig::default());

        assert!(matches!(est.get_camera_movement(&[], None), Err(Error::EmptySequence)));

        let frames = vec![
            Frame::new(Array2::zeros((16, 16))),
            Frame::new(Array2::zeros((16, 8))),
        ];
        assert!(matches!(
            est.get_camera_movement(&frames, None),
            Err(Error::FrameSizeMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_deterministic_and_cached() {
        let frames: Vec<Frame> = (0..3)
            .map(|i| {
                Frame::new(Array2::from_shape_fn((64, 64), |(y, x)| {
                    let x = x as f32 - 6.0 * i as f32;
                    128.0 + 60.0 * (x * 0.3).sin() * (y as f32 * 0.25).cos()
                }))
            })
            .collect();

        let config = CameraMotionConfig {
            mask_strips: vec![(0, 64)],
            ..Default::default()
        };
        let est = CameraMotionEstimator::new(config);

        let a = est.get_camera_movement(&frames, None).unwrap();
        let b = est.get_camera_movement(&frames, None).unwrap();
        assert_eq!(a, b);

        let cache = MemoryStubCache::new();
        let stored = est
            .get_camera_movement(&frames, Some(Stub::new(&cache, "camera", true)))
            .unwrap();
        assert!(cache.contains("camera"));

        let other = CameraMotionEstimator::with_flow(
            CameraMotionConfig::default(),
            Box::new(ScriptedFlow::new(vec![])),
        );
        let cached = other
            .get_camera_movement(&frames, Some(Stub::new(&cache, "camera", true)))
            .unwrap();
        assert_eq!(cached, stored);
    }

    fn panned(n: usize, dx: f32) -> Vec<Frame> {
        (0..n)
            .map(|i| {
                Frame::new(Array2::from_shape_fn((120, 200), |(y, x)| {
                    let x = x as f32 - dx * i as f32;
                    let y = y as f32;
                    128.0 + 60.0 * (x * 0.12).sin() * (y * 0.1).cos() + 30.0 * ((x + y) * 0.07).sin()
                }))
            })
            .collect()
    }

    #[test]
    fn test_pan_is_measured() {
        let config = CameraMotionConfig {
            mask_strips: vec![(0, 30), (170, 200)],
            ..Default::default()
        };
        let est = CameraMotionEstimator::new(config);

        // edge points whose match leaves the frame must not win the max
        for dx in [8.0f32, -8.0] {
            let movement = est.get_camera_movement(&panned(3, dx), None).unwrap();

            assert_eq!(movement[0], na::Vector2::zeros());
            for m in &movement[1..] {
                assert!((m.x + dx).abs() < 0.5, "pan {}: {:?}", dx, movement);
                assert!(m.y.abs() < 0.5, "pan {}: {:?}", dx, movement);
            }
        }
    }

    #[test]
    fn test_adjust_positions() {
        let mut tracks = Tracks::with_frames(2);
        let mut record = TrackRecord::new(BBox::ltrb(0.0, 0.0, 10.0, 10.0));
        record.position = Some(na::Point2::new(100.0, 50.0));
        tracks.players[1].insert(7, record.clone());
        tracks.ball[1].insert(1, record);
        tracks.referees[0].insert(9, TrackRecord::new(BBox::ltrb(0.0, 0.0, 10.0, 10.0)));

        add_adjust_positions_to_tracks(
            &mut tracks,
            &[na::Vector2::zeros(), na::Vector2::new(4.0, -2.0)],
        );

        assert_eq!(tracks.players[1][&7].position_adjusted, Some(na::Point2::new(96.0, 52.0)));
        assert_eq!(tracks.ball[1][&1].position_adjusted, Some(na::Point2::new(96.0, 52.0)));
        assert_eq!(tracks.referees[0][&9].position_adjusted, None);
    }
}
