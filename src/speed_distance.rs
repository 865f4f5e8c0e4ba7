use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::math;
use crate::track::{FrameTracks, Tracks};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SpeedDistanceConfig {
    pub frame_window: usize,
    pub frame_rate: f32,
    /// Meters per pixel, applied when a window had to fall back to box
    /// foot points. Empirical.
    pub bbox_scale: f32,
}

impl Default for SpeedDistanceConfig {
    fn default() -> Self {
        Self {
            frame_window: 5,
            frame_rate: 24.0,
            bbox_scale: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    pos: na::Point2<f32>,
    frame: usize,
    from_bbox: bool,
}

/// Windowed speed (km/h) and cumulative distance (m) for player tracks.
/// Referees and the ball are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SpeedDistanceEstimator {
    config: SpeedDistanceConfig,
}

impl SpeedDistanceEstimator {
    pub fn new(config: SpeedDistanceConfig) -> Self {
        Self { config }
    }

    fn start_anchor(&self, frames: &[FrameTracks], start: usize, id: u32) -> Option<Anchor> {
        let end = (start + self.config.frame_window).min(frames.len());

        (start..end)
            .find_map(|f| {
                let pos = frames[f].get(&id)?.position_transformed?;
                Some(Anchor { pos, frame: f, from_bbox: false })
            })
            .or_else(|| {
                let record = frames[start].get(&id)?;
                Some(Anchor {
                    pos: record.bbox.foot(),
                    frame: start,
                    from_bbox: true,
                })
            })
    }

    fn end_anchor(&self, frames: &[FrameTracks], start: usize, last: usize, id: u32) -> Option<Anchor> {
        (start + 1..=last)
            .rev()
            .find_map(|f| {
                let pos = frames[f].get(&id)?.position_transformed?;
                Some(Anchor { pos, frame: f, from_bbox: false })
            })
            .or_else(|| {
                (start + 1..=last).rev().find_map(|f| {
                    let record = frames[f].get(&id)?;
                    Some(Anchor {
                        pos: record.bbox.foot(),
                        frame: f,
                        from_bbox: true,
                    })
                })
            })
    }

    pub fn add_speed_and_distance_to_tracks(&self, tracks: &mut Tracks) {
        self.add_speed_and_distance(&mut tracks.players);
    }

    pub fn add_speed_and_distance(&self, frames: &mut [FrameTracks]) {
        let n = frames.len();
        let window = self.config.frame_window.max(1);
        let mut total_distance: HashMap<u32, f32> = HashMap::new();

        if n == 0 {
            return;
        }

        for start in (0..n).step_by(window) {
            let last = (start + window).min(n - 1);
            let ids: Vec<u32> = frames[start].keys().copied().collect();

            for id in ids {
                let (a, b) = match (
                    self.start_anchor(frames, start, id),
                    self.end_anchor(frames, start, last, id),
                ) {
                    (Some(a), Some(b)) if a.frame < b.frame => (a, b),
                    _ => continue,
                };

                let mut distance = math::distance(&a.pos, &b.pos);
                if a.from_bbox || b.from_bbox {
                    distance *= self.config.bbox_scale;
                }

                let elapsed = (b.frame - a.frame) as f32 / self.config.frame_rate;
                if elapsed.is_nan() || elapsed <= 0.0 {
                    continue;
                }

                let speed = distance / elapsed * 3.6;
                let total = total_distance.entry(id).or_insert(0.0);
                *total += distance;

                for frame in &mut frames[start..=last] {
                    if let Some(record) = frame.get_mut(&id) {
                        record.speed = Some(speed);
                        record.distance = Some(*total);
                    }
                }
            }
        }

        // frames no window covered: standing still, distance carried over
        let mut carried: HashMap<u32, f32> = HashMap::new();
        for frame in frames.iter_mut() {
            for (id, record) in frame.iter_mut() {
                let last = carried.entry(*id).or_insert(0.0);

                match record.distance {
                    Some(d) => *last = d,
                    None => record.distance = Some(*last),
                }

                if record.speed.is_none() {
                    record.speed = Some(0.0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use crate::track::TrackRecord;
    use approx::assert_relative_eq;

    fn record(x: f32, transformed: Option<f32>) -> TrackRecord {
        let mut r = TrackRecord::new(BBox::ltrb(x - 5.0, 0.0, x + 5.0, 40.0));
        r.position_transformed = transformed.map(|t| na::Point2::new(t, 10.0));
        r
    }

    fn walk(n: usize, meters_per_frame: f32) -> Vec<FrameTracks> {
        (0..n)
            .map(|i| {
                let mut f = FrameTracks::new();
                f.insert(4, record(0.0, Some(i as f32 * meters_per_frame)));
                f
            })
            .collect()
    }

    #[test]
    fn test_constant_velocity() {
        let mut frames = walk(11, 1.0);
        SpeedDistanceEstimator::default().add_speed_and_distance(&mut frames);

        // 5 m over 5 frames at 24 fps
        assert_relative_eq!(frames[0][&4].speed.unwrap(), 86.4, epsilon = 1e-3);
        assert_relative_eq!(frames[4][&4].distance.unwrap(), 5.0, epsilon = 1e-4);
        assert_relative_eq!(frames[10][&4].distance.unwrap(), 10.0, epsilon = 1e-4);
    }

    #[test]
    fn test_distance_monotonic_with_gaps() {
        let mut frames = walk(23, 0.5);
        for f in [5usize, 6, 12, 17] {
            frames[f].clear();
        }

        SpeedDistanceEstimator::default().add_speed_and_distance(&mut frames);

        let mut prev = 0.0;
        for f in &frames {
            if let Some(r) = f.get(&4) {
                let d = r.distance.unwrap();
                assert!(d >= prev, "{} < {}", d, prev);
                assert!(r.speed.is_some());
                prev = d;
            }
        }
        assert!(prev > 0.0);
    }

    #[test]
    fn test_bbox_fallback_is_scaled() {
        let mut frames: Vec<FrameTracks> = (0..6)
            .map(|i| {
                let mut f = FrameTracks::new();
                f.insert(2, record(i as f32 * 20.0, None));
                f
            })
            .collect();

        SpeedDistanceEstimator::default().add_speed_and_distance(&mut frames);

        // 100 px * 0.05 = 5 m in 5 frames
        assert_relative_eq!(frames[5][&2].distance.unwrap(), 5.0, epsilon = 1e-4);
        assert_relative_eq!(frames[5][&2].speed.unwrap(), 86.4, epsilon = 1e-3);
    }

    #[test]
    fn test_single_frame_defaults() {
        let mut frames = walk(1, 1.0);
        SpeedDistanceEstimator::default().add_speed_and_distance(&mut frames);

        assert_eq!(frames[0][&4].speed, Some(0.0));
        assert_eq!(frames[0][&4].distance, Some(0.0));
    }

    #[test]
    fn test_unusable_frame_rate_counts_as_standing() {
        for frame_rate in [f32::NAN, -24.0] {
            let mut frames = walk(11, 1.0);
            SpeedDistanceEstimator::new(SpeedDistanceConfig {
                frame_rate,
                ..Default::default()
            })
            .add_speed_and_distance(&mut frames);

            for f in &frames {
                assert_eq!(f[&4].speed, Some(0.0));
                assert_eq!(f[&4].distance, Some(0.0));
            }
        }
    }

    #[test]
    fn test_referees_and_ball_untouched() {
        let mut tracks = Tracks::with_frames(6);
        for i in 0..6 {
            tracks.referees[i].insert(3, record(0.0, Some(i as f32)));
            tracks.ball[i].insert(1, record(0.0, Some(i as f32)));
        }

        SpeedDistanceEstimator::default().add_speed_and_distance_to_tracks(&mut tracks);

        assert!(tracks.referees.iter().all(|f| f[&3].speed.is_none()));
        assert!(tracks.ball.iter().all(|f| f[&1].distance.is_none()));
    }
}
