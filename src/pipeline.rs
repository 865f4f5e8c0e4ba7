//! The end-to-end run over one frame sequence.
//!
//! Stages run strictly one after another, each consuming the whole sequence:
//! tracking, ball interpolation, positions, camera motion, camera-adjusted
//! positions, pitch transform, speed and distance, teams, possession.

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::ball_assigner::{BallAssignerConfig, PlayerBallAssigner};
use crate::bbox::{BBox, Ltrb};
use crate::cache::{Stub, StubCache};
use crate::camera_motion::{add_adjust_positions_to_tracks, CameraMotionConfig, CameraMotionEstimator};
use crate::detection::Detection;
use crate::error::Result;
use crate::frame::Frame;
use crate::speed_distance::{SpeedDistanceConfig, SpeedDistanceEstimator};
use crate::stats;
use crate::track::{FrameTracks, Tracks};
use crate::tracker::{add_position_to_tracks, interpolate_ball_positions, ObjectTracker, TrackerConfig};
use crate::view_transformer::{ViewConfig, ViewTransformer};

/// Team labelling, e.g. jersey color clustering.
pub trait TeamAssigner {
    /// Called once with the first frame's players before any `assign`.
    fn fit(&mut self, _frame: &Frame, _players: &FrameTracks) {}

    /// Team id (1 or 2) and its display color for one player box.
    fn assign(&mut self, frame: &Frame, track_id: u32, bbox: &BBox<Ltrb>) -> (u8, [u8; 3]);
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub tracker: TrackerConfig,
    pub camera: CameraMotionConfig,
    pub view: ViewConfig,
    pub speed: SpeedDistanceConfig,
    pub assigner: BallAssignerConfig,

    /// Cache keys of the tracking and camera movement stubs.
    pub track_stub: Option<String>,
    pub camera_stub: Option<String>,
    pub read_from_stub: bool,
}

impl PipelineConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;

        Self::from_json_str(&data)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub tracks: Tracks,
    pub camera_movement: Vec<na::Vector2<f32>>,
    /// Player holding the ball at every frame.
    pub ball_possession: Vec<Option<u32>>,
    pub team_ball_control: Vec<u8>,
}

/// One run's worth of state. Track ids start over with every new pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    tracker: ObjectTracker,
    camera: CameraMotionEstimator,
    view: ViewTransformer,
    speed: SpeedDistanceEstimator,
    assigner: PlayerBallAssigner,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let view = ViewTransformer::new(&config.view)?;

        Ok(Self {
            tracker: ObjectTracker::new(config.tracker.clone()),
            camera: CameraMotionEstimator::new(config.camera.clone()),
            speed: SpeedDistanceEstimator::new(config.speed.clone()),
            assigner: PlayerBallAssigner::new(config.assigner.clone()),
            view,
            config,
        })
    }

    pub fn with_tracker(mut self, tracker: ObjectTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_camera(mut self, camera: CameraMotionEstimator) -> Self {
        self.camera = camera;
        self
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(
        mut self,
        frames: &[Frame],
        detections: &[Vec<Detection>],
        cache: Option<&dyn StubCache>,
        teams: Option<&mut dyn TeamAssigner>,
    ) -> Result<PipelineOutput> {
        let read = self.config.read_from_stub;
        let track_stub = stub(cache, self.config.track_stub.as_deref(), read);
        let camera_stub = stub(cache, self.config.camera_stub.as_deref(), read);

        let mut tracks = self.tracker.get_object_tracks(frames, detections, track_stub)?;
        tracks.ball = interpolate_ball_positions(&tracks.ball);
        add_position_to_tracks(&mut tracks);

        let camera_movement = self.camera.get_camera_movement(frames, camera_stub)?;
        add_adjust_positions_to_tracks(&mut tracks, &camera_movement);

        self.view.add_transformed_position_to_tracks(&mut tracks);

        info!("estimating speed and distance");
        self.speed.add_speed_and_distance_to_tracks(&mut tracks);

        if let Some(teams) = teams {
            assign_teams(teams, frames, &mut tracks);
        }

        let ball_possession = self.assigner.assign_possession(&mut tracks);
        let team_ball_control = stats::team_ball_control(&tracks, &ball_possession);

        info!(frames = frames.len(), "pipeline done");

        Ok(PipelineOutput {
            tracks,
            camera_movement,
            ball_possession,
            team_ball_control,
        })
    }
}

fn stub<'a>(cache: Option<&'a dyn StubCache>, key: Option<&'a str>, read: bool) -> Option<Stub<'a>> {
    Some(Stub::new(cache?, key?, read))
}

fn assign_teams(teams: &mut dyn TeamAssigner, frames: &[Frame], tracks: &mut Tracks) {
    if let (Some(frame), Some(players)) = (frames.first(), tracks.players.first()) {
        teams.fit(frame, players);
    }

    for (frame, players) in frames.iter().zip(tracks.players.iter_mut()) {
        for (&id, record) in players.iter_mut() {
            let (team, color) = teams.assign(frame, id, &record.bbox);

            record.team = Some(team);
            record.team_color = Some(color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config = PipelineConfig::from_json_str("{}").unwrap();

        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.tracker.max_lost, 30);
        assert_eq!(config.speed.frame_window, 5);
        assert!(!config.read_from_stub);
    }

    #[test]
    fn test_config_overrides() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "tracker": { "confidence_threshold": 0.3 },
                "speed": { "frame_rate": 30.0 },
                "track_stub": "stubs/tracks.json",
                "read_from_stub": true
            }"#,
        )
        .unwrap();

        assert_eq!(config.tracker.confidence_threshold, 0.3);
        assert_eq!(config.tracker.match_distance, 50.0);
        assert_eq!(config.speed.frame_rate, 30.0);
        assert_eq!(config.track_stub.as_deref(), Some("stubs/tracks.json"));
        assert_eq!(config.camera_stub, None);
    }

    #[test]
    fn test_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "assigner": { "max_player_ball_distance": 50.0 } }"#).unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.assigner.max_player_ball_distance, 50.0);

        assert!(matches!(
            PipelineConfig::from_json_file(dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
        assert!(matches!(PipelineConfig::from_json_str("{"), Err(Error::Serde(_))));
    }

    #[test]
    fn test_degenerate_view_rejected() {
        let mut config = PipelineConfig::default();
        config.view.pixel_vertices = [[0.0, 0.0]; 4];

        assert!(matches!(Pipeline::new(config), Err(Error::DegenerateHomography)));
    }
}
