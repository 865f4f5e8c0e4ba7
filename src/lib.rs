//! Multi-object tracking for football broadcast footage: detection to track
//! association, camera motion compensation, pixel to pitch mapping and
//! per-player kinematics.

pub mod ball_assigner;
pub mod bbox;
pub mod cache;
pub mod camera_motion;
pub mod detection;
pub mod error;
pub mod flow;
pub mod frame;
pub mod math;
pub mod pipeline;
pub mod relocalizer;
pub mod scene;
pub mod speed_distance;
pub mod stats;
pub mod track;
pub mod tracker;
pub mod view_transformer;

#[cfg(feature = "opencv")]
pub mod cv;

pub use bbox::{BBox, Ltrb, Xywh};
pub use detection::{Detection, ObjectClass};
pub use error::{Error, Result};
pub use frame::Frame;
pub use pipeline::{Pipeline, PipelineConfig, PipelineOutput, TeamAssigner};
pub use track::{FrameTracks, TrackRecord, Tracks, BALL_ID};
pub use tracker::{ObjectTracker, TrackerConfig};
