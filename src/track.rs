use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bbox::{BBox, Ltrb};
use crate::detection::ObjectClass;

/// Per-frame state of one tracked object.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrackRecord {
    pub bbox: BBox<Ltrb>,

    // foot point for people, center for the ball
    #[serde(default)]
    pub position: Option<na::Point2<f32>>,
    #[serde(default)]
    pub position_adjusted: Option<na::Point2<f32>>,
    #[serde(default)]
    pub position_transformed: Option<na::Point2<f32>>,

    // km/h
    #[serde(default)]
    pub speed: Option<f32>,

    // meters, cumulative
    #[serde(default)]
    pub distance: Option<f32>,

    #[serde(default)]
    pub has_ball: bool,
    #[serde(default)]
    pub team: Option<u8>,
    #[serde(default)]
    pub team_color: Option<[u8; 3]>,
}

impl TrackRecord {
    pub fn new(bbox: BBox<Ltrb>) -> Self {
        Self {
            bbox,
            position: None,
            position_adjusted: None,
            position_transformed: None,
            speed: None,
            distance: None,
            has_ball: false,
            team: None,
            team_color: None,
        }
    }
}

/// `track_id -> record` for one frame and category; ordered by id.
pub type FrameTracks = BTreeMap<u32, TrackRecord>;

/// The id the single ball is always stored under.
pub const BALL_ID: u32 = 1;

/// Per-category, per-frame track records. Every category holds exactly one
/// entry per frame, possibly empty.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Tracks {
    pub players: Vec<FrameTracks>,
    pub referees: Vec<FrameTracks>,
    pub ball: Vec<FrameTracks>,
}

impl Tracks {
    pub fn with_frames(n: usize) -> Self {
        Self {
            players: vec![FrameTracks::new(); n],
            referees: vec![FrameTracks::new(); n],
            ball: vec![FrameTracks::new(); n],
        }
    }

    #[inline]
    pub fn num_frames(&self) -> usize {
        self.players.len()
    }

    pub fn categories_mut(&mut self) -> [(ObjectClass, &mut Vec<FrameTracks>); 3] {
        [
            (ObjectClass::Player, &mut self.players),
            (ObjectClass::Referee, &mut self.referees),
            (ObjectClass::Ball, &mut self.ball),
        ]
    }

    #[inline]
    pub fn ball_bbox(&self, frame: usize) -> Option<&BBox<Ltrb>> {
        self.ball.get(frame)?.get(&BALL_ID).map(|r| &r.bbox)
    }

    /// Every record of every category, with its frame index.
    pub fn iter_records_mut(&mut self) -> impl Iterator<Item = (usize, &mut TrackRecord)> {
        [&mut self.players, &mut self.referees, &mut self.ball]
            .into_iter()
            .flat_map(|category| {
                category
                    .iter_mut()
                    .enumerate()
                    .flat_map(|(idx, frame)| frame.values_mut().map(move |r| (idx, r)))
            })
    }
}
