use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::bbox::{BBox, Ltrb};
use crate::math;
use crate::track::{FrameTracks, Tracks};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BallAssignerConfig {
    /// Pixels between the ball center and the nearer bottom corner of a
    /// player box; a player must be strictly closer to get the ball.
    pub max_player_ball_distance: f32,
}

impl Default for BallAssignerConfig {
    fn default() -> Self {
        Self {
            max_player_ball_distance: 70.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlayerBallAssigner {
    config: BallAssignerConfig,
}

impl PlayerBallAssigner {
    pub fn new(config: BallAssignerConfig) -> Self {
        Self { config }
    }

    /// Nearest player within range. Ties go to the lowest id.
    pub fn assign_ball_to_player(&self, players: &FrameTracks, ball: &BBox<Ltrb>) -> Option<u32> {
        let ball_pos = ball.center();
        let mut best = None;
        let mut min_distance = self.config.max_player_ball_distance;

        for (&id, player) in players {
            let left = math::distance(&player.bbox.bottom_left(), &ball_pos);
            let right = math::distance(&player.bbox.bottom_right(), &ball_pos);
            let distance = left.min(right);

            if distance < min_distance {
                min_distance = distance;
                best = Some(id);
            }
        }

        best
    }

    /// Marks `has_ball` on the possessing player of every frame and returns
    /// the per-frame possessor.
    pub fn assign_possession(&self, tracks: &mut Tracks) -> Vec<Option<u32>> {
        let mut possession = Vec::with_capacity(tracks.num_frames());

        for (frame_num, players) in tracks.players.iter_mut().enumerate() {
            let ball = tracks.ball.get(frame_num).and_then(|f| f.values().next());

            let owner = ball.and_then(|b| self.assign_ball_to_player(players, &b.bbox));
            if let Some(id) = owner {
                if let Some(record) = players.get_mut(&id) {
                    record.has_ball = true;
                }
            }

            possession.push(owner);
        }

        debug!(
            frames = possession.len(),
            owned = possession.iter().filter(|p| p.is_some()).count(),
            "ball possession assigned"
        );

        possession
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{TrackRecord, BALL_ID};

    fn players(boxes: &[(u32, [f32; 4])]) -> FrameTracks {
        boxes
            .iter()
            .map(|&(id, b)| (id, TrackRecord::new(BBox::ltrb(b[0], b[1], b[2], b[3]))))
            .collect()
    }

    #[test]
    fn test_nearest_corner_wins() {
        let assigner = PlayerBallAssigner::default();
        let frame = players(&[
            (3, [100.0, 100.0, 140.0, 200.0]),
            (5, [200.0, 100.0, 240.0, 200.0]),
        ]);

        // center (180, 195): 40 px from #3 right corner, 20 px from #5 left
        let ball = BBox::ltrb(175.0, 190.0, 185.0, 200.0);
        assert_eq!(assigner.assign_ball_to_player(&frame, &ball), Some(5));
    }

    #[test]
    fn test_out_of_range() {
        let assigner = PlayerBallAssigner::default();
        let frame = players(&[(3, [100.0, 100.0, 140.0, 200.0])]);

        // exactly 70 px away from the right corner
        let ball = BBox::ltrb(205.0, 195.0, 215.0, 205.0);
        assert_eq!(assigner.assign_ball_to_player(&frame, &ball), None);
        assert_eq!(assigner.assign_ball_to_player(&FrameTracks::new(), &ball), None);
    }

    #[test]
    fn test_tie_goes_to_lowest_id() {
        let assigner = PlayerBallAssigner::default();
        let frame = players(&[
            (9, [220.0, 100.0, 260.0, 200.0]),
            (4, [100.0, 100.0, 180.0, 200.0]),
        ]);

        let ball = BBox::ltrb(195.0, 195.0, 205.0, 205.0);
        assert_eq!(assigner.assign_ball_to_player(&frame, &ball), Some(4));
    }

    #[test]
    fn test_possession_is_consistent() {
        let assigner = PlayerBallAssigner::default();
        let mut tracks = Tracks::with_frames(10);

        for (i, frame) in tracks.players.iter_mut().enumerate() {
            let dx = i as f32 * 3.0;
            *frame = players(&[
                (2, [300.0 + dx, 100.0, 340.0 + dx, 200.0]),
                (6, [400.0 + dx, 100.0, 440.0 + dx, 200.0]),
                (8, [600.0 + dx, 100.0, 640.0 + dx, 200.0]),
            ]);

            let bx = 385.0 + dx;
            tracks.ball[i].insert(BALL_ID, TrackRecord::new(BBox::ltrb(bx - 5.0, 190.0, bx + 5.0, 200.0)));
        }

        let possession = assigner.assign_possession(&mut tracks);

        assert_eq!(possession, vec![Some(6); 10]);
        assert!(tracks.players.iter().all(|f| f[&6].has_ball && !f[&2].has_ball && !f[&8].has_ball));
    }

    #[test]
    fn test_stationary_players_keep_possession() {
        let assigner = PlayerBallAssigner::default();
        let mut tracks = Tracks::with_frames(8);

        // ball center (400, 200): corners 60, 65 and 69.5 px away
        for i in 0..8 {
            tracks.players[i] = players(&[
                (11, [300.0, 100.0, 340.0, 200.0]),
                (4, [465.0, 120.0, 500.0, 200.0]),
                (7, [400.0, 20.0, 440.0, 130.5]),
            ]);
            tracks.ball[i].insert(BALL_ID, TrackRecord::new(BBox::ltrb(395.0, 195.0, 405.0, 205.0)));
        }

        let possession = assigner.assign_possession(&mut tracks);

        assert_eq!(possession, vec![Some(11); 8]);
        assert!(tracks.players.iter().all(|f| f[&11].has_ball && !f[&4].has_ball && !f[&7].has_ball));
    }

    #[test]
    fn test_no_ball_no_owner() {
        let assigner = PlayerBallAssigner::default();
        let mut tracks = Tracks::with_frames(2);
        tracks.players[0] = players(&[(2, [0.0, 0.0, 10.0, 10.0])]);

        assert_eq!(assigner.assign_possession(&mut tracks), vec![None, None]);
    }
}
