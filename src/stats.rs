use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::track::Tracks;

/// Team (1 or 2) in control of the ball at every frame. Frames without a
/// possessor keep the previous frame's team; `0` until the first possession.
pub fn team_ball_control(tracks: &Tracks, possession: &[Option<u32>]) -> Vec<u8> {
    let mut control = Vec::with_capacity(possession.len());
    let mut current = 0;

    for (frame_num, owner) in possession.iter().enumerate() {
        if let Some(id) = owner {
            current = tracks
                .players
                .get(frame_num)
                .and_then(|f| f.get(id))
                .and_then(|r| r.team)
                .unwrap_or(0);
        }

        control.push(current);
    }

    control
}

/// Share of frames (in percent) each team controlled the ball, ignoring
/// frames before anyone had it.
pub fn team_control_share(control: &[u8]) -> Option<(f32, f32)> {
    let team1 = control.iter().filter(|&&t| t == 1).count() as f32;
    let team2 = control.iter().filter(|&&t| t == 2).count() as f32;
    let total = team1 + team2;

    if total == 0.0 {
        return None;
    }

    Some((team1 / total * 100.0, team2 / total * 100.0))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PlayerStats {
    pub player_id: u32,
    pub team: Option<u8>,
    pub team_color: Option<[u8; 3]>,
    pub frames_tracked: usize,
    pub ball_touches: usize,
    pub possession_frames: usize,
    /// Of the frames the player was tracked in.
    pub possession_percentage: f32,
    /// Meters.
    pub total_distance: f32,
    /// km/h
    pub average_speed: f32,
    pub max_speed: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatMetric {
    TotalDistance,
    BallTouches,
    PossessionPercentage,
    AverageSpeed,
    MaxSpeed,
}

impl PlayerStats {
    fn metric(&self, metric: StatMetric) -> f32 {
        match metric {
            StatMetric::TotalDistance => self.total_distance,
            StatMetric::BallTouches => self.ball_touches as f32,
            StatMetric::PossessionPercentage => self.possession_percentage,
            StatMetric::AverageSpeed => self.average_speed,
            StatMetric::MaxSpeed => self.max_speed,
        }
    }
}

/// Summary per player id; `selected` restricts the ids looked at.
pub fn calculate_player_stats(tracks: &Tracks, selected: Option<&[u32]>) -> BTreeMap<u32, PlayerStats> {
    let mut stats: BTreeMap<u32, PlayerStats> = BTreeMap::new();
    let mut speed_sums: BTreeMap<u32, (f32, usize)> = BTreeMap::new();

    for (frame_num, frame) in tracks.players.iter().enumerate() {
        for (&id, record) in frame {
            if selected.map_or(false, |ids| !ids.contains(&id)) {
                continue;
            }

            let entry = stats.entry(id).or_insert_with(|| PlayerStats {
                player_id: id,
                team: record.team,
                team_color: record.team_color,
                ..Default::default()
            });

            entry.frames_tracked += 1;

            if record.has_ball {
                let touched = match frame_num {
                    0 => true,
                    _ => tracks.players[frame_num - 1]
                        .get(&id)
                        .map_or(false, |prev| !prev.has_ball),
                };

                if touched {
                    entry.ball_touches += 1;
                }
                entry.possession_frames += 1;
            }

            if let Some(d) = record.distance {
                entry.total_distance = entry.total_distance.max(d);
            }

            if let Some(s) = record.speed {
                entry.max_speed = entry.max_speed.max(s);

                let sum = speed_sums.entry(id).or_insert((0.0, 0));
                sum.0 += s;
                sum.1 += 1;
            }
        }
    }

    for (id, entry) in stats.iter_mut() {
        entry.possession_percentage =
            entry.possession_frames as f32 / entry.frames_tracked as f32 * 100.0;

        if let Some(&(sum, count)) = speed_sums.get(id) {
            entry.average_speed = sum / count as f32;
        }
    }

    stats
}

/// Ids of the `n` best players by `metric`, best first; ties keep id order.
pub fn top_players(stats: &BTreeMap<u32, PlayerStats>, n: usize, metric: StatMetric) -> Vec<u32> {
    let mut ranked: Vec<&PlayerStats> = stats.values().collect();

    ranked.sort_by(|a, b| {
        b.metric(metric)
            .partial_cmp(&a.metric(metric))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    ranked.into_iter().take(n).map(|s| s.player_id).collect()
}
