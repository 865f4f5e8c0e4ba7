use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::math;
use crate::track::Tracks;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ViewConfig {
    /// Pixel positions of the pitch corners, in the order
    /// bottom-left, top-left, top-right, bottom-right.
    pub pixel_vertices: [[f32; 2]; 4],
    /// Meters.
    pub court_length: f32,
    pub court_width: f32,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            pixel_vertices: [[110.0, 1035.0], [265.0, 275.0], [910.0, 260.0], [1640.0, 915.0]],
            court_length: 105.0,
            court_width: 68.0,
        }
    }
}

impl ViewConfig {
    /// Real-world rectangle corners matching `pixel_vertices`.
    pub fn target_vertices(&self) -> [[f32; 2]; 4] {
        [
            [0.0, self.court_width],
            [0.0, 0.0],
            [self.court_length, 0.0],
            [self.court_length, self.court_width],
        ]
    }
}

/// Fixed pixel-to-pitch homography. Points outside the pitch quadrilateral
/// are mapped too.
#[derive(Debug, Clone)]
pub struct ViewTransformer {
    matrix: na::Matrix3<f64>,
}

impl ViewTransformer {
    pub fn new(config: &ViewConfig) -> Result<Self> {
        let to_point = |v: &[f32; 2]| na::Point2::new(f64::from(v[0]), f64::from(v[1]));
        let src = config.pixel_vertices.map(|v| to_point(&v));
        let dst = config.target_vertices().map(|v| to_point(&v));

        let matrix = math::perspective_transform(&src, &dst).ok_or(Error::DegenerateHomography)?;

        Ok(Self { matrix })
    }

    pub fn transform_point(&self, p: &na::Point2<f32>) -> na::Point2<f32> {
        let out = math::apply_homography(&self.matrix, &na::Point2::new(f64::from(p.x), f64::from(p.y)));

        na::Point2::new(out.x as f32, out.y as f32)
    }

    /// Sets `position_transformed` wherever `position_adjusted` is known.
    pub fn add_transformed_position_to_tracks(&self, tracks: &mut Tracks) {
        for (_, record) in tracks.iter_records_mut() {
            record.position_transformed = record.position_adjusted.map(|p| self.transform_point(&p));
        }
    }
}
