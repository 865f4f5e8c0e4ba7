//! OpenCV backends: CSRT relocalization and `goodFeaturesToTrack` +
//! `calcOpticalFlowPyrLK` flow.

use nalgebra as na;
use opencv::{
    core::{self, Mat, Point2f, Rect, Scalar, Size, TermCriteria, Vector, CV_8UC1},
    imgproc,
    prelude::*,
    tracking, video,
};
use tracing::warn;

use crate::bbox::{BBox, Ltrb};
use crate::error::Result;
use crate::flow::{FlowParams, OpticalFlow};
use crate::frame::Frame;
use crate::relocalizer::Relocalizer;

/// 8-bit single channel copy of a frame.
pub fn frame_to_mat(frame: &Frame) -> Result<Mat> {
    let (w, h) = frame.dims();
    let mut mat = Mat::new_rows_cols_with_default(h as i32, w as i32, CV_8UC1, Scalar::all(0.0))?;

    for ((y, x), v) in frame.pixels().indexed_iter() {
        *mat.at_2d_mut::<u8>(y as i32, x as i32)? = v.round().clamp(0.0, 255.0) as u8;
    }

    Ok(mat)
}

fn to_rect(bbox: &BBox<Ltrb>) -> Rect {
    Rect::new(
        bbox.left().round() as i32,
        bbox.top().round() as i32,
        bbox.width().round().max(1.0) as i32,
        bbox.height().round().max(1.0) as i32,
    )
}

pub struct CsrtRelocalizer {
    tracker: Option<core::Ptr<dyn tracking::TrackerCSRT>>,
}

impl CsrtRelocalizer {
    pub fn new() -> Self {
        Self { tracker: None }
    }

    fn try_init(&mut self, frame: &Frame, bbox: &BBox<Ltrb>) -> Result<()> {
        let params = tracking::TrackerCSRT_Params::default()?;
        let mut tracker = <dyn tracking::TrackerCSRT>::create(&params)?;

        tracker.init(&frame_to_mat(frame)?, to_rect(bbox))?;
        self.tracker = Some(tracker);

        Ok(())
    }

    fn try_update(&mut self, frame: &Frame) -> Result<Option<BBox<Ltrb>>> {
        let tracker = match self.tracker.as_mut() {
            Some(t) => t,
            None => return Ok(None),
        };

        let mut rect = Rect::default();
        if !tracker.update(&frame_to_mat(frame)?, &mut rect)? {
            return Ok(None);
        }

        let bbox = BBox::ltrb(
            rect.x as f32,
            rect.y as f32,
            (rect.x + rect.width) as f32,
            (rect.y + rect.height) as f32,
        );

        Ok(Some(bbox).filter(|b| b.is_valid()))
    }
}

impl Default for CsrtRelocalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Relocalizer for CsrtRelocalizer {
    fn init(&mut self, frame: &Frame, bbox: &BBox<Ltrb>) {
        if let Err(err) = self.try_init(frame, bbox) {
            warn!(%err, "csrt init failed");
            self.tracker = None;
        }
    }

    fn update(&mut self, frame: &Frame) -> Option<BBox<Ltrb>> {
        self.try_update(frame).unwrap_or_else(|err| {
            warn!(%err, "csrt update failed");
            None
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CvFlow {
    pub params: FlowParams,
}

impl CvFlow {
    pub fn new(params: FlowParams) -> Self {
        Self { params }
    }

    fn try_good_features(&self, frame: &Frame, strips: &[(usize, usize)]) -> Result<Vec<na::Point2<f32>>> {
        let image = frame_to_mat(frame)?;
        let (w, h) = frame.dims();

        let mut mask = Mat::new_rows_cols_with_default(h as i32, w as i32, CV_8UC1, Scalar::all(0.0))?;
        for &(lo, hi) in strips {
            let hi = hi.min(w);
            if lo >= hi {
                continue;
            }

            let mut roi = Mat::roi(&mask, Rect::new(lo as i32, 0, (hi - lo) as i32, h as i32))?;
            roi.set_to(&Scalar::all(1.0), &core::no_array()?)?;
        }

        let mut corners = Vector::<Point2f>::new();
        imgproc::good_features_to_track(
            &image,
            &mut corners,
            self.params.max_corners as i32,
            self.params.quality_level as f64,
            self.params.min_distance as f64,
            &mask,
            self.params.block_size as i32,
            false,
            0.04,
        )?;

        Ok(corners.iter().map(|p| na::Point2::new(p.x, p.y)).collect())
    }

    fn try_track(
        &self,
        prev: &Frame,
        curr: &Frame,
        points: &[na::Point2<f32>],
    ) -> Result<Vec<Option<na::Point2<f32>>>> {
        let prev_pts: Vector<Point2f> = points.iter().map(|p| Point2f::new(p.x, p.y)).collect();
        let mut next_pts = Vector::<Point2f>::new();
        let mut status = Vector::<u8>::new();
        let mut err = Vector::<f32>::new();

        let criteria = TermCriteria::new(
            core::TermCriteria_COUNT | core::TermCriteria_EPS,
            self.params.max_iterations as i32,
            self.params.epsilon as f64,
        )?;

        let win = self.params.win_size as i32;
        video::calc_optical_flow_pyr_lk(
            &frame_to_mat(prev)?,
            &frame_to_mat(curr)?,
            &prev_pts,
            &mut next_pts,
            &mut status,
            &mut err,
            Size::new(win, win),
            self.params.max_level as i32,
            criteria,
            0,
            self.params.min_eig_threshold as f64,
        )?;

        let (w, h) = curr.dims();
        let inside = |p: &Point2f| p.x >= 0.0 && p.y >= 0.0 && p.x <= (w - 1) as f32 && p.y <= (h - 1) as f32;

        Ok(next_pts
            .iter()
            .zip(status.iter().zip(err.iter()))
            .map(|(p, (ok, e))| {
                let matched = ok != 0 && e * e <= self.params.max_residual && inside(&p);
                matched.then(|| na::Point2::new(p.x, p.y))
            })
            .collect())
    }
}

impl OpticalFlow for CvFlow {
    fn good_features(&self, frame: &Frame, strips: &[(usize, usize)]) -> Vec<na::Point2<f32>> {
        self.try_good_features(frame, strips).unwrap_or_else(|err| {
            warn!(%err, "feature selection failed");
            Vec::new()
        })
    }

    fn track(
        &self,
        prev: &Frame,
        curr: &Frame,
        points: &[na::Point2<f32>],
    ) -> Vec<Option<na::Point2<f32>>> {
        if points.is_empty() {
            return Vec::new();
        }

        self.try_track(prev, curr, points).unwrap_or_else(|err| {
            warn!(%err, "optical flow failed");
            vec![None; points.len()]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn blob_frame(cx: f32, cy: f32) -> Frame {
        Frame::new(Array2::from_shape_fn((120, 160), |(y, x)| {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            if dx.abs() < 8.0 && dy.abs() < 14.0 {
                if (x / 3 + y / 3) % 2 == 0 {
                    220.0
                } else {
                    150.0
                }
            } else {
                30.0
            }
        }))
    }

    fn texture(w: usize, h: usize, shift: (f32, f32)) -> Frame {
        Frame::new(Array2::from_shape_fn((h, w), |(y, x)| {
            let x = x as f32 - shift.0;
            let y = y as f32 - shift.1;

            128.0 + 60.0 * (x * 0.21).sin() * (y * 0.17).cos() + 30.0 * ((x + y) * 0.11).sin()
        }))
    }

    #[test]
    fn test_frame_to_mat() {
        let frame = Frame::new(Array2::from_shape_fn((3, 4), |(y, x)| (y * 10 + x) as f32 + 0.4));
        let mat = frame_to_mat(&frame).unwrap();

        assert_eq!((mat.cols(), mat.rows()), (4, 3));
        assert_eq!(*mat.at_2d::<u8>(2, 3).unwrap(), 23);
    }

    #[test]
    fn test_csrt_follows_shift() {
        let mut reloc = CsrtRelocalizer::default();
        reloc.init(&blob_frame(60.0, 60.0), &BBox::ltrb(48.0, 42.0, 72.0, 78.0));

        let found = reloc.update(&blob_frame(66.0, 63.0)).unwrap();
        let c = found.center();

        assert!((c.x - 66.0).abs() <= 3.0, "{:?}", c);
        assert!((c.y - 63.0).abs() <= 3.0, "{:?}", c);
    }

    #[test]
    fn test_csrt_uninitialized_update() {
        let mut reloc = CsrtRelocalizer::default();

        assert!(reloc.update(&blob_frame(60.0, 60.0)).is_none());
    }

    #[test]
    fn test_cv_features_respect_strips() {
        let flow = CvFlow::default();
        let frame = texture(160, 120, (0.0, 0.0));
        let corners = flow.good_features(&frame, &[(0, 20), (100, 130)]);

        assert!(!corners.is_empty());
        assert!(corners.len() <= 100);
        assert!(corners
            .iter()
            .all(|c| c.x < 20.0 || (c.x >= 100.0 && c.x < 130.0)));
    }

    #[test]
    fn test_cv_tracks_translation() {
        let flow = CvFlow::default();
        let prev = texture(160, 120, (0.0, 0.0));
        let curr = texture(160, 120, (3.0, -2.0));
        let points = [na::Point2::new(60.0, 60.0), na::Point2::new(90.0, 50.0)];

        let tracked = flow.track(&prev, &curr, &points);

        for (p, t) in points.iter().zip(tracked) {
            let t = t.expect("point lost");
            assert!((t.x - p.x - 3.0).abs() < 0.5, "{:?} -> {:?}", p, t);
            assert!((t.y - p.y + 2.0).abs() < 0.5, "{:?} -> {:?}", p, t);
        }
        assert!(flow.track(&prev, &curr, &[]).is_empty());
    }
}
