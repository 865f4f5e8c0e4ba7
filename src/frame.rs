use ndarray::prelude::*;

/// Grayscale frame, intensities as `f32` in `[0, 255]`, indexed `[row, col]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pixels: Array2<f32>,
}

impl Frame {
    #[inline]
    pub fn new(pixels: Array2<f32>) -> Self {
        Self { pixels }
    }

    pub fn from_gray(gray: ArrayView2<'_, u8>) -> Self {
        Self::new(gray.mapv(f32::from))
    }

    /// Converts an interleaved `(height, width, 3)` BGR buffer with the
    /// usual luma weights.
    pub fn from_bgr(bgr: ArrayView3<'_, u8>) -> Self {
        let (h, w, _) = bgr.dim();
        let pixels = Array2::from_shape_fn((h, w), |(y, x)| {
            0.114 * f32::from(bgr[[y, x, 0]])
                + 0.587 * f32::from(bgr[[y, x, 1]])
                + 0.299 * f32::from(bgr[[y, x, 2]])
        });

        Self::new(pixels)
    }

    /// `(width, height)`
    #[inline]
    pub fn dims(&self) -> (usize, usize) {
        let (h, w) = self.pixels.dim();
        (w, h)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.pixels.ncols()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.pixels.nrows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    #[inline]
    pub fn pixels(&self) -> ArrayView2<'_, f32> {
        self.pixels.view()
    }

    /// Pixel lookup with coordinates clamped to the border.
    #[inline]
    pub fn get(&self, x: i32, y: i32) -> f32 {
        let (w, h) = self.dims();
        if w == 0 || h == 0 {
            return 0.0;
        }

        let x = x.clamp(0, w as i32 - 1) as usize;
        let y = y.clamp(0, h as i32 - 1) as usize;

        self.pixels[[y, x]]
    }

    /// Bilinear sample, clamped to the border.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (xi, yi) = (x0 as i32, y0 as i32);

        let top = self.get(xi, yi) * (1.0 - fx) + self.get(xi + 1, yi) * fx;
        let bottom = self.get(xi, yi + 1) * (1.0 - fx) + self.get(xi + 1, yi + 1) * fx;

        top * (1.0 - fy) + bottom * fy
    }

    /// Half-resolution frame by 2x2 box averaging.
    pub fn downsample(&self) -> Frame {
        let (w, h) = self.dims();
        let (nw, nh) = ((w / 2).max(1), (h / 2).max(1));
        let pixels = Array2::from_shape_fn((nh, nw), |(y, x)| {
            let (sx, sy) = (2 * x as i32, 2 * y as i32);

            (self.get(sx, sy) + self.get(sx + 1, sy) + self.get(sx, sy + 1) + self.get(sx + 1, sy + 1))
                * 0.25
        });

        Frame::new(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_dims_and_clamped_get() {
        let frame = Frame::new(Array2::from_shape_fn((3, 4), |(y, x)| (y * 10 + x) as f32));

        assert_eq!(frame.dims(), (4, 3));
        assert_eq!(frame.get(-5, 1), 10.0);
        assert_eq!(frame.get(10, 10), 23.0);
    }

    #[test]
    fn test_bilinear_sample() {
        let frame = Frame::new(Array2::from_shape_fn((2, 2), |(_, x)| x as f32 * 10.0));

        assert_relative_eq!(frame.sample(0.5, 0.0), 5.0);
        assert_relative_eq!(frame.sample(0.25, 0.5), 2.5);
    }

    #[test]
    fn test_from_gray() {
        let gray = Array2::from_shape_fn((2, 3), |(y, x)| (y * 100 + x) as u8);
        let frame = Frame::from_gray(gray.view());

        assert_eq!(frame.dims(), (3, 2));
        assert_eq!(frame.get(2, 1), 102.0);
    }

    #[test]
    fn test_from_bgr() {
        let bgr = Array3::from_elem((2, 2, 3), 100u8);
        let frame = Frame::from_bgr(bgr.view());

        assert_relative_eq!(frame.get(1, 1), 100.0, epsilon = 1e-3);
    }

    #[test]
    fn test_downsample() {
        let frame = Frame::new(Array2::from_elem((4, 6), 8.0));
        let half = frame.downsample();

        assert_eq!(half.dims(), (3, 2));
        assert_relative_eq!(half.get(1, 1), 8.0);
    }
}
