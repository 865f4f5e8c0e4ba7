use nalgebra as na;

#[inline]
pub fn distance(a: &na::Point2<f32>, b: &na::Point2<f32>) -> f32 {
    na::distance(a, b)
}

/// Axis-wise difference `a - b`.
#[inline]
pub fn xy_distance(a: &na::Point2<f32>, b: &na::Point2<f32>) -> na::Vector2<f32> {
    a - b
}

/// Solves the 3x3 projective transform mapping each `src[i]` onto `dst[i]`,
/// with `h33` fixed to one.
pub fn perspective_transform(
    src: &[na::Point2<f64>; 4],
    dst: &[na::Point2<f64>; 4],
) -> Option<na::Matrix3<f64>> {
    let mut a = na::SMatrix::<f64, 8, 8>::zeros();
    let mut b = na::SVector::<f64, 8>::zeros();

    for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
        let r = i * 2;

        a[(r, 0)] = s.x;
        a[(r, 1)] = s.y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -d.x * s.x;
        a[(r, 7)] = -d.x * s.y;
        b[r] = d.x;

        a[(r + 1, 3)] = s.x;
        a[(r + 1, 4)] = s.y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -d.y * s.x;
        a[(r + 1, 7)] = -d.y * s.y;
        b[r + 1] = d.y;
    }

    let qr_result = a.qr();
    let r = qr_result.r();
    let scale = r.diagonal().iter().fold(0.0f64, |m, v| m.max(v.abs()));

    if scale == 0.0 || r.diagonal().iter().any(|v| v.abs() < scale * 1e-10) {
        return None;
    }

    let qtb = qr_result.q().transpose() * b;
    let h = r.solve_upper_triangular(&qtb)?;

    if h.iter().any(|v| !v.is_finite()) {
        return None;
    }

    Some(na::Matrix3::new(
        h[0], h[1], h[2], //
        h[3], h[4], h[5], //
        h[6], h[7], 1.0,
    ))
}

/// Applies a homography to a single point. Points on the line at infinity
/// come back non-finite rather than being rejected.
#[inline]
pub fn apply_homography(m: &na::Matrix3<f64>, p: &na::Point2<f64>) -> na::Point2<f64> {
    let v = m * na::Vector3::new(p.x, p.y, 1.0);

    na::Point2::new(v.x / v.z, v.y / v.z)
}
