//! Focus metric engine.
//!
//! Extracts a region of interest from a frame and reduces it to the scalars
//! the controller needs: total intensity, the astigmatic anisotropy error and
//! whether the PSF centroid has drifted toward the ROI border.

use focuslock_traits::Image;

use crate::error::MetricError;

/// Axis-aligned rectangle in image pixels, origin top-left.
///
/// Coordinates may be negative or overhang the image; [`Roi::clamp`]
/// produces the in-bounds rectangle that is actually sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Roi {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Default for Roi {
    fn default() -> Self {
        Self::new(20, 20, 24, 24)
    }
}

impl Roi {
    pub const fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Intersect with an image of `(height, width)`.
    ///
    /// The origin is pulled inside the image first, then the extent is
    /// truncated at the far border. Fails if nothing is left.
    pub fn clamp(self, shape: (usize, usize)) -> Result<Self, MetricError> {
        let (h, w) = (to_i64(shape.0), to_i64(shape.1));
        let x = self.x.clamp(0, (w - 1).max(0));
        let y = self.y.clamp(0, (h - 1).max(0));
        let width = self.width.min(w - x);
        let height = self.height.min(h - y);
        if width <= 0 || height <= 0 {
            return Err(MetricError::InvalidRoi {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
                image_width: shape.1,
                image_height: shape.0,
            });
        }
        Ok(Self::new(x, y, width, height))
    }
}

#[inline]
fn to_i64(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// Intensity moments of a patch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub total: f64,
    pub cx: f64,
    pub cy: f64,
    pub var_x: f64,
    pub var_y: f64,
}

impl Moments {
    /// Geometric centre of a `(height, width)` patch with no usable signal.
    fn empty(total: f64, shape: (usize, usize)) -> Self {
        Self {
            total,
            cx: (shape.1 as f64 - 1.0) / 2.0,
            cy: (shape.0 as f64 - 1.0) / 2.0,
            var_x: 0.0,
            var_y: 0.0,
        }
    }

    /// `(var_x - var_y) / (var_x + var_y)`, or 0 when undefined.
    pub fn anisotropy(&self) -> f64 {
        if self.total <= 0.0 {
            return 0.0;
        }
        let denom = self.var_x + self.var_y;
        if denom == 0.0 {
            0.0
        } else {
            (self.var_x - self.var_y) / denom
        }
    }
}

/// Computes intensity moments of a patch.
///
/// Implementations must agree to floating-point tolerance.
pub trait MomentEstimator {
    fn moments(&self, patch: &Image) -> Moments;
}

/// Straight two-pass loops over the pixels.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScalarMoments;

impl MomentEstimator for ScalarMoments {
    fn moments(&self, patch: &Image) -> Moments {
        let total = patch.sum();
        if total <= 0.0 {
            return Moments::empty(total, patch.shape());
        }
        let (mut sx, mut sy) = (0.0, 0.0);
        for (y, row) in patch.rows().enumerate() {
            for (x, v) in row.iter().enumerate() {
                sx += x as f64 * v;
                sy += y as f64 * v;
            }
        }
        let (cx, cy) = (sx / total, sy / total);
        let (mut vx, mut vy) = (0.0, 0.0);
        for (y, row) in patch.rows().enumerate() {
            let dy = y as f64 - cy;
            for (x, v) in row.iter().enumerate() {
                let dx = x as f64 - cx;
                vx += dx * dx * v;
                vy += dy * dy * v;
            }
        }
        Moments {
            total,
            cx,
            cy,
            var_x: vx / total,
            var_y: vy / total,
        }
    }
}

/// Axis projections with `ndarray`, then 1-D moments of each marginal.
#[cfg(feature = "ndarray")]
#[derive(Debug, Default, Clone, Copy)]
pub struct NdarrayMoments;

#[cfg(feature = "ndarray")]
impl MomentEstimator for NdarrayMoments {
    fn moments(&self, patch: &Image) -> Moments {
        use ndarray::{ArrayView2, Axis};

        let Ok(view) = ArrayView2::from_shape(patch.shape(), patch.as_slice()) else {
            return ScalarMoments.moments(patch);
        };
        let total = view.sum();
        if total <= 0.0 {
            return Moments::empty(total, patch.shape());
        }
        // Column sums give the x marginal, row sums the y marginal.
        let col = view.sum_axis(Axis(0));
        let row = view.sum_axis(Axis(1));
        let marginal = |m: &ndarray::Array1<f64>| {
            let c = m.iter().enumerate().map(|(i, v)| i as f64 * v).sum::<f64>() / total;
            let var = m
                .iter()
                .enumerate()
                .map(|(i, v)| (i as f64 - c).powi(2) * v)
                .sum::<f64>()
                / total;
            (c, var)
        };
        let (cx, var_x) = marginal(&col);
        let (cy, var_y) = marginal(&row);
        Moments {
            total,
            cx,
            cy,
            var_x,
            var_y,
        }
    }
}

#[cfg(feature = "ndarray")]
pub type DefaultMoments = NdarrayMoments;
#[cfg(not(feature = "ndarray"))]
pub type DefaultMoments = ScalarMoments;

/// Copy of the clamped ROI.
pub fn extract_roi(image: &Image, roi: Roi) -> Result<Image, MetricError> {
    let r = roi.clamp(image.shape())?;
    // clamp() guarantees 0 <= x,y and positive extents inside the image
    let as_usize = |v: i64| usize::try_from(v).unwrap_or(0);
    Ok(image.crop(
        as_usize(r.x),
        as_usize(r.y),
        as_usize(r.width),
        as_usize(r.height),
    )?)
}

pub fn roi_total_intensity(image: &Image, roi: Roi) -> Result<f64, MetricError> {
    Ok(extract_roi(image, roi)?.sum())
}

/// Dimensionless anisotropy of the PSF in `roi`, in `[-1, 1]` for non-negative images.
///
/// Positive when the PSF is wider in x than in y. Returns 0 when the ROI
/// carries no positive signal.
pub fn astigmatic_error_signal(image: &Image, roi: Roi) -> Result<f64, MetricError> {
    astigmatic_error_signal_with(&DefaultMoments::default(), image, roi)
}

pub fn astigmatic_error_signal_with<E: MomentEstimator>(
    estimator: &E,
    image: &Image,
    roi: Roi,
) -> Result<f64, MetricError> {
    let patch = extract_roi(image, roi)?;
    Ok(estimator.moments(&patch).anisotropy())
}

/// True when the intensity centroid sits within `margin_px` of any ROI border.
///
/// A margin of zero or less (or NaN) disables the check. An infinite margin
/// reports every centroid as near the edge.
pub fn centroid_near_edge(image: &Image, roi: Roi, margin_px: f64) -> Result<bool, MetricError> {
    if margin_px.is_nan() || margin_px <= 0.0 {
        return Ok(false);
    }
    let patch = extract_roi(image, roi)?;
    let m = DefaultMoments::default().moments(&patch);
    let max_x = patch.width() as f64 - 1.0;
    let max_y = patch.height() as f64 - 1.0;
    Ok(m.cx < margin_px || m.cx > max_x - margin_px || m.cy < margin_px || m.cy > max_y - margin_px)
}
