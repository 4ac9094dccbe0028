use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("Empty image")]
    Empty,
    #[error("Image rows must have equal length (row {row} has {got}, expected {expected})")]
    Ragged {
        row: usize,
        expected: usize,
        got: usize,
    },
    #[error("image buffer of {len} samples does not match {width}x{height}")]
    Shape {
        width: usize,
        height: usize,
        len: usize,
    },
}

/// Rectangular grid of intensity samples stored row-major.
///
/// Construction guarantees at least one row and one column, all rows equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl Image {
    pub fn from_vec(width: usize, height: usize, data: Vec<f64>) -> Result<Self, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::Empty);
        }
        if width.checked_mul(height) != Some(data.len()) {
            return Err(ImageError::Shape {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self, ImageError> {
        let Some(first) = rows.first() else {
            return Err(ImageError::Empty);
        };
        let width = first.as_ref().len();
        if width == 0 {
            return Err(ImageError::Empty);
        }
        let mut data = Vec::with_capacity(width * rows.len());
        for (row, r) in rows.iter().enumerate() {
            let r = r.as_ref();
            if r.len() != width {
                return Err(ImageError::Ragged {
                    row,
                    expected: width,
                    got: r.len(),
                });
            }
            data.extend_from_slice(r);
        }
        Ok(Self {
            width,
            height: rows.len(),
            data,
        })
    }

    /// Image filled with a constant value.
    pub fn filled(width: usize, height: usize, value: f64) -> Result<Self, ImageError> {
        Self::from_vec(width, height, vec![value; width.saturating_mul(height)])
    }

    pub fn from_fn(
        width: usize,
        height: usize,
        mut f: impl FnMut(usize, usize) -> f64,
    ) -> Result<Self, ImageError> {
        let mut data = Vec::with_capacity(width.saturating_mul(height));
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self::from_vec(width, height, data)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(height, width)`, matching row-major indexing.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        if x < self.width && y < self.height {
            Some(self.data[y * self.width + x])
        } else {
            None
        }
    }

    pub fn row(&self, y: usize) -> &[f64] {
        let start = y * self.width;
        &self.data[start..start + self.width]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.width)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Copy of the `width`x`height` window whose top-left corner is `(x, y)`.
    ///
    /// The window is truncated at the image border; an empty result is an error.
    pub fn crop(&self, x: usize, y: usize, width: usize, height: usize) -> Result<Self, ImageError> {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        if x >= x_end || y >= y_end {
            return Err(ImageError::Empty);
        }
        let mut data = Vec::with_capacity((x_end - x) * (y_end - y));
        for yy in y..y_end {
            data.extend_from_slice(&self.row(yy)[x..x_end]);
        }
        Ok(Self {
            width: x_end - x,
            height: y_end - y,
            data,
        })
    }
}
