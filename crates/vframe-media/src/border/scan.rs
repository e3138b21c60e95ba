//! Uniform-line border scan (cropdetect style).

use crate::frame::GrayFrame;

/// Content box edges in frame pixels; `right`/`bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edges {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Edges {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Map to another resolution, rounding each edge and clamping to the
    /// `width x height` target frame.
    pub fn scaled(&self, fx: f64, fy: f64, width: u32, height: u32) -> Self {
        let scale = |v: u32, factor: f64, limit: u32| ((v as f64 * factor).round() as u32).min(limit);
        Self::new(
            scale(self.left, fx, width),
            scale(self.top, fy, height),
            scale(self.right, fx, width),
            scale(self.bottom, fy, height),
        )
    }

    /// Largest per-edge difference.
    pub fn max_deviation(&self, other: &Edges) -> u32 {
        [
            self.left.abs_diff(other.left),
            self.top.abs_diff(other.top),
            self.right.abs_diff(other.right),
            self.bottom.abs_diff(other.bottom),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

fn median_u8(values: &mut [u8]) -> u8 {
    values.sort_unstable();
    values[(values.len() - 1) / 2]
}

/// Every pixel of the line lies within `tolerance` of the line's median.
pub(crate) fn is_uniform(line: &[u8], tolerance: u8) -> bool {
    if line.is_empty() {
        return true;
    }
    let mut sorted = line.to_vec();
    let median = median_u8(&mut sorted);
    line.iter().all(|&v| v.abs_diff(median) <= tolerance)
}

/// Scan inward from each edge while rows/columns are uniform.
///
/// `None` when the whole frame is uniform (blank or title-card frames).
pub fn uniform_scan(frame: &GrayFrame, tolerance: u8) -> Option<Edges> {
    let (w, h) = (frame.width(), frame.height());

    let mut top = 0;
    while top < h && is_uniform(frame.row(top), tolerance) {
        top += 1;
    }
    if top == h {
        return None;
    }
    let mut bottom = h;
    while bottom > top && is_uniform(frame.row(bottom - 1), tolerance) {
        bottom -= 1;
    }

    // Columns are measured inside the vertical content band only.
    let column = |x: u32| -> Vec<u8> { (top..bottom).map(|y| frame.get(x, y)).collect() };
    let mut left = 0;
    while left < w && is_uniform(&column(left), tolerance) {
        left += 1;
    }
    if left == w {
        return None;
    }
    let mut right = w;
    while right > left && is_uniform(&column(right - 1), tolerance) {
        right -= 1;
    }

    Some(Edges::new(left, top, right, bottom))
}
