//! Gradient-energy border fallback.
//!
//! Used when the uniform scan is unstable (noisy bars, soft vignettes,
//! disagreeing probes): borders are the runs from each edge inward where
//! the mean gradient magnitude of a row/column stays below a threshold.

use super::scan::Edges;
use crate::frame::GrayFrame;

/// Per-pixel `|gx| + |gy|` with central differences (one-sided at the edges).
pub(crate) fn gradient_magnitude(frame: &GrayFrame) -> Vec<f64> {
    let (w, h) = (frame.width(), frame.height());
    let mut out = Vec::with_capacity(w as usize * h as usize);
    for y in 0..h {
        for x in 0..w {
            let (x0, x1) = (x.saturating_sub(1), (x + 1).min(w - 1));
            let (y0, y1) = (y.saturating_sub(1), (y + 1).min(h - 1));
            let gx = central(frame.get(x1, y), frame.get(x0, y), x1 - x0);
            let gy = central(frame.get(x, y1), frame.get(x, y0), y1 - y0);
            out.push(gx.abs() + gy.abs());
        }
    }
    out
}

fn central(after: u8, before: u8, span: u32) -> f64 {
    if span == 0 {
        return 0.0;
    }
    (after as f64 - before as f64) / span as f64
}

/// Mean gradient per row and per column.
fn profiles(frame: &GrayFrame) -> (Vec<f64>, Vec<f64>) {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let magnitude = gradient_magnitude(frame);
    let mut rows = vec![0.0; h];
    let mut cols = vec![0.0; w];
    for y in 0..h {
        for x in 0..w {
            let g = magnitude[y * w + x];
            rows[y] += g;
            cols[x] += g;
        }
    }
    rows.iter_mut().for_each(|r| *r /= w as f64);
    cols.iter_mut().for_each(|c| *c /= h as f64);
    (rows, cols)
}

/// `(start, end)` of the span outside the low-energy runs at both ends.
fn active_span(profile: &[f64], threshold: f64) -> Option<(u32, u32)> {
    let start = profile.iter().position(|&g| g >= threshold)?;
    let end = profile.iter().rposition(|&g| g >= threshold)? + 1;
    Some((start as u32, end as u32))
}

/// Content box from gradient energy; `None` for a flat frame.
pub fn gradient_scan(frame: &GrayFrame, edge_threshold: f64) -> Option<Edges> {
    let (rows, cols) = profiles(frame);
    let (top, bottom) = active_span(&rows, edge_threshold)?;
    let (left, right) = active_span(&cols, edge_threshold)?;
    Some(Edges::new(left, top, right, bottom))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_frame_has_no_energy() {
        let frame = GrayFrame::from_fn(16, 16, |_, _| 90);
        assert!(gradient_magnitude(&frame).iter().all(|&g| g == 0.0));
        assert_eq!(gradient_scan(&frame, 10.0), None);
    }

    #[test]
    fn test_noisy_bars_are_borders() {
        // Bars carry low-amplitude noise that defeats the uniform scan.
        let frame = GrayFrame::from_fn(64, 48, |x, y| {
            if (8..40).contains(&y) {
                if (x / 2 + y / 2) % 2 == 0 { 40 } else { 200 }
            } else {
                ((x * 7 + y * 3) % 9) as u8
            }
        });
        let edges = gradient_scan(&frame, 10.0).unwrap();
        // Gradients bleed one pixel past the content boundary.
        assert!(edges.top.abs_diff(8) <= 1, "top {}", edges.top);
        assert!(edges.bottom.abs_diff(40) <= 1, "bottom {}", edges.bottom);
        assert_eq!((edges.left, edges.right), (0, 64));
    }
}
