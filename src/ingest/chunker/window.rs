//! Sliding-window fallback for prose, markup, config, and languages
//! without a symbol extractor.
//!
//! Windows cover every line of the file; consecutive windows overlap so a
//! statement straddling a boundary appears whole in at least one window.

/// Produce 1-based inclusive line ranges covering `line_count` lines.
///
/// The final window is at least `overlap` lines even when that means
/// re-covering lines from the previous window.
pub fn window_ranges(line_count: usize, window: usize, overlap: usize) -> Vec<(usize, usize)> {
    if line_count == 0 {
        return Vec::new();
    }
    let window = window.max(1);
    let overlap = overlap.min(window.saturating_sub(1));
    let step = window - overlap;

    let mut ranges = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + window).min(line_count);
        // Re-anchor a too-small tail so the final window keeps minimum size.
        let adjusted_start = if line_count - start < overlap {
            line_count.saturating_sub(overlap)
        } else {
            start
        };
        ranges.push((adjusted_start + 1, end));
        if end >= line_count {
            break;
        }
        start += step;
    }
    ranges
}
