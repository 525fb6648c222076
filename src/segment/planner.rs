//! Segment window planning
//!
//! Windowing is a pure function of `(total, chunk, overlap)`: the same inputs
//! always yield the same window list. Adjacent windows overlap so the
//! translation of a subtitle near a boundary can draw on context from both
//! sides.

/// One planned time window
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub start_sec: f64,
    pub end_sec: f64,
}

impl Window {
    pub fn duration(&self) -> f64 {
        self.end_sec - self.start_sec
    }
}

/// Plan the segment windows for a media file of `total_secs`.
///
/// Windows are `[i*(C-O), i*(C-O)+C]` clamped to the total. A tail window
/// shorter than `C/3` is merged into the previous window instead of being
/// emitted on its own.
pub fn plan_windows(total_secs: f64, chunk_secs: f64, overlap_secs: f64) -> Vec<Window> {
    debug_assert!(chunk_secs > 0.0 && overlap_secs < chunk_secs);

    let step = chunk_secs - overlap_secs;
    let mut windows = Vec::new();
    let mut start = 0.0;

    while start < total_secs {
        let end = (start + chunk_secs).min(total_secs);
        windows.push(Window {
            start_sec: start,
            end_sec: end,
        });
        if end >= total_secs {
            break;
        }
        start += step;
    }

    // Tail-merge rule: a final window shorter than a third of the chunk
    // length carries too little context to transcribe on its own.
    if windows.len() >= 2 {
        let tail = windows.last().unwrap();
        if tail.duration() < chunk_secs / 3.0 {
            let end = tail.end_sec;
            windows.pop();
            windows.last_mut().unwrap().end_sec = end;
        }
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_overlapping_windows() {
        let windows = plan_windows(1800.0, 1200.0, 300.0);
        assert_eq!(
            windows,
            vec![
                Window { start_sec: 0.0, end_sec: 1200.0 },
                Window { start_sec: 900.0, end_sec: 1800.0 },
            ]
        );
    }

    #[test]
    fn test_short_input_single_window() {
        let windows = plan_windows(300.0, 1200.0, 300.0);
        assert_eq!(windows, vec![Window { start_sec: 0.0, end_sec: 300.0 }]);
    }

    #[test]
    fn test_tail_shorter_than_third_is_merged() {
        // Third window would be [1800, 2150] = 350s < 1200/3; merged into the
        // second, which then ends at the total.
        let windows = plan_windows(2150.0, 1200.0, 300.0);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].start_sec, 900.0);
        assert_eq!(windows[1].end_sec, 2150.0);
    }

    #[test]
    fn test_tail_exactly_third_is_kept() {
        // Third window [1800, 2200] = 400s = 1200/3 exactly: kept.
        let windows = plan_windows(2200.0, 1200.0, 300.0);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[2].start_sec, 1800.0);
        assert_eq!(windows[2].end_sec, 2200.0);
    }

    #[test]
    fn test_windows_cover_total() {
        for &total in &[100.0, 1234.5, 3600.0, 9999.0] {
            let windows = plan_windows(total, 1200.0, 300.0);
            assert_eq!(windows.first().unwrap().start_sec, 0.0);
            assert_eq!(windows.last().unwrap().end_sec, total);
            for pair in windows.windows(2) {
                // Each window starts before its predecessor ends (overlap)
                // but never regresses past the overlap length.
                assert!(pair[1].start_sec < pair[0].end_sec);
                assert!(pair[1].start_sec > pair[0].start_sec);
            }
        }
    }

    #[test]
    fn test_pure_function() {
        let a = plan_windows(5432.1, 1200.0, 300.0);
        let b = plan_windows(5432.1, 1200.0, 300.0);
        assert_eq!(a, b);
    }
}
