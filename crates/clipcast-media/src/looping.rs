//! Sequence math for an endlessly looping playlist.
//!
//! A cached stream repeats the same list of segments forever. Clients see a
//! sliding window over that infinite sequence, so media and discontinuity
//! sequence numbers are derived from the loop count plus the position inside
//! the current loop.

/// Sliding window over one loop of a repeating segment list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopWindow {
    /// Completed loops since the stream went online.
    pub loop_index: u64,
    /// Seconds into the current loop.
    pub position_in_loop: f64,
    /// First segment in the window.
    pub start_index: usize,
    /// Last segment in the window (inclusive), the one playing right now.
    pub end_index: usize,
    /// `#EXT-X-MEDIA-SEQUENCE` of `start_index`.
    pub media_sequence: u64,
    /// `#EXT-X-DISCONTINUITY-SEQUENCE` of `start_index`.
    pub discontinuity_sequence: u64,
    /// Track boundaries inside one loop, not counting the wrap.
    pub transitions_per_loop: usize,
    /// The window starts at the loop wrap point and needs a discontinuity on
    /// its first segment.
    pub wrap_discontinuity: bool,
}

/// Locate the window `[position - window_secs, position]` in the loop.
///
/// `track_starts[i]` is true when segment `i` is the first segment of a
/// track. Every loop contributes one discontinuity per track boundary plus one
/// for wrapping back to the first segment. Returns `None` for an empty list,
/// a zero total duration or mismatched slices.
pub fn loop_window(
    durations: &[f64],
    track_starts: &[bool],
    elapsed_secs: f64,
    window_secs: f64,
) -> Option<LoopWindow> {
    if durations.is_empty() || durations.len() != track_starts.len() {
        return None;
    }

    let total: f64 = durations.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return None;
    }

    let elapsed = if elapsed_secs.is_finite() {
        elapsed_secs.max(0.0)
    } else {
        0.0
    };
    let loop_index = (elapsed / total).floor() as u64;
    let mut position = elapsed - loop_index as f64 * total;
    if position >= total {
        position = 0.0;
    }

    let window_start = (position - window_secs.max(0.0)).max(0.0);
    let start_index = segment_at(durations, window_start);
    let end_index = segment_at(durations, position).max(start_index);

    let count = durations.len() as u64;
    let transitions = track_starts.iter().skip(1).filter(|s| **s).count();
    let before_start = track_starts
        .iter()
        .take(start_index)
        .skip(1)
        .filter(|s| **s)
        .count() as u64;
    let wrap_discontinuity = loop_index > 0 && start_index == 0;

    // Discontinuities strictly before the first segment of the window. The
    // wrap into the current loop only counts once the window has moved past it.
    let mut discontinuity_sequence = loop_index * (transitions as u64 + 1) + before_start;
    if wrap_discontinuity {
        discontinuity_sequence -= 1;
    }

    Some(LoopWindow {
        loop_index,
        position_in_loop: position,
        start_index,
        end_index,
        media_sequence: loop_index * count + start_index as u64,
        discontinuity_sequence,
        transitions_per_loop: transitions,
        wrap_discontinuity,
    })
}

fn segment_at(durations: &[f64], position: f64) -> usize {
    let mut cumulative = 0.0;
    for (index, duration) in durations.iter().enumerate() {
        cumulative += duration;
        if position < cumulative {
            return index;
        }
    }
    durations.len() - 1
}
