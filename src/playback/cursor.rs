//! Read position bookkeeping for one voice
//!
//! Pure state: chunk sizing, loop seams and termination. The worker feeds it
//! the byte counts its output line accepted.

use crate::asset::LoopPoints;
use std::ops::Range;

/// What the worker should do after a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Keep streaming after the usual sleep
    Continue,
    /// Jumped back to the loop start; write again without sleeping
    Rewound,
    /// Nothing left to play
    Finished,
}

#[derive(Debug, Clone)]
pub(crate) struct PlaybackCursor {
    position: usize,
    len: usize,
    frame_size: usize,
    loop_points: LoopPoints,
    loops_remaining: u32,
    rewinds: u32,
}

impl PlaybackCursor {
    /// `loops <= 0` plays through once
    pub(crate) fn new(len: usize, frame_size: usize, loop_points: LoopPoints, loops: i32) -> Self {
        let frame_size = frame_size.max(1);
        PlaybackCursor {
            position: 0,
            len,
            frame_size,
            loop_points: loop_points.aligned(frame_size, len),
            loops_remaining: loops.max(0) as u32,
            rewinds: 0,
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.position
    }

    pub(crate) fn rewinds(&self) -> u32 {
        self.rewinds
    }

    /// Where the current run of bytes ends
    fn boundary(&self) -> usize {
        if self.loop_points.is_looping() && self.position < self.loop_points.end() {
            self.loop_points.end()
        } else {
            self.len
        }
    }

    /// Byte range to offer the line given its free `capacity`
    ///
    /// Whole frames only, never across a loop seam. `None` once the cursor
    /// has run past the data.
    pub(crate) fn next_chunk(&self, capacity: usize) -> Option<Range<usize>> {
        if self.position >= self.len {
            return None;
        }
        let room = capacity - capacity % self.frame_size;
        let size = room.min(self.boundary() - self.position);
        Some(self.position..self.position + size)
    }

    /// Account for a write; `None` means the line could not take anything
    pub(crate) fn advance(&mut self, accepted: Option<usize>) -> Step {
        if let Some(bytes) = accepted {
            self.position = (self.position + bytes).min(self.len);
        }

        let at_seam = accepted.is_none()
            || self.position >= self.len
            || (self.loop_points.is_looping() && self.position == self.loop_points.end());
        if !at_seam {
            return Step::Continue;
        }

        if self.loops_remaining > 0 {
            self.position = self.loop_points.start();
            self.loops_remaining -= 1;
            self.rewinds += 1;
            Step::Rewound
        } else {
            Step::Finished
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive a cursor against an infinitely draining line
    fn drain(cursor: &mut PlaybackCursor, capacity: usize) -> Vec<Range<usize>> {
        let mut writes = Vec::new();
        loop {
            let chunk = cursor.next_chunk(capacity);
            let accepted = chunk.as_ref().map(|r| r.len());
            if let Some(r) = chunk.filter(|r| !r.is_empty()) {
                writes.push(r);
            }
            if cursor.advance(accepted) == Step::Finished {
                return writes;
            }
        }
    }

    #[test]
    fn test_single_pass_without_loop_points() {
        let mut c = PlaybackCursor::new(100, 2, LoopPoints::none(), 0);
        let writes = drain(&mut c, 32);
        assert_eq!(writes, vec![0..32, 32..64, 64..96, 96..100]);
        assert_eq!(c.rewinds(), 0);
        assert_eq!(c.position(), 100);
    }

    #[test]
    fn test_negative_loops_play_once() {
        let mut c = PlaybackCursor::new(10, 1, LoopPoints::none(), -3);
        drain(&mut c, 64);
        assert_eq!(c.rewinds(), 0);
    }

    #[test]
    fn test_exact_rewind_count() {
        let lp = LoopPoints::new(20, 60).unwrap();
        let mut c = PlaybackCursor::new(100, 2, lp, 3);
        let writes = drain(&mut c, 1_000);
        assert_eq!(c.rewinds(), 3);
        assert_eq!(writes, vec![0..60, 20..60, 20..60, 20..60]);
        assert_eq!(c.position(), 60);
    }

    #[test]
    fn test_chunks_never_cross_loop_end() {
        let lp = LoopPoints::new(8, 40).unwrap();
        let c = PlaybackCursor::new(100, 4, lp, 1);
        assert_eq!(c.next_chunk(64), Some(0..40));
    }

    #[test]
    fn test_capacity_rounded_to_frames() {
        let c = PlaybackCursor::new(100, 4, LoopPoints::none(), 0);
        assert_eq!(c.next_chunk(7), Some(0..4));
        assert_eq!(c.next_chunk(3), Some(0..0));
    }

    #[test]
    fn test_partial_acceptance_continues() {
        let mut c = PlaybackCursor::new(100, 1, LoopPoints::none(), 0);
        assert_eq!(c.advance(Some(30)), Step::Continue);
        assert_eq!(c.advance(Some(0)), Step::Continue);
        assert_eq!(c.position(), 30);
    }

    #[test]
    fn test_refused_write_counts_as_seam() {
        let mut c = PlaybackCursor::new(100, 1, LoopPoints::none(), 1);
        c.advance(Some(50));
        assert_eq!(c.advance(None), Step::Rewound);
        assert_eq!(c.position(), 0);
        assert_eq!(c.advance(None), Step::Finished);
    }

    #[test]
    fn test_repeat_without_loop_region_restarts_whole_buffer() {
        let mut c = PlaybackCursor::new(16, 1, LoopPoints::none(), 1);
        let writes = drain(&mut c, 64);
        assert_eq!(writes, vec![0..16, 0..16]);
    }

    #[test]
    fn test_empty_buffer_terminates() {
        let mut c = PlaybackCursor::new(0, 2, LoopPoints::none(), 2);
        assert!(drain(&mut c, 64).is_empty());
        assert_eq!(c.rewinds(), 2);
    }
}
