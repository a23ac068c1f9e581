use std::num::NonZeroU64;

use crate::error::{Error, Result};

/// A selection of frames to retain while reading a trajectory.
///
/// Frames are counted from one, in the order they appear in the file. A frame `n` is retained
/// when it lies beyond `start` and sits on the `delta` stride (`n % delta == 0`). Reading stops
/// as soon as the counter passes `end`.
///
/// # Note
///
/// An `end` that is not larger than `start` leaves the window unbounded, so `Window::new(0, 1, 0)`
/// retains every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Frames up to and including `start` are skipped.
    pub start: u64,
    /// The stride between retained frames.
    pub delta: NonZeroU64,
    /// The last frame that may be retained, if the window is bounded.
    pub end: Option<u64>,
}

impl Window {
    /// Create a new [`Window`] from raw iteration values.
    ///
    /// A `delta` of zero is clamped to one. Use [`Window::try_new`] to reject it instead.
    pub fn new(start: u64, delta: u64, end: u64) -> Self {
        Self {
            start,
            delta: NonZeroU64::new(delta).unwrap_or(NonZeroU64::MIN),
            end: (end > start).then_some(end),
        }
    }

    pub fn try_new(start: u64, delta: u64, end: u64) -> Result<Self> {
        if delta == 0 {
            return Err(Error::InvalidOptions("delta must be at least 1".to_string()));
        }
        Ok(Self::new(start, delta, end))
    }

    /// Determine whether the frame with the 1-based counter `n` is retained.
    ///
    /// Will return [`None`] once `n` is beyond the end of this `Window`, at which point a reader
    /// can stop.
    pub fn classify(&self, n: u64) -> Option<bool> {
        if let Some(end) = self.end {
            if n > end {
                return None;
            }
        }
        let in_range = n > self.start;
        let in_step = self.delta.get() == 1 || n % self.delta == 0;
        Some(in_range && in_step)
    }

    /// The number of frames this window needs to see before it is exhausted, if bounded.
    pub fn until(&self) -> Option<u64> {
        self.end
    }

    /// Count the frames that would be retained from a trajectory of `nframes` frames.
    pub fn retained(&self, nframes: u64) -> usize {
        (1..=nframes)
            .map_while(|n| self.classify(n))
            .filter(|&keep| keep)
            .count()
    }
}

impl Default for Window {
    fn default() -> Self {
        Self {
            start: 0,
            delta: NonZeroU64::MIN,
            end: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retained_frames(window: &Window, nframes: u64) -> Vec<u64> {
        (1..=nframes)
            .map_while(|n| window.classify(n).map(|keep| (n, keep)))
            .filter_map(|(n, keep)| keep.then_some(n))
            .collect()
    }

    #[test]
    fn everything() {
        let window = Window::default();
        assert_eq!(window, Window::new(0, 1, 0));
        assert_eq!(retained_frames(&window, 15), (1..=15).collect::<Vec<_>>());
        assert_eq!(window.retained(15), 15);
    }

    #[test]
    fn start_delta_end() {
        let window = Window::new(2, 3, 11);
        assert_eq!(retained_frames(&window, 15), [3, 6, 9]);
        assert_eq!(window.retained(15), 3);
        assert_eq!(window.classify(11), Some(false));
        assert_eq!(window.classify(12), None);
    }

    #[test]
    fn end_before_start_is_unbounded() {
        let window = Window::new(10, 5, 4);
        assert!(window.until().is_none());
        assert_eq!(retained_frames(&window, 30), [15, 20, 25, 30]);
    }

    #[test]
    fn zero_delta() {
        let window = Window::new(0, 0, 0);
        assert_eq!(window.delta.get(), 1);
        assert_eq!(window.retained(7), 7);
        assert!(matches!(
            Window::try_new(0, 0, 0),
            Err(Error::InvalidOptions(_))
        ));
    }

    #[test]
    fn nothing_past_the_end() {
        let window = Window::new(0, 1, 3);
        for n in 4..100 {
            assert!(window.classify(n).is_none());
        }
        assert_eq!(window.retained(100), 3);
    }
}
