//! Per-channel event accumulation with frame acceptance

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::trace;

use super::histogram::{Binning, Histogram};
use crate::error::{Error, Result};
use crate::metrics::Metrics;

/// Inclusive event-count window a frame must fall in to be kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameAcceptance {
    /// Fewest events a good frame may hold
    pub min_events: u64,
    /// Most events a good frame may hold
    pub max_events: u64,
}

impl FrameAcceptance {
    /// Accept every frame
    pub const ALL: Self = Self {
        min_events: 0,
        max_events: u64::MAX,
    };

    /// Build and validate a window
    pub fn new(min_events: u64, max_events: u64) -> Result<Self> {
        let window = Self {
            min_events,
            max_events,
        };
        window.validate()?;
        Ok(window)
    }

    /// Reject inverted windows
    pub fn validate(&self) -> Result<()> {
        if self.max_events < self.min_events {
            return Err(Error::config(format!(
                "max events per frame ({}) is below min events per frame ({})",
                self.max_events, self.min_events
            )));
        }
        Ok(())
    }

    /// Whether a frame with `count` events is good
    #[must_use]
    pub const fn accepts(&self, count: u64) -> bool {
        self.min_events <= count && count <= self.max_events
    }
}

impl Default for FrameAcceptance {
    fn default() -> Self {
        Self::ALL
    }
}

/// Outcome of closing a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameVerdict {
    /// Frame merged into the permanent lists
    Accepted,
    /// Frame events dropped
    Rejected,
}

/// A time-of-flight event in one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TofEvent {
    /// Time of flight in microseconds
    pub tof: f64,
    /// Pulse identifier the event belongs to
    pub pulse: u64,
}

/// Events are staged per frame and only become visible once their frame
/// is accepted. Within a channel, events keep arrival order.
#[derive(Debug, Clone)]
pub struct EventAccumulator<E> {
    accepted: Vec<Vec<E>>,
    pending: Vec<Vec<E>>,
    touched: Vec<usize>,
    policy: FrameAcceptance,
    frame_events: u64,
    raw_frames: u64,
    good_frames: u64,
    events_per_frame: Vec<u64>,
    dropped: u64,
}

impl<E> EventAccumulator<E> {
    /// Create an accumulator over `channels` channels
    #[must_use]
    pub fn new(channels: usize, policy: FrameAcceptance) -> Self {
        Self {
            accepted: std::iter::repeat_with(Vec::new).take(channels).collect(),
            pending: std::iter::repeat_with(Vec::new).take(channels).collect(),
            touched: Vec::new(),
            policy,
            frame_events: 0,
            raw_frames: 0,
            good_frames: 0,
            events_per_frame: Vec::new(),
            dropped: 0,
        }
    }

    /// Stage an event for the current frame; out-of-range channels are
    /// counted as dropped and return `false`.
    pub fn push(&mut self, channel: usize, event: E) -> bool {
        let Some(list) = self.pending.get_mut(channel) else {
            self.dropped += 1;
            return false;
        };
        if list.is_empty() {
            self.touched.push(channel);
        }
        list.push(event);
        self.frame_events += 1;
        true
    }

    /// Close the current frame and apply the acceptance window
    pub fn close_frame(&mut self) -> FrameVerdict {
        let count = self.frame_events;
        let accepted = self.policy.accepts(count);
        for &channel in &self.touched {
            let staged = &mut self.pending[channel];
            if accepted {
                self.accepted[channel].append(staged);
            } else {
                staged.clear();
            }
        }
        self.touched.clear();
        self.frame_events = 0;
        self.raw_frames += 1;
        Metrics::record_frame(accepted);

        if accepted {
            self.good_frames += 1;
            self.events_per_frame.push(count);
            FrameVerdict::Accepted
        } else {
            trace!(events = count, "frame rejected");
            FrameVerdict::Rejected
        }
    }

    /// Drop the in-progress frame without counting it
    pub fn discard_frame(&mut self) {
        for &channel in &self.touched {
            self.pending[channel].clear();
        }
        self.touched.clear();
        self.frame_events = 0;
    }

    /// Events staged in the current frame
    #[must_use]
    pub const fn frame_event_count(&self) -> u64 {
        self.frame_events
    }

    /// Frames closed so far
    #[must_use]
    pub const fn raw_frames(&self) -> u64 {
        self.raw_frames
    }

    /// Frames accepted so far
    #[must_use]
    pub const fn good_frames(&self) -> u64 {
        self.good_frames
    }

    /// Event count of each accepted frame, in order
    #[must_use]
    pub fn events_per_frame(&self) -> &[u64] {
        &self.events_per_frame
    }

    /// Events pushed to channels that do not exist
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Acceptance window in use
    #[must_use]
    pub const fn policy(&self) -> FrameAcceptance {
        self.policy
    }

    /// Accepted events per channel
    #[must_use]
    pub fn channels(&self) -> &[Vec<E>] {
        &self.accepted
    }

    /// Total accepted events
    #[must_use]
    pub fn accepted_events(&self) -> usize {
        self.accepted.iter().map(Vec::len).sum()
    }

    /// Take the accepted per-channel lists
    #[must_use]
    pub fn into_channels(self) -> Vec<Vec<E>> {
        self.accepted
    }
}

/// Histogram every channel with the same binning.
///
/// Channels are independent, so with the `rayon` feature they are binned
/// in parallel.
pub fn bin_channels<E, F>(channels: &[Vec<E>], binning: &Binning, key: F) -> Vec<Histogram>
where
    E: Sync,
    F: Fn(&E) -> f64 + Sync,
{
    let bin_one = |events: &Vec<E>| binning.histogram(events.iter().map(&key));
    #[cfg(feature = "rayon")]
    {
        channels.par_iter().map(bin_one).collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        channels.iter().map(bin_one).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_validation() {
        assert!(FrameAcceptance::new(5, 2).is_err());
        let window = FrameAcceptance::new(2, 5).unwrap();
        assert!(!window.accepts(1));
        assert!(window.accepts(2));
        assert!(window.accepts(5));
        assert!(!window.accepts(6));
    }

    #[test]
    fn test_rejected_frame_invisible() {
        let mut acc = EventAccumulator::new(4, FrameAcceptance::new(2, 3).unwrap());
        acc.push(1, 'a');
        assert_eq!(acc.close_frame(), FrameVerdict::Rejected);
        acc.push(1, 'b');
        acc.push(2, 'c');
        assert_eq!(acc.close_frame(), FrameVerdict::Accepted);

        assert_eq!(acc.channels()[1], vec!['b']);
        assert_eq!(acc.channels()[2], vec!['c']);
        assert_eq!(acc.raw_frames(), 2);
        assert_eq!(acc.good_frames(), 1);
        assert_eq!(acc.events_per_frame(), &[2]);
    }

    #[test]
    fn test_channel_order_preserved() {
        let mut acc = EventAccumulator::new(1, FrameAcceptance::ALL);
        for value in [3, 1, 2] {
            acc.push(0, value);
        }
        acc.close_frame();
        acc.push(0, 0);
        acc.close_frame();
        assert_eq!(acc.into_channels()[0], vec![3, 1, 2, 0]);
    }

    #[test]
    fn test_out_of_range_dropped() {
        let mut acc = EventAccumulator::new(2, FrameAcceptance::ALL);
        assert!(!acc.push(2, ()));
        assert_eq!(acc.dropped(), 1);
        assert_eq!(acc.frame_event_count(), 0);
    }

    #[test]
    fn test_discard_does_not_count_frame() {
        let mut acc = EventAccumulator::new(2, FrameAcceptance::ALL);
        acc.push(0, 1);
        acc.discard_frame();
        assert_eq!(acc.raw_frames(), 0);
        assert_eq!(acc.accepted_events(), 0);
    }

    #[test]
    fn test_bin_channels() {
        let channels = vec![vec![0.5, 1.5, 1.7], vec![]];
        let hists = bin_channels(&channels, &Binning::new(0.0, 2.0, 1.0), |v| *v);
        assert_eq!(hists[0].counts, vec![1.0, 2.0]);
        assert_eq!(hists[1].counts, vec![0.0, 0.0]);
    }
}
