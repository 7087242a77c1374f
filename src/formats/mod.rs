//! File format decoders
//!
//! Each format exposes a side-effect-free `probe` returning a confidence
//! (0 means "not this format") and a decode entry point returning plain
//! records, histograms or per-channel event lists.

mod accumulator;
pub mod dns;
mod histogram;
pub mod ngem;
pub mod psi;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use accumulator::{EventAccumulator, FrameAcceptance, FrameVerdict, TofEvent, bin_channels};
pub use histogram::{Binning, Histogram, SpectrumRange};

/// Hooks polled by long-running decodes at frame boundaries.
pub trait DecodeControl {
    /// Stop at the next frame boundary when this returns `true`
    fn is_cancelled(&mut self) -> bool {
        false
    }

    /// Bytes consumed so far out of `total`
    fn progress(&mut self, _consumed: u64, _total: u64) {}
}

impl<T: DecodeControl + ?Sized> DecodeControl for &mut T {
    fn is_cancelled(&mut self) -> bool {
        (**self).is_cancelled()
    }

    fn progress(&mut self, consumed: u64, total: u64) {
        (**self).progress(consumed, total);
    }
}

/// Control that never cancels and ignores progress
#[derive(Debug, Clone, Copy, Default)]
pub struct Unmonitored;

impl DecodeControl for Unmonitored {}

/// Shareable cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl DecodeControl for CancelFlag {
    fn is_cancelled(&mut self) -> bool {
        self.is_set()
    }
}

/// Case-insensitive extension check used by the probes
pub(crate) fn has_extension(path: &std::path::Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}
