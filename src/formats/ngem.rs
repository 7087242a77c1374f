//! nGEM `.edb` event files
//!
//! A file is a run of 16-byte big-endian words. Each word is turned into a
//! `u128` by reading both 64-bit halves big-endian, first half high, and
//! fields are pulled out with shifts and masks:
//!
//! ```text
//! bits      coincidence            frame marker (T0)
//! 0..24     t0 id                  event count (0..32)
//! 24..34    cluster time Y
//! 34..44    cluster time X         frame loss (32..44)
//! 44..50    time diff Y
//! 50..56    time diff X
//! 60..67    last Y                 t0 id (64..88)
//! 67..74    first Y
//! 74..81    last X
//! 81..88    first X                event loss (88..108)
//! 88..116   time of flight (ns)
//! 116..120  type nibble 0xF        id byte 0x4E (112..120)
//! 120..128  continuation 0x4F      continuation 0x4F
//! ```
//!
//! Words with a bad continuation byte or a zero type nibble are corrupt;
//! the scanner steps forward by a sub-word amount and tries again.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::{debug, instrument, warn};

use super::accumulator::{EventAccumulator, FrameAcceptance, TofEvent, bin_channels};
use super::histogram::{Binning, Histogram};
use super::{DecodeControl, has_extension};
use crate::error::{Error, Result};
use crate::metrics::{EventKind, Metrics};
use crate::stream::{ByteCursor, ByteSource};

/// Size of one event word in bytes
pub const WORD_SIZE: usize = 16;

/// Sentinel in the top byte of every well-formed word
pub const CONTINUATION_CODE: u8 = 0x4F;

/// Type nibble of a coincidence (neutron) event
pub const COINCIDENCE_TYPE: u8 = 0xF;

/// Full id byte of a T0 frame marker
pub const FRAME_MARKER_ID: u8 = 0x4E;

/// Bits used for one pixel coordinate
pub const ROW_BITS: u32 = 7;

/// Pixels in the detector (128 x 128)
pub const NUM_PIXELS: usize = 1 << (2 * ROW_BITS);

/// Time-of-flight ticks per microsecond
pub const TICKS_PER_MICROSECOND: f64 = 1000.0;

const CONTINUATION_SHIFT: u32 = 120;
const TYPE_SHIFT: u32 = 116;
const ID_BYTE_SHIFT: u32 = 112;

#[inline]
fn bits(word: u128, lo: u32, width: u32) -> u128 {
    (word >> lo) & ((1u128 << width) - 1)
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
fn bits_u32(word: u128, lo: u32, width: u32) -> u32 {
    bits(word, lo, width) as u32
}

/// Combine a 16-byte big-endian word into one value.
///
/// Equivalent to swapping each 64-bit half to host order and then
/// swapping the halves.
#[must_use]
pub fn word_from_be_bytes(bytes: &[u8; WORD_SIZE]) -> u128 {
    let mut high = [0u8; 8];
    let mut low = [0u8; 8];
    high.copy_from_slice(&bytes[..8]);
    low.copy_from_slice(&bytes[8..]);
    (u128::from(u64::from_be_bytes(high)) << 64) | u128::from(u64::from_be_bytes(low))
}

/// Inverse of [`word_from_be_bytes`]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn word_to_be_bytes(word: u128) -> [u8; WORD_SIZE] {
    let mut out = [0u8; WORD_SIZE];
    out[..8].copy_from_slice(&((word >> 64) as u64).to_be_bytes());
    out[8..].copy_from_slice(&(word as u64).to_be_bytes());
    out
}

/// Neutron hit reconstructed from a coincidence between X and Y strips
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoincidenceEvent {
    /// T0 the event belongs to
    pub t0_id: u32,
    /// Integrated cluster time on the Y side (ns)
    pub cluster_time_y: u16,
    /// Integrated cluster time on the X side (ns)
    pub cluster_time_x: u16,
    /// First-to-last detection lag on Y (ns)
    pub time_diff_y: u8,
    /// First-to-last detection lag on X (ns)
    pub time_diff_x: u8,
    /// X strip hit first
    pub first_x: u8,
    /// X strip hit last
    pub last_x: u8,
    /// Y strip hit first
    pub first_y: u8,
    /// Y strip hit last
    pub last_y: u8,
    /// Time since T0 in nanoseconds
    pub time_of_flight: u32,
}

impl CoincidenceEvent {
    /// Mean X strip
    #[must_use]
    pub fn avg_x(&self) -> usize {
        (usize::from(self.first_x) + usize::from(self.last_x)) / 2
    }

    /// Mean Y strip
    #[must_use]
    pub fn avg_y(&self) -> usize {
        (usize::from(self.first_y) + usize::from(self.last_y)) / 2
    }

    /// Detector pixel index
    #[must_use]
    pub fn pixel(&self) -> usize {
        self.avg_x() + (self.avg_y() << ROW_BITS)
    }

    /// Time of flight in microseconds
    #[must_use]
    pub fn tof_us(&self) -> f64 {
        f64::from(self.time_of_flight) / TICKS_PER_MICROSECOND
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_word(word: u128) -> Self {
        Self {
            t0_id: bits_u32(word, 0, 24),
            cluster_time_y: bits_u32(word, 24, 10) as u16,
            cluster_time_x: bits_u32(word, 34, 10) as u16,
            time_diff_y: bits_u32(word, 44, 6) as u8,
            time_diff_x: bits_u32(word, 50, 6) as u8,
            last_y: bits_u32(word, 60, 7) as u8,
            first_y: bits_u32(word, 67, 7) as u8,
            last_x: bits_u32(word, 74, 7) as u8,
            first_x: bits_u32(word, 81, 7) as u8,
            time_of_flight: bits_u32(word, 88, 28),
        }
    }

    /// Encode as a wire word (fields are masked to their widths)
    #[must_use]
    pub fn to_be_bytes(&self) -> [u8; WORD_SIZE] {
        let put = |value: u32, lo: u32, width: u32| -> u128 {
            (u128::from(value) & ((1u128 << width) - 1)) << lo
        };
        let word = put(self.t0_id, 0, 24)
            | put(self.cluster_time_y.into(), 24, 10)
            | put(self.cluster_time_x.into(), 34, 10)
            | put(self.time_diff_y.into(), 44, 6)
            | put(self.time_diff_x.into(), 50, 6)
            | put(self.last_y.into(), 60, 7)
            | put(self.first_y.into(), 67, 7)
            | put(self.last_x.into(), 74, 7)
            | put(self.first_x.into(), 81, 7)
            | put(self.time_of_flight, 88, 28)
            | (u128::from(COINCIDENCE_TYPE) << TYPE_SHIFT)
            | (u128::from(CONTINUATION_CODE) << CONTINUATION_SHIFT);
        word_to_be_bytes(word)
    }
}

/// T0 marker closing a frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameMarker {
    /// Events the hardware counted in the frame
    pub event_count: u32,
    /// Frames lost before this one
    pub frame_loss: u16,
    /// Identifier of the new T0
    pub t0_id: u32,
    /// Events lost in the frame
    pub event_loss: u32,
}

impl FrameMarker {
    #[allow(clippy::cast_possible_truncation)]
    fn from_word(word: u128) -> Self {
        Self {
            event_count: bits_u32(word, 0, 32),
            frame_loss: bits_u32(word, 32, 12) as u16,
            t0_id: bits_u32(word, 64, 24),
            event_loss: bits_u32(word, 88, 20),
        }
    }

    /// Encode as a wire word (fields are masked to their widths)
    #[must_use]
    pub fn to_be_bytes(&self) -> [u8; WORD_SIZE] {
        let word = u128::from(self.event_count)
            | (u128::from(self.frame_loss & 0x0FFF) << 32)
            | (u128::from(self.t0_id & 0x00FF_FFFF) << 64)
            | (u128::from(self.event_loss & 0x000F_FFFF) << 88)
            | (u128::from(FRAME_MARKER_ID) << ID_BYTE_SHIFT)
            | (u128::from(CONTINUATION_CODE) << CONTINUATION_SHIFT);
        word_to_be_bytes(word)
    }
}

/// A classified event word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NgemEvent {
    /// Neutron hit
    Coincidence(CoincidenceEvent),
    /// Frame boundary
    FrameMarker(FrameMarker),
    /// Well-formed word of a type this decoder does not use
    Generic {
        /// Type nibble
        type_id: u8,
    },
    /// Failed the structural check
    Invalid,
}

impl NgemEvent {
    /// Classify one wire word
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn decode(bytes: &[u8; WORD_SIZE]) -> Self {
        let word = word_from_be_bytes(bytes);
        let continuation = bits(word, CONTINUATION_SHIFT, 8) as u8;
        let type_id = bits(word, TYPE_SHIFT, 4) as u8;
        if continuation != CONTINUATION_CODE || type_id == 0 {
            return Self::Invalid;
        }
        if type_id == COINCIDENCE_TYPE {
            return Self::Coincidence(CoincidenceEvent::from_word(word));
        }
        if bits(word, ID_BYTE_SHIFT, 8) as u8 == FRAME_MARKER_ID {
            return Self::FrameMarker(FrameMarker::from_word(word));
        }
        Self::Generic { type_id }
    }

    /// Whether the word passed the structural check
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }
}

/// Decode options
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NgemConfig {
    /// Event-count window for good frames
    pub acceptance: FrameAcceptance,
    /// Bytes to advance after a corrupt word (1..=16)
    pub resync_step: usize,
    /// Default histogram bin width in microseconds
    pub bin_width: f64,
}

impl Default for NgemConfig {
    fn default() -> Self {
        Self {
            acceptance: FrameAcceptance::ALL,
            resync_step: 1,
            bin_width: 10.0,
        }
    }
}

impl NgemConfig {
    /// Check the options before any data is read
    pub fn validate(&self) -> Result<()> {
        self.acceptance.validate()?;
        if !(1..=WORD_SIZE).contains(&self.resync_step) {
            return Err(Error::config(format!(
                "resync step must be between 1 and {WORD_SIZE} bytes, got {}",
                self.resync_step
            )));
        }
        if !(self.bin_width.is_finite() && self.bin_width > 0.0) {
            return Err(Error::config(format!(
                "bin width must be positive, got {}",
                self.bin_width
            )));
        }
        Ok(())
    }
}

/// Counters gathered while scanning
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NgemStats {
    /// Valid words read
    pub words: u64,
    /// Coincidence events read
    pub neutron_events: u64,
    /// T0 markers read
    pub frame_markers: u64,
    /// Well-formed words of other types
    pub generic_events: u64,
    /// Bytes stepped over while resynchronising
    pub bytes_skipped: u64,
    /// Aggregate corruption diagnostics emitted
    pub corruption_reports: u64,
    /// Bytes left over after the last whole word, summed over sources
    pub trailing_bytes: u64,
    /// Sources decoded
    pub sources: u64,
    tof_min: Option<f64>,
    tof_max: Option<f64>,
}

impl NgemStats {
    /// Smallest and largest time of flight seen, in microseconds
    #[must_use]
    pub fn tof_range(&self) -> Option<(f64, f64)> {
        self.tof_min.zip(self.tof_max)
    }

    fn observe_tof(&mut self, tof: f64) {
        self.tof_min = Some(self.tof_min.map_or(tof, |m| m.min(tof)));
        self.tof_max = Some(self.tof_max.map_or(tof, |m| m.max(tof)));
    }
}

/// Result of decoding one or more `.edb` files
#[derive(Debug, Clone)]
pub struct NgemRun {
    /// Accepted events per pixel, in file order
    pub pixels: Vec<Vec<TofEvent>>,
    /// Frames seen
    pub raw_frames: u64,
    /// Frames accepted
    pub good_frames: u64,
    /// Event count of each accepted frame
    pub events_per_frame: Vec<u64>,
    /// Scan counters
    pub stats: NgemStats,
    /// Whether decoding stopped early on request
    pub cancelled: bool,
    bin_width: f64,
}

impl NgemRun {
    /// Accepted events over all pixels
    #[must_use]
    pub fn total_events(&self) -> usize {
        self.pixels.iter().map(Vec::len).sum()
    }

    /// Histogram every pixel over the observed TOF range
    #[must_use]
    pub fn histograms(&self) -> Vec<Histogram> {
        self.histograms_with_width(self.bin_width)
    }

    /// Histogram every pixel with an explicit bin width (µs)
    #[must_use]
    pub fn histograms_with_width(&self, bin_width: f64) -> Vec<Histogram> {
        let (min, max) = self.stats.tof_range().unwrap_or((0.0, bin_width));
        let binning = Binning::new(min, max, bin_width);
        bin_channels(&self.pixels, &binning, |event| event.tof)
    }
}

/// Stateful decoder; counters, accumulators and the TOF range persist
/// across every source fed to it.
#[derive(Debug)]
pub struct NgemDecoder {
    config: NgemConfig,
    events: EventAccumulator<TofEvent>,
    stats: NgemStats,
    cancelled: bool,
}

impl NgemDecoder {
    /// Create a decoder after validating `config`
    pub fn new(config: NgemConfig) -> Result<Self> {
        config.validate()?;
        let events = EventAccumulator::new(NUM_PIXELS, config.acceptance);
        Ok(Self {
            config,
            events,
            stats: NgemStats::default(),
            cancelled: false,
        })
    }

    /// Whether a control requested cancellation
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Scan counters so far
    #[must_use]
    pub const fn stats(&self) -> &NgemStats {
        &self.stats
    }

    /// Decode one file from disk
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn decode_file<C: DecodeControl>(
        &mut self,
        path: impl AsRef<Path>,
        control: &mut C,
    ) -> Result<()> {
        let mut cursor = ByteCursor::open(path.as_ref())?;
        let size = cursor.file_size();
        if size % WORD_SIZE as u64 != 0 {
            warn!(
                size,
                "file size is not a multiple of {WORD_SIZE} bytes; trailing data ignored"
            );
        }
        self.decode_source(&mut cursor, control)
    }

    /// Scan a source until it runs out of whole words or cancellation.
    ///
    /// A partial word at the end is not an error.
    pub fn decode_source<S: ByteSource, C: DecodeControl>(
        &mut self,
        cursor: &mut ByteCursor<S>,
        control: &mut C,
    ) -> Result<()> {
        let total = cursor.len();
        let step = self.config.resync_step as u64;
        let mut skipped = 0u64;
        let mut words = 0u64;
        self.stats.sources += 1;

        while !self.cancelled {
            let start = cursor.position();
            let Some(raw) = cursor.try_read_array::<WORD_SIZE>()? else {
                break;
            };
            match NgemEvent::decode(&raw) {
                NgemEvent::Invalid => {
                    skipped += step;
                    cursor.seek(start + step)?;
                    continue;
                }
                NgemEvent::Coincidence(event) => {
                    let tof = event.tof_us();
                    self.stats.observe_tof(tof);
                    self.stats.neutron_events += 1;
                    Metrics::record_event(EventKind::Neutron);
                    self.events.push(
                        event.pixel(),
                        TofEvent {
                            tof,
                            pulse: u64::from(event.t0_id),
                        },
                    );
                }
                NgemEvent::FrameMarker(marker) => {
                    self.stats.frame_markers += 1;
                    Metrics::record_event(EventKind::FrameMarker);
                    if marker.event_loss > 0 || marker.frame_loss > 0 {
                        debug!(
                            t0 = marker.t0_id,
                            event_loss = marker.event_loss,
                            frame_loss = marker.frame_loss,
                            "hardware reported losses"
                        );
                    }
                    self.events.close_frame();
                    control.progress(cursor.position(), total);
                    if control.is_cancelled() {
                        debug!(offset = cursor.position(), "decode cancelled");
                        self.cancelled = true;
                    }
                }
                NgemEvent::Generic { type_id } => {
                    self.stats.generic_events += 1;
                    Metrics::record_event(EventKind::Generic);
                    warn!(type_id, offset = start, "unexpected event type");
                }
            }
            words += 1;
        }

        self.stats.words += words;
        self.stats.trailing_bytes += cursor.remaining();
        Metrics::record_words(words);
        if skipped > 0 {
            self.stats.bytes_skipped += skipped;
            self.stats.corruption_reports += 1;
            Metrics::record_skipped(skipped);
            warn!(bytes = skipped, "skipped corrupted data while resynchronising");
        }
        Ok(())
    }

    /// Flush the unterminated last frame and hand over the results.
    ///
    /// After cancellation the in-progress frame is discarded instead.
    #[must_use]
    pub fn finish(mut self) -> NgemRun {
        if self.cancelled {
            self.events.discard_frame();
        } else if self.events.frame_event_count() > 0 {
            self.events.close_frame();
        }
        let raw_frames = self.events.raw_frames();
        let good_frames = self.events.good_frames();
        let events_per_frame = self.events.events_per_frame().to_vec();
        NgemRun {
            pixels: self.events.into_channels(),
            raw_frames,
            good_frames,
            events_per_frame,
            stats: self.stats,
            cancelled: self.cancelled,
            bin_width: self.config.bin_width,
        }
    }
}

/// Decode several files into one run.
///
/// File boundaries are not frame boundaries: a frame may span two files.
pub fn decode_files<P: AsRef<Path>, C: DecodeControl>(
    paths: &[P],
    config: NgemConfig,
    mut control: C,
) -> Result<NgemRun> {
    if paths.is_empty() {
        return Err(Error::config("no input files"));
    }
    let mut decoder = NgemDecoder::new(config)?;
    for path in paths {
        if decoder.is_cancelled() {
            break;
        }
        decoder.decode_file(path, &mut control)?;
    }
    Ok(decoder.finish())
}

/// Confidence that `path` is an nGEM file (0 = no). Never fails.
#[must_use]
pub fn probe(path: impl AsRef<Path>) -> u8 {
    let path = path.as_ref();
    if !has_extension(path, "edb") {
        return 0;
    }
    let mut first = [0u8; WORD_SIZE];
    let read = File::open(path).and_then(|mut f| f.read_exact(&mut first));
    match read {
        Ok(()) if NgemEvent::decode(&first).is_valid() => 95,
        Ok(()) => 50,
        Err(_) => 0,
    }
}
