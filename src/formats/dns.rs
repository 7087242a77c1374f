//! DNS position-sensitive detector list-mode files (`.mdat`)
//!
//! Layout: a text header ending in [`HEADER_SEPARATOR`], then data buffers
//! separated by [`BUFFER_SEPARATOR`], optionally followed by
//! [`CLOSING_SIGNATURE`]. Each buffer is a big-endian header followed by
//! 8-byte event words carrying 48 significant bits ([`EventWidth`] selects
//! the packed 6-byte variant). Buffers are split first and parsed independently; the
//! chopper-relative time of flight is assigned afterwards in buffer order.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use bytes::Bytes;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::{debug, instrument, warn};

use super::accumulator::{EventAccumulator, FrameAcceptance, TofEvent, bin_channels};
use super::histogram::{Binning, Histogram};
use super::{DecodeControl, has_extension};
use crate::error::{Error, Result};
use crate::metrics::{EventKind, Metrics};
use crate::stream::ByteCursor;

/// Ends the text header
pub const HEADER_SEPARATOR: [u8; 8] = [0x00, 0x00, 0x55, 0x55, 0xAA, 0xAA, 0xFF, 0xFF];

/// Sits between data buffers
pub const BUFFER_SEPARATOR: [u8; 8] = [0x00, 0x00, 0xFF, 0xFF, 0x55, 0x55, 0xAA, 0xAA];

/// Ends the file
pub const CLOSING_SIGNATURE: [u8; 8] = [0xFF, 0xFF, 0xAA, 0xAA, 0x55, 0x55, 0x00, 0x00];

/// First bytes of every file
pub const FILE_SIGNATURE: &[u8] = b"mesytec psd listmode data";

/// Bytes in a buffer header without extra words
pub const BUFFER_HEADER_SIZE: usize = 42;

/// Timestamp tick in microseconds (100 ns)
pub const TICK_MICROSECONDS: f64 = 0.1;

/// Position channels per tube
pub const PIXELS_PER_TUBE: usize = 1024;

/// Slots per module
pub const SLOTS_PER_MODULE: u8 = 8;

/// Pixels addressable by `((mod << 3) | slot) * 1024 + position`
pub const NUM_PIXELS: usize = 8 * SLOTS_PER_MODULE as usize * PIXELS_PER_TUBE;

const EVENT_BITS: u64 = (1 << 48) - 1;

/// Stored width of one event word
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventWidth {
    /// Three 16-bit words
    Packed48,
    /// 48 significant bits in an 8-byte word, top 16 bits ignored
    #[default]
    Padded64,
}

impl EventWidth {
    /// Bytes per stored event
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Packed48 => 6,
            Self::Padded64 => 8,
        }
    }
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
fn bits(word: u64, lo: u32, width: u32) -> u32 {
    ((word >> lo) & ((1u64 << width) - 1)) as u32
}

/// Per-buffer header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferHeader {
    /// Buffer length in 16-bit words, header included
    pub buffer_length: u16,
    /// Buffer format version
    pub version: u16,
    /// Header length in 16-bit words
    pub header_length: u16,
    /// Running buffer number
    pub buffer_number: u16,
    /// Run identifier
    pub run_id: u16,
    /// Controller that produced the buffer
    pub mcpd_id: u8,
    /// Controller status bits
    pub device_status: u8,
    /// Buffer start time in 100 ns ticks (48 bits)
    pub timestamp: u64,
}

impl BufferHeader {
    /// Append the wire form (with zeroed parameters) to `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        for word in [
            self.buffer_length,
            self.version,
            self.header_length,
            self.buffer_number,
            self.run_id,
        ] {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out.push(self.mcpd_id);
        out.push(self.device_status);
        out.extend_from_slice(&(self.timestamp & EVENT_BITS).to_be_bytes()[2..]);
        out.extend_from_slice(&[0u8; 24]);
    }
}

/// A decoded 48-bit event word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DnsEvent {
    /// Detected neutron
    Neutron {
        /// Module id (3 bits)
        mod_id: u8,
        /// Slot id (5 bits, valid below 8)
        slot_id: u8,
        /// Pulse amplitude (10 bits)
        amplitude: u16,
        /// Position along the tube (10 bits)
        position: u16,
        /// Ticks since buffer start (19 bits)
        timestamp: u32,
    },
    /// Trigger or counter event
    Trigger {
        /// Trigger source (3 bits)
        trigger_id: u8,
        /// Data channel (4 bits)
        data_id: u8,
        /// Counter or ADC value (21 bits)
        data: u32,
        /// Ticks since buffer start (19 bits)
        timestamp: u32,
    },
}

impl DnsEvent {
    /// Classify a word by bit 47
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn decode(word: u64) -> Self {
        if (word >> 47) & 1 == 0 {
            Self::Neutron {
                mod_id: bits(word, 44, 3) as u8,
                slot_id: bits(word, 39, 5) as u8,
                amplitude: bits(word, 29, 10) as u16,
                position: bits(word, 19, 10) as u16,
                timestamp: bits(word, 0, 19),
            }
        } else {
            Self::Trigger {
                trigger_id: bits(word, 44, 3) as u8,
                data_id: bits(word, 40, 4) as u8,
                data: bits(word, 19, 21),
                timestamp: bits(word, 0, 19),
            }
        }
    }

    /// Pack into the low 48 bits (fields are masked to their widths)
    #[must_use]
    pub fn to_word(&self) -> u64 {
        let put = |value: u64, lo: u32, width: u32| (value & ((1u64 << width) - 1)) << lo;
        match *self {
            Self::Neutron {
                mod_id,
                slot_id,
                amplitude,
                position,
                timestamp,
            } => {
                put(mod_id.into(), 44, 3)
                    | put(slot_id.into(), 39, 5)
                    | put(amplitude.into(), 29, 10)
                    | put(position.into(), 19, 10)
                    | put(timestamp.into(), 0, 19)
            }
            Self::Trigger {
                trigger_id,
                data_id,
                data,
                timestamp,
            } => {
                (1 << 47)
                    | put(trigger_id.into(), 44, 3)
                    | put(data_id.into(), 40, 4)
                    | put(data.into(), 19, 21)
                    | put(timestamp.into(), 0, 19)
            }
        }
    }

    /// Ticks since buffer start
    #[must_use]
    pub const fn timestamp(&self) -> u32 {
        match *self {
            Self::Neutron { timestamp, .. } | Self::Trigger { timestamp, .. } => timestamp,
        }
    }

    /// Pixel index of a neutron; `None` for triggers and invalid slots
    #[must_use]
    pub fn pixel(&self) -> Option<usize> {
        match *self {
            Self::Neutron {
                mod_id,
                slot_id,
                position,
                ..
            } if slot_id < SLOTS_PER_MODULE => {
                let tube = (usize::from(mod_id) << 3) | usize::from(slot_id);
                Some(tube * PIXELS_PER_TUBE + usize::from(position))
            }
            _ => None,
        }
    }
}

/// One parsed data buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsBuffer {
    /// Buffer header
    pub header: BufferHeader,
    /// Events in stored order
    pub events: Vec<DnsEvent>,
    /// Whether fewer bytes were present than the header declared
    pub truncated: bool,
}

/// Decode options
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DnsConfig {
    /// Trigger data channel wired to the chopper
    pub chopper_channel: u8,
    /// Keep neutrons seen before the first chopper trigger, timed from zero
    pub keep_pre_chopper: bool,
    /// Stored event width
    pub event_width: EventWidth,
    /// Default histogram bin width in microseconds
    pub bin_width: f64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            chopper_channel: 2,
            keep_pre_chopper: false,
            event_width: EventWidth::Padded64,
            bin_width: 1.0,
        }
    }
}

impl DnsConfig {
    /// Check the options before any data is read
    pub fn validate(&self) -> Result<()> {
        if self.chopper_channel >= 16 {
            return Err(Error::config(format!(
                "chopper channel must be below 16, got {}",
                self.chopper_channel
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

/// Counters gathered while sequencing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DnsStats {
    /// Buffers parsed
    pub buffers: u64,
    /// Buffers shorter than declared
    pub truncated_buffers: u64,
    /// Neutron words read
    pub neutron_events: u64,
    /// Trigger words read, chopper included
    pub trigger_events: u64,
    /// Chopper triggers
    pub chopper_triggers: u64,
    /// Neutrons dropped for arriving before the first chopper trigger
    pub pre_chopper_discarded: u64,
    /// Neutrons with an invalid slot id
    pub invalid_neutrons: u64,
    /// Neutrons timestamped before the chopper trigger they follow
    pub out_of_order: u64,
}

/// Result of decoding one `.mdat` file
#[derive(Debug, Clone)]
pub struct DnsRun {
    /// Text header, lossily decoded
    pub header: String,
    /// Events per pixel, in file order
    pub pixels: Vec<Vec<TofEvent>>,
    /// Frames seen (chopper periods)
    pub frames: u64,
    /// Event count of each frame
    pub events_per_frame: Vec<u64>,
    /// Sequencing counters
    pub stats: DnsStats,
    /// Whether decoding stopped early on request
    pub cancelled: bool,
    bin_width: f64,
}

impl DnsRun {
    /// Events over all pixels
    #[must_use]
    pub fn total_events(&self) -> usize {
        self.pixels.iter().map(Vec::len).sum()
    }

    /// Histogram every pixel from zero to the largest TOF
    #[must_use]
    pub fn histograms(&self) -> Vec<Histogram> {
        let max = self
            .pixels
            .iter()
            .flatten()
            .map(|e| e.tof)
            .fold(self.bin_width, f64::max);
        let binning = Binning::new(0.0, max, self.bin_width);
        bin_channels(&self.pixels, &binning, |event| event.tof)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Split a whole file into its text header and raw buffers
pub fn split_buffers(data: &Bytes) -> Result<(Bytes, Vec<Bytes>)> {
    let header_end = find(data, &HEADER_SEPARATOR)
        .ok_or_else(|| Error::format("header separator not found"))?;
    let header = data.slice(..header_end);
    let mut body = data.slice(header_end + HEADER_SEPARATOR.len()..);

    if body.ends_with(&CLOSING_SIGNATURE) {
        body.truncate(body.len() - CLOSING_SIGNATURE.len());
    } else {
        debug!("closing signature missing");
    }

    let mut buffers = Vec::new();
    while !body.is_empty() {
        let end = find(&body, &BUFFER_SEPARATOR).unwrap_or(body.len());
        if end > 0 {
            buffers.push(body.slice(..end));
        }
        let next = (end + BUFFER_SEPARATOR.len()).min(body.len());
        body = body.slice(next..);
    }
    Ok((header, buffers))
}

/// Parse one raw buffer. A buffer shorter than its declared length yields
/// the whole events that are present.
pub fn parse_buffer(raw: Bytes, width: EventWidth) -> Result<DnsBuffer> {
    let mut cursor = ByteCursor::from_bytes(raw);
    let header = BufferHeader {
        buffer_length: cursor.read(2)?,
        version: cursor.read(2)?,
        header_length: cursor.read(2)?,
        buffer_number: cursor.read(2)?,
        run_id: cursor.read(2)?,
        mcpd_id: cursor.read(1)?,
        device_status: cursor.read(1)?,
        timestamp: cursor.read(6)?,
    };
    cursor.skip::<24>()?;

    let header_bytes = (usize::from(header.header_length) * 2).max(BUFFER_HEADER_SIZE);
    let extra = (header_bytes - BUFFER_HEADER_SIZE) as u64;
    cursor.skip_bytes(extra.min(cursor.remaining()))?;

    let declared = (usize::from(header.buffer_length) * 2).saturating_sub(header_bytes) as u64;
    let available = cursor.remaining();
    let truncated = declared > available;
    if truncated {
        warn!(
            buffer = header.buffer_number,
            declared, available, "buffer truncated; decoding the events present"
        );
    }

    let count = declared.min(available) / width.bytes() as u64;
    let mut events = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
    for _ in 0..count {
        let word: u64 = cursor.read(width.bytes())?;
        events.push(DnsEvent::decode(word & EVENT_BITS));
    }
    Ok(DnsBuffer {
        header,
        events,
        truncated,
    })
}

fn parse_all(buffers: Vec<Bytes>, width: EventWidth) -> Vec<Result<DnsBuffer>> {
    #[cfg(feature = "rayon")]
    {
        buffers
            .into_par_iter()
            .map(|raw| parse_buffer(raw, width))
            .collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        buffers
            .into_iter()
            .map(|raw| parse_buffer(raw, width))
            .collect()
    }
}

struct Sequencer {
    chopper_channel: u8,
    keep_pre_chopper: bool,
    events: EventAccumulator<TofEvent>,
    last_chopper: Option<u64>,
    stats: DnsStats,
    cancelled: bool,
}

impl Sequencer {
    /// Only the chopper channel marks frames
    fn trigger_kind(&self, data_id: u8) -> EventKind {
        if data_id == self.chopper_channel {
            EventKind::FrameMarker
        } else {
            EventKind::Trigger
        }
    }

    fn feed<C: DecodeControl>(&mut self, buffer: &DnsBuffer, control: &mut C) {
        self.stats.buffers += 1;
        if buffer.truncated {
            self.stats.truncated_buffers += 1;
        }
        let start = buffer.header.timestamp;
        for event in &buffer.events {
            let absolute = start + u64::from(event.timestamp());
            match *event {
                DnsEvent::Trigger { data_id, .. } => {
                    self.stats.trigger_events += 1;
                    Metrics::record_event(self.trigger_kind(data_id));
                    if data_id != self.chopper_channel {
                        continue;
                    }
                    self.stats.chopper_triggers += 1;
                    if self.last_chopper.is_some() || self.events.frame_event_count() > 0 {
                        self.events.close_frame();
                    }
                    self.last_chopper = Some(absolute);
                    if control.is_cancelled() {
                        debug!(buffer = buffer.header.buffer_number, "decode cancelled");
                        self.cancelled = true;
                        return;
                    }
                }
                DnsEvent::Neutron { .. } => {
                    self.stats.neutron_events += 1;
                    Metrics::record_event(EventKind::Neutron);
                    let Some(pixel) = event.pixel() else {
                        self.stats.invalid_neutrons += 1;
                        continue;
                    };
                    let reference = match self.last_chopper {
                        Some(chopper) => chopper,
                        None if self.keep_pre_chopper => 0,
                        None => {
                            self.stats.pre_chopper_discarded += 1;
                            continue;
                        }
                    };
                    let Some(ticks) = absolute.checked_sub(reference) else {
                        self.stats.out_of_order += 1;
                        continue;
                    };
                    #[allow(clippy::cast_precision_loss)]
                    let tof = ticks as f64 * TICK_MICROSECONDS;
                    self.events.push(
                        pixel,
                        TofEvent {
                            tof,
                            pulse: self.stats.chopper_triggers,
                        },
                    );
                }
            }
        }
    }
}

/// Decode an in-memory file image
pub fn decode_bytes<C: DecodeControl>(
    data: &Bytes,
    config: &DnsConfig,
    mut control: C,
) -> Result<DnsRun> {
    config.validate()?;
    let total = data.len() as u64;
    let (header, raw) = split_buffers(data)?;
    debug!(buffers = raw.len(), "split data buffers");

    let mut sequencer = Sequencer {
        chopper_channel: config.chopper_channel,
        keep_pre_chopper: config.keep_pre_chopper,
        events: EventAccumulator::new(NUM_PIXELS, FrameAcceptance::ALL),
        last_chopper: None,
        stats: DnsStats::default(),
        cancelled: false,
    };

    let mut consumed = header.len() as u64;
    for parsed in parse_all(raw, config.event_width) {
        let buffer = match parsed {
            Ok(buffer) => buffer,
            Err(err) => {
                warn!(error = %err, "skipping unreadable buffer");
                continue;
            }
        };
        sequencer.feed(&buffer, &mut control);
        consumed += u64::from(buffer.header.buffer_length) * 2;
        control.progress(consumed.min(total), total);
        if sequencer.cancelled {
            break;
        }
    }

    let mut events = sequencer.events;
    if sequencer.cancelled {
        events.discard_frame();
    } else if events.frame_event_count() > 0 {
        events.close_frame();
    }
    let frames = events.raw_frames();
    let events_per_frame = events.events_per_frame().to_vec();
    Ok(DnsRun {
        header: String::from_utf8_lossy(&header).into_owned(),
        pixels: events.into_channels(),
        frames,
        events_per_frame,
        stats: sequencer.stats,
        cancelled: sequencer.cancelled,
        bin_width: config.bin_width,
    })
}

/// Decode a file from disk
#[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
pub fn decode_file<C: DecodeControl>(
    path: impl AsRef<Path>,
    config: &DnsConfig,
    control: C,
) -> Result<DnsRun> {
    let data = Bytes::from(std::fs::read(path.as_ref())?);
    decode_bytes(&data, config, control)
}

/// Confidence that `path` is a DNS list-mode file (0 = no). Never fails.
#[must_use]
pub fn probe(path: impl AsRef<Path>) -> u8 {
    let path = path.as_ref();
    if !has_extension(path, "mdat") {
        return 0;
    }
    let mut start = vec![0u8; FILE_SIGNATURE.len()];
    match File::open(path).and_then(|mut f| f.read_exact(&mut start)) {
        Ok(()) if start == FILE_SIGNATURE => 80,
        _ => 0,
    }
}
