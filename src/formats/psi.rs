//! PSI muon `.bin` histogram files
//!
//! Little-endian throughout. A 1024-byte header at fixed offsets is
//! followed by the histogram blocks; histogram `h`, bin `b` lives at
//! `1024 + h * records_file * record_length + b * 4`.

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, Write};
use std::ops::RangeInclusive;
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, instrument};

use super::has_extension;
use super::histogram::{Histogram, SpectrumRange};
use crate::error::{Error, Result};
use crate::stream::{
    BinaryRecord, BinaryStreamReader, BinaryStreamWriter, ByteCursor, ByteOrder, ByteSource,
    FieldKind, FieldSpec, decode_record,
};

/// Magic at offset 0
pub const FORMAT_ID: &str = "1N";

/// Offset of the first histogram block
pub const DATA_OFFSET: u64 = 1024;

/// Largest number of histograms the header can describe
pub const MAX_HISTOGRAMS: usize = 16;

/// Bin width in µs at TDC resolution 0, used when the stored width is zero
pub const BASE_BIN_WIDTH: f64 = 625e-6 / 8.0;

const TEMPERATURES: usize = 4;

const fn i32s(count: usize) -> FieldKind {
    FieldKind::I32Array { count, stride: 4 }
}

const fn f32s(count: usize) -> FieldKind {
    FieldKind::F32Array { count, stride: 4 }
}

/// Header layout, one entry per field
pub const LAYOUT: &[FieldSpec] = &[
    FieldSpec::new("format_id", 0, FieldKind::Text(2)),
    FieldSpec::new("tdc_resolution", 2, FieldKind::I16),
    FieldSpec::new("tdc_overflow", 4, FieldKind::I16),
    FieldSpec::new("run_number", 6, FieldKind::I16),
    FieldSpec::new("length_of_histograms", 28, FieldKind::I16),
    FieldSpec::new("number_of_histograms", 30, FieldKind::I16),
    FieldSpec::new("total_events", 128, FieldKind::I32),
    FieldSpec::new("sample", 138, FieldKind::Text(10)),
    FieldSpec::new("temperature_label", 148, FieldKind::Text(10)),
    FieldSpec::new("field", 158, FieldKind::Text(10)),
    FieldSpec::new("orientation", 168, FieldKind::Text(10)),
    FieldSpec::new("start_date", 218, FieldKind::Text(9)),
    FieldSpec::new("end_date", 227, FieldKind::Text(9)),
    FieldSpec::new("start_time", 236, FieldKind::Text(8)),
    FieldSpec::new("end_time", 244, FieldKind::Text(8)),
    FieldSpec::new("records_file", 296, FieldKind::I16),
    FieldSpec::new("record_length", 298, FieldKind::I16),
    FieldSpec::new("records_histogram", 300, FieldKind::I16),
    FieldSpec::new("integer_t0", 424, i32s(MAX_HISTOGRAMS)),
    FieldSpec::new("first_good", 488, i32s(MAX_HISTOGRAMS)),
    FieldSpec::new("last_good", 552, i32s(MAX_HISTOGRAMS)),
    FieldSpec::new("temperatures", 716, f32s(TEMPERATURES)),
    FieldSpec::new("temperature_deviations", 738, f32s(TEMPERATURES)),
    FieldSpec::new("real_t0", 792, f32s(MAX_HISTOGRAMS)),
    FieldSpec::new("comment", 860, FieldKind::Text(62)),
    FieldSpec::new(
        "labels",
        948,
        FieldKind::TextArray {
            count: MAX_HISTOGRAMS,
            len: 4,
            stride: 4,
        },
    ),
    FieldSpec::new("bin_width", 1012, FieldKind::F32),
];

/// Typed view of the header. Text fields keep their padding.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub struct PsiBinHeader {
    pub format_id: String,
    pub tdc_resolution: i16,
    pub tdc_overflow: i16,
    pub run_number: i16,
    /// Bins per histogram
    pub length_of_histograms: i16,
    pub number_of_histograms: i16,
    pub total_events: i32,
    pub sample: String,
    pub temperature_label: String,
    pub field: String,
    pub orientation: String,
    /// `DD-MMM-YY`
    pub start_date: String,
    pub end_date: String,
    /// `HH:MM:SS`
    pub start_time: String,
    pub end_time: String,
    pub records_file: i16,
    /// Bytes per data record
    pub record_length: i16,
    pub records_histogram: i16,
    pub integer_t0: Vec<i32>,
    pub first_good: Vec<i32>,
    pub last_good: Vec<i32>,
    pub temperatures: Vec<f32>,
    pub temperature_deviations: Vec<f32>,
    pub real_t0: Vec<f32>,
    pub comment: String,
    pub labels: Vec<String>,
    /// Stored bin width; zero means "derive from the TDC resolution"
    pub stored_bin_width: f32,
}

impl PsiBinHeader {
    /// Build from a decoded record
    pub fn from_record(record: &BinaryRecord) -> Result<Self> {
        Ok(Self {
            format_id: record.text("format_id")?.to_owned(),
            tdc_resolution: record.i16("tdc_resolution")?,
            tdc_overflow: record.i16("tdc_overflow")?,
            run_number: record.i16("run_number")?,
            length_of_histograms: record.i16("length_of_histograms")?,
            number_of_histograms: record.i16("number_of_histograms")?,
            total_events: record.i32("total_events")?,
            sample: record.text("sample")?.to_owned(),
            temperature_label: record.text("temperature_label")?.to_owned(),
            field: record.text("field")?.to_owned(),
            orientation: record.text("orientation")?.to_owned(),
            start_date: record.text("start_date")?.to_owned(),
            end_date: record.text("end_date")?.to_owned(),
            start_time: record.text("start_time")?.to_owned(),
            end_time: record.text("end_time")?.to_owned(),
            records_file: record.i16("records_file")?,
            record_length: record.i16("record_length")?,
            records_histogram: record.i16("records_histogram")?,
            integer_t0: record.i32_array("integer_t0")?.to_vec(),
            first_good: record.i32_array("first_good")?.to_vec(),
            last_good: record.i32_array("last_good")?.to_vec(),
            temperatures: record.f32_array("temperatures")?.to_vec(),
            temperature_deviations: record.f32_array("temperature_deviations")?.to_vec(),
            real_t0: record.f32_array("real_t0")?.to_vec(),
            comment: record.text("comment")?.to_owned(),
            labels: record.text_array("labels")?.to_vec(),
            stored_bin_width: record.f32("bin_width")?,
        })
    }

    /// Reject headers whose counts cannot address the data area
    pub fn validate(&self) -> Result<()> {
        if self.format_id != FORMAT_ID {
            return Err(Error::format(format!(
                "expected format id {FORMAT_ID:?}, found {:?}",
                self.format_id
            )));
        }
        let histograms = usize::try_from(self.number_of_histograms).unwrap_or(usize::MAX);
        if histograms > MAX_HISTOGRAMS {
            return Err(Error::format(format!(
                "header declares {} histograms, at most {MAX_HISTOGRAMS} supported",
                self.number_of_histograms
            )));
        }
        if self.length_of_histograms < 0 || self.records_file < 0 || self.record_length < 0 {
            return Err(Error::format("negative histogram geometry in header"));
        }
        Ok(())
    }

    /// Histograms in the file
    #[must_use]
    pub fn histogram_count(&self) -> usize {
        usize::try_from(self.number_of_histograms).unwrap_or(0)
    }

    /// Bins per histogram
    #[must_use]
    pub fn bins(&self) -> usize {
        usize::try_from(self.length_of_histograms).unwrap_or(0)
    }

    /// Bytes between the starts of consecutive histograms
    #[must_use]
    pub fn histogram_stride(&self) -> u64 {
        let records = u64::try_from(self.records_file).unwrap_or(0);
        let length = u64::try_from(self.record_length).unwrap_or(0);
        records * length
    }

    /// Absolute offset of histogram `index`
    #[must_use]
    pub fn histogram_offset(&self, index: usize) -> u64 {
        DATA_OFFSET + index as u64 * self.histogram_stride()
    }

    /// Bin width in µs, derived from the TDC resolution when stored as zero
    #[must_use]
    pub fn bin_width(&self) -> f64 {
        if self.stored_bin_width == 0.0 {
            BASE_BIN_WIDTH * 2f64.powi(i32::from(self.tdc_resolution))
        } else {
            f64::from(self.stored_bin_width)
        }
    }

    /// Time zero of a histogram in µs; the fitted value when present,
    /// otherwise the integer bin scaled by the bin width
    #[must_use]
    pub fn time_zero(&self, index: usize) -> Option<f64> {
        let real = *self.real_t0.get(index)?;
        if real > 0.0 {
            return Some(f64::from(real));
        }
        self.integer_t0
            .get(index)
            .map(|&bin| f64::from(bin) * self.bin_width())
    }

    /// First good bin of a histogram
    #[must_use]
    pub fn first_good_bin(&self, index: usize) -> Option<i32> {
        self.first_good.get(index).copied()
    }

    /// Last good bin of a histogram
    #[must_use]
    pub fn last_good_bin(&self, index: usize) -> Option<i32> {
        self.last_good.get(index).copied()
    }

    /// Run start as `YYYY-MM-DDTHH:MM:SS`
    #[must_use]
    pub fn run_start(&self) -> Option<String> {
        iso_timestamp(&self.start_date, &self.start_time)
    }

    /// Run end as `YYYY-MM-DDTHH:MM:SS`
    #[must_use]
    pub fn run_end(&self) -> Option<String> {
        iso_timestamp(&self.end_date, &self.end_time)
    }

    /// Write every header field at its offset
    pub fn write_to<W: Write + Seek>(&self, writer: &mut BinaryStreamWriter<W>) -> Result<()> {
        at(writer, 0)?.write_fixed_string(&self.format_id, 2)?;
        at(writer, 2)?.write(self.tdc_resolution)?;
        at(writer, 4)?.write(self.tdc_overflow)?;
        at(writer, 6)?.write(self.run_number)?;
        at(writer, 28)?.write(self.length_of_histograms)?;
        at(writer, 30)?.write(self.number_of_histograms)?;
        at(writer, 128)?.write(self.total_events)?;
        at(writer, 138)?.write_fixed_string(&self.sample, 10)?;
        at(writer, 148)?.write_fixed_string(&self.temperature_label, 10)?;
        at(writer, 158)?.write_fixed_string(&self.field, 10)?;
        at(writer, 168)?.write_fixed_string(&self.orientation, 10)?;
        at(writer, 218)?.write_fixed_string(&self.start_date, 9)?;
        at(writer, 227)?.write_fixed_string(&self.end_date, 9)?;
        at(writer, 236)?.write_fixed_string(&self.start_time, 8)?;
        at(writer, 244)?.write_fixed_string(&self.end_time, 8)?;
        at(writer, 296)?.write(self.records_file)?;
        at(writer, 298)?.write(self.record_length)?;
        at(writer, 300)?.write(self.records_histogram)?;
        at(writer, 424)?.write_slice(&self.integer_t0, self.integer_t0.len().min(MAX_HISTOGRAMS))?;
        at(writer, 488)?.write_slice(&self.first_good, self.first_good.len().min(MAX_HISTOGRAMS))?;
        at(writer, 552)?.write_slice(&self.last_good, self.last_good.len().min(MAX_HISTOGRAMS))?;
        at(writer, 716)?.write_slice(&self.temperatures, self.temperatures.len().min(TEMPERATURES))?;
        at(writer, 738)?.write_slice(
            &self.temperature_deviations,
            self.temperature_deviations.len().min(TEMPERATURES),
        )?;
        at(writer, 792)?.write_slice(&self.real_t0, self.real_t0.len().min(MAX_HISTOGRAMS))?;
        at(writer, 860)?.write_fixed_string(&self.comment, 62)?;
        for (index, label) in self.labels.iter().take(MAX_HISTOGRAMS).enumerate() {
            at(writer, 948 + 4 * index as u64)?.write_fixed_string(label, 4)?;
        }
        at(writer, 1012)?.write(self.stored_bin_width)?;
        Ok(())
    }
}

fn at<W: Write + Seek>(
    writer: &mut BinaryStreamWriter<W>,
    offset: u64,
) -> Result<&mut BinaryStreamWriter<W>> {
    writer.move_stream_to_position(offset)?;
    Ok(writer)
}

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

fn iso_timestamp(date: &str, time: &str) -> Option<String> {
    let mut parts = date.trim().split('-');
    let day: u32 = parts.next()?.trim().parse().ok()?;
    let month = parts.next()?.trim().to_ascii_uppercase();
    let year_text = parts.next()?.trim();
    let month = MONTHS.iter().position(|m| *m == month)? + 1;
    let year: u32 = year_text.parse().ok()?;
    let year = match year_text.len() {
        2 if year < 70 => 2000 + year,
        2 => 1900 + year,
        _ => year,
    };
    let time = time.trim();
    let mut clock = time.split(':').map(|t| t.parse::<u32>().ok());
    let (hour, minute, second) = (clock.next()??, clock.next()??, clock.next()??);
    Some(format!(
        "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}"
    ))
}

/// Decoded file
#[derive(Debug, Clone)]
pub struct PsiRun {
    /// File header
    pub header: PsiBinHeader,
    /// Histogram indices read
    pub spectra: RangeInclusive<usize>,
    /// One histogram per selected index
    pub histograms: Vec<Histogram>,
}

/// Check the magic then decode the header
pub fn read_header<S: ByteSource>(cursor: &mut ByteCursor<S>) -> Result<PsiBinHeader> {
    cursor.seek(0)?;
    let magic = cursor.read_bytes(FORMAT_ID.len()).map_err(|_| {
        Error::format("file too short for a PSI header")
    })?;
    if magic != FORMAT_ID.as_bytes() {
        return Err(Error::format(format!(
            "expected format id {FORMAT_ID:?}, found {:?}",
            String::from_utf8_lossy(&magic)
        )));
    }
    let record = decode_record(cursor, LAYOUT, ByteOrder::Little)?;
    let header = PsiBinHeader::from_record(&record)?;
    header.validate()?;
    debug!(
        run = header.run_number,
        histograms = header.number_of_histograms,
        bins = header.length_of_histograms,
        "decoded PSI header"
    );
    Ok(header)
}

/// Read the selected histograms' counts
pub fn read_histograms<R: Read + Seek>(
    reader: &mut BinaryStreamReader<R>,
    header: &PsiBinHeader,
    spectra: &RangeInclusive<usize>,
) -> Result<Vec<Histogram>> {
    let bins = header.bins();
    let width = header.bin_width();
    let mut counts = Vec::with_capacity(bins);
    spectra
        .clone()
        .map(|index| {
            reader.move_stream_to_position(header.histogram_offset(index))?;
            reader.read_into::<i32>(&mut counts, bins)?;
            let values = counts.iter().map(|&c| f64::from(c)).collect();
            Ok(Histogram::uniform(values, width))
        })
        .collect()
}

fn decode<S: ByteSource, R: Read + Seek>(
    mut cursor: ByteCursor<S>,
    data: R,
    range: SpectrumRange,
) -> Result<PsiRun> {
    let header = read_header(&mut cursor)?;
    let count = header.histogram_count();
    let spectra = if count == 0 {
        #[allow(clippy::reversed_empty_ranges)]
        let none = 1..=0;
        none
    } else {
        range.resolve(0..=count - 1)?
    };
    let mut reader = BinaryStreamReader::new(data)?.with_byte_order(ByteOrder::Little);
    let histograms = read_histograms(&mut reader, &header, &spectra)?;
    Ok(PsiRun {
        header,
        spectra,
        histograms,
    })
}

/// Decode an in-memory image
pub fn decode_bytes(data: Bytes, range: SpectrumRange) -> Result<PsiRun> {
    decode(ByteCursor::from_bytes(data.clone()), Cursor::new(data), range)
}

/// Decode a file from disk
#[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
pub fn decode_file(path: impl AsRef<Path>, range: SpectrumRange) -> Result<PsiRun> {
    let path = path.as_ref();
    let cursor = ByteCursor::open(path)?;
    let data = BufReader::new(File::open(path)?);
    decode(cursor, data, range)
}

/// Serialise a header and histogram counts into a file image
pub fn encode(header: &PsiBinHeader, histograms: &[Vec<i32>]) -> Result<Vec<u8>> {
    let mut writer = BinaryStreamWriter::new(Cursor::new(Vec::new()))?;
    header.write_to(&mut writer)?;
    writer.move_stream_to_position(DATA_OFFSET)?;
    for (index, counts) in histograms.iter().enumerate() {
        writer.move_stream_to_position(header.histogram_offset(index))?;
        writer.write_slice(counts, counts.len())?;
    }
    Ok(writer.into_inner()?.into_inner())
}

/// Confidence that `path` is a PSI `.bin` file (0 = no). Never fails.
#[must_use]
pub fn probe(path: impl AsRef<Path>) -> u8 {
    let path = path.as_ref();
    let mut magic = [0u8; 2];
    match File::open(path).and_then(|mut f| f.read_exact(&mut magic)) {
        Ok(()) if &magic == FORMAT_ID.as_bytes() => {
            if has_extension(path, "bin") {
                90
            } else {
                40
            }
        }
        _ => 0,
    }
}
