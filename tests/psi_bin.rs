use std::io::Write;

use bytes::Bytes;
use daqstream::Error;
use daqstream::formats::SpectrumRange;
use daqstream::formats::psi::{self, MAX_HISTOGRAMS, PsiBinHeader};
use daqstream::stream::{ByteCursor, ByteOrder, FieldKind, FieldSpec, read_field};

fn header(tdc_resolution: i16, stored_bin_width: f32) -> PsiBinHeader {
    PsiBinHeader {
        format_id: "1N".to_owned(),
        tdc_resolution,
        tdc_overflow: 0,
        run_number: 42,
        length_of_histograms: 4,
        number_of_histograms: 3,
        total_events: 60,
        sample: "MnSi".to_owned(),
        temperature_label: "T".to_owned(),
        field: "100G".to_owned(),
        orientation: "ZF".to_owned(),
        start_date: "01-JAN-20".to_owned(),
        end_date: "01-JAN-20".to_owned(),
        start_time: "09:00:00".to_owned(),
        end_time: "10:30:15".to_owned(),
        records_file: 1,
        record_length: 16,
        records_histogram: 1,
        integer_t0: (0..MAX_HISTOGRAMS as i32).collect(),
        first_good: vec![1; MAX_HISTOGRAMS],
        last_good: vec![3; MAX_HISTOGRAMS],
        temperatures: vec![1.5, 0.0, 0.0, 0.0],
        temperature_deviations: vec![0.01, 0.0, 0.0, 0.0],
        real_t0: vec![0.0; MAX_HISTOGRAMS],
        comment: "calibration".to_owned(),
        labels: vec!["FWD".to_owned(), "BWD".to_owned(), "LEFT".to_owned()],
        stored_bin_width,
    }
}

fn histograms() -> Vec<Vec<i32>> {
    vec![vec![1, 2, 3, 4], vec![10, 20, 30, 40], vec![0, 0, 9, 0]]
}

#[test]
fn test_full_file_decode() {
    let image = psi::encode(&header(0, 0.25), &histograms()).unwrap();
    let mut file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
    file.write_all(&image).unwrap();
    file.flush().unwrap();

    assert_eq!(psi::probe(file.path()), 90);
    let run = psi::decode_file(file.path(), SpectrumRange::ALL).unwrap();

    assert_eq!(run.header.run_number, 42);
    assert_eq!(run.header.total_events, 60);
    assert_eq!(run.header.comment.trim_end(), "calibration");
    assert_eq!(run.header.labels[2], "LEFT");
    assert_eq!(run.header.temperatures[0], 1.5);
    assert_eq!(run.header.first_good_bin(2), Some(1));
    assert_eq!(run.header.run_end().as_deref(), Some("2020-01-01T10:30:15"));

    assert_eq!(run.histograms.len(), 3);
    let second = &run.histograms[1];
    assert_eq!(second.counts, vec![10.0, 20.0, 30.0, 40.0]);
    assert_eq!(second.edges, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    assert!((second.errors[3] - 40f64.sqrt()).abs() < 1e-12);
}

#[test]
fn test_zero_bin_width_uses_tdc_resolution() {
    let image = psi::encode(&header(3, 0.0), &histograms()).unwrap();
    let run = psi::decode_bytes(Bytes::from(image), SpectrumRange::ALL).unwrap();
    let expected = (625e-6 / 8.0) * 2f64.powi(3);
    assert!((run.header.bin_width() - expected).abs() < 1e-18);
    assert!((run.histograms[0].edges[1] - expected).abs() < 1e-18);
}

#[test]
fn test_fields_decode_in_any_order() {
    let image = Bytes::from(psi::encode(&header(0, 0.25), &histograms()).unwrap());
    let mut cursor = ByteCursor::from_bytes(image);
    let late = read_field(
        &mut cursor,
        &FieldSpec::new("bin_width", 1012, FieldKind::F32),
        ByteOrder::Little,
    )
    .unwrap();
    let early = read_field(
        &mut cursor,
        &FieldSpec::new("run", 6, FieldKind::I16),
        ByteOrder::Little,
    )
    .unwrap();
    assert_eq!(late, daqstream::stream::FieldValue::F32(0.25));
    assert_eq!(early, daqstream::stream::FieldValue::I16(42));
}

#[test]
fn test_magic_rejected_before_decode() {
    let mut image = psi::encode(&header(0, 0.25), &histograms()).unwrap();
    image[1] = b'X';
    let err = psi::decode_bytes(Bytes::from(image), SpectrumRange::ALL).unwrap_err();
    assert!(matches!(err, Error::FormatMismatch(_)));
}

#[test]
fn test_truncated_histogram_block() {
    let mut image = psi::encode(&header(0, 0.25), &histograms()).unwrap();
    image.truncate(image.len() - 2);
    assert!(matches!(
        psi::decode_bytes(Bytes::from(image), SpectrumRange::ALL),
        Err(Error::TruncatedInput { .. })
    ));
}

#[test]
fn test_spectrum_range_validated() {
    let image = Bytes::from(psi::encode(&header(0, 0.25), &histograms()).unwrap());
    assert!(matches!(
        psi::decode_bytes(image.clone(), SpectrumRange::new(1, 5)),
        Err(Error::Configuration(_))
    ));
    let run = psi::decode_bytes(image, SpectrumRange::new(2, 2)).unwrap();
    assert_eq!(run.histograms[0].counts, vec![0.0, 0.0, 9.0, 0.0]);
}

#[test]
fn test_probe_without_magic() {
    let mut file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
    file.write_all(b"XY not a muon file").unwrap();
    assert_eq!(psi::probe(file.path()), 0);
}
