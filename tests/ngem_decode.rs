use std::io::Write;

use daqstream::formats::ngem::{
    CoincidenceEvent, FrameMarker, NgemConfig, NgemDecoder, NgemEvent, WORD_SIZE, decode_files,
    probe,
};
use daqstream::formats::{DecodeControl, FrameAcceptance, Unmonitored};
use daqstream::stream::ByteCursor;
use tempfile::NamedTempFile;

fn hit(x: u8, y: u8, tof_ns: u32) -> [u8; WORD_SIZE] {
    CoincidenceEvent {
        t0_id: 1,
        first_x: x,
        last_x: x,
        first_y: y,
        last_y: y,
        time_of_flight: tof_ns,
        ..CoincidenceEvent::default()
    }
    .to_be_bytes()
}

fn t0(id: u32) -> [u8; WORD_SIZE] {
    FrameMarker {
        t0_id: id,
        ..FrameMarker::default()
    }
    .to_be_bytes()
}

/// Frames given as event counts; every frame but the last gets a T0.
fn frames(counts: &[usize], terminate_last: bool) -> Vec<u8> {
    let mut out = Vec::new();
    for (index, &count) in counts.iter().enumerate() {
        for n in 0..count {
            out.extend_from_slice(&hit(n as u8, index as u8, 1000 * (n as u32 + 1)));
        }
        if terminate_last || index + 1 < counts.len() {
            out.extend_from_slice(&t0(index as u32));
        }
    }
    out
}

fn decode(data: Vec<u8>, config: NgemConfig) -> daqstream::formats::ngem::NgemRun {
    let mut decoder = NgemDecoder::new(config).unwrap();
    decoder
        .decode_source(&mut ByteCursor::from_bytes(data), &mut Unmonitored)
        .unwrap();
    decoder.finish()
}

fn temp_file(data: &[u8]) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".edb").tempfile().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_known_word_decodes_endian_independently() {
    let raw = [
        0x4F, 0xF0, 0x01, 0xE2, 0x40, 0x0A, 0x1C, 0x10, 0x40, 0, 0, 0, 0, 0, 0, 0,
    ];
    match NgemEvent::decode(&raw) {
        NgemEvent::Coincidence(event) => {
            assert_eq!(event.pixel(), 390);
            assert!((event.tof_us() - 123.456).abs() < 1e-9);
        }
        other => panic!("unexpected classification {other:?}"),
    }
}

#[test]
fn test_resync_over_three_garbage_bytes() {
    let mut data = hit(1, 1, 5000).to_vec();
    data.extend_from_slice(&[0x00, 0x00, 0x00]);
    data.extend_from_slice(&hit(2, 2, 6000));

    let run = decode(data, NgemConfig::default());
    assert_eq!(run.total_events(), 2);
    assert_eq!(run.stats.bytes_skipped, 3);
    assert_eq!(run.stats.corruption_reports, 1);
    assert_eq!(run.stats.neutron_events, 2);
}

#[test]
fn test_frame_acceptance_window() {
    let config = NgemConfig {
        acceptance: FrameAcceptance::new(2, 5).unwrap(),
        ..NgemConfig::default()
    };
    let run = decode(frames(&[1, 3, 6], false), config);

    assert_eq!(run.raw_frames, 3);
    assert_eq!(run.good_frames, 1);
    assert_eq!(run.events_per_frame, vec![3]);
    assert_eq!(run.total_events(), 3);
}

#[test]
fn test_final_unterminated_frame_accepted() {
    let config = NgemConfig {
        acceptance: FrameAcceptance::new(2, 5).unwrap(),
        ..NgemConfig::default()
    };
    let run = decode(frames(&[6, 4], false), config);
    assert_eq!(run.raw_frames, 2);
    assert_eq!(run.good_frames, 1);
    assert_eq!(run.total_events(), 4);
}

#[test]
fn test_trailing_partial_word_ends_cleanly() {
    let mut data = frames(&[2], true);
    data.extend_from_slice(&[0x4F; 7]);
    let run = decode(data, NgemConfig::default());
    assert_eq!(run.total_events(), 2);
    assert_eq!(run.stats.trailing_bytes, 7);
    assert_eq!(run.stats.bytes_skipped, 0);
}

#[test]
fn test_multi_file_continuity() {
    let first = temp_file(&frames(&[2, 3], true));
    let second = temp_file(&frames(&[1, 4], false));

    let separate: Vec<_> = [first.path(), second.path()]
        .iter()
        .map(|path| decode_files(&[path], NgemConfig::default(), Unmonitored).unwrap())
        .collect();
    let combined = decode_files(
        &[first.path(), second.path()],
        NgemConfig::default(),
        Unmonitored,
    )
    .unwrap();

    assert_eq!(
        combined.raw_frames,
        separate[0].raw_frames + separate[1].raw_frames
    );
    assert_eq!(combined.raw_frames, 4);
    assert_eq!(combined.total_events(), 10);
    assert_eq!(combined.stats.sources, 2);
    let (min, max) = combined.stats.tof_range().unwrap();
    assert!((min - 1.0).abs() < 1e-9);
    assert!((max - 4.0).abs() < 1e-9);
}

#[test]
fn test_odd_sized_file_decodes() {
    let mut data = frames(&[3], false);
    data.push(0xAB);
    let file = temp_file(&data);
    let run = decode_files(&[file.path()], NgemConfig::default(), Unmonitored).unwrap();
    assert_eq!(run.total_events(), 3);
    assert_eq!(run.stats.trailing_bytes, 1);
}

struct CancelAfter {
    frames: usize,
    seen: usize,
    progress: Vec<u64>,
}

impl DecodeControl for CancelAfter {
    fn is_cancelled(&mut self) -> bool {
        self.seen += 1;
        self.seen >= self.frames
    }

    fn progress(&mut self, consumed: u64, _total: u64) {
        self.progress.push(consumed);
    }
}

#[test]
fn test_cancellation_at_frame_boundary() {
    let mut control = CancelAfter {
        frames: 1,
        seen: 0,
        progress: Vec::new(),
    };
    let mut decoder = NgemDecoder::new(NgemConfig::default()).unwrap();
    decoder
        .decode_source(
            &mut ByteCursor::from_bytes(frames(&[2, 3, 1], false)),
            &mut control,
        )
        .unwrap();
    assert!(decoder.is_cancelled());
    let run = decoder.finish();

    assert!(run.cancelled);
    assert_eq!(run.raw_frames, 1);
    assert_eq!(run.total_events(), 2);
    assert_eq!(control.progress, vec![3 * WORD_SIZE as u64]);
}

#[test]
fn test_probe() {
    let good = temp_file(&frames(&[1], true));
    assert_eq!(probe(good.path()), 95);

    let mut other = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
    other.write_all(&frames(&[1], true)).unwrap();
    assert_eq!(probe(other.path()), 0);

    assert_eq!(probe("/nonexistent/run.edb"), 0);
}
