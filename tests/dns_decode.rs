use std::io::Write;

use bytes::Bytes;
use daqstream::formats::dns::{
    self, BUFFER_HEADER_SIZE, BUFFER_SEPARATOR, BufferHeader, CLOSING_SIGNATURE, DnsConfig,
    DnsEvent, EventWidth, HEADER_SEPARATOR,
};
use daqstream::formats::{CancelFlag, DecodeControl, Unmonitored};

fn neutron(mod_id: u8, slot_id: u8, position: u16, timestamp: u32) -> DnsEvent {
    DnsEvent::Neutron {
        mod_id,
        slot_id,
        amplitude: 512,
        position,
        timestamp,
    }
}

fn chopper(timestamp: u32) -> DnsEvent {
    DnsEvent::Trigger {
        trigger_id: 1,
        data_id: 2,
        data: 0,
        timestamp,
    }
}

fn buffer(number: u16, timestamp: u64, events: &[DnsEvent]) -> Vec<u8> {
    buffer_with_width(number, timestamp, events, EventWidth::Padded64)
}

fn buffer_with_width(
    number: u16,
    timestamp: u64,
    events: &[DnsEvent],
    width: EventWidth,
) -> Vec<u8> {
    let header = BufferHeader {
        buffer_length: u16::try_from(21 + width.bytes() / 2 * events.len()).unwrap(),
        version: 2,
        header_length: 21,
        buffer_number: number,
        run_id: 7,
        mcpd_id: 0,
        device_status: 1,
        timestamp,
    };
    let mut out = Vec::new();
    header.encode(&mut out);
    let skip = 8 - width.bytes();
    for event in events {
        out.extend_from_slice(&event.to_word().to_be_bytes()[skip..]);
    }
    out
}

fn file(buffers: &[Vec<u8>], closed: bool) -> Vec<u8> {
    let mut out = b"mesytec psd listmode data\nheader length: 2 lines\n".to_vec();
    out.extend_from_slice(&HEADER_SEPARATOR);
    for (index, raw) in buffers.iter().enumerate() {
        if index > 0 {
            out.extend_from_slice(&BUFFER_SEPARATOR);
        }
        out.extend_from_slice(raw);
    }
    if closed {
        out.extend_from_slice(&BUFFER_SEPARATOR);
        out.extend_from_slice(&CLOSING_SIGNATURE);
    }
    out
}

fn sample() -> Vec<u8> {
    file(
        &[
            buffer(0, 0, &[chopper(0), neutron(0, 1, 10, 100), neutron(2, 3, 20, 250)]),
            buffer(1, 1000, &[chopper(0), neutron(0, 1, 10, 40)]),
            buffer(2, 2000, &[chopper(0), neutron(7, 7, 1023, 5)]),
        ],
        true,
    )
}

#[test]
fn test_decode_file_and_probe() {
    let mut temp = tempfile::Builder::new().suffix(".mdat").tempfile().unwrap();
    temp.write_all(&sample()).unwrap();
    temp.flush().unwrap();

    assert_eq!(dns::probe(temp.path()), 80);
    let run = dns::decode_file(temp.path(), &DnsConfig::default(), Unmonitored).unwrap();

    assert!(run.header.starts_with("mesytec psd listmode data"));
    assert_eq!(run.stats.buffers, 3);
    assert_eq!(run.stats.chopper_triggers, 3);
    assert_eq!(run.frames, 3);
    assert_eq!(run.events_per_frame, vec![2, 1, 1]);
    assert_eq!(run.total_events(), 4);

    let tube1 = &run.pixels[1024 + 10];
    assert_eq!(tube1.len(), 2);
    assert!((tube1[0].tof - 10.0).abs() < 1e-9);
    assert!((tube1[1].tof - 4.0).abs() < 1e-9);
    let last = &run.pixels[(7 << 3 | 7) * 1024 + 1023];
    assert!((last[0].tof - 0.5).abs() < 1e-9);
}

#[test]
fn test_missing_closing_signature_tolerated() {
    let data = file(&[buffer(0, 0, &[chopper(0), neutron(0, 0, 1, 10)])], false);
    let run = dns::decode_bytes(&Bytes::from(data), &DnsConfig::default(), Unmonitored).unwrap();
    assert_eq!(run.total_events(), 1);
}

#[test]
fn test_invalid_slot_counted() {
    let data = file(
        &[buffer(0, 0, &[chopper(0), neutron(0, 9, 1, 10), neutron(0, 0, 1, 10)])],
        true,
    );
    let run = dns::decode_bytes(&Bytes::from(data), &DnsConfig::default(), Unmonitored).unwrap();
    assert_eq!(run.stats.invalid_neutrons, 1);
    assert_eq!(run.total_events(), 1);
}

#[test]
fn test_other_trigger_channels_do_not_frame() {
    let other = DnsEvent::Trigger {
        trigger_id: 1,
        data_id: 5,
        data: 3,
        timestamp: 50,
    };
    let data = file(
        &[buffer(0, 0, &[chopper(0), other, neutron(0, 0, 1, 60)])],
        true,
    );
    let run = dns::decode_bytes(&Bytes::from(data), &DnsConfig::default(), Unmonitored).unwrap();
    assert_eq!(run.stats.trigger_events, 2);
    assert_eq!(run.frames, 1);
    assert!((run.pixels[1][0].tof - 6.0).abs() < 1e-9);

    let config = DnsConfig {
        chopper_channel: 5,
        ..DnsConfig::default()
    };
    let data = file(
        &[buffer(0, 0, &[chopper(0), other, neutron(0, 0, 1, 60)])],
        true,
    );
    let run = dns::decode_bytes(&Bytes::from(data), &config, Unmonitored).unwrap();
    assert!((run.pixels[1][0].tof - 1.0).abs() < 1e-9);
}

#[test]
fn test_cancellation_discards_open_frame() {
    let flag = CancelFlag::new();
    let mut control = flag.clone();
    flag.cancel();
    assert!(control.is_cancelled());

    let run = dns::decode_bytes(&Bytes::from(sample()), &DnsConfig::default(), flag).unwrap();
    assert!(run.cancelled);
    assert_eq!(run.total_events(), 0);
}

#[test]
fn test_garbage_rejected() {
    let data = Bytes::from_static(b"no separators in here at all");
    assert!(dns::decode_bytes(&data, &DnsConfig::default(), Unmonitored).is_err());
}

#[test]
fn test_default_reads_eight_byte_words() {
    let raw = buffer(0, 0, &[chopper(0), neutron(1, 2, 300, 70)]);
    assert_eq!(raw.len(), BUFFER_HEADER_SIZE + 2 * 8);
    let data = file(&[raw], true);

    let run = dns::decode_bytes(&Bytes::from(data), &DnsConfig::default(), Unmonitored).unwrap();
    assert_eq!(run.stats.chopper_triggers, 1);
    let pixel = &run.pixels[(1 << 3 | 2) * 1024 + 300];
    assert_eq!(pixel.len(), 1);
    assert!((pixel[0].tof - 7.0).abs() < 1e-9);
}

#[test]
fn test_packed_words_need_packed_width() {
    let events = [chopper(0), neutron(0, 3, 5, 20)];
    let data = Bytes::from(file(
        &[buffer_with_width(0, 0, &events, EventWidth::Packed48)],
        true,
    ));
    let config = DnsConfig {
        event_width: EventWidth::Packed48,
        ..DnsConfig::default()
    };
    let run = dns::decode_bytes(&data, &config, Unmonitored).unwrap();
    assert!((run.pixels[3 * 1024 + 5][0].tof - 2.0).abs() < 1e-9);
}
