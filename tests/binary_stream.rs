use std::io::{self, Cursor, Read, Seek, SeekFrom};

use daqstream::Error;
use daqstream::stream::{
    BinaryStreamReader, BinaryStreamWriter, ByteCursor, ByteOrder, MatrixOrdering, PrefixWidth,
};
use proptest::prelude::*;

fn order() -> impl Strategy<Value = ByteOrder> {
    prop_oneof![Just(ByteOrder::Little), Just(ByteOrder::Big)]
}

fn written(order: ByteOrder, fill: impl FnOnce(&mut BinaryStreamWriter<Cursor<Vec<u8>>>)) -> Vec<u8> {
    let mut writer = BinaryStreamWriter::new(Cursor::new(Vec::new()))
        .unwrap()
        .with_byte_order(order);
    fill(&mut writer);
    writer.into_inner().unwrap().into_inner()
}

fn reader(order: ByteOrder, data: Vec<u8>) -> BinaryStreamReader<Cursor<Vec<u8>>> {
    BinaryStreamReader::new(Cursor::new(data))
        .unwrap()
        .with_byte_order(order)
}

proptest! {
    #[test]
    fn prop_scalars_survive_write_then_read(
        order in order(),
        a in any::<i16>(),
        b in any::<i32>(),
        c in any::<i64>(),
        d in any::<u16>(),
        e in any::<u32>(),
        f in any::<f32>(),
        g in any::<f64>(),
    ) {
        let data = written(order, |w| {
            w.write(a).unwrap();
            w.write(b).unwrap();
            w.write(c).unwrap();
            w.write(d).unwrap();
            w.write(e).unwrap();
            w.write(f).unwrap();
            w.write(g).unwrap();
        });
        prop_assert_eq!(data.len(), 2 + 4 + 8 + 2 + 4 + 4 + 8);

        let mut r = reader(order, data);
        prop_assert_eq!(r.read::<i16>().unwrap(), a);
        prop_assert_eq!(r.read::<i32>().unwrap(), b);
        prop_assert_eq!(r.read::<i64>().unwrap(), c);
        prop_assert_eq!(r.read::<u16>().unwrap(), d);
        prop_assert_eq!(r.read::<u32>().unwrap(), e);
        prop_assert_eq!(r.read::<f32>().unwrap().to_bits(), f.to_bits());
        prop_assert_eq!(r.read::<f64>().unwrap().to_bits(), g.to_bits());
    }

    #[test]
    fn prop_strings_survive_write_then_read(text in "[ -~]{0,40}", pad in 0usize..8) {
        let len = text.len() + pad;
        let data = written(ByteOrder::Big, |w| {
            w.write_string(&text).unwrap();
            w.write_fixed_string(&text, len).unwrap();
        });
        let mut r = reader(ByteOrder::Big, data);
        prop_assert_eq!(r.read_string().unwrap(), text.clone());
        let fixed = r.read_fixed_string(len).unwrap();
        prop_assert_eq!(fixed.len(), len);
        prop_assert_eq!(fixed.trim_end_matches(' '), text.trim_end_matches(' '));
    }

    #[test]
    fn prop_bounded_read_leaves_tail(
        values in proptest::collection::vec(any::<i32>(), 0..16),
        existing in proptest::collection::vec(any::<i32>(), 0..24),
    ) {
        let n = values.len();
        let data = written(ByteOrder::Little, |w| w.write_slice(&values, n).unwrap());
        let mut target = existing.clone();
        reader(ByteOrder::Little, data).read_into(&mut target, n).unwrap();

        prop_assert_eq!(target.len(), existing.len().max(n));
        prop_assert_eq!(&target[..n], &values[..]);
        if existing.len() > n {
            prop_assert_eq!(&target[n..], &existing[n..]);
        }
    }
}

#[test]
fn test_big_endian_wire_order() {
    let mut cursor = ByteCursor::from_bytes(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    let value: u64 = cursor.read(6).unwrap();
    assert_eq!(value, 0x0102_0304_0506);

    let mut cursor = ByteCursor::from_bytes(vec![0x01, 0x02, 0x03]);
    let raw: u32 = cursor.read_raw(3).unwrap();
    assert_eq!(raw, 0x0003_0201);
}

#[test]
fn test_matrix_orderings() {
    let rows = vec![vec![1i32, 2, 3], vec![4, 5, 6]];
    for ordering in [MatrixOrdering::RowMajor, MatrixOrdering::ColumnMajor] {
        let data = written(ByteOrder::Little, |w| w.write_matrix(&rows, ordering).unwrap());
        let back: Vec<Vec<i32>> = reader(ByteOrder::Little, data)
            .read_matrix((2, 3), ordering)
            .unwrap();
        assert_eq!(back, rows);
    }
    let column = written(ByteOrder::Little, |w| {
        w.write_matrix(&rows, MatrixOrdering::ColumnMajor).unwrap();
    });
    assert_eq!(&column[4..8], &4i32.to_le_bytes());
}

#[test]
fn test_prefix_width_overflow() {
    let mut writer = BinaryStreamWriter::new(Cursor::new(Vec::new()))
        .unwrap()
        .with_prefix_width(PrefixWidth::U8);
    let long = "x".repeat(300);
    assert!(matches!(
        writer.write_string(&long),
        Err(Error::WidthOverflow { .. })
    ));
}

#[test]
fn test_truncated_read_reports_offset() {
    let mut r = reader(ByteOrder::Little, vec![1, 2, 3]);
    r.move_stream_to_position(1).unwrap();
    match r.read::<i32>() {
        Err(Error::TruncatedInput {
            offset,
            needed,
            available,
        }) => {
            assert_eq!((offset, needed, available), (1, 4, 2));
        }
        other => panic!("expected truncated input, got {other:?}"),
    }
}

struct Unseekable;

impl Read for Unseekable {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Seek for Unseekable {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "pipe"))
    }
}

#[test]
fn test_bad_stream_rejected_at_construction() {
    assert!(matches!(
        BinaryStreamReader::new(Unseekable),
        Err(Error::BadStream(_))
    ));
}
