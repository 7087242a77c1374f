//! Typed writer mirroring [`BinaryStreamReader`](super::BinaryStreamReader)

use std::io::{Seek, SeekFrom, Write};

use super::reader::{MatrixOrdering, PrefixWidth};
use super::scalar::{ByteOrder, Scalar};
use crate::error::{Error, Result};

/// Padding byte appended to short fixed-length strings
pub const STRING_PAD: u8 = b' ';

/// Writer producing exactly what the reader consumes.
#[derive(Debug)]
pub struct BinaryStreamWriter<W> {
    inner: W,
    order: ByteOrder,
    prefix: PrefixWidth,
    scratch: Vec<u8>,
}

impl<W: Write + Seek> BinaryStreamWriter<W> {
    /// Wrap a stream, defaulting to little-endian with a `u32` string prefix
    pub fn new(mut inner: W) -> Result<Self> {
        inner
            .stream_position()
            .map_err(|e| Error::BadStream(e.to_string()))?;
        Ok(Self {
            inner,
            order: ByteOrder::Little,
            prefix: PrefixWidth::default(),
            scratch: Vec::with_capacity(64),
        })
    }

    /// Set the byte order for scalar writes
    #[must_use]
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    /// Set the string length-prefix width
    #[must_use]
    pub fn with_prefix_width(mut self, prefix: PrefixWidth) -> Self {
        self.prefix = prefix;
        self
    }

    /// Absolute position in the stream
    pub fn stream_position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    /// Jump to an absolute position
    pub fn move_stream_to_position(&mut self, position: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    /// Flush and release the wrapped stream
    pub fn into_inner(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }

    /// Write out the staged bytes; they are discarded even on failure
    fn emit(&mut self) -> Result<()> {
        let written = self.inner.write_all(&self.scratch);
        self.scratch.clear();
        written?;
        Ok(())
    }

    /// Write one scalar
    pub fn write<T: Scalar>(&mut self, value: T) -> Result<()> {
        value.encode(self.order, &mut self.scratch);
        self.emit()
    }

    /// Write the first `n` values of `values`
    pub fn write_slice<T: Scalar>(&mut self, values: &[T], n: usize) -> Result<()> {
        let head = values.get(..n).ok_or_else(|| {
            Error::config(format!("cannot write {n} values from {}", values.len()))
        })?;
        for value in head {
            value.encode(self.order, &mut self.scratch);
        }
        self.emit()
    }

    /// Write raw bytes unchanged
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    /// Write a length-prefixed string
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let (requested, width) = (value.len(), self.prefix.size());
        let overflow = || Error::WidthOverflow { requested, width };
        match self.prefix {
            PrefixWidth::U8 => {
                let len = u8::try_from(value.len()).map_err(|_| overflow())?;
                self.scratch.push(len);
            }
            PrefixWidth::U16 => {
                let len = u16::try_from(value.len()).map_err(|_| overflow())?;
                len.encode(self.order, &mut self.scratch);
            }
            PrefixWidth::U32 => {
                let len = u32::try_from(value.len()).map_err(|_| overflow())?;
                len.encode(self.order, &mut self.scratch);
            }
        }
        self.scratch.extend_from_slice(value.as_bytes());
        self.emit()
    }

    /// Write `value` as exactly `len` bytes, padding with [`STRING_PAD`]
    pub fn write_fixed_string(&mut self, value: &str, len: usize) -> Result<()> {
        let bytes = value.as_bytes();
        if bytes.len() > len {
            return Err(Error::WidthOverflow {
                requested: bytes.len(),
                width: len,
            });
        }
        self.scratch.extend_from_slice(bytes);
        self.scratch.resize(len, STRING_PAD);
        self.emit()
    }

    /// Write a rectangular matrix in `ordering`
    pub fn write_matrix<T: Scalar>(
        &mut self,
        rows: &[Vec<T>],
        ordering: MatrixOrdering,
    ) -> Result<()> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != cols) {
            return Err(Error::config("matrix rows differ in length"));
        }
        for value in flatten(rows, cols, ordering) {
            value.encode(self.order, &mut self.scratch);
        }
        self.emit()
    }

    /// Write strings as a `count x len` character block in `ordering`
    pub fn write_strings(
        &mut self,
        values: &[String],
        len: usize,
        ordering: MatrixOrdering,
    ) -> Result<()> {
        let mut rows = Vec::with_capacity(values.len());
        for value in values {
            let bytes = value.as_bytes();
            if bytes.len() > len {
                return Err(Error::WidthOverflow {
                    requested: bytes.len(),
                    width: len,
                });
            }
            let mut row = bytes.to_vec();
            row.resize(len, STRING_PAD);
            rows.push(row);
        }
        self.scratch.extend(flatten(&rows, len, ordering));
        self.emit()
    }

    /// Flush buffered output
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

fn flatten<T: Copy>(rows: &[Vec<T>], cols: usize, ordering: MatrixOrdering) -> Vec<T> {
    let mut flat = Vec::with_capacity(rows.len() * cols);
    match ordering {
        MatrixOrdering::RowMajor => {
            for row in rows {
                flat.extend_from_slice(row);
            }
        }
        MatrixOrdering::ColumnMajor => {
            for c in 0..cols {
                for row in rows {
                    flat.push(row[c]);
                }
            }
        }
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_fixed_string_padded() {
        let mut writer = BinaryStreamWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.write_fixed_string("ab", 4).unwrap();
        assert_eq!(writer.into_inner().unwrap().into_inner(), b"ab  ");
    }

    #[test]
    fn test_fixed_string_too_long() {
        let mut writer = BinaryStreamWriter::new(Cursor::new(Vec::new())).unwrap();
        assert!(writer.write_fixed_string("abcdef", 4).is_err());
    }

    #[test]
    fn test_prefix_overflow_rejected() {
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
    fn test_column_major_layout() {
        let mut writer = BinaryStreamWriter::new(Cursor::new(Vec::new())).unwrap();
        writer
            .write_strings(
                &["abc".to_string(), "xyz".to_string()],
                3,
                MatrixOrdering::ColumnMajor,
            )
            .unwrap();
        assert_eq!(writer.into_inner().unwrap().into_inner(), b"axbycz");
    }

    struct FailOnce {
        data: Vec<u8>,
        fail_next: bool,
    }

    impl Write for FailOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if std::mem::take(&mut self.fail_next) {
                return Err(std::io::Error::other("disk full"));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FailOnce {
        fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
            Ok(self.data.len() as u64)
        }
    }

    #[test]
    fn test_failed_write_not_replayed() {
        let sink = FailOnce {
            data: Vec::new(),
            fail_next: true,
        };
        let mut writer = BinaryStreamWriter::new(sink).unwrap();
        assert!(matches!(writer.write(1i32), Err(Error::Io(_))));
        writer.write(2i32).unwrap();
        assert_eq!(writer.into_inner().unwrap().data, 2i32.to_le_bytes());
    }

    #[test]
    fn test_ragged_matrix_rejected() {
        let mut writer = BinaryStreamWriter::new(Cursor::new(Vec::new())).unwrap();
        let rows = vec![vec![1i32, 2], vec![3]];
        assert!(writer.write_matrix(&rows, MatrixOrdering::RowMajor).is_err());
    }
}
