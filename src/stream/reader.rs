//! Typed reader over an open seekable stream

use std::io::{self, Read, Seek, SeekFrom};

use super::scalar::{ByteOrder, Scalar, decode_text};
use crate::error::{Error, Result};

/// Width of the length prefix in front of variable-length strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrefixWidth {
    /// 1-byte length
    U8,
    /// 2-byte length
    U16,
    /// 4-byte length, the widest unsigned type the stream supports
    #[default]
    U32,
}

impl PrefixWidth {
    /// Encoded size in bytes
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Largest length this prefix can carry
    #[must_use]
    pub const fn max_len(self) -> u64 {
        match self {
            Self::U8 => u8::MAX as u64,
            Self::U16 => u16::MAX as u64,
            Self::U32 => u32::MAX as u64,
        }
    }
}

/// Storage order for 2-D data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MatrixOrdering {
    /// Rows stored one after another
    RowMajor,
    /// Columns stored one after another
    ColumnMajor,
}

/// Reader for the binary layouts shared by several loaders.
///
/// Construction fails immediately if the stream cannot report its
/// position, so a broken stream never reaches the first field read.
#[derive(Debug)]
pub struct BinaryStreamReader<R> {
    inner: R,
    order: ByteOrder,
    prefix: PrefixWidth,
}

impl<R: Read + Seek> BinaryStreamReader<R> {
    /// Wrap a stream, defaulting to little-endian with a `u32` string prefix
    pub fn new(mut inner: R) -> Result<Self> {
        inner
            .stream_position()
            .map_err(|e| Error::BadStream(e.to_string()))?;
        Ok(Self {
            inner,
            order: ByteOrder::Little,
            prefix: PrefixWidth::default(),
        })
    }

    /// Set the byte order for scalar reads
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

    /// Current byte order
    #[must_use]
    pub const fn byte_order(&self) -> ByteOrder {
        self.order
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

    /// Release the wrapped stream
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Fail before allocating when fewer than `needed` bytes remain
    fn ensure_available(&mut self, needed: usize) -> Result<()> {
        let start = self.inner.stream_position()?;
        let end = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(start))?;
        let available = end.saturating_sub(start);
        if !u64::try_from(needed).is_ok_and(|n| n <= available) {
            return Err(Error::TruncatedInput {
                offset: start,
                needed,
                available,
            });
        }
        Ok(())
    }

    fn checked_len(count: usize, width: usize) -> Result<usize> {
        count
            .checked_mul(width)
            .ok_or_else(|| Error::format(format!("{count} x {width} overflows usize")))
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        let start = self.inner.stream_position()?;
        match self.inner.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                let end = self.inner.seek(SeekFrom::End(0))?;
                self.inner.seek(SeekFrom::Start(start))?;
                Err(Error::TruncatedInput {
                    offset: start,
                    needed: buf.len(),
                    available: end.saturating_sub(start),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Read one scalar
    pub fn read<T: Scalar>(&mut self) -> Result<T> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf[..T::SIZE])?;
        Ok(T::decode(&buf[..T::SIZE], self.order))
    }

    /// Read `n` values into the front of `values`.
    ///
    /// Elements past `n` keep their contents; `values` only grows when it
    /// is shorter than `n`.
    pub fn read_into<T: Scalar>(&mut self, values: &mut Vec<T>, n: usize) -> Result<()> {
        let len = Self::checked_len(n, T::SIZE)?;
        self.ensure_available(len)?;
        let mut raw = vec![0u8; len];
        self.fill(&mut raw)?;
        if values.len() < n {
            values.resize(n, T::default());
        }
        for (slot, chunk) in values.iter_mut().zip(raw.chunks_exact(T::SIZE)) {
            *slot = T::decode(chunk, self.order);
        }
        Ok(())
    }

    /// Read `n` values into a new vector
    pub fn read_vec<T: Scalar>(&mut self, n: usize) -> Result<Vec<T>> {
        let mut values = Vec::new();
        self.read_into(&mut values, n)?;
        Ok(values)
    }

    fn read_prefix(&mut self) -> Result<usize> {
        let len = match self.prefix {
            PrefixWidth::U8 => {
                let mut b = [0u8; 1];
                self.fill(&mut b)?;
                u64::from(b[0])
            }
            PrefixWidth::U16 => u64::from(self.read::<u16>()?),
            PrefixWidth::U32 => u64::from(self.read::<u32>()?),
        };
        usize::try_from(len).map_err(|_| Error::format(format!("string length {len} too large")))
    }

    /// Read a length-prefixed string
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_prefix()?;
        self.read_fixed_string(len)
    }

    /// Read exactly `len` bytes as a string, padding included.
    ///
    /// Text that is not UTF-8 is decoded as Latin-1 (see [`decode_text`]);
    /// use [`read_fixed_bytes`](Self::read_fixed_bytes) for the raw bytes.
    pub fn read_fixed_string(&mut self, len: usize) -> Result<String> {
        Ok(decode_text(&self.read_fixed_bytes(len)?))
    }

    /// Read exactly `len` raw bytes
    pub fn read_fixed_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ensure_available(len)?;
        let mut raw = vec![0u8; len];
        self.fill(&mut raw)?;
        Ok(raw)
    }

    /// Read a `rows x cols` matrix stored in `ordering`
    pub fn read_matrix<T: Scalar>(
        &mut self,
        shape: (usize, usize),
        ordering: MatrixOrdering,
    ) -> Result<Vec<Vec<T>>> {
        let (rows, cols) = shape;
        let flat = self.read_vec::<T>(Self::checked_len(rows, cols)?)?;
        Ok(unflatten(&flat, rows, cols, ordering))
    }

    /// Read `shape.0` strings of `shape.1` bytes each stored in `ordering`
    pub fn read_strings(
        &mut self,
        shape: (usize, usize),
        ordering: MatrixOrdering,
    ) -> Result<Vec<String>> {
        let (count, len) = shape;
        let raw = self.read_fixed_bytes(Self::checked_len(count, len)?)?;
        Ok(unflatten(&raw, count, len, ordering)
            .into_iter()
            .map(|chars| decode_text(&chars))
            .collect())
    }
}

/// Rebuild rows from flat storage in either ordering
pub(crate) fn unflatten<T: Copy>(
    flat: &[T],
    rows: usize,
    cols: usize,
    ordering: MatrixOrdering,
) -> Vec<Vec<T>> {
    (0..rows)
        .map(|r| {
            (0..cols)
                .map(|c| match ordering {
                    MatrixOrdering::RowMajor => flat[r * cols + c],
                    MatrixOrdering::ColumnMajor => flat[c * rows + r],
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_scalars_little_endian() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(-2i16).to_le_bytes());
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.extend_from_slice(&1.5f64.to_le_bytes());

        let mut reader = BinaryStreamReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.read::<i16>().unwrap(), -2);
        assert_eq!(reader.read::<u32>().unwrap(), 7);
        assert!((reader.read::<f64>().unwrap() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_read_string_with_prefix() {
        let mut bytes = 5u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"hello world");
        let mut reader = BinaryStreamReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.read_string().unwrap(), "hello");
        assert_eq!(reader.stream_position().unwrap(), 9);
    }

    #[test]
    fn test_read_string_u16_prefix() {
        let mut bytes = 3u16.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        let mut reader = BinaryStreamReader::new(Cursor::new(bytes))
            .unwrap()
            .with_byte_order(ByteOrder::Big)
            .with_prefix_width(PrefixWidth::U16);
        assert_eq!(reader.read_string().unwrap(), "abc");
    }

    #[test]
    fn test_fixed_string_keeps_padding() {
        let mut reader = BinaryStreamReader::new(Cursor::new(b"ab  cd".to_vec())).unwrap();
        assert_eq!(reader.read_fixed_string(4).unwrap(), "ab  ");
    }

    #[test]
    fn test_latin1_text_keeps_byte_count() {
        let raw = b"12\xB0C".to_vec();
        let mut reader = BinaryStreamReader::new(Cursor::new(raw.clone())).unwrap();
        let text = reader.read_fixed_string(4).unwrap();
        assert_eq!(text, "12\u{B0}C");
        assert_eq!(text.chars().count(), 4);

        reader.move_stream_to_position(0).unwrap();
        assert_eq!(reader.read_fixed_bytes(4).unwrap(), raw);
    }

    #[test]
    fn test_corrupt_prefix_fails_before_allocating() {
        let mut bytes = 0xFFFF_FFF0u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        let mut reader = BinaryStreamReader::new(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            reader.read_string(),
            Err(Error::TruncatedInput {
                offset: 4,
                available: 3,
                ..
            })
        ));
        assert_eq!(reader.stream_position().unwrap(), 4);

        let mut reader = BinaryStreamReader::new(Cursor::new(vec![0u8; 8])).unwrap();
        assert!(reader.read_vec::<i32>(usize::MAX / 2).is_err());
    }

    #[test]
    fn test_matrix_orderings() {
        let values: Vec<u8> = [1i32, 2, 3, 4, 5, 6]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();

        let mut reader = BinaryStreamReader::new(Cursor::new(values.clone())).unwrap();
        let rows = reader
            .read_matrix::<i32>((2, 3), MatrixOrdering::RowMajor)
            .unwrap();
        assert_eq!(rows, vec![vec![1, 2, 3], vec![4, 5, 6]]);

        let mut reader = BinaryStreamReader::new(Cursor::new(values)).unwrap();
        let cols = reader
            .read_matrix::<i32>((2, 3), MatrixOrdering::ColumnMajor)
            .unwrap();
        assert_eq!(cols, vec![vec![1, 3, 5], vec![2, 4, 6]]);
    }

    #[test]
    fn test_strings_column_major() {
        // "abc" and "xyz" interleaved column by column
        let mut reader = BinaryStreamReader::new(Cursor::new(b"axbycz".to_vec())).unwrap();
        let strings = reader
            .read_strings((2, 3), MatrixOrdering::ColumnMajor)
            .unwrap();
        assert_eq!(strings, vec!["abc".to_string(), "xyz".to_string()]);
    }

    #[test]
    fn test_truncated_read_reports_available() {
        let mut reader = BinaryStreamReader::new(Cursor::new(vec![0u8; 3])).unwrap();
        let result = reader.read::<u32>();
        assert!(matches!(
            result,
            Err(Error::TruncatedInput {
                offset: 0,
                needed: 4,
                available: 3
            })
        ));
    }
}
