//! Positionable byte cursor over in-memory or file-backed data
//!
//! Both backends share one contract: ordinary end of data is a boundary
//! signal (`eof()`, `try_read_array` returning `None`), while a read that
//! needs more bytes than remain is an explicit [`Error::TruncatedInput`].

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;

use super::scalar::{ByteOrder, Scalar, Word};
use crate::error::{Error, Result};

/// Backing storage for a [`ByteCursor`].
pub trait ByteSource {
    /// Total number of bytes in the source
    fn size(&self) -> u64;

    /// Current absolute read position
    fn position(&self) -> u64;

    /// Move to an absolute offset (`offset <= size()`)
    fn seek_to(&mut self, offset: u64) -> io::Result<()>;

    /// Fill `buf` completely; the caller has checked enough bytes remain
    fn read_into(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Next byte without advancing
    fn peek_byte(&mut self) -> io::Result<Option<u8>>;
}

/// In-memory source over a shared byte buffer.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
    pos: usize,
}

impl MemorySource {
    /// Borrow the whole underlying buffer
    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }
}

impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.pos = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset exceeds memory"))?;
        Ok(())
    }

    fn read_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let end = self.pos + buf.len();
        let src = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(src);
        self.pos = end;
        Ok(())
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.data.get(self.pos).copied())
    }
}

/// Buffered file source; the size is taken once when the file is opened.
#[derive(Debug)]
pub struct FileSource {
    reader: BufReader<File>,
    pos: u64,
    size: u64,
}

impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        // Short hops stay inside the BufReader's buffer.
        match i64::try_from(offset).ok().zip(i64::try_from(self.pos).ok()) {
            Some((to, from)) => self.reader.seek_relative(to - from)?,
            None => {
                self.reader.seek(SeekFrom::Start(offset))?;
            }
        }
        self.pos = offset;
        Ok(())
    }

    fn read_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.reader.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.reader.fill_buf()?.first().copied())
    }
}

/// Cursor with byte-exact, endian-explicit reads.
///
/// `read` treats the data as big-endian (the wire order of the event
/// formats); `read_raw` keeps the stored byte order little-endian.
#[derive(Debug)]
pub struct ByteCursor<S = MemorySource> {
    source: S,
}

impl ByteCursor<MemorySource> {
    /// Create a cursor over an in-memory buffer
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            source: MemorySource {
                data: data.into(),
                pos: 0,
            },
        }
    }

    /// Borrow the underlying buffer
    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        self.source.bytes()
    }
}

impl ByteCursor<FileSource> {
    /// Open a file-backed cursor
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        Ok(Self {
            source: FileSource {
                reader: BufReader::with_capacity(64 * 1024, file),
                pos: 0,
                size,
            },
        })
    }

    /// Total file length in bytes
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.source.size
    }
}

impl<S: ByteSource> ByteCursor<S> {
    /// Wrap an arbitrary source
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Current absolute position
    #[must_use]
    pub fn position(&self) -> u64 {
        self.source.position()
    }

    /// Total size of the source
    #[must_use]
    pub fn len(&self) -> u64 {
        self.source.size()
    }

    /// Whether the source holds no bytes at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.source.size() == 0
    }

    /// Bytes left after the current position
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.source.size().saturating_sub(self.source.position())
    }

    /// End-of-data check; never fails
    #[must_use]
    pub fn eof(&self) -> bool {
        self.remaining() == 0
    }

    /// Reposition to an absolute offset
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        let size = self.source.size();
        if offset > size {
            return Err(Error::TruncatedInput {
                offset,
                needed: 0,
                available: 0,
            });
        }
        self.source.seek_to(offset)?;
        Ok(())
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        let available = self.remaining();
        if (needed as u64) > available {
            return Err(Error::TruncatedInput {
                offset: self.position(),
                needed,
                available,
            });
        }
        Ok(())
    }

    /// Fill `buf` exactly or fail without consuming anything
    pub fn read_exact_into(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ensure(buf.len())?;
        self.source.read_into(buf)?;
        Ok(())
    }

    /// Read `len` bytes into a new vector
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ensure(len)?;
        let mut buf = vec![0u8; len];
        self.read_exact_into(&mut buf)?;
        Ok(buf)
    }

    /// Read a fixed-size array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_exact_into(&mut buf)?;
        Ok(buf)
    }

    /// Read a fixed-size array, or `None` when fewer than `N` bytes remain.
    ///
    /// A partial tail is left unconsumed.
    pub fn try_read_array<const N: usize>(&mut self) -> Result<Option<[u8; N]>> {
        if self.remaining() < N as u64 {
            return Ok(None);
        }
        self.read_array().map(Some)
    }

    fn read_narrow<T: Word>(&mut self, bytecount: usize) -> Result<[u8; 16]> {
        if bytecount > T::WIDTH {
            return Err(Error::WidthOverflow {
                requested: bytecount,
                width: T::WIDTH,
            });
        }
        let mut buf = [0u8; 16];
        self.read_exact_into(&mut buf[..bytecount])?;
        Ok(buf)
    }

    /// Read `bytecount` bytes in stored (little-endian) order into the low
    /// bytes of `T`.
    pub fn read_raw<T: Word>(&mut self, bytecount: usize) -> Result<T> {
        let buf = self.read_narrow::<T>(bytecount)?;
        let value = buf[..bytecount]
            .iter()
            .rev()
            .fold(0u128, |acc, &b| (acc << 8) | u128::from(b));
        Ok(T::from_u128(value))
    }

    /// Read `bytecount` big-endian bytes into the low bytes of `T`.
    pub fn read<T: Word>(&mut self, bytecount: usize) -> Result<T> {
        let buf = self.read_narrow::<T>(bytecount)?;
        let value = buf[..bytecount]
            .iter()
            .fold(0u128, |acc, &b| (acc << 8) | u128::from(b));
        Ok(T::from_u128(value))
    }

    /// Read a full-width scalar in the given byte order
    pub fn read_scalar<T: Scalar>(&mut self, order: ByteOrder) -> Result<T> {
        let mut buf = [0u8; 8];
        self.read_exact_into(&mut buf[..T::SIZE])?;
        Ok(T::decode(&buf[..T::SIZE], order))
    }

    /// Next byte without advancing; `None` at end of data
    pub fn peek(&mut self) -> Result<Option<u8>> {
        if self.eof() {
            return Ok(None);
        }
        Ok(self.source.peek_byte()?)
    }

    /// Advance `N` bytes without materialising them
    pub fn skip<const N: usize>(&mut self) -> Result<()> {
        self.skip_bytes(N as u64)
    }

    /// Advance `count` bytes without materialising them
    pub fn skip_bytes(&mut self, count: u64) -> Result<()> {
        let available = self.remaining();
        if count > available {
            return Err(Error::TruncatedInput {
                offset: self.position(),
                needed: usize::try_from(count).unwrap_or(usize::MAX),
                available,
            });
        }
        let target = self.position() + count;
        self.source.seek_to(target)?;
        Ok(())
    }
}
