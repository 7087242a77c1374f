//! Scalar encodings shared by the cursor and the binary stream reader/writer

use std::fmt;

/// Byte order of multi-byte values on the wire or in a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteOrder {
    /// Least significant byte first (PSI `.bin`, IDC headers)
    #[default]
    Little,
    /// Most significant byte first (nGEM, DNS)
    Big,
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Little => write!(f, "little-endian"),
            Self::Big => write!(f, "big-endian"),
        }
    }
}

/// Fixed-width numeric value with an explicit byte encoding.
///
/// Implemented for the scalar types the stream reader and writer support:
/// `i16`, `i32`, `i64`, `u16`, `u32`, `f32` and `f64`.
pub trait Scalar: Copy + Default + PartialEq + fmt::Debug {
    /// Encoded width in bytes
    const SIZE: usize;

    /// Decode from exactly [`Self::SIZE`] bytes
    fn decode(bytes: &[u8], order: ByteOrder) -> Self;

    /// Append the encoding of `self` to `out`
    fn encode(self, order: ByteOrder, out: &mut Vec<u8>);
}

macro_rules! impl_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn decode(bytes: &[u8], order: ByteOrder) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    match order {
                        ByteOrder::Little => <$ty>::from_le_bytes(raw),
                        ByteOrder::Big => <$ty>::from_be_bytes(raw),
                    }
                }

                #[inline]
                fn encode(self, order: ByteOrder, out: &mut Vec<u8>) {
                    match order {
                        ByteOrder::Little => out.extend_from_slice(&self.to_le_bytes()),
                        ByteOrder::Big => out.extend_from_slice(&self.to_be_bytes()),
                    }
                }
            }
        )*
    };
}

impl_scalar!(i16, i32, i64, u16, u32, f32, f64);

/// Unsigned host type that a narrow field can be widened into.
///
/// `read_raw`/`read` on [`ByteCursor`](super::ByteCursor) fill the low
/// `bytecount` bytes of a `Word` and zero the rest.
pub trait Word: Copy + fmt::Debug {
    /// Width of the host type in bytes
    const WIDTH: usize;

    /// Narrow a value that is known to fit
    fn from_u128(value: u128) -> Self;
}

macro_rules! impl_word {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Word for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                #[inline]
                #[allow(clippy::cast_possible_truncation)]
                fn from_u128(value: u128) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

impl_word!(u8, u16, u32, u64, u128);


/// Decode stored fixed-width text.
///
/// Valid UTF-8 is taken as is. Anything else is read as Latin-1, one
/// character per byte, so a byte such as `0xB0` becomes `°` instead of a
/// replacement character and the byte count is preserved.
#[must_use]
pub fn decode_text(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) => text.to_owned(),
        Err(_) => raw.iter().map(|&b| char::from(b)).collect(),
    }
}
