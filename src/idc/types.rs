//! Wire data types

use std::fmt;

/// Element type tag carried in every command header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(i32)]
pub enum WireType {
    /// No payload or unknown content
    Unknown = 0,
    /// Signed 32-bit integers
    Int32 = 1,
    /// Single-precision floats
    Real32 = 2,
    /// Double-precision floats
    Real64 = 3,
    /// 8-bit characters
    Char = 4,
}

impl WireType {
    /// Convert from the wire tag
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::Int32),
            2 => Some(Self::Real32),
            3 => Some(Self::Real64),
            4 => Some(Self::Char),
            _ => None,
        }
    }

    /// Wire tag
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Three-letter code appended to typed commands such as `GETPARI32`
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Unknown => "U00",
            Self::Int32 => "I32",
            Self::Real32 => "R32",
            Self::Real64 => "R64",
            Self::Char => "C08",
        }
    }

    /// Bytes per element
    #[must_use]
    pub const fn element_size(self) -> usize {
        match self {
            Self::Unknown | Self::Char => 1,
            Self::Int32 | Self::Real32 => 4,
            Self::Real64 => 8,
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
