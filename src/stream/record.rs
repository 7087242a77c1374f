//! Fixed-offset record decoding
//!
//! A record layout is a table of [`FieldSpec`]s, each naming an absolute
//! offset and a kind. Every field is decoded by a `(seek, read)` pair, so
//! fields are independent of each other and of the order they are listed.

use std::collections::BTreeMap;

use super::cursor::{ByteCursor, ByteSource};
use super::scalar::{ByteOrder, decode_text};
use crate::error::{Error, Result};

/// Shape and type of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Signed 16-bit integer
    I16,
    /// Signed 32-bit integer
    I32,
    /// Signed 64-bit integer
    I64,
    /// Unsigned 16-bit integer
    U16,
    /// Unsigned 32-bit integer
    U32,
    /// IEEE single precision
    F32,
    /// IEEE double precision
    F64,
    /// Fixed-length character field, consumed in full
    Text(usize),
    /// `count` 32-bit integers at `offset + i * stride`
    I32Array {
        /// Number of elements
        count: usize,
        /// Distance between elements in bytes
        stride: u64,
    },
    /// `count` single-precision floats at `offset + i * stride`
    F32Array {
        /// Number of elements
        count: usize,
        /// Distance between elements in bytes
        stride: u64,
    },
    /// `count` fixed-length strings at `offset + i * stride`
    TextArray {
        /// Number of elements
        count: usize,
        /// Characters per element
        len: usize,
        /// Distance between elements in bytes
        stride: u64,
    },
}

/// One entry of a record layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name used as the record key
    pub name: &'static str,
    /// Absolute offset from the start of the source
    pub offset: u64,
    /// Field type
    pub kind: FieldKind,
}

impl FieldSpec {
    /// Build a field spec
    #[must_use]
    pub const fn new(name: &'static str, offset: u64, kind: FieldKind) -> Self {
        Self { name, offset, kind }
    }
}

/// Decoded field value
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldValue {
    /// Signed 16-bit integer
    I16(i16),
    /// Signed 32-bit integer
    I32(i32),
    /// Signed 64-bit integer
    I64(i64),
    /// Unsigned 16-bit integer
    U16(u16),
    /// Unsigned 32-bit integer
    U32(u32),
    /// IEEE single precision
    F32(f32),
    /// IEEE double precision
    F64(f64),
    /// Fixed-length text, unstripped
    Text(String),
    /// Array of 32-bit integers
    I32Array(Vec<i32>),
    /// Array of single-precision floats
    F32Array(Vec<f32>),
    /// Array of fixed-length strings
    TextArray(Vec<String>),
}

/// Flat mapping from field name to decoded value
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BinaryRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl BinaryRecord {
    /// Store a value under `name`
    pub fn insert(&mut self, name: &str, value: FieldValue) {
        self.fields.insert(name.to_owned(), value);
    }

    /// Look up a raw value
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Number of decoded fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields were decoded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn missing(name: &str) -> Error {
        Error::format(format!("record has no field `{name}` of the requested type"))
    }

    /// Typed accessor for an `I16` field
    pub fn i16(&self, name: &str) -> Result<i16> {
        match self.get(name) {
            Some(FieldValue::I16(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    /// Typed accessor for an `I32` field
    pub fn i32(&self, name: &str) -> Result<i32> {
        match self.get(name) {
            Some(FieldValue::I32(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    /// Typed accessor for an `F32` field
    pub fn f32(&self, name: &str) -> Result<f32> {
        match self.get(name) {
            Some(FieldValue::F32(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    /// Typed accessor for a `Text` field
    pub fn text(&self, name: &str) -> Result<&str> {
        match self.get(name) {
            Some(FieldValue::Text(v)) => Ok(v),
            _ => Err(Self::missing(name)),
        }
    }

    /// Typed accessor for an `I32Array` field
    pub fn i32_array(&self, name: &str) -> Result<&[i32]> {
        match self.get(name) {
            Some(FieldValue::I32Array(v)) => Ok(v),
            _ => Err(Self::missing(name)),
        }
    }

    /// Typed accessor for an `F32Array` field
    pub fn f32_array(&self, name: &str) -> Result<&[f32]> {
        match self.get(name) {
            Some(FieldValue::F32Array(v)) => Ok(v),
            _ => Err(Self::missing(name)),
        }
    }

    /// Typed accessor for a `TextArray` field
    pub fn text_array(&self, name: &str) -> Result<&[String]> {
        match self.get(name) {
            Some(FieldValue::TextArray(v)) => Ok(v),
            _ => Err(Self::missing(name)),
        }
    }
}

fn read_text<S: ByteSource>(cursor: &mut ByteCursor<S>, len: usize) -> Result<String> {
    Ok(decode_text(&cursor.read_bytes(len)?))
}

/// Decode one field, seeking to its offset first
pub fn read_field<S: ByteSource>(
    cursor: &mut ByteCursor<S>,
    spec: &FieldSpec,
    order: ByteOrder,
) -> Result<FieldValue> {
    cursor.seek(spec.offset)?;
    let value = match spec.kind {
        FieldKind::I16 => FieldValue::I16(cursor.read_scalar(order)?),
        FieldKind::I32 => FieldValue::I32(cursor.read_scalar(order)?),
        FieldKind::I64 => FieldValue::I64(cursor.read_scalar(order)?),
        FieldKind::U16 => FieldValue::U16(cursor.read_scalar(order)?),
        FieldKind::U32 => FieldValue::U32(cursor.read_scalar(order)?),
        FieldKind::F32 => FieldValue::F32(cursor.read_scalar(order)?),
        FieldKind::F64 => FieldValue::F64(cursor.read_scalar(order)?),
        FieldKind::Text(len) => FieldValue::Text(read_text(cursor, len)?),
        FieldKind::I32Array { count, stride } => {
            let mut values = Vec::with_capacity(count);
            for index in 0..count as u64 {
                cursor.seek(spec.offset + index * stride)?;
                values.push(cursor.read_scalar(order)?);
            }
            FieldValue::I32Array(values)
        }
        FieldKind::F32Array { count, stride } => {
            let mut values = Vec::with_capacity(count);
            for index in 0..count as u64 {
                cursor.seek(spec.offset + index * stride)?;
                values.push(cursor.read_scalar(order)?);
            }
            FieldValue::F32Array(values)
        }
        FieldKind::TextArray { count, len, stride } => {
            let mut values = Vec::with_capacity(count);
            for index in 0..count as u64 {
                cursor.seek(spec.offset + index * stride)?;
                values.push(read_text(cursor, len)?);
            }
            FieldValue::TextArray(values)
        }
    };
    Ok(value)
}

/// Decode every field of `layout` into a record.
///
/// Any failed field aborts the whole decode.
pub fn decode_record<S: ByteSource>(
    cursor: &mut ByteCursor<S>,
    layout: &[FieldSpec],
    order: ByteOrder,
) -> Result<BinaryRecord> {
    let mut record = BinaryRecord::default();
    for spec in layout {
        let value = read_field(cursor, spec, order)?;
        record.insert(spec.name, value);
    }
    Ok(record)
}
