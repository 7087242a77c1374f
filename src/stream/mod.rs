//! Byte-level building blocks shared by every format
//!
//! [`ByteCursor`] gives endian-explicit access to a file or buffer,
//! [`BinaryStreamReader`]/[`BinaryStreamWriter`] add typed and 2-D layouts
//! over any seekable stream, and [`record`] decodes fixed-offset headers.

mod cursor;
mod reader;
pub mod record;
mod scalar;
mod writer;

pub use cursor::{ByteCursor, ByteSource, FileSource, MemorySource};
pub use reader::{BinaryStreamReader, MatrixOrdering, PrefixWidth};
pub use record::{BinaryRecord, FieldKind, FieldSpec, FieldValue, decode_record, read_field};
pub use scalar::{ByteOrder, Scalar, Word, decode_text};
pub use writer::{BinaryStreamWriter, STRING_PAD};
