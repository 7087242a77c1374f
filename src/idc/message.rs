//! Command header codec
//!
//! Every command and reply starts with an 88-byte little-endian header:
//!
//! ```text
//! 0   len        i32   header + payload bytes
//! 4   type       i32   WireType tag
//! 8   ndims      i32
//! 12  dims[11]   i32
//! 56  command    32 bytes, NUL padded
//! 88  payload
//! ```

use std::io::{Cursor, Read};

use bytes::Bytes;

use super::error::ProtocolError;
use super::types::WireType;
use crate::error::{Error, Result};
use crate::stream::{BinaryStreamReader, BinaryStreamWriter, Scalar};

/// Size of the command header
pub const HEADER_SIZE: usize = 88;

/// Dimension slots in the header
pub const MAX_DIMS: usize = 11;

/// Bytes reserved for the command name
pub const COMMAND_LEN: usize = 32;

/// Size of the connection-open packet
pub const OPEN_PACKET_SIZE: usize = 120;

const USER_LEN: usize = 32;
const HOST_LEN: usize = 64;
const PROTOCOL_MAJOR: i32 = 1;
const PROTOCOL_MINOR: i32 = 1;
const DAE_ACCESS: i32 = 0;

fn nul_padded(text: &str, len: usize) -> Vec<u8> {
    let mut out = text.as_bytes()[..text.len().min(len - 1)].to_vec();
    out.resize(len, 0);
    out
}

fn to_i32(value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::format(format!("{value} does not fit the wire")))
}

/// Build the packet that opens a session
pub fn open_packet(user: &str, host: &str, pid: i32) -> Result<Vec<u8>> {
    let mut writer = BinaryStreamWriter::new(Cursor::new(Vec::with_capacity(OPEN_PACKET_SIZE)))?;
    for field in [
        to_i32(OPEN_PACKET_SIZE)?,
        PROTOCOL_MAJOR,
        PROTOCOL_MINOR,
        pid,
        DAE_ACCESS,
        0,
    ] {
        writer.write(field)?;
    }
    writer.write_bytes(&nul_padded(user, USER_LEN))?;
    writer.write_bytes(&nul_padded(host, HOST_LEN))?;
    Ok(writer.into_inner()?.into_inner())
}

/// One command or reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    /// Command name, or the status text in a reply
    pub command: String,
    /// Payload element type
    pub wire_type: WireType,
    /// Payload dimensions
    pub dims: Vec<usize>,
    /// Raw little-endian payload
    pub payload: Bytes,
}

impl WireMessage {
    /// Message without payload
    #[must_use]
    pub fn empty(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            wire_type: WireType::Unknown,
            dims: Vec::new(),
            payload: Bytes::new(),
        }
    }

    /// Character payload with one dimension
    #[must_use]
    pub fn text(command: impl Into<String>, text: &str) -> Self {
        Self {
            command: command.into(),
            wire_type: WireType::Char,
            dims: vec![text.len()],
            payload: Bytes::copy_from_slice(text.as_bytes()),
        }
    }

    /// Integer payload with explicit dimensions
    #[must_use]
    pub fn int32(command: impl Into<String>, values: &[i32], dims: Vec<usize>) -> Self {
        Self::typed(command, WireType::Int32, values, dims)
    }

    /// Single-precision payload with explicit dimensions
    #[must_use]
    pub fn real32(command: impl Into<String>, values: &[f32], dims: Vec<usize>) -> Self {
        Self::typed(command, WireType::Real32, values, dims)
    }

    /// Double-precision payload with explicit dimensions
    #[must_use]
    pub fn real64(command: impl Into<String>, values: &[f64], dims: Vec<usize>) -> Self {
        Self::typed(command, WireType::Real64, values, dims)
    }

    fn typed<T: Scalar>(
        command: impl Into<String>,
        wire_type: WireType,
        values: &[T],
        dims: Vec<usize>,
    ) -> Self {
        let mut payload = Vec::with_capacity(values.len() * T::SIZE);
        for value in values {
            value.encode(crate::stream::ByteOrder::Little, &mut payload);
        }
        Self {
            command: command.into(),
            wire_type,
            dims,
            payload: Bytes::from(payload),
        }
    }

    /// Elements the dimensions declare; without dimensions, the elements
    /// the payload holds
    #[must_use]
    pub fn element_count(&self) -> usize {
        if self.dims.is_empty() {
            self.payload.len() / self.wire_type.element_size()
        } else {
            self.dims.iter().product()
        }
    }

    /// Serialise header and payload
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.command.len() >= COMMAND_LEN {
            return Err(Error::WidthOverflow {
                requested: self.command.len(),
                width: COMMAND_LEN - 1,
            });
        }
        if self.dims.len() > MAX_DIMS {
            return Err(Error::config(format!(
                "{} dimensions exceed the {MAX_DIMS} header slots",
                self.dims.len()
            )));
        }
        let mut dims = [0i32; MAX_DIMS];
        for (slot, &dim) in dims.iter_mut().zip(&self.dims) {
            *slot = to_i32(dim)?;
        }

        let total = HEADER_SIZE + self.payload.len();
        let mut writer = BinaryStreamWriter::new(Cursor::new(Vec::with_capacity(total)))?;
        writer.write(to_i32(total)?)?;
        writer.write(self.wire_type.as_i32())?;
        writer.write(to_i32(self.dims.len())?)?;
        writer.write_slice(&dims, MAX_DIMS)?;
        writer.write_bytes(&nul_padded(&self.command, COMMAND_LEN))?;
        writer.write_bytes(&self.payload)?;
        Ok(writer.into_inner()?.into_inner())
    }

    /// Read one message; `context` names the command for error messages
    pub fn read_from<R: Read>(
        source: &mut R,
        context: &str,
        max_payload: usize,
    ) -> std::result::Result<Self, ProtocolError> {
        let receive = |source| ProtocolError::Receive {
            command: context.to_owned(),
            source,
        };
        let malformed = |reason: String| ProtocolError::Malformed {
            command: context.to_owned(),
            reason,
        };

        let mut header = [0u8; HEADER_SIZE];
        source.read_exact(&mut header).map_err(receive)?;
        let (len, tag, ndims, dims, command) =
            parse_header(&header).map_err(|e| malformed(e.to_string()))?;

        let wire_type =
            WireType::from_i32(tag).ok_or_else(|| malformed(format!("unknown type tag {tag}")))?;
        let ndims = usize::try_from(ndims)
            .ok()
            .filter(|&n| n <= MAX_DIMS)
            .ok_or_else(|| malformed(format!("bad dimension count {ndims}")))?;
        let dims = dims[..ndims]
            .iter()
            .map(|&d| usize::try_from(d).map_err(|_| malformed(format!("negative dimension {d}"))))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let payload_len = usize::try_from(len)
            .ok()
            .and_then(|l| l.checked_sub(HEADER_SIZE))
            .ok_or_else(|| malformed(format!("length {len} shorter than header")))?;
        if payload_len > max_payload {
            return Err(malformed(format!(
                "payload of {payload_len} bytes exceeds limit {max_payload}"
            )));
        }

        let mut payload = vec![0u8; payload_len];
        source.read_exact(&mut payload).map_err(receive)?;
        Ok(Self {
            command,
            wire_type,
            dims,
            payload: Bytes::from(payload),
        })
    }

    fn values<T: Scalar>(&self) -> std::result::Result<Vec<T>, ProtocolError> {
        let expected = self.element_count();
        let received = self.payload.len() / T::SIZE;
        if received < expected {
            return Err(ProtocolError::ShortRead {
                command: self.command.clone(),
                expected,
                received,
            });
        }
        let mut reader = BinaryStreamReader::new(Cursor::new(&self.payload[..])).map_err(|e| {
            ProtocolError::Malformed {
                command: self.command.clone(),
                reason: e.to_string(),
            }
        })?;
        reader
            .read_vec(expected)
            .map_err(|e| ProtocolError::Malformed {
                command: self.command.clone(),
                reason: e.to_string(),
            })
    }

    /// Payload as integers
    pub fn as_i32s(&self) -> std::result::Result<Vec<i32>, ProtocolError> {
        self.values()
    }

    /// Payload as single-precision floats
    pub fn as_f32s(&self) -> std::result::Result<Vec<f32>, ProtocolError> {
        self.values()
    }

    /// Payload as double-precision floats
    pub fn as_f64s(&self) -> std::result::Result<Vec<f64>, ProtocolError> {
        self.values()
    }

    /// Payload as text, trailing NULs removed
    #[must_use]
    pub fn as_text(&self) -> String {
        let end = self.element_count().min(self.payload.len());
        String::from_utf8_lossy(&self.payload[..end])
            .trim_end_matches('\0')
            .to_owned()
    }
}

type RawHeader = (i32, i32, i32, Vec<i32>, String);

fn parse_header(raw: &[u8; HEADER_SIZE]) -> Result<RawHeader> {
    let mut reader = BinaryStreamReader::new(Cursor::new(&raw[..]))?;
    let len = reader.read::<i32>()?;
    let tag = reader.read::<i32>()?;
    let ndims = reader.read::<i32>()?;
    let dims = reader.read_vec::<i32>(MAX_DIMS)?;
    let command = reader.read_fixed_string(COMMAND_LEN)?;
    let command = command.split('\0').next().unwrap_or_default().to_owned();
    Ok((len, tag, ndims, dims, command))
}
