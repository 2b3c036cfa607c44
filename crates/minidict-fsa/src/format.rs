// Dictionary file framing: magic cookies and the properties block.
//
// A serialized dictionary starts with two magic u32 cookies (little-endian),
// a u32 length, and a JSON-encoded properties block, followed by the arena
// payload (label array, then cell array) and the value store's own section.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::FsaError;

/// File magic (little-endian u32 pair).
const COOKIE1: u32 = 0x0001_AF5A;
const COOKIE2: u32 = 0x0002_D1C7;

/// Current version of the transition-cell encoding.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed-size part of the header: two cookies plus the properties length.
pub const HEADER_PREFIX_SIZE: usize = 12;

/// Out-of-band dictionary metadata, written once at `write()` time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryProperties {
    /// Transition-cell encoding version.
    pub version: u32,
    /// Offset of the automaton's start state.
    pub start_state: u64,
    /// Number of keys fed into the generator.
    pub key_count: u64,
    /// Number of distinct persisted states.
    pub state_count: u64,
    /// Number of slots in the serialized arena.
    pub arena_size: u64,
    /// Identifier of the value store that wrote the value section.
    pub value_store: String,
    /// Free-form caller-supplied manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
}

/// Write the magic cookies and the JSON properties block.
pub fn write_header<W: Write>(sink: &mut W, properties: &DictionaryProperties) -> Result<(), FsaError> {
    let json = serde_json::to_vec(properties).map_err(std::io::Error::other)?;
    sink.write_all(&COOKIE1.to_le_bytes())?;
    sink.write_all(&COOKIE2.to_le_bytes())?;
    sink.write_all(&(json.len() as u32).to_le_bytes())?;
    sink.write_all(&json)?;
    Ok(())
}

/// Parse a header produced by [`write_header`], returning the properties and
/// the offset at which the arena payload starts.
pub fn parse_header(data: &[u8]) -> Result<(DictionaryProperties, usize), FsaError> {
    let too_short = || {
        FsaError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "dictionary header truncated",
        ))
    };
    if data.len() < HEADER_PREFIX_SIZE {
        return Err(too_short());
    }
    let cookie1 = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let cookie2 = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if cookie1 != COOKIE1 || cookie2 != COOKIE2 {
        return Err(FsaError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "invalid dictionary magic",
        )));
    }
    let json_len = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
    let end = HEADER_PREFIX_SIZE + json_len;
    if data.len() < end {
        return Err(too_short());
    }
    let properties: DictionaryProperties =
        serde_json::from_slice(&data[HEADER_PREFIX_SIZE..end]).map_err(std::io::Error::other)?;
    Ok((properties, end))
}
