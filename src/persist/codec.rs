//! Framing shared by the durable event log and checkpoint files.
//!
//! Every entry is a self-describing frame: a version byte, a little-endian
//! length prefix, the serde-JSON payload, and a CRC32 over the payload.
//! Files carry a 5-byte header (magic + version) so a foreign file is
//! rejected before any frame is parsed.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current frame version.
const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying Aether-Sync bridge files.
pub const MAGIC: [u8; 4] = *b"AESY";

/// Length of the file header written by [`write_header`].
pub const HEADER_LEN: u64 = MAGIC.len() as u64 + 1;

/// Checkpoints embed a full emulator state blob; a length prefix beyond this
/// is a corrupt frame, not a real entry.
const MAX_ENTRY_SIZE: usize = 64 * 1024 * 1024;

fn corrupt(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Serializes one value into a framed entry.
///
/// Layout: `[version: 1][len: u32 LE][payload: len bytes JSON][crc32: u32 LE]`.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let payload = serde_json::to_vec(value)
        .map_err(|e| corrupt(format!("frame serialization failed: {e}")))?;

    let len = u32::try_from(payload.len())
        .map_err(|_| corrupt(format!("payload of {} bytes overflows frame", payload.len())))?;

    let mut frame = Vec::with_capacity(payload.len() + 9);
    frame.push(CODEC_VERSION);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&checksum(&payload).to_le_bytes());
    Ok(frame)
}

/// Reads one framed entry, verifying version, length and checksum.
///
/// # Errors
/// Corruption (bad version, oversized length, CRC mismatch), short reads at
/// a torn tail, or a payload that no longer deserializes.
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let version = read_byte(reader)?;
    if version != CODEC_VERSION {
        return Err(corrupt(format!(
            "unsupported frame version {version} (this build reads {CODEC_VERSION})"
        )));
    }

    let len = read_u32(reader)? as usize;
    if len > MAX_ENTRY_SIZE {
        return Err(corrupt(format!(
            "frame length {len} exceeds maximum {MAX_ENTRY_SIZE}"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let stored = read_u32(reader)?;
    let computed = checksum(&payload);
    if stored != computed {
        return Err(corrupt(format!(
            "frame checksum mismatch: stored {stored:08x}, computed {computed:08x}"
        )));
    }

    serde_json::from_slice(&payload)
        .map_err(|e| corrupt(format!("frame deserialization failed: {e}")))
}

/// Write the file header (magic + version).
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])
}

/// Read and validate the file header, returning the version byte.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(corrupt(format!(
            "not a bridge file: magic {magic:?}, expected {MAGIC:?}"
        )));
    }
    read_byte(reader)
}

fn read_byte(reader: &mut impl Read) -> IoResult<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32(reader: &mut impl Read) -> IoResult<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip_simple() {
        let value = "hello, world!".to_string();
        let encoded = encode(&value).unwrap();

        let mut cursor = Cursor::new(encoded);
        let decoded: String = decode(&mut cursor).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn detects_corruption() {
        let value = "turn record payload".to_string();
        let mut encoded = encode(&value).unwrap();

        // Flip a byte in the payload section.
        encoded[10] ^= 0xFF;

        let mut cursor = Cursor::new(encoded);
        let result: IoResult<String> = decode(&mut cursor);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_oversized_entry() {
        let mut bad = vec![CODEC_VERSION];
        bad.extend_from_slice(&(200_000_000u32).to_le_bytes());

        let mut cursor = Cursor::new(bad);
        let result: IoResult<String> = decode(&mut cursor);
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut encoded = encode(&"x".to_string()).unwrap();
        encoded[0] = 9;

        let mut cursor = Cursor::new(encoded);
        let result: IoResult<String> = decode(&mut cursor);
        assert!(result.unwrap_err().to_string().contains("frame version"));
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut cursor = Cursor::new(b"NOPE\x01".to_vec());
        assert!(read_header(&mut cursor).is_err());
    }

    #[test]
    fn truncated_frame_is_a_short_read() {
        let encoded = encode(&"a longer payload for truncation".to_string()).unwrap();
        let cut = encoded.len() - 6;

        let mut cursor = Cursor::new(encoded[..cut].to_vec());
        let result: IoResult<String> = decode(&mut cursor);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn header_round_trip() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);

        let mut cursor = Cursor::new(buf);
        let version = read_header(&mut cursor).unwrap();
        assert_eq!(version, CODEC_VERSION);
    }
}
