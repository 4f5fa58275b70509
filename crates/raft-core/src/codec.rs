//! # codec
//!
//! why: turn log entries into the exact bytes that are replicated and journaled
//! relations: used by the command pipeline (encode stage), the follower writer and journal replay
//! what: length-prefixed binary encoding of LogEntry, block-at-a-time decoding
//!
//! layout of one block:
//!
//! ```text
//! [body_len: varint]
//!   [term: u64 le][index: u64 le]
//!   [type_len: u32 le][type: utf-8]
//!   [command_len: u32 le][command]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::log::LogEntry;

const FIXED_BODY_LEN: usize = 8 + 8 + 4 + 4;
const MAX_VARINT_LEN: usize = 10;

/// Encode an entry as a single length-prefixed block.
pub fn encode(entry: &LogEntry) -> Bytes {
    let mut buf = BytesMut::with_capacity(MAX_VARINT_LEN + body_len(entry));
    encode_into(entry, &mut buf);
    buf.freeze()
}

/// Append the encoded block for `entry` to `buf`.
pub fn encode_into(entry: &LogEntry, buf: &mut BytesMut) {
    put_varint(buf, body_len(entry) as u64);
    buf.put_u64_le(entry.term);
    buf.put_u64_le(entry.index);
    buf.put_u32_le(entry.command_type.len() as u32);
    buf.put_slice(entry.command_type.as_bytes());
    buf.put_u32_le(entry.command.len() as u32);
    buf.put_slice(&entry.command);
}

/// Decode a buffer holding exactly one block.
pub fn decode(buf: &[u8]) -> Result<LogEntry, CodecError> {
    let (entry, consumed) = decode_from(buf)?;
    match buf.len() - consumed {
        0 => Ok(entry),
        extra => Err(CodecError::TrailingBytes(extra)),
    }
}

/// Decode the first block of `buf`, returning the entry and the bytes it spanned.
///
/// Used to walk a sequence of concatenated blocks such as a journal file.
pub fn decode_from(buf: &[u8]) -> Result<(LogEntry, usize), CodecError> {
    let mut cursor = buf;
    let body_len = get_varint(&mut cursor)?;
    let prefix_len = buf.len() - cursor.len();

    let body_len = usize::try_from(body_len).map_err(|_| CodecError::BadLengthPrefix)?;
    ensure(cursor, body_len)?;
    let mut body = &cursor[..body_len];

    ensure(body, FIXED_BODY_LEN - 4)?;
    let term = body.get_u64_le();
    let index = body.get_u64_le();

    let type_len = body.get_u32_le() as usize;
    ensure(body, type_len)?;
    let command_type = std::str::from_utf8(&body[..type_len])
        .map_err(|_| CodecError::InvalidCommandType)?
        .to_owned();
    body.advance(type_len);

    ensure(body, 4)?;
    let command_len = body.get_u32_le() as usize;
    ensure(body, command_len)?;
    let command = Bytes::copy_from_slice(&body[..command_len]);
    body.advance(command_len);

    if !body.is_empty() {
        return Err(CodecError::TrailingBytes(body.len()));
    }

    let entry = LogEntry {
        term,
        index,
        command_type,
        command,
    };
    Ok((entry, prefix_len + body_len))
}

fn body_len(entry: &LogEntry) -> usize {
    FIXED_BODY_LEN + entry.command_type.len() + entry.command.len()
}

fn ensure(buf: &[u8], needed: usize) -> Result<(), CodecError> {
    if buf.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn get_varint(buf: &mut &[u8]) -> Result<u64, CodecError> {
    let mut value = 0u64;
    for i in 0..MAX_VARINT_LEN {
        if buf.is_empty() {
            return Err(CodecError::Truncated {
                needed: 1,
                available: 0,
            });
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CodecError::BadLengthPrefix)
}
