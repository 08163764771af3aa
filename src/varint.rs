//! SQLite's 1-9 byte big-endian variable-length integer, forward and reverse.
//!
//! Forward decoding is used everywhere a cell or record is read normally:
//! the format never rejects a well-formed 9-byte read, so reading one is
//! infallible given a long-enough slice, and is delegated to the
//! `sqlite_varint` crate `erictune-diydb`'s own record reader uses
//! (`sqlite_varint::read_varint`, see `record.rs`). Reverse decoding is
//! only ever needed by the carver, walking backward from a byte whose
//! position is known but whose start is not; it can fail, and failure
//! there is ordinary, not exceptional (see `carve.rs`), and is new to
//! this crate so stays local.

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("Varint read ran past the end of the available bytes.")]
    Truncated,
    #[error("More than 8 continuation bytes precede this position; a 9-byte varint cannot be reliably recovered in reverse.")]
    InvalidVarInt,
}

/// Reads a varint starting at `buf[0]`. Returns `(value, length)` with
/// `length` in `1..=9`. Panics if `buf` is empty; callers always hold a
/// page- or record-bounded slice that is long enough, the same assumption
/// `erictune-diydb`'s cell/record iterators make.
pub fn read_varint(buf: &[u8]) -> (i64, usize) {
    sqlite_varint::read_varint(buf)
}

/// Bounds-checked forward varint read, for carving contexts where the
/// buffer might end mid-varint. Checks bounds byte-by-byte (`sqlite_varint`
/// has no fallible variant) then hands the now-known-valid prefix to
/// `sqlite_varint::read_varint` for the actual decode.
pub fn try_read_varint(buf: &[u8]) -> Result<(i64, usize), Error> {
    for i in 0..8 {
        let byte = *buf.get(i).ok_or(Error::Truncated)?;
        if byte & 0x80 == 0 {
            return Ok(sqlite_varint::read_varint(&buf[..=i]));
        }
    }
    buf.get(8).ok_or(Error::Truncated)?;
    Ok(sqlite_varint::read_varint(&buf[..9]))
}

/// Recovers a varint by walking backward from `end_offset`, the index of
/// its last byte (inclusive), within `buf`. Used only by the carver to
/// recover a payload-length or rowid varint that precedes a known byte
/// (e.g. the first byte of a record header found inside a freeblock).
///
/// Returns `(value, length)`. Fails with `InvalidVarInt` when the varint
/// would need a 9th continuation byte, since forward encoding's 9th byte
/// carries no continuation bit and so cannot be told apart from an 8-byte
/// varint's last byte by scanning backward alone.
pub fn read_varint_reverse(buf: &[u8], end_offset: usize) -> Result<(i64, usize), Error> {
    if end_offset >= buf.len() {
        return Err(Error::Truncated);
    }
    let mut len = 1usize;
    let mut start = end_offset;
    while len < 8 && start > 0 && (buf[start - 1] & 0x80) != 0 {
        start -= 1;
        len += 1;
    }
    // A genuine 8-byte varint's first byte still carries a continuation
    // bit (only the 9th, unconditional byte would follow it); if the byte
    // before our 8-byte window also looks like a continuation byte, the
    // true encoding is 9 bytes and cannot be told apart from here.
    if len == 8 && start > 0 && (buf[start - 1] & 0x80) != 0 {
        return Err(Error::InvalidVarInt);
    }
    let (value, decoded_len) = read_varint(&buf[start..=end_offset]);
    debug_assert_eq!(decoded_len, len);
    Ok((value, len))
}
