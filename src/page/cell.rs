//! Shared payload-reading logic used by both table and index cells: read
//! the payload-length varint, slice the inline bytes, and detect whether
//! an overflow page number follows.

use super::overflow::{local_payload_size, CellKind};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Could not read payload length varint at offset {0}.")]
    TruncatedPayloadLength(usize),
    #[error("Cell at offset {0} claims a payload longer than the page.")]
    PayloadRunsPastPage(usize),
}

/// The payload portion of a cell: its declared total length, the inline
/// bytes present on this page, and the first overflow page if the payload
/// spilled.
#[derive(Debug, Clone)]
pub struct PayloadRef {
    pub total_len: u64,
    pub local_range: std::ops::Range<usize>,
    pub overflow_page: Option<u32>,
}

/// Reads a payload-length varint followed by `local_len` inline bytes and,
/// if the payload overflowed, a trailing 4-byte overflow page number.
/// `offset` is the position of the length varint; returns the ref plus the
/// offset immediately following everything consumed.
pub fn read_payload(page: &[u8], offset: usize, kind: CellKind, usable_size: usize) -> Result<(PayloadRef, usize), Error> {
    let (total_len, varint_len) =
        crate::varint::try_read_varint(&page[offset..]).map_err(|_| Error::TruncatedPayloadLength(offset))?;
    let total_len = total_len as u64;
    let body_start = offset + varint_len;
    let local_len = local_payload_size(kind, usable_size, total_len);
    let local_end = body_start + local_len;
    if local_end > page.len() {
        return Err(Error::PayloadRunsPastPage(offset));
    }
    let (overflow_page, next) = if (local_len as u64) < total_len {
        if local_end + 4 > page.len() {
            return Err(Error::PayloadRunsPastPage(offset));
        }
        let page_no = u32::from_be_bytes([
            page[local_end],
            page[local_end + 1],
            page[local_end + 2],
            page[local_end + 3],
        ]);
        (Some(page_no), local_end + 4)
    } else {
        (None, local_end)
    };
    Ok((
        PayloadRef {
            total_len,
            local_range: body_start..local_end,
            overflow_page,
        },
        next,
    ))
}
