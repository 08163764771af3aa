//! Index b-tree cells. Both interior and leaf index cells carry a key
//! record payload (no rowid field); interior cells additionally carry a
//! left-child page number.
//! https://www.sqlite.org/fileformat.html#b_tree_pages

use super::cell::{Error as CellError, PayloadRef};
use super::overflow::CellKind;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Error reading index interior cell at offset {0}: {1}")]
    Interior(usize, String),
    #[error(transparent)]
    Payload(#[from] CellError),
    #[error(transparent)]
    Varint(#[from] crate::varint::Error),
}

fn parse_payload(page: &[u8], body_offset: usize, len_varint_size: usize, usable_size: usize) -> Result<(PayloadRef, usize), Error> {
    let (total_len, _) = crate::varint::try_read_varint(&page[body_offset..])?;
    let body_start = body_offset + len_varint_size;
    let local_len = super::overflow::local_payload_size(CellKind::IndexInteriorOrLeaf, usable_size, total_len as u64);
    let local_end = body_start + local_len;
    if local_end > page.len() {
        return Err(CellError::PayloadRunsPastPage(body_offset).into());
    }
    let (overflow_page, next) = if (local_len as u64) < total_len as u64 {
        if local_end + 4 > page.len() {
            return Err(CellError::PayloadRunsPastPage(body_offset).into());
        }
        let p = u32::from_be_bytes([page[local_end], page[local_end + 1], page[local_end + 2], page[local_end + 3]]);
        (Some(p), local_end + 4)
    } else {
        (None, local_end)
    };
    Ok((
        PayloadRef {
            total_len: total_len as u64,
            local_range: body_start..local_end,
            overflow_page,
        },
        next,
    ))
}

#[derive(Debug, Clone)]
pub struct IndexLeafCell {
    pub payload: PayloadRef,
    pub cell_end: usize,
}

pub fn parse_index_leaf_cell(page: &[u8], offset: usize, usable_size: usize) -> Result<IndexLeafCell, Error> {
    let (_, len_size) = crate::varint::try_read_varint(&page[offset..])?;
    let (payload, cell_end) = parse_payload(page, offset, len_size, usable_size)?;
    Ok(IndexLeafCell { payload, cell_end })
}

#[derive(Debug, Clone)]
pub struct IndexInteriorCell {
    pub left_child_page: u32,
    pub payload: PayloadRef,
    pub cell_end: usize,
}

pub fn parse_index_interior_cell(page: &[u8], offset: usize, usable_size: usize) -> Result<IndexInteriorCell, Error> {
    let bytes = page
        .get(offset..offset + 4)
        .ok_or_else(|| Error::Interior(offset, "cell runs past page end".into()))?;
    let left_child_page = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let body_offset = offset + 4;
    let (_, len_size) = crate::varint::try_read_varint(&page[body_offset..])?;
    let (payload, cell_end) = parse_payload(page, body_offset, len_size, usable_size)?;
    Ok(IndexInteriorCell {
        left_child_page,
        payload,
        cell_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_an_inline_index_leaf_cell() {
        let mut page = vec![0_u8; 32];
        page[0] = 4;
        page[1..5].copy_from_slice(b"key!");
        let cell = parse_index_leaf_cell(&page, 0, 4096).unwrap();
        assert_eq!(cell.payload.total_len, 4);
        assert_eq!(&page[cell.payload.local_range.clone()], b"key!");
        assert_eq!(cell.cell_end, 5);
    }

    #[test]
    fn parses_an_index_interior_cell() {
        let mut page = vec![0_u8; 32];
        page[0..4].copy_from_slice(&3_u32.to_be_bytes());
        page[4] = 3;
        page[5..8].copy_from_slice(b"abc");
        let cell = parse_index_interior_cell(&page, 0, 4096).unwrap();
        assert_eq!(cell.left_child_page, 3);
        assert_eq!(cell.payload.total_len, 3);
        assert_eq!(&page[cell.payload.local_range.clone()], b"abc");
    }
}
