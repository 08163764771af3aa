//! Table b-tree cells. Interior cells are a bare (left-child, rowid) pair;
//! leaf cells carry a rowid and a record payload that may overflow.
//! https://www.sqlite.org/fileformat.html#b_tree_pages

use super::cell::{Error as CellError, PayloadRef};
use super::overflow::CellKind;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Error reading table interior cell at offset {0}: {1}")]
    Interior(usize, String),
    #[error(transparent)]
    Payload(#[from] CellError),
    #[error(transparent)]
    Varint(#[from] crate::varint::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct TableInteriorCell {
    pub left_child_page: u32,
    pub rowid: i64,
}

pub fn parse_table_interior_cell(page: &[u8], offset: usize) -> Result<TableInteriorCell, Error> {
    let bytes = page
        .get(offset..offset + 4)
        .ok_or_else(|| Error::Interior(offset, "cell runs past page end".into()))?;
    let left_child_page = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let (rowid, _) = crate::varint::try_read_varint(&page[offset + 4..])
        .map_err(|e| Error::Interior(offset, e.to_string()))?;
    Ok(TableInteriorCell {
        left_child_page,
        rowid,
    })
}

#[derive(Debug, Clone)]
pub struct TableLeafCell {
    pub rowid: i64,
    pub payload: PayloadRef,
    /// Offset just past the last byte this cell occupies on its own page.
    pub cell_end: usize,
}

pub fn parse_table_leaf_cell(page: &[u8], offset: usize, usable_size: usize) -> Result<TableLeafCell, Error> {
    let (_, len_size) = crate::varint::try_read_varint(&page[offset..])?;
    let (rowid, rowid_size) = crate::varint::try_read_varint(&page[offset + len_size..])?;
    let (payload, cell_end) = parse_leaf_payload(page, offset, len_size, rowid_size, usable_size)?;
    Ok(TableLeafCell {
        rowid,
        payload,
        cell_end,
    })
}

fn parse_leaf_payload(
    page: &[u8],
    cell_offset: usize,
    len_varint_size: usize,
    rowid_varint_size: usize,
    usable_size: usize,
) -> Result<(PayloadRef, usize), Error> {
    let (total_len, _) = crate::varint::try_read_varint(&page[cell_offset..])?;
    let body_start = cell_offset + len_varint_size + rowid_varint_size;
    let local_len = super::overflow::local_payload_size(CellKind::TableLeaf, usable_size, total_len as u64);
    let local_end = body_start + local_len;
    if local_end > page.len() {
        return Err(CellError::PayloadRunsPastPage(cell_offset).into());
    }
    let (overflow_page, next) = if (local_len as u64) < total_len as u64 {
        if local_end + 4 > page.len() {
            return Err(CellError::PayloadRunsPastPage(cell_offset).into());
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
