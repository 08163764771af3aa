//! The carver (C8): recovers deleted-record remnants from a table-leaf
//! page's freeblocks and from its unallocated span, guided by a table
//! signature. Every individual carve attempt is local and silent per the
//! error-handling design: a failed trial produces no cell, never a
//! propagated error (see `Error` below, which only covers genuine
//! page-fetch failures in [`Carver`], not carve-attempt rejections).

use std::collections::HashSet;
use std::ops::Range;

use crate::fingerprint::Fingerprint;
use crate::history;
use crate::page::{self, Freeblock};
use crate::serial_type::{self, TextEncoding, Value};
use crate::signature::TableSignature;
use crate::varint;
use crate::version::VersionChain;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Version(#[from] crate::version::Error),
    #[error(transparent)]
    Page(#[from] page::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarveKind {
    Freeblock,
    Unallocated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CarvedColumn {
    pub serial_type: i64,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CarvedCell {
    pub kind: CarveKind,
    pub page_number: u32,
    pub start_offset: usize,
    pub end_offset: usize,
    pub truncated: bool,
    /// Always `None` for freeblock-carved cells: the payload-length and
    /// rowid varints occupy exactly the bytes the freelist overwrites
    /// with its next-pointer and size fields, so they cannot be recovered
    /// (see the worked delete-and-carve scenario).
    pub rowid: Option<i64>,
    pub columns: Vec<CarvedColumn>,
}

fn header_serial_types(buf: &[u8]) -> Option<(usize, usize, Vec<i64>)> {
    let (header_length, hl_len) = varint::try_read_varint(buf).ok()?;
    let header_length = header_length as usize;
    if header_length < hl_len || header_length > buf.len() {
        return None;
    }
    let mut offset = hl_len;
    let mut serial_types = Vec::new();
    while offset < header_length {
        let (serial_type, len) = varint::try_read_varint(&buf[offset..]).ok()?;
        serial_types.push(serial_type);
        offset += len;
    }
    if offset != header_length {
        return None;
    }
    Some((header_length, hl_len, serial_types))
}

/// Checks a header's serial types against `signature` column by column.
/// A mismatch at column `k` truncates the cell to columns `0..k`; the
/// body must still fit the carved region, or the cut moves earlier still.
/// Returns `None` only when not even one column can be accepted.
fn accept_against_signature(
    serial_types: &[i64],
    body: &[u8],
    column_offset: usize,
    signature: &TableSignature,
    encoding: TextEncoding,
) -> Option<(bool, Vec<CarvedColumn>, usize)> {
    let mut columns = Vec::new();
    let mut body_offset = 0usize;
    for (i, &serial_type) in serial_types.iter().enumerate() {
        let column_index = column_offset + i;
        if !signature.column_allows(column_index, serial_type) {
            return if i == 0 { None } else { Some((true, columns, body_offset)) };
        }
        let len = serial_type::content_length(serial_type);
        if body_offset + len > body.len() {
            return if i == 0 { None } else { Some((true, columns, body_offset)) };
        }
        let value = serial_type::to_value(serial_type, &body[body_offset..body_offset + len], encoding).ok();
        columns.push(CarvedColumn { serial_type, value });
        body_offset += len;
    }
    Some((false, columns, body_offset))
}

/// Attempts to carve one cell from a single freeblock. The first 4 bytes
/// of the freeblock (the next-pointer and size fields) are skipped; the
/// remainder is tried as a record header plus body.
pub fn carve_freeblock(page_bytes: &[u8], page_number: u32, fb: &Freeblock, signature: &TableSignature, encoding: TextEncoding) -> Option<CarvedCell> {
    if fb.size < 6 {
        return None;
    }
    let region_start = fb.offset + 4;
    let region_end = (fb.offset + fb.size).min(page_bytes.len());
    if region_start >= region_end {
        return None;
    }
    let buf = &page_bytes[region_start..region_end];
    let (header_length, _hl_len, serial_types) = header_serial_types(buf)?;
    let body = &buf[header_length..];
    let (truncated, columns, body_len) = accept_against_signature(&serial_types, body, 0, signature, encoding)?;
    Some(CarvedCell {
        kind: CarveKind::Freeblock,
        page_number,
        start_offset: region_start,
        end_offset: region_start + header_length + body_len,
        truncated,
        rowid: None,
        columns,
    })
}

pub fn carve_freeblocks(page_bytes: &[u8], page_number: u32, freeblocks: &[Freeblock], signature: &TableSignature, encoding: TextEncoding) -> Vec<CarvedCell> {
    freeblocks.iter().filter_map(|fb| carve_freeblock(page_bytes, page_number, fb, signature, encoding)).collect()
}

/// Tries a fully-intact deleted cell anchored at `start`: payload-length
/// varint, rowid varint, record header, and body, all present and valid.
fn try_full_cell_at(page_bytes: &[u8], page_number: u32, start: usize, region_end: usize, signature: &TableSignature, encoding: TextEncoding) -> Option<CarvedCell> {
    let slice = page_bytes.get(start..region_end)?;
    let (_payload_len, pl_len) = varint::try_read_varint(slice).ok()?;
    let (rowid, rid_len) = varint::try_read_varint(slice.get(pl_len..)?).ok()?;
    let header_start = pl_len + rid_len;
    let header_buf = slice.get(header_start..)?;
    let (header_length, _hl_len, serial_types) = header_serial_types(header_buf)?;
    if serial_types.len() != signature.column_count() {
        return None;
    }
    let body = header_buf.get(header_length..)?;
    let (truncated, columns, body_len) = accept_against_signature(&serial_types, body, 0, signature, encoding)?;
    if truncated {
        return None;
    }
    Some(CarvedCell {
        kind: CarveKind::Unallocated,
        page_number,
        start_offset: start,
        end_offset: start + header_start + header_length + body_len,
        truncated: false,
        rowid: Some(rowid),
        columns,
    })
}

/// Recovers a cell whose leading `k` columns (and their header entries)
/// were clobbered by a later, larger cell, leaving only the serial-type
/// varints and bodies of the trailing `column_count - k` columns intact
/// and contiguous. The recovered tail is required to exactly fill
/// `[start, region_end)`: without the original header there is no other
/// signal for where the cell's true end lay.
fn try_tail_at(page_bytes: &[u8], page_number: u32, start: usize, region_end: usize, lost_columns: usize, signature: &TableSignature, encoding: TextEncoding) -> Option<CarvedCell> {
    let remaining = signature.column_count().checked_sub(lost_columns)?;
    if remaining == 0 {
        return None;
    }
    let buf = page_bytes.get(start..region_end)?;
    let mut offset = 0usize;
    let mut serial_types = Vec::with_capacity(remaining);
    for _ in 0..remaining {
        let (serial_type, len) = varint::try_read_varint(buf.get(offset..)?).ok()?;
        serial_types.push(serial_type);
        offset += len;
    }
    let body = buf.get(offset..)?;
    let (truncated, columns, body_len) = accept_against_signature(&serial_types, body, lost_columns, signature, encoding)?;
    if truncated || body_len != body.len() {
        return None;
    }
    // An all-NULL tail is indistinguishable from an unwritten (zero-filled)
    // region and carries no recovered content; require at least one column
    // with actual bytes so zero-fill doesn't masquerade as a deleted cell.
    if serial_types.iter().all(|&st| st == 0) {
        return None;
    }
    Some(CarvedCell {
        kind: CarveKind::Unallocated,
        page_number,
        start_offset: start,
        end_offset: region_end,
        truncated: true,
        rowid: None,
        columns,
    })
}

/// Walks a page's unallocated span (between the cell pointer array and
/// `cell_content_start`) backwards looking for intact deleted cells, then
/// falls back to a truncated-tail search for a partially overwritten one.
pub fn carve_unallocated(page_bytes: &[u8], page_number: u32, region: Range<usize>, signature: &TableSignature, encoding: TextEncoding) -> Vec<CarvedCell> {
    let mut cells = Vec::new();
    let mut claimed_from = region.end;
    let mut offset = region.end;
    while offset > region.start {
        offset -= 1;
        if offset >= claimed_from {
            continue;
        }
        if let Some(cell) = try_full_cell_at(page_bytes, page_number, offset, claimed_from, signature, encoding) {
            claimed_from = offset;
            cells.push(cell);
        }
    }

    let column_count = signature.column_count();
    'search: for start in region.start..claimed_from {
        for lost in 1..column_count {
            if let Some(cell) = try_tail_at(page_bytes, page_number, start, claimed_from, lost, signature, encoding) {
                cells.push(cell);
                break 'search;
            }
        }
    }
    cells
}

/// Drops carved cells whose byte range fingerprint matches a live cell on
/// the same page: the carve found a cell that is still allocated, not a
/// deleted remnant.
pub fn suppress_duplicates(cells: Vec<CarvedCell>, page_bytes: &[u8], live_fingerprints: &HashSet<(u32, Fingerprint)>) -> Vec<CarvedCell> {
    cells
        .into_iter()
        .filter(|c| {
            let fp = Fingerprint::of(&page_bytes[c.start_offset..c.end_offset]);
            !live_fingerprints.contains(&(c.page_number, fp))
        })
        .collect()
}

/// Carves every table-leaf page of one table's version, against one
/// signature, implementing [`history::CellCarver`] so a `HistoryIterator`
/// can interleave carved cells into its `Commit` events.
pub struct Carver<'c> {
    chain: &'c VersionChain,
    signature: TableSignature,
    encoding: TextEncoding,
    carve_freelists: bool,
}

impl<'c> Carver<'c> {
    pub fn new(chain: &'c VersionChain, signature: TableSignature, encoding: TextEncoding, carve_freelists: bool) -> Carver<'c> {
        Carver {
            chain,
            signature,
            encoding,
            carve_freelists,
        }
    }

    fn carve_table_leaf(&self, page_bytes: &[u8], page_number: u32) -> Vec<CarvedCell> {
        let Ok(parsed) = page::parse(page_bytes, page_number) else {
            return Vec::new();
        };
        if parsed.header.page_type != page::PageType::TableLeaf {
            return Vec::new();
        }
        let mut cells = carve_freeblocks(page_bytes, page_number, &parsed.freeblocks, &self.signature, self.encoding);
        cells.extend(carve_unallocated(
            page_bytes,
            page_number,
            parsed.unallocated_start..parsed.unallocated_end,
            &self.signature,
            self.encoding,
        ));
        cells
    }
}

fn to_history_cells(cells: Vec<CarvedCell>, page_bytes: &[u8]) -> Vec<history::CarvedCell> {
    cells
        .into_iter()
        .map(|c| history::CarvedCell {
            page_number: c.page_number,
            start_offset: c.start_offset,
            kind: match c.kind {
                CarveKind::Freeblock => history::CarveKind::Freeblock,
                CarveKind::Unallocated => history::CarveKind::Unallocated,
            },
            truncated: c.truncated,
            fingerprint: Fingerprint::of(&page_bytes[c.start_offset..c.end_offset]),
        })
        .collect()
}

impl<'c> history::CellCarver for Carver<'c> {
    fn carve_page(&mut self, version_index: usize, page_number: u32) -> Vec<history::CarvedCell> {
        let Ok(page_bytes) = self.chain.page(version_index, page_number) else {
            return Vec::new();
        };
        to_history_cells(self.carve_table_leaf(&page_bytes, page_number), &page_bytes)
    }

    fn freelist_leaf_pages(&self, version_index: usize) -> Vec<u32> {
        if !self.carve_freelists {
            return Vec::new();
        }
        self.chain.freelist_leaf_pages(version_index).unwrap_or_default()
    }

    fn carve_freelist_page(&mut self, version_index: usize, page_number: u32) -> Vec<history::CarvedCell> {
        let Ok(page_bytes) = self.chain.page(version_index, page_number) else {
            return Vec::new();
        };
        // Freelist-leaf pages have no b-tree structure at all; every byte
        // past page 0 is unallocated and a carving target like any other
        // freed page.
        let cells = carve_unallocated(&page_bytes, page_number, 0..page_bytes.len(), &self.signature, self.encoding);
        to_history_cells(cells, &page_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Affinity, ColumnDef, ObjectKind, SchemaObject};
    use crate::signature::schema_signature;

    fn int_text_table() -> SchemaObject {
        SchemaObject {
            kind: ObjectKind::Table,
            name: "t".into(),
            table_name: "t".into(),
            root_page: 2,
            sql: Some("CREATE TABLE t (a INTEGER, b TEXT)".into()),
            columns: vec![
                ColumnDef {
                    name: "a".into(),
                    declared_type: "INTEGER".into(),
                    affinity: Affinity::Integer,
                    not_null: false,
                    is_integer_primary_key: false,
                },
                ColumnDef {
                    name: "b".into(),
                    declared_type: "TEXT".into(),
                    affinity: Affinity::Text,
                    not_null: false,
                    is_integer_primary_key: false,
                },
            ],
            without_rowid: false,
            module_name: None,
            module_arguments: Vec::new(),
        }
    }

    // record body for (a=NULL, b='hello'): header_length=3, serial types [0, 23]
    fn deleted_cell_bytes(rowid: u8, payload_len: u8) -> Vec<u8> {
        let mut bytes = vec![payload_len, rowid, 0x03, 0x00, 23 /* "hello": len 5 -> 2*5+13=23 */];
        bytes.extend_from_slice(b"hello");
        bytes
    }

    /// Same record, but with a deliberately 4-byte (redundantly encoded)
    /// rowid varint so that payload-length + rowid together occupy
    /// exactly the 4 bytes a freeblock's next-pointer/size fields clobber,
    /// leaving the record header's own bytes untouched from that point on.
    fn deleted_cell_bytes_with_four_byte_prefix() -> Vec<u8> {
        let mut bytes = vec![0x09, 0x80, 0x80, 0x01, 0x03, 0x00, 23];
        bytes.extend_from_slice(b"hello");
        bytes
    }

    #[test]
    fn carves_a_cell_from_a_freeblock_with_unknown_rowid() {
        let table = int_text_table();
        let signature = schema_signature(&table).unwrap();
        let cell = deleted_cell_bytes_with_four_byte_prefix();

        let mut page = vec![0_u8; 64];
        let fb_offset = 20usize;
        page[fb_offset..fb_offset + cell.len()].copy_from_slice(&cell);
        // overwrite the first 4 bytes (payload-length + rowid varints)
        // with a freeblock next-pointer/size pair, as a real delete would.
        page[fb_offset..fb_offset + 2].copy_from_slice(&0_u16.to_be_bytes());
        page[fb_offset + 2..fb_offset + 4].copy_from_slice(&(cell.len() as u16).to_be_bytes());

        let fb = Freeblock { offset: fb_offset, size: cell.len() };
        let carved = carve_freeblock(&page, 3, &fb, &signature, TextEncoding::Utf8).unwrap();
        assert_eq!(carved.kind, CarveKind::Freeblock);
        assert!(!carved.truncated);
        assert!(carved.rowid.is_none());
        pretty_assertions::assert_eq!(
            carved.columns,
            vec![
                CarvedColumn { serial_type: 0, value: Some(Value::Null) },
                CarvedColumn { serial_type: 23, value: Some(Value::Text("hello".into())) },
            ]
        );
    }

    #[test]
    fn recovers_an_intact_cell_from_unallocated_space() {
        let table = int_text_table();
        let signature = schema_signature(&table).unwrap();
        let cell = deleted_cell_bytes(5, 9);

        let mut page = vec![0_u8; 64];
        let start = 10usize;
        page[start..start + cell.len()].copy_from_slice(&cell);

        let carved = carve_unallocated(&page, 4, start..(start + cell.len() + 6), &signature, TextEncoding::Utf8);
        let full = carved.iter().find(|c| !c.truncated).expect("expected one intact cell");
        assert_eq!(full.rowid, Some(5));
        assert_eq!(full.columns[1].value, Some(Value::Text("hello".into())));
    }

    #[test]
    fn recovers_a_truncated_tail_after_a_partial_overwrite() {
        let table = int_text_table();
        let signature = schema_signature(&table).unwrap();
        let cell = deleted_cell_bytes(5, 9);

        let mut page = vec![0_u8; 64];
        let start = 10usize;
        page[start..start + cell.len()].copy_from_slice(&cell);
        // Overwrite the payload-length varint, rowid varint, and header
        // length byte (the first 3 bytes) with unrelated data, as a later
        // larger insert would when it reclaims the front of this space.
        page[start] = 0xaa;
        page[start + 1] = 0xbb;
        page[start + 2] = 0xcc;

        let region_end = start + cell.len();
        let carved = carve_unallocated(&page, 4, start..region_end, &signature, TextEncoding::Utf8);
        let tail = carved.iter().find(|c| c.truncated).expect("expected a truncated recovery");
        assert!(tail.rowid.is_none());
        assert_eq!(tail.columns.len(), 1);
        assert_eq!(tail.columns[0].value, Some(Value::Text("hello".into())));
    }

    #[test]
    fn suppresses_cells_matching_a_live_fingerprint() {
        let page_bytes = vec![1_u8, 2, 3, 4];
        let fp = Fingerprint::of(&page_bytes[0..4]);
        let carved = vec![CarvedCell {
            kind: CarveKind::Freeblock,
            page_number: 1,
            start_offset: 0,
            end_offset: 4,
            truncated: false,
            rowid: None,
            columns: Vec::new(),
        }];
        let mut live = HashSet::new();
        live.insert((1_u32, fp));
        assert!(suppress_duplicates(carved, &page_bytes, &live).is_empty());
    }
}
