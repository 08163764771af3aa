//! The version-history iterator (C6): for one table, walks the version
//! chain in order and emits a [`Commit`] per version describing what
//! changed relative to the previous version's cells.
//!
//! It is one-shot, forward-only, and lazy: only the previous version's
//! working set of `(rowid -> Fingerprint)` is retained, not the cells
//! themselves, per the version-history design note.

use std::collections::{HashMap, HashSet};

use crate::fingerprint::Fingerprint;
use crate::schema::SchemaObject;
use crate::version::VersionChain;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Table {0:?} is not an ordinary rowid table and has no cell-level history.")]
    NotACellLevelTable(String),
    #[error(transparent)]
    Version(#[from] crate::version::Error),
}

/// Supplies carved cells for a page at a version, once a signature exists
/// for the table being iterated. The history iterator only needs enough
/// from a carved cell to report and de-duplicate it; the carver (C8) owns
/// the actual column decoding.
pub trait CellCarver {
    fn carve_page(&mut self, version_index: usize, page_number: u32) -> Vec<CarvedCell>;

    /// Freelist-leaf page numbers to carve as whole unallocated regions,
    /// for carvers configured to scan the freelist. Default: none, for
    /// carvers that only ever look at a table's own reachable pages.
    fn freelist_leaf_pages(&self, version_index: usize) -> Vec<u32> {
        let _ = version_index;
        Vec::new()
    }

    /// Carves one freelist-leaf page, treating its entire content as an
    /// unallocated region (freelist leaves have no b-tree structure).
    fn carve_freelist_page(&mut self, version_index: usize, page_number: u32) -> Vec<CarvedCell> {
        let _ = (version_index, page_number);
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarveKind {
    Freeblock,
    Unallocated,
}

#[derive(Debug, Clone)]
pub struct CarvedCell {
    pub page_number: u32,
    pub start_offset: usize,
    pub kind: CarveKind,
    pub truncated: bool,
    pub fingerprint: Fingerprint,
}

/// A cell as tracked across versions: its location (to re-fingerprint the
/// byte range) and fingerprint as last observed.
#[derive(Debug, Clone)]
struct TrackedCell {
    page_number: u32,
    offset: usize,
    fingerprint: Fingerprint,
}

#[derive(Debug, Clone)]
pub struct CellDelta {
    pub rowid: i64,
    pub page_number: u32,
    pub offset: usize,
}

/// One version's worth of change for a table, relative to the version
/// immediately before it (or, for version 0, relative to nothing: every
/// cell present is reported as added).
#[derive(Debug, Clone)]
pub struct Commit {
    pub version_index: usize,
    pub pages: Vec<u32>,
    pub added_cells: Vec<CellDelta>,
    pub updated_cells: Vec<CellDelta>,
    pub removed_cells: Vec<CellDelta>,
    pub carved_cells: Vec<CarvedCell>,
    pub updated_root_b_tree_page_numbers: Vec<u32>,
}

/// Walks the version chain for one table's root b-tree, producing a
/// [`Commit`] per version. Construct with [`HistoryIterator::new`] and
/// drive with the standard `Iterator` trait.
pub struct HistoryIterator<'c> {
    chain: &'c VersionChain,
    table: SchemaObject,
    carver: Option<Box<dyn CellCarver + 'c>>,
    next_version: usize,
    previous_pages: HashSet<u32>,
    previous_cells: HashMap<i64, TrackedCell>,
    done: bool,
}

impl<'c> HistoryIterator<'c> {
    /// `table` must be carvable in the cell-level sense: an ordinary
    /// rowid table with SQL (see [`SchemaObject::is_carvable`]). Tables
    /// that are `WITHOUT ROWID`, virtual, or internal-without-SQL only
    /// ever report page-level deltas; callers should not construct a
    /// `HistoryIterator` for them for cell-level detail.
    pub fn new(chain: &'c VersionChain, table: SchemaObject, carver: Option<Box<dyn CellCarver + 'c>>) -> HistoryIterator<'c> {
        HistoryIterator {
            chain,
            table,
            carver,
            next_version: 0,
            previous_pages: HashSet::new(),
            previous_cells: HashMap::new(),
            done: false,
        }
    }

    fn commit_for(&mut self, version_index: usize) -> Result<Commit, Error> {
        let scan = self.chain.scan_table(version_index, self.table.root_page)?;
        let pages: Vec<u32> = scan.pages.clone();
        let current_page_set: HashSet<u32> = pages.iter().copied().collect();

        let mut added_cells = Vec::new();
        let mut updated_cells = Vec::new();
        let mut current_cells: HashMap<i64, TrackedCell> = HashMap::new();

        if self.table.without_rowid {
            // Page-level deltas only; no per-cell tracking for WITHOUT ROWID tables.
        } else {
            for leaf in &scan.leaf_cells {
                let page_bytes = self.chain.page(version_index, leaf.page_number)?;
                let cell_end = leaf
                    .cell
                    .payload
                    .local_range
                    .end
                    .max(leaf.offset)
                    .min(page_bytes.len());
                let fingerprint = Fingerprint::of(&page_bytes[leaf.offset..cell_end]);
                let tracked = TrackedCell {
                    page_number: leaf.page_number,
                    offset: leaf.offset,
                    fingerprint,
                };

                match self.previous_cells.get(&leaf.cell.rowid) {
                    None => added_cells.push(CellDelta {
                        rowid: leaf.cell.rowid,
                        page_number: leaf.page_number,
                        offset: leaf.offset,
                    }),
                    Some(prev) if prev.fingerprint != fingerprint => updated_cells.push(CellDelta {
                        rowid: leaf.cell.rowid,
                        page_number: leaf.page_number,
                        offset: leaf.offset,
                    }),
                    Some(_) => {}
                }
                current_cells.insert(leaf.cell.rowid, tracked);
            }
        }

        let removed_cells: Vec<CellDelta> = self
            .previous_cells
            .iter()
            .filter(|(rowid, _)| !current_cells.contains_key(rowid))
            .filter(|(_, prev)| !self.page_was_freed(prev.page_number, &current_page_set))
            .map(|(&rowid, prev)| CellDelta {
                rowid,
                page_number: prev.page_number,
                offset: prev.offset,
            })
            .collect();

        let carved_cells = match &mut self.carver {
            Some(carver) => {
                let freelist_pages = carver.freelist_leaf_pages(version_index);
                let mut carved: Vec<CarvedCell> = pages.iter().flat_map(|&p| carver.carve_page(version_index, p)).collect();
                carved.extend(freelist_pages.iter().flat_map(|&p| carver.carve_freelist_page(version_index, p)));
                carved.retain(|c| !Self::duplicates_a_live_cell(c, &current_cells));
                carved
            }
            None => Vec::new(),
        };

        let updated_root_b_tree_page_numbers: Vec<u32> = self
            .previous_pages
            .symmetric_difference(&current_page_set)
            .copied()
            .collect();

        self.previous_pages = current_page_set;
        self.previous_cells = current_cells;

        Ok(Commit {
            version_index,
            pages,
            added_cells,
            updated_cells,
            removed_cells,
            carved_cells,
            updated_root_b_tree_page_numbers,
        })
    }

    /// A rowid that disappears from the scan might have simply moved to a
    /// different page during a b-tree rebalance rather than been deleted;
    /// we only trust "removed" when its page is no longer reachable from
    /// the table root *and* is not explained by a rebalance still holding
    /// the same pages. The simple, conservative signal available without
    /// a full freelist walk is: the page is still one of the table's
    /// current pages (so the cell really is gone, not just relocated off
    /// a since-freed page we can no longer see).
    fn page_was_freed(&self, page_number: u32, current_pages: &HashSet<u32>) -> bool {
        !current_pages.contains(&page_number) && !self.previous_pages.contains(&page_number)
    }

    fn duplicates_a_live_cell(carved: &CarvedCell, live: &HashMap<i64, TrackedCell>) -> bool {
        live.values().any(|c| c.page_number == carved.page_number && c.fingerprint == carved.fingerprint)
    }
}

impl<'c> Iterator for HistoryIterator<'c> {
    type Item = Result<Commit, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next_version >= self.chain.version_count() {
            return None;
        }
        let version_index = self.next_version;
        self.next_version += 1;
        let result = self.commit_for(version_index);
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ObjectKind;
    use crate::source::FileSource;
    use std::io::Write;

    fn minimal_db_header(page_size: u16) -> [u8; crate::header::database::HEADER_BYTES] {
        let mut h = [0_u8; crate::header::database::HEADER_BYTES];
        h[0..16].copy_from_slice(b"SQLite format 3\0");
        h[16..18].copy_from_slice(&page_size.to_be_bytes());
        h[18] = 1;
        h[19] = 1;
        h[21] = 64;
        h[22] = 32;
        h[23] = 32;
        h[44..48].copy_from_slice(&1_u32.to_be_bytes());
        h[56..60].copy_from_slice(&1_u32.to_be_bytes());
        h
    }

    fn leaf_page_with_one_int_cell(page_size: usize, header_offset: usize, rowid: i64, value: i8) -> Vec<u8> {
        let mut page = vec![0_u8; page_size];
        // cell: payload_len varint(2), rowid varint, record header(2, serial type 1), body(1 byte)
        let cell_bytes: Vec<u8> = vec![0x02, rowid as u8, 0x02, 0x01, value as u8];
        let cell_start = page_size - cell_bytes.len();
        page[cell_start..].copy_from_slice(&cell_bytes);

        page[header_offset] = 0x0d; // table leaf
        page[header_offset + 3] = 0x00;
        page[header_offset + 4] = 0x01; // cell_count = 1
        page[header_offset + 5..header_offset + 7].copy_from_slice(&(cell_start as u16).to_be_bytes());
        let pointer_pos = header_offset + 8;
        page[pointer_pos..pointer_pos + 2].copy_from_slice(&(cell_start as u16).to_be_bytes());
        page
    }

    fn single_page_db(page_size: usize, rowid: i64, value: i8) -> (tempfile::NamedTempFile, SchemaObject) {
        let mut page1 = minimal_db_header(page_size as u16).to_vec();
        page1.resize(page_size, 0);
        let leaf = leaf_page_with_one_int_cell(page_size, crate::header::database::HEADER_BYTES, rowid, value);
        page1[crate::header::database::HEADER_BYTES..].copy_from_slice(&leaf[crate::header::database::HEADER_BYTES..]);
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&page1).unwrap();
        let table = SchemaObject {
            kind: ObjectKind::Table,
            name: "t".into(),
            table_name: "t".into(),
            root_page: 1,
            sql: Some("CREATE TABLE t (a INTEGER)".into()),
            columns: Vec::new(),
            without_rowid: false,
            module_name: None,
            module_arguments: Vec::new(),
        };
        (f, table)
    }

    #[test]
    fn first_version_reports_every_cell_as_added() {
        let (f, table) = single_page_db(512, 7, 42);
        let source = FileSource::open(f.path()).unwrap();
        let chain = VersionChain::open(source, None, true).unwrap();
        let mut it = HistoryIterator::new(&chain, table, None);
        let commit = it.next().unwrap().unwrap();
        assert_eq!(commit.version_index, 0);
        assert_eq!(commit.added_cells.len(), 1);
        assert_eq!(commit.added_cells[0].rowid, 7);
        assert!(commit.updated_cells.is_empty());
        assert!(commit.removed_cells.is_empty());
        assert!(it.next().is_none());
    }

    #[test]
    fn without_rowid_table_reports_no_cell_level_events() {
        let (f, mut table) = single_page_db(512, 1, 1);
        table.without_rowid = true;
        let source = FileSource::open(f.path()).unwrap();
        let chain = VersionChain::open(source, None, true).unwrap();
        let mut it = HistoryIterator::new(&chain, table, None);
        let commit = it.next().unwrap().unwrap();
        assert!(commit.added_cells.is_empty());
        assert!(commit.updated_cells.is_empty());
        assert!(commit.removed_cells.is_empty());
        assert_eq!(commit.pages, vec![1]);
    }
}
