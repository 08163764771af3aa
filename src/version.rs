//! The version model (C5): a base `Database` snapshot plus an ordered
//! chain of commit snapshots built from WAL frames. `Version = { Base, Commit }`
//! is modeled as a sum type with a shared page-fetch path rather than a
//! class hierarchy, per the cyclic-Version design note this crate follows.

use std::collections::HashMap;

use crate::header::{database, wal, Diagnostic};
use crate::page::{self, cell::PayloadRef, overflow, table_cell};
use crate::schema::{self, SchemaObject};
use crate::source::FileSource;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Database header parsing failed: {0}")]
    DatabaseParsingError(#[from] database::Error),
    #[error("WAL header parsing failed: {0}")]
    WalParsingError(wal::Error),
    #[error("WAL frame header parsing failed: {0}")]
    WalFrameParsingError(wal::Error),
    #[error("WAL commit record at frame {0} is inconsistent: {1}")]
    WalCommitRecordParsingError(usize, String),
    #[error("Page {0} is not a table b-tree page.")]
    NotATableBtree(u32),
    #[error(transparent)]
    Page(#[from] page::Error),
    #[error(transparent)]
    Freelist(#[from] page::freelist::Error),
    #[error(transparent)]
    TableCell(#[from] table_cell::Error),
    #[error(transparent)]
    Overflow(#[from] overflow::Error),
    #[error(transparent)]
    Schema(#[from] schema::Error),
    #[error(transparent)]
    Source(#[from] crate::source::Error),
    #[error("Version index {0} does not exist; the chain has {1} versions.")]
    NoSuchVersion(usize, usize),
    #[error("Page number {0} is out of range for a database of {1} pages.")]
    PageOutOfRange(u32, u32),
}

struct WalFrameRecord {
    content: Vec<u8>,
}

struct CommitSnapshot {
    db_size_in_pages: u32,
    /// page number -> index into `frames` of the most recent frame for
    /// that page at or before this commit.
    page_index: HashMap<u32, usize>,
}

/// The base database plus the chain of WAL-derived commit snapshots. Index
/// 0 is always the base version; index `i > 0` is the commit at
/// `commits[i - 1]`.
pub struct VersionChain {
    source: FileSource,
    header: database::DatabaseHeader,
    diagnostics: Vec<Diagnostic>,
    frames: Vec<WalFrameRecord>,
    commits: Vec<CommitSnapshot>,
    trailing_uncommitted_frames: usize,
}

impl VersionChain {
    /// Opens the base database file and, if present, overlays WAL frames
    /// from `wal_bytes`. `strict` governs database-header parsing only;
    /// WAL headers have no non-strict relaxation path in the spec.
    pub fn open(database_source: FileSource, wal_bytes: Option<&[u8]>, strict: bool) -> Result<VersionChain, Error> {
        let header_bytes: [u8; database::HEADER_BYTES] = database_source
            .read_at(0, database::HEADER_BYTES)?
            .try_into()
            .map_err(|_| database::Error::Io("short read of database header".into()))?;
        let (header, diagnostics) = database::parse(&header_bytes, strict)?;

        let (frames, commits, trailing) = match wal_bytes {
            Some(bytes) => Self::build_wal_chain(bytes, header.page_size)?,
            None => (Vec::new(), Vec::new(), 0),
        };

        Ok(VersionChain {
            source: database_source,
            header,
            diagnostics,
            frames,
            commits,
            trailing_uncommitted_frames: trailing,
        })
    }

    fn build_wal_chain(bytes: &[u8], page_size: u32) -> Result<(Vec<WalFrameRecord>, Vec<CommitSnapshot>, usize), Error> {
        let wal_header_bytes: [u8; wal::HEADER_BYTES] = bytes
            .get(0..wal::HEADER_BYTES)
            .ok_or_else(|| Error::WalParsingError(wal::Error::Io("WAL file shorter than its header".into())))?
            .try_into()
            .unwrap();
        let wal_header = wal::parse(&wal_header_bytes).map_err(Error::WalParsingError)?;
        if wal_header.page_size != page_size {
            return Err(Error::WalCommitRecordParsingError(
                0,
                format!("WAL page size {} does not match database page size {}", wal_header.page_size, page_size),
            ));
        }
        let frame_size = wal::FRAME_HEADER_BYTES + page_size as usize;

        let mut frames = Vec::new();
        let mut commits = Vec::new();
        let mut running_index: HashMap<u32, usize> = HashMap::new();
        let mut offset = wal::HEADER_BYTES;
        let mut trailing = 0;

        while offset + frame_size <= bytes.len() {
            let frame_header_bytes: [u8; wal::FRAME_HEADER_BYTES] =
                bytes[offset..offset + wal::FRAME_HEADER_BYTES].try_into().unwrap();
            let frame_header = wal::parse_frame_header(&frame_header_bytes).map_err(Error::WalFrameParsingError)?;
            let content = bytes[offset + wal::FRAME_HEADER_BYTES..offset + frame_size].to_vec();
            let frame_index = frames.len();
            frames.push(WalFrameRecord { content });
            running_index.insert(frame_header.page_number, frame_index);

            if frame_header.is_commit_frame() {
                commits.push(CommitSnapshot {
                    db_size_in_pages: frame_header.db_size_after_commit,
                    page_index: running_index.clone(),
                });
                trailing = 0;
            } else {
                trailing += 1;
            }
            offset += frame_size;
        }
        Ok((frames, commits, trailing))
    }

    pub fn version_count(&self) -> usize {
        1 + self.commits.len()
    }

    /// Frames present after the last commit frame, preserved only as a
    /// diagnostic per the open question on non-committing trailing frames.
    pub fn trailing_uncommitted_frame_count(&self) -> usize {
        self.trailing_uncommitted_frames
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn database_header(&self) -> &database::DatabaseHeader {
        &self.header
    }

    pub fn database_size_in_pages(&self, version_index: usize) -> Result<u32, Error> {
        if version_index == 0 {
            Ok(self.header.reliable_size_in_pages(self.source.len()))
        } else {
            let commit = self
                .commits
                .get(version_index - 1)
                .ok_or(Error::NoSuchVersion(version_index, self.version_count()))?;
            Ok(commit.db_size_in_pages)
        }
    }

    /// Fetches the raw bytes of `page_number` as seen at `version_index`:
    /// the most recent WAL frame for that page at or before this commit,
    /// falling back to the base database file.
    pub fn page(&self, version_index: usize, page_number: u32) -> Result<Vec<u8>, Error> {
        let size_in_pages = self.database_size_in_pages(version_index)?;
        if page_number == 0 || page_number > size_in_pages {
            return Err(Error::PageOutOfRange(page_number, size_in_pages));
        }
        if version_index > 0 {
            let commit = &self.commits[version_index - 1];
            if let Some(&frame_index) = commit.page_index.get(&page_number) {
                return Ok(self.frames[frame_index].content.clone());
            }
        }
        let offset = (page_number as u64 - 1) * self.header.page_size as u64;
        Ok(self.source.read_at(offset, self.header.page_size as usize)?)
    }

    fn usable_size(&self) -> usize {
        self.header.usable_page_size()
    }

    /// Reassembles a cell's full payload, following its overflow chain
    /// (if any) through this version's page fetcher.
    pub fn reassemble_payload(&self, version_index: usize, page_bytes: &[u8], payload: &PayloadRef) -> Result<Vec<u8>, Error> {
        let local = &page_bytes[payload.local_range.clone()];
        match payload.overflow_page {
            None => Ok(local.to_vec()),
            Some(first) => {
                let usable = self.usable_size();
                let bytes = overflow::reassemble(local, payload.total_len as usize, first, usable, |p| {
                    self.page(version_index, p).map_err(|_| overflow::Error::MissingPage(p))
                })?;
                Ok(bytes)
            }
        }
    }

    /// Walks a table b-tree from `root_page`, collecting every page
    /// touched and every leaf cell found, in `(page_number, cell_pointer_index)`
    /// order as required by the ordering guarantee.
    pub fn scan_table(&self, version_index: usize, root_page: u32) -> Result<TableScan, Error> {
        let mut scan = TableScan {
            pages: Vec::new(),
            leaf_cells: Vec::new(),
        };
        self.scan_node(version_index, root_page, &mut scan)?;
        Ok(scan)
    }

    fn scan_node(&self, version_index: usize, page_number: u32, scan: &mut TableScan) -> Result<(), Error> {
        let bytes = self.page(version_index, page_number)?;
        let parsed = page::parse(&bytes, page_number)?;
        scan.pages.push(page_number);
        match parsed.header.page_type {
            page::PageType::TableLeaf => {
                for &offset in &parsed.cell_offsets {
                    let cell = table_cell::parse_table_leaf_cell(&bytes, offset, self.usable_size())?;
                    scan.leaf_cells.push(LeafCellRef {
                        page_number,
                        offset,
                        cell,
                    });
                }
            }
            page::PageType::TableInterior => {
                for &offset in &parsed.cell_offsets {
                    let icell = table_cell::parse_table_interior_cell(&bytes, offset)
                        .map_err(|e| Error::WalCommitRecordParsingError(offset, e.to_string()))?;
                    self.scan_node(version_index, icell.left_child_page, scan)?;
                }
                if let Some(rightmost) = parsed.header.rightmost_pointer {
                    self.scan_node(version_index, rightmost, scan)?;
                }
            }
            _ => return Err(Error::NotATableBtree(page_number)),
        }
        Ok(())
    }

    /// Walks the freelist trunk chain as seen at `version_index`, starting
    /// from the trunk pointer in page 1's header at that version (not the
    /// base file's header, which may be stale once WAL commits touch page
    /// 1), and returns every leaf page number it names. The chain is
    /// bounded by the database's page count so a corrupt next-trunk cycle
    /// can't loop forever.
    pub fn freelist_leaf_pages(&self, version_index: usize) -> Result<Vec<u32>, Error> {
        let size_in_pages = self.database_size_in_pages(version_index)?;
        let page1 = self.page(version_index, 1)?;
        let header_bytes: [u8; database::HEADER_BYTES] = page1
            .get(0..database::HEADER_BYTES)
            .ok_or(Error::PageOutOfRange(1, size_in_pages))?
            .try_into()
            .unwrap();
        let (header, _) = database::parse(&header_bytes, false)?;

        let mut leaves = Vec::new();
        let mut trunk_page = header.freelist_trunk_page;
        let mut visited = std::collections::HashSet::new();
        while trunk_page != 0 && visited.insert(trunk_page) && visited.len() as u32 <= size_in_pages {
            let trunk_bytes = self.page(version_index, trunk_page)?;
            let trunk = page::freelist::parse_trunk_page(&trunk_bytes)?;
            leaves.extend(trunk.leaf_pages);
            trunk_page = trunk.next_trunk_page;
        }
        Ok(leaves)
    }

    /// Decodes every `sqlite_master` row reachable at `version_index` into
    /// a `SchemaObject`.
    pub fn master_schema(&self, version_index: usize) -> Result<Vec<SchemaObject>, Error> {
        const MASTER_ROOT_PAGE: u32 = 1;
        let scan = self.scan_table(version_index, MASTER_ROOT_PAGE)?;
        let mut objects = Vec::with_capacity(scan.leaf_cells.len());
        for leaf in &scan.leaf_cells {
            let page_bytes = self.page(version_index, leaf.page_number)?;
            let payload = self.reassemble_payload(version_index, &page_bytes, &leaf.cell.payload)?;
            let row = crate::record::decode_row(&payload, self.header.text_encoding)
                .map_err(|e| Error::WalCommitRecordParsingError(leaf.offset, e.to_string()))?;
            let values: Vec<_> = row.into_iter().map(|(_, v)| v).collect();
            objects.push(schema::parse_master_row(&values)?);
        }
        Ok(objects)
    }
}

pub struct LeafCellRef {
    pub page_number: u32,
    pub offset: usize,
    pub cell: table_cell::TableLeafCell,
}

pub struct TableScan {
    pub pages: Vec<u32>,
    pub leaf_cells: Vec<LeafCellRef>,
}
