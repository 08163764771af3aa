//! Classifies and parses b-tree pages: header, cell pointer array,
//! freeblock chain, and the unallocated span between them. Overflow,
//! freelist, and pointer-map pages are not self-describing the way
//! b-tree pages are — they are classified by how they were *reached*
//! (a referenced overflow pointer, a freelist-trunk's leaf list, a
//! pointer-map-modulus page number) — so they live in their own modules
//! (`overflow`, `freelist`, `pointer_map`) rather than this dispatcher.

pub mod cell;
pub mod freelist;
pub mod index_cell;
pub mod overflow;
pub mod pointer_map;
pub mod table_cell;

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Seek, SeekFrom};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid b-tree page type byte {0:#04x} at offset {1}.")]
    InvalidPageType(u8, usize),
    #[error("Freeblock chain is not strictly increasing in offset (at {0}).")]
    FreeblockNotMonotone(usize),
    #[error("Freeblock at offset {0} has size {1}, less than the minimum of 4.")]
    FreeblockTooSmall(usize, usize),
    #[error("Freeblock chain cycle detected, revisiting offset {0}.")]
    FreeblockCycle(usize),
    #[error("Cell pointer at index {0} points outside the page.")]
    CellPointerOutOfRange(usize),
    #[error("Error reading page bytes: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    IndexInterior,
    TableInterior,
    IndexLeaf,
    TableLeaf,
}

impl PageType {
    pub fn from_byte(b: u8) -> Option<PageType> {
        match b {
            0x02 => Some(PageType::IndexInterior),
            0x05 => Some(PageType::TableInterior),
            0x0a => Some(PageType::IndexLeaf),
            0x0d => Some(PageType::TableLeaf),
            _ => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, PageType::IndexLeaf | PageType::TableLeaf)
    }

    pub fn is_table(&self) -> bool {
        matches!(self, PageType::TableInterior | PageType::TableLeaf)
    }

    fn header_len(&self) -> usize {
        if self.is_leaf() {
            8
        } else {
            12
        }
    }
}

/// Page 1 carries the 100-byte database header before its b-tree header.
pub fn btree_header_offset(page_number: u32) -> usize {
    if page_number == 1 {
        crate::header::database::HEADER_BYTES
    } else {
        0
    }
}

#[derive(Debug, Clone)]
pub struct BtreePageHeader {
    pub page_type: PageType,
    pub first_freeblock: u16,
    pub cell_count: u16,
    /// 0 in the raw header means 65536; already normalized here.
    pub cell_content_start: u32,
    pub fragmented_free_bytes: u8,
    pub rightmost_pointer: Option<u32>,
}

impl BtreePageHeader {
    pub fn byte_len(&self) -> usize {
        self.page_type.header_len()
    }
}

pub fn parse_btree_page_header(page: &[u8], header_offset: usize) -> Result<BtreePageHeader, Error> {
    let mut c = Cursor::new(page);
    c.seek(SeekFrom::Start(header_offset as u64))?;
    let type_byte = c.read_u8()?;
    let page_type =
        PageType::from_byte(type_byte).ok_or(Error::InvalidPageType(type_byte, header_offset))?;
    let first_freeblock = c.read_u16::<BigEndian>()?;
    let cell_count = c.read_u16::<BigEndian>()?;
    let cell_content_start = match c.read_u16::<BigEndian>()? {
        0 => 65536,
        n => n as u32,
    };
    let fragmented_free_bytes = c.read_u8()?;
    let rightmost_pointer = if page_type.is_leaf() {
        None
    } else {
        Some(c.read_u32::<BigEndian>()?)
    };
    Ok(BtreePageHeader {
        page_type,
        first_freeblock,
        cell_count,
        cell_content_start,
        fragmented_free_bytes,
        rightmost_pointer,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freeblock {
    pub offset: usize,
    pub size: usize,
}

/// Walks the freeblock chain anchored at `first_freeblock`. Validates
/// strictly-increasing offsets (§3 invariant) and a minimum size of 4.
pub fn read_freeblocks(page: &[u8], first_freeblock: u16) -> Result<Vec<Freeblock>, Error> {
    let mut result = Vec::new();
    let mut visited = std::collections::HashSet::new();
    let mut offset = first_freeblock as usize;
    while offset != 0 {
        if !visited.insert(offset) {
            return Err(Error::FreeblockCycle(offset));
        }
        if offset + 4 > page.len() {
            return Err(Error::Io(format!("freeblock at {} runs past page end", offset)));
        }
        let next = u16::from_be_bytes([page[offset], page[offset + 1]]) as usize;
        let size = u16::from_be_bytes([page[offset + 2], page[offset + 3]]) as usize;
        if size < 4 {
            return Err(Error::FreeblockTooSmall(offset, size));
        }
        if let Some(prev) = result.last().map(|f: &Freeblock| f.offset) {
            if offset <= prev {
                return Err(Error::FreeblockNotMonotone(offset));
            }
        }
        result.push(Freeblock { offset, size });
        offset = next;
    }
    Ok(result)
}

/// Reads the `cell_count` big-endian u16 cell pointer offsets immediately
/// following the b-tree page header.
pub fn read_cell_pointers(page: &[u8], header_offset: usize, header: &BtreePageHeader) -> Result<Vec<usize>, Error> {
    let start = header_offset + header.byte_len();
    let mut offsets = Vec::with_capacity(header.cell_count as usize);
    for i in 0..header.cell_count as usize {
        let pos = start + i * 2;
        let off = page
            .get(pos..pos + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
            .ok_or(Error::CellPointerOutOfRange(i))?;
        offsets.push(off);
    }
    Ok(offsets)
}

/// A parsed b-tree page: header, cell pointer array, freeblock chain, and
/// the unallocated span. Cell *contents* are parsed on demand by
/// `table_cell`/`index_cell` — this struct only carries what every page
/// kind needs regardless of table vs. index, leaf vs. interior.
#[derive(Debug, Clone)]
pub struct BtreePage {
    pub page_number: u32,
    pub header: BtreePageHeader,
    pub cell_offsets: Vec<usize>,
    pub freeblocks: Vec<Freeblock>,
    pub unallocated_start: usize,
    pub unallocated_end: usize,
}

pub fn parse(page: &[u8], page_number: u32) -> Result<BtreePage, Error> {
    let header_offset = btree_header_offset(page_number);
    let header = parse_btree_page_header(page, header_offset)?;
    let cell_offsets = read_cell_pointers(page, header_offset, &header)?;
    let freeblocks = read_freeblocks(page, header.first_freeblock)?;
    let unallocated_start = header_offset + header.byte_len() + header.cell_count as usize * 2;
    let unallocated_end = header.cell_content_start as usize;
    Ok(BtreePage {
        page_number,
        header,
        cell_offsets,
        freeblocks,
        unallocated_start,
        unallocated_end,
    })
}
