//! Overflow-payload threshold math and chain reassembly.
//! https://www.sqlite.org/fileformat.html#payload_overflow_pages

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Overflow chain cycle detected, revisiting page {0}.")]
    Cycle(u32),
    #[error("Overflow page {0} could not be read.")]
    MissingPage(u32),
    #[error("Overflow page {0} is shorter than its 4-byte continuation header.")]
    PageTooShort(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    TableLeaf,
    IndexInteriorOrLeaf,
}

/// The largest payload size, in bytes, that a cell carries entirely inline
/// on its own page without spilling to an overflow chain.
fn max_local(kind: CellKind, usable_size: usize) -> usize {
    match kind {
        CellKind::TableLeaf => usable_size - 35,
        CellKind::IndexInteriorOrLeaf => ((usable_size - 12) * 64 / 255) - 23,
    }
}

/// The minimum local payload retained on the page once a payload does
/// spill; identical for every cell kind that can overflow.
fn min_local(usable_size: usize) -> usize {
    ((usable_size - 12) * 32 / 255) - 23
}

/// Computes how many bytes of a `payload_len`-byte payload are stored
/// inline on the cell's own page; the rest spills to the overflow chain.
/// Implements the exact SQLite file-format algorithm (not the size-only
/// approximation in the spec's payload-overflow description).
pub fn local_payload_size(kind: CellKind, usable_size: usize, payload_len: u64) -> usize {
    let x = max_local(kind, usable_size);
    let payload_len = payload_len as usize;
    if payload_len <= x {
        return payload_len;
    }
    let m = min_local(usable_size);
    let k = m + ((payload_len - m) % (usable_size - 4));
    if k <= x {
        k
    } else {
        m
    }
}

/// Reassembles a payload whose tail spilled into an overflow chain. `local`
/// is the inline bytes already read off the cell's own page. `fetch_page`
/// returns the raw bytes of an overflow page given its page number.
pub fn reassemble<E>(
    local: &[u8],
    total_len: usize,
    first_overflow_page: u32,
    usable_size: usize,
    mut fetch_page: impl FnMut(u32) -> Result<Vec<u8>, E>,
) -> Result<Vec<u8>, Error>
where
    Error: From<E>,
{
    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(local);
    let mut next = first_overflow_page;
    let mut visited = std::collections::HashSet::new();
    while out.len() < total_len {
        if next == 0 {
            break;
        }
        if !visited.insert(next) {
            return Err(Error::Cycle(next));
        }
        let page = fetch_page(next)?;
        if page.len() < 4 {
            return Err(Error::PageTooShort(next));
        }
        next = u32::from_be_bytes([page[0], page[1], page[2], page[3]]);
        let chunk_capacity = usable_size - 4;
        let remaining = total_len - out.len();
        let take = remaining.min(chunk_capacity).min(page.len() - 4);
        out.extend_from_slice(&page[4..4 + take]);
    }
    Ok(out)
}
