//! The top-level error type, grouping every module's error behind the
//! taxonomy the core exposes to callers: parsing errors (further split by
//! the structure that failed to parse), version-chain errors, signature
//! errors, and carving errors. Individual modules keep their own precise
//! `Error` enums; this module only composes them for callers — like the
//! demo CLI — that want one type to match on.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Parsing(#[from] ParsingError),
    #[error(transparent)]
    Version(#[from] crate::version::Error),
    #[error(transparent)]
    Signature(#[from] crate::signature::Error),
    #[error(transparent)]
    Carving(#[from] crate::carve::Error),
    #[error(transparent)]
    History(#[from] crate::history::Error),
}

/// Structural parsing failures, raised in strict mode and downgraded to
/// warnings where the format allows it (see `header::Diagnostic`).
#[derive(thiserror::Error, Debug)]
pub enum ParsingError {
    #[error(transparent)]
    Header(#[from] HeaderParsingError),
    #[error("master schema row parsing failed: {0}")]
    MasterSchemaRow(#[from] crate::schema::Error),
    #[error(transparent)]
    BTreePage(#[from] BTreePageParsingError),
    #[error(transparent)]
    Cell(#[from] CellParsingError),
    #[error(transparent)]
    Record(#[from] RecordParsingError),
}

/// The database, WAL, and rollback-journal headers each have their own
/// magic and layout; this just groups their distinct error types.
#[derive(thiserror::Error, Debug)]
pub enum HeaderParsingError {
    #[error(transparent)]
    Database(#[from] crate::header::database::Error),
    #[error(transparent)]
    Wal(#[from] crate::header::wal::Error),
    #[error(transparent)]
    Journal(#[from] crate::header::journal::Error),
}

/// The b-tree page header, the freeblock chain, and pointer-map pages.
#[derive(thiserror::Error, Debug)]
pub enum BTreePageParsingError {
    #[error(transparent)]
    Page(#[from] crate::page::Error),
    #[error(transparent)]
    Freelist(#[from] crate::page::freelist::Error),
    #[error(transparent)]
    PointerMap(#[from] crate::page::pointer_map::Error),
}

/// Table-leaf, table-interior, index-leaf, and index-interior cells, plus
/// the overflow chains they may spill into.
#[derive(thiserror::Error, Debug)]
pub enum CellParsingError {
    #[error(transparent)]
    Payload(#[from] crate::page::cell::Error),
    #[error(transparent)]
    TableCell(#[from] crate::page::table_cell::Error),
    #[error(transparent)]
    IndexCell(#[from] crate::page::index_cell::Error),
    #[error(transparent)]
    Overflow(#[from] crate::page::overflow::Error),
}

/// Decoding a record's serial-type header and values.
#[derive(thiserror::Error, Debug)]
pub enum RecordParsingError {
    #[error(transparent)]
    SerialType(#[from] crate::serial_type::Error),
    #[error(transparent)]
    Varint(#[from] crate::varint::Error),
}
