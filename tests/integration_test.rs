//! End-to-end coverage wiring `version`, `history`, `signature`, and
//! `carve` together over hand-built database/WAL byte fixtures. The
//! individual algorithms (varint recovery, signature matching, freeblock
//! vs. unallocated carving) have their own focused unit tests; these
//! exercise the pipeline the way `dissect` drives it.

use std::io::Write;

use sqlite_dissect::carve::Carver;
use sqlite_dissect::header::database::HEADER_BYTES as DB_HEADER_BYTES;
use sqlite_dissect::history::HistoryIterator;
use sqlite_dissect::schema::{ObjectKind, SchemaObject};
use sqlite_dissect::signature::{self, schema_signature};
use sqlite_dissect::source::FileSource;
use sqlite_dissect::version::VersionChain;

fn encode_varint(value: i64) -> Vec<u8> {
    let mut chunks = Vec::new();
    let mut n = value as u64;
    loop {
        chunks.push((n & 0x7f) as u8);
        n >>= 7;
        if n == 0 {
            break;
        }
    }
    chunks.reverse();
    let last = chunks.len() - 1;
    chunks.iter().enumerate().map(|(i, &b)| if i == last { b } else { b | 0x80 }).collect()
}

enum RecordValue {
    Null,
    Int(i64),
    Text(&'static str),
}

fn encode_record(values: &[RecordValue]) -> Vec<u8> {
    let mut header_body = Vec::new();
    let mut body = Vec::new();
    for v in values {
        match v {
            RecordValue::Null => header_body.extend(encode_varint(0)),
            RecordValue::Int(i) => {
                header_body.extend(encode_varint(1));
                body.push(*i as u8);
            }
            RecordValue::Text(s) => {
                header_body.extend(encode_varint(13 + 2 * s.len() as i64));
                body.extend_from_slice(s.as_bytes());
            }
        }
    }
    let header_length = 1 + header_body.len();
    assert!(header_length < 128, "fixture record header too long for a single-byte varint");
    let mut record = vec![header_length as u8];
    record.extend(header_body);
    record.extend(body);
    record
}

fn table_leaf_cell_bytes(rowid: i64, record: &[u8]) -> Vec<u8> {
    let mut cell = encode_varint(record.len() as i64);
    cell.extend(encode_varint(rowid));
    cell.extend_from_slice(record);
    cell
}

/// Builds a table-leaf page with `cells` laid out back to front from the
/// end of the page, an empty freeblock chain, and no fragmentation.
fn leaf_page(page_size: usize, header_offset: usize, cells: &[(i64, Vec<u8>)]) -> Vec<u8> {
    let mut page = vec![0_u8; page_size];
    let mut offsets = Vec::with_capacity(cells.len());
    let mut cell_start = page_size;
    for (rowid, record) in cells {
        let bytes = table_leaf_cell_bytes(*rowid, record);
        cell_start -= bytes.len();
        page[cell_start..cell_start + bytes.len()].copy_from_slice(&bytes);
        offsets.push(cell_start);
    }
    page[header_offset] = 0x0d;
    page[header_offset + 1..header_offset + 3].copy_from_slice(&0_u16.to_be_bytes());
    page[header_offset + 3..header_offset + 5].copy_from_slice(&(cells.len() as u16).to_be_bytes());
    page[header_offset + 5..header_offset + 7].copy_from_slice(&(cell_start as u16).to_be_bytes());
    page[header_offset + 7] = 0;
    let pointer_start = header_offset + 8;
    for (i, &offset) in offsets.iter().enumerate() {
        page[pointer_start + i * 2..pointer_start + i * 2 + 2].copy_from_slice(&(offset as u16).to_be_bytes());
    }
    page
}

fn database_header(page_size: u16, database_size_in_pages: u32, reserved_space: u8) -> [u8; DB_HEADER_BYTES] {
    let mut h = [0_u8; DB_HEADER_BYTES];
    h[0..16].copy_from_slice(b"SQLite format 3\0");
    h[16..18].copy_from_slice(&page_size.to_be_bytes());
    h[18] = 1;
    h[19] = 1;
    h[20] = reserved_space;
    h[21] = 64;
    h[22] = 32;
    h[23] = 32;
    h[24..28].copy_from_slice(&1_u32.to_be_bytes()); // file_change_counter
    h[28..32].copy_from_slice(&database_size_in_pages.to_be_bytes());
    h[44..48].copy_from_slice(&1_u32.to_be_bytes()); // schema_format
    h[56..60].copy_from_slice(&1_u32.to_be_bytes()); // text_encoding = UTF-8
    h[92..96].copy_from_slice(&1_u32.to_be_bytes()); // version_valid_for == file_change_counter
    h
}

const PAGE_SIZE: usize = 512;
const T_SQL: &str = "CREATE TABLE t (a INTEGER PRIMARY KEY, b TEXT)";

fn schema_page(entries: &[(&'static str, u32)]) -> Vec<u8> {
    let cells: Vec<(i64, Vec<u8>)> = entries
        .iter()
        .enumerate()
        .map(|(i, &(sql, root_page))| {
            let record = encode_record(&[
                RecordValue::Text("table"),
                RecordValue::Text("t"),
                RecordValue::Text("t"),
                RecordValue::Int(root_page as i64),
                RecordValue::Text(leak(sql)),
            ]);
            ((i + 1) as i64, record)
        })
        .collect();
    let mut page = leaf_page(PAGE_SIZE, DB_HEADER_BYTES, &cells);
    page[0..DB_HEADER_BYTES].copy_from_slice(&database_header(PAGE_SIZE as u16, 2, 0));
    page
}

/// Test fixtures only ever build a handful of SQL strings; leaking them
/// keeps `encode_record`'s `&'static str` signature simple.
fn leak(s: &str) -> &'static str {
    Box::leak(s.to_string().into_boxed_str())
}

fn hello_row() -> Vec<u8> {
    encode_record(&[RecordValue::Null, RecordValue::Text("hello")])
}

fn world_row() -> Vec<u8> {
    encode_record(&[RecordValue::Null, RecordValue::Text("world")])
}

fn write_db(page1: &[u8], page2: &[u8]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(page1).unwrap();
    f.write_all(page2).unwrap();
    f
}

fn t_schema_object() -> SchemaObject {
    SchemaObject {
        kind: ObjectKind::Table,
        name: "t".into(),
        table_name: "t".into(),
        root_page: 2,
        sql: Some(T_SQL.into()),
        columns: vec![
            sqlite_dissect::schema::ColumnDef {
                name: "a".into(),
                declared_type: "INTEGER".into(),
                affinity: sqlite_dissect::schema::Affinity::Integer,
                not_null: false,
                is_integer_primary_key: true,
            },
            sqlite_dissect::schema::ColumnDef {
                name: "b".into(),
                declared_type: "TEXT".into(),
                affinity: sqlite_dissect::schema::Affinity::Text,
                not_null: false,
                is_integer_primary_key: false,
            },
        ],
        without_rowid: false,
        module_name: None,
        module_arguments: Vec::new(),
    }
}

fn wal_frame(page_number: u32, db_size_after_commit: u32, content: &[u8]) -> Vec<u8> {
    let mut frame = vec![0_u8; 24];
    frame[0..4].copy_from_slice(&page_number.to_be_bytes());
    frame[4..8].copy_from_slice(&db_size_after_commit.to_be_bytes());
    frame.extend_from_slice(content);
    frame
}

fn wal_file(page_size: u32, frames: &[Vec<u8>]) -> Vec<u8> {
    let mut wal = vec![0_u8; 32];
    wal[0..4].copy_from_slice(&0x377f_0683_u32.to_be_bytes()); // big-endian checksum marker
    wal[4..8].copy_from_slice(&3_007_000_u32.to_be_bytes());
    wal[8..12].copy_from_slice(&page_size.to_be_bytes());
    for frame in frames {
        wal.extend_from_slice(frame);
    }
    wal
}

#[test]
fn minimal_database_reports_one_version_with_one_added_cell() {
    let page1 = schema_page(&[(T_SQL, 2)]);
    let page2 = leaf_page(PAGE_SIZE, 0, &[(1, hello_row())]);
    let f = write_db(&page1, &page2);

    let source = FileSource::open(f.path()).unwrap();
    let chain = VersionChain::open(source, None, true).unwrap();
    assert_eq!(chain.version_count(), 1);

    let tables = chain.master_schema(0).unwrap();
    let t = tables.iter().find(|t| t.table_name == "t").unwrap();
    assert_eq!(t.root_page, 2);

    let mut history = HistoryIterator::new(&chain, t.clone(), None);
    let commit = history.next().unwrap().unwrap();
    assert_eq!(commit.added_cells.len(), 1);
    assert_eq!(commit.added_cells[0].rowid, 1);
    assert!(history.next().is_none());
}

#[test]
fn wal_commit_adds_a_row_and_touches_only_its_page() {
    let page1 = schema_page(&[(T_SQL, 2)]);
    let page2_v0 = leaf_page(PAGE_SIZE, 0, &[(1, hello_row())]);
    let page2_v1 = leaf_page(PAGE_SIZE, 0, &[(1, hello_row()), (2, world_row())]);
    let f = write_db(&page1, &page2_v0);
    let wal = wal_file(PAGE_SIZE as u32, &[wal_frame(2, 2, &page2_v1)]);

    let source = FileSource::open(f.path()).unwrap();
    let chain = VersionChain::open(source, Some(&wal), true).unwrap();
    assert_eq!(chain.version_count(), 2);

    let t = t_schema_object();
    let mut history = HistoryIterator::new(&chain, t, None);
    let v0 = history.next().unwrap().unwrap();
    assert_eq!(v0.added_cells.len(), 1);
    let v1 = history.next().unwrap().unwrap();
    assert_eq!(v1.added_cells.len(), 1);
    assert_eq!(v1.added_cells[0].rowid, 2);
    assert_eq!(v1.updated_root_b_tree_page_numbers, Vec::<u32>::new());
    assert!(history.next().is_none());
}

#[test]
fn deleted_row_is_removed_and_recovered_by_the_carver() {
    let page1 = schema_page(&[(T_SQL, 2)]);

    // The single cell's rowid is encoded with a non-minimal 3-byte varint
    // so payload-length + rowid total exactly 4 bytes: that's what SQLite's
    // freelist allocator overwrites with the freeblock's next-pointer and
    // size fields when the cell is deleted.
    let record = hello_row();
    let mut original_cell = encode_varint(record.len() as i64);
    original_cell.extend([0x80, 0x80, 0x01]); // rowid 1, non-minimal 3-byte encoding
    original_cell.extend_from_slice(&record);
    let cell_len = original_cell.len();
    let cell_start = PAGE_SIZE - cell_len;

    let mut page2_v0 = vec![0_u8; PAGE_SIZE];
    page2_v0[cell_start..].copy_from_slice(&original_cell);
    page2_v0[0] = 0x0d; // table leaf
    page2_v0[1..3].copy_from_slice(&0_u16.to_be_bytes()); // first_freeblock
    page2_v0[3..5].copy_from_slice(&1_u16.to_be_bytes()); // cell_count
    page2_v0[5..7].copy_from_slice(&(cell_start as u16).to_be_bytes()); // cell_content_start
    page2_v0[8..10].copy_from_slice(&(cell_start as u16).to_be_bytes()); // cell pointer 0

    let mut page2_v1 = vec![0_u8; PAGE_SIZE];
    page2_v1[0] = 0x0d;
    page2_v1[1..3].copy_from_slice(&(cell_start as u16).to_be_bytes()); // first_freeblock
    page2_v1[3..5].copy_from_slice(&0_u16.to_be_bytes()); // cell_count
    page2_v1[5..7].copy_from_slice(&(cell_start as u16).to_be_bytes()); // cell_content_start
    page2_v1[cell_start..cell_start + 2].copy_from_slice(&0_u16.to_be_bytes()); // freeblock next pointer
    page2_v1[cell_start + 2..cell_start + 4].copy_from_slice(&(cell_len as u16).to_be_bytes()); // freeblock size
    page2_v1[cell_start + 4..].copy_from_slice(&original_cell[4..]); // record bytes, untouched by the deletion

    let f = write_db(&page1, &page2_v0);
    let wal = wal_file(PAGE_SIZE as u32, &[wal_frame(2, 2, &page2_v1)]);

    let source = FileSource::open(f.path()).unwrap();
    let chain = VersionChain::open(source, Some(&wal), true).unwrap();
    let t = t_schema_object();

    let signature = schema_signature(&t).unwrap();
    let carver = Carver::new(&chain, signature, sqlite_dissect::serial_type::TextEncoding::Utf8, false);
    let mut history = HistoryIterator::new(&chain, t, Some(Box::new(carver)));

    let v0 = history.next().unwrap().unwrap();
    assert_eq!(v0.added_cells.len(), 1);
    assert!(v0.carved_cells.is_empty());

    let v1 = history.next().unwrap().unwrap();
    assert_eq!(v1.removed_cells.len(), 1);
    assert_eq!(v1.removed_cells[0].rowid, 1);
    assert_eq!(v1.carved_cells.len(), 1);
    let carved = &v1.carved_cells[0];
    assert_eq!(carved.kind, sqlite_dissect::history::CarveKind::Freeblock);
    assert!(!carved.truncated);
}

#[test]
fn strict_mode_rejects_a_corrupt_reserved_space_byte_non_strict_tolerates_it() {
    let mut page1 = schema_page(&[(T_SQL, 2)]);
    page1[20] = 200; // larger than any known use of the reserved-space field
    let page2 = leaf_page(PAGE_SIZE, 0, &[(1, hello_row())]);
    let f = write_db(&page1, &page2);

    let strict_source = FileSource::open(f.path()).unwrap();
    assert!(VersionChain::open(strict_source, None, true).is_err());

    let lenient_source = FileSource::open(f.path()).unwrap();
    let chain = VersionChain::open(lenient_source, None, false).unwrap();
    assert!(!chain.diagnostics().is_empty());
    assert_eq!(chain.version_count(), 1);
}

#[test]
fn carve_freelists_recovers_a_cell_from_a_freelist_leaf_page() {
    let mut page1 = schema_page(&[(T_SQL, 2)]);
    page1[28..32].copy_from_slice(&4_u32.to_be_bytes()); // database_size_in_pages
    page1[32..36].copy_from_slice(&3_u32.to_be_bytes()); // freelist_trunk_page
    page1[36..40].copy_from_slice(&1_u32.to_be_bytes()); // freelist_page_count
    let page2 = leaf_page(PAGE_SIZE, 0, &[(1, hello_row())]);

    // Page 3: a freelist trunk page naming page 4 as its one leaf.
    let mut page3 = vec![0_u8; PAGE_SIZE];
    page3[0..4].copy_from_slice(&0_u32.to_be_bytes()); // next_trunk_page
    page3[4..8].copy_from_slice(&1_u32.to_be_bytes()); // leaf_count
    page3[8..12].copy_from_slice(&4_u32.to_be_bytes()); // leaf page number

    // Page 4: a freelist leaf page, unstructured, with a deleted row's
    // bytes still sitting in it untouched since the page was freed.
    let mut page4 = vec![0_u8; PAGE_SIZE];
    let remnant = table_leaf_cell_bytes(99, &world_row());
    page4[50..50 + remnant.len()].copy_from_slice(&remnant);

    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(&page1).unwrap();
    f.write_all(&page2).unwrap();
    f.write_all(&page3).unwrap();
    f.write_all(&page4).unwrap();

    let source = FileSource::open(f.path()).unwrap();
    let chain = VersionChain::open(source, None, true).unwrap();
    let t = t_schema_object();

    assert_eq!(chain.freelist_leaf_pages(0).unwrap(), vec![4]);

    let signature = schema_signature(&t).unwrap();

    let carver_without_freelists = Carver::new(&chain, signature.clone(), sqlite_dissect::serial_type::TextEncoding::Utf8, false);
    let mut history = HistoryIterator::new(&chain, t.clone(), Some(Box::new(carver_without_freelists)));
    let commit = history.next().unwrap().unwrap();
    assert!(commit.carved_cells.is_empty(), "carve_freelists=false must not touch freelist pages");

    let carver_with_freelists = Carver::new(&chain, signature, sqlite_dissect::serial_type::TextEncoding::Utf8, true);
    let mut history = HistoryIterator::new(&chain, t, Some(Box::new(carver_with_freelists)));
    let commit = history.next().unwrap().unwrap();
    assert_eq!(commit.carved_cells.len(), 1);
    let carved = &commit.carved_cells[0];
    assert_eq!(carved.page_number, 4);
    assert_eq!(carved.kind, sqlite_dissect::history::CarveKind::Unallocated);
    assert!(!carved.truncated);
}

#[test]
fn without_rowid_table_has_no_signature_and_no_cell_level_history() {
    let page1 = schema_page(&[("CREATE TABLE u (k TEXT PRIMARY KEY) WITHOUT ROWID", 2)]);
    let page2 = leaf_page(PAGE_SIZE, 0, &[(1, encode_record(&[RecordValue::Text("x")]))]);
    let f = write_db(&page1, &page2);

    let source = FileSource::open(f.path()).unwrap();
    let chain = VersionChain::open(source, None, true).unwrap();

    let mut u = t_schema_object();
    u.name = "u".into();
    u.table_name = "u".into();
    u.without_rowid = true;
    u.sql = Some("CREATE TABLE u (k TEXT PRIMARY KEY) WITHOUT ROWID".into());

    assert_eq!(signature::schema_signature(&u), Err(signature::Error::UnsupportedEntry("u".into())));

    let mut history = HistoryIterator::new(&chain, u, None);
    let commit = history.next().unwrap().unwrap();
    assert!(commit.added_cells.is_empty());
    assert!(commit.removed_cells.is_empty());
    assert!(commit.carved_cells.is_empty());
    assert_eq!(commit.pages, vec![2]);
}
