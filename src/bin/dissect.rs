//! A thin demo driver over the `sqlite_dissect` library: opens a database
//! (plus its WAL and/or rollback journal, if present), prints the schema,
//! and optionally walks each table's version history and carves deleted
//! cells. Config-file merging, the writer formats, and packaging are the
//! external driver's job, not this binary's; see `config::Config`.

use std::path::PathBuf;

use clap::Parser;

use sqlite_dissect::carve::Carver;
use sqlite_dissect::config::Config;
use sqlite_dissect::history::HistoryIterator;
use sqlite_dissect::signature::schema_signature;
use sqlite_dissect::source::FileSource;
use sqlite_dissect::version::VersionChain;

/// Forensic, read-only inspection of a SQLite database file, its WAL, and
/// its rollback journal.
#[derive(Parser, Debug)]
#[command(name = "dissect", version, about)]
struct Args {
    /// Path to the SQLite database file.
    database_path: PathBuf,

    /// WAL file to overlay; auto-detected next to the database unless given.
    #[arg(long)]
    wal_path: Option<PathBuf>,

    /// Rollback-journal file to inspect; auto-detected unless given.
    #[arg(long)]
    journal_path: Option<PathBuf>,

    /// Skip rollback-journal auto-detection entirely.
    #[arg(long)]
    no_journal: bool,

    /// Tolerate non-fatal header deviations instead of raising them.
    #[arg(long)]
    no_strict: bool,

    /// Carve freeblocks and unallocated space for deleted cells.
    #[arg(long)]
    carve: bool,

    /// Also carve freelist trunk/leaf pages, not just live table leaves.
    #[arg(long)]
    carve_freelists: bool,

    /// Only report these tables (comma-separated); default is every table.
    #[arg(long, value_delimiter = ',')]
    tables: Option<Vec<String>>,

    /// Never report these tables, even if named in `--tables`.
    #[arg(long, value_delimiter = ',')]
    exempted_tables: Option<Vec<String>>,

    /// Increase log verbosity (-v, -vv); overridden by RUST_LOG if set.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn into_config(self) -> Config {
        let mut config = Config::new(self.database_path);
        config.wal_path = self.wal_path;
        config.journal_path = self.journal_path;
        config.no_journal = self.no_journal;
        config.strict_format_checking = !self.no_strict;
        config.carve = self.carve;
        config.carve_freelists = self.carve_freelists;
        config.tables = self.tables.unwrap_or_default();
        config.exempted_tables = self.exempted_tables.unwrap_or_default();
        config.schema = true;
        config.schema_history = true;
        config.signatures = self.carve;
        config
    }
}

fn install_logging(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn sibling_with_suffix(database_path: &std::path::Path, suffix: &str) -> PathBuf {
    let mut name = database_path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn resolve_wal_path(config: &Config) -> Option<PathBuf> {
    config.wal_path.clone().or_else(|| {
        let candidate = sibling_with_suffix(&config.database_path, "-wal");
        candidate.is_file().then_some(candidate)
    })
}

fn resolve_journal_path(config: &Config) -> Option<PathBuf> {
    if config.no_journal {
        return None;
    }
    config.journal_path.clone().or_else(|| {
        let candidate = sibling_with_suffix(&config.database_path, "-journal");
        candidate.is_file().then_some(candidate)
    })
}

fn run(config: &Config) -> Result<(), sqlite_dissect::Error> {
    let source = FileSource::open(&config.database_path).map_err(sqlite_dissect::version::Error::from)?;

    let wal_path = resolve_wal_path(config);
    let wal_bytes = wal_path
        .as_ref()
        .map(std::fs::read)
        .transpose()
        .map_err(|e| sqlite_dissect::version::Error::WalParsingError(sqlite_dissect::header::wal::Error::Io(e.to_string())))?;
    if let Some(path) = &wal_path {
        tracing::info!(?path, "overlaying WAL");
    }

    if let Some(path) = resolve_journal_path(config) {
        match std::fs::read(&path) {
            Ok(bytes) if bytes.len() >= sqlite_dissect::header::journal::HEADER_BYTES => {
                let header_bytes: [u8; sqlite_dissect::header::journal::HEADER_BYTES] =
                    bytes[..sqlite_dissect::header::journal::HEADER_BYTES].try_into().unwrap();
                match sqlite_dissect::header::journal::parse(&header_bytes) {
                    Ok(header) => tracing::info!(?path, ?header, "rollback journal present (header only; page records are opaque)"),
                    Err(e) => tracing::warn!(?path, error = %e, "rollback journal header did not parse"),
                }
            }
            Ok(_) => tracing::warn!(?path, "rollback journal is shorter than its header"),
            Err(e) => tracing::warn!(?path, error = %e, "could not read rollback journal"),
        }
    }

    let chain = VersionChain::open(source, wal_bytes.as_deref(), config.strict_format_checking)?;
    println!(
        "{} version(s); {} trailing uncommitted WAL frame(s)",
        chain.version_count(),
        chain.trailing_uncommitted_frame_count()
    );
    for diagnostic in chain.diagnostics() {
        println!("  warning: {diagnostic}");
    }

    let tables = chain.master_schema(0)?;
    let wanted: Vec<_> = tables.into_iter().filter(|t| config.wants_table(&t.table_name)).collect();

    for table in &wanted {
        println!("\ntable {:?} (root page {})", table.table_name, table.root_page);
        if !table.is_carvable() {
            println!("  (no cell-level history: WITHOUT ROWID, virtual, or internal without SQL)");
            continue;
        }

        let carver: Option<Box<dyn sqlite_dissect::history::CellCarver>> = if config.carve {
            match schema_signature(table) {
                Ok(signature) => Some(Box::new(Carver::new(
                    &chain,
                    signature,
                    chain.database_header().text_encoding,
                    config.carve_freelists,
                )) as Box<dyn sqlite_dissect::history::CellCarver>),
                Err(e) => {
                    tracing::warn!(table = %table.table_name, error = %e, "no signature; skipping carve for this table");
                    None
                }
            }
        } else {
            None
        };

        for commit in HistoryIterator::new(&chain, table.clone(), carver) {
            let commit = commit?;
            println!(
                "  version {}: {} page(s), +{} ~{} -{}, {} carved",
                commit.version_index,
                commit.pages.len(),
                commit.added_cells.len(),
                commit.updated_cells.len(),
                commit.removed_cells.len(),
                commit.carved_cells.len(),
            );
            for carved in &commit.carved_cells {
                println!(
                    "    carved {:?} cell on page {} at offset {}{}",
                    carved.kind,
                    carved.page_number,
                    carved.start_offset,
                    if carved.truncated { " (truncated)" } else { "" },
                );
            }
        }
    }

    Ok(())
}

fn main() {
    let args = Args::parse();
    install_logging(args.verbose);
    let config = args.into_config();
    if let Err(e) = run(&config) {
        tracing::error!(error = %e, "dissect failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
