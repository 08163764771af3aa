//! The frozen configuration record the driver layer assembles from flags,
//! config file, and environment before invoking the core. The core reads
//! this record only; merging flags/config/env is external (§6 Non-goals).

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Text,
    Csv,
    Sqlite,
    Xlsx,
    Case,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub wal_path: Option<PathBuf>,
    pub journal_path: Option<PathBuf>,
    pub no_journal: bool,
    pub strict_format_checking: bool,
    pub export_formats: Vec<ExportFormat>,
    pub output_directory: Option<PathBuf>,
    pub file_prefix: Option<String>,
    pub carve: bool,
    pub carve_freelists: bool,
    pub tables: Vec<String>,
    pub exempted_tables: Vec<String>,
    pub schema: bool,
    pub schema_history: bool,
    pub signatures: bool,
}

impl Config {
    /// Defaults matching the core's own safest behavior; the driver layer
    /// is expected to override these from flags/config/env.
    pub fn new(database_path: impl Into<PathBuf>) -> Config {
        Config {
            database_path: database_path.into(),
            wal_path: None,
            journal_path: None,
            no_journal: false,
            strict_format_checking: true,
            export_formats: Vec::new(),
            output_directory: None,
            file_prefix: None,
            carve: false,
            carve_freelists: false,
            tables: Vec::new(),
            exempted_tables: Vec::new(),
            schema: false,
            schema_history: false,
            signatures: false,
        }
    }

    pub fn wants_table(&self, table_name: &str) -> bool {
        if self.exempted_tables.iter().any(|t| t == table_name) {
            return false;
        }
        self.tables.is_empty() || self.tables.iter().any(|t| t == table_name)
    }
}
