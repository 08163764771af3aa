//! Parses `sqlite_master`/`sqlite_schema` rows and, for ordinary tables,
//! the `CREATE TABLE` SQL fragment: column names, declared types, and
//! affinities. Grounded on the column-affinity rules SQLite itself applies
//! (https://www.sqlite.org/datatype3.html#determination_of_column_affinity);
//! the teacher's own `sql.pest` grammar was not carried into the retrieval
//! pack, so the top-level comma split below is a hand-rolled scanner
//! rather than a parser-generator grammar.

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Master schema row at rowid {0} has fewer than 5 columns.")]
    TooFewColumns(i64),
    #[error("Could not locate a parenthesized column list in the CREATE TABLE SQL for '{0}'.")]
    NoColumnList(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Text,
    Numeric,
    Integer,
    Real,
    Blob,
}

/// SQLite's column-affinity determination rules, applied to a declared
/// type name (case-insensitive substring checks, in this priority order).
pub fn affinity_of_type_name(type_name: &str) -> Affinity {
    let upper = type_name.to_ascii_uppercase();
    if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        Affinity::Text
    } else if upper.contains("BLOB") || upper.is_empty() {
        Affinity::Blob
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        Affinity::Real
    } else if upper.contains("INT") {
        Affinity::Integer
    } else {
        Affinity::Numeric
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub declared_type: String,
    pub affinity: Affinity,
    pub not_null: bool,
    pub is_integer_primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    VirtualTable,
    Index,
    View,
    Trigger,
}

#[derive(Debug, Clone)]
pub struct SchemaObject {
    pub kind: ObjectKind,
    pub name: String,
    pub table_name: String,
    pub root_page: u32,
    pub sql: Option<String>,
    pub columns: Vec<ColumnDef>,
    pub without_rowid: bool,
    pub module_name: Option<String>,
    pub module_arguments: Vec<String>,
}

impl SchemaObject {
    pub fn is_internal(&self) -> bool {
        self.name.starts_with("sqlite_")
    }

    /// Eligible for signature generation and carving: an ordinary table,
    /// not WITHOUT ROWID, not virtual, with SQL available.
    pub fn is_carvable(&self) -> bool {
        self.kind == ObjectKind::Table && !self.without_rowid && self.sql.is_some()
    }
}

/// Builds a `SchemaObject` from one decoded `sqlite_master` row:
/// `(type, name, tbl_name, rootpage, sql)`.
pub fn parse_master_row(values: &[crate::serial_type::Value]) -> Result<SchemaObject, Error> {
    if values.len() < 5 {
        return Err(Error::TooFewColumns(0));
    }
    let type_str = text_of(&values[0]);
    let name = text_of(&values[1]);
    let table_name = text_of(&values[2]);
    let root_page = match &values[3] {
        crate::serial_type::Value::Integer(i) => (*i).max(0) as u32,
        _ => 0,
    };
    let sql = match &values[4] {
        crate::serial_type::Value::Text(s) => Some(s.clone()),
        _ => None,
    };

    let mut kind = match type_str.as_str() {
        "table" => ObjectKind::Table,
        "index" => ObjectKind::Index,
        "view" => ObjectKind::View,
        "trigger" => ObjectKind::Trigger,
        _ => ObjectKind::Table,
    };

    let mut columns = Vec::new();
    let mut without_rowid = false;
    let mut module_name = None;
    let mut module_arguments = Vec::new();

    if kind == ObjectKind::Table {
        if let Some(sql) = &sql {
            if let Some((module, args)) = parse_virtual_table(sql) {
                kind = ObjectKind::VirtualTable;
                module_name = Some(module);
                module_arguments = args;
            } else {
                let parsed = parse_create_table(sql)?;
                columns = parsed.0;
                without_rowid = parsed.1;
            }
        }
    }

    Ok(SchemaObject {
        kind,
        name,
        table_name,
        root_page,
        sql,
        columns,
        without_rowid,
        module_name,
        module_arguments,
    })
}

fn text_of(value: &crate::serial_type::Value) -> String {
    match value {
        crate::serial_type::Value::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_virtual_table(sql: &str) -> Option<(String, Vec<String>)> {
    let upper = sql.to_ascii_uppercase();
    let marker = "VIRTUAL TABLE";
    let pos = upper.find(marker)?;
    let after = &sql[pos + marker.len()..];
    let using_pos = after.to_ascii_uppercase().find("USING")?;
    let after_using = &after[using_pos + "USING".len()..];
    let trimmed = after_using.trim();
    let (module, rest) = match trimmed.find('(') {
        Some(open) => (trimmed[..open].trim().to_string(), &trimmed[open..]),
        None => (trimmed.trim_end_matches(';').trim().to_string(), ""),
    };
    let args = if let Some(close) = rest.rfind(')') {
        split_top_level(&rest[1..close])
    } else {
        Vec::new()
    };
    Some((module, args))
}

/// Strips `/* ... */` and `-- ...` comments while preserving the contents
/// of quoted strings and bracketed/backtick identifiers.
fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                let quote = c;
                out.push(c);
                i += 1;
                while i < chars.len() {
                    out.push(chars[i]);
                    if chars[i] == quote {
                        i += 1;
                        break;
                    }
                    i += 1;
                }
            }
            '[' => {
                out.push(c);
                i += 1;
                while i < chars.len() {
                    out.push(chars[i]);
                    if chars[i] == ']' {
                        i += 1;
                        break;
                    }
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Splits `s` at top-level commas (outside parens and quotes).
fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut current = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            '\'' | '"' | '`' => {
                current.push(c);
                for next in chars.by_ref() {
                    current.push(next);
                    if next == c {
                        break;
                    }
                }
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn parse_create_table(sql: &str) -> Result<(Vec<ColumnDef>, bool), Error> {
    let cleaned = strip_comments(sql);
    let upper = cleaned.to_ascii_uppercase();
    let marker_pos = upper
        .find("TABLE")
        .ok_or_else(|| Error::NoColumnList(sql.to_string()))?;
    let after_table = &cleaned[marker_pos + "TABLE".len()..];
    let open = after_table
        .find('(')
        .ok_or_else(|| Error::NoColumnList(sql.to_string()))?;
    let mut depth = 0_i32;
    let mut close = None;
    for (idx, c) in after_table.char_indices().skip(open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(idx);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close.ok_or_else(|| Error::NoColumnList(sql.to_string()))?;
    let body = &after_table[open + 1..close];
    let tail = &after_table[close + 1..];
    let without_rowid = tail.to_ascii_uppercase().contains("WITHOUT ROWID");

    let mut columns = Vec::new();
    for segment in split_top_level(body) {
        let seg_upper = segment.to_ascii_uppercase();
        let seg_trimmed = seg_upper.trim_start();
        let is_constraint = ["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"]
            .iter()
            .any(|kw| seg_trimmed.starts_with(kw));
        if is_constraint {
            continue;
        }
        if let Some(col) = parse_column_def(&segment) {
            columns.push(col);
        }
    }
    Ok((columns, without_rowid))
}

fn parse_column_def(segment: &str) -> Option<ColumnDef> {
    let trimmed = segment.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut tokens = tokenize(trimmed);
    if tokens.is_empty() {
        return None;
    }
    let name = tokens.remove(0);
    let declared_type = match tokens.first() {
        Some(t) if !is_constraint_keyword(t) => {
            let mut type_name = tokens.remove(0);
            if let Some(next) = tokens.first() {
                if next.starts_with('(') {
                    type_name.push_str(&tokens.remove(0));
                }
            }
            type_name
        }
        _ => String::new(),
    };
    let remainder_upper = tokens.join(" ").to_ascii_uppercase();
    let not_null = remainder_upper.contains("NOT NULL");
    let is_integer_primary_key = declared_type.eq_ignore_ascii_case("INTEGER") && remainder_upper.contains("PRIMARY KEY");
    Some(ColumnDef {
        name: strip_quotes(&name),
        affinity: affinity_of_type_name(&declared_type),
        declared_type,
        not_null,
        is_integer_primary_key,
    })
}

fn is_constraint_keyword(token: &str) -> bool {
    matches!(
        token.to_ascii_uppercase().as_str(),
        "NOT" | "NULL" | "PRIMARY" | "UNIQUE" | "CHECK" | "DEFAULT" | "COLLATE" | "REFERENCES" | "GENERATED" | "AS"
    )
}

fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    for (open, close) in [('"', '"'), ('`', '`'), ('[', ']'), ('\'', '\'')] {
        if s.starts_with(open) && s.ends_with(close) && s.len() >= 2 {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}

/// Splits a column-definition segment into whitespace-separated tokens,
/// keeping a parenthesized type parameter list (`NUMERIC(10,2)`) glued to
/// its type name token and quoted identifiers intact.
fn tokenize(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' || c == '`' || c == '\'' || c == '[' {
            let close = if c == '[' { ']' } else { c };
            let mut tok = String::new();
            tok.push(chars.next().unwrap());
            for next in chars.by_ref() {
                tok.push(next);
                if next == close {
                    break;
                }
            }
            tokens.push(tok);
            continue;
        }
        if c == '(' {
            let mut depth = 0_i32;
            let mut tok = String::new();
            for next in chars.by_ref() {
                tok.push(next);
                match next {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
            }
            tokens.push(tok);
            continue;
        }
        let mut tok = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || c == '(' {
                break;
            }
            tok.push(c);
            chars.next();
        }
        tokens.push(tok);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_rules_follow_priority_order() {
        assert_eq!(affinity_of_type_name("VARCHAR(10)"), Affinity::Text);
        assert_eq!(affinity_of_type_name("BLOB"), Affinity::Blob);
        assert_eq!(affinity_of_type_name(""), Affinity::Blob);
        assert_eq!(affinity_of_type_name("DOUBLE"), Affinity::Real);
        assert_eq!(affinity_of_type_name("BIGINT"), Affinity::Integer);
        assert_eq!(affinity_of_type_name("DECIMAL(10,5)"), Affinity::Numeric);
    }

    #[test]
    fn parses_simple_create_table() {
        let sql = "CREATE TABLE t (a INTEGER PRIMARY KEY, b TEXT NOT NULL)";
        let (columns, without_rowid) = parse_create_table(sql).unwrap();
        assert!(!without_rowid);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name, "a");
        assert!(columns[0].is_integer_primary_key);
        assert_eq!(columns[1].affinity, Affinity::Text);
        assert!(columns[1].not_null);
    }

    #[test]
    fn without_rowid_suffix_is_detected() {
        let sql = "CREATE TABLE u (k TEXT PRIMARY KEY) WITHOUT ROWID";
        let (_, without_rowid) = parse_create_table(sql).unwrap();
        assert!(without_rowid);
    }

    #[test]
    fn table_constraints_are_skipped_not_mistaken_for_columns() {
        let sql = "CREATE TABLE t (a INTEGER, b INTEGER, PRIMARY KEY (a, b))";
        let (columns, _) = parse_create_table(sql).unwrap();
        assert_eq!(columns.len(), 2);
    }

    #[test]
    fn comments_are_stripped_before_splitting() {
        let sql = "CREATE TABLE t (\n  a INTEGER, -- the key\n  /* a text column */ b TEXT\n)";
        let (columns, _) = parse_create_table(sql).unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[1].name, "b");
    }

    #[test]
    fn quoted_column_names_are_unquoted() {
        let sql = r#"CREATE TABLE t ("my col" TEXT)"#;
        let (columns, _) = parse_create_table(sql).unwrap();
        assert_eq!(columns[0].name, "my col");
    }

    #[test]
    fn parses_virtual_table_module_and_arguments() {
        let sql = "CREATE VIRTUAL TABLE t USING fts4(a, b)";
        let (module, args) = parse_virtual_table(sql).unwrap();
        assert_eq!(module, "fts4");
        assert_eq!(args, vec!["a".to_string(), "b".to_string()]);
    }
}
