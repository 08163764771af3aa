//! The signature generator (C7): per-table, per-column profiles of which
//! serial types are plausible, built either from column affinity alone
//! (the *schema* flavor) or from observed data across a reference version
//! or the whole version history (the other three flavors). The carver
//! (C8) uses a signature to accept, reject, or truncate a candidate cell.

use std::collections::HashSet;

use crate::schema::{Affinity, ColumnDef, SchemaObject};
use crate::serial_type::{simplified_type, SimplifiedType};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("'{0}' is not a supported signature entry: virtual tables, WITHOUT ROWID tables, and internal schema objects without SQL have no cell-level signature.")]
    UnsupportedEntry(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Schema,
    Simplified,
    Focused,
    Probabilistic,
}

/// The serial types an affinity permits, per the schema-flavor mapping
/// table. `NOT NULL` removes 0 (`allow_null`) from the set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedSerialTypes {
    pub allow_null: bool,
    pub allow_ints: HashSet<i64>,
    pub allow_real: bool,
    pub allow_text: bool,
    pub allow_blob: bool,
}

impl AllowedSerialTypes {
    fn for_column(column: &ColumnDef) -> AllowedSerialTypes {
        // An INTEGER PRIMARY KEY column is a rowid alias and is always
        // stored as NULL (serial type 0) in the record body.
        if column.is_integer_primary_key {
            return AllowedSerialTypes {
                allow_null: true,
                allow_ints: HashSet::new(),
                allow_real: false,
                allow_text: false,
                allow_blob: false,
            };
        }
        let mut allowed = match column.affinity {
            Affinity::Text => AllowedSerialTypes {
                allow_null: true,
                allow_ints: HashSet::new(),
                allow_real: false,
                allow_text: true,
                allow_blob: false,
            },
            Affinity::Blob => AllowedSerialTypes {
                allow_null: true,
                allow_ints: HashSet::new(),
                allow_real: false,
                allow_text: false,
                allow_blob: true,
            },
            Affinity::Real => AllowedSerialTypes {
                allow_null: true,
                allow_ints: HashSet::new(),
                allow_real: true,
                allow_text: false,
                allow_blob: false,
            },
            Affinity::Numeric => AllowedSerialTypes {
                allow_null: true,
                allow_ints: [1, 2, 3, 4, 5, 6, 8, 9].into_iter().collect(),
                allow_real: true,
                allow_text: true,
                allow_blob: false,
            },
            Affinity::Integer => AllowedSerialTypes {
                allow_null: true,
                allow_ints: [1, 2, 3, 4, 5, 6, 8, 9].into_iter().collect(),
                allow_real: false,
                allow_text: false,
                allow_blob: false,
            },
        };
        if column.not_null {
            allowed.allow_null = false;
        }
        allowed
    }

    pub fn contains(&self, serial_type: i64) -> bool {
        match serial_type {
            0 => self.allow_null,
            1..=6 | 8 | 9 => self.allow_ints.contains(&serial_type),
            7 => self.allow_real,
            x if x >= 13 && x % 2 == 1 => self.allow_text,
            x if x >= 12 && x % 2 == 0 => self.allow_blob,
            _ => false,
        }
    }
}

/// A serial type observed under the *focused* flavor: integer widths are
/// collapsed, but the literal-0/literal-1 serial types (8 and 9) are kept
/// distinct from a general `Integer`, since a column that only ever stores
/// those literals is informative for the carver's per-column presence
/// statistic in ALTER TABLE-widened tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FocusedToken {
    Null,
    IntegerLiteralZero,
    IntegerLiteralOne,
    Integer,
    Real,
    Text,
    Blob,
}

impl FocusedToken {
    fn of(serial_type: i64) -> FocusedToken {
        match serial_type {
            0 => FocusedToken::Null,
            8 => FocusedToken::IntegerLiteralZero,
            9 => FocusedToken::IntegerLiteralOne,
            1..=6 => FocusedToken::Integer,
            7 => FocusedToken::Real,
            x if x >= 13 && x % 2 == 1 => FocusedToken::Text,
            _ => FocusedToken::Blob,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSignature {
    Schema(AllowedSerialTypes),
    Simplified(HashSet<SimplifiedType>),
    Focused(HashSet<FocusedToken>),
    /// `(simplified_type, frequency)`, frequency normalized over rows in
    /// which the column was present.
    Probabilistic(Vec<(SimplifiedType, f64)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSignature {
    pub table_name: String,
    pub flavor: Flavor,
    pub columns: Vec<ColumnSignature>,
}

impl TableSignature {
    /// Whether `serial_type` is plausible for column `column_index`, per
    /// this signature's flavor. A column index past the end of the
    /// signature (a row shortened by an `ALTER TABLE ADD COLUMN` taken
    /// before this table's columns were last observed) is never allowed;
    /// callers treat that as the truncation point.
    pub fn column_allows(&self, column_index: usize, serial_type: i64) -> bool {
        match self.columns.get(column_index) {
            None => false,
            Some(ColumnSignature::Schema(allowed)) => allowed.contains(serial_type),
            Some(ColumnSignature::Simplified(set)) => set.contains(&simplified_type(serial_type)),
            Some(ColumnSignature::Focused(set)) => set.contains(&FocusedToken::of(serial_type)),
            Some(ColumnSignature::Probabilistic(freqs)) => {
                let want = simplified_type(serial_type);
                freqs.iter().any(|&(t, f)| t == want && f > 0.0)
            }
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Builds the *schema* flavor signature directly from column affinities;
/// no data is consulted.
pub fn schema_signature(table: &SchemaObject) -> Result<TableSignature, Error> {
    require_supported(table)?;
    let columns = table.columns.iter().map(|c| ColumnSignature::Schema(AllowedSerialTypes::for_column(c))).collect();
    Ok(TableSignature {
        table_name: table.table_name.clone(),
        flavor: Flavor::Schema,
        columns,
    })
}

/// Builds the *simplified*, *focused*, or *probabilistic* flavor from
/// observed rows. Each row is the serial-type sequence of one table-leaf
/// record; rows shorter than `table.columns` (an `ALTER TABLE`-widened
/// table observed before the widening) contribute to only their present
/// columns.
pub fn data_signature(table: &SchemaObject, flavor: Flavor, rows: &[Vec<i64>]) -> Result<TableSignature, Error> {
    require_supported(table)?;
    if flavor == Flavor::Schema {
        return schema_signature(table);
    }
    let column_count = table.columns.len();
    let mut simplified_sets: Vec<HashSet<SimplifiedType>> = vec![HashSet::new(); column_count];
    let mut focused_sets: Vec<HashSet<FocusedToken>> = vec![HashSet::new(); column_count];
    let mut counts: Vec<std::collections::HashMap<SimplifiedType, usize>> = vec![Default::default(); column_count];
    let mut present: Vec<usize> = vec![0; column_count];

    for row in rows {
        for (i, &serial_type) in row.iter().enumerate().take(column_count) {
            present[i] += 1;
            simplified_sets[i].insert(simplified_type(serial_type));
            focused_sets[i].insert(FocusedToken::of(serial_type));
            *counts[i].entry(simplified_type(serial_type)).or_insert(0) += 1;
        }
    }

    let columns = (0..column_count)
        .map(|i| match flavor {
            Flavor::Simplified => ColumnSignature::Simplified(simplified_sets[i].clone()),
            Flavor::Focused => ColumnSignature::Focused(focused_sets[i].clone()),
            Flavor::Probabilistic => {
                let total = present[i].max(1) as f64;
                let mut freqs: Vec<(SimplifiedType, f64)> =
                    counts[i].iter().map(|(&t, &n)| (t, n as f64 / total)).collect();
                freqs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                ColumnSignature::Probabilistic(freqs)
            }
            Flavor::Schema => unreachable!(),
        })
        .collect();

    Ok(TableSignature {
        table_name: table.table_name.clone(),
        flavor,
        columns,
    })
}

fn require_supported(table: &SchemaObject) -> Result<(), Error> {
    if table.is_carvable() {
        Ok(())
    } else {
        Err(Error::UnsupportedEntry(table.table_name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ObjectKind;

    fn column(name: &str, affinity: Affinity, not_null: bool) -> ColumnDef {
        ColumnDef {
            name: name.into(),
            declared_type: String::new(),
            affinity,
            not_null,
            is_integer_primary_key: false,
        }
    }

    fn table(columns: Vec<ColumnDef>, without_rowid: bool) -> SchemaObject {
        SchemaObject {
            kind: ObjectKind::Table,
            name: "t".into(),
            table_name: "t".into(),
            root_page: 2,
            sql: Some("CREATE TABLE t (...)".into()),
            columns,
            without_rowid,
            module_name: None,
            module_arguments: Vec::new(),
        }
    }

    #[test]
    fn schema_flavor_follows_affinity_mapping_table() {
        let t = table(
            vec![
                column("a", Affinity::Integer, false),
                column("b", Affinity::Text, true),
            ],
            false,
        );
        let sig = schema_signature(&t).unwrap();
        assert!(sig.column_allows(0, 0)); // NULL allowed, no NOT NULL
        assert!(sig.column_allows(0, 1)); // 1-byte int
        assert!(!sig.column_allows(0, 19)); // text not allowed for INTEGER affinity
        assert!(!sig.column_allows(1, 0)); // NOT NULL removes 0
        assert!(sig.column_allows(1, 19)); // text allowed
        assert!(!sig.column_allows(1, 1)); // int not allowed for TEXT affinity
    }

    #[test]
    fn integer_primary_key_column_only_allows_null() {
        let mut col = column("id", Affinity::Integer, false);
        col.is_integer_primary_key = true;
        let t = table(vec![col], false);
        let sig = schema_signature(&t).unwrap();
        assert!(sig.column_allows(0, 0));
        assert!(!sig.column_allows(0, 1));
    }

    #[test]
    fn without_rowid_table_has_no_signature() {
        let t = table(vec![column("a", Affinity::Integer, false)], true);
        assert_eq!(schema_signature(&t), Err(Error::UnsupportedEntry("t".into())));
    }

    #[test]
    fn focused_flavor_keeps_int_literals_distinct_from_integer() {
        let t = table(vec![column("a", Affinity::Integer, false)], false);
        let rows = vec![vec![8], vec![8], vec![1]];
        let sig = data_signature(&t, Flavor::Focused, &rows).unwrap();
        assert!(sig.column_allows(0, 8));
        assert!(sig.column_allows(0, 1));
        assert!(!sig.column_allows(0, 9));
    }

    #[test]
    fn probabilistic_flavor_normalizes_over_present_rows() {
        let t = table(vec![column("a", Affinity::Numeric, false)], false);
        let rows = vec![vec![1], vec![1], vec![19]];
        let sig = data_signature(&t, Flavor::Probabilistic, &rows).unwrap();
        match &sig.columns[0] {
            ColumnSignature::Probabilistic(freqs) => {
                let int_freq = freqs.iter().find(|(t, _)| *t == SimplifiedType::Integer).unwrap().1;
                assert!((int_freq - 2.0 / 3.0).abs() < 1e-9);
            }
            _ => panic!("expected probabilistic signature"),
        }
    }

    #[test]
    fn shorter_rows_only_contribute_to_present_columns() {
        let t = table(
            vec![column("a", Affinity::Integer, false), column("b", Affinity::Text, false)],
            false,
        );
        let rows = vec![vec![1]]; // column b absent, as if added by ALTER TABLE after this row
        let sig = data_signature(&t, Flavor::Simplified, &rows).unwrap();
        assert!(!sig.column_allows(1, 19));
    }
}
