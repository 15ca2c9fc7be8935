//! Raw schema extraction, the first script stage of every run.

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::analyzer::{distinct_count, present_numbers};
use crate::config::RunLayout;
use crate::contracts::models::{ColumnMetadata, RawSchemaMetadata, Relationship, TableMetadata};
use crate::core::ArtifactStore;
use crate::errors::Result;
use crate::exec::table::sample_variance;
use crate::exec::{csv_files, Column, Table};
use crate::pipeline::definition::RAW_SCHEMA;

/// Name of the artifact written by [`extract_and_save`].
pub const RAW_SCHEMA_ARTIFACT: &str = "raw_schema_metadata";

fn column_metadata(column: &Column, row_count: usize) -> ColumnMetadata {
    let null_count = column.null_count();
    let unique_count = distinct_count(column).unwrap_or(0);
    let mut meta = ColumnMetadata {
        dtype: column.dtype().to_string(),
        nullable: null_count > 0,
        unique: unique_count == row_count,
        null_count: null_count as u64,
        unique_count: unique_count as u64,
        min: None,
        max: None,
        mean: None,
        std: None,
    };
    if column.is_numeric() {
        let values = present_numbers(column);
        if !values.is_empty() {
            #[allow(clippy::cast_precision_loss)]
            let n = values.len() as f64;
            meta.min = values.iter().copied().reduce(f64::min);
            meta.max = values.iter().copied().reduce(f64::max);
            meta.mean = Some(values.iter().sum::<f64>() / n);
            meta.std = sample_variance(&values).map(f64::sqrt);
        }
    }
    meta
}

fn table_metadata(table: &Table) -> TableMetadata {
    let row_count = table.row_count();
    let mut primary_key = None;
    let mut columns = IndexMap::new();
    for column in &table.columns {
        let meta = column_metadata(column, row_count);
        if primary_key.is_none()
            && meta.unique
            && !meta.nullable
            && column.name.to_lowercase().contains("id")
        {
            primary_key = Some(column.name.clone());
        }
        columns.insert(column.name.clone(), meta);
    }
    TableMetadata {
        row_count: row_count as u64,
        columns,
        primary_key,
        foreign_keys: Vec::new(),
    }
}

/// Extracts raw metadata of loaded tables.
///
/// A column named `<table>.<column>` is a foreign key when `<table>` is
/// another loaded table that has a primary key.
#[must_use]
pub fn extract_schema(tables: &[(String, Table)]) -> RawSchemaMetadata {
    let mut metadata: IndexMap<String, TableMetadata> = tables
        .iter()
        .map(|(name, table)| (name.clone(), table_metadata(table)))
        .collect();

    let mut relationships = Vec::new();
    let mut foreign_keys: Vec<(String, String)> = Vec::new();
    for (table_name, table) in &metadata {
        for column_name in table.columns.keys() {
            let Some((referenced, _)) = column_name.split_once('.') else {
                continue;
            };
            if referenced == table_name {
                continue;
            }
            let Some(to_column) = metadata.get(referenced).and_then(|t| t.primary_key.clone()) else {
                continue;
            };
            foreign_keys.push((table_name.clone(), column_name.clone()));
            relationships.push(Relationship {
                from_table: table_name.clone(),
                from_column: column_name.clone(),
                to_table: referenced.to_string(),
                to_column,
            });
        }
    }
    for (table_name, column_name) in foreign_keys {
        if let Some(table) = metadata.get_mut(&table_name) {
            if !table.foreign_keys.contains(&column_name) {
                table.foreign_keys.push(column_name);
            }
        }
    }

    RawSchemaMetadata {
        source_type: "csv".to_string(),
        number_of_tables: metadata.len() as u64,
        tables: metadata,
        relationships,
    }
}

/// Extracts the metadata of every table in `data_dir`.
///
/// A file that cannot be parsed is recorded as an empty table. A missing or
/// unreadable directory is an error.
pub fn extract_from_dir(data_dir: &Path) -> Result<RawSchemaMetadata> {
    let tables: Vec<(String, Table)> = csv_files(data_dir)?
        .into_iter()
        .map(|(name, path)| match Table::from_csv(&path) {
            Ok(table) => (name, table),
            Err(reason) => {
                warn!(table = %name, path = %path.display(), %reason, "Unreadable table recorded as empty");
                (name, Table::default())
            }
        })
        .collect();
    Ok(extract_schema(&tables))
}

/// Runs the raw schema script and writes `raw_schema_metadata.json`.
pub fn extract_and_save(layout: &RunLayout) -> Result<PathBuf> {
    let metadata = extract_from_dir(&layout.data_dir())?;
    let receipt = ArtifactStore::new(layout.scripts_dir()).write(RAW_SCHEMA_ARTIFACT, &metadata)?;
    info!(
        stage = RAW_SCHEMA,
        tables = metadata.number_of_tables,
        relationships = metadata.relationships.len(),
        "Raw schema extracted"
    );
    Ok(receipt.path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Cell;
    use pretty_assertions::assert_eq;

    fn customers() -> Table {
        Table::from_pairs(vec![
            ("customer_id".into(), vec![Cell::Int(1), Cell::Int(2), Cell::Int(3)]),
            ("name".into(), vec![Cell::Str("a".into()), Cell::Str("b".into()), Cell::Str("b".into())]),
        ])
        .unwrap()
    }

    fn orders() -> Table {
        Table::from_pairs(vec![
            ("order_id".into(), vec![Cell::Int(10), Cell::Int(11)]),
            ("customers.customer_id".into(), vec![Cell::Int(1), Cell::Int(1)]),
            ("amount".into(), vec![Cell::Float(2.0), Cell::Null]),
        ])
        .unwrap()
    }

    #[test]
    fn test_primary_key_and_stats() {
        let meta = extract_schema(&[("customers".into(), customers())]);
        let table = &meta.tables["customers"];
        assert_eq!(table.row_count, 3);
        assert_eq!(table.primary_key.as_deref(), Some("customer_id"));
        assert!(!table.columns["name"].unique);
        assert_eq!(table.columns["name"].unique_count, 2);
        assert_eq!(table.columns["customer_id"].mean, Some(2.0));
        assert_eq!(meta.number_of_tables, 1);
    }

    #[test]
    fn test_relationships_from_dotted_columns() {
        let meta = extract_schema(&[("customers".into(), customers()), ("orders".into(), orders())]);
        assert_eq!(
            meta.relationships,
            vec![Relationship {
                from_table: "orders".into(),
                from_column: "customers.customer_id".into(),
                to_table: "customers".into(),
                to_column: "customer_id".into(),
            }]
        );
        assert_eq!(meta.tables["orders"].foreign_keys, vec!["customers.customer_id".to_string()]);
        let amount = &meta.tables["orders"].columns["amount"];
        assert!(amount.nullable);
        assert_eq!(amount.null_count, 1);
    }

    #[test]
    fn test_reference_without_primary_key_is_ignored() {
        let plain = Table::from_pairs(vec![("label".into(), vec![Cell::Str("x".into())])]).unwrap();
        let refs = Table::from_pairs(vec![("plain.label".into(), vec![Cell::Str("x".into())])]).unwrap();
        let meta = extract_schema(&[("plain".into(), plain), ("refs".into(), refs)]);
        assert!(meta.relationships.is_empty());
    }

    #[test]
    fn test_extract_and_save_from_csv() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(dir.path());
        std::fs::create_dir_all(layout.data_dir()).unwrap();
        std::fs::write(
            layout.data_dir().join("products.csv"),
            "product_id,price\n1,9.5\n2,3.0\n",
        )
        .unwrap();

        let path = extract_and_save(&layout).unwrap();
        let written: RawSchemaMetadata = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(written.tables["products"].primary_key.as_deref(), Some("product_id"));
        assert_eq!(written.source_type, "csv");
    }

    #[test]
    fn test_unparseable_csv_is_an_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.csv"), "good_id\n1\n2\n").unwrap();
        std::fs::write(dir.path().join("ragged.csv"), "a,b\n1,2,3\n").unwrap();

        let meta = extract_from_dir(dir.path()).unwrap();
        assert_eq!(meta.number_of_tables, 2);
        assert_eq!(meta.tables["ragged"].row_count, 0);
        assert!(meta.tables["ragged"].columns.is_empty());
        assert_eq!(meta.tables["good"].row_count, 2);
    }

    #[test]
    fn test_missing_data_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(extract_from_dir(&dir.path().join("absent")).is_err());
    }
}
