//! LanceDB plumbing shared by the Lance-backed indexes.

use crate::error::{DbError, Result};

use arrow_array::cast::AsArray;
use arrow_array::{Array, RecordBatch, RecordBatchIterator};
use arrow_schema::{DataType, Schema};
use std::path::Path;
use std::sync::Arc;

/// Connect to (creating if needed) the Lance dataset directory `dir`.
pub async fn connect(dir: &Path) -> Result<lancedb::Connection> {
    std::fs::create_dir_all(dir)?;
    let uri = dir
        .to_str()
        .ok_or_else(|| DbError::LanceDb(format!("non-utf8 lance path: {}", dir.display())))?;
    let connection = lancedb::connect(uri)
        .execute()
        .await
        .map_err(|e| DbError::LanceDb(e.to_string()))?;
    Ok(connection)
}

/// Open table `name`, or create it empty with `schema`.
///
/// If the table exists but is unreadable (e.g. process killed mid-write) or
/// was written with an incompatible schema, it is dropped and recreated.
/// Index contents are rebuildable from the page and table stores.
pub async fn open_or_create_table(
    connection: &lancedb::Connection,
    name: &str,
    schema: &Schema,
) -> Result<lancedb::Table> {
    match connection.open_table(name).execute().await {
        Ok(table) => match table.schema().await {
            Ok(actual) if schema_matches(&actual, schema) => return Ok(table),
            Ok(_) => {
                tracing::warn!(table = name, "lance table schema changed, recreating");
                drop_table(connection, name).await;
            }
            Err(error) => {
                tracing::warn!(%error, table = name, "failed to read lance table schema, recreating");
                drop_table(connection, name).await;
            }
        },
        Err(error) => {
            tracing::debug!(%error, table = name, "failed to open lance table, will create");
        }
    }

    match create_empty_table(connection, name, schema).await {
        Ok(table) => return Ok(table),
        Err(error) => {
            tracing::warn!(
                %error,
                table = name,
                "failed to create lance table, attempting recovery from corrupted state"
            );
        }
    }

    // Both open and create failed: table data exists but is corrupted.
    drop_table(connection, name).await;
    let table = create_empty_table(connection, name, schema).await?;
    tracing::info!(table = name, "lance table recovered, contents will need re-indexing");
    Ok(table)
}

pub async fn create_empty_table(
    connection: &lancedb::Connection,
    name: &str,
    schema: &Schema,
) -> Result<lancedb::Table> {
    let batches = RecordBatchIterator::new(vec![].into_iter().map(Ok), Arc::new(schema.clone()));
    connection
        .create_table(name, Box::new(batches))
        .execute()
        .await
        .map_err(|e| DbError::LanceDb(e.to_string()).into())
}

/// Drop `name`, logging instead of failing when it is already gone.
pub async fn drop_table(connection: &lancedb::Connection, name: &str) {
    if let Err(error) = connection.drop_table(name, &[]).await {
        tracing::debug!(%error, table = name, "drop_table failed, proceeding anyway");
    }
}

/// Append one batch to `table`.
pub async fn add_batch(table: &lancedb::Table, batch: RecordBatch) -> Result<()> {
    let schema = batch.schema();
    let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
    table
        .add(Box::new(batches))
        .execute()
        .await
        .map_err(|e| DbError::LanceDb(e.to_string()))?;
    Ok(())
}

/// Quote `value` as a SQL string literal for Lance filter predicates.
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `column LIKE '%needle%'` with LIKE wildcards in `needle` escaped, so the
/// predicate is a literal substring test.
pub fn contains_predicate(column: &str, needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("{column} LIKE {} ESCAPE '\\'", sql_literal(&format!("%{escaped}%")))
}

/// `column IN ('a', 'b')`, or `None` when `values` is empty.
pub fn in_predicate<'a>(column: &str, values: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let quoted: Vec<String> = values.into_iter().map(sql_literal).collect();
    if quoted.is_empty() {
        None
    } else {
        Some(format!("{column} IN ({})", quoted.join(", ")))
    }
}

/// Non-null values of Utf8 column `name` paired with their row index.
pub fn string_values(batch: &RecordBatch, name: &str) -> Vec<(usize, String)> {
    let Some(column) = batch.column_by_name(name) else {
        return Vec::new();
    };
    let values: &arrow_array::StringArray = column.as_string::<i32>();
    (0..values.len())
        .filter(|&index| values.is_valid(index))
        .map(|index| (index, values.value(index).to_string()))
        .collect()
}

/// Every expected column is present, and fixed-size list columns keep their
/// length. Lance may attach field metadata, so full schema equality is too
/// strict.
fn schema_matches(actual: &Schema, expected: &Schema) -> bool {
    expected.fields().iter().all(|field| {
        match actual.field_with_name(field.name()) {
            Ok(found) => match (found.data_type(), field.data_type()) {
                (DataType::FixedSizeList(_, a), DataType::FixedSizeList(_, b)) => a == b,
                (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
            },
            Err(_) => false,
        }
    })
}
