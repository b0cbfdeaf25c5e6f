//! Schema introspection module.
//!
//! Tables come from `sqlite_master`; column, foreign key and index details
//! come from the `PRAGMA` family. PRAGMA arguments cannot be bound, so table
//! names are checked with [`validate_identifier`] before they are interpolated.

use crate::error::{DbError, DbResult};
use crate::models::{
    Affinity, ColumnInfo, ForeignKey, IndexInfo, IndexOrigin, ObjectKind, ReferentialAction,
    TableEntry, TableListing, TableSchema,
};
use humansize::{WINDOWS, format_size};
use sqlx::{Row, SqliteConnection};
use tracing::debug;

mod queries {
    pub const LIST_TABLES_WITH_VIEWS: &str = r#"
        SELECT name, type FROM sqlite_master
        WHERE type IN ('table', 'view')
        AND name NOT LIKE 'sqlite_%'
        ORDER BY name
        "#;

    pub const LIST_TABLES_NO_VIEWS: &str = r#"
        SELECT name, type FROM sqlite_master
        WHERE type = 'table'
        AND name NOT LIKE 'sqlite_%'
        ORDER BY name
        "#;

    pub const DATABASE_SIZE: &str = "SELECT page_count * page_size AS size_bytes \
         FROM pragma_page_count(), pragma_page_size()";
}

const MAX_IDENTIFIER_LEN: usize = 128;

/// Check that a table or index name is a plain SQL identifier.
pub fn validate_identifier(name: &str) -> DbResult<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');

    if !valid_start || !valid_rest || name.len() > MAX_IDENTIFIER_LEN {
        return Err(DbError::invalid_params(format!(
            "'{}' is not a valid table name",
            name
        )));
    }
    Ok(())
}

/// List all tables (and optionally views) with the datastore size.
pub async fn list_tables(
    conn: &mut SqliteConnection,
    include_views: bool,
) -> DbResult<TableListing> {
    let query = if include_views {
        queries::LIST_TABLES_WITH_VIEWS
    } else {
        queries::LIST_TABLES_NO_VIEWS
    };

    let rows = sqlx::query(query).fetch_all(&mut *conn).await?;
    let mut tables = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row.try_get("name")?;
        let kind: String = row.try_get("type")?;
        tables.push(TableEntry {
            name,
            kind: ObjectKind::from_master_type(&kind),
        });
    }

    let size_bytes = fetch_database_size(conn).await;
    debug!(count = tables.len(), size_bytes, "Listed tables");

    Ok(TableListing {
        tables,
        database_size_bytes: size_bytes,
        database_size: format_size(size_bytes, WINDOWS),
    })
}

async fn fetch_database_size(conn: &mut SqliteConnection) -> u64 {
    sqlx::query(queries::DATABASE_SIZE)
        .fetch_one(conn)
        .await
        .ok()
        .and_then(|row| row.try_get::<i64, _>("size_bytes").ok())
        .map(|size| size.max(0) as u64)
        .unwrap_or(0)
}

/// Describe a table's columns, keys and indexes.
pub async fn describe_table(conn: &mut SqliteConnection, table_name: &str) -> DbResult<TableSchema> {
    validate_identifier(table_name)?;

    let columns = fetch_columns(conn, table_name).await?;
    if columns.is_empty() {
        return Err(DbError::schema(
            format!("Table '{}' not found", table_name),
            table_name,
        ));
    }

    let mut key_columns: Vec<_> = columns
        .iter()
        .filter_map(|c| c.primary_key_position.map(|pos| (pos, c.name.clone())))
        .collect();
    key_columns.sort_unstable_by_key(|(pos, _)| *pos);
    let primary_key = key_columns.into_iter().map(|(_, name)| name).collect();

    let foreign_keys = fetch_foreign_keys(conn, table_name).await?;
    let indexes = fetch_indexes(conn, table_name).await?;

    Ok(TableSchema {
        table_name: table_name.to_string(),
        columns,
        primary_key,
        foreign_keys,
        indexes,
    })
}

async fn fetch_columns(
    conn: &mut SqliteConnection,
    table_name: &str,
) -> DbResult<Vec<ColumnInfo>> {
    let pragma_query = format!("PRAGMA table_info('{}')", table_name);
    let rows = sqlx::query(&pragma_query).fetch_all(conn).await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let declared_type: String = row.try_get("type")?;
        let affinity = Affinity::from_declared_type(&declared_type);
        let notnull: i64 = row.try_get("notnull")?;
        let default_expr: Option<String> = row.try_get("dflt_value").ok().flatten();
        let pk: i64 = row.try_get("pk")?;

        columns.push(ColumnInfo {
            name: row.try_get("name")?,
            declared_type,
            affinity,
            nullable: notnull == 0,
            default_value: default_expr.map(|expr| affinity.decode_default(&expr)),
            primary_key_position: u32::try_from(pk).ok().filter(|pos| *pos > 0),
        });
    }
    Ok(columns)
}

async fn fetch_foreign_keys(
    conn: &mut SqliteConnection,
    table_name: &str,
) -> DbResult<Vec<ForeignKey>> {
    let fk_query = format!("PRAGMA foreign_key_list('{}')", table_name);
    let rows = sqlx::query(&fk_query).fetch_all(conn).await?;

    let mut foreign_keys = Vec::with_capacity(rows.len());
    for row in &rows {
        let on_delete: String = row.try_get("on_delete").unwrap_or_default();
        let on_update: String = row.try_get("on_update").unwrap_or_default();
        foreign_keys.push(ForeignKey {
            column: row.try_get("from")?,
            references_table: row.try_get("table")?,
            references_column: row.try_get::<Option<String>, _>("to").ok().flatten(),
            on_delete: ReferentialAction::from_pragma(&on_delete),
            on_update: ReferentialAction::from_pragma(&on_update),
        });
    }
    Ok(foreign_keys)
}

async fn fetch_indexes(conn: &mut SqliteConnection, table_name: &str) -> DbResult<Vec<IndexInfo>> {
    let idx_query = format!("PRAGMA index_list('{}')", table_name);
    let idx_list = sqlx::query(&idx_query).fetch_all(&mut *conn).await?;

    let mut indexes = Vec::new();
    for idx_row in &idx_list {
        let name: String = idx_row.try_get("name")?;
        let unique: i64 = idx_row.try_get("unique")?;
        let origin: String = idx_row.try_get("origin").unwrap_or_default();

        let columns = fetch_index_columns(conn, &name).await?;
        if !columns.is_empty() {
            indexes.push(IndexInfo {
                name,
                columns,
                unique: unique != 0,
                origin: IndexOrigin::from_pragma(&origin),
            });
        }
    }
    Ok(indexes)
}

async fn fetch_index_columns(conn: &mut SqliteConnection, index_name: &str) -> DbResult<Vec<String>> {
    // Auto-index names (sqlite_autoindex_t_1) are generated, never caller input
    let query = format!("PRAGMA index_info('{}')", index_name.replace('\'', "''"));
    let rows = sqlx::query(&query).fetch_all(conn).await?;

    // Expression indexes report a NULL column name
    Ok(rows
        .iter()
        .filter_map(|row| row.try_get::<Option<String>, _>("name").ok().flatten())
        .collect())
}
