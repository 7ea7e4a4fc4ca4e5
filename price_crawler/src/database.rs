//! Database operations
//!
//! Uses parameterized queries for every value. Table and column identifiers
//! only ever come from the static catalog. Callers own transactions: every
//! helper here takes a `&Connection`, which a `Transaction` derefs to.

use crate::error::{Error, Result};
use crawler_common::catalog::{
    ColumnType, ForeignKey, TableDef, EMPTY_KEY, TABLES, VALID_FROM, VALID_TO,
};
use crawler_common::row::{canonical_value, key_label, natural_key, Row};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;

/// Version of the catalog the generated tables follow
pub const SCHEMA_VERSION: &str = "1";

const META_TABLE: &str = "crawler_meta";

/// Open a database from a connection string.
///
/// Accepts `sqlite:///relative.db`, `sqlite:////absolute.db`, a plain path,
/// or `:memory:` / `sqlite://` for an in-memory database.
pub fn open(target: &str) -> Result<Connection> {
    let path = target
        .strip_prefix("sqlite:///")
        .or_else(|| target.strip_prefix("sqlite://"))
        .unwrap_or(target);

    if path.is_empty() || path == ":memory:" {
        return Ok(Connection::open_in_memory()?);
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            log::info!("Created directory: {}", parent.display());
        }
    }

    let conn = Connection::open(path)?;
    log::debug!("Opened database: {}", path);
    Ok(conn)
}

// ── Schema ───────────────────────────────────────────────────────────────────

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident)
}

fn key_list(table: &TableDef) -> String {
    table
        .primary_key
        .iter()
        .map(|k| quote(k))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_list(table: &TableDef) -> String {
    table
        .columns
        .iter()
        .map(|c| quote(c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `CREATE TABLE` statement for a primary table or its SCD shadow table.
///
/// The shadow table has the same columns plus `valid_from`/`valid_to`, keyed
/// by the natural key and `valid_from`.
pub fn create_table_sql(table: &TableDef, scd: bool) -> String {
    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let not_null = if c.nullable { "" } else { " NOT NULL" };
            format!("    {} {}{}", quote(c.name), c.ty.sql_type(), not_null)
        })
        .collect();

    let name = if scd {
        lines.push(format!("    {} TEXT NOT NULL", VALID_FROM));
        lines.push(format!("    {} TEXT", VALID_TO));
        lines.push(format!("    PRIMARY KEY ({}, {})", key_list(table), VALID_FROM));
        table.scd_name()
    } else {
        lines.push(format!("    PRIMARY KEY ({})", key_list(table)));
        table.name.to_string()
    };

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        quote(&name),
        lines.join(",\n")
    )
}

/// Initialize the database schema
///
/// Creates the primary tables (and optionally their SCD shadow tables) and
/// stamps the schema version. Existing tables are left untouched.
pub fn init_schema(conn: &Connection, tables: &[TableDef], with_scd: bool) -> Result<()> {
    let mut ddl = format!(
        "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value TEXT NOT NULL);\n",
        META_TABLE
    );
    for table in tables {
        log::debug!("Table {}: {}", table.name, table.description);
        ddl.push_str(&create_table_sql(table, false));
        ddl.push_str(";\n");
        if with_scd {
            ddl.push_str(&create_table_sql(table, true));
            ddl.push_str(";\n");
            ddl.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({}, {});\n",
                quote(&format!("idx_{}_open", table.scd_name())),
                quote(&table.scd_name()),
                key_list(table),
                VALID_TO
            ));
        }
    }
    conn.execute_batch(&ddl)?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {} (key, value) VALUES ('schema_version', ?1)",
            META_TABLE
        ),
        params![SCHEMA_VERSION],
    )?;

    log::info!(
        "Database schema initialized ({} tables{}, version {})",
        tables.len(),
        if with_scd { " with SCD history" } else { "" },
        SCHEMA_VERSION
    );
    Ok(())
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Schema version stamped by [`init_schema`], if any
pub fn schema_version(conn: &Connection) -> Result<Option<String>> {
    if !table_exists(conn, META_TABLE)? {
        return Ok(None);
    }
    let version = conn
        .query_row(
            &format!("SELECT value FROM {} WHERE key = 'schema_version'", META_TABLE),
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(version)
}

/// Fail unless both databases were created from the same catalog version
pub fn ensure_same_schema(source: &Connection, target: &Connection) -> Result<()> {
    let source_version = schema_version(source)?;
    let target_version = schema_version(target)?;
    if source_version != target_version || source_version.is_none() {
        return Err(Error::SchemaMismatch {
            source_version,
            target_version,
        });
    }
    Ok(())
}

// ── Value conversion ─────────────────────────────────────────────────────────

/// Convert a row value into its stored SQLite form
pub fn to_sql(ty: &ColumnType, value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        v if ty.is_json() => SqlValue::Text(canonical_value(ty, v).to_string()),
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match (ty, n.as_i64()) {
            (ColumnType::Float, _) | (_, None) => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
            (_, Some(i)) => SqlValue::Integer(i),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Convert a stored SQLite value back into a row value
pub fn from_sql(ty: &ColumnType, value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => match ty {
            ColumnType::Boolean => Value::Bool(i != 0),
            ColumnType::Float => serde_json::Number::from_f64(i as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            _ => Value::from(i),
        },
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            if ty.is_json() {
                serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.into_owned()))
            } else {
                Value::String(text.into_owned())
            }
        }
        ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn bind_row(table: &TableDef, row: &Row) -> Vec<SqlValue> {
    table
        .columns
        .iter()
        .map(|c| to_sql(&c.ty, row.get(c.name).unwrap_or(&Value::Null)))
        .collect()
}

fn bind_key(table: &TableDef, row: &Row) -> Vec<SqlValue> {
    table
        .primary_key
        .iter()
        .zip(natural_key(table, row))
        .map(|(name, value)| {
            let ty = table
                .column(name)
                .map(|c| c.ty)
                .unwrap_or(ColumnType::Text);
            to_sql(&ty, &value)
        })
        .collect()
}

fn key_filter(table: &TableDef, first_param: usize) -> String {
    table
        .primary_key
        .iter()
        .enumerate()
        .map(|(i, k)| format!("{} = ?{}", quote(k), first_param + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

// ── Reads ────────────────────────────────────────────────────────────────────

fn query_rows(
    conn: &Connection,
    table: &TableDef,
    source: &str,
    filter: &str,
    params: &[SqlValue],
    with_validity: bool,
) -> Result<Vec<Row>> {
    let mut columns = column_list(table);
    if with_validity {
        columns.push_str(&format!(", {}, {}", VALID_FROM, VALID_TO));
    }
    let order = if with_validity {
        format!("{}, {}", key_list(table), VALID_FROM)
    } else {
        key_list(table)
    };
    let sql = format!(
        "SELECT {} FROM {}{} ORDER BY {}",
        columns,
        quote(source),
        filter,
        order
    );

    let mut stmt = conn.prepare_cached(&sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(r) = rows.next()? {
        let mut row = Row::new();
        for (i, column) in table.columns.iter().enumerate() {
            row.insert(column.name.to_string(), from_sql(&column.ty, r.get_ref(i)?));
        }
        if with_validity {
            let n = table.columns.len();
            row.insert(VALID_FROM.to_string(), from_sql(&ColumnType::Text, r.get_ref(n)?));
            row.insert(VALID_TO.to_string(), from_sql(&ColumnType::Text, r.get_ref(n + 1)?));
        }
        out.push(row);
    }
    Ok(out)
}

/// All rows of a primary table, ordered by natural key
pub fn read_rows(conn: &Connection, table: &TableDef) -> Result<Vec<Row>> {
    query_rows(conn, table, table.name, "", &[], false)
}

/// Rows of a primary table with the given `vendor_id`
pub fn read_vendor_rows(conn: &Connection, table: &TableDef, vendor_id: &str) -> Result<Vec<Row>> {
    query_rows(
        conn,
        table,
        table.name,
        " WHERE vendor_id = ?1",
        &[SqlValue::Text(vendor_id.to_string())],
        false,
    )
}

/// Current row with the same natural key as `row`, if any
pub fn find_row(conn: &Connection, table: &TableDef, row: &Row) -> Result<Option<Row>> {
    let filter = format!(" WHERE {}", key_filter(table, 1));
    let mut found = query_rows(conn, table, table.name, &filter, &bind_key(table, row), false)?;
    Ok(found.pop())
}

/// Every version in the SCD shadow table, with `valid_from`/`valid_to`
pub fn read_scd_versions(conn: &Connection, table: &TableDef) -> Result<Vec<Row>> {
    query_rows(conn, table, &table.scd_name(), "", &[], true)
}

/// Versions with an open validity interval (the current state)
pub fn read_open_versions(conn: &Connection, table: &TableDef) -> Result<Vec<Row>> {
    let filter = format!(" WHERE {} IS NULL", VALID_TO);
    query_rows(conn, table, &table.scd_name(), &filter, &[], true)
}

/// Latest timestamp recorded in an SCD shadow table
pub fn latest_scd_timestamp(conn: &Connection, table: &TableDef) -> Result<Option<String>> {
    let sql = format!(
        "SELECT MAX({}), MAX({}) FROM {}",
        VALID_FROM,
        VALID_TO,
        quote(&table.scd_name())
    );
    let (from, to): (Option<String>, Option<String>) =
        conn.query_row(&sql, [], |r| Ok((r.get(0)?, r.get(1)?)))?;
    Ok(from.max(to))
}

pub fn count_rows(conn: &Connection, name: &str) -> Result<usize> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", quote(name)), [], |r| {
        r.get(0)
    })?;
    Ok(n as usize)
}

// ── Writes ───────────────────────────────────────────────────────────────────

/// Insert a row, replacing any row with the same natural key
pub fn upsert_row(conn: &Connection, table: &TableDef, row: &Row) -> Result<()> {
    let placeholders = (1..=table.columns.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
        quote(table.name),
        column_list(table),
        placeholders
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    stmt.execute(params_from_iter(bind_row(table, row)))?;
    Ok(())
}

/// Delete the row with the same natural key as `row`
pub fn delete_row(conn: &Connection, table: &TableDef, row: &Row) -> Result<usize> {
    let sql = format!(
        "DELETE FROM {} WHERE {}",
        quote(table.name),
        key_filter(table, 1)
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    Ok(stmt.execute(params_from_iter(bind_key(table, row)))?)
}

/// Set the `status` column of the row with the same natural key as `row`
pub fn set_status(conn: &Connection, table: &TableDef, row: &Row, status: &str) -> Result<usize> {
    let sql = format!(
        "UPDATE {} SET status = ?1 WHERE {}",
        quote(table.name),
        key_filter(table, 2)
    );
    let mut params = vec![SqlValue::Text(status.to_string())];
    params.extend(bind_key(table, row));
    let mut stmt = conn.prepare_cached(&sql)?;
    Ok(stmt.execute(params_from_iter(params))?)
}

/// Append a new open version to the SCD shadow table
pub fn insert_version(conn: &Connection, table: &TableDef, row: &Row, valid_from: &str) -> Result<()> {
    let n = table.columns.len();
    let placeholders = (1..=n + 1)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}, {}, {}) VALUES ({}, NULL)",
        quote(&table.scd_name()),
        column_list(table),
        VALID_FROM,
        VALID_TO,
        placeholders
    );
    let mut params = bind_row(table, row);
    params.push(SqlValue::Text(valid_from.to_string()));
    let mut stmt = conn.prepare_cached(&sql)?;
    stmt.execute(params_from_iter(params))?;
    Ok(())
}

/// Close the open version for the natural key of `row`
pub fn close_version(conn: &Connection, table: &TableDef, row: &Row, valid_to: &str) -> Result<usize> {
    let sql = format!(
        "UPDATE {} SET {} = ?1 WHERE {} AND {} IS NULL",
        quote(&table.scd_name()),
        VALID_TO,
        key_filter(table, 2),
        VALID_TO
    );
    let mut params = vec![SqlValue::Text(valid_to.to_string())];
    params.extend(bind_key(table, row));
    let mut stmt = conn.prepare_cached(&sql)?;
    Ok(stmt.execute(params_from_iter(params))?)
}

// ── Referential integrity ────────────────────────────────────────────────────

fn parent_exists(conn: &Connection, fk: &ForeignKey, values: &[SqlValue]) -> Result<bool> {
    let filter = fk
        .parent_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote(c), i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    let sql = format!("SELECT 1 FROM {} WHERE {} LIMIT 1", quote(fk.parent), filter);
    let mut stmt = conn.prepare_cached(&sql)?;
    Ok(stmt.exists(params_from_iter(values.iter()))?)
}

/// Check that every parent row referenced by `row` exists.
///
/// References holding NULL or the empty-key sentinel point at nothing and are
/// not checked.
pub fn check_references(conn: &Connection, table: &TableDef, row: &Row) -> Result<()> {
    for fk in table.foreign_keys {
        let values: Vec<&Value> = fk
            .columns
            .iter()
            .map(|c| row.get(*c).unwrap_or(&Value::Null))
            .collect();
        let dangling = values
            .iter()
            .any(|v| v.is_null() || v.as_str() == Some(EMPTY_KEY));
        if dangling {
            continue;
        }

        let bound: Vec<SqlValue> = values.iter().map(|v| to_sql(&ColumnType::Text, v)).collect();
        if !parent_exists(conn, fk, &bound)? {
            let parent_key = values
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("/");
            return Err(Error::Integrity {
                table: table.name.to_string(),
                key: key_label(table, row),
                parent: fk.parent.to_string(),
                parent_key,
            });
        }
    }
    Ok(())
}

/// Check that no row of a child table references `row`.
///
/// Child tables missing from the database hold no references.
pub fn check_referencing(conn: &Connection, table: &TableDef, row: &Row) -> Result<()> {
    for child in TABLES {
        for fk in child.foreign_keys.iter().filter(|fk| fk.parent == table.name) {
            if !table_exists(conn, child.name)? {
                continue;
            }
            let values: Vec<SqlValue> = fk
                .parent_columns
                .iter()
                .map(|c| to_sql(&ColumnType::Text, row.get(*c).unwrap_or(&Value::Null)))
                .collect();
            let filter = fk
                .columns
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{} = ?{}", quote(c), i + 1))
                .collect::<Vec<_>>()
                .join(" AND ");
            let sql = format!("SELECT 1 FROM {} WHERE {} LIMIT 1", quote(child.name), filter);
            let mut stmt = conn.prepare_cached(&sql)?;
            if stmt.exists(params_from_iter(values.iter()))? {
                return Err(Error::Referenced {
                    table: table.name.to_string(),
                    key: key_label(table, row),
                    child: child.name.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "database_tests.rs"]
mod tests;
