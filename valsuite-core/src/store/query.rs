//! Read-only ad-hoc SQL over the result store.

use serde::Serialize;
use serde_json::Value;
use sqlx::{
    Column, ConnectOptions, Connection, Executor, Row, TypeInfo, ValueRef, sqlite::SqliteRow,
};
use tracing::debug;

use super::{ResultStore, StoreError, StoreResult};

/// Column names plus rows of loosely typed cells, ready to print as a
/// table or serialise as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryRows {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<serde_json::Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

impl ResultStore {
    /// Runs a single statement on a dedicated connection opened with
    /// `SQLITE_OPEN_READONLY`. Writes fail inside SQLite whatever the
    /// statement does to its own connection state.
    pub async fn query_readonly(&self, sql: &str) -> StoreResult<QueryRows> {
        let sql = single_statement(sql)?;
        let options = (*self.pool().connect_options()).clone().read_only(true);
        let mut conn = options.connect().await?;

        let fetched = sqlx::query(sql).fetch_all(&mut conn).await;
        let columns = match &fetched {
            Ok(rows) if rows.is_empty() => (&mut conn)
                .describe(sql)
                .await
                .map(|d| d.columns().iter().map(|c| c.name().to_string()).collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        if let Err(e) = conn.close().await {
            debug!(error = %e, "closing read-only connection failed");
        }
        let rows = fetched?;

        let columns = match rows.first() {
            Some(first) => first
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            None => columns,
        };
        let rows = rows.iter().map(decode_row).collect::<Vec<_>>();
        debug!(rows = rows.len(), "ran read-only query");

        Ok(QueryRows { columns, rows })
    }
}

/// Returns `sql` without its trailing terminator, or an error when it holds
/// more than one statement. Quoted text and comments are skipped.
fn single_statement(sql: &str) -> StoreResult<&str> {
    let sql = sql.trim();
    let bytes = sql.as_bytes();
    let mut statement = sql;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
            }
            b'[' => {
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 1;
            }
            b';' => {
                let rest = &sql[i..];
                if !rest.trim_matches(|c: char| c == ';' || c.is_whitespace()).is_empty() {
                    return Err(StoreError::RejectedQuery(
                        "only a single statement can be queried".into(),
                    ));
                }
                statement = sql[..i].trim_end();
                break;
            }
            _ => {}
        }
        i += 1;
    }

    if statement.is_empty() {
        return Err(StoreError::RejectedQuery("empty query".into()));
    }
    Ok(statement)
}

fn decode_row(row: &SqliteRow) -> Vec<Value> {
    (0..row.columns().len()).map(|i| decode_cell(row, i)).collect()
}

fn decode_cell(row: &SqliteRow, index: usize) -> Value {
    let Ok(raw) = row.try_get_raw(index) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }

    match raw.type_info().name() {
        "INTEGER" | "BOOLEAN" => row
            .try_get_unchecked::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" | "NUMERIC" => row
            .try_get_unchecked::<f64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(|bytes| Value::String(format!("<{} bytes>", bytes.len())))
            .unwrap_or(Value::Null),
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_terminator_is_stripped() {
        assert_eq!(
            single_statement("  SELECT 1;  ").expect("single"),
            "SELECT 1"
        );
        assert_eq!(single_statement("SELECT 1;;").expect("single"), "SELECT 1");
    }

    #[test]
    fn semicolons_in_literals_and_comments_are_not_separators() {
        let sql = "SELECT 'a;b' AS \"x;y\" -- trailing; note\n FROM t /* ; */";
        assert_eq!(single_statement(sql).expect("single"), sql);
    }

    #[test]
    fn stacked_statements_are_rejected() {
        for sql in [
            "PRAGMA query_only = OFF; DELETE FROM validation_runs",
            "SELECT 1; SELECT 2",
            "SELECT ';'; DROP TABLE metrics;",
        ] {
            assert!(
                matches!(single_statement(sql), Err(StoreError::RejectedQuery(_))),
                "accepted {sql}"
            );
        }
        assert!(matches!(single_statement("  ;"), Err(StoreError::RejectedQuery(_))));
    }
}
