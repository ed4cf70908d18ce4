//! Live schema introspection via `sqlite_master` and `PRAGMA table_info`.

use super::DbResult;
use rusqlite::Connection;
use std::collections::BTreeSet;

pub fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

/// Returns the column names of `table`. Empty when the table is missing.
///
/// `table` must already be a validated identifier.
pub fn table_columns(conn: &Connection, table: &str) -> DbResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    let mut columns = BTreeSet::new();
    while let Some(row) = rows.next()? {
        columns.insert(row.get::<_, String>(1)?);
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::{table_columns, table_exists};
    use rusqlite::Connection;

    #[test]
    fn reports_tables_and_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE roles (id INTEGER PRIMARY KEY, name TEXT NOT NULL);")
            .unwrap();

        assert!(table_exists(&conn, "roles").unwrap());
        assert!(!table_exists(&conn, "users").unwrap());

        let columns = table_columns(&conn, "roles").unwrap();
        assert!(columns.contains("id"));
        assert!(columns.contains("name"));
        assert!(table_columns(&conn, "users").unwrap().is_empty());
    }
}
