use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "gradeest.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            weight REAL NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_categories_class_sort ON categories(class_id, sort_order)",
        [],
    )?;

    // One analyzer entry per (class, category). Grade is the manual value;
    // the effective grade is derived from assignments at read time.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_entries(
            class_id TEXT NOT NULL,
            category_id TEXT NOT NULL,
            mode TEXT NOT NULL DEFAULT 'known',
            grade REAL,
            updated_at TEXT,
            PRIMARY KEY(class_id, category_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(category_id) REFERENCES categories(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            category_id TEXT NOT NULL,
            name TEXT NOT NULL,
            earned REAL,
            total REAL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(category_id) REFERENCES categories(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_category ON assignments(category_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    ensure_classes_timestamps(&conn)?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            tracing::warn!(key, error = %e, "ignoring malformed stored setting");
            Ok(None)
        }
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Deletes a class and everything it owns, in dependency order.
pub fn delete_class_cascade(conn: &Connection, class_id: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM assignments WHERE class_id = ?", [class_id])?;
    conn.execute("DELETE FROM grade_entries WHERE class_id = ?", [class_id])?;
    conn.execute("DELETE FROM categories WHERE class_id = ?", [class_id])?;
    conn.execute("DELETE FROM classes WHERE id = ?", [class_id])?;
    Ok(())
}

/// Deletes one category with its grade entry and assignments.
pub fn delete_category_cascade(conn: &Connection, category_id: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM assignments WHERE category_id = ?", [category_id])?;
    conn.execute("DELETE FROM grade_entries WHERE category_id = ?", [category_id])?;
    conn.execute("DELETE FROM categories WHERE id = ?", [category_id])?;
    Ok(())
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn ensure_classes_timestamps(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces stored classes without timestamps.
    if !table_has_column(conn, "classes", "created_at")? {
        conn.execute("ALTER TABLE classes ADD COLUMN created_at TEXT", [])?;
    }
    if !table_has_column(conn, "classes", "updated_at")? {
        conn.execute("ALTER TABLE classes ADD COLUMN updated_at TEXT", [])?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
