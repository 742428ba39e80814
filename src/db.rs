use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("gradecut.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            section_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(section_id, student_id),
            FOREIGN KEY(section_id) REFERENCES sections(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS score_components(
            id TEXT PRIMARY KEY,
            section_id TEXT NOT NULL,
            title TEXT NOT NULL,
            max_score REAL NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(section_id) REFERENCES sections(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_components_section
         ON score_components(section_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS score_entries(
            component_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            score REAL NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(component_id, student_id),
            FOREIGN KEY(component_id) REFERENCES score_components(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_entries_student ON score_entries(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_thresholds(
            section_id TEXT PRIMARY KEY,
            a REAL NOT NULL,
            b_plus REAL NOT NULL,
            b REAL NOT NULL,
            c_plus REAL NOT NULL,
            c REAL NOT NULL,
            d_plus REAL NOT NULL,
            d REAL NOT NULL,
            FOREIGN KEY(section_id) REFERENCES sections(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS computed_grades(
            section_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            total REAL NOT NULL,
            max_total REAL NOT NULL,
            percentage REAL NOT NULL,
            grade TEXT NOT NULL,
            grade_points REAL NOT NULL,
            missing_count INTEGER NOT NULL,
            inputs_hash TEXT NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY(section_id, student_id),
            FOREIGN KEY(section_id) REFERENCES sections(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_computed_grades_student ON computed_grades(student_id)",
        [],
    )?;

    // Early workspaces stored score entries without an edit timestamp.
    ensure_score_entries_updated_at(&conn)?;

    Ok(conn)
}

fn ensure_score_entries_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "score_entries", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE score_entries ADD COLUMN updated_at TEXT", [])?;
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
