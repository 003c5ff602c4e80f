use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::calc::ScoreInputs;

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS instructors(
            id TEXT PRIMARY KEY,
            given_name TEXT NOT NULL,
            paternal_surname TEXT NOT NULL,
            maternal_surname TEXT NOT NULL,
            key TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            credits INTEGER NOT NULL DEFAULT 6
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            given_name TEXT NOT NULL,
            paternal_surname TEXT NOT NULL,
            maternal_surname TEXT NOT NULL,
            key TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_assignments(
            id TEXT PRIMARY KEY,
            instructor_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            semester TEXT NOT NULL,
            group_name TEXT NOT NULL,
            FOREIGN KEY(instructor_id) REFERENCES instructors(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(instructor_id, course_id, semester, group_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_assignments_instructor ON course_assignments(instructor_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            instructor_id TEXT NOT NULL,
            semester TEXT NOT NULL,
            group_name TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(instructor_id) REFERENCES instructors(id),
            UNIQUE(student_id, course_id, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id, instructor_id, semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scores(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            instructor_id TEXT NOT NULL,
            semester TEXT NOT NULL,
            partial_1 REAL,
            partial_2 REAL,
            partial_3 REAL,
            ordinary REAL,
            final_grade REAL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(instructor_id) REFERENCES instructors(id),
            UNIQUE(student_id, course_id, instructor_id, semester)
        )",
        [],
    )?;
    // Workspaces created before edit timestamps were tracked lack this column.
    ensure_scores_updated_at(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_course ON scores(course_id, instructor_id, semester)",
        [],
    )?;

    Ok(())
}

fn ensure_scores_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "scores", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE scores ADD COLUMN updated_at TEXT", [])?;
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

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
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

/// Key of a score record. Every write replaces the whole row for this key.
#[derive(Debug, Clone, Copy)]
pub struct ScoreKey<'a> {
    pub student_id: &'a str,
    pub course_id: &'a str,
    pub instructor_id: &'a str,
    pub semester: &'a str,
}

/// Insert or overwrite all four inputs and the derived final. Fields absent in
/// `inputs` are stored as NULL even when the existing row had a value.
pub fn upsert_score_record(
    conn: &Connection,
    key: ScoreKey<'_>,
    inputs: &ScoreInputs,
    final_grade: Option<f64>,
) -> rusqlite::Result<()> {
    let score_id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Local::now().to_rfc3339();
    conn.execute(
        "INSERT INTO scores(
            id, student_id, course_id, instructor_id, semester,
            partial_1, partial_2, partial_3, ordinary, final_grade, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, course_id, instructor_id, semester) DO UPDATE SET
           partial_1 = excluded.partial_1,
           partial_2 = excluded.partial_2,
           partial_3 = excluded.partial_3,
           ordinary = excluded.ordinary,
           final_grade = excluded.final_grade,
           updated_at = excluded.updated_at",
        rusqlite::params![
            score_id,
            key.student_id,
            key.course_id,
            key.instructor_id,
            key.semester,
            inputs.partial_1,
            inputs.partial_2,
            inputs.partial_3,
            inputs.ordinary,
            final_grade,
            now,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_schema_is_idempotent_and_adds_updated_at() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("first init");
        init_schema(&conn).expect("second init");
        assert!(table_has_column(&conn, "scores", "updated_at").expect("pragma"));
    }

    #[test]
    fn settings_roundtrip_overwrites_value() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("init");
        assert!(settings_get_json(&conn, "setup.term").expect("get").is_none());
        settings_set_json(&conn, "setup.term", &serde_json::json!({ "activeSemester": "X" }))
            .expect("set");
        settings_set_json(&conn, "setup.term", &serde_json::json!({ "activeSemester": "Y" }))
            .expect("set again");
        let v = settings_get_json(&conn, "setup.term").expect("get").expect("value");
        assert_eq!(v["activeSemester"], "Y");
    }
}
