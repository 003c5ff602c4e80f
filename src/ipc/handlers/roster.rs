use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::ipc::handlers::setup;
use crate::ipc::helpers::{db_conn, optional_str, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};

/// Lowercase hex SHA-256 of the password, unsalted.
pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

struct PersonNames {
    given_name: String,
    paternal_surname: String,
    maternal_surname: String,
}

impl PersonNames {
    fn from_params(params: &Value) -> Result<Self, HandlerErr> {
        Ok(Self {
            given_name: required_str(params, "givenName")?,
            paternal_surname: required_str(params, "paternalSurname")?,
            maternal_surname: optional_str(params, "maternalSurname").unwrap_or_default(),
        })
    }
}

fn insert_failed(e: rusqlite::Error) -> HandlerErr {
    if let rusqlite::Error::SqliteFailure(f, _) = &e {
        if f.code == rusqlite::ErrorCode::ConstraintViolation {
            return HandlerErr::new("bad_params", format!("duplicate record: {}", e));
        }
    }
    HandlerErr::new("db_insert_failed", e.to_string())
}

fn ensure_exists(conn: &Connection, table: &str, id: &str) -> Result<(), HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found: Option<i64> = conn.query_row(&sql, [id], |r| r.get(0)).optional()?;
    if found.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: format!("{} not found", table.trim_end_matches('s')),
            details: Some(json!({ "id": id })),
        });
    }
    Ok(())
}

fn instructors_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let names = PersonNames::from_params(&req.params)?;
    let key = required_str(&req.params, "key")?;
    let password = req
        .params
        .get("password")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing password"))?;

    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO instructors(id, given_name, paternal_surname, maternal_surname, key, password_hash, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &names.given_name,
            &names.paternal_surname,
            &names.maternal_surname,
            &key,
            hash_password(password),
            chrono::Local::now().to_rfc3339(),
        ),
    )
    .map_err(insert_failed)?;
    tracing::info!(instructor = %key, "instructor created");
    Ok(json!({ "instructorId": id }))
}

fn auth_login(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let key = required_str(&req.params, "key")?;
    let password = req
        .params
        .get("password")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    let row: Option<(String, String, String, String, String)> = conn
        .query_row(
            "SELECT id, given_name, paternal_surname, maternal_surname, password_hash
             FROM instructors WHERE key = ?",
            [&key],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()?;

    // Unknown key and wrong password are reported the same way.
    let Some((id, given, paternal, maternal, stored_hash)) = row else {
        tracing::debug!(instructor = %key, "login rejected");
        return Err(HandlerErr::new("auth_failed", "invalid key or password"));
    };
    if stored_hash != hash_password(password) {
        tracing::debug!(instructor = %key, "login rejected");
        return Err(HandlerErr::new("auth_failed", "invalid key or password"));
    }

    let term = setup::term_settings(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({
        "instructorId": id,
        "key": key,
        "givenName": given,
        "paternalSurname": paternal,
        "maternalSurname": maternal,
        "fullName": format!("{} {} {}", given, paternal, maternal).trim().to_string(),
        "activeSemester": term.active_semester,
    }))
}

fn courses_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let name = required_str(&req.params, "name")?;
    let code = required_str(&req.params, "code")?;
    let credits = match req.params.get("credits") {
        None | Some(Value::Null) => 6,
        Some(v) => match v.as_i64() {
            Some(n) if (0..=100).contains(&n) => n,
            _ => return Err(HandlerErr::new("bad_params", "credits must be an integer in 0..=100")),
        },
    };

    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, name, code, credits) VALUES(?, ?, ?, ?)",
        (&id, &name, &code, credits),
    )
    .map_err(insert_failed)?;
    Ok(json!({ "courseId": id }))
}

fn courses_assign(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let instructor_id = required_str(&req.params, "instructorId")?;
    let course_id = required_str(&req.params, "courseId")?;
    ensure_exists(conn, "instructors", &instructor_id)?;
    ensure_exists(conn, "courses", &course_id)?;

    let term = setup::term_settings(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let semester = optional_str(&req.params, "semester").unwrap_or(term.active_semester);
    let group = optional_str(&req.params, "group").unwrap_or(term.default_group);

    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO course_assignments(id, instructor_id, course_id, semester, group_name)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(instructor_id, course_id, semester, group_name) DO NOTHING",
        (&id, &instructor_id, &course_id, &semester, &group),
    )
    .map_err(insert_failed)?;
    Ok(json!({ "semester": semester, "group": group }))
}

fn courses_list_for_instructor(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let instructor_id = required_str(&req.params, "instructorId")?;
    ensure_exists(conn, "instructors", &instructor_id)?;
    let semester = optional_str(&req.params, "semester");

    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.code, c.credits, a.semester, a.group_name
         FROM course_assignments a
         JOIN courses c ON c.id = a.course_id
         WHERE a.instructor_id = ?1 AND (?2 IS NULL OR a.semester = ?2)
         ORDER BY a.semester DESC, c.name, a.group_name",
    )?;
    let courses = stmt
        .query_map((&instructor_id, &semester), |r| {
            Ok(json!({
                "courseId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "credits": r.get::<_, i64>(3)?,
                "semester": r.get::<_, String>(4)?,
                "group": r.get::<_, String>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "courses": courses }))
}

fn students_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let names = PersonNames::from_params(&req.params)?;
    let key = required_str(&req.params, "key")?;

    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, given_name, paternal_surname, maternal_surname, key)
         VALUES(?, ?, ?, ?, ?)",
        (
            &id,
            &names.given_name,
            &names.paternal_surname,
            &names.maternal_surname,
            &key,
        ),
    )
    .map_err(insert_failed)?;
    Ok(json!({ "studentId": id }))
}

fn enrollments_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(&req.params, "studentId")?;
    let course_id = required_str(&req.params, "courseId")?;
    let instructor_id = required_str(&req.params, "instructorId")?;
    ensure_exists(conn, "students", &student_id)?;
    ensure_exists(conn, "courses", &course_id)?;
    ensure_exists(conn, "instructors", &instructor_id)?;

    let term = setup::term_settings(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let semester = optional_str(&req.params, "semester").unwrap_or(term.active_semester);
    let group = optional_str(&req.params, "group").unwrap_or(term.default_group);

    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO enrollments(id, student_id, course_id, instructor_id, semester, group_name)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &student_id, &course_id, &instructor_id, &semester, &group),
    )
    .map_err(insert_failed)?;
    Ok(json!({ "enrollmentId": id, "semester": semester, "group": group }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "instructors.create" => instructors_create(state, req),
        "auth.login" => auth_login(state, req),
        "courses.create" => courses_create(state, req),
        "courses.assign" => courses_assign(state, req),
        "courses.listForInstructor" => courses_list_for_instructor(state, req),
        "students.create" => students_create(state, req),
        "enrollments.create" => enrollments_create(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
