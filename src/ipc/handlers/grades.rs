use std::path::PathBuf;

use serde_json::{json, Value};

use crate::calc::ScoreInputs;
use crate::db::{self, ScoreKey};
use crate::enrollment::{self, CallerContext};
use crate::error::EnrollmentError;
use crate::import;
use crate::ipc::helpers::{
    caller_context, db_conn, optional_score, required_str, respond, write_text_file, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::sheet;

fn roster(
    conn: &rusqlite::Connection,
    course_id: &str,
    ctx: &CallerContext,
) -> Result<Vec<enrollment::EnrolledStudent>, HandlerErr> {
    Ok(enrollment::enrolled_students(conn, course_id, ctx)?)
}

fn grades_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(&req.params, "courseId")?;
    let ctx = caller_context(conn, &req.params)?;
    let students = roster(conn, &course_id, &ctx)?;
    Ok(json!({
        "courseId": course_id,
        "semester": ctx.semester,
        "students": students,
    }))
}

/// Individual edit. Every score field is replaced; an omitted or null field
/// clears the stored value, the same as a blank spreadsheet cell.
fn grades_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(&req.params, "courseId")?;
    let ctx = caller_context(conn, &req.params)?;
    let student_key = required_str(&req.params, "studentId")?;
    let inputs = ScoreInputs {
        partial_1: optional_score(&req.params, "partial1")?,
        partial_2: optional_score(&req.params, "partial2")?,
        partial_3: optional_score(&req.params, "partial3")?,
        ordinary: optional_score(&req.params, "ordinary")?,
    };

    let student_id = match enrollment::resolve_student(conn, &student_key, &course_id, &ctx) {
        Ok(id) => id,
        Err(e @ EnrollmentError::NotEnrolled(_)) => {
            return Err(HandlerErr {
                code: "not_found",
                message: e.to_string(),
                details: Some(json!({ "studentId": student_key })),
            })
        }
        Err(EnrollmentError::Storage(e)) => return Err(e.into()),
    };

    let final_grade = inputs.final_grade();
    db::upsert_score_record(
        conn,
        ScoreKey {
            student_id: &student_id,
            course_id: &course_id,
            instructor_id: &ctx.instructor_id,
            semester: &ctx.semester,
        },
        &inputs,
        final_grade,
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    tracing::info!(course = %course_id, student = %student_key, "grade record updated");

    Ok(json!({
        "studentId": student_key,
        "partial1": inputs.partial_1,
        "partial2": inputs.partial_2,
        "partial3": inputs.partial_3,
        "ordinary": inputs.ordinary,
        "finalGrade": final_grade,
    }))
}

fn grades_import_csv(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(&req.params, "courseId")?;
    let ctx = caller_context(conn, &req.params)?;
    let in_path = PathBuf::from(required_str(&req.params, "inPath")?);

    let outcome = import::process_upload_file(conn, &in_path, &course_id, &ctx).map_err(|e| {
        tracing::warn!(course = %course_id, path = %in_path.display(), error = %e, "grade upload aborted");
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details: Some(json!({ "path": in_path.to_string_lossy() })),
        }
    })?;

    let messages: Vec<String> = outcome.errors.iter().map(|f| f.to_string()).collect();
    Ok(json!({
        "updatedCount": outcome.updated_count,
        "errors": outcome.errors,
        "messages": messages,
    }))
}

/// Write `rows` to `out_path`, as a workbook when the extension asks for one.
fn write_sheet(out_path: &str, columns: &[&str], rows: &[Vec<String>]) -> Result<(), HandlerErr> {
    let path = PathBuf::from(out_path);
    if !sheet::is_workbook(&path) {
        return write_text_file(out_path, &sheet::to_csv(columns, rows));
    }
    let failed = |e: String| HandlerErr {
        code: "export_failed",
        message: e,
        details: Some(json!({ "path": out_path })),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| failed(e.to_string()))?;
    }
    sheet::write_workbook(&path, columns, rows).map_err(|e| failed(format!("{e:#}")))
}

fn grades_template(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(&req.params, "courseId")?;
    let ctx = caller_context(conn, &req.params)?;
    let out_path = required_str(&req.params, "outPath")?;
    let students = roster(conn, &course_id, &ctx)?;
    write_sheet(&out_path, &sheet::IMPORT_COLUMNS, &sheet::template_rows(&students))?;
    Ok(json!({ "path": out_path, "rowsExported": students.len() }))
}

fn grades_export(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(&req.params, "courseId")?;
    let ctx = caller_context(conn, &req.params)?;
    let out_path = required_str(&req.params, "outPath")?;
    let students = roster(conn, &course_id, &ctx)?;
    write_sheet(&out_path, &sheet::EXPORT_COLUMNS, &sheet::export_rows(&students))?;
    Ok(json!({ "path": out_path, "rowsExported": students.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "grades.list" => grades_list(state, req),
        "grades.update" => grades_update(state, req),
        "grades.importCsv" => grades_import_csv(state, req),
        "grades.templateCsv" => grades_template(state, req),
        "grades.exportCsv" => grades_export(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
