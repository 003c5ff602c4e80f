use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

use crate::calc;
use crate::enrollment::{self, CallerContext};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{caller_context, db_conn, required_str, respond, write_text_file, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, ReportDocument, ReportHeader, ReportKind, SignatureFooter};

struct InstructorInfo {
    full_name: String,
    key: String,
}

struct CourseInfo {
    name: String,
    code: String,
}

fn load_instructor(conn: &Connection, instructor_id: &str) -> Result<InstructorInfo, HandlerErr> {
    conn.query_row(
        "SELECT given_name, paternal_surname, maternal_surname, key FROM instructors WHERE id = ?",
        [instructor_id],
        |r| {
            let given: String = r.get(0)?;
            let paternal: String = r.get(1)?;
            let maternal: String = r.get(2)?;
            Ok(InstructorInfo {
                full_name: format!("{} {} {}", given, paternal, maternal).trim().to_string(),
                key: r.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| HandlerErr::new("not_found", "instructor not found"))
}

fn load_course(conn: &Connection, course_id: &str) -> Result<CourseInfo, HandlerErr> {
    conn.query_row(
        "SELECT name, code FROM courses WHERE id = ?",
        [course_id],
        |r| {
            Ok(CourseInfo {
                name: r.get(0)?,
                code: r.get(1)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| HandlerErr::new("not_found", "course not found"))
}

fn parse_kind(params: &Value) -> Result<ReportKind, HandlerErr> {
    let raw = required_str(params, "kind")?;
    ReportKind::parse(&raw).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: format!("unknown report kind: {}", raw),
        details: Some(json!({ "allowed": ["partial1", "partial2", "partial3", "ordinary", "final"] })),
    })
}

fn build_document(
    conn: &Connection,
    course_id: &str,
    ctx: &CallerContext,
    kind: ReportKind,
) -> Result<ReportDocument, HandlerErr> {
    let instructor = load_instructor(conn, &ctx.instructor_id)?;
    let course = load_course(conn, course_id)?;
    let settings = setup::report_settings(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let students = enrollment::enrolled_students(conn, course_id, ctx)?;

    let generated_at = settings
        .show_generated_at
        .then(|| chrono::Local::now().format("%Y-%m-%d %H:%M").to_string());

    Ok(ReportDocument {
        header: ReportHeader {
            title: settings.institution_name,
            instructor_name: instructor.full_name.clone(),
            instructor_key: instructor.key.clone(),
            course_name: course.name,
            course_code: course.code,
            semester: ctx.semester.clone(),
            kind,
            kind_label: kind.label(),
            generated_at,
        },
        columns: kind.columns(),
        rows: report::assemble_report(&students, kind),
        footer: SignatureFooter::for_instructor(&instructor.full_name, &instructor.key),
    })
}

fn reports_grade_report_model(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(&req.params, "courseId")?;
    let ctx = caller_context(conn, &req.params)?;
    let kind = parse_kind(&req.params)?;
    let doc = build_document(conn, &course_id, &ctx, kind)?;
    serde_json::to_value(&doc).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn reports_export_text(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(&req.params, "courseId")?;
    let ctx = caller_context(conn, &req.params)?;
    let kind = parse_kind(&req.params)?;
    let out_path = required_str(&req.params, "outPath")?;

    let doc = build_document(conn, &course_id, &ctx, kind)?;
    let rows_per_page = setup::report_settings(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .rows_per_page;
    write_text_file(&out_path, &report::render_text(&doc, rows_per_page))?;
    tracing::info!(course = %course_id, kind = kind.label(), path = %out_path, "report exported");
    Ok(json!({ "path": out_path, "rowsExported": doc.rows.len() }))
}

fn stats_course_summary(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(&req.params, "courseId")?;
    let ctx = caller_context(conn, &req.params)?;
    load_course(conn, &course_id)?;
    let thresholds = setup::grade_thresholds(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let grades: Vec<calc::StudentGrades> = enrollment::enrolled_students(conn, &course_id, &ctx)?
        .iter()
        .map(|s| s.grades())
        .collect();
    let stats = calc::course_statistics(&grades, &thresholds);
    serde_json::to_value(&stats).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

/// Dashboard totals across every course the instructor teaches in the semester.
fn stats_instructor_summary(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let ctx = caller_context(conn, &req.params)?;
    load_instructor(conn, &ctx.instructor_id)?;
    let thresholds = setup::grade_thresholds(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.code, group_concat(a.group_name, ', ')
         FROM course_assignments a
         JOIN courses c ON c.id = a.course_id
         WHERE a.instructor_id = ? AND a.semester = ?
         GROUP BY c.id
         ORDER BY c.name",
    )?;
    let assigned = stmt
        .query_map((&ctx.instructor_id, &ctx.semester), |r| {
            Ok(calc::CourseRef {
                course_id: r.get(0)?,
                name: r.get(1)?,
                code: r.get(2)?,
                groups: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut courses = Vec::with_capacity(assigned.len());
    for course in assigned {
        let grades: Vec<calc::StudentGrades> =
            enrollment::enrolled_students(conn, &course.course_id, &ctx)?
                .iter()
                .map(|s| s.grades())
                .collect();
        let stats = calc::course_statistics(&grades, &thresholds);
        courses.push(calc::CourseOverview::new(course, &stats));
    }

    let mut out = serde_json::to_value(calc::instructor_summary(courses))
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    out["semester"] = json!(ctx.semester);
    Ok(out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "reports.gradeReportModel" => reports_grade_report_model(state, req),
        "reports.exportText" => reports_export_text(state, req),
        "stats.courseSummary" => stats_course_summary(state, req),
        "stats.instructorSummary" => stats_instructor_summary(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
