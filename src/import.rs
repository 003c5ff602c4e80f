use rusqlite::Connection;
use serde::Serialize;

use crate::calc::{self, ScoreInputs};
use crate::db::{self, ScoreKey};
use crate::enrollment::{self, CallerContext};
use crate::error::{EnrollmentError, ImportError, RowError, RowErrorKind};
use crate::sheet::{self, Sheet, SheetRow};

pub const IMPORT_MAX_ROWS: usize = 5000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    pub row: usize,
    pub kind: RowErrorKind,
    pub student_id: String,
    pub message: String,
}

impl std::fmt::Display for RowFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "row {}: {}", self.row, self.message)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub updated_count: usize,
    pub errors: Vec<RowFailure>,
}

impl ImportOutcome {
    fn reject(&mut self, row: &ImportRow, e: RowError) {
        tracing::debug!(
            row = row.line_no,
            student = %row.student_id,
            name = %row.full_name,
            error = %e,
            "row rejected"
        );
        self.errors.push(RowFailure {
            row: row.line_no,
            kind: e.kind(),
            student_id: row.student_id.clone(),
            message: e.to_string(),
        });
    }
}

/// Column positions of the required headers.
struct Columns {
    student_id: usize,
    full_name: usize,
    partial_1: usize,
    partial_2: usize,
    partial_3: usize,
    ordinary: usize,
}

impl Columns {
    fn resolve(sheet: &Sheet) -> Result<Self, ImportError> {
        let missing = sheet.missing_columns(&sheet::IMPORT_COLUMNS);
        if !missing.is_empty() {
            return Err(ImportError::MalformedUpload(format!(
                "missing columns: {}",
                missing.join(", ")
            )));
        }
        let idx = |name: &str| sheet.column_index(name).unwrap_or_default();
        Ok(Self {
            student_id: idx(sheet::COL_STUDENT_ID),
            full_name: idx(sheet::COL_FULL_NAME),
            partial_1: idx(sheet::COL_PARTIAL_1),
            partial_2: idx(sheet::COL_PARTIAL_2),
            partial_3: idx(sheet::COL_PARTIAL_3),
            ordinary: idx(sheet::COL_ORDINARY),
        })
    }
}

/// One sheet line with its cells picked out by header name. Short lines read
/// as blank cells.
#[derive(Debug, Clone)]
struct ImportRow {
    line_no: usize,
    student_id: String,
    full_name: String,
    partial_1: String,
    partial_2: String,
    partial_3: String,
    ordinary: String,
}

impl ImportRow {
    fn from_sheet(row: &SheetRow, cols: &Columns) -> Self {
        let cell = |i: usize| row.fields.get(i).map(|s| s.trim().to_string()).unwrap_or_default();
        Self {
            line_no: row.line_no,
            student_id: cell(cols.student_id),
            full_name: cell(cols.full_name),
            partial_1: cell(cols.partial_1),
            partial_2: cell(cols.partial_2),
            partial_3: cell(cols.partial_3),
            ordinary: cell(cols.ordinary),
        }
    }

    fn parse_scores(&self) -> Result<ScoreInputs, RowError> {
        let field = |name: &str, raw: &str| {
            calc::parse_score_cell(raw).map_err(|m| RowError::Parse(format!("{}: {}", name, m)))
        };
        Ok(ScoreInputs {
            partial_1: field(sheet::COL_PARTIAL_1, &self.partial_1)?,
            partial_2: field(sheet::COL_PARTIAL_2, &self.partial_2)?,
            partial_3: field(sheet::COL_PARTIAL_3, &self.partial_3)?,
            ordinary: field(sheet::COL_ORDINARY, &self.ordinary)?,
        })
    }
}

/// Validate, grade and upsert every row of `sheet` for `course_id` under the
/// caller's instructor and semester.
///
/// Bad scores and unenrolled students are collected per row and never stop the
/// run. A missing header or a storage failure aborts the whole upload; the run
/// is a single transaction, so nothing from an aborted upload is kept.
pub fn process_upload(
    conn: &Connection,
    sheet: &Sheet,
    course_id: &str,
    ctx: &CallerContext,
) -> Result<ImportOutcome, ImportError> {
    let cols = Columns::resolve(sheet)?;
    if sheet.rows.len() > IMPORT_MAX_ROWS {
        return Err(ImportError::MalformedUpload(format!(
            "too many rows: {} (max {})",
            sheet.rows.len(),
            IMPORT_MAX_ROWS
        )));
    }

    let tx = conn.unchecked_transaction()?;
    let mut outcome = ImportOutcome::default();

    for raw in &sheet.rows {
        let row = ImportRow::from_sheet(raw, &cols);
        if let Some(defect) = &raw.defect {
            outcome.reject(&row, RowError::Parse(defect.clone()));
            continue;
        }
        if row.student_id.is_empty() {
            outcome.reject(&row, RowError::Parse(format!("{} is blank", sheet::COL_STUDENT_ID)));
            continue;
        }
        let inputs = match row.parse_scores() {
            Ok(v) => v,
            Err(e) => {
                outcome.reject(&row, e);
                continue;
            }
        };
        let student_id = match enrollment::resolve_student(&tx, &row.student_id, course_id, ctx) {
            Ok(id) => id,
            Err(EnrollmentError::NotEnrolled(key)) => {
                outcome.reject(&row, RowError::NotEnrolled(key));
                continue;
            }
            Err(EnrollmentError::Storage(e)) => return Err(ImportError::Storage(e)),
        };

        let final_grade = inputs.final_grade();
        db::upsert_score_record(
            &tx,
            ScoreKey {
                student_id: &student_id,
                course_id,
                instructor_id: &ctx.instructor_id,
                semester: &ctx.semester,
            },
            &inputs,
            final_grade,
        )?;
        outcome.updated_count += 1;
    }

    tx.commit()?;
    tracing::info!(
        course = course_id,
        instructor = %ctx.instructor_id,
        semester = %ctx.semester,
        updated = outcome.updated_count,
        rejected = outcome.errors.len(),
        "grade upload processed"
    );
    Ok(outcome)
}

/// Read and process an upload from disk: a workbook (`.xlsx`, `.xls`, `.ods`)
/// or CSV.
pub fn process_upload_file(
    conn: &Connection,
    path: &std::path::Path,
    course_id: &str,
    ctx: &CallerContext,
) -> Result<ImportOutcome, ImportError> {
    let sheet = sheet::read_sheet_file(path)
        .map_err(ImportError::MalformedUpload)?
        .ok_or_else(|| ImportError::MalformedUpload("file has no header row".to_string()))?;
    process_upload(conn, &sheet, course_id, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrollment::fixtures::*;
    use crate::sheet::parse_csv;

    const HEADER: &str = "student_id,full_name,partial_1,partial_2,partial_3,ordinary\n";

    fn upload(conn: &Connection, body: &str) -> Result<ImportOutcome, ImportError> {
        let sheet = parse_csv(&format!("{HEADER}{body}")).expect("sheet");
        process_upload(conn, &sheet, "c1", &ctx("i1"))
    }

    fn stored(conn: &Connection, student_id: &str) -> Option<(ScoreInputs, Option<f64>)> {
        conn.query_row(
            "SELECT partial_1, partial_2, partial_3, ordinary, final_grade FROM scores
             WHERE student_id = ? AND course_id = 'c1' AND instructor_id = 'i1' AND semester = ?",
            (student_id, SEMESTER),
            |r| {
                Ok((
                    ScoreInputs {
                        partial_1: r.get(0)?,
                        partial_2: r.get(1)?,
                        partial_3: r.get(2)?,
                        ordinary: r.get(3)?,
                    },
                    r.get(4)?,
                ))
            },
        )
        .ok()
    }

    fn score_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM scores", [], |r| r.get(0))
            .expect("count")
    }

    #[test]
    fn one_invalid_row_among_valid_rows() {
        let conn = seeded();
        let outcome = upload(
            &conn,
            "EST001,Pérez Ruiz Ana,8,9,10,7\n\
             EST002,García Torres Luis,8,abc,10,7\n\
             EST003,García Blanco Rosa,6,6,6,6\n",
        )
        .expect("outcome");

        assert_eq!(outcome.updated_count, 2);
        assert_eq!(outcome.errors.len(), 1);
        let e = &outcome.errors[0];
        assert_eq!(e.row, 3);
        assert_eq!(e.kind, RowErrorKind::ParseError);
        assert!(e.to_string().starts_with("row 3: partial_2"));

        let (_, f1) = stored(&conn, "s1").expect("s1 stored");
        assert_eq!(f1, Some(8.0));
        assert!(stored(&conn, "s2").is_none());
        assert_eq!(stored(&conn, "s3").expect("s3").1, Some(6.0));
    }

    #[test]
    fn out_of_range_score_is_a_parse_error() {
        let conn = seeded();
        let outcome = upload(&conn, "EST001,,10.5,9,9,9\nEST002,,-0.1,,,\n").expect("outcome");
        assert_eq!(outcome.updated_count, 0);
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome
            .errors
            .iter()
            .all(|e| e.kind == RowErrorKind::ParseError && e.message.contains("between 0 and 10")));
        assert_eq!(score_count(&conn), 0);
    }

    #[test]
    fn unenrolled_student_is_rejected_without_writes() {
        let conn = seeded();
        let outcome = upload(&conn, "EST004,López Gil Juan,8,8,8,8\nEST999,,8,8,8,8\n")
            .expect("outcome");
        assert_eq!(outcome.updated_count, 0);
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome
            .errors
            .iter()
            .all(|e| e.kind == RowErrorKind::NotEnrolled));
        assert_eq!(outcome.errors[0].row, 2);
        assert_eq!(outcome.errors[1].row, 3);
        assert_eq!(score_count(&conn), 0);
    }

    #[test]
    fn blank_cells_are_absent_and_final_is_absent() {
        let conn = seeded();
        let outcome = upload(&conn, "EST001,,8,,9,\n").expect("outcome");
        assert_eq!(outcome.updated_count, 1);
        let (inputs, final_grade) = stored(&conn, "s1").expect("stored");
        assert_eq!(inputs.partial_1, Some(8.0));
        assert_eq!(inputs.partial_2, None);
        assert_eq!(inputs.partial_3, Some(9.0));
        assert_eq!(inputs.ordinary, None);
        assert_eq!(final_grade, None);
    }

    #[test]
    fn blank_student_id_is_reported() {
        let conn = seeded();
        let outcome = upload(&conn, ",Someone,8,8,8,8\n").expect("outcome");
        assert_eq!(outcome.updated_count, 0);
        assert_eq!(outcome.errors[0].kind, RowErrorKind::ParseError);
        assert!(outcome.errors[0].message.contains("student_id"));
    }

    #[test]
    fn missing_column_aborts_before_any_row() {
        let conn = seeded();
        let sheet = parse_csv(
            "student_id,full_name,partial_1,partial_2,partial_3\nEST001,,8,8,8\n",
        )
        .expect("sheet");
        match process_upload(&conn, &sheet, "c1", &ctx("i1")) {
            Err(ImportError::MalformedUpload(m)) => assert_eq!(m, "missing columns: ordinary"),
            other => panic!("expected MalformedUpload, got {other:?}"),
        }
        assert_eq!(score_count(&conn), 0);
    }

    #[test]
    fn reupload_is_idempotent_and_replaces_whole_row() {
        let conn = seeded();
        let body = "EST001,,8,9,10,7\nEST002,,5,5,5,5\n";
        upload(&conn, body).expect("first");
        let first = (stored(&conn, "s1"), stored(&conn, "s2"));
        upload(&conn, body).expect("second");
        assert_eq!((stored(&conn, "s1"), stored(&conn, "s2")), first);
        assert_eq!(score_count(&conn), 2);

        // Only partial_1 in the new file: the other stored fields are erased.
        upload(&conn, "EST001,,4,,,\n").expect("partial reupload");
        let (inputs, final_grade) = stored(&conn, "s1").expect("s1");
        assert_eq!(inputs.partial_1, Some(4.0));
        assert_eq!(inputs.partial_2, None);
        assert_eq!(final_grade, None);
    }

    #[test]
    fn columns_are_matched_by_name_not_position() {
        let conn = seeded();
        let sheet = parse_csv(
            "ordinary,extra,partial_3,partial_2,partial_1,full_name,student_id\n\
             10,x,10,10,10,Ana,EST001\n",
        )
        .expect("sheet");
        let outcome = process_upload(&conn, &sheet, "c1", &ctx("i1")).expect("outcome");
        assert_eq!(outcome.updated_count, 1);
        assert_eq!(stored(&conn, "s1").expect("s1").1, Some(10.0));
    }

    #[test]
    fn unreadable_file_is_malformed() {
        let conn = seeded();
        let missing = std::env::temp_dir().join("gradebookd-does-not-exist.csv");
        assert!(matches!(
            process_upload_file(&conn, &missing, "c1", &ctx("i1")),
            Err(ImportError::MalformedUpload(_))
        ));
    }

    #[test]
    fn template_with_multiline_name_reimports_without_losing_scores() {
        let conn = seeded();
        upload(&conn, "EST001,,8,9,10,7\nEST002,,5,5,5,5\n").expect("seed scores");
        conn.execute("UPDATE students SET given_name = 'Ana\nMaría' WHERE id = 's1'", [])
            .expect("rename");

        let roster = enrollment::enrolled_students(&conn, "c1", &ctx("i1")).expect("roster");
        let sheet = parse_csv(&sheet::to_csv(&sheet::IMPORT_COLUMNS, &sheet::template_rows(&roster))).expect("sheet");
        let outcome = process_upload(&conn, &sheet, "c1", &ctx("i1")).expect("outcome");

        assert_eq!(outcome.updated_count, 3);
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        let (inputs, final_grade) = stored(&conn, "s1").expect("s1");
        assert_eq!(inputs.partial_1, Some(8.0));
        assert_eq!(final_grade, Some(8.0));
    }

    #[test]
    fn unterminated_quote_is_a_parse_error_and_keeps_stored_scores() {
        let conn = seeded();
        upload(&conn, "EST001,,8,9,10,7\n").expect("seed scores");
        let outcome = upload(&conn, "EST002,,5,5,5,5\nEST001,\"Ana,8,9,10,7\n").expect("outcome");

        assert_eq!(outcome.updated_count, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].row, 3);
        assert_eq!(outcome.errors[0].kind, RowErrorKind::ParseError);
        assert_eq!(stored(&conn, "s1").expect("s1").1, Some(8.0));
    }

    #[test]
    fn storage_failure_aborts_and_rolls_back_the_upload() {
        let conn = seeded();
        conn.execute_batch(
            "CREATE TRIGGER reject_s2 BEFORE INSERT ON scores
             WHEN NEW.student_id = 's2'
             BEGIN SELECT RAISE(ABORT, 'boom'); END;",
        )
        .expect("trigger");

        let result = upload(&conn, "EST001,,8,9,10,7\nEST002,,5,5,5,5\n");
        assert!(matches!(result, Err(ImportError::Storage(_))), "{result:?}");
        assert_eq!(score_count(&conn), 0);
    }

    #[test]
    fn workbook_upload_is_read_like_csv() {
        let conn = seeded();
        let path = std::env::temp_dir().join(format!(
            "gradebookd-upload-{}.xlsx",
            uuid::Uuid::new_v4()
        ));
        let rows = vec![
            vec!["EST001".to_string(), "Ana".to_string(), "8".to_string(), "9".to_string(), "10".to_string(), "7".to_string()],
            vec!["EST002".to_string(), "Luis".to_string(), "11".to_string(), String::new(), String::new(), String::new()],
        ];
        sheet::write_workbook(&path, &sheet::IMPORT_COLUMNS, &rows).expect("write workbook");

        let outcome = process_upload_file(&conn, &path, "c1", &ctx("i1")).expect("outcome");
        let _ = std::fs::remove_file(&path);

        assert_eq!(outcome.updated_count, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].row, 3);
        assert_eq!(stored(&conn, "s1").expect("s1").1, Some(8.0));
    }
}
