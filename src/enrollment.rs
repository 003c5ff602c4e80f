use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::calc::{ScoreInputs, StudentGrades};
use crate::error::EnrollmentError;

/// Who is asking, and for which semester. Passed explicitly into every
/// grade, import and report operation.
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub instructor_id: String,
    pub semester: String,
}

/// Map an external student identifier to the internal student id, provided the
/// student is enrolled in `course_id` under the caller's instructor and
/// semester.
pub fn resolve_student(
    conn: &Connection,
    identifier: &str,
    course_id: &str,
    ctx: &CallerContext,
) -> Result<String, EnrollmentError> {
    let key = identifier.trim();
    let student_id: Option<String> = conn
        .query_row(
            "SELECT s.id
             FROM students s
             JOIN enrollments e ON e.student_id = s.id
             WHERE s.key = ? AND e.course_id = ? AND e.instructor_id = ? AND e.semester = ?",
            (key, course_id, &ctx.instructor_id, &ctx.semester),
            |r| r.get(0),
        )
        .optional()?;
    student_id.ok_or_else(|| EnrollmentError::NotEnrolled(key.to_string()))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledStudent {
    pub student_id: String,
    pub key: String,
    pub given_name: String,
    pub paternal_surname: String,
    pub maternal_surname: String,
    pub group: String,
    #[serde(flatten)]
    pub inputs: ScoreInputs,
    pub final_grade: Option<f64>,
}

impl EnrolledStudent {
    /// `paternal maternal given`, the order used on every roster and report.
    pub fn full_name(&self) -> String {
        format!(
            "{} {} {}",
            self.paternal_surname, self.maternal_surname, self.given_name
        )
    }

    pub fn grades(&self) -> StudentGrades {
        StudentGrades {
            student_key: self.key.clone(),
            full_name: self.full_name(),
            inputs: self.inputs,
            final_grade: self.final_grade,
        }
    }
}

/// Enrolled roster for the course with the caller's score records, sorted by
/// paternal surname, maternal surname, given name.
pub fn enrolled_students(
    conn: &Connection,
    course_id: &str,
    ctx: &CallerContext,
) -> rusqlite::Result<Vec<EnrolledStudent>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.key, s.given_name, s.paternal_surname, s.maternal_surname, e.group_name,
                sc.partial_1, sc.partial_2, sc.partial_3, sc.ordinary, sc.final_grade
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         LEFT JOIN scores sc
           ON sc.student_id = e.student_id
          AND sc.course_id = e.course_id
          AND sc.instructor_id = e.instructor_id
          AND sc.semester = e.semester
         WHERE e.course_id = ? AND e.instructor_id = ? AND e.semester = ?
         ORDER BY s.paternal_surname, s.maternal_surname, s.given_name, s.key",
    )?;
    let rows = stmt
        .query_map((course_id, &ctx.instructor_id, &ctx.semester), |r| {
            Ok(EnrolledStudent {
                student_id: r.get(0)?,
                key: r.get(1)?,
                given_name: r.get(2)?,
                paternal_surname: r.get(3)?,
                maternal_surname: r.get(4)?,
                group: r.get(5)?,
                inputs: ScoreInputs {
                    partial_1: r.get(6)?,
                    partial_2: r.get(7)?,
                    partial_3: r.get(8)?,
                    ordinary: r.get(9)?,
                },
                final_grade: r.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn resolves_enrolled_student() {
        let conn = seeded();
        let id = resolve_student(&conn, " EST002 ", "c1", &ctx("i1")).expect("enrolled");
        assert_eq!(id, "s2");
    }

    #[test]
    fn unknown_wrong_course_and_wrong_instructor_look_the_same() {
        let conn = seeded();
        let cases = [
            ("EST999", "c1", "i1"),
            ("EST004", "c1", "i1"),
            ("EST001", "c1", "i2"),
            ("EST001", "c2", "i1"),
        ];
        for (key, course, instructor) in cases {
            match resolve_student(&conn, key, course, &ctx(instructor)) {
                Err(EnrollmentError::NotEnrolled(k)) => assert_eq!(k, key),
                other => panic!("expected NotEnrolled for {key}, got {other:?}"),
            }
        }
    }

    #[test]
    fn other_semester_is_not_enrolled() {
        let conn = seeded();
        let mut other = ctx("i1");
        other.semester = "2024-2025B".to_string();
        assert!(matches!(
            resolve_student(&conn, "EST001", "c1", &other),
            Err(EnrollmentError::NotEnrolled(_))
        ));
    }

    #[test]
    fn roster_is_sorted_by_surnames_then_given_name() {
        let conn = seeded();
        let roster = enrolled_students(&conn, "c1", &ctx("i1")).expect("roster");
        let names: Vec<String> = roster.iter().map(|s| s.full_name()).collect();
        assert_eq!(
            names,
            vec![
                "García Blanco Rosa".to_string(),
                "García Torres Luis".to_string(),
                "Pérez Ruiz Ana".to_string(),
            ]
        );
        assert!(roster.iter().all(|s| s.final_grade.is_none()));
    }
}
