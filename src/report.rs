use serde::Serialize;

use crate::calc::format_score;
use crate::enrollment::EnrolledStudent;

pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportKind {
    Partial1,
    Partial2,
    Partial3,
    Ordinary,
    Final,
}

impl ReportKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "partial1" | "partial_1" => Some(Self::Partial1),
            "partial2" | "partial_2" => Some(Self::Partial2),
            "partial3" | "partial_3" => Some(Self::Partial3),
            "ordinary" => Some(Self::Ordinary),
            "final" => Some(Self::Final),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Partial1 => "Partial 1",
            Self::Partial2 => "Partial 2",
            Self::Partial3 => "Partial 3",
            Self::Ordinary => "Ordinary",
            Self::Final => "Final Grade",
        }
    }

    pub fn columns(self) -> Vec<&'static str> {
        match self {
            Self::Final => vec![
                "No.", "Key", "Full Name", "P1", "P2", "P3", "Ord.", "Final", "Signature",
            ],
            single => vec!["No.", "Key", "Full Name", single.label(), "Student Signature"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReportScores {
    #[serde(rename_all = "camelCase")]
    Single { score: String },
    #[serde(rename_all = "camelCase")]
    Final {
        partial_1: String,
        partial_2: String,
        partial_3: String,
        ordinary: String,
        final_grade: String,
    },
}

impl ReportScores {
    fn cells(&self) -> Vec<&str> {
        match self {
            Self::Single { score } => vec![score.as_str()],
            Self::Final {
                partial_1,
                partial_2,
                partial_3,
                ordinary,
                final_grade,
            } => vec![
                partial_1.as_str(),
                partial_2.as_str(),
                partial_3.as_str(),
                ordinary.as_str(),
                final_grade.as_str(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub seq: usize,
    pub student_key: String,
    pub full_name: String,
    pub scores: ReportScores,
}

fn or_na(v: Option<f64>) -> String {
    v.map(format_score)
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Pick the fields `kind` needs from each record, in input order. The stored
/// final grade is copied as-is; nothing is recomputed here. Callers sort the
/// roster beforehand (see `enrollment::enrolled_students`).
pub fn assemble_report(records: &[EnrolledStudent], kind: ReportKind) -> Vec<ReportRow> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let scores = match kind {
                ReportKind::Partial1 => ReportScores::Single {
                    score: or_na(r.inputs.partial_1),
                },
                ReportKind::Partial2 => ReportScores::Single {
                    score: or_na(r.inputs.partial_2),
                },
                ReportKind::Partial3 => ReportScores::Single {
                    score: or_na(r.inputs.partial_3),
                },
                ReportKind::Ordinary => ReportScores::Single {
                    score: or_na(r.inputs.ordinary),
                },
                ReportKind::Final => ReportScores::Final {
                    partial_1: or_na(r.inputs.partial_1),
                    partial_2: or_na(r.inputs.partial_2),
                    partial_3: or_na(r.inputs.partial_3),
                    ordinary: or_na(r.inputs.ordinary),
                    final_grade: or_na(r.final_grade),
                },
            };
            ReportRow {
                seq: i + 1,
                student_key: r.key.clone(),
                full_name: r.full_name(),
                scores,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportHeader {
    pub title: String,
    pub instructor_name: String,
    pub instructor_key: String,
    pub course_name: String,
    pub course_code: String,
    pub semester: String,
    pub kind: ReportKind,
    pub kind_label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureFooter {
    pub instructor_line: String,
    pub instructor_key_line: String,
    pub coordination_line: &'static str,
}

impl SignatureFooter {
    pub fn for_instructor(name: &str, key: &str) -> Self {
        Self {
            instructor_line: format!("Instructor: {}", name),
            instructor_key_line: format!("Key: {}", key),
            coordination_line: "Approved: Academic Coordination",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDocument {
    pub header: ReportHeader,
    pub columns: Vec<&'static str>,
    pub rows: Vec<ReportRow>,
    pub footer: SignatureFooter,
}

const SIGNATURE_RULE: &str = "________________________________________";

fn widths(doc: &ReportDocument) -> Vec<usize> {
    let mut w: Vec<usize> = doc.columns.iter().map(|c| c.chars().count()).collect();
    for row in &doc.rows {
        for (i, cell) in text_cells(row).iter().enumerate() {
            if let Some(slot) = w.get_mut(i) {
                *slot = (*slot).max(cell.chars().count());
            }
        }
    }
    w
}

fn text_cells(row: &ReportRow) -> Vec<String> {
    let mut cells = vec![
        row.seq.to_string(),
        row.student_key.clone(),
        row.full_name.clone(),
    ];
    cells.extend(row.scores.cells().into_iter().map(str::to_string));
    // Signature column stays blank for a handwritten signature.
    cells.push(String::new());
    cells
}

fn format_line(cells: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(c, w)| format!("{:<width$}", c, width = *w))
        .collect();
    format!("| {} |", padded.join(" | "))
}

/// Plain-text rendering: the header block, then the table split into pages of
/// `rows_per_page` rows (column labels repeated, pages separated by form feed),
/// then the signature footer.
pub fn render_text(doc: &ReportDocument, rows_per_page: usize) -> String {
    let w = widths(doc);
    let labels: Vec<String> = doc.columns.iter().map(|c| c.to_string()).collect();
    let header_line = format_line(&labels, &w);
    let rule = "-".repeat(header_line.chars().count());

    let h = &doc.header;
    let mut out = String::new();
    out.push_str(&format!("{} - GRADE REPORT\n\n", h.title));
    out.push_str(&format!("Instructor:      {}\n", h.instructor_name));
    out.push_str(&format!("Instructor Key:  {}\n", h.instructor_key));
    out.push_str(&format!("Course:          {}\n", h.course_name));
    out.push_str(&format!("Course Code:     {}\n", h.course_code));
    out.push_str(&format!("Semester:        {}\n", h.semester));
    out.push_str(&format!("Report Type:     {}\n", h.kind_label));
    if let Some(ts) = &h.generated_at {
        out.push_str(&format!("Generated:       {}\n", ts));
    }
    out.push('\n');

    if doc.rows.is_empty() {
        out.push_str("No students are enrolled in this course.\n");
    } else {
        let per_page = rows_per_page.max(1);
        let pages = doc.rows.chunks(per_page).collect::<Vec<_>>();
        let total = pages.len();
        for (p, chunk) in pages.into_iter().enumerate() {
            if p > 0 {
                out.push('\u{000c}');
                out.push('\n');
            }
            out.push_str(&rule);
            out.push('\n');
            out.push_str(&header_line);
            out.push('\n');
            out.push_str(&rule);
            out.push('\n');
            for row in chunk {
                out.push_str(&format_line(&text_cells(row), &w));
                out.push('\n');
            }
            out.push_str(&rule);
            out.push('\n');
            out.push_str(&format!("Page {} of {}\n", p + 1, total));
        }
    }

    let f = &doc.footer;
    out.push_str("\n\n");
    out.push_str(&format!("{:<44}{}\n", SIGNATURE_RULE, SIGNATURE_RULE));
    out.push_str(&format!("{:<44}{}\n", f.instructor_line, f.coordination_line));
    out.push_str(&format!("{}\n", f.instructor_key_line));
    out
}
