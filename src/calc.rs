use serde::Serialize;
use std::cmp::Ordering;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 10.0;
pub const PARTIALS_WEIGHT: f64 = 0.5;
pub const ORDINARY_WEIGHT: f64 = 0.5;

/// Round to one decimal place, half away from zero.
///
/// The scaled value is first snapped to 1e-6 tenths so that binary noise from
/// the weighted average (e.g. `5.9499999999` for an exact `5.95`) does not
/// flip a boundary grade. `5.95 -> 6.0`, `8.25 -> 8.3`, `5.94 -> 5.9`.
pub fn round_half_away_1_decimal(x: f64) -> f64 {
    let scaled = ((x * 10.0) * 1e6).round() / 1e6;
    scaled.round() / 10.0
}

/// The four scored inputs of one student's record. `None` means absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreInputs {
    pub partial_1: Option<f64>,
    pub partial_2: Option<f64>,
    pub partial_3: Option<f64>,
    pub ordinary: Option<f64>,
}

impl ScoreInputs {
    pub fn final_grade(&self) -> Option<f64> {
        compute_final(self.partial_1, self.partial_2, self.partial_3, self.ordinary)
    }

    fn partials(&self) -> [Option<f64>; 3] {
        [self.partial_1, self.partial_2, self.partial_3]
    }
}

/// Final grade: 50% mean of the three partials + 50% ordinary exam, rounded
/// with [`round_half_away_1_decimal`]. Absent if any input is absent. Range is
/// not checked here.
pub fn compute_final(
    p1: Option<f64>,
    p2: Option<f64>,
    p3: Option<f64>,
    ordinary: Option<f64>,
) -> Option<f64> {
    let (p1, p2, p3, ordinary) = (p1?, p2?, p3?, ordinary?);
    let avg_partials = (p1 + p2 + p3) / 3.0;
    Some(round_half_away_1_decimal(
        avg_partials * PARTIALS_WEIGHT + ordinary * ORDINARY_WEIGHT,
    ))
}

pub fn is_valid_score(v: f64) -> bool {
    v.is_finite() && (MIN_SCORE..=MAX_SCORE).contains(&v)
}

/// Parse one spreadsheet cell. Blank cells are absent; anything else must be
/// a number in [0,10].
pub fn parse_score_cell(raw: &str) -> Result<Option<f64>, String> {
    let t = raw.trim();
    if t.is_empty() {
        return Ok(None);
    }
    let v = t
        .parse::<f64>()
        .map_err(|_| format!("non-numeric value {:?}", t))?;
    if !is_valid_score(v) {
        return Err(format!("value {} must be between 0 and 10", t));
    }
    Ok(Some(v))
}

/// Display form used on reports: always at least one decimal (`10.0`, `8.5`).
pub fn format_score(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

fn round_to(x: f64, decimals: i32) -> f64 {
    let f = 10f64.powi(decimals);
    (x * f).round() / f
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

#[derive(Debug, Clone, Copy)]
pub struct GradeThresholds {
    pub passing: f64,
    pub outstanding: f64,
}

impl Default for GradeThresholds {
    fn default() -> Self {
        Self {
            passing: 6.0,
            outstanding: 9.0,
        }
    }
}

/// A student's scores as read back from the store; input to the statistics.
#[derive(Debug, Clone)]
pub struct StudentGrades {
    pub student_key: String,
    pub full_name: String,
    pub inputs: ScoreInputs,
    pub final_grade: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationStats {
    pub evaluation: &'static str,
    pub count: usize,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub passed: usize,
    pub pass_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBands {
    pub excellent: usize,
    pub very_good: usize,
    pub good: usize,
    pub fair: usize,
    pub sufficient: usize,
    pub failing: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtRiskStudent {
    pub student_key: String,
    pub full_name: String,
    pub partial_mean: f64,
    pub final_grade: Option<f64>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutstandingStudent {
    pub student_key: String,
    pub full_name: String,
    pub final_grade: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStatistics {
    pub total_students: usize,
    pub graded_students: usize,
    pub mean_final: Option<f64>,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: Option<f64>,
    pub evaluations: Vec<EvaluationStats>,
    pub bands: GradeBands,
    pub at_risk: Vec<AtRiskStudent>,
    pub outstanding: Vec<OutstandingStudent>,
    pub recommendations: Vec<String>,
}

fn evaluation_stats(
    evaluation: &'static str,
    values: Vec<f64>,
    thresholds: &GradeThresholds,
) -> EvaluationStats {
    let passed = values.iter().filter(|v| **v >= thresholds.passing).count();
    let pass_rate = if values.is_empty() {
        None
    } else {
        Some(round_to(100.0 * passed as f64 / values.len() as f64, 1))
    };
    EvaluationStats {
        evaluation,
        count: values.len(),
        mean: mean(&values).map(|m| round_to(m, 2)),
        min: values.iter().copied().reduce(f64::min),
        max: values.iter().copied().reduce(f64::max),
        passed,
        pass_rate,
    }
}

pub const REC_REINFORCE: &str = "Reinforce the hardest topics with additional sessions";
pub const REC_LOW_PASS_RATE: &str = "Pass rate is low; review the teaching approach";
pub const REC_MANY_AT_RISK: &str = "More than 30% of students are at risk; put support strategies in place";
pub const REC_NO_OUTSTANDING: &str = "Add activities that encourage academic excellence";
pub const REC_EXCELLENT_GROUP: &str = "Excellent group performance; keep the current approach";
pub const REC_NORMAL: &str = "Group performance is within normal parameters";

/// Advice derived from the graded finals. Nothing is suggested until at least
/// one final grade exists. Pass rate here is over graded students only.
fn recommendations(
    finals: &[f64],
    total_students: usize,
    at_risk: usize,
    outstanding: usize,
    thresholds: &GradeThresholds,
) -> Vec<String> {
    let Some(mean_final) = mean(finals) else {
        return Vec::new();
    };
    let passed = finals.iter().filter(|f| **f >= thresholds.passing).count();
    let pass_rate = 100.0 * passed as f64 / finals.len() as f64;

    let mut out = Vec::new();
    if mean_final < 7.0 {
        out.push(REC_REINFORCE);
    }
    if pass_rate < 70.0 {
        out.push(REC_LOW_PASS_RATE);
    }
    if at_risk as f64 > total_students as f64 * 0.3 {
        out.push(REC_MANY_AT_RISK);
    }
    if outstanding == 0 {
        out.push(REC_NO_OUTSTANDING);
    }
    if mean_final >= 8.0 && pass_rate >= 80.0 {
        out.push(REC_EXCELLENT_GROUP);
    }
    if out.is_empty() {
        out.push(REC_NORMAL);
    }
    out.into_iter().map(str::to_string).collect()
}

fn grade_bands(finals: &[f64]) -> GradeBands {
    let mut bands = GradeBands::default();
    for &f in finals {
        if f >= 10.0 {
            bands.excellent += 1;
        } else if f >= 9.0 {
            bands.very_good += 1;
        } else if f >= 8.0 {
            bands.good += 1;
        } else if f >= 7.0 {
            bands.fair += 1;
        } else if f >= 6.0 {
            bands.sufficient += 1;
        } else {
            bands.failing += 1;
        }
    }
    bands
}

pub fn course_statistics(
    students: &[StudentGrades],
    thresholds: &GradeThresholds,
) -> CourseStatistics {
    let finals: Vec<f64> = students.iter().filter_map(|s| s.final_grade).collect();
    let passed = finals.iter().filter(|f| **f >= thresholds.passing).count();
    let failed = finals.len() - passed;
    // Overall pass rate is over every enrolled student, graded or not.
    let pass_rate = if students.is_empty() {
        None
    } else {
        Some(round_to(100.0 * passed as f64 / students.len() as f64, 1))
    };

    let column = |pick: fn(&StudentGrades) -> Option<f64>| -> Vec<f64> {
        students.iter().filter_map(pick).collect()
    };
    let evaluations = vec![
        evaluation_stats("partial_1", column(|s| s.inputs.partial_1), thresholds),
        evaluation_stats("partial_2", column(|s| s.inputs.partial_2), thresholds),
        evaluation_stats("partial_3", column(|s| s.inputs.partial_3), thresholds),
        evaluation_stats("ordinary", column(|s| s.inputs.ordinary), thresholds),
        evaluation_stats("final_grade", column(|s| s.final_grade), thresholds),
    ];

    let mut at_risk = Vec::new();
    for s in students {
        let present: Vec<f64> = s.inputs.partials().iter().flatten().copied().collect();
        let Some(partial_mean) = mean(&present) else {
            continue;
        };
        let mut reasons = Vec::new();
        if partial_mean < thresholds.passing {
            reasons.push(format!("partial mean {:.1}", partial_mean));
        }
        if let Some(f) = s.final_grade.filter(|f| *f < thresholds.passing) {
            reasons.push(format!("final grade {:.1}", f));
        }
        if !reasons.is_empty() {
            at_risk.push(AtRiskStudent {
                student_key: s.student_key.clone(),
                full_name: s.full_name.clone(),
                partial_mean: round_to(partial_mean, 1),
                final_grade: s.final_grade,
                reasons,
            });
        }
    }

    let mut outstanding: Vec<OutstandingStudent> = students
        .iter()
        .filter_map(|s| {
            let f = s.final_grade.filter(|f| *f >= thresholds.outstanding)?;
            Some(OutstandingStudent {
                student_key: s.student_key.clone(),
                full_name: s.full_name.clone(),
                final_grade: f,
            })
        })
        .collect();
    outstanding.sort_by(|a, b| {
        b.final_grade
            .partial_cmp(&a.final_grade)
            .unwrap_or(Ordering::Equal)
    });

    let recommendations = recommendations(
        &finals,
        students.len(),
        at_risk.len(),
        outstanding.len(),
        thresholds,
    );

    CourseStatistics {
        total_students: students.len(),
        graded_students: finals.len(),
        mean_final: mean(&finals).map(|m| round_to(m, 2)),
        passed,
        failed,
        pass_rate,
        evaluations,
        bands: grade_bands(&finals),
        at_risk,
        outstanding,
        recommendations,
    }
}

/// Identity of one course on an instructor's dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRef {
    pub course_id: String,
    pub name: String,
    pub code: String,
    pub groups: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseOverview {
    #[serde(flatten)]
    pub course: CourseRef,
    pub enrolled: usize,
    pub graded: usize,
    pub mean_final: Option<f64>,
    pub passed: usize,
    pub bands: GradeBands,
}

impl CourseOverview {
    pub fn new(course: CourseRef, stats: &CourseStatistics) -> Self {
        Self {
            course,
            enrolled: stats.total_students,
            graded: stats.graded_students,
            mean_final: stats.mean_final,
            passed: stats.passed,
            bands: stats.bands.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructorSummary {
    pub courses_assigned: usize,
    pub total_students: usize,
    pub finals_recorded: usize,
    /// Share of enrolled students with a final grade, percent, 1 decimal.
    pub completion_rate: f64,
    pub courses: Vec<CourseOverview>,
}

pub fn instructor_summary(courses: Vec<CourseOverview>) -> InstructorSummary {
    let total_students: usize = courses.iter().map(|c| c.enrolled).sum();
    let finals_recorded: usize = courses.iter().map(|c| c.graded).sum();
    let completion_rate = if total_students == 0 {
        0.0
    } else {
        round_to(100.0 * finals_recorded as f64 / total_students as f64, 1)
    };
    InstructorSummary {
        courses_assigned: courses.len(),
        total_students,
        finals_recorded,
        completion_rate,
        courses,
    }
}
