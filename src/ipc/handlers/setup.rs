use crate::calc::GradeThresholds;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Term,
    Grading,
    Reports,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "term" => Some(Self::Term),
            "grading" => Some(Self::Grading),
            "reports" => Some(Self::Reports),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Term => "setup.term",
            Self::Grading => "setup.grading",
            Self::Reports => "setup.reports",
        }
    }
}

pub const DEFAULT_SEMESTER: &str = "2025-2026A";
pub const DEFAULT_GROUP: &str = "A";

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Term => json!({
            "activeSemester": DEFAULT_SEMESTER,
            "defaultGroup": DEFAULT_GROUP
        }),
        SetupSection::Grading => json!({
            "passingGrade": 6.0,
            "outstandingGrade": 9.0
        }),
        SetupSection::Reports => json!({
            "institutionName": "NOVAUNIVERSITAS",
            "showGeneratedAt": true,
            "rowsPerPage": 40
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_grade(v: &Value, key: &str) -> Result<f64, String> {
    let n = v.as_f64().ok_or_else(|| format!("{} must be a number", key))?;
    if !crate::calc::is_valid_score(n) {
        return Err(format!("{} must be between 0 and 10", key));
    }
    Ok(n)
}

fn parse_string_nonempty(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Term => match k.as_str() {
                "activeSemester" => {
                    obj.insert(k.clone(), Value::String(parse_string_nonempty(v, k, 40)?));
                }
                "defaultGroup" => {
                    obj.insert(k.clone(), Value::String(parse_string_nonempty(v, k, 20)?));
                }
                _ => return Err(format!("unknown term field: {}", k)),
            },
            SetupSection::Grading => match k.as_str() {
                "passingGrade" | "outstandingGrade" => {
                    obj.insert(k.clone(), json!(parse_grade(v, k)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Reports => match k.as_str() {
                "institutionName" => {
                    obj.insert(k.clone(), Value::String(parse_string_nonempty(v, k, 120)?));
                }
                "showGeneratedAt" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "rowsPerPage" => {
                    obj.insert(k.clone(), json!(parse_i64_range(v, k, 10, 200)?));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                if let Err(msg) = merge_section_patch(section, &mut current, &one) {
                    tracing::warn!(section = section.key(), error = %msg, "ignoring saved setting");
                }
            }
        }
    }
    Ok(current)
}

/// Typed view of the sections other handlers read.
#[derive(Debug, Clone)]
pub struct TermSettings {
    pub active_semester: String,
    pub default_group: String,
}

#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub institution_name: String,
    pub show_generated_at: bool,
    pub rows_per_page: usize,
}

fn str_field(v: &Value, key: &str, default: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or(default)
        .to_string()
}

pub fn term_settings(conn: &Connection) -> anyhow::Result<TermSettings> {
    let v = load_section(conn, SetupSection::Term)?;
    Ok(TermSettings {
        active_semester: str_field(&v, "activeSemester", DEFAULT_SEMESTER),
        default_group: str_field(&v, "defaultGroup", DEFAULT_GROUP),
    })
}

pub fn grade_thresholds(conn: &Connection) -> anyhow::Result<GradeThresholds> {
    let v = load_section(conn, SetupSection::Grading)?;
    let d = GradeThresholds::default();
    Ok(GradeThresholds {
        passing: v.get("passingGrade").and_then(|x| x.as_f64()).unwrap_or(d.passing),
        outstanding: v
            .get("outstandingGrade")
            .and_then(|x| x.as_f64())
            .unwrap_or(d.outstanding),
    })
}

pub fn report_settings(conn: &Connection) -> anyhow::Result<ReportSettings> {
    let v = load_section(conn, SetupSection::Reports)?;
    Ok(ReportSettings {
        institution_name: str_field(&v, "institutionName", "NOVAUNIVERSITAS"),
        show_generated_at: v
            .get("showGeneratedAt")
            .and_then(|x| x.as_bool())
            .unwrap_or(true),
        rows_per_page: v
            .get("rowsPerPage")
            .and_then(|x| x.as_u64())
            .unwrap_or(40) as usize,
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let term = match load_section(conn, SetupSection::Term) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let grading = match load_section(conn, SetupSection::Grading) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let reports = match load_section(conn, SetupSection::Reports) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "term": term,
            "grading": grading,
            "reports": reports
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
