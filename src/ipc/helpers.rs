use std::path::PathBuf;

use rusqlite::Connection;
use serde_json::{json, Value};

use crate::calc;
use crate::enrollment::CallerContext;
use crate::ipc::error::err;
use crate::ipc::handlers::setup;
use crate::ipc::types::{AppState, Request};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        HandlerErr::new("db_query_failed", e.to_string())
    }
}

pub fn db_conn<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    let s = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))?;
    if s.is_empty() {
        return Err(HandlerErr::new("bad_params", format!("{} must not be empty", key)));
    }
    Ok(s)
}

pub fn optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Absent key and JSON null both read as "no score".
pub fn optional_score(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let Some(n) = v.as_f64() else {
                return Err(HandlerErr::new("bad_params", format!("{} must be a number or null", key)));
            };
            if !calc::is_valid_score(n) {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: format!("{} must be between 0 and 10", key),
                    details: Some(json!({ "field": key, "value": n })),
                });
            }
            Ok(Some(n))
        }
    }
}

/// Instructor from `instructorId`, semester from `semester` or the active term.
pub fn caller_context(conn: &Connection, params: &Value) -> Result<CallerContext, HandlerErr> {
    let instructor_id = required_str(params, "instructorId")?;
    let semester = match optional_str(params, "semester") {
        Some(s) => s,
        None => setup::term_settings(conn)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
            .active_semester,
    };
    Ok(CallerContext {
        instructor_id,
        semester,
    })
}

pub fn write_text_file(path: &str, contents: &str) -> Result<(), HandlerErr> {
    let out = PathBuf::from(path);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HandlerErr {
            code: "export_failed",
            message: e.to_string(),
            details: Some(json!({ "path": path })),
        })?;
    }
    std::fs::write(&out, contents).map_err(|e| HandlerErr {
        code: "export_failed",
        message: e.to_string(),
        details: Some(json!({ "path": path })),
    })?;
    Ok(())
}

/// Collapse a handler body into the response envelope.
pub fn respond(req: &Request, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => crate::ipc::error::ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}
