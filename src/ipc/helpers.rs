use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ranking::Term;
use crate::store;
use chrono::NaiveDate;
use rusqlite::Connection;

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Trimmed, non-empty string param.
pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let v = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if v.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(v)
}

/// Missing, null and blank all read as `None`.
pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn optional_f64(params: &serde_json::Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_f64() {
            Some(n) if n.is_finite() => Ok(Some(n)),
            _ => Err(HandlerErr::bad_params(format!("{} must be a number", key))),
        },
    }
}

pub fn required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    optional_f64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_bool(params: &serde_json::Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a boolean", key))),
    }
}

/// Accepts "first"/"second"/"third" or 1..=3.
pub fn required_term(params: &serde_json::Value) -> Result<Term, HandlerErr> {
    let raw = params
        .get("term")
        .ok_or_else(|| HandlerErr::bad_params("missing term"))?;
    let parsed = match raw {
        serde_json::Value::String(s) => Term::parse(s),
        serde_json::Value::Number(n) => n.as_i64().and_then(|n| Term::parse(&n.to_string())),
        _ => None,
    };
    parsed.ok_or_else(|| HandlerErr::bad_params("term must be first, second or third"))
}

pub fn parse_date(raw: &str, key: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn required_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = required_str(params, key)?;
    parse_date(&raw, key)
}

pub fn optional_date(params: &serde_json::Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    optional_str(params, key)
        .map(|raw| parse_date(&raw, key))
        .transpose()
}

/// Fails with `not_found` unless a row with `id` exists in `table`.
pub fn require_row(conn: &Connection, table: &str, what: &str, id: &str) -> Result<(), HandlerErr> {
    if store::exists(conn, table, id).map_err(HandlerErr::query)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found(what))
    }
}

pub fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub type ConnOp = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

/// Runs `op` against the open workspace and wraps the outcome for the wire.
pub fn with_conn(state: &AppState, req: &Request, op: ConnOp) -> serde_json::Value {
    respond(&req.id, db_conn(state).and_then(|conn| op(conn, &req.params)))
}
