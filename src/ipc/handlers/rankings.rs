use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::setup::{load_section, SetupSection};
use crate::ipc::helpers::{require_row, required_str, required_term, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::ranking::{self, ScoreRecord, DEFAULT_TOP_N, MAX_TOP_N};
use crate::store::{self, ScoreFilter};
use rusqlite::Connection;
use serde_json::json;

/// Loads the snapshot for one (term, year), optionally narrowed to a class.
pub fn load_records(
    conn: &Connection,
    params: &serde_json::Value,
    class_id: Option<&str>,
) -> Result<Vec<ScoreRecord>, HandlerErr> {
    let academic_year_id = required_str(params, "academicYearId")?;
    let term = required_term(params)?;
    require_row(conn, "academic_years", "academic year", &academic_year_id)?;
    if let Some(class_id) = class_id {
        require_row(conn, "classes", "class", class_id)?;
    }
    store::score_records(
        conn,
        ScoreFilter {
            class_id,
            term,
            academic_year_id: &academic_year_id,
        },
    )
    .map_err(HandlerErr::query)
}

pub fn warnings_json(records: &[ScoreRecord]) -> Vec<serde_json::Value> {
    let warnings = ranking::score_warnings(records);
    if !warnings.is_empty() {
        tracing::warn!(count = warnings.len(), "malformed scores excluded from aggregation");
    }
    warnings.iter().map(|w| w.to_json()).collect()
}

fn rankings_class(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let records = load_records(conn, params, Some(&class_id))?;
    let entries = ranking::rank_class(&records, &class_id);
    Ok(json!({
        "classId": class_id,
        "entries": entries,
        "warnings": warnings_json(&records)
    }))
}

fn configured_top_n(conn: &Connection) -> Result<usize, HandlerErr> {
    let section = load_section(conn, SetupSection::Leaderboard).map_err(HandlerErr::query)?;
    Ok(section
        .get("topN")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_TOP_N))
}

fn rankings_school_top(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let limit = match params.get("limit") {
        None => configured_top_n(conn)?,
        Some(v) if v.is_null() => configured_top_n(conn)?,
        Some(v) => match v.as_u64() {
            Some(n) if (1..=MAX_TOP_N as u64).contains(&n) => n as usize,
            _ => {
                return Err(HandlerErr::bad_params(format!(
                    "limit must be an integer in 1..={}",
                    MAX_TOP_N
                ))
                .with_details(json!({ "limit": v })))
            }
        },
    };
    let records = load_records(conn, params, None)?;
    let entries = ranking::rank_school_top(&records, limit);
    Ok(json!({
        "limit": limit,
        "entries": entries,
        "warnings": warnings_json(&records)
    }))
}

fn rankings_subject_stats(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let records = load_records(conn, params, Some(&class_id))?;
    let subjects = ranking::subject_stats(&records, &class_id);
    Ok(json!({
        "classId": class_id,
        "subjects": subjects,
        "warnings": warnings_json(&records)
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rankings.class" => Some(with_conn(state, req, rankings_class)),
        "rankings.schoolTop" => Some(with_conn(state, req, rankings_school_top)),
        "rankings.subjectStats" => Some(with_conn(state, req, rankings_subject_stats)),
        _ => None,
    }
}
