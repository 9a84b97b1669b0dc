use crate::attendance::{summarize, AttendanceStatus, AttendanceSummary};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::setup::{load_section, SetupSection};
use crate::ipc::helpers::{optional_date, require_row, required_date, required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::store;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;
use std::collections::{HashMap, HashSet};

pub fn count_late_as_present(conn: &Connection) -> Result<bool, HandlerErr> {
    let section = load_section(conn, SetupSection::Attendance).map_err(HandlerErr::query)?;
    Ok(section
        .get("countLateAsPresent")
        .and_then(|v| v.as_bool())
        .unwrap_or(true))
}

fn statuses_between(
    conn: &Connection,
    column: &str,
    key: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<(String, AttendanceStatus)>, HandlerErr> {
    // ISO dates compare correctly as text.
    let sql = format!(
        "SELECT student_id, status FROM attendance_records
         WHERE {} = ?1 AND (?2 IS NULL OR date >= ?2) AND (?3 IS NULL OR date <= ?3)
         ORDER BY date",
        column
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map(
            (key, from.map(|d| d.to_string()), to.map(|d| d.to_string())),
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let mut out = Vec::with_capacity(rows.len());
    for (student_id, raw) in rows {
        match AttendanceStatus::parse(&raw) {
            Some(s) => out.push((student_id, s)),
            None => tracing::warn!(student_id = %student_id, status = %raw, "skipping unknown attendance status"),
        }
    }
    Ok(out)
}

/// Summary for one student over an optional date window.
pub fn student_summary(
    conn: &Connection,
    student_id: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<AttendanceSummary, HandlerErr> {
    let late_counts = count_late_as_present(conn)?;
    let rows = statuses_between(conn, "student_id", student_id, from, to)?;
    Ok(summarize(rows.into_iter().map(|(_, s)| s), late_counts))
}

fn attendance_mark(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let date = required_date(params, "date")?;
    let entries = params
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("entries must be an array"))?;
    require_row(conn, "classes", "class", &class_id)?;

    let roster: HashSet<String> = store::students_in_class(conn, &class_id, false)
        .map_err(HandlerErr::query)?
        .into_iter()
        .map(|s| s.id)
        .collect();

    let mut parsed: Vec<(String, AttendanceStatus)> = Vec::with_capacity(entries.len());
    for (idx, e) in entries.iter().enumerate() {
        let student_id = required_str(e, "studentId")
            .map_err(|err| err.with_details(json!({ "index": idx })))?;
        if !roster.contains(&student_id) {
            return Err(HandlerErr::bad_params("student is not an active member of the class")
                .with_details(json!({ "index": idx, "studentId": student_id })));
        }
        let raw = required_str(e, "status")
            .map_err(|err| err.with_details(json!({ "index": idx })))?;
        let status = AttendanceStatus::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params("status must be present, absent, late or excused")
                .with_details(json!({ "index": idx, "status": raw }))
        })?;
        parsed.push((student_id, status));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (student_id, status) in &parsed {
        tx.execute(
            "INSERT INTO attendance_records(student_id, class_id, date, status)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(student_id, date) DO UPDATE SET
               status = excluded.status,
               class_id = excluded.class_id",
            (student_id, &class_id, date.to_string(), status.as_str()),
        )
        .map_err(|e| {
            HandlerErr::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "attendance_records" }))
        })?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tracing::info!(class_id = %class_id, date = %date, count = parsed.len(), "attendance marked");

    Ok(json!({ "date": date.to_string(), "marked": parsed.len() }))
}

fn attendance_day(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let date = required_date(params, "date")?;
    require_row(conn, "classes", "class", &class_id)?;

    let students = store::students_in_class(conn, &class_id, false).map_err(HandlerErr::query)?;
    let marked: HashMap<String, AttendanceStatus> =
        statuses_between(conn, "class_id", &class_id, Some(date), Some(date))?
            .into_iter()
            .collect();

    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            json!({
                "studentId": s.id,
                "displayName": s.display_name(),
                "admissionNumber": s.admission_number,
                "status": marked.get(&s.id).map(|st| st.as_str())
            })
        })
        .collect();
    Ok(json!({ "date": date.to_string(), "students": rows }))
}

fn attendance_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let from = optional_date(params, "from")?;
    let to = optional_date(params, "to")?;
    require_row(conn, "classes", "class", &class_id)?;
    let late_counts = count_late_as_present(conn)?;

    let students = store::students_in_class(conn, &class_id, false).map_err(HandlerErr::query)?;
    let mut by_student: HashMap<String, Vec<AttendanceStatus>> = HashMap::new();
    for (student_id, status) in statuses_between(conn, "class_id", &class_id, from, to)? {
        by_student.entry(student_id).or_default().push(status);
    }

    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            let statuses = by_student.remove(&s.id).unwrap_or_default();
            json!({
                "studentId": s.id,
                "displayName": s.display_name(),
                "summary": summarize(statuses, late_counts)
            })
        })
        .collect();

    Ok(json!({
        "classId": class_id,
        "from": from.map(|d| d.to_string()),
        "to": to.map(|d| d.to_string()),
        "students": rows
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(with_conn(state, req, attendance_mark)),
        "attendance.day" => Some(with_conn(state, req, attendance_day)),
        "attendance.summary" => Some(with_conn(state, req, attendance_summary)),
        _ => None,
    }
}
