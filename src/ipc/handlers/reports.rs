use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::setup::{load_section, SetupSection};
use crate::ipc::handlers::{attendance, fees, rankings};
use crate::ipc::helpers::{parse_date, required_str, required_term, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::ranking;
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

/// One student's term report: subject scores against the class, position,
/// attendance for the academic year and fee standing.
fn reports_term_card(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let academic_year_id = required_str(params, "academicYearId")?;
    let term = required_term(params)?;

    let student = store::student(conn, &student_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("student"))?;
    let year: Option<(String, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT name, start_date, end_date FROM academic_years WHERE id = ?",
            [&academic_year_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((year_name, start_date, end_date)) = year else {
        return Err(HandlerErr::not_found("academic year"));
    };
    let class_name: String = conn
        .query_row(
            "SELECT name FROM classes WHERE id = ?",
            [&student.class_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;

    let records = rankings::load_records(conn, params, Some(&student.class_id))?;
    let ranked = ranking::rank_class(&records, &student.class_id);
    let own = ranked.iter().find(|e| e.student_id == student.id);
    let class_averages: HashMap<String, i64> = ranking::subject_stats(&records, &student.class_id)
        .into_iter()
        .map(|s| (s.subject_id, s.average))
        .collect();

    let own_records: Vec<ranking::ScoreRecord> = records
        .iter()
        .filter(|r| r.student_id == student.id)
        .cloned()
        .collect();
    // Out-of-range rows are reported under warnings, not listed as results.
    let subjects: Vec<serde_json::Value> = own_records
        .iter()
        .filter(|r| r.is_well_formed())
        .map(|r| {
            json!({
                "subjectId": r.subject_id,
                "subjectName": r.subject_name,
                "score": r.score,
                "classAverage": class_averages.get(&r.subject_id)
            })
        })
        .collect();

    let from = start_date.as_deref().map(|d| parse_date(d, "startDate")).transpose()?;
    let to = end_date.as_deref().map(|d| parse_date(d, "endDate")).transpose()?;
    let attendance = attendance::student_summary(conn, &student.id, from, to)?;
    let fee = fees::student_balance(conn, &student.id, &academic_year_id)?;
    let school = load_section(conn, SetupSection::School).map_err(HandlerErr::query)?;

    Ok(json!({
        "school": school,
        "student": {
            "id": student.id,
            "displayName": student.display_name(),
            "admissionNumber": student.admission_number,
            "active": student.active
        },
        "class": { "id": student.class_id, "name": class_name },
        "academicYear": { "id": academic_year_id, "name": year_name },
        "term": term,
        "subjects": subjects,
        "totalScore": own.map(|e| e.total_score),
        "average": own.map(|e| e.average),
        "position": own.map(|e| e.rank),
        "classSize": ranked.len(),
        "attendance": attendance,
        "fees": fee.get("balance").cloned().unwrap_or(serde_json::Value::Null),
        "warnings": rankings::warnings_json(&own_records)
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.termCard" => Some(with_conn(state, req, reports_term_card)),
        _ => None,
    }
}
