use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    now_ts, optional_str, require_row, required_f64, required_str, required_term, with_conn,
};
use crate::ipc::types::{AppState, Request};
use crate::ranking::Term;
use rusqlite::{params_from_iter, types::Value, Connection};
use serde_json::json;
use uuid::Uuid;

const MAX_BULK_ENTRIES: usize = 500;

fn validate_score(score: f64) -> Result<f64, HandlerErr> {
    if !(0.0..=100.0).contains(&score) {
        return Err(HandlerErr::bad_params("score must be between 0 and 100")
            .with_details(json!({ "score": score })));
    }
    Ok(score)
}

fn upsert_one(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    term: Term,
    academic_year_id: &str,
    score: f64,
) -> Result<String, HandlerErr> {
    conn.execute(
        "INSERT INTO scores(id, student_id, subject_id, term, academic_year_id, score, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, term, academic_year_id)
         DO UPDATE SET score = excluded.score, updated_at = excluded.updated_at",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            student_id,
            subject_id,
            term.as_str(),
            academic_year_id,
            score,
            now_ts(),
        ],
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "scores" }))
    })?;
    conn.query_row(
        "SELECT id FROM scores
         WHERE student_id = ? AND subject_id = ? AND term = ? AND academic_year_id = ?",
        (student_id, subject_id, term.as_str(), academic_year_id),
        |r| r.get(0),
    )
    .map_err(HandlerErr::query)
}

fn scores_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let subject_id = required_str(params, "subjectId")?;
    let academic_year_id = required_str(params, "academicYearId")?;
    let term = required_term(params)?;
    let score = validate_score(required_f64(params, "score")?)?;

    require_row(conn, "students", "student", &student_id)?;
    require_row(conn, "subjects", "subject", &subject_id)?;
    require_row(conn, "academic_years", "academic year", &academic_year_id)?;

    let score_id = upsert_one(conn, &student_id, &subject_id, term, &academic_year_id, score)?;
    tracing::debug!(score_id = %score_id, "score saved");
    Ok(json!({ "scoreId": score_id, "score": score }))
}

/// One subject, many students, applied atomically. Any invalid entry rejects
/// the whole batch.
fn scores_bulk_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = required_str(params, "subjectId")?;
    let academic_year_id = required_str(params, "academicYearId")?;
    let term = required_term(params)?;
    let entries = params
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("entries must be an array"))?;
    if entries.len() > MAX_BULK_ENTRIES {
        return Err(HandlerErr::bad_params(format!(
            "at most {} entries per request",
            MAX_BULK_ENTRIES
        )));
    }

    require_row(conn, "subjects", "subject", &subject_id)?;
    require_row(conn, "academic_years", "academic year", &academic_year_id)?;

    let mut parsed: Vec<(String, f64)> = Vec::with_capacity(entries.len());
    for (idx, e) in entries.iter().enumerate() {
        let student_id = required_str(e, "studentId")
            .map_err(|err| err.with_details(json!({ "index": idx })))?;
        let score = required_f64(e, "score")
            .and_then(validate_score)
            .map_err(|err| err.with_details(json!({ "index": idx })))?;
        require_row(conn, "students", "student", &student_id)
            .map_err(|err| err.with_details(json!({ "index": idx })))?;
        parsed.push((student_id, score));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (student_id, score) in &parsed {
        upsert_one(&tx, student_id, &subject_id, term, &academic_year_id, *score)?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tracing::info!(subject_id = %subject_id, count = parsed.len(), "scores saved in bulk");

    Ok(json!({ "updated": parsed.len() }))
}

fn scores_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let academic_year_id = required_str(params, "academicYearId")?;
    let term = required_term(params)?;
    let class_id = optional_str(params, "classId");
    let student_id = optional_str(params, "studentId");

    let mut sql = String::from(
        "SELECT s.id, s.student_id, st.first_name, st.last_name, st.admission_number, st.class_id,
                s.subject_id, sub.name, s.score
         FROM scores s
         JOIN students st ON st.id = s.student_id
         JOIN subjects sub ON sub.id = s.subject_id
         WHERE s.term = ? AND s.academic_year_id = ?",
    );
    let mut binds: Vec<Value> = vec![
        Value::Text(term.as_str().to_string()),
        Value::Text(academic_year_id.clone()),
    ];
    if let Some(class_id) = class_id {
        sql.push_str(" AND st.class_id = ?");
        binds.push(Value::Text(class_id));
    }
    if let Some(student_id) = student_id {
        sql.push_str(" AND s.student_id = ?");
        binds.push(Value::Text(student_id));
    }
    sql.push_str(" ORDER BY st.last_name, st.first_name, sub.name");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let scores = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let first: String = r.get(2)?;
            let last: String = r.get(3)?;
            let admission_number: String = r.get(4)?;
            let class_id: String = r.get(5)?;
            let subject_id: String = r.get(6)?;
            let subject_name: String = r.get(7)?;
            let score: f64 = r.get(8)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "studentName": format!("{} {}", first, last),
                "admissionNumber": admission_number,
                "classId": class_id,
                "subjectId": subject_id,
                "subjectName": subject_name,
                "score": score
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({
        "term": term,
        "academicYearId": academic_year_id,
        "scores": scores
    }))
}

fn scores_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let score_id = required_str(params, "scoreId")?;
    let changed = conn
        .execute("DELETE FROM scores WHERE id = ?", [&score_id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("score"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.upsert" => Some(with_conn(state, req, scores_upsert)),
        "scores.bulkUpsert" => Some(with_conn(state, req, scores_bulk_upsert)),
        "scores.list" => Some(with_conn(state, req, scores_list)),
        "scores.delete" => Some(with_conn(state, req, scores_delete)),
        _ => None,
    }
}
