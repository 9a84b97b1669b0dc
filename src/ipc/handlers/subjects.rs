use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{optional_str, require_row, required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn subjects_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, code FROM subjects ORDER BY name")
        .map_err(HandlerErr::query)?;
    let subjects = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let code: Option<String> = r.get(2)?;
            Ok(json!({ "id": id, "name": name, "code": code }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let code = optional_str(params, "code").map(|c| c.to_ascii_uppercase());

    if let Some(code) = &code {
        let taken: i64 = conn
            .query_row("SELECT COUNT(*) FROM subjects WHERE code = ?", [code], |r| {
                r.get(0)
            })
            .map_err(HandlerErr::query)?;
        if taken > 0 {
            return Err(HandlerErr::new("duplicate_code", "subject code already exists")
                .with_details(json!({ "code": code })));
        }
    }

    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, code) VALUES(?, ?, ?)",
        (&subject_id, &name, &code),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "subjects" }))
    })?;
    tracing::info!(subject_id = %subject_id, name = %name, "subject created");

    Ok(json!({ "subjectId": subject_id, "name": name, "code": code }))
}

fn subjects_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = required_str(params, "subjectId")?;
    require_row(conn, "subjects", "subject", &subject_id)?;

    let score_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM scores WHERE subject_id = ?",
            [&subject_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    if score_count > 0 {
        return Err(HandlerErr::new("subject_in_use", "subject has recorded scores")
            .with_details(json!({ "scoreCount": score_count })));
    }

    conn.execute("DELETE FROM subjects WHERE id = ?", [&subject_id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(with_conn(state, req, |conn, _| subjects_list(conn))),
        "subjects.create" => Some(with_conn(state, req, subjects_create)),
        "subjects.delete" => Some(with_conn(state, req, subjects_delete)),
        _ => None,
    }
}
