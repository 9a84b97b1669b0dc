use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    now_ts, optional_bool, optional_date, require_row, required_str, with_conn,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn years_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, start_date, end_date, is_active
             FROM academic_years
             ORDER BY name DESC",
        )
        .map_err(HandlerErr::query)?;
    let years = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let start_date: Option<String> = r.get(2)?;
            let end_date: Option<String> = r.get(3)?;
            let is_active: i64 = r.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "startDate": start_date,
                "endDate": end_date,
                "isActive": is_active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "years": years }))
}

fn activate(conn: &Connection, year_id: &str) -> Result<(), HandlerErr> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("UPDATE academic_years SET is_active = 0 WHERE is_active = 1", [])
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tx.execute(
        "UPDATE academic_years SET is_active = 1 WHERE id = ?",
        [year_id],
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))
}

fn years_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let start = optional_date(params, "startDate")?;
    let end = optional_date(params, "endDate")?;
    if let (Some(s), Some(e)) = (start, end) {
        if e < s {
            return Err(HandlerErr::bad_params("endDate must not be before startDate"));
        }
    }

    let taken: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM academic_years WHERE name = ?",
            [&name],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    if taken > 0 {
        return Err(HandlerErr::new("duplicate_name", "academic year name already exists"));
    }
    let existing: i64 = conn
        .query_row("SELECT COUNT(*) FROM academic_years", [], |r| r.get(0))
        .map_err(HandlerErr::query)?;
    // The first year of a fresh workspace becomes the active one.
    let make_active = optional_bool(params, "active")?.unwrap_or(existing == 0);

    let year_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO academic_years(id, name, start_date, end_date, is_active, created_at)
         VALUES(?, ?, ?, ?, 0, ?)",
        (
            &year_id,
            &name,
            start.map(|d| d.to_string()),
            end.map(|d| d.to_string()),
            now_ts(),
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "academic_years" }))
    })?;
    if make_active {
        activate(conn, &year_id)?;
    }
    tracing::info!(year = %name, active = make_active, "academic year created");

    Ok(json!({ "academicYearId": year_id, "name": name, "isActive": make_active }))
}

fn years_set_active(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year_id = required_str(params, "academicYearId")?;
    require_row(conn, "academic_years", "academic year", &year_id)?;
    activate(conn, &year_id)?;
    tracing::info!(academic_year_id = %year_id, "active academic year changed");
    Ok(json!({ "academicYearId": year_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "years.list" => Some(with_conn(state, req, |conn, _| years_list(conn))),
        "years.create" => Some(with_conn(state, req, years_create)),
        "years.setActive" => Some(with_conn(state, req, years_set_active)),
        _ => None,
    }
}
