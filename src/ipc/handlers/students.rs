use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    now_ts, optional_bool, optional_date, optional_str, require_row, required_str, with_conn,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const STUDENT_COLUMNS: &str = "id, class_id, admission_number, last_name, first_name, gender,
     date_of_birth, guardian_name, guardian_phone, active";

fn student_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let class_id: String = r.get(1)?;
    let admission_number: String = r.get(2)?;
    let last: String = r.get(3)?;
    let first: String = r.get(4)?;
    let gender: Option<String> = r.get(5)?;
    let date_of_birth: Option<String> = r.get(6)?;
    let guardian_name: Option<String> = r.get(7)?;
    let guardian_phone: Option<String> = r.get(8)?;
    let active: i64 = r.get(9)?;
    Ok(json!({
        "id": id,
        "classId": class_id,
        "admissionNumber": admission_number,
        "lastName": last,
        "firstName": first,
        "displayName": format!("{} {}", first, last),
        "gender": gender,
        "dateOfBirth": date_of_birth,
        "guardianName": guardian_name,
        "guardianPhone": guardian_phone,
        "active": active != 0
    }))
}

fn admission_number_taken(
    conn: &Connection,
    admission_number: &str,
    except_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    let other: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE admission_number = ?",
            [admission_number],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    Ok(match (other, except_id) {
        (Some(found), Some(me)) => found != me,
        (Some(_), None) => true,
        (None, _) => false,
    })
}

fn normalize_gender(raw: Option<String>) -> Result<Option<String>, HandlerErr> {
    match raw.map(|g| g.to_ascii_lowercase()) {
        None => Ok(None),
        Some(g) if g == "male" || g == "female" || g == "other" => Ok(Some(g)),
        Some(_) => Err(HandlerErr::bad_params("gender must be male, female or other")),
    }
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = optional_str(params, "classId");
    let include_inactive = optional_bool(params, "includeInactive")?.unwrap_or(false);
    if let Some(class_id) = &class_id {
        require_row(conn, "classes", "class", class_id)?;
    }

    let sql = format!(
        "SELECT {} FROM students
         WHERE (?1 IS NULL OR class_id = ?1) AND (active = 1 OR ?2)
         ORDER BY last_name, first_name, id",
        STUDENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let students = stmt
        .query_map((&class_id, include_inactive), student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let first_name = required_str(params, "firstName")?;
    let last_name = required_str(params, "lastName")?;
    let admission_number = required_str(params, "admissionNumber")?;
    let gender = normalize_gender(optional_str(params, "gender"))?;
    let date_of_birth = optional_date(params, "dateOfBirth")?.map(|d| d.to_string());
    let guardian_name = optional_str(params, "guardianName");
    let guardian_phone = optional_str(params, "guardianPhone");

    require_row(conn, "classes", "class", &class_id)?;
    if admission_number_taken(conn, &admission_number, None)? {
        return Err(HandlerErr::new(
            "duplicate_admission_number",
            "admission number already in use",
        )
        .with_details(json!({ "admissionNumber": admission_number })));
    }

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, admission_number, last_name, first_name, gender,
                              date_of_birth, guardian_name, guardian_phone, active, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        rusqlite::params![
            student_id,
            class_id,
            admission_number,
            last_name,
            first_name,
            gender,
            date_of_birth,
            guardian_name,
            guardian_phone,
            now_ts(),
        ],
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "students" }))
    })?;
    tracing::info!(student_id = %student_id, class_id = %class_id, "student created");

    Ok(json!({ "studentId": student_id }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
    let current = conn
        .query_row(&sql, [&student_id], student_json)
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("student"))?;

    let text = |key: &str| -> Result<String, HandlerErr> {
        if params.get(key).is_some() {
            required_str(params, key)
        } else {
            Ok(current[key].as_str().unwrap_or_default().to_string())
        }
    };
    let nullable = |key: &str| -> Option<String> {
        if params.get(key).is_some() {
            optional_str(params, key)
        } else {
            current[key].as_str().map(|s| s.to_string())
        }
    };

    let class_id = text("classId")?;
    let first_name = text("firstName")?;
    let last_name = text("lastName")?;
    let admission_number = text("admissionNumber")?;
    let gender = normalize_gender(nullable("gender"))?;
    let date_of_birth = match params.get("dateOfBirth") {
        Some(_) => optional_date(params, "dateOfBirth")?.map(|d| d.to_string()),
        None => nullable("dateOfBirth"),
    };
    let guardian_name = nullable("guardianName");
    let guardian_phone = nullable("guardianPhone");
    let active = optional_bool(params, "active")?
        .unwrap_or_else(|| current["active"].as_bool().unwrap_or(true));

    require_row(conn, "classes", "class", &class_id)?;
    if admission_number_taken(conn, &admission_number, Some(&student_id))? {
        return Err(HandlerErr::new(
            "duplicate_admission_number",
            "admission number already in use",
        )
        .with_details(json!({ "admissionNumber": admission_number })));
    }

    conn.execute(
        "UPDATE students
         SET class_id = ?, admission_number = ?, last_name = ?, first_name = ?, gender = ?,
             date_of_birth = ?, guardian_name = ?, guardian_phone = ?, active = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            class_id,
            admission_number,
            last_name,
            first_name,
            gender,
            date_of_birth,
            guardian_name,
            guardian_phone,
            active,
            now_ts(),
            student_id,
        ],
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    Ok(json!({ "studentId": student_id }))
}

/// Soft delete: scores, attendance and payments stay attached to the record.
fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    require_row(conn, "students", "student", &student_id)?;
    conn.execute(
        "UPDATE students SET active = 0, updated_at = ? WHERE id = ?",
        (now_ts(), &student_id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tracing::info!(student_id = %student_id, "student deactivated");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        _ => None,
    }
}
