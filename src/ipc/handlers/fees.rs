use crate::fees::{compute_balance, compute_total, validate_fee_structure, BalanceStatus, FeeComponents};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    now_ts, optional_bool, optional_f64, optional_str, require_row, required_str, with_conn,
};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn structures_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year = optional_str(params, "academicYearId");
    let structures = store::fee_structures(conn, year.as_deref()).map_err(HandlerErr::query)?;
    Ok(json!({ "feeStructures": structures }))
}

fn structures_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let academic_year_id = required_str(params, "academicYearId")?;
    let components = FeeComponents {
        tuition_fee: optional_f64(params, "tuitionFee")?.unwrap_or(0.0),
        exam_fee: optional_f64(params, "examFee")?.unwrap_or(0.0),
        other_fee: optional_f64(params, "otherFee")?.unwrap_or(0.0),
    };
    require_row(conn, "classes", "class", &class_id)?;
    require_row(conn, "academic_years", "academic year", &academic_year_id)?;

    let existing = store::active_fee_structure(conn, &class_id, &academic_year_id)
        .map_err(HandlerErr::query)?;
    let totals = validate_fee_structure(&class_id, &academic_year_id, components, existing.as_ref())?;

    let fee_structure_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fee_structures(id, class_id, academic_year_id, tuition_fee, exam_fee, other_fee,
                                    total_fee, amount, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        rusqlite::params![
            fee_structure_id,
            class_id,
            academic_year_id,
            totals.tuition_fee,
            totals.exam_fee,
            totals.other_fee,
            totals.total_fee,
            totals.amount,
            now_ts(),
        ],
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "fee_structures" }))
    })?;
    tracing::info!(
        fee_structure_id = %fee_structure_id,
        class_id = %class_id,
        total = totals.total_fee,
        "fee structure created"
    );

    let created = store::fee_structure(conn, &fee_structure_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("fee structure"))?;
    Ok(json!({ "feeStructure": created }))
}

fn structures_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let fee_structure_id = required_str(params, "feeStructureId")?;
    let current = store::fee_structure(conn, &fee_structure_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("fee structure"))?;

    let components = FeeComponents {
        tuition_fee: optional_f64(params, "tuitionFee")?.unwrap_or(current.tuition_fee),
        exam_fee: optional_f64(params, "examFee")?.unwrap_or(current.exam_fee),
        other_fee: optional_f64(params, "otherFee")?.unwrap_or(current.other_fee),
    };
    let is_active = optional_bool(params, "isActive")?.unwrap_or(current.is_active);

    let totals = if is_active && !current.is_active {
        let existing = store::active_fee_structure(conn, &current.class_id, &current.academic_year_id)
            .map_err(HandlerErr::query)?;
        validate_fee_structure(
            &current.class_id,
            &current.academic_year_id,
            components,
            existing.as_ref(),
        )?
    } else {
        compute_total(components)?
    };

    conn.execute(
        "UPDATE fee_structures
         SET tuition_fee = ?, exam_fee = ?, other_fee = ?, total_fee = ?, amount = ?, is_active = ?
         WHERE id = ?",
        rusqlite::params![
            totals.tuition_fee,
            totals.exam_fee,
            totals.other_fee,
            totals.total_fee,
            totals.amount,
            is_active,
            fee_structure_id,
        ],
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tracing::info!(fee_structure_id = %fee_structure_id, total = totals.total_fee, "fee structure updated");

    let updated = store::fee_structure(conn, &fee_structure_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("fee structure"))?;
    Ok(json!({ "feeStructure": updated }))
}

/// Balance for one student in one academic year, with the rows it was built from.
pub fn student_balance(
    conn: &Connection,
    student_id: &str,
    academic_year_id: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let student = store::student(conn, student_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("student"))?;
    let structure = store::active_fee_structure(conn, &student.class_id, academic_year_id)
        .map_err(HandlerErr::query)?;
    let payments = store::payments_for(conn, student_id, academic_year_id).map_err(HandlerErr::query)?;
    let balance = compute_balance(structure.as_ref(), &payments);

    Ok(json!({
        "studentId": student.id,
        "displayName": student.display_name(),
        "academicYearId": academic_year_id,
        "balance": balance,
        "feeStructure": structure,
        "payments": payments
    }))
}

fn fees_balance(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let academic_year_id = required_str(params, "academicYearId")?;
    require_row(conn, "academic_years", "academic year", &academic_year_id)?;
    student_balance(conn, &student_id, &academic_year_id)
}

fn fees_class_balances(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let academic_year_id = required_str(params, "academicYearId")?;
    require_row(conn, "classes", "class", &class_id)?;
    require_row(conn, "academic_years", "academic year", &academic_year_id)?;

    let structure = store::active_fee_structure(conn, &class_id, &academic_year_id)
        .map_err(HandlerErr::query)?;
    let students = store::students_in_class(conn, &class_id, false).map_err(HandlerErr::query)?;

    let mut expected = 0.0_f64;
    let mut collected = 0.0_f64;
    let mut outstanding = 0.0_f64;
    let mut settled_count = 0_usize;
    let mut rows: Vec<serde_json::Value> = Vec::with_capacity(students.len());
    for s in &students {
        let payments = store::payments_for(conn, &s.id, &academic_year_id).map_err(HandlerErr::query)?;
        let balance = compute_balance(structure.as_ref(), &payments);
        expected += balance.total_fee;
        collected += balance.total_paid;
        if balance.balance > 0.0 {
            outstanding += balance.balance;
        }
        if balance.status == BalanceStatus::Settled {
            settled_count += 1;
        }
        rows.push(json!({
            "studentId": s.id,
            "displayName": s.display_name(),
            "admissionNumber": s.admission_number,
            "balance": balance
        }));
    }

    Ok(json!({
        "classId": class_id,
        "academicYearId": academic_year_id,
        "noStructure": structure.is_none(),
        "feeStructure": structure,
        "totals": {
            "expected": expected,
            "collected": collected,
            "outstanding": outstanding,
            "settledCount": settled_count,
            "studentCount": students.len()
        },
        "students": rows
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.structures.list" => Some(with_conn(state, req, structures_list)),
        "fees.structures.create" => Some(with_conn(state, req, structures_create)),
        "fees.structures.update" => Some(with_conn(state, req, structures_update)),
        "fees.balance" => Some(with_conn(state, req, fees_balance)),
        "fees.classBalances" => Some(with_conn(state, req, fees_class_balances)),
        _ => None,
    }
}
