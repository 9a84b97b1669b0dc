use crate::fees::compute_balance;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    optional_date, optional_str, require_row, required_f64, required_str, with_conn,
};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::{params_from_iter, types::Value, Connection};
use serde_json::json;
use uuid::Uuid;

fn payments_record(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let academic_year_id = required_str(params, "academicYearId")?;
    let amount_paid = required_f64(params, "amountPaid")?;
    if amount_paid <= 0.0 {
        return Err(HandlerErr::bad_params("amountPaid must be greater than zero"));
    }
    let payment_date = optional_date(params, "paymentDate")?
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    let method = optional_str(params, "method");
    let reference = optional_str(params, "reference");

    require_row(conn, "academic_years", "academic year", &academic_year_id)?;
    let student = store::student(conn, &student_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("student"))?;
    let structure = store::active_fee_structure(conn, &student.class_id, &academic_year_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| {
            HandlerErr::new(
                "missing_fee_structure",
                "no active fee structure for the student's class in this academic year",
            )
            .with_details(json!({ "classId": student.class_id, "academicYearId": academic_year_id }))
        })?;

    let payment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO payments(id, student_id, fee_structure_id, amount_paid, payment_date, status,
                              method, reference)
         VALUES(?, ?, ?, ?, ?, 'completed', ?, ?)",
        rusqlite::params![
            payment_id,
            student_id,
            structure.id,
            amount_paid,
            payment_date.to_string(),
            method,
            reference,
        ],
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "payments" }))
    })?;
    tracing::info!(payment_id = %payment_id, student_id = %student_id, amount = amount_paid, "payment recorded");

    let payments = store::payments_for(conn, &student_id, &academic_year_id).map_err(HandlerErr::query)?;
    let balance = compute_balance(Some(&structure), &payments);
    Ok(json!({
        "paymentId": payment_id,
        "feeStructureId": structure.id,
        "balance": balance
    }))
}

fn payments_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let academic_year_id = required_str(params, "academicYearId")?;
    let student_id = optional_str(params, "studentId");
    let class_id = optional_str(params, "classId");

    let mut sql = String::from(
        "SELECT p.id, p.student_id, st.first_name, st.last_name, st.admission_number,
                p.fee_structure_id, p.amount_paid, p.payment_date, p.status, p.method, p.reference
         FROM payments p
         JOIN students st ON st.id = p.student_id
         JOIN fee_structures fs ON fs.id = p.fee_structure_id
         WHERE fs.academic_year_id = ?",
    );
    let mut binds: Vec<Value> = vec![Value::Text(academic_year_id.clone())];
    if let Some(student_id) = student_id {
        sql.push_str(" AND p.student_id = ?");
        binds.push(Value::Text(student_id));
    }
    if let Some(class_id) = class_id {
        sql.push_str(" AND st.class_id = ?");
        binds.push(Value::Text(class_id));
    }
    sql.push_str(" ORDER BY p.payment_date DESC, p.id");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let payments = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let first: String = r.get(2)?;
            let last: String = r.get(3)?;
            let admission_number: String = r.get(4)?;
            let fee_structure_id: String = r.get(5)?;
            let amount_paid: f64 = r.get(6)?;
            let payment_date: String = r.get(7)?;
            let status: String = r.get(8)?;
            let method: Option<String> = r.get(9)?;
            let reference: Option<String> = r.get(10)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "studentName": format!("{} {}", first, last),
                "admissionNumber": admission_number,
                "feeStructureId": fee_structure_id,
                "amountPaid": amount_paid,
                "paymentDate": payment_date,
                "status": status,
                "method": method,
                "reference": reference
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let total: f64 = payments
        .iter()
        .filter_map(|p| p.get("amountPaid").and_then(|v| v.as_f64()))
        .sum();
    Ok(json!({ "payments": payments, "total": total }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "payments.record" => Some(with_conn(state, req, payments_record)),
        "payments.list" => Some(with_conn(state, req, payments_list)),
        _ => None,
    }
}
