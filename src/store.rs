//! Equality-filter queries that turn workspace rows into the plain records the
//! ranking and fee calculators consume.

use crate::fees::{FeeStructure, Payment};
use crate::ranking::{ScoreRecord, Term};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Row};

#[derive(Debug, Clone, Copy)]
pub struct ScoreFilter<'a> {
    pub class_id: Option<&'a str>,
    pub term: Term,
    pub academic_year_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub class_id: String,
    pub admission_number: String,
    pub first_name: String,
    pub last_name: String,
    pub active: bool,
}

impl StudentRow {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

pub fn exists(conn: &Connection, table: &str, id: &str) -> anyhow::Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found: Option<i64> = conn.query_row(&sql, [id], |r| r.get(0)).optional()?;
    Ok(found.is_some())
}

/// Active students only; records are ordered by student then subject name so
/// ranking ties come out in the same order on every call.
pub fn score_records(conn: &Connection, filter: ScoreFilter<'_>) -> anyhow::Result<Vec<ScoreRecord>> {
    let mut sql = String::from(
        "SELECT st.id, st.first_name, st.last_name, st.admission_number, st.class_id,
                sub.id, sub.name, s.academic_year_id, s.score
         FROM scores s
         JOIN students st ON st.id = s.student_id
         JOIN subjects sub ON sub.id = s.subject_id
         WHERE st.active = 1 AND s.term = ? AND s.academic_year_id = ?",
    );
    let mut binds: Vec<Value> = vec![
        Value::Text(filter.term.as_str().to_string()),
        Value::Text(filter.academic_year_id.to_string()),
    ];
    if let Some(class_id) = filter.class_id {
        sql.push_str(" AND st.class_id = ?");
        binds.push(Value::Text(class_id.to_string()));
    }
    sql.push_str(" ORDER BY st.last_name, st.first_name, st.id, sub.name, sub.id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            Ok(ScoreRecord {
                student_id: r.get(0)?,
                student_name: format!("{} {}", first, last),
                admission_number: r.get(3)?,
                class_id: r.get(4)?,
                subject_id: r.get(5)?,
                subject_name: r.get(6)?,
                term: filter.term,
                academic_year_id: r.get(7)?,
                score: r.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        class_id: r.get(1)?,
        admission_number: r.get(2)?,
        first_name: r.get(3)?,
        last_name: r.get(4)?,
        active: r.get::<_, i64>(5)? != 0,
    })
}

pub fn student(conn: &Connection, student_id: &str) -> anyhow::Result<Option<StudentRow>> {
    let row = conn
        .query_row(
            "SELECT id, class_id, admission_number, first_name, last_name, active
             FROM students WHERE id = ?",
            [student_id],
            student_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn students_in_class(
    conn: &Connection,
    class_id: &str,
    include_inactive: bool,
) -> anyhow::Result<Vec<StudentRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, class_id, admission_number, first_name, last_name, active
         FROM students
         WHERE class_id = ? AND (active = 1 OR ?)
         ORDER BY last_name, first_name, id",
    )?;
    let rows = stmt
        .query_map((class_id, include_inactive), student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

const FEE_COLUMNS: &str = "id, class_id, academic_year_id, tuition_fee, exam_fee, other_fee, total_fee, amount, is_active";

fn fee_structure_from_row(r: &Row<'_>) -> rusqlite::Result<FeeStructure> {
    Ok(FeeStructure {
        id: r.get(0)?,
        class_id: r.get(1)?,
        academic_year_id: r.get(2)?,
        tuition_fee: r.get(3)?,
        exam_fee: r.get(4)?,
        other_fee: r.get(5)?,
        total_fee: r.get(6)?,
        amount: r.get(7)?,
        is_active: r.get::<_, i64>(8)? != 0,
    })
}

pub fn active_fee_structure(
    conn: &Connection,
    class_id: &str,
    academic_year_id: &str,
) -> anyhow::Result<Option<FeeStructure>> {
    let sql = format!(
        "SELECT {} FROM fee_structures
         WHERE class_id = ? AND academic_year_id = ? AND is_active = 1",
        FEE_COLUMNS
    );
    let row = conn
        .query_row(&sql, (class_id, academic_year_id), fee_structure_from_row)
        .optional()?;
    Ok(row)
}

pub fn fee_structure(conn: &Connection, fee_structure_id: &str) -> anyhow::Result<Option<FeeStructure>> {
    let sql = format!("SELECT {} FROM fee_structures WHERE id = ?", FEE_COLUMNS);
    let row = conn
        .query_row(&sql, [fee_structure_id], fee_structure_from_row)
        .optional()?;
    Ok(row)
}

pub fn fee_structures(
    conn: &Connection,
    academic_year_id: Option<&str>,
) -> anyhow::Result<Vec<FeeStructure>> {
    let sql = format!(
        "SELECT {} FROM fee_structures
         WHERE (?1 IS NULL OR academic_year_id = ?1)
         ORDER BY academic_year_id, class_id, is_active DESC, created_at",
        FEE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([academic_year_id], fee_structure_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every payment the student made against any structure of the given year.
pub fn payments_for(
    conn: &Connection,
    student_id: &str,
    academic_year_id: &str,
) -> anyhow::Result<Vec<Payment>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.student_id, p.fee_structure_id, p.amount_paid, p.payment_date, p.status
         FROM payments p
         JOIN fee_structures fs ON fs.id = p.fee_structure_id
         WHERE p.student_id = ? AND fs.academic_year_id = ?
         ORDER BY p.payment_date, p.id",
    )?;
    let rows = stmt
        .query_map((student_id, academic_year_id), |r| {
            Ok(Payment {
                id: r.get(0)?,
                student_id: r.get(1)?,
                fee_structure_id: r.get(2)?,
                amount_paid: r.get(3)?,
                payment_date: r.get(4)?,
                status: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
