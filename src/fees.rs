use crate::error::CoreError;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeStructure {
    pub id: String,
    pub class_id: String,
    pub academic_year_id: String,
    pub tuition_fee: f64,
    pub exam_fee: f64,
    pub other_fee: f64,
    pub total_fee: f64,
    /// Legacy alias of `total_fee`, kept for older report readers.
    pub amount: f64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub student_id: String,
    pub fee_structure_id: String,
    pub amount_paid: f64,
    pub payment_date: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStatus {
    /// No fee structure is defined for the class/year. Not the same as paid.
    NoStructure,
    Unpaid,
    Partial,
    Settled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub total_fee: f64,
    pub total_paid: f64,
    /// Signed: overpayment leaves this negative.
    pub balance: f64,
    pub is_settled: bool,
    pub status: BalanceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeComponents {
    pub tuition_fee: f64,
    pub exam_fee: f64,
    pub other_fee: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeTotals {
    pub tuition_fee: f64,
    pub exam_fee: f64,
    pub other_fee: f64,
    pub total_fee: f64,
    pub amount: f64,
}

/// Derives the stored total from the three components. The total is never
/// accepted from the caller.
pub fn compute_total(components: FeeComponents) -> Result<FeeTotals, CoreError> {
    let total = components.tuition_fee + components.exam_fee + components.other_fee;
    if !total.is_finite() || total <= 0.0 {
        return Err(CoreError::InvalidFeeTotal(total));
    }
    Ok(FeeTotals {
        tuition_fee: components.tuition_fee,
        exam_fee: components.exam_fee,
        other_fee: components.other_fee,
        total_fee: total,
        amount: total,
    })
}

/// Precondition check for inserting a structure. `existing_active` is the
/// active structure already stored for the same class and academic year, if any.
pub fn validate_fee_structure(
    class_id: &str,
    academic_year_id: &str,
    components: FeeComponents,
    existing_active: Option<&FeeStructure>,
) -> Result<FeeTotals, CoreError> {
    let totals = compute_total(components)?;
    if let Some(existing) = existing_active.filter(|s| s.is_active) {
        return Err(CoreError::DuplicateFeeStructure {
            class_id: class_id.to_string(),
            academic_year_id: academic_year_id.to_string(),
            existing_id: existing.id.clone(),
        });
    }
    Ok(totals)
}

pub fn compute_balance(structure: Option<&FeeStructure>, payments: &[Payment]) -> Balance {
    let total_paid: f64 = payments.iter().map(|p| p.amount_paid).sum();
    let total_fee = structure.map(|s| s.total_fee).unwrap_or(0.0);
    let balance = total_fee - total_paid;
    let is_settled = balance <= 0.0;

    let status = match structure {
        None => BalanceStatus::NoStructure,
        Some(_) if is_settled => BalanceStatus::Settled,
        Some(_) if total_paid > 0.0 => BalanceStatus::Partial,
        Some(_) => BalanceStatus::Unpaid,
    };

    Balance {
        total_fee,
        total_paid,
        balance,
        is_settled,
        status,
    }
}
