use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("fee total must be greater than zero (tuition + exam + other = {0})")]
    InvalidFeeTotal(f64),

    #[error(
        "an active fee structure already exists for class {class_id} in academic year {academic_year_id}"
    )]
    DuplicateFeeStructure {
        class_id: String,
        academic_year_id: String,
        existing_id: String,
    },

    #[error("score {score} for student {student_id} in subject {subject_id} is outside 0..=100")]
    MalformedScore {
        student_id: String,
        subject_id: String,
        score: f64,
    },
}

impl CoreError {
    /// Stable wire code used in IPC error and warning objects.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidFeeTotal(_) => "invalid_fee_total",
            CoreError::DuplicateFeeStructure { .. } => "duplicate_fee_structure",
            CoreError::MalformedScore { .. } => "malformed_score",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            CoreError::InvalidFeeTotal(total) => Some(serde_json::json!({ "total": total })),
            CoreError::DuplicateFeeStructure {
                class_id,
                academic_year_id,
                existing_id,
            } => Some(serde_json::json!({
                "classId": class_id,
                "academicYearId": academic_year_id,
                "existingId": existing_id,
            })),
            CoreError::MalformedScore {
                student_id,
                subject_id,
                score,
            } => Some(serde_json::json!({
                "studentId": student_id,
                "subjectId": subject_id,
                "score": score,
            })),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut v = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(d) = self.details() {
            v["details"] = d;
        }
        v
    }
}
