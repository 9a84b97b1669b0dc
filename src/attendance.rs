use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" | "p" => Some(AttendanceStatus::Present),
            "absent" | "a" => Some(AttendanceStatus::Absent),
            "late" | "l" => Some(AttendanceStatus::Late),
            "excused" | "e" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
    pub marked_days: usize,
    /// Percent of marked days attended, one decimal. `None` when nothing is marked.
    pub rate: Option<f64>,
}

/// `Int(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

pub fn summarize<I>(statuses: I, count_late_as_present: bool) -> AttendanceSummary
where
    I: IntoIterator<Item = AttendanceStatus>,
{
    let mut s = AttendanceSummary::default();
    for status in statuses {
        match status {
            AttendanceStatus::Present => s.present += 1,
            AttendanceStatus::Absent => s.absent += 1,
            AttendanceStatus::Late => s.late += 1,
            AttendanceStatus::Excused => s.excused += 1,
        }
        s.marked_days += 1;
    }
    let attended = if count_late_as_present {
        s.present + s.late
    } else {
        s.present
    };
    s.rate = if s.marked_days > 0 {
        Some(round_off_1_decimal(
            100.0 * attended as f64 / s.marked_days as f64,
        ))
    } else {
        None
    };
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use AttendanceStatus::*;

    #[test]
    fn rate_counts_late_when_configured() {
        let days = [Present, Present, Late, Absent, Excused, Present];
        let with_late = summarize(days, true);
        assert_eq!(with_late.present, 3);
        assert_eq!(with_late.late, 1);
        assert_eq!(with_late.marked_days, 6);
        assert_eq!(with_late.rate, Some(66.7));

        let strict = summarize(days, false);
        assert_eq!(strict.rate, Some(50.0));
    }

    #[test]
    fn nothing_marked_has_no_rate() {
        let s = summarize(std::iter::empty(), true);
        assert_eq!(s.marked_days, 0);
        assert_eq!(s.rate, None);
    }

    #[test]
    fn parse_accepts_codes() {
        assert_eq!(AttendanceStatus::parse("P"), Some(Present));
        assert_eq!(AttendanceStatus::parse(" late "), Some(Late));
        assert_eq!(AttendanceStatus::parse("sick"), None);
    }
}
