use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_TOP_N: usize = 10;
pub const MAX_TOP_N: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Term {
    First,
    Second,
    Third,
}

impl Term {
    pub fn as_str(self) -> &'static str {
        match self {
            Term::First => "first",
            Term::Second => "second",
            Term::Third => "third",
        }
    }

    /// Accepts the stored names plus the numeric forms the entry forms send.
    pub fn parse(raw: &str) -> Option<Term> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "first" | "1" => Some(Term::First),
            "second" | "2" => Some(Term::Second),
            "third" | "3" => Some(Term::Third),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    pub student_id: String,
    pub student_name: String,
    pub admission_number: String,
    pub class_id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub term: Term,
    pub academic_year_id: String,
    pub score: f64,
}

impl ScoreRecord {
    /// Finite and within 0..=100. Anything else is left out of every aggregate.
    pub fn is_well_formed(&self) -> bool {
        self.score.is_finite() && (0.0..=100.0).contains(&self.score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub student_id: String,
    pub student_name: String,
    pub admission_number: String,
    pub class_id: String,
    pub total_score: f64,
    pub subject_count: usize,
    pub average: i64,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStat {
    pub subject_id: String,
    pub subject_name: String,
    pub average: i64,
    pub highest: f64,
    pub lowest: f64,
    pub sample_count: usize,
}

/// Percentages are shown as whole numbers: round half up.
pub fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

/// One warning per record excluded from aggregation.
pub fn score_warnings(records: &[ScoreRecord]) -> Vec<CoreError> {
    records
        .iter()
        .filter(|r| !r.is_well_formed())
        .map(|r| CoreError::MalformedScore {
            student_id: r.student_id.clone(),
            subject_id: r.subject_id.clone(),
            score: r.score,
        })
        .collect()
}

fn aggregate<'a, I>(records: I) -> Vec<RankedEntry>
where
    I: IntoIterator<Item = &'a ScoreRecord>,
{
    // Vec + index keeps first-appearance order stable across runs.
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut entries: Vec<RankedEntry> = Vec::new();
    for r in records {
        if !r.is_well_formed() {
            continue;
        }
        let slot = *index.entry(r.student_id.as_str()).or_insert_with(|| {
            entries.push(RankedEntry {
                student_id: r.student_id.clone(),
                student_name: r.student_name.clone(),
                admission_number: r.admission_number.clone(),
                class_id: r.class_id.clone(),
                total_score: 0.0,
                subject_count: 0,
                average: 0,
                rank: 0,
            });
            entries.len() - 1
        });
        let e = &mut entries[slot];
        e.total_score += r.score;
        e.subject_count += 1;
    }
    for e in &mut entries {
        e.average = round_half_up(e.total_score / e.subject_count as f64);
    }
    entries
}

/// Sorts by average descending and assigns carry-forward ranks: a tie copies
/// the previous rank, anything else takes its 1-based position.
/// `[90, 90, 80]` ranks as `[1, 1, 3]`.
fn assign_ranks(mut entries: Vec<RankedEntry>) -> Vec<RankedEntry> {
    entries.sort_by(|a, b| b.average.cmp(&a.average));
    let mut prev: Option<(i64, usize)> = None;
    for (idx, e) in entries.iter_mut().enumerate() {
        e.rank = match prev {
            Some((avg, rank)) if avg == e.average => rank,
            _ => idx + 1,
        };
        prev = Some((e.average, e.rank));
    }
    entries
}

pub fn rank_class(records: &[ScoreRecord], class_id: &str) -> Vec<RankedEntry> {
    assign_ranks(aggregate(records.iter().filter(|r| r.class_id == class_id)))
}

/// Ranks the whole school first, then keeps the first `n` positions. A tie
/// straddling the cut is not extended.
pub fn rank_school_top(records: &[ScoreRecord], n: usize) -> Vec<RankedEntry> {
    let mut ranked = assign_ranks(aggregate(records));
    ranked.truncate(n);
    ranked
}

pub fn subject_stats(records: &[ScoreRecord], class_id: &str) -> Vec<SubjectStat> {
    struct Acc<'a> {
        subject_id: &'a str,
        subject_name: &'a str,
        sum: f64,
        highest: f64,
        lowest: f64,
        count: usize,
    }

    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut accs: Vec<Acc<'_>> = Vec::new();
    for r in records
        .iter()
        .filter(|r| r.class_id == class_id && r.is_well_formed())
    {
        let slot = *index.entry(r.subject_id.as_str()).or_insert_with(|| {
            accs.push(Acc {
                subject_id: &r.subject_id,
                subject_name: &r.subject_name,
                sum: 0.0,
                highest: f64::MIN,
                lowest: f64::MAX,
                count: 0,
            });
            accs.len() - 1
        });
        let a = &mut accs[slot];
        a.sum += r.score;
        a.highest = a.highest.max(r.score);
        a.lowest = a.lowest.min(r.score);
        a.count += 1;
    }

    let mut stats: Vec<SubjectStat> = accs
        .into_iter()
        .map(|a| SubjectStat {
            subject_id: a.subject_id.to_string(),
            subject_name: a.subject_name.to_string(),
            average: round_half_up(a.sum / a.count as f64),
            highest: a.highest,
            lowest: a.lowest,
            sample_count: a.count,
        })
        .collect();
    stats.sort_by(|a, b| b.average.cmp(&a.average));
    stats
}
