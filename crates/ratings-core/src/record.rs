//! Record types shared by the whole workspace.
//!
//! Field names on the Rust side describe the domain; `#[serde(rename)]`
//! pins every field to the snapshot wire format (`ver: 5` documents),
//! which predates this implementation and must not drift.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Opaque identity of a platform user. Two refs denote the same user
/// when their `tag`s are equal; the icon URL is display-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRef {
    pub tag: String,
    #[serde(rename = "ico", default)]
    pub icon: String,
}

impl UserRef {
    #[must_use]
    pub fn new(tag: impl Into<String>, icon: impl Into<String>) -> Self {
        Self { tag: tag.into(), icon: icon.into() }
    }
}

/// One voter's grade on a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Grade {
    pub value: f64,
    #[serde(rename = "user")]
    pub voter: UserRef,
}

/// The aggregated score set of a record: at most one grade per voter
/// tag, plus the "special" marker derived once at capture time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScoreSet {
    #[serde(rename = "data")]
    pub grades: Vec<Grade>,
    #[serde(rename = "skip", default)]
    pub special: bool,
}

impl ScoreSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grades.is_empty()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.grades.len()
    }

    /// Mean of all grade values; `0.0` for an empty set (the store
    /// never holds unrated records, so this only matters transiently).
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.grades.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.grades.iter().map(|grade| grade.value).sum();
        sum / self.grades.len() as f64
    }

    #[must_use]
    pub fn for_voter(&self, tag: &str) -> Option<f64> {
        self.grades.iter().find(|grade| grade.voter.tag == tag).map(|grade| grade.value)
    }
}

/// One rated item of content. Immutable except for whole-record
/// replacement through [`crate::store::ConflictPolicy`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Unique within one channel bucket; assigned by the source platform.
    pub id: String,
    pub author: UserRef,
    #[serde(rename = "rate")]
    pub score: ScoreSet,
    #[serde(rename = "date", with = "time::serde::rfc3339")]
    pub posted_at: OffsetDateTime,
    #[serde(rename = "content", default)]
    pub body: String,
    #[serde(rename = "attachments", default)]
    pub media: Vec<String>,
    /// When the record was captured or last merged; merge tie-breaker.
    #[serde(rename = "gtime", with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    #[serde(rename = "url")]
    pub source_url: String,
}

impl Record {
    #[must_use]
    pub fn mean_score(&self) -> f64 {
        self.score.mean()
    }

    #[must_use]
    pub fn voter_score(&self, tag: &str) -> Option<f64> {
        self.score.for_voter(tag)
    }

    /// The named voter's grade when a jury is given, the record's own
    /// mean otherwise. `None` when the named voter never graded.
    #[must_use]
    pub fn score_for(&self, jury: Option<&str>) -> Option<f64> {
        match jury {
            Some(tag) => self.voter_score(tag),
            None => Some(self.mean_score()),
        }
    }

    #[must_use]
    pub fn is_special(&self) -> bool {
        self.score.special
    }
}

/// Minimum and maximum `posted_at` across the given records, or `None`
/// when there are no records.
#[must_use]
pub fn time_period(records: &[Record]) -> Option<(OffsetDateTime, OffsetDateTime)> {
    let mut bounds: Option<(OffsetDateTime, OffsetDateTime)> = None;
    for record in records {
        bounds = Some(match bounds {
            None => (record.posted_at, record.posted_at),
            Some((min, max)) => (min.min(record.posted_at), max.max(record.posted_at)),
        });
    }
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record_with_grades(id: &str, grades: &[(&str, f64)]) -> Record {
        Record {
            id: id.to_string(),
            author: UserRef::new("poster#1", ""),
            score: ScoreSet {
                grades: grades
                    .iter()
                    .map(|(tag, value)| Grade { value: *value, voter: UserRef::new(*tag, "") })
                    .collect(),
                special: false,
            },
            posted_at: datetime!(2023-04-02 12:00 UTC),
            body: String::new(),
            media: vec![],
            captured_at: datetime!(2023-04-03 09:00 UTC),
            source_url: "https://example.test/p/1".to_string(),
        }
    }

    #[test]
    fn mean_score_averages_all_grades() {
        let record = record_with_grades("a", &[("x#1", 10.0), ("y#2", 2.0)]);
        assert!((record.mean_score() - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn score_for_prefers_named_voter() {
        let record = record_with_grades("a", &[("x#1", 10.0), ("y#2", 2.0)]);
        assert_eq!(record.score_for(Some("y#2")), Some(2.0));
        assert_eq!(record.score_for(Some("z#3")), None);
        assert_eq!(record.score_for(None), Some(6.0));
    }

    #[test]
    fn wire_names_survive_round_trip() {
        let record = record_with_grades("42", &[("x#1", 7.0)]);
        let value = match serde_json::to_value(&record) {
            Ok(value) => value,
            Err(err) => panic!("serialization failed: {err}"),
        };
        assert!(value.get("rate").is_some());
        assert!(value.get("gtime").is_some());
        assert!(value.get("attachments").is_some());
        assert!(value["rate"].get("data").is_some());
        assert!(value["rate"].get("skip").is_some());
        assert_eq!(value["rate"]["data"][0]["user"]["tag"], "x#1");
        let back: Record = match serde_json::from_value(value) {
            Ok(back) => back,
            Err(err) => panic!("deserialization failed: {err}"),
        };
        assert_eq!(back, record);
    }

    #[test]
    fn time_period_spans_min_and_max() {
        let mut early = record_with_grades("a", &[("x#1", 1.0)]);
        early.posted_at = datetime!(2023-01-01 0:00 UTC);
        let late = record_with_grades("b", &[("x#1", 1.0)]);
        assert_eq!(
            time_period(&[late.clone(), early.clone()]),
            Some((early.posted_at, late.posted_at))
        );
        assert_eq!(time_period(&[]), None);
    }
}
