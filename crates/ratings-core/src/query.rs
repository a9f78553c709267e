//! Composable filter/sort pipeline. Each criterion declares its own
//! configuration surface, is built from a flat options map, and may
//! contribute a filter predicate, a comparator, or both.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use time::OffsetDateTime;

use crate::record::Record;

/// Comparator contributions within this magnitude are indecisive and
/// defer to the next criterion in declaration order.
pub const SORT_EPSILON: f64 = 1e-5;

const DEFAULT_GRADE_COUNT_MIN: i64 = -1;
const DEFAULT_GRADE_COUNT_MAX: i64 = 65_535;
const DEFAULT_SCORE_MIN: f64 = -1000.0;
const DEFAULT_SCORE_MAX: f64 = 1000.0;
const DEFAULT_SCATTER: f64 = 65_535.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    User,
}

/// One declared configuration field of a criterion, surfaced to the
/// caller for command registration and help output.
#[derive(Debug, Clone, Copy)]
pub struct OptionDescr {
    pub name: &'static str,
    pub kind: OptionKind,
    pub required: bool,
    pub help: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(OffsetDateTime),
    /// A user reference, carried by tag.
    User(String),
}

/// Flat name-to-value option map a criterion set is built from.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    values: BTreeMap<String, OptionValue>,
}

impl QueryOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: OptionValue) -> &mut Self {
        self.values.insert(name.to_string(), value);
        self
    }

    #[must_use]
    pub fn date(&self, name: &str) -> Option<OffsetDateTime> {
        match self.values.get(name) {
            Some(OptionValue::Date(value)) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(OptionValue::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn float(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(OptionValue::Float(value)) => Some(*value),
            Some(OptionValue::Integer(value)) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(OptionValue::Boolean(value)) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn user_tag(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(OptionValue::User(tag) | OptionValue::String(tag)) => Some(tag),
            _ => None,
        }
    }
}

/// A pluggable filter/sort unit. Both methods have indecisive
/// defaults, so a criterion contributes only what it overrides.
pub trait Criterion {
    fn filter(&self, _record: &Record) -> bool {
        true
    }

    /// Signed comparator contribution for a record pair. Magnitudes
    /// within [`SORT_EPSILON`] are treated as "no opinion".
    fn compare(&self, _a: &Record, _b: &Record) -> f64 {
        0.0
    }
}

/// Passes records whose `posted_at` lies within an inclusive range.
/// Defaults to the full epoch-to-now range.
#[derive(Debug, Clone)]
pub struct DateRange {
    pub date0: OffsetDateTime,
    pub date1: OffsetDateTime,
}

impl DateRange {
    #[must_use]
    pub fn from_options(opts: &QueryOptions) -> Self {
        Self {
            date0: opts.date("date0").unwrap_or(OffsetDateTime::UNIX_EPOCH),
            date1: opts.date("date1").unwrap_or_else(OffsetDateTime::now_utc),
        }
    }
}

impl Criterion for DateRange {
    fn filter(&self, record: &Record) -> bool {
        record.posted_at >= self.date0 && record.posted_at <= self.date1
    }
}

/// Passes records by a single author; passes everything when unset.
#[derive(Debug, Clone, Default)]
pub struct AuthorIs {
    pub tag: Option<String>,
}

impl Criterion for AuthorIs {
    fn filter(&self, record: &Record) -> bool {
        self.tag.as_deref().map_or(true, |tag| record.author.tag == tag)
    }
}

/// Passes records whose grade count lies within an inclusive range.
#[derive(Debug, Clone)]
pub struct GradeCountRange {
    pub min: i64,
    pub max: i64,
}

impl Criterion for GradeCountRange {
    fn filter(&self, record: &Record) -> bool {
        let count = i64::try_from(record.score.count()).unwrap_or(i64::MAX);
        count >= self.min && count <= self.max
    }
}

/// Passes records whose mean score lies within an inclusive range.
#[derive(Debug, Clone)]
pub struct AverageScoreRange {
    pub min: f64,
    pub max: f64,
}

impl Criterion for AverageScoreRange {
    fn filter(&self, record: &Record) -> bool {
        let mean = record.mean_score();
        mean >= self.min && mean <= self.max
    }
}

/// Passes records where every individual grade lies within an
/// inclusive range.
#[derive(Debug, Clone)]
pub struct IndividualScoreRange {
    pub min: f64,
    pub max: f64,
}

impl Criterion for IndividualScoreRange {
    fn filter(&self, record: &Record) -> bool {
        record.score.grades.iter().all(|grade| grade.value >= self.min && grade.value <= self.max)
    }
}

/// Restricts the view to one voter: passes records that voter graded
/// and orders by that voter's grade. Indecisive when unset.
#[derive(Debug, Clone, Default)]
pub struct JuryView {
    pub tag: Option<String>,
}

impl Criterion for JuryView {
    fn filter(&self, record: &Record) -> bool {
        self.tag.as_deref().map_or(true, |tag| record.voter_score(tag).is_some())
    }

    fn compare(&self, a: &Record, b: &Record) -> f64 {
        let Some(tag) = self.tag.as_deref() else {
            return 0.0;
        };
        match (a.voter_score(tag), b.voter_score(tag)) {
            (Some(left), Some(right)) => left - right,
            _ => 0.0,
        }
    }
}

/// Passes records whose special flag equals the requested value.
#[derive(Debug, Clone, Default)]
pub struct SpecialOnly {
    pub special: bool,
}

impl Criterion for SpecialOnly {
    fn filter(&self, record: &Record) -> bool {
        record.is_special() == self.special
    }
}

/// Consensus check: passes records where every grade deviates from the
/// record's own mean by strictly less than `scatter`.
#[derive(Debug, Clone)]
pub struct Unity {
    pub scatter: f64,
}

impl Criterion for Unity {
    fn filter(&self, record: &Record) -> bool {
        let mean = record.mean_score();
        record.score.grades.iter().all(|grade| (grade.value - mean).abs() < self.scatter)
    }
}

/// The closed set of criteria a caller can compose into a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriterionKind {
    Date,
    Author,
    GradeCount,
    AverageScore,
    IndividualScore,
    Jury,
    Special,
    Unity,
}

impl CriterionKind {
    /// Configuration fields this criterion consumes from the flat
    /// options map.
    #[must_use]
    pub fn descriptors(self) -> &'static [OptionDescr] {
        match self {
            Self::Date => &[
                OptionDescr {
                    name: "date0",
                    kind: OptionKind::Date,
                    required: false,
                    help: "Time period start",
                },
                OptionDescr {
                    name: "date1",
                    kind: OptionKind::Date,
                    required: false,
                    help: "Time period end",
                },
            ],
            Self::Author => &[OptionDescr {
                name: "author",
                kind: OptionKind::User,
                required: false,
                help: "Post author",
            }],
            Self::GradeCount => &[
                OptionDescr {
                    name: "grade_amount0",
                    kind: OptionKind::Integer,
                    required: false,
                    help: "Minimum amount of grades per post",
                },
                OptionDescr {
                    name: "grade_amount1",
                    kind: OptionKind::Integer,
                    required: false,
                    help: "Maximum amount of grades per post",
                },
            ],
            Self::AverageScore => &[
                OptionDescr {
                    name: "score_range0",
                    kind: OptionKind::Float,
                    required: false,
                    help: "Minimum average score",
                },
                OptionDescr {
                    name: "score_range1",
                    kind: OptionKind::Float,
                    required: false,
                    help: "Maximum average score",
                },
            ],
            Self::IndividualScore => &[
                OptionDescr {
                    name: "grade_range0",
                    kind: OptionKind::Float,
                    required: false,
                    help: "Minimum individual grade",
                },
                OptionDescr {
                    name: "grade_range1",
                    kind: OptionKind::Float,
                    required: false,
                    help: "Maximum individual grade",
                },
            ],
            Self::Jury => &[OptionDescr {
                name: "jury",
                kind: OptionKind::User,
                required: false,
                help: "User whose grades will be used instead of all users'",
            }],
            Self::Special => &[OptionDescr {
                name: "special",
                kind: OptionKind::Boolean,
                required: false,
                help: "Use only posts marked with special reactions",
            }],
            Self::Unity => &[OptionDescr {
                name: "scatter",
                kind: OptionKind::Float,
                required: false,
                help: "Use posts whose grades deviate from the average less than this",
            }],
        }
    }

    #[must_use]
    pub fn build(self, opts: &QueryOptions) -> Box<dyn Criterion> {
        match self {
            Self::Date => Box::new(DateRange::from_options(opts)),
            Self::Author => Box::new(AuthorIs { tag: opts.user_tag("author").map(str::to_string) }),
            Self::GradeCount => Box::new(GradeCountRange {
                min: opts.integer("grade_amount0").unwrap_or(DEFAULT_GRADE_COUNT_MIN),
                max: opts.integer("grade_amount1").unwrap_or(DEFAULT_GRADE_COUNT_MAX),
            }),
            Self::AverageScore => Box::new(AverageScoreRange {
                min: opts.float("score_range0").unwrap_or(DEFAULT_SCORE_MIN),
                max: opts.float("score_range1").unwrap_or(DEFAULT_SCORE_MAX),
            }),
            Self::IndividualScore => Box::new(IndividualScoreRange {
                min: opts.float("grade_range0").unwrap_or(DEFAULT_SCORE_MIN),
                max: opts.float("grade_range1").unwrap_or(DEFAULT_SCORE_MAX),
            }),
            Self::Jury => Box::new(JuryView { tag: opts.user_tag("jury").map(str::to_string) }),
            Self::Special => {
                Box::new(SpecialOnly { special: opts.boolean("special").unwrap_or(false) })
            }
            Self::Unity => {
                Box::new(Unity { scatter: opts.float("scatter").unwrap_or(DEFAULT_SCATTER) })
            }
        }
    }
}

/// Union of the configuration surfaces of the given criteria, in
/// declaration order.
#[must_use]
pub fn declared_options(kinds: &[CriterionKind]) -> Vec<OptionDescr> {
    let mut options = Vec::new();
    for kind in kinds {
        options.extend_from_slice(kind.descriptors());
    }
    options
}

#[must_use]
pub fn build_criteria(kinds: &[CriterionKind], opts: &QueryOptions) -> Vec<Box<dyn Criterion>> {
    kinds.iter().map(|kind| kind.build(opts)).collect()
}

/// Pure conjunction: a record passes iff every criterion's filter
/// accepts it.
#[must_use]
pub fn filter_records(criteria: &[Box<dyn Criterion>], records: &[Record]) -> Vec<Record> {
    records
        .iter()
        .filter(|record| criteria.iter().all(|criterion| criterion.filter(record)))
        .cloned()
        .collect()
}

/// Stable lexicographic composite sort: the first criterion whose
/// comparator exceeds [`SORT_EPSILON`] in magnitude decides; when all
/// are indecisive, ascending mean score breaks the tie.
pub fn sort_records(criteria: &[Box<dyn Criterion>], records: &mut [Record]) {
    records.sort_by(|a, b| {
        for criterion in criteria {
            let value = criterion.compare(a, b);
            if value.abs() > SORT_EPSILON {
                return value.partial_cmp(&0.0).unwrap_or(Ordering::Equal);
            }
        }
        a.mean_score().partial_cmp(&b.mean_score()).unwrap_or(Ordering::Equal)
    });
}
