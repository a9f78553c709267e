//! Domain kernel for the ratings archive: rated records grouped by
//! source channel, reaction-score aggregation, the composable
//! filter/sort pipeline, and time-bucketed chart series.
//!
//! This crate performs no file or network I/O. Persistence lives in
//! `ratings-snapshot`; decoding of chat-platform messages is the
//! caller's concern and enters the kernel as already-shaped
//! [`record::Record`] values.

pub mod chart;
pub mod gate;
pub mod query;
pub mod record;
pub mod report;
pub mod score;
pub mod store;

pub use chart::{ChartPoint, ChartSeries, TimeBucket, TimeUnit};
pub use gate::{GateGuard, OperationGate};
pub use query::{Criterion, CriterionKind, OptionDescr, OptionKind, OptionValue, QueryOptions};
pub use record::{time_period, Grade, Record, ScoreSet, UserRef};
pub use score::{ReactionMap, ReactionRule, VoterSource};
pub use store::{ChannelBucket, ConflictPolicy, Store};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    /// Another externally triggered operation is already in flight.
    #[error("another operation is in progress, try again later")]
    Busy,
    /// A record ended up with an empty score set after aggregation and
    /// must not be stored.
    #[error("record {0} carries no grades after aggregation")]
    Unrated(String),
}
