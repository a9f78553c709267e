//! Time-bucketed aggregation for charting: split a record sequence
//! into contiguous day/week/month buckets anchored at a start date,
//! then reduce each bucket to a plottable value.

use time::{Date, Duration, Month, OffsetDateTime, Time};

use crate::record::Record;

/// Axis maximum of an average-score chart; grades live on a 0..10
/// scale in practice.
const AVERAGE_AXIS_MAX: f64 = 10.0;
/// Floor of the shared axis maximum for count charts.
const COUNT_AXIS_FLOOR: f64 = 10.0;
/// Headroom added above the largest bucket count.
const COUNT_AXIS_HEADROOM: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Day,
    Week,
    Month,
}

impl TimeUnit {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }

    /// End of the bucket starting at `from` (midnight-aligned). Months
    /// advance to the first day of the next calendar month, not by a
    /// fixed 30 days.
    #[must_use]
    fn advance(self, from: OffsetDateTime) -> OffsetDateTime {
        match self {
            Self::Day => from + Duration::days(1),
            Self::Week => from + Duration::days(7),
            Self::Month => from.replace_date(first_of_next_month(from.date())),
        }
    }
}

fn first_of_next_month(date: Date) -> Date {
    let (year, month) = match date.month() {
        Month::December => (date.year() + 1, Month::January),
        month => (date.year(), month.next()),
    };
    // day 1 always exists; fall back to the input on year overflow
    Date::from_calendar_date(year, month, 1).unwrap_or(date)
}

fn truncate_to_midnight(moment: OffsetDateTime) -> OffsetDateTime {
    moment.replace_time(Time::MIDNIGHT)
}

/// One contiguous time interval and the records that fall into it.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBucket {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
    pub records: Vec<Record>,
}

/// Split `records` into contiguous buckets of `unit` length anchored
/// at `anchor` (truncated to midnight). Records are consumed in
/// ascending `posted_at` order (stable sort); a record belongs to the
/// first bucket whose end it does not exceed. Every intermediate
/// bucket appears even when empty; emission stops with the bucket
/// holding the last record.
#[must_use]
pub fn split_into_buckets(
    mut records: Vec<Record>,
    unit: TimeUnit,
    anchor: OffsetDateTime,
) -> Vec<TimeBucket> {
    records.sort_by_key(|record| record.posted_at);

    let mut start = truncate_to_midnight(anchor);
    let mut end = unit.advance(start);
    let mut buckets = Vec::new();
    let mut pending = records.into_iter().peekable();
    loop {
        let mut in_bucket = Vec::new();
        while let Some(record) = pending.peek() {
            if record.posted_at > end {
                break;
            }
            if let Some(record) = pending.next() {
                in_bucket.push(record);
            }
        }
        buckets.push(TimeBucket { start, end, records: in_bucket });
        if pending.peek().is_none() {
            break;
        }
        start = end;
        end = unit.advance(end);
    }
    buckets
}

/// One reduced bucket of a chart series.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartPoint {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
    pub value: f64,
    pub record_count: usize,
}

/// A reduced, plottable series sharing one axis maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub unit: TimeUnit,
    pub axis_max: f64,
    pub points: Vec<ChartPoint>,
}

/// Reduce buckets to record counts. The shared axis maximum is the
/// largest bucket count plus headroom, never below the floor.
#[must_use]
pub fn count_series(buckets: &[TimeBucket], unit: TimeUnit) -> ChartSeries {
    let mut axis_max = COUNT_AXIS_FLOOR;
    for bucket in buckets {
        let with_headroom = (bucket.records.len() + COUNT_AXIS_HEADROOM) as f64;
        if with_headroom > axis_max {
            axis_max = with_headroom;
        }
    }
    let points = buckets
        .iter()
        .map(|bucket| ChartPoint {
            start: bucket.start,
            end: bucket.end,
            value: bucket.records.len() as f64,
            record_count: bucket.records.len(),
        })
        .collect();
    ChartSeries { unit, axis_max, points }
}

/// Reduce buckets to mean scores: the named voter's grade per record
/// when `jury` is given, the record's own mean otherwise. An empty
/// bucket plots as 0.
#[must_use]
pub fn average_score_series(
    buckets: &[TimeBucket],
    unit: TimeUnit,
    jury: Option<&str>,
) -> ChartSeries {
    let points = buckets
        .iter()
        .map(|bucket| {
            let mut sum = 0.0;
            let mut graded = 0u32;
            for record in &bucket.records {
                if let Some(score) = record.score_for(jury) {
                    sum += score;
                    graded += 1;
                }
            }
            let value = if graded == 0 { 0.0 } else { sum / f64::from(graded) };
            ChartPoint {
                start: bucket.start,
                end: bucket.end,
                value,
                record_count: bucket.records.len(),
            }
        })
        .collect();
    ChartSeries { unit, axis_max: AVERAGE_AXIS_MAX, points }
}

/// Fixed-width bar for one chart value: exactly `width` characters,
/// monotonic in `value`, deterministic for equal inputs.
#[must_use]
pub fn render_bar(value: f64, axis_max: f64, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    let ratio = if axis_max <= 0.0 { 0.0 } else { (value / axis_max).clamp(0.0, 1.0) };
    let filled = ((ratio * width as f64).round() as usize).min(width);
    let mut bar = "█".repeat(filled);
    bar.push_str(&"-".repeat(width - filled));
    bar
}
