//! Plain-text rendering helpers for CLI output: score formatting,
//! date/period suffixes and chart line assembly. Presentation only;
//! the kernel hands over structured data.

use time::OffsetDateTime;

use ratings_core::chart::{render_bar, ChartSeries};

/// Score with at most two fraction digits, trailing zeros trimmed
/// ("6", "6.5", "6.67").
pub fn show_score(value: f64) -> String {
    let fixed = format!("{value:.2}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

/// Day-precision date, `DD.MM.YYYY`.
pub fn show_date(moment: OffsetDateTime) -> String {
    format!(
        "{:02}.{:02}.{:04}",
        moment.date().day(),
        u8::from(moment.date().month()),
        moment.date().year()
    )
}

/// Append " from X"/" to Y" for whichever bounds are present.
pub fn append_period(
    mut base: String,
    date0: Option<OffsetDateTime>,
    date1: Option<OffsetDateTime>,
) -> String {
    if let Some(date0) = date0 {
        base.push_str(&format!(" from {}", show_date(date0)));
    }
    if let Some(date1) = date1 {
        base.push_str(&format!(" to {}", show_date(date1)));
    }
    base
}

/// One text line per chart point: fixed-width bar, value, period.
pub fn chart_lines(series: &ChartSeries, bar_width: usize) -> Vec<String> {
    series
        .points
        .iter()
        .map(|point| {
            let bar = render_bar(point.value, series.axis_max, bar_width);
            append_period(
                format!("{bar}  {}", show_score(point.value)),
                Some(point.start),
                Some(point.end),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn scores_trim_trailing_zeros() {
        assert_eq!(show_score(6.0), "6");
        assert_eq!(show_score(6.5), "6.5");
        assert_eq!(show_score(2.0 / 3.0 * 10.0), "6.67");
        assert_eq!(show_score(-1.2), "-1.2");
    }

    #[test]
    fn period_suffix_only_names_present_bounds() {
        let base = "Loaded 3 messages".to_string();
        assert_eq!(
            append_period(base.clone(), Some(datetime!(2023-04-01 0:00 UTC)), None),
            "Loaded 3 messages from 01.04.2023"
        );
        assert_eq!(append_period(base.clone(), None, None), base);
    }
}
