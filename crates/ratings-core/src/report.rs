//! Poster-level reporting helpers: per-author score totals and
//! best-post deduplication over an already filtered/sorted sequence.

use std::collections::BTreeMap;

use crate::record::{Record, UserRef};

/// One author's aggregate over a record sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorScore {
    pub author: UserRef,
    pub average: f64,
    pub post_count: usize,
}

/// Per-author mean of each record's score (the named voter's grade
/// when `jury` is given, the record's mean otherwise), with post
/// counts, sorted ascending by average. Records the jury never graded
/// are left out of that author's total.
#[must_use]
pub fn author_totals(records: &[Record], jury: Option<&str>) -> Vec<AuthorScore> {
    let mut table: BTreeMap<String, (UserRef, f64, usize)> = BTreeMap::new();
    for record in records {
        let Some(score) = record.score_for(jury) else { continue };
        let entry = table
            .entry(record.author.tag.clone())
            .or_insert_with(|| (record.author.clone(), 0.0, 0));
        entry.1 += score;
        entry.2 += 1;
    }
    let mut totals: Vec<AuthorScore> = table
        .into_values()
        .map(|(author, sum, count)| AuthorScore {
            author,
            average: sum / count as f64,
            post_count: count,
        })
        .collect();
    totals.sort_by(|a, b| a.average.partial_cmp(&b.average).unwrap_or(std::cmp::Ordering::Equal));
    totals
}

/// Keep only each author's first record in the given order; used after
/// sorting so one author cannot occupy several leaderboard slots.
pub fn dedup_by_author(records: &mut Vec<Record>) {
    let mut seen: Vec<String> = Vec::new();
    records.retain(|record| {
        if seen.iter().any(|tag| *tag == record.author.tag) {
            return false;
        }
        seen.push(record.author.tag.clone());
        true
    });
}
