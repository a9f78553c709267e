//! Reaction-score aggregation: turn raw per-reaction-kind voter
//! tallies into one [`ScoreSet`] per record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::{Grade, ScoreSet, UserRef};

/// How one reaction kind contributes to a record's score set. Wire
/// names match the operator-edited configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReactionRule {
    /// Grade value this kind awards. A rule without a weight still
    /// applies its marker/ignore semantics but never grades.
    #[serde(rename = "value")]
    pub weight: Option<f64>,
    /// Marks the whole record as special, no matter which voter
    /// applied the reaction.
    #[serde(rename = "skip", default)]
    pub skip_marker: bool,
    /// Removes this voter tag from the result entirely, even when they
    /// voted through other kinds.
    #[serde(rename = "ignore_user", default)]
    pub ignore_voter: Option<String>,
}

/// Reaction kind name to rule. Kinds absent from the map are ignored.
pub type ReactionMap = BTreeMap<String, ReactionRule>;

/// Attempts made per reaction kind before giving up on its voter list.
pub const VOTER_FETCH_ATTEMPTS: u32 = 10;

/// External seam for resolving which voters applied a reaction kind.
/// The only I/O the aggregation step depends on.
pub trait VoterSource {
    type Error: std::fmt::Display;

    /// Voter identities for one reaction kind present on the record.
    ///
    /// # Errors
    /// Any transport failure; callers retry up to
    /// [`VOTER_FETCH_ATTEMPTS`] times and then skip the kind.
    fn voters(&mut self, kind: &str) -> Result<Vec<UserRef>, Self::Error>;
}

#[derive(Debug, Default)]
struct VoterAccumulator {
    // keyed by voter tag for a deterministic score set order
    tallies: BTreeMap<String, (UserRef, f64, u32)>,
    special: bool,
    ignored: Vec<String>,
}

impl VoterAccumulator {
    fn apply_rule(&mut self, rule: &ReactionRule) {
        if rule.skip_marker {
            self.special = true;
        }
        if let Some(tag) = &rule.ignore_voter {
            self.ignored.push(tag.clone());
        }
    }

    fn grade(&mut self, weight: f64, voter: &UserRef) {
        let entry = self
            .tallies
            .entry(voter.tag.clone())
            .or_insert_with(|| (voter.clone(), 0.0, 0));
        entry.1 += weight;
        entry.2 += 1;
    }

    fn finish(mut self) -> ScoreSet {
        for tag in &self.ignored {
            self.tallies.remove(tag);
        }
        let grades = self
            .tallies
            .into_values()
            .map(|(voter, sum, count)| Grade { value: sum / f64::from(count), voter })
            .collect();
        ScoreSet { grades, special: self.special }
    }
}

/// Aggregate already-fetched tallies (kind to voters) into a score set.
///
/// A voter graded through several weighted kinds receives the mean of
/// those weights, not the sum. Kinds missing from `map` are ignored.
#[must_use]
pub fn aggregate(map: &ReactionMap, tallies: &BTreeMap<String, Vec<UserRef>>) -> ScoreSet {
    let mut acc = VoterAccumulator::default();
    for (kind, voters) in tallies {
        let Some(rule) = map.get(kind) else { continue };
        acc.apply_rule(rule);
        let Some(weight) = rule.weight else { continue };
        for voter in voters {
            acc.grade(weight, voter);
        }
    }
    acc.finish()
}

/// Aggregate the reaction kinds present on a record by fetching each
/// kind's voters through `source`.
///
/// Voter lookup is the one step backed by external I/O: each kind is
/// retried up to [`VOTER_FETCH_ATTEMPTS`] times and skipped once the
/// budget is exhausted, degrading to a partial score set instead of
/// failing the whole aggregation. Marker and ignore semantics of a
/// kind still apply when its voter fetch fails.
pub fn aggregate_from_source<S: VoterSource>(
    map: &ReactionMap,
    present_kinds: &[String],
    source: &mut S,
) -> ScoreSet {
    let mut acc = VoterAccumulator::default();
    for kind in present_kinds {
        let Some(rule) = map.get(kind) else { continue };
        acc.apply_rule(rule);
        let Some(weight) = rule.weight else { continue };
        let Some(voters) = fetch_voters_with_retry(source, kind) else { continue };
        for voter in &voters {
            acc.grade(weight, voter);
        }
    }
    acc.finish()
}

fn fetch_voters_with_retry<S: VoterSource>(source: &mut S, kind: &str) -> Option<Vec<UserRef>> {
    let mut last_error = String::new();
    for _ in 0..VOTER_FETCH_ATTEMPTS {
        match source.voters(kind) {
            Ok(voters) => return Some(voters),
            Err(err) => last_error = err.to_string(),
        }
    }
    tracing::warn!(kind, error = %last_error, "voter fetch exhausted retries, skipping reaction kind");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(weight: f64) -> ReactionRule {
        ReactionRule { weight: Some(weight), ..ReactionRule::default() }
    }

    fn voters(tags: &[&str]) -> Vec<UserRef> {
        tags.iter().map(|tag| UserRef::new(*tag, "")).collect()
    }

    fn reaction_map(entries: &[(&str, ReactionRule)]) -> ReactionMap {
        entries.iter().map(|(kind, rule)| ((*kind).to_string(), rule.clone())).collect()
    }

    #[test]
    fn voter_on_two_weighted_kinds_gets_the_mean() {
        let map = reaction_map(&[("up", rule(10.0)), ("down", rule(2.0))]);
        let tallies = BTreeMap::from([
            ("up".to_string(), voters(&["x#1"])),
            ("down".to_string(), voters(&["x#1"])),
        ]);
        let score = aggregate(&map, &tallies);
        assert_eq!(score.count(), 1);
        assert_eq!(score.for_voter("x#1"), Some(6.0));
        assert!(!score.special);
    }

    #[test]
    fn unknown_kinds_are_ignored() {
        let map = reaction_map(&[("up", rule(5.0))]);
        let tallies = BTreeMap::from([
            ("up".to_string(), voters(&["x#1"])),
            ("mystery".to_string(), voters(&["x#1", "y#2"])),
        ]);
        let score = aggregate(&map, &tallies);
        assert_eq!(score.count(), 1);
        assert_eq!(score.for_voter("x#1"), Some(5.0));
    }

    #[test]
    fn skip_marker_flags_the_whole_record() {
        let skip = ReactionRule { skip_marker: true, ..ReactionRule::default() };
        let map = reaction_map(&[("up", rule(5.0)), ("no_contest", skip)]);
        let tallies = BTreeMap::from([
            ("up".to_string(), voters(&["x#1"])),
            ("no_contest".to_string(), voters(&["y#2"])),
        ]);
        let score = aggregate(&map, &tallies);
        assert!(score.special);
        // the marker kind has no weight, y#2 never graded
        assert_eq!(score.for_voter("y#2"), None);
    }

    #[test]
    fn ignored_voter_is_removed_even_when_voting_through_other_kinds() {
        let bot = ReactionRule {
            weight: Some(1.0),
            ignore_voter: Some("bot#0".to_string()),
            ..ReactionRule::default()
        };
        let map = reaction_map(&[("up", rule(8.0)), ("seen", bot)]);
        let tallies = BTreeMap::from([
            ("up".to_string(), voters(&["bot#0", "x#1"])),
            ("seen".to_string(), voters(&["bot#0"])),
        ]);
        let score = aggregate(&map, &tallies);
        assert_eq!(score.for_voter("bot#0"), None);
        assert_eq!(score.for_voter("x#1"), Some(8.0));
    }

    struct FlakySource {
        failures_left: u32,
        calls: u32,
    }

    impl VoterSource for FlakySource {
        type Error = String;

        fn voters(&mut self, kind: &str) -> Result<Vec<UserRef>, Self::Error> {
            self.calls += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(format!("transient failure on {kind}"));
            }
            Ok(voters(&["x#1"]))
        }
    }

    #[test]
    fn transient_fetch_failures_are_retried() {
        let map = reaction_map(&[("up", rule(4.0))]);
        let mut source = FlakySource { failures_left: 3, calls: 0 };
        let score = aggregate_from_source(&map, &["up".to_string()], &mut source);
        assert_eq!(score.for_voter("x#1"), Some(4.0));
        assert_eq!(source.calls, 4);
    }

    #[test]
    fn exhausted_retries_degrade_to_a_partial_score_set() {
        let map = reaction_map(&[("up", rule(4.0)), ("down", rule(1.0))]);
        let mut source = FlakySource { failures_left: u32::MAX, calls: 0 };
        // "down" sorts first in the map but both kinds fail here; use a
        // source that recovers too late for "down" only.
        let score = aggregate_from_source(&map, &["down".to_string()], &mut source);
        assert!(score.is_empty());
        assert_eq!(source.calls, VOTER_FETCH_ATTEMPTS);

        let mut recovered = FlakySource { failures_left: VOTER_FETCH_ATTEMPTS, calls: 0 };
        let score = aggregate_from_source(
            &map,
            &["down".to_string(), "up".to_string()],
            &mut recovered,
        );
        assert!(score.for_voter("x#1").is_some());
    }
}
