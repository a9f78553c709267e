//! In-memory record store: channel id to an insertion-ordered bucket
//! of records, with insert-or-replace conflict resolution and bulk
//! merge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Resolves two records carrying the same id within one channel.
///
/// Only `LatestCaptured` is commutative; under it `merge` is
/// order-independent and idempotent. `TakeNew` and `KeepExisting`
/// depend on insertion order, so merges built on them are not
/// guaranteed associative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Unconditionally replace the stored record.
    #[default]
    TakeNew,
    /// Keep the stored record untouched.
    KeepExisting,
    /// Keep whichever record has the later `captured_at`.
    LatestCaptured,
}

impl ConflictPolicy {
    #[must_use]
    pub fn resolve(self, existing: Record, incoming: Record) -> Record {
        match self {
            Self::TakeNew => incoming,
            Self::KeepExisting => existing,
            Self::LatestCaptured => {
                if existing.captured_at > incoming.captured_at {
                    existing
                } else {
                    incoming
                }
            }
        }
    }
}

/// One channel's worth of captured records, in insertion order.
/// Display ordering is the query pipeline's job, never the bucket's.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChannelBucket {
    pub name: String,
    #[serde(rename = "messages")]
    pub records: Vec<Record>,
}

/// The whole in-memory collection, channel id to bucket. Created empty
/// at process start and only ever persisted through an explicit
/// snapshot operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Store {
    pub channels: BTreeMap<String, ChannelBucket>,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one record: create the bucket if the channel is unknown,
    /// replace an existing record with the same id through `policy`,
    /// append otherwise. O(bucket size) by design; capture volume is
    /// bounded by chat history, not query frequency.
    pub fn insert(
        &mut self,
        channel_id: &str,
        channel_name: &str,
        record: Record,
        policy: ConflictPolicy,
    ) {
        let Some(bucket) = self.channels.get_mut(channel_id) else {
            tracing::debug!(channel_id, channel_name, "creating channel bucket");
            self.channels.insert(
                channel_id.to_string(),
                ChannelBucket { name: channel_name.to_string(), records: vec![record] },
            );
            return;
        };
        if let Some(index) = bucket.records.iter().position(|stored| stored.id == record.id) {
            let existing = bucket.records[index].clone();
            bucket.records[index] = policy.resolve(existing, record);
            return;
        }
        bucket.records.push(record);
    }

    /// Remove every record of the channel satisfying `pred`; returns
    /// the removed count, 0 for an unknown channel.
    pub fn remove_where(&mut self, channel_id: &str, pred: impl Fn(&Record) -> bool) -> usize {
        let Some(bucket) = self.channels.get_mut(channel_id) else {
            return 0;
        };
        let before = bucket.records.len();
        bucket.records.retain(|record| !pred(record));
        before - bucket.records.len()
    }

    /// All records captured from one channel, empty for unknown ids.
    #[must_use]
    pub fn records_of(&self, channel_id: &str) -> &[Record] {
        self.channels.get(channel_id).map_or(&[], |bucket| bucket.records.as_slice())
    }

    /// Insert every record of `other`, resolving id collisions through
    /// `policy`. Returns inserted counts keyed by channel name.
    pub fn insert_all(
        &mut self,
        other: Store,
        policy: ConflictPolicy,
    ) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for (channel_id, bucket) in other.channels {
            counts.insert(bucket.name.clone(), bucket.records.len());
            for record in bucket.records {
                self.insert(&channel_id, &bucket.name, record, policy);
            }
        }
        counts
    }

    /// Build a new store holding every record of `first` then every
    /// record of `second`. Records present in both with the same id go
    /// through `policy`, with `second`'s insertion order deciding ties
    /// under order-sensitive policies (see [`ConflictPolicy`]).
    #[must_use]
    pub fn merge(first: &Store, second: &Store, policy: ConflictPolicy) -> Store {
        let mut merged = Store::new();
        merged.insert_all(first.clone(), policy);
        merged.insert_all(second.clone(), policy);
        merged
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.channels.values().map(|bucket| bucket.records.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};

    use super::*;
    use crate::record::{Grade, ScoreSet, UserRef};

    fn base_time() -> OffsetDateTime {
        datetime!(2023-04-01 0:00 UTC)
    }

    fn mk_record(id: &str, grade: f64, captured_offset_s: i64) -> Record {
        Record {
            id: id.to_string(),
            author: UserRef::new("poster#1", ""),
            score: ScoreSet {
                grades: vec![Grade { value: grade, voter: UserRef::new("x#1", "") }],
                special: false,
            },
            posted_at: base_time(),
            body: String::new(),
            media: vec![],
            captured_at: base_time() + Duration::seconds(captured_offset_s),
            source_url: "https://example.test/p".to_string(),
        }
    }

    #[test]
    fn default_policy_keeps_the_last_insert() {
        let mut store = Store::new();
        store.insert("ch", "general", mk_record("a", 8.0, 0), ConflictPolicy::TakeNew);
        store.insert("ch", "general", mk_record("a", 2.0, 1), ConflictPolicy::TakeNew);
        let records = store.records_of("ch");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].score.for_voter("x#1"), Some(2.0));
    }

    #[test]
    fn keep_existing_ignores_the_replacement() {
        let mut store = Store::new();
        store.insert("ch", "general", mk_record("a", 8.0, 0), ConflictPolicy::KeepExisting);
        store.insert("ch", "general", mk_record("a", 2.0, 1), ConflictPolicy::KeepExisting);
        assert_eq!(store.records_of("ch")[0].score.for_voter("x#1"), Some(8.0));
    }

    #[test]
    fn latest_captured_prefers_the_newer_capture() {
        let mut store = Store::new();
        store.insert("ch", "general", mk_record("a", 8.0, 10), ConflictPolicy::LatestCaptured);
        store.insert("ch", "general", mk_record("a", 2.0, 0), ConflictPolicy::LatestCaptured);
        assert_eq!(store.records_of("ch")[0].score.for_voter("x#1"), Some(8.0));
    }

    #[test]
    fn remove_where_reports_removed_count() {
        let mut store = Store::new();
        store.insert("ch", "general", mk_record("a", 8.0, 0), ConflictPolicy::TakeNew);
        store.insert("ch", "general", mk_record("b", 2.0, 0), ConflictPolicy::TakeNew);
        store.insert("ch", "general", mk_record("c", 9.0, 0), ConflictPolicy::TakeNew);
        let removed = store.remove_where("ch", |record| record.mean_score() > 5.0);
        assert_eq!(removed, 2);
        assert_eq!(store.records_of("ch").len(), 1);
        assert_eq!(store.remove_where("nope", |_| true), 0);
    }

    #[test]
    fn records_of_unknown_channel_is_empty() {
        assert!(Store::new().records_of("missing").is_empty());
    }

    #[test]
    fn merge_is_idempotent_under_latest_captured() {
        let mut a = Store::new();
        a.insert("ch", "general", mk_record("a", 8.0, 0), ConflictPolicy::TakeNew);
        a.insert("ch", "general", mk_record("b", 3.0, 5), ConflictPolicy::TakeNew);
        let mut b = Store::new();
        b.insert("ch", "general", mk_record("a", 2.0, 9), ConflictPolicy::TakeNew);
        b.insert("other", "memes", mk_record("z", 1.0, 0), ConflictPolicy::TakeNew);

        let once = Store::merge(&a, &b, ConflictPolicy::LatestCaptured);
        let twice = Store::merge(&once, &b, ConflictPolicy::LatestCaptured);
        assert_eq!(once, twice);
        assert_eq!(once.records_of("ch")[0].score.for_voter("x#1"), Some(2.0));
        assert_eq!(once.record_count(), 3);
    }

    #[test]
    fn insert_all_counts_per_channel_name() {
        let mut incoming = Store::new();
        incoming.insert("ch", "general", mk_record("a", 8.0, 0), ConflictPolicy::TakeNew);
        incoming.insert("ch", "general", mk_record("b", 2.0, 0), ConflictPolicy::TakeNew);
        incoming.insert("other", "memes", mk_record("c", 1.0, 0), ConflictPolicy::TakeNew);

        let mut store = Store::new();
        let counts = store.insert_all(incoming, ConflictPolicy::TakeNew);
        assert_eq!(counts.get("general"), Some(&2));
        assert_eq!(counts.get("memes"), Some(&1));
    }

    proptest! {
        // insert is a left-fold of the conflict policy over insertion
        // order: the surviving record for an id equals folding every
        // insert for that id in sequence.
        #[test]
        fn insert_folds_conflicts_in_order(grades in proptest::collection::vec((0u8..3, -10.0f64..10.0, 0i64..100), 1..20)) {
            let mut store = Store::new();
            let mut expected: Option<Record> = None;
            for (id_pick, grade, offset) in grades {
                let id = format!("id-{id_pick}");
                let record = mk_record(&id, grade, offset);
                store.insert("ch", "general", record.clone(), ConflictPolicy::LatestCaptured);
                if id == "id-0" {
                    expected = Some(match expected.take() {
                        None => record,
                        Some(existing) => ConflictPolicy::LatestCaptured.resolve(existing, record),
                    });
                }
            }
            let stored = store
                .records_of("ch")
                .iter()
                .find(|record| record.id == "id-0")
                .cloned();
            prop_assert_eq!(stored, expected);
        }
    }
}
