//! Decoding of captured message stubs into kernel records. This is the
//! chat-platform collaborator's side of the boundary: reaction tallies
//! arrive already resolved to voter identities, and the bare-URL
//! normalization happens here, before the kernel ever sees a record.

use std::collections::BTreeMap;

use serde::Deserialize;
use time::OffsetDateTime;

use ratings_core::record::{Record, UserRef};
use ratings_core::score::{aggregate, ReactionMap};

/// One captured message with its raw reaction tallies, as produced by
/// the platform decoder.
#[derive(Debug, Deserialize)]
pub struct RecordStub {
    pub id: String,
    pub author: UserRef,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub url: String,
    /// Reaction kind to the voters who applied it.
    #[serde(default)]
    pub reactions: BTreeMap<String, Vec<UserRef>>,
}

/// Result of decoding one import batch.
#[derive(Debug)]
pub struct DecodedBatch {
    pub records: Vec<Record>,
    /// Stubs dropped because aggregation left them without any grade.
    pub unrated: usize,
}

/// Aggregate each stub's reactions and shape it into a [`Record`].
/// Unrated stubs (empty score set after aggregation) are dropped here,
/// never inserted.
pub fn decode_batch(
    map: &ReactionMap,
    stubs: Vec<RecordStub>,
    captured_at: OffsetDateTime,
) -> DecodedBatch {
    let mut records = Vec::new();
    let mut unrated = 0;
    for stub in stubs {
        let score = aggregate(map, &stub.reactions);
        if score.is_empty() {
            unrated += 1;
            continue;
        }
        let (body, media) = promote_bare_url(stub.content, stub.attachments);
        records.push(Record {
            id: stub.id,
            author: stub.author,
            score,
            posted_at: stub.date,
            body,
            media,
            captured_at,
            source_url: stub.url,
        });
    }
    DecodedBatch { records, unrated }
}

/// A message whose whole body is one bare URL and which carries no
/// attachments is really a media post: the URL moves into the media
/// list and the body is cleared.
fn promote_bare_url(body: String, media: Vec<String>) -> (String, Vec<String>) {
    if !media.is_empty() {
        return (body, media);
    }
    let trimmed = body.trim();
    let is_bare_url = (trimmed.starts_with("http://") || trimmed.starts_with("https://"))
        && !trimmed.contains(char::is_whitespace);
    if is_bare_url {
        (String::new(), vec![trimmed.to_string()])
    } else {
        (body, media)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use ratings_core::score::ReactionRule;

    use super::*;

    fn stub(id: &str, content: &str, attachments: &[&str], reactions: &[(&str, &[&str])]) -> RecordStub {
        RecordStub {
            id: id.to_string(),
            author: UserRef::new("poster#1", ""),
            date: datetime!(2023-04-01 12:00 UTC),
            content: content.to_string(),
            attachments: attachments.iter().map(|url| (*url).to_string()).collect(),
            url: format!("https://example.test/p/{id}"),
            reactions: reactions
                .iter()
                .map(|(kind, voters)| {
                    (
                        (*kind).to_string(),
                        voters.iter().map(|tag| UserRef::new(*tag, "")).collect(),
                    )
                })
                .collect(),
        }
    }

    fn sample_map() -> ReactionMap {
        ReactionMap::from([(
            "up".to_string(),
            ReactionRule { weight: Some(10.0), ..ReactionRule::default() },
        )])
    }

    #[test]
    fn unrated_stubs_are_dropped() {
        let batch = decode_batch(
            &sample_map(),
            vec![stub("a", "hi", &[], &[("up", &["x#1"])]), stub("b", "hi", &[], &[])],
            datetime!(2023-04-02 0:00 UTC),
        );
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.unrated, 1);
        assert_eq!(batch.records[0].id, "a");
    }

    #[test]
    fn bare_url_body_is_promoted_into_media() {
        let batch = decode_batch(
            &sample_map(),
            vec![stub("a", "  https://cdn.test/pic.png ", &[], &[("up", &["x#1"])])],
            datetime!(2023-04-02 0:00 UTC),
        );
        let record = &batch.records[0];
        assert!(record.body.is_empty());
        assert_eq!(record.media, ["https://cdn.test/pic.png"]);
    }

    #[test]
    fn prose_and_attachment_posts_stay_untouched() {
        let batch = decode_batch(
            &sample_map(),
            vec![
                stub("a", "look at https://a.test and more", &[], &[("up", &["x#1"])]),
                stub("b", "https://a.test/x", &["https://cdn.test/b.png"], &[("up", &["x#1"])]),
            ],
            datetime!(2023-04-02 0:00 UTC),
        );
        assert_eq!(batch.records[0].body, "look at https://a.test and more");
        assert!(batch.records[0].media.is_empty());
        assert_eq!(batch.records[1].body, "https://a.test/x");
        assert_eq!(batch.records[1].media, ["https://cdn.test/b.png"]);
    }
}
