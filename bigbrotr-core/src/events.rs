//! Event validation.
//!
//! This runs on every event before it reaches [`crate::store::Store`]. It is
//! deliberately independent of whichever `RelayClient` delivered the event:
//! relays are not trusted to have validated their own data.

use chrono::{TimeZone, Utc};

use crate::error::InvalidEvent;
use crate::types::Event;

/// Events before this instant cannot be genuine Nostr traffic; used as a
/// sanity bound rather than a protocol rule.
const MIN_CREATED_AT: i64 = 1_577_836_800; // 2020-01-01T00:00:00Z
const MAX_CONTENT_BYTES: usize = 1024 * 1024;
const MAX_CLOCK_SKEW_SECS: i64 = 3600;

/// Validate `event`, returning `Ok(())` if it may be inserted, or the
/// specific [`InvalidEvent`] reason otherwise. Never panics on attacker
/// input.
pub fn validate_event(event: &Event, now: i64) -> Result<(), InvalidEvent> {
    if event.created_at < MIN_CREATED_AT || event.created_at > now + MAX_CLOCK_SKEW_SECS {
        return Err(InvalidEvent::TimestampOutOfRange(event.created_at));
    }
    if event.kind > 65_535 {
        return Err(InvalidEvent::KindOutOfRange(event.kind));
    }
    if event.content.len() > MAX_CONTENT_BYTES {
        return Err(InvalidEvent::ContentTooLarge(event.content.len()));
    }
    // Tag shape is already `Vec<Vec<String>>` at the type level, but a
    // relay-supplied JSON blob may still contain tags with zero elements or
    // elements that fail to deserialize as strings before reaching this
    // type; callers must reject malformed JSON upstream of construction. We
    // re-assert the invariant here defensively since `Event` may also be
    // built directly by tests.
    if event.tags.iter().any(|tag| tag.is_empty()) {
        return Err(InvalidEvent::MalformedTags);
    }

    verify_hash_and_signature(event)
}

fn verify_hash_and_signature(event: &Event) -> Result<(), InvalidEvent> {
    let nostr_event = to_nostr_event(event)?;
    nostr_event
        .verify()
        .map_err(|_| InvalidEvent::BadSignature(event.id.clone()))
}

fn to_nostr_event(event: &Event) -> Result<nostr::Event, InvalidEvent> {
    use std::str::FromStr;

    let id = nostr::EventId::from_hex(&event.id)
        .map_err(|_| InvalidEvent::IdMismatch(event.id.clone()))?;
    let pubkey = nostr::PublicKey::from_hex(&event.pubkey)
        .map_err(|_| InvalidEvent::BadSignature(event.id.clone()))?;
    let sig = nostr::secp256k1::schnorr::Signature::from_str(&event.sig)
        .map_err(|_| InvalidEvent::BadSignature(event.id.clone()))?;
    let created_at = nostr::Timestamp::from(event.created_at as u64);
    let kind = nostr::Kind::from(event.kind as u16);
    let tags = nostr::Tags::from_list(
        event
            .tags
            .iter()
            .filter_map(|tag| nostr::Tag::parse(tag.clone()).ok())
            .collect::<Vec<_>>(),
    );

    Ok(nostr::Event::new(
        id,
        pubkey,
        created_at,
        kind,
        tags,
        event.content.clone(),
        sig,
    ))
}

/// Recompute whether `Utc::now()`-style clock skew guards behave sensibly;
/// exposed for the scheduler to compute `now` once per iteration rather than
/// per event.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

#[allow(dead_code)]
fn timestamp_from_unix(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event {
            id: "0".repeat(64),
            pubkey: "0".repeat(64),
            created_at: unix_now(),
            kind: 1,
            tags: vec![],
            content: "hello".to_string(),
            sig: "0".repeat(128),
        }
    }

    #[test]
    fn rejects_timestamp_before_2020() {
        let mut e = sample_event();
        e.created_at = 0;
        assert_eq!(
            validate_event(&e, unix_now()),
            Err(InvalidEvent::TimestampOutOfRange(0))
        );
    }

    #[test]
    fn rejects_timestamp_too_far_in_future() {
        let now = unix_now();
        let mut e = sample_event();
        e.created_at = now + 2 * MAX_CLOCK_SKEW_SECS;
        assert_eq!(
            validate_event(&e, now),
            Err(InvalidEvent::TimestampOutOfRange(e.created_at))
        );
    }

    #[test]
    fn rejects_kind_out_of_range() {
        let mut e = sample_event();
        e.kind = 70_000;
        assert_eq!(validate_event(&e, unix_now()), Err(InvalidEvent::KindOutOfRange(70_000)));
    }

    #[test]
    fn rejects_oversize_content() {
        let mut e = sample_event();
        e.content = "x".repeat(MAX_CONTENT_BYTES + 1);
        assert_eq!(
            validate_event(&e, unix_now()),
            Err(InvalidEvent::ContentTooLarge(e.content.len()))
        );
    }

    #[test]
    fn rejects_empty_tag_arrays() {
        let mut e = sample_event();
        e.tags = vec![vec![]];
        assert_eq!(validate_event(&e, unix_now()), Err(InvalidEvent::MalformedTags));
    }
}
