//! Nostr event model.

use serde::{Deserialize, Serialize};

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// The first element names the tag type and the rest carry its data, e.g.
/// `["e", "<event id>"]` or `["t", "news"]`. Tags are carried verbatim so
/// custom tags survive the round trip to relays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag(pub Vec<String>);

/// Signed, immutable event envelope exchanged with relays.
///
/// ```json
/// {
///   "id": "a3f1...",
///   "pubkey": "9c22...",
///   "kind": 1,
///   "created_at": 1700000000,
///   "tags": [["t", "news"]],
///   "content": "hello",
///   "sig": "b0d4..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of the SHA-256 content hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `1` or `30023`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Ordered tags such as `e` (reference) or `t` (topic).
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event hash (hex).
    pub sig: String,
}

/// Largest kind number accepted on the wire.
const MAX_KIND: u32 = 65535;

/// Check the structural shape of an event envelope.
///
/// This is a pure predicate over field presence, length and range; it does
/// not verify the signature or recompute the content hash. Callers treat it
/// as a precondition before handing the event to the fan-out layer.
pub fn validate(ev: &Event) -> Result<(), String> {
    if !is_hex(&ev.id, 64) {
        return Err("id must be 64 lowercase hex characters".into());
    }
    if !is_hex(&ev.pubkey, 64) {
        return Err("pubkey must be 64 lowercase hex characters".into());
    }
    if !is_hex(&ev.sig, 128) {
        return Err("sig must be 128 lowercase hex characters".into());
    }
    if ev.kind > MAX_KIND {
        return Err(format!("kind {} exceeds {}", ev.kind, MAX_KIND));
    }
    Ok(())
}

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_event() -> Event {
        Event {
            id: "11".repeat(32),
            pubkey: "ab".repeat(32),
            kind: 1,
            created_at: 1,
            tags: vec![Tag(vec!["t".into(), "news".into()])],
            content: "hello".into(),
            sig: "cd".repeat(64),
        }
    }

    #[test]
    fn serde_round_trip() {
        let ev = valid_event();
        let json = serde_json::to_string(&ev).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }

    #[test]
    fn validate_accepts_well_formed() {
        assert!(validate(&valid_event()).is_ok());
    }

    #[test]
    fn validate_rejects_short_id() {
        let mut ev = valid_event();
        ev.id = "aa11".into();
        assert!(validate(&ev).is_err());
    }

    #[test]
    fn validate_rejects_uppercase_hex() {
        let mut ev = valid_event();
        ev.pubkey = "AB".repeat(32);
        assert!(validate(&ev).is_err());
    }

    #[test]
    fn validate_rejects_non_hex_sig() {
        let mut ev = valid_event();
        ev.sig = "zz".repeat(64);
        assert!(validate(&ev).is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_kind() {
        let mut ev = valid_event();
        ev.kind = 70000;
        assert!(validate(&ev).is_err());
    }
}
