//! Wire frames exchanged with relays.
//!
//! Every frame is a JSON array whose first element names the frame type.
//! Inbound text is parsed exactly once at the socket boundary into
//! [`RelayFrame`]; shapes that do not match any known frame become
//! [`RelayFrame::Unknown`] and are dropped by the caller.

use serde_json::{json, Value};

use crate::event::Event;
use crate::filter::Filter;

/// Parsed inbound frame from a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayFrame {
    /// `["OK", <event id>, <accepted>, <message>]` publish acknowledgement.
    Ack {
        event_id: String,
        accepted: bool,
        message: String,
    },
    /// `["EVENT", <subscription id>, <event>]` stored or live event.
    Event {
        subscription_id: String,
        event: Event,
    },
    /// `["EOSE", <subscription id>]` end of stored events.
    EndOfStream { subscription_id: String },
    /// `["CLOSED", <subscription id>, <reason>]` relay-side termination.
    Closed {
        subscription_id: String,
        reason: String,
    },
    /// `["NOTICE", <message>]` human-readable relay notice.
    Notice { message: String },
    /// Anything else, ignored.
    Unknown,
}

impl RelayFrame {
    /// Parse one inbound text frame. Never fails: malformed input is
    /// [`RelayFrame::Unknown`].
    pub fn parse(text: &str) -> Self {
        let Ok(val) = serde_json::from_str::<Value>(text) else {
            return RelayFrame::Unknown;
        };
        let Some(arr) = val.as_array() else {
            return RelayFrame::Unknown;
        };
        match arr.first().and_then(Value::as_str) {
            Some("OK") if arr.len() >= 3 => {
                let (Some(event_id), Some(accepted)) = (arr[1].as_str(), arr[2].as_bool()) else {
                    return RelayFrame::Unknown;
                };
                RelayFrame::Ack {
                    event_id: event_id.to_string(),
                    accepted,
                    message: arr
                        .get(3)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }
            }
            Some("EVENT") if arr.len() >= 3 => {
                let Some(subscription_id) = arr[1].as_str() else {
                    return RelayFrame::Unknown;
                };
                let Ok(event) = serde_json::from_value::<Event>(arr[2].clone()) else {
                    return RelayFrame::Unknown;
                };
                RelayFrame::Event {
                    subscription_id: subscription_id.to_string(),
                    event,
                }
            }
            Some("EOSE") if arr.len() >= 2 => {
                let Some(subscription_id) = arr[1].as_str() else {
                    return RelayFrame::Unknown;
                };
                RelayFrame::EndOfStream {
                    subscription_id: subscription_id.to_string(),
                }
            }
            Some("CLOSED") if arr.len() >= 2 => {
                let Some(subscription_id) = arr[1].as_str() else {
                    return RelayFrame::Unknown;
                };
                RelayFrame::Closed {
                    subscription_id: subscription_id.to_string(),
                    reason: arr
                        .get(2)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }
            }
            Some("NOTICE") => RelayFrame::Notice {
                message: arr
                    .get(1)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            _ => RelayFrame::Unknown,
        }
    }
}

/// Build a `["EVENT", <event>]` publish frame.
pub fn publish_frame(event: &Event) -> String {
    json!(["EVENT", event]).to_string()
}

/// Build a `["REQ", <subscription id>, <filter>...]` subscribe frame.
pub fn req_frame(subscription_id: &str, filters: &[Filter]) -> String {
    let mut arr = vec![
        Value::String("REQ".into()),
        Value::String(subscription_id.into()),
    ];
    if let Ok(Value::Array(parts)) = serde_json::to_value(filters) {
        arr.extend(parts);
    }
    Value::Array(arr).to_string()
}

/// Build a `["CLOSE", <subscription id>]` unsubscribe frame.
pub fn close_frame(subscription_id: &str) -> String {
    json!(["CLOSE", subscription_id]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;

    fn sample_event() -> Event {
        Event {
            id: "aa11".into(),
            pubkey: "p1".into(),
            kind: 1,
            created_at: 7,
            tags: vec![Tag(vec!["t".into(), "news".into()])],
            content: "hi".into(),
            sig: String::new(),
        }
    }

    #[test]
    fn parses_ok_frame() {
        let frame = RelayFrame::parse(r#"["OK","aa11",true,"stored"]"#);
        assert_eq!(
            frame,
            RelayFrame::Ack {
                event_id: "aa11".into(),
                accepted: true,
                message: "stored".into(),
            }
        );
    }

    #[test]
    fn parses_ok_frame_without_message() {
        let frame = RelayFrame::parse(r#"["OK","aa11",false]"#);
        assert_eq!(
            frame,
            RelayFrame::Ack {
                event_id: "aa11".into(),
                accepted: false,
                message: String::new(),
            }
        );
    }

    #[test]
    fn parses_event_frame() {
        let ev = sample_event();
        let text = json!(["EVENT", "sub1", ev]).to_string();
        match RelayFrame::parse(&text) {
            RelayFrame::Event {
                subscription_id,
                event,
            } => {
                assert_eq!(subscription_id, "sub1");
                assert_eq!(event, ev);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn parses_eose_and_closed_and_notice() {
        assert_eq!(
            RelayFrame::parse(r#"["EOSE","sub1"]"#),
            RelayFrame::EndOfStream {
                subscription_id: "sub1".into()
            }
        );
        assert_eq!(
            RelayFrame::parse(r#"["CLOSED","sub1","auth-required: no"]"#),
            RelayFrame::Closed {
                subscription_id: "sub1".into(),
                reason: "auth-required: no".into(),
            }
        );
        assert_eq!(
            RelayFrame::parse(r#"["CLOSED","sub1"]"#),
            RelayFrame::Closed {
                subscription_id: "sub1".into(),
                reason: String::new(),
            }
        );
        assert_eq!(
            RelayFrame::parse(r#"["NOTICE","slow down"]"#),
            RelayFrame::Notice {
                message: "slow down".into()
            }
        );
    }

    #[test]
    fn malformed_input_is_unknown() {
        for text in [
            "not json",
            "{}",
            "[]",
            r#"[42]"#,
            r#"["OK"]"#,
            r#"["OK","aa11","yes"]"#,
            r#"["EVENT","sub1",{"id":"x"}]"#,
            r#"["EOSE"]"#,
            r#"["AUTH","challenge"]"#,
        ] {
            assert_eq!(RelayFrame::parse(text), RelayFrame::Unknown, "{text}");
        }
    }

    #[test]
    fn publish_frame_shape() {
        let ev = sample_event();
        let val: Value = serde_json::from_str(&publish_frame(&ev)).unwrap();
        assert_eq!(val[0], "EVENT");
        assert_eq!(val[1]["id"], "aa11");
    }

    #[test]
    fn req_frame_carries_every_filter() {
        let filters = vec![
            Filter {
                kinds: Some(vec![1]),
                ..Default::default()
            },
            Filter {
                authors: Some(vec!["p1".into()]),
                limit: Some(5),
                ..Default::default()
            },
        ];
        let val: Value = serde_json::from_str(&req_frame("sub1", &filters)).unwrap();
        assert_eq!(val[0], "REQ");
        assert_eq!(val[1], "sub1");
        assert_eq!(val[2]["kinds"][0], 1);
        assert_eq!(val[3]["authors"][0], "p1");
        assert_eq!(val[3]["limit"], 5);
    }

    #[test]
    fn close_frame_shape() {
        let val: Value = serde_json::from_str(&close_frame("sub1")).unwrap();
        assert_eq!(val[0], "CLOSE");
        assert_eq!(val[1], "sub1");
    }
}
