//! The gateway payload envelope.
//!
//! Every payload from the gateway carries the same four fields: `op` (the
//! opcode, always present), `s` (a nullable sequence number), `t` (a nullable
//! event name, set only on dispatches) and `d` (the inner data). Decoding
//! stops at that envelope; dispatch data is passed on as raw JSON rather than
//! mapped onto domain models.

use crate::constants::Opcode;
use crate::internal::prelude::*;
use crate::json;

/// A payload received over the gateway, decoded as far as its envelope.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum GatewayEvent {
    /// An op 0 event dispatch, to be handed to the application.
    Dispatch {
        /// The sequence number, when the gateway sent one.
        seq: Option<u64>,
        /// The name of the dispatched event, e.g. `MESSAGE_CREATE`.
        event_type: String,
        /// The raw `d` payload.
        data: Value,
    },
    /// An op 1 request for an immediate heartbeat.
    Heartbeat,
    /// An op 11 acknowledgement of a heartbeat this client sent.
    HeartbeatAck,
    /// The op 10 handshake opener, dictating the heartbeat cadence.
    Hello {
        heartbeat_interval: u64,
    },
    /// An op 9 notice that the session is gone; `resumable` says whether a
    /// RESUME may still succeed.
    InvalidSession {
        resumable: bool,
    },
    /// An op 7 instruction to reconnect and resume.
    Reconnect,
    /// An opcode this library does not recognize.
    Unknown {
        op: u8,
    },
}

impl GatewayEvent {
    /// Decodes a payload from the JSON text of a gateway frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] when the text is not a JSON object, and
    /// [`Error::Decode`] when the envelope is malformed: a missing or
    /// non-integral `op`, a dispatch without an event name, a Hello without an
    /// interval, or an invalid-session payload without its boolean.
    pub fn decode(text: &str) -> Result<Self> {
        let mut map: JsonMap = json::from_str(text)?;

        let op = map
            .get("op")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Decode("expected op", Value::Object(map.clone())))?;

        let seq = map.get("s").and_then(Value::as_u64);
        let data = map.remove("d").unwrap_or(Value::Null);

        Ok(match Opcode::from(op as u8) {
            Opcode::Dispatch => {
                let event_type = match map.remove("t") {
                    Some(Value::String(name)) => name,
                    other => {
                        return Err(Error::Decode(
                            "expected dispatch event name",
                            other.unwrap_or(Value::Null),
                        ));
                    },
                };

                Self::Dispatch {
                    seq,
                    event_type,
                    data,
                }
            },
            Opcode::Heartbeat => Self::Heartbeat,
            Opcode::HeartbeatAck => Self::HeartbeatAck,
            Opcode::Hello => {
                let heartbeat_interval = data
                    .get("heartbeat_interval")
                    .and_then(Value::as_u64)
                    .ok_or(Error::Decode("expected heartbeat_interval", data))?;

                Self::Hello {
                    heartbeat_interval,
                }
            },
            Opcode::InvalidSession => Self::InvalidSession {
                resumable: data
                    .as_bool()
                    .ok_or(Error::Decode("expected invalid session boolean", data))?,
            },
            Opcode::Reconnect => Self::Reconnect,
            other => Self::Unknown {
                op: other.into(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::GatewayEvent;
    use crate::json::json;

    #[test]
    fn decodes_hello() {
        let ev = GatewayEvent::decode(r#"{"op":10,"d":{"heartbeat_interval":45000}}"#)
            .expect("valid hello");
        assert_eq!(ev, GatewayEvent::Hello {
            heartbeat_interval: 45000,
        });
    }

    #[test]
    fn decodes_dispatch_envelope() {
        let text = r#"{"op":0,"s":3,"t":"MESSAGE_CREATE","d":{"content":"hi"}}"#;
        let ev = GatewayEvent::decode(text).expect("valid dispatch");
        assert_eq!(ev, GatewayEvent::Dispatch {
            seq: Some(3),
            event_type: "MESSAGE_CREATE".to_owned(),
            data: json!({"content": "hi"}),
        });
    }

    #[test]
    fn decodes_invalid_session() {
        let ev = GatewayEvent::decode(r#"{"op":9,"d":false}"#).expect("valid payload");
        assert_eq!(ev, GatewayEvent::InvalidSession {
            resumable: false,
        });
    }

    #[test]
    fn rejects_malformed_hello() {
        assert!(GatewayEvent::decode(r#"{"op":10,"d":{}}"#).is_err());
    }

    #[test]
    fn rejects_missing_opcode() {
        assert!(GatewayEvent::decode(r#"{"d":null}"#).is_err());
        assert!(GatewayEvent::decode(r#"{"op":"zero"}"#).is_err());
    }

    #[test]
    fn tolerates_unknown_opcodes() {
        let ev = GatewayEvent::decode(r#"{"op":12,"d":null}"#).expect("valid envelope");
        assert_eq!(ev, GatewayEvent::Unknown {
            op: 12,
        });
    }
}
