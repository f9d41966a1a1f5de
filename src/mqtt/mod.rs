pub mod client;

use serde_json::Value;

/// A raw publish received on one of our subscriptions.
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

/// A host request decoded from an incoming topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    SetProperty {
        device_id: &'a str,
        property: &'a str,
    },
    PerformAction {
        device_id: &'a str,
        action: &'a str,
    },
    StartPairing,
    CancelPairing,
}

/// Decode an incoming topic.
///
/// Accepted forms:
/// `{prefix}/{device_id}/command/{property}`,
/// `{prefix}/{device_id}/action/{name}`,
/// `{prefix}/pairing/start` and `{prefix}/pairing/cancel`.
pub fn parse_topic<'a>(topic: &'a str, prefix: &str) -> Option<Command<'a>> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    match rest {
        "pairing/start" => return Some(Command::StartPairing),
        "pairing/cancel" => return Some(Command::CancelPairing),
        _ => {}
    }

    let (device_id, rest) = rest.split_once('/')?;
    let (kind, name) = rest.split_once('/')?;
    if device_id.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    match kind {
        "command" => Some(Command::SetProperty {
            device_id,
            property: name,
        }),
        "action" => Some(Command::PerformAction {
            device_id,
            action: name,
        }),
        _ => None,
    }
}

/// Payloads are JSON; anything that does not parse is taken as a bare string
/// so `#ff0000` works as well as `"#ff0000"`.
pub fn parse_payload(payload: &str) -> Value {
    let trimmed = payload.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}
