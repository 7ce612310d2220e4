use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::models::event::Envelope;

/// Client-to-server frames, decoded once at the edge.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    LocationUpdate(InboundLocation),
    Subscribe(SubscribeRequest),
    Ping,
    /// Unknown `type`; ignored so newer clients keep working.
    Unrecognized(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundLocation {
    /// Internal order id or delivery id.
    pub order_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeAction {
    #[default]
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    #[serde(alias = "orderID")]
    pub order_id: String,
    #[serde(default)]
    pub action: SubscribeAction,
}

impl InboundMessage {
    /// `None` for frames that are not a `{type, payload}` envelope or whose
    /// payload does not fit the declared type.
    pub fn decode(text: &str) -> Option<Self> {
        let envelope: Envelope = serde_json::from_str(text).ok()?;

        match envelope.kind.as_str() {
            "location_update" => serde_json::from_value(envelope.payload)
                .ok()
                .map(InboundMessage::LocationUpdate),
            "subscribe" => serde_json::from_value(envelope.payload)
                .ok()
                .map(InboundMessage::Subscribe),
            "ping" => Some(InboundMessage::Ping),
            other => Some(InboundMessage::Unrecognized(other.to_string())),
        }
    }
}

pub fn pong() -> Envelope {
    Envelope::new("pong", json!({ "timestamp": Utc::now() }))
}

pub fn encode(envelope: &Envelope) -> Option<String> {
    serde_json::to_string(envelope).ok()
}

#[cfg(test)]
mod tests {
    use super::{InboundMessage, SubscribeAction};

    #[test]
    fn decodes_known_types() {
        let ping = InboundMessage::decode(r#"{"type":"ping"}"#);
        assert_eq!(ping, Some(InboundMessage::Ping));

        let Some(InboundMessage::Subscribe(request)) = InboundMessage::decode(
            r#"{"type":"subscribe","payload":{"orderId":"DLV-20261018-1A2B3C4D","action":"unsubscribe"}}"#,
        ) else {
            panic!("expected subscribe");
        };
        assert_eq!(request.order_id, "DLV-20261018-1A2B3C4D");
        assert_eq!(request.action, SubscribeAction::Unsubscribe);

        let Some(InboundMessage::LocationUpdate(location)) = InboundMessage::decode(
            r#"{"type":"location_update","payload":{"orderId":"x","latitude":-15.42,"longitude":28.28,"speed":32.5}}"#,
        ) else {
            panic!("expected location update");
        };
        assert_eq!(location.speed, Some(32.5));
        assert_eq!(location.heading, None);
    }

    #[test]
    fn subscribe_action_defaults_to_subscribe() {
        let Some(InboundMessage::Subscribe(request)) =
            InboundMessage::decode(r#"{"type":"subscribe","payload":{"orderID":"abc"}}"#)
        else {
            panic!("expected subscribe");
        };
        assert_eq!(request.action, SubscribeAction::Subscribe);
    }

    #[test]
    fn unknown_and_malformed_frames() {
        assert_eq!(
            InboundMessage::decode(r#"{"type":"typing","payload":{}}"#),
            Some(InboundMessage::Unrecognized("typing".to_string()))
        );
        assert_eq!(InboundMessage::decode("not json"), None);
        assert_eq!(
            InboundMessage::decode(r#"{"type":"location_update","payload":{"orderId":"x"}}"#),
            None
        );
    }
}
