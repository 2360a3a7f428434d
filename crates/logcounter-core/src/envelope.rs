// Firehose envelope model.
// Envelopes arrive as JSON objects using the upstream's camelCase field names;
// log message bodies are raw bytes and travel base64 encoded.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    HttpStartStop,
    LogMessage,
    ValueMetric,
    CounterEvent,
    Error,
    ContainerMetric,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    #[default]
    Out,
    Err,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMessage {
    #[serde(with = "base64_bytes")]
    pub message: Vec<u8>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub source_instance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub origin: String,
    pub event_type: EventType,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub log_message: Option<LogMessage>,
}

impl Envelope {
    /// Builds an application log envelope, as emitted by the log agents.
    pub fn log_message(app_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            origin: String::new(),
            event_type: EventType::LogMessage,
            timestamp: None,
            log_message: Some(LogMessage {
                message: body.into(),
                message_type: MessageType::Out,
                timestamp: 0,
                app_id: app_id.into(),
                source_type: "APP".to_string(),
                source_instance: "0".to_string(),
            }),
        }
    }

    pub fn other(event_type: EventType) -> Self {
        Self {
            origin: String::new(),
            event_type,
            timestamp: None,
            log_message: None,
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_log_message_envelope() {
        // "hello" base64 encoded.
        let json = r#"{
            "origin": "rep",
            "eventType": "LogMessage",
            "timestamp": 1700000000,
            "logMessage": {
                "message": "aGVsbG8=",
                "messageType": "ERR",
                "timestamp": 1700000000,
                "appId": "app-A",
                "sourceType": "APP/PROC/WEB",
                "sourceInstance": "3"
            }
        }"#;
        let envelope: Envelope = serde_json::from_str(json).expect("decode");
        assert_eq!(envelope.event_type, EventType::LogMessage);
        let log = envelope.log_message.expect("log message");
        assert_eq!(log.message, b"hello");
        assert_eq!(log.message_type, MessageType::Err);
        assert_eq!(log.app_id, "app-A");
    }

    #[test]
    fn unknown_event_type_decodes_as_unknown() {
        let json = r#"{"eventType":"SomethingNew"}"#;
        let envelope: Envelope = serde_json::from_str(json).expect("decode");
        assert_eq!(envelope.event_type, EventType::Unknown);
        assert!(envelope.log_message.is_none());
    }

    #[test]
    fn invalid_base64_body_is_a_decode_error() {
        let json = r#"{"eventType":"LogMessage","logMessage":{"message":"!!!"}}"#;
        assert!(serde_json::from_str::<Envelope>(json).is_err());
    }
}
