//! Event channel between clients and the gesture server.
//!
//! Each frame is one JSON object `{"event": <name>, "data": <payload>}`,
//! sent as one line on raw TCP or as one text message on WebSocket.
//! Clients emit `landmark`, the server answers each one with `prediction`.

use futures::{Sink, SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use crate::error::GestureError;

pub const LANDMARK_EVENT: &str = "landmark";
pub const PREDICTION_EVENT: &str = "prediction";

/// Longest accepted line; a 1530-value vector is well under 64 KiB
pub const MAX_LINE_LENGTH: usize = 4 * 1024 * 1024;

// --- Message types ---

/// Raw event as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn landmark(request: &LandmarkRequest) -> anyhow::Result<Self> {
        Ok(Self {
            event: LANDMARK_EVENT.to_string(),
            data: serde_json::to_value(request)?,
        })
    }
}

/// Client -> server: `landmark` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkRequest {
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
    /// Vector was already normalized by the client
    #[serde(default)]
    pub normalized: bool,
}

/// Server -> client: `prediction` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionResult {
    Label {
        label: String,
        score: f32,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        got: Option<usize>,
    },
}

impl PredictionResult {
    pub fn error(msg: impl Into<String>) -> Self {
        PredictionResult::Error {
            error: msg.into(),
            expected: None,
            got: None,
        }
    }

    pub fn from_error(err: &GestureError) -> Self {
        match err {
            GestureError::InvalidLength { expected, got } => PredictionResult::Error {
                error: err.to_string(),
                expected: Some(*expected),
                got: Some(*got),
            },
            other => PredictionResult::error(other.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, PredictionResult::Error { .. })
    }
}

/// Server -> client events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ServerEvent {
    Prediction(PredictionResult),
}

/// Decoded client event
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Landmark(LandmarkRequest),
    /// `landmark` event whose payload did not decode
    MalformedLandmark(String),
    /// Any other event name; not part of the inference contract
    Unknown(String),
}

/// Decode one line. Fails only when the line is not an event envelope.
pub fn decode_client_event(line: &str) -> Result<ClientEvent, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(line)?;
    if envelope.event != LANDMARK_EVENT {
        return Ok(ClientEvent::Unknown(envelope.event));
    }
    match serde_json::from_value::<LandmarkRequest>(envelope.data) {
        Ok(request) => Ok(ClientEvent::Landmark(request)),
        Err(e) => Ok(ClientEvent::MalformedLandmark(e.to_string())),
    }
}

// --- TCP codec helpers ---

pub type MessageStream = Framed<TcpStream, LinesCodec>;

/// Create a framed message stream with newline-delimited framing.
pub fn message_stream(stream: TcpStream) -> MessageStream {
    Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
}

/// Send a serializable message as one JSON frame.
pub async fn send_message<S, T>(sink: &mut S, msg: &T) -> anyhow::Result<()>
where
    S: Sink<String> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
    T: Serialize,
{
    let line = serde_json::to_string(msg)?;
    sink.send(line).await?;
    Ok(())
}

/// Receive and deserialize a message.
pub async fn recv_message<T: DeserializeOwned>(stream: &mut MessageStream) -> anyhow::Result<T> {
    match stream.next().await {
        Some(Ok(line)) => Ok(serde_json::from_str(&line)?),
        Some(Err(e)) => Err(e.into()),
        None => Err(anyhow::anyhow!("connection closed")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_landmark() {
        let line = r#"{"event":"landmark","data":{"vector":[0.1,0.2,0.3],"normalized":true}}"#;
        let event = decode_client_event(line).unwrap();
        assert_eq!(
            event,
            ClientEvent::Landmark(LandmarkRequest {
                vector: Some(vec![0.1, 0.2, 0.3]),
                normalized: true,
            })
        );
    }

    #[test]
    fn test_normalized_defaults_to_false() {
        let line = r#"{"event":"landmark","data":{"vector":[]}}"#;
        match decode_client_event(line).unwrap() {
            ClientEvent::Landmark(req) => assert!(!req.normalized),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_vector_decodes_as_none() {
        let line = r#"{"event":"landmark","data":{"normalized":false}}"#;
        match decode_client_event(line).unwrap() {
            ClientEvent::Landmark(req) => assert_eq!(req.vector, None),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_non_numeric_vector_is_malformed() {
        let line = r#"{"event":"landmark","data":{"vector":[0.1,"x"]}}"#;
        assert!(matches!(decode_client_event(line).unwrap(), ClientEvent::MalformedLandmark(_)));
        let line = r#"{"event":"landmark"}"#;
        assert!(matches!(decode_client_event(line).unwrap(), ClientEvent::MalformedLandmark(_)));
    }

    #[test]
    fn test_other_events_are_unknown() {
        let line = r#"{"event":"ping","data":{}}"#;
        assert_eq!(decode_client_event(line).unwrap(), ClientEvent::Unknown("ping".to_string()));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        assert!(decode_client_event("not json").is_err());
        assert!(decode_client_event(r#"{"data":{}}"#).is_err());
    }

    #[test]
    fn test_prediction_wire_format() {
        let ok = ServerEvent::Prediction(PredictionResult::Label {
            label: "No".to_string(),
            score: 0.5,
        });
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"event": "prediction", "data": {"label": "No", "score": 0.5}})
        );

        let err = ServerEvent::Prediction(PredictionResult::error("No vector provided"));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"event": "prediction", "data": {"error": "No vector provided"}})
        );
    }

    #[test]
    fn test_invalid_length_error_carries_fields() {
        let result = PredictionResult::from_error(&GestureError::InvalidLength {
            expected: 1530,
            got: 100,
        });
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"error": "Invalid vector length: expected 1530, got 100", "expected": 1530, "got": 100})
        );
    }

    #[test]
    fn test_server_event_decodes_on_client_side() {
        let line = r#"{"event":"prediction","data":{"error":"boom"}}"#;
        let event: ServerEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event, ServerEvent::Prediction(PredictionResult::error("boom")));
        assert!(matches!(event, ServerEvent::Prediction(ref p) if p.is_error()));
    }

    #[test]
    fn test_landmark_envelope() {
        let env = Envelope::landmark(&LandmarkRequest {
            vector: Some(vec![1.0]),
            normalized: false,
        })
        .unwrap();
        let line = serde_json::to_string(&env).unwrap();
        assert!(matches!(decode_client_event(&line).unwrap(), ClientEvent::Landmark(_)));
    }
}
