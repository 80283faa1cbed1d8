//! Codec trait and the JSON implementation.
//!
//! The server never touches `serde_json` directly: connection handlers hold
//! something implementing [`Codec`] and call `encode`/`decode` on it. Browser
//! clients speak JSON, so [`JsonCodec`] is the only implementation shipped.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes values to bytes and decodes bytes back.
///
/// `Send + Sync + 'static` because a single codec instance is shared by
/// every connection task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or do not
    /// match the expected shape.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] backed by `serde_json`.
///
/// ```rust
/// use quizcast_protocol::{ClientMessage, Codec, JsonCodec};
///
/// let codec = JsonCodec;
/// let msg: ClientMessage = codec.decode(br#"{"type":"StartGame"}"#).unwrap();
/// assert_eq!(msg, ClientMessage::StartGame);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{AnswerValue, ClientMessage, Envelope, QuestionId, ServerEvent};

    #[test]
    fn test_decode_submit_answer_reads_tagged_value() {
        let raw = br#"{"type":"SubmitAnswer","question_id":3,"value":{"choice":1}}"#;
        let msg: ClientMessage = JsonCodec.decode(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::SubmitAnswer {
                question_id: QuestionId(3),
                value: AnswerValue::Choice(1),
            }
        );
    }

    #[test]
    fn test_decode_unknown_type_returns_decode_error() {
        let result: Result<ClientMessage, _> = JsonCodec.decode(br#"{"type":"Teleport"}"#);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_garbage_returns_decode_error() {
        let result: Result<ClientMessage, _> = JsonCodec.decode(b"not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_encode_envelope_flattens_event_tag() {
        let envelope = Envelope {
            seq: 4,
            timestamp: 1200,
            payload: ServerEvent::HeartbeatAck {
                client_time: 10,
                server_time: 1200,
            },
        };
        let bytes = JsonCodec.encode(&envelope).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["seq"], 4);
        assert_eq!(json["payload"]["type"], "HeartbeatAck");
        assert_eq!(json["payload"]["server_time"], 1200);
    }
}
