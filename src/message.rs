//! Signaling wire format.
//!
//! Every frame on the relay is one JSON object tagged by `type`:
//!
//! ```text
//! {"type":"offer","sdp":"v=0..."}
//! {"type":"answer","sdp":"v=0...","id":"<offer id>"}
//! {"type":"candidate","candidate":{"candidate":"candidate:...","sdpMid":"0","sdpMLineIndex":0}}
//! ```
//!
//! `id` only appears when the relay correlates an HTTP `/signal` offer with the
//! answer it is waiting for. The untagged `{"candidate":{...}}` shape is not accepted.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Offer or answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => write!(f, "offer"),
            SdpKind::Answer => write!(f, "answer"),
        }
    }
}

/// An SDP blob and its kind. Exchanged verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One network path endpoint, in the browser's `RTCIceCandidateInit` layout.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

impl Candidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

/// A single signaling frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    Offer {
        sdp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Answer {
        sdp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Candidate {
        candidate: Candidate,
    },
}

impl SignalMessage {
    /// Wraps a description with no relay correlation id.
    pub fn description(desc: SessionDescription) -> Self {
        Self::correlated(desc, None)
    }

    pub fn correlated(desc: SessionDescription, id: Option<String>) -> Self {
        match desc.kind {
            SdpKind::Offer => SignalMessage::Offer { sdp: desc.sdp, id },
            SdpKind::Answer => SignalMessage::Answer { sdp: desc.sdp, id },
        }
    }

    pub fn candidate(candidate: Candidate) -> Self {
        SignalMessage::Candidate { candidate }
    }

    /// The description carried by an offer/answer frame.
    pub fn as_description(&self) -> Option<SessionDescription> {
        match self {
            SignalMessage::Offer { sdp, .. } => Some(SessionDescription::offer(sdp.clone())),
            SignalMessage::Answer { sdp, .. } => Some(SessionDescription::answer(sdp.clone())),
            SignalMessage::Candidate { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::Candidate { .. } => "candidate",
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;

    #[test]
    fn test_description_round_trip() {
        let desc = SessionDescription::offer("v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n");
        let text = SignalMessage::description(desc.clone()).encode().unwrap();
        let decoded = SignalMessage::decode(&text).unwrap();
        assert_eq!(decoded.as_description(), Some(desc));
    }

    #[test]
    fn test_offer_wire_shape() {
        let text = SignalMessage::description(SessionDescription::offer("v=0"))
            .encode()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, serde_json::json!({"type": "offer", "sdp": "v=0"}));
    }

    #[test]
    fn test_answer_keeps_relay_id() {
        let msg = SignalMessage::correlated(
            SessionDescription::answer("v=0"),
            Some("offer-1".to_string()),
        );
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "answer");
        assert_eq!(value["id"], "offer-1");
    }

    #[test]
    fn test_candidate_uses_browser_field_names() {
        let candidate = Candidate {
            candidate: "candidate:1 1 udp 2130706431 10.0.0.1 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        let text = SignalMessage::candidate(candidate.clone()).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "candidate");
        assert_eq!(value["candidate"]["sdpMid"], "0");
        assert_eq!(value["candidate"]["sdpMLineIndex"], 0);

        match SignalMessage::decode(&text).unwrap() {
            SignalMessage::Candidate { candidate: c } => assert_eq!(c, candidate),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_candidate_from_browser_json() {
        let text = r#"{"type":"candidate","candidate":{"candidate":"candidate:0 1 UDP 1 1.2.3.4 9 typ host","sdpMid":"1","sdpMLineIndex":1,"usernameFragment":"abcd"}}"#;
        match SignalMessage::decode(text).unwrap() {
            SignalMessage::Candidate { candidate } => {
                assert_eq!(candidate.sdp_mline_index, Some(1));
                assert_eq!(candidate.username_fragment.as_deref(), Some("abcd"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_untyped_candidate_is_rejected() {
        let result = SignalMessage::decode(r#"{"candidate":{"candidate":"candidate:0"}}"#);
        assert!(matches!(result, Err(CallError::Codec(_))));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(SignalMessage::decode(r#"{"type":"bye"}"#).is_err());
    }
}
