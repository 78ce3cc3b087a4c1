//! Message Types für das Signaling-Protokoll
//!
//! JSON-Textframes mit `type`-Tag in snake_case und camelCase-Feldern.
//! Client-Nachrichten werden vor dem Senden mit `timestamp` und `signature`
//! ergänzt (siehe `KeyPair::sign_message`).

use crate::session::{CallInvitation, CallType};
use serde::{Deserialize, Serialize};

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Register {
        username: String,
        public_key: String,
        language: String,
    },

    #[serde(rename_all = "camelCase")]
    JoinCall { peer_id: String, call_id: String },

    #[serde(rename_all = "camelCase")]
    LeaveCall { peer_id: String, call_id: String },

    #[serde(rename_all = "camelCase")]
    Offer {
        from_peer_id: String,
        call_id: String,
        sdp: String,
    },

    #[serde(rename_all = "camelCase")]
    Answer {
        from_peer_id: String,
        to_peer_id: String,
        call_id: String,
        sdp: String,
    },

    #[serde(rename_all = "camelCase")]
    IceCandidate {
        from_peer_id: String,
        call_id: String,
        candidate: String,
    },

    #[serde(rename_all = "camelCase")]
    MediaState {
        peer_id: String,
        call_id: String,
        muted: bool,
        camera_on: bool,
        screen_sharing: bool,
    },

    #[serde(rename_all = "camelCase")]
    RejectCall {
        from_peer_id: String,
        to_peer_id: String,
        call_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Kick {
        from_peer_id: String,
        target_peer_id: String,
        call_id: String,
    },

    #[serde(rename_all = "camelCase")]
    Invite {
        from_peer_id: String,
        to_peer_id: String,
        call_id: String,
        invitation_id: String,
        call_type: CallType,
        /// Millisekunden seit Unix-Epoch
        expires_at: i64,
    },

    #[serde(rename_all = "camelCase")]
    Heartbeat { peer_id: String },
}

impl ClientMessage {
    pub fn invite(from_peer_id: String, invitation: &CallInvitation) -> Self {
        ClientMessage::Invite {
            from_peer_id,
            to_peer_id: invitation.to.clone(),
            call_id: invitation.call_id.clone(),
            invitation_id: invitation.id.clone(),
            call_type: invitation.call_type,
            expires_at: invitation.expires_at.timestamp_millis(),
        }
    }
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

/// Teilnehmer-Info wie sie der Server liefert
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub peer_id: String,
    pub username: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "auto".to_string()
}

/// Alle möglichen Server-Nachrichten
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Erfolgreiche Registrierung
    #[serde(rename_all = "camelCase")]
    Registered {
        peer_id: String,
        username: String,
        timestamp: i64,
    },

    /// Call beigetreten, mit allen bereits anwesenden Teilnehmern
    #[serde(rename_all = "camelCase")]
    CallJoined {
        call_id: String,
        #[serde(default)]
        participants: Vec<PeerInfo>,
    },

    /// Eingehender Anruf
    #[serde(rename_all = "camelCase")]
    IncomingCall {
        call_id: String,
        from_peer_id: String,
        from_username: String,
        #[serde(default = "default_language")]
        from_language: String,
        #[serde(default)]
        call_type: CallType,
        sdp: String,
        expires_at: i64,
    },

    /// Eingehendes SDP Answer
    #[serde(rename_all = "camelCase")]
    IncomingAnswer {
        from_peer_id: String,
        from_username: String,
        #[serde(default = "default_language")]
        from_language: String,
        sdp: String,
    },

    /// Eingehender ICE Candidate
    #[serde(rename_all = "camelCase")]
    IncomingIceCandidate {
        from_peer_id: String,
        candidate: String,
    },

    ParticipantJoined(PeerInfo),

    #[serde(rename_all = "camelCase")]
    ParticipantLeft { peer_id: String },

    #[serde(rename_all = "camelCase")]
    ParticipantMediaState {
        peer_id: String,
        muted: bool,
        camera_on: bool,
        screen_sharing: bool,
    },

    /// Anruf wurde abgelehnt
    #[serde(rename_all = "camelCase")]
    CallRejected {
        by_peer_id: String,
        reason: Option<String>,
    },

    /// Lokaler Teilnehmer wurde aus dem Call entfernt
    #[serde(rename_all = "camelCase")]
    Kicked { by_peer_id: String },

    /// Fehler
    Error { code: i32, message: String },

    /// Heartbeat Antwort
    Pong { timestamp: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_client_message_wire_format() {
        let msg = ClientMessage::Answer {
            from_peer_id: "a".to_string(),
            to_peer_id: "b".to_string(),
            call_id: "call-1".to_string(),
            sdp: "v=0".to_string(),
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "answer");
        assert_eq!(json["fromPeerId"], "a");
        assert_eq!(json["toPeerId"], "b");
        assert_eq!(json["callId"], "call-1");
    }

    #[test]
    fn test_reject_without_reason_omits_field() {
        let msg = ClientMessage::RejectCall {
            from_peer_id: "a".to_string(),
            to_peer_id: "b".to_string(),
            call_id: "call-1".to_string(),
            reason: None,
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "reject_call");
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn test_invite_carries_expiry_in_millis() {
        let invitation = CallInvitation::new(
            "call-1",
            "a",
            "Alice",
            "b",
            CallType::Audio,
            Duration::seconds(30),
        );
        let json = serde_json::to_value(ClientMessage::invite("a".into(), &invitation)).unwrap();

        assert_eq!(json["callType"], "audio");
        assert_eq!(json["expiresAt"], invitation.expires_at.timestamp_millis());
    }

    #[test]
    fn test_parse_incoming_call() {
        let raw = r#"{
            "type": "incoming_call",
            "callId": "call-9",
            "fromPeerId": "bob-peer",
            "fromUsername": "bob",
            "callType": "audio",
            "sdp": "v=0",
            "expiresAt": 1700000000000,
            "timestamp": 1699999990000
        }"#;

        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            ServerMessage::IncomingCall {
                call_id: "call-9".to_string(),
                from_peer_id: "bob-peer".to_string(),
                from_username: "bob".to_string(),
                from_language: "auto".to_string(),
                call_type: CallType::Audio,
                sdp: "v=0".to_string(),
                expires_at: 1_700_000_000_000,
            }
        );
    }

    #[test]
    fn test_parse_participant_joined_newtype() {
        let raw = r#"{"type":"participant_joined","peerId":"c","username":"carol","language":"fr"}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            ServerMessage::ParticipantJoined(PeerInfo {
                peer_id: "c".to_string(),
                username: "carol".to_string(),
                language: "fr".to_string(),
            })
        );
    }
}
