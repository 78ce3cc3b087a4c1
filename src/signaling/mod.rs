//! Signaling Module - Steuerkanal zum Koordinations-Server
//!
//! Dieses Modul definiert den Vertrag, den der CallController konsumiert:
//! - `SignalingClient` Trait (join/leave, Offer/Answer/ICE, Media-State)
//! - `SignalingEvent` für entfernte Ereignisse
//! - eine WebSocket-Implementierung mit signierten Nachrichten
//!

mod client;
mod messages;

pub use client::{ReconnectPolicy, WebSocketSignalingClient};
pub use messages::*;

use crate::session::{CallInvitation, CallType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Not joined to a call")]
    NotInCall,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Server error: {code} - {message}")]
    ServerError { code: i32, message: String },
}

// ============================================================================
// SIGNALING EVENTS
// ============================================================================

/// Entfernter Teilnehmer, wie ihn der Server meldet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePeer {
    pub peer_id: String,
    pub username: String,
    pub language: String,
}

/// Media-Zustand eines Teilnehmers, wird an alle im Call verteilt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaState {
    pub muted: bool,
    pub camera_on: bool,
    pub screen_sharing: bool,
}

/// Events die vom SignalingClient ausgelöst werden
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// Verbunden mit Signaling-Server
    Connected,

    /// Verbindung vorübergehend getrennt, Wiederverbindung läuft
    Disconnected,

    /// Verbindung wiederhergestellt
    Reconnected,

    /// Verbindung endgültig verloren
    ConnectionLost { reason: String },

    /// Eingehender Anruf mit SDP Offer
    IncomingCall {
        call_id: String,
        from: RemotePeer,
        call_type: CallType,
        sdp: String,
        expires_at: DateTime<Utc>,
    },

    /// SDP Answer erhalten
    AnswerReceived { from: RemotePeer, sdp: String },

    /// ICE Candidate erhalten
    IceCandidateReceived {
        from_peer_id: String,
        candidate: String,
    },

    /// Teilnehmer ist dem Call beigetreten
    ParticipantJoined(RemotePeer),

    /// Teilnehmer hat den Call verlassen
    ParticipantLeft { peer_id: String },

    /// Mute/Kamera/Screen-Share eines Teilnehmers geändert
    MediaStateChanged { peer_id: String, state: MediaState },

    /// Anruf abgelehnt
    CallRejected {
        by_peer_id: String,
        reason: Option<String>,
    },

    /// Lokaler Teilnehmer wurde entfernt
    Kicked { by_peer_id: String },

    /// Fehler vom Server
    Error { code: i32, message: String },
}

// ============================================================================
// CLIENT CONTRACT
// ============================================================================

/// Steuerkanal eines Anrufs. Transport und Wire-Format sind Sache der Implementierung.
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Gibt einen Event-Receiver zurück
    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent>;

    /// Eigene Peer-ID (falls registriert)
    fn local_peer_id(&self) -> Option<String>;

    async fn join(&self, call_id: &str) -> Result<(), SignalingError>;

    async fn leave(&self) -> Result<(), SignalingError>;

    /// Offer an alle Teilnehmer des aktuellen Calls
    async fn send_offer(&self, sdp: String) -> Result<(), SignalingError>;

    async fn send_answer(&self, to_peer_id: &str, sdp: String) -> Result<(), SignalingError>;

    async fn send_ice_candidate(&self, candidate: String) -> Result<(), SignalingError>;

    async fn send_media_state(&self, state: MediaState) -> Result<(), SignalingError>;

    async fn reject_call(
        &self,
        call_id: &str,
        to_peer_id: &str,
        reason: Option<String>,
    ) -> Result<(), SignalingError>;

    async fn kick(&self, peer_id: &str) -> Result<(), SignalingError>;

    async fn invite(&self, invitation: &CallInvitation) -> Result<(), SignalingError>;
}
