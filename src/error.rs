//! Fehler-Taxonomie der Call-Session
//!
//! Alle Fehler, die der CallController, der SessionStore und das
//! Translation-Overlay nach außen geben. Verbindungsfehler aus Signaling
//! und Media werden unverändert durchgereicht.

use crate::media::MediaError;
use crate::session::CallStatus;
use crate::signaling::SignalingError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: CallStatus, to: CallStatus },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Recording is already running")]
    AlreadyRecording,

    #[error("No recording in progress")]
    NotRecording,

    #[error("Call has ended")]
    CallEnded,

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("Invalid volume {0}, expected 0-100")]
    InvalidVolume(u8),

    #[error("Invalid language code: {0:?}")]
    InvalidLanguage(String),

    #[error("Invitation expired: {0}")]
    InvitationExpired(String),

    #[error("No pending invitation")]
    NoPendingInvitation,

    #[error("Connect was cancelled by a newer request")]
    ConnectCancelled,

    #[error("Subtitle for {participant_id} at {timestamp} is not newer than {last}")]
    OutOfOrderSubtitle {
        participant_id: String,
        timestamp: i64,
        last: i64,
    },

    #[error("Call controller is no longer running")]
    ControllerClosed,
}

impl CallError {
    /// Illegale Transition oder Kommando im falschen Zustand
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            CallError::InvalidTransition { .. } | CallError::InvalidState(_)
        )
    }

    /// Fehler aus der Signaling- oder Media-Schicht
    pub fn is_connection_error(&self) -> bool {
        matches!(self, CallError::Signaling(_) | CallError::Media(_))
    }
}
