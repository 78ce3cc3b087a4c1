//! Events des CallControllers
//!
//! Werden über `tokio::sync::broadcast` an alle Subscriber verteilt.

use crate::error::CallError;
use crate::history::CallHistory;
use crate::session::{
    CallInvitation, CallLayout, CallSettings, CallStatus, NetworkStats, Participant,
    ParticipantId, RecordingState,
};
use crate::translation::SubtitleData;

#[derive(Debug, Clone)]
pub enum CallEvent {
    StatusChanged { from: CallStatus, to: CallStatus },

    ParticipantJoined(Participant),

    ParticipantLeft { participant_id: ParticipantId },

    /// Vom lokalen Teilnehmer entfernt
    ParticipantKicked { participant_id: ParticipantId },

    ParticipantMuted {
        participant_id: ParticipantId,
        muted: bool,
    },

    CameraToggled {
        participant_id: ParticipantId,
        enabled: bool,
    },

    ScreenShareToggled {
        participant_id: ParticipantId,
        active: bool,
    },

    ParticipantVolumeChanged {
        participant_id: ParticipantId,
        volume: u8,
    },

    /// `None` nach `stop_recording`
    RecordingChanged(Option<RecordingState>),

    LayoutChanged(CallLayout),

    TranslationToggled(bool),

    LanguageChanged { language: String },

    SettingsChanged(CallSettings),

    /// Neuer sichtbarer Untertitel
    SubtitleReceived(SubtitleData),

    /// Eingehender Anruf, Status ist jetzt `ringing`
    IncomingCall(CallInvitation),

    ParticipantInvited(CallInvitation),

    /// Eine Einladung wurde angenommen, abgelehnt, ist abgelaufen oder zurückgezogen
    InvitationUpdated(CallInvitation),

    NetworkStatsUpdated(NetworkStats),

    /// Genau einmal pro Anruf, nach dem terminalen `StatusChanged`
    CallEnded(CallHistory),

    Error(CallError),
}

impl CallEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, CallEvent::Error(_))
    }
}
