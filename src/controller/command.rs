//! Kommandos zwischen `CallController` und Worker

use crate::error::CallError;
use crate::session::{CallInvitation, CallLayout, CallSettingsPatch, CallType};
use crate::translation::SubtitleData;
use tokio::sync::oneshot;

#[derive(Debug)]
pub(crate) enum Command {
    Connect { call_id: String },
    Disconnect,
    AcceptCall,
    DeclineCall { reason: Option<String> },
    SetMuted(bool),
    ToggleCamera,
    ToggleScreenShare,
    EndCall,
    StartRecording,
    StopRecording,
    PauseRecording,
    ResumeRecording,
    ChangeLayout(CallLayout),
    ToggleTranslation,
    ChangeLanguage(String),
    AdjustVolume { participant_id: String, volume: u8 },
    KickParticipant { participant_id: String },
    InviteParticipant { peer_id: String, call_type: CallType },
    UpdateSettings(CallSettingsPatch),
    PushSubtitle(SubtitleData),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Command::Connect { .. } => "connect",
            Command::Disconnect => "disconnect",
            Command::AcceptCall => "accept_call",
            Command::DeclineCall { .. } => "decline_call",
            Command::SetMuted(true) => "mute",
            Command::SetMuted(false) => "unmute",
            Command::ToggleCamera => "toggle_camera",
            Command::ToggleScreenShare => "toggle_screen_share",
            Command::EndCall => "end_call",
            Command::StartRecording => "start_recording",
            Command::StopRecording => "stop_recording",
            Command::PauseRecording => "pause_recording",
            Command::ResumeRecording => "resume_recording",
            Command::ChangeLayout(_) => "change_layout",
            Command::ToggleTranslation => "toggle_translation",
            Command::ChangeLanguage(_) => "change_language",
            Command::AdjustVolume { .. } => "adjust_volume",
            Command::KickParticipant { .. } => "kick_participant",
            Command::InviteParticipant { .. } => "invite_participant",
            Command::UpdateSettings(_) => "update_settings",
            Command::PushSubtitle(_) => "push_subtitle",
        }
    }
}

#[derive(Debug)]
pub(crate) enum CommandReply {
    Done,
    Invitation(CallInvitation),
    /// Ob der Untertitel sichtbar gemacht wurde
    Subtitle(bool),
}

pub(crate) type ReplySender = oneshot::Sender<Result<CommandReply, CallError>>;

#[derive(Debug)]
pub(crate) struct Envelope {
    pub command: Command,
    pub reply: ReplySender,
}
