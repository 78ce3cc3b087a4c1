//! CallController Handle
//!
//! Öffentliche API eines Anrufs. Der Handle ist `Clone` und schickt
//! Kommandos an den Worker; Lesezugriffe gehen direkt auf Store und Overlay.

use super::command::{Command, CommandReply, Envelope};
use super::events::CallEvent;
use super::worker::{Inbox, Worker};
use crate::config::ControllerConfig;
use crate::error::CallError;
use crate::media::MediaPipeline;
use crate::session::{
    CallInvitation, CallLayout, CallSettings, CallSettingsPatch, CallState, CallStatus, CallType,
    Participant, SessionStore, Subscription,
};
use crate::signaling::SignalingClient;
use crate::translation::{SubtitleData, TranslationOverlay};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Steuert genau einen Anruf
#[derive(Clone)]
pub struct CallController {
    commands: mpsc::Sender<Envelope>,
    subtitles: mpsc::Sender<SubtitleData>,
    store: Arc<SessionStore>,
    overlay: Arc<RwLock<TranslationOverlay>>,
    events: broadcast::Sender<CallEvent>,
}

impl CallController {
    /// Erstellt den Store für einen neuen Anruf und startet den Worker.
    ///
    /// Muss innerhalb einer Tokio-Runtime aufgerufen werden.
    pub fn spawn(
        local: Participant,
        settings: CallSettings,
        signaling: Arc<dyn SignalingClient>,
        media: Arc<dyn MediaPipeline>,
        config: ControllerConfig,
    ) -> Result<Self, CallError> {
        let overlay = Arc::new(RwLock::new(TranslationOverlay::new(
            settings.translation.enabled,
        )));
        let store = Arc::new(SessionStore::new(CallState::new(local, settings))?);

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let (subtitle_tx, subtitle_rx) = mpsc::channel(config.command_capacity.max(1));

        // vor dem Spawn abonnieren, damit kein Event verloren geht
        let inbox = Inbox {
            commands: command_rx,
            subtitles: subtitle_rx,
            signaling: signaling.subscribe(),
            media: media.subscribe(),
        };

        let (worker, outcomes) = Worker::new(
            Arc::clone(&store),
            Arc::clone(&overlay),
            signaling,
            media,
            events.clone(),
            config,
        );
        tokio::spawn(worker.run(inbox, outcomes));

        Ok(Self {
            commands: command_tx,
            subtitles: subtitle_tx,
            store,
            overlay,
            events,
        })
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn state(&self) -> CallState {
        self.store.state()
    }

    pub fn status(&self) -> CallStatus {
        self.store.with_state(|s| s.status)
    }

    pub fn store(&self) -> Arc<SessionStore> {
        Arc::clone(&self.store)
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Synchroner Listener auf State-Änderungen
    pub fn subscribe_state<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CallState) + Send + Sync + 'static,
    {
        self.store.subscribe(listener)
    }

    /// Aktuell sichtbarer Untertitel eines Teilnehmers
    pub fn current_subtitle(&self, participant_id: &str) -> Option<SubtitleData> {
        self.current_subtitle_at(participant_id, Utc::now().timestamp_millis())
    }

    pub fn current_subtitle_at(&self, participant_id: &str, now_ms: i64) -> Option<SubtitleData> {
        self.overlay
            .read()
            .current_subtitle(participant_id, now_ms)
            .cloned()
    }

    pub fn current_subtitles(&self) -> Vec<SubtitleData> {
        let now = Utc::now().timestamp_millis();
        self.overlay
            .read()
            .current_subtitles(now)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Vollständiges Transkript in Eingangsreihenfolge
    pub fn transcript(&self) -> Vec<SubtitleData> {
        self.overlay.read().transcript().cloned().collect()
    }

    /// Eingang für den Übersetzungsdienst; Fehler erscheinen als `CallEvent::Error`
    pub fn subtitle_sender(&self) -> mpsc::Sender<SubtitleData> {
        self.subtitles.clone()
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// Baut einen ausgehenden Anruf auf. Ein neuerer `connect` bricht einen
    /// laufenden mit `ConnectCancelled` ab.
    pub async fn connect(&self, call_id: impl Into<String>) -> Result<(), CallError> {
        self.execute(Command::Connect {
            call_id: call_id.into(),
        })
        .await
        .map(|_| ())
    }

    pub async fn disconnect(&self) -> Result<(), CallError> {
        self.run(Command::Disconnect).await
    }

    pub async fn accept_call(&self) -> Result<(), CallError> {
        self.run(Command::AcceptCall).await
    }

    pub async fn decline_call(&self, reason: Option<String>) -> Result<(), CallError> {
        self.run(Command::DeclineCall { reason }).await
    }

    pub async fn mute(&self) -> Result<(), CallError> {
        self.run(Command::SetMuted(true)).await
    }

    pub async fn unmute(&self) -> Result<(), CallError> {
        self.run(Command::SetMuted(false)).await
    }

    pub async fn toggle_camera(&self) -> Result<(), CallError> {
        self.run(Command::ToggleCamera).await
    }

    pub async fn toggle_screen_share(&self) -> Result<(), CallError> {
        self.run(Command::ToggleScreenShare).await
    }

    pub async fn end_call(&self) -> Result<(), CallError> {
        self.run(Command::EndCall).await
    }

    pub async fn start_recording(&self) -> Result<(), CallError> {
        self.run(Command::StartRecording).await
    }

    pub async fn stop_recording(&self) -> Result<(), CallError> {
        self.run(Command::StopRecording).await
    }

    pub async fn pause_recording(&self) -> Result<(), CallError> {
        self.run(Command::PauseRecording).await
    }

    pub async fn resume_recording(&self) -> Result<(), CallError> {
        self.run(Command::ResumeRecording).await
    }

    pub async fn change_layout(&self, layout: CallLayout) -> Result<(), CallError> {
        self.run(Command::ChangeLayout(layout)).await
    }

    pub async fn toggle_translation(&self) -> Result<(), CallError> {
        self.run(Command::ToggleTranslation).await
    }

    pub async fn change_language(&self, language: impl Into<String>) -> Result<(), CallError> {
        self.run(Command::ChangeLanguage(language.into())).await
    }

    pub async fn adjust_volume(
        &self,
        participant_id: impl Into<String>,
        volume: u8,
    ) -> Result<(), CallError> {
        self.run(Command::AdjustVolume {
            participant_id: participant_id.into(),
            volume,
        })
        .await
    }

    pub async fn kick_participant(&self, participant_id: impl Into<String>) -> Result<(), CallError> {
        self.run(Command::KickParticipant {
            participant_id: participant_id.into(),
        })
        .await
    }

    pub async fn invite_participant(
        &self,
        peer_id: impl Into<String>,
        call_type: CallType,
    ) -> Result<CallInvitation, CallError> {
        match self
            .execute(Command::InviteParticipant {
                peer_id: peer_id.into(),
                call_type,
            })
            .await?
        {
            CommandReply::Invitation(invitation) => Ok(invitation),
            other => Err(unexpected_reply(other)),
        }
    }

    pub async fn update_settings(&self, patch: CallSettingsPatch) -> Result<(), CallError> {
        self.run(Command::UpdateSettings(patch)).await
    }

    /// Hängt einen Untertitel an und gibt zurück, ob er sichtbar wurde
    pub async fn push_subtitle(&self, subtitle: SubtitleData) -> Result<bool, CallError> {
        match self.execute(Command::PushSubtitle(subtitle)).await? {
            CommandReply::Subtitle(surfaced) => Ok(surfaced),
            other => Err(unexpected_reply(other)),
        }
    }

    async fn run(&self, command: Command) -> Result<(), CallError> {
        self.execute(command).await.map(|_| ())
    }

    async fn execute(&self, command: Command) -> Result<CommandReply, CallError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Envelope { command, reply })
            .await
            .map_err(|_| CallError::ControllerClosed)?;

        response.await.map_err(|_| CallError::ControllerClosed)?
    }
}

fn unexpected_reply(reply: CommandReply) -> CallError {
    CallError::InvalidState(format!("unexpected controller reply: {reply:?}"))
}

impl std::fmt::Debug for CallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallController")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
