//! Controller Worker
//!
//! Einziger Writer des `SessionStore`. Kommandos, Connect-Ergebnisse,
//! Signaling- und Media-Events, Untertitel und Timer werden über ein
//! `tokio::select!` gemultiplext und strikt nacheinander verarbeitet.
//!
//! Jedes Kommando prüft seine Vorbedingungen, führt die Seiteneffekte aus und
//! schreibt danach genau ein `SessionStore::update`. Schlägt es fehl, bleibt
//! der State unverändert und es wird nur `CallEvent::Error` gesendet.

use super::command::{Command, CommandReply, Envelope, ReplySender};
use super::events::CallEvent;
use crate::config::ControllerConfig;
use crate::error::CallError;
use crate::history::{CallHistory, HistoryParticipant};
use crate::media::{
    LocalStream, MediaConnectionState, MediaError, MediaEvent, MediaPipeline, MediaStreamConfig,
};
use crate::session::{
    CallInvitation, CallLayout, CallSettingsPatch, CallState, CallStatePatch, CallStatus,
    CallType, Participant, RecordingState, SessionStore,
};
use crate::signaling::{MediaState, RemotePeer, SignalingClient, SignalingError, SignalingEvent};
use crate::translation::{is_valid_language_code, SubtitleData, TranslationOverlay};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

// ============================================================================
// WORKER STATE
// ============================================================================

/// Ergebnis eines gespawnten Connects, mit Epoche markiert
pub(crate) struct ConnectOutcome {
    epoch: u64,
    call_id: String,
    /// Mute-Zustand, den der Task auf den Stream angewendet hat
    muted: bool,
    result: Result<LocalStream, CallError>,
}

struct PendingConnect {
    epoch: u64,
    task: JoinHandle<()>,
    reply: ReplySender,
}

/// Eingehender Anruf im Status `ringing`
struct IncomingCall {
    invitation: CallInvitation,
    from: RemotePeer,
    sdp: String,
}

/// Eingänge des Workers
pub(crate) struct Inbox {
    pub commands: mpsc::Receiver<Envelope>,
    pub subtitles: mpsc::Receiver<SubtitleData>,
    pub signaling: broadcast::Receiver<SignalingEvent>,
    pub media: broadcast::Receiver<MediaEvent>,
}

pub(crate) struct Worker {
    store: Arc<SessionStore>,
    overlay: Arc<RwLock<TranslationOverlay>>,
    signaling: Arc<dyn SignalingClient>,
    media: Arc<dyn MediaPipeline>,
    events: broadcast::Sender<CallEvent>,
    config: ControllerConfig,

    epoch: u64,
    pending_connect: Option<PendingConnect>,
    outcome_tx: mpsc::UnboundedSender<ConnectOutcome>,

    incoming: Option<IncomingCall>,
    /// Offene ausgehende Einladungen
    invitations: Vec<CallInvitation>,
    ring_deadline: Option<Instant>,
    has_local_stream: bool,
    /// Kamerawunsch, solange noch kein lokaler Stream existiert
    camera_intent: Option<bool>,
    /// Mindestens ein Answer auf das eigene Offer ist eingegangen
    answered: bool,

    /// Alle Teilnehmer, die jemals im Call waren
    roster: Vec<HistoryParticipant>,
    was_recorded: bool,
}

impl Worker {
    pub(crate) fn new(
        store: Arc<SessionStore>,
        overlay: Arc<RwLock<TranslationOverlay>>,
        signaling: Arc<dyn SignalingClient>,
        media: Arc<dyn MediaPipeline>,
        events: broadcast::Sender<CallEvent>,
        config: ControllerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectOutcome>) {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let roster = store.with_state(|s| {
            s.local_participant()
                .map(HistoryParticipant::from)
                .into_iter()
                .collect()
        });

        let worker = Self {
            store,
            overlay,
            signaling,
            media,
            events,
            config,
            epoch: 0,
            pending_connect: None,
            outcome_tx,
            incoming: None,
            invitations: Vec::new(),
            ring_deadline: None,
            has_local_stream: false,
            camera_intent: None,
            answered: false,
            roster,
            was_recorded: false,
        };
        (worker, outcome_rx)
    }

    pub(crate) async fn run(
        mut self,
        mut inbox: Inbox,
        mut outcomes: mpsc::UnboundedReceiver<ConnectOutcome>,
    ) {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stats_enabled = self.config.stats_interval.is_some();
        let mut stats = tokio::time::interval(
            self.config
                .stats_interval
                .unwrap_or(self.config.tick_interval),
        );
        stats.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut subtitles_open = true;
        let mut signaling_open = true;
        let mut media_open = true;

        tracing::debug!("Call controller worker started");

        loop {
            tokio::select! {
                envelope = inbox.commands.recv() => match envelope {
                    Some(Envelope { command, reply }) => self.dispatch(command, reply).await,
                    None => break,
                },

                Some(outcome) = outcomes.recv() => self.on_connect_outcome(outcome).await,

                subtitle = inbox.subtitles.recv(), if subtitles_open => match subtitle {
                    Some(subtitle) => {
                        if let Err(e) = self.push_subtitle(subtitle).await {
                            tracing::warn!("Rejected subtitle: {}", e);
                            self.emit(CallEvent::Error(e));
                        }
                    }
                    None => subtitles_open = false,
                },

                event = inbox.signaling.recv(), if signaling_open => match event {
                    Ok(event) => self.on_signaling_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Controller missed {} signaling events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => signaling_open = false,
                },

                event = inbox.media.recv(), if media_open => match event {
                    Ok(event) => self.on_media_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Controller missed {} media events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => media_open = false,
                },

                _ = tick.tick() => self.on_tick().await,

                _ = stats.tick(), if stats_enabled => self.poll_network_stats().await,
            }
        }

        self.shutdown().await;
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }

    fn status(&self) -> CallStatus {
        self.store.with_state(|s| s.status)
    }

    /// Schreibt einen Patch und sendet danach die Events.
    ///
    /// Reihenfolge: übergebene Events, `StatusChanged`, bei terminalem Status `CallEnded`.
    fn commit(
        &mut self,
        patch: CallStatePatch,
        events: Vec<CallEvent>,
    ) -> Result<CallState, CallError> {
        let from = self.status();
        let state = self.store.update(patch)?;

        for event in events {
            self.emit(event);
        }

        if state.status != from {
            tracing::info!("Call status: {} -> {}", from, state.status);
            self.emit(CallEvent::StatusChanged {
                from,
                to: state.status,
            });

            if state.status.is_terminal() {
                self.finish(&state);
            }
        }

        Ok(state)
    }

    fn finish(&mut self, state: &CallState) {
        self.ring_deadline = None;

        let transcript_entries = self.overlay.read().len();
        if let Some(history) = CallHistory::from_state(
            state,
            self.roster.clone(),
            self.was_recorded,
            transcript_entries,
        ) {
            tracing::info!(
                "Call {} finished as {} after {} ms",
                history.call_id,
                history.final_status,
                history.duration_ms
            );
            self.emit(CallEvent::CallEnded(history));
        }
    }

    fn remember(&mut self, participant: &Participant) {
        if !self.roster.iter().any(|p| p.id == participant.id) {
            self.roster.push(HistoryParticipant::from(participant));
        }
    }

    /// Löst eine offene ausgehende Einladung an `peer_id` auf
    fn resolve_invitation(&mut self, peer_id: &str, accepted: bool) -> Option<CallInvitation> {
        let index = self.invitations.iter().position(|i| i.to == peer_id)?;
        let mut invitation = self.invitations.remove(index);

        let now = Utc::now();
        // nach Ablauf endet die Einladung als `expired`
        let _ = if accepted {
            invitation.accept(now)
        } else {
            invitation.decline(now)
        };
        Some(invitation)
    }

    async fn broadcast_media_state(&self) {
        let state = self.store.state();
        if !matches!(
            state.status,
            CallStatus::Calling | CallStatus::Connected | CallStatus::Reconnecting
        ) {
            return;
        }
        let Some(local) = state.local_participant() else {
            return;
        };

        let media_state = MediaState {
            muted: local.is_muted,
            camera_on: local.is_camera_on,
            screen_sharing: local.is_screen_sharing,
        };
        if let Err(e) = self.signaling.send_media_state(media_state).await {
            tracing::warn!("Failed to broadcast media state: {}", e);
        }
    }

    async fn renegotiate(&self) {
        match self.media.create_offer().await {
            Ok(offer) => {
                if let Err(e) = self.signaling.send_offer(offer).await {
                    tracing::warn!("Failed to send renegotiation offer: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to create renegotiation offer: {}", e),
        }
    }

    /// Fährt den Anruf lokal herunter und schreibt den terminalen Status.
    ///
    /// Fehler von `leave`/`close` werden nur als `CallEvent::Error` gemeldet.
    async fn teardown(
        &mut self,
        patch: CallStatePatch,
        mut events: Vec<CallEvent>,
    ) -> Result<CallState, CallError> {
        self.cancel_pending_connect();

        let mut patch = patch.ended_at(Utc::now());
        if self.store.with_state(|s| s.is_recording()) {
            if let Err(e) = self.media.stop_recording().await {
                tracing::warn!("Failed to stop recording: {}", e);
            }
            patch = patch.recording(None);
        }

        if let Err(e) = self.signaling.leave().await {
            tracing::warn!("Failed to leave call: {}", e);
            self.emit(CallEvent::Error(e.into()));
        }
        if let Err(e) = self.media.close().await {
            tracing::warn!("Failed to close media: {}", e);
            self.emit(CallEvent::Error(e.into()));
        }

        self.has_local_stream = false;
        self.camera_intent = None;
        self.answered = false;
        self.incoming = None;
        self.ring_deadline = None;

        let now = Utc::now();
        for mut invitation in self.invitations.drain(..) {
            let _ = invitation.cancel(now);
            events.push(CallEvent::InvitationUpdated(invitation));
        }

        self.commit(patch, events)
    }

    async fn after_connected(&mut self) {
        let auto_record = self
            .store
            .with_state(|s| s.settings.recording.auto_record && s.recording.is_none());

        if auto_record {
            tracing::info!("Auto-recording enabled, starting recording");
            if let Err(e) = self.start_recording().await {
                tracing::warn!("Auto-recording failed: {}", e);
                self.emit(CallEvent::Error(e));
            }
        }
    }

    async fn shutdown(&mut self) {
        let status = self.status();
        if status != CallStatus::Idle && !status.is_terminal() {
            tracing::info!("Controller dropped while {}, tearing down", status);
            let patch = CallStatePatch::new().status(closing_status(status));
            if let Err(e) = self.teardown(patch, Vec::new()).await {
                tracing::warn!("Teardown on shutdown failed: {}", e);
            }
        } else {
            self.abort_pending_connect().await;
        }
        tracing::debug!("Call controller worker stopped");
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    async fn dispatch(&mut self, command: Command, reply: ReplySender) {
        let name = command.name();
        tracing::debug!("Command: {}", name);

        let command = match command {
            Command::Connect { call_id } => {
                self.start_connect(call_id, reply).await;
                return;
            }
            other => other,
        };

        let result = self.execute(command).await;
        if let Err(e) = &result {
            tracing::warn!("Command {} failed: {}", name, e);
            self.emit(CallEvent::Error(e.clone()));
        }
        let _ = reply.send(result);
    }

    async fn execute(&mut self, command: Command) -> Result<CommandReply, CallError> {
        let command = match command {
            Command::PushSubtitle(subtitle) => {
                return self
                    .push_subtitle(subtitle)
                    .await
                    .map(CommandReply::Subtitle)
            }
            other => other,
        };

        if self.status().is_terminal() {
            return Err(CallError::CallEnded);
        }

        let result = match command {
            Command::Disconnect => self.disconnect().await,
            Command::AcceptCall => self.accept_call().await,
            Command::DeclineCall { reason } => self.decline_call(reason).await,
            Command::SetMuted(muted) => self.set_muted(muted).await,
            Command::ToggleCamera => self.toggle_camera().await,
            Command::ToggleScreenShare => self.toggle_screen_share().await,
            Command::EndCall => self.end_call().await,
            Command::StartRecording => self.start_recording().await,
            Command::StopRecording => self.stop_recording().await,
            Command::PauseRecording => self.pause_recording().await,
            Command::ResumeRecording => self.resume_recording().await,
            Command::ChangeLayout(layout) => self.change_layout(layout),
            Command::ToggleTranslation => self.toggle_translation(),
            Command::ChangeLanguage(language) => self.change_language(language),
            Command::AdjustVolume {
                participant_id,
                volume,
            } => self.adjust_volume(participant_id, volume).await,
            Command::KickParticipant { participant_id } => {
                self.kick_participant(participant_id).await
            }
            Command::InviteParticipant { peer_id, call_type } => {
                return self
                    .invite_participant(peer_id, call_type)
                    .await
                    .map(CommandReply::Invitation)
            }
            Command::UpdateSettings(patch) => self.update_settings(patch),
            Command::Connect { .. } | Command::PushSubtitle(_) => Err(CallError::InvalidState(
                "command must not reach execute".to_string(),
            )),
        };

        result.map(|()| CommandReply::Done)
    }

    // ------------------------------------------------------------------------
    // connect / disconnect
    // ------------------------------------------------------------------------

    async fn start_connect(&mut self, call_id: String, reply: ReplySender) {
        let state = self.store.state();

        let check = if state.status.is_terminal() {
            Err(CallError::CallEnded)
        } else if state.status != CallStatus::Idle {
            Err(CallError::InvalidState(format!(
                "cannot connect while {}",
                state.status
            )))
        } else if call_id.trim().is_empty() {
            Err(CallError::InvalidState("call id must not be empty".to_string()))
        } else {
            Ok(())
        };

        if let Err(e) = check {
            tracing::warn!("Command connect failed: {}", e);
            self.emit(CallEvent::Error(e.clone()));
            let _ = reply.send(Err(e));
            return;
        }

        // ein neuerer Connect ersetzt den laufenden
        self.abort_pending_connect().await;

        self.epoch += 1;
        let epoch = self.epoch;
        let stream_config = MediaStreamConfig::from_settings(&state.settings);
        let muted = state.local_participant().is_some_and(|p| p.is_muted);
        let signaling = Arc::clone(&self.signaling);
        let media = Arc::clone(&self.media);
        let outcome_tx = self.outcome_tx.clone();

        tracing::info!("Connecting to call {} (epoch {})", call_id, epoch);

        let task = tokio::spawn(async move {
            let result = open_outgoing_call(
                signaling.as_ref(),
                media.as_ref(),
                &call_id,
                &stream_config,
                muted,
            )
            .await;
            let _ = outcome_tx.send(ConnectOutcome {
                epoch,
                call_id,
                muted,
                result,
            });
        });

        self.pending_connect = Some(PendingConnect { epoch, task, reply });
    }

    /// Bricht einen laufenden Connect ab; `true`, wenn einer lief
    fn cancel_pending_connect(&mut self) -> bool {
        let Some(pending) = self.pending_connect.take() else {
            return false;
        };
        tracing::info!("Cancelling pending connect (epoch {})", pending.epoch);
        pending.task.abort();
        self.emit(CallEvent::Error(CallError::ConnectCancelled));
        let _ = pending.reply.send(Err(CallError::ConnectCancelled));
        true
    }

    /// Wie `cancel_pending_connect`, räumt aber auch Join und Stream
    /// des abgebrochenen Tasks ab
    async fn abort_pending_connect(&mut self) {
        if self.cancel_pending_connect() {
            self.release_call_resources().await;
        }
    }

    /// Best-effort `leave` + `close` für halb aufgebaute Anrufe
    async fn release_call_resources(&self) {
        if let Err(e) = self.signaling.leave().await {
            tracing::warn!("Failed to leave half-open call: {}", e);
        }
        if let Err(e) = self.media.close().await {
            tracing::warn!("Failed to close half-open media: {}", e);
        }
    }

    /// Wendet Mute und Kamera an, die sich geändert haben, während der
    /// Stream aufgebaut wurde. Liefert, ob die Kamera an ist.
    async fn reconcile_local_media(
        &self,
        stream: &LocalStream,
        applied_muted: bool,
    ) -> Result<bool, CallError> {
        let muted = self
            .store
            .with_state(|s| s.local_participant().is_some_and(|p| p.is_muted));
        if stream.has_audio && muted != applied_muted {
            tracing::debug!("Applying mute={} to the new local stream", muted);
            self.media.set_audio_enabled(!muted).await?;
        }

        let camera_on = stream.has_video && self.camera_intent.unwrap_or(true);
        if stream.has_video && !camera_on {
            self.media.set_video_enabled(false).await?;
        }
        Ok(camera_on)
    }

    async fn on_connect_outcome(&mut self, outcome: ConnectOutcome) {
        let pending = match self.pending_connect.take() {
            Some(pending) if pending.epoch == outcome.epoch => pending,
            other => {
                self.pending_connect = other;
                tracing::debug!("Discarding stale connect outcome (epoch {})", outcome.epoch);
                return;
            }
        };

        let result = match outcome.result {
            Ok(stream) => {
                self.finish_outgoing_call(outcome.call_id, stream, outcome.muted)
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            tracing::warn!("Command connect failed: {}", e);
            self.emit(CallEvent::Error(e.clone()));
        }
        let _ = pending.reply.send(result.map(|()| CommandReply::Done));
    }

    async fn finish_outgoing_call(
        &mut self,
        call_id: String,
        stream: LocalStream,
        applied_muted: bool,
    ) -> Result<(), CallError> {
        let camera_on = match self.reconcile_local_media(&stream, applied_muted).await {
            Ok(camera_on) => camera_on,
            Err(e) => {
                self.release_call_resources().await;
                return Err(e);
            }
        };

        let state = self.store.state();
        let local_id = local_id(&state)?;
        let events = camera_change(&state, &local_id, camera_on);
        let participants = update_participant(&state, &local_id, |p| {
            p.is_camera_on = camera_on;
        })?;

        self.commit(
            CallStatePatch::new()
                .call_id(call_id)
                .status(CallStatus::Calling)
                .participants(participants),
            events,
        )?;

        self.has_local_stream = true;
        self.camera_intent = None;
        self.answered = false;
        self.ring_deadline = Some(Instant::now() + self.config.ring_timeout);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), CallError> {
        match self.status() {
            CallStatus::Idle => {
                self.abort_pending_connect().await;
                Ok(())
            }
            CallStatus::Ringing => self.decline_call(None).await,
            _ => self.end_call().await,
        }
    }

    // ------------------------------------------------------------------------
    // incoming calls
    // ------------------------------------------------------------------------

    async fn accept_call(&mut self) -> Result<(), CallError> {
        let (mut invitation, from, sdp) = {
            let incoming = self.incoming.as_ref().ok_or(CallError::NoPendingInvitation)?;
            (
                incoming.invitation.clone(),
                incoming.from.clone(),
                incoming.sdp.clone(),
            )
        };

        if let Err(e) = invitation.accept(Utc::now()) {
            tracing::info!("Invitation {} expired before it was accepted", invitation.id);
            self.teardown(
                CallStatePatch::new().status(CallStatus::Failed),
                vec![CallEvent::InvitationUpdated(invitation)],
            )
            .await?;
            return Err(e);
        }

        let state = self.store.state();
        let mut stream_config = MediaStreamConfig::from_settings(&state.settings);
        if invitation.call_type == CallType::Audio {
            stream_config.video = false;
        }

        let stream = self.media.get_local_stream(&stream_config).await?;
        let camera_on = match self
            .answer_incoming_call(&stream, &invitation.call_id, &from, sdp)
            .await
        {
            Ok(camera_on) => camera_on,
            Err(e) => {
                tracing::warn!("Answering call {} failed: {}", invitation.call_id, e);
                self.release_call_resources().await;
                return Err(e);
            }
        };

        let local_id = local_id(&state)?;
        let mut events = camera_change(&state, &local_id, camera_on);
        let mut participants = update_participant(&state, &local_id, |p| {
            p.is_camera_on = camera_on;
        })?;
        let caller = Participant::remote(&from.peer_id, &from.username, &from.language);
        if state.participant(&caller.id).is_none() {
            participants.push(caller.clone());
        }

        events.push(CallEvent::InvitationUpdated(invitation));
        events.push(CallEvent::ParticipantJoined(caller.clone()));
        self.commit(
            CallStatePatch::new()
                .status(CallStatus::Connected)
                .started_at(Utc::now())
                .participants(participants),
            events,
        )?;

        self.incoming = None;
        self.has_local_stream = true;
        self.camera_intent = None;
        self.remember(&caller);
        self.after_connected().await;
        Ok(())
    }

    /// Seiteneffekte nach geöffnetem Stream; liefert, ob die Kamera an ist
    async fn answer_incoming_call(
        &self,
        stream: &LocalStream,
        call_id: &str,
        from: &RemotePeer,
        sdp: String,
    ) -> Result<bool, CallError> {
        let camera_on = self.reconcile_local_media(stream, false).await?;
        self.signaling.join(call_id).await?;
        let answer = self.media.create_answer(sdp).await?;
        self.signaling.send_answer(&from.peer_id, answer).await?;
        if let Err(e) = self.media.attach_remote_track(&from.peer_id).await {
            tracing::warn!("Failed to attach remote media of {}: {}", from.peer_id, e);
        }
        Ok(camera_on)
    }

    async fn decline_call(&mut self, reason: Option<String>) -> Result<(), CallError> {
        let incoming = self.incoming.take().ok_or(CallError::NoPendingInvitation)?;
        let mut invitation = incoming.invitation;

        if invitation.decline(Utc::now()).is_ok() {
            if let Err(e) = self
                .signaling
                .reject_call(&invitation.call_id, &incoming.from.peer_id, reason)
                .await
            {
                tracing::warn!("Failed to reject call {}: {}", invitation.call_id, e);
                self.emit(CallEvent::Error(e.into()));
            }
        }

        self.teardown(
            CallStatePatch::new().status(CallStatus::Failed),
            vec![CallEvent::InvitationUpdated(invitation)],
        )
        .await?;
        Ok(())
    }

    async fn end_call(&mut self) -> Result<(), CallError> {
        match self.status() {
            CallStatus::Idle => Err(CallError::InvalidState("no active call to end".to_string())),
            CallStatus::Ringing => self.decline_call(None).await,
            status => {
                tracing::info!("Ending call while {}", status);
                self.teardown(
                    CallStatePatch::new().status(closing_status(status)),
                    Vec::new(),
                )
                .await?;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // local media
    // ------------------------------------------------------------------------

    async fn set_muted(&mut self, muted: bool) -> Result<(), CallError> {
        let state = self.store.state();
        let local_id = local_id(&state)?;
        if state.local_participant().is_some_and(|p| p.is_muted == muted) {
            return Ok(());
        }

        if self.has_local_stream {
            self.media.set_audio_enabled(!muted).await?;
        }

        let participants = update_participant(&state, &local_id, |p| p.is_muted = muted)?;
        self.commit(
            CallStatePatch::new().participants(participants),
            vec![CallEvent::ParticipantMuted {
                participant_id: local_id,
                muted,
            }],
        )?;

        self.broadcast_media_state().await;
        Ok(())
    }

    async fn toggle_camera(&mut self) -> Result<(), CallError> {
        let state = self.store.state();
        let local_id = local_id(&state)?;
        let enabled = !state.local_participant().is_some_and(|p| p.is_camera_on);

        if self.has_local_stream {
            self.media.set_video_enabled(enabled).await?;
        } else {
            self.camera_intent = Some(enabled);
        }

        let participants = update_participant(&state, &local_id, |p| p.is_camera_on = enabled)?;
        self.commit(
            CallStatePatch::new().participants(participants),
            vec![CallEvent::CameraToggled {
                participant_id: local_id,
                enabled,
            }],
        )?;

        self.broadcast_media_state().await;
        Ok(())
    }

    async fn toggle_screen_share(&mut self) -> Result<(), CallError> {
        let state = self.store.state();
        require_connected(&state, "screen share")?;
        let local_id = local_id(&state)?;
        let active = !state.local_participant().is_some_and(|p| p.is_screen_sharing);

        if active {
            self.media.start_screen_share().await?;
        } else {
            self.media.stop_screen_share().await?;
        }

        let participants =
            update_participant(&state, &local_id, |p| p.is_screen_sharing = active)?;
        self.commit(
            CallStatePatch::new().participants(participants),
            vec![CallEvent::ScreenShareToggled {
                participant_id: local_id,
                active,
            }],
        )?;

        self.broadcast_media_state().await;
        self.renegotiate().await;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // recording
    // ------------------------------------------------------------------------

    async fn start_recording(&mut self) -> Result<(), CallError> {
        let state = self.store.state();
        if state.recording.is_some() {
            return Err(CallError::AlreadyRecording);
        }
        require_connected(&state, "recording")?;

        self.media
            .start_recording(state.settings.recording.include_translation)
            .await?;

        let recording = RecordingState::started(Utc::now());
        self.commit(
            CallStatePatch::new().recording(Some(recording.clone())),
            vec![CallEvent::RecordingChanged(Some(recording))],
        )?;
        self.was_recorded = true;
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<(), CallError> {
        if !self.store.with_state(|s| s.is_recording()) {
            return Err(CallError::NotRecording);
        }

        self.media.stop_recording().await?;
        self.commit(
            CallStatePatch::new().recording(None),
            vec![CallEvent::RecordingChanged(None)],
        )?;
        Ok(())
    }

    async fn pause_recording(&mut self) -> Result<(), CallError> {
        let recording = self
            .store
            .with_state(|s| s.recording.clone())
            .ok_or(CallError::NotRecording)?;
        if recording.is_paused() {
            return Ok(());
        }

        self.media.set_recording_paused(true).await?;
        let paused = recording.paused(Utc::now());
        self.commit(
            CallStatePatch::new().recording(Some(paused.clone())),
            vec![CallEvent::RecordingChanged(Some(paused))],
        )?;
        Ok(())
    }

    async fn resume_recording(&mut self) -> Result<(), CallError> {
        let recording = self
            .store
            .with_state(|s| s.recording.clone())
            .ok_or(CallError::NotRecording)?;
        if !recording.is_paused() {
            return Ok(());
        }

        self.media.set_recording_paused(false).await?;
        let resumed = recording.resumed(Utc::now());
        self.commit(
            CallStatePatch::new().recording(Some(resumed.clone())),
            vec![CallEvent::RecordingChanged(Some(resumed))],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // layout, translation, settings
    // ------------------------------------------------------------------------

    fn change_layout(&mut self, layout: CallLayout) -> Result<(), CallError> {
        let mut settings = self.store.with_state(|s| s.settings.clone());
        if settings.layout == layout {
            return Ok(());
        }

        settings.layout = layout;
        self.commit(
            CallStatePatch::new().settings(settings),
            vec![CallEvent::LayoutChanged(layout)],
        )?;
        Ok(())
    }

    fn toggle_translation(&mut self) -> Result<(), CallError> {
        let state = self.store.state();
        let enabled = !state.settings.translation.enabled;

        let mut settings = state.settings.clone();
        settings.translation.enabled = enabled;
        let mut translation = state.translation.clone();
        translation.enabled = enabled;

        self.commit(
            CallStatePatch::new()
                .settings(settings)
                .translation(translation),
            vec![CallEvent::TranslationToggled(enabled)],
        )?;
        self.overlay.write().set_enabled(enabled);
        Ok(())
    }

    /// Sprache des lokalen Teilnehmers, zugleich Zielsprache der Untertitel
    fn change_language(&mut self, language: String) -> Result<(), CallError> {
        if !is_valid_language_code(&language) {
            return Err(CallError::InvalidLanguage(language));
        }

        let state = self.store.state();
        let local_id = local_id(&state)?;
        let unchanged = state.settings.translation.target_language == language
            && state.local_participant().is_some_and(|p| p.language == language);
        if unchanged {
            return Ok(());
        }

        let participants =
            update_participant(&state, &local_id, |p| p.language = language.clone())?;
        let mut settings = state.settings.clone();
        settings.translation.target_language = language.clone();
        let mut translation = state.translation.clone();
        translation.target_language = language.clone();

        self.commit(
            CallStatePatch::new()
                .participants(participants)
                .settings(settings)
                .translation(translation),
            vec![CallEvent::LanguageChanged { language }],
        )?;
        Ok(())
    }

    fn update_settings(&mut self, patch: CallSettingsPatch) -> Result<(), CallError> {
        if patch.is_empty() {
            return Ok(());
        }
        if let Some(translation) = &patch.translation {
            for language in [&translation.source_language, &translation.target_language] {
                if !is_valid_language_code(language) {
                    return Err(CallError::InvalidLanguage(language.clone()));
                }
            }
        }

        let state = self.store.state();
        let settings = patch.apply(&state.settings);
        if settings == state.settings {
            return Ok(());
        }

        let mut translation = state.translation.clone();
        translation.enabled = settings.translation.enabled;
        translation.source_language = settings.translation.source_language.clone();
        translation.target_language = settings.translation.target_language.clone();

        self.commit(
            CallStatePatch::new()
                .settings(settings.clone())
                .translation(translation),
            vec![CallEvent::SettingsChanged(settings.clone())],
        )?;
        self.overlay
            .write()
            .set_enabled(settings.translation.enabled);
        Ok(())
    }

    /// Hängt einen Untertitel an; nach Anrufende werden Untertitel ignoriert
    async fn push_subtitle(&mut self, subtitle: SubtitleData) -> Result<bool, CallError> {
        let state = self.store.state();
        if state.status.is_terminal() {
            tracing::debug!("Ignoring subtitle {} after call end", subtitle.id);
            return Ok(false);
        }

        let surfaced = self.overlay.write().push(subtitle.clone())?;
        if state.is_recording() {
            if let Err(e) = self.media.record_subtitle(&subtitle).await {
                tracing::warn!("Failed to record subtitle {}: {}", subtitle.id, e);
            }
        }
        if !surfaced {
            return Ok(false);
        }

        let mut translation = state.translation.clone();
        translation.record(subtitle.clone());
        self.commit(
            CallStatePatch::new().translation(translation),
            vec![CallEvent::SubtitleReceived(subtitle)],
        )?;
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // participants
    // ------------------------------------------------------------------------

    async fn adjust_volume(&mut self, participant_id: String, volume: u8) -> Result<(), CallError> {
        if volume > 100 {
            return Err(CallError::InvalidVolume(volume));
        }

        let state = self.store.state();
        let participant = state
            .participant(&participant_id)
            .ok_or_else(|| CallError::ParticipantNotFound(participant_id.clone()))?;
        if participant.volume == volume {
            return Ok(());
        }

        self.media
            .set_participant_volume(&participant_id, volume)
            .await?;

        let participants = update_participant(&state, &participant_id, |p| p.volume = volume)?;
        self.commit(
            CallStatePatch::new().participants(participants),
            vec![CallEvent::ParticipantVolumeChanged {
                participant_id,
                volume,
            }],
        )?;
        Ok(())
    }

    async fn kick_participant(&mut self, participant_id: String) -> Result<(), CallError> {
        let state = self.store.state();
        let participant = state
            .participant(&participant_id)
            .ok_or_else(|| CallError::ParticipantNotFound(participant_id.clone()))?;
        if participant.is_local {
            return Err(CallError::InvalidState(
                "cannot kick the local participant".to_string(),
            ));
        }
        if !state.status.is_active() {
            return Err(CallError::InvalidState(format!(
                "cannot kick while {}",
                state.status
            )));
        }

        self.signaling.kick(&participant_id).await?;
        tracing::info!("Kicked participant {}", participant_id);

        self.remove_participant(
            &state,
            &participant_id,
            CallEvent::ParticipantKicked {
                participant_id: participant_id.clone(),
            },
        )
        .await
    }

    /// Entfernt einen Teilnehmer. Geht der letzte entfernte Teilnehmer eines
    /// verbundenen Anrufs, endet der Anruf im selben Update.
    async fn remove_participant(
        &mut self,
        state: &CallState,
        participant_id: &str,
        event: CallEvent,
    ) -> Result<(), CallError> {
        if let Err(e) = self.media.detach_remote_track(participant_id).await {
            tracing::warn!("Failed to detach remote media of {}: {}", participant_id, e);
        }

        let participants: Vec<Participant> = state
            .participants
            .iter()
            .filter(|p| p.id != participant_id)
            .cloned()
            .collect();
        let alone = !participants.iter().any(|p| !p.is_local);
        let patch = CallStatePatch::new().participants(participants);

        if alone && state.status == CallStatus::Connected {
            tracing::info!("Last remote participant gone, ending call");
            self.teardown(patch.status(CallStatus::Ended), vec![event])
                .await?;
        } else {
            self.commit(patch, vec![event])?;
        }
        Ok(())
    }

    async fn invite_participant(
        &mut self,
        peer_id: String,
        call_type: CallType,
    ) -> Result<CallInvitation, CallError> {
        let state = self.store.state();
        let call_id = state
            .call_id
            .clone()
            .ok_or_else(|| CallError::InvalidState("no call to invite into".to_string()))?;
        if state.participant(&peer_id).is_some() {
            return Err(CallError::InvalidState(format!(
                "{peer_id} is already in the call"
            )));
        }
        let local = state
            .local_participant()
            .ok_or_else(|| CallError::InvalidState("local participant missing".to_string()))?;

        let ttl = chrono::Duration::from_std(self.config.invitation_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let invitation =
            CallInvitation::new(call_id, &local.id, &local.name, &peer_id, call_type, ttl);

        self.signaling.invite(&invitation).await?;
        tracing::info!("Invited {} to call {}", peer_id, invitation.call_id);

        self.invitations.push(invitation.clone());
        self.emit(CallEvent::ParticipantInvited(invitation.clone()));
        Ok(invitation)
    }

    // ========================================================================
    // SIGNALING EVENTS
    // ========================================================================

    async fn on_signaling_event(&mut self, event: SignalingEvent) {
        if self.status().is_terminal() {
            tracing::debug!("Ignoring signaling event after call end: {:?}", event);
            return;
        }

        let result = match event {
            SignalingEvent::Connected => Ok(()),
            SignalingEvent::Disconnected => self.on_connection_interrupted(),
            SignalingEvent::Reconnected => self.on_connection_restored(),
            SignalingEvent::ConnectionLost { reason } => self.on_connection_lost(reason).await,
            SignalingEvent::IncomingCall {
                call_id,
                from,
                call_type,
                sdp,
                expires_at,
            } => {
                self.on_incoming_call(call_id, from, call_type, sdp, expires_at)
                    .await
            }
            SignalingEvent::AnswerReceived { from, sdp } => self.on_answer(from, sdp).await,
            SignalingEvent::IceCandidateReceived {
                from_peer_id,
                candidate,
            } => self.on_remote_candidate(from_peer_id, candidate).await,
            SignalingEvent::ParticipantJoined(peer) => self.on_participant_joined(peer).await,
            SignalingEvent::ParticipantLeft { peer_id } => self.on_participant_left(peer_id).await,
            SignalingEvent::MediaStateChanged { peer_id, state } => {
                self.on_remote_media_state(peer_id, state)
            }
            SignalingEvent::CallRejected { by_peer_id, reason } => {
                self.on_call_rejected(by_peer_id, reason).await
            }
            SignalingEvent::Kicked { by_peer_id } => self.on_kicked(by_peer_id).await,
            SignalingEvent::Error { code, message } => {
                Err(SignalingError::ServerError { code, message }.into())
            }
        };

        if let Err(e) = result {
            tracing::warn!("Signaling event handling failed: {}", e);
            self.emit(CallEvent::Error(e));
        }
    }

    fn on_connection_interrupted(&mut self) -> Result<(), CallError> {
        if self.status() == CallStatus::Connected {
            self.commit(
                CallStatePatch::new().status(CallStatus::Reconnecting),
                Vec::new(),
            )?;
        }
        Ok(())
    }

    fn on_connection_restored(&mut self) -> Result<(), CallError> {
        if self.status() == CallStatus::Reconnecting {
            self.commit(
                CallStatePatch::new().status(CallStatus::Connected),
                Vec::new(),
            )?;
        }
        Ok(())
    }

    async fn on_connection_lost(&mut self, reason: String) -> Result<(), CallError> {
        let error: CallError = SignalingError::ConnectionFailed(reason).into();
        let status = self.status();
        if status == CallStatus::Idle {
            return Err(error);
        }

        tracing::error!("Signaling connection lost while {}", status);
        self.emit(CallEvent::Error(error));
        self.teardown(
            CallStatePatch::new().status(closing_status(status)),
            Vec::new(),
        )
        .await?;
        Ok(())
    }

    async fn on_incoming_call(
        &mut self,
        call_id: String,
        from: RemotePeer,
        call_type: CallType,
        sdp: String,
        expires_at: DateTime<Utc>,
    ) -> Result<(), CallError> {
        let state = self.store.state();
        let busy = state.status != CallStatus::Idle
            || self.pending_connect.is_some()
            || self.incoming.is_some();
        if busy {
            tracing::info!("Rejecting call {} from {}: busy", call_id, from.username);
            self.signaling
                .reject_call(&call_id, &from.peer_id, Some("busy".to_string()))
                .await?;
            return Ok(());
        }

        let local_id = local_id(&state)?;
        let now = Utc::now();
        let mut invitation = CallInvitation::new(
            &call_id,
            &from.peer_id,
            &from.username,
            local_id,
            call_type,
            expires_at - now,
        );
        invitation.expires_at = expires_at;

        tracing::info!("Incoming call {} from {}", call_id, from.username);
        self.commit(
            CallStatePatch::new()
                .call_id(call_id)
                .status(CallStatus::Ringing),
            vec![CallEvent::IncomingCall(invitation.clone())],
        )?;

        self.incoming = Some(IncomingCall {
            invitation,
            from,
            sdp,
        });
        Ok(())
    }

    async fn on_answer(&mut self, from: RemotePeer, sdp: String) -> Result<(), CallError> {
        let state = self.store.state();
        if !matches!(
            state.status,
            CallStatus::Calling | CallStatus::Connected | CallStatus::Reconnecting
        ) {
            tracing::debug!("Ignoring answer from {} while {}", from.peer_id, state.status);
            return Ok(());
        }

        self.media.apply_answer(&from.peer_id, sdp).await?;
        self.answered = true;

        let mut participants = state.participants.clone();
        let mut events = Vec::new();
        let mut joined = None;
        if state.participant(&from.peer_id).is_none() {
            if let Err(e) = self.media.attach_remote_track(&from.peer_id).await {
                tracing::warn!("Failed to attach remote media of {}: {}", from.peer_id, e);
            }
            let participant = Participant::remote(&from.peer_id, &from.username, &from.language);
            participants.push(participant.clone());
            if let Some(invitation) = self.resolve_invitation(&from.peer_id, true) {
                events.push(CallEvent::InvitationUpdated(invitation));
            }
            events.push(CallEvent::ParticipantJoined(participant.clone()));
            joined = Some(participant);
        }

        let mut patch = CallStatePatch::new().participants(participants);
        let connected_now = state.status == CallStatus::Calling;
        if connected_now {
            patch = patch.status(CallStatus::Connected).started_at(Utc::now());
            self.ring_deadline = None;
        }

        self.commit(patch, events)?;
        if let Some(participant) = joined {
            self.remember(&participant);
        }
        if connected_now {
            self.after_connected().await;
        }
        Ok(())
    }

    async fn on_remote_candidate(
        &mut self,
        from_peer_id: String,
        candidate: String,
    ) -> Result<(), CallError> {
        if self.status() == CallStatus::Idle && self.pending_connect.is_none() {
            tracing::debug!("Ignoring ICE candidate from {} without a call", from_peer_id);
            return Ok(());
        }

        self.media.add_ice_candidate(candidate).await?;
        Ok(())
    }

    async fn on_participant_joined(&mut self, peer: RemotePeer) -> Result<(), CallError> {
        if self.signaling.local_peer_id().as_deref() == Some(peer.peer_id.as_str()) {
            return Ok(());
        }

        let state = self.store.state();
        if !matches!(
            state.status,
            CallStatus::Calling | CallStatus::Connected | CallStatus::Reconnecting
        ) || state.participant(&peer.peer_id).is_some()
        {
            return Ok(());
        }

        if let Err(e) = self.media.attach_remote_track(&peer.peer_id).await {
            tracing::warn!("Failed to attach remote media of {}: {}", peer.peer_id, e);
        }

        let participant = Participant::remote(&peer.peer_id, &peer.username, &peer.language);
        let mut participants = state.participants.clone();
        participants.push(participant.clone());

        let mut events = Vec::new();
        if let Some(invitation) = self.resolve_invitation(&peer.peer_id, true) {
            events.push(CallEvent::InvitationUpdated(invitation));
        }
        events.push(CallEvent::ParticipantJoined(participant.clone()));

        tracing::info!("Participant {} joined", peer.username);
        self.commit(CallStatePatch::new().participants(participants), events)?;
        self.remember(&participant);
        Ok(())
    }

    async fn on_participant_left(&mut self, peer_id: String) -> Result<(), CallError> {
        // Anrufer hat vor dem Annehmen aufgelegt
        let caller_gone = self
            .incoming
            .as_ref()
            .is_some_and(|incoming| incoming.from.peer_id == peer_id);
        if caller_gone {
            if let Some(incoming) = self.incoming.take() {
                let mut invitation = incoming.invitation;
                let _ = invitation.cancel(Utc::now());
                tracing::info!("Caller {} hung up before the call was accepted", peer_id);
                self.teardown(
                    CallStatePatch::new().status(CallStatus::Failed),
                    vec![CallEvent::InvitationUpdated(invitation)],
                )
                .await?;
            }
            return Ok(());
        }

        let state = self.store.state();
        if !state.participant(&peer_id).is_some_and(|p| !p.is_local) {
            return Ok(());
        }

        tracing::info!("Participant {} left", peer_id);
        self.remove_participant(
            &state,
            &peer_id,
            CallEvent::ParticipantLeft {
                participant_id: peer_id.clone(),
            },
        )
        .await
    }

    fn on_remote_media_state(&mut self, peer_id: String, media: MediaState) -> Result<(), CallError> {
        let state = self.store.state();
        let Some(current) = state.participant(&peer_id).filter(|p| !p.is_local) else {
            tracing::debug!("Media state for unknown participant {}", peer_id);
            return Ok(());
        };

        let mut events = Vec::new();
        if current.is_muted != media.muted {
            events.push(CallEvent::ParticipantMuted {
                participant_id: peer_id.clone(),
                muted: media.muted,
            });
        }
        if current.is_camera_on != media.camera_on {
            events.push(CallEvent::CameraToggled {
                participant_id: peer_id.clone(),
                enabled: media.camera_on,
            });
        }
        if current.is_screen_sharing != media.screen_sharing {
            events.push(CallEvent::ScreenShareToggled {
                participant_id: peer_id.clone(),
                active: media.screen_sharing,
            });
        }
        if events.is_empty() {
            return Ok(());
        }

        let participants = update_participant(&state, &peer_id, |p| {
            p.is_muted = media.muted;
            p.is_camera_on = media.camera_on;
            p.is_screen_sharing = media.screen_sharing;
        })?;
        self.commit(CallStatePatch::new().participants(participants), events)?;
        Ok(())
    }

    async fn on_call_rejected(
        &mut self,
        by_peer_id: String,
        reason: Option<String>,
    ) -> Result<(), CallError> {
        if let Some(invitation) = self.resolve_invitation(&by_peer_id, false) {
            self.emit(CallEvent::InvitationUpdated(invitation));
        }

        // schon verbundene Teilnehmer zählen nicht als Antwort
        let unanswered = self.status() == CallStatus::Calling && !self.answered;
        if unanswered {
            tracing::info!("Call rejected by {} ({:?})", by_peer_id, reason);
            self.teardown(
                CallStatePatch::new().status(CallStatus::Failed),
                Vec::new(),
            )
            .await?;
        }
        Ok(())
    }

    async fn on_kicked(&mut self, by_peer_id: String) -> Result<(), CallError> {
        let status = self.status();
        if status == CallStatus::Idle {
            return Ok(());
        }

        tracing::info!("Removed from call by {}", by_peer_id);
        self.teardown(
            CallStatePatch::new().status(closing_status(status)),
            Vec::new(),
        )
        .await?;
        Ok(())
    }

    // ========================================================================
    // MEDIA EVENTS
    // ========================================================================

    async fn on_media_event(&mut self, event: MediaEvent) {
        if self.status().is_terminal() {
            return;
        }

        let result = match event {
            MediaEvent::ConnectionStateChanged(state) => self.on_media_connection(state).await,
            MediaEvent::LocalIceCandidate { candidate } => {
                // vor dem Join ist noch kein Call gesetzt
                if let Err(e) = self.signaling.send_ice_candidate(candidate).await {
                    tracing::warn!("Failed to send ICE candidate: {}", e);
                }
                Ok(())
            }
            MediaEvent::RemoteTrack {
                participant_id,
                kind,
            } => {
                tracing::debug!("Remote {:?} track of {} is live", kind, participant_id);
                Ok(())
            }
        };

        if let Err(e) = result {
            self.emit(CallEvent::Error(e));
        }
    }

    async fn on_media_connection(&mut self, state: MediaConnectionState) -> Result<(), CallError> {
        let status = self.status();
        match (state, status) {
            (MediaConnectionState::Connected, CallStatus::Reconnecting) => {
                self.commit(
                    CallStatePatch::new().status(CallStatus::Connected),
                    Vec::new(),
                )?;
            }
            (MediaConnectionState::Disconnected, CallStatus::Connected) => {
                tracing::warn!("Media connection interrupted, reconnecting");
                self.commit(
                    CallStatePatch::new().status(CallStatus::Reconnecting),
                    Vec::new(),
                )?;
            }
            (
                MediaConnectionState::Failed,
                CallStatus::Calling | CallStatus::Connected | CallStatus::Reconnecting,
            ) => {
                tracing::error!("Media connection failed while {}", status);
                self.emit(CallEvent::Error(
                    MediaError::WebRtc("peer connection failed".to_string()).into(),
                ));
                self.teardown(
                    CallStatePatch::new().status(closing_status(status)),
                    Vec::new(),
                )
                .await?;
            }
            _ => {}
        }
        Ok(())
    }

    // ========================================================================
    // TIMERS
    // ========================================================================

    async fn on_tick(&mut self) {
        let now = Utc::now();

        let mut expired = Vec::new();
        self.invitations.retain_mut(|invitation| {
            if invitation.expire_if_due(now) {
                expired.push(invitation.clone());
                false
            } else {
                true
            }
        });
        for invitation in expired {
            tracing::info!("Invitation for {} expired", invitation.to);
            self.emit(CallEvent::InvitationUpdated(invitation));
        }

        if self.status().is_terminal() {
            return;
        }

        let expired_incoming = self.incoming.as_mut().and_then(|incoming| {
            incoming
                .invitation
                .expire_if_due(now)
                .then(|| incoming.invitation.clone())
        });
        if let Some(invitation) = expired_incoming {
            tracing::info!("Incoming call {} was not answered in time", invitation.call_id);
            let result = self
                .teardown(
                    CallStatePatch::new().status(CallStatus::Failed),
                    vec![CallEvent::InvitationUpdated(invitation)],
                )
                .await;
            if let Err(e) = result {
                self.emit(CallEvent::Error(e));
            }
            return;
        }

        let ring_timed_out = self
            .ring_deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        if ring_timed_out && self.status() == CallStatus::Calling {
            tracing::warn!(
                "No answer within {:?}, giving up",
                self.config.ring_timeout
            );
            let result = self
                .teardown(
                    CallStatePatch::new().status(CallStatus::Failed),
                    Vec::new(),
                )
                .await;
            if let Err(e) = result {
                self.emit(CallEvent::Error(e));
            }
        }
    }

    async fn poll_network_stats(&mut self) {
        let state = self.store.state();
        if !state.status.is_active() {
            return;
        }

        let stats = match self.media.network_stats().await {
            Ok(Some(stats)) => stats,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!("Network stats unavailable: {}", e);
                return;
            }
        };

        let result = local_id(&state)
            .and_then(|id| update_participant(&state, &id, |p| p.network_quality = stats.quality))
            .and_then(|participants| {
                self.commit(
                    CallStatePatch::new()
                        .participants(participants)
                        .network_stats(Some(stats.clone())),
                    vec![CallEvent::NetworkStatsUpdated(stats.clone())],
                )
            });
        if let Err(e) = result {
            tracing::warn!("Failed to store network stats: {}", e);
        }
    }
}

// ============================================================================
// FREE FUNCTIONS
// ============================================================================

/// Seiteneffekte eines ausgehenden Anrufs; läuft als abbrechbarer Task
async fn open_outgoing_call(
    signaling: &dyn SignalingClient,
    media: &dyn MediaPipeline,
    call_id: &str,
    config: &MediaStreamConfig,
    muted: bool,
) -> Result<LocalStream, CallError> {
    let stream = media.get_local_stream(config).await?;
    if muted && stream.has_audio {
        media.set_audio_enabled(false).await?;
    }

    signaling.join(call_id).await?;

    let offer = match media.create_offer().await {
        Ok(offer) => offer,
        Err(e) => {
            let _ = signaling.leave().await;
            return Err(e.into());
        }
    };
    if let Err(e) = signaling.send_offer(offer).await {
        let _ = signaling.leave().await;
        return Err(e.into());
    }

    Ok(stream)
}

/// `CameraToggled` für den lokalen Teilnehmer, falls sich der Wert ändert
fn camera_change(state: &CallState, local_id: &str, camera_on: bool) -> Vec<CallEvent> {
    match state.participant(local_id) {
        Some(p) if p.is_camera_on != camera_on => vec![CallEvent::CameraToggled {
            participant_id: local_id.to_string(),
            enabled: camera_on,
        }],
        _ => Vec::new(),
    }
}

/// Zielstatus beim Beenden: nur ein verbundener Anruf endet regulär
fn closing_status(status: CallStatus) -> CallStatus {
    if status == CallStatus::Connected {
        CallStatus::Ended
    } else {
        CallStatus::Failed
    }
}

fn local_id(state: &CallState) -> Result<String, CallError> {
    state
        .local_participant()
        .map(|p| p.id.clone())
        .ok_or_else(|| CallError::InvalidState("local participant missing".to_string()))
}

fn require_connected(state: &CallState, action: &str) -> Result<(), CallError> {
    if state.status == CallStatus::Connected {
        Ok(())
    } else {
        Err(CallError::InvalidState(format!(
            "{action} requires a connected call, status is {}",
            state.status
        )))
    }
}

/// Kopie der Teilnehmerliste mit einem geänderten Teilnehmer
fn update_participant(
    state: &CallState,
    participant_id: &str,
    change: impl FnOnce(&mut Participant),
) -> Result<Vec<Participant>, CallError> {
    let mut participants = state.participants.clone();
    let participant = participants
        .iter_mut()
        .find(|p| p.id == participant_id)
        .ok_or_else(|| CallError::ParticipantNotFound(participant_id.to_string()))?;
    change(participant);
    Ok(participants)
}
