//! Datenmodell einer Call-Session
//!
//! `CallState` ist das Aggregate Root: genau ein Objekt pro aktivem Anruf.
//! Verändert wird es ausschließlich über den `SessionStore`.

use super::status::CallStatus;
use crate::error::CallError;
use crate::translation::SubtitleData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type ParticipantId = String;

// ============================================================================
// PARTICIPANT
// ============================================================================

/// Verbindungsqualität eines Teilnehmers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkQuality {
    #[default]
    Excellent,
    Good,
    Fair,
    Poor,
    Disconnected,
}

impl NetworkQuality {
    /// Leitet die Qualität aus Round-Trip-Time (ms) und Paketverlust (0.0 - 1.0) ab
    pub fn from_measurements(round_trip_ms: f64, packet_loss: f64) -> Self {
        if round_trip_ms < 150.0 && packet_loss < 0.01 {
            NetworkQuality::Excellent
        } else if round_trip_ms < 300.0 && packet_loss < 0.03 {
            NetworkQuality::Good
        } else if round_trip_ms < 500.0 && packet_loss < 0.08 {
            NetworkQuality::Fair
        } else {
            NetworkQuality::Poor
        }
    }
}

/// Ein Endpunkt (lokal oder remote) im Anruf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub avatar: Option<String>,
    pub is_local: bool,
    pub is_muted: bool,
    pub is_camera_on: bool,
    pub is_screen_sharing: bool,
    pub is_speaking: bool,
    pub network_quality: NetworkQuality,
    /// Gesprochene Sprache (BCP-47, z.B. "de" oder "en-US")
    pub language: String,
    /// Wiedergabe-Lautstärke 0 - 100
    pub volume: u8,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn local(
        id: impl Into<String>,
        name: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            is_local: true,
            ..Self::remote(id, name, language)
        }
    }

    pub fn remote(
        id: impl Into<String>,
        name: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar: None,
            is_local: false,
            is_muted: false,
            is_camera_on: false,
            is_screen_sharing: false,
            is_speaking: false,
            network_quality: NetworkQuality::default(),
            language: language.into(),
            volume: 100,
            joined_at: Utc::now(),
        }
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoResolution {
    Sd,
    #[default]
    Hd,
    FullHd,
}

impl VideoResolution {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            VideoResolution::Sd => (640, 360),
            VideoResolution::Hd => (1280, 720),
            VideoResolution::FullHd => (1920, 1080),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSettings {
    pub enabled: bool,
    pub resolution: VideoResolution,
    pub frame_rate: u32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            resolution: VideoResolution::default(),
            frame_rate: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSettings {
    pub enabled: bool,
    pub noise_suppression: bool,
    pub echo_cancellation: bool,
    pub auto_gain_control: bool,
    pub volume: u8,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            noise_suppression: true,
            echo_cancellation: true,
            auto_gain_control: true,
            volume: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSettings {
    pub auto_record: bool,
    pub include_translation: bool,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            auto_record: false,
            include_translation: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitlePosition {
    Top,
    #[default]
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationSettings {
    pub enabled: bool,
    /// "auto" überlässt die Erkennung dem Übersetzungsdienst
    pub source_language: String,
    pub target_language: String,
    pub show_subtitles: bool,
    pub subtitle_position: SubtitlePosition,
    pub font_size: u8,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            source_language: "auto".to_string(),
            target_language: "en".to_string(),
            show_subtitles: true,
            subtitle_position: SubtitlePosition::default(),
            font_size: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallQuality {
    #[default]
    Auto,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallLayout {
    #[default]
    Grid,
    Speaker,
    Sidebar,
    Fullscreen,
}

/// Konfiguration des laufenden Anrufs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSettings {
    pub video: VideoSettings,
    pub audio: AudioSettings,
    pub recording: RecordingSettings,
    pub translation: TranslationSettings,
    pub quality: CallQuality,
    pub layout: CallLayout,
}

// ============================================================================
// TRANSLATION / RECORDING / NETWORK SNAPSHOTS
// ============================================================================

/// Abgeleiteter Cache des Overlays: letzter sichtbarer Untertitel je Teilnehmer.
///
/// Das Transkript im `TranslationOverlay` ist maßgeblich, dieser Snapshot
/// wird nur daraus befüllt.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationState {
    pub enabled: bool,
    pub source_language: String,
    pub target_language: String,
    pub latest: Vec<SubtitleData>,
}

impl TranslationState {
    pub fn from_settings(settings: &TranslationSettings) -> Self {
        Self {
            enabled: settings.enabled,
            source_language: settings.source_language.clone(),
            target_language: settings.target_language.clone(),
            latest: Vec::new(),
        }
    }

    pub fn latest_for(&self, participant_id: &str) -> Option<&SubtitleData> {
        self.latest
            .iter()
            .find(|s| s.participant_id == participant_id)
    }

    /// Ersetzt den Eintrag des Teilnehmers
    pub fn record(&mut self, subtitle: SubtitleData) {
        self.latest
            .retain(|s| s.participant_id != subtitle.participant_id);
        self.latest.push(subtitle);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingState {
    pub started_at: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
    /// Summe aller abgeschlossenen Pausen in Millisekunden
    pub paused_total_ms: i64,
}

impl RecordingState {
    pub fn started(now: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            paused_at: None,
            paused_total_ms: 0,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn paused(&self, now: DateTime<Utc>) -> Self {
        Self {
            paused_at: Some(now),
            ..self.clone()
        }
    }

    pub fn resumed(&self, now: DateTime<Utc>) -> Self {
        let pause = self
            .paused_at
            .map(|at| (now - at).num_milliseconds().max(0))
            .unwrap_or(0);

        Self {
            paused_at: None,
            paused_total_ms: self.paused_total_ms + pause,
            ..self.clone()
        }
    }

    /// Aufgenommene Zeit ohne Pausen
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        let end = self.paused_at.unwrap_or(now);
        ((end - self.started_at).num_milliseconds() - self.paused_total_ms).max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    pub round_trip_ms: f64,
    pub outgoing_bitrate_kbps: f64,
    pub incoming_bitrate_kbps: f64,
    /// Anteil verlorener Pakete (0.0 - 1.0)
    pub packet_loss: f64,
    pub quality: NetworkQuality,
    pub measured_at: DateTime<Utc>,
}

impl NetworkStats {
    pub fn new(
        round_trip_ms: f64,
        outgoing_bitrate_kbps: f64,
        incoming_bitrate_kbps: f64,
        packet_loss: f64,
    ) -> Self {
        Self {
            round_trip_ms,
            outgoing_bitrate_kbps,
            incoming_bitrate_kbps,
            packet_loss,
            quality: NetworkQuality::from_measurements(round_trip_ms, packet_loss),
            measured_at: Utc::now(),
        }
    }
}

// ============================================================================
// CALL STATE
// ============================================================================

/// Aggregate Root eines Anrufs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallState {
    pub call_id: Option<String>,
    pub status: CallStatus,
    /// Lokale und entfernte Teilnehmer, eindeutig per `id`
    pub participants: Vec<Participant>,
    pub settings: CallSettings,
    pub translation: TranslationState,
    pub recording: Option<RecordingState>,
    pub network_stats: Option<NetworkStats>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallState {
    /// Neuer Anruf im Status `idle` mit dem lokalen Teilnehmer
    pub fn new(mut local: Participant, settings: CallSettings) -> Self {
        local.is_local = true;
        local.is_camera_on = false;

        Self {
            call_id: None,
            status: CallStatus::Idle,
            participants: vec![local],
            translation: TranslationState::from_settings(&settings.translation),
            settings,
            recording: None,
            network_stats: None,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn local_participant(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.is_local)
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn remote_participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| !p.is_local)
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Prüft die Teilnehmer-Invarianten: genau ein lokaler Teilnehmer, eindeutige IDs
    pub(crate) fn validate(&self) -> Result<(), CallError> {
        let local_count = self.participants.iter().filter(|p| p.is_local).count();
        if local_count != 1 {
            return Err(CallError::InvalidState(format!(
                "expected exactly one local participant, found {local_count}"
            )));
        }

        let mut seen = HashSet::with_capacity(self.participants.len());
        for participant in &self.participants {
            if !seen.insert(participant.id.as_str()) {
                return Err(CallError::InvalidState(format!(
                    "duplicate participant id {}",
                    participant.id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_state_contains_local_participant() {
        let state = CallState::new(
            Participant::remote("me", "Alice", "de"),
            CallSettings::default(),
        );

        assert_eq!(state.status, CallStatus::Idle);
        let local = state.local_participant().unwrap();
        assert_eq!(local.id, "me");
        assert!(local.is_local);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_missing_local() {
        let mut state = CallState::new(
            Participant::local("me", "Alice", "de"),
            CallSettings::default(),
        );
        state
            .participants
            .push(Participant::remote("me", "Mallory", "en"));
        assert!(state.validate().unwrap_err().is_invalid_state());

        state.participants = vec![Participant::remote("bob", "Bob", "en")];
        assert!(state.validate().is_err());
    }

    #[test]
    fn test_recording_elapsed_excludes_pauses() {
        let start = Utc::now();
        let recording = RecordingState::started(start);

        let paused = recording.paused(start + Duration::seconds(10));
        assert!(paused.is_paused());
        assert_eq!(paused.elapsed_ms(start + Duration::seconds(60)), 10_000);

        let resumed = paused.resumed(start + Duration::seconds(30));
        assert!(!resumed.is_paused());
        assert_eq!(resumed.paused_total_ms, 20_000);
        assert_eq!(resumed.elapsed_ms(start + Duration::seconds(40)), 20_000);
    }

    #[test]
    fn test_network_quality_thresholds() {
        assert_eq!(
            NetworkQuality::from_measurements(40.0, 0.0),
            NetworkQuality::Excellent
        );
        assert_eq!(
            NetworkQuality::from_measurements(250.0, 0.02),
            NetworkQuality::Good
        );
        assert_eq!(
            NetworkQuality::from_measurements(120.0, 0.05),
            NetworkQuality::Fair
        );
        assert_eq!(
            NetworkQuality::from_measurements(900.0, 0.0),
            NetworkQuality::Poor
        );
    }

    #[test]
    fn test_translation_cache_keeps_one_entry_per_participant() {
        let mut translation = TranslationState::from_settings(&TranslationSettings::default());
        translation.record(SubtitleData::new("bob", "hallo", "de", 1_000, 2_000));
        translation.record(SubtitleData::new("bob", "wie geht's", "de", 2_000, 2_000));
        translation.record(SubtitleData::new("carol", "hi", "en", 2_500, 2_000));

        assert_eq!(translation.latest.len(), 2);
        assert_eq!(translation.latest_for("bob").unwrap().text, "wie geht's");
    }
}
