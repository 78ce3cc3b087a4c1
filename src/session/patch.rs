//! Merge-Patches für `CallState` und `CallSettings`
//!
//! Regeln:
//! - `CallStatePatch` ist flach: jedes gesetzte Feld ersetzt das Feld im State
//!   komplett, verschachtelte Objekte werden nie tief gemerged.
//! - `CallSettingsPatch` arbeitet pro Settings-Gruppe: eine gesetzte Gruppe
//!   ersetzt die Gruppe komplett, fehlende Gruppen bleiben unverändert.

use super::model::{
    AudioSettings, CallLayout, CallQuality, CallSettings, CallState, NetworkStats, Participant,
    RecordingSettings, RecordingState, TranslationSettings, TranslationState, VideoSettings,
};
use super::status::CallStatus;
use chrono::{DateTime, Utc};

// ============================================================================
// CALL STATE PATCH
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct CallStatePatch {
    pub call_id: Option<String>,
    pub status: Option<CallStatus>,
    pub participants: Option<Vec<Participant>>,
    pub settings: Option<CallSettings>,
    pub translation: Option<TranslationState>,
    /// `Some(None)` entfernt die Aufnahme
    pub recording: Option<Option<RecordingState>>,
    /// `Some(None)` entfernt die Statistik
    pub network_stats: Option<Option<NetworkStats>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallStatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn status(mut self, status: CallStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn participants(mut self, participants: Vec<Participant>) -> Self {
        self.participants = Some(participants);
        self
    }

    pub fn settings(mut self, settings: CallSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn translation(mut self, translation: TranslationState) -> Self {
        self.translation = Some(translation);
        self
    }

    pub fn recording(mut self, recording: Option<RecordingState>) -> Self {
        self.recording = Some(recording);
        self
    }

    pub fn network_stats(mut self, stats: Option<NetworkStats>) -> Self {
        self.network_stats = Some(stats);
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn ended_at(mut self, at: DateTime<Utc>) -> Self {
        self.ended_at = Some(at);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.call_id.is_none()
            && self.status.is_none()
            && self.participants.is_none()
            && self.settings.is_none()
            && self.translation.is_none()
            && self.recording.is_none()
            && self.network_stats.is_none()
            && self.started_at.is_none()
            && self.ended_at.is_none()
    }

    /// Flacher Merge in den State, ohne Validierung
    pub(crate) fn apply_to(self, state: &mut CallState) {
        if let Some(call_id) = self.call_id {
            state.call_id = Some(call_id);
        }
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(participants) = self.participants {
            state.participants = participants;
        }
        if let Some(settings) = self.settings {
            state.settings = settings;
        }
        if let Some(translation) = self.translation {
            state.translation = translation;
        }
        if let Some(recording) = self.recording {
            state.recording = recording;
        }
        if let Some(stats) = self.network_stats {
            state.network_stats = stats;
        }
        if let Some(at) = self.started_at {
            state.started_at = Some(at);
        }
        if let Some(at) = self.ended_at {
            state.ended_at = Some(at);
        }
    }
}

// ============================================================================
// SETTINGS PATCH
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSettingsPatch {
    pub video: Option<VideoSettings>,
    pub audio: Option<AudioSettings>,
    pub recording: Option<RecordingSettings>,
    pub translation: Option<TranslationSettings>,
    pub quality: Option<CallQuality>,
    pub layout: Option<CallLayout>,
}

impl CallSettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Erzeugt neue Settings; gesetzte Gruppen ersetzen die alten komplett
    pub fn apply(&self, base: &CallSettings) -> CallSettings {
        CallSettings {
            video: self.video.clone().unwrap_or_else(|| base.video.clone()),
            audio: self.audio.clone().unwrap_or_else(|| base.audio.clone()),
            recording: self
                .recording
                .clone()
                .unwrap_or_else(|| base.recording.clone()),
            translation: self
                .translation
                .clone()
                .unwrap_or_else(|| base.translation.clone()),
            quality: self.quality.unwrap_or(base.quality),
            layout: self.layout.unwrap_or(base.layout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> CallState {
        CallState::new(
            Participant::local("me", "Alice", "de"),
            CallSettings::default(),
        )
    }

    #[test]
    fn test_state_patch_replaces_nested_objects_wholesale() {
        let mut state = state();
        let settings = CallSettings {
            layout: CallLayout::Speaker,
            ..CallSettings::default()
        };

        CallStatePatch::new()
            .settings(settings.clone())
            .call_id("call-1")
            .apply_to(&mut state);

        assert_eq!(state.settings, settings);
        assert_eq!(state.call_id.as_deref(), Some("call-1"));
        assert_eq!(state.status, CallStatus::Idle);
    }

    #[test]
    fn test_state_patch_can_clear_optional_snapshots() {
        let mut state = state();
        state.recording = Some(RecordingState::started(Utc::now()));

        CallStatePatch::new().recording(None).apply_to(&mut state);
        assert!(state.recording.is_none());

        assert!(CallStatePatch::new().is_empty());
        assert!(!CallStatePatch::new().recording(None).is_empty());
    }

    #[test]
    fn test_settings_patch_keeps_absent_groups() {
        let base = CallSettings::default();
        let patch = CallSettingsPatch {
            audio: Some(AudioSettings {
                noise_suppression: false,
                ..AudioSettings::default()
            }),
            quality: Some(CallQuality::Low),
            ..CallSettingsPatch::default()
        };

        let merged = patch.apply(&base);
        assert!(!merged.audio.noise_suppression);
        assert_eq!(merged.quality, CallQuality::Low);
        assert_eq!(merged.video, base.video);
        assert_eq!(merged.translation, base.translation);
        assert!(CallSettingsPatch::default().is_empty());
    }
}
