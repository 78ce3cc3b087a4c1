//! Untertitel-Daten
//!
//! Ein `SubtitleData` entspricht genau einer erkannten Äußerung. Einträge sind
//! unveränderlich und werden nur an das Transkript angehängt.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleData {
    pub id: String,
    pub participant_id: String,
    /// Erkannter Originaltext
    pub text: String,
    pub translated_text: Option<String>,
    pub source_language: String,
    pub target_language: Option<String>,
    /// Konfidenz des externen Dienstes (0.0 - 1.0), wird nicht gefiltert
    pub confidence: f32,
    /// Beginn in Millisekunden seit Unix-Epoch
    pub timestamp: i64,
    pub duration_ms: i64,
}

impl SubtitleData {
    pub fn new(
        participant_id: impl Into<String>,
        text: impl Into<String>,
        source_language: impl Into<String>,
        timestamp: i64,
        duration_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            participant_id: participant_id.into(),
            text: text.into(),
            translated_text: None,
            source_language: source_language.into(),
            target_language: None,
            confidence: 1.0,
            timestamp,
            duration_ms,
        }
    }

    pub fn with_translation(
        mut self,
        translated_text: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        self.translated_text = Some(translated_text.into());
        self.target_language = Some(target_language.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn expires_at(&self) -> i64 {
        self.timestamp.saturating_add(self.duration_ms)
    }

    /// Sichtbar, solange `timestamp <= now < timestamp + duration`
    pub fn is_active_at(&self, now: i64) -> bool {
        self.timestamp <= now && now < self.expires_at()
    }
}
