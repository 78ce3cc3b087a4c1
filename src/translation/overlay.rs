//! Translation Overlay
//!
//! Führt das Transkript aller Untertitel und bestimmt den aktuell sichtbaren
//! Untertitel pro Teilnehmer. Das Transkript ist die maßgebliche Quelle,
//! `CallState.translation` ist nur ein abgeleiteter Cache davon.

use super::subtitle::SubtitleData;
use crate::error::CallError;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct TranscriptEntry {
    subtitle: SubtitleData,
    /// Eingang bei aktiviertem Overlay
    surfaced: bool,
}

/// Append-only Transkript mit Sichtbarkeitslogik
#[derive(Debug, Clone, Default)]
pub struct TranslationOverlay {
    enabled: bool,
    transcript: Vec<TranscriptEntry>,
    last_timestamp: HashMap<String, i64>,
}

impl TranslationOverlay {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Hängt einen Untertitel an.
    ///
    /// Gibt zurück, ob der Eintrag sichtbar gemacht wird. Bei deaktiviertem
    /// Overlay wird er nur protokolliert. Zeitstempel müssen pro Teilnehmer
    /// strikt steigen.
    pub fn push(&mut self, subtitle: SubtitleData) -> Result<bool, CallError> {
        if let Some(&last) = self.last_timestamp.get(&subtitle.participant_id) {
            if subtitle.timestamp <= last {
                return Err(CallError::OutOfOrderSubtitle {
                    participant_id: subtitle.participant_id,
                    timestamp: subtitle.timestamp,
                    last,
                });
            }
        }

        self.last_timestamp
            .insert(subtitle.participant_id.clone(), subtitle.timestamp);

        let surfaced = self.enabled;
        self.transcript.push(TranscriptEntry { subtitle, surfaced });
        Ok(surfaced)
    }

    /// Neuester sichtbare, nicht abgelaufene Eintrag des Teilnehmers (latest wins)
    pub fn current_subtitle(&self, participant_id: &str, now: i64) -> Option<&SubtitleData> {
        if !self.enabled {
            return None;
        }

        self.transcript
            .iter()
            .rev()
            .filter(|e| e.surfaced && e.subtitle.participant_id == participant_id)
            .map(|e| &e.subtitle)
            .find(|s| s.is_active_at(now))
    }

    /// Aktuelle Untertitel aller Teilnehmer, sortiert nach Zeitstempel
    pub fn current_subtitles(&self, now: i64) -> Vec<&SubtitleData> {
        let mut current: Vec<&SubtitleData> = self
            .last_timestamp
            .keys()
            .filter_map(|id| self.current_subtitle(id, now))
            .collect();
        current.sort_by_key(|s| s.timestamp);
        current
    }

    pub fn transcript(&self) -> impl Iterator<Item = &SubtitleData> {
        self.transcript.iter().map(|e| &e.subtitle)
    }

    pub fn transcript_for<'a>(
        &'a self,
        participant_id: &'a str,
    ) -> impl Iterator<Item = &'a SubtitleData> + 'a {
        self.transcript()
            .filter(move |s| s.participant_id == participant_id)
    }

    pub fn len(&self) -> usize {
        self.transcript.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcript.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_overlapping_entry_wins() {
        let mut overlay = TranslationOverlay::new(true);
        overlay
            .push(SubtitleData::new("bob", "erste", "de", 1_000, 3_000))
            .unwrap();
        overlay
            .push(SubtitleData::new("bob", "zweite", "de", 2_000, 3_000))
            .unwrap();

        let current = overlay.current_subtitle("bob", 2_000).unwrap();
        assert_eq!(current.text, "zweite");
        assert_eq!(overlay.current_subtitle("bob", 1_500).unwrap().text, "erste");
    }

    #[test]
    fn test_expired_entries_are_not_current() {
        let mut overlay = TranslationOverlay::new(true);
        overlay
            .push(SubtitleData::new("bob", "kurz", "de", 1_000, 500))
            .unwrap();

        assert!(overlay.current_subtitle("bob", 1_500).is_none());
        assert!(overlay.current_subtitle("alice", 1_200).is_none());
    }

    #[test]
    fn test_out_of_order_is_rejected() {
        let mut overlay = TranslationOverlay::new(true);
        overlay
            .push(SubtitleData::new("bob", "a", "de", 2_000, 500))
            .unwrap();

        let err = overlay
            .push(SubtitleData::new("bob", "b", "de", 2_000, 500))
            .unwrap_err();
        assert!(matches!(err, CallError::OutOfOrderSubtitle { last: 2_000, .. }));

        // andere Teilnehmer haben eine eigene Zeitachse
        overlay
            .push(SubtitleData::new("carol", "c", "en", 1_000, 500))
            .unwrap();
        assert_eq!(overlay.len(), 2);
    }

    #[test]
    fn test_disabled_overlay_logs_without_surfacing() {
        let mut overlay = TranslationOverlay::new(false);
        let surfaced = overlay
            .push(SubtitleData::new("bob", "versteckt", "de", 1_000, 5_000))
            .unwrap();
        assert!(!surfaced);
        assert_eq!(overlay.transcript_for("bob").count(), 1);

        overlay.set_enabled(true);
        assert!(overlay.current_subtitle("bob", 1_100).is_none());

        overlay
            .push(SubtitleData::new("bob", "sichtbar", "de", 2_000, 5_000))
            .unwrap();
        assert_eq!(overlay.current_subtitle("bob", 2_100).unwrap().text, "sichtbar");
    }

    #[test]
    fn test_confidence_is_not_filtered() {
        let mut overlay = TranslationOverlay::new(true);
        overlay
            .push(SubtitleData::new("bob", "unsicher", "de", 0, 1_000).with_confidence(0.05))
            .unwrap();

        assert_eq!(overlay.current_subtitles(10).len(), 1);
    }
}
