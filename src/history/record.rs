//! Abgeschlossene Anrufe
//!
//! Ein `CallHistory`-Eintrag entsteht genau einmal, wenn ein `CallState`
//! terminal wird, und wird danach nicht mehr verändert.

use crate::session::{CallState, CallStatus, Participant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Teilnehmer wie er in der Historie erscheint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParticipant {
    pub id: String,
    pub name: String,
    pub language: String,
}

impl From<&Participant> for HistoryParticipant {
    fn from(participant: &Participant) -> Self {
        Self {
            id: participant.id.clone(),
            name: participant.name.clone(),
            language: participant.language.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHistory {
    pub id: String,
    pub call_id: String,
    /// Alle Teilnehmer, die während des Anrufs anwesend waren
    pub participants: Vec<HistoryParticipant>,
    /// `None`, wenn der Anruf nie verbunden war
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    /// `ended` oder `failed`
    pub final_status: CallStatus,
    pub was_recorded: bool,
    pub transcript_entries: usize,
}

impl CallHistory {
    /// Erstellt den Eintrag für einen terminalen State, sonst `None`
    pub fn from_state(
        state: &CallState,
        roster: Vec<HistoryParticipant>,
        was_recorded: bool,
        transcript_entries: usize,
    ) -> Option<Self> {
        if !state.status.is_terminal() {
            return None;
        }

        let ended_at = state.ended_at.unwrap_or_else(Utc::now);
        let duration_ms = state
            .started_at
            .map(|started| (ended_at - started).num_milliseconds().max(0))
            .unwrap_or(0);

        Some(Self {
            id: Uuid::new_v4().to_string(),
            call_id: state.call_id.clone().unwrap_or_default(),
            participants: roster,
            started_at: state.started_at,
            ended_at,
            duration_ms,
            final_status: state.status,
            was_recorded,
            transcript_entries,
        })
    }

    pub fn was_connected(&self) -> bool {
        self.started_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CallSettings;
    use chrono::Duration;

    fn state_with_status(status: CallStatus) -> CallState {
        let mut state = CallState::new(
            Participant::local("alice", "Alice", "de"),
            CallSettings::default(),
        );
        state.call_id = Some("call-1".to_string());
        state.status = status;
        state
    }

    #[test]
    fn test_only_terminal_states_produce_history() {
        let state = state_with_status(CallStatus::Connected);
        assert!(CallHistory::from_state(&state, Vec::new(), false, 0).is_none());
    }

    #[test]
    fn test_duration_from_timestamps() {
        let mut state = state_with_status(CallStatus::Ended);
        let started = Utc::now() - Duration::seconds(90);
        state.started_at = Some(started);
        state.ended_at = Some(started + Duration::seconds(90));

        let roster = state.participants.iter().map(HistoryParticipant::from).collect();
        let history = CallHistory::from_state(&state, roster, true, 12).unwrap();

        assert_eq!(history.call_id, "call-1");
        assert_eq!(history.duration_ms, 90_000);
        assert_eq!(history.final_status, CallStatus::Ended);
        assert_eq!(history.participants[0].name, "Alice");
        assert!(history.was_recorded);
        assert!(history.was_connected());
    }

    #[test]
    fn test_failed_before_connect_has_zero_duration() {
        let state = state_with_status(CallStatus::Failed);
        let history = CallHistory::from_state(&state, Vec::new(), false, 0).unwrap();

        assert_eq!(history.duration_ms, 0);
        assert!(!history.was_connected());
    }
}
