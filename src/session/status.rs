//! Call-Status State Machine
//!
//! ```text
//! idle ──► calling ──┬──► connected ──► ended
//!   │                │        │  ▲
//!   └────► ringing ──┤        ▼  │
//!                    │   reconnecting
//!                    ▼        │
//!                  failed ◄───┘
//! ```
//!
//! `ended` und `failed` sind terminal. Für einen neuen Anruf muss ein neuer
//! `CallState` erzeugt werden.

use crate::error::CallError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Noch kein Anruf
    #[default]
    Idle,
    /// Ausgehender Anruf wird aufgebaut
    Calling,
    /// Eingehender Anruf wartet auf Antwort
    Ringing,
    /// Beide Seiten sind verhandelt, Medien fließen
    Connected,
    /// Netzwerkverbindung unterbrochen, Wiederherstellung läuft
    Reconnecting,
    /// Regulär beendet
    Ended,
    /// Abgebrochen (Timeout, Ablehnung, Verbindungsverlust)
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Idle => "idle",
            CallStatus::Calling => "calling",
            CallStatus::Ringing => "ringing",
            CallStatus::Connected => "connected",
            CallStatus::Reconnecting => "reconnecting",
            CallStatus::Ended => "ended",
            CallStatus::Failed => "failed",
        }
    }

    /// Kein Übergang verlässt einen terminalen Status
    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Ended | CallStatus::Failed)
    }

    /// Anruf läuft (auch während einer Wiederverbindung)
    pub fn is_active(self) -> bool {
        matches!(self, CallStatus::Connected | CallStatus::Reconnecting)
    }

    /// Prüft eine Kante der State Machine
    pub fn can_transition_to(self, next: CallStatus) -> bool {
        use CallStatus::*;

        matches!(
            (self, next),
            (Idle, Calling)
                | (Idle, Ringing)
                | (Calling, Connected)
                | (Calling, Failed)
                | (Ringing, Connected)
                | (Ringing, Failed)
                | (Connected, Ended)
                | (Connected, Reconnecting)
                | (Reconnecting, Connected)
                | (Reconnecting, Failed)
        )
    }

    /// Gibt den neuen Status zurück oder `InvalidTransition`
    pub fn transition(self, next: CallStatus) -> Result<CallStatus, CallError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CallError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = CallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "idle" => CallStatus::Idle,
            "calling" => CallStatus::Calling,
            "ringing" => CallStatus::Ringing,
            "connected" => CallStatus::Connected,
            "reconnecting" => CallStatus::Reconnecting,
            "ended" => CallStatus::Ended,
            "failed" => CallStatus::Failed,
            other => {
                return Err(CallError::InvalidState(format!(
                    "unknown call status {other:?}"
                )))
            }
        };
        Ok(status)
    }
}
