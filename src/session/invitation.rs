//! Call-Einladungen
//!
//! Eine Einladung existiert vor dem eigentlichen `CallState` und ist zeitlich
//! begrenzt. Übergänge: `pending → accepted | declined | expired | cancelled`,
//! danach ist sie abgeschlossen.

use super::model::ParticipantId;
use crate::error::CallError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Audio,
    #[default]
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
    Cancelled,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Declined => "declined",
            InvitationStatus::Expired => "expired",
            InvitationStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInvitation {
    pub id: String,
    pub call_id: String,
    pub from: ParticipantId,
    pub from_name: String,
    pub to: ParticipantId,
    pub call_type: CallType,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: InvitationStatus,
}

impl CallInvitation {
    pub fn new(
        call_id: impl Into<String>,
        from: impl Into<String>,
        from_name: impl Into<String>,
        to: impl Into<String>,
        call_type: CallType,
        ttl: Duration,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            call_id: call_id.into(),
            from: from.into(),
            from_name: from_name.into(),
            to: to.into(),
            call_type,
            created_at,
            expires_at: created_at + ttl,
            status: InvitationStatus::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == InvitationStatus::Pending
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn accept(&mut self, now: DateTime<Utc>) -> Result<(), CallError> {
        self.resolve(InvitationStatus::Accepted, now)
    }

    pub fn decline(&mut self, now: DateTime<Utc>) -> Result<(), CallError> {
        self.resolve(InvitationStatus::Declined, now)
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), CallError> {
        self.resolve(InvitationStatus::Cancelled, now)
    }

    /// Markiert eine abgelaufene, offene Einladung als `expired`
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_pending() && self.is_expired_at(now) {
            self.status = InvitationStatus::Expired;
            true
        } else {
            false
        }
    }

    /// Eine Auflösung nach `expires_at` endet immer als `expired`
    fn resolve(&mut self, target: InvitationStatus, now: DateTime<Utc>) -> Result<(), CallError> {
        if !self.is_pending() {
            return Err(CallError::InvalidState(format!(
                "invitation {} is already {}",
                self.id,
                self.status.as_str()
            )));
        }

        if self.expire_if_due(now) {
            return Err(CallError::InvitationExpired(self.id.clone()));
        }

        self.status = target;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invitation() -> CallInvitation {
        CallInvitation::new(
            "call-1",
            "alice",
            "Alice",
            "bob",
            CallType::Video,
            Duration::seconds(30),
        )
    }

    #[test]
    fn test_accept_is_terminal() {
        let mut inv = invitation();
        inv.accept(Utc::now()).unwrap();
        assert_eq!(inv.status, InvitationStatus::Accepted);

        assert!(inv.decline(Utc::now()).unwrap_err().is_invalid_state());
        assert_eq!(inv.status, InvitationStatus::Accepted);
    }

    #[test]
    fn test_late_resolution_expires() {
        let mut inv = invitation();
        let late = inv.expires_at + Duration::seconds(1);

        let err = inv.accept(late).unwrap_err();
        assert_eq!(err, CallError::InvitationExpired(inv.id.clone()));
        assert_eq!(inv.status, InvitationStatus::Expired);
        assert!(!inv.expire_if_due(late));
    }

    #[test]
    fn test_cancel_pending() {
        let mut inv = invitation();
        assert!(!inv.expire_if_due(Utc::now()));
        inv.cancel(Utc::now()).unwrap();
        assert_eq!(inv.status, InvitationStatus::Cancelled);
    }
}
