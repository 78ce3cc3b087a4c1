//! Session Module - Call-State und Session Store
//!
//! Dieses Modul enthält das Datenmodell eines Anrufs:
//! - `CallState` als Aggregate Root mit Teilnehmern, Settings und Snapshots
//! - die Status-State-Machine
//! - flache Merge-Patches
//! - den `SessionStore` mit synchronen Subscriptions
//! - Einladungen vor dem eigentlichen Anruf

mod invitation;
mod model;
mod patch;
mod status;
mod store;

pub use invitation::{CallInvitation, CallType, InvitationStatus};
pub use model::{
    AudioSettings, CallLayout, CallQuality, CallSettings, CallState, NetworkQuality, NetworkStats,
    Participant, ParticipantId, RecordingSettings, RecordingState, SubtitlePosition,
    TranslationSettings, TranslationState, VideoResolution, VideoSettings,
};
pub use patch::{CallSettingsPatch, CallStatePatch};
pub use status::CallStatus;
pub use store::{SessionStore, Subscription};
