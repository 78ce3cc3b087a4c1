//! Media Module - Audio, Video und Screen-Share
//!
//! Dieses Modul definiert den Vertrag, den der CallController konsumiert:
//! - `MediaPipeline` Trait (lokale Tracks, SDP, ICE, Aufnahme, Statistiken)
//! - `MediaEvent` für Verbindungsstatus, lokale ICE Candidates und Remote Tracks
//! - eine WebRTC-Implementierung und Audio-Geräteauflistung über cpal
//!

mod devices;
mod pipeline;

pub use devices::{list_audio_devices, AudioDevice, AudioDevices};
pub use pipeline::{default_ice_servers, WebRtcMediaPipeline};

use crate::session::{CallSettings, NetworkStats, VideoResolution};
use crate::translation::SubtitleData;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("No local stream, call get_local_stream first")]
    NoLocalStream,

    #[error("Screen share is already active")]
    ScreenShareActive,

    #[error("Screen share is not active")]
    ScreenShareInactive,

    #[error("Recording error: {0}")]
    Recording(String),
}

// ============================================================================
// STREAM CONFIG
// ============================================================================

/// Anforderungen an den lokalen Stream, abgeleitet aus den `CallSettings`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStreamConfig {
    pub audio: bool,
    pub video: bool,
    pub resolution: VideoResolution,
    pub frame_rate: u32,
    pub noise_suppression: bool,
    pub echo_cancellation: bool,
    pub auto_gain_control: bool,
}

impl MediaStreamConfig {
    pub fn from_settings(settings: &CallSettings) -> Self {
        Self {
            audio: settings.audio.enabled,
            video: settings.video.enabled,
            resolution: settings.video.resolution,
            frame_rate: settings.video.frame_rate,
            noise_suppression: settings.audio.noise_suppression,
            echo_cancellation: settings.audio.echo_cancellation,
            auto_gain_control: settings.audio.auto_gain_control,
        }
    }
}

/// Handle auf den lokalen Stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStream {
    pub id: String,
    pub has_audio: bool,
    pub has_video: bool,
}

// ============================================================================
// MEDIA EVENTS
// ============================================================================

/// Zustand der Medienverbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaConnectionState {
    Connecting,
    Connected,
    /// Vorübergehend getrennt, ICE versucht es weiter
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Events die von der MediaPipeline ausgelöst werden
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    ConnectionStateChanged(MediaConnectionState),

    /// Lokaler ICE Candidate, muss per Signaling verschickt werden
    LocalIceCandidate { candidate: String },

    RemoteTrack {
        participant_id: String,
        kind: TrackKind,
    },
}

// ============================================================================
// PIPELINE CONTRACT
// ============================================================================

/// Lokale und entfernte Medien eines Anrufs
#[async_trait]
pub trait MediaPipeline: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<MediaEvent>;

    /// Öffnet den lokalen Stream gemäß `config`
    async fn get_local_stream(&self, config: &MediaStreamConfig)
        -> Result<LocalStream, MediaError>;

    async fn create_offer(&self) -> Result<String, MediaError>;

    /// Übernimmt ein entferntes Offer und gibt das Answer zurück
    async fn create_answer(&self, offer_sdp: String) -> Result<String, MediaError>;

    async fn apply_answer(&self, participant_id: &str, answer_sdp: String)
        -> Result<(), MediaError>;

    async fn add_ice_candidate(&self, candidate: String) -> Result<(), MediaError>;

    async fn attach_remote_track(&self, participant_id: &str) -> Result<(), MediaError>;

    async fn detach_remote_track(&self, participant_id: &str) -> Result<(), MediaError>;

    async fn start_screen_share(&self) -> Result<(), MediaError>;

    async fn stop_screen_share(&self) -> Result<(), MediaError>;

    async fn set_audio_enabled(&self, enabled: bool) -> Result<(), MediaError>;

    async fn set_video_enabled(&self, enabled: bool) -> Result<(), MediaError>;

    /// Wiedergabe-Lautstärke eines Teilnehmers (0 - 100)
    async fn set_participant_volume(&self, participant_id: &str, volume: u8)
        -> Result<(), MediaError>;

    async fn start_recording(&self, include_translation: bool) -> Result<(), MediaError>;

    async fn stop_recording(&self) -> Result<(), MediaError>;

    async fn set_recording_paused(&self, paused: bool) -> Result<(), MediaError>;

    /// Schreibt einen Untertitel in die laufende Aufnahme, sofern sie
    /// mit Übersetzungen gestartet wurde
    async fn record_subtitle(&self, subtitle: &SubtitleData) -> Result<(), MediaError>;

    /// Aktuelle Verbindungsstatistik, `None` ohne aktive Verbindung
    async fn network_stats(&self) -> Result<Option<NetworkStats>, MediaError>;

    async fn close(&self) -> Result<(), MediaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_follows_settings() {
        let mut settings = CallSettings::default();
        settings.video.enabled = false;
        settings.audio.noise_suppression = false;

        let config = MediaStreamConfig::from_settings(&settings);
        assert!(config.audio);
        assert!(!config.video);
        assert!(!config.noise_suppression);
        assert_eq!(config.frame_rate, settings.video.frame_rate);
    }
}
