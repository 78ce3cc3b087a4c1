//! WebRTC Media Pipeline
//!
//! Verwaltet die Peer Connection eines Anrufs:
//! - lokale Audio (Opus) und Video (VP8) Tracks, Screen-Share als eigener Track
//! - Mute/Kamera über `replace_track`, ohne Neuverhandlung
//! - Aufnahme eingehender Audio-Tracks als Ogg/Opus pro Teilnehmer,
//!   Untertitel optional als JSON Lines daneben
//! - Verbindungsstatistik aus dem nominierten ICE-Kandidatenpaar
//!
//! Kodieren und Abspielen gehören dem Host: er schreibt RTP-Pakete in die
//! Tracks aus `local_audio_track`/`local_video_track` und liest die
//! Lautstärke pro Teilnehmer über `participant_volume`.

use super::devices::has_input_device;
use super::{
    LocalStream, MediaConnectionState, MediaError, MediaEvent, MediaPipeline, MediaStreamConfig,
    TrackKind,
};
use crate::session::NetworkStats;
use crate::translation::SubtitleData;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::io::ogg_writer::OggWriter;
use webrtc::media::io::Writer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate (48kHz, Opus-Standard)
const SAMPLE_RATE: u32 = 48000;

/// Mono für Voice
const CHANNELS: u16 = 1;

/// RTP Clock Rate für Video
const VIDEO_CLOCK_RATE: u32 = 90000;

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// Standard STUN Server
pub fn default_ice_servers() -> Vec<RTCIceServer> {
    vec![RTCIceServer {
        urls: vec![
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
        ],
        ..Default::default()
    }]
}

fn webrtc_error(e: webrtc::Error) -> MediaError {
    MediaError::WebRtc(e.to_string())
}

// ============================================================================
// SESSION STATE
// ============================================================================

struct LocalTrack {
    track: Arc<TrackLocalStaticRTP>,
    sender: Arc<RTCRtpSender>,
}

/// Peer Connection mit den lokalen Tracks
struct Session {
    pc: Arc<RTCPeerConnection>,
    audio: Option<LocalTrack>,
    video: Option<LocalTrack>,
    screen: Option<LocalTrack>,
}

/// Laufende Aufnahme, eine Ogg-Datei pro Teilnehmer
struct Recorder {
    id: String,
    dir: PathBuf,
    paused: bool,
    writers: HashMap<String, OggWriter<File>>,
    /// Nur gesetzt, wenn die Aufnahme Übersetzungen enthalten soll
    subtitles: Option<BufWriter<File>>,
}

impl Recorder {
    fn start(id: String, dir: PathBuf, include_translation: bool) -> Result<Self, MediaError> {
        std::fs::create_dir_all(&dir).map_err(|e| MediaError::Recording(e.to_string()))?;

        let subtitles = if include_translation {
            let path = dir.join(format!("{id}-subtitles.jsonl"));
            let file = File::create(&path).map_err(|e| MediaError::Recording(e.to_string()))?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        Ok(Self {
            id,
            dir,
            paused: false,
            writers: HashMap::new(),
            subtitles,
        })
    }

    fn write_subtitle(&mut self, subtitle: &SubtitleData) -> Result<(), MediaError> {
        if self.paused {
            return Ok(());
        }
        let Some(out) = self.subtitles.as_mut() else {
            return Ok(());
        };

        serde_json::to_writer(&mut *out, subtitle)
            .map_err(|e| MediaError::Recording(e.to_string()))?;
        out.write_all(b"\n")
            .map_err(|e| MediaError::Recording(e.to_string()))
    }

    fn write(&mut self, participant_id: &str, packet: &Packet) -> Result<(), MediaError> {
        if self.paused {
            return Ok(());
        }

        if !self.writers.contains_key(participant_id) {
            let path = self
                .dir
                .join(format!("{}-{}.ogg", self.id, file_safe(participant_id)));
            tracing::info!("Recording {} to {:?}", participant_id, path);

            let file = File::create(&path).map_err(|e| MediaError::Recording(e.to_string()))?;
            let writer = OggWriter::new(file, SAMPLE_RATE, 1)
                .map_err(|e| MediaError::Recording(e.to_string()))?;
            self.writers.insert(participant_id.to_string(), writer);
        }

        if let Some(writer) = self.writers.get_mut(participant_id) {
            writer
                .write_rtp(packet)
                .map_err(|e| MediaError::Recording(e.to_string()))?;
        }
        Ok(())
    }

    fn finish(&mut self, participant_id: &str) {
        if let Some(mut writer) = self.writers.remove(participant_id) {
            if let Err(e) = writer.close() {
                tracing::warn!("Failed to finalize recording of {}: {}", participant_id, e);
            }
        }
    }

    fn finish_all(&mut self) {
        let ids: Vec<String> = self.writers.keys().cloned().collect();
        for id in ids {
            self.finish(&id);
        }
        if let Some(mut out) = self.subtitles.take() {
            if let Err(e) = out.flush() {
                tracing::warn!("Failed to finalize subtitles of recording {}: {}", self.id, e);
            }
        }
    }
}

fn file_safe(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

// ============================================================================
// PIPELINE
// ============================================================================

/// `MediaPipeline` auf Basis von webrtc-rs
pub struct WebRtcMediaPipeline {
    ice_servers: Vec<RTCIceServer>,
    recordings_dir: PathBuf,
    session: Arc<Mutex<Option<Session>>>,
    recorder: Arc<Mutex<Option<Recorder>>>,
    attached: Arc<Mutex<HashSet<String>>>,
    volumes: Arc<Mutex<HashMap<String, u8>>>,
    event_tx: broadcast::Sender<MediaEvent>,
}

impl WebRtcMediaPipeline {
    pub fn new(recordings_dir: PathBuf) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            ice_servers: default_ice_servers(),
            recordings_dir,
            session: Arc::new(Mutex::new(None)),
            recorder: Arc::new(Mutex::new(None)),
            attached: Arc::new(Mutex::new(HashSet::new())),
            volumes: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
        }
    }

    pub fn with_ice_servers(mut self, ice_servers: Vec<RTCIceServer>) -> Self {
        self.ice_servers = ice_servers;
        self
    }

    /// Ergänzt einen TURN-Server
    pub fn with_turn_server(mut self, url: String, username: String, credential: String) -> Self {
        self.ice_servers.push(RTCIceServer {
            urls: vec![url],
            username,
            credential,
            ..Default::default()
        });
        self
    }

    /// Zuletzt gesetzte Lautstärke eines Teilnehmers, für die Wiedergabe des Hosts
    pub fn participant_volume(&self, participant_id: &str) -> u8 {
        self.volumes.lock().get(participant_id).copied().unwrap_or(100)
    }

    /// Track, in den der Host kodierte Opus-Pakete des Mikrofons schreibt
    pub fn local_audio_track(&self) -> Option<Arc<TrackLocalStaticRTP>> {
        self.local_track(|s| s.audio.as_ref())
            .ok()
            .flatten()
            .map(|(_, track)| track)
    }

    /// Track, in den der Host kodierte VP8-Frames der Kamera schreibt
    pub fn local_video_track(&self) -> Option<Arc<TrackLocalStaticRTP>> {
        self.local_track(|s| s.video.as_ref())
            .ok()
            .flatten()
            .map(|(_, track)| track)
    }

    pub fn is_attached(&self, participant_id: &str) -> bool {
        self.attached.lock().contains(participant_id)
    }

    fn peer_connection(&self) -> Result<Arc<RTCPeerConnection>, MediaError> {
        self.session
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.pc))
            .ok_or(MediaError::NoLocalStream)
    }

    async fn create_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, MediaError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(webrtc_error)?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(webrtc_error)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(webrtc_error)?,
        );
        self.setup_peer_connection_handlers(&pc);

        Ok(pc)
    }

    fn setup_peer_connection_handlers(&self, pc: &Arc<RTCPeerConnection>) {
        let event_tx = self.event_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::info!("Peer connection state: {:?}", s);

            let state = match s {
                RTCPeerConnectionState::New | RTCPeerConnectionState::Connecting => {
                    Some(MediaConnectionState::Connecting)
                }
                RTCPeerConnectionState::Connected => Some(MediaConnectionState::Connected),
                RTCPeerConnectionState::Disconnected => Some(MediaConnectionState::Disconnected),
                RTCPeerConnectionState::Failed => Some(MediaConnectionState::Failed),
                RTCPeerConnectionState::Closed => Some(MediaConnectionState::Closed),
                _ => None,
            };
            if let Some(state) = state {
                let _ = event_tx.send(MediaEvent::ConnectionStateChanged(state));
            }

            Box::pin(async {})
        }));

        let event_tx = self.event_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            if let Some(c) = candidate {
                match c.to_json().map(|json| serde_json::to_string(&json)) {
                    Ok(Ok(candidate)) => {
                        let _ = event_tx.send(MediaEvent::LocalIceCandidate { candidate });
                    }
                    Ok(Err(e)) => tracing::warn!("Failed to encode ICE candidate: {}", e),
                    Err(e) => tracing::warn!("Failed to read ICE candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        let event_tx = self.event_tx.clone();
        let recorder = Arc::clone(&self.recorder);
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let event_tx = event_tx.clone();
            let recorder = Arc::clone(&recorder);

            Box::pin(async move {
                // Stream-ID entspricht der Peer-ID des Absenders
                let participant_id = track.stream_id().to_string();
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    _ => TrackKind::Video,
                };
                tracing::info!(
                    "Received {:?} track from {}: {:?}",
                    kind,
                    participant_id,
                    track.codec()
                );

                let _ = event_tx.send(MediaEvent::RemoteTrack {
                    participant_id: participant_id.clone(),
                    kind,
                });

                if kind == TrackKind::Audio {
                    tokio::spawn(record_remote_audio(track, participant_id, recorder));
                }
            })
        }));
    }

    async fn add_local_track(
        pc: &Arc<RTCPeerConnection>,
        capability: RTCRtpCodecCapability,
        id: &str,
        stream_id: &str,
    ) -> Result<LocalTrack, MediaError> {
        let track = Arc::new(TrackLocalStaticRTP::new(
            capability,
            id.to_string(),
            stream_id.to_string(),
        ));
        let sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(webrtc_error)?;

        Ok(LocalTrack { track, sender })
    }

    /// Sender und Track eines lokalen Tracks, ohne Lock über `await`
    fn local_track(
        &self,
        pick: impl Fn(&Session) -> Option<&LocalTrack>,
    ) -> Result<Option<(Arc<RTCRtpSender>, Arc<TrackLocalStaticRTP>)>, MediaError> {
        let session = self.session.lock();
        let session = session.as_ref().ok_or(MediaError::NoLocalStream)?;
        Ok(pick(session).map(|t| (Arc::clone(&t.sender), Arc::clone(&t.track))))
    }

    async fn set_track_enabled(
        &self,
        enabled: bool,
        pick: impl Fn(&Session) -> Option<&LocalTrack>,
    ) -> Result<(), MediaError> {
        let Some((sender, track)) = self.local_track(pick)? else {
            return Ok(());
        };

        let replacement: Option<Arc<dyn TrackLocal + Send + Sync>> =
            if enabled { Some(track) } else { None };
        sender.replace_track(replacement).await.map_err(webrtc_error)
    }
}

/// Liest RTP-Pakete eines Remote-Audio-Tracks und schreibt sie bei laufender Aufnahme mit
async fn record_remote_audio(
    track: Arc<TrackRemote>,
    participant_id: String,
    recorder: Arc<Mutex<Option<Recorder>>>,
) {
    loop {
        let packet = match track.read_rtp().await {
            Ok((packet, _)) => packet,
            Err(e) => {
                tracing::debug!("Remote audio of {} ended: {}", participant_id, e);
                break;
            }
        };

        {
            let mut recorder = recorder.lock();
            if let Some(recorder) = recorder.as_mut() {
                if let Err(e) = recorder.write(&participant_id, &packet) {
                    tracing::warn!("Dropping recorded packet of {}: {}", participant_id, e);
                }
            }
        }
    }
}

#[async_trait]
impl MediaPipeline for WebRtcMediaPipeline {
    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.event_tx.subscribe()
    }

    async fn get_local_stream(
        &self,
        config: &MediaStreamConfig,
    ) -> Result<LocalStream, MediaError> {
        if config.audio && !has_input_device() {
            return Err(MediaError::Device("No audio input device found".to_string()));
        }

        let previous = self.session.lock().take();
        if let Some(previous) = previous {
            tracing::debug!("Replacing existing peer connection");
            let _ = previous.pc.close().await;
        }

        let pc = self.create_peer_connection().await?;
        let stream_id = format!("talky-{}", uuid::Uuid::new_v4());

        let audio = if config.audio {
            let capability = RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: SAMPLE_RATE,
                channels: CHANNELS,
                ..Default::default()
            };
            Some(Self::add_local_track(&pc, capability, "audio", &stream_id).await?)
        } else {
            None
        };

        let video = if config.video {
            let capability = RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: VIDEO_CLOCK_RATE,
                ..Default::default()
            };
            Some(Self::add_local_track(&pc, capability, "video", &stream_id).await?)
        } else {
            None
        };

        let (width, height) = config.resolution.dimensions();
        tracing::info!(
            "Local stream {} opened: audio={}, video={} ({}x{} @ {}fps)",
            stream_id,
            config.audio,
            config.video,
            width,
            height,
            config.frame_rate
        );

        *self.session.lock() = Some(Session {
            pc,
            audio,
            video,
            screen: None,
        });

        Ok(LocalStream {
            id: stream_id,
            has_audio: config.audio,
            has_video: config.video,
        })
    }

    async fn create_offer(&self) -> Result<String, MediaError> {
        let pc = self.peer_connection()?;

        let offer = pc.create_offer(None).await.map_err(webrtc_error)?;
        pc.set_local_description(offer.clone())
            .await
            .map_err(webrtc_error)?;

        Ok(offer.sdp)
    }

    async fn create_answer(&self, offer_sdp: String) -> Result<String, MediaError> {
        let pc = self.peer_connection()?;

        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| MediaError::InvalidSdp(e.to_string()))?;
        pc.set_remote_description(offer)
            .await
            .map_err(|e| MediaError::InvalidSdp(e.to_string()))?;

        let answer = pc.create_answer(None).await.map_err(webrtc_error)?;
        pc.set_local_description(answer.clone())
            .await
            .map_err(webrtc_error)?;

        Ok(answer.sdp)
    }

    async fn apply_answer(&self, participant_id: &str, answer_sdp: String) -> Result<(), MediaError> {
        let pc = self.peer_connection()?;
        tracing::debug!("Applying answer from {}", participant_id);

        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| MediaError::InvalidSdp(e.to_string()))?;
        pc.set_remote_description(answer)
            .await
            .map_err(|e| MediaError::InvalidSdp(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: String) -> Result<(), MediaError> {
        let pc = self.peer_connection()?;

        let candidate: RTCIceCandidateInit = serde_json::from_str(&candidate)
            .map_err(|e| MediaError::InvalidCandidate(e.to_string()))?;
        pc.add_ice_candidate(candidate).await.map_err(webrtc_error)
    }

    async fn attach_remote_track(&self, participant_id: &str) -> Result<(), MediaError> {
        if self.attached.lock().insert(participant_id.to_string()) {
            tracing::debug!("Expecting remote media from {}", participant_id);
        }
        Ok(())
    }

    async fn detach_remote_track(&self, participant_id: &str) -> Result<(), MediaError> {
        self.attached.lock().remove(participant_id);
        self.volumes.lock().remove(participant_id);
        if let Some(recorder) = self.recorder.lock().as_mut() {
            recorder.finish(participant_id);
        }
        Ok(())
    }

    async fn start_screen_share(&self) -> Result<(), MediaError> {
        let pc = {
            let session = self.session.lock();
            let session = session.as_ref().ok_or(MediaError::NoLocalStream)?;
            if session.screen.is_some() {
                return Err(MediaError::ScreenShareActive);
            }
            Arc::clone(&session.pc)
        };

        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_string(),
            clock_rate: VIDEO_CLOCK_RATE,
            ..Default::default()
        };
        let screen = Self::add_local_track(&pc, capability, "screen", "talky-screen").await?;

        if let Some(session) = self.session.lock().as_mut() {
            session.screen = Some(screen);
        }
        tracing::info!("Screen share started");
        Ok(())
    }

    async fn stop_screen_share(&self) -> Result<(), MediaError> {
        let (pc, screen) = {
            let mut session = self.session.lock();
            let session = session.as_mut().ok_or(MediaError::NoLocalStream)?;
            let screen = session.screen.take().ok_or(MediaError::ScreenShareInactive)?;
            (Arc::clone(&session.pc), screen)
        };

        pc.remove_track(&screen.sender).await.map_err(webrtc_error)?;
        tracing::info!("Screen share stopped");
        Ok(())
    }

    async fn set_audio_enabled(&self, enabled: bool) -> Result<(), MediaError> {
        self.set_track_enabled(enabled, |s| s.audio.as_ref()).await
    }

    async fn set_video_enabled(&self, enabled: bool) -> Result<(), MediaError> {
        self.set_track_enabled(enabled, |s| s.video.as_ref()).await
    }

    async fn set_participant_volume(&self, participant_id: &str, volume: u8) -> Result<(), MediaError> {
        self.volumes
            .lock()
            .insert(participant_id.to_string(), volume.min(100));
        Ok(())
    }

    async fn start_recording(&self, include_translation: bool) -> Result<(), MediaError> {
        let mut recorder = self.recorder.lock();
        if recorder.is_some() {
            return Err(MediaError::Recording("already running".to_string()));
        }

        let id = chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string();
        *recorder = Some(Recorder::start(
            id.clone(),
            self.recordings_dir.clone(),
            include_translation,
        )?);
        tracing::info!(
            "Recording {} started (translations included: {})",
            id,
            include_translation
        );
        Ok(())
    }

    async fn stop_recording(&self) -> Result<(), MediaError> {
        let mut recorder = self
            .recorder
            .lock()
            .take()
            .ok_or_else(|| MediaError::Recording("not running".to_string()))?;

        recorder.finish_all();
        tracing::info!("Recording {} stopped", recorder.id);
        Ok(())
    }

    async fn set_recording_paused(&self, paused: bool) -> Result<(), MediaError> {
        let mut recorder = self.recorder.lock();
        let recorder = recorder
            .as_mut()
            .ok_or_else(|| MediaError::Recording("not running".to_string()))?;
        recorder.paused = paused;
        Ok(())
    }

    async fn record_subtitle(&self, subtitle: &SubtitleData) -> Result<(), MediaError> {
        match self.recorder.lock().as_mut() {
            Some(recorder) => recorder.write_subtitle(subtitle),
            None => Ok(()),
        }
    }

    async fn network_stats(&self) -> Result<Option<NetworkStats>, MediaError> {
        let Ok(pc) = self.peer_connection() else {
            return Ok(None);
        };

        let report = pc.get_stats().await;
        // webrtc-rs liefert keine Verlustrate pro Kandidatenpaar
        let stats = report.reports.values().find_map(|report| match report {
            StatsReportType::CandidatePair(pair) if pair.nominated => Some(NetworkStats::new(
                pair.current_round_trip_time * 1000.0,
                pair.available_outgoing_bitrate / 1000.0,
                pair.available_incoming_bitrate / 1000.0,
                0.0,
            )),
            _ => None,
        });

        Ok(stats)
    }

    async fn close(&self) -> Result<(), MediaError> {
        if let Some(mut recorder) = self.recorder.lock().take() {
            recorder.finish_all();
        }
        self.attached.lock().clear();
        self.volumes.lock().clear();

        let session = self.session.lock().take();
        if let Some(session) = session {
            session.pc.close().await.map_err(webrtc_error)?;
            tracing::info!("Peer connection closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for WebRtcMediaPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcMediaPipeline")
            .field("has_session", &self.session.lock().is_some())
            .field("is_recording", &self.recorder.lock().is_some())
            .field("attached", &self.attached.lock().len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::VideoResolution;

    fn video_only() -> MediaStreamConfig {
        MediaStreamConfig {
            audio: false,
            video: true,
            resolution: VideoResolution::Sd,
            frame_rate: 15,
            noise_suppression: false,
            echo_cancellation: false,
            auto_gain_control: false,
        }
    }

    fn pipeline() -> WebRtcMediaPipeline {
        WebRtcMediaPipeline::new(std::env::temp_dir().join("talky-recordings"))
            .with_ice_servers(Vec::new())
    }

    #[test]
    fn test_file_safe_ids() {
        assert_eq!(file_safe("peer/1:a"), "peer_1_a");
        assert_eq!(file_safe("abc-123"), "abc-123");
    }

    #[tokio::test]
    async fn test_requires_local_stream() {
        let media = pipeline();

        assert_eq!(media.create_offer().await, Err(MediaError::NoLocalStream));
        assert_eq!(media.network_stats().await, Ok(None));
        assert!(media.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_offer_contains_local_video() {
        let media = pipeline();
        let stream = media.get_local_stream(&video_only()).await.unwrap();
        assert!(stream.has_video);
        assert!(!stream.has_audio);

        let sdp = media.create_offer().await.unwrap();
        assert!(sdp.contains("m=video"));

        media.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_screen_share_toggle() {
        let media = pipeline();
        media.get_local_stream(&video_only()).await.unwrap();

        assert_eq!(
            media.stop_screen_share().await,
            Err(MediaError::ScreenShareInactive)
        );
        media.start_screen_share().await.unwrap();
        assert_eq!(
            media.start_screen_share().await,
            Err(MediaError::ScreenShareActive)
        );
        media.stop_screen_share().await.unwrap();

        media.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_volume_and_detach() {
        let media = pipeline();
        media.attach_remote_track("bob").await.unwrap();
        media.set_participant_volume("bob", 40).await.unwrap();

        assert!(media.is_attached("bob"));
        assert_eq!(media.participant_volume("bob"), 40);

        media.detach_remote_track("bob").await.unwrap();
        assert!(!media.is_attached("bob"));
        assert_eq!(media.participant_volume("bob"), 100);
    }

    #[tokio::test]
    async fn test_local_tracks_follow_stream() {
        let media = pipeline();
        assert!(media.local_video_track().is_none());

        media.get_local_stream(&video_only()).await.unwrap();
        assert!(media.local_video_track().is_some());
        assert!(media.local_audio_track().is_none());

        media.close().await.unwrap();
        assert!(media.local_video_track().is_none());
    }

    #[tokio::test]
    async fn test_recording_writes_subtitles_when_translation_included() {
        let dir = std::env::temp_dir().join(format!("talky-rec-{}", uuid::Uuid::new_v4()));
        let media = WebRtcMediaPipeline::new(dir.clone()).with_ice_servers(Vec::new());

        media.start_recording(true).await.unwrap();
        media
            .record_subtitle(&SubtitleData::new("bob", "hallo", "de", 1_000, 500))
            .await
            .unwrap();
        media.set_recording_paused(true).await.unwrap();
        media
            .record_subtitle(&SubtitleData::new("bob", "pausiert", "de", 2_000, 500))
            .await
            .unwrap();
        media.stop_recording().await.unwrap();

        let sidecar = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| p.to_string_lossy().ends_with("-subtitles.jsonl"))
            .unwrap();
        let content = std::fs::read_to_string(sidecar).unwrap();
        let lines: Vec<SubtitleData> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "hallo");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_recording_without_translation_has_no_sidecar() {
        let dir = std::env::temp_dir().join(format!("talky-rec-{}", uuid::Uuid::new_v4()));
        let media = WebRtcMediaPipeline::new(dir.clone()).with_ice_servers(Vec::new());

        media.start_recording(false).await.unwrap();
        media
            .record_subtitle(&SubtitleData::new("bob", "hallo", "de", 1_000, 500))
            .await
            .unwrap();
        media.stop_recording().await.unwrap();

        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
        let _ = std::fs::remove_dir_all(dir);
    }
}
