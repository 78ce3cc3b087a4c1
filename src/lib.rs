//! Talky - Call-Session-Kern
//!
//! Kern einer Video-Call-Applikation mit Live-Übersetzung:
//! - `CallController` als einziger Writer des Call-States
//! - WebSocket-Signaling mit Ed25519-signierten Nachrichten
//! - WebRTC für Audio/Video, Screen-Share und Aufnahme
//! - Untertitel-Overlay für einen externen Übersetzungsdienst
//! - SQLite für die Anruf-Historie

pub mod config;
pub mod controller;
pub mod crypto;
pub mod error;
pub mod history;
pub mod media;
pub mod session;
pub mod signaling;
pub mod translation;

pub use config::{ControllerConfig, TalkyConfig};
pub use controller::{CallController, CallEvent};
pub use error::CallError;
pub use session::{CallSettings, CallState, CallStatus, Participant, SessionStore};
pub use translation::SubtitleData;

use anyhow::Context;
use crypto::KeyPair;
use history::{CallHistory, HistoryDatabase, HistoryError};
use media::{AudioDevices, MediaError, MediaPipeline, WebRtcMediaPipeline};
use parking_lot::RwLock;
use signaling::{SignalingClient, WebSocketSignalingClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// Default-Filter, wenn `RUST_LOG` nicht gesetzt ist
const DEFAULT_LOG_DIRECTIVES: &str = "talky=debug,webrtc=warn";

/// Hält die WebSocket-Verbindung über Idle-Timeouts hinweg offen
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Initialisiert das Logging; weitere Aufrufe sind wirkungslos
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVES));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// APPLICATION
// ============================================================================

/// Verdrahtet Identität, Signaling, Medien, Historie und die aktuelle Session
pub struct TalkyApp {
    config: TalkyConfig,
    keypair: Arc<KeyPair>,
    peer_id: String,
    history: Arc<HistoryDatabase>,
    signaling: Arc<WebSocketSignalingClient>,
    media: Arc<WebRtcMediaPipeline>,
    session: RwLock<CallController>,
}

impl TalkyApp {
    /// Lädt die Identität, öffnet die Historie, registriert sich beim
    /// Signaling-Server und erstellt die erste Session.
    pub async fn init(config: TalkyConfig) -> anyhow::Result<Self> {
        tracing::info!("Initializing Talky...");

        let keypair = KeyPair::load_or_create(&config.identity_path())
            .context("Failed to load identity key")?;
        let keypair = Arc::new(keypair);
        tracing::info!("Loaded keypair: {:?}", keypair);

        let history = HistoryDatabase::open(&config.history_path())
            .context("Failed to open call history")?;
        let history = Arc::new(history);

        let mut client =
            WebSocketSignalingClient::new(config.signaling_url.to_string(), Arc::clone(&keypair));
        let peer_id = client
            .connect_and_register(config.username.clone(), config.language.clone())
            .await
            .context("Failed to register with signaling server")?;
        tracing::info!("Registered as '{}' with peer_id: {}", config.username, peer_id);

        let signaling = Arc::new(client);
        // endet von selbst, sobald der Client gedroppt wird
        let _ = Arc::clone(&signaling).start_heartbeat(HEARTBEAT_INTERVAL);

        let mut media = WebRtcMediaPipeline::new(config.recordings_dir());
        if let Some(turn) = &config.turn {
            media = media.with_turn_server(
                turn.url.clone(),
                turn.username.clone(),
                turn.credential.clone(),
            );
        }
        let media = Arc::new(media);

        let session = spawn_session(&config, &peer_id, &signaling, &media, &history)
            .context("Failed to create call session")?;

        Ok(Self {
            config,
            keypair,
            peer_id,
            history,
            signaling,
            media,
            session: RwLock::new(session),
        })
    }

    /// Aktuelle Session
    pub fn session(&self) -> CallController {
        self.session.read().clone()
    }

    /// Ersetzt eine beendete Session durch eine neue.
    ///
    /// Eine noch unbenutzte Session wird unverändert zurückgegeben.
    pub fn new_session(&self) -> Result<CallController, CallError> {
        let mut session = self.session.write();

        let status = session.status();
        if status == CallStatus::Idle {
            return Ok(session.clone());
        }
        if !status.is_terminal() {
            return Err(CallError::InvalidState(format!(
                "current session is still {status}"
            )));
        }

        let peer_id = self
            .signaling
            .peer_id()
            .unwrap_or_else(|| self.peer_id.clone());
        let next = spawn_session(
            &self.config,
            &peer_id,
            &self.signaling,
            &self.media,
            &self.history,
        )?;

        tracing::info!("Started new call session");
        *session = next.clone();
        Ok(next)
    }

    pub fn config(&self) -> &TalkyConfig {
        &self.config
    }

    pub fn public_key(&self) -> String {
        self.keypair.public_key_base64()
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn is_connected(&self) -> bool {
        self.signaling.is_connected()
    }

    pub fn audio_devices(&self) -> Result<AudioDevices, MediaError> {
        media::list_audio_devices()
    }

    /// Pipeline für Capture und Wiedergabe des Hosts (lokale Tracks, Lautstärken)
    pub fn media(&self) -> Arc<WebRtcMediaPipeline> {
        Arc::clone(&self.media)
    }

    pub fn history(&self) -> Arc<HistoryDatabase> {
        Arc::clone(&self.history)
    }

    /// Die letzten Anrufe, neueste zuerst
    pub fn recent_calls(&self, limit: usize) -> Result<Vec<CallHistory>, HistoryError> {
        self.history.recent(limit)
    }
}

impl std::fmt::Debug for TalkyApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TalkyApp")
            .field("peer_id", &self.peer_id)
            .field("signaling_url", &self.config.signaling_url.as_str())
            .finish_non_exhaustive()
    }
}

fn spawn_session(
    config: &TalkyConfig,
    peer_id: &str,
    signaling: &Arc<WebSocketSignalingClient>,
    media: &Arc<WebRtcMediaPipeline>,
    history: &Arc<HistoryDatabase>,
) -> Result<CallController, CallError> {
    let local = Participant::local(peer_id, &config.username, &config.language);
    let mut settings = CallSettings::default();
    settings.translation.target_language = config.language.clone();

    let controller = CallController::spawn(
        local,
        settings,
        Arc::clone(signaling) as Arc<dyn SignalingClient>,
        Arc::clone(media) as Arc<dyn MediaPipeline>,
        config.controller,
    )?;

    spawn_history_writer(controller.subscribe(), Arc::clone(history));
    Ok(controller)
}

/// Speichert den `CallEnded`-Eintrag einer Session
fn spawn_history_writer(mut events: broadcast::Receiver<CallEvent>, history: Arc<HistoryDatabase>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CallEvent::CallEnded(entry)) => {
                    match history.record(&entry) {
                        Ok(()) => tracing::info!("Saved call {} to history", entry.call_id),
                        Err(e) => tracing::error!("Failed to save call history: {}", e),
                    }
                    break;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("History writer missed {} call events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
