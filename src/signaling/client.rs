//! WebSocket Client für den Signaling-Server
//!
//! Verwaltet die WebSocket-Verbindung zum Koordinations-Server:
//! - Registrierung mit Ed25519 Public Key
//! - signierte Nachrichten (timestamp + signature)
//! - automatische Wiederverbindung inkl. Re-Register und Re-Join
//! - Heartbeat
//! - Event-basierte Kommunikation

use super::messages::{ClientMessage, PeerInfo, ServerMessage};
use super::{MediaState, RemotePeer, SignalingClient, SignalingError, SignalingEvent};
use crate::crypto::KeyPair;
use crate::session::CallInvitation;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Maximale Wartezeit auf `registered`
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// RECONNECT POLICY
// ============================================================================

/// Linearer Backoff für Wiederverbindungen
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt.clamp(1, 10)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ClientState {
    is_connected: bool,
    peer_id: Option<String>,
    username: Option<String>,
    language: Option<String>,
    call_id: Option<String>,
}

// ============================================================================
// SIGNALING CLIENT
// ============================================================================

/// WebSocket-Implementierung von `SignalingClient`
pub struct WebSocketSignalingClient {
    server_url: String,
    keypair: Arc<KeyPair>,
    state: Arc<RwLock<ClientState>>,
    tx: Option<mpsc::Sender<String>>,
    event_tx: broadcast::Sender<SignalingEvent>,
    reconnect: ReconnectPolicy,
}

impl WebSocketSignalingClient {
    /// Erstellt einen neuen, noch nicht verbundenen Client
    pub fn new(server_url: String, keypair: Arc<KeyPair>) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            server_url,
            keypair,
            state: Arc::new(RwLock::new(ClientState::default())),
            tx: None,
            event_tx,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Gibt die aktuelle Peer-ID zurück (falls registriert)
    pub fn peer_id(&self) -> Option<String> {
        self.state.read().peer_id.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    /// Leitet die WebSocket-URL ab: http → ws, https → wss, Pfad `/ws`
    pub fn websocket_url(server_url: &str) -> Result<Url, SignalingError> {
        let mut url =
            Url::parse(server_url).map_err(|e| SignalingError::InvalidUrl(e.to_string()))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(SignalingError::InvalidUrl(format!(
                    "unsupported scheme {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| SignalingError::InvalidUrl(server_url.to_string()))?;
        url.set_path("/ws");

        Ok(url)
    }

    /// Verbindet mit dem Signaling-Server und registriert den Benutzer.
    ///
    /// Gibt die vom Server vergebene Peer-ID zurück.
    pub async fn connect_and_register(
        &mut self,
        username: String,
        language: String,
    ) -> Result<String, SignalingError> {
        let ws_url = Self::websocket_url(&self.server_url)?.to_string();
        tracing::info!("Connecting to signaling server: {}", ws_url);

        let (stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (tx, rx) = mpsc::channel::<String>(100);
        self.tx = Some(tx);

        {
            let mut state = self.state.write();
            state.is_connected = true;
            state.username = Some(username.clone());
            state.language = Some(language.clone());
        }
        let _ = self.event_tx.send(SignalingEvent::Connected);

        let (reg_tx, mut reg_rx) = mpsc::channel(1);
        let connection = Connection {
            ws_url,
            keypair: Arc::clone(&self.keypair),
            state: Arc::clone(&self.state),
            event_tx: self.event_tx.clone(),
            reg_tx,
            policy: self.reconnect,
        };
        tokio::spawn(connection.drive(stream, rx));

        self.send(ClientMessage::Register {
            username,
            public_key: self.keypair.public_key_base64(),
            language,
        })
        .await?;

        tokio::select! {
            result = reg_rx.recv() => match result {
                Some(result) => result,
                None => Err(SignalingError::RegistrationFailed("No response".to_string())),
            },
            _ = tokio::time::sleep(REGISTRATION_TIMEOUT) => {
                Err(SignalingError::RegistrationFailed("Timeout".to_string()))
            }
        }
    }

    /// Startet einen Heartbeat-Task.
    ///
    /// Während eines Reconnects wird nur pausiert; der Task endet erst,
    /// wenn der Client gedroppt wird.
    pub fn start_heartbeat(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let client = Arc::downgrade(&self);
        drop(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(client) = client.upgrade() else {
                    tracing::info!("Heartbeat: client dropped, stopping heartbeat task");
                    break;
                };
                if !client.is_connected() {
                    tracing::debug!("Heartbeat: client disconnected, skipping beat");
                    continue;
                }
                let Some(peer_id) = client.peer_id() else {
                    continue;
                };
                if let Err(e) = client.send(ClientMessage::Heartbeat { peer_id }).await {
                    tracing::warn!("Failed to send heartbeat: {}", e);
                }
            }
        })
    }

    async fn send(&self, message: ClientMessage) -> Result<(), SignalingError> {
        let tx = self.tx.as_ref().ok_or(SignalingError::NotConnected)?;
        let frame = seal(&self.keypair, &message)?;

        tracing::debug!("Sending signaling message: {:?}", message);

        tx.send(frame)
            .await
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    fn require_peer(&self) -> Result<String, SignalingError> {
        self.peer_id().ok_or(SignalingError::NotConnected)
    }

    /// Peer-ID und Call-ID des aktuellen Calls
    fn require_call(&self) -> Result<(String, String), SignalingError> {
        let state = self.state.read();
        let peer_id = state.peer_id.clone().ok_or(SignalingError::NotConnected)?;
        let call_id = state.call_id.clone().ok_or(SignalingError::NotInCall)?;
        Ok((peer_id, call_id))
    }
}

#[async_trait]
impl SignalingClient for WebSocketSignalingClient {
    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.event_tx.subscribe()
    }

    fn local_peer_id(&self) -> Option<String> {
        self.peer_id()
    }

    async fn join(&self, call_id: &str) -> Result<(), SignalingError> {
        let peer_id = self.require_peer()?;
        self.send(ClientMessage::JoinCall {
            peer_id,
            call_id: call_id.to_string(),
        })
        .await?;

        self.state.write().call_id = Some(call_id.to_string());
        Ok(())
    }

    async fn leave(&self) -> Result<(), SignalingError> {
        let (peer_id, call_id) = match self.require_call() {
            Ok(ids) => ids,
            Err(SignalingError::NotInCall) => return Ok(()),
            Err(e) => return Err(e),
        };

        self.state.write().call_id = None;
        self.send(ClientMessage::LeaveCall { peer_id, call_id }).await
    }

    async fn send_offer(&self, sdp: String) -> Result<(), SignalingError> {
        let (from_peer_id, call_id) = self.require_call()?;
        self.send(ClientMessage::Offer {
            from_peer_id,
            call_id,
            sdp,
        })
        .await
    }

    async fn send_answer(&self, to_peer_id: &str, sdp: String) -> Result<(), SignalingError> {
        let (from_peer_id, call_id) = self.require_call()?;
        self.send(ClientMessage::Answer {
            from_peer_id,
            to_peer_id: to_peer_id.to_string(),
            call_id,
            sdp,
        })
        .await
    }

    async fn send_ice_candidate(&self, candidate: String) -> Result<(), SignalingError> {
        let (from_peer_id, call_id) = self.require_call()?;
        self.send(ClientMessage::IceCandidate {
            from_peer_id,
            call_id,
            candidate,
        })
        .await
    }

    async fn send_media_state(&self, state: MediaState) -> Result<(), SignalingError> {
        let (peer_id, call_id) = self.require_call()?;
        self.send(ClientMessage::MediaState {
            peer_id,
            call_id,
            muted: state.muted,
            camera_on: state.camera_on,
            screen_sharing: state.screen_sharing,
        })
        .await
    }

    async fn reject_call(
        &self,
        call_id: &str,
        to_peer_id: &str,
        reason: Option<String>,
    ) -> Result<(), SignalingError> {
        let from_peer_id = self.require_peer()?;
        self.send(ClientMessage::RejectCall {
            from_peer_id,
            to_peer_id: to_peer_id.to_string(),
            call_id: call_id.to_string(),
            reason,
        })
        .await
    }

    async fn kick(&self, peer_id: &str) -> Result<(), SignalingError> {
        let (from_peer_id, call_id) = self.require_call()?;
        self.send(ClientMessage::Kick {
            from_peer_id,
            target_peer_id: peer_id.to_string(),
            call_id,
        })
        .await
    }

    async fn invite(&self, invitation: &CallInvitation) -> Result<(), SignalingError> {
        let from_peer_id = self.require_peer()?;
        self.send(ClientMessage::invite(from_peer_id, invitation))
            .await
    }
}

impl std::fmt::Debug for WebSocketSignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketSignalingClient")
            .field("server_url", &self.server_url)
            .field("state", &*self.state.read())
            .finish()
    }
}

// ============================================================================
// CONNECTION DRIVER
// ============================================================================

/// Besitzt die WebSocket-Verbindung; läuft als eigener Task
struct Connection {
    ws_url: String,
    keypair: Arc<KeyPair>,
    state: Arc<RwLock<ClientState>>,
    event_tx: broadcast::Sender<SignalingEvent>,
    reg_tx: mpsc::Sender<Result<String, SignalingError>>,
    policy: ReconnectPolicy,
}

impl Connection {
    async fn drive(self, mut stream: WsStream, mut outgoing: mpsc::Receiver<String>) {
        let mut restore = Vec::new();

        loop {
            let (mut write, mut read) = stream.split();

            for frame in restore.drain(..) {
                if let Err(e) = write.send(Message::Text(frame)).await {
                    tracing::warn!("Failed to restore signaling session: {}", e);
                }
            }

            let reason = loop {
                tokio::select! {
                    frame = outgoing.recv() => match frame {
                        Some(frame) => {
                            if let Err(e) = write.send(Message::Text(frame)).await {
                                break e.to_string();
                            }
                        }
                        None => {
                            tracing::debug!("Signaling client dropped, closing WebSocket");
                            let _ = write.close().await;
                            self.state.write().is_connected = false;
                            return;
                        }
                    },
                    incoming = read.next() => match incoming {
                        Some(Ok(Message::Text(text))) => self.dispatch(&text),
                        Some(Ok(Message::Close(_))) | None => break "closed by server".to_string(),
                        Some(Err(e)) => break e.to_string(),
                        Some(Ok(_)) => {}
                    },
                }
            };

            tracing::warn!("Signaling connection lost: {}", reason);
            self.state.write().is_connected = false;
            let _ = self.event_tx.send(SignalingEvent::Disconnected);

            match self.reconnect().await {
                Some(next) => {
                    stream = next;
                    self.state.write().is_connected = true;
                    restore = self.restore_frames();
                    tracing::info!("Signaling connection restored");
                    let _ = self.event_tx.send(SignalingEvent::Reconnected);
                }
                None => {
                    tracing::error!("Giving up on signaling server after {} attempts", self.policy.max_attempts);
                    let _ = self.event_tx.send(SignalingEvent::ConnectionLost { reason });
                    return;
                }
            }
        }
    }

    async fn reconnect(&self) -> Option<WsStream> {
        for attempt in 1..=self.policy.max_attempts {
            tokio::time::sleep(self.policy.delay_for(attempt)).await;
            tracing::info!(
                "Reconnecting to signaling server (attempt {}/{})",
                attempt,
                self.policy.max_attempts
            );

            match connect_async(self.ws_url.as_str()).await {
                Ok((stream, _)) => return Some(stream),
                Err(e) => tracing::warn!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }
        None
    }

    /// Re-Register und Re-Join nach einer Wiederverbindung
    fn restore_frames(&self) -> Vec<String> {
        let state = self.state.read().clone();
        let mut messages = Vec::new();

        if let Some(username) = state.username {
            messages.push(ClientMessage::Register {
                username,
                public_key: self.keypair.public_key_base64(),
                language: state.language.unwrap_or_else(|| "auto".to_string()),
            });
        }
        if let (Some(peer_id), Some(call_id)) = (state.peer_id, state.call_id) {
            messages.push(ClientMessage::JoinCall { peer_id, call_id });
        }

        messages
            .iter()
            .filter_map(|message| match seal(&self.keypair, message) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    tracing::error!("Failed to seal restore message: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Verarbeitet eingehende Server-Nachrichten
    fn dispatch(&self, text: &str) {
        let message = match serde_json::from_str::<ServerMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Ignoring unparsable signaling message: {}", e);
                return;
            }
        };

        let event = match message {
            ServerMessage::Registered {
                peer_id, username, ..
            } => {
                tracing::info!("Registered as {} with peer_id {}", username, peer_id);
                {
                    let mut state = self.state.write();
                    state.peer_id = Some(peer_id.clone());
                    state.username = Some(username);
                }
                let _ = self.reg_tx.try_send(Ok(peer_id));
                None
            }

            ServerMessage::CallJoined {
                call_id,
                participants,
            } => {
                tracing::info!(
                    "Joined call {} ({} participants present)",
                    call_id,
                    participants.len()
                );
                for peer in participants {
                    let _ = self
                        .event_tx
                        .send(SignalingEvent::ParticipantJoined(peer.into()));
                }
                None
            }

            ServerMessage::IncomingCall {
                call_id,
                from_peer_id,
                from_username,
                from_language,
                call_type,
                sdp,
                expires_at,
            } => Some(SignalingEvent::IncomingCall {
                call_id,
                from: RemotePeer {
                    peer_id: from_peer_id,
                    username: from_username,
                    language: from_language,
                },
                call_type,
                sdp,
                expires_at: Utc
                    .timestamp_millis_opt(expires_at)
                    .single()
                    .unwrap_or_else(Utc::now),
            }),

            ServerMessage::IncomingAnswer {
                from_peer_id,
                from_username,
                from_language,
                sdp,
            } => Some(SignalingEvent::AnswerReceived {
                from: RemotePeer {
                    peer_id: from_peer_id,
                    username: from_username,
                    language: from_language,
                },
                sdp,
            }),

            ServerMessage::IncomingIceCandidate {
                from_peer_id,
                candidate,
            } => Some(SignalingEvent::IceCandidateReceived {
                from_peer_id,
                candidate,
            }),

            ServerMessage::ParticipantJoined(peer) => {
                Some(SignalingEvent::ParticipantJoined(peer.into()))
            }

            ServerMessage::ParticipantLeft { peer_id } => {
                Some(SignalingEvent::ParticipantLeft { peer_id })
            }

            ServerMessage::ParticipantMediaState {
                peer_id,
                muted,
                camera_on,
                screen_sharing,
            } => Some(SignalingEvent::MediaStateChanged {
                peer_id,
                state: MediaState {
                    muted,
                    camera_on,
                    screen_sharing,
                },
            }),

            ServerMessage::CallRejected { by_peer_id, reason } => {
                Some(SignalingEvent::CallRejected { by_peer_id, reason })
            }

            ServerMessage::Kicked { by_peer_id } => Some(SignalingEvent::Kicked { by_peer_id }),

            ServerMessage::Error { code, message } => {
                tracing::error!("Server error {}: {}", code, message);
                // Fehler während der Registrierung beendet connect_and_register
                let _ = self.reg_tx.try_send(Err(SignalingError::ServerError {
                    code,
                    message: message.clone(),
                }));
                Some(SignalingEvent::Error { code, message })
            }

            ServerMessage::Pong { .. } => None,
        };

        if let Some(event) = event {
            tracing::debug!("Signaling event: {:?}", event);
            let _ = self.event_tx.send(event);
        }
    }
}

impl From<PeerInfo> for RemotePeer {
    fn from(peer: PeerInfo) -> Self {
        RemotePeer {
            peer_id: peer.peer_id,
            username: peer.username,
            language: peer.language,
        }
    }
}

/// Ergänzt `timestamp` und `signature` und serialisiert die Nachricht
fn seal(keypair: &KeyPair, message: &ClientMessage) -> Result<String, SignalingError> {
    let mut value =
        serde_json::to_value(message).map_err(|e| SignalingError::SendFailed(e.to_string()))?;

    let object = value
        .as_object_mut()
        .ok_or_else(|| SignalingError::SendFailed("message is not a JSON object".to_string()))?;
    object.insert(
        "timestamp".to_string(),
        serde_json::Value::from(Utc::now().timestamp_millis()),
    );

    let signature = keypair.sign_message(&value);
    if let Some(object) = value.as_object_mut() {
        object.insert("signature".to_string(), serde_json::Value::String(signature));
    }

    serde_json::to_string(&value).map_err(|e| SignalingError::SendFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url() {
        let url = WebSocketSignalingClient::websocket_url("https://signal.talky.app").unwrap();
        assert_eq!(url.as_str(), "wss://signal.talky.app/ws");

        let url = WebSocketSignalingClient::websocket_url("http://localhost:8787/api").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8787/ws");

        assert!(matches!(
            WebSocketSignalingClient::websocket_url("ftp://example.com"),
            Err(SignalingError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_sealed_message_verifies() {
        let keypair = KeyPair::generate();
        let frame = seal(
            &keypair,
            &ClientMessage::Heartbeat {
                peer_id: "peer-1".to_string(),
            },
        )
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["peerId"], "peer-1");
        assert!(value["timestamp"].is_i64());

        let signature = value["signature"].as_str().unwrap();
        assert!(KeyPair::verify_message(&keypair.public_key_base64(), &value, signature).unwrap());
    }

    #[tokio::test]
    async fn test_calls_require_registration() {
        let client = WebSocketSignalingClient::new(
            "https://signal.talky.app".to_string(),
            Arc::new(KeyPair::generate()),
        );

        assert_eq!(
            client.join("call-1").await,
            Err(SignalingError::NotConnected)
        );
        assert_eq!(
            client.send_offer("v=0".to_string()).await,
            Err(SignalingError::NotConnected)
        );
        assert_eq!(client.leave().await, Err(SignalingError::NotConnected));
    }

    #[tokio::test]
    async fn test_heartbeat_survives_disconnect_until_client_dropped() {
        let client = Arc::new(WebSocketSignalingClient::new(
            "https://signal.talky.app".to_string(),
            Arc::new(KeyPair::generate()),
        ));

        let heartbeat = Arc::clone(&client).start_heartbeat(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!client.is_connected());
        assert!(!heartbeat.is_finished());

        drop(client);
        let stopped = tokio::time::timeout(Duration::from_secs(1), heartbeat).await;
        assert!(matches!(stopped, Ok(Ok(()))));
    }
}
