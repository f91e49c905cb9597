//! The sync client handle and its driver task.
//!
//! DESIGN
//! ======
//! [`SyncClient`] is a cheap cloneable-ish handle (it is not `Clone`;
//! share it behind an `Arc`) that talks to a single spawned driver task
//! over an unbounded command channel. The driver owns the websocket,
//! the connection state machine, and the ack correlation table; shared
//! session state lives behind an async `RwLock` so the handle can serve
//! snapshots without a driver round trip.
//!
//! LIFECYCLE
//! =========
//! The driver loop selects over four sources: commands from the handle,
//! outbound frames queued on the event bus, the inbound socket, and a
//! housekeeping tick. Connects run inline with a handshake timeout;
//! commands issued meanwhile queue behind it. Dropping the last handle
//! closes the command channel and the driver winds down.
//!
//! Acknowledged requests (`room:join`, `chat:send`, `annotation:create`)
//! park a oneshot in the pending table keyed by request frame id and
//! are resolved by the terminal frame whose `parent_id` matches.
//! Everything else is fire-and-forget.

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{RwLock, broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use wire::Frame;

use crate::api::ApiClient;
use crate::bus::EventBus;
use crate::camera::RemotePose;
use crate::chat::prepare_outgoing;
use crate::config::{CredentialSource, SyncConfig};
use crate::error::SyncError;
use crate::persist::{TransformBridge, validate_transform};
use crate::room::JoinState;
use crate::session::{SessionState, SyncEvent};
use crate::transport::{ConnectDecision, ConnectionState, ConnectionStatus, StatusBus};
use crate::types::{
    Annotation, AnnotationDraft, AnnotationPatch, CameraPose, ChatMessage, ModelTransform,
    Participant,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type JoinWaiter = oneshot::Sender<Result<Vec<Participant>, SyncError>>;
type AckWaiter = oneshot::Sender<Result<(), SyncError>>;
type CreateWaiter = oneshot::Sender<Result<Annotation, SyncError>>;

enum Command {
    Connect,
    Disconnect,
    JoinRoom { room_id: String, reply: JoinWaiter },
    LeaveRoom,
    SendChat { body: String, reply: AckWaiter },
    SetTyping { is_typing: bool },
    CameraMoved { pose: CameraPose },
    CreateAnnotation { draft: AnnotationDraft, reply: CreateWaiter },
    UpdateAnnotation { annotation_id: String, patch: AnnotationPatch },
    DeleteAnnotation { annotation_id: String },
    ModelEdited { model_id: String, transform: ModelTransform },
    Shutdown,
}

/// An acknowledged request awaiting its terminal frame.
enum Pending {
    Join { room_id: String, waiters: Vec<JoinWaiter> },
    Chat(AckWaiter),
    Create(CreateWaiter),
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to the sync driver task. All methods are safe to call from
/// any task; request/response methods await the broker's terminal
/// frame, the rest enqueue and return.
pub struct SyncClient {
    cmd: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SyncEvent>,
    state: Arc<RwLock<SessionState>>,
    status_cell: Arc<Mutex<ConnectionStatus>>,
    status_bus: StatusBus,
    bus: EventBus,
    chat_max_len: usize,
}

impl SyncClient {
    /// Build the client and spawn its driver task. Must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidBaseUrl`] when the configured base URL has
    /// no usable scheme.
    pub fn new(config: SyncConfig, credentials: Arc<dyn CredentialSource>) -> Result<Self, SyncError> {
        // Fail fast on a URL that can never produce a websocket.
        config.ws_url()?;
        let api = ApiClient::new(&config.base_url, Arc::clone(&credentials))?;

        let connected = Arc::new(AtomicBool::new(false));
        let (bus, outbound_rx) = EventBus::new(Arc::clone(&connected));
        let state = Arc::new(RwLock::new(SessionState::new(&config)));
        let status_cell = Arc::new(Mutex::new(ConnectionStatus::Disconnected));
        let status_bus = StatusBus::new();
        let (events, _) = broadcast::channel(256);
        let (cmd, cmd_rx) = mpsc::unbounded_channel();
        let chat_max_len = config.chat_max_len;

        let driver = Driver {
            bridge: TransformBridge::new(api.clone(), config.transform_throttle),
            conn: ConnectionState::new(config.max_reconnect_attempts),
            config,
            credentials,
            api,
            bus: bus.clone(),
            connected,
            state: Arc::clone(&state),
            cmd_rx,
            outbound_rx,
            events: events.clone(),
            status_bus: status_bus.clone(),
            status_cell: Arc::clone(&status_cell),
            ws: None,
            pending: HashMap::new(),
            reconnect_at: None,
            local_typing: false,
            typing_refresh_at: Instant::now(),
        };
        tokio::spawn(driver.run());

        Ok(Self {
            cmd,
            events,
            state,
            status_cell,
            status_bus,
            bus,
            chat_max_len,
        })
    }

    /// Start connecting to the broker. Progress surfaces through
    /// status subscriptions and [`SyncEvent::StatusChanged`].
    ///
    /// # Errors
    ///
    /// [`SyncError::Closed`] when the driver has shut down.
    pub fn connect(&self) -> Result<(), SyncError> {
        self.send(Command::Connect)
    }

    /// Tear the connection down. Idempotent; the target room is kept,
    /// so a later [`SyncClient::connect`] rejoins it.
    ///
    /// # Errors
    ///
    /// [`SyncError::Closed`] when the driver has shut down.
    pub fn disconnect(&self) -> Result<(), SyncError> {
        self.send(Command::Disconnect)
    }

    /// Join `room_id`, resolving once the broker acknowledges.
    /// Concurrent calls for the same room coalesce into one request;
    /// calling while joined to another room leaves it first.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotConnected`] without a live transport,
    /// [`SyncError::MissingCredential`] when the credential source is
    /// empty, [`SyncError::JoinRejected`] on broker rejection.
    pub async fn join_room(&self, room_id: &str) -> Result<Vec<Participant>, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::JoinRoom {
            room_id: room_id.to_owned(),
            reply,
        })?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Leave the active room. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// [`SyncError::Closed`] when the driver has shut down.
    pub fn leave_room(&self) -> Result<(), SyncError> {
        self.send(Command::LeaveRoom)
    }

    /// Send a chat message, resolving once the broker acknowledges.
    /// The message itself arrives later through the broadcast stream;
    /// there is no local echo.
    ///
    /// # Errors
    ///
    /// [`SyncError::EmptyMessage`] / [`SyncError::MessageTooLong`] on
    /// validation, [`SyncError::Request`] on broker rejection.
    pub async fn send_chat(&self, body: &str) -> Result<(), SyncError> {
        // Validate here so callers get the error without a driver trip.
        prepare_outgoing(body, self.chat_max_len)?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::SendChat {
            body: body.to_owned(),
            reply,
        })?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Signal that the local user started or stopped typing.
    ///
    /// # Errors
    ///
    /// [`SyncError::Closed`] when the driver has shut down.
    pub fn set_typing(&self, is_typing: bool) -> Result<(), SyncError> {
        self.send(Command::SetTyping { is_typing })
    }

    /// Report a local camera move. Throttled and fire-and-forget;
    /// emissions inside the window are dropped, not queued.
    ///
    /// # Errors
    ///
    /// [`SyncError::Closed`] when the driver has shut down.
    pub fn camera_moved(&self, pose: CameraPose) -> Result<(), SyncError> {
        self.send(Command::CameraMoved { pose })
    }

    /// Create an annotation, resolving to the broker's authoritative
    /// copy (ids and timestamps assigned server side).
    ///
    /// # Errors
    ///
    /// [`SyncError::Request`] when unjoined or on broker rejection.
    pub async fn create_annotation(&self, draft: AnnotationDraft) -> Result<Annotation, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CreateAnnotation { draft, reply })?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Patch an annotation. Applied optimistically to the local store;
    /// the broadcast echo reconciles everyone, this client included.
    ///
    /// # Errors
    ///
    /// [`SyncError::Closed`] when the driver has shut down.
    pub fn update_annotation(&self, annotation_id: &str, patch: AnnotationPatch) -> Result<(), SyncError> {
        self.send(Command::UpdateAnnotation {
            annotation_id: annotation_id.to_owned(),
            patch,
        })
    }

    /// Delete an annotation. Optimistic, like updates.
    ///
    /// # Errors
    ///
    /// [`SyncError::Closed`] when the driver has shut down.
    pub fn delete_annotation(&self, annotation_id: &str) -> Result<(), SyncError> {
        self.send(Command::DeleteAnnotation {
            annotation_id: annotation_id.to_owned(),
        })
    }

    /// Report a model pose edit for throttled REST write-through.
    ///
    /// # Errors
    ///
    /// [`SyncError::NonFiniteTransform`] for NaN/infinite components.
    pub fn model_edited(&self, model_id: &str, transform: ModelTransform) -> Result<(), SyncError> {
        validate_transform(&transform)?;
        self.send(Command::ModelEdited {
            model_id: model_id.to_owned(),
            transform,
        })
    }

    /// Leave the room, close the socket, and flush pending transform
    /// writes. The driver exits afterwards.
    pub fn shutdown(&self) {
        let _ = self.send(Command::Shutdown);
    }

    /// Subscribe to the typed notification stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Register a synchronous status callback. Returns a handle for
    /// [`SyncClient::off_status`].
    pub fn on_status(&self, callback: impl FnMut(ConnectionStatus) + Send + 'static) -> u64 {
        self.status_bus.subscribe(callback)
    }

    /// Deregister a status callback.
    pub fn off_status(&self, id: u64) {
        self.status_bus.unsubscribe(id);
    }

    /// Raw frame bus, for per-event listeners below the typed stream.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        match self.status_cell.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Server-assigned participant id, once the welcome frame arrived.
    pub async fn participant_id(&self) -> Option<String> {
        self.state.read().await.local_participant_id.clone()
    }

    /// Roster of the joined room, excluding this client.
    pub async fn roster(&self) -> Vec<Participant> {
        self.state.read().await.membership.roster()
    }

    /// Annotations of the joined room, in stable display order.
    pub async fn annotations(&self) -> Vec<Annotation> {
        self.state.read().await.annotations.ordered()
    }

    /// Chat backlog plus live messages, in broker delivery order.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.state.read().await.chat.messages().to_vec()
    }

    /// Display names currently typing, sorted.
    pub async fn typing(&self) -> Vec<String> {
        self.state.read().await.typing.active()
    }

    /// Last known camera pose per peer. Surfaced only; never applied
    /// to the local camera here.
    pub async fn remote_poses(&self) -> HashMap<String, RemotePose> {
        self.state.read().await.camera.remote_poses().clone()
    }

    fn send(&self, command: Command) -> Result<(), SyncError> {
        self.cmd.send(command).map_err(|_| SyncError::Closed)
    }
}

// ============================================================================
// Driver
// ============================================================================

enum Step {
    Command(Option<Command>),
    Outbound(Option<Frame>),
    Socket(Option<Result<Message, WsError>>),
    Tick,
}

struct Driver {
    config: SyncConfig,
    credentials: Arc<dyn CredentialSource>,
    api: ApiClient,
    bridge: TransformBridge,
    bus: EventBus,
    connected: Arc<AtomicBool>,
    state: Arc<RwLock<SessionState>>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    outbound_rx: mpsc::UnboundedReceiver<Frame>,
    events: broadcast::Sender<SyncEvent>,
    status_bus: StatusBus,
    status_cell: Arc<Mutex<ConnectionStatus>>,
    conn: ConnectionState,
    ws: Option<WsStream>,
    /// Acknowledged requests awaiting a terminal frame, by request id.
    pending: HashMap<String, Pending>,
    reconnect_at: Option<Instant>,
    local_typing: bool,
    typing_refresh_at: Instant,
}

/// Pends forever while disconnected so the select arm stays quiet.
async fn next_message(ws: &mut Option<WsStream>) -> Option<Result<Message, WsError>> {
    match ws {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn run(mut self) {
        let mut tick = tokio::time::interval(std::time::Duration::from_millis(250));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                command = self.cmd_rx.recv() => Step::Command(command),
                frame = self.outbound_rx.recv() => Step::Outbound(frame),
                message = next_message(&mut self.ws) => Step::Socket(message),
                _ = tick.tick() => Step::Tick,
            };

            match step {
                // Channel closed means every handle is gone.
                Step::Command(None) => break,
                Step::Command(Some(command)) => {
                    if self.handle_command(command).await {
                        break;
                    }
                }
                // The driver holds a bus clone, so the outbound channel
                // never closes while it runs.
                Step::Outbound(None) => break,
                Step::Outbound(Some(frame)) => self.write_frame(frame).await,
                Step::Socket(message) => self.handle_socket(message).await,
                Step::Tick => self.housekeeping().await,
            }
        }

        if let Some(mut ws) = self.ws.take() {
            let _ = ws.close(None).await;
        }
        debug!("sync driver stopped");
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Returns `true` when the driver should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect => self.try_connect().await,

            Command::Disconnect => {
                if let Some(mut ws) = self.ws.take() {
                    let _ = ws.close(None).await;
                }
                self.connected.store(false, Ordering::Release);
                self.conn.shutdown();
                self.reconnect_at = None;
                self.local_typing = false;
                self.fail_pending();
                if let Some(room_id) = self.state.write().await.transport_lost() {
                    let _ = self.events.send(SyncEvent::RoomLeft { room_id });
                }
                self.set_status(ConnectionStatus::Disconnected);
            }

            Command::JoinRoom { room_id, reply } => {
                self.start_join(room_id, Some(reply)).await;
            }

            Command::LeaveRoom => {
                let target = {
                    let state = self.state.read().await;
                    state.membership.target().map(ToOwned::to_owned)
                };
                if let Some(room_id) = target {
                    self.bus
                        .emit(Frame::request("room:leave", Some(&room_id), json!({})));
                    self.state.write().await.left_room();
                    self.local_typing = false;
                    let _ = self.events.send(SyncEvent::RoomLeft { room_id });
                }
            }

            Command::SendChat { body, reply } => self.send_chat(body, reply).await,

            Command::SetTyping { is_typing } => {
                let Some(room_id) = self.joined_room().await else {
                    debug!("typing signal outside a room dropped");
                    return false;
                };
                self.local_typing = is_typing;
                if is_typing {
                    self.typing_refresh_at = Instant::now() + self.config.typing_expiry / 2;
                }
                self.emit_typing(is_typing, &room_id);
            }

            Command::CameraMoved { pose } => self.camera_moved(pose).await,

            Command::CreateAnnotation { draft, reply } => {
                let Some(room_id) = self.joined_room().await else {
                    let _ = reply.send(Err(SyncError::Request {
                        event: "annotation:create".to_owned(),
                        message: "not joined to a room".to_owned(),
                    }));
                    return false;
                };
                let data = serde_json::to_value(&draft).unwrap_or(Value::Null);
                let frame = Frame::request("annotation:create", Some(&room_id), data);
                let id = frame.id.clone();
                if self.bus.emit(frame) {
                    self.pending.insert(id, Pending::Create(reply));
                } else {
                    let _ = reply.send(Err(SyncError::NotConnected));
                }
            }

            Command::UpdateAnnotation { annotation_id, patch } => {
                if patch.is_empty() {
                    return false;
                }
                let Some(room_id) = self.joined_room().await else {
                    debug!("annotation update outside a room dropped");
                    return false;
                };
                // Optimistic apply; the broadcast echo is authoritative
                // and reconciles idempotently.
                let _ = self
                    .state
                    .write()
                    .await
                    .annotations
                    .apply_patch(&annotation_id, &patch, wire::now_ms());
                let mut data = serde_json::to_value(&patch).unwrap_or(Value::Null);
                if let Some(map) = data.as_object_mut() {
                    map.insert("annotation_id".to_owned(), Value::String(annotation_id));
                }
                self.bus
                    .emit(Frame::request("annotation:update", Some(&room_id), data));
            }

            Command::DeleteAnnotation { annotation_id } => {
                let Some(room_id) = self.joined_room().await else {
                    debug!("annotation delete outside a room dropped");
                    return false;
                };
                let _ = self.state.write().await.annotations.remove(&annotation_id);
                self.bus.emit(Frame::request(
                    "annotation:delete",
                    Some(&room_id),
                    json!({ "annotation_id": annotation_id }),
                ));
            }

            Command::ModelEdited { model_id, transform } => {
                self.bridge.model_edited(&model_id, transform);
            }

            Command::Shutdown => {
                if let Some(room_id) = self.joined_room().await {
                    self.write_frame(Frame::request("room:leave", Some(&room_id), json!({})))
                        .await;
                }
                self.bridge.flush();
                if let Some(mut ws) = self.ws.take() {
                    let _ = ws.close(None).await;
                }
                self.connected.store(false, Ordering::Release);
                self.conn.shutdown();
                self.fail_pending();
                self.set_status(ConnectionStatus::Disconnected);
                return true;
            }
        }
        false
    }

    async fn send_chat(&mut self, body: String, reply: AckWaiter) {
        let prepared = match prepare_outgoing(&body, self.config.chat_max_len) {
            Ok(prepared) => prepared,
            Err(error) => {
                let _ = reply.send(Err(error));
                return;
            }
        };
        let Some(room_id) = self.joined_room().await else {
            let _ = reply.send(Err(SyncError::Request {
                event: "chat:send".to_owned(),
                message: "not joined to a room".to_owned(),
            }));
            return;
        };

        // Sending a message implicitly ends the typing indicator.
        if self.local_typing {
            self.local_typing = false;
            self.emit_typing(false, &room_id);
        }

        let frame = Frame::request("chat:send", Some(&room_id), json!({ "body": prepared }));
        let id = frame.id.clone();
        if self.bus.emit(frame) {
            self.pending.insert(id, Pending::Chat(reply));
        } else {
            let _ = reply.send(Err(SyncError::NotConnected));
        }
    }

    async fn camera_moved(&mut self, pose: CameraPose) {
        let payload = {
            let mut state = self.state.write().await;
            if state.membership.join_state() != JoinState::Joined {
                return;
            }
            if !state.camera.should_emit(Instant::now()) {
                return;
            }
            (
                state.membership.target().map(ToOwned::to_owned),
                state.local_participant_id.clone().unwrap_or_default(),
            )
        };
        let (room_id, participant_id) = payload;
        self.bus.emit(Frame::request(
            "camera:update",
            room_id.as_deref(),
            json!({
                "participant_id": participant_id,
                "display_name": self.config.display_name,
                "pose": pose,
            }),
        ));
    }

    fn emit_typing(&mut self, is_typing: bool, room_id: &str) {
        self.bus.emit(Frame::request(
            "chat:typing",
            Some(room_id),
            json!({
                "display_name": self.config.display_name,
                "is_typing": is_typing,
            }),
        ));
    }

    // ------------------------------------------------------------------
    // Join
    // ------------------------------------------------------------------

    async fn start_join(&mut self, room_id: String, reply: Option<JoinWaiter>) {
        if self.conn.status() != ConnectionStatus::Connected {
            if let Some(reply) = reply {
                let _ = reply.send(Err(SyncError::NotConnected));
            }
            return;
        }

        // Switching rooms leaves the old one first.
        let previous = {
            let state = self.state.read().await;
            (state.membership.join_state() == JoinState::Joined)
                .then(|| state.membership.target().map(ToOwned::to_owned))
                .flatten()
        };
        if let Some(old) = previous {
            if old != room_id {
                self.bus
                    .emit(Frame::request("room:leave", Some(&old), json!({})));
                self.state.write().await.left_room();
                let _ = self.events.send(SyncEvent::RoomLeft { room_id: old });
            }
        }

        let decision = self.state.write().await.membership.begin_join(&room_id);
        match decision {
            crate::room::JoinDecision::AlreadyJoined => {
                if let Some(reply) = reply {
                    let roster = self.state.read().await.membership.roster();
                    let _ = reply.send(Ok(roster));
                }
            }
            crate::room::JoinDecision::InFlight => {
                if let Some(reply) = reply {
                    let parked = self.pending.values_mut().find_map(|pending| match pending {
                        Pending::Join { room_id: pending_room, waiters }
                            if *pending_room == room_id =>
                        {
                            Some(waiters)
                        }
                        _ => None,
                    });
                    match parked {
                        Some(waiters) => waiters.push(reply),
                        // In flight with no pending entry means the
                        // request never made it out; report that.
                        None => {
                            let _ = reply.send(Err(SyncError::NotConnected));
                        }
                    }
                }
            }
            crate::room::JoinDecision::Begin => {
                let Some(token) = self.credentials.token() else {
                    self.state.write().await.membership.join_failed();
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(SyncError::MissingCredential));
                    }
                    return;
                };
                let frame = Frame::request(
                    "room:join",
                    Some(&room_id),
                    json!({
                        "credential": token,
                        "display_name": self.config.display_name,
                    }),
                );
                let id = frame.id.clone();
                if self.bus.emit(frame) {
                    self.pending.insert(
                        id,
                        Pending::Join {
                            room_id,
                            waiters: reply.into_iter().collect(),
                        },
                    );
                } else {
                    self.state.write().await.membership.join_failed();
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(SyncError::NotConnected));
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    async fn try_connect(&mut self) {
        if self.conn.begin_connect() != ConnectDecision::Begin {
            return;
        }
        self.reconnect_at = None;
        self.set_status(ConnectionStatus::Connecting);

        let url = match self.config.ws_url() {
            Ok(url) => url,
            Err(error) => {
                // A bad URL never gets better; no point retrying.
                warn!(%error, "cannot derive websocket URL");
                self.conn.shutdown();
                self.set_status(ConnectionStatus::Disconnected);
                return;
            }
        };

        match self.open_socket(&url).await {
            Ok(stream) => {
                self.ws = Some(stream);
                self.conn.established();
                self.connected.store(true, Ordering::Release);
                self.set_status(ConnectionStatus::Connected);
                info!(%url, "connected to broker");

                // The target room survives disconnection; rejoin it.
                let rejoin = {
                    let state = self.state.read().await;
                    state.membership.target().map(ToOwned::to_owned)
                };
                if let Some(room_id) = rejoin {
                    info!(%room_id, "rejoining after reconnect");
                    self.start_join(room_id, None).await;
                }
            }
            Err(error) => {
                warn!(%error, "connect attempt failed");
                self.connect_attempt_failed();
            }
        }
    }

    async fn open_socket(&self, url: &str) -> Result<WsStream, SyncError> {
        match tokio::time::timeout(self.config.handshake_timeout, connect_async(url)).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(error)) => Err(SyncError::WsConnect(Box::new(error))),
            Err(_elapsed) => Err(SyncError::HandshakeTimeout),
        }
    }

    fn connect_attempt_failed(&mut self) {
        if self.conn.attempt_failed() {
            self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay);
        } else {
            info!(attempts = self.conn.attempts(), "giving up on automatic reconnection");
        }
        self.set_status(self.conn.status());
    }

    async fn socket_lost(&mut self, server_initiated: bool) {
        self.ws = None;
        self.connected.store(false, Ordering::Release);
        self.local_typing = false;
        self.fail_pending();
        if self.conn.dropped(server_initiated) {
            self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay);
        }
        if let Some(room_id) = self.state.write().await.transport_lost() {
            let _ = self.events.send(SyncEvent::RoomLeft { room_id });
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    async fn write_frame(&mut self, frame: Frame) {
        let Some(ws) = self.ws.as_mut() else {
            // Raced a disconnect; fire-and-forget frames are dropped.
            debug!(event = %frame.event, "outbound frame dropped, transport gone");
            return;
        };
        let bytes = wire::encode_frame(&frame);
        if let Err(error) = ws.send(Message::Binary(bytes.into())).await {
            warn!(%error, "websocket send failed");
            self.socket_lost(true).await;
        }
    }

    async fn handle_socket(&mut self, message: Option<Result<Message, WsError>>) {
        match message {
            Some(Ok(Message::Binary(bytes))) => match wire::decode_frame(&bytes) {
                Ok(frame) => self.handle_frame(frame).await,
                Err(error) => warn!(%error, "undecodable frame dropped"),
            },
            Some(Ok(Message::Close(_))) | None => {
                info!("broker closed the connection");
                self.socket_lost(true).await;
            }
            // Pings/pongs are handled by tungstenite; stray text is
            // not part of the protocol.
            Some(Ok(_)) => {}
            Some(Err(error)) => {
                warn!(%error, "websocket stream error");
                self.socket_lost(true).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound frames
    // ------------------------------------------------------------------

    async fn handle_frame(&mut self, frame: Frame) {
        if frame.kind.is_terminal() {
            if let Some(parent) = frame.parent_id.clone() {
                if let Some(pending) = self.pending.remove(&parent) {
                    self.resolve_pending(pending, &frame).await;
                } else {
                    debug!(event = %frame.event, "terminal frame with no pending request");
                }
            }
            self.bus.dispatch(&frame);
            return;
        }

        let event = self.state.write().await.apply_event(&frame, Instant::now());
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        self.bus.dispatch(&frame);
    }

    async fn resolve_pending(&mut self, pending: Pending, frame: &Frame) {
        let failure = (frame.kind == wire::Kind::Error).then(|| {
            frame
                .error_message()
                .unwrap_or("request rejected")
                .to_owned()
        });

        match pending {
            Pending::Join { room_id, waiters } => match failure {
                None => self.finish_join(room_id, waiters, frame).await,
                Some(message) => {
                    self.state.write().await.membership.join_failed();
                    for waiter in waiters {
                        let _ = waiter.send(Err(SyncError::JoinRejected(message.clone())));
                    }
                }
            },

            Pending::Chat(reply) => {
                let _ = reply.send(match failure {
                    None => Ok(()),
                    Some(message) => Err(SyncError::Request {
                        event: "chat:send".to_owned(),
                        message,
                    }),
                });
            }

            Pending::Create(reply) => match failure {
                None => match Annotation::deserialize(&frame.data) {
                    Ok(annotation) => {
                        let _ = self.state.write().await.annotations.upsert(annotation.clone());
                        let _ = reply.send(Ok(annotation));
                    }
                    Err(_) => {
                        let _ = reply.send(Err(SyncError::Request {
                            event: "annotation:create".to_owned(),
                            message: "malformed acknowledgement".to_owned(),
                        }));
                    }
                },
                Some(message) => {
                    let _ = reply.send(Err(SyncError::Request {
                        event: "annotation:create".to_owned(),
                        message,
                    }));
                }
            },
        }
    }

    async fn finish_join(&mut self, room_id: String, waiters: Vec<JoinWaiter>, frame: &Frame) {
        // A leave or room switch while the ack was in flight wins.
        let target = {
            let state = self.state.read().await;
            state.membership.target().map(ToOwned::to_owned)
        };
        if target.as_deref() != Some(room_id.as_str()) {
            for waiter in waiters {
                let _ = waiter.send(Err(SyncError::Request {
                    event: "room:join".to_owned(),
                    message: "join superseded".to_owned(),
                }));
            }
            return;
        }

        let local = self.state.read().await.local_participant_id.clone();
        let roster: Vec<Participant> = frame
            .data
            .get("participants")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();
        // The broker may include this client; the roster it exposes is
        // peers only.
        let roster: Vec<Participant> = roster
            .into_iter()
            .filter(|participant| Some(participant.id.as_str()) != local.as_deref())
            .collect();

        self.state.write().await.membership.join_succeeded(roster.clone());
        for waiter in waiters {
            let _ = waiter.send(Ok(roster.clone()));
        }
        info!(%room_id, peers = roster.len(), "joined room");
        let _ = self.events.send(SyncEvent::RoomJoined {
            room_id: room_id.clone(),
            roster,
        });
        self.hydrate(room_id);
    }

    /// Fetch the annotation and chat backlog over REST after a join.
    /// The stores merge the snapshot under anything the live stream
    /// delivered while the fetch was in flight. Failures are logged;
    /// the live stream still works without them.
    fn hydrate(&self, room_id: String) {
        let api = self.api.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            match api.list_annotations(&room_id).await {
                Ok(annotations) => state.write().await.annotations.hydrate(annotations),
                Err(error) => warn!(%room_id, %error, "annotation backlog fetch failed"),
            }
            match api.list_messages(&room_id).await {
                Ok(messages) => state.write().await.chat.hydrate(messages),
                Err(error) => warn!(%room_id, %error, "chat backlog fetch failed"),
            }
        });
    }

    // ------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------

    async fn housekeeping(&mut self) {
        if let Some(at) = self.reconnect_at {
            if Instant::now() >= at {
                self.reconnect_at = None;
                self.try_connect().await;
            }
        }

        let expired = self.state.write().await.typing.expire(Instant::now());
        for display_name in expired {
            let _ = self.events.send(SyncEvent::TypingChanged {
                display_name,
                is_typing: false,
            });
        }

        // Keep our own typing indicator alive on peers' screens.
        if self.local_typing && Instant::now() >= self.typing_refresh_at {
            if let Some(room_id) = self.joined_room().await {
                self.emit_typing(true, &room_id);
                self.typing_refresh_at = Instant::now() + self.config.typing_expiry / 2;
            }
        }

        self.bridge.tick();
    }

    async fn joined_room(&self) -> Option<String> {
        let state = self.state.read().await;
        (state.membership.join_state() == JoinState::Joined)
            .then(|| state.membership.target().map(ToOwned::to_owned))
            .flatten()
    }

    fn set_status(&self, status: ConnectionStatus) {
        {
            let mut cell = match self.status_cell.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *cell == status {
                return;
            }
            *cell = status;
        }
        let _ = self.events.send(SyncEvent::StatusChanged(status));
        self.status_bus.broadcast(status);
    }

    fn fail_pending(&mut self) {
        for (_, pending) in self.pending.drain() {
            match pending {
                Pending::Join { waiters, .. } => {
                    for waiter in waiters {
                        let _ = waiter.send(Err(SyncError::WsClosed));
                    }
                }
                Pending::Chat(reply) => {
                    let _ = reply.send(Err(SyncError::WsClosed));
                }
                Pending::Create(reply) => {
                    let _ = reply.send(Err(SyncError::WsClosed));
                }
            }
        }
    }
}
