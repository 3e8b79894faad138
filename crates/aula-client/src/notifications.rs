use std::sync::Arc;

use async_trait::async_trait;
use aula_core::{
    ChannelError, ChannelEvent, ChannelObservers, CloseOutcome, ConnectionState,
    ConnectionStateMachine, EventStream, NotificationEvent, RetryPolicy, decode_notification_frame,
};
use aula_platform::TokenProvider;
use futures_util::StreamExt;
use tokio::{net::TcpStream, sync::Mutex, task::JoinHandle};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

const NOTIFICATIONS_PATH: &str = "ws/notifications/";
const DERIVED_WS_PORT: u16 = 8000;
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Callback receiving every decoded notification.
pub type NotificationHandler = Arc<dyn Fn(NotificationEvent) + Send + Sync>;

/// Opens one transport session per connection attempt.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn open(&self, endpoint: &Url) -> Result<Box<dyn NotificationSession>, ChannelError>;
}

/// One live transport session.
#[async_trait]
pub trait NotificationSession: Send {
    /// Next text frame. `None` means the peer closed the session.
    /// `ChannelError::Decode` drops only that frame; any other error ends the
    /// session.
    async fn next_frame(&mut self) -> Option<Result<String, ChannelError>>;

    async fn close(&mut self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

#[async_trait]
impl NotificationTransport for WebSocketTransport {
    async fn open(&self, endpoint: &Url) -> Result<Box<dyn NotificationSession>, ChannelError> {
        let (stream, _response) = connect_async(endpoint.as_str())
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;
        Ok(Box::new(WebSocketSession { stream }))
    }
}

struct WebSocketSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl NotificationSession for WebSocketSession {
    async fn next_frame(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => {
                    return Some(
                        String::from_utf8(bytes.to_vec())
                            .map_err(|err| ChannelError::Decode(err.to_string())),
                    );
                }
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite on the next read.
                Ok(_) => continue,
                Err(err) => return Some(Err(ChannelError::Transport(err.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub base_url: Url,
    pub policy: RetryPolicy,
    pub event_buffer: usize,
}

impl NotificationConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            policy: RetryPolicy::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Websocket origin derived from the REST base: `https -> wss`,
/// `http -> ws`, same host, port 8000.
pub fn websocket_base_from_api(api_url: &Url) -> Result<Url, ChannelError> {
    let scheme = match api_url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(ChannelError::InvalidEndpoint(format!(
                "cannot derive a websocket origin from scheme '{other}'"
            )));
        }
    };
    let host = api_url
        .host_str()
        .ok_or_else(|| ChannelError::InvalidEndpoint(format!("'{api_url}' has no host")))?;
    Url::parse(&format!("{scheme}://{host}:{DERIVED_WS_PORT}/"))
        .map_err(|err| ChannelError::InvalidEndpoint(err.to_string()))
}

/// `{base}/ws/notifications/?token=<token>`
pub fn notification_endpoint(base: &Url, token: &str) -> Result<Url, ChannelError> {
    if !matches!(base.scheme(), "ws" | "wss") {
        return Err(ChannelError::InvalidEndpoint(format!(
            "notification base must use ws or wss, got '{}'",
            base.scheme()
        )));
    }

    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let mut endpoint = base
        .join(NOTIFICATIONS_PATH)
        .map_err(|err| ChannelError::InvalidEndpoint(err.to_string()))?;
    endpoint.set_query(None);
    endpoint.query_pairs_mut().append_pair("token", token);
    Ok(endpoint)
}

/// What a `connect` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Started,
    AlreadyActive,
    MissingToken,
    InvalidEndpoint,
}

#[derive(Debug)]
struct RunningConnection {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Push-notification connection manager.
///
/// Holds at most one live connection. Failures never reach callers; they are
/// logged and broadcast to subscribers as [`ChannelEvent::Error`].
pub struct NotificationClient {
    config: NotificationConfig,
    transport: Arc<dyn NotificationTransport>,
    tokens: Arc<dyn TokenProvider>,
    state: Arc<Mutex<ConnectionStateMachine>>,
    running: Mutex<Option<RunningConnection>>,
    observers: ChannelObservers,
}

impl NotificationClient {
    pub fn new(
        config: NotificationConfig,
        transport: Arc<dyn NotificationTransport>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let observers = ChannelObservers::new(config.event_buffer);
        let state = ConnectionStateMachine::new(config.policy);
        Self {
            config,
            transport,
            tokens,
            state: Arc::new(Mutex::new(state)),
            running: Mutex::new(None),
            observers,
        }
    }

    pub fn websocket(config: NotificationConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::new(config, Arc::new(WebSocketTransport), tokens)
    }

    pub fn subscribe(&self) -> EventStream {
        self.observers.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.lock().await.state()
    }

    pub async fn connect<F>(&self, handler: F) -> ConnectOutcome
    where
        F: Fn(NotificationEvent) + Send + Sync + 'static,
    {
        let mut running = self.running.lock().await;
        if self.state.lock().await.is_active() {
            debug!("notification connection already active; connect ignored");
            return ConnectOutcome::AlreadyActive;
        }

        // A task left over from an exhausted or abandoned session has
        // already stopped; reap it before starting a new one.
        if let Some(previous) = running.take() {
            previous.stop.cancel();
            let _ = previous.task.await;
        }

        let Some(token) = self.tokens.access_token() else {
            warn!("no access token; notification channel not started");
            self.observers
                .emit(ChannelEvent::Error(ChannelError::MissingToken));
            return ConnectOutcome::MissingToken;
        };
        let endpoint = match notification_endpoint(&self.config.base_url, &token) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                warn!(error = %err, "notification endpoint rejected");
                self.observers.emit(ChannelEvent::Error(err));
                return ConnectOutcome::InvalidEndpoint;
            }
        };

        if let Err(err) = self.state.lock().await.request_connect() {
            debug!(code = %err.code, "connect raced with another transition");
            return ConnectOutcome::AlreadyActive;
        }
        self.observers.emit(ChannelEvent::StateChanged {
            state: ConnectionState::Connecting,
        });

        let stop = CancellationToken::new();
        let connection = ConnectionTask {
            connection_id: Uuid::new_v4(),
            base_url: self.config.base_url.clone(),
            transport: self.transport.clone(),
            tokens: self.tokens.clone(),
            state: self.state.clone(),
            observers: self.observers.clone(),
            handler: Arc::new(handler),
            stop: stop.child_token(),
        };
        info!(connection_id = %connection.connection_id, "starting notification channel");
        let task = tokio::spawn(connection.run(endpoint));

        *running = Some(RunningConnection { stop, task });
        ConnectOutcome::Started
    }

    /// Close the channel for good. No reconnect follows.
    pub async fn disconnect(&self) {
        let running = self.running.lock().await.take();
        let previous = {
            let mut machine = self.state.lock().await;
            let previous = machine.state();
            machine.disconnect();
            previous
        };

        if let Some(running) = running {
            running.stop.cancel();
            let _ = running.task.await;
        }

        if previous != ConnectionState::Closed {
            info!(?previous, "notification channel disconnected");
            self.observers.emit(ChannelEvent::StateChanged {
                state: ConnectionState::Closed,
            });
        }
    }
}

struct ConnectionTask {
    connection_id: Uuid,
    base_url: Url,
    transport: Arc<dyn NotificationTransport>,
    tokens: Arc<dyn TokenProvider>,
    state: Arc<Mutex<ConnectionStateMachine>>,
    observers: ChannelObservers,
    handler: NotificationHandler,
    stop: CancellationToken,
}

impl ConnectionTask {
    async fn run(self, first_endpoint: Url) {
        let connection_id = self.connection_id;
        let mut endpoint = first_endpoint;

        loop {
            let opened = tokio::select! {
                _ = self.stop.cancelled() => break,
                opened = self.transport.open(&endpoint) => opened,
            };

            match opened {
                Ok(mut session) => {
                    if !self.mark_open().await {
                        session.close().await;
                        break;
                    }
                    if self.pump(session).await {
                        break;
                    }
                }
                Err(err) => {
                    warn!(%connection_id, error = %err, "notification transport failed to open");
                    self.observers.emit(ChannelEvent::Error(err));
                }
            }

            let outcome = self.state.lock().await.on_close();
            match outcome {
                CloseOutcome::Manual => break,
                CloseOutcome::Exhausted { attempts } => {
                    warn!(%connection_id, attempts, "giving up on notification channel");
                    self.observers
                        .emit(ChannelEvent::Error(ChannelError::RetriesExhausted { attempts }));
                    self.emit_state(ConnectionState::Closed);
                    break;
                }
                CloseOutcome::Reconnect { attempt, delay } => {
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    info!(%connection_id, attempt, delay_ms, "notification reconnect scheduled");
                    self.emit_state(ConnectionState::Reconnecting);
                    self.observers
                        .emit(ChannelEvent::ReconnectScheduled { attempt, delay_ms });

                    tokio::select! {
                        _ = self.stop.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }

                    match self.next_endpoint() {
                        Ok(next) => endpoint = next,
                        Err(err) => {
                            warn!(%connection_id, error = %err, "notification reconnect abandoned");
                            let state = self.state.lock().await.abandon();
                            self.observers.emit(ChannelEvent::Error(err));
                            self.emit_state(state);
                            break;
                        }
                    }

                    if self.state.lock().await.on_backoff_elapsed().is_err() {
                        break;
                    }
                    self.emit_state(ConnectionState::Connecting);
                }
            }
        }

        debug!(%connection_id, "notification task stopped");
    }

    async fn mark_open(&self) -> bool {
        if self.state.lock().await.on_open().is_err() {
            return false;
        }
        info!(connection_id = %self.connection_id, "notification channel open");
        self.emit_state(ConnectionState::Open);
        true
    }

    /// Read frames until the session ends. Returns `true` when stopped by
    /// `disconnect`.
    async fn pump(&self, mut session: Box<dyn NotificationSession>) -> bool {
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    session.close().await;
                    return true;
                }
                frame = session.next_frame() => match frame {
                    Some(Ok(raw)) => self.deliver(&raw),
                    // One bad frame does not end a healthy session.
                    Some(Err(err @ ChannelError::Decode(_))) => {
                        debug!(connection_id = %self.connection_id, error = %err, "dropping notification frame");
                        self.observers.emit(ChannelEvent::Error(err));
                    }
                    Some(Err(err)) => {
                        warn!(connection_id = %self.connection_id, error = %err, "notification transport error; closing session");
                        self.observers.emit(ChannelEvent::Error(err));
                        session.close().await;
                        return false;
                    }
                    None => {
                        info!(connection_id = %self.connection_id, "notification channel closed by peer");
                        return false;
                    }
                }
            }
        }
    }

    fn deliver(&self, raw: &str) {
        match decode_notification_frame(raw) {
            Ok(event) => {
                (self.handler)(event.clone());
                self.observers.emit(ChannelEvent::Notification(event));
            }
            Err(err) => {
                debug!(connection_id = %self.connection_id, error = %err, "dropping notification frame");
                self.observers.emit(ChannelEvent::Error(err));
            }
        }
    }

    /// The token is read again so a logged-out session stops reconnecting.
    fn next_endpoint(&self) -> Result<Url, ChannelError> {
        let token = self
            .tokens
            .access_token()
            .ok_or(ChannelError::MissingToken)?;
        notification_endpoint(&self.base_url, &token)
    }

    fn emit_state(&self, state: ConnectionState) {
        self.observers.emit(ChannelEvent::StateChanged { state });
    }
}
