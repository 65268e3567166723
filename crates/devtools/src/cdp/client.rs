//! CDP Client - The Core Communication Layer
//!
//! Design decisions:
//! 1. One transport per client, opened lazily on first command
//! 2. A single receive loop classifies frames and hands them off; it never
//!    runs callbacks itself (see EventDispatcher)
//! 3. Request/response matching via ID; completion order across commands is unspecified
//! 4. Fail fast - the only retry is one reconnect when the transport is found dead.
//!    Everything else is the caller's decision.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::commands::{deadline_after, CommandManager};
use super::dispatcher::{CallbackId, CallbackResult, EventCallback, EventDispatcher};
use super::protocol::*;
use super::transport::{Connector, FrameSink, FrameStream, WebSocketConnector};
use crate::error::{CDPError, Result};
use crate::events::{ConnectionEvent, EventBus};

/// Default timeout for `send_request`
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for opening a transport
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the receive loop sweeps expired or abandoned requests
const PURGE_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables for one client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub command_timeout: Duration,
    pub connect_timeout: Duration,
    pub lifecycle_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            lifecycle_capacity: 64,
        }
    }
}

/// The live transport plus its receive loop
struct Link {
    sink: FrameSink,
    generation: u64,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

/// CDP Client - manages one transport to one endpoint
pub struct CDPClient {
    connector: Arc<dyn Connector>,
    options: ClientOptions,

    /// Pending requests waiting for responses
    commands: CommandManager,

    /// Event callbacks, keyed by method name (e.g., "Page.loadEventFired")
    dispatcher: EventDispatcher,

    /// Connect / reconnect / disconnect notifications
    lifecycle: EventBus,

    /// Current transport, `None` until first use
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl CDPClient {
    /// Create a client without connecting
    pub fn new(connector: Arc<dyn Connector>, options: ClientOptions) -> Arc<Self> {
        let lifecycle = EventBus::with_capacity(options.lifecycle_capacity);
        Arc::new(Self {
            connector,
            options,
            commands: CommandManager::new(),
            dispatcher: EventDispatcher::new(),
            lifecycle,
            link: Mutex::new(None),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Connect to Chrome DevTools Protocol endpoint
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        let connector = Arc::new(WebSocketConnector::new(ws_url)?);
        let client = Self::new(connector, ClientOptions::default());
        client.ensure_connected().await?;
        Ok(client)
    }

    pub fn endpoint(&self) -> &str {
        self.connector.endpoint()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Make sure a live transport exists, opening or reopening it once
    ///
    /// Returns the generation of the live transport.
    pub async fn ensure_connected(&self) -> Result<u64> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CDPError::Closed);
        }

        let mut link = self.link.lock().await;
        if let Some(current) = link.as_ref() {
            if current.alive.load(Ordering::SeqCst) {
                return Ok(current.generation);
            }
        }

        let reconnecting = match link.take() {
            Some(stale) => {
                stale.reader.abort();
                let failed = self.commands.fail_generation(stale.generation);
                tracing::debug!(
                    endpoint = %self.endpoint(),
                    generation = stale.generation,
                    failed,
                    "Transport found closed, reconnecting"
                );
                true
            }
            None => false,
        };

        let fresh = self.open_link().await?;
        let generation = fresh.generation;
        *link = Some(fresh);
        drop(link);

        let endpoint = self.endpoint().to_string();
        if reconnecting {
            tracing::info!(%endpoint, generation, "Reconnected");
            self.lifecycle
                .publish(ConnectionEvent::Reconnected { endpoint });
        } else {
            tracing::debug!(%endpoint, generation, "Connected");
            self.lifecycle.publish(ConnectionEvent::Connected { endpoint });
        }
        Ok(generation)
    }

    async fn open_link(&self) -> Result<Link> {
        let transport = tokio::time::timeout(self.options.connect_timeout, self.connector.connect())
            .await
            .map_err(|_| {
                CDPError::connection_lost(format!(
                    "connect to {} timed out after {:?}",
                    self.endpoint(),
                    self.options.connect_timeout
                ))
            })?
            .map_err(|e| CDPError::connection_lost(format!("connect to {} failed: {}", self.endpoint(), e)))?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let alive = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(receive_loop(
            transport.stream,
            ReceiveContext {
                commands: self.commands.clone(),
                dispatcher: self.dispatcher.clone(),
                lifecycle: self.lifecycle.clone(),
                alive: alive.clone(),
                generation,
                endpoint: self.endpoint().to_string(),
            },
        ));

        Ok(Link {
            sink: transport.sink,
            generation,
            alive,
            reader,
        })
    }

    /// Write one serialized command to the transport of `generation`
    async fn transmit(&self, id: RequestId, method: &str, json: String, generation: u64) -> Result<()> {
        let mut guard = self.link.lock().await;
        let link = match guard.as_mut() {
            Some(link) if link.generation == generation && link.alive.load(Ordering::SeqCst) => link,
            _ => return Err(CDPError::connection_lost("transport replaced before send")),
        };

        tracing::trace!(id, method, generation, "Sending request");
        if let Err(e) = link.sink.send(json).await {
            link.alive.store(false, Ordering::SeqCst);
            return Err(CDPError::connection_lost(e));
        }
        Ok(())
    }

    /// Send a command and wait for its response
    ///
    /// Assigns an id if the command has none. On timeout the pending entry is
    /// purged and `CommandTimeout` returned; other in-flight commands and the
    /// transport are untouched. If the transport dies under the command it is
    /// reopened once and the command re-sent; a second failure is `ConnectionLost`.
    ///
    /// The re-send happens even if the browser already received the command
    /// before the transport died, so a non-idempotent command may run twice.
    /// `Duration::MAX` (or anything past a few decades) means no deadline.
    pub async fn execute_command(&self, command: CDPRequest, timeout: Duration) -> Result<Value> {
        let deadline = deadline_after(timeout);
        let mut command = command;
        let mut reconnected = false;

        loop {
            let generation = self.ensure_connected().await?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            let (prepared, rx) = self
                .commands
                .create_command_future(command, remaining, generation)?;
            let id = prepared.id.unwrap_or_default();

            let json = match serde_json::to_string(&prepared) {
                Ok(json) => json,
                Err(e) => {
                    self.commands.remove_pending_command(id);
                    return Err(e.into());
                }
            };

            if let Err(e) = self.transmit(id, &prepared.method, json, generation).await {
                self.commands.remove_pending_command(id);
                if reconnected {
                    return Err(e);
                }
                tracing::warn!(id, method = %prepared.method, error = %e, "Send failed, retrying on a new transport");
                reconnected = true;
                command = prepared;
                continue;
            }

            match tokio::time::timeout_at(deadline, rx).await {
                Ok(Ok(response)) => return response.into_result(),
                Ok(Err(_)) => {
                    if self.closed.load(Ordering::SeqCst) {
                        return Err(CDPError::Closed);
                    }
                    // Swept by the receive loop at the deadline
                    if Instant::now() >= deadline {
                        tracing::warn!(id, method = %prepared.method, ?timeout, "Request timed out");
                        return Err(CDPError::CommandTimeout { id, timeout });
                    }
                    if reconnected {
                        return Err(CDPError::connection_lost(format!(
                            "transport closed while awaiting response to {}",
                            prepared.method
                        )));
                    }
                    tracing::warn!(id, method = %prepared.method, "Transport closed mid-flight, retrying on a new transport");
                    reconnected = true;
                    command = prepared;
                }
                Err(_) => {
                    self.commands.remove_pending_command(id);
                    tracing::warn!(id, method = %prepared.method, ?timeout, "Request timed out");
                    return Err(CDPError::CommandTimeout { id, timeout });
                }
            }
        }
    }

    /// Execute with the client's default timeout
    pub async fn execute(&self, command: CDPRequest) -> Result<Value> {
        self.execute_command(command, self.options.command_timeout)
            .await
    }

    /// Send CDP request and wait for response
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<SessionId>,
    ) -> Result<Value> {
        let mut request = CDPRequest::new(method).with_session(session_id);
        request.params = params;
        self.execute(request).await
    }

    /// Register a callback for an event name
    pub fn register_callback(
        &self,
        event_name: impl Into<String>,
        callback: EventCallback,
        temporary: bool,
    ) -> CallbackId {
        self.dispatcher.register(event_name, callback, temporary)
    }

    /// Register an async closure for an event name
    pub fn on<F, Fut>(&self, event_name: impl Into<String>, callback: F, temporary: bool) -> CallbackId
    where
        F: Fn(CDPEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.dispatcher.register_fn(event_name, callback, temporary)
    }

    /// Subscribe a plain closure to CDP events
    pub fn subscribe<F>(&self, method: impl Into<String>, callback: F) -> CallbackId
    where
        F: Fn(CDPEvent) + Send + Sync + 'static,
    {
        self.dispatcher.register_fn(
            method,
            move |event| {
                callback(event);
                futures_util::future::ready(Ok(()))
            },
            false,
        )
    }

    /// Remove a callback; unknown ids are ignored
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.dispatcher.remove(id)
    }

    pub fn clear_callbacks(&self) {
        self.dispatcher.clear();
    }

    pub fn callback_count(&self, event_name: &str) -> usize {
        self.dispatcher.callback_count(event_name)
    }

    pub fn pending_count(&self) -> usize {
        self.commands.len()
    }

    /// Lifecycle notifications for this connection
    pub fn lifecycle(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.lifecycle.subscribe()
    }

    pub async fn is_connected(&self) -> bool {
        self.link
            .lock()
            .await
            .as_ref()
            .is_some_and(|link| link.alive.load(Ordering::SeqCst))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close connection gracefully
    ///
    /// Releases the transport, fails in-flight commands and clears all callbacks.
    /// The client refuses further commands afterwards.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let link = self.link.lock().await.take();
        if let Some(mut link) = link {
            if let Err(e) = link.sink.close().await {
                tracing::debug!(error = %e, "Error closing transport");
            }
            link.reader.abort();
        }

        self.commands.clear();
        self.dispatcher.shutdown();
        self.lifecycle.publish(ConnectionEvent::Closed {
            endpoint: self.endpoint().to_string(),
        });
        tracing::debug!(endpoint = %self.endpoint(), "Connection closed");
        Ok(())
    }
}

impl fmt::Debug for CDPClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CDPClient")
            .field("endpoint", &self.endpoint())
            .field("pending", &self.commands.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for CDPClient {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.reader.abort();
        }
        self.commands.clear();
        self.dispatcher.shutdown();
    }
}

/// Everything the receive loop touches
struct ReceiveContext {
    commands: CommandManager,
    dispatcher: EventDispatcher,
    lifecycle: EventBus,
    alive: Arc<AtomicBool>,
    generation: u64,
    endpoint: String,
}

/// Read until the transport ends; classify and hand off every frame
async fn receive_loop(mut stream: FrameStream, ctx: ReceiveContext) {
    let mut sweep = tokio::time::interval(PURGE_INTERVAL);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(text)) => handle_frame(&text, &ctx),
                Some(Err(e)) => {
                    tracing::error!(endpoint = %ctx.endpoint, error = %e, "Transport error");
                    break e.to_string();
                }
                None => {
                    tracing::info!(endpoint = %ctx.endpoint, "Transport closed");
                    break "stream ended".to_string();
                }
            },
            _ = sweep.tick() => {
                let purged = ctx.commands.purge_expired(Instant::now());
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired or abandoned requests");
                }
            }
        }
    };

    // Order matters: mark dead before failing waiters so they reconnect
    ctx.alive.store(false, Ordering::SeqCst);
    let failed = ctx.commands.fail_generation(ctx.generation);
    if failed > 0 {
        tracing::debug!(failed, generation = ctx.generation, "Failed in-flight requests");
    }
    ctx.lifecycle.publish(ConnectionEvent::Disconnected {
        endpoint: ctx.endpoint.clone(),
        reason,
    });
}

/// Handle one inbound frame; never panics, never returns an error
fn handle_frame(text: &str, ctx: &ReceiveContext) {
    match CDPMessage::parse(text) {
        Ok(CDPMessage::Response(response)) => {
            let id = response.id;
            if !ctx.commands.resolve_command(id, response) {
                tracing::debug!(id, "Dropping response for unknown or expired request");
            }
        }
        Ok(CDPMessage::Event(event)) => {
            tracing::trace!(method = %event.method, "Event received");
            ctx.dispatcher.enqueue(event);
        }
        Ok(CDPMessage::Command(command)) => {
            tracing::warn!(method = %command.method, "Ignoring command sent by the browser");
        }
        Err(e) => {
            tracing::warn!(error = %e, "Dropping malformed frame");
        }
    }
}
