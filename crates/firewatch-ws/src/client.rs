use crate::parser::{parse_frame, AckFrame, ChangesFrame, GatewayFrame};
use crate::subscriptions::{
    auth_params, create_params, listen_params, ping, request, unlisten, update_params,
};
use anyhow::Context;
use firewatch_core::backend::{ChangeStream, DocumentBackend};
use firewatch_core::error::BackendError;
use firewatch_core::types::{ChangeBatch, ChangeKind, CollectionQuery, Document, DocumentChange};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
const MIN_PING_INTERVAL: Duration = Duration::from_secs(1);
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Where and as whom to connect to the document gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub api_key: String,
    pub project_id: String,
    pub app_id: Option<String>,
    pub auth_domain: Option<String>,
    pub ping_interval: Duration,
}

impl GatewayConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            project_id: project_id.into(),
            app_id: None,
            auth_domain: None,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }

    /// Ping period actually used; never shorter than one second.
    pub fn ping_period(&self) -> Duration {
        self.ping_interval.max(MIN_PING_INTERVAL)
    }
}

enum Command {
    Request {
        method: &'static str,
        params: Value,
        respond: oneshot::Sender<Result<Value, BackendError>>,
    },
    Listen {
        query: CollectionQuery,
        tx: mpsc::UnboundedSender<ChangeBatch>,
    },
}

/// Document backend reached through a realtime gateway over WebSocket.
///
/// One background task owns the socket. It reconnects with backoff and
/// re-issues live queries after every reconnect; writes in flight when the
/// socket drops fail with `BackendError::Disconnected` and are not retried.
/// Dropping every clone of the backend shuts the task down.
#[derive(Clone)]
pub struct WsBackend {
    commands: mpsc::UnboundedSender<Command>,
}

impl WsBackend {
    /// Spawn the connection task. Returns immediately; requests issued
    /// while offline fail fast.
    pub fn spawn(config: GatewayConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            Connection::new(config, rx).run().await;
        });
        Self { commands }
    }

    async fn call(&self, method: &'static str, params: Value) -> Result<Value, BackendError> {
        let (respond, rx) = oneshot::channel();
        self.commands
            .send(Command::Request { method, params, respond })
            .map_err(|_| BackendError::Disconnected)?;
        rx.await.map_err(|_| BackendError::Disconnected)?
    }
}

impl DocumentBackend for WsBackend {
    async fn subscribe_ordered_collection(
        &self,
        query: &CollectionQuery,
    ) -> Result<ChangeStream, BackendError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.commands
            .send(Command::Listen { query: query.clone(), tx })
            .map_err(|_| BackendError::Disconnected)?;
        Ok(rx)
    }

    async fn create_document(&self, collection: &str, data: Document) -> Result<String, BackendError> {
        let result = self.call("create", create_params(collection, &data)).await?;
        result
            .get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| BackendError::Transport("create ack without document id".to_string()))
    }

    async fn update_document(&self, collection: &str, id: &str, fields: Document) -> Result<(), BackendError> {
        self.call("update", update_params(collection, id, &fields)).await?;
        Ok(())
    }
}

struct Listener {
    query: CollectionQuery,
    tx: mpsc::UnboundedSender<ChangeBatch>,
    resume_token: Option<String>,
    /// Ids delivered to the caller and not removed since.
    known: HashSet<String>,
    /// The next batch is a fresh snapshot that supersedes `known`.
    snapshot_pending: bool,
}

impl Listener {
    fn new(query: CollectionQuery, tx: mpsc::UnboundedSender<ChangeBatch>) -> Self {
        Self {
            query,
            tx,
            resume_token: None,
            known: HashSet::new(),
            snapshot_pending: false,
        }
    }

    /// Rewrite a batch against what the caller already holds and track the
    /// ids it leaves behind.
    fn prepare(&mut self, batch: ChangeBatch) -> ChangeBatch {
        let batch = if std::mem::take(&mut self.snapshot_pending) {
            reconcile_snapshot(&self.known, batch)
        } else {
            batch
        };
        for change in &batch {
            match change.kind {
                ChangeKind::Added | ChangeKind::Modified => {
                    self.known.insert(change.id.clone());
                }
                ChangeKind::Removed => {
                    self.known.remove(&change.id);
                }
            }
        }
        batch
    }
}

/// A fresh snapshot replays every live document as `added`. Ids the caller
/// already holds become `modified`, and held ids missing from the snapshot
/// are emitted as `removed`.
fn reconcile_snapshot(known: &HashSet<String>, snapshot: ChangeBatch) -> ChangeBatch {
    let mut seen = HashSet::new();
    let mut batch: ChangeBatch = snapshot
        .into_iter()
        .map(|mut change| {
            if change.kind == ChangeKind::Added && known.contains(&change.id) {
                change.kind = ChangeKind::Modified;
            }
            seen.insert(change.id.clone());
            change
        })
        .collect();

    let mut gone: Vec<&String> = known.iter().filter(|id| !seen.contains(*id)).collect();
    gone.sort();
    batch.extend(gone.into_iter().map(|id| DocumentChange::removed(id.clone())));
    batch
}

enum Pending {
    Auth,
    Listen(String),
    Write(oneshot::Sender<Result<Value, BackendError>>),
}

enum Exit {
    /// Every backend handle is gone.
    Shutdown,
    /// Socket closed or went idle; reconnect.
    Dropped,
}

struct Connection {
    config: GatewayConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    listeners: HashMap<String, Listener>,
    pending: HashMap<u64, Pending>,
    next_req_id: u64,
}

impl Connection {
    fn new(config: GatewayConfig, commands: mpsc::UnboundedReceiver<Command>) -> Self {
        Self {
            config,
            commands,
            listeners: HashMap::new(),
            pending: HashMap::new(),
            next_req_id: 0,
        }
    }

    async fn run(mut self) {
        let mut reconnect_delay = INITIAL_RECONNECT_DELAY;
        let mut reconnect_count = 0u64;

        loop {
            match self.connect_and_run().await {
                Ok(Exit::Shutdown) => {
                    info!("Gateway client shut down");
                    return;
                }
                Ok(Exit::Dropped) => {
                    reconnect_delay = INITIAL_RECONNECT_DELAY;
                }
                Err(e) => {
                    error!("Gateway connection error: {:#}", e);
                }
            }
            reconnect_count += 1;
            self.fail_pending();

            warn!("Reconnecting in {:?} (attempt {})", reconnect_delay, reconnect_count);
            let backoff = sleep(reconnect_delay);
            tokio::pin!(backoff);
            loop {
                tokio::select! {
                    _ = &mut backoff => break,
                    cmd = self.commands.recv() => match cmd {
                        Some(cmd) => {
                            self.on_command(cmd, false);
                        }
                        None => {
                            info!("Gateway client shut down while offline");
                            return;
                        }
                    }
                }
            }
            reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_DELAY);
        }
    }

    async fn connect_and_run(&mut self) -> anyhow::Result<Exit> {
        info!("Connecting to {}", self.config.url);
        let (ws_stream, _) = connect_async(self.config.url.as_str())
            .await
            .context("Failed to connect to document gateway")?;
        let (mut write, mut read) = ws_stream.split();

        let auth = self.auth_frame();
        write.send(Message::Text(auth.to_string())).await?;
        for frame in self.relisten_frames() {
            write.send(Message::Text(frame.to_string())).await?;
        }
        info!("Connected to gateway, {} live queries restored", self.listeners.len());

        let mut ping_timer = tokio::time::interval(self.config.ping_period());
        ping_timer.tick().await;
        let mut last_activity = Instant::now();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_activity = Instant::now();
                            match parse_frame(&text) {
                                Ok(frame) => {
                                    for reply in self.on_frame(frame)? {
                                        write.send(Message::Text(reply.to_string())).await?;
                                    }
                                }
                                Err(e) => warn!("Failed to parse frame: {} (frame: {})", e, text),
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("Gateway closed the connection");
                            return Ok(Exit::Dropped);
                        }
                        Some(Ok(_)) => {
                            last_activity = Instant::now();
                        }
                        Some(Err(e)) => {
                            return Err(e).context("WebSocket error");
                        }
                        None => {
                            info!("Gateway stream ended");
                            return Ok(Exit::Dropped);
                        }
                    }
                }
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if let Some(frame) = self.on_command(cmd, true) {
                                write.send(Message::Text(frame.to_string())).await?;
                            }
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(Exit::Shutdown);
                        }
                    }
                }
                _ = ping_timer.tick() => {
                    for frame in self.prune_listeners() {
                        write.send(Message::Text(frame.to_string())).await?;
                    }
                    write.send(Message::Text(ping().to_string())).await?;
                    debug!("Sent ping");
                }
            }

            if last_activity.elapsed() > IDLE_TIMEOUT {
                warn!("Idle timeout, reconnecting");
                return Ok(Exit::Dropped);
            }
        }
    }

    fn req_id(&mut self) -> u64 {
        self.next_req_id += 1;
        self.next_req_id
    }

    fn auth_frame(&mut self) -> Value {
        let req_id = self.req_id();
        self.pending.insert(req_id, Pending::Auth);
        let params = auth_params(
            &self.config.api_key,
            &self.config.project_id,
            self.config.app_id.as_deref(),
            self.config.auth_domain.as_deref(),
        );
        request("auth", req_id, params)
    }

    fn listen_frame(&mut self, collection: &str) -> Option<Value> {
        let listener = self.listeners.get_mut(collection)?;
        // Without a token the gateway answers with a full snapshot.
        listener.snapshot_pending = listener.resume_token.is_none();
        let params = listen_params(&listener.query, listener.resume_token.as_deref());
        let req_id = self.req_id();
        self.pending.insert(req_id, Pending::Listen(collection.to_string()));
        Some(request("listen", req_id, params))
    }

    fn relisten_frames(&mut self) -> Vec<Value> {
        self.listeners.retain(|_, l| !l.tx.is_closed());
        let collections: Vec<String> = self.listeners.keys().cloned().collect();
        collections
            .iter()
            .filter_map(|c| self.listen_frame(c))
            .collect()
    }

    /// Drop listeners whose stream was dropped and return unlisten frames.
    fn prune_listeners(&mut self) -> Vec<Value> {
        let closed: Vec<String> = self
            .listeners
            .iter()
            .filter(|(_, l)| l.tx.is_closed())
            .map(|(c, _)| c.clone())
            .collect();
        closed
            .into_iter()
            .map(|collection| {
                self.listeners.remove(&collection);
                debug!("Live query on {} dropped locally", collection);
                unlisten(&collection)
            })
            .collect()
    }

    /// Frame to send for a command, if any.
    fn on_command(&mut self, cmd: Command, online: bool) -> Option<Value> {
        match cmd {
            Command::Request { method, params, respond } => {
                if !online {
                    let _ = respond.send(Err(BackendError::Disconnected));
                    return None;
                }
                let req_id = self.req_id();
                self.pending.insert(req_id, Pending::Write(respond));
                Some(request(method, req_id, params))
            }
            Command::Listen { query, tx } => {
                let collection = query.collection.clone();
                if self.listeners.contains_key(&collection) {
                    warn!("Replacing existing live query on {}", collection);
                }
                self.listeners.insert(collection.clone(), Listener::new(query, tx));
                if online {
                    self.listen_frame(&collection)
                } else {
                    None
                }
            }
        }
    }

    /// Handle one inbound frame; returns frames to send back.
    fn on_frame(&mut self, frame: GatewayFrame) -> anyhow::Result<Vec<Value>> {
        match frame {
            GatewayFrame::Ack(ack) => self.on_ack(ack),
            GatewayFrame::Changes(changes) => Ok(self.on_changes(changes)),
            GatewayFrame::Heartbeat => {
                debug!("Received heartbeat");
                Ok(Vec::new())
            }
            GatewayFrame::Status(status) => {
                info!(
                    "Gateway status: {} {}",
                    status.data.status,
                    status.data.message.unwrap_or_default()
                );
                Ok(Vec::new())
            }
        }
    }

    fn on_ack(&mut self, ack: AckFrame) -> anyhow::Result<Vec<Value>> {
        let AckFrame { method, req_id, success, result, error } = ack;
        let Some(pending) = req_id.and_then(|id| self.pending.remove(&id)) else {
            debug!("ACK: method={}, success={}", method, success);
            return Ok(Vec::new());
        };
        let failure = (!success).then(|| match error {
            Some(err) => BackendError::rejected(err.code, err.message),
            None => BackendError::rejected("unknown", format!("{} failed", method)),
        });

        match (pending, failure) {
            (Pending::Auth, None) => info!("Authenticated with gateway"),
            (Pending::Auth, Some(e)) => {
                return Err(anyhow::anyhow!("Gateway authentication failed: {}", e));
            }
            (Pending::Listen(collection), None) => debug!("Live query on {} acknowledged", collection),
            (Pending::Listen(collection), Some(e)) => {
                // Dropping the sender ends the caller's stream.
                error!("Live query on {} rejected: {}", collection, e);
                self.listeners.remove(&collection);
            }
            (Pending::Write(respond), None) => {
                let _ = respond.send(Ok(result));
            }
            (Pending::Write(respond), Some(e)) => {
                let _ = respond.send(Err(e));
            }
        }
        Ok(Vec::new())
    }

    fn on_changes(&mut self, changes: ChangesFrame) -> Vec<Value> {
        let Some(listener) = self.listeners.get_mut(&changes.collection) else {
            debug!("Changes for {} without a live query", changes.collection);
            return vec![unlisten(&changes.collection)];
        };
        if let Some(token) = changes.resume_token {
            listener.resume_token = Some(token);
        }
        debug!("{} changes on {}", changes.data.len(), changes.collection);
        let batch = listener.prepare(changes.data);
        if listener.tx.send(batch).is_err() {
            self.listeners.remove(&changes.collection);
            return vec![unlisten(&changes.collection)];
        }
        Vec::new()
    }

    fn fail_pending(&mut self) {
        for (_, pending) in self.pending.drain() {
            if let Pending::Write(respond) = pending {
                let _ = respond.send(Err(BackendError::Disconnected));
            }
        }
    }
}
