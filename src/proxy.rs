//! Public facade
//!
//! [`AmiProxy`] wires the transport, the dispatcher and the State Store together. Reads
//! take a shared lock and return deep-cloned snapshots; every write happens on the dispatch
//! task.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLockReadGuard};
use std::time::Duration;
use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{error, info};

use crate::{
    command::{Command, CommandReply},
    config::ProxyConfig,
    connection::{ConnectionState, LinkStatus, Transport},
    constants::MAX_FRAME_QUEUE_SIZE,
    dispatch::{DispatchRequest, Dispatcher, ReplyCallback, Responder, Shared},
    error::{AmiError, AmiResult},
    events::{EventKind, EventStream, ProxyEvent, Subscription},
    plugins::{CommandPlugin, CommandRegistry, EventPlugin, EventRegistry},
    recall::{QueueRecallManager, RecallStatus},
    state::{
        Conference, Conversation, Extension, JsonFileStructure, Parking, ProxyState, Queue,
        RecallMatch, StructureDescription, StructureSource, Trunk, VoicemailCounters,
    },
};

/// Registries are handed to the dispatcher on `start`
struct Registries {
    commands: CommandRegistry,
    events: EventRegistry,
}

/// Telephony control plane over one Asterisk Manager Interface link.
///
/// ```no_run
/// use ami_proxy::{AmiProxy, Command, EventKind, ProxyConfig};
///
/// # async fn example() -> Result<(), ami_proxy::AmiError> {
/// let mut proxy = AmiProxy::new(ProxyConfig::load("amiproxy.toml")?);
/// proxy.start()?;
/// let _sub = proxy.subscribe(EventKind::QueueChanged, |event| {
///     println!("{:?}", event.subject_id());
/// });
/// let reply = proxy
///     .execute(Command::new("queueDetails").arg("queue", "600"))
///     .await?;
/// println!("{:?}", reply);
/// # Ok(())
/// # }
/// ```
pub struct AmiProxy {
    config: ProxyConfig,
    status: LinkStatus,
    shared: Arc<Shared>,
    structure: Arc<dyn StructureSource>,
    registries: Option<Registries>,
    request_tx: Option<mpsc::UnboundedSender<DispatchRequest>>,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for AmiProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiProxy")
            .field("config", &self.config)
            .field("state", &self.status.get())
            .field("started", &self.is_started())
            .finish()
    }
}

impl AmiProxy {
    /// Proxy with the built-in plugins. The structural description is read from
    /// `structure_path` when configured, otherwise it is empty.
    pub fn new(config: ProxyConfig) -> Self {
        let structure: Arc<dyn StructureSource> = match &config.structure_path {
            Some(path) => Arc::new(JsonFileStructure::new(path)),
            None => Arc::new(StructureDescription::default()),
        };
        let shared = Arc::new(Shared::new(
            ProxyState::new(
                config
                    .ami
                    .prefix
                    .clone(),
            ),
            QueueRecallManager::new(Duration::from_secs(config.recall_window_secs)),
        ));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            status: LinkStatus::new(),
            shared,
            structure,
            registries: Some(Registries {
                commands: CommandRegistry::builtin(),
                events: EventRegistry::builtin(),
            }),
            request_tx: None,
            shutdown_tx,
        }
    }

    /// Replace the source of the structural description.
    pub fn with_structure(mut self, source: impl StructureSource + 'static) -> Self {
        self.structure = Arc::new(source);
        self
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Add or replace a command plugin. Only possible before [`start`](Self::start).
    pub fn register_command_plugin(&mut self, plugin: impl CommandPlugin + 'static) -> AmiResult<()> {
        let registries = self
            .registries
            .as_mut()
            .ok_or(AmiError::AlreadyStarted)?;
        registries
            .commands
            .register(Box::new(plugin));
        Ok(())
    }

    /// Add an event plugin; its names take over from built-in ones. Only before `start`.
    pub fn register_event_plugin(&mut self, plugin: impl EventPlugin + 'static) -> AmiResult<()> {
        let registries = self
            .registries
            .as_mut()
            .ok_or(AmiError::AlreadyStarted)?;
        registries
            .events
            .register(Box::new(plugin));
        Ok(())
    }

    /// Spawn the transport supervisor and the dispatcher on the current tokio runtime.
    pub fn start(&mut self) -> AmiResult<()> {
        let Registries { commands, events } = self
            .registries
            .take()
            .ok_or(AmiError::AlreadyStarted)?;

        let (events_tx, events_rx) = mpsc::channel(MAX_FRAME_QUEUE_SIZE);
        let (transport, sender) = Transport::new(
            self.config
                .ami
                .clone(),
            self.status
                .clone(),
            events_tx,
            self.shutdown_tx
                .subscribe(),
        );
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            sender,
            self.status
                .clone(),
            commands,
            events,
            self.shared
                .clone(),
            self.structure
                .clone(),
            Duration::from_millis(
                self.config
                    .command_timeout_ms,
            ),
        )
        .with_queue_refresh(Duration::from_millis(
            self.config
                .queue_refresh_interval_ms,
        ));

        tokio::spawn(transport.run());
        let shutdown_rx = self
            .shutdown_tx
            .subscribe();
        tokio::spawn(async move {
            let run = AssertUnwindSafe(dispatcher.run(events_rx, request_rx, shutdown_rx));
            if run
                .catch_unwind()
                .await
                .is_err()
            {
                error!("[DISPATCH] dispatcher task panicked");
            }
        });

        self.request_tx = Some(request_tx);
        info!(
            "[CONNECT] proxy started for {}:{}",
            self.config
                .ami
                .host,
            self.config
                .ami
                .port
        );
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.request_tx
            .is_some()
    }

    /// Stop both tasks. Pending commands fail with [`AmiError::Shutdown`].
    pub fn shutdown(&self) {
        self.shutdown_tx
            .send_replace(true);
    }

    // ---- commands ----

    /// Submit a command; `callback` is invoked exactly once with the reply or the error.
    ///
    /// Errors detected before the command reaches the dispatcher (`NotStarted`, `Shutdown`)
    /// are delivered on the calling thread; everything else on the dispatch task.
    pub fn do_cmd<F>(&self, command: Command, callback: F)
    where
        F: FnOnce(AmiResult<CommandReply>) + Send + 'static,
    {
        self.submit(command, None, Box::new(callback));
    }

    /// Like [`do_cmd`](Self::do_cmd) with a reply timeout other than `command_timeout_ms`.
    pub fn do_cmd_with_timeout<F>(&self, command: Command, timeout: Duration, callback: F)
    where
        F: FnOnce(AmiResult<CommandReply>) + Send + 'static,
    {
        self.submit(command, Some(timeout), Box::new(callback));
    }

    /// Submit a command and wait for its reply.
    pub async fn execute(&self, command: Command) -> AmiResult<CommandReply> {
        let (tx, rx) = oneshot::channel();
        self.do_cmd(command, move |result| {
            let _ = tx.send(result);
        });
        rx.await
            .unwrap_or_else(|_| Err(AmiError::Shutdown))
    }

    fn submit(&self, command: Command, timeout: Option<Duration>, callback: ReplyCallback) {
        let Some(tx) = &self.request_tx else {
            callback(Err(AmiError::NotStarted));
            return;
        };
        let request = DispatchRequest {
            command,
            timeout,
            responder: Responder::Callback(callback),
        };
        if let Err(mpsc::error::SendError(request)) = tx.send(request) {
            if let Responder::Callback(callback) = request.responder {
                callback(Err(AmiError::Shutdown));
            }
        }
    }

    // ---- calls tracked in the State Store ----

    /// Redirect the call parked in `parking` to `to`.
    pub fn redirect_parking<F>(&self, parking: &str, to: &str, callback: F)
    where
        F: FnOnce(AmiResult<CommandReply>) + Send + 'static,
    {
        let command = parking_redirect(&self.state(), parking, to);
        self.do_resolved(command, callback);
    }

    /// Bring the call parked in `parking` to extension `exten`.
    pub fn pickup_parking<F>(&self, parking: &str, exten: &str, callback: F)
    where
        F: FnOnce(AmiResult<CommandReply>) + Send + 'static,
    {
        let command = known_extension(&self.state(), exten)
            .and_then(|state| parking_redirect(state, parking, exten));
        self.do_resolved(command, callback);
    }

    /// Redirect caller `uniqueid` waiting in `queue` to `to`.
    pub fn redirect_waiting_caller<F>(&self, queue: &str, uniqueid: &str, to: &str, callback: F)
    where
        F: FnOnce(AmiResult<CommandReply>) + Send + 'static,
    {
        let channel = self
            .state()
            .waiting_channel(queue, uniqueid)
            .ok_or_else(|| not_tracked(format!("no caller {} waiting in queue {}", uniqueid, queue)));
        self.do_resolved(channel.map(|channel| redirect_command(channel, to)), callback);
    }

    /// Take over conversation `convid` of extension `ext` on extension `exten`: the other
    /// party is redirected there.
    pub fn pickup_conversation<F>(&self, ext: &str, convid: &str, exten: &str, callback: F)
    where
        F: FnOnce(AmiResult<CommandReply>) + Send + 'static,
    {
        let command = known_extension(&self.state(), exten)
            .and_then(|state| conversation_of(state, ext, convid))
            .and_then(|conversation| {
                conversation
                    .counterpart_channel
                    .ok_or_else(|| not_tracked(format!("conversation {} has no other party", convid)))
            })
            .map(|channel| redirect_command(channel, exten));
        self.do_resolved(command, callback);
    }

    /// Attended transfer of conversation `convid`, started from extension `ext`'s leg.
    pub fn attended_transfer_conversation<F>(&self, ext: &str, convid: &str, to: &str, callback: F)
    where
        F: FnOnce(AmiResult<CommandReply>) + Send + 'static,
    {
        let command = conversation_of(&self.state(), ext, convid).map(|conversation| {
            Command::new("attendedTransfer")
                .arg("channel", conversation.channel)
                .arg("to", to)
        });
        self.do_resolved(command, callback);
    }

    /// Let extension `spier` listen to conversation `convid` of extension `ext`, or also
    /// talk to `ext` when `whisper` is set.
    pub fn spy_conversation<F>(&self, ext: &str, convid: &str, spier: &str, whisper: bool, callback: F)
    where
        F: FnOnce(AmiResult<CommandReply>) + Send + 'static,
    {
        let command = spy_command(&self.state(), ext, convid, spier, whisper);
        self.do_resolved(command, callback);
    }

    fn do_resolved<F>(&self, command: AmiResult<Command>, callback: F)
    where
        F: FnOnce(AmiResult<CommandReply>) + Send + 'static,
    {
        match command {
            Ok(command) => self.do_cmd(command, callback),
            Err(e) => callback(Err(e)),
        }
    }

    // ---- events ----

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ProxyEvent) + Send + Sync + 'static,
    {
        self.shared
            .bus
            .subscribe(kind, handler)
    }

    pub fn event_stream(&self) -> EventStream {
        self.shared
            .bus
            .event_stream()
    }

    // ---- state snapshots ----

    fn state(&self) -> RwLockReadGuard<'_, ProxyState> {
        self.shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn extensions(&self) -> BTreeMap<String, Extension> {
        self.state()
            .extensions()
    }

    pub fn queues(&self) -> BTreeMap<String, Queue> {
        self.state()
            .queues()
    }

    pub fn trunks(&self) -> BTreeMap<String, Trunk> {
        self.state()
            .trunks()
    }

    pub fn parkings(&self) -> BTreeMap<String, Parking> {
        self.state()
            .parkings()
    }

    pub fn conferences(&self) -> BTreeMap<String, Conference> {
        self.state()
            .conferences()
    }

    pub fn voicemails(&self) -> BTreeMap<String, VoicemailCounters> {
        self.state()
            .voicemails()
    }

    pub fn extension(&self, id: &str) -> Option<Extension> {
        self.state()
            .extension(id)
    }

    pub fn queue(&self, id: &str) -> Option<Queue> {
        self.state()
            .queue(id)
    }

    /// Number with the configured outgoing prefix applied
    pub fn add_prefix(&self, number: &str) -> String {
        self.state()
            .add_prefix(number)
    }

    // ---- queue recall ----

    /// Consume the recall match of `number` for `queue`, if an inbound call matched it.
    pub fn queue_recall_lookup(&self, queue: &str, number: &str) -> Option<RecallMatch> {
        self.shared
            .recall
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(queue, number, Instant::now())
    }

    pub fn queue_recall_status(&self, queue: &str, number: &str) -> RecallStatus {
        self.shared
            .recall
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status(queue, number, Instant::now())
    }

    // ---- link ----

    pub fn connection_state(&self) -> ConnectionState {
        self.status
            .get()
    }

    pub fn status_watch(&self) -> watch::Receiver<ConnectionState> {
        self.status
            .subscribe()
    }
}

fn not_tracked(message: String) -> AmiError {
    AmiError::CommandFailed { message }
}

fn redirect_command(channel: String, to: &str) -> Command {
    Command::new("redirectChannel")
        .arg("channel", channel)
        .arg("to", to)
}

fn known_extension<'a>(state: &'a ProxyState, exten: &str) -> AmiResult<&'a ProxyState> {
    if state.is_extension(exten) {
        Ok(state)
    } else {
        Err(not_tracked(format!("unknown extension {}", exten)))
    }
}

fn conversation_of(state: &ProxyState, ext: &str, convid: &str) -> AmiResult<Conversation> {
    state
        .extension_conversation(ext, convid)
        .ok_or_else(|| not_tracked(format!("no conversation {} on extension {}", convid, ext)))
}

fn parking_redirect(state: &ProxyState, parking: &str, to: &str) -> AmiResult<Command> {
    let channel = state
        .parked_channel(parking)
        .ok_or_else(|| not_tracked(format!("no call parked in {}", parking)))?;
    Ok(redirect_command(channel, to))
}

fn spy_command(state: &ProxyState, ext: &str, convid: &str, spier: &str, whisper: bool) -> AmiResult<Command> {
    let tech = state
        .extension(spier)
        .map(|e| e.tech)
        .ok_or_else(|| not_tracked(format!("unknown extension {}", spier)))?;
    let tech = if tech.is_empty() { "PJSIP".to_string() } else { tech };
    let conversation = conversation_of(state, ext, convid)?;
    let name = if whisper { "spySpeak" } else { "spyListen" };
    Ok(Command::new(name)
        .arg("spier", format!("{}/{}", tech, spier))
        .arg("spied", ext)
        .arg("callerid", state.add_prefix(ext))
        .arg("channel", conversation.channel))
}

impl Drop for AmiProxy {
    fn drop(&mut self) {
        self.shutdown();
    }
}
