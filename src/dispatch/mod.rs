//! Action dispatcher and event router
//!
//! One task owns every plugin and is the only writer of the State Store. It consumes the
//! transport's ordered frame/signal channel and the facade's command requests, so frames are
//! applied in wire order and reply callbacks run on the same serialized path. Pending
//! commands are keyed by ActionID and expire on a fixed tick.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::{
    action::{command_name_of, ActionId},
    command::{Command, CommandReply},
    connection::{ActionSender, ConnectionState, LinkSignal, LinkStatus, TransportEvent},
    constants::{EVENT_FULLY_BOOTED, TIMEOUT_SWEEP_MS},
    error::{AmiError, AmiResult},
    events::{EventBus, ProxyEvent},
    frame::AmiFrame,
    headers::FrameHeader,
    plugins::{CommandRegistry, Completed, EventContext, EventRegistry},
    recall::QueueRecallManager,
    state::{unix_now, CallForwardType, ProxyState, StructureSource},
};

/// Command whose Parkinglot events arrive without ActionID
const PARKING_LIST_COMMAND: &str = "listParkings";

const QUEUE_DETAILS_COMMAND: &str = "queueDetails";

/// Reply callback of [`AmiProxy::do_cmd`](crate::AmiProxy::do_cmd)
pub type ReplyCallback = Box<dyn FnOnce(AmiResult<CommandReply>) + Send + 'static>;

/// State shared between the dispatch task and the facade
pub(crate) struct Shared {
    pub state: RwLock<ProxyState>,
    pub recall: Mutex<QueueRecallManager>,
    pub bus: EventBus,
}

impl Shared {
    pub(crate) fn new(state: ProxyState, recall: QueueRecallManager) -> Self {
        Self {
            state: RwLock::new(state),
            recall: Mutex::new(recall),
            bus: EventBus::new(),
        }
    }
}

/// Who gets the result of a command
pub(crate) enum Responder {
    Callback(ReplyCallback),
    /// Issued by the dispatcher itself; the reply is folded into the State Store.
    Internal(Command),
}

/// A command submitted through the facade
pub(crate) struct DispatchRequest {
    pub command: Command,
    pub timeout: Option<Duration>,
    pub responder: Responder,
}

struct PendingCommand {
    name: String,
    responder: Responder,
    timeout: Duration,
    deadline: Instant,
    /// Submission order, used to attribute uncorrelated Parkinglot events
    seq: u64,
}

pub(crate) struct Dispatcher {
    sender: ActionSender,
    status: LinkStatus,
    commands: CommandRegistry,
    events: EventRegistry,
    shared: Arc<Shared>,
    structure: Arc<dyn StructureSource>,
    default_timeout: Duration,
    /// Zero disables the periodic queue refresh
    queue_refresh: Duration,
    pending: HashMap<String, PendingCommand>,
    next_seq: u64,
}

impl Dispatcher {
    pub(crate) fn new(
        sender: ActionSender,
        status: LinkStatus,
        commands: CommandRegistry,
        events: EventRegistry,
        shared: Arc<Shared>,
        structure: Arc<dyn StructureSource>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            sender,
            status,
            commands,
            events,
            shared,
            structure,
            default_timeout,
            queue_refresh: Duration::ZERO,
            pending: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Re-read every queue each `period` while the link is ready.
    pub(crate) fn with_queue_refresh(mut self, period: Duration) -> Self {
        self.queue_refresh = period;
        self
    }

    /// Serve frames and requests until shutdown. Commands still pending, and requests not
    /// yet picked up, fail with [`AmiError::Shutdown`].
    pub(crate) async fn run(
        mut self,
        mut transport_rx: mpsc::Receiver<TransportEvent>,
        mut request_rx: mpsc::UnboundedReceiver<DispatchRequest>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut sweep = interval(Duration::from_millis(TIMEOUT_SWEEP_MS));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let refresh_enabled = !self
            .queue_refresh
            .is_zero();
        let refresh_period = if refresh_enabled {
            self.queue_refresh
        } else {
            Duration::from_secs(3600)
        };
        let mut refresh = interval_at(Instant::now() + refresh_period, refresh_period);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut transport_open = true;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                event = transport_rx.recv(), if transport_open => match event {
                    Some(TransportEvent::Frame(frame)) => self.handle_frame(frame, Instant::now()),
                    Some(TransportEvent::Signal(signal)) => self.handle_signal(signal),
                    None => {
                        debug!("[DISPATCH] transport channel closed");
                        transport_open = false;
                    }
                },
                request = request_rx.recv() => match request {
                    Some(request) => self.handle_request(request, Instant::now()),
                    None => {
                        debug!("[DISPATCH] all request senders dropped");
                        break;
                    }
                },
                _ = sweep.tick() => self.expire_overdue(Instant::now()),
                _ = refresh.tick(), if refresh_enabled => self.refresh_queues(Instant::now()),
            }
        }

        request_rx.close();
        while let Ok(request) = request_rx.try_recv() {
            self.respond(request.responder, Err(AmiError::Shutdown));
        }
        self.fail_all(|| AmiError::Shutdown);
        debug!("[DISPATCH] dispatcher stopped");
    }

    // ---- commands ----

    pub(crate) fn handle_request(&mut self, request: DispatchRequest, now: Instant) {
        let DispatchRequest {
            command,
            timeout,
            responder,
        } = request;
        let name = command
            .name()
            .to_string();

        let Some(plugin) = self
            .commands
            .get_mut(&name)
        else {
            warn!(command = %name, "[DISPATCH] no plugin registered for command");
            self.respond(responder, Err(AmiError::UnsupportedCommand { command: name }));
            return;
        };

        let sender = &self.sender;
        let outcome =
            std::panic::catch_unwind(AssertUnwindSafe(|| plugin.execute(sender, &command)));
        let id = match outcome {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                debug!(command = %name, "[DISPATCH] execute failed: {}", e);
                self.respond(responder, Err(e));
                return;
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(command = %name, "[DISPATCH] plugin panicked in execute: {}", reason);
                self.respond(
                    responder,
                    Err(AmiError::PluginFailure {
                        plugin: name,
                        reason,
                    }),
                );
                return;
            }
        };

        let timeout = timeout.unwrap_or(self.default_timeout);
        self.next_seq += 1;
        trace!(command = %name, action_id = %id, "[DISPATCH] pending");
        self.pending
            .insert(
                id.to_string(),
                PendingCommand {
                    name,
                    responder,
                    timeout,
                    deadline: now + timeout,
                    seq: self.next_seq,
                },
            );
    }

    fn issue_internal(&mut self, command: Command, now: Instant) {
        self.handle_request(
            DispatchRequest {
                responder: Responder::Internal(command.clone()),
                command,
                timeout: None,
            },
            now,
        );
    }

    /// Deliver a final result. Internal commands are applied to the State Store.
    fn respond(&mut self, responder: Responder, result: AmiResult<CommandReply>) {
        match responder {
            Responder::Callback(callback) => {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(move || callback(result)));
                if outcome.is_err() {
                    error!("[DISPATCH] reply callback panicked");
                }
            }
            Responder::Internal(command) => match result {
                Ok(reply) => self.apply_followup(&command, reply),
                Err(e) => debug!(command = command.name(), "[STATE] follow-up failed: {}", e),
            },
        }
    }

    fn complete(&mut self, done: Completed) {
        match self
            .pending
            .remove(done.id.as_str())
        {
            Some(pending) => {
                trace!(command = %pending.name, action_id = %done.id, "[DISPATCH] completed");
                self.respond(pending.responder, done.result);
            }
            None => debug!(action_id = %done.id, "[DISPATCH] reply for a command no longer pending dropped"),
        }
    }

    pub(crate) fn expire_overdue(&mut self, now: Instant) {
        let overdue: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in overdue {
            let Some(pending) = self
                .pending
                .remove(&id)
            else {
                continue;
            };
            let timeout_ms = pending
                .timeout
                .as_millis() as u64;
            warn!(command = %pending.name, action_id = %id, "[DISPATCH] no reply within {}ms", timeout_ms);
            self.discard(&pending.name, &id);
            self.respond(pending.responder, Err(AmiError::Timeout { timeout_ms }));
        }
    }

    fn fail_all(&mut self, error: impl Fn() -> AmiError) {
        let mut pending: Vec<(String, PendingCommand)> = self
            .pending
            .drain()
            .collect();
        pending.sort_by_key(|(_, p)| p.seq);
        for (id, command) in pending {
            self.discard(&command.name, &id);
            self.respond(command.responder, Err(error()));
        }
    }

    fn discard(&mut self, command: &str, id: &str) {
        if let Some(plugin) = self
            .commands
            .get_mut(command)
        {
            plugin.discard(&ActionId::from_wire(id));
        }
    }

    // ---- routing ----

    /// Route one inbound frame; see the module docs for the rule order.
    pub(crate) fn handle_frame(&mut self, frame: AmiFrame, now: Instant) {
        // 1. correlated reply of a known command
        let command = frame
            .action_id()
            .and_then(command_name_of)
            .filter(|name| {
                self.commands
                    .contains(name)
            })
            .map(str::to_string);
        if let Some(command) = command {
            self.route_reply(&command, &frame);
            return;
        }

        let Some(event) = frame.event_key() else {
            debug!("[RECV] dropping {} without event or known ActionID", frame.label());
            return;
        };

        // 2. Parkinglot events of a listParkings reply carry no ActionID
        if event == "parkinglot" && frame.action_id().is_none() && self.route_parking_lot(&frame) {
            return;
        }

        // 3. unsolicited event
        if self
            .events
            .contains(&event)
        {
            self.apply_event(&event, &frame, now);
            return;
        }

        // 4. link ready
        if event == EVENT_FULLY_BOOTED.to_ascii_lowercase() {
            self.initialize(now);
            return;
        }

        // 5.
        trace!(event = %event, "[EVENT] no plugin, dropped");
    }

    fn route_reply(&mut self, command: &str, frame: &AmiFrame) {
        let Some(plugin) = self
            .commands
            .get_mut(command)
        else {
            return;
        };
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| plugin.data(frame)));
        match outcome {
            Ok(Some(done)) => self.complete(done),
            Ok(None) => {}
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                let id = frame
                    .action_id()
                    .unwrap_or_default()
                    .to_string();
                error!(command = %command, action_id = %id, "[DISPATCH] plugin panicked on reply: {}", reason);
                self.discard(command, &id);
                self.complete(Completed::new(
                    &id,
                    Err(AmiError::PluginFailure {
                        plugin: command.to_string(),
                        reason,
                    }),
                ));
            }
        }
    }

    /// Attribute an uncorrelated Parkinglot to the oldest pending listParkings. Returns
    /// false when none is pending, leaving the frame to the event rules.
    fn route_parking_lot(&mut self, frame: &AmiFrame) -> bool {
        let oldest = self
            .pending
            .iter()
            .filter(|(_, p)| p.name == PARKING_LIST_COMMAND)
            .min_by_key(|(_, p)| p.seq)
            .map(|(id, _)| id.clone());
        let Some(id) = oldest else {
            debug!("[DISPATCH] Parkinglot without a pending {}", PARKING_LIST_COMMAND);
            return false;
        };
        let mut frame = frame.clone();
        frame.set_header(FrameHeader::ActionId.as_str(), id);
        self.route_reply(PARKING_LIST_COMMAND, &frame);
        true
    }

    fn apply_event(&mut self, event: &str, frame: &AmiFrame, now: Instant) {
        let Some(plugin) = self
            .events
            .get_mut(event)
        else {
            return;
        };

        let mut followups = Vec::new();
        let (outcome, derived) = {
            let mut state = self
                .shared
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let mut recall = self
                .shared
                .recall
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let mut ctx = EventContext {
                state: &mut *state,
                recall: &mut *recall,
                now,
                wall: unix_now(),
                followups: &mut followups,
            };
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| plugin.data(frame, &mut ctx)));
            (outcome, state.drain_events())
        };

        match outcome {
            Ok(Ok(())) => trace!(event = %event, "[EVENT] applied"),
            Ok(Err(e)) => warn!(event = %event, "[EVENT] plugin rejected frame: {}", e),
            Err(panic) => error!(
                event = %event,
                "[EVENT] plugin panicked: {}",
                panic_message(panic.as_ref())
            ),
        }

        self.publish(derived);
        for command in followups {
            self.issue_internal(command, now);
        }
    }

    fn publish(&self, events: Vec<ProxyEvent>) {
        for event in events {
            self.shared
                .bus
                .publish(event);
        }
    }

    // ---- State Store initialization ----

    /// Reload the structural description, mark the link ready and query live state.
    fn initialize(&mut self, now: Instant) {
        let desc = match self
            .structure
            .load()
        {
            Ok(desc) => desc,
            Err(e) => {
                error!("[STATE] structural description not loaded: {}", e);
                return;
            }
        };

        let (summary, queues, extensions) = {
            let mut state = self
                .shared
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let summary = state.load_structure(&desc);
            state.drain_events();
            (summary, state.queue_ids(), state.extension_ids())
        };
        self.status
            .promote_ready();
        info!(
            "[STATE] Ready: {} extensions, {} queues, {} trunks, {} parkings",
            summary.extensions, summary.queues, summary.trunks, summary.parkings
        );
        self.shared
            .bus
            .publish(ProxyEvent::Ready(summary));

        let mut followups = vec![
            Command::new(PARKING_LIST_COMMAND),
            Command::new("listParkedCalls"),
        ];
        followups.extend(
            queues
                .into_iter()
                .map(|queue| Command::new(QUEUE_DETAILS_COMMAND).arg("queue", queue)),
        );
        followups.push(Command::new("listChannels"));
        for exten in extensions {
            followups.push(Command::new("extenStatus").arg("exten", exten.clone()));
            followups.push(Command::new("dndGet").arg("exten", exten.clone()));
            for kind in CallForwardType::ALL {
                followups.push(
                    Command::new("cfGet")
                        .arg("exten", exten.clone())
                        .arg("type", kind.db_family()),
                );
            }
        }
        for command in followups {
            self.issue_internal(command, now);
        }
    }

    /// Re-read every queue so counters and waiting callers converge even when events were
    /// missed. Skipped unless ready, or while the previous round is still pending.
    pub(crate) fn refresh_queues(&mut self, now: Instant) {
        if self.status.get() != ConnectionState::Ready {
            return;
        }
        if self
            .pending
            .values()
            .any(|p| p.name == QUEUE_DETAILS_COMMAND)
        {
            debug!("[DISPATCH] previous queue refresh still pending, skipped");
            return;
        }
        let queues = self
            .shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .queue_ids();
        trace!("[DISPATCH] refreshing {} queues", queues.len());
        for queue in queues {
            self.issue_internal(Command::new(QUEUE_DETAILS_COMMAND).arg("queue", queue), now);
        }
    }

    /// Fold the reply of an internally issued command into the State Store.
    fn apply_followup(&mut self, command: &Command, reply: CommandReply) {
        let wall = unix_now();
        let derived = {
            let mut state = self
                .shared
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match (command.name(), reply) {
                ("listParkings", CommandReply::ParkingLots(lots)) => state.apply_parking_lots(&lots),
                ("listParkedCalls", CommandReply::ParkedCalls(calls)) => {
                    state.apply_parked_calls(&calls, wall)
                }
                ("queueDetails", CommandReply::QueueStatus(status)) => {
                    state.apply_queue_status(&status, wall)
                }
                ("listChannels", CommandReply::Channels(channels)) => {
                    state.apply_channels(&channels, wall)
                }
                ("extenStatus", CommandReply::ExtensionState(info)) => {
                    state.set_device_state(&info.exten, info.state)
                }
                ("dndGet", CommandReply::DbValue(value)) => {
                    if let Some(exten) = command.param("exten") {
                        state.set_dnd(exten, value.is_some_and(|v| !v.is_empty()));
                    }
                }
                ("cfGet", CommandReply::DbValue(value)) => {
                    if let Some(exten) = command.param("exten") {
                        let kind = command
                            .param("type")
                            .and_then(CallForwardType::parse)
                            .unwrap_or(CallForwardType::Unconditional);
                        state.set_call_forward(exten, kind, value);
                    }
                }
                (name, reply) => debug!(command = name, "[STATE] unexpected follow-up reply {:?}", reply),
            }
            state.drain_events()
        };
        self.publish(derived);
    }

    // ---- link signals ----

    pub(crate) fn handle_signal(&mut self, signal: LinkSignal) {
        match signal {
            LinkSignal::Close { had_error } => {
                if !self
                    .pending
                    .is_empty()
                {
                    info!(
                        "[DISPATCH] link closed (error: {}), failing {} pending commands",
                        had_error,
                        self.pending
                            .len()
                    );
                }
                self.fail_all(|| AmiError::ConnectionLost);
            }
            LinkSignal::LoginFailed(reason) => warn!("[AUTH] login failed: {}", reason),
            other => debug!("[DISPATCH] link signal {:?}", other),
        }
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending
            .len()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
