//! Transport connection to the manager interface
//!
//! One supervisor task owns the socket. It connects, reads the banner, logs in and then
//! multiplexes socket reads with the outbound action queue until the link drops, after
//! which it reconnects according to the configured policy. Every decoded frame and every
//! lifecycle signal goes out on a single ordered channel, so consumers observe them in
//! wire order.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::{
    action::{command_name_of, Action, ActionId, ActionIdGenerator},
    config::AmiConfig,
    constants::{
        KEEPALIVE_ACTION_PREFIX, LOGIN_ACTION_PREFIX, READ_POLL_MS, SOCKET_BUF_SIZE,
    },
    error::{AmiError, AmiResult},
    frame::AmiFrame,
    protocol::AmiParser,
};

/// State of the manager link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ConnectionState {
    /// No session; waiting to (re)connect or stopped.
    Disconnected,
    /// TCP connect and login in progress.
    Connecting,
    /// Logged in; the State Store is not initialized yet.
    Connected,
    /// `FullyBooted` seen and the structural description loaded.
    Ready,
}

impl ConnectionState {
    /// Whether actions may be written
    pub fn is_logged_in(&self) -> bool {
        matches!(self, Self::Connected | Self::Ready)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// Low-level lifecycle signal of the link
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LinkSignal {
    /// TCP connection established
    Connected,
    /// Login accepted
    LoggedIn,
    /// Login rejected
    LoginFailed(String),
    /// Peer closed the socket
    End,
    /// Socket or protocol error
    Error(String),
    /// Connect/login timed out, or no traffic within the liveness window
    Timeout,
    /// Writing to the socket failed
    Unwritable(String),
    /// Session over; always the last signal of a session
    Close { had_error: bool },
}

/// Item delivered by the transport, in arrival order
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Frame(AmiFrame),
    Signal(LinkSignal),
}

/// Shared, writable view of the link state.
///
/// The transport moves it between `Disconnected`, `Connecting` and `Connected`; the
/// dispatcher promotes `Connected` to `Ready`.
#[derive(Debug, Clone)]
pub struct LinkStatus {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl LinkStatus {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> ConnectionState {
        *self
            .tx
            .borrow()
    }

    pub fn set(&self, state: ConnectionState) {
        self.tx
            .send_if_modified(|current| {
                if *current == state {
                    return false;
                }
                debug!("[STATE] {} -> {}", current, state);
                *current = state;
                true
            });
    }

    /// Promote to `Ready` only from `Connected`; a link that dropped meanwhile stays down.
    pub fn promote_ready(&self) -> bool {
        self.tx
            .send_if_modified(|current| {
                if *current != ConnectionState::Connected {
                    return false;
                }
                debug!("[STATE] {} -> {}", current, ConnectionState::Ready);
                *current = ConnectionState::Ready;
                true
            })
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx
            .subscribe()
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle that writes actions to the current session.
///
/// [`send`](Self::send) assigns the correlation id and queues the serialized action for
/// the supervisor task, which performs the actual socket write.
#[derive(Clone)]
pub struct ActionSender {
    tx: mpsc::UnboundedSender<String>,
    status: LinkStatus,
    ids: Arc<ActionIdGenerator>,
}

impl std::fmt::Debug for ActionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSender")
            .field("state", &self.status.get())
            .finish()
    }
}

impl ActionSender {
    /// Sender not attached to a socket; the receiver gets every serialized action.
    /// Used by tests and by embedders that run their own transport.
    pub fn detached(status: LinkStatus) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                status,
                ids: Arc::new(ActionIdGenerator::new()),
            },
            rx,
        )
    }

    /// Queue `action` under a fresh `<command>_<seq>` id.
    pub fn send(&self, command: &str, action: Action) -> AmiResult<ActionId> {
        if !self
            .status
            .get()
            .is_logged_in()
        {
            return Err(AmiError::NotConnected);
        }
        let id = self
            .ids
            .next_for(command);
        let wire = action.to_wire_format(&id)?;
        debug!(action = action.name(), action_id = %id, "[SEND] {:?}", action);
        self.tx
            .send(wire)
            .map_err(|_| AmiError::NotConnected)?;
        Ok(id)
    }

    pub fn state(&self) -> ConnectionState {
        self.status
            .get()
    }
}

/// Delay policy between reconnect attempts
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    base_ms: u64,
    cap_ms: Option<u64>,
    current_ms: u64,
}

impl Backoff {
    pub(crate) fn new(base_ms: u64, cap_ms: Option<u64>) -> Self {
        Self {
            base_ms,
            cap_ms,
            current_ms: base_ms,
        }
    }

    /// Delay after a session that logged in successfully
    pub(crate) fn reset(&mut self) -> u64 {
        self.current_ms = self.base_ms;
        self.base_ms
    }

    /// Delay after a failed attempt; doubles toward the cap when one is configured
    pub(crate) fn next_delay(&mut self) -> u64 {
        let wait = self.current_ms;
        if let Some(cap) = self.cap_ms {
            self.current_ms = self
                .current_ms
                .saturating_mul(2)
                .min(cap.max(self.base_ms));
        }
        wait
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy)]
struct SessionOutcome {
    logged_in: bool,
    had_error: bool,
    shutdown: bool,
}

/// Supervisor of the manager link; consumed by [`run`](Self::run).
pub struct Transport {
    config: AmiConfig,
    status: LinkStatus,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    events_tx: mpsc::Sender<TransportEvent>,
    shutdown_rx: watch::Receiver<bool>,
    ids: Arc<ActionIdGenerator>,
}

impl Transport {
    /// Build the supervisor and the sender that feeds it.
    pub fn new(
        config: AmiConfig,
        status: LinkStatus,
        events_tx: mpsc::Sender<TransportEvent>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Self, ActionSender) {
        let (tx, outbound_rx) = mpsc::unbounded_channel();
        let ids = Arc::new(ActionIdGenerator::new());
        let sender = ActionSender {
            tx,
            status: status.clone(),
            ids: ids.clone(),
        };
        let transport = Self {
            config,
            status,
            outbound_rx,
            events_tx,
            shutdown_rx,
            ids,
        };
        (transport, sender)
    }

    /// Run until shutdown, or until the first close when reconnect is disabled.
    pub async fn run(self) {
        let status = self
            .status
            .clone();
        let result = std::panic::AssertUnwindSafe(self.run_inner());
        if futures_util::FutureExt::catch_unwind(result)
            .await
            .is_err()
        {
            error!("[CONNECT] transport task panicked");
            status.set(ConnectionState::Disconnected);
        }
    }

    async fn run_inner(mut self) {
        let mut backoff = Backoff::new(
            self.config
                .reconnect_delay_ms,
            self.config
                .max_reconnect_delay_ms,
        );

        loop {
            if self.shutdown_requested() {
                break;
            }

            self.status
                .set(ConnectionState::Connecting);
            let outcome = self
                .session()
                .await;
            self.status
                .set(ConnectionState::Disconnected);
            self.emit(LinkSignal::Close {
                had_error: outcome.had_error,
            })
            .await;

            if outcome.shutdown || self.shutdown_requested() {
                break;
            }
            if !self
                .config
                .reconnect
            {
                info!("[CONNECT] Reconnect disabled, transport stopping");
                break;
            }

            let delay_ms = if outcome.logged_in {
                backoff.reset()
            } else {
                backoff.next_delay()
            };
            info!("[CONNECT] Reconnecting in {}ms", delay_ms);

            tokio::select! {
                _ = sleep(Duration::from_millis(delay_ms)) => {}
                _ = self.shutdown_rx.changed() => break,
            }
        }

        self.status
            .set(ConnectionState::Disconnected);
        debug!("[CONNECT] transport stopped");
    }

    fn shutdown_requested(&self) -> bool {
        *self
            .shutdown_rx
            .borrow()
    }

    async fn emit(&self, signal: LinkSignal) {
        trace!("[SIGNAL] {:?}", signal);
        let _ = self
            .events_tx
            .send(TransportEvent::Signal(signal))
            .await;
    }

    /// One connect-login-pump cycle.
    async fn session(&mut self) -> SessionOutcome {
        // Actions queued against a dead session were already failed by the dispatcher.
        let mut stale = 0usize;
        while self
            .outbound_rx
            .try_recv()
            .is_ok()
        {
            stale += 1;
        }
        if stale > 0 {
            debug!("[CONNECT] Discarded {} stale outbound actions", stale);
        }

        let failed = SessionOutcome {
            logged_in: false,
            had_error: true,
            shutdown: false,
        };

        let host = self
            .config
            .host
            .clone();
        let port = self
            .config
            .port;
        let connect_timeout = Duration::from_millis(
            self.config
                .connect_timeout_ms,
        );

        info!("[CONNECT] Connecting to manager at {}:{}", host, port);
        let stream = match timeout(connect_timeout, TcpStream::connect((host.as_str(), port))).await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                warn!("[CONNECT] TCP connect failed: {}", e);
                self.emit(LinkSignal::Error(e.to_string()))
                    .await;
                return failed;
            }
            Err(_) => {
                warn!(
                    "[CONNECT] TCP connect timed out after {}ms",
                    self.config
                        .connect_timeout_ms
                );
                self.emit(LinkSignal::Timeout)
                    .await;
                return failed;
            }
        };
        let _ = stream.set_nodelay(true);
        self.emit(LinkSignal::Connected)
            .await;

        let (mut reader, mut writer) = stream.into_split();
        let mut parser = AmiParser::new();
        let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];

        let login = timeout(
            connect_timeout,
            self.login(&mut reader, &mut writer, &mut parser, &mut read_buffer),
        )
        .await;
        match login {
            Ok(Ok(())) => {
                info!(
                    "[AUTH] Logged in as {} ({})",
                    self.config
                        .username,
                    parser
                        .banner()
                        .unwrap_or("no banner")
                );
                self.status
                    .set(ConnectionState::Connected);
                self.emit(LinkSignal::LoggedIn)
                    .await;
            }
            Ok(Err(AmiError::AuthFailed { reason })) => {
                warn!("[AUTH] Login rejected: {}", reason);
                self.emit(LinkSignal::LoginFailed(reason))
                    .await;
                return failed;
            }
            Ok(Err(e)) => {
                warn!("[AUTH] Login failed: {}", e);
                self.emit(LinkSignal::Error(e.to_string()))
                    .await;
                return failed;
            }
            Err(_) => {
                warn!(
                    "[AUTH] Login timed out after {}ms",
                    self.config
                        .connect_timeout_ms
                );
                self.emit(LinkSignal::Timeout)
                    .await;
                return failed;
            }
        }

        let (had_error, shutdown) = self
            .pump(reader, writer, parser, read_buffer)
            .await;
        SessionOutcome {
            logged_in: true,
            had_error,
            shutdown,
        }
    }

    async fn login(
        &self,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        parser: &mut AmiParser,
        read_buffer: &mut [u8],
    ) -> AmiResult<()> {
        let id = self
            .ids
            .next_for(LOGIN_ACTION_PREFIX);
        let action = Action::new("Login")
            .header("Username", &self.config.username)
            .header("Secret", &self.config.secret)
            .header("Events", "on");
        debug!("[AUTH] Sending Login {} [REDACTED]", self.config.username);
        writer
            .write_all(
                action
                    .to_wire_format(&id)?
                    .as_bytes(),
            )
            .await?;

        loop {
            while let Some(frame) = next_frame(parser)? {
                if frame.action_id() != Some(id.as_str()) {
                    trace!("[AUTH] Ignoring {} before login reply", frame.label());
                    continue;
                }
                if frame.is_success() {
                    return Ok(());
                }
                return Err(AmiError::auth_failed(
                    frame
                        .message()
                        .unwrap_or("Authentication failed"),
                ));
            }

            let n = reader
                .read(read_buffer)
                .await?;
            if n == 0 {
                return Err(AmiError::ConnectionClosed);
            }
            parser.add_data(&read_buffer[..n])?;
        }
    }

    /// Main loop of a logged-in session. Returns `(had_error, shutdown)`.
    async fn pump(
        &mut self,
        mut reader: OwnedReadHalf,
        mut writer: OwnedWriteHalf,
        mut parser: AmiParser,
        mut read_buffer: Vec<u8>,
    ) -> (bool, bool) {
        let keepalive = Duration::from_millis(
            self.config
                .keepalive_interval_ms,
        );
        let liveness = Duration::from_millis(
            self.config
                .liveness_timeout_ms,
        );
        let poll = [keepalive, liveness]
            .into_iter()
            .filter(|d| !d.is_zero())
            .fold(Duration::from_millis(READ_POLL_MS), Duration::min);
        let mut last_recv = Instant::now();
        let mut last_ping = Instant::now();

        loop {
            // Frames already buffered go out before the next read.
            loop {
                match parser.parse_frame() {
                    Ok(Some(frame)) => {
                        if is_transport_reply(&frame) {
                            trace!("[RECV] keep-alive reply {}", frame.label());
                            continue;
                        }
                        trace!("[RECV] {}", frame.label());
                        if self
                            .events_tx
                            .send(TransportEvent::Frame(frame))
                            .await
                            .is_err()
                        {
                            debug!("[RECV] Frame channel closed, transport exiting");
                            return (false, true);
                        }
                    }
                    Ok(None) => break,
                    Err(AmiError::MalformedFrame { reason }) => {
                        warn!("[RECV] Dropping malformed frame: {}", reason);
                    }
                    Err(e) => {
                        warn!("[RECV] Parser error: {}", e);
                        self.emit(LinkSignal::Error(e.to_string()))
                            .await;
                        return (true, false);
                    }
                }
            }

            if !liveness.is_zero() && last_recv.elapsed() > liveness {
                warn!(
                    "[RECV] Liveness timeout: {}ms without traffic (threshold {}ms)",
                    last_recv
                        .elapsed()
                        .as_millis(),
                    liveness.as_millis()
                );
                self.emit(LinkSignal::Timeout)
                    .await;
                return (true, false);
            }

            if !keepalive.is_zero()
                && last_recv.elapsed() >= keepalive
                && last_ping.elapsed() >= keepalive
            {
                last_ping = Instant::now();
                let id = self
                    .ids
                    .next_for(KEEPALIVE_ACTION_PREFIX);
                let ping = Action::new("Ping").to_wire_format(&id);
                trace!("[SEND] keep-alive {}", id);
                let written = match ping {
                    Ok(wire) => writer
                        .write_all(wire.as_bytes())
                        .await
                        .map_err(AmiError::from),
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    warn!("[SEND] keep-alive write failed: {}", e);
                    self.emit(LinkSignal::Unwritable(e.to_string()))
                        .await;
                    return (true, false);
                }
            }

            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("[CONNECT] Shutdown requested, logging off");
                        let logoff = Action::new("Logoff")
                            .to_wire_format(&self.ids.next_for("logoff"));
                        if let Ok(wire) = logoff {
                            let _ = writer.write_all(wire.as_bytes()).await;
                        }
                        return (false, true);
                    }
                }
                read = timeout(poll, reader.read(&mut read_buffer)) => {
                    match read {
                        Ok(Ok(0)) => {
                            info!("[RECV] Connection closed by peer (EOF)");
                            self.emit(LinkSignal::End).await;
                            return (false, false);
                        }
                        Ok(Ok(n)) => {
                            last_recv = Instant::now();
                            if let Err(e) = parser.add_data(&read_buffer[..n]) {
                                warn!("[RECV] Buffer error: {}", e);
                                self.emit(LinkSignal::Error(e.to_string())).await;
                                return (true, false);
                            }
                        }
                        Ok(Err(e)) => {
                            warn!("[RECV] Read error: {}", e);
                            self.emit(LinkSignal::Error(e.to_string())).await;
                            return (true, false);
                        }
                        // Idle poll; keep-alive and liveness run at the top of the loop.
                        Err(_) => {}
                    }
                }
                outbound = self.outbound_rx.recv() => {
                    let Some(wire) = outbound else {
                        debug!("[SEND] All senders dropped, transport exiting");
                        return (false, true);
                    };
                    if let Err(e) = writer.write_all(wire.as_bytes()).await {
                        warn!("[SEND] Write failed: {}", e);
                        self.emit(LinkSignal::Unwritable(e.to_string())).await;
                        return (true, false);
                    }
                }
            }
        }
    }
}

fn next_frame(parser: &mut AmiParser) -> AmiResult<Option<AmiFrame>> {
    loop {
        match parser.parse_frame() {
            Err(AmiError::MalformedFrame { reason }) => {
                warn!("[RECV] Dropping malformed frame: {}", reason);
            }
            other => return other,
        }
    }
}

/// Replies to actions the transport issues itself (login, keep-alive)
fn is_transport_reply(frame: &AmiFrame) -> bool {
    frame
        .action_id()
        .and_then(command_name_of)
        .is_some_and(|cmd| cmd == KEEPALIVE_ACTION_PREFIX || cmd == LOGIN_ACTION_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_fixed_without_cap() {
        let mut b = Backoff::new(3000, None);
        assert_eq!(b.next_delay(), 3000);
        assert_eq!(b.next_delay(), 3000);
        assert_eq!(b.reset(), 3000);
    }

    #[test]
    fn test_backoff_doubles_to_cap_and_resets() {
        let mut b = Backoff::new(1000, Some(5000));
        assert_eq!(b.next_delay(), 1000);
        assert_eq!(b.next_delay(), 2000);
        assert_eq!(b.next_delay(), 4000);
        assert_eq!(b.next_delay(), 5000);
        assert_eq!(b.next_delay(), 5000);
        assert_eq!(b.reset(), 1000);
        assert_eq!(b.next_delay(), 1000);
    }

    #[test]
    fn test_sender_refuses_when_not_logged_in() {
        let status = LinkStatus::new();
        let (sender, mut rx) = ActionSender::detached(status.clone());
        let err = sender
            .send("ping", Action::new("Ping"))
            .unwrap_err();
        assert!(matches!(err, AmiError::NotConnected));

        status.set(ConnectionState::Connected);
        let id = sender
            .send("ping", Action::new("Ping"))
            .unwrap();
        let wire = rx
            .try_recv()
            .unwrap();
        assert!(wire.contains(&format!("ActionID: {}\r\n", id)));
    }

    #[test]
    fn test_promote_ready_only_from_connected() {
        let status = LinkStatus::new();
        assert!(!status.promote_ready());
        assert_eq!(status.get(), ConnectionState::Disconnected);
        status.set(ConnectionState::Connected);
        assert!(status.promote_ready());
        assert_eq!(status.get(), ConnectionState::Ready);
    }

    #[test]
    fn test_transport_replies_are_recognized() {
        assert!(is_transport_reply(
            &AmiFrame::reply("Success").with("ActionID", "keepalive_12")
        ));
        assert!(is_transport_reply(
            &AmiFrame::reply("Success").with("ActionID", "login_1")
        ));
        assert!(!is_transport_reply(
            &AmiFrame::reply("Success").with("ActionID", "ping_3")
        ));
    }

    use std::collections::HashMap;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    const WAIT: Duration = Duration::from_secs(3);

    struct Running {
        events: mpsc::Receiver<TransportEvent>,
        status: LinkStatus,
        shutdown: watch::Sender<bool>,
    }

    impl Running {
        async fn next_signal(&mut self) -> LinkSignal {
            loop {
                let item = timeout(WAIT, self.events.recv())
                    .await
                    .expect("no transport event")
                    .expect("transport channel closed");
                if let TransportEvent::Signal(signal) = item {
                    return signal;
                }
            }
        }

        async fn next_frame(&mut self) -> AmiFrame {
            loop {
                let item = timeout(WAIT, self.events.recv())
                    .await
                    .expect("no transport event")
                    .expect("transport channel closed");
                if let TransportEvent::Frame(frame) = item {
                    return frame;
                }
            }
        }
    }

    async fn bind() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let port = listener
            .local_addr()
            .unwrap()
            .port();
        (listener, port)
    }

    fn spawn_transport(port: u16, tune: impl FnOnce(&mut AmiConfig)) -> Running {
        let mut config = AmiConfig {
            host: "127.0.0.1".into(),
            port,
            username: "cti".into(),
            secret: "s3cret".into(),
            reconnect_delay_ms: 100,
            keepalive_interval_ms: 0,
            liveness_timeout_ms: 0,
            ..AmiConfig::default()
        };
        tune(&mut config);
        let status = LinkStatus::new();
        let (events_tx, events) = mpsc::channel(64);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (transport, sender) = Transport::new(config, status.clone(), events_tx, shutdown_rx);
        // keep the outbound queue open; the transport exits once every sender is dropped
        std::mem::forget(sender);
        tokio::spawn(transport.run());
        Running {
            events,
            status,
            shutdown,
        }
    }

    async fn read_action(reader: &mut BufReader<OwnedReadHalf>) -> Option<HashMap<String, String>> {
        let mut headers = HashMap::new();
        loop {
            let mut line = String::new();
            if reader
                .read_line(&mut line)
                .await
                .ok()?
                == 0
            {
                return None;
            }
            let line = line.trim_end();
            if line.is_empty() {
                if headers.is_empty() {
                    continue;
                }
                return Some(headers);
            }
            if let Some((k, v)) = line.split_once(':') {
                headers.insert(
                    k.trim()
                        .to_ascii_lowercase(),
                    v.trim()
                        .to_string(),
                );
            }
        }
    }

    /// Accept one connection, send the banner and answer the Login with `response`.
    async fn accept_login(
        listener: &TcpListener,
        response: &str,
    ) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
        let (stream, _) = timeout(WAIT, listener.accept())
            .await
            .expect("no connection attempt")
            .unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        writer
            .write_all(b"Asterisk Call Manager/9.0.0\r\n")
            .await
            .unwrap();
        let login = read_action(&mut reader)
            .await
            .unwrap();
        assert_eq!(login["action"], "Login");
        assert_eq!(login["username"], "cti");
        let message = if response == "Success" {
            "Authentication accepted"
        } else {
            "Authentication failed"
        };
        let reply = format!(
            "Response: {}\r\nActionID: {}\r\nMessage: {}\r\n\r\n",
            response, login["actionid"], message
        );
        writer
            .write_all(reply.as_bytes())
            .await
            .unwrap();
        (reader, writer)
    }

    #[tokio::test]
    async fn test_login_rejected_then_retried_with_backoff() {
        let (listener, port) = bind().await;
        let mut link = spawn_transport(port, |c| c.max_reconnect_delay_ms = Some(1000));

        let _first = accept_login(&listener, "Error").await;
        assert_eq!(link.next_signal().await, LinkSignal::Connected);
        assert_eq!(
            link.next_signal().await,
            LinkSignal::LoginFailed("Authentication failed".into())
        );
        assert_eq!(link.next_signal().await, LinkSignal::Close { had_error: true });
        assert_ne!(link.status.get(), ConnectionState::Connected);
        let closed = Instant::now();

        let _second = accept_login(&listener, "Error").await;
        let first_gap = closed.elapsed();
        assert_eq!(link.next_signal().await, LinkSignal::Connected);
        assert!(matches!(link.next_signal().await, LinkSignal::LoginFailed(_)));
        assert_eq!(link.next_signal().await, LinkSignal::Close { had_error: true });
        let closed = Instant::now();

        let _third = accept_login(&listener, "Success").await;
        let second_gap = closed.elapsed();
        assert_eq!(link.next_signal().await, LinkSignal::Connected);
        assert_eq!(link.next_signal().await, LinkSignal::LoggedIn);
        assert_eq!(link.status.get(), ConnectionState::Connected);

        // 100ms, then doubled
        assert!(first_gap >= Duration::from_millis(80), "{:?}", first_gap);
        assert!(second_gap >= Duration::from_millis(170), "{:?}", second_gap);

        link.shutdown
            .send_replace(true);
    }

    #[tokio::test]
    async fn test_keepalive_ping_reply_stays_in_transport() {
        let (listener, port) = bind().await;
        let mut link = spawn_transport(port, |c| {
            c.keepalive_interval_ms = 100;
            c.liveness_timeout_ms = 1000;
        });
        let (mut reader, mut writer) = accept_login(&listener, "Success").await;
        assert_eq!(link.next_signal().await, LinkSignal::Connected);
        assert_eq!(link.next_signal().await, LinkSignal::LoggedIn);

        for _ in 0..3 {
            let ping = timeout(WAIT, read_action(&mut reader))
                .await
                .expect("no keep-alive sent")
                .unwrap();
            assert_eq!(ping["action"], "Ping");
            assert!(ping["actionid"].starts_with("keepalive_"), "{:?}", ping);
            let pong = format!(
                "Response: Success\r\nActionID: {}\r\nPing: Pong\r\n\r\n",
                ping["actionid"]
            );
            writer
                .write_all(pong.as_bytes())
                .await
                .unwrap();
        }
        writer
            .write_all(b"Event: FullyBooted\r\nStatus: Fully Booted\r\n\r\n")
            .await
            .unwrap();

        // The pongs never reach the consumer; the event is the first frame delivered.
        let frame = link
            .next_frame()
            .await;
        assert_eq!(frame.event_key().as_deref(), Some("fullybooted"));
        assert_eq!(link.status.get(), ConnectionState::Connected);

        link.shutdown
            .send_replace(true);
    }

    #[tokio::test]
    async fn test_silent_peer_hits_liveness_and_reconnects() {
        let (listener, port) = bind().await;
        let mut link = spawn_transport(port, |c| {
            c.keepalive_interval_ms = 100;
            c.liveness_timeout_ms = 300;
        });
        // Keep the write half open so the session ends by timeout, not EOF.
        let (mut reader, _writer) = accept_login(&listener, "Success").await;
        assert_eq!(link.next_signal().await, LinkSignal::Connected);
        assert_eq!(link.next_signal().await, LinkSignal::LoggedIn);
        let logged_in = Instant::now();

        let ping = timeout(WAIT, read_action(&mut reader))
            .await
            .expect("no keep-alive sent")
            .unwrap();
        assert_eq!(ping["action"], "Ping");

        assert_eq!(link.next_signal().await, LinkSignal::Timeout);
        assert_eq!(link.next_signal().await, LinkSignal::Close { had_error: true });
        let silent = logged_in.elapsed();
        assert!(silent >= Duration::from_millis(280), "{:?}", silent);
        assert!(silent < Duration::from_millis(1500), "{:?}", silent);

        let _again = accept_login(&listener, "Success").await;
        assert_eq!(link.next_signal().await, LinkSignal::Connected);
        assert_eq!(link.next_signal().await, LinkSignal::LoggedIn);

        link.shutdown
            .send_replace(true);
    }
}
