//! Integration tests against a scripted AMI server on a loopback socket.
//!
//! The mock answers `Login`, `Ping` and `DBGet` (family `DND`, replies held in pairs and
//! sent back reversed), never answers `Hangup`, and rejects every other action with
//! `Response: Error`. Tests push unsolicited events through [`MockSession::inject`].

use ami_proxy::{
    AmiError, AmiProxy, Command, CommandReply, ConnectionState, DeviceState, EventStream,
    ProxyConfig, ProxyEvent, StructureDescription,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

const BANNER: &str = "Asterisk Call Manager/9.0.0\r\n";
const USERNAME: &str = "cti";
const SECRET: &str = "s3cret";
const WAIT: Duration = Duration::from_secs(5);

const STRUCTURE: &str = r#"{
    "extensions": { "201": { "name": "Alice", "tech": "pjsip" }, "202": { "name": "Bob", "tech": "pjsip" } },
    "queues": { "600": { "name": "Support", "members": ["201"] } },
    "trunks": { "2001": { "name": "Provider", "tech": "pjsip" } },
    "parkings": { "71": { "name": "Parking 71", "timeout": 45 } }
}"#;

type Block = HashMap<String, String>;

fn frame(pairs: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (key, value) in pairs {
        out.push_str(&format!("{}: {}\r\n", key, value));
    }
    out.push_str("\r\n");
    out
}

async fn read_block(reader: &mut BufReader<OwnedReadHalf>) -> Option<Block> {
    let mut block = Block::new();
    loop {
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .ok()?;
        if n == 0 {
            return None;
        }
        let line = line.trim_end();
        if line.is_empty() {
            if block.is_empty() {
                continue;
            }
            return Some(block);
        }
        if let Some((key, value)) = line.split_once(':') {
            block.insert(
                key.trim()
                    .to_ascii_lowercase(),
                value
                    .trim()
                    .to_string(),
            );
        }
    }
}

fn get<'a>(block: &'a Block, key: &str) -> &'a str {
    block
        .get(key)
        .map(String::as_str)
        .unwrap_or("")
}

struct MockSession {
    out: mpsc::UnboundedSender<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockSession {
    /// Accept one connection, greet, and accept the login.
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(WAIT, listener.accept())
            .await
            .expect("no connection attempt")
            .unwrap();
        Self::handshake(stream).await
    }

    async fn handshake(stream: TcpStream) -> Self {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        writer
            .write_all(BANNER.as_bytes())
            .await
            .unwrap();

        let login = read_block(&mut reader)
            .await
            .expect("login action");
        assert_eq!(get(&login, "action"), "Login");
        assert_eq!(get(&login, "username"), USERNAME);
        assert_eq!(get(&login, "secret"), SECRET);
        assert_eq!(get(&login, "events"), "on");
        writer
            .write_all(
                frame(&[
                    ("Response", "Success"),
                    ("ActionID", get(&login, "actionid")),
                    ("Message", "Authentication accepted"),
                ])
                .as_bytes(),
            )
            .await
            .unwrap();

        let (out, mut out_rx) = mpsc::unbounded_channel::<String>();
        let write_task = tokio::spawn(async move {
            while let Some(data) = out_rx
                .recv()
                .await
            {
                if writer
                    .write_all(data.as_bytes())
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let replies = out.clone();
        let read_task = tokio::spawn(async move {
            let mut held: Vec<Block> = Vec::new();
            while let Some(action) = read_block(&mut reader).await {
                let id = get(&action, "actionid").to_string();
                match get(&action, "action") {
                    "Ping" => {
                        let _ = replies.send(frame(&[
                            ("Response", "Success"),
                            ("ActionID", &id),
                            ("Ping", "Pong"),
                        ]));
                    }
                    "Hangup" | "Logoff" => {}
                    "DBGet" if get(&action, "family") == "DND" => {
                        held.push(action);
                        if held.len() == 2 {
                            let pair: Vec<Block> = held
                                .drain(..)
                                .rev()
                                .collect();
                            for block in &pair {
                                let _ = replies.send(frame(&[
                                    ("Response", "Success"),
                                    ("ActionID", get(block, "actionid")),
                                    ("EventList", "start"),
                                ]));
                            }
                            for block in &pair {
                                let value = format!("on-{}", get(block, "key"));
                                let _ = replies.send(frame(&[
                                    ("Event", "DBGetResponse"),
                                    ("ActionID", get(block, "actionid")),
                                    ("Family", "DND"),
                                    ("Key", get(block, "key")),
                                    ("Val", &value),
                                ]));
                            }
                        }
                    }
                    _ => {
                        let _ = replies.send(frame(&[
                            ("Response", "Error"),
                            ("ActionID", &id),
                            ("Message", "Not supported by mock"),
                        ]));
                    }
                }
            }
        });

        Self {
            out,
            tasks: vec![write_task, read_task],
        }
    }

    fn inject(&self, pairs: &[(&str, &str)]) {
        self.inject_raw(&frame(pairs));
    }

    fn inject_raw(&self, data: &str) {
        self.out
            .send(data.to_string())
            .unwrap();
    }

    /// Drop the socket from the server side.
    fn close(self) {
        for task in self.tasks {
            task.abort();
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

fn proxy(port: u16) -> AmiProxy {
    let mut config = ProxyConfig::default();
    config.ami.host = "127.0.0.1".to_string();
    config.ami.port = port;
    config.ami.username = USERNAME.to_string();
    config.ami.secret = SECRET.to_string();
    config.ami.reconnect_delay_ms = 200;
    config.ami.keepalive_interval_ms = 0;
    config.ami.liveness_timeout_ms = 0;
    config.command_timeout_ms = 2000;
    AmiProxy::new(config).with_structure(StructureDescription::from_json(STRUCTURE).unwrap())
}

async fn wait_state(proxy: &AmiProxy, wanted: impl Fn(ConnectionState) -> bool) {
    let mut rx = proxy.status_watch();
    timeout(WAIT, rx.wait_for(|s| wanted(*s)))
        .await
        .expect("link state not reached")
        .unwrap();
}

async fn next_matching(stream: &mut EventStream, wanted: impl Fn(&ProxyEvent) -> bool) -> ProxyEvent {
    timeout(WAIT, async {
        loop {
            let event = stream
                .recv()
                .await
                .expect("event stream closed");
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not received")
}

/// Start a proxy against a fresh mock and bring the link to `Ready`.
async fn ready() -> (AmiProxy, MockSession, TcpListener, EventStream) {
    let (listener, port) = bind().await;
    let mut proxy = proxy(port);
    let events = proxy.event_stream();
    proxy
        .start()
        .unwrap();
    let session = MockSession::accept(&listener).await;
    wait_state(&proxy, |s| s == ConnectionState::Connected).await;
    session.inject(&[("Event", "FullyBooted"), ("Status", "Fully Booted")]);
    wait_state(&proxy, |s| s == ConnectionState::Ready).await;
    (proxy, session, listener, events)
}

#[tokio::test]
async fn queue_login_abandon_and_recall() {
    let (proxy, pbx, _listener, mut events) = ready().await;

    let queues = proxy.queues();
    assert!(!queues["600"].members["201"].logged_in);

    pbx.inject(&[
        ("Event", "QueueMemberAdded"),
        ("Queue", "600"),
        ("MemberName", "Alice"),
        ("Interface", "PJSIP/201"),
        ("StateInterface", "PJSIP/201"),
        ("Membership", "dynamic"),
        ("Status", "1"),
        ("Paused", "0"),
    ]);
    next_matching(&mut events, |e| {
        matches!(e, ProxyEvent::QueueChanged(q) if q.id == "600" && q.members["201"].logged_in)
    })
    .await;
    assert!(proxy.queues()["600"].members["201"].logged_in);

    pbx.inject(&[
        ("Event", "QueueCallerJoin"),
        ("Queue", "600"),
        ("Channel", "PJSIP/2001-00000010"),
        ("CallerIDNum", "3351234567"),
        ("Uniqueid", "1700000000.10"),
        ("Position", "1"),
    ]);
    pbx.inject(&[
        ("Event", "QueueCallerAbandon"),
        ("Queue", "600"),
        ("CallerIDNum", "3351234567"),
        ("Uniqueid", "1700000000.10"),
    ]);
    next_matching(&mut events, |e| matches!(e, ProxyEvent::QueueChanged(q) if q.abandoned == 1))
        .await;

    pbx.inject(&[
        ("Event", "Newchannel"),
        ("Channel", "PJSIP/2001-00000011"),
        ("ChannelState", "4"),
        ("CallerIDNum", "3351234567"),
        ("CallerIDName", "<unknown>"),
        ("Exten", "600"),
        ("Uniqueid", "1700000100.11"),
        ("Linkedid", "1700000100.11"),
    ]);
    let matched = next_matching(&mut events, |e| matches!(e, ProxyEvent::QueueRecallMatched(_))).await;
    let ProxyEvent::QueueRecallMatched(matched) = matched else {
        unreachable!()
    };
    assert_eq!(matched.queue, "600");

    let recall = proxy
        .queue_recall_lookup("600", "3351234567")
        .expect("recall match");
    assert_eq!(recall.uniqueid, "1700000100.11");
    assert!(proxy
        .queue_recall_lookup("600", "3351234567")
        .is_none());

    proxy.shutdown();
}

#[tokio::test]
async fn reconnects_once_after_close() {
    let (proxy, pbx, listener, _events) = ready().await;

    let closed_at = Instant::now();
    pbx.close();
    wait_state(&proxy, |s| !s.is_logged_in()).await;

    // nothing is queued across the outage
    let err = proxy
        .execute(Command::new("ping"))
        .await
        .unwrap_err();
    assert!(matches!(err, AmiError::NotConnected));

    let pbx = MockSession::accept(&listener).await;
    assert!(closed_at.elapsed() >= Duration::from_millis(150));
    wait_state(&proxy, |s| s == ConnectionState::Connected).await;

    let reply = proxy
        .execute(Command::new("ping"))
        .await
        .unwrap();
    assert_eq!(reply, CommandReply::Pong);

    assert!(timeout(Duration::from_millis(500), listener.accept())
        .await
        .is_err());

    proxy.shutdown();
    drop(pbx);
}

#[tokio::test]
async fn unknown_and_malformed_frames_are_tolerated() {
    let (proxy, pbx, _listener, mut events) = ready().await;

    pbx.inject(&[("Event", "SomethingFromTheFuture"), ("Detail", "ignored")]);
    pbx.inject_raw("this block has no header at all\r\n\r\n");
    pbx.inject(&[
        ("Event", "ExtensionStatus"),
        ("Exten", "202"),
        ("Context", "from-internal"),
        ("Status", "8"),
    ]);

    next_matching(&mut events, |e| {
        matches!(e, ProxyEvent::ExtensionChanged(x) if x.id == "202" && x.device_state == DeviceState::Ringing)
    })
    .await;
    assert_eq!(proxy.connection_state(), ConnectionState::Ready);
    proxy.shutdown();
}

#[tokio::test]
async fn concurrent_commands_keep_their_replies() {
    let (proxy, _pbx, _listener, _events) = ready().await;

    let (a, b) = tokio::join!(
        proxy.execute(Command::new("dndGet").arg("exten", "201")),
        proxy.execute(Command::new("dndGet").arg("exten", "202")),
    );
    assert_eq!(a.unwrap(), CommandReply::DbValue(Some("on-201".to_string())));
    assert_eq!(b.unwrap(), CommandReply::DbValue(Some("on-202".to_string())));
    proxy.shutdown();
}

#[tokio::test]
async fn unknown_command_and_timeout_reach_the_caller() {
    let (proxy, _pbx, _listener, _events) = ready().await;

    let err = proxy
        .execute(Command::new("teleport").arg("to", "mars"))
        .await
        .unwrap_err();
    assert!(matches!(err, AmiError::UnsupportedCommand { ref command } if command == "teleport"));

    let (tx, rx) = tokio::sync::oneshot::channel();
    proxy.do_cmd_with_timeout(
        Command::new("hangup").arg("channel", "PJSIP/201-00000001"),
        Duration::from_millis(200),
        move |result| {
            let _ = tx.send(result);
        },
    );
    let result = timeout(WAIT, rx)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(AmiError::Timeout { timeout_ms: 200 })));

    // a timed out command does not disturb the next one
    assert_eq!(
        proxy
            .execute(Command::new("ping"))
            .await
            .unwrap(),
        CommandReply::Pong
    );
    proxy.shutdown();
}
