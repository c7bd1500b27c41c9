//! Asterisk Manager Interface (AMI) proxy for Rust
//!
//! This crate keeps one authenticated AMI session to an Asterisk PBX, turns caller requests
//! into correlated AMI actions, and folds the unsolicited event stream into an in-memory
//! model of extensions, queues, trunks, parking slots and conference rooms.
//!
//! # Architecture
//!
//! Two background tasks do all the work:
//! - the transport supervisor owns the socket: login, keep-alive, reconnect
//! - the dispatcher owns the plugins and the State Store; frames are applied in wire order
//!
//! [`AmiProxy`] is the facade in front of them: submit commands with
//! [`do_cmd`](AmiProxy::do_cmd) or [`execute`](AmiProxy::execute), read snapshots with
//! [`extensions`](AmiProxy::extensions) and friends, and subscribe to [`ProxyEvent`]s.
//!
//! # Examples
//!
//! ## Commands
//!
//! ```rust,no_run
//! use ami_proxy::{AmiProxy, AmiError, Command, CommandReply, ProxyConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AmiError> {
//!     let mut proxy = AmiProxy::new(ProxyConfig::load("/etc/amiproxy.toml")?);
//!     proxy.start()?;
//!
//!     match proxy.execute(Command::new("ping")).await? {
//!         CommandReply::Pong => println!("PBX is alive"),
//!         other => println!("unexpected reply {:?}", other),
//!     }
//!
//!     proxy.do_cmd(
//!         Command::new("queueMemberPauseUnpause")
//!             .arg("interface", "PJSIP/201")
//!             .arg("paused", "true"),
//!         |result| println!("pause: {:?}", result),
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Derived events
//!
//! Subscribers never see raw AMI event names:
//!
//! ```rust,no_run
//! use ami_proxy::{AmiProxy, EventKind, ProxyConfig, ProxyEvent};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut proxy = AmiProxy::new(ProxyConfig::default());
//!     proxy.start().expect("start");
//!
//!     let _sub = proxy.subscribe(EventKind::QueueRecallMatched, |event| {
//!         if let ProxyEvent::QueueRecallMatched(m) = event {
//!             println!("{} called back queue {} after {}s", m.number, m.queue, m.after_secs);
//!         }
//!     });
//!
//!     let mut events = proxy.event_stream();
//!     while let Some(event) = events.recv().await {
//!         println!("{}: {:?}", event.kind(), event.subject_id());
//!     }
//! }
//! ```
//!
//! ## Correlation ids
//!
//! ```rust
//! use ami_proxy::{Action, ActionId};
//!
//! let id = ActionId::new("queueDetails", 17);
//! assert_eq!(id.command(), Some("queueDetails"));
//!
//! let wire = Action::new("QueueStatus")
//!     .header("Queue", "600")
//!     .to_wire_format(&id)
//!     .unwrap();
//! assert!(wire.starts_with("Action: QueueStatus\r\nActionID: queueDetails_17\r\n"));
//! ```

#[macro_use]
mod macros;

pub mod action;
pub mod channel;
pub mod command;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod events;
pub mod frame;
pub mod headers;
pub mod plugins;
pub mod proxy;
pub mod recall;
pub mod state;

pub(crate) mod buffer;
pub(crate) mod dispatch;
pub(crate) mod protocol;

pub use action::{Action, ActionId};
pub use channel::{
    AmiChannelState, CallDirection, DeviceState, QueueMemberStatus, RecordingState, Registration,
};
pub use command::{Command, CommandReply};
pub use config::{AmiConfig, ProxyConfig};
pub use connection::{ConnectionState, LinkSignal};
pub use constants::DEFAULT_AMI_PORT;
pub use dispatch::ReplyCallback;
pub use error::{AmiError, AmiResult};
pub use events::{EventKind, EventStream, ProxyEvent, ReadySummary, Subscription};
pub use frame::{AmiFrame, FrameKind};
pub use headers::FrameHeader;
pub use plugins::{CommandPlugin, Completed, EventContext, EventPlugin};
pub use proxy::AmiProxy;
pub use recall::{QueueRecallManager, RecallStatus};
pub use state::{
    Conference, Extension, JsonFileStructure, Parking, Queue, RecallMatch, StructureDescription,
    StructureSource, Trunk,
};
