//! Command and event plugins
//!
//! A command plugin turns a [`Command`] into an AMI action and folds the correlated reply
//! frames back into a [`CommandReply`]. An event plugin applies one or more unsolicited
//! events to the State Store. Both registries are plain name-to-instance maps built once
//! before the dispatcher starts; adding a plugin never touches dispatch code.

pub mod commands;
pub mod events;

use crate::action::ActionId;
use crate::channel::AmiChannelState;
use crate::command::{ChannelInfo, Command, CommandReply};
use crate::connection::ActionSender;
use crate::error::AmiResult;
use crate::frame::AmiFrame;
use crate::headers::FrameHeader;
use crate::recall::QueueRecallManager;
use crate::state::ProxyState;
use std::collections::HashMap;
use std::str::FromStr;
use tokio::time::Instant;
use tracing::debug;

/// Final outcome of one correlated command
#[derive(Debug)]
pub struct Completed {
    pub id: ActionId,
    pub result: AmiResult<CommandReply>,
}

impl Completed {
    pub fn new(id: &str, result: AmiResult<CommandReply>) -> Self {
        Self {
            id: ActionId::from_wire(id),
            result,
        }
    }
}

/// Handler of one command name
pub trait CommandPlugin: Send {
    /// Command name, also the prefix of every ActionID this plugin issues
    fn name(&self) -> &str;

    /// Build and send the action. The returned id is what reply frames will carry.
    fn execute(&mut self, sender: &ActionSender, command: &Command) -> AmiResult<ActionId>;

    /// Consume a frame carrying one of this plugin's ids. Returns the completion once the
    /// last frame of the reply has arrived.
    fn data(&mut self, frame: &AmiFrame) -> Option<Completed>;

    /// Drop partial state of a command that timed out or lost its link
    fn discard(&mut self, _id: &ActionId) {}
}

/// Collaborators handed to an event plugin for the duration of one frame
pub struct EventContext<'a> {
    pub state: &'a mut ProxyState,
    pub recall: &'a mut QueueRecallManager,
    /// Monotonic clock used by the recall window
    pub now: Instant,
    /// Wall clock, seconds since the epoch
    pub wall: u64,
    /// Commands to issue once the frame has been applied
    pub followups: &'a mut Vec<Command>,
}

/// Handler of one or more lower-cased event names
pub trait EventPlugin: Send {
    fn names(&self) -> &[&'static str];

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()>;
}

/// Name -> command plugin
#[derive(Default)]
pub struct CommandRegistry {
    plugins: HashMap<String, Box<dyn CommandPlugin>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command plugin shipped with the crate
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for plugin in commands::builtin() {
            registry.register(plugin);
        }
        registry
    }

    /// Add a plugin; one registered earlier under the same name is replaced.
    pub fn register(&mut self, plugin: Box<dyn CommandPlugin>) {
        let name = plugin
            .name()
            .to_string();
        if self
            .plugins
            .insert(name.clone(), plugin)
            .is_some()
        {
            debug!("command plugin {} replaced", name);
        }
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn CommandPlugin + 'static)> {
        self.plugins
            .get_mut(name)
            .map(|p| p.as_mut())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .plugins
            .keys()
            .map(|k| k.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// Lower-cased event name -> event plugin
#[derive(Default)]
pub struct EventRegistry {
    plugins: Vec<Box<dyn EventPlugin>>,
    by_name: HashMap<String, usize>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for plugin in events::builtin() {
            registry.register(plugin);
        }
        registry
    }

    /// Add a plugin; its names take over from any plugin registered earlier.
    pub fn register(&mut self, plugin: Box<dyn EventPlugin>) {
        let index = self
            .plugins
            .len();
        for name in plugin.names() {
            self.by_name
                .insert(name.to_ascii_lowercase(), index);
        }
        self.plugins
            .push(plugin);
    }

    pub fn get_mut(&mut self, event_key: &str) -> Option<&mut (dyn EventPlugin + 'static)> {
        let index = *self
            .by_name
            .get(event_key)?;
        self.plugins
            .get_mut(index)
            .map(|p| p.as_mut())
    }

    pub fn contains(&self, event_key: &str) -> bool {
        self.by_name
            .contains_key(event_key)
    }
}

// ---- frame helpers shared by the built-in plugins ----

/// Header as an owned string, empty when absent
pub(crate) fn text(frame: &AmiFrame, header: FrameHeader) -> String {
    frame
        .get_or_empty(header)
        .to_string()
}

/// Numeric header, default when absent or unparsable
pub(crate) fn number<T: FromStr + Default>(frame: &AmiFrame, header: FrameHeader) -> T {
    frame
        .header(header)
        .and_then(|v| {
            v.trim()
                .parse()
                .ok()
        })
        .unwrap_or_default()
}

/// AMI boolean: `1`, `true`, `yes`, `on`
pub(crate) fn truthy(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        matches!(
            v.trim()
                .to_ascii_lowercase()
                .as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

/// Channel fields shared by `Newchannel` and `CoreShowChannel`
pub(crate) fn channel_info(frame: &AmiFrame) -> ChannelInfo {
    ChannelInfo {
        channel: text(frame, FrameHeader::Channel),
        uniqueid: text(frame, FrameHeader::Uniqueid),
        linkedid: text(frame, FrameHeader::Linkedid),
        caller_num: text(frame, FrameHeader::CallerIdNum),
        caller_name: text(frame, FrameHeader::CallerIdName),
        connected_num: text(frame, FrameHeader::ConnectedLineNum),
        connected_name: text(frame, FrameHeader::ConnectedLineName),
        exten: text(frame, FrameHeader::Exten),
        context: text(frame, FrameHeader::Context),
        state: frame
            .header(FrameHeader::ChannelState)
            .and_then(AmiChannelState::from_header),
        bridge_id: text(frame, FrameHeader::BridgeId),
        application: text(frame, FrameHeader::Application),
        duration: text(frame, FrameHeader::Duration),
    }
}

/// The `<unknown>` placeholder Asterisk uses for empty caller id fields
pub(crate) fn clean_caller(value: String) -> String {
    if value.eq_ignore_ascii_case("<unknown>") {
        String::new()
    } else {
        value
    }
}
