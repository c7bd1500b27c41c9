//! Command descriptors accepted by the dispatcher and their typed replies

use crate::channel::{AmiChannelState, DeviceState, QueueMemberStatus};
use crate::error::{AmiError, AmiResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A named command plus string parameters, as submitted to `do_cmd`.
///
/// ```
/// use ami_proxy::Command;
///
/// let cmd = Command::new("queueDetails").arg("queue", "600");
/// assert_eq!(cmd.name(), "queueDetails");
/// assert_eq!(cmd.param("queue"), Some("600"));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    params: BTreeMap<String, String>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Parameter that must be present and non-empty
    pub fn require(&self, key: &str) -> AmiResult<&str> {
        self.param(key)
            .ok_or_else(|| AmiError::missing_param(key))
    }

    /// Boolean parameter: `true`/`1`/`yes`/`on` are true; absent is `default`.
    pub fn flag(&self, key: &str, default: bool) -> bool {
        match self.param(key) {
            Some(v) => matches!(
                v.to_ascii_lowercase()
                    .as_str(),
                "true" | "1" | "yes" | "on"
            ),
            None => default,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// One entry of a `CoreShowChannels` listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub channel: String,
    pub uniqueid: String,
    pub linkedid: String,
    pub caller_num: String,
    pub caller_name: String,
    pub connected_num: String,
    pub connected_name: String,
    pub exten: String,
    pub context: String,
    pub state: Option<AmiChannelState>,
    pub bridge_id: String,
    pub application: String,
    pub duration: String,
}

/// A parking lot definition from `Parkinglots`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParkingLotInfo {
    pub name: String,
    pub start_space: String,
    pub stop_space: String,
    pub timeout: u64,
}

/// A currently parked call from `ParkedCalls`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParkedCallInfo {
    pub parking_space: String,
    pub parking_lot: String,
    pub channel: String,
    pub uniqueid: String,
    pub caller_num: String,
    pub caller_name: String,
    pub parked_by: String,
    pub timeout: u64,
}

/// `QueueParams` block of a `QueueStatus` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct QueueParams {
    pub queue: String,
    pub strategy: String,
    pub calls: u32,
    pub hold_time: u32,
    pub completed: u64,
    pub abandoned: u64,
}

/// `QueueMember` block of a `QueueStatus` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueMemberInfo {
    pub queue: String,
    pub member: String,
    pub name: String,
    pub interface: String,
    pub membership: String,
    pub paused: bool,
    pub paused_reason: String,
    pub status: QueueMemberStatus,
    pub calls_taken: u64,
    pub last_call: u64,
}

/// `QueueEntry` block (a waiting caller) of a `QueueStatus` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntryInfo {
    pub queue: String,
    pub position: u32,
    pub channel: String,
    pub uniqueid: String,
    pub caller_num: String,
    pub caller_name: String,
    pub wait: u64,
}

/// Aggregated reply of `queueDetails`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct QueueStatusReply {
    pub params: Option<QueueParams>,
    pub members: Vec<QueueMemberInfo>,
    pub entries: Vec<QueueEntryInfo>,
}

/// Aggregated reply of `pjsipDetails`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointDetails {
    pub exten: String,
    pub name: String,
    pub context: String,
    pub ip: String,
    pub port: String,
    pub user_agent: String,
    pub chan_type: String,
}

impl Default for EndpointDetails {
    fn default() -> Self {
        Self {
            exten: String::new(),
            name: String::new(),
            context: String::new(),
            ip: String::new(),
            port: String::new(),
            user_agent: String::new(),
            chan_type: "pjsip".to_string(),
        }
    }
}

/// One participant from `MeetmeList`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeetmeUserInfo {
    pub conference: String,
    pub usernum: String,
    pub caller_num: String,
    pub caller_name: String,
    pub channel: String,
    pub muted: bool,
}

/// Reply of `extenStatus`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionStateInfo {
    pub exten: String,
    pub context: String,
    pub state: DeviceState,
    pub status_text: String,
}

/// Typed result of a completed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
#[non_exhaustive]
pub enum CommandReply {
    /// Action acknowledged with `Response: Success`
    Done { message: Option<String> },
    /// Reply to `ping`
    Pong,
    Channels(Vec<ChannelInfo>),
    ParkingLots(Vec<ParkingLotInfo>),
    ParkedCalls(Vec<ParkedCallInfo>),
    QueueStatus(QueueStatusReply),
    Endpoint(EndpointDetails),
    MeetmeUsers(Vec<MeetmeUserInfo>),
    ExtensionState(ExtensionStateInfo),
    /// AstDB value; `None` when the key does not exist
    DbValue(Option<String>),
}
