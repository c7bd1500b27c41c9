//! Telephony entities held by the State Store.
//!
//! Every type here is plain data: `Clone` for snapshots, `Serialize` for consumers that
//! forward state over REST or websockets.

use crate::channel::{
    AmiChannelState, CallDirection, DeviceState, QueueMemberStatus, RecordingState, Registration,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Seconds since the Unix epoch, for wall-clock stamps in snapshots
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Call-forward targets of an extension
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallForward {
    pub unconditional: Option<String>,
    pub busy: Option<String>,
    pub unavailable: Option<String>,
    /// Mailbox of an unconditional forward to voicemail
    pub voicemail: Option<String>,
}

/// Which call-forward target (AstDB families `CF`, `CFB`, `CFU`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallForwardType {
    Unconditional,
    Busy,
    Unavailable,
}

impl CallForwardType {
    pub const ALL: [CallForwardType; 3] = [
        CallForwardType::Unconditional,
        CallForwardType::Busy,
        CallForwardType::Unavailable,
    ];

    /// AstDB family holding the target
    pub fn db_family(&self) -> &'static str {
        match self {
            Self::Unconditional => "CF",
            Self::Busy => "CFB",
            Self::Unavailable => "CFU",
        }
    }

    /// Parse a command parameter or AstDB family name
    pub fn parse(value: &str) -> Option<Self> {
        match value
            .to_ascii_lowercase()
            .as_str()
        {
            "cf" | "unconditional" => Some(Self::Unconditional),
            "cfb" | "busy" => Some(Self::Busy),
            "cfu" | "unavailable" | "noanswer" => Some(Self::Unavailable),
            _ => None,
        }
    }
}

/// One leg of a call seen from an extension or trunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    pub uniqueid: String,
    pub linkedid: String,
    pub channel: String,
    pub counterpart_channel: Option<String>,
    pub direction: CallDirection,
    pub caller_num: String,
    pub caller_name: String,
    pub called_num: String,
    pub started_at: u64,
    pub state: Option<AmiChannelState>,
    pub recording: RecordingState,
}

/// A phone extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extension {
    pub id: String,
    pub name: String,
    pub tech: String,
    pub registration: Registration,
    pub ip: Option<String>,
    pub port: Option<String>,
    pub device_state: DeviceState,
    pub dnd: bool,
    pub call_forward: CallForward,
    pub conversations: BTreeMap<String, Conversation>,
    /// Queue id -> logged in
    pub queue_memberships: BTreeMap<String, bool>,
}

impl Extension {
    pub fn new(id: impl Into<String>, name: impl Into<String>, tech: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tech: tech.into(),
            registration: Registration::Unknown,
            ip: None,
            port: None,
            device_state: DeviceState::Unknown,
            dnd: false,
            call_forward: CallForward::default(),
            conversations: BTreeMap::new(),
            queue_memberships: BTreeMap::new(),
        }
    }
}

/// An external line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trunk {
    pub id: String,
    pub name: String,
    pub tech: String,
    pub registration: Registration,
    pub ip: Option<String>,
    pub port: Option<String>,
    pub conversations: BTreeMap<String, Conversation>,
}

impl Trunk {
    pub fn new(id: impl Into<String>, name: impl Into<String>, tech: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tech: tech.into(),
            registration: Registration::Unknown,
            ip: None,
            port: None,
            conversations: BTreeMap::new(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.conversations
            .len()
    }
}

/// Static or dynamic member of a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueMember {
    pub id: String,
    pub queue: String,
    pub name: String,
    pub interface: String,
    pub membership: String,
    pub logged_in: bool,
    pub paused: bool,
    pub paused_reason: String,
    pub status: QueueMemberStatus,
    pub calls_taken: u64,
    pub last_call: u64,
}

impl QueueMember {
    pub fn new(queue: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            name: String::new(),
            interface: String::new(),
            membership: "dynamic".to_string(),
            logged_in: false,
            paused: false,
            paused_reason: String::new(),
            status: QueueMemberStatus::Unknown,
            calls_taken: 0,
            last_call: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.status
            .is_busy()
    }
}

/// Caller waiting in a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitingCaller {
    pub uniqueid: String,
    pub channel: String,
    pub number: String,
    pub name: String,
    pub position: u32,
    pub joined_at: u64,
}

/// A call queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Queue {
    pub id: String,
    pub name: String,
    pub strategy: String,
    pub members: BTreeMap<String, QueueMember>,
    /// Keyed by the caller's unique id
    pub waiting: BTreeMap<String, WaitingCaller>,
    pub answered: u64,
    pub abandoned: u64,
    /// Callers that entered the queue
    pub held: u64,
}

impl Queue {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            strategy: String::new(),
            members: BTreeMap::new(),
            waiting: BTreeMap::new(),
            answered: 0,
            abandoned: 0,
            held: 0,
        }
    }
}

/// Call sitting in a parking slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParkedCall {
    pub channel: String,
    pub uniqueid: String,
    pub caller_num: String,
    pub caller_name: String,
    pub parked_by: String,
    pub timeout: u64,
    pub parked_at: u64,
}

/// A parking slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parking {
    pub id: String,
    pub name: String,
    pub lot: String,
    pub timeout: u64,
    pub parked: Option<ParkedCall>,
}

impl Parking {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            lot: "default".to_string(),
            timeout: 0,
            parked: None,
        }
    }
}

/// Participant of a meetme room
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConferenceMember {
    pub usernum: String,
    pub extension: String,
    pub name: String,
    pub channel: String,
    pub muted: bool,
    pub owner: bool,
}

/// A meetme room, identified by the owner extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conference {
    pub id: String,
    pub owner: String,
    pub members: BTreeMap<String, ConferenceMember>,
    pub active: bool,
}

impl Conference {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            owner: id.clone(),
            id,
            members: BTreeMap::new(),
            active: true,
        }
    }
}

/// Voicemail counters of one mailbox
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VoicemailCounters {
    pub mailbox: String,
    pub new: u32,
    pub old: u32,
}

/// Call detail record as carried by the `Cdr` event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallDetailRecord {
    pub source: String,
    pub destination: String,
    pub destination_context: String,
    pub caller_id: String,
    pub channel: String,
    pub destination_channel: String,
    pub start_time: String,
    pub answer_time: String,
    pub end_time: String,
    pub duration: u64,
    pub billable_seconds: u64,
    pub disposition: String,
    pub unique_id: String,
}

/// Announcement that an extension is being dialed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dialing {
    pub extension: String,
    pub caller_num: String,
    pub caller_name: String,
    pub channel: String,
    pub uniqueid: String,
}

/// An inbound call recognized as a recall of an abandoned queue call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecallMatch {
    pub queue: String,
    pub number: String,
    pub uniqueid: String,
    /// Seconds between the abandonment and the new call
    pub after_secs: u64,
}
