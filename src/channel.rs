//! Channel, device and member states carried in AMI event headers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Channel state from Asterisk's `ast_channel_state`, carried in `ChannelState` as an
/// integer and in `ChannelStateDesc` as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
#[repr(u8)]
#[allow(missing_docs)]
pub enum AmiChannelState {
    Down = 0,
    Reserved = 1,
    OffHook = 2,
    Dialing = 3,
    Ring = 4,
    Ringing = 5,
    Up = 6,
    Busy = 7,
    DialingOffhook = 8,
    PreRing = 9,
}

impl AmiChannelState {
    /// Parse from the `ChannelState` integer header value.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            0 => Some(Self::Down),
            1 => Some(Self::Reserved),
            2 => Some(Self::OffHook),
            3 => Some(Self::Dialing),
            4 => Some(Self::Ring),
            5 => Some(Self::Ringing),
            6 => Some(Self::Up),
            7 => Some(Self::Busy),
            8 => Some(Self::DialingOffhook),
            9 => Some(Self::PreRing),
            _ => None,
        }
    }

    /// Parse the header string, accepting either the number or nothing useful.
    pub fn from_header(value: &str) -> Option<Self> {
        value
            .trim()
            .parse::<u8>()
            .ok()
            .and_then(Self::from_number)
    }

    pub fn as_number(&self) -> u8 {
        *self as u8
    }

    /// Ringing on either leg
    pub fn is_ringing(&self) -> bool {
        matches!(self, Self::Ring | Self::Ringing)
    }
}

impl fmt::Display for AmiChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Down => "Down",
            Self::Reserved => "Rsrvd",
            Self::OffHook => "OffHook",
            Self::Dialing => "Dialing",
            Self::Ring => "Ring",
            Self::Ringing => "Ringing",
            Self::Up => "Up",
            Self::Busy => "Busy",
            Self::DialingOffhook => "Dialing Offhook",
            Self::PreRing => "Pre-ring",
        };
        f.write_str(name)
    }
}

/// Device (hint) state of an extension.
///
/// `ExtensionStatus` carries it as a bit-ish integer, `DeviceStateChange` as
/// `NOT_INUSE`-style text; both parse into this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum DeviceState {
    Idle,
    InUse,
    Busy,
    Ringing,
    RingInUse,
    OnHold,
    Unavailable,
    #[default]
    Unknown,
}

impl DeviceState {
    /// Parse the `Status` integer of an `ExtensionStatus` event or `ExtensionState` reply.
    pub fn from_extension_status(n: i32) -> Self {
        match n {
            0 => Self::Idle,
            1 => Self::InUse,
            2 => Self::Busy,
            4 => Self::Unavailable,
            8 => Self::Ringing,
            9 => Self::RingInUse,
            16 | 17 => Self::OnHold,
            -1 | -2 => Self::Unavailable,
            _ => Self::Unknown,
        }
    }

    /// Whether the extension can take a new call
    pub fn is_free(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::InUse => "inuse",
            Self::Busy => "busy",
            Self::Ringing => "ringing",
            Self::RingInUse => "ringinuse",
            Self::OnHold => "onhold",
            Self::Unavailable => "unavailable",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Error returned when parsing an invalid device state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDeviceStateError(pub String);

impl fmt::Display for ParseDeviceStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown device state: {}", self.0)
    }
}

impl std::error::Error for ParseDeviceStateError {}

impl FromStr for DeviceState {
    type Err = ParseDeviceStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s
            .to_uppercase()
            .as_str()
        {
            "NOT_INUSE" | "IDLE" => Ok(Self::Idle),
            "INUSE" => Ok(Self::InUse),
            "BUSY" => Ok(Self::Busy),
            "RINGING" => Ok(Self::Ringing),
            "RINGINUSE" => Ok(Self::RingInUse),
            "ONHOLD" => Ok(Self::OnHold),
            "UNAVAILABLE" | "INVALID" => Ok(Self::Unavailable),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(ParseDeviceStateError(s.to_string())),
        }
    }
}

/// Registration state of a SIP endpoint (extension or trunk)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Registration {
    Registered,
    Unregistered,
    Unreachable,
    #[default]
    Unknown,
}

impl Registration {
    /// Map `PeerStatus` / `ContactStatus` values. Unrecognized values return `None`.
    pub fn from_status(status: &str) -> Option<Self> {
        match status
            .to_ascii_lowercase()
            .as_str()
        {
            "registered" | "reachable" | "created" | "lagged" | "nonqualified" => {
                Some(Self::Registered)
            }
            "unregistered" | "removed" => Some(Self::Unregistered),
            "unreachable" => Some(Self::Unreachable),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Registered => "registered",
            Self::Unregistered => "unregistered",
            Self::Unreachable => "unreachable",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Queue member device status, the `Status` integer of `QueueMember*` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
#[repr(u8)]
#[allow(missing_docs)]
pub enum QueueMemberStatus {
    #[default]
    Unknown = 0,
    NotInUse = 1,
    InUse = 2,
    Busy = 3,
    Invalid = 4,
    Unavailable = 5,
    Ringing = 6,
    RingInUse = 7,
    OnHold = 8,
}

impl QueueMemberStatus {
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            0 => Some(Self::Unknown),
            1 => Some(Self::NotInUse),
            2 => Some(Self::InUse),
            3 => Some(Self::Busy),
            4 => Some(Self::Invalid),
            5 => Some(Self::Unavailable),
            6 => Some(Self::Ringing),
            7 => Some(Self::RingInUse),
            8 => Some(Self::OnHold),
            _ => None,
        }
    }

    pub fn from_header(value: &str) -> Self {
        value
            .trim()
            .parse::<u8>()
            .ok()
            .and_then(Self::from_number)
            .unwrap_or_default()
    }

    /// Agent is on a call (in this queue or any other)
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::InUse | Self::Busy | Self::RingInUse | Self::OnHold
        )
    }
}

/// Call direction relative to the PBX
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    /// The channel was originated by the endpoint (it is calling)
    Outgoing,
    /// The channel was created towards the endpoint (it is being called)
    Incoming,
}

/// Recording state of a conversation (MixMonitor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    #[default]
    None,
    Recording,
    Muted,
}

/// Split a channel name into technology and endpoint.
///
/// `PJSIP/201-0000000a` -> `("PJSIP", "201")`, `Local/214@from-queue-00000003;1` ->
/// `("Local", "214")`, `SIP/my-trunk-0000001f` -> `("SIP", "my-trunk")`.
pub fn parse_channel_endpoint(channel: &str) -> Option<(&str, &str)> {
    let (tech, rest) = channel.split_once('/')?;
    if tech.is_empty() || rest.is_empty() {
        return None;
    }
    let rest = rest
        .split(['@', ';'])
        .next()
        .unwrap_or(rest);
    let endpoint = match rest.rsplit_once('-') {
        Some((name, suffix))
            if !name.is_empty()
                && !suffix.is_empty()
                && suffix
                    .chars()
                    .all(|c| c.is_ascii_hexdigit()) =>
        {
            name
        }
        _ => rest,
    };
    if endpoint.is_empty() {
        None
    } else {
        Some((tech, endpoint))
    }
}

/// Member id from a queue interface: `Local/214@from-queue/n` -> `214`, `PJSIP/201` -> `201`.
pub fn member_id_from_interface(interface: &str) -> Option<&str> {
    let before_at = interface
        .split('@')
        .next()?;
    let id = before_at
        .split('/')
        .nth(1)?;
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// `10.0.0.5:5060` -> (`10.0.0.5`, `5060`); also accepts `sip:201@10.0.0.5:5060`.
pub fn split_contact_address(addr: &str) -> (Option<String>, Option<String>) {
    let host_part = addr
        .rsplit_once('@')
        .map(|(_, h)| h)
        .unwrap_or(addr);
    let host_part = host_part
        .split(';')
        .next()
        .unwrap_or(host_part);
    let host_part = host_part
        .strip_prefix("sips:")
        .or_else(|| host_part.strip_prefix("sip:"))
        .unwrap_or(host_part);
    match host_part.rsplit_once(':') {
        Some((ip, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => {
            (Some(ip.to_string()), Some(port.to_string()))
        }
        _ => (Some(host_part.to_string()), None),
    }
}

/// Whether the channel belongs to the `Local` technology
pub fn is_local_channel(channel: &str) -> bool {
    channel
        .get(..6)
        .is_some_and(|p| p.eq_ignore_ascii_case("local/"))
}
