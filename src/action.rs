//! Outbound AMI actions and correlation ids

use crate::{
    constants::LINE_TERMINATOR,
    error::{AmiError, AmiResult},
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Headers whose values never reach the logs
const SECRET_HEADERS: &[&str] = &["secret", "key"];

fn validate_no_newlines(s: &str, context: &str) -> AmiResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(AmiError::protocol_error(format!(
            "{} must not contain newlines",
            context
        )));
    }
    Ok(())
}

/// Correlation id attached to an outbound action.
///
/// Format is `<command>_<sequence>`; the command name is whatever precedes the last
/// underscore, so command names may themselves contain underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(String);

impl ActionId {
    pub fn new(command: &str, seq: u64) -> Self {
        Self(format!("{}_{}", command, seq))
    }

    /// Wrap an id read off the wire
    pub fn from_wire(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Command name encoded in the id, if it has the `<command>_<seq>` shape
    pub fn command(&self) -> Option<&str> {
        command_name_of(&self.0)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ActionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Recover the command name from an ActionID (`queueDetails_17` -> `queueDetails`).
pub fn command_name_of(action_id: &str) -> Option<&str> {
    let (name, _) = action_id.rsplit_once('_')?;
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Monotonic sequence shared by every sender of one transport
#[derive(Debug, Default)]
pub struct ActionIdGenerator {
    next: AtomicU64,
}

impl ActionIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_for(&self, command: &str) -> ActionId {
        let seq = self
            .next
            .fetch_add(1, Ordering::Relaxed);
        ActionId::new(command, seq)
    }
}

/// One manager action: `Action: <name>` followed by its headers.
///
/// ```
/// use ami_proxy::{Action, ActionId};
///
/// let wire = Action::new("Hangup")
///     .header("Channel", "PJSIP/201-0000000a")
///     .to_wire_format(&ActionId::new("hangup", 4))
///     .unwrap();
/// assert_eq!(
///     wire,
///     "Action: Hangup\r\nActionID: hangup_4\r\nChannel: PJSIP/201-0000000a\r\n\r\n"
/// );
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Action {
    name: String,
    headers: Vec<(String, String)>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            headers: Vec::new(),
        }
    }

    /// Append a header. Order is preserved on the wire.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .push((key.into(), value.into()));
        self
    }

    /// Append a header only when a value is present
    pub fn header_opt(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.header(key, v),
            None => self,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize with the given correlation id. Rejects CR/LF anywhere in names or values.
    pub fn to_wire_format(&self, action_id: &ActionId) -> AmiResult<String> {
        use std::fmt::Write;

        validate_no_newlines(&self.name, "action name")?;
        validate_no_newlines(action_id.as_str(), "action id")?;

        let mut out = String::with_capacity(64 + self.headers.len() * 32);
        let _ = write!(out, "Action: {}{}", self.name, LINE_TERMINATOR);
        let _ = write!(out, "ActionID: {}{}", action_id, LINE_TERMINATOR);
        for (key, value) in &self.headers {
            validate_no_newlines(key, "header name")?;
            validate_no_newlines(value, "header value")?;
            let _ = write!(out, "{}: {}{}", key, value, LINE_TERMINATOR);
        }
        out.push_str(LINE_TERMINATOR);
        Ok(out)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(k, v)| {
                let shown = if SECRET_HEADERS.contains(&k.to_ascii_lowercase().as_str()) {
                    "[REDACTED]"
                } else {
                    v.as_str()
                };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("headers", &headers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_name_of() {
        assert_eq!(command_name_of("queueDetails_17"), Some("queueDetails"));
        assert_eq!(command_name_of("my_custom_cmd_3"), Some("my_custom_cmd"));
        assert_eq!(command_name_of("noseparator"), None);
        assert_eq!(command_name_of("_5"), None);
    }

    #[test]
    fn test_generator_is_monotonic() {
        let generator = ActionIdGenerator::new();
        let a = generator.next_for("ping");
        let b = generator.next_for("ping");
        assert_ne!(a, b);
        assert_eq!(a.command(), Some("ping"));
        assert_eq!(a.as_str(), "ping_1");
        assert_eq!(b.as_str(), "ping_2");
    }

    #[test]
    fn test_wire_format_preserves_header_order() {
        let wire = Action::new("QueueAdd")
            .header("Queue", "600")
            .header("Interface", "Local/201@from-queue/n")
            .header_opt("Penalty", None::<String>)
            .header_opt("Paused", Some("false"))
            .to_wire_format(&ActionId::new("queueMemberAdd", 9))
            .unwrap();
        assert_eq!(
            wire,
            "Action: QueueAdd\r\nActionID: queueMemberAdd_9\r\nQueue: 600\r\nInterface: Local/201@from-queue/n\r\nPaused: false\r\n\r\n"
        );
    }

    #[test]
    fn test_newline_injection_rejected() {
        let err = Action::new("Hangup")
            .header("Channel", "PJSIP/201\r\n\r\nAction: Logoff")
            .to_wire_format(&ActionId::new("hangup", 1))
            .unwrap_err();
        assert!(matches!(err, AmiError::Protocol { .. }));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let action = Action::new("Login")
            .header("Username", "admin")
            .header("Secret", "hunter2");
        let shown = format!("{:?}", action);
        assert!(shown.contains("[REDACTED]"));
        assert!(!shown.contains("hunter2"));
    }
}
