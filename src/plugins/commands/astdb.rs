//! `dndGet` / `cfGet` / `cfVmGet`: AstDB lookups

use crate::action::{Action, ActionId};
use crate::command::{Command, CommandReply};
use crate::connection::ActionSender;
use crate::constants::VOICEMAIL_EXTEN_PREFIX;
use crate::error::{AmiError, AmiResult};
use crate::frame::AmiFrame;
use crate::headers::FrameHeader;
use crate::plugins::{CommandPlugin, Completed};
use crate::state::CallForwardType;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Dnd,
    CallForward,
    /// `CF` read as a mailbox; a plain number is no voicemail forward
    CallForwardVoicemail,
}

/// DBGet for one key. A missing key (`Response: Error`) resolves to `DbValue(None)`.
pub struct DbGet {
    lookup: Lookup,
    inflight: HashSet<String>,
}

impl DbGet {
    pub fn dnd() -> Self {
        Self {
            lookup: Lookup::Dnd,
            inflight: HashSet::new(),
        }
    }

    pub fn call_forward() -> Self {
        Self {
            lookup: Lookup::CallForward,
            inflight: HashSet::new(),
        }
    }

    pub fn call_forward_voicemail() -> Self {
        Self {
            lookup: Lookup::CallForwardVoicemail,
            inflight: HashSet::new(),
        }
    }

    fn family(&self, command: &Command) -> AmiResult<&'static str> {
        match self.lookup {
            Lookup::Dnd => Ok("DND"),
            Lookup::CallForwardVoicemail => Ok(CallForwardType::Unconditional.db_family()),
            Lookup::CallForward => {
                let kind = command
                    .param("type")
                    .map(|t| {
                        CallForwardType::parse(t).ok_or_else(|| AmiError::CommandFailed {
                            message: format!("unknown call forward type {}", t),
                        })
                    })
                    .transpose()?
                    .unwrap_or(CallForwardType::Unconditional);
                Ok(kind.db_family())
            }
        }
    }
}

impl CommandPlugin for DbGet {
    fn name(&self) -> &str {
        match self.lookup {
            Lookup::Dnd => "dndGet",
            Lookup::CallForward => "cfGet",
            Lookup::CallForwardVoicemail => "cfVmGet",
        }
    }

    fn execute(&mut self, sender: &ActionSender, command: &Command) -> AmiResult<ActionId> {
        let exten = command.require("exten")?;
        let family = self.family(command)?;
        let id = sender.send(
            self.name(),
            Action::new("DBGet")
                .header("Family", family)
                .header("Key", exten),
        )?;
        self.inflight
            .insert(id.to_string());
        Ok(id)
    }

    fn data(&mut self, frame: &AmiFrame) -> Option<Completed> {
        let id = frame.action_id()?;
        match frame
            .event_key()
            .as_deref()
        {
            None if frame.is_error() => {
                self.inflight
                    .remove(id);
                Some(Completed::new(id, Ok(CommandReply::DbValue(None))))
            }
            None => None,
            Some("dbgetresponse") => {
                self.inflight
                    .remove(id);
                let value = frame
                    .header(FrameHeader::Val)
                    .filter(|v| !v.is_empty());
                let value = match self.lookup {
                    Lookup::CallForwardVoicemail => {
                        value.and_then(|v| v.strip_prefix(VOICEMAIL_EXTEN_PREFIX))
                    }
                    _ => value,
                }
                .map(str::to_string);
                Some(Completed::new(id, Ok(CommandReply::DbValue(value))))
            }
            // Newer Asterisk closes the list even after the value; only answer when no
            // DBGetResponse came first.
            Some("dbgetcomplete") if self.inflight.remove(id) => {
                Some(Completed::new(id, Ok(CommandReply::DbValue(None))))
            }
            Some(_) => None,
        }
    }

    fn discard(&mut self, id: &ActionId) {
        self.inflight
            .remove(id.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionState, LinkStatus};

    #[test]
    fn test_value_found() {
        let status = LinkStatus::new();
        status.set(ConnectionState::Ready);
        let (sender, mut rx) = ActionSender::detached(status);
        let mut plugin = DbGet::call_forward();
        let id = plugin
            .execute(
                &sender,
                &Command::new("cfGet")
                    .arg("exten", "201")
                    .arg("type", "busy"),
            )
            .unwrap();
        let wire = rx
            .try_recv()
            .unwrap();
        assert!(wire.contains("Family: CFB\r\n"));
        assert!(wire.contains("Key: 201\r\n"));

        assert!(plugin
            .data(&AmiFrame::reply("Success").with("ActionID", id.as_str()))
            .is_none());
        let done = plugin
            .data(
                &AmiFrame::event("DBGetResponse")
                    .with("ActionID", id.as_str())
                    .with("Family", "CFB")
                    .with("Val", "3351234567"),
            )
            .unwrap();
        assert_eq!(
            done.result.unwrap(),
            CommandReply::DbValue(Some("3351234567".into()))
        );
        assert!(plugin
            .data(
                &AmiFrame::event("DBGetComplete")
                    .with("ActionID", id.as_str())
                    .with("EventList", "Complete")
            )
            .is_none());
    }

    #[test]
    fn test_missing_key_is_none() {
        let mut plugin = DbGet::dnd();
        let done = plugin
            .data(
                &AmiFrame::reply("Error")
                    .with("ActionID", "dndGet_5")
                    .with("Message", "Database entry not found"),
            )
            .unwrap();
        assert_eq!(done.result.unwrap(), CommandReply::DbValue(None));
    }

    #[test]
    fn test_voicemail_forward_reads_mailbox() {
        let status = LinkStatus::new();
        status.set(ConnectionState::Ready);
        let (sender, mut rx) = ActionSender::detached(status);
        let mut plugin = DbGet::call_forward_voicemail();
        let id = plugin
            .execute(&sender, &Command::new("cfVmGet").arg("exten", "201"))
            .unwrap();
        assert!(rx
            .try_recv()
            .unwrap()
            .contains("Family: CF\r\n"));
        let done = plugin
            .data(
                &AmiFrame::event("DBGetResponse")
                    .with("ActionID", id.as_str())
                    .with("Val", "vmu201"),
            )
            .unwrap();
        assert_eq!(done.result.unwrap(), CommandReply::DbValue(Some("201".into())));

        // Forward to a number is not a voicemail forward.
        let done = plugin
            .data(
                &AmiFrame::event("DBGetResponse")
                    .with("ActionID", "cfVmGet_9")
                    .with("Val", "3351234567"),
            )
            .unwrap();
        assert_eq!(done.result.unwrap(), CommandReply::DbValue(None));
    }
}
