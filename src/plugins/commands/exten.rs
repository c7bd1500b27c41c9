//! `extenStatus`: ExtensionState hint lookup

use crate::action::{Action, ActionId};
use crate::channel::DeviceState;
use crate::command::{Command, CommandReply, ExtensionStateInfo};
use crate::connection::ActionSender;
use crate::constants::DEFAULT_CONTEXT;
use crate::error::{AmiError, AmiResult};
use crate::frame::AmiFrame;
use crate::headers::FrameHeader;
use crate::plugins::{text, CommandPlugin, Completed};

use super::completion_for;

pub struct ExtenStatus;

impl CommandPlugin for ExtenStatus {
    fn name(&self) -> &str {
        "extenStatus"
    }

    fn execute(&mut self, sender: &ActionSender, command: &Command) -> AmiResult<ActionId> {
        sender.send(
            self.name(),
            Action::new("ExtensionState")
                .header("Exten", command.require("exten")?)
                .header(
                    "Context",
                    command
                        .param("context")
                        .unwrap_or(DEFAULT_CONTEXT),
                ),
        )
    }

    fn data(&mut self, frame: &AmiFrame) -> Option<Completed> {
        if frame
            .event_name()
            .is_some()
        {
            return None;
        }
        let id = frame.action_id()?;
        frame.response()?;
        if let Err(e) = completion_for(frame) {
            return Some(Completed::new(id, Err(e)));
        }

        let exten = text(frame, FrameHeader::Exten);
        let status = frame
            .header(FrameHeader::Status)
            .and_then(|s| {
                s.trim()
                    .parse::<i32>()
                    .ok()
            });
        let result = match status {
            Some(-1) | None => Err(AmiError::CommandFailed {
                message: format!("Extension {} not found", exten),
            }),
            Some(code) => Ok(CommandReply::ExtensionState(ExtensionStateInfo {
                state: DeviceState::from_extension_status(code),
                context: text(frame, FrameHeader::Context),
                status_text: text(frame, FrameHeader::StatusText),
                exten,
            })),
        };
        Some(Completed::new(id, result))
    }
}
