//! `queueDetails`: QueueStatus for one queue

use crate::action::{Action, ActionId};
use crate::channel::{member_id_from_interface, QueueMemberStatus};
use crate::command::{
    Command, CommandReply, QueueEntryInfo, QueueMemberInfo, QueueParams, QueueStatusReply,
};
use crate::connection::ActionSender;
use crate::error::{AmiError, AmiResult};
use crate::frame::AmiFrame;
use crate::headers::FrameHeader;
use crate::plugins::{clean_caller, number, text, truthy, CommandPlugin, Completed};
use std::collections::HashMap;

#[derive(Default)]
pub struct QueueDetails {
    inflight: HashMap<String, QueueStatusReply>,
}

impl QueueDetails {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Interface of a `QueueMember` entry: `Location` on older Asterisk, `Interface` on newer
fn member_interface(frame: &AmiFrame) -> String {
    frame
        .header_str("Location")
        .or_else(|| frame.header(FrameHeader::Interface))
        .unwrap_or("")
        .to_string()
}

pub(crate) fn member_info(frame: &AmiFrame) -> QueueMemberInfo {
    let interface = member_interface(frame);
    let state_interface = frame.get_or_empty(FrameHeader::StateInterface);
    let member = member_id_from_interface(state_interface)
        .or_else(|| member_id_from_interface(&interface))
        .unwrap_or("")
        .to_string();
    QueueMemberInfo {
        queue: text(frame, FrameHeader::Queue),
        member,
        name: text(frame, FrameHeader::Name),
        interface,
        membership: text(frame, FrameHeader::Membership),
        paused: truthy(frame.header(FrameHeader::Paused)),
        paused_reason: text(frame, FrameHeader::PausedReason),
        status: QueueMemberStatus::from_header(frame.get_or_empty(FrameHeader::Status)),
        calls_taken: number(frame, FrameHeader::CallsTaken),
        last_call: number(frame, FrameHeader::LastCall),
    }
}

impl CommandPlugin for QueueDetails {
    fn name(&self) -> &str {
        "queueDetails"
    }

    fn execute(&mut self, sender: &ActionSender, command: &Command) -> AmiResult<ActionId> {
        let queue = command.require("queue")?;
        let id = sender.send(self.name(), Action::new("QueueStatus").header("Queue", queue))?;
        self.inflight
            .insert(id.to_string(), QueueStatusReply::default());
        Ok(id)
    }

    fn data(&mut self, frame: &AmiFrame) -> Option<Completed> {
        let id = frame.action_id()?;
        let Some(event) = frame.event_key() else {
            if frame.is_error() {
                self.inflight
                    .remove(id);
                let message = frame
                    .message()
                    .unwrap_or("")
                    .to_string();
                return Some(Completed::new(id, Err(AmiError::CommandFailed { message })));
            }
            return None;
        };

        match event.as_str() {
            "queueparams" => {
                let reply = self
                    .inflight
                    .entry(id.to_string())
                    .or_default();
                reply.params = Some(QueueParams {
                    queue: text(frame, FrameHeader::Queue),
                    strategy: text(frame, FrameHeader::Strategy),
                    calls: number(frame, FrameHeader::Calls),
                    hold_time: number(frame, FrameHeader::HoldTime),
                    completed: number(frame, FrameHeader::Completed),
                    abandoned: number(frame, FrameHeader::Abandoned),
                });
                None
            }
            "queuemember" => {
                self.inflight
                    .entry(id.to_string())
                    .or_default()
                    .members
                    .push(member_info(frame));
                None
            }
            "queueentry" => {
                self.inflight
                    .entry(id.to_string())
                    .or_default()
                    .entries
                    .push(QueueEntryInfo {
                        queue: text(frame, FrameHeader::Queue),
                        position: number(frame, FrameHeader::Position),
                        channel: text(frame, FrameHeader::Channel),
                        uniqueid: text(frame, FrameHeader::Uniqueid),
                        caller_num: clean_caller(text(frame, FrameHeader::CallerIdNum)),
                        caller_name: clean_caller(text(frame, FrameHeader::CallerIdName)),
                        wait: number(frame, FrameHeader::Wait),
                    });
                None
            }
            "queuestatuscomplete" => {
                let reply = self
                    .inflight
                    .remove(id)
                    .unwrap_or_default();
                Some(Completed::new(id, Ok(CommandReply::QueueStatus(reply))))
            }
            _ => None,
        }
    }

    fn discard(&mut self, id: &ActionId) {
        self.inflight
            .remove(id.as_str());
    }
}
