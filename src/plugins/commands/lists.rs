//! Actions answered by a start response, N detail events and a `*Complete` event

use crate::action::{Action, ActionId};
use crate::command::{
    ChannelInfo, Command, CommandReply, MeetmeUserInfo, ParkedCallInfo, ParkingLotInfo,
};
use crate::connection::ActionSender;
use crate::error::{AmiError, AmiResult};
use crate::frame::AmiFrame;
use crate::headers::FrameHeader;
use crate::plugins::{channel_info, clean_caller, number, text, truthy, CommandPlugin, Completed};
use std::collections::HashMap;
use tracing::trace;

/// Generic collector for list actions without parameters.
pub struct ListPlugin<T> {
    name: &'static str,
    action: &'static str,
    /// Lower-cased detail event name
    detail: &'static str,
    parse: fn(&AmiFrame) -> T,
    finish: fn(Vec<T>) -> CommandReply,
    /// `Response: Error` with this message means an empty list
    empty_when: Option<&'static str>,
    inflight: HashMap<String, Vec<T>>,
}

impl<T> ListPlugin<T> {
    pub fn new(
        name: &'static str,
        action: &'static str,
        detail: &'static str,
        parse: fn(&AmiFrame) -> T,
        finish: fn(Vec<T>) -> CommandReply,
    ) -> Self {
        Self {
            name,
            action,
            detail,
            parse,
            finish,
            empty_when: None,
            inflight: HashMap::new(),
        }
    }

    fn empty_when(mut self, message: &'static str) -> Self {
        self.empty_when = Some(message);
        self
    }
}

impl<T: Send> CommandPlugin for ListPlugin<T> {
    fn name(&self) -> &str {
        self.name
    }

    fn execute(&mut self, sender: &ActionSender, _command: &Command) -> AmiResult<ActionId> {
        let id = sender.send(self.name, Action::new(self.action))?;
        self.inflight
            .insert(id.to_string(), Vec::new());
        Ok(id)
    }

    fn data(&mut self, frame: &AmiFrame) -> Option<Completed> {
        let id = frame.action_id()?;

        let Some(event) = frame.event_key() else {
            if !frame.is_error() {
                return None;
            }
            self.inflight
                .remove(id);
            let message = frame
                .message()
                .unwrap_or("")
                .to_string();
            let empty = self
                .empty_when
                .is_some_and(|needle| {
                    message
                        .to_ascii_lowercase()
                        .contains(needle)
                });
            let result = if empty {
                Ok((self.finish)(Vec::new()))
            } else {
                Err(AmiError::CommandFailed { message })
            };
            return Some(Completed::new(id, result));
        };

        if event == self.detail && !frame.is_list_complete() {
            let item = (self.parse)(frame);
            self.inflight
                .entry(id.to_string())
                .or_default()
                .push(item);
            return None;
        }
        if frame.is_list_complete() || event.ends_with("complete") {
            let items = self
                .inflight
                .remove(id)
                .unwrap_or_default();
            trace!("{} collected {} entries", self.name, items.len());
            return Some(Completed::new(id, Ok((self.finish)(items))));
        }
        None
    }

    fn discard(&mut self, id: &ActionId) {
        self.inflight
            .remove(id.as_str());
    }
}

pub(super) fn list_channels() -> ListPlugin<ChannelInfo> {
    ListPlugin::new(
        "listChannels",
        "CoreShowChannels",
        "coreshowchannel",
        channel_info,
        CommandReply::Channels,
    )
}

/// `Parkinglot` events come without ActionID; the dispatcher attributes them.
pub(super) fn list_parkings() -> ListPlugin<ParkingLotInfo> {
    ListPlugin::new(
        "listParkings",
        "Parkinglots",
        "parkinglot",
        |frame| ParkingLotInfo {
            name: text(frame, FrameHeader::Name),
            start_space: text(frame, FrameHeader::StartSpace),
            stop_space: text(frame, FrameHeader::StopSpace),
            timeout: number(frame, FrameHeader::Timeout),
        },
        CommandReply::ParkingLots,
    )
}

pub(super) fn list_parked_calls() -> ListPlugin<ParkedCallInfo> {
    ListPlugin::new(
        "listParkedCalls",
        "ParkedCalls",
        "parkedcall",
        parked_call_info,
        CommandReply::ParkedCalls,
    )
}

pub(super) fn list_meetme() -> ListPlugin<MeetmeUserInfo> {
    ListPlugin::new(
        "listMeetme",
        "MeetmeList",
        "meetmelist",
        |frame| MeetmeUserInfo {
            conference: frame
                .header_str("Conference")
                .unwrap_or("")
                .to_string(),
            usernum: frame
                .header_str("UserNumber")
                .unwrap_or("")
                .to_string(),
            caller_num: clean_caller(text(frame, FrameHeader::CallerIdNum)),
            caller_name: clean_caller(text(frame, FrameHeader::CallerIdName)),
            channel: text(frame, FrameHeader::Channel),
            muted: truthy(frame.header(FrameHeader::Muted)),
        },
        CommandReply::MeetmeUsers,
    )
    .empty_when("no active conferences")
}

/// Fields of a `ParkedCall` event, shared with the parking event plugin
pub(crate) fn parked_call_info(frame: &AmiFrame) -> ParkedCallInfo {
    ParkedCallInfo {
        parking_space: text(frame, FrameHeader::ParkingSpace),
        parking_lot: text(frame, FrameHeader::ParkingLot),
        channel: text(frame, FrameHeader::ParkeeChannel),
        uniqueid: text(frame, FrameHeader::ParkeeUniqueid),
        caller_num: clean_caller(text(frame, FrameHeader::ParkeeCallerIdNum)),
        caller_name: clean_caller(text(frame, FrameHeader::ParkeeCallerIdName)),
        parked_by: text(frame, FrameHeader::ParkerDialString),
        timeout: number(frame, FrameHeader::ParkingTimeout),
    }
}
