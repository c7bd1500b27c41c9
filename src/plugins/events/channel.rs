//! Channel lifecycle: conversations of extensions and trunks, dialing, recording

use crate::channel::{AmiChannelState, RecordingState};
use crate::command::Command;
use crate::error::{AmiError, AmiResult};
use crate::events::ProxyEvent;
use crate::frame::AmiFrame;
use crate::headers::FrameHeader;
use crate::plugins::{channel_info, clean_caller, text, EventContext, EventPlugin};
use crate::state::DialBegin;
use tracing::trace;

/// `Newchannel`. An inbound call is also checked against the recall manager.
pub struct NewChannelPlugin;

impl EventPlugin for NewChannelPlugin {
    fn names(&self) -> &[&'static str] {
        &["newchannel"]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        let mut info = channel_info(frame);
        if info
            .uniqueid
            .is_empty()
        {
            return Err(AmiError::malformed("Newchannel without Uniqueid"));
        }
        info.caller_num = clean_caller(info.caller_num);
        info.caller_name = clean_caller(info.caller_name);

        let inbound = ctx
            .state
            .add_conversation(&info, ctx.wall);
        if inbound {
            for recall in ctx
                .recall
                .on_inbound_call(&info.caller_num, &info.uniqueid, ctx.now)
            {
                ctx.state
                    .emit(ProxyEvent::QueueRecallMatched(recall));
            }
        }
        Ok(())
    }
}

/// `Newstate`
pub struct NewStatePlugin;

impl EventPlugin for NewStatePlugin {
    fn names(&self) -> &[&'static str] {
        &["newstate"]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        let state = frame
            .header(FrameHeader::ChannelState)
            .and_then(AmiChannelState::from_header);
        ctx.state
            .set_conversation_state(frame.get_or_empty(FrameHeader::Uniqueid), state);
        Ok(())
    }
}

/// `DialBegin`
pub struct DialBeginPlugin;

impl EventPlugin for DialBeginPlugin {
    fn names(&self) -> &[&'static str] {
        &["dialbegin"]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        ctx.state
            .dial_begin(&DialBegin {
                uniqueid: text(frame, FrameHeader::Uniqueid),
                channel: text(frame, FrameHeader::Channel),
                caller_num: clean_caller(text(frame, FrameHeader::CallerIdNum)),
                caller_name: clean_caller(text(frame, FrameHeader::CallerIdName)),
                dest_uniqueid: text(frame, FrameHeader::DestUniqueid),
                dest_channel: text(frame, FrameHeader::DestChannel),
            });
        Ok(())
    }
}

/// `Hangup`
pub struct HangupPlugin;

impl EventPlugin for HangupPlugin {
    fn names(&self) -> &[&'static str] {
        &["hangup"]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        ctx.state
            .remove_conversation(frame.get_or_empty(FrameHeader::Uniqueid));
        Ok(())
    }
}

/// `MixMonitorStart`, `MixMonitorStop`, `MixMonitorMute`
pub struct RecordingPlugin;

impl EventPlugin for RecordingPlugin {
    fn names(&self) -> &[&'static str] {
        &["mixmonitorstart", "mixmonitorstop", "mixmonitormute"]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        let recording = match frame
            .event_key()
            .as_deref()
        {
            Some("mixmonitorstart") => RecordingState::Recording,
            Some("mixmonitorstop") => RecordingState::None,
            _ if frame.get_or_empty(FrameHeader::State) == "1" => RecordingState::Muted,
            _ => RecordingState::Recording,
        };
        ctx.state
            .set_recording(frame.get_or_empty(FrameHeader::Uniqueid), recording);
        Ok(())
    }
}

/// `Rename`. Masquerades and transfers rename channels, so conversations and queue
/// entries are re-read from Asterisk instead of patched in place.
pub struct RenamePlugin;

impl EventPlugin for RenamePlugin {
    fn names(&self) -> &[&'static str] {
        &["rename"]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        trace!(
            "[EVENT] {} renamed to {}",
            frame.get_or_empty(FrameHeader::Channel),
            frame.get_or_empty(FrameHeader::Newname)
        );
        ctx.followups
            .push(Command::new("listChannels"));
        for queue in ctx
            .state
            .queue_ids()
        {
            ctx.followups
                .push(Command::new("queueDetails").arg("queue", queue));
        }
        Ok(())
    }
}
