//! Events passed on to subscribers: call detail records and voicemail counters

use crate::error::AmiResult;
use crate::events::ProxyEvent;
use crate::frame::AmiFrame;
use crate::headers::FrameHeader;
use crate::plugins::{number, text, EventContext, EventPlugin};
use crate::state::CallDetailRecord;

/// `Cdr`
pub struct CdrPlugin;

impl EventPlugin for CdrPlugin {
    fn names(&self) -> &[&'static str] {
        &["cdr"]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        let record = CallDetailRecord {
            source: text(frame, FrameHeader::Source),
            destination: text(frame, FrameHeader::Destination),
            destination_context: text(frame, FrameHeader::DestinationContext),
            caller_id: frame
                .header_str("CallerID")
                .unwrap_or("")
                .to_string(),
            channel: text(frame, FrameHeader::Channel),
            destination_channel: text(frame, FrameHeader::DestinationChannel),
            start_time: text(frame, FrameHeader::StartTime),
            answer_time: text(frame, FrameHeader::AnswerTime),
            end_time: text(frame, FrameHeader::EndTime),
            duration: number(frame, FrameHeader::Duration),
            billable_seconds: number(frame, FrameHeader::BillableSeconds),
            disposition: text(frame, FrameHeader::Disposition),
            unique_id: text(frame, FrameHeader::UniqueId),
        };
        ctx.state
            .emit(ProxyEvent::NewCallDetailRecord(record));
        Ok(())
    }
}

/// `MessageWaiting`: `Mailbox: 201@default`, `New`, `Old`
pub struct MessageWaitingPlugin;

impl EventPlugin for MessageWaitingPlugin {
    fn names(&self) -> &[&'static str] {
        &["messagewaiting"]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        let mailbox = frame.get_or_empty(FrameHeader::Mailbox);
        let mailbox = mailbox
            .split('@')
            .next()
            .unwrap_or(mailbox);
        ctx.state
            .set_voicemail(
                mailbox,
                number(frame, FrameHeader::New),
                number(frame, FrameHeader::Old),
            );
        Ok(())
    }
}
