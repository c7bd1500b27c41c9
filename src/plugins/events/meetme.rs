//! Meetme conference rooms

use crate::channel::parse_channel_endpoint;
use crate::error::{AmiError, AmiResult};
use crate::frame::AmiFrame;
use crate::headers::FrameHeader;
use crate::plugins::{clean_caller, text, truthy, EventContext, EventPlugin};
use crate::state::ConferenceMember;

/// `MeetmeJoin`, `MeetmeLeave`, `MeetmeMute`, `MeetmeEnd`
pub struct MeetmePlugin;

impl EventPlugin for MeetmePlugin {
    fn names(&self) -> &[&'static str] {
        &["meetmejoin", "meetmeleave", "meetmemute", "meetmeend"]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        let room = frame.get_or_empty(FrameHeader::Meetme);
        if room.is_empty() {
            return Err(AmiError::malformed("meetme event without Meetme"));
        }
        let conf_id = ctx
            .state
            .conference_id_of(room);
        let usernum = frame.get_or_empty(FrameHeader::Usernum);

        match frame
            .event_key()
            .as_deref()
        {
            Some("meetmejoin") => {
                let channel = text(frame, FrameHeader::Channel);
                let caller_num = clean_caller(text(frame, FrameHeader::CallerIdNum));
                let extension = parse_channel_endpoint(&channel)
                    .map(|(_, e)| e.to_string())
                    .filter(|e| {
                        ctx.state
                            .is_extension(e)
                    })
                    .unwrap_or(caller_num);
                let member = ConferenceMember {
                    usernum: usernum.to_string(),
                    owner: extension == conf_id,
                    extension,
                    name: clean_caller(text(frame, FrameHeader::CallerIdName)),
                    channel,
                    muted: false,
                };
                ctx.state
                    .meetme_join(&conf_id, member);
            }
            Some("meetmeleave") => ctx
                .state
                .meetme_leave(&conf_id, usernum),
            Some("meetmemute") => {
                let muted = truthy(frame.header(FrameHeader::Status));
                ctx.state
                    .meetme_mute(&conf_id, usernum, muted);
            }
            _ => ctx
                .state
                .meetme_end(&conf_id),
        }
        Ok(())
    }
}
