//! Queue members, waiting callers and queue counters

use crate::error::{AmiError, AmiResult};
use crate::frame::AmiFrame;
use crate::headers::FrameHeader;
use crate::plugins::commands::member_info;
use crate::plugins::{clean_caller, number, text, EventContext, EventPlugin};
use crate::state::{QueueMemberUpdate, WaitingCaller};
use tracing::debug;

/// `QueueMember*` events: login, logout, status and pause of queue members
pub struct QueueMemberPlugin;

impl EventPlugin for QueueMemberPlugin {
    fn names(&self) -> &[&'static str] {
        &[
            "queuememberstatus",
            "queuememberadded",
            "queuememberremoved",
            "queuememberpause",
            "queuememberpaused",
        ]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        let info = member_info(frame);
        if info
            .member
            .is_empty()
        {
            return Err(AmiError::malformed("queue member event without interface"));
        }

        match frame
            .event_key()
            .as_deref()
        {
            Some("queuememberremoved") => {
                ctx.state
                    .queue_member_removed(&info.queue, &info.member);
            }
            Some("queuememberpause") | Some("queuememberpaused") => {
                let reason = frame
                    .header(FrameHeader::PausedReason)
                    .or_else(|| frame.header(FrameHeader::Reason))
                    .unwrap_or("");
                ctx.state
                    .queue_member_paused(&info.queue, &info.member, info.paused, reason);
            }
            _ => {
                let name = frame
                    .header(FrameHeader::MemberName)
                    .map(str::to_string)
                    .unwrap_or(info.name);
                ctx.state
                    .queue_member_update(QueueMemberUpdate {
                        queue: info.queue,
                        member: info.member,
                        name,
                        interface: info.interface,
                        membership: info.membership,
                        logged_in: true,
                        paused: info.paused,
                        paused_reason: info.paused_reason,
                        status: info.status,
                        calls_taken: info.calls_taken,
                        last_call: info.last_call,
                    });
            }
        }
        Ok(())
    }
}

/// `QueueCallerJoin`, `QueueCallerLeave`, `QueueCallerAbandon`
pub struct QueueCallerPlugin;

impl EventPlugin for QueueCallerPlugin {
    fn names(&self) -> &[&'static str] {
        &["queuecallerjoin", "queuecallerleave", "queuecallerabandon"]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        let queue = frame.get_or_empty(FrameHeader::Queue);
        let uniqueid = frame.get_or_empty(FrameHeader::Uniqueid);

        match frame
            .event_key()
            .as_deref()
        {
            Some("queuecallerjoin") => {
                ctx.state
                    .queue_caller_join(
                        queue,
                        WaitingCaller {
                            uniqueid: uniqueid.to_string(),
                            channel: text(frame, FrameHeader::Channel),
                            number: clean_caller(text(frame, FrameHeader::CallerIdNum)),
                            name: clean_caller(text(frame, FrameHeader::CallerIdName)),
                            position: number(frame, FrameHeader::Position),
                            joined_at: ctx.wall,
                        },
                    );
            }
            Some("queuecallerleave") => {
                ctx.state
                    .queue_caller_leave(queue, uniqueid);
            }
            _ => {
                let waiting_number = ctx
                    .state
                    .queue_caller_abandon(queue, uniqueid);
                let number = Some(clean_caller(text(frame, FrameHeader::CallerIdNum)))
                    .filter(|n| !n.is_empty())
                    .or(waiting_number);
                match number {
                    Some(number) => ctx
                        .recall
                        .record_abandon(queue, &number, ctx.now),
                    None => debug!("[EVENT] abandon in queue {} without caller number", queue),
                }
            }
        }
        Ok(())
    }
}

/// `AgentConnect`: a queue call was answered
pub struct AgentConnectPlugin;

impl EventPlugin for AgentConnectPlugin {
    fn names(&self) -> &[&'static str] {
        &["agentconnect"]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        ctx.state
            .queue_answered(frame.get_or_empty(FrameHeader::Queue));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::channel::QueueMemberStatus;
    use crate::events::{EventKind, ProxyEvent};
    use crate::frame::AmiFrame;
    use crate::plugins::events::testing::Harness;
    use crate::recall::RecallStatus;
    use tokio::time::Instant;

    fn member_event(name: &str) -> AmiFrame {
        AmiFrame::event(name)
            .with("Queue", "600")
            .with("MemberName", "Alice")
            .with("Interface", "Local/201@from-queue/n")
            .with("StateInterface", "PJSIP/201")
            .with("Membership", "dynamic")
            .with("Status", "1")
            .with("Paused", "0")
    }

    #[test]
    fn test_member_login_logout() {
        let mut h = Harness::new();
        let events = h.apply(member_event("QueueMemberAdded"));
        let kinds: Vec<_> = events
            .iter()
            .map(|e| e.kind())
            .collect();
        assert_eq!(kinds, vec![EventKind::QueueChanged, EventKind::QueueMemberChanged]);
        let queue = h
            .state
            .queue("600")
            .unwrap();
        assert!(queue.members["201"].logged_in);
        assert_eq!(queue.members["201"].status, QueueMemberStatus::NotInUse);

        h.apply(
            member_event("QueueMemberPause")
                .with("Paused", "1")
                .with("PausedReason", "lunch"),
        );
        let queue = h
            .state
            .queue("600")
            .unwrap();
        let member = &queue.members["201"];
        assert!(member.paused);
        assert_eq!(member.paused_reason, "lunch");

        h.apply(member_event("QueueMemberRemoved").with("Paused", "1"));
        let queue = h
            .state
            .queue("600")
            .unwrap();
        let member = &queue.members["201"];
        assert!(!member.logged_in);
        assert!(!member.paused);
    }

    #[test]
    fn test_abandon_creates_recall_entry() {
        let mut h = Harness::new();
        let now = Instant::now();
        h.apply_at(
            AmiFrame::event("QueueCallerJoin")
                .with("Queue", "600")
                .with("Uniqueid", "1700.1")
                .with("CallerIDNum", "3351234567")
                .with("Position", "1"),
            now,
        );
        let events = h.apply_at(
            AmiFrame::event("QueueCallerAbandon")
                .with("Queue", "600")
                .with("Uniqueid", "1700.1"),
            now,
        );
        assert!(matches!(
            events.as_slice(),
            [ProxyEvent::QueueChanged(q)] if q.abandoned == 1
        ));
        h.apply_at(
            AmiFrame::event("QueueCallerLeave")
                .with("Queue", "600")
                .with("Uniqueid", "1700.1"),
            now,
        );
        assert!(matches!(
            h.recall.status("600", "3351234567", now),
            RecallStatus::Pending { .. }
        ));
        let queue = h
            .state
            .queue("600")
            .unwrap();
        assert_eq!(queue.held, 1);
        assert!(queue
            .waiting
            .is_empty());
    }

    #[test]
    fn test_agent_connect_counts_answered() {
        let mut h = Harness::new();
        h.apply(AmiFrame::event("AgentConnect").with("Queue", "600"));
        assert_eq!(
            h.state
                .queue("600")
                .unwrap()
                .answered,
            1
        );
    }
}
