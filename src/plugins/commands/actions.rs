//! Actions completed by a single `Response:` frame

use super::completion_for;
use crate::action::{Action, ActionId};
use crate::command::{Command, CommandReply};
use crate::connection::ActionSender;
use crate::constants::{DEFAULT_CONTEXT, VOICEMAIL_EXTEN_PREFIX};
use crate::error::{AmiError, AmiResult};
use crate::frame::AmiFrame;
use crate::plugins::{CommandPlugin, Completed};
use crate::state::CallForwardType;

type Builder = fn(&Command) -> AmiResult<Action>;

/// Command plugin whose reply is the first `Response:` frame carrying its id.
///
/// Events that reuse the ActionID (`OriginateResponse`) are ignored.
pub struct ResponsePlugin {
    name: &'static str,
    build: Builder,
    pong: bool,
    /// `Response: Error` with this message counts as success (deleting a missing key)
    tolerated_error: Option<&'static str>,
}

impl ResponsePlugin {
    pub fn new(name: &'static str, build: Builder) -> Self {
        Self {
            name,
            build,
            pong: false,
            tolerated_error: None,
        }
    }

    fn replying_pong(mut self) -> Self {
        self.pong = true;
        self
    }

    fn tolerating(mut self, message: &'static str) -> Self {
        self.tolerated_error = Some(message);
        self
    }
}

impl CommandPlugin for ResponsePlugin {
    fn name(&self) -> &str {
        self.name
    }

    fn execute(&mut self, sender: &ActionSender, command: &Command) -> AmiResult<ActionId> {
        let action = (self.build)(command)?;
        sender.send(self.name, action)
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

        let tolerated = frame.is_error()
            && self
                .tolerated_error
                .zip(frame.message())
                .is_some_and(|(needle, message)| {
                    message
                        .to_ascii_lowercase()
                        .contains(needle)
                });
        if tolerated {
            return Some(Completed::new(
                id,
                Ok(CommandReply::Done {
                    message: frame
                        .message()
                        .map(str::to_string),
                }),
            ));
        }

        let result = completion_for(frame).map(|message| {
            if self.pong {
                CommandReply::Pong
            } else {
                CommandReply::Done { message }
            }
        });
        Some(Completed::new(id, result))
    }
}

/// Every response-only command
pub(super) fn builtin() -> Vec<ResponsePlugin> {
    vec![
        ResponsePlugin::new("hangup", hangup),
        ResponsePlugin::new("redirectChannel", redirect),
        ResponsePlugin::new("attendedTransfer", attended_transfer),
        ResponsePlugin::new("transferToVoicemail", transfer_to_voicemail),
        ResponsePlugin::new("call", originate),
        ResponsePlugin::new("spyListen", spy_listen),
        ResponsePlugin::new("spySpeak", spy_speak),
        ResponsePlugin::new("stopIntrudeMusicForHold", stop_hold_music),
        ResponsePlugin::new("recordCall", record),
        ResponsePlugin::new("stopRecordCall", stop_record),
        ResponsePlugin::new("muteRecordCall", mute_record),
        ResponsePlugin::new("unmuteRecordCall", unmute_record),
        ResponsePlugin::new("queueMemberAdd", queue_add),
        ResponsePlugin::new("queueMemberRemove", queue_remove),
        ResponsePlugin::new("queueMemberPauseUnpause", queue_pause),
        ResponsePlugin::new("meetmeConfUserMute", meetme_mute),
        ResponsePlugin::new("meetmeConfUserUnmute", meetme_unmute),
        ResponsePlugin::new("dndSet", dnd_set).tolerating("not found"),
        ResponsePlugin::new("cfSet", cf_set).tolerating("not found"),
        ResponsePlugin::new("cfVmSet", cf_vm_set).tolerating("not found"),
        ResponsePlugin::new("sendDtmf", send_dtmf),
        ResponsePlugin::new("parkChannel", park),
        ResponsePlugin::new("ping", |_| Ok(Action::new("Ping"))).replying_pong(),
    ]
}

fn bool_header(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn hangup(cmd: &Command) -> AmiResult<Action> {
    Ok(Action::new("Hangup").header("Channel", cmd.require("channel")?))
}

fn redirect(cmd: &Command) -> AmiResult<Action> {
    Ok(Action::new("Redirect")
        .header("Channel", cmd.require("channel")?)
        .header("Exten", cmd.require("to")?)
        .header(
            "Context",
            cmd.param("context")
                .unwrap_or(DEFAULT_CONTEXT),
        )
        .header("Priority", "1"))
}

fn attended_transfer(cmd: &Command) -> AmiResult<Action> {
    Ok(Action::new("Atxfer")
        .header("Channel", cmd.require("channel")?)
        .header("Exten", cmd.require("to")?)
        .header(
            "Context",
            cmd.param("context")
                .unwrap_or(DEFAULT_CONTEXT),
        ))
}

fn transfer_to_voicemail(cmd: &Command) -> AmiResult<Action> {
    Ok(Action::new("Redirect")
        .header("Channel", cmd.require("channel")?)
        .header("Exten", format!("{}{}", VOICEMAIL_EXTEN_PREFIX, cmd.require("voicemail")?))
        .header("Context", DEFAULT_CONTEXT)
        .header("Priority", "1"))
}

fn originate(cmd: &Command) -> AmiResult<Action> {
    Ok(Action::new("Originate")
        .header("Channel", cmd.require("endpoint")?)
        .header("Exten", cmd.require("to")?)
        .header(
            "Context",
            cmd.param("context")
                .unwrap_or(DEFAULT_CONTEXT),
        )
        .header("Priority", "1")
        .header_opt("CallerID", cmd.param("callerid"))
        .header("Async", "true"))
}

/// Originate from the `spier` endpoint into ChanSpy on `channel`. Options `w` (whisper)
/// or `q` (listen without the entry beep).
fn chan_spy(cmd: &Command, options: &str) -> AmiResult<Action> {
    let callerid = cmd
        .param("callerid")
        .or(cmd.param("spied"));
    Ok(Action::new("Originate")
        .header("Channel", cmd.require("spier")?)
        .header("Application", "ChanSpy")
        .header("Data", format!("{},{}", cmd.require("channel")?, options))
        .header_opt("CallerID", callerid)
        .header("Async", "true"))
}

fn spy_listen(cmd: &Command) -> AmiResult<Action> {
    chan_spy(cmd, "q")
}

fn spy_speak(cmd: &Command) -> AmiResult<Action> {
    chan_spy(cmd, "w")
}

/// Hang up the `Local/<from>@sendmusic` channels that play hold music into a call.
fn stop_hold_music(cmd: &Command) -> AmiResult<Action> {
    Ok(Action::new("Hangup").header("Channel", format!("/Local/{}@sendmusic*/", cmd.require("from")?)))
}

fn record(cmd: &Command) -> AmiResult<Action> {
    Ok(Action::new("MixMonitor")
        .header("Channel", cmd.require("channel")?)
        .header("File", cmd.require("filepath")?)
        .header("Options", "a"))
}

fn stop_record(cmd: &Command) -> AmiResult<Action> {
    Ok(Action::new("StopMixMonitor").header("Channel", cmd.require("channel")?))
}

fn mix_monitor_mute(cmd: &Command, state: &str) -> AmiResult<Action> {
    Ok(Action::new("MixMonitorMute")
        .header("Channel", cmd.require("channel")?)
        .header("Direction", "both")
        .header("State", state))
}

fn mute_record(cmd: &Command) -> AmiResult<Action> {
    mix_monitor_mute(cmd, "1")
}

fn unmute_record(cmd: &Command) -> AmiResult<Action> {
    mix_monitor_mute(cmd, "0")
}

fn queue_add(cmd: &Command) -> AmiResult<Action> {
    Ok(Action::new("QueueAdd")
        .header("Queue", cmd.require("queue")?)
        .header("Interface", cmd.require("interface")?)
        .header_opt(
            "Paused",
            cmd.param("paused")
                .map(|_| bool_header(cmd.flag("paused", false))),
        )
        .header_opt("Penalty", cmd.param("penalty"))
        .header_opt("MemberName", cmd.param("name")))
}

fn queue_remove(cmd: &Command) -> AmiResult<Action> {
    Ok(Action::new("QueueRemove")
        .header("Queue", cmd.require("queue")?)
        .header("Interface", cmd.require("interface")?))
}

fn queue_pause(cmd: &Command) -> AmiResult<Action> {
    cmd.require("paused")?;
    Ok(Action::new("QueuePause")
        .header("Interface", cmd.require("interface")?)
        .header("Paused", bool_header(cmd.flag("paused", false)))
        .header_opt("Queue", cmd.param("queue"))
        .header_opt("Reason", cmd.param("reason")))
}

fn meetme_room(cmd: &Command) -> AmiResult<String> {
    let code = cmd
        .param("meetmeConfCode")
        .unwrap_or("");
    Ok(format!("{}{}", code, cmd.require("confId")?))
}

fn meetme_mute(cmd: &Command) -> AmiResult<Action> {
    Ok(Action::new("MeetmeMute")
        .header("Meetme", meetme_room(cmd)?)
        .header("Usernum", cmd.require("usernum")?))
}

fn meetme_unmute(cmd: &Command) -> AmiResult<Action> {
    Ok(Action::new("MeetmeUnmute")
        .header("Meetme", meetme_room(cmd)?)
        .header("Usernum", cmd.require("usernum")?))
}

fn db_put_or_del(family: &str, key: &str, value: Option<&str>) -> Action {
    match value {
        Some(val) => Action::new("DBPut")
            .header("Family", family)
            .header("Key", key)
            .header("Val", val),
        None => Action::new("DBDel")
            .header("Family", family)
            .header("Key", key),
    }
}

fn dnd_set(cmd: &Command) -> AmiResult<Action> {
    let exten = cmd.require("exten")?;
    cmd.require("activate")?;
    let value = cmd
        .flag("activate", false)
        .then_some("YES");
    Ok(db_put_or_del("DND", exten, value))
}

fn cf_set(cmd: &Command) -> AmiResult<Action> {
    let exten = cmd.require("exten")?;
    let kind = CallForwardType::parse(cmd.require("type")?).ok_or_else(|| {
        AmiError::CommandFailed {
            message: format!("unknown call forward type {:?}", cmd.param("type")),
        }
    })?;
    cmd.require("activate")?;
    let value = if cmd.flag("activate", false) {
        Some(cmd.require("to")?)
    } else {
        None
    };
    Ok(db_put_or_del(kind.db_family(), exten, value))
}

/// Unconditional forward to a mailbox: the `CF` key holds `vmu<mailbox>`.
fn cf_vm_set(cmd: &Command) -> AmiResult<Action> {
    let exten = cmd.require("exten")?;
    cmd.require("activate")?;
    let value = if cmd.flag("activate", false) {
        Some(format!("{}{}", VOICEMAIL_EXTEN_PREFIX, cmd.require("voicemail")?))
    } else {
        None
    };
    Ok(db_put_or_del(
        CallForwardType::Unconditional.db_family(),
        exten,
        value.as_deref(),
    ))
}

fn send_dtmf(cmd: &Command) -> AmiResult<Action> {
    Ok(Action::new("PlayDTMF")
        .header("Channel", cmd.require("channel")?)
        .header("Digit", cmd.require("digit")?))
}

fn park(cmd: &Command) -> AmiResult<Action> {
    Ok(Action::new("Park")
        .header("Channel", cmd.require("channel")?)
        .header_opt("TimeoutChannel", cmd.param("timeoutChannel"))
        .header_opt("Parkinglot", cmd.param("parkinglot")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionState, LinkStatus};

    fn plugin(name: &str) -> ResponsePlugin {
        builtin()
            .into_iter()
            .find(|p| p.name == name)
            .unwrap()
    }

    fn connected() -> (ActionSender, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let status = LinkStatus::new();
        status.set(ConnectionState::Connected);
        ActionSender::detached(status)
    }

    #[test]
    fn test_hangup_wire_and_reply() {
        let (sender, mut rx) = connected();
        let mut hangup = plugin("hangup");
        let id = hangup
            .execute(&sender, &Command::new("hangup").arg("channel", "PJSIP/201-00000001"))
            .unwrap();
        let wire = rx
            .try_recv()
            .unwrap();
        assert!(wire.starts_with("Action: Hangup\r\n"));
        assert!(wire.contains(&format!("ActionID: {}\r\n", id)));
        assert!(wire.contains("Channel: PJSIP/201-00000001\r\n"));

        let done = hangup
            .data(
                &AmiFrame::reply("Success")
                    .with("ActionID", id.as_str())
                    .with("Message", "Channel Hungup"),
            )
            .unwrap();
        assert_eq!(done.id, id);
        assert!(matches!(
            done.result,
            Ok(CommandReply::Done { message: Some(ref m) }) if m == "Channel Hungup"
        ));
    }

    #[test]
    fn test_error_response_fails_command() {
        let mut hangup = plugin("hangup");
        let done = hangup
            .data(
                &AmiFrame::reply("Error")
                    .with("ActionID", "hangup_4")
                    .with("Message", "No such channel"),
            )
            .unwrap();
        assert!(matches!(
            done.result,
            Err(AmiError::CommandFailed { ref message }) if message == "No such channel"
        ));
    }

    #[test]
    fn test_originate_response_event_ignored() {
        let mut call = plugin("call");
        assert!(call
            .data(
                &AmiFrame::event("OriginateResponse")
                    .with("ActionID", "call_2")
                    .with("Response", "Success"),
            )
            .is_none());
    }

    #[test]
    fn test_missing_parameter_sends_nothing() {
        let (sender, mut rx) = connected();
        let mut redirect = plugin("redirectChannel");
        let err = redirect
            .execute(&sender, &Command::new("redirectChannel").arg("channel", "PJSIP/201-1"))
            .unwrap_err();
        assert!(matches!(err, AmiError::MissingParameter { ref param } if param == "to"));
        assert!(rx
            .try_recv()
            .is_err());
    }

    #[test]
    fn test_dnd_and_cf_map_to_astdb() {
        let on = dnd_set(
            &Command::new("dndSet")
                .arg("exten", "201")
                .arg("activate", "true"),
        )
        .unwrap();
        assert_eq!(on.name(), "DBPut");
        assert_eq!(on.get("Family"), Some("DND"));
        assert_eq!(on.get("Val"), Some("YES"));

        let off = cf_set(
            &Command::new("cfSet")
                .arg("exten", "201")
                .arg("type", "busy")
                .arg("activate", "false"),
        )
        .unwrap();
        assert_eq!(off.name(), "DBDel");
        assert_eq!(off.get("Family"), Some("CFB"));

        let err = cf_set(
            &Command::new("cfSet")
                .arg("exten", "201")
                .arg("type", "cf")
                .arg("activate", "1"),
        )
        .unwrap_err();
        assert!(matches!(err, AmiError::MissingParameter { .. }));
    }

    #[test]
    fn test_deleting_missing_key_succeeds() {
        let mut dnd = plugin("dndSet");
        let done = dnd
            .data(
                &AmiFrame::reply("Error")
                    .with("ActionID", "dndSet_1")
                    .with("Message", "Database entry not found"),
            )
            .unwrap();
        assert!(done
            .result
            .is_ok());
    }

    #[test]
    fn test_ping_replies_pong() {
        let mut ping = plugin("ping");
        let done = ping
            .data(
                &AmiFrame::reply("Success")
                    .with("ActionID", "ping_1")
                    .with("Ping", "Pong"),
            )
            .unwrap();
        assert_eq!(done.result.unwrap(), CommandReply::Pong);
    }

    #[test]
    fn test_meetme_room_prefixed() {
        let action = meetme_mute(
            &Command::new("meetmeConfUserMute")
                .arg("meetmeConfCode", "987")
                .arg("confId", "201")
                .arg("usernum", "2"),
        )
        .unwrap();
        assert_eq!(action.get("Meetme"), Some("987201"));
    }

    #[test]
    fn test_spy_originates_chanspy() {
        let (sender, mut rx) = connected();
        let mut speak = plugin("spySpeak");
        speak
            .execute(
                &sender,
                &Command::new("spySpeak")
                    .arg("spier", "PJSIP/202")
                    .arg("spied", "201")
                    .arg("channel", "PJSIP/201-00000007"),
            )
            .unwrap();
        let wire = rx
            .try_recv()
            .unwrap();
        assert!(wire.starts_with("Action: Originate\r\n"));
        assert!(wire.contains("Channel: PJSIP/202\r\n"));
        assert!(wire.contains("Application: ChanSpy\r\n"));
        assert!(wire.contains("Data: PJSIP/201-00000007,w\r\n"));
        assert!(wire.contains("CallerID: 201\r\n"));

        let listen = spy_listen(
            &Command::new("spyListen")
                .arg("spier", "PJSIP/202")
                .arg("channel", "PJSIP/201-00000007")
                .arg("callerid", "0201"),
        )
        .unwrap();
        assert_eq!(listen.get("Data"), Some("PJSIP/201-00000007,q"));
        assert_eq!(listen.get("CallerID"), Some("0201"));
    }

    #[test]
    fn test_transfers() {
        let atxfer = attended_transfer(
            &Command::new("attendedTransfer")
                .arg("channel", "PJSIP/201-00000007")
                .arg("to", "203"),
        )
        .unwrap();
        assert_eq!(atxfer.name(), "Atxfer");
        assert_eq!(atxfer.get("Exten"), Some("203"));
        assert_eq!(atxfer.get("Context"), Some("from-internal"));

        let vm = transfer_to_voicemail(
            &Command::new("transferToVoicemail")
                .arg("channel", "PJSIP/2001-00000003")
                .arg("voicemail", "201"),
        )
        .unwrap();
        assert_eq!(vm.name(), "Redirect");
        assert_eq!(vm.get("Exten"), Some("vmu201"));
        assert_eq!(vm.get("Priority"), Some("1"));

        let music = stop_hold_music(&Command::new("stopIntrudeMusicForHold").arg("from", "201")).unwrap();
        assert_eq!(music.name(), "Hangup");
        assert_eq!(music.get("Channel"), Some("/Local/201@sendmusic*/"));
    }

    #[test]
    fn test_call_forward_to_voicemail() {
        let on = cf_vm_set(
            &Command::new("cfVmSet")
                .arg("exten", "201")
                .arg("activate", "true")
                .arg("voicemail", "201"),
        )
        .unwrap();
        assert_eq!(on.name(), "DBPut");
        assert_eq!(on.get("Family"), Some("CF"));
        assert_eq!(on.get("Val"), Some("vmu201"));

        let off = cf_vm_set(
            &Command::new("cfVmSet")
                .arg("exten", "201")
                .arg("activate", "false"),
        )
        .unwrap();
        assert_eq!(off.name(), "DBDel");
    }
}
