//! Extension presence: device state, DND / call forward hints, registrations

use crate::channel::{parse_channel_endpoint, DeviceState, Registration};
use crate::command::Command;
use crate::error::{AmiError, AmiResult};
use crate::frame::AmiFrame;
use crate::headers::FrameHeader;
use crate::plugins::{EventContext, EventPlugin};
use crate::state::CallForwardType;
use tracing::trace;

/// `ExtensionStatus`: hint state of an extension
pub struct ExtensionStatusPlugin;

impl EventPlugin for ExtensionStatusPlugin {
    fn names(&self) -> &[&'static str] {
        &["extensionstatus"]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        let exten = frame.get_or_empty(FrameHeader::Exten);
        let status = frame
            .header(FrameHeader::Status)
            .and_then(|s| {
                s.trim()
                    .parse::<i32>()
                    .ok()
            })
            .ok_or_else(|| AmiError::malformed("ExtensionStatus without numeric Status"))?;
        ctx.state
            .set_device_state(exten, DeviceState::from_extension_status(status));
        Ok(())
    }
}

/// `DeviceStateChange` of the custom devices FreePBX uses for feature codes:
/// `Custom:DND<ext>` carries DND, `Custom:CF<ext>`, `Custom:CFB<ext>` and `Custom:CFU<ext>`
/// only tell that a forward changed, so the target is read back with `cfGet`.
pub struct DeviceStateChangePlugin;

const CF_DEVICES: [(&str, CallForwardType); 3] = [
    ("CFB", CallForwardType::Busy),
    ("CFU", CallForwardType::Unavailable),
    ("CF", CallForwardType::Unconditional),
];

impl EventPlugin for DeviceStateChangePlugin {
    fn names(&self) -> &[&'static str] {
        &["devicestatechange"]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        let device = frame.get_or_empty(FrameHeader::Device);
        let Some(custom) = device.strip_prefix("Custom:") else {
            return Ok(());
        };

        if let Some(exten) = custom.strip_prefix("DND") {
            let state: DeviceState = frame
                .get_or_empty(FrameHeader::State)
                .parse::<DeviceState>()
                .map_err(|e| AmiError::malformed(e.to_string()))?;
            ctx.state
                .set_dnd(exten, matches!(state, DeviceState::InUse | DeviceState::Busy));
            return Ok(());
        }

        for (prefix, kind) in CF_DEVICES {
            if let Some(exten) = custom.strip_prefix(prefix) {
                if ctx
                    .state
                    .is_extension(exten)
                {
                    ctx.followups
                        .push(
                            Command::new("cfGet")
                                .arg("exten", exten)
                                .arg("type", kind.db_family()),
                        );
                }
                return Ok(());
            }
        }
        trace!("[EVENT] ignoring custom device {}", device);
        Ok(())
    }
}

/// `PeerStatus` and `ContactStatus`: registration of an extension or trunk
pub struct RegistrationPlugin;

impl EventPlugin for RegistrationPlugin {
    fn names(&self) -> &[&'static str] {
        &["peerstatus", "contactstatus"]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        let (endpoint, status, address) = if frame
            .header(FrameHeader::ContactStatus)
            .is_some()
        {
            let aor = frame.get_or_empty(FrameHeader::Aor);
            (
                aor,
                frame.get_or_empty(FrameHeader::ContactStatus),
                frame.header(FrameHeader::Uri),
            )
        } else {
            let peer = frame.get_or_empty(FrameHeader::Peer);
            let endpoint = parse_channel_endpoint(peer)
                .map(|(_, e)| e)
                .unwrap_or(peer);
            (
                endpoint,
                frame.get_or_empty(FrameHeader::PeerStatus),
                frame.header(FrameHeader::Address),
            )
        };

        let Some(registration) = Registration::from_status(status) else {
            trace!("[EVENT] unhandled registration status {:?} for {}", status, endpoint);
            return Ok(());
        };
        ctx.state
            .set_registration(endpoint, registration, address);
        Ok(())
    }
}
