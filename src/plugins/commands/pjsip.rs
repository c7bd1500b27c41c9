//! `pjsipDetails`: PJSIPShowEndpoint folded into one [`EndpointDetails`]

use crate::action::{Action, ActionId};
use crate::channel::split_contact_address;
use crate::command::{Command, CommandReply, EndpointDetails};
use crate::connection::ActionSender;
use crate::error::AmiResult;
use crate::frame::AmiFrame;
use crate::headers::FrameHeader;
use crate::plugins::{CommandPlugin, Completed};
use std::collections::HashMap;

use super::completion_for;

#[derive(Default)]
pub struct PjsipDetails {
    inflight: HashMap<String, EndpointDetails>,
}

impl PjsipDetails {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommandPlugin for PjsipDetails {
    fn name(&self) -> &str {
        "pjsipDetails"
    }

    fn execute(&mut self, sender: &ActionSender, command: &Command) -> AmiResult<ActionId> {
        let exten = command.require("exten")?;
        let id = sender.send(
            self.name(),
            Action::new("PJSIPShowEndpoint").header("Endpoint", exten),
        )?;
        self.inflight
            .insert(
                id.to_string(),
                EndpointDetails {
                    exten: exten.to_string(),
                    ..EndpointDetails::default()
                },
            );
        Ok(id)
    }

    fn data(&mut self, frame: &AmiFrame) -> Option<Completed> {
        let id = frame.action_id()?;
        let Some(event) = frame.event_key() else {
            return match completion_for(frame) {
                Err(e) => {
                    self.inflight
                        .remove(id);
                    Some(Completed::new(id, Err(e)))
                }
                Ok(_) => None,
            };
        };

        if event == "endpointdetailcomplete" {
            let details = self
                .inflight
                .remove(id)
                .unwrap_or_default();
            return Some(Completed::new(id, Ok(CommandReply::Endpoint(details))));
        }

        let details = self
            .inflight
            .entry(id.to_string())
            .or_default();
        match event.as_str() {
            "contactstatusdetail" => {
                let address = frame
                    .header(FrameHeader::ViaAddress)
                    .filter(|v| !v.is_empty())
                    .or_else(|| frame.header(FrameHeader::Uri));
                if let Some(address) = address {
                    let (ip, port) = split_contact_address(address);
                    details.ip = ip.unwrap_or_default();
                    details.port = port.unwrap_or_default();
                }
                if let Some(agent) = frame.header(FrameHeader::UserAgent) {
                    details.user_agent = agent.to_string();
                }
            }
            "identifydetail" => {
                if let Some(endpoint) = frame.header(FrameHeader::Endpoint) {
                    details.exten = endpoint.to_string();
                }
                if let Some(name) = frame.header(FrameHeader::EndpointName) {
                    details.name = name.to_string();
                }
            }
            "endpointdetail" => {
                if let Some(context) = frame.header(FrameHeader::Context) {
                    details.context = context.to_string();
                }
            }
            _ => {}
        }
        None
    }

    fn discard(&mut self, id: &ActionId) {
        self.inflight
            .remove(id.as_str());
    }
}
