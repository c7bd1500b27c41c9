//! Built-in event plugins, keyed by lower-cased AMI event name

mod channel;
mod extension;
mod meetme;
mod notify;
mod parking;
mod queue;

pub use channel::{
    DialBeginPlugin, HangupPlugin, NewChannelPlugin, NewStatePlugin, RecordingPlugin, RenamePlugin,
};
pub use extension::{DeviceStateChangePlugin, ExtensionStatusPlugin, RegistrationPlugin};
pub use meetme::MeetmePlugin;
pub use notify::{CdrPlugin, MessageWaitingPlugin};
pub use parking::{ParkedCallPlugin, UnparkPlugin};
pub use queue::{AgentConnectPlugin, QueueCallerPlugin, QueueMemberPlugin};

use super::EventPlugin;

pub(super) fn builtin() -> Vec<Box<dyn EventPlugin>> {
    vec![
        Box::new(ExtensionStatusPlugin),
        Box::new(DeviceStateChangePlugin),
        Box::new(RegistrationPlugin),
        Box::new(QueueMemberPlugin),
        Box::new(QueueCallerPlugin),
        Box::new(AgentConnectPlugin),
        Box::new(NewChannelPlugin),
        Box::new(NewStatePlugin),
        Box::new(DialBeginPlugin),
        Box::new(HangupPlugin),
        Box::new(RecordingPlugin),
        Box::new(RenamePlugin),
        Box::new(ParkedCallPlugin),
        Box::new(UnparkPlugin),
        Box::new(MeetmePlugin),
        Box::new(CdrPlugin),
        Box::new(MessageWaitingPlugin),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::command::Command;
    use crate::events::ProxyEvent;
    use crate::frame::AmiFrame;
    use crate::plugins::{EventContext, EventRegistry};
    use crate::recall::QueueRecallManager;
    use crate::state::{ProxyState, StructureDescription};
    use std::time::Duration;
    use tokio::time::Instant;

    /// State store seeded with a small PBX plus the built-in event plugins
    pub(crate) struct Harness {
        pub state: ProxyState,
        pub recall: QueueRecallManager,
        pub registry: EventRegistry,
        pub followups: Vec<Command>,
    }

    impl Harness {
        pub(crate) fn new() -> Self {
            let desc = StructureDescription::from_json(
                r#"{
                    "extensions": { "201": { "name": "Alice", "tech": "pjsip" }, "202": { "name": "Bob", "tech": "pjsip" } },
                    "queues": { "600": { "name": "Support", "members": ["201"] } },
                    "trunks": { "2001": { "name": "Provider", "tech": "pjsip" } },
                    "parkings": { "71": { "name": "Parking 71", "timeout": 45 } },
                    "meetme_conf_code": "987"
                }"#,
            )
            .unwrap();
            let mut state = ProxyState::new("");
            state.load_structure(&desc);
            Self {
                state,
                recall: QueueRecallManager::new(Duration::from_secs(3600)),
                registry: EventRegistry::builtin(),
                followups: Vec::new(),
            }
        }

        /// Route one event frame to its plugin and return the derived events.
        pub(crate) fn apply(&mut self, frame: AmiFrame) -> Vec<ProxyEvent> {
            self.apply_at(frame, Instant::now())
        }

        pub(crate) fn apply_at(&mut self, frame: AmiFrame, now: Instant) -> Vec<ProxyEvent> {
            let key = frame
                .event_key()
                .unwrap();
            let plugin = self
                .registry
                .get_mut(&key)
                .unwrap();
            let mut ctx = EventContext {
                state: &mut self.state,
                recall: &mut self.recall,
                now,
                wall: 1_700_000_000,
                followups: &mut self.followups,
            };
            plugin
                .data(&frame, &mut ctx)
                .unwrap();
            self.state
                .drain_events()
        }
    }
}
