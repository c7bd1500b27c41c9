//! State Store: the canonical in-memory telephony model
//!
//! [`ProxyState`] is mutated only from the dispatch path (event plugins and the replies of
//! the initialization commands). Each mutator records the derived events it causes in an
//! outbox; the dispatcher drains the outbox and publishes it after releasing the write
//! lock, so subscribers always observe the mutation before the event. External readers get
//! deep-cloned snapshots.

pub mod model;
pub mod structure;

use crate::channel::{
    is_local_channel, parse_channel_endpoint, split_contact_address, CallDirection, DeviceState, RecordingState,
    Registration,
};
use crate::command::{ChannelInfo, ParkedCallInfo, ParkingLotInfo, QueueStatusReply};
use crate::constants::VOICEMAIL_EXTEN_PREFIX;
use crate::events::{ProxyEvent, ReadySummary};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, trace, warn};

pub use model::{
    unix_now, CallDetailRecord, CallForward, CallForwardType, Conference, ConferenceMember,
    Conversation, Dialing, Extension, ParkedCall, Parking, Queue, QueueMember, RecallMatch, Trunk,
    VoicemailCounters, WaitingCaller,
};
pub use structure::{JsonFileStructure, StructureDescription, StructureSource};

/// Largest parking lot range expanded into individual slots
const MAX_PARKING_SLOTS: u64 = 1000;

/// Endpoint owning a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
enum Owner {
    Extension(String),
    Trunk(String),
}

/// Field values of a `QueueMember*` event or `QueueMember` reply entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMemberUpdate {
    pub queue: String,
    pub member: String,
    pub name: String,
    pub interface: String,
    pub membership: String,
    pub logged_in: bool,
    pub paused: bool,
    pub paused_reason: String,
    pub status: crate::channel::QueueMemberStatus,
    pub calls_taken: u64,
    pub last_call: u64,
}

/// Field values of a `DialBegin` event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialBegin {
    pub uniqueid: String,
    pub channel: String,
    pub caller_num: String,
    pub caller_name: String,
    pub dest_uniqueid: String,
    pub dest_channel: String,
}

/// The State Store
#[derive(Debug, Default)]
pub struct ProxyState {
    initialized: bool,
    prefix: String,
    meetme_conf_code: String,
    extensions: BTreeMap<String, Extension>,
    queues: BTreeMap<String, Queue>,
    trunks: BTreeMap<String, Trunk>,
    parkings: BTreeMap<String, Parking>,
    conferences: BTreeMap<String, Conference>,
    voicemails: BTreeMap<String, VoicemailCounters>,
    owners: HashMap<String, Owner>,
    outbox: Vec<ProxyEvent>,
}

impl ProxyState {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Forget everything; reads return empty maps until the next load.
    pub fn reset(&mut self) {
        self.initialized = false;
        self.meetme_conf_code
            .clear();
        self.extensions
            .clear();
        self.queues
            .clear();
        self.trunks
            .clear();
        self.parkings
            .clear();
        self.conferences
            .clear();
        self.voicemails
            .clear();
        self.owners
            .clear();
        self.outbox
            .clear();
    }

    /// Seed entities from the structural description and mark the store initialized.
    pub fn load_structure(&mut self, desc: &StructureDescription) -> ReadySummary {
        self.reset();

        for (id, def) in &desc.extensions {
            self.extensions
                .insert(id.clone(), Extension::new(id, &def.name, &def.tech));
        }
        for (id, def) in &desc.trunks {
            self.trunks
                .insert(id.clone(), Trunk::new(id, &def.name, &def.tech));
        }
        for (id, def) in &desc.queues {
            let mut queue = Queue::new(id, &def.name);
            for member_id in &def.members {
                let mut member = QueueMember::new(id, member_id);
                if let Some(ext) = self
                    .extensions
                    .get_mut(member_id)
                {
                    member.name = ext
                        .name
                        .clone();
                    ext.queue_memberships
                        .insert(id.clone(), false);
                }
                queue
                    .members
                    .insert(member_id.clone(), member);
            }
            self.queues
                .insert(id.clone(), queue);
        }
        for (id, def) in &desc.parkings {
            let mut parking = Parking::new(id, &def.name);
            parking.timeout = def.timeout;
            if let Some(lot) = &def.lot {
                parking.lot = lot.clone();
            }
            self.parkings
                .insert(id.clone(), parking);
        }
        self.meetme_conf_code = desc
            .meetme_conf_code
            .clone();
        self.initialized = true;

        let summary = ReadySummary {
            extensions: self
                .extensions
                .len(),
            queues: self
                .queues
                .len(),
            trunks: self
                .trunks
                .len(),
            parkings: self
                .parkings
                .len(),
        };
        debug!(
            "[STATE] structure loaded: {} extensions, {} queues, {} trunks, {} parkings",
            summary.extensions, summary.queues, summary.trunks, summary.parkings
        );
        summary
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Take the derived events recorded since the last drain, in mutation order.
    pub fn drain_events(&mut self) -> Vec<ProxyEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Record an event that has no state behind it (CDR, recall match, ...)
    pub fn emit(&mut self, event: ProxyEvent) {
        self.outbox
            .push(event);
    }

    // ---- read accessors ----

    pub fn extensions(&self) -> BTreeMap<String, Extension> {
        self.snapshot(&self.extensions)
    }

    pub fn queues(&self) -> BTreeMap<String, Queue> {
        self.snapshot(&self.queues)
    }

    pub fn trunks(&self) -> BTreeMap<String, Trunk> {
        self.snapshot(&self.trunks)
    }

    pub fn parkings(&self) -> BTreeMap<String, Parking> {
        self.snapshot(&self.parkings)
    }

    pub fn conferences(&self) -> BTreeMap<String, Conference> {
        self.snapshot(&self.conferences)
    }

    pub fn voicemails(&self) -> BTreeMap<String, VoicemailCounters> {
        self.snapshot(&self.voicemails)
    }

    fn snapshot<T: Clone>(&self, map: &BTreeMap<String, T>) -> BTreeMap<String, T> {
        if self.initialized {
            map.clone()
        } else {
            BTreeMap::new()
        }
    }

    pub fn extension(&self, id: &str) -> Option<Extension> {
        self.extensions
            .get(id)
            .cloned()
    }

    pub fn queue(&self, id: &str) -> Option<Queue> {
        self.queues
            .get(id)
            .cloned()
    }

    pub fn is_extension(&self, id: &str) -> bool {
        self.extensions
            .contains_key(id)
    }

    pub fn is_trunk(&self, id: &str) -> bool {
        self.trunks
            .contains_key(id)
    }

    /// Ids of the queues listing `ext` as a member
    pub fn queue_ids_of_extension(&self, ext: &str) -> Vec<String> {
        self.queues
            .values()
            .filter(|q| {
                q.members
                    .contains_key(ext)
            })
            .map(|q| {
                q.id.clone()
            })
            .collect()
    }

    pub fn queue_ids(&self) -> Vec<String> {
        self.queues
            .keys()
            .cloned()
            .collect()
    }

    pub fn extension_ids(&self) -> Vec<String> {
        self.extensions
            .keys()
            .cloned()
            .collect()
    }

    pub fn meetme_conf_code(&self) -> &str {
        &self.meetme_conf_code
    }

    /// Prepend the configured prefix to numbers that start with neither `+` nor `00`.
    pub fn add_prefix(&self, number: &str) -> String {
        if self
            .prefix
            .is_empty()
            || number.starts_with('+')
            || number.starts_with("00")
        {
            number.to_string()
        } else {
            format!("{}{}", self.prefix, number)
        }
    }

    /// Channel of the call parked in `parking`
    pub fn parked_channel(&self, parking: &str) -> Option<String> {
        self.parkings
            .get(parking)?
            .parked
            .as_ref()
            .map(|call| {
                call.channel
                    .clone()
            })
    }

    /// Channel of caller `uniqueid` waiting in `queue`
    pub fn waiting_channel(&self, queue: &str, uniqueid: &str) -> Option<String> {
        self.queues
            .get(queue)?
            .waiting
            .get(uniqueid)
            .map(|caller| {
                caller
                    .channel
                    .clone()
            })
    }

    /// Conversation `convid` of extension `ext`
    pub fn extension_conversation(&self, ext: &str, convid: &str) -> Option<Conversation> {
        self.extensions
            .get(ext)?
            .conversations
            .get(convid)
            .cloned()
    }

    // ---- extensions and trunks ----

    pub fn set_device_state(&mut self, ext: &str, state: DeviceState) {
        let Some(extension) = self
            .extensions
            .get_mut(ext)
        else {
            trace!("[STATE] device state for unknown extension {}", ext);
            return;
        };
        extension.device_state = state;
        let snapshot = extension.clone();
        self.emit(ProxyEvent::ExtensionChanged(snapshot));
    }

    pub fn set_dnd(&mut self, ext: &str, enabled: bool) {
        let Some(extension) = self
            .extensions
            .get_mut(ext)
        else {
            return;
        };
        extension.dnd = enabled;
        let snapshot = extension.clone();
        self.emit(ProxyEvent::ExtensionChanged(snapshot));
    }

    pub fn set_call_forward(&mut self, ext: &str, kind: CallForwardType, to: Option<String>) {
        let Some(extension) = self
            .extensions
            .get_mut(ext)
        else {
            return;
        };
        let to = to.filter(|t| !t.is_empty());
        match kind {
            CallForwardType::Unconditional => {
                let mailbox = to
                    .as_deref()
                    .and_then(|t| t.strip_prefix(VOICEMAIL_EXTEN_PREFIX))
                    .map(str::to_string);
                let forward = &mut extension.call_forward;
                forward.unconditional = if mailbox.is_some() { None } else { to };
                forward.voicemail = mailbox;
            }
            CallForwardType::Busy => extension
                .call_forward
                .busy = to,
            CallForwardType::Unavailable => extension
                .call_forward
                .unavailable = to,
        }
        let snapshot = extension.clone();
        self.emit(ProxyEvent::ExtensionChanged(snapshot));
    }

    /// Registration of an extension or trunk; `address` is `ip[:port]`.
    pub fn set_registration(&mut self, endpoint: &str, registration: Registration, address: Option<&str>) {
        let (ip, port) = match address.filter(|a| !a.is_empty()) {
            Some(addr) => split_contact_address(addr),
            None => (None, None),
        };

        if let Some(extension) = self
            .extensions
            .get_mut(endpoint)
        {
            extension.registration = registration;
            if registration == Registration::Registered {
                if ip.is_some() {
                    extension.ip = ip;
                    extension.port = port;
                }
            } else {
                extension.ip = None;
                extension.port = None;
            }
            let snapshot = extension.clone();
            self.emit(ProxyEvent::ExtensionChanged(snapshot));
        } else if let Some(trunk) = self
            .trunks
            .get_mut(endpoint)
        {
            trunk.registration = registration;
            if ip.is_some() {
                trunk.ip = ip;
                trunk.port = port;
            }
            let snapshot = trunk.clone();
            self.emit(ProxyEvent::TrunkChanged(snapshot));
        } else {
            trace!("[STATE] registration for unknown endpoint {}", endpoint);
        }
    }

    // ---- conversations ----

    /// Attach a new channel to its extension or trunk.
    ///
    /// Returns true when the channel is an inbound call: an originating channel (no link
    /// to another call) that belongs to neither an extension nor a `Local` channel.
    pub fn add_conversation(&mut self, info: &ChannelInfo, now: u64) -> bool {
        if !self.initialized || is_local_channel(&info.channel) {
            return false;
        }
        let Some((_, endpoint)) = parse_channel_endpoint(&info.channel) else {
            return false;
        };
        let endpoint = endpoint.to_string();
        let originating = info
            .linkedid
            .is_empty()
            || info.linkedid == info.uniqueid;
        let is_extension = self.is_extension(&endpoint);

        let (direction, caller_num, caller_name, called_num) = if originating {
            (
                CallDirection::Outgoing,
                info.caller_num
                    .clone(),
                info.caller_name
                    .clone(),
                info.exten
                    .clone(),
            )
        } else {
            let num = if info
                .connected_num
                .is_empty()
            {
                info.caller_num
                    .clone()
            } else {
                info.connected_num
                    .clone()
            };
            (
                CallDirection::Incoming,
                num,
                info.connected_name
                    .clone(),
                endpoint.clone(),
            )
        };

        let conversation = Conversation {
            uniqueid: info
                .uniqueid
                .clone(),
            linkedid: if info
                .linkedid
                .is_empty()
            {
                info.uniqueid
                    .clone()
            } else {
                info.linkedid
                    .clone()
            },
            channel: info
                .channel
                .clone(),
            counterpart_channel: None,
            direction,
            caller_num,
            caller_name,
            called_num,
            started_at: now,
            state: info.state,
            recording: RecordingState::None,
        };

        let owner = if is_extension {
            Owner::Extension(endpoint.clone())
        } else if self.is_trunk(&endpoint) {
            Owner::Trunk(endpoint.clone())
        } else {
            trace!("[STATE] channel {} has no known owner", info.channel);
            return originating && !info.caller_num.is_empty();
        };

        match &owner {
            Owner::Extension(id) => {
                if let Some(ext) = self
                    .extensions
                    .get_mut(id)
                {
                    ext.conversations
                        .insert(conversation.uniqueid.clone(), conversation);
                }
            }
            Owner::Trunk(id) => {
                if let Some(trunk) = self
                    .trunks
                    .get_mut(id)
                {
                    trunk
                        .conversations
                        .insert(conversation.uniqueid.clone(), conversation);
                }
            }
        }
        self.owners
            .insert(info.uniqueid.clone(), owner.clone());
        self.emit_owner(&owner);

        originating && !is_extension && !info.caller_num.is_empty()
    }

    /// Apply a `f` to the conversation with `uniqueid` and announce its owner.
    fn update_conversation<F>(&mut self, uniqueid: &str, f: F) -> bool
    where
        F: FnOnce(&mut Conversation),
    {
        let Some(owner) = self
            .owners
            .get(uniqueid)
            .cloned()
        else {
            return false;
        };
        let conversation = match &owner {
            Owner::Extension(id) => self
                .extensions
                .get_mut(id)
                .and_then(|e| {
                    e.conversations
                        .get_mut(uniqueid)
                }),
            Owner::Trunk(id) => self
                .trunks
                .get_mut(id)
                .and_then(|t| {
                    t.conversations
                        .get_mut(uniqueid)
                }),
        };
        let Some(conversation) = conversation else {
            return false;
        };
        f(conversation);
        self.emit_owner(&owner);
        true
    }

    pub fn set_conversation_state(
        &mut self,
        uniqueid: &str,
        state: Option<crate::channel::AmiChannelState>,
    ) {
        self.update_conversation(uniqueid, |c| c.state = state);
    }

    pub fn set_recording(&mut self, uniqueid: &str, recording: RecordingState) {
        if !self.update_conversation(uniqueid, |c| c.recording = recording) {
            trace!("[STATE] recording change for unknown channel {}", uniqueid);
        }
    }

    /// Link the two legs of a dial and announce the destination extension.
    pub fn dial_begin(&mut self, dial: &DialBegin) {
        let dest_channel = dial
            .dest_channel
            .clone();
        self.update_conversation(&dial.uniqueid, |c| {
            c.counterpart_channel = Some(dest_channel)
        });
        let src_channel = dial
            .channel
            .clone();
        let caller_num = dial
            .caller_num
            .clone();
        let caller_name = dial
            .caller_name
            .clone();
        self.update_conversation(&dial.dest_uniqueid, |c| {
            c.counterpart_channel = Some(src_channel);
            if !caller_num.is_empty() {
                c.caller_num = caller_num;
                c.caller_name = caller_name;
            }
        });

        if let Some((_, endpoint)) = parse_channel_endpoint(&dial.dest_channel) {
            if !is_local_channel(&dial.dest_channel) && self.is_extension(endpoint) {
                let dialing = Dialing {
                    extension: endpoint.to_string(),
                    caller_num: dial
                        .caller_num
                        .clone(),
                    caller_name: dial
                        .caller_name
                        .clone(),
                    channel: dial
                        .dest_channel
                        .clone(),
                    uniqueid: dial
                        .dest_uniqueid
                        .clone(),
                };
                self.emit(ProxyEvent::DialingStarted(dialing));
            }
        }
    }

    pub fn remove_conversation(&mut self, uniqueid: &str) {
        let Some(owner) = self
            .owners
            .remove(uniqueid)
        else {
            return;
        };
        match &owner {
            Owner::Extension(id) => {
                if let Some(ext) = self
                    .extensions
                    .get_mut(id)
                {
                    ext.conversations
                        .remove(uniqueid);
                }
            }
            Owner::Trunk(id) => {
                if let Some(trunk) = self
                    .trunks
                    .get_mut(id)
                {
                    trunk
                        .conversations
                        .remove(uniqueid);
                }
            }
        }
        self.emit_owner(&owner);
    }

    /// Reconcile conversations with a `CoreShowChannels` listing.
    ///
    /// Conversations missing from the listing are removed, unknown channels are attached and
    /// known ones take the listed channel name and state. A channel renamed onto another
    /// endpoint moves to that endpoint.
    pub fn apply_channels(&mut self, channels: &[ChannelInfo], now: u64) {
        let listed: HashSet<&str> = channels
            .iter()
            .map(|c| c.uniqueid.as_str())
            .collect();
        let gone: Vec<String> = self
            .owners
            .keys()
            .filter(|id| !listed.contains(id.as_str()))
            .cloned()
            .collect();
        for uniqueid in gone {
            debug!("[STATE] channel {} no longer listed, removing", uniqueid);
            self.remove_conversation(&uniqueid);
        }

        for info in channels {
            let Some(owner) = self
                .owners
                .get(&info.uniqueid)
                .cloned()
            else {
                self.add_conversation(info, now);
                continue;
            };
            let owner_id = match &owner {
                Owner::Extension(id) | Owner::Trunk(id) => id.as_str(),
            };
            let rehomed = parse_channel_endpoint(&info.channel)
                .is_some_and(|(_, endpoint)| endpoint != owner_id);
            if rehomed {
                debug!("[STATE] channel {} now {}", info.uniqueid, info.channel);
                self.remove_conversation(&info.uniqueid);
                self.add_conversation(info, now);
                continue;
            }
            let unchanged = self
                .conversation(&info.uniqueid)
                .is_some_and(|c| c.channel == info.channel && c.state == info.state);
            if !unchanged {
                let channel = info
                    .channel
                    .clone();
                let state = info.state;
                self.update_conversation(&info.uniqueid, |c| {
                    c.channel = channel;
                    c.state = state;
                });
            }
        }
    }

    fn conversation(&self, uniqueid: &str) -> Option<&Conversation> {
        match self
            .owners
            .get(uniqueid)?
        {
            Owner::Extension(id) => self
                .extensions
                .get(id)?
                .conversations
                .get(uniqueid),
            Owner::Trunk(id) => self
                .trunks
                .get(id)?
                .conversations
                .get(uniqueid),
        }
    }

    fn emit_owner(&mut self, owner: &Owner) {
        let event = match owner {
            Owner::Extension(id) => self
                .extensions
                .get(id)
                .map(|e| ProxyEvent::ExtensionChanged(e.clone())),
            Owner::Trunk(id) => self
                .trunks
                .get(id)
                .map(|t| ProxyEvent::TrunkChanged(t.clone())),
        };
        if let Some(event) = event {
            self.emit(event);
        }
    }

    // ---- queues ----

    pub fn queue_member_update(&mut self, update: QueueMemberUpdate) {
        let Some(queue) = self
            .queues
            .get_mut(&update.queue)
        else {
            trace!("[STATE] member event for unknown queue {}", update.queue);
            return;
        };
        let member = queue
            .members
            .entry(update.member.clone())
            .or_insert_with(|| QueueMember::new(&update.queue, &update.member));
        if !update
            .name
            .is_empty()
        {
            member.name = update.name;
        }
        if !update
            .interface
            .is_empty()
        {
            member.interface = update.interface;
        }
        if !update
            .membership
            .is_empty()
        {
            member.membership = update.membership;
        }
        member.logged_in = update.logged_in;
        member.paused = update.paused;
        member.paused_reason = update.paused_reason;
        member.status = update.status;
        member.calls_taken = update.calls_taken;
        member.last_call = update.last_call;

        let member_snapshot = member.clone();
        let queue_snapshot = queue.clone();
        self.set_membership_flag(&update.queue, &update.member, update.logged_in);
        self.emit(ProxyEvent::QueueChanged(queue_snapshot));
        self.emit(ProxyEvent::QueueMemberChanged(member_snapshot));
    }

    /// Member logged out (and unpaused)
    pub fn queue_member_removed(&mut self, queue_id: &str, member_id: &str) {
        let Some(queue) = self
            .queues
            .get_mut(queue_id)
        else {
            return;
        };
        let Some(member) = queue
            .members
            .get_mut(member_id)
        else {
            return;
        };
        member.logged_in = false;
        member.paused = false;
        member
            .paused_reason
            .clear();
        let member_snapshot = member.clone();
        let queue_snapshot = queue.clone();
        self.set_membership_flag(queue_id, member_id, false);
        self.emit(ProxyEvent::QueueChanged(queue_snapshot));
        self.emit(ProxyEvent::QueueMemberChanged(member_snapshot));
    }

    pub fn queue_member_paused(&mut self, queue_id: &str, member_id: &str, paused: bool, reason: &str) {
        let Some(queue) = self
            .queues
            .get_mut(queue_id)
        else {
            return;
        };
        let Some(member) = queue
            .members
            .get_mut(member_id)
        else {
            return;
        };
        member.paused = paused;
        member.paused_reason = if paused {
            reason.to_string()
        } else {
            String::new()
        };
        let member_snapshot = member.clone();
        let queue_snapshot = queue.clone();
        self.emit(ProxyEvent::QueueChanged(queue_snapshot));
        self.emit(ProxyEvent::QueueMemberChanged(member_snapshot));
    }

    fn set_membership_flag(&mut self, queue_id: &str, member_id: &str, logged_in: bool) {
        if let Some(ext) = self
            .extensions
            .get_mut(member_id)
        {
            ext.queue_memberships
                .insert(queue_id.to_string(), logged_in);
        }
    }

    pub fn queue_caller_join(&mut self, queue_id: &str, caller: WaitingCaller) {
        let Some(queue) = self
            .queues
            .get_mut(queue_id)
        else {
            return;
        };
        queue.held += 1;
        queue
            .waiting
            .insert(caller.uniqueid.clone(), caller);
        let snapshot = queue.clone();
        self.emit(ProxyEvent::QueueChanged(snapshot));
    }

    pub fn queue_caller_leave(&mut self, queue_id: &str, uniqueid: &str) {
        let Some(queue) = self
            .queues
            .get_mut(queue_id)
        else {
            return;
        };
        queue
            .waiting
            .remove(uniqueid);
        let snapshot = queue.clone();
        self.emit(ProxyEvent::QueueChanged(snapshot));
    }

    /// Count an abandoned caller. Returns the caller number known from the waiting list.
    pub fn queue_caller_abandon(&mut self, queue_id: &str, uniqueid: &str) -> Option<String> {
        let queue = self
            .queues
            .get_mut(queue_id)?;
        queue.abandoned += 1;
        let number = queue
            .waiting
            .get(uniqueid)
            .map(|c| {
                c.number
                    .clone()
            });
        let snapshot = queue.clone();
        self.emit(ProxyEvent::QueueChanged(snapshot));
        number
    }

    pub fn queue_answered(&mut self, queue_id: &str) {
        let Some(queue) = self
            .queues
            .get_mut(queue_id)
        else {
            return;
        };
        queue.answered += 1;
        let snapshot = queue.clone();
        self.emit(ProxyEvent::QueueChanged(snapshot));
    }

    /// Seed a queue from a `QueueStatus` reply.
    pub fn apply_queue_status(&mut self, reply: &QueueStatusReply, now: u64) {
        let Some(params) = &reply.params else {
            return;
        };
        let Some(queue) = self
            .queues
            .get_mut(&params.queue)
        else {
            return;
        };
        queue.strategy = params
            .strategy
            .clone();
        queue.answered = params.completed;
        queue.abandoned = params.abandoned;
        queue
            .waiting
            .clear();
        for entry in &reply.entries {
            queue
                .waiting
                .insert(
                    entry
                        .uniqueid
                        .clone(),
                    WaitingCaller {
                        uniqueid: entry
                            .uniqueid
                            .clone(),
                        channel: entry
                            .channel
                            .clone(),
                        number: entry
                            .caller_num
                            .clone(),
                        name: entry
                            .caller_name
                            .clone(),
                        position: entry.position,
                        joined_at: now.saturating_sub(entry.wait),
                    },
                );
        }
        let queue_id = params
            .queue
            .clone();
        for info in &reply.members {
            // A member listed by QueueStatus is currently in the queue.
            self.queue_member_update(QueueMemberUpdate {
                queue: queue_id.clone(),
                member: info
                    .member
                    .clone(),
                name: info
                    .name
                    .clone(),
                interface: info
                    .interface
                    .clone(),
                membership: info
                    .membership
                    .clone(),
                logged_in: true,
                paused: info.paused,
                paused_reason: info
                    .paused_reason
                    .clone(),
                status: info.status,
                calls_taken: info.calls_taken,
                last_call: info.last_call,
            });
        }
        if let Some(queue) = self
            .queues
            .get(&queue_id)
        {
            let snapshot = queue.clone();
            self.emit(ProxyEvent::QueueChanged(snapshot));
        }
    }

    // ---- parkings ----

    pub fn park(&mut self, slot: &str, lot: &str, call: ParkedCall) {
        if !self.initialized {
            return;
        }
        let parking = self
            .parkings
            .entry(slot.to_string())
            .or_insert_with(|| Parking::new(slot, format!("Parking {}", slot)));
        if !lot.is_empty() {
            parking.lot = lot.to_string();
        }
        parking.parked = Some(call);
        let snapshot = parking.clone();
        self.emit(ProxyEvent::ParkingChanged(snapshot));
    }

    pub fn unpark(&mut self, slot: &str) {
        let Some(parking) = self
            .parkings
            .get_mut(slot)
        else {
            return;
        };
        parking.parked = None;
        let snapshot = parking.clone();
        self.emit(ProxyEvent::ParkingChanged(snapshot));
    }

    /// Make sure every slot of the listed lots exists.
    pub fn apply_parking_lots(&mut self, lots: &[ParkingLotInfo]) {
        if !self.initialized {
            return;
        }
        for lot in lots {
            let (Ok(start), Ok(stop)) = (
                lot.start_space
                    .parse::<u64>(),
                lot.stop_space
                    .parse::<u64>(),
            ) else {
                warn!(
                    "[STATE] parking lot {} has non-numeric range {}-{}",
                    lot.name, lot.start_space, lot.stop_space
                );
                continue;
            };
            if stop < start || stop - start >= MAX_PARKING_SLOTS {
                warn!("[STATE] parking lot {} range {}-{} ignored", lot.name, start, stop);
                continue;
            }
            for slot in start..=stop {
                let id = slot.to_string();
                let parking = self
                    .parkings
                    .entry(id.clone())
                    .or_insert_with(|| Parking::new(&id, format!("Parking {}", id)));
                parking.lot = lot
                    .name
                    .clone();
                if parking.timeout == 0 {
                    parking.timeout = lot.timeout;
                }
            }
        }
    }

    pub fn apply_parked_calls(&mut self, calls: &[ParkedCallInfo], now: u64) {
        for call in calls {
            self.park(
                &call.parking_space,
                &call.parking_lot,
                ParkedCall {
                    channel: call
                        .channel
                        .clone(),
                    uniqueid: call
                        .uniqueid
                        .clone(),
                    caller_num: call
                        .caller_num
                        .clone(),
                    caller_name: call
                        .caller_name
                        .clone(),
                    parked_by: call
                        .parked_by
                        .clone(),
                    timeout: call.timeout,
                    parked_at: now,
                },
            );
        }
    }

    // ---- conferences ----

    /// Room id from the `Meetme` header: the conference number minus the conf code prefix.
    pub fn conference_id_of(&self, meetme: &str) -> String {
        meetme
            .strip_prefix(self.meetme_conf_code.as_str())
            .filter(|rest| !rest.is_empty())
            .unwrap_or(meetme)
            .to_string()
    }

    pub fn meetme_join(&mut self, conf_id: &str, member: ConferenceMember) {
        if !self.initialized {
            return;
        }
        let conference = self
            .conferences
            .entry(conf_id.to_string())
            .or_insert_with(|| Conference::new(conf_id));
        conference.active = true;
        conference
            .members
            .insert(member.usernum.clone(), member);
        let snapshot = conference.clone();
        self.emit(ProxyEvent::ConferenceChanged(snapshot));
    }

    pub fn meetme_leave(&mut self, conf_id: &str, usernum: &str) {
        let Some(conference) = self
            .conferences
            .get_mut(conf_id)
        else {
            return;
        };
        conference
            .members
            .remove(usernum);
        if conference
            .members
            .is_empty()
        {
            self.meetme_end(conf_id);
            return;
        }
        let snapshot = conference.clone();
        self.emit(ProxyEvent::ConferenceChanged(snapshot));
    }

    pub fn meetme_mute(&mut self, conf_id: &str, usernum: &str, muted: bool) {
        let Some(conference) = self
            .conferences
            .get_mut(conf_id)
        else {
            return;
        };
        let Some(member) = conference
            .members
            .get_mut(usernum)
        else {
            return;
        };
        member.muted = muted;
        let snapshot = conference.clone();
        self.emit(ProxyEvent::ConferenceChanged(snapshot));
    }

    pub fn meetme_end(&mut self, conf_id: &str) {
        if self
            .conferences
            .remove(conf_id)
            .is_some()
        {
            self.emit(ProxyEvent::ConferenceEnded {
                id: conf_id.to_string(),
            });
        }
    }

    // ---- voicemail ----

    pub fn set_voicemail(&mut self, mailbox: &str, new: u32, old: u32) {
        if !self.initialized {
            return;
        }
        let counters = self
            .voicemails
            .entry(mailbox.to_string())
            .or_insert_with(|| VoicemailCounters {
                mailbox: mailbox.to_string(),
                new: 0,
                old: 0,
            });
        let grew = new > counters.new;
        counters.new = new;
        counters.old = old;
        let snapshot = counters.clone();
        self.emit(ProxyEvent::VoicemailCountersUpdated(snapshot.clone()));
        if grew {
            self.emit(ProxyEvent::NewVoicemail(snapshot));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::QueueMemberStatus;
    use crate::events::EventKind;

    fn sample() -> StructureDescription {
        StructureDescription::from_json(
            r#"{
                "extensions": { "201": { "name": "Alice", "tech": "pjsip" }, "202": { "name": "Bob", "tech": "pjsip" } },
                "queues": { "600": { "name": "Support", "members": ["201"] } },
                "trunks": { "2001": { "name": "Provider", "tech": "pjsip" } },
                "parkings": { "71": { "name": "Parking 71", "timeout": 45 } },
                "meetme_conf_code": "987"
            }"#,
        )
        .unwrap()
    }

    fn loaded() -> ProxyState {
        let mut state = ProxyState::new("0");
        state.load_structure(&sample());
        state.drain_events();
        state
    }

    fn channel(channel: &str, uniqueid: &str, linkedid: &str, caller: &str) -> ChannelInfo {
        ChannelInfo {
            channel: channel.to_string(),
            uniqueid: uniqueid.to_string(),
            linkedid: linkedid.to_string(),
            caller_num: caller.to_string(),
            caller_name: String::new(),
            connected_num: String::new(),
            connected_name: String::new(),
            exten: "600".to_string(),
            context: "from-trunk".to_string(),
            state: None,
            bridge_id: String::new(),
            application: String::new(),
            duration: String::new(),
        }
    }

    fn kinds(events: &[ProxyEvent]) -> Vec<EventKind> {
        events
            .iter()
            .map(|e| e.kind())
            .collect()
    }

    #[test]
    fn test_reads_empty_before_initialization() {
        let mut state = ProxyState::new("");
        assert!(state
            .extensions()
            .is_empty());
        state.set_device_state("201", DeviceState::Busy);
        assert!(state
            .drain_events()
            .is_empty());
        state.load_structure(&sample());
        assert_eq!(
            state
                .extensions()
                .len(),
            2
        );
        state.reset();
        assert!(state
            .queues()
            .is_empty());
    }

    #[test]
    fn test_structure_members_start_logged_out() {
        let state = loaded();
        let queue = state
            .queue("600")
            .unwrap();
        assert!(!queue.members["201"].logged_in);
        assert_eq!(queue.members["201"].name, "Alice");
        assert_eq!(state.queue_ids_of_extension("201"), vec!["600".to_string()]);
        assert!(state.queue_ids_of_extension("202").is_empty());
    }

    #[test]
    fn test_last_status_wins() {
        let mut state = loaded();
        for s in [DeviceState::Ringing, DeviceState::InUse, DeviceState::Idle, DeviceState::Busy] {
            state.set_device_state("201", s);
        }
        assert_eq!(
            state
                .extension("201")
                .unwrap()
                .device_state,
            DeviceState::Busy
        );
        let events = state.drain_events();
        assert_eq!(events.len(), 4);
        match events.last() {
            Some(ProxyEvent::ExtensionChanged(e)) => assert_eq!(e.device_state, DeviceState::Busy),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_is_independent() {
        let state = loaded();
        let mut snap = state.extensions();
        snap.get_mut("201")
            .unwrap()
            .dnd = true;
        snap.remove("202");
        let again = state.extensions();
        assert!(!again["201"].dnd);
        assert!(again.contains_key("202"));
    }

    #[test]
    fn test_queue_member_login_emits_queue_then_member() {
        let mut state = loaded();
        state.queue_member_update(QueueMemberUpdate {
            queue: "600".into(),
            member: "201".into(),
            name: "Alice".into(),
            interface: "Local/201@from-queue/n".into(),
            membership: "dynamic".into(),
            logged_in: true,
            paused: false,
            paused_reason: String::new(),
            status: QueueMemberStatus::NotInUse,
            calls_taken: 3,
            last_call: 0,
        });
        let events = state.drain_events();
        assert_eq!(
            kinds(&events),
            vec![EventKind::QueueChanged, EventKind::QueueMemberChanged]
        );
        assert!(state.queues()["600"].members["201"].logged_in);
        assert_eq!(
            state.extension("201").unwrap().queue_memberships.get("600"),
            Some(&true)
        );

        state.queue_member_removed("600", "201");
        assert!(!state.queues()["600"].members["201"].logged_in);
    }

    #[test]
    fn test_queue_counters() {
        let mut state = loaded();
        state.queue_caller_join(
            "600",
            WaitingCaller {
                uniqueid: "1700.1".into(),
                channel: "PJSIP/2001-00000001".into(),
                number: "3351234567".into(),
                name: String::new(),
                position: 1,
                joined_at: 0,
            },
        );
        assert_eq!(
            state.queue_caller_abandon("600", "1700.1"),
            Some("3351234567".to_string())
        );
        state.queue_caller_leave("600", "1700.1");
        state.queue_answered("600");
        let queue = state
            .queue("600")
            .unwrap();
        assert_eq!(queue.held, 1);
        assert_eq!(queue.abandoned, 1);
        assert_eq!(queue.answered, 1);
        assert!(queue
            .waiting
            .is_empty());
    }

    #[test]
    fn test_inbound_call_detection() {
        let mut state = loaded();
        // Trunk channel originating the call: inbound.
        assert!(state.add_conversation(
            &channel("PJSIP/2001-00000001", "1700.1", "1700.1", "3351234567"),
            100
        ));
        assert_eq!(state.trunks()["2001"].channel_count(), 1);
        // Extension calling out: not inbound.
        assert!(!state.add_conversation(&channel("PJSIP/201-00000002", "1700.2", "1700.2", "201"), 100));
        // Leg created for the callee: not originating.
        assert!(!state.add_conversation(
            &channel("PJSIP/2001-00000003", "1700.3", "1700.2", "201"),
            100
        ));
        // Local channels never count.
        assert!(!state.add_conversation(
            &channel("Local/201@from-queue-00000001;1", "1700.4", "1700.4", "3351234567"),
            100
        ));

        state.remove_conversation("1700.1");
        assert_eq!(state.trunks()["2001"].channel_count(), 0);
    }

    #[test]
    fn test_call_forward_to_voicemail_is_split_out() {
        let mut state = loaded();
        state.set_call_forward("201", CallForwardType::Unconditional, Some("vmu201".into()));
        let forward = state
            .extension("201")
            .unwrap()
            .call_forward;
        assert_eq!(forward.voicemail.as_deref(), Some("201"));
        assert!(forward
            .unconditional
            .is_none());

        state.set_call_forward("201", CallForwardType::Unconditional, Some("3351234567".into()));
        let forward = state
            .extension("201")
            .unwrap()
            .call_forward;
        assert_eq!(forward.unconditional.as_deref(), Some("3351234567"));
        assert!(forward
            .voicemail
            .is_none());
    }

    #[test]
    fn test_call_lookups() {
        let mut state = loaded();
        state.add_conversation(&channel("PJSIP/201-00000001", "1700.1", "1700.1", "201"), 100);
        state.dial_begin(&DialBegin {
            uniqueid: "1700.1".into(),
            channel: "PJSIP/201-00000001".into(),
            dest_uniqueid: "1700.2".into(),
            dest_channel: "PJSIP/2001-00000002".into(),
            ..DialBegin::default()
        });
        let conversation = state
            .extension_conversation("201", "1700.1")
            .unwrap();
        assert_eq!(conversation.counterpart_channel.as_deref(), Some("PJSIP/2001-00000002"));
        assert!(state
            .extension_conversation("202", "1700.1")
            .is_none());

        assert!(state
            .parked_channel("71")
            .is_none());
        assert!(state
            .waiting_channel("600", "1700.9")
            .is_none());
        state.queue_caller_join(
            "600",
            WaitingCaller {
                uniqueid: "1700.9".into(),
                channel: "PJSIP/2001-00000009".into(),
                number: "3351234567".into(),
                name: String::new(),
                position: 1,
                joined_at: 100,
            },
        );
        assert_eq!(
            state
                .waiting_channel("600", "1700.9")
                .as_deref(),
            Some("PJSIP/2001-00000009")
        );
    }

    #[test]
    fn test_channel_listing_reconciles_conversations() {
        let mut state = loaded();
        state.add_conversation(&channel("PJSIP/201-00000001", "1700.1", "1700.1", "201"), 100);
        state.add_conversation(&channel("PJSIP/202-00000002", "1700.2", "1700.1", "201"), 100);
        state.add_conversation(&channel("PJSIP/2001-00000003", "1700.3", "1700.3", "0612"), 100);
        state.drain_events();

        let mut answered = channel("PJSIP/201-00000001", "1700.1", "1700.1", "201");
        answered.state = Some(crate::channel::AmiChannelState::Up);
        // 1700.2 hung up unnoticed, 1700.3 was renamed onto extension 202
        let listing = vec![
            answered,
            channel("PJSIP/202-00000009", "1700.3", "1700.3", "0612"),
            channel("PJSIP/2001-00000004", "1700.4", "1700.4", "0698"),
        ];
        state.apply_channels(&listing, 200);

        let extensions = state.extensions();
        let alice = &extensions["201"].conversations["1700.1"];
        assert_eq!(alice.state, Some(crate::channel::AmiChannelState::Up));
        assert!(!extensions["202"]
            .conversations
            .contains_key("1700.2"));
        assert_eq!(extensions["202"].conversations["1700.3"].channel, "PJSIP/202-00000009");
        let trunks = state.trunks();
        assert!(!trunks["2001"]
            .conversations
            .contains_key("1700.3"));
        assert!(trunks["2001"]
            .conversations
            .contains_key("1700.4"));

        let events = kinds(&state.drain_events());
        assert!(events.contains(&EventKind::ExtensionChanged));
        assert!(events.contains(&EventKind::TrunkChanged));

        // Same listing again changes nothing.
        state.apply_channels(&listing, 300);
        assert!(state
            .drain_events()
            .is_empty());
    }

    #[test]
    fn test_dial_begin_announces_destination() {
        let mut state = loaded();
        state.add_conversation(&channel("PJSIP/202-00000001", "1.1", "1.1", "202"), 1);
        state.add_conversation(&channel("PJSIP/201-00000002", "1.2", "1.1", "201"), 1);
        state.drain_events();
        state.dial_begin(&DialBegin {
            uniqueid: "1.1".into(),
            channel: "PJSIP/202-00000001".into(),
            caller_num: "202".into(),
            caller_name: "Bob".into(),
            dest_uniqueid: "1.2".into(),
            dest_channel: "PJSIP/201-00000002".into(),
        });
        let events = state.drain_events();
        assert!(matches!(
            events.last(),
            Some(ProxyEvent::DialingStarted(d)) if d.extension == "201" && d.caller_num == "202"
        ));
        let ext = state
            .extension("201")
            .unwrap();
        assert_eq!(
            ext.conversations["1.2"].counterpart_channel.as_deref(),
            Some("PJSIP/202-00000001")
        );
    }

    #[test]
    fn test_meetme_lifecycle() {
        let mut state = loaded();
        let conf = state.conference_id_of("987201");
        assert_eq!(conf, "201");
        state.meetme_join(
            &conf,
            ConferenceMember {
                usernum: "1".into(),
                extension: "202".into(),
                name: "Bob".into(),
                channel: "PJSIP/202-1".into(),
                muted: false,
                owner: false,
            },
        );
        state.meetme_mute(&conf, "1", true);
        assert!(state.conferences()["201"].members["1"].muted);
        state.meetme_leave(&conf, "1");
        assert!(state
            .conferences()
            .is_empty());
        let events = state.drain_events();
        assert_eq!(events.last().map(|e| e.kind()), Some(EventKind::ConferenceEnded));
    }

    #[test]
    fn test_voicemail_new_message_detection() {
        let mut state = loaded();
        state.set_voicemail("201", 1, 0);
        state.set_voicemail("201", 0, 1);
        let events = state.drain_events();
        assert_eq!(
            kinds(&events),
            vec![
                EventKind::VoicemailCountersUpdated,
                EventKind::NewVoicemail,
                EventKind::VoicemailCountersUpdated
            ]
        );
    }

    #[test]
    fn test_parking() {
        let mut state = loaded();
        state.apply_parking_lots(&[ParkingLotInfo {
            name: "default".into(),
            start_space: "71".into(),
            stop_space: "73".into(),
            timeout: 45,
        }]);
        assert_eq!(state.parkings().len(), 3);
        state.park(
            "72",
            "default",
            ParkedCall {
                channel: "PJSIP/2001-1".into(),
                uniqueid: "9.1".into(),
                caller_num: "3351234567".into(),
                caller_name: String::new(),
                parked_by: "201".into(),
                timeout: 45,
                parked_at: 0,
            },
        );
        assert!(state.parkings()["72"].parked.is_some());
        assert_eq!(state.parked_channel("72").as_deref(), Some("PJSIP/2001-1"));
        state.unpark("72");
        assert!(state.parkings()["72"].parked.is_none());
    }

    #[test]
    fn test_add_prefix_and_registration() {
        let mut state = loaded();
        assert_eq!(state.add_prefix("3351234567"), "03351234567");
        assert_eq!(state.add_prefix("+39335"), "+39335");
        assert_eq!(state.add_prefix("0039335"), "0039335");

        state.set_registration("201", Registration::Registered, Some("10.0.0.5:5062"));
        let ext = state
            .extension("201")
            .unwrap();
        assert_eq!(ext.ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(ext.port.as_deref(), Some("5062"));
        state.set_registration("2001", Registration::Unreachable, None);
        assert_eq!(state.trunks()["2001"].registration, Registration::Unreachable);
    }
}
