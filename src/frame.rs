//! Decoded AMI message blocks

use crate::constants::{EVENT_LIST_COMPLETE, EVENT_LIST_START, RESPONSE_ERROR, RESPONSE_SUCCESS};
use crate::headers::FrameHeader;
use std::collections::HashMap;

/// Whether a frame is a reply to an action or an unsolicited event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Carries `Response:`
    Response,
    /// Carries `Event:`
    Event,
    /// Neither header present
    Unknown,
}

/// One `Key: Value` block received from the manager interface.
///
/// Header names are stored lower-cased; lookups through [`header`](Self::header) and
/// [`header_str`](Self::header_str) are case-insensitive. Lines inside the block that are
/// not `Key: Value` pairs, plus every `Output:` header, are kept in [`output`](Self::output).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmiFrame {
    headers: HashMap<String, String>,
    output: Vec<String>,
}

impl AmiFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an event frame (tests and synthetic frames)
    pub fn event(name: &str) -> Self {
        Self::new().with(FrameHeader::Event, name)
    }

    /// Start a response frame (tests and synthetic frames)
    pub fn reply(status: &str) -> Self {
        Self::new().with(FrameHeader::Response, status)
    }

    /// Builder-style header setter
    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set_header(key, value);
        self
    }

    /// Set a header; later values replace earlier ones except for `Output`.
    pub fn set_header(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        let key = key
            .as_ref()
            .to_ascii_lowercase();
        if key == "output" {
            self.output
                .push(value.into());
            return;
        }
        self.headers
            .insert(key, value.into());
    }

    pub fn push_output(&mut self, line: impl Into<String>) {
        self.output
            .push(line.into());
    }

    /// Look up a header by its typed name
    pub fn header(&self, name: FrameHeader) -> Option<&str> {
        self.header_str(name.as_str())
    }

    /// Look up a header by raw name (for headers the typed enum doesn't cover)
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Header value, or `""` when absent
    pub fn get_or_empty(&self, name: FrameHeader) -> &str {
        self.header(name)
            .unwrap_or("")
    }

    /// All headers with lower-cased keys
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Free-form output lines
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn kind(&self) -> FrameKind {
        if self
            .header(FrameHeader::Response)
            .is_some()
        {
            FrameKind::Response
        } else if self
            .header(FrameHeader::Event)
            .is_some()
        {
            FrameKind::Event
        } else {
            FrameKind::Unknown
        }
    }

    pub fn action_id(&self) -> Option<&str> {
        self.header(FrameHeader::ActionId)
            .filter(|s| !s.is_empty())
    }

    pub fn event_name(&self) -> Option<&str> {
        self.header(FrameHeader::Event)
    }

    /// Event name lower-cased, the key used by the event plugin registry
    pub fn event_key(&self) -> Option<String> {
        self.event_name()
            .map(|e| e.to_ascii_lowercase())
    }

    pub fn response(&self) -> Option<&str> {
        self.header(FrameHeader::Response)
    }

    pub fn message(&self) -> Option<&str> {
        self.header(FrameHeader::Message)
    }

    pub fn is_success(&self) -> bool {
        self.response()
            .is_some_and(|r| r.eq_ignore_ascii_case(RESPONSE_SUCCESS))
    }

    pub fn is_error(&self) -> bool {
        self.response()
            .is_some_and(|r| r.eq_ignore_ascii_case(RESPONSE_ERROR))
    }

    pub fn event_list(&self) -> Option<&str> {
        self.header(FrameHeader::EventList)
    }

    /// `EventList: start` response announcing a multi-frame reply
    pub fn is_list_start(&self) -> bool {
        self.event_list()
            .is_some_and(|v| v.eq_ignore_ascii_case(EVENT_LIST_START))
    }

    /// `EventList: Complete` event closing a multi-frame reply
    pub fn is_list_complete(&self) -> bool {
        self.event_list()
            .is_some_and(|v| v.eq_ignore_ascii_case(EVENT_LIST_COMPLETE))
    }

    /// Human-readable label for logs: event name, response status, or `"?"`
    pub fn label(&self) -> &str {
        self.event_name()
            .or_else(|| self.response())
            .unwrap_or("?")
    }
}
