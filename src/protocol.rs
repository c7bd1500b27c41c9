//! AMI wire parsing: banner line followed by blank-line terminated `Key: Value` blocks

use crate::{
    buffer::AmiBuffer,
    constants::{BANNER_PREFIX, FRAME_TERMINATOR, FRAME_TERMINATOR_LF, MAX_FRAME_SIZE},
    error::{AmiError, AmiResult},
    frame::AmiFrame,
};
use tracing::trace;

/// Parser state for handling incomplete input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    WaitingForBanner,
    WaitingForBlock,
}

/// Incremental AMI parser.
///
/// Feed raw socket bytes with [`add_data`](Self::add_data) and pull frames with
/// [`parse_frame`](Self::parse_frame) until it returns `Ok(None)`. A
/// [`AmiError::MalformedFrame`] is returned only after the offending block has been
/// consumed, so the caller can log it and keep parsing.
pub struct AmiParser {
    buffer: AmiBuffer,
    state: ParseState,
    banner: Option<String>,
}

impl AmiParser {
    /// Parser for a fresh connection; expects the greeting banner first.
    pub fn new() -> Self {
        Self {
            buffer: AmiBuffer::new(),
            state: ParseState::WaitingForBanner,
            banner: None,
        }
    }

    /// Parser that starts directly with blocks (no banner expected).
    pub fn without_banner() -> Self {
        Self {
            buffer: AmiBuffer::new(),
            state: ParseState::WaitingForBlock,
            banner: None,
        }
    }

    /// The greeting line, once received (e.g. `Asterisk Call Manager/7.0.3`)
    pub fn banner(&self) -> Option<&str> {
        self.banner
            .as_deref()
    }

    /// Add data to the parser buffer
    pub fn add_data(&mut self, data: &[u8]) -> AmiResult<()> {
        self.buffer
            .extend_from_slice(data);
        self.buffer
            .check_size_limits()?;
        Ok(())
    }

    /// Try to parse a complete frame from the buffer
    pub fn parse_frame(&mut self) -> AmiResult<Option<AmiFrame>> {
        loop {
            match self.state {
                ParseState::WaitingForBanner => {
                    if !self.take_banner() {
                        return Ok(None);
                    }
                }
                ParseState::WaitingForBlock => {
                    let Some(block) = self.next_block()? else {
                        return Ok(None);
                    };
                    if block
                        .iter()
                        .all(|b| b.is_ascii_whitespace())
                    {
                        // stray blank lines between blocks
                        continue;
                    }
                    return parse_block(&block).map(Some);
                }
            }
        }
    }

    /// Consume the banner line if one is buffered. Returns false when more data is needed.
    fn take_banner(&mut self) -> bool {
        let Some(eol) = self
            .buffer
            .find_pattern(b"\n")
        else {
            return false;
        };

        let line = String::from_utf8_lossy(&self.buffer.data()[..eol])
            .trim()
            .to_string();
        if line.starts_with(BANNER_PREFIX) {
            let _ = self
                .buffer
                .extract_bytes(eol + 1);
            self.buffer
                .compact();
            trace!("[RECV] Banner: {}", line);
            self.banner = Some(line);
        }
        // A server that skips the banner still gets its first block parsed.
        self.state = ParseState::WaitingForBlock;
        true
    }

    /// Extract the next raw block up to whichever terminator comes first.
    fn next_block(&mut self) -> AmiResult<Option<Vec<u8>>> {
        let crlf = self
            .buffer
            .find_pattern(FRAME_TERMINATOR.as_bytes());
        let lf = self
            .buffer
            .find_pattern(FRAME_TERMINATOR_LF.as_bytes());

        let terminator: &[u8] = match (crlf, lf) {
            (Some(a), Some(b)) if b < a => FRAME_TERMINATOR_LF.as_bytes(),
            (Some(_), _) => FRAME_TERMINATOR.as_bytes(),
            (None, Some(_)) => FRAME_TERMINATOR_LF.as_bytes(),
            (None, None) => {
                if self.buffer.len() > MAX_FRAME_SIZE {
                    return Err(AmiError::protocol_error(format!(
                        "No frame terminator within {} bytes",
                        MAX_FRAME_SIZE
                    )));
                }
                return Ok(None);
            }
        };

        let block = self
            .buffer
            .extract_until_pattern(terminator);
        self.buffer
            .compact();
        Ok(block)
    }
}

impl Default for AmiParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode one block into a frame.
fn parse_block(block: &[u8]) -> AmiResult<AmiFrame> {
    if block.len() > MAX_FRAME_SIZE {
        return Err(AmiError::malformed(format!(
            "frame of {} bytes exceeds limit {}",
            block.len(),
            MAX_FRAME_SIZE
        )));
    }
    let text = std::str::from_utf8(block).map_err(|_| AmiError::malformed("invalid UTF-8"))?;

    let mut frame = AmiFrame::new();
    let mut header_count = 0usize;

    for raw in text.lines() {
        let line = raw.trim_end_matches('\r');
        if line
            .trim()
            .is_empty()
        {
            continue;
        }
        match split_header(line) {
            Some((key, value)) => {
                frame.set_header(key, value);
                header_count += 1;
            }
            None => frame.push_output(line),
        }
    }

    if header_count == 0 {
        return Err(AmiError::malformed(format!(
            "no Key: Value line in block starting {:?}",
            text.chars()
                .take(40)
                .collect::<String>()
        )));
    }
    Ok(frame)
}

/// `Key: Value` where the key is a single token
fn split_header(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let key = line[..colon].trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key, line[colon + 1..].trim()))
}
