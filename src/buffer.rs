//! Growable read buffer for the AMI parser

use crate::{
    constants::{BUF_CHUNK, MAX_BUFFER_SIZE},
    error::{AmiError, AmiResult},
};

/// Byte buffer with a read cursor; consumed bytes are reclaimed by `compact`.
pub struct AmiBuffer {
    data: Vec<u8>,
    position: usize,
}

impl AmiBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(BUF_CHUNK),
            position: 0,
        }
    }

    /// Unconsumed bytes
    pub fn data(&self) -> &[u8] {
        &self.data[self.position..]
    }

    pub fn len(&self) -> usize {
        self.data
            .len()
            - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        if self
            .data
            .capacity()
            - self
                .data
                .len()
            < bytes.len()
        {
            self.data
                .reserve(bytes.len().max(BUF_CHUNK));
        }
        self.data
            .extend_from_slice(bytes);
    }

    /// Position of `pattern` in the unconsumed bytes
    pub fn find_pattern(&self, pattern: &[u8]) -> Option<usize> {
        if pattern.is_empty() || self.len() < pattern.len() {
            return None;
        }
        self.data()
            .windows(pattern.len())
            .position(|w| w == pattern)
    }

    /// Take everything before `pattern` and consume the pattern itself.
    pub fn extract_until_pattern(&mut self, pattern: &[u8]) -> Option<Vec<u8>> {
        let pos = self.find_pattern(pattern)?;
        let out = self.data()[..pos].to_vec();
        self.position += pos + pattern.len();
        Some(out)
    }

    /// Consume exactly `len` bytes, or nothing if fewer are buffered.
    pub fn extract_bytes(&mut self, len: usize) -> Option<Vec<u8>> {
        if self.len() < len {
            return None;
        }
        let out = self.data()[..len].to_vec();
        self.position += len;
        Some(out)
    }

    /// Drop consumed bytes from the front.
    pub fn compact(&mut self) {
        if self.position == 0 {
            return;
        }
        self.data
            .drain(..self.position);
        self.position = 0;
    }

    pub fn check_size_limits(&self) -> AmiResult<()> {
        if self.len() > MAX_BUFFER_SIZE {
            return Err(AmiError::protocol_error(format!(
                "Read buffer exceeded {} bytes without a complete frame",
                MAX_BUFFER_SIZE
            )));
        }
        Ok(())
    }
}

impl Default for AmiBuffer {
    fn default() -> Self {
        Self::new()
    }
}
