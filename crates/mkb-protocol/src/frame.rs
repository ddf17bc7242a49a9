//! Reassembly of fragmented transport frames
//!
//! A logical message may arrive as several physical frames. Only the last
//! one is marked final; the reassembler concatenates payloads in arrival
//! order and yields the whole message when that final frame arrives.

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;

/// Default upper bound on a reassembled message (16MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Accumulates frame payloads until a complete message is available
#[derive(Debug)]
pub struct FrameReassembler {
    /// Payload bytes of the message in progress
    buffer: BytesMut,
    /// Whether a non-final frame has been seen for the current message
    pending: bool,
    /// Skipping the remaining frames of an oversized message
    discarding: bool,
    /// Largest message that will be yielded
    max_message_size: usize,
}

impl FrameReassembler {
    /// Create a reassembler with the given message size limit
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            pending: false,
            discarding: false,
            max_message_size,
        }
    }

    /// Feed one frame.
    ///
    /// Returns `Ok(Some(message))` when `fin` completes a message, `Ok(None)`
    /// while more frames are needed. A message that would grow past the size
    /// limit is dropped with [`ProtocolError::MessageTooLarge`], along with any
    /// of its frames that are still to come.
    pub fn push(&mut self, payload: Bytes, fin: bool) -> Result<Option<Bytes>, ProtocolError> {
        if self.discarding {
            if fin {
                self.discarding = false;
            }
            return Ok(None);
        }

        let size = self.buffer.len() + payload.len();
        if size > self.max_message_size {
            self.buffer.clear();
            self.pending = false;
            self.discarding = !fin;
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }

        if !fin {
            self.buffer.extend_from_slice(&payload);
            self.pending = true;
            return Ok(None);
        }

        if !self.pending {
            // Single-frame message, nothing to concatenate
            return Ok(Some(payload));
        }

        self.buffer.extend_from_slice(&payload);
        self.pending = false;
        Ok(Some(self.buffer.split().freeze()))
    }

    /// Whether a message is partially received
    pub fn is_partial(&self) -> bool {
        self.pending || self.discarding
    }

    /// Number of bytes buffered for the message in progress
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial message, returning how many bytes were discarded
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.pending = false;
        self.discarding = false;
        dropped
    }
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}
