//! Fragment codec for byte-stream transports
//!
//! Splits frames into fragments on the way out and reassembles them on the
//! way in, the same way a WebSocket uses its FIN bit.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;

use super::MAGIC_BYTES;

/// Maximum size of one reassembled message (64 MB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Default largest fragment the encoder emits (64 KB)
pub const DEFAULT_MAX_FRAGMENT_SIZE: usize = 64 * 1024;

/// Header size: magic(4) + flags(1) + length(4) = 9 bytes
const HEADER_SIZE: usize = 9;

/// Flag bit marking the last fragment of a message
const FLAG_END_OF_MESSAGE: u8 = 0x01;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Invalid fragment flags: {0:#04x}")]
    InvalidFlags(u8),

    #[error("Message too large: {0} bytes (max: {1})")]
    MessageTooLarge(usize, usize),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// One transport fragment of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Fragment payload
    pub data: Bytes,
    /// Whether this fragment completes the message
    pub end_of_message: bool,
}

impl Fragment {
    pub fn new(data: impl Into<Bytes>, end_of_message: bool) -> Self {
        Self {
            data: data.into(),
            end_of_message,
        }
    }

    /// A fragment that carries a whole message
    pub fn whole(data: impl Into<Bytes>) -> Self {
        Self::new(data, true)
    }
}

/// Encodes frames into the fragment wire format
#[derive(Debug, Clone)]
pub struct FragmentEncoder {
    max_fragment_size: usize,
}

impl FragmentEncoder {
    pub fn new() -> Self {
        Self::with_max_fragment_size(DEFAULT_MAX_FRAGMENT_SIZE)
    }

    pub fn with_max_fragment_size(max_fragment_size: usize) -> Self {
        Self {
            max_fragment_size: max_fragment_size.max(1),
        }
    }

    /// Encode one complete frame, splitting it into as many fragments as needed.
    ///
    /// The last fragment carries the end-of-message flag. An empty payload
    /// still produces a single empty fragment.
    pub fn encode_frame(&self, payload: &[u8], buf: &mut BytesMut) -> Result<(), CodecError> {
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(payload.len(), MAX_MESSAGE_SIZE));
        }

        if payload.is_empty() {
            self.encode_fragment(payload, true, buf);
            return Ok(());
        }

        let mut chunks = payload.chunks(self.max_fragment_size).peekable();
        while let Some(chunk) = chunks.next() {
            self.encode_fragment(chunk, chunks.peek().is_none(), buf);
        }
        Ok(())
    }

    /// Encode a single fragment as-is
    pub fn encode_fragment(&self, data: &[u8], end_of_message: bool, buf: &mut BytesMut) {
        buf.reserve(HEADER_SIZE + data.len());
        buf.put_slice(&MAGIC_BYTES);
        buf.put_u8(if end_of_message { FLAG_END_OF_MESSAGE } else { 0 });
        buf.put_u32(data.len() as u32);
        buf.put_slice(data);
    }
}

impl Default for FragmentEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes fragments from the wire format
pub struct FragmentDecoder {
    state: DecodeState,
}

#[derive(Default)]
enum DecodeState {
    #[default]
    Header,
    Payload {
        end_of_message: bool,
        length: usize,
    },
}

impl FragmentDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Header,
        }
    }

    /// Attempt to decode a fragment from the buffer
    /// Returns Ok(None) if more data is needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Fragment>, CodecError> {
        loop {
            match &self.state {
                DecodeState::Header => {
                    if buf.len() < HEADER_SIZE {
                        return Ok(None);
                    }

                    if buf[0..4] != MAGIC_BYTES {
                        return Err(CodecError::InvalidMagic);
                    }

                    let flags = buf[4];
                    if flags & !FLAG_END_OF_MESSAGE != 0 {
                        return Err(CodecError::InvalidFlags(flags));
                    }

                    let length = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) as usize;
                    if length > MAX_MESSAGE_SIZE {
                        return Err(CodecError::MessageTooLarge(length, MAX_MESSAGE_SIZE));
                    }

                    buf.advance(HEADER_SIZE);

                    self.state = DecodeState::Payload {
                        end_of_message: flags & FLAG_END_OF_MESSAGE != 0,
                        length,
                    };
                }
                DecodeState::Payload {
                    end_of_message,
                    length,
                } => {
                    if buf.len() < *length {
                        return Ok(None);
                    }

                    let data = buf.split_to(*length).freeze();
                    let end_of_message = *end_of_message;

                    self.state = DecodeState::Header;

                    return Ok(Some(Fragment::new(data, end_of_message)));
                }
            }
        }
    }

    /// Whether a fragment is partially buffered
    pub fn is_mid_fragment(&self) -> bool {
        matches!(self.state, DecodeState::Payload { .. })
    }
}

impl Default for FragmentDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates fragments into complete frames.
///
/// Holds the bytes of at most one message; the buffer is handed out and
/// reset each time an end-of-message fragment arrives.
#[derive(Debug)]
pub struct FrameAssembler {
    buf: BytesMut,
    max_message_size: usize,
    discarding: bool,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::with_max_message_size(MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_message_size,
            discarding: false,
        }
    }

    /// Add a fragment, returning the complete frame once it is finished.
    ///
    /// An oversized message is reported once and its remaining fragments are
    /// skipped up to and including its end-of-message fragment.
    pub fn push(&mut self, fragment: Fragment) -> Result<Option<Bytes>, CodecError> {
        if self.discarding {
            if fragment.end_of_message {
                self.discarding = false;
            }
            return Ok(None);
        }

        let total = self.buf.len() + fragment.data.len();
        if total > self.max_message_size {
            self.buf.clear();
            self.discarding = !fragment.end_of_message;
            return Err(CodecError::MessageTooLarge(total, self.max_message_size));
        }

        self.buf.extend_from_slice(&fragment.data);

        if fragment.end_of_message {
            Ok(Some(self.buf.split().freeze()))
        } else {
            Ok(None)
        }
    }

    /// Bytes buffered for the message in progress
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}
