//! Length-prefixed framing.
//!
//! ```text
//! [length:u32 BE][payload:length bytes]
//! ```
//!
//! The payload is a JSON-encoded protocol message. Decoding is
//! incremental: `decode` returns `Ok(None)` until a full frame has
//! accumulated in the buffer, so callers can feed it straight from a
//! socket read loop.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{WireError, WireResult};

/// Size of the frame length prefix in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Maximum accepted frame payload size.
///
/// A batch of buffered activity events is small; anything near this
/// limit is a corrupt stream or a misbehaving peer.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// A single wire frame holding one encoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    /// Wraps an encoded payload in a frame.
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Returns the frame payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Attempts to decode one frame from the front of `buf`.
    ///
    /// Consumes the frame's bytes on success. Returns `Ok(None)` when
    /// the buffer does not yet hold a complete frame.
    ///
    /// # Errors
    ///
    /// [`WireError::FrameTooLarge`] if the announced length exceeds
    /// [`MAX_FRAME_SIZE`]. The buffer is left untouched so the caller
    /// can close the connection without reading garbage.
    pub fn decode(buf: &mut BytesMut) -> WireResult<Option<Frame>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let len = u32::from_be_bytes(
            buf[..FRAME_HEADER_SIZE]
                .try_into()
                .expect("slice is exactly 4 bytes after bounds check"),
        ) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge {
                len,
                max: MAX_FRAME_SIZE,
            });
        }

        if buf.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(len).freeze();
        Ok(Some(Frame { payload }))
    }

    /// Appends this frame's encoding to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(FRAME_HEADER_SIZE + self.payload.len());
        buf.put_u32(self.payload.len() as u32);
        buf.extend_from_slice(&self.payload);
    }
}
