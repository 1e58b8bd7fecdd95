//! Length-prefixed MessagePack framing for session frames.
//!
//! On the wire every frame is a 4-byte big-endian payload length followed by
//! the frame as named MessagePack. Inbound bytes are accumulated in a
//! [`FrameReader`], which yields frames as they complete.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::{Frame, FrameType};

/// Maximum frame payload size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Framing errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An outbound frame encodes to more than [`MAX_FRAME_SIZE`].
    #[error("{frame_type:?} frame of {size} bytes exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge {
        /// Kind of the rejected frame.
        frame_type: FrameType,
        /// Encoded payload size.
        size: usize,
    },

    /// An inbound length prefix announces more than [`MAX_FRAME_SIZE`].
    #[error("Declared frame length {0} exceeds maximum {MAX_FRAME_SIZE}")]
    LengthTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode a frame to bytes.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Append an encoded frame to `buf`.
///
/// On error `buf` is left as it was.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let start = buf.len();

    // Placeholder prefix, patched once the payload length is known.
    buf.put_u32(0);
    let written = rmp_serde::encode::write_named(&mut (&mut *buf).writer(), frame);
    if let Err(e) = written {
        buf.truncate(start);
        return Err(e.into());
    }

    let size = buf.len() - start - LENGTH_PREFIX_SIZE;
    if size > MAX_FRAME_SIZE {
        buf.truncate(start);
        return Err(ProtocolError::FrameTooLarge {
            frame_type: frame.frame_type(),
            size,
        });
    }

    buf[start..start + LENGTH_PREFIX_SIZE].copy_from_slice(&(size as u32).to_be_bytes());
    Ok(())
}

/// Payload length announced at the start of `data`, once the prefix is complete.
fn declared_length(data: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let Some(mut prefix) = data.get(..LENGTH_PREFIX_SIZE) else {
        return Ok(None);
    };

    let length = prefix.get_u32() as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::LengthTooLarge(length));
    }
    Ok(Some(length))
}

/// Decode a single frame from the start of `data`.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let length = declared_length(data)?
        .ok_or_else(|| ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()))?;

    let total = LENGTH_PREFIX_SIZE + length;
    let payload = data
        .get(LENGTH_PREFIX_SIZE..total)
        .ok_or_else(|| ProtocolError::Incomplete(total - data.len()))?;

    Ok(rmp_serde::from_slice(payload)?)
}

/// Take the next complete frame off the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched while the frame is partial.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    let Some(length) = declared_length(&buf[..])? else {
        return Ok(None);
    };

    let total = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total {
        buf.reserve(total - buf.len());
        return Ok(None);
    }

    let frame = buf.split_to(total);
    Ok(Some(rmp_serde::from_slice(&frame[LENGTH_PREFIX_SIZE..])?))
}

/// Accumulates inbound bytes of one session and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: BytesMut,
}

impl FrameReader {
    /// Create an empty reader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete frame, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffered frame is too large or invalid. The
    /// stream cannot be resynchronised afterwards.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        decode_from(&mut self.buf)
    }

    /// Number of bytes waiting for a frame to complete.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
