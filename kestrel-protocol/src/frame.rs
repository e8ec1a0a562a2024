//! Common frame definitions
//!
//! Every serialized unit on a link is a frame. Frames nest: a packet's
//! payload is itself a frame (binary message, ASCII line, CAN message or raw
//! bytes), and the outermost frame kind is whatever the protocol's top-level
//! handler expects.

use kestrel_core::ByteArray;
use kestrel_hal::ErrorCode;

/// Largest serialized frame, outermost envelope included
pub const MAX_FRAME_SIZE: usize = 512;

/// Staging buffer for one serialized frame
pub type FrameBuffer = ByteArray<MAX_FRAME_SIZE>;

/// Errors that can occur during frame decoding or encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Payload exceeds maximum allowed size
    PayloadTooLarge,
    /// Checksum mismatch
    InvalidChecksum,
    /// Frame is incomplete (need more bytes)
    Incomplete,
    /// Invalid frame structure
    InvalidFrame,
    /// Buffer too small for encoding
    BufferTooSmall,
}

impl From<ErrorCode> for FrameError {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::BufferFull => FrameError::BufferTooSmall,
            ErrorCode::BufferEmpty => FrameError::Incomplete,
            _ => FrameError::InvalidFrame,
        }
    }
}

impl From<FrameError> for ErrorCode {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::BufferTooSmall | FrameError::PayloadTooLarge => ErrorCode::BufferFull,
            FrameError::Incomplete => ErrorCode::BufferEmpty,
            FrameError::InvalidChecksum | FrameError::InvalidFrame => ErrorCode::ParameterInvalid,
        }
    }
}

/// One-byte tag naming a frame kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FrameIdentifier {
    Raw = 0,
    Packet = 1,
    BinaryMessage = 2,
    AsciiMessage = 3,
    CanMessage = 4,
}

impl TryFrom<u8> for FrameIdentifier {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameIdentifier::Raw),
            1 => Ok(FrameIdentifier::Packet),
            2 => Ok(FrameIdentifier::BinaryMessage),
            3 => Ok(FrameIdentifier::AsciiMessage),
            4 => Ok(FrameIdentifier::CanMessage),
            _ => Err(FrameError::InvalidFrame),
        }
    }
}

/// A serializable frame
pub trait Frame {
    /// Kind of this frame
    fn identifier(&self) -> FrameIdentifier;

    /// Number of bytes [`Frame::encode`] appends
    fn encoded_len(&self) -> usize;

    /// Append the serialized frame to `out`
    ///
    /// On error `out` is left as it was.
    fn encode(&self, out: &mut FrameBuffer) -> Result<(), FrameError>;

    /// Serialize into a fresh buffer
    fn to_buffer(&self) -> Result<FrameBuffer, FrameError> {
        let mut out = FrameBuffer::new();
        self.encode(&mut out)?;
        Ok(out)
    }
}

impl<F: Frame + ?Sized> Frame for &F {
    fn identifier(&self) -> FrameIdentifier {
        (**self).identifier()
    }

    fn encoded_len(&self) -> usize {
        (**self).encoded_len()
    }

    fn encode(&self, out: &mut FrameBuffer) -> Result<(), FrameError> {
        (**self).encode(out)
    }
}

/// Uninterpreted bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawFrame<'a> {
    pub bytes: &'a [u8],
}

impl<'a> RawFrame<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}

impl Frame for RawFrame<'_> {
    fn identifier(&self) -> FrameIdentifier {
        FrameIdentifier::Raw
    }

    fn encoded_len(&self) -> usize {
        self.bytes.len()
    }

    fn encode(&self, out: &mut FrameBuffer) -> Result<(), FrameError> {
        out.append(self.bytes)?;
        Ok(())
    }
}
