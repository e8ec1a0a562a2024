//! Frame handler interface
//!
//! A frame handler recognizes one frame kind at the front of a byte buffer.
//! Handlers nest: the packet handler strips its envelope and passes the
//! payload to an inner handler, which may be a dispatcher for binary, ASCII
//! or CAN messages.
//!
//! # Resumability
//!
//! `parse_frame` is called again with a longer buffer every time bytes
//! arrive. A handler must report [`ParseStatus::MidFrame`] and consume
//! nothing until it has seen a complete frame, and once a frame is complete
//! the verdict must not go back to `MidFrame`.

use crate::frame::{FrameBuffer, FrameError, FrameIdentifier};

/// Outcome of one parse attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseStatus {
    /// A complete frame was handled; any response was written
    FoundFrame,
    /// More bytes are needed; nothing was consumed
    MidFrame,
    /// Malformed bytes were discarded to resynchronize
    InvalidFrame,
    /// Well-formed frame with no matching handler
    UnsupportedFrame,
}

/// Parse status plus the number of leading bytes to discard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ParseResult {
    pub status: ParseStatus,
    pub consumed: usize,
}

impl ParseResult {
    pub const fn found(consumed: usize) -> Self {
        Self {
            status: ParseStatus::FoundFrame,
            consumed,
        }
    }

    pub const fn mid_frame() -> Self {
        Self {
            status: ParseStatus::MidFrame,
            consumed: 0,
        }
    }

    pub const fn invalid(consumed: usize) -> Self {
        Self {
            status: ParseStatus::InvalidFrame,
            consumed,
        }
    }

    pub const fn unsupported(consumed: usize) -> Self {
        Self {
            status: ParseStatus::UnsupportedFrame,
            consumed,
        }
    }
}

/// Recognizes and dispatches one frame kind
pub trait FrameHandler {
    /// Kind of frame this handler parses
    fn frame_identifier(&self) -> FrameIdentifier;

    /// Try to handle one frame at the front of `bytes`
    ///
    /// On [`ParseStatus::FoundFrame`] a response, if the frame produced one,
    /// has been appended to `response`. For any other status `response` is
    /// left untouched.
    fn parse_frame(&mut self, bytes: &[u8], response: &mut FrameBuffer) -> ParseResult;

    /// Cap the longest frame this handler will wait for
    ///
    /// The driver calls this with its receive buffer size. Handlers that
    /// learn a frame's length from a header reject longer frames as soon as
    /// the header is seen, instead of waiting for bytes that cannot fit.
    fn limit_frame_len(&mut self, _max_len: usize) {}

    /// Wrap an already-serialized inner frame for transmission
    ///
    /// Handlers without an envelope copy the bytes through unchanged.
    fn frame_outgoing(&mut self, inner: &[u8], out: &mut FrameBuffer) -> Result<(), FrameError> {
        out.append(inner)?;
        Ok(())
    }
}

impl<H: FrameHandler + ?Sized> FrameHandler for &mut H {
    fn frame_identifier(&self) -> FrameIdentifier {
        (**self).frame_identifier()
    }

    fn parse_frame(&mut self, bytes: &[u8], response: &mut FrameBuffer) -> ParseResult {
        (**self).parse_frame(bytes, response)
    }

    fn limit_frame_len(&mut self, max_len: usize) {
        (**self).limit_frame_len(max_len)
    }

    fn frame_outgoing(&mut self, inner: &[u8], out: &mut FrameBuffer) -> Result<(), FrameError> {
        (**self).frame_outgoing(inner, out)
    }
}

/// Handler that takes whatever is buffered as one raw frame
///
/// The callback sees the bytes, possibly none, and may append a response;
/// it returns whether the frame was understood. Useful as the payload handler of a
/// packet when the payload format is application-defined.
pub struct RawFrameHandler<F> {
    callback: F,
}

impl<F> RawFrameHandler<F>
where
    F: FnMut(&[u8], &mut FrameBuffer) -> bool,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> FrameHandler for RawFrameHandler<F>
where
    F: FnMut(&[u8], &mut FrameBuffer) -> bool,
{
    fn frame_identifier(&self) -> FrameIdentifier {
        FrameIdentifier::Raw
    }

    fn parse_frame(&mut self, bytes: &[u8], response: &mut FrameBuffer) -> ParseResult {
        let mark = response.len();
        if (self.callback)(bytes, response) {
            ParseResult::found(bytes.len())
        } else {
            response.truncate(mark);
            ParseResult::unsupported(bytes.len())
        }
    }
}
