//! CAN messages carried over a byte link
//!
//! Wire layout (big-endian):
//! ```text
//! ┌──────────────────────┬─────┬──────────┐
//! │ ID WORD              │ DLC │ DATA     │
//! │ 4B, bit 31 = ext id  │ 1B  │ DLC ≤ 8  │
//! └──────────────────────┴─────┴──────────┘
//! ```
//!
//! Handlers are selected with an acceptance filter: a message matches when
//! `(id & mask) == (filter_id & mask)` and the id widths agree.

use heapless::Vec;
use kestrel_core::ByteReader;
use kestrel_hal::ErrorCode;

use crate::frame::{Frame, FrameBuffer, FrameError, FrameIdentifier};
use crate::handler::{FrameHandler, ParseResult};

/// ID word + DLC
pub const CAN_HEADER_SIZE: usize = 5;

/// Classic CAN data length limit
pub const CAN_MAX_DATA: usize = 8;

/// Largest 11-bit identifier
pub const CAN_STANDARD_ID_MAX: u32 = 0x7FF;

/// Largest 29-bit identifier
pub const CAN_EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;

const EXTENDED_FLAG: u32 = 1 << 31;

/// A classic CAN data frame
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanMessage {
    id: u32,
    extended: bool,
    data: Vec<u8, CAN_MAX_DATA>,
}

impl CanMessage {
    /// Message with an 11-bit identifier
    pub fn standard(id: u16, data: &[u8]) -> Result<Self, ErrorCode> {
        Self::new(id as u32, false, data)
    }

    /// Message with a 29-bit identifier
    pub fn extended(id: u32, data: &[u8]) -> Result<Self, ErrorCode> {
        Self::new(id, true, data)
    }

    fn new(id: u32, extended: bool, data: &[u8]) -> Result<Self, ErrorCode> {
        let limit = if extended {
            CAN_EXTENDED_ID_MAX
        } else {
            CAN_STANDARD_ID_MAX
        };
        if id > limit {
            return Err(ErrorCode::ParameterInvalid);
        }
        let data = Vec::from_slice(data).map_err(|_| ErrorCode::ParameterInvalid)?;
        Ok(Self { id, extended, data })
    }

    /// Decode one message from the front of `bytes`; returns it and its size
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), FrameError> {
        let mut reader = ByteReader::new(bytes);
        let word = reader.read_u32_be().ok_or(FrameError::Incomplete)?;
        let dlc = reader.read_u8().ok_or(FrameError::Incomplete)? as usize;
        if dlc > CAN_MAX_DATA {
            return Err(FrameError::InvalidFrame);
        }
        let data = reader.take(dlc).ok_or(FrameError::Incomplete)?;

        let extended = word & EXTENDED_FLAG != 0;
        let message =
            Self::new(word & !EXTENDED_FLAG, extended, data).map_err(|_| FrameError::InvalidFrame)?;
        Ok((message, CAN_HEADER_SIZE + dlc))
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replace the data bytes
    pub fn set_data(&mut self, data: &[u8]) -> Result<(), ErrorCode> {
        self.data = Vec::from_slice(data).map_err(|_| ErrorCode::ParameterInvalid)?;
        Ok(())
    }
}

impl Frame for CanMessage {
    fn identifier(&self) -> FrameIdentifier {
        FrameIdentifier::CanMessage
    }

    fn encoded_len(&self) -> usize {
        CAN_HEADER_SIZE + self.data.len()
    }

    fn encode(&self, out: &mut FrameBuffer) -> Result<(), FrameError> {
        if out.free() < self.encoded_len() {
            return Err(FrameError::BufferTooSmall);
        }
        let flag = if self.extended { EXTENDED_FLAG } else { 0 };
        out.append_u32_be(self.id | flag)?;
        out.push(self.data.len() as u8)?;
        out.append(&self.data)?;
        Ok(())
    }
}

/// Acceptance filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanFilter {
    pub id: u32,
    pub mask: u32,
    pub extended: bool,
}

impl CanFilter {
    /// Match exactly one standard id
    pub const fn standard(id: u16) -> Self {
        Self {
            id: id as u32,
            mask: CAN_STANDARD_ID_MAX,
            extended: false,
        }
    }

    /// Match exactly one extended id
    pub const fn extended(id: u32) -> Self {
        Self {
            id,
            mask: CAN_EXTENDED_ID_MAX,
            extended: true,
        }
    }

    /// Same filter with a different mask
    pub const fn with_mask(self, mask: u32) -> Self {
        Self { mask, ..self }
    }

    pub fn matches(&self, message: &CanMessage) -> bool {
        self.extended == message.is_extended() && (message.id() & self.mask) == (self.id & self.mask)
    }
}

/// Handles messages accepted by its filter
pub trait CanMessageHandler {
    fn filter(&self) -> CanFilter;

    /// Handle `message`; return true to send `response`
    ///
    /// `response` arrives with the request's id and no data.
    fn handle(&mut self, message: &CanMessage, response: &mut CanMessage) -> bool;
}

/// Routes CAN messages to the first handler whose filter accepts them
pub struct CanDispatcher<'a, const N: usize> {
    handlers: Vec<&'a mut dyn CanMessageHandler, N>,
}

impl<'a, const N: usize> CanDispatcher<'a, N> {
    pub const fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn register(&mut self, handler: &'a mut dyn CanMessageHandler) -> Result<(), ErrorCode> {
        self.handlers.push(handler).map_err(|_| ErrorCode::BufferFull)
    }
}

impl<const N: usize> Default for CanDispatcher<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameHandler for CanDispatcher<'_, N> {
    fn frame_identifier(&self) -> FrameIdentifier {
        FrameIdentifier::CanMessage
    }

    fn parse_frame(&mut self, bytes: &[u8], response: &mut FrameBuffer) -> ParseResult {
        let (message, size) = match CanMessage::decode(bytes) {
            Ok(decoded) => decoded,
            Err(FrameError::Incomplete) => return ParseResult::mid_frame(),
            Err(_) => return ParseResult::invalid(1),
        };

        let Some(handler) = self
            .handlers
            .iter_mut()
            .find(|h| h.filter().matches(&message))
        else {
            trace!("no filter accepts can id {}", message.id());
            return ParseResult::unsupported(size);
        };

        let mut reply = CanMessage {
            id: message.id,
            extended: message.extended,
            data: Vec::new(),
        };
        if handler.handle(&message, &mut reply) && reply.encode(response).is_err() {
            warn!("can response does not fit");
        }
        ParseResult::found(size)
    }
}
