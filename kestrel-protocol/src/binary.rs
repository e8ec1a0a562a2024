//! Binary messages
//!
//! Message format (big-endian):
//! ```text
//! ┌──────────┬────────────┬──────────────┐
//! │ GROUP ID │ MESSAGE ID │ PAYLOAD      │
//! │ 2B       │ 2B         │ rest of frame│
//! └──────────┴────────────┴──────────────┘
//! ```
//!
//! A binary message carries no length of its own: it spans the whole frame
//! it sits in. Inside a packet that is the packet payload; as the outermost
//! layer it is everything buffered.

use heapless::Vec;
use kestrel_core::{ByteArray, ByteReader};
use kestrel_hal::ErrorCode;

use crate::frame::{Frame, FrameBuffer, FrameError, FrameIdentifier};
use crate::handler::{FrameHandler, ParseResult};

/// Size of the (group, message) header
pub const BINARY_HEADER_SIZE: usize = 4;

/// Largest binary message payload
pub const MAX_MESSAGE_PAYLOAD: usize = 256;

/// A binary message with its own copy of the payload
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BinaryMessage {
    group_id: u16,
    message_id: u16,
    /// Message body; handlers write responses here
    pub payload: ByteArray<MAX_MESSAGE_PAYLOAD>,
}

impl BinaryMessage {
    /// Empty message of the given kind
    pub fn new(group_id: u16, message_id: u16) -> Self {
        Self {
            group_id,
            message_id,
            payload: ByteArray::new(),
        }
    }

    /// Message of the given kind carrying a copy of `payload`
    pub fn with_payload(group_id: u16, message_id: u16, payload: &[u8]) -> Result<Self, FrameError> {
        let payload = ByteArray::from_slice(payload).map_err(|_| FrameError::PayloadTooLarge)?;
        Ok(Self {
            group_id,
            message_id,
            payload,
        })
    }

    /// Decode a message spanning all of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut reader = ByteReader::new(bytes);
        let group_id = reader.read_u16_be().ok_or(FrameError::Incomplete)?;
        let message_id = reader.read_u16_be().ok_or(FrameError::Incomplete)?;
        Self::with_payload(group_id, message_id, reader.rest())
    }

    pub fn group_id(&self) -> u16 {
        self.group_id
    }

    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    /// Check whether this is message `(group_id, message_id)`
    pub fn is(&self, group_id: u16, message_id: u16) -> bool {
        self.group_id == group_id && self.message_id == message_id
    }
}

impl Frame for BinaryMessage {
    fn identifier(&self) -> FrameIdentifier {
        FrameIdentifier::BinaryMessage
    }

    fn encoded_len(&self) -> usize {
        BINARY_HEADER_SIZE + self.payload.len()
    }

    fn encode(&self, out: &mut FrameBuffer) -> Result<(), FrameError> {
        if out.free() < self.encoded_len() {
            return Err(FrameError::BufferTooSmall);
        }
        out.append_u16_be(self.group_id)?;
        out.append_u16_be(self.message_id)?;
        out.append(&self.payload)?;
        Ok(())
    }
}

/// Handles one kind of binary message
pub trait BinaryMessageHandler {
    fn group_id(&self) -> u16;

    fn message_id(&self) -> u16;

    /// Handle `message`
    ///
    /// `response` arrives with the same group and message id and an empty
    /// payload. Return true to send it back.
    fn handle(&mut self, message: &BinaryMessage, response: &mut BinaryMessage) -> bool;
}

/// Routes binary messages to handlers by exact (group, message) pair
///
/// Holds up to `N` borrowed handlers, registered once at startup.
pub struct BinaryMessageDispatcher<'a, const N: usize> {
    handlers: Vec<&'a mut dyn BinaryMessageHandler, N>,
}

impl<'a, const N: usize> BinaryMessageDispatcher<'a, N> {
    pub const fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler; [`ErrorCode::BufferFull`] if all `N` slots are taken
    pub fn register(&mut self, handler: &'a mut dyn BinaryMessageHandler) -> Result<(), ErrorCode> {
        debug!(
            "binary handler for {}/{} registered",
            handler.group_id(),
            handler.message_id()
        );
        self.handlers.push(handler).map_err(|_| ErrorCode::BufferFull)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Run the matching handler; `None` if nothing matched
    ///
    /// The response is `Some` only if the handler asked for it to be sent.
    pub fn dispatch(&mut self, message: &BinaryMessage) -> Option<Option<BinaryMessage>> {
        let handler = self
            .handlers
            .iter_mut()
            .find(|h| message.is(h.group_id(), h.message_id()))?;
        let mut response = BinaryMessage::new(message.group_id(), message.message_id());
        Some(handler.handle(message, &mut response).then_some(response))
    }
}

impl<const N: usize> Default for BinaryMessageDispatcher<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameHandler for BinaryMessageDispatcher<'_, N> {
    fn frame_identifier(&self) -> FrameIdentifier {
        FrameIdentifier::BinaryMessage
    }

    fn parse_frame(&mut self, bytes: &[u8], response: &mut FrameBuffer) -> ParseResult {
        if bytes.len() < BINARY_HEADER_SIZE {
            return ParseResult::mid_frame();
        }
        let message = match BinaryMessage::decode(bytes) {
            Ok(message) => message,
            Err(_) => return ParseResult::invalid(bytes.len()),
        };

        match self.dispatch(&message) {
            None => {
                debug!(
                    "no handler for binary message {}/{}",
                    message.group_id(),
                    message.message_id()
                );
                ParseResult::unsupported(bytes.len())
            }
            Some(Some(reply)) => {
                if reply.encode(response).is_err() {
                    warn!("binary response {}/{} does not fit", reply.group_id(), reply.message_id());
                }
                ParseResult::found(bytes.len())
            }
            Some(None) => ParseResult::found(bytes.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replies with the request payload reversed
    struct Reverse {
        calls: u32,
    }

    impl BinaryMessageHandler for Reverse {
        fn group_id(&self) -> u16 {
            0x0001
        }

        fn message_id(&self) -> u16 {
            0x0002
        }

        fn handle(&mut self, message: &BinaryMessage, response: &mut BinaryMessage) -> bool {
            self.calls += 1;
            for &b in message.payload.iter().rev() {
                let _ = response.payload.push(b);
            }
            true
        }
    }

    /// Consumes messages silently
    struct Sink;

    impl BinaryMessageHandler for Sink {
        fn group_id(&self) -> u16 {
            0x0001
        }

        fn message_id(&self) -> u16 {
            0x0003
        }

        fn handle(&mut self, _: &BinaryMessage, _: &mut BinaryMessage) -> bool {
            false
        }
    }

    #[test]
    fn test_message_layout() {
        let msg = BinaryMessage::with_payload(0x1234, 0xABCD, &[9, 8]).unwrap();
        let bytes = msg.to_buffer().unwrap();
        assert_eq!(bytes.as_slice(), &[0x12, 0x34, 0xAB, 0xCD, 9, 8]);
        assert_eq!(BinaryMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_short_header_is_incomplete() {
        assert_eq!(BinaryMessage::decode(&[0x00, 0x01, 0x00]), Err(FrameError::Incomplete));
    }

    #[test]
    fn test_dispatch_by_exact_pair() {
        let mut reverse = Reverse { calls: 0 };
        let mut sink = Sink;
        let mut dispatcher: BinaryMessageDispatcher<'_, 4> = BinaryMessageDispatcher::new();
        dispatcher.register(&mut reverse).unwrap();
        dispatcher.register(&mut sink).unwrap();

        let mut out = FrameBuffer::new();
        let request = [0x00, 0x01, 0x00, 0x02, 1, 2, 3];
        assert_eq!(dispatcher.parse_frame(&request, &mut out), ParseResult::found(7));
        assert_eq!(out.as_slice(), &[0x00, 0x01, 0x00, 0x02, 3, 2, 1]);

        out.clear();
        let silent = [0x00, 0x01, 0x00, 0x03];
        assert_eq!(dispatcher.parse_frame(&silent, &mut out), ParseResult::found(4));
        assert!(out.is_empty());

        let unknown = [0x00, 0x02, 0x00, 0x02];
        assert_eq!(dispatcher.parse_frame(&unknown, &mut out), ParseResult::unsupported(4));
        drop(dispatcher);
        assert_eq!(reverse.calls, 1);
    }

    #[test]
    fn test_short_buffer_is_mid_frame() {
        let mut dispatcher: BinaryMessageDispatcher<'_, 1> = BinaryMessageDispatcher::new();
        let mut out = FrameBuffer::new();
        assert_eq!(dispatcher.parse_frame(&[0x00, 0x01], &mut out), ParseResult::mid_frame());
    }

    #[test]
    fn test_register_full() {
        let mut a = Sink;
        let mut b = Sink;
        let mut dispatcher: BinaryMessageDispatcher<'_, 1> = BinaryMessageDispatcher::new();
        dispatcher.register(&mut a).unwrap();
        assert_eq!(dispatcher.register(&mut b), Err(ErrorCode::BufferFull));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let big = [0u8; MAX_MESSAGE_PAYLOAD + 1];
        assert_eq!(
            BinaryMessage::with_payload(1, 1, &big),
            Err(FrameError::PayloadTooLarge)
        );
    }
}
