//! Kestrel Communication Protocol
//!
//! This crate turns a raw byte link into frames and frames into handler
//! calls. Layers nest: the outermost handler is fed the receive buffer and
//! each layer hands its payload to the one inside it.
//!
//! # Layering
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ ComProtocol        link  ⇄  rx buffer  ⇄  handler     │
//! ├──────────────────────────────────────────────────────┤
//! │ PacketFrameHandler  number │ length │ crc16 │ payload │
//! ├──────────────────────────────────────────────────────┤
//! │ BinaryMessageDispatcher │ AsciiDispatcher │ CanDispatcher │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Every parse pass returns one of four verdicts: a complete frame was
//! found, more bytes are needed, the bytes are malformed, or the frame is
//! well-formed but nobody handles it. The verdict also says how many bytes
//! the driver may discard, so a partial frame survives across polls.

#![no_std]
#![deny(unsafe_code)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod ascii;
pub mod binary;
pub mod can;
pub mod crc;
pub mod frame;
pub mod handler;
pub mod packet;
pub mod protocol;

pub use ascii::{AsciiDispatcher, AsciiMessage, AsciiMessageHandler, AsciiResponse, ImuMessage};
pub use binary::{BinaryMessage, BinaryMessageDispatcher, BinaryMessageHandler};
pub use can::{CanDispatcher, CanFilter, CanMessage, CanMessageHandler};
pub use crc::crc16_ccitt;
pub use frame::{Frame, FrameBuffer, FrameError, FrameIdentifier, RawFrame, MAX_FRAME_SIZE};
pub use handler::{FrameHandler, ParseResult, ParseStatus, RawFrameHandler};
pub use packet::{Packet, PacketConfig, PacketFrameHandler, PACKET_HEADER_SIZE};
pub use protocol::{ComProtocol, PollSummary, ProtocolStats};
