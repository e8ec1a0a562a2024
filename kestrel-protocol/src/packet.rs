//! Length + CRC packet envelope
//!
//! Packet format (all fields big-endian):
//! ```text
//! ┌────────┬────────┬────────┬─────────────────────┐
//! │ NUMBER │ LENGTH │ CRC16  │ PAYLOAD (inner frame)│
//! │ 1B     │ 2B     │ 2B     │ LENGTH bytes        │
//! └────────┴────────┴────────┴─────────────────────┘
//! ```
//!
//! NUMBER is a sequence number that wraps 255 → 0. LENGTH and CRC are
//! computed from the payload, never supplied by the caller. The CRC is
//! CRC-16/CCITT over the payload bytes only. The envelope does not care what
//! the payload is; [`PacketFrameHandler`] hands it to an inner handler.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use kestrel_core::ByteReader;

use crate::crc::crc16_ccitt;
use crate::frame::{Frame, FrameBuffer, FrameError, FrameIdentifier, MAX_FRAME_SIZE};
use crate::handler::{FrameHandler, ParseResult, ParseStatus};

/// Size of the packet header in bytes
pub const PACKET_HEADER_SIZE: usize = 5;

/// Largest payload that fits in one frame buffer
pub const MAX_PACKET_PAYLOAD: usize = MAX_FRAME_SIZE - PACKET_HEADER_SIZE;

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PacketHeader {
    pub number: u8,
    pub data_byte_count: u16,
    pub crc: u16,
}

impl PacketHeader {
    /// Read a header from the front of `bytes`, if all five bytes are there
    pub fn read(bytes: &[u8]) -> Option<Self> {
        let mut reader = ByteReader::new(bytes);
        Some(Self {
            number: reader.read_u8()?,
            data_byte_count: reader.read_u16_be()?,
            crc: reader.read_u16_be()?,
        })
    }

    /// Header plus payload length
    pub fn frame_len(&self) -> usize {
        PACKET_HEADER_SIZE + self.data_byte_count as usize
    }
}

/// A packet borrowing its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Packet<'a> {
    number: u8,
    data_byte_count: u16,
    crc: u16,
    payload: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Build a packet around `payload`, computing its length and CRC
    pub fn new(number: u8, payload: &'a [u8]) -> Result<Self, FrameError> {
        let data_byte_count =
            u16::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge)?;
        Ok(Self {
            number,
            data_byte_count,
            crc: crc16_ccitt(payload),
            payload,
        })
    }

    /// Decode one packet from the front of `bytes`
    ///
    /// Returns the packet and the number of bytes it occupies. Trailing bytes
    /// are left alone. [`FrameError::Incomplete`] means the prefix is valid
    /// so far but the packet is not all there yet.
    pub fn decode(bytes: &'a [u8]) -> Result<(Self, usize), FrameError> {
        let header = PacketHeader::read(bytes).ok_or(FrameError::Incomplete)?;
        let total = header.frame_len();
        let payload = bytes
            .get(PACKET_HEADER_SIZE..total)
            .ok_or(FrameError::Incomplete)?;

        if crc16_ccitt(payload) != header.crc {
            return Err(FrameError::InvalidChecksum);
        }

        let packet = Self {
            number: header.number,
            data_byte_count: header.data_byte_count,
            crc: header.crc,
            payload,
        };
        Ok((packet, total))
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn data_byte_count(&self) -> u16 {
        self.data_byte_count
    }

    pub fn crc(&self) -> u16 {
        self.crc
    }

    /// Serialized inner frame
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }
}

impl Frame for Packet<'_> {
    fn identifier(&self) -> FrameIdentifier {
        FrameIdentifier::Packet
    }

    fn encoded_len(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    fn encode(&self, out: &mut FrameBuffer) -> Result<(), FrameError> {
        let mark = out.len();
        let result = begin_packet(out).and_then(|_| {
            out.append(self.payload)?;
            finish_packet(out, mark, self.number)
        });
        if result.is_err() {
            out.truncate(mark);
        }
        result
    }
}

/// Reserve a packet header at the end of `out`; returns its offset
fn begin_packet(out: &mut FrameBuffer) -> Result<usize, FrameError> {
    Ok(out.reserve(PACKET_HEADER_SIZE)?)
}

/// Patch the header at `mark` to cover everything appended after it
fn finish_packet(out: &mut FrameBuffer, mark: usize, number: u8) -> Result<(), FrameError> {
    let payload_start = mark + PACKET_HEADER_SIZE;
    let payload = out
        .as_slice()
        .get(payload_start..)
        .ok_or(FrameError::InvalidFrame)?;
    let count = u16::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge)?;
    let crc = crc16_ccitt(payload);

    out.set(mark, number)?;
    out.patch_u16_be(mark + 1, count)?;
    out.patch_u16_be(mark + 3, crc)?;
    Ok(())
}

/// Packet layer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PacketConfig {
    /// Packets announcing a longer payload are rejected from the header alone
    pub max_payload: u16,
    /// Sequence number of the first outgoing packet
    pub initial_sequence: u8,
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            max_payload: MAX_PACKET_PAYLOAD as u16,
            initial_sequence: 0,
        }
    }
}

/// Frame handler for the packet envelope
///
/// Verifies length and CRC, hands the payload to `inner`, and wraps the
/// inner response in a packet carrying the next outgoing sequence number.
#[derive(Debug)]
pub struct PacketFrameHandler<H> {
    inner: H,
    config: PacketConfig,
    /// Longest payload accepted from the stream; at most `config.max_payload`
    accept_limit: u16,
    next_number: u8,
    last_received: Option<u8>,
}

impl<H: FrameHandler> PacketFrameHandler<H> {
    pub fn new(inner: H) -> Self {
        Self::with_config(inner, PacketConfig::default())
    }

    pub fn with_config(inner: H, config: PacketConfig) -> Self {
        Self {
            inner,
            next_number: config.initial_sequence,
            accept_limit: config.max_payload,
            config,
            last_received: None,
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut H {
        &mut self.inner
    }

    /// Sequence number the next outgoing packet will carry
    pub fn next_number(&self) -> u8 {
        self.next_number
    }

    /// Sequence number of the last packet accepted
    pub fn last_received(&self) -> Option<u8> {
        self.last_received
    }

    fn take_number(&mut self) -> u8 {
        let number = self.next_number;
        self.next_number = number.wrapping_add(1);
        number
    }

    /// Close the packet opened at `mark`, or drop it if nothing was written
    fn seal(&mut self, out: &mut FrameBuffer, mark: usize) {
        if out.len() <= mark + PACKET_HEADER_SIZE {
            out.truncate(mark);
            return;
        }
        if out.len() - mark - PACKET_HEADER_SIZE > self.config.max_payload as usize {
            warn!("response exceeds packet payload limit, dropped");
            out.truncate(mark);
            return;
        }
        let number = self.next_number;
        match finish_packet(out, mark, number) {
            Ok(()) => {
                self.take_number();
            }
            Err(_) => out.truncate(mark),
        }
    }
}

impl<H: FrameHandler> FrameHandler for PacketFrameHandler<H> {
    fn frame_identifier(&self) -> FrameIdentifier {
        FrameIdentifier::Packet
    }

    fn parse_frame(&mut self, bytes: &[u8], response: &mut FrameBuffer) -> ParseResult {
        let Some(header) = PacketHeader::read(bytes) else {
            return ParseResult::mid_frame();
        };
        if header.data_byte_count > self.accept_limit {
            debug!("packet length {} over limit", header.data_byte_count);
            return ParseResult::invalid(1);
        }

        let (packet, total) = match Packet::decode(bytes) {
            Ok(decoded) => decoded,
            Err(FrameError::Incomplete) => return ParseResult::mid_frame(),
            Err(_) => {
                debug!("packet {} failed crc check", header.number);
                return ParseResult::invalid(1);
            }
        };
        self.last_received = Some(packet.number());

        let mark = match begin_packet(response) {
            Ok(mark) => mark,
            Err(_) => return ParseResult::invalid(total),
        };
        let inner = self.inner.parse_frame(packet.payload(), response);
        match inner.status {
            ParseStatus::FoundFrame => {
                self.seal(response, mark);
                ParseResult::found(total)
            }
            ParseStatus::UnsupportedFrame => {
                response.truncate(mark);
                ParseResult::unsupported(total)
            }
            // An empty packet is well-formed; the inner layer just has nothing to read
            ParseStatus::MidFrame if packet.payload().is_empty() => {
                response.truncate(mark);
                ParseResult::unsupported(total)
            }
            // The payload is complete and CRC-valid; the inner frame will not grow
            ParseStatus::MidFrame | ParseStatus::InvalidFrame => {
                response.truncate(mark);
                ParseResult::invalid(total)
            }
        }
    }

    fn limit_frame_len(&mut self, max_len: usize) {
        let room = max_len.saturating_sub(PACKET_HEADER_SIZE);
        self.accept_limit = self
            .config
            .max_payload
            .min(u16::try_from(room).unwrap_or(u16::MAX));
        self.inner.limit_frame_len(room);
    }

    fn frame_outgoing(&mut self, inner: &[u8], out: &mut FrameBuffer) -> Result<(), FrameError> {
        if inner.len() > self.config.max_payload as usize {
            return Err(FrameError::PayloadTooLarge);
        }
        let mark = begin_packet(out)?;
        if let Err(err) = out.append(inner) {
            out.truncate(mark);
            return Err(err.into());
        }
        if let Err(err) = finish_packet(out, mark, self.next_number) {
            out.truncate(mark);
            return Err(err);
        }
        self.take_number();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::BinaryMessageDispatcher;
    use crate::handler::RawFrameHandler;

    fn ping_bytes() -> FrameBuffer {
        Packet::new(7, b"PING").unwrap().to_buffer().unwrap()
    }

    fn echo() -> RawFrameHandler<impl FnMut(&[u8], &mut FrameBuffer) -> bool> {
        RawFrameHandler::new(|bytes: &[u8], out: &mut FrameBuffer| out.append(bytes).is_ok())
    }

    #[test]
    fn test_ping_layout() {
        let bytes = ping_bytes();
        let crc = crc16_ccitt(b"PING").to_be_bytes();
        assert_eq!(
            bytes.as_slice(),
            &[0x07, 0x00, 0x04, crc[0], crc[1], 0x50, 0x49, 0x4E, 0x47]
        );
    }

    #[test]
    fn test_ping_decode() {
        let bytes = ping_bytes();
        let (packet, used) = Packet::decode(&bytes).unwrap();
        assert_eq!(used, 9);
        assert_eq!(packet.number(), 7);
        assert_eq!(packet.data_byte_count(), 4);
        assert_eq!(packet.payload(), b"PING");
    }

    #[test]
    fn test_truncated_ping_is_incomplete() {
        let bytes = ping_bytes();
        assert_eq!(Packet::decode(&bytes[..4]), Err(FrameError::Incomplete));
        assert_eq!(Packet::decode(&bytes[..8]), Err(FrameError::Incomplete));
    }

    #[test]
    fn test_corrupt_ping_fails_crc() {
        let mut bytes = ping_bytes();
        bytes[8] = b'H';
        assert_eq!(Packet::decode(&bytes), Err(FrameError::InvalidChecksum));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut bytes = ping_bytes();
        bytes.append(&[0xAA, 0xBB]).unwrap();
        let (_, used) = Packet::decode(&bytes).unwrap();
        assert_eq!(used, 9);
    }

    #[test]
    fn test_handler_wraps_response_with_sequence() {
        let mut handler = PacketFrameHandler::new(echo());
        let mut out = FrameBuffer::new();

        let result = handler.parse_frame(&ping_bytes(), &mut out);
        assert_eq!(result, ParseResult::found(9));
        assert_eq!(handler.last_received(), Some(7));

        let (reply, _) = Packet::decode(&out).unwrap();
        assert_eq!(reply.number(), 0);
        assert_eq!(reply.payload(), b"PING");
        assert_eq!(handler.next_number(), 1);
    }

    #[test]
    fn test_handler_crc_error_discards_one_byte() {
        let mut handler = PacketFrameHandler::new(echo());
        let mut bytes = ping_bytes();
        bytes[8] = b'H';
        let mut out = FrameBuffer::new();
        assert_eq!(handler.parse_frame(&bytes, &mut out), ParseResult::invalid(1));
        assert!(out.is_empty());
    }

    #[test]
    fn test_handler_rejects_oversized_length_from_header() {
        let config = PacketConfig {
            max_payload: 16,
            ..PacketConfig::default()
        };
        let mut handler = PacketFrameHandler::with_config(echo(), config);
        let mut out = FrameBuffer::new();
        // Announces 0x100 bytes; rejected before the payload arrives
        let header = [0x01, 0x01, 0x00, 0x00, 0x00];
        assert_eq!(handler.parse_frame(&header, &mut out), ParseResult::invalid(1));
    }

    #[test]
    fn test_inner_unsupported_consumes_packet() {
        let reject = RawFrameHandler::new(|_: &[u8], _: &mut FrameBuffer| false);
        let mut handler = PacketFrameHandler::new(reject);
        let mut out = FrameBuffer::new();
        assert_eq!(
            handler.parse_frame(&ping_bytes(), &mut out),
            ParseResult::unsupported(9)
        );
        assert!(out.is_empty());
        assert_eq!(handler.next_number(), 0);
    }

    #[test]
    fn test_no_response_keeps_sequence() {
        let silent = RawFrameHandler::new(|_: &[u8], _: &mut FrameBuffer| true);
        let mut handler = PacketFrameHandler::new(silent);
        let mut out = FrameBuffer::new();
        assert_eq!(handler.parse_frame(&ping_bytes(), &mut out), ParseResult::found(9));
        assert!(out.is_empty());
        assert_eq!(handler.next_number(), 0);
    }

    #[test]
    fn test_outgoing_sequence_wraps() {
        let config = PacketConfig {
            initial_sequence: 254,
            ..PacketConfig::default()
        };
        let mut handler = PacketFrameHandler::with_config(echo(), config);
        let mut numbers = heapless::Vec::<u8, 4>::new();
        for _ in 0..4 {
            let mut out = FrameBuffer::new();
            handler.frame_outgoing(b"x", &mut out).unwrap();
            numbers.push(out[0]).unwrap();
        }
        assert_eq!(numbers.as_slice(), &[254, 255, 0, 1]);
    }

    #[test]
    fn test_handler_accepts_empty_packet() {
        let mut handler = PacketFrameHandler::new(echo());
        let mut out = FrameBuffer::new();
        let bytes = Packet::new(9, &[]).unwrap().to_buffer().unwrap();

        assert_eq!(handler.parse_frame(&bytes, &mut out), ParseResult::found(5));
        assert_eq!(handler.last_received(), Some(9));
        // Echo of nothing: no response, no sequence number used
        assert!(out.is_empty());
        assert_eq!(handler.next_number(), 0);
    }

    #[test]
    fn test_empty_packet_without_inner_frame_is_unsupported() {
        let mut dispatcher: BinaryMessageDispatcher<'_, 1> = BinaryMessageDispatcher::new();
        let mut handler = PacketFrameHandler::new(&mut dispatcher);
        let mut out = FrameBuffer::new();
        let bytes = Packet::new(2, &[]).unwrap().to_buffer().unwrap();

        assert_eq!(
            handler.parse_frame(&bytes, &mut out),
            ParseResult::unsupported(5)
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_frame_limit_rejects_length_at_header() {
        let mut handler = PacketFrameHandler::new(echo());
        handler.limit_frame_len(64);
        let mut out = FrameBuffer::new();

        // 60 payload bytes need 65 in total
        let header = [0x01, 0x00, 60, 0x00, 0x00];
        assert_eq!(handler.parse_frame(&header, &mut out), ParseResult::invalid(1));
        let header = [0x01, 0x00, 59, 0x00, 0x00];
        assert_eq!(handler.parse_frame(&header, &mut out), ParseResult::mid_frame());

        // Outgoing packets keep the configured limit
        let mut out = FrameBuffer::new();
        handler.frame_outgoing(&[0u8; 100], &mut out).unwrap();
        assert_eq!(out.len(), 105);
    }

    #[test]
    fn test_empty_payload_packet() {
        let packet = Packet::new(3, &[]).unwrap();
        let bytes = packet.to_buffer().unwrap();
        assert_eq!(bytes.len(), PACKET_HEADER_SIZE);
        let (decoded, used) = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(used, 5);
    }
}
