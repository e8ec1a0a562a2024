//! ASCII command lines
//!
//! Line format:
//! ```text
//! NAME KEY1=VALUE1 KEY2=VALUE2 ...\n
//! ```
//!
//! Tokens are separated by whitespace, keys from values by `=`. A token
//! without `=` is a flag with an empty value. On a byte stream the newline
//! ends the frame; inside a packet the payload is the whole line and the
//! newline is optional.

use core::fmt::Write;
use core::str::FromStr;

use heapless::{String, Vec};
use kestrel_hal::ErrorCode;

use crate::frame::{Frame, FrameBuffer, FrameError, FrameIdentifier};
use crate::handler::{FrameHandler, ParseResult};

/// Longest line accepted or produced, newline excluded
pub const MAX_ASCII_LINE: usize = 128;

/// Most parameters one line may carry
pub const MAX_ASCII_PARAMS: usize = 12;

/// One `KEY=VALUE` token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AsciiParam<'a> {
    pub key: &'a str,
    pub value: &'a str,
}

/// A parsed line borrowing from the receive buffer
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AsciiMessage<'a> {
    name: &'a str,
    params: Vec<AsciiParam<'a>, MAX_ASCII_PARAMS>,
}

impl<'a> AsciiMessage<'a> {
    /// Parse one line; a trailing `\n` or `\r\n` is ignored
    pub fn parse(line: &'a [u8]) -> Result<Self, FrameError> {
        let text = core::str::from_utf8(line).map_err(|_| FrameError::InvalidFrame)?;
        let mut tokens = text.split_ascii_whitespace();
        let name = tokens.next().ok_or(FrameError::InvalidFrame)?;

        let mut params = Vec::new();
        for token in tokens {
            let (key, value) = token.split_once('=').unwrap_or((token, ""));
            if key.is_empty() {
                return Err(FrameError::InvalidFrame);
            }
            params
                .push(AsciiParam { key, value })
                .map_err(|_| FrameError::PayloadTooLarge)?;
        }

        Ok(Self { name, params })
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn params(&self) -> &[AsciiParam<'a>] {
        &self.params
    }

    /// Raw value of `key`
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.params.iter().find(|p| p.key == key).map(|p| p.value)
    }

    /// Value of `key` parsed as `T`; `None` if missing or malformed
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key)?.parse().ok()
    }

    /// Check for a key, with or without a value
    pub fn has(&self, key: &str) -> bool {
        self.params.iter().any(|p| p.key == key)
    }
}

impl Frame for AsciiMessage<'_> {
    fn identifier(&self) -> FrameIdentifier {
        FrameIdentifier::AsciiMessage
    }

    fn encoded_len(&self) -> usize {
        let params: usize = self
            .params
            .iter()
            .map(|p| 1 + p.key.len() + if p.value.is_empty() { 0 } else { 1 + p.value.len() })
            .sum();
        self.name.len() + params + 1
    }

    fn encode(&self, out: &mut FrameBuffer) -> Result<(), FrameError> {
        if out.free() < self.encoded_len() {
            return Err(FrameError::BufferTooSmall);
        }
        out.append(self.name.as_bytes())?;
        for param in &self.params {
            out.push(b' ')?;
            out.append(param.key.as_bytes())?;
            if !param.value.is_empty() {
                out.push(b'=')?;
                out.append(param.value.as_bytes())?;
            }
        }
        out.push(b'\n')?;
        Ok(())
    }
}

/// Outgoing line built by a handler
///
/// Starts out carrying the request's name. Parameters are formatted with
/// `Display`; one that does not fit is left out entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsciiResponse {
    line: String<MAX_ASCII_LINE>,
}

impl AsciiResponse {
    pub fn new(name: &str) -> Self {
        let mut response = Self { line: String::new() };
        response.reset(name);
        response
    }

    /// Discard everything and start a line named `name`
    pub fn reset(&mut self, name: &str) {
        self.line.clear();
        let _ = self.line.push_str(name);
    }

    /// Append ` key=value`
    pub fn param(&mut self, key: &str, value: impl core::fmt::Display) -> Result<(), FrameError> {
        let mark = self.line.len();
        if write!(self.line, " {}={}", key, value).is_err() {
            self.line.truncate(mark);
            return Err(FrameError::PayloadTooLarge);
        }
        Ok(())
    }

    /// Append a bare ` flag`
    pub fn flag(&mut self, key: &str) -> Result<(), FrameError> {
        let mark = self.line.len();
        if self.line.push(' ').is_err() || self.line.push_str(key).is_err() {
            self.line.truncate(mark);
            return Err(FrameError::PayloadTooLarge);
        }
        Ok(())
    }

    /// The line so far, without newline
    pub fn as_str(&self) -> &str {
        &self.line
    }
}

impl Frame for AsciiResponse {
    fn identifier(&self) -> FrameIdentifier {
        FrameIdentifier::AsciiMessage
    }

    fn encoded_len(&self) -> usize {
        self.line.len() + 1
    }

    fn encode(&self, out: &mut FrameBuffer) -> Result<(), FrameError> {
        if out.free() < self.encoded_len() {
            return Err(FrameError::BufferTooSmall);
        }
        out.append(self.line.as_bytes())?;
        out.push(b'\n')?;
        Ok(())
    }
}

/// Handles lines with one name
pub trait AsciiMessageHandler {
    fn name(&self) -> &str;

    /// Handle `message`; return true to send `response`
    fn handle(&mut self, message: &AsciiMessage<'_>, response: &mut AsciiResponse) -> bool;
}

/// Routes lines to handlers by name
pub struct AsciiDispatcher<'a, const N: usize> {
    handlers: Vec<&'a mut dyn AsciiMessageHandler, N>,
    newline_delimited: bool,
}

impl<'a, const N: usize> AsciiDispatcher<'a, N> {
    /// Dispatcher for a byte stream; each line ends with `\n`
    pub const fn new() -> Self {
        Self {
            handlers: Vec::new(),
            newline_delimited: true,
        }
    }

    /// Dispatcher for an enclosing frame that already delimits the line
    pub const fn datagram() -> Self {
        Self {
            handlers: Vec::new(),
            newline_delimited: false,
        }
    }

    pub fn register(&mut self, handler: &'a mut dyn AsciiMessageHandler) -> Result<(), ErrorCode> {
        self.handlers.push(handler).map_err(|_| ErrorCode::BufferFull)
    }

    /// Find the end of the first line: (line, bytes to consume)
    fn split_line<'b>(&self, bytes: &'b [u8]) -> Option<(&'b [u8], usize)> {
        if !self.newline_delimited {
            let line = bytes.strip_suffix(b"\n").unwrap_or(bytes);
            return Some((line, bytes.len()));
        }
        let end = bytes.iter().position(|&b| b == b'\n')?;
        Some((&bytes[..end], end + 1))
    }
}

impl<const N: usize> Default for AsciiDispatcher<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameHandler for AsciiDispatcher<'_, N> {
    fn frame_identifier(&self) -> FrameIdentifier {
        FrameIdentifier::AsciiMessage
    }

    fn parse_frame(&mut self, bytes: &[u8], response: &mut FrameBuffer) -> ParseResult {
        if bytes.is_empty() {
            return ParseResult::mid_frame();
        }
        let Some((line, consumed)) = self.split_line(bytes) else {
            if bytes.len() > MAX_ASCII_LINE {
                debug!("no newline within {} bytes", MAX_ASCII_LINE);
                return ParseResult::invalid(bytes.len());
            }
            return ParseResult::mid_frame();
        };

        let message = match AsciiMessage::parse(line) {
            Ok(message) => message,
            Err(_) => return ParseResult::invalid(consumed),
        };
        let Some(handler) = self
            .handlers
            .iter_mut()
            .find(|h| h.name() == message.name())
        else {
            return ParseResult::unsupported(consumed);
        };

        let mut reply = AsciiResponse::new(message.name());
        if handler.handle(&message, &mut reply) && reply.encode(response).is_err() {
            warn!("ascii response does not fit");
        }
        ParseResult::found(consumed)
    }
}

/// Inertial sample sent as `IMU ax=.. ay=.. az=.. gx=.. gy=.. gz=..`
///
/// Each key is looked up in the field table on its own, so every axis lands
/// in its own field whatever order the keys arrive in.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImuMessage {
    pub ax: f32,
    pub ay: f32,
    pub az: f32,
    pub gx: f32,
    pub gy: f32,
    pub gz: f32,
}

impl ImuMessage {
    pub const NAME: &'static str = "IMU";

    /// Keys in the order they are written
    pub const FIELDS: [&'static str; 6] = ["ax", "ay", "az", "gx", "gy", "gz"];

    fn field_mut(&mut self, key: &str) -> Option<&mut f32> {
        match key {
            "ax" => Some(&mut self.ax),
            "ay" => Some(&mut self.ay),
            "az" => Some(&mut self.az),
            "gx" => Some(&mut self.gx),
            "gy" => Some(&mut self.gy),
            "gz" => Some(&mut self.gz),
            _ => None,
        }
    }

    fn field(&self, key: &str) -> Option<f32> {
        match key {
            "ax" => Some(self.ax),
            "ay" => Some(self.ay),
            "az" => Some(self.az),
            "gx" => Some(self.gx),
            "gy" => Some(self.gy),
            "gz" => Some(self.gz),
            _ => None,
        }
    }

    /// Read the sample out of a parsed line
    ///
    /// Missing axes stay zero; unknown keys are ignored; a value that is not
    /// a number rejects the line.
    pub fn from_message(message: &AsciiMessage<'_>) -> Result<Self, FrameError> {
        if message.name() != Self::NAME {
            return Err(FrameError::InvalidFrame);
        }
        let mut imu = Self::default();
        for param in message.params() {
            if let Some(slot) = imu.field_mut(param.key) {
                *slot = param.value.parse().map_err(|_| FrameError::InvalidFrame)?;
            }
        }
        Ok(imu)
    }

    /// Write the sample as a response line
    pub fn to_response(&self) -> Result<AsciiResponse, FrameError> {
        let mut response = AsciiResponse::new(Self::NAME);
        for key in Self::FIELDS {
            let value = self.field(key).unwrap_or_default();
            response.param(key, value)?;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl AsciiMessageHandler for Echo {
        fn name(&self) -> &str {
            "ECHO"
        }

        fn handle(&mut self, message: &AsciiMessage<'_>, response: &mut AsciiResponse) -> bool {
            for p in message.params() {
                let _ = response.param(p.key, p.value);
            }
            true
        }
    }

    #[test]
    fn test_parse_line() {
        let msg = AsciiMessage::parse(b"SET speed=120 dir=cw verbose\r\n").unwrap();
        assert_eq!(msg.name(), "SET");
        assert_eq!(msg.get("dir"), Some("cw"));
        assert_eq!(msg.get_parsed::<u32>("speed"), Some(120));
        assert!(msg.has("verbose"));
        assert_eq!(msg.get("verbose"), Some(""));
        assert_eq!(msg.get("missing"), None);
    }

    #[test]
    fn test_parse_rejects_blank_and_bad_tokens() {
        assert_eq!(AsciiMessage::parse(b"   "), Err(FrameError::InvalidFrame));
        assert_eq!(AsciiMessage::parse(b"SET =5"), Err(FrameError::InvalidFrame));
        assert_eq!(AsciiMessage::parse(&[0xFF, 0xFE]), Err(FrameError::InvalidFrame));
    }

    #[test]
    fn test_message_encode_roundtrip() {
        let msg = AsciiMessage::parse(b"GO a=1 fast").unwrap();
        let bytes = msg.to_buffer().unwrap();
        assert_eq!(bytes.as_slice(), b"GO a=1 fast\n");
        assert_eq!(AsciiMessage::parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_stream_dispatch_waits_for_newline() {
        let mut echo = Echo;
        let mut dispatcher: AsciiDispatcher<'_, 2> = AsciiDispatcher::new();
        dispatcher.register(&mut echo).unwrap();
        let mut out = FrameBuffer::new();

        assert_eq!(dispatcher.parse_frame(b"ECHO x=1", &mut out), ParseResult::mid_frame());
        assert_eq!(
            dispatcher.parse_frame(b"ECHO x=1\nNEXT", &mut out),
            ParseResult::found(9)
        );
        assert_eq!(out.as_slice(), b"ECHO x=1\n");
    }

    #[test]
    fn test_unknown_name_unsupported() {
        let mut dispatcher: AsciiDispatcher<'_, 2> = AsciiDispatcher::new();
        let mut out = FrameBuffer::new();
        assert_eq!(
            dispatcher.parse_frame(b"NOPE\n", &mut out),
            ParseResult::unsupported(5)
        );
    }

    #[test]
    fn test_runaway_line_invalid() {
        let mut dispatcher: AsciiDispatcher<'_, 2> = AsciiDispatcher::new();
        let mut out = FrameBuffer::new();
        let junk = [b'x'; MAX_ASCII_LINE + 1];
        assert_eq!(
            dispatcher.parse_frame(&junk, &mut out),
            ParseResult::invalid(MAX_ASCII_LINE + 1)
        );
    }

    #[test]
    fn test_longest_line_still_waits_for_newline() {
        let mut dispatcher: AsciiDispatcher<'_, 2> = AsciiDispatcher::new();
        let mut out = FrameBuffer::new();
        let mut line = [b'x'; MAX_ASCII_LINE + 1];
        assert_eq!(
            dispatcher.parse_frame(&line[..MAX_ASCII_LINE], &mut out),
            ParseResult::mid_frame()
        );
        line[MAX_ASCII_LINE] = b'\n';
        assert_eq!(
            dispatcher.parse_frame(&line, &mut out),
            ParseResult::unsupported(MAX_ASCII_LINE + 1)
        );
    }

    #[test]
    fn test_datagram_needs_no_newline() {
        let mut echo = Echo;
        let mut dispatcher: AsciiDispatcher<'_, 2> = AsciiDispatcher::datagram();
        dispatcher.register(&mut echo).unwrap();
        let mut out = FrameBuffer::new();
        assert_eq!(dispatcher.parse_frame(b"ECHO", &mut out), ParseResult::found(4));
        assert_eq!(out.as_slice(), b"ECHO\n");
    }

    #[test]
    fn test_imu_axes_land_in_own_fields() {
        let msg = AsciiMessage::parse(b"IMU az=9.81 ax=0.5 ay=-1.25").unwrap();
        let imu = ImuMessage::from_message(&msg).unwrap();
        assert_eq!(imu.ax, 0.5);
        assert_eq!(imu.ay, -1.25);
        assert_eq!(imu.az, 9.81);
        assert_eq!(imu.gx, 0.0);
    }

    #[test]
    fn test_imu_bad_number_rejected() {
        let msg = AsciiMessage::parse(b"IMU ax=fast").unwrap();
        assert_eq!(ImuMessage::from_message(&msg), Err(FrameError::InvalidFrame));
    }

    #[test]
    fn test_imu_response_roundtrip() {
        let imu = ImuMessage {
            ax: 1.5,
            gz: -2.0,
            ..ImuMessage::default()
        };
        let response = imu.to_response().unwrap();
        let bytes = response.to_buffer().unwrap();
        let parsed = AsciiMessage::parse(&bytes).unwrap();
        assert_eq!(ImuMessage::from_message(&parsed).unwrap(), imu);
    }

    #[test]
    fn test_response_param_overflow_is_atomic() {
        let mut response = AsciiResponse::new("R");
        let long = [b'v'; MAX_ASCII_LINE];
        let long = core::str::from_utf8(&long).unwrap();
        assert_eq!(response.param("k", long), Err(FrameError::PayloadTooLarge));
        assert_eq!(response.as_str(), "R");
    }
}
