//! Messages exchanged between the simulated device and its host
//!
//! Both directions use binary messages in group [`GROUP_CONTROL`], carried in
//! packets. Values are big-endian `f32`.
//!
//! | message           | direction     | payload                         |
//! |-------------------|---------------|---------------------------------|
//! | `MSG_SETPOINT`    | host → device | setpoint                        |
//! | `MSG_SETPOINT`    | device → host | setpoint now in force           |
//! | `MSG_STATUS`      | device → host | setpoint, measurement, output   |

use std::cell::Cell;

use kestrel_core::ByteReader;
use kestrel_protocol::{BinaryMessage, BinaryMessageHandler, FrameError};

pub const GROUP_CONTROL: u16 = 0x0001;
pub const MSG_SETPOINT: u16 = 0x0001;
pub const MSG_STATUS: u16 = 0x0002;

/// One controller sample
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Status {
    pub setpoint: f32,
    pub measurement: f32,
    pub output: f32,
}

impl Status {
    pub fn to_message(&self) -> Result<BinaryMessage, FrameError> {
        let mut payload = [0u8; 12];
        payload[0..4].copy_from_slice(&self.setpoint.to_be_bytes());
        payload[4..8].copy_from_slice(&self.measurement.to_be_bytes());
        payload[8..12].copy_from_slice(&self.output.to_be_bytes());
        BinaryMessage::with_payload(GROUP_CONTROL, MSG_STATUS, &payload)
    }

    pub fn from_message(message: &BinaryMessage) -> Option<Self> {
        if !message.is(GROUP_CONTROL, MSG_STATUS) {
            return None;
        }
        let mut reader = ByteReader::new(&message.payload);
        Some(Self {
            setpoint: read_f32(&mut reader)?,
            measurement: read_f32(&mut reader)?,
            output: read_f32(&mut reader)?,
        })
    }
}

pub fn read_f32(reader: &mut ByteReader<'_>) -> Option<f32> {
    reader.read_u32_be().map(f32::from_bits)
}

pub fn setpoint_message(setpoint: f32) -> Result<BinaryMessage, FrameError> {
    BinaryMessage::with_payload(GROUP_CONTROL, MSG_SETPOINT, &setpoint.to_be_bytes())
}

/// Device-side handler: applies a new setpoint and echoes it
pub struct SetpointHandler<'a> {
    target: &'a Cell<f32>,
}

impl<'a> SetpointHandler<'a> {
    pub fn new(target: &'a Cell<f32>) -> Self {
        Self { target }
    }
}

impl BinaryMessageHandler for SetpointHandler<'_> {
    fn group_id(&self) -> u16 {
        GROUP_CONTROL
    }

    fn message_id(&self) -> u16 {
        MSG_SETPOINT
    }

    fn handle(&mut self, message: &BinaryMessage, response: &mut BinaryMessage) -> bool {
        let mut reader = ByteReader::new(&message.payload);
        let Some(value) = read_f32(&mut reader).filter(|v| v.is_finite()) else {
            log::warn!("setpoint message with bad payload ignored");
            return false;
        };
        self.target.set(value);
        log::info!("setpoint now {value}");
        response.payload.append(&value.to_be_bytes()).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        let status = Status {
            setpoint: 40.0,
            measurement: 39.5,
            output: -1.25,
        };
        let message = status.to_message().unwrap();
        assert_eq!(message.payload.len(), 12);
        assert_eq!(Status::from_message(&message), Some(status));
    }

    #[test]
    fn test_setpoint_handler_applies_and_echoes() {
        let target = Cell::new(0.0);
        let mut handler = SetpointHandler::new(&target);
        let request = setpoint_message(55.0).unwrap();
        let mut response = BinaryMessage::new(GROUP_CONTROL, MSG_SETPOINT);

        assert!(handler.handle(&request, &mut response));
        assert_eq!(target.get(), 55.0);
        assert_eq!(response.payload.as_slice(), &55.0f32.to_be_bytes());
    }

    #[test]
    fn test_setpoint_handler_rejects_short_or_nan() {
        let target = Cell::new(7.0);
        let mut handler = SetpointHandler::new(&target);
        let mut response = BinaryMessage::new(GROUP_CONTROL, MSG_SETPOINT);

        let short = BinaryMessage::with_payload(GROUP_CONTROL, MSG_SETPOINT, &[1, 2]).unwrap();
        assert!(!handler.handle(&short, &mut response));
        assert!(!handler.handle(&setpoint_message(f32::NAN).unwrap(), &mut response));
        assert_eq!(target.get(), 7.0);
    }
}
