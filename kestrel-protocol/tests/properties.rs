use kestrel_hal::LinkTx;
use kestrel_hal_host::MemoryLink;
use kestrel_protocol::{
    ComProtocol, Frame, FrameBuffer, FrameError, FrameHandler, Packet, PacketFrameHandler,
    ParseResult, ParseStatus, RawFrameHandler,
};
use proptest::prelude::*;

fn accept_all() -> RawFrameHandler<impl FnMut(&[u8], &mut FrameBuffer) -> bool> {
    RawFrameHandler::new(|_: &[u8], _: &mut FrameBuffer| true)
}

proptest! {
    #[test]
    fn test_packet_decode_inverts_encode(
        number in any::<u8>(),
        payload in proptest::collection::vec(any::<u8>(), 0..=256),
    ) {
        let bytes = Packet::new(number, &payload).unwrap().to_buffer().unwrap();
        prop_assert_eq!(bytes.len(), 5 + payload.len());

        let (packet, used) = Packet::decode(&bytes).unwrap();
        prop_assert_eq!(used, bytes.len());
        prop_assert_eq!(packet.number(), number);
        prop_assert_eq!(packet.payload(), &payload[..]);
    }

    /// Any single flipped bit in the CRC or payload is caught
    #[test]
    fn test_single_bit_flip_detected(
        payload in proptest::collection::vec(any::<u8>(), 1..=128),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut bytes = Packet::new(0, &payload).unwrap().to_buffer().unwrap().as_slice().to_vec();
        let index = 3 + position.index(bytes.len() - 3);
        bytes[index] ^= 1 << bit;

        prop_assert_eq!(Packet::decode(&bytes).err(), Some(FrameError::InvalidChecksum));
    }

    /// A packet is mid-frame on every strict prefix and found on the whole
    #[test]
    fn test_packet_parse_resumes_on_prefixes(
        payload in proptest::collection::vec(any::<u8>(), 0..=64),
    ) {
        let bytes = Packet::new(3, &payload).unwrap().to_buffer().unwrap();
        let mut handler = PacketFrameHandler::new(accept_all());
        let mut out = FrameBuffer::new();

        for end in 0..bytes.len() {
            let result = handler.parse_frame(&bytes[..end], &mut out);
            prop_assert_eq!(result.status, ParseStatus::MidFrame);
        }
        prop_assert_eq!(handler.parse_frame(&bytes, &mut out), ParseResult::found(bytes.len()));
    }

    /// Splitting a stream at arbitrary points never changes what is found
    #[test]
    fn test_chunked_stream_finds_every_packet(
        payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..=40), 1..8),
        cuts in proptest::collection::vec(1usize..16, 1..32),
    ) {
        let mut stream = Vec::new();
        for (i, payload) in payloads.iter().enumerate() {
            let packet = Packet::new(i as u8, payload).unwrap().to_buffer().unwrap();
            stream.extend_from_slice(&packet);
        }

        let (local, mut peer) = MemoryLink::pair();
        let mut protocol: ComProtocol<_, _, 512> =
            ComProtocol::new(local, PacketFrameHandler::new(accept_all()));

        let mut found = 0;
        let mut rest = &stream[..];
        for cut in cuts.iter().cycle() {
            if rest.is_empty() {
                break;
            }
            let (chunk, tail) = rest.split_at((*cut).min(rest.len()));
            peer.transmit_bytes(chunk, true).unwrap();
            let summary = protocol.poll().unwrap();
            prop_assert_eq!(summary.invalid, 0);
            found += summary.found;
            rest = tail;
        }

        prop_assert_eq!(found as usize, payloads.len());
        prop_assert!(protocol.pending().is_empty());
    }
}
