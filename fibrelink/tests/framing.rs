use fibrelink::framing::{encode_packet, Deframer, EncodeError, MAX_PAYLOAD};
use fibrelink::sink::MemorySink;

fn encode(payload: &[u8]) -> Vec<u8> {
    let mut buf = [0u8; 2 * MAX_PAYLOAD];
    let mut out = MemorySink::new(&mut buf);
    encode_packet(payload, &mut out).unwrap();
    let written = out.written();
    buf[..written].to_vec()
}

fn decode(stream: &[u8]) -> Vec<Vec<u8>> {
    let mut deframer = Deframer::new();
    let mut packets = Vec::new();
    deframer.process_bytes(stream, &mut |payload| packets.push(payload.to_vec()));
    packets
}

#[test]
fn test_round_trip_all_sizes() {
    for len in [0usize, 1, 8, 63, MAX_PAYLOAD] {
        let payload: Vec<u8> = (0..len).map(|i| i as u8 ^ 0x5a).collect();
        let packets = decode(&encode(&payload));
        assert_eq!(packets, vec![payload]);
    }
}

#[test]
fn test_reference_vector() {
    let frame = encode(&[0x01, 0x02, 0x03]);
    assert_eq!(frame.len(), 8);
    assert_eq!(frame[0], 0xaa);
    assert_eq!(frame[1], 0x03);
    assert_eq!(&frame[3..6], &[0x01, 0x02, 0x03]);
    assert_eq!(decode(&frame), vec![vec![0x01, 0x02, 0x03]]);
}

#[test]
fn test_oversized_payload_rejected() {
    let payload = [0u8; MAX_PAYLOAD + 1];
    let mut buf = [0u8; 256];
    let mut out = MemorySink::new(&mut buf);
    assert_eq!(
        encode_packet(&payload, &mut out),
        Err(EncodeError::PayloadTooLong)
    );
    assert_eq!(out.written(), 0);
}

/// Any single-bit error in the CRC16-covered region drops the packet, and the
/// decoder is back in sync for the next frame.
#[test]
fn test_single_bit_corruption_detected() {
    let payload = [0x10u8, 0x20, 0x30, 0x40, 0x50];
    let frame = encode(&payload);
    let follow_up = encode(&[0x07, 0x08]);

    for byte in 3..frame.len() {
        for bit in 0..8 {
            let mut stream = frame.clone();
            stream[byte] ^= 1 << bit;
            stream.extend_from_slice(&follow_up);

            let packets = decode(&stream);
            assert_eq!(
                packets,
                vec![vec![0x07, 0x08]],
                "corruption at byte {byte} bit {bit} must only lose one packet"
            );
        }
    }
}

#[test]
fn test_resync_after_leading_garbage() {
    let frame = encode(&[0xde, 0xad]);
    let mut stream = vec![0x00, 0xff, 0xaa, 0x90, 0x01, 0x33];
    stream.extend_from_slice(&frame);
    assert_eq!(decode(&stream), vec![vec![0xde, 0xad]]);
}

#[test]
fn test_back_to_back_packets() {
    let mut stream = Vec::new();
    let payloads = [vec![1u8], vec![2u8, 3, 4], vec![], vec![0xaa; 16]];
    for payload in &payloads {
        stream.extend_from_slice(&encode(payload));
    }
    assert_eq!(decode(&stream), payloads.to_vec());
}
