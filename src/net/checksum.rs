//! Internet checksum (RFC 1071) over raw byte slices.

use std::net::Ipv4Addr;

/// 16-bit one's-complement checksum over `bytes`.
///
/// Bytes are summed as big-endian 16-bit words; an odd trailing byte is
/// treated as the high byte of a final word. Carries are folded back until
/// the sum fits in 16 bits, then the result is complemented.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = bytes.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// UDP checksum over the IPv4 pseudo-header, UDP header and payload.
///
/// The pseudo-header is source address, destination address, a zero byte,
/// protocol 17 and the UDP length. The UDP header is included with its
/// checksum field zeroed.
#[must_use]
pub fn udp_checksum(
    payload: &[u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
) -> u16 {
    let udp_len = (8 + payload.len()) as u16;

    let mut buf = Vec::with_capacity(12 + 8 + payload.len());
    buf.extend_from_slice(&src.octets());
    buf.extend_from_slice(&dst.octets());
    buf.push(0);
    buf.push(17);
    buf.extend_from_slice(&udp_len.to_be_bytes());

    buf.extend_from_slice(&src_port.to_be_bytes());
    buf.extend_from_slice(&dst_port.to_be_bytes());
    buf.extend_from_slice(&udp_len.to_be_bytes());
    buf.extend_from_slice(&[0, 0]);
    buf.extend_from_slice(payload);

    checksum(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1071_reference_vector() {
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(checksum(&data), 0x220d);
    }

    #[test]
    fn test_empty_slice() {
        assert_eq!(checksum(&[]), 0xFFFF);
    }

    #[test]
    fn test_odd_length_pads_with_zero() {
        // [0x12] pads to the word 0x1200.
        assert_eq!(checksum(&[0x12]), !0x1200);
        assert_eq!(checksum(&[0x12]), checksum(&[0x12, 0x00]));
    }

    #[test]
    fn test_verification_sums_to_zero() {
        // A buffer with its own checksum written in must verify to 0.
        let mut data = vec![0x45, 0x00, 0x00, 0x1c, 0xab, 0xcd, 0x40, 0x00, 0x40, 0x11];
        let sum = checksum(&data);
        data.extend_from_slice(&sum.to_be_bytes());
        assert_eq!(checksum(&data), 0);
    }

    #[test]
    fn test_udp_checksum_matches_pnet() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(8, 8, 8, 8);
        let payload = b"\x12\x34\x01\x00\x00\x01\x00\x00\x00\x00\x00\x00";

        let ours = udp_checksum(payload, src, dst, 40000, 53);

        let udp_len = 8 + payload.len();
        let mut udp = vec![0u8; udp_len];
        {
            let mut packet = pnet::packet::udp::MutableUdpPacket::new(&mut udp).unwrap();
            packet.set_source(40000);
            packet.set_destination(53);
            packet.set_length(udp_len as u16);
            packet.set_checksum(0);
            packet.set_payload(payload);
        }
        let packet = pnet::packet::udp::UdpPacket::new(&udp).unwrap();
        let theirs = pnet::packet::udp::ipv4_checksum(&packet, &src, &dst);

        assert_eq!(ours, theirs);
    }
}
