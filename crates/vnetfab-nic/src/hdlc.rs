//! POS OC-3's serial framing: Cisco HDLC with a 2-byte protocol field and
//! a trailing CRC-16/CCITT frame-check sequence, layered over the same
//! descriptor-ring transport every other profile uses.

use vnetfab_packet::hdlc_fcs;

/// Cisco HDLC protocol field for routed IPv4.
pub const HDLC_PROTO_IPV4: u16 = 0x0800;

/// Wraps `payload` in a 4-byte HDLC address/control/protocol header and
/// appends its FCS.
pub fn frame(payload: &[u8], protocol: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len() + 2);
    out.push(0x0F); // address: unicast
    out.push(0x00); // control
    out.extend_from_slice(&protocol.to_be_bytes());
    out.extend_from_slice(payload);
    let fcs = hdlc_fcs(&out);
    out.extend_from_slice(&fcs.to_le_bytes());
    out
}

/// Validates and strips an HDLC frame, returning `(protocol, payload)`.
pub fn deframe(data: &[u8]) -> Option<(u16, &[u8])> {
    if data.len() < 6 {
        return None;
    }
    let body = &data[..data.len() - 2];
    let expected = u16::from_le_bytes(data[data.len() - 2..].try_into().unwrap());
    if hdlc_fcs(body) != expected {
        return None;
    }
    let protocol = u16::from_be_bytes([body[2], body[3]]);
    Some((protocol, &body[4..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_then_deframe_round_trips() {
        let payload = b"routed packet payload";
        let wire = frame(payload, HDLC_PROTO_IPV4);
        let (protocol, out) = deframe(&wire).expect("valid frame");
        assert_eq!(protocol, HDLC_PROTO_IPV4);
        assert_eq!(out, payload);
    }

    #[test]
    fn corrupted_fcs_is_rejected() {
        let mut wire = frame(b"x", HDLC_PROTO_IPV4);
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        assert!(deframe(&wire).is_none());
    }
}
