//! Transport header decoding
//!
//! Decodes the raw transport-layer payload of a captured IPv4 packet into a
//! typed TCP or UDP header. Only the fields the detection pipeline needs are
//! extracted: ports and, for TCP, the control-flag octet. Checksums and
//! options are deliberately not validated.
//!
//! Buffers shorter than the fixed minimum header length (20 bytes TCP,
//! 8 bytes UDP) are rejected with [`GuardError::Malformed`] rather than
//! partially decoded.

use crate::error::{GuardError, Result};

/// TCP control-flag bits, low six bits of the flags octet (RFC 793).
pub const FIN: u8 = 0x01;
pub const SYN: u8 = 0x02;
pub const RST: u8 = 0x04;
pub const PSH: u8 = 0x08;
pub const ACK: u8 = 0x10;
pub const URG: u8 = 0x20;

/// Minimum TCP header length without options.
const TCP_MIN_LEN: usize = 20;
/// Offset of the flags octet within the TCP header.
const TCP_FLAGS_OFFSET: usize = 13;
/// Fixed UDP header length.
const UDP_LEN: usize = 8;

/// Decoded TCP header fields relevant to scan detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub source: u16,
    pub destination: u16,
    /// Raw control-flag octet; test with [`TcpHeader::has_flag`].
    pub flags: u8,
}

impl TcpHeader {
    /// Decode a TCP header from the transport payload of an IPv4 packet.
    ///
    /// Ports are read big-endian from bytes 0-1 and 2-3, the flag octet from
    /// its fixed offset. Returns [`GuardError::Malformed`] when fewer than
    /// 20 bytes are available.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < TCP_MIN_LEN {
            return Err(GuardError::Malformed {
                proto: "TCP",
                need: TCP_MIN_LEN,
                got: buf.len(),
            });
        }

        Ok(Self {
            source: u16::from_be_bytes([buf[0], buf[1]]),
            destination: u16::from_be_bytes([buf[2], buf[3]]),
            flags: buf[TCP_FLAGS_OFFSET],
        })
    }

    /// True if every bit of `mask` is set in the control-flag octet.
    pub fn has_flag(&self, mask: u8) -> bool {
        self.flags & mask == mask
    }
}

/// Decoded UDP header fields (RFC 768).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub source: u16,
    pub destination: u16,
    pub length: u16,
}

impl UdpHeader {
    /// Decode a UDP header from the transport payload of an IPv4 packet.
    ///
    /// Returns [`GuardError::Malformed`] when fewer than 8 bytes are
    /// available.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < UDP_LEN {
            return Err(GuardError::Malformed {
                proto: "UDP",
                need: UDP_LEN,
                got: buf.len(),
            });
        }

        Ok(Self {
            source: u16::from_be_bytes([buf[0], buf[1]]),
            destination: u16::from_be_bytes([buf[2], buf[3]]),
            length: u16::from_be_bytes([buf[4], buf[5]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp_bytes(src: u16, dst: u16, flags: u8) -> Vec<u8> {
        let mut b = vec![0u8; TCP_MIN_LEN];
        b[0..2].copy_from_slice(&src.to_be_bytes());
        b[2..4].copy_from_slice(&dst.to_be_bytes());
        b[TCP_FLAGS_OFFSET] = flags;
        b
    }

    #[test]
    fn test_tcp_parse_fields() {
        let hdr = TcpHeader::parse(&tcp_bytes(40123, 22, SYN)).unwrap();
        assert_eq!(hdr.source, 40123);
        assert_eq!(hdr.destination, 22);
        assert_eq!(hdr.flags, SYN);
        assert!(hdr.has_flag(SYN));
        assert!(!hdr.has_flag(ACK));
    }

    #[test]
    fn test_tcp_multi_flag_mask() {
        let hdr = TcpHeader::parse(&tcp_bytes(1, 2, FIN | URG | PSH | SYN)).unwrap();
        assert!(hdr.has_flag(FIN | URG | PSH));
        assert!(!hdr.has_flag(FIN | ACK));
    }

    #[test]
    fn test_tcp_truncated_is_malformed() {
        let err = TcpHeader::parse(&[0u8; 19]).unwrap_err();
        match err {
            GuardError::Malformed { proto, need, got } => {
                assert_eq!(proto, "TCP");
                assert_eq!(need, 20);
                assert_eq!(got, 19);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_udp_parse_fields() {
        let mut b = vec![0u8; UDP_LEN];
        b[0..2].copy_from_slice(&53000u16.to_be_bytes());
        b[2..4].copy_from_slice(&161u16.to_be_bytes());
        b[4..6].copy_from_slice(&8u16.to_be_bytes());

        let hdr = UdpHeader::parse(&b).unwrap();
        assert_eq!(hdr.source, 53000);
        assert_eq!(hdr.destination, 161);
        assert_eq!(hdr.length, 8);
    }

    #[test]
    fn test_udp_truncated_is_malformed() {
        assert!(matches!(
            UdpHeader::parse(&[0u8; 7]),
            Err(GuardError::Malformed { proto: "UDP", .. })
        ));
    }
}
