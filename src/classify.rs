//! TCP scan-pattern classification
//!
//! Maps a TCP control-flag octet to a human-readable scan label used in
//! alarm messages. Classification never gates detection; a packet that
//! reaches the alarm stage is reported whatever its flags look like.

use std::fmt;

use crate::packet::{FIN, PSH, SYN, URG};

/// Scan type inferred from a TCP control-flag combination.
///
/// Returned by value; `Unknown` carries the raw flag octet for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    /// No flags set.
    Null,
    /// FIN, URG and PSH all set, other bits allowed.
    Xmas,
    /// Exactly SYN, nothing else.
    Syn,
    /// Any other combination; wraps the raw flag octet.
    Unknown(u8),
}

/// Classify a TCP control-flag octet.
///
/// Check order matters: NULL first, because an all-zero octet matches no
/// other rule; XMAS before SYN, because XMAS probes may carry bits outside
/// FIN/URG/PSH while the SYN rule requires the octet to equal SYN exactly.
pub fn classify(flags: u8) -> ScanType {
    if flags == 0 {
        ScanType::Null
    } else if flags & (FIN | URG | PSH) == FIN | URG | PSH {
        ScanType::Xmas
    } else if flags == SYN {
        ScanType::Syn
    } else {
        ScanType::Unknown(flags)
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanType::Null => write!(f, "TCP NULL scan"),
            ScanType::Xmas => write!(f, "TCP XMAS scan"),
            ScanType::Syn => write!(f, "TCP SYN/Normal scan"),
            ScanType::Unknown(flags) => write!(
                f,
                "Unknown Type: TCP Packet Flags(FIN,SYN,RST,PSH,ACK,URG): {}",
                flags
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{ACK, RST};

    #[test]
    fn test_null_scan() {
        assert_eq!(classify(0), ScanType::Null);
        assert_eq!(classify(0).to_string(), "TCP NULL scan");
    }

    #[test]
    fn test_xmas_scan() {
        assert_eq!(classify(FIN | URG | PSH), ScanType::Xmas);
        // Extra bits outside the XMAS triple still classify as XMAS.
        assert_eq!(classify(FIN | URG | PSH | SYN | RST), ScanType::Xmas);
    }

    #[test]
    fn test_syn_scan_requires_exact_match() {
        assert_eq!(classify(SYN), ScanType::Syn);
        assert_eq!(classify(SYN | ACK), ScanType::Unknown(SYN | ACK));
    }

    #[test]
    fn test_unknown_carries_raw_flags() {
        let label = classify(FIN | ACK).to_string();
        assert_eq!(
            label,
            format!(
                "Unknown Type: TCP Packet Flags(FIN,SYN,RST,PSH,ACK,URG): {}",
                FIN | ACK
            )
        );
    }
}
