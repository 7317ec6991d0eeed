//! Per-source scan state
//!
//! Tracks the distinct destination ports each source IP has probed and
//! decides exactly when the scan threshold is crossed. State is created
//! lazily per source, grows monotonically, and is retained for the life of
//! the process: once blocked, always blocked.
//!
//! Only the capture loop mutates this table (single-writer invariant); a
//! future multi-loop extension must add a mutex or route mutations through
//! one owner.

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Result of recording one probe against the scan threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Duplicate or still-below-threshold probe; no transition.
    NotNew,
    /// Source crossed the threshold earlier; reactions already fired.
    AlreadyBlocked,
    /// This probe crossed the threshold. Fired at most once per source.
    FirstTrigger,
}

/// Bounded per-source record of distinct probed ports.
///
/// Each sequence holds at most `trigger + 1` entries and never contains a
/// duplicate port. A source is blocked iff its sequence is full.
#[derive(Debug)]
pub struct ScanStateEngine {
    trigger: usize,
    sources: HashMap<Ipv4Addr, Vec<u16>>,
}

impl ScanStateEngine {
    pub fn new(trigger: usize) -> Self {
        Self {
            trigger,
            sources: HashMap::new(),
        }
    }

    /// True iff this source has already crossed the threshold.
    ///
    /// Cheap; used by the capture loop to drop packets from known scanners
    /// before the expensive port verification runs.
    pub fn is_blocked(&self, ip: Ipv4Addr) -> bool {
        self.sources
            .get(&ip)
            .map_or(false, |ports| ports.len() > self.trigger)
    }

    /// Record a probed port for a source and report the threshold state.
    ///
    /// Returns [`ScanOutcome::FirstTrigger`] exactly on the transition that
    /// fills the sequence to `trigger + 1` distinct ports, so the caller
    /// fires reactions once per source.
    pub fn record(&mut self, ip: Ipv4Addr, port: u16) -> ScanOutcome {
        let capacity = self.trigger + 1;
        let ports = self
            .sources
            .entry(ip)
            .or_insert_with(|| Vec::with_capacity(capacity));

        if ports.len() >= capacity {
            return ScanOutcome::AlreadyBlocked;
        }

        if ports.contains(&port) {
            return ScanOutcome::NotNew;
        }

        ports.push(port);
        if ports.len() == capacity {
            ScanOutcome::FirstTrigger
        } else {
            ScanOutcome::NotNew
        }
    }

    /// Number of sources with any recorded state.
    pub fn tracked_sources(&self) -> usize {
        self.sources.len()
    }

    /// Distinct ports recorded for a source, if any.
    pub fn source_ports(&self, ip: Ipv4Addr) -> Option<&[u16]> {
        self.sources.get(&ip).map(|v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn test_trigger_zero_blocks_on_first_probe() {
        let mut engine = ScanStateEngine::new(0);
        assert!(!engine.is_blocked(src(5)));
        assert_eq!(engine.record(src(5), 9999), ScanOutcome::FirstTrigger);
        assert!(engine.is_blocked(src(5)));
        assert_eq!(engine.record(src(5), 9999), ScanOutcome::AlreadyBlocked);
    }

    #[test]
    fn test_duplicate_port_does_not_advance_state() {
        // trigger = 2, capacity = 3: probes 10, 20, 10, 30 give distinct
        // counts 1, 2, 2, 3 and the trigger fires on the fourth packet only.
        let mut engine = ScanStateEngine::new(2);
        assert_eq!(engine.record(src(1), 10), ScanOutcome::NotNew);
        assert_eq!(engine.record(src(1), 20), ScanOutcome::NotNew);
        assert_eq!(engine.record(src(1), 10), ScanOutcome::NotNew);
        assert!(!engine.is_blocked(src(1)));
        assert_eq!(engine.record(src(1), 30), ScanOutcome::FirstTrigger);
        assert!(engine.is_blocked(src(1)));
    }

    #[test]
    fn test_first_trigger_fires_at_most_once() {
        let mut engine = ScanStateEngine::new(1);
        let mut triggers = 0;
        for port in 0..50u16 {
            if engine.record(src(9), port) == ScanOutcome::FirstTrigger {
                triggers += 1;
            }
        }
        assert_eq!(triggers, 1);
    }

    #[test]
    fn test_sequence_bounded_and_distinct() {
        let trigger = 4;
        let mut engine = ScanStateEngine::new(trigger);
        for port in [5u16, 5, 6, 7, 8, 9, 10, 11, 6] {
            engine.record(src(3), port);
        }

        let ports = engine.source_ports(src(3)).unwrap();
        assert_eq!(ports.len(), trigger + 1);
        let mut deduped = ports.to_vec();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), ports.len());
    }

    #[test]
    fn test_sources_tracked_independently() {
        let mut engine = ScanStateEngine::new(0);
        assert_eq!(engine.record(src(1), 80), ScanOutcome::FirstTrigger);
        assert!(!engine.is_blocked(src(2)));
        assert_eq!(engine.record(src(2), 80), ScanOutcome::FirstTrigger);
        assert_eq!(engine.tracked_sources(), 2);
    }
}
