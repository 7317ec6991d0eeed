//! Capture loop and detection pipeline
//!
//! One [`GuardLoop`] runs per process, bound to a single transport protocol.
//! It owns every piece of mutable detection state (scan state engine, port
//! verification cache) and is the only writer to them; reaction tasks only
//! ever receive copies of the (mode, ip, port) triple.
//!
//! Per-packet pipeline, in fixed order, any rejecting step ends processing:
//! parse, TCP RST/ACK drop, UDP noisy-port drop, excluded port, ignored
//! source, already blocked, port in use, alarm, threshold record (with
//! blocked log and reaction dispatch on the first crossing).

use anyhow::{Context, Result};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::Packet;
use pnet::transport::{
    ipv4_packet_iter, transport_channel, TransportChannelType, TransportReceiver, TransportSender,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::classify::classify;
use crate::config::{Config, Protocol};
use crate::packet::{TcpHeader, UdpHeader, ACK, RST};
use crate::react::Dispatcher;
use crate::sink::EventSink;
use crate::state::{ScanOutcome, ScanStateEngine};
use crate::verify::PortVerifier;

/// Sleep after a failed raw read, so a persistent read error cannot spin
/// into a tight error-log loop.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// One captured IPv4 packet: source address plus transport-layer bytes.
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub source: Ipv4Addr,
    pub payload: Vec<u8>,
}

/// Blocking producer of captured packets.
///
/// Trait seam so tests drive the pipeline with synthetic packets.
pub trait PacketSource: Send {
    fn next_packet(&mut self) -> crate::error::Result<RawPacket>;
}

/// Raw IPv4 socket filtered to one transport protocol.
pub struct RawSource {
    // The sender half is unused but keeps the channel open.
    _tx: TransportSender,
    rx: TransportReceiver,
}

impl RawSource {
    /// Open the raw socket. Requires CAP_NET_RAW; failure here is fatal,
    /// the process must not start half-blind.
    pub fn open(mode: Protocol) -> Result<Self> {
        let proto = match mode {
            Protocol::Tcp => IpNextHeaderProtocols::Tcp,
            Protocol::Udp => IpNextHeaderProtocols::Udp,
        };

        let (tx, rx) = transport_channel(4096, TransportChannelType::Layer3(proto))
            .context("failed to open raw socket (requires CAP_NET_RAW)")?;

        Ok(Self { _tx: tx, rx })
    }
}

impl PacketSource for RawSource {
    fn next_packet(&mut self) -> crate::error::Result<RawPacket> {
        let mut iter = ipv4_packet_iter(&mut self.rx);
        let (packet, _) = iter.next()?;

        Ok(RawPacket {
            source: packet.get_source(),
            payload: packet.payload().to_vec(),
        })
    }
}

/// Single-threaded detection pipeline with exclusively owned state.
pub struct GuardLoop {
    mode: Protocol,
    config: Config,
    verifier: PortVerifier,
    engine: ScanStateEngine,
    sink: Box<dyn EventSink>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl GuardLoop {
    pub fn new(
        mode: Protocol,
        config: Config,
        verifier: PortVerifier,
        sink: Box<dyn EventSink>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let engine = ScanStateEngine::new(config.scan_trigger);

        Self {
            mode,
            config,
            verifier,
            engine,
            sink,
            dispatcher,
        }
    }

    /// Read and process packets until the process terminates.
    ///
    /// Read errors are non-fatal: they are logged and the loop continues
    /// after a short backoff.
    pub fn run(&mut self, source: &mut dyn PacketSource) {
        loop {
            match source.next_packet() {
                Ok(packet) => self.process(packet.source, &packet.payload, Instant::now()),
                Err(e) => {
                    warn!("raw socket read failed: {}", e);
                    std::thread::sleep(READ_ERROR_BACKOFF);
                }
            }
        }
    }

    /// Run one packet through the pipeline. `now` is passed in explicitly
    /// so cache expiry is deterministic under test.
    pub fn process(&mut self, source: Ipv4Addr, payload: &[u8], now: Instant) {
        match self.mode {
            Protocol::Tcp => self.process_tcp(source, payload, now),
            Protocol::Udp => self.process_udp(source, payload, now),
        }
    }

    /// Scan state engine, read-only. Exposed for inspection and tests.
    pub fn engine(&self) -> &ScanStateEngine {
        &self.engine
    }

    fn process_tcp(&mut self, source: Ipv4Addr, payload: &[u8], now: Instant) {
        let tcp = match TcpHeader::parse(payload) {
            Ok(header) => header,
            Err(e) => {
                debug!("dropping packet from {}: {}", source, e);
                return;
            }
        };

        // RFC 793: a RST, and any segment carrying ACK, are responses a
        // closed or open port produces on its own; neither indicates a scan.
        if tcp.has_flag(RST) || tcp.has_flag(ACK) {
            return;
        }

        let label = classify(tcp.flags).to_string();
        self.inspect(source, tcp.destination, &label, now);
    }

    fn process_udp(&mut self, source: Ipv4Addr, payload: &[u8], now: Instant) {
        let udp = match UdpHeader::parse(payload) {
            Ok(header) => header,
            Err(e) => {
                debug!("dropping packet from {}: {}", source, e);
                return;
            }
        };

        // High-volume benign chatter (NetBIOS, mDNS, ...) never alarms.
        if self.config.noisy_udp_ports.contains(&udp.destination) {
            return;
        }

        self.inspect(source, udp.destination, "UDP scan", now);
    }

    /// Steps 4-9 of the pipeline, shared between protocols.
    fn inspect(&mut self, source: Ipv4Addr, port: u16, label: &str, now: Instant) {
        if self.config.is_excluded_port(port) {
            return;
        }

        if self.config.is_ignored_source(source) {
            return;
        }

        // Already handled; skip the expensive bind probe entirely.
        if self.engine.is_blocked(source) {
            return;
        }

        // Legitimate traffic to an open service.
        if self.verifier.is_port_in_use(port, now) {
            return;
        }

        self.sink.alarm(&format!(
            "attackalert: {} from host: {} to {} port: {}",
            label, source, self.mode, port
        ));

        if self.engine.record(source, port) == ScanOutcome::FirstTrigger {
            self.sink.blocked(&format!(
                "Host: {} Port: {} {} Blocked",
                source, port, self.mode
            ));
            self.dispatcher.dispatch(self.mode, source, port);
        }
    }
}
