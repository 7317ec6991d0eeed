//! Configuration and policy predicates
//!
//! The [`Config`] struct is loaded once at startup (TOML file or defaults),
//! validated, extended with the local self-addresses, and then treated as
//! immutable by the capture loop. The policy predicates
//! ([`Config::is_excluded_port`], [`Config::is_ignored_source`]) are
//! read-only and side-effect free.

use anyhow::{Context, Result};
use ipnetwork::{IpNetwork, Ipv4Network};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use tracing::info;

/// Transport protocol a portguard process monitors. One per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Lowercase form passed as the first positional argument to reaction
    /// commands and encoded in notification payloads.
    pub fn mode_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

/// Validated runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Lowest destination port the sensor alarms on.
    #[serde(default)]
    pub min_port: u16,

    /// Highest destination port the sensor alarms on.
    #[serde(default = "default_max_port")]
    pub max_port: u16,

    /// Individual ports exempted from alarming.
    #[serde(default)]
    pub exclude_ports: HashSet<u16>,

    /// UDP ports with expected high background chatter (NetBIOS, mDNS, ...).
    #[serde(default)]
    pub noisy_udp_ports: HashSet<u16>,

    /// Source networks exempted from all detection. Extended once at startup
    /// with loopback and the local interface addresses.
    #[serde(default)]
    pub ignore_networks: Vec<IpNetwork>,

    /// Number of distinct ports a source may probe before being blocked;
    /// blocking occurs on the (trigger + 1)-th distinct port.
    #[serde(default)]
    pub scan_trigger: usize,

    /// External route-kill command, invoked as `<cmd> <mode> <ip> <port>`.
    #[serde(default)]
    pub kill_route: Option<String>,

    /// Generic external command, invoked with the same positional arguments.
    #[serde(default)]
    pub kill_run_cmd: Option<String>,

    /// Webhook URL notified with the (mode, ip, port) triple as JSON.
    #[serde(default)]
    pub kill_notify_url: Option<String>,

    /// Seconds a positive port-in-use verification stays cached.
    /// Zero or negative disables caching entirely.
    #[serde(default = "default_cache_duration")]
    pub cache_duration_secs: i64,

    /// Optional append-mode file for alarm lines.
    #[serde(default)]
    pub alarm_log: Option<PathBuf>,

    /// Optional append-mode file for blocked lines.
    #[serde(default)]
    pub blocked_log: Option<PathBuf>,

    /// Local address the port verification bind probes attach to. The raw
    /// capture socket always receives for the whole host.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: Ipv4Addr,
}

fn default_max_port() -> u16 {
    65535
}

fn default_cache_duration() -> i64 {
    120
}

fn default_listen_addr() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_port: 0,
            max_port: default_max_port(),
            exclude_ports: HashSet::new(),
            noisy_udp_ports: HashSet::new(),
            ignore_networks: Vec::new(),
            scan_trigger: 0,
            kill_route: None,
            kill_run_cmd: None,
            kill_notify_url: None,
            cache_duration_secs: default_cache_duration(),
            alarm_log: None,
            blocked_log: None,
            listen_addr: default_listen_addr(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or fall back to defaults.
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/portguard/config.toml"),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Reject configurations the capture loop cannot run with. An invalid
    /// notify URL or inverted port range terminates the process before the
    /// loop starts.
    pub fn validate(&self) -> Result<()> {
        if self.min_port > self.max_port {
            anyhow::bail!(
                "invalid port range [{}, {}]",
                self.min_port,
                self.max_port
            );
        }

        if let Some(url) = &self.kill_notify_url {
            reqwest::Url::parse(url)
                .with_context(|| format!("invalid kill_notify_url: {}", url))?;
        }

        Ok(())
    }

    /// True if the destination port falls outside the monitored range or is
    /// explicitly excluded.
    pub fn is_excluded_port(&self, port: u16) -> bool {
        port < self.min_port || port > self.max_port || self.exclude_ports.contains(&port)
    }

    /// True if the source address lies in any ignored network.
    pub fn is_ignored_source(&self, ip: Ipv4Addr) -> bool {
        let addr = IpAddr::V4(ip);
        self.ignore_networks.iter().any(|net| net.contains(addr))
    }

    /// Extend the ignore list with loopback and every local IPv4 interface
    /// address as a /32. Called exactly once at startup, before the config is
    /// handed to the capture loop; traffic from the host itself must never
    /// count as a scan.
    pub fn add_local_ignores(&mut self) -> Result<()> {
        let loopback = Ipv4Network::new(Ipv4Addr::new(127, 0, 0, 1), 8)
            .context("loopback network construction failed")?;
        self.ignore_networks.push(IpNetwork::V4(loopback));

        for iface in pnet::datalink::interfaces() {
            for net in &iface.ips {
                if let IpNetwork::V4(v4) = net {
                    let ip = v4.ip();
                    if self.is_ignored_source(ip) {
                        continue;
                    }
                    let host = Ipv4Network::new(ip, 32)
                        .with_context(|| format!("interface address {} rejected", ip))?;
                    self.ignore_networks.push(IpNetwork::V4(host));
                }
            }
        }

        Ok(())
    }

    /// Log the effective configuration at startup.
    pub fn echo(&self, mode: Protocol) {
        info!("portguard starting in {} mode", mode);
        info!("monitored port range [{}, {}]", self.min_port, self.max_port);

        let mut excluded: Vec<_> = self.exclude_ports.iter().copied().collect();
        excluded.sort_unstable();
        info!("excluded ports: {:?}", excluded);

        if mode == Protocol::Udp {
            let mut noisy: Vec<_> = self.noisy_udp_ports.iter().copied().collect();
            noisy.sort_unstable();
            info!("noisy UDP ports: {:?}", noisy);
        }

        for net in &self.ignore_networks {
            info!("ignoring source network {}", net);
        }

        info!("scan trigger: {}", self.scan_trigger);
        info!("kill route: {:?}", self.kill_route);
        info!("kill run cmd: {:?}", self.kill_run_cmd);
        info!("kill notify url: {:?}", self.kill_notify_url);
        info!("port cache duration: {}s", self.cache_duration_secs);
        info!("alarm log: {:?}", self.alarm_log);
        info!("blocked log: {:?}", self.blocked_log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.max_port, 65535);
        assert_eq!(parsed.cache_duration_secs, 120);
        assert_eq!(parsed.listen_addr, Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn test_excluded_port_respects_range_and_set() {
        let config = Config {
            min_port: 1024,
            max_port: 40000,
            exclude_ports: [8080].into_iter().collect(),
            ..Config::default()
        };

        assert!(config.is_excluded_port(80)); // below range
        assert!(config.is_excluded_port(50000)); // above range
        assert!(config.is_excluded_port(8080)); // explicit exclusion
        assert!(!config.is_excluded_port(22222));
    }

    #[test]
    fn test_ignored_source_cidr_containment() {
        let config = Config {
            ignore_networks: vec!["192.168.1.0/24".parse().unwrap()],
            ..Config::default()
        };

        assert!(config.is_ignored_source(Ipv4Addr::new(192, 168, 1, 77)));
        assert!(!config.is_ignored_source(Ipv4Addr::new(192, 168, 2, 77)));
    }

    #[test]
    fn test_validate_rejects_bad_url_and_range() {
        let config = Config {
            kill_notify_url: Some("not a url".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            min_port: 2000,
            max_port: 1000,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_from_toml_snippet() {
        let config: Config = toml::from_str(
            r#"
            min_port = 1
            max_port = 1024
            exclude_ports = [22, 80]
            noisy_udp_ports = [137, 5353]
            ignore_networks = ["10.0.0.0/8"]
            scan_trigger = 3
            kill_route = "/sbin/blackhole"
            "#,
        )
        .unwrap();

        assert_eq!(config.scan_trigger, 3);
        assert!(config.is_excluded_port(22));
        assert!(config.noisy_udp_ports.contains(&5353));
        assert!(config.is_ignored_source(Ipv4Addr::new(10, 1, 2, 3)));
        assert_eq!(config.kill_route.as_deref(), Some("/sbin/blackhole"));
    }
}
