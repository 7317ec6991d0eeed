//! Reaction dispatch
//!
//! Fires the configured external reactions (route-kill command, generic
//! command, webhook notification) when a source is first blocked. Each
//! configured reaction detaches its own task from the capture loop: the
//! loop never waits for a reaction, receives no result from it, and keeps
//! sole ownership of its state. Reactions are best-effort notifications;
//! process termination ends in-flight tasks unconditionally.
//!
//! A failing or hanging reaction is logged individually and never prevents
//! or delays the others. No retry, no timeout.

use serde_json::json;
use std::net::Ipv4Addr;
use tokio::process::Command;
use tracing::warn;

use crate::config::{Config, Protocol};

/// Reaction sink invoked on the first threshold crossing of a source.
///
/// Trait seam so tests substitute a synchronous recording dispatcher.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, mode: Protocol, ip: Ipv4Addr, port: u16);
}

/// Production dispatcher firing the configured kill reactions.
pub struct KillReactions {
    kill_route: Option<String>,
    kill_run_cmd: Option<String>,
    kill_notify_url: Option<String>,
    client: Option<reqwest::Client>,
    handle: tokio::runtime::Handle,
}

impl KillReactions {
    pub fn from_config(config: &Config, handle: tokio::runtime::Handle) -> Self {
        let client = config.kill_notify_url.as_ref().map(|_| reqwest::Client::new());

        Self {
            kill_route: config.kill_route.clone(),
            kill_run_cmd: config.kill_run_cmd.clone(),
            kill_notify_url: config.kill_notify_url.clone(),
            client,
            handle,
        }
    }
}

impl Dispatcher for KillReactions {
    fn dispatch(&self, mode: Protocol, ip: Ipv4Addr, port: u16) {
        // One detached task per reaction: the capture loop never joins or
        // observes them, and a hanging reaction only delays its own
        // completion.
        if let Some(cmd) = self.kill_route.clone() {
            self.handle.spawn(async move {
                if let Err(e) = run_command(&cmd, mode, ip, port).await {
                    warn!("kill_route {:?} for {}:{} failed: {:#}", cmd, ip, port, e);
                }
            });
        }

        if let Some(cmd) = self.kill_run_cmd.clone() {
            self.handle.spawn(async move {
                if let Err(e) = run_command(&cmd, mode, ip, port).await {
                    warn!("kill_run_cmd {:?} for {}:{} failed: {:#}", cmd, ip, port, e);
                }
            });
        }

        if let (Some(url), Some(client)) = (self.kill_notify_url.clone(), self.client.clone()) {
            self.handle.spawn(async move {
                if let Err(e) = notify(&client, &url, mode, ip, port).await {
                    warn!("kill_notify_url {:?} for {}:{} failed: {:#}", url, ip, port, e);
                }
            });
        }
    }
}

/// Split a configured command line and append the reaction triple as
/// positional arguments: `<cmd> [preset args...] <mode> <ip> <port>`.
fn command_line(cmd: &str, mode: Protocol, ip: Ipv4Addr, port: u16) -> Option<(String, Vec<String>)> {
    let mut parts = cmd.split_whitespace();
    let program = parts.next()?.to_string();

    let mut args: Vec<String> = parts.map(String::from).collect();
    args.push(mode.mode_str().to_string());
    args.push(ip.to_string());
    args.push(port.to_string());

    Some((program, args))
}

/// Run an external reaction command and fail on a nonzero exit.
async fn run_command(cmd: &str, mode: Protocol, ip: Ipv4Addr, port: u16) -> anyhow::Result<()> {
    let (program, args) =
        command_line(cmd, mode, ip, port).ok_or_else(|| anyhow::anyhow!("empty command"))?;

    let status = Command::new(&program).args(&args).status().await?;
    if !status.success() {
        anyhow::bail!("command exited with {}", status);
    }

    Ok(())
}

/// POST the reaction triple as JSON to the configured webhook.
async fn notify(
    client: &reqwest::Client,
    url: &str,
    mode: Protocol,
    ip: Ipv4Addr,
    port: u16,
) -> anyhow::Result<()> {
    let payload = json!({
        "mode": mode.mode_str(),
        "ip": ip.to_string(),
        "port": port,
    });

    let resp = client.post(url).json(&payload).send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("webhook returned {}", resp.status());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_appends_triple() {
        let (program, args) =
            command_line("/sbin/route add", Protocol::Tcp, Ipv4Addr::new(10, 0, 0, 5), 9999)
                .unwrap();

        assert_eq!(program, "/sbin/route");
        assert_eq!(args, vec!["add", "tcp", "10.0.0.5", "9999"]);
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(command_line("   ", Protocol::Udp, Ipv4Addr::new(1, 2, 3, 4), 1).is_none());
    }

    #[tokio::test]
    async fn test_slow_reaction_does_not_delay_others() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::{Duration, Instant};

        let dir = std::env::temp_dir();
        let marker = dir.join(format!("portguard-react-marker-{}", std::process::id()));
        let _ = std::fs::remove_file(&marker);

        let write_script = |name: &str, body: &str| {
            let path = dir.join(format!("portguard-react-{}-{}", name, std::process::id()));
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        };

        let slow = write_script("slow", "#!/bin/sh\nsleep 5\n");
        let fast = write_script("fast", &format!("#!/bin/sh\ntouch {}\n", marker.display()));

        let config = Config {
            kill_route: Some(slow.display().to_string()),
            kill_run_cmd: Some(fast.display().to_string()),
            ..Config::default()
        };
        let reactions = KillReactions::from_config(&config, tokio::runtime::Handle::current());

        let start = Instant::now();
        reactions.dispatch(Protocol::Tcp, Ipv4Addr::new(10, 0, 0, 5), 9999);

        // The marker must appear while the route-kill is still sleeping.
        while !marker.exists() {
            assert!(
                start.elapsed() < Duration::from_secs(2),
                "kill_run_cmd held up behind kill_route"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let _ = std::fs::remove_file(&marker);
        let _ = std::fs::remove_file(&slow);
        let _ = std::fs::remove_file(&fast);
    }

    #[tokio::test]
    async fn test_run_command_reports_exit_status() {
        let ip = Ipv4Addr::new(10, 0, 0, 5);
        assert!(run_command("true", Protocol::Tcp, ip, 80).await.is_ok());
        assert!(run_command("false", Protocol::Tcp, ip, 80).await.is_err());
        assert!(run_command("/nonexistent/portguard-cmd", Protocol::Tcp, ip, 80)
            .await
            .is_err());
    }
}
