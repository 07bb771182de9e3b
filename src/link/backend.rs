//! Platform link control
//!
//! [`LinkControl`] starts things (association, access point); outcomes come
//! back later as [`LinkEvent`]s on the channel the back-end was built with.
//! The Linux back-end drives NetworkManager (`nmcli`), `ip` and `iw`.

use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::events::{parse_iw_event, LinkEvent};
use super::LinkError;
use crate::wireless::{WirelessError, WirelessInterface};

/// Credentials of the network to join in station mode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationCredentials {
    pub ssid: String,
    pub psk: String,
}

/// Soft access point parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPointSettings {
    pub ssid: String,
    pub psk: String,
    pub channel: u8,
}

#[async_trait]
pub trait LinkControl: Send + Sync {
    /// Fails with [`LinkError::NoInterface`] when no usable interface exists
    async fn check_interface(&self) -> Result<(), LinkError>;

    /// Start association attempt number `attempt`. Its outcome is reported
    /// as [`LinkEvent::AttemptResult`] carrying the same number.
    async fn connect(&self, attempt: u32) -> Result<(), LinkError>;

    async fn disconnect(&self) -> Result<(), LinkError>;

    /// Bring up the soft AP; station joins/leaves arrive as events
    async fn start_access_point(&self, settings: &AccessPointSettings) -> Result<(), LinkError>;
}

/// NetworkManager / iw back-end
pub struct CommandLink {
    interface: String,
    credentials: StationCredentials,
    events: mpsc::Sender<LinkEvent>,
    attempt_timeout: Duration,
    address_timeout: Duration,
}

impl CommandLink {
    pub fn new(interface: &str, credentials: StationCredentials, events: mpsc::Sender<LinkEvent>) -> Self {
        Self {
            interface: interface.to_string(),
            credentials,
            events,
            attempt_timeout: Duration::from_secs(10),
            address_timeout: Duration::from_secs(10),
        }
    }

    /// How long nmcli may spend on one activation before giving up
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Poll the interface operstate and report transitions
    pub fn spawn_operstate_watch(&self, period: Duration) -> JoinHandle<()> {
        let interface = self.interface.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let mut last: Option<bool> = None;
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let up = std::fs::read_to_string(format!("/sys/class/net/{}/operstate", interface))
                    .map(|s| matches!(s.trim(), "up" | "unknown" | "dormant"))
                    .unwrap_or(false);

                if last != Some(up) {
                    last = Some(up);
                    let event = if up { LinkEvent::InterfaceUp } else { LinkEvent::InterfaceDown };
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
            }
        })
    }

    /// Follow `iw event` and forward events for our interface
    pub fn spawn_iw_monitor(&self) -> Result<JoinHandle<()>, LinkError> {
        let mut child = Command::new("iw")
            .arg("event")
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| command_error("iw event", e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| command_error("iw event", "no stdout"))?;
        let interface = self.interface.clone();
        let events = self.events.clone();

        Ok(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(event) = parse_iw_event(&line, &interface) {
                            debug!("iw event: {:?}", event);
                            if events.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        warn!("iw event exited");
                        break;
                    }
                    Err(e) => {
                        error!("Failed reading iw event output: {}", e);
                        break;
                    }
                }
            }
            let _ = child.kill().await;
        }))
    }
}

#[async_trait]
impl LinkControl for CommandLink {
    async fn check_interface(&self) -> Result<(), LinkError> {
        let name = self.interface.clone();
        let found = tokio::task::spawn_blocking(move || WirelessInterface::get(&name))
            .await
            .map_err(|e| command_error("nl80211 lookup", e))?;

        match found {
            Ok(_) => Ok(()),
            Err(WirelessError::InterfaceNotFound(_)) | Err(WirelessError::NoInterface) => {
                Err(LinkError::NoInterface)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn connect(&self, attempt: u32) -> Result<(), LinkError> {
        let mut args = vec![
            "--wait".to_string(),
            self.attempt_timeout.as_secs().max(1).to_string(),
            "device".into(),
            "wifi".into(),
            "connect".into(),
            self.credentials.ssid.clone(),
        ];
        if !self.credentials.psk.is_empty() {
            args.push("password".into());
            args.push(self.credentials.psk.clone());
        }
        args.push("ifname".into());
        args.push(self.interface.clone());

        let interface = self.interface.clone();
        let events = self.events.clone();
        let address_timeout = self.address_timeout;
        info!("Connecting {} to {} (attempt {})", interface, self.credentials.ssid, attempt);

        // Association can take seconds; report the outcome as events
        tokio::spawn(async move {
            let status = Command::new("nmcli").args(&args).stdout(Stdio::null()).status().await;
            let (associated, reason) = match status {
                Ok(s) if s.success() => (true, 0),
                Ok(s) => (false, s.code().unwrap_or(1) as u16),
                Err(e) => {
                    error!("Failed to run nmcli: {}", e);
                    (false, 1)
                }
            };
            let event = LinkEvent::AttemptResult {
                attempt,
                associated,
                reason,
            };
            if events.send(event).await.is_err() || !associated {
                return;
            }

            let deadline = tokio::time::Instant::now() + address_timeout;
            while tokio::time::Instant::now() < deadline {
                if let Some(addr) = query_address(&interface).await {
                    let _ = events.send(LinkEvent::AddressBound { addr }).await;
                    return;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
            warn!("{} associated but no address within {:?}", interface, address_timeout);
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        run_command("nmcli", &["device", "disconnect", &self.interface]).await
    }

    async fn start_access_point(&self, settings: &AccessPointSettings) -> Result<(), LinkError> {
        let channel = settings.channel.to_string();
        let band = if settings.channel <= 14 { "bg" } else { "a" };
        run_command(
            "nmcli",
            &[
                "device", "wifi", "hotspot",
                "ifname", &self.interface,
                "ssid", &settings.ssid,
                "password", &settings.psk,
                "band", band,
                "channel", &channel,
            ],
        )
        .await?;
        info!("Access point {} up on {} channel {}", settings.ssid, self.interface, settings.channel);
        Ok(())
    }
}

async fn query_address(interface: &str) -> Option<IpAddr> {
    let output = Command::new("ip")
        .args(["-o", "-4", "addr", "show", "dev", interface])
        .output()
        .await
        .ok()?;
    parse_ip_addr(&String::from_utf8_lossy(&output.stdout))
}

/// First `inet` address in `ip -o addr` output
pub fn parse_ip_addr(output: &str) -> Option<IpAddr> {
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "inet" || token == "inet6" {
            let cidr = tokens.next()?;
            let addr = cidr.split('/').next()?;
            return addr.parse().ok();
        }
    }
    None
}

async fn run_command(program: &str, args: &[&str]) -> Result<(), LinkError> {
    debug!("exec {} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| command_error(program, e))?;

    if !output.status.success() {
        return Err(LinkError::Command {
            command: format!("{} {}", program, args.first().copied().unwrap_or_default()),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

fn command_error(command: &str, detail: impl std::fmt::Display) -> LinkError {
    LinkError::Command {
        command: command.to_string(),
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip_addr() {
        let out = "3: wlan0    inet 192.168.1.7/24 brd 192.168.1.255 scope global dynamic wlan0\\       valid_lft 86000sec";
        assert_eq!(parse_ip_addr(out), Some("192.168.1.7".parse().unwrap()));
        assert_eq!(parse_ip_addr(""), None);
        assert_eq!(parse_ip_addr("3: wlan0 inet"), None);
    }
}
