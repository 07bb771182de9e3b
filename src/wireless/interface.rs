//! Wireless Interface Management
//!
//! Uses nl80211 (via neli-wifi) for interface discovery and the `iw` / `ip`
//! commands for mode, channel and regulatory changes.

use std::process::Command;

use neli_wifi::Socket;
use thiserror::Error;
use tracing::{debug, info};

use super::ieee80211::MacAddr;

/// Wireless interface mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceMode {
    /// Standard managed mode (client)
    Managed,
    /// Monitor mode for passive capture
    Monitor,
    /// Access point mode
    Ap,
    /// Unknown/other mode
    Unknown,
}

impl InterfaceMode {
    fn as_str(&self) -> &'static str {
        match self {
            InterfaceMode::Managed => "managed",
            InterfaceMode::Monitor => "monitor",
            InterfaceMode::Ap => "__ap",
            InterfaceMode::Unknown => "managed",
        }
    }

    fn from_iw(s: &str) -> Self {
        match s {
            "managed" => InterfaceMode::Managed,
            "monitor" => InterfaceMode::Monitor,
            "AP" => InterfaceMode::Ap,
            _ => InterfaceMode::Unknown,
        }
    }
}

/// Wireless interface errors
#[derive(Debug, Error)]
pub enum WirelessError {
    #[error("socket error: {0}")]
    SocketError(String),

    #[error("nl80211 error: {0}")]
    Nl80211Error(String),

    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("no wireless interface present")]
    NoInterface,

    #[error("invalid channel: {0}")]
    InvalidChannel(u8),

    #[error("system error: {0}")]
    SystemError(String),
}

/// Wireless interface wrapper
#[derive(Debug, Clone)]
pub struct WirelessInterface {
    /// Interface name (wlan0, etc.)
    pub name: String,
    /// Interface index
    pub ifindex: i32,
    /// Physical device index
    pub wiphy: u32,
    /// Current mode
    pub mode: InterfaceMode,
    /// Current channel
    pub channel: Option<u8>,
    /// MAC address
    pub mac_addr: Option<MacAddr>,
}

impl WirelessInterface {
    /// List all wireless interfaces
    pub fn list() -> Result<Vec<Self>, WirelessError> {
        let mut socket = Socket::connect().map_err(|e| WirelessError::SocketError(e.to_string()))?;

        let interfaces = socket.get_interfaces_info()
            .map_err(|e| WirelessError::Nl80211Error(e.to_string()))?;

        let mut result = Vec::new();
        for iface in interfaces {
            let name = iface.name
                .map(|n| String::from_utf8_lossy(&n).trim_end_matches('\0').to_string())
                .unwrap_or_default();

            let mode = Self::query_mode(&name).unwrap_or(InterfaceMode::Unknown);

            result.push(Self {
                mac_addr: iface.mac.as_deref().and_then(MacAddr::from_slice),
                ifindex: iface.index.unwrap_or(0),
                wiphy: iface.phy.unwrap_or(0),
                channel: iface.channel.map(|c| c as u8),
                mode,
                name,
            });
        }

        Ok(result)
    }

    /// Get a specific interface by name
    pub fn get(name: &str) -> Result<Self, WirelessError> {
        Self::list()?
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| WirelessError::InterfaceNotFound(name.to_string()))
    }

    /// The named interface, or the first wireless interface when no name is given
    pub fn resolve(name: Option<&str>) -> Result<Self, WirelessError> {
        match name {
            Some(name) => Self::get(name),
            None => Self::list()?.into_iter().next().ok_or(WirelessError::NoInterface),
        }
    }

    fn query_mode(name: &str) -> Option<InterfaceMode> {
        let output = Command::new("iw").args(["dev", name, "info"]).output().ok()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .map(str::trim)
            .find_map(|line| line.strip_prefix("type "))
            .map(InterfaceMode::from_iw)
    }

    /// Set interface mode (requires root/CAP_NET_ADMIN)
    pub fn set_mode(&mut self, mode: InterfaceMode) -> Result<(), WirelessError> {
        if self.mode == mode {
            return Ok(());
        }

        set_link_state(&self.name, false)?;
        run("iw", &["dev", &self.name, "set", "type", mode.as_str()])?;
        set_link_state(&self.name, true)?;

        info!("Wi-Fi mode of {} set to {:?}", self.name, mode);
        self.mode = mode;
        Ok(())
    }

    /// Set channel (frequency)
    pub fn set_channel(&mut self, channel: u8) -> Result<(), WirelessError> {
        let freq = channel_to_freq(channel).ok_or(WirelessError::InvalidChannel(channel))?;
        run("iw", &["dev", &self.name, "set", "freq", &freq.to_string()])?;

        info!("Wi-Fi channel of {} set to {}", self.name, channel);
        self.channel = Some(channel);
        Ok(())
    }

    /// Set regulatory domain (two-letter country code)
    pub fn set_reg_domain(&self, country: &str) -> Result<(), WirelessError> {
        run("iw", &["reg", "set", country])?;
        info!("Regulatory domain set to {}", country);
        Ok(())
    }
}

fn set_link_state(name: &str, up: bool) -> Result<(), WirelessError> {
    run("ip", &["link", "set", name, if up { "up" } else { "down" }])
}

fn run(program: &str, args: &[&str]) -> Result<(), WirelessError> {
    debug!("exec {} {}", program, args.join(" "));
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| WirelessError::SystemError(format!("{}: {}", program, e)))?;

    if !status.success() {
        return Err(WirelessError::Nl80211Error(format!("`{} {}` failed: {}", program, args.join(" "), status)));
    }
    Ok(())
}

/// Convert channel number to frequency; `None` for channels outside the
/// 2.4 GHz range and the 5 GHz channel list.
pub fn channel_to_freq(channel: u8) -> Option<u32> {
    let freq = match channel {
        1..=13 => 2407 + (channel as u32 * 5),
        14 => 2484,
        36 | 40 | 44 | 48 | 52 | 56 | 60 | 64 | 100 | 104 | 108 | 112 | 116 | 120 | 124
        | 128 | 132 | 136 | 140 | 144 | 149 | 153 | 157 | 161 | 165 => 5000 + channel as u32 * 5,
        _ => return None,
    };
    Some(freq)
}

/// Whether a channel number is usable
pub fn is_valid_channel(channel: u8) -> bool {
    channel_to_freq(channel).is_some()
}
