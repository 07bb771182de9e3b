use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::{CapturePrefix, Classifier, RawTxParams, TestFrameTemplate, TxEncapsulation};
use crate::link::{AccessPointSettings, RetryBudget, StationCredentials};
use crate::session::SessionConfig;
use crate::wireless::{is_valid_channel, MacAddr};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub test: TestConfig,

    #[serde(default)]
    pub raw: RawConfig,

    #[serde(default)]
    pub udp: UdpConfig,

    #[serde(default)]
    pub access_point: AccessPointConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub trigger: TriggerConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        Ok(config)
    }

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/wlatency/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("wlatency/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        ensure!(is_valid_channel(self.raw.channel), "raw.channel {} is not a valid channel", self.raw.channel);
        ensure!(
            is_valid_channel(self.access_point.channel),
            "access_point.channel {} is not a valid channel",
            self.access_point.channel
        );
        ensure!(self.test.interval_ms > 0, "test.interval_ms must be positive");
        ensure!(self.test.slice_ms > 0, "test.slice_ms must be positive");
        ensure!(
            self.test.slice_ms <= self.test.interval_ms,
            "test.slice_ms ({}) exceeds test.interval_ms ({})",
            self.test.slice_ms,
            self.test.interval_ms
        );
        ensure!(
            (1..=32).contains(&self.raw.signature.len()),
            "raw.signature must be 1-32 bytes"
        );
        ensure!(self.access_point.capacity > 0, "access_point.capacity must be positive");
        ensure!(
            self.access_point.psk.is_empty() || (8..=63).contains(&self.access_point.psk.len()),
            "access_point.psk must be 8-63 characters"
        );
        ensure!(self.connection.max_retries > 0, "connection.max_retries must be positive");
        if let Some(country) = &self.general.country {
            ensure!(
                country.len() == 2 && country.chars().all(|c| c.is_ascii_alphabetic()),
                "general.country must be a two-letter code"
            );
        }
        Ok(())
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            duration: Duration::from_millis(self.test.duration_ms),
            interval: Duration::from_millis(self.test.interval_ms),
            slice: Duration::from_millis(self.test.slice_ms),
        }
    }

    pub fn frame_template(&self) -> TestFrameTemplate {
        TestFrameTemplate {
            source: self.raw.source,
            bssid: self.raw.source,
            signature: self.raw.signature.as_bytes().to_vec(),
            channel: self.raw.channel,
            tx: RawTxParams {
                data_rate: self.raw.data_rate,
                tx_mode: self.raw.tx_mode,
                queue: self.raw.queue,
            },
            encapsulation: self.raw.encapsulation,
        }
    }

    /// Frame template for pcap injection on a monitor interface. mac80211
    /// drops injected buffers that do not start with a radiotap header while
    /// pcap still reports them as sent.
    pub fn injection_template(&self) -> Result<TestFrameTemplate> {
        ensure!(
            self.raw.encapsulation == TxEncapsulation::Radiotap,
            "raw.encapsulation {:?} cannot be injected through pcap, use \"radiotap\"",
            self.raw.encapsulation
        );
        Ok(self.frame_template())
    }

    /// Lease file consulted for station addresses on `interface`
    pub fn lease_file(&self, interface: &str) -> PathBuf {
        self.access_point
            .lease_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/var/lib/NetworkManager/dnsmasq-{}.leases", interface)))
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new(self.raw.signature.as_bytes().to_vec()).require_beacon(self.raw.require_beacon)
    }

    pub fn retry_budget(&self) -> RetryBudget {
        RetryBudget::new(
            self.connection.max_retries,
            Duration::from_secs(self.connection.attempt_timeout_secs),
        )
    }

    pub fn station_credentials(&self) -> StationCredentials {
        StationCredentials {
            ssid: self.connection.ssid.clone(),
            psk: self.connection.psk.clone(),
        }
    }

    pub fn access_point_settings(&self) -> AccessPointSettings {
        AccessPointSettings {
            ssid: self.access_point.ssid.clone(),
            psk: self.access_point.psk.clone(),
            channel: self.access_point.channel,
        }
    }
}

/// Which kind of test unit is exchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketType {
    #[default]
    Raw,
    Udp,
}

/// How the receiving endpoint attaches to the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RxMode {
    /// Raw frames, interface in monitor mode
    #[default]
    Monitor,
    /// Raw frames while associated as a station
    Promiscuous,
    /// UDP with this endpoint running the access point
    SoftAp,
    /// UDP as a station of an existing network
    Station,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Wireless interface; first one found if unset
    #[serde(default)]
    pub interface: Option<String>,

    /// Regulatory domain (ISO country code)
    #[serde(default)]
    pub country: Option<String>,

    #[serde(default)]
    pub packet_type: PacketType,

    #[serde(default)]
    pub rx_mode: RxMode,

    /// Wait for the interface to come up in raw roles
    #[serde(default = "default_iface_up_timeout")]
    pub iface_up_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            interface: None,
            country: None,
            packet_type: PacketType::default(),
            rx_mode: RxMode::default(),
            iface_up_timeout_secs: default_iface_up_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,

    /// Time between units
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Stop-check granularity
    #[serde(default = "default_slice_ms")]
    pub slice_ms: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_duration_ms(),
            interval_ms: default_interval_ms(),
            slice_ms: default_slice_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(default = "default_channel")]
    pub channel: u8,

    /// Legacy rate in 500 kbps units, or MCS index
    #[serde(default = "default_data_rate")]
    pub data_rate: u8,

    #[serde(default)]
    pub tx_mode: u8,

    #[serde(default = "default_queue")]
    pub queue: u8,

    /// Injection through pcap on a monitor interface needs `radiotap`
    #[serde(default = "default_encapsulation")]
    pub encapsulation: TxEncapsulation,

    #[serde(default)]
    pub capture_prefix: CapturePrefix,

    #[serde(default = "default_signature")]
    pub signature: String,

    #[serde(default = "default_source")]
    pub source: MacAddr,

    /// Only accept frames with the beacon frame-control value
    #[serde(default)]
    pub require_beacon: bool,

    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            data_rate: default_data_rate(),
            tx_mode: 0,
            queue: default_queue(),
            encapsulation: default_encapsulation(),
            capture_prefix: CapturePrefix::default(),
            signature: default_signature(),
            source: default_source(),
            require_beacon: false,
            capture_timeout_ms: default_capture_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpConfig {
    /// Receiver address the sender targets
    #[serde(default = "default_udp_target")]
    pub target: SocketAddr,

    /// Address the receiver binds
    #[serde(default = "default_udp_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_capture_timeout_ms")]
    pub recv_timeout_ms: u64,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            target: default_udp_target(),
            listen: default_udp_listen(),
            recv_timeout_ms: default_capture_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPointConfig {
    #[serde(default = "default_ap_ssid")]
    pub ssid: String,

    #[serde(default = "default_ap_psk")]
    pub psk: String,

    #[serde(default = "default_channel")]
    pub channel: u8,

    /// First address handed to joining stations
    #[serde(default = "default_pool_start")]
    pub pool_start: Ipv4Addr,

    /// Maximum joined stations
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Delay before a joined station gets its address
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// DHCP lease file of the hotspot. Defaults to NetworkManager's dnsmasq
    /// lease file for the interface.
    #[serde(default)]
    pub lease_file: Option<PathBuf>,
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            ssid: default_ap_ssid(),
            psk: default_ap_psk(),
            channel: default_channel(),
            pool_start: default_pool_start(),
            capacity: default_capacity(),
            settle_delay_ms: default_settle_delay_ms(),
            lease_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Network joined in station roles
    #[serde(default = "default_ap_ssid")]
    pub ssid: String,

    #[serde(default = "default_ap_psk")]
    pub psk: String,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ssid: default_ap_ssid(),
            psk: default_ap_psk(),
            max_retries: default_max_retries(),
            attempt_timeout_secs: default_attempt_timeout(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// Where timing pulses go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutput {
    /// Log lines only
    #[default]
    Log,
    /// sysfs LED / GPIO brightness files
    Sysfs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default)]
    pub output: TriggerOutput,

    #[serde(default = "default_tx_led")]
    pub tx_path: PathBuf,

    #[serde(default = "default_rx_led")]
    pub rx_path: PathBuf,

    #[serde(default = "default_pulse_width_ms")]
    pub pulse_width_ms: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            output: TriggerOutput::default(),
            tx_path: default_tx_led(),
            rx_path: default_rx_led(),
            pulse_width_ms: default_pulse_width_ms(),
        }
    }
}

// Default value functions
fn default_iface_up_timeout() -> u64 {
    30
}

fn default_duration_ms() -> u64 {
    10_000
}

fn default_interval_ms() -> u64 {
    100
}

fn default_slice_ms() -> u64 {
    10
}

fn default_channel() -> u8 {
    1
}

fn default_data_rate() -> u8 {
    12 // 6 Mbps
}

fn default_queue() -> u8 {
    1 // best effort
}

fn default_signature() -> String {
    "WIFI_LATENCY_TEST".to_string()
}

fn default_source() -> MacAddr {
    crate::codec::DEFAULT_SOURCE
}

fn default_capture_timeout_ms() -> u64 {
    1000
}

fn default_encapsulation() -> TxEncapsulation {
    TxEncapsulation::Radiotap
}

fn default_udp_target() -> SocketAddr {
    SocketAddr::from(([192, 168, 1, 2], 5001))
}

fn default_udp_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5001))
}

fn default_ap_ssid() -> String {
    "wlatency".to_string()
}

fn default_ap_psk() -> String {
    "latency-test".to_string()
}

fn default_pool_start() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 1, 2)
}

fn default_capacity() -> usize {
    4
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_attempt_timeout() -> u64 {
    10
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_tx_led() -> PathBuf {
    PathBuf::from("/sys/class/leds/led0/brightness")
}

fn default_rx_led() -> PathBuf {
    PathBuf::from("/sys/class/leds/led1/brightness")
}

fn default_pulse_width_ms() -> u64 {
    50
}
