use serde::{Deserialize, Serialize};

use crate::types::TransportKind;

pub const DEFAULT_SERVER: &str = "mqtt.vwire.io";
pub const DEFAULT_PORT_TCP: u16 = 1883;
pub const DEFAULT_PORT_TLS: u16 = 8883;

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_WIFI_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MQTT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_RETRIES: u8 = 3;

/// Virtual pin numbers are valid in `0..MAX_VIRTUAL_PINS`.
pub const MAX_VIRTUAL_PINS: u16 = 128;
pub const MAX_HANDLERS: usize = 32;
pub const MAX_REGISTRY_HANDLERS: usize = 32;
pub const MAX_PENDING_MESSAGES: usize = 10;
pub const MAX_PENDING_VALUE_LEN: usize = 64;
pub const MAX_TIMERS: usize = 16;
pub const MAX_GPIO_PINS: usize = 24;

/// How long the Wi-Fi join loop sleeps between status polls.
pub const JOIN_POLL_INTERVAL_MS: u64 = 500;

pub const MQTT_KEEP_ALIVE_SECS: u16 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VwireSettings {
    pub auth_token: String,
    pub server: String,
    pub port: u16,
    pub transport: TransportKind,
    pub auto_reconnect: bool,
    pub reconnect_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub wifi_timeout_ms: u64,
    pub mqtt_timeout_ms: u64,
    pub data_retain: bool,
    pub reliable_delivery: bool,
    pub ack_timeout_ms: u64,
    pub max_retries: u8,
}

impl Default for VwireSettings {
    fn default() -> Self {
        Self {
            auth_token: String::new(),
            server: DEFAULT_SERVER.to_string(),
            port: DEFAULT_PORT_TLS,
            transport: TransportKind::Tls,
            auto_reconnect: true,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            wifi_timeout_ms: DEFAULT_WIFI_TIMEOUT_MS,
            mqtt_timeout_ms: DEFAULT_MQTT_TIMEOUT_MS,
            data_retain: false,
            reliable_delivery: false,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl VwireSettings {
    pub fn sanitize(&mut self) {
        if self.server.is_empty() {
            self.server = DEFAULT_SERVER.to_string();
        }
        if self.port == 0 {
            self.port = DEFAULT_PORT_TLS;
        }
        if self.reconnect_interval_ms == 0 {
            self.reconnect_interval_ms = DEFAULT_RECONNECT_INTERVAL_MS;
        }
        if self.heartbeat_interval_ms == 0 {
            self.heartbeat_interval_ms = DEFAULT_HEARTBEAT_INTERVAL_MS;
        }
        if self.wifi_timeout_ms == 0 {
            self.wifi_timeout_ms = DEFAULT_WIFI_TIMEOUT_MS;
        }
        if self.mqtt_timeout_ms == 0 {
            self.mqtt_timeout_ms = DEFAULT_MQTT_TIMEOUT_MS;
        }
        if self.ack_timeout_ms == 0 {
            self.ack_timeout_ms = DEFAULT_ACK_TIMEOUT_MS;
        }
    }

    /// Port 8883 and 443 imply TLS, everything else plain TCP.
    pub fn transport_for_port(port: u16) -> TransportKind {
        if port == DEFAULT_PORT_TLS || port == 443 {
            TransportKind::Tls
        } else {
            TransportKind::Tcp
        }
    }
}

/// How cloud pin names resolve to hardware GPIO numbers.
///
/// NodeMCU-style boards are the only mainstream platform where Dx != GPIO x
/// (D4 = GPIO 2 and so on); everywhere else the name maps directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinMapping {
    Direct,
    NodeMcu,
}

/// Capabilities of the running platform, chosen once by the driver at
/// startup instead of scattering conditional compilation through the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformCaps {
    pub board_name: String,
    pub firmware_version: String,
    pub has_secure_transport: bool,
    pub has_ota: bool,
    pub max_payload_len: usize,
    pub pin_mapping: PinMapping,
}

impl PlatformCaps {
    pub fn esp32(firmware_version: &str) -> Self {
        Self {
            board_name: "ESP32".to_string(),
            firmware_version: firmware_version.to_string(),
            has_secure_transport: true,
            has_ota: true,
            max_payload_len: 2048,
            pin_mapping: PinMapping::Direct,
        }
    }

    pub fn esp8266(firmware_version: &str) -> Self {
        Self {
            board_name: "ESP8266".to_string(),
            firmware_version: firmware_version.to_string(),
            has_secure_transport: true,
            has_ota: true,
            max_payload_len: 1024,
            pin_mapping: PinMapping::NodeMcu,
        }
    }

    pub fn generic(board_name: &str, firmware_version: &str) -> Self {
        Self {
            board_name: board_name.to_string(),
            firmware_version: firmware_version.to_string(),
            has_secure_transport: false,
            has_ota: false,
            max_payload_len: 512,
            pin_mapping: PinMapping::Direct,
        }
    }
}
