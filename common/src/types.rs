use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Idle,
    ConnectingTransport,
    ConnectingProtocol,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::ConnectingTransport => "CONNECTING_WIFI",
            Self::ConnectingProtocol => "CONNECTING_MQTT",
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportKind {
    Tcp,
    Tls,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Tls => "TLS",
        }
    }
}

/// Reliable-delivery envelope published on the `data` topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataEnvelope {
    #[serde(rename = "msgId")]
    pub msg_id: String,
    pub pin: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatPayload {
    pub uptime: u64,
    pub heap: u32,
    pub rssi: i32,
    pub ip: String,
    pub fw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ota: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlarmPayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
    #[serde(rename = "alarmId")]
    pub alarm_id: String,
    pub sound: String,
    pub priority: u8,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailPayload {
    pub subject: String,
    pub body: String,
}

/// Cloud OTA command received on the `ota` topic.
#[derive(Debug, Clone, Deserialize)]
pub struct OtaCommand {
    pub url: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(rename = "updateId")]
    pub update_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OtaStatusPayload {
    #[serde(rename = "updateId")]
    pub update_id: String,
    pub status: &'static str,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub version: String,
}

/// Result the driver's OTA hook reports back after the blocking
/// download/flash attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaOutcome {
    Completed,
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn envelope_uses_wire_field_names() {
        let envelope = DataEnvelope {
            msg_id: "0001_1234".to_string(),
            pin: "V3".to_string(),
            value: "42".to_string(),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert_eq!(json, r#"{"msgId":"0001_1234","pin":"V3","value":"42"}"#);
    }

    #[test]
    fn heartbeat_omits_ota_flag_unless_set() {
        let mut heartbeat = HeartbeatPayload {
            uptime: 12,
            heap: 180_000,
            rssi: -61,
            ip: "192.168.1.40".to_string(),
            fw: "3.1.0".to_string(),
            ota: None,
        };
        assert!(!serde_json::to_string(&heartbeat).unwrap().contains("ota"));
        heartbeat.ota = Some(true);
        assert!(serde_json::to_string(&heartbeat)
            .unwrap()
            .contains(r#""ota":true"#));
    }

    #[test]
    fn ota_command_tolerates_missing_optionals() {
        let command: OtaCommand = serde_json::from_str(
            r#"{"url":"http://fw.vwire.io/a.bin","updateId":"u-1"}"#,
        )
        .unwrap();
        assert_eq!(command.url, "http://fw.vwire.io/a.bin");
        assert_eq!(command.update_id, "u-1");
        assert_eq!(command.version, None);
        assert_eq!(command.checksum, None);
        assert_eq!(command.size, None);
    }
}
