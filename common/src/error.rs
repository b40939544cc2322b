use thiserror::Error;

/// Error taxonomy surfaced through `VwireClient::last_error()` and `Result`
/// returns. None of these abort the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VwireError {
    #[error("auth token not configured")]
    NoToken,
    #[error("network join failed")]
    WifiFailed,
    #[error("broker connect failed")]
    MqttFailed,
    #[error("not connected")]
    NotConnected,
    #[error("invalid virtual pin")]
    InvalidPin,
    #[error("buffer full")]
    BufferFull,
    #[error("handler table full")]
    HandlerTableFull,
    #[error("operation timed out")]
    Timeout,
    #[error("secure transport failed")]
    TlsFailed,
    #[error("delivery queue full")]
    QueueFull,
}

impl VwireError {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoToken => "NO_TOKEN",
            Self::WifiFailed => "WIFI_FAILED",
            Self::MqttFailed => "MQTT_FAILED",
            Self::NotConnected => "NOT_CONNECTED",
            Self::InvalidPin => "INVALID_PIN",
            Self::BufferFull => "BUFFER_FULL",
            Self::HandlerTableFull => "HANDLER_FULL",
            Self::Timeout => "TIMEOUT",
            Self::TlsFailed => "SSL_FAILED",
            Self::QueueFull => "QUEUE_FULL",
        }
    }
}
