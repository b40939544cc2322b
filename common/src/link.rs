//! Seams between the portable core and the platform: the MQTT protocol
//! engine, the Wi-Fi/network stack and the monotonic clock are external
//! collaborators specified only at this boundary.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Parameters for a protocol-layer connect attempt, including the retained
/// last-will the broker publishes if the device drops off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u16,
    pub timeout_ms: u64,
    pub use_tls: bool,
    pub will_topic: String,
    pub will_payload: String,
    pub will_retain: bool,
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("broker refused connection: {0}")]
    ConnectRefused(String),
    #[error("tls setup failed: {0}")]
    Tls(String),
    #[error("transport not connected")]
    NotConnected,
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

/// The MQTT engine, used as a black box. Publishes are at-most-once; the
/// application-level outbox provides the at-least-once layer on top.
pub trait Transport {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), TransportError>;
    fn is_connected(&self) -> bool;
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError>;
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;
    fn disconnect(&mut self);
    /// Next buffered inbound message, if any. Called repeatedly each loop
    /// iteration until drained.
    fn poll(&mut self) -> Option<InboundMessage>;
}

/// The underlying network interface (Wi-Fi station on embedded targets).
pub trait Network {
    fn begin_join(&mut self, ssid: &str, password: &str);
    fn is_joined(&self) -> bool;
    fn rssi_dbm(&self) -> i32;
    fn local_ip(&self) -> String;
}

/// Monotonic millisecond clock. `sleep_ms` is only used by the blocking
/// network-join loop; everything else compares injected timestamps.
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep_ms(&self, ms: u64);
}
