//! The device-side client core: connect/reconnect lifecycle, inbound
//! command routing, reliable delivery and heartbeat cadence. Driven by a
//! single `run()` entry point polled from the host's cooperative loop;
//! everything returns within one iteration except the initial bounded
//! network join in `begin()`.

use log::{debug, info, warn};

use crate::config::{
    PlatformCaps, VwireSettings, JOIN_POLL_INTERVAL_MS, MAX_HANDLERS, MAX_REGISTRY_HANDLERS,
    MAX_VIRTUAL_PINS, MQTT_KEEP_ALIVE_SECS,
};
use crate::error::VwireError;
use crate::link::{Clock, ConnectOptions, Network, Transport, TransportError};
use crate::outbox::{Outbox, QUEUE_FULL_SENTINEL};
use crate::router;
use crate::topics;
use crate::types::{
    AlarmPayload, ConnectionState, DataEnvelope, EmailPayload, HeartbeatPayload, OtaCommand,
    OtaOutcome, OtaStatusPayload, TransportKind,
};
use crate::value::PinValue;

pub type PinHandler = Box<dyn FnMut(&PinValue)>;
pub type ConnectionHandler = Box<dyn FnMut()>;
pub type RawMessageHandler = Box<dyn FnMut(&str, &str)>;
pub type DeliveryHandler = Box<dyn FnMut(&str, bool)>;
pub type GpioCommandHandler = Box<dyn FnMut(&str, i32)>;
pub type OtaHandler = Box<dyn FnMut(&OtaCommand) -> OtaOutcome>;

struct PinHandlerEntry {
    pin: u8,
    handler: PinHandler,
    active: bool,
}

/// Handler-to-pin mappings collected by the application before the client
/// starts. Checked after the manually registered table; append-only.
#[derive(Default)]
pub struct HandlerRegistry {
    receive: Vec<(u8, PinHandler)>,
    connect: Option<ConnectionHandler>,
    disconnect: Option<ConnectionHandler>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder {
            registry: Self::default(),
        }
    }
}

pub struct HandlerRegistryBuilder {
    registry: HandlerRegistry,
}

impl HandlerRegistryBuilder {
    /// Register a receive handler for a virtual pin. Entries beyond the
    /// table capacity are dropped.
    pub fn on_receive(mut self, pin: u8, handler: impl FnMut(&PinValue) + 'static) -> Self {
        if self.registry.receive.len() < MAX_REGISTRY_HANDLERS {
            self.registry.receive.push((pin, Box::new(handler)));
        } else {
            warn!("registry handler table full, dropping handler for V{pin}");
        }
        self
    }

    pub fn on_connect(mut self, handler: impl FnMut() + 'static) -> Self {
        self.registry.connect = Some(Box::new(handler));
        self
    }

    pub fn on_disconnect(mut self, handler: impl FnMut() + 'static) -> Self {
        self.registry.disconnect = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> HandlerRegistry {
        self.registry
    }
}

pub struct VwireClient<T: Transport> {
    transport: T,
    settings: VwireSettings,
    caps: PlatformCaps,
    device_id: String,
    state: ConnectionState,
    last_error: Option<VwireError>,
    start_ms: u64,
    last_heartbeat_ms: u64,
    last_reconnect_ms: u64,
    last_alarm_id: u64,
    cloud_ota_enabled: bool,
    outbox: Outbox,
    handlers: Vec<PinHandlerEntry>,
    registry: HandlerRegistry,
    connect_handler: Option<ConnectionHandler>,
    disconnect_handler: Option<ConnectionHandler>,
    message_handler: Option<RawMessageHandler>,
    gpio_command_handler: Option<GpioCommandHandler>,
    delivery_handler: Option<DeliveryHandler>,
    ota_handler: Option<OtaHandler>,
    platform_ota_handler: Option<Box<dyn FnMut()>>,
    free_heap_source: Option<Box<dyn Fn() -> u32>>,
}

impl<T: Transport> VwireClient<T> {
    pub fn new(
        transport: T,
        mut settings: VwireSettings,
        caps: PlatformCaps,
        registry: HandlerRegistry,
    ) -> Self {
        settings.sanitize();
        let device_id = settings.auth_token.clone();
        Self {
            transport,
            settings,
            caps,
            device_id,
            state: ConnectionState::Idle,
            last_error: None,
            start_ms: 0,
            last_heartbeat_ms: 0,
            last_reconnect_ms: 0,
            last_alarm_id: 0,
            cloud_ota_enabled: false,
            outbox: Outbox::new(),
            handlers: Vec::new(),
            registry,
            connect_handler: None,
            disconnect_handler: None,
            message_handler: None,
            gpio_command_handler: None,
            delivery_handler: None,
            ota_handler: None,
            platform_ota_handler: None,
            free_heap_source: None,
        }
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Set token, server and port. The transport kind follows the port
    /// (8883/443 mean TLS) and the device id defaults to the full token.
    pub fn configure(&mut self, auth_token: &str, server: &str, port: u16) {
        self.settings.auth_token = auth_token.to_string();
        self.settings.server = server.to_string();
        self.settings.port = port;
        self.settings.transport = VwireSettings::transport_for_port(port);
        self.device_id = auth_token.to_string();
        info!(
            "configured for {server}:{port} ({})",
            self.settings.transport.as_str()
        );
    }

    /// Override the device id for OEM pre-provisioned devices. Empty ids
    /// are ignored.
    pub fn set_device_id(&mut self, device_id: &str) {
        if !device_id.is_empty() {
            self.device_id = device_id.to_string();
        }
    }

    pub fn set_transport_kind(&mut self, transport: TransportKind) {
        self.settings.transport = transport;
    }

    pub fn set_auto_reconnect(&mut self, enable: bool) {
        self.settings.auto_reconnect = enable;
    }

    pub fn set_reconnect_interval(&mut self, interval_ms: u64) {
        self.settings.reconnect_interval_ms = interval_ms;
    }

    pub fn set_heartbeat_interval(&mut self, interval_ms: u64) {
        self.settings.heartbeat_interval_ms = interval_ms;
    }

    pub fn set_data_retain(&mut self, retain: bool) {
        self.settings.data_retain = retain;
    }

    pub fn set_reliable_delivery(&mut self, enable: bool) {
        self.settings.reliable_delivery = enable;
    }

    pub fn set_ack_timeout(&mut self, timeout_ms: u64) {
        self.settings.ack_timeout_ms = timeout_ms;
    }

    pub fn set_max_retries(&mut self, retries: u8) {
        self.settings.max_retries = retries;
    }

    pub fn settings(&self) -> &VwireSettings {
        &self.settings
    }

    pub fn caps(&self) -> &PlatformCaps {
        &self.caps
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ------------------------------------------------------------------
    // Event handlers
    // ------------------------------------------------------------------

    /// Register a receive handler for a virtual pin. The manual table is
    /// checked before the registry; at most one handler fires per message.
    pub fn on_virtual_receive(
        &mut self,
        pin: u8,
        handler: impl FnMut(&PinValue) + 'static,
    ) -> Result<(), VwireError> {
        if self.handlers.len() >= MAX_HANDLERS {
            warn!("manual handler table full");
            return Err(self.fail(VwireError::HandlerTableFull));
        }
        self.handlers.push(PinHandlerEntry {
            pin,
            handler: Box::new(handler),
            active: true,
        });
        debug!("handler registered for V{pin}");
        Ok(())
    }

    pub fn on_connect(&mut self, handler: impl FnMut() + 'static) {
        self.connect_handler = Some(Box::new(handler));
    }

    pub fn on_disconnect(&mut self, handler: impl FnMut() + 'static) {
        self.disconnect_handler = Some(Box::new(handler));
    }

    /// Observer for every inbound message; runs before dispatch and never
    /// short-circuits it.
    pub fn on_message(&mut self, handler: impl FnMut(&str, &str) + 'static) {
        self.message_handler = Some(Box::new(handler));
    }

    /// Commands addressed to hardware pin names ("D13", "A0") are handed
    /// here instead of the virtual pin tables.
    pub fn on_gpio_command(&mut self, handler: impl FnMut(&str, i32) + 'static) {
        self.gpio_command_handler = Some(Box::new(handler));
    }

    pub fn on_delivery_status(&mut self, handler: impl FnMut(&str, bool) + 'static) {
        self.delivery_handler = Some(Box::new(handler));
    }

    /// Platform OTA service hook (mDNS/IDE-push style), serviced from the
    /// disconnected branch of `run()`.
    pub fn on_platform_ota(&mut self, handler: impl FnMut() + 'static) {
        self.platform_ota_handler = Some(Box::new(handler));
    }

    /// Enable cloud-triggered firmware updates. The handler performs the
    /// blocking download/flash and reports the outcome; status publishes
    /// bracket it on the `ota_status` topic.
    pub fn enable_cloud_ota(&mut self, handler: impl FnMut(&OtaCommand) -> OtaOutcome + 'static) {
        self.cloud_ota_enabled = true;
        self.ota_handler = Some(Box::new(handler));
        if self.transport.is_connected() {
            self.subscribe_logged(&topics::ota_topic(&self.device_id));
        }
    }

    pub fn set_free_heap_source(&mut self, source: impl Fn() -> u32 + 'static) {
        self.free_heap_source = Some(Box::new(source));
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Join the network (bounded by `wifi_timeout_ms`, polling every
    /// 500 ms) and then connect the protocol layer.
    pub fn begin(
        &mut self,
        network: &mut dyn Network,
        clock: &dyn Clock,
        ssid: &str,
        password: &str,
    ) -> Result<(), VwireError> {
        info!(
            "Vwire client v{} on {}",
            self.caps.firmware_version, self.caps.board_name
        );

        if !network.is_joined() {
            self.state = ConnectionState::ConnectingTransport;
            info!("joining network `{ssid}`");
            network.begin_join(ssid, password);

            let started = clock.now_ms();
            while !network.is_joined() {
                clock.sleep_ms(JOIN_POLL_INTERVAL_MS);
                if clock.now_ms().wrapping_sub(started) >= self.settings.wifi_timeout_ms {
                    warn!(
                        "network join timed out after {} ms",
                        self.settings.wifi_timeout_ms
                    );
                    self.state = ConnectionState::Error;
                    return Err(self.fail(VwireError::WifiFailed));
                }
            }
            info!("network joined, ip {}", network.local_ip());
        }

        self.connect_protocol(clock.now_ms())
    }

    /// Connect the protocol layer over an already-established network.
    pub fn begin_network_ready(
        &mut self,
        network: &dyn Network,
        now_ms: u64,
    ) -> Result<(), VwireError> {
        if !network.is_joined() {
            warn!("network not established");
            return Err(self.fail(VwireError::WifiFailed));
        }
        self.connect_protocol(now_ms)
    }

    /// One iteration of the cooperative loop. Connected fast path first:
    /// drain inbound, advance retries, heartbeat, return.
    pub fn run(&mut self, network: &mut dyn Network, now_ms: u64) {
        if self.transport.is_connected() {
            while let Some(message) = self.transport.poll() {
                self.handle_message(&message.topic, &message.payload);
            }

            if self.settings.reliable_delivery {
                self.process_retries(now_ms);
            }

            if now_ms.wrapping_sub(self.last_heartbeat_ms) >= self.settings.heartbeat_interval_ms {
                self.last_heartbeat_ms = now_ms;
                self.send_heartbeat(&*network, now_ms);
            }
            return;
        }

        if let Some(handler) = self.platform_ota_handler.as_mut() {
            handler();
        }

        if !network.is_joined() {
            if self.state == ConnectionState::Connected {
                warn!("network connection lost");
                self.state = ConnectionState::Disconnected;
                self.fire_disconnect_handlers();
            }
            return;
        }

        if self.state == ConnectionState::Connected {
            warn!("broker connection lost");
            self.state = ConnectionState::Disconnected;
            self.fire_disconnect_handlers();
        }

        if self.settings.auto_reconnect
            && now_ms.wrapping_sub(self.last_reconnect_ms) >= self.settings.reconnect_interval_ms
        {
            self.last_reconnect_ms = now_ms;
            let _ = self.connect_protocol(now_ms);
        }
    }

    pub fn connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.transport.is_connected()
    }

    /// Publish a retained offline status and close the protocol connection.
    pub fn disconnect(&mut self) {
        if self.transport.is_connected() {
            self.publish_logged(
                &topics::status_topic(&self.device_id),
                OFFLINE_STATUS.as_bytes(),
                true,
            );
            self.transport.disconnect();
        }
        self.state = ConnectionState::Disconnected;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_error(&self) -> Option<VwireError> {
        self.last_error
    }

    pub fn uptime_secs(&self, now_ms: u64) -> u64 {
        now_ms.wrapping_sub(self.start_ms) / 1_000
    }

    // ------------------------------------------------------------------
    // Virtual pin operations
    // ------------------------------------------------------------------

    /// Send a value to a virtual pin. Fire-and-forget unless reliable
    /// delivery is enabled, in which case the value enters the pending
    /// table and is acknowledged by the server.
    pub fn virtual_send(
        &mut self,
        pin: u8,
        value: impl Into<PinValue>,
        now_ms: u64,
    ) -> Result<(), VwireError> {
        if !self.connected() {
            return Err(self.fail(VwireError::NotConnected));
        }
        if u16::from(pin) >= MAX_VIRTUAL_PINS {
            return Err(self.fail(VwireError::InvalidPin));
        }

        let value = value.into();
        if self.settings.reliable_delivery {
            return self.send_reliable(pin, value.as_str(), now_ms);
        }

        debug!("send V{pin} = {}", value.as_str());
        self.publish_logged(
            &topics::pin_topic(&self.device_id, pin),
            value.as_str().as_bytes(),
            self.settings.data_retain,
        );
        Ok(())
    }

    /// Ask the server to replay the stored value for one pin.
    pub fn sync_virtual(&mut self, pin: u8) {
        if !self.connected() {
            return;
        }
        self.publish_logged(&topics::sync_pin_topic(&self.device_id, pin), b"", false);
    }

    /// Ask the server to replay all stored pin values.
    pub fn sync_all(&mut self) {
        if !self.connected() {
            return;
        }
        self.publish_logged(&topics::sync_all_topic(&self.device_id), b"all", false);
    }

    pub fn notify(&mut self, message: &str) {
        if !self.connected() {
            return;
        }
        self.publish_logged(&topics::notify_topic(&self.device_id), message.as_bytes(), false);
    }

    pub fn alarm(&mut self, message: &str, sound: &str, priority: u8, now_ms: u64) {
        if !self.connected() {
            return;
        }
        // Monotonic id; bump on collision so rapid alarms stay distinct.
        let mut alarm_id = now_ms;
        if alarm_id == self.last_alarm_id {
            alarm_id += 1;
        }
        self.last_alarm_id = alarm_id;

        let payload = AlarmPayload {
            kind: "alarm",
            message: message.to_string(),
            alarm_id: format!("alarm_{alarm_id}"),
            sound: sound.to_string(),
            priority,
            timestamp: now_ms,
        };
        if let Ok(bytes) = serde_json::to_vec(&payload) {
            self.publish_logged(&topics::alarm_topic(&self.device_id), &bytes, false);
        }
    }

    pub fn email(&mut self, subject: &str, body: &str) {
        if !self.connected() {
            return;
        }
        let payload = EmailPayload {
            subject: subject.to_string(),
            body: body.to_string(),
        };
        if let Ok(bytes) = serde_json::to_vec(&payload) {
            self.publish_logged(&topics::email_topic(&self.device_id), &bytes, false);
        }
    }

    pub fn log_message(&mut self, message: &str) {
        if !self.connected() {
            return;
        }
        self.publish_logged(&topics::log_topic(&self.device_id), message.as_bytes(), false);
    }

    pub fn pending_count(&self) -> usize {
        self.outbox.pending_count()
    }

    pub fn is_delivery_pending(&self) -> bool {
        self.outbox.pending_count() > 0
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn connect_protocol(&mut self, now_ms: u64) -> Result<(), VwireError> {
        if self.settings.auth_token.is_empty() {
            warn!("no auth token configured");
            return Err(self.fail(VwireError::NoToken));
        }
        if self.settings.transport == TransportKind::Tls && !self.caps.has_secure_transport {
            warn!("TLS requested but platform has no secure transport");
            self.state = ConnectionState::Error;
            return Err(self.fail(VwireError::TlsFailed));
        }

        self.state = ConnectionState::ConnectingProtocol;
        info!(
            "connecting to {}:{} ({})",
            self.settings.server,
            self.settings.port,
            self.settings.transport.as_str()
        );

        let options = ConnectOptions {
            client_id: format!("vwire-{}", self.device_id),
            username: self.settings.auth_token.clone(),
            password: self.settings.auth_token.clone(),
            keep_alive_secs: MQTT_KEEP_ALIVE_SECS,
            timeout_ms: self.settings.mqtt_timeout_ms,
            use_tls: self.settings.transport == TransportKind::Tls,
            will_topic: topics::status_topic(&self.device_id),
            will_payload: OFFLINE_STATUS.to_string(),
            will_retain: true,
        };

        match self.transport.connect(&options) {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                info!("broker connected");

                self.publish_logged(
                    &topics::status_topic(&self.device_id),
                    ONLINE_STATUS.as_bytes(),
                    true,
                );
                self.subscribe_logged(&topics::command_wildcard(&self.device_id));
                if self.settings.reliable_delivery {
                    self.subscribe_logged(&topics::ack_topic(&self.device_id));
                }
                if self.cloud_ota_enabled {
                    self.subscribe_logged(&topics::ota_topic(&self.device_id));
                }

                self.start_ms = now_ms;
                self.fire_connect_handlers();
                Ok(())
            }
            Err(err) => {
                warn!("broker connect failed: {err}");
                self.state = ConnectionState::Error;
                let mapped = match err {
                    TransportError::Tls(_) => VwireError::TlsFailed,
                    _ => VwireError::MqttFailed,
                };
                Err(self.fail(mapped))
            }
        }
    }

    /// Route one inbound message: raw observer, then OTA, then ACK, then
    /// command dispatch. Malformed input is dropped without surfacing an
    /// error — inbound data must never crash or block the loop.
    fn handle_message(&mut self, topic: &str, payload: &[u8]) {
        let payload = router::payload_to_string(payload, self.caps.max_payload_len);
        debug!("inbound {topic} = {payload}");

        if let Some(handler) = self.message_handler.as_mut() {
            handler(topic, &payload);
        }

        if self.cloud_ota_enabled && topics::is_ota_topic(topic) {
            self.handle_ota_payload(&payload);
            return;
        }

        if topics::is_ack_topic(topic) {
            if let Some((msg_id, ok)) = router::parse_ack(&payload) {
                self.handle_ack(&msg_id, ok);
            }
            return;
        }

        let Some(token) = topics::command_pin_token(topic) else {
            return;
        };

        // Hardware pin names bypass the virtual pin tables.
        if matches!(token.chars().next(), Some('D' | 'd' | 'A' | 'a'))
            && self.gpio_command_handler.is_some()
        {
            let name = token.to_string();
            let value = PinValue::new(payload).as_int();
            if let Some(handler) = self.gpio_command_handler.as_mut() {
                handler(&name, value.clamp(i32::MIN as i64, i32::MAX as i64) as i32);
            }
            return;
        }

        let Some(pin) = topics::parse_pin_number(token) else {
            return;
        };
        if pin >= MAX_VIRTUAL_PINS {
            return;
        }
        let pin = pin as u8;
        let value = PinValue::new(payload);

        for entry in &mut self.handlers {
            if entry.active && entry.pin == pin {
                (entry.handler)(&value);
                return;
            }
        }
        for (registered, handler) in &mut self.registry.receive {
            if *registered == pin {
                handler(&value);
                return;
            }
        }
    }

    fn handle_ack(&mut self, msg_id: &str, ok: bool) {
        debug!("ack received: {msg_id} = {ok}");
        if self.outbox.acknowledge(msg_id) {
            if let Some(handler) = self.delivery_handler.as_mut() {
                handler(msg_id, ok);
            }
        }
    }

    fn send_reliable(&mut self, pin: u8, value: &str, now_ms: u64) -> Result<(), VwireError> {
        match self.outbox.alloc(pin, value, now_ms) {
            Ok(envelope) => {
                debug!("reliable send V{pin} = {value} (msgId {})", envelope.msg_id);
                self.publish_envelope(&envelope);
                Ok(())
            }
            Err(error) => {
                warn!("reliable delivery queue full");
                if let Some(handler) = self.delivery_handler.as_mut() {
                    handler(QUEUE_FULL_SENTINEL, false);
                }
                Err(self.fail(error))
            }
        }
    }

    fn process_retries(&mut self, now_ms: u64) {
        let pass = self.outbox.process_retries(
            now_ms,
            self.settings.ack_timeout_ms,
            self.settings.max_retries,
        );
        for envelope in &pass.resend {
            self.publish_envelope(envelope);
        }
        for msg_id in &pass.dropped {
            if let Some(handler) = self.delivery_handler.as_mut() {
                handler(msg_id, false);
            }
        }
    }

    fn publish_envelope(&mut self, envelope: &DataEnvelope) {
        if let Ok(payload) = serde_json::to_vec(envelope) {
            self.publish_logged(&topics::data_topic(&self.device_id), &payload, false);
        }
    }

    fn handle_ota_payload(&mut self, payload: &str) {
        let command: OtaCommand = match serde_json::from_str(payload) {
            Ok(command) => command,
            Err(err) => {
                debug!("ota command parse error: {err}");
                return;
            }
        };
        if command.url.is_empty() || command.update_id.is_empty() {
            debug!("ota command missing required fields");
            return;
        }

        info!("cloud ota update {} from {}", command.update_id, command.url);
        self.publish_ota_status(&command.update_id, "downloading", 0, None);

        let outcome = match self.ota_handler.as_mut() {
            Some(handler) => handler(&command),
            None => OtaOutcome::Failed("no OTA handler installed".to_string()),
        };

        match outcome {
            OtaOutcome::Completed => {
                self.publish_ota_status(&command.update_id, "completed", 100, None)
            }
            OtaOutcome::Failed(error) => {
                warn!("ota update {} failed: {error}", command.update_id);
                self.publish_ota_status(&command.update_id, "failed", 0, Some(error));
            }
        }
    }

    fn publish_ota_status(
        &mut self,
        update_id: &str,
        status: &'static str,
        progress: u8,
        error: Option<String>,
    ) {
        let payload = OtaStatusPayload {
            update_id: update_id.to_string(),
            status,
            progress,
            error,
            version: self.caps.firmware_version.clone(),
        };
        if let Ok(bytes) = serde_json::to_vec(&payload) {
            // Retained so the server sees the result even across a reboot.
            self.publish_logged(&topics::ota_status_topic(&self.device_id), &bytes, true);
        }
    }

    fn send_heartbeat(&mut self, network: &dyn Network, now_ms: u64) {
        let payload = HeartbeatPayload {
            uptime: self.uptime_secs(now_ms),
            heap: self.free_heap_source.as_ref().map(|f| f()).unwrap_or(0),
            rssi: network.rssi_dbm(),
            ip: network.local_ip(),
            fw: self.caps.firmware_version.clone(),
            ota: self.cloud_ota_enabled.then_some(true),
        };
        if let Ok(bytes) = serde_json::to_vec(&payload) {
            self.publish_logged(&topics::heartbeat_topic(&self.device_id), &bytes, false);
        }
    }

    fn fire_connect_handlers(&mut self) {
        if let Some(handler) = self.connect_handler.as_mut() {
            handler();
        }
        if let Some(handler) = self.registry.connect.as_mut() {
            handler();
        }
    }

    fn fire_disconnect_handlers(&mut self) {
        if let Some(handler) = self.disconnect_handler.as_mut() {
            handler();
        }
        if let Some(handler) = self.registry.disconnect.as_mut() {
            handler();
        }
    }

    fn publish_logged(&mut self, topic: &str, payload: &[u8], retain: bool) {
        if let Err(err) = self.transport.publish(topic, payload, retain) {
            warn!("publish to {topic} failed: {err}");
        }
    }

    fn subscribe_logged(&mut self, topic: &str) {
        match self.transport.subscribe(topic) {
            Ok(()) => debug!("subscribed to {topic}"),
            Err(err) => warn!("subscribe to {topic} failed: {err}"),
        }
    }

    fn fail(&mut self, error: VwireError) -> VwireError {
        self.last_error = Some(error);
        error
    }
}

const ONLINE_STATUS: &str = r#"{"status":"online"}"#;
const OFFLINE_STATUS: &str = r#"{"status":"offline"}"#;
