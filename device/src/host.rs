use std::{
    cell::RefCell,
    net::SocketAddr,
    path::PathBuf,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, Incoming, LastWill, MqttOptions, QoS};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use vwire_common::{
    client::HandlerRegistry,
    config::{PinMapping, PlatformCaps, VwireSettings},
    credentials::StoredCredentials,
    gpio::{GpioBackend, GpioManager, GpioMode},
    link::{Clock, ConnectOptions, InboundMessage, Network, Transport, TransportError},
    provisioning::{default_ap_ssid, Provisioner, ProvisioningPoll, ProvisioningRequest},
    timer::SoftTimer,
    topics,
    types::OtaOutcome,
    value::PinValue,
    VwireClient,
};

const FW_VERSION: &str = env!("CARGO_PKG_VERSION");
const LOOP_TICK_MS: u64 = 10;
const MQTT_CHANNEL_CAPACITY: usize = 64;

const PORTAL_INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>VWire Device Setup</title>
  <style>
    body{font-family:Arial,sans-serif;max-width:480px;margin:2rem auto;padding:0 1rem;color:#111}
    h1{margin:0 0 .5rem}.card{border:1px solid #ddd;border-radius:8px;padding:1rem}
    label{display:block;margin:.5rem 0 .2rem}input{width:100%;padding:.5rem;box-sizing:border-box}
    button{padding:.55rem .9rem;margin-top:.8rem}.muted{color:#555}.ok{color:#106010}.err{color:#a00000}
  </style>
</head>
<body>
  <h1>VWire Setup</h1>
  <p class="muted">Configure your IoT device, then it will join your network.</p>
  <div class="card">
    <form id="configForm">
      <label>WiFi Network (SSID)</label><input id="ssid" type="text" required maxlength="32">
      <label>WiFi Password</label><input id="password" type="password" maxlength="64">
      <label>Device Token</label><input id="token" type="text" required maxlength="63">
      <button type="submit">Configure Device</button>
      <div id="status" class="muted"></div>
    </form>
  </div>
  <script>
    const q=(id)=>document.getElementById(id);
    q('configForm').addEventListener('submit', async (ev)=>{
      ev.preventDefault();
      q('status').className='muted'; q('status').textContent='Saving...';
      const body='ssid='+encodeURIComponent(q('ssid').value)
        +'&password='+encodeURIComponent(q('password').value)
        +'&token='+encodeURIComponent(q('token').value);
      try{
        const r=await fetch('/config',{method:'POST',headers:{'content-type':'application/x-www-form-urlencoded'},body});
        const data=await r.json();
        if(!data.success)throw new Error(data.error||'Configuration failed');
        q('status').className='ok'; q('status').textContent='Saved. Device is joining your network.';
      }catch(err){q('status').className='err'; q('status').textContent=err.message;}
    });
  </script>
</body>
</html>
"#;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = HostStore::new();

    // Env token takes precedence; otherwise stored credentials; otherwise
    // bring up the provisioning portal until a configuration arrives.
    let credentials = match std::env::var("VWIRE_TOKEN") {
        Ok(token) => StoredCredentials::new(
            std::env::var("VWIRE_SSID").unwrap_or_else(|_| "host".to_string()),
            String::new(),
            token,
        ),
        Err(_) => match store.load() {
            Some(credentials) => credentials,
            None => run_provisioning_portal(&store).await?,
        },
    };

    info!(
        "starting device loop for ssid `{}` (token {} chars)",
        credentials.ssid,
        credentials.auth_token.len()
    );

    let handle = tokio::runtime::Handle::current();
    tokio::task::spawn_blocking(move || device_loop(handle, credentials))
        .await
        .context("device loop terminated")?
}

// ----------------------------------------------------------------------
// Provisioning portal
// ----------------------------------------------------------------------

#[derive(Clone)]
struct PortalState {
    provisioner: Arc<Mutex<Provisioner>>,
}

#[derive(Debug, Serialize)]
struct ConfigResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct PortalStatus {
    state: &'static str,
    #[serde(rename = "apSSID")]
    ap_ssid: String,
}

async fn run_provisioning_portal(store: &HostStore) -> anyhow::Result<StoredCredentials> {
    let provisioner = Arc::new(Mutex::new(Provisioner::new()));
    let ap_ssid = default_ap_ssid(std::process::id());
    provisioner
        .lock()
        .unwrap()
        .start_ap(&ap_ssid, 0, false, monotonic_ms());

    let app = Router::new()
        .route("/", get(handle_portal_root))
        .route("/config", post(handle_portal_config))
        .route("/status", get(handle_portal_status))
        .route("/handshake", get(handle_portal_handshake))
        .route("/confirm", get(handle_portal_confirm))
        .with_state(PortalState {
            provisioner: Arc::clone(&provisioner),
        });

    let port = std::env::var("VWIRE_PORTAL_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .context("invalid portal address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind provisioning portal at {addr}"))?;
    info!("provisioning portal `{ap_ssid}` listening on http://{addr}");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    let credentials = loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let step = provisioner.lock().unwrap().poll(monotonic_ms());
        match step {
            ProvisioningPoll::Connect(credentials) => {
                // The host has OS networking; the station join is a no-op.
                provisioner.lock().unwrap().connect_result(true);
                break credentials;
            }
            ProvisioningPoll::TimedOut => {
                anyhow::bail!("provisioning timed out before a configuration arrived");
            }
            _ => {}
        }
    };

    store.save(&credentials)?;
    let _ = shutdown_tx.send(());
    let _ = server.await;
    info!("provisioning complete for ssid `{}`", credentials.ssid);
    Ok(credentials)
}

async fn handle_portal_root() -> Html<&'static str> {
    Html(PORTAL_INDEX_HTML)
}

async fn handle_portal_config(State(state): State<PortalState>, body: String) -> impl IntoResponse {
    let request = match ProvisioningRequest::from_config_body(&body) {
        Ok(request) => request,
        Err(error) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ConfigResponse {
                    success: false,
                    error: Some(error),
                }),
            );
        }
    };

    match state.provisioner.lock().unwrap().submit(request) {
        Ok(()) => (
            StatusCode::OK,
            Json(ConfigResponse {
                success: true,
                error: None,
            }),
        ),
        Err(error) => (
            StatusCode::BAD_REQUEST,
            Json(ConfigResponse {
                success: false,
                error: Some(error),
            }),
        ),
    }
}

async fn handle_portal_status(State(state): State<PortalState>) -> impl IntoResponse {
    let provisioner = state.provisioner.lock().unwrap();
    Json(PortalStatus {
        state: provisioner.state().as_str(),
        ap_ssid: provisioner.ap_ssid().to_string(),
    })
}

async fn handle_portal_handshake() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ready"}))
}

async fn handle_portal_confirm(State(state): State<PortalState>) -> impl IntoResponse {
    let received = state.provisioner.lock().unwrap().config_received();
    Json(serde_json::json!({"received": received}))
}

// ----------------------------------------------------------------------
// Device loop
// ----------------------------------------------------------------------

fn device_loop(
    handle: tokio::runtime::Handle,
    credentials: StoredCredentials,
) -> anyhow::Result<()> {
    let server = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut settings = VwireSettings {
        auth_token: credentials.auth_token.clone(),
        server: server.clone(),
        port,
        transport: VwireSettings::transport_for_port(port),
        ..VwireSettings::default()
    };
    settings.reliable_delivery = std::env::var("VWIRE_RELIABLE")
        .map(|value| value == "1")
        .unwrap_or(false);

    let caps = PlatformCaps::generic("Host", FW_VERSION);

    // Application wiring collected before the client starts.
    let registry = HandlerRegistry::builder()
        .on_receive(0, |value| info!("V0 command: {}", value.as_str()))
        .on_connect(|| info!("connected to VWire cloud"))
        .on_disconnect(|| warn!("disconnected from VWire cloud"))
        .build();

    let transport = RumqttcLink::new(handle, server, port);
    let mut client = VwireClient::new(transport, settings, caps, registry);
    client.on_delivery_status(|msg_id, ok| {
        if ok {
            info!("delivery confirmed for {msg_id}");
        } else {
            warn!("delivery failed for {msg_id}");
        }
    });
    client.set_free_heap_source(|| 0);
    client.enable_cloud_ota(|command| {
        warn!("ota command {} ignored on host", command.update_id);
        OtaOutcome::Failed("OTA apply is only available in device builds".to_string())
    });

    // GPIO table shared between the command hook and the polling loop.
    let gpio = Rc::new(RefCell::new(GpioManager::new(PinMapping::Direct)));
    let backend = Rc::new(RefCell::new(SimulatedGpio::default()));
    {
        let gpio = Rc::clone(&gpio);
        let backend = Rc::clone(&backend);
        client.on_gpio_command(move |name, value| {
            let written = gpio
                .borrow_mut()
                .handle_command(name, value, &mut *backend.borrow_mut());
            if !written {
                debug!("gpio command for unmanaged pin {name} dropped");
            }
        });
    }

    let mut network = HostNetwork::default();
    let clock = HostClock;
    if let Err(err) = client.begin(&mut network, &clock, &credentials.ssid, &credentials.password) {
        // Non-fatal: auto-reconnect keeps retrying from the loop.
        warn!("initial connect failed: {err}");
    }

    let device_id = client.device_id().to_string();
    let pinconfig_topic = topics::pinconfig_topic(&device_id);
    if client.connected() {
        let _ = client.transport_mut().subscribe(&pinconfig_topic);
    }

    // Queue filled by timer callbacks, drained into the client each tick.
    let queued: Rc<RefCell<Vec<(u8, PinValue)>>> = Rc::new(RefCell::new(Vec::new()));
    let mut timers = SoftTimer::new();
    {
        let queued = Rc::clone(&queued);
        let started = monotonic_ms();
        timers.set_interval(10_000, monotonic_ms(), move || {
            let uptime_secs = monotonic_ms().wrapping_sub(started) / 1_000;
            queued.borrow_mut().push((1, PinValue::from(uptime_secs)));
        });
    }

    {
        let gpio = Rc::clone(&gpio);
        let backend = Rc::clone(&backend);
        client.on_message(move |topic, payload| {
            debug!("mqtt <- {topic} = {payload}");
            if topics::is_pinconfig_topic(topic) {
                let configured = gpio
                    .borrow_mut()
                    .apply_config(payload, &mut *backend.borrow_mut());
                info!("pinconfig applied: {configured} pins");
            }
        });
    }

    info!("device loop running (broker {}:{port})", client.settings().server);
    let mut readings: Vec<(String, i32)> = Vec::new();
    loop {
        let now = monotonic_ms();
        client.run(&mut network, now);
        timers.run(now);

        backend.borrow_mut().tick(now);
        gpio.borrow_mut()
            .poll(now, &mut *backend.borrow_mut(), &mut |name, value| {
                readings.push((name.to_string(), value));
            });
        for (name, value) in readings.drain(..) {
            let topic = topics::gpio_pin_topic(&device_id, &name);
            if let Err(err) = client
                .transport_mut()
                .publish(&topic, value.to_string().as_bytes(), false)
            {
                debug!("gpio publish failed: {err}");
            }
        }

        let due: Vec<(u8, PinValue)> = queued.borrow_mut().drain(..).collect();
        for (pin, value) in due {
            if let Err(err) = client.virtual_send(pin, value, now) {
                debug!("queued send to V{pin} failed: {err}");
            }
        }

        thread::sleep(Duration::from_millis(LOOP_TICK_MS));
    }
}

// ----------------------------------------------------------------------
// Platform seams
// ----------------------------------------------------------------------

struct HostClock;

impl Clock for HostClock {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }

    fn sleep_ms(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// The host rides on OS networking, so the station is always "joined".
#[derive(Default)]
struct HostNetwork;

impl Network for HostNetwork {
    fn begin_join(&mut self, _ssid: &str, _password: &str) {}

    fn is_joined(&self) -> bool {
        true
    }

    fn rssi_dbm(&self) -> i32 {
        // Hardware integration point: real RSSI comes from the radio on
        // device builds.
        -50
    }

    fn local_ip(&self) -> String {
        std::env::var("VWIRE_LOCAL_IP").unwrap_or_else(|_| "127.0.0.1".to_string())
    }
}

struct RumqttcLink {
    handle: tokio::runtime::Handle,
    server: String,
    port: u16,
    client: Option<AsyncClient>,
    task: Option<tokio::task::JoinHandle<()>>,
    connected: Arc<AtomicBool>,
    inbound: Option<mpsc::Receiver<InboundMessage>>,
}

impl RumqttcLink {
    fn new(handle: tokio::runtime::Handle, server: String, port: u16) -> Self {
        Self {
            handle,
            server,
            port,
            client: None,
            task: None,
            connected: Arc::new(AtomicBool::new(false)),
            inbound: None,
        }
    }
}

impl Transport for RumqttcLink {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), TransportError> {
        if options.use_tls {
            return Err(TransportError::Tls(
                "TLS transport is not compiled into the host build".to_string(),
            ));
        }

        // Abandon any previous event loop before dialing again.
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.connected.store(false, Ordering::Relaxed);

        let mut mqtt_options =
            MqttOptions::new(options.client_id.clone(), self.server.clone(), self.port);
        mqtt_options.set_credentials(options.username.clone(), options.password.clone());
        mqtt_options.set_keep_alive(Duration::from_secs(options.keep_alive_secs.into()));
        mqtt_options.set_last_will(LastWill::new(
            options.will_topic.clone(),
            options.will_payload.clone(),
            QoS::AtLeastOnce,
            options.will_retain,
        ));

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, MQTT_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel();
        let (status_tx, status_rx) = mpsc::channel();
        let connected = Arc::clone(&self.connected);

        let task = self.handle.spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                        let accepted = ack.code == ConnectReturnCode::Success;
                        connected.store(accepted, Ordering::Relaxed);
                        let _ = status_tx.send(accepted);
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let _ = inbound_tx.send(InboundMessage {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        });
                    }
                    Ok(Event::Incoming(Incoming::Disconnect)) => {
                        connected.store(false, Ordering::Relaxed);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("mqtt event loop error: {err}");
                        connected.store(false, Ordering::Relaxed);
                        let _ = status_tx.send(false);
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        self.client = Some(client);
        self.task = Some(task);
        self.inbound = Some(inbound_rx);

        match status_rx.recv_timeout(Duration::from_millis(options.timeout_ms)) {
            Ok(true) => Ok(()),
            Ok(false) => Err(TransportError::ConnectRefused(
                "broker rejected the connection".to_string(),
            )),
            Err(_) => Err(TransportError::ConnectRefused(
                "timed out waiting for CONNACK".to_string(),
            )),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.to_vec())
            .map_err(|err| TransportError::Publish(err.to_string()))
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        client
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|err| TransportError::Subscribe(err.to_string()))
    }

    fn disconnect(&mut self) {
        if let Some(client) = self.client.as_ref() {
            let _ = client.try_disconnect();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.connected.store(false, Ordering::Relaxed);
    }

    fn poll(&mut self) -> Option<InboundMessage> {
        self.inbound.as_ref()?.try_recv().ok()
    }
}

/// Hardware integration point: replace these simulated levels with real
/// register access on device builds.
#[derive(Default)]
struct SimulatedGpio {
    now_ms: u64,
}

impl SimulatedGpio {
    fn tick(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
    }
}

impl GpioBackend for SimulatedGpio {
    fn apply_mode(&mut self, hw_pin: u8, mode: GpioMode) {
        debug!("gpio {hw_pin} mode -> {mode:?}");
    }

    fn digital_write(&mut self, hw_pin: u8, high: bool) {
        info!("gpio {hw_pin} <- {}", if high { "HIGH" } else { "LOW" });
    }

    fn digital_read(&mut self, hw_pin: u8) -> i32 {
        // Slow square wave so change detection has something to chew on.
        ((self.now_ms / 30_000 + u64::from(hw_pin)) % 2) as i32
    }

    fn analog_read(&mut self, hw_pin: u8) -> i32 {
        ((self.now_ms / 1_000 * 37 + u64::from(hw_pin) * 101) % 1024) as i32
    }

    fn setup_pwm(&mut self, hw_pin: u8) {
        debug!("gpio {hw_pin} pwm attached");
    }

    fn pwm_write(&mut self, hw_pin: u8, duty: u8) {
        info!("gpio {hw_pin} <- duty {duty}");
    }

    fn clear_pwm(&mut self, hw_pin: u8) {
        debug!("gpio {hw_pin} pwm detached");
    }
}

/// Credential record persisted verbatim under the data dir, same layout the
/// device writes to NVS.
#[derive(Clone)]
struct HostStore {
    path: Arc<PathBuf>,
}

impl HostStore {
    fn new() -> Self {
        let data_dir = std::env::var("VWIRE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.vwire"));
        Self {
            path: Arc::new(data_dir.join("credentials.bin")),
        }
    }

    fn load(&self) -> Option<StoredCredentials> {
        let raw = std::fs::read(self.path.as_ref()).ok()?;
        let credentials = StoredCredentials::decode(&raw);
        if credentials.is_none() {
            warn!("stored credentials invalid, treating device as unprovisioned");
        }
        credentials
    }

    fn save(&self, credentials: &StoredCredentials) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(self.path.as_ref(), credentials.encode())
            .with_context(|| format!("failed to persist credentials at {:?}", self.path))?;
        Ok(())
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
