use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{client::Client as HttpClient, Headers, Method, Status},
    io::{Read, Write},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{delay::FreeRtos, prelude::Peripherals};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    mqtt::client::{
        EspMqttClient, EspMqttConnection, EventPayload, LwtConfiguration, MqttClientConfiguration,
        QoS,
    },
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    ota::EspOta,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use sha2::{Digest, Sha256};

use vwire_common::{
    client::HandlerRegistry,
    config::{PinMapping, PlatformCaps, VwireSettings},
    credentials::{StoredCredentials, RECORD_LEN},
    gpio::{GpioBackend, GpioManager, GpioMode},
    link::{Clock, ConnectOptions, InboundMessage, Network, Transport, TransportError},
    provisioning::{default_ap_ssid, Provisioner, ProvisioningPoll, ProvisioningRequest},
    timer::SoftTimer,
    topics,
    types::{OtaCommand, OtaOutcome},
    value::PinValue,
    VwireClient,
};

const FW_VERSION: &str = env!("CARGO_PKG_VERSION");
const NVS_NAMESPACE: &str = "vwire_cred";
const NVS_CRED_KEY: &str = "cred";
const MAX_HTTP_BODY: usize = 4096;
const OTA_CHUNK_SIZE: usize = 4096;
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const LOOP_TICK_MS: u64 = 10;
const MQTT_RX_STACK: usize = 12 * 1024;
const PROVISIONING_AP_TIMEOUT_MS: u64 = 0;

const PROVISIONING_INDEX_HTML: &str = r#"<!doctype html>
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
  <p class="muted">Configure your IoT device. It restarts and joins your network afterwards.</p>
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
        q('status').className='ok'; q('status').textContent='Saved. Device is restarting.';
      }catch(err){q('status').className='err'; q('status').textContent=err.message;}
    });
  </script>
</body>
</html>
"#;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let store = NvsCredStore::new(nvs_partition.clone());

    let Peripherals { modem, .. } = Peripherals::take()?;
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;

    let credentials = match store.load() {
        Some(credentials) => credentials,
        None => {
            warn!("no valid credentials; entering provisioning AP mode");
            // Never returns: saves credentials and restarts the chip.
            return run_provisioning(&mut esp_wifi, sys_loop, store);
        }
    };

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    if let Ok(mut ota) = EspOta::new() {
        if let Err(err) = ota.mark_running_slot_valid() {
            warn!("failed to mark running OTA slot valid: {err:?}");
        }
    }

    let mut settings = VwireSettings {
        auth_token: credentials.auth_token.clone(),
        ..VwireSettings::default()
    };
    if let Some(server) = option_env!("VWIRE_SERVER") {
        settings.server = server.to_string();
    }
    if let Some(port) = option_env!("VWIRE_PORT").and_then(|port| port.parse().ok()) {
        settings.port = port;
        settings.transport = VwireSettings::transport_for_port(port);
    }

    let caps = PlatformCaps::esp32(FW_VERSION);

    let registry = HandlerRegistry::builder()
        .on_receive(0, |value| info!("V0 command: {}", value.as_str()))
        .on_connect(|| info!("connected to VWire cloud"))
        .on_disconnect(|| warn!("disconnected from VWire cloud"))
        .build();

    let transport = EspMqttLink::new(&settings);
    let mut client = VwireClient::new(transport, settings, caps, registry);
    client.set_free_heap_source(|| unsafe { esp_idf_svc::sys::esp_get_free_heap_size() });

    let restart_pending = Arc::new(AtomicBool::new(false));
    {
        let restart_pending = Arc::clone(&restart_pending);
        client.enable_cloud_ota(move |command| match download_and_apply_ota(command) {
            Ok(bytes) => {
                info!("ota image applied ({bytes} bytes); restart scheduled");
                restart_pending.store(true, Ordering::Relaxed);
                OtaOutcome::Completed
            }
            Err(err) => OtaOutcome::Failed(format!("{err:#}")),
        });
    }

    let gpio = std::rc::Rc::new(std::cell::RefCell::new(GpioManager::new(PinMapping::Direct)));
    let backend = std::rc::Rc::new(std::cell::RefCell::new(EspGpio::default()));
    {
        let gpio = std::rc::Rc::clone(&gpio);
        let backend = std::rc::Rc::clone(&backend);
        client.on_gpio_command(move |name, value| {
            gpio.borrow_mut()
                .handle_command(name, value, &mut *backend.borrow_mut());
        });
    }
    {
        let gpio = std::rc::Rc::clone(&gpio);
        let backend = std::rc::Rc::clone(&backend);
        client.on_message(move |topic, payload| {
            if topics::is_pinconfig_topic(topic) {
                let configured = gpio
                    .borrow_mut()
                    .apply_config(payload, &mut *backend.borrow_mut());
                info!("pinconfig applied: {configured} pins");
            }
        });
    }

    let mut network = EspNetwork::new(&mut esp_wifi);
    let clock = EspClock;
    if let Err(err) = client.begin(&mut network, &clock, &credentials.ssid, &credentials.password) {
        warn!("initial connect failed: {err}; auto-reconnect continues");
    }

    let device_id = client.device_id().to_string();
    if client.connected() {
        let _ = client
            .transport_mut()
            .subscribe(&topics::pinconfig_topic(&device_id));
    }

    let queued: std::rc::Rc<std::cell::RefCell<Vec<(u8, PinValue)>>> =
        std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let mut timers = SoftTimer::new();
    {
        let queued = std::rc::Rc::clone(&queued);
        timers.set_interval(10_000, monotonic_ms(), move || {
            let heap = unsafe { esp_idf_svc::sys::esp_get_free_heap_size() };
            queued.borrow_mut().push((1, PinValue::from(heap)));
        });
    }

    info!("device loop running as {device_id}");
    let mut readings: Vec<(String, i32)> = Vec::new();
    loop {
        let now = monotonic_ms();
        client.run(&mut network, now);
        timers.run(now);

        gpio.borrow_mut()
            .poll(now, &mut *backend.borrow_mut(), &mut |name, value| {
                readings.push((name.to_string(), value));
            });
        for (name, value) in readings.drain(..) {
            let topic = topics::gpio_pin_topic(&device_id, &name);
            let _ = client
                .transport_mut()
                .publish(&topic, value.to_string().as_bytes(), false);
        }

        let due: Vec<(u8, PinValue)> = queued.borrow_mut().drain(..).collect();
        for (pin, value) in due {
            let _ = client.virtual_send(pin, value, now);
        }

        if restart_pending.load(Ordering::Relaxed) {
            // Give the retained ota_status publish time to flush.
            thread::sleep(Duration::from_secs(1));
            unsafe { esp_idf_svc::sys::esp_restart() };
        }

        feed_watchdog();
        FreeRtos::delay_ms(LOOP_TICK_MS as u32);
    }
}

// ----------------------------------------------------------------------
// Provisioning
// ----------------------------------------------------------------------

fn run_provisioning(
    esp_wifi: &mut EspWifi<'static>,
    sys_loop: EspSystemEventLoop,
    store: NvsCredStore,
) -> anyhow::Result<()> {
    let mut wifi = BlockingWifi::wrap(&mut *esp_wifi, sys_loop)?;

    let ap_ssid = default_ap_ssid(chip_id());
    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: ap_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("provisioning AP SSID too long"))?,
        auth_method: AuthMethod::None,
        channel: 1,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.wait_netif_up()?;
    info!("provisioning AP `{ap_ssid}` up");

    let provisioner = Arc::new(Mutex::new(Provisioner::new()));
    provisioner.lock().unwrap().start_ap(
        &ap_ssid,
        PROVISIONING_AP_TIMEOUT_MS,
        false,
        monotonic_ms(),
    );
    let server = create_provisioning_http_server(Arc::clone(&provisioner))?;

    let credentials = loop {
        thread::sleep(Duration::from_millis(100));
        let step = provisioner.lock().unwrap().poll(monotonic_ms());
        match step {
            ProvisioningPoll::Connect(credentials) => break credentials,
            ProvisioningPoll::TimedOut => {
                return Err(anyhow!("provisioning timed out"));
            }
            _ => {}
        }
    };

    store.save(&credentials)?;
    provisioner.lock().unwrap().connect_result(true);
    info!("credentials stored for `{}`; restarting", credentials.ssid);

    drop(server);
    thread::sleep(Duration::from_secs(1));
    unsafe { esp_idf_svc::sys::esp_restart() };
}

fn create_provisioning_http_server(
    provisioner: Arc<Mutex<Provisioner>>,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, |req| {
        req.into_ok_response()?
            .write_all(PROVISIONING_INDEX_HTML.as_bytes())?;
        Ok(())
    })?;

    {
        let provisioner = Arc::clone(&provisioner);
        server.fn_handler::<anyhow::Error, _>("/config", Method::Post, move |mut req| {
            let body = read_request_body(&mut req)?;
            let text = String::from_utf8_lossy(&body).into_owned();
            let request = match ProvisioningRequest::from_config_body(&text) {
                Ok(request) => request,
                Err(error) => return write_error(req, 400, error),
            };
            match provisioner.lock().unwrap().submit(request) {
                Ok(()) => write_json(
                    req,
                    &serde_json::json!({"success": true, "message": "Configuration saved"}),
                ),
                Err(error) => write_error(req, 400, error),
            }
        })?;
    }

    {
        let provisioner = Arc::clone(&provisioner);
        server.fn_handler("/status", Method::Get, move |req| {
            let provisioner = provisioner.lock().unwrap();
            write_json(
                req,
                &serde_json::json!({
                    "state": provisioner.state().as_str(),
                    "method": "ap",
                    "apSSID": provisioner.ap_ssid(),
                }),
            )
        })?;
    }

    server.fn_handler("/handshake", Method::Get, |req| {
        write_json(req, &serde_json::json!({"status": "ready"}))
    })?;

    {
        let provisioner = Arc::clone(&provisioner);
        server.fn_handler("/confirm", Method::Get, move |req| {
            let received = provisioner.lock().unwrap().config_received();
            write_json(req, &serde_json::json!({"received": received}))
        })?;
    }

    Ok(server)
}

fn read_request_body(
    req: &mut esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_json<T: serde::Serialize>(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let payload = serde_json::json!({ "success": false, "error": message });
    let body = serde_json::to_vec(&payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

// ----------------------------------------------------------------------
// Credential storage (NVS)
// ----------------------------------------------------------------------

#[derive(Clone)]
struct NvsCredStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

impl NvsCredStore {
    fn new(partition: EspDefaultNvsPartition) -> Self {
        Self {
            partition,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn open(&self) -> anyhow::Result<EspNvs<NvsDefault>> {
        Ok(EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?)
    }

    fn load(&self) -> Option<StoredCredentials> {
        let _guard = self.lock.lock().unwrap();
        let nvs = self.open().ok()?;
        let mut buffer = [0_u8; RECORD_LEN];
        match nvs.get_raw(NVS_CRED_KEY, &mut buffer) {
            Ok(Some(raw)) => StoredCredentials::decode(raw),
            _ => None,
        }
    }

    fn save(&self, credentials: &StoredCredentials) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut nvs = self.open()?;
        nvs.set_raw(NVS_CRED_KEY, &credentials.encode())
            .context("failed to persist credentials to NVS")?;
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Platform seams
// ----------------------------------------------------------------------

struct EspClock;

impl Clock for EspClock {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }

    fn sleep_ms(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

struct EspNetwork<'a> {
    wifi: &'a mut EspWifi<'static>,
}

impl<'a> EspNetwork<'a> {
    fn new(wifi: &'a mut EspWifi<'static>) -> Self {
        Self { wifi }
    }
}

impl Network for EspNetwork<'_> {
    fn begin_join(&mut self, ssid: &str, password: &str) {
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };
        let config = Configuration::Client(ClientConfiguration {
            ssid: match ssid.try_into() {
                Ok(ssid) => ssid,
                Err(_) => {
                    warn!("wifi ssid too long");
                    return;
                }
            },
            password: match password.try_into() {
                Ok(password) => password,
                Err(_) => {
                    warn!("wifi password too long");
                    return;
                }
            },
            auth_method,
            ..Default::default()
        });

        if let Err(err) = self.wifi.set_configuration(&config) {
            warn!("wifi configuration failed: {err:?}");
            return;
        }
        if let Err(err) = self.wifi.start() {
            warn!("wifi start failed: {err:?}");
            return;
        }
        if let Err(err) = self.wifi.connect() {
            warn!("wifi connect failed: {err:?}");
        }
    }

    fn is_joined(&self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    fn rssi_dbm(&self) -> i32 {
        let mut info = esp_idf_svc::sys::wifi_ap_record_t::default();
        let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut info) };
        if rc == esp_idf_svc::sys::ESP_OK {
            i32::from(info.rssi)
        } else {
            0
        }
    }

    fn local_ip(&self) -> String {
        self.wifi
            .sta_netif()
            .get_ip_info()
            .map(|info| info.ip.to_string())
            .unwrap_or_default()
    }
}

struct EspMqttLink {
    broker_url: String,
    client: Option<EspMqttClient<'static>>,
    connected: Arc<AtomicBool>,
    inbound: Option<mpsc::Receiver<InboundMessage>>,
}

impl EspMqttLink {
    fn new(settings: &VwireSettings) -> Self {
        let scheme = match settings.transport {
            vwire_common::TransportKind::Tls => "mqtts",
            vwire_common::TransportKind::Tcp => "mqtt",
        };
        Self {
            broker_url: format!("{scheme}://{}:{}", settings.server, settings.port),
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            inbound: None,
        }
    }

    fn spawn_receiver(
        &self,
        mut conn: EspMqttConnection,
        inbound_tx: mpsc::Sender<InboundMessage>,
        status_tx: mpsc::Sender<bool>,
    ) {
        let connected = Arc::clone(&self.connected);
        thread::Builder::new()
            .name("mqtt-rx".into())
            .stack_size(MQTT_RX_STACK)
            .spawn(move || loop {
                match conn.next() {
                    Ok(event) => match event.payload() {
                        EventPayload::Connected(_) => {
                            connected.store(true, Ordering::Relaxed);
                            let _ = status_tx.send(true);
                        }
                        EventPayload::Disconnected => {
                            connected.store(false, Ordering::Relaxed);
                        }
                        EventPayload::Received {
                            topic: Some(topic),
                            data,
                            ..
                        } => {
                            let _ = inbound_tx.send(InboundMessage {
                                topic: topic.to_string(),
                                payload: data.to_vec(),
                            });
                        }
                        _ => {}
                    },
                    Err(err) => {
                        connected.store(false, Ordering::Relaxed);
                        warn!("mqtt receive loop closed: {err:?}");
                        let _ = status_tx.send(false);
                        break;
                    }
                }
            })
            .expect("failed to spawn mqtt receiver thread");
    }
}

impl Transport for EspMqttLink {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Relaxed);
        self.client = None;

        let conf = MqttClientConfiguration {
            client_id: Some(options.client_id.as_str()),
            username: Some(options.username.as_str()),
            password: Some(options.password.as_str()),
            keep_alive_interval: Some(Duration::from_secs(options.keep_alive_secs.into())),
            lwt: Some(LwtConfiguration {
                topic: options.will_topic.as_str(),
                payload: options.will_payload.as_bytes(),
                qos: QoS::AtLeastOnce,
                retain: options.will_retain,
            }),
            ..Default::default()
        };

        let (client, conn) = EspMqttClient::new(&self.broker_url, &conf)
            .map_err(|err| TransportError::ConnectRefused(format!("{err:?}")))?;

        let (inbound_tx, inbound_rx) = mpsc::channel();
        let (status_tx, status_rx) = mpsc::channel();
        self.spawn_receiver(conn, inbound_tx, status_tx);
        self.client = Some(client);
        self.inbound = Some(inbound_rx);

        match status_rx.recv_timeout(Duration::from_millis(options.timeout_ms)) {
            Ok(true) => Ok(()),
            Ok(false) => Err(TransportError::ConnectRefused(
                "broker rejected the connection".to_string(),
            )),
            Err(_) => Err(TransportError::ConnectRefused(
                "timed out waiting for broker".to_string(),
            )),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        let client = self.client.as_mut().ok_or(TransportError::NotConnected)?;
        client
            .enqueue(topic, QoS::AtMostOnce, retain, payload)
            .map(|_| ())
            .map_err(|err| TransportError::Publish(format!("{err:?}")))
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let client = self.client.as_mut().ok_or(TransportError::NotConnected)?;
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .map(|_| ())
            .map_err(|err| TransportError::Subscribe(format!("{err:?}")))
    }

    fn disconnect(&mut self) {
        // Dropping the client tears the session down.
        self.client = None;
        self.connected.store(false, Ordering::Relaxed);
    }

    fn poll(&mut self) -> Option<InboundMessage> {
        self.inbound.as_ref()?.try_recv().ok()
    }
}

// ----------------------------------------------------------------------
// GPIO backend (register-level access through the IDF C API)
// ----------------------------------------------------------------------

#[derive(Default)]
struct EspGpio {
    pwm_channels: HashMap<u8, u8>,
    next_channel: u8,
}

impl GpioBackend for EspGpio {
    fn apply_mode(&mut self, hw_pin: u8, mode: GpioMode) {
        use esp_idf_svc::sys::*;
        let pin = hw_pin as i32;
        unsafe {
            gpio_reset_pin(pin);
            match mode {
                GpioMode::Output | GpioMode::Pwm => {
                    gpio_set_direction(pin, gpio_mode_t_GPIO_MODE_OUTPUT);
                }
                GpioMode::Input => {
                    gpio_set_direction(pin, gpio_mode_t_GPIO_MODE_INPUT);
                    gpio_set_pull_mode(pin, gpio_pull_mode_t_GPIO_FLOATING);
                }
                GpioMode::InputPullup => {
                    gpio_set_direction(pin, gpio_mode_t_GPIO_MODE_INPUT);
                    gpio_set_pull_mode(pin, gpio_pull_mode_t_GPIO_PULLUP_ONLY);
                }
                GpioMode::AnalogInput | GpioMode::Disabled => {}
            }
        }
    }

    fn digital_write(&mut self, hw_pin: u8, high: bool) {
        unsafe {
            esp_idf_svc::sys::gpio_set_level(hw_pin as i32, u32::from(high));
        }
    }

    fn digital_read(&mut self, hw_pin: u8) -> i32 {
        unsafe { esp_idf_svc::sys::gpio_get_level(hw_pin as i32) }
    }

    fn analog_read(&mut self, hw_pin: u8) -> i32 {
        let Some(channel) = adc1_channel(hw_pin) else {
            return 0;
        };
        unsafe { esp_idf_svc::sys::adc1_get_raw(channel) as i32 }
    }

    fn setup_pwm(&mut self, hw_pin: u8) {
        use esp_idf_svc::sys::*;
        let channel = self.next_channel % 8;
        self.next_channel += 1;
        self.pwm_channels.insert(hw_pin, channel);

        unsafe {
            let timer = ledc_timer_config_t {
                speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
                duty_resolution: ledc_timer_bit_t_LEDC_TIMER_8_BIT,
                timer_num: ledc_timer_t_LEDC_TIMER_0,
                freq_hz: 5_000,
                clk_cfg: ledc_clk_cfg_t_LEDC_AUTO_CLK,
                ..Default::default()
            };
            ledc_timer_config(&timer);

            let channel_conf = ledc_channel_config_t {
                gpio_num: hw_pin as i32,
                speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
                channel: channel as u32,
                timer_sel: ledc_timer_t_LEDC_TIMER_0,
                duty: 0,
                hpoint: 0,
                ..Default::default()
            };
            ledc_channel_config(&channel_conf);
        }
    }

    fn pwm_write(&mut self, hw_pin: u8, duty: u8) {
        use esp_idf_svc::sys::*;
        let Some(&channel) = self.pwm_channels.get(&hw_pin) else {
            return;
        };
        unsafe {
            ledc_set_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel as u32, duty as u32);
            ledc_update_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel as u32);
        }
    }

    fn clear_pwm(&mut self, hw_pin: u8) {
        use esp_idf_svc::sys::*;
        if let Some(channel) = self.pwm_channels.remove(&hw_pin) {
            unsafe {
                ledc_stop(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel as u32, 0);
                gpio_set_direction(hw_pin as i32, gpio_mode_t_GPIO_MODE_OUTPUT);
            }
        }
    }
}

/// ESP32 ADC1 channel for a GPIO number; only GPIO32-39 are ADC1 capable.
fn adc1_channel(hw_pin: u8) -> Option<u32> {
    match hw_pin {
        36 => Some(0),
        37 => Some(1),
        38 => Some(2),
        39 => Some(3),
        32 => Some(4),
        33 => Some(5),
        34 => Some(6),
        35 => Some(7),
        _ => None,
    }
}

// ----------------------------------------------------------------------
// Cloud OTA download
// ----------------------------------------------------------------------

fn download_and_apply_ota(command: &OtaCommand) -> anyhow::Result<u64> {
    let http_conf = HttpClientConfiguration {
        timeout: Some(Duration::from_secs(30)),
        crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
        ..Default::default()
    };
    let mut client = HttpClient::wrap(EspHttpConnection::new(&http_conf)?);
    let request = client.request(Method::Get, &command.url, &[])?;
    let mut response = request.submit().map_err(|e| anyhow!("{e:?}"))?;

    let status = response.status();
    if !(200..300).contains(&status) {
        return Err(anyhow!("firmware download failed with HTTP {status}"));
    }

    let expected_len = response
        .header("content-length")
        .or_else(|| response.header("Content-Length"))
        .and_then(|value| value.parse::<u64>().ok());
    if let (Some(expected), Some(size)) = (expected_len, command.size) {
        if expected != size {
            warn!("announced size {size} != content-length {expected}");
        }
    }

    let mut ota = EspOta::new().map_err(|err| anyhow!("failed to acquire OTA: {err:?}"))?;
    let mut update = ota
        .initiate_update()
        .map_err(|err| anyhow!("failed to initiate OTA update: {err:?}"))?;

    let mut hasher = Sha256::new();
    let mut total_written = 0_u64;
    let mut chunk = [0_u8; OTA_CHUNK_SIZE];

    loop {
        let read = response.read(&mut chunk).map_err(|e| anyhow!("{e:?}"))?;
        if read == 0 {
            break;
        }
        update
            .write(&chunk[..read])
            .map_err(|err| anyhow!("failed writing OTA data: {err:?}"))?;
        hasher.update(&chunk[..read]);
        total_written = total_written.saturating_add(read as u64);
        feed_watchdog();
    }

    if total_written == 0 {
        return Err(anyhow!("firmware download body is empty"));
    }

    let digest = hasher.finalize();
    let mut digest_hex = String::with_capacity(64);
    for byte in digest {
        use core::fmt::Write as _;
        let _ = write!(&mut digest_hex, "{byte:02x}");
    }

    if let Some(expected) = command.checksum.as_deref() {
        let normalized = expected.trim().to_ascii_lowercase();
        if digest_hex != normalized {
            return Err(anyhow!(
                "sha256 mismatch (expected {normalized}, got {digest_hex})"
            ));
        }
    }

    update
        .complete()
        .map_err(|err| anyhow!("failed finalizing OTA image: {err:?}"))?;

    Ok(total_written)
}

// ----------------------------------------------------------------------
// Misc platform helpers
// ----------------------------------------------------------------------

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    unsafe {
        esp_idf_svc::sys::esp_task_wdt_reset();
    }
}

fn chip_id() -> u32 {
    let mut mac = [0_u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_read_mac(
            mac.as_mut_ptr(),
            esp_idf_svc::sys::esp_mac_type_t_ESP_MAC_WIFI_STA,
        );
    }
    u32::from_be_bytes([mac[2], mac[3], mac[4], mac[5]])
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
