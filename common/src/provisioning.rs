//! AP-mode provisioning state machine, decoupled from the HTTP server and
//! radio that drive it. The driver brings the access point and portal up,
//! feeds submitted configuration in through `submit`, polls `poll` every
//! loop iteration and reports the outcome of the station join back through
//! `connect_result`.

use log::info;

use crate::credentials::StoredCredentials;

pub const AP_SSID_PREFIX: &str = "VWire_Setup_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Idle,
    AccessPointActive,
    Connecting,
    Success,
    Failed,
    Timeout,
}

impl ProvisioningState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::AccessPointActive => "AP_ACTIVE",
            Self::Connecting => "CONNECTING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
        }
    }
}

/// What the driver should do next after a `poll`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningPoll {
    Idle,
    /// Keep the portal up and keep polling.
    WaitingForConfig,
    /// Tear down the AP and join the network with these credentials, then
    /// call `connect_result`.
    Connect(StoredCredentials),
    /// Join in progress; awaiting `connect_result`.
    Joining,
    /// Overall timeout exceeded; the AP has been abandoned.
    TimedOut,
    Finished(bool),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningRequest {
    pub ssid: String,
    pub password: String,
    pub token: String,
}

impl ProvisioningRequest {
    /// Parse a `POST /config` body, accepting either a form-encoded or a
    /// JSON payload (both `{ssid,password,token}` and the legacy
    /// `{wifi_ssid,wifi_pass,token}` spellings).
    pub fn from_config_body(body: &str) -> Result<Self, &'static str> {
        let trimmed = body.trim();
        if trimmed.starts_with('{') {
            let doc: serde_json::Value =
                serde_json::from_str(trimmed).map_err(|_| "Invalid JSON body")?;
            let field = |keys: &[&str]| {
                keys.iter()
                    .find_map(|key| doc.get(*key).and_then(|v| v.as_str()))
                    .unwrap_or("")
                    .to_string()
            };
            return Ok(Self {
                ssid: field(&["ssid", "wifi_ssid"]),
                password: field(&["password", "wifi_pass"]),
                token: field(&["token"]),
            });
        }

        let mut request = Self::default();
        for pair in trimmed.split('&') {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or("");
            let value = percent_decode(parts.next().unwrap_or(""));
            match key {
                "ssid" => request.ssid = value,
                "password" => request.password = value,
                "token" => request.token = value,
                _ => {}
            }
        }
        Ok(request)
    }
}

type StateCallback = Box<dyn FnMut(ProvisioningState)>;
type CredentialsCallback = Box<dyn FnMut(&StoredCredentials)>;

pub struct Provisioner {
    state: ProvisioningState,
    oem_mode: bool,
    ap_ssid: String,
    started_ms: u64,
    timeout_ms: u64,
    credentials: Option<StoredCredentials>,
    received: bool,
    state_callback: Option<StateCallback>,
    credentials_callback: Option<CredentialsCallback>,
}

impl Default for Provisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl Provisioner {
    pub fn new() -> Self {
        Self {
            state: ProvisioningState::Idle,
            oem_mode: false,
            ap_ssid: String::new(),
            started_ms: 0,
            timeout_ms: 0,
            credentials: None,
            received: false,
            state_callback: None,
            credentials_callback: None,
        }
    }

    /// Enter AP mode. `timeout_ms == 0` means no overall timeout. In OEM
    /// mode the auth token is baked into the firmware, so the portal form
    /// does not require one.
    pub fn start_ap(&mut self, ap_ssid: &str, timeout_ms: u64, oem_mode: bool, now_ms: u64) {
        self.ap_ssid = ap_ssid.to_string();
        self.timeout_ms = timeout_ms;
        self.oem_mode = oem_mode;
        self.started_ms = now_ms;
        self.received = false;
        self.credentials = None;
        info!("provisioning AP `{ap_ssid}` active (oem={oem_mode})");
        self.set_state(ProvisioningState::AccessPointActive);
    }

    /// Validate and stage a submitted configuration. The AP stays up until
    /// the next `poll` so the HTTP response can still be delivered.
    pub fn submit(&mut self, request: ProvisioningRequest) -> Result<(), &'static str> {
        if self.state != ProvisioningState::AccessPointActive {
            return Err("Not provisioning");
        }
        if request.ssid.is_empty() {
            return Err("SSID is required");
        }
        if !self.oem_mode && request.token.is_empty() {
            return Err("Device token is required");
        }

        let token = if self.oem_mode {
            String::new()
        } else {
            request.token
        };
        let credentials = StoredCredentials::new(request.ssid, request.password, token);
        if let Some(callback) = self.credentials_callback.as_mut() {
            callback(&credentials);
        }
        self.credentials = Some(credentials);
        self.received = true;
        Ok(())
    }

    pub fn poll(&mut self, now_ms: u64) -> ProvisioningPoll {
        match self.state {
            ProvisioningState::AccessPointActive => {
                if self.received {
                    self.received = false;
                    self.set_state(ProvisioningState::Connecting);
                    return ProvisioningPoll::Connect(
                        self.credentials.clone().unwrap_or_default(),
                    );
                }
                if self.timeout_ms > 0
                    && now_ms.wrapping_sub(self.started_ms) >= self.timeout_ms
                {
                    self.set_state(ProvisioningState::Timeout);
                    return ProvisioningPoll::TimedOut;
                }
                ProvisioningPoll::WaitingForConfig
            }
            ProvisioningState::Connecting => ProvisioningPoll::Joining,
            ProvisioningState::Success => ProvisioningPoll::Finished(true),
            ProvisioningState::Failed => ProvisioningPoll::Finished(false),
            _ => ProvisioningPoll::Idle,
        }
    }

    /// Outcome of the station join attempted after `Connect`.
    pub fn connect_result(&mut self, ok: bool) {
        self.set_state(if ok {
            ProvisioningState::Success
        } else {
            ProvisioningState::Failed
        });
    }

    pub fn stop(&mut self) {
        self.received = false;
        self.set_state(ProvisioningState::Idle);
    }

    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    pub fn is_provisioning(&self) -> bool {
        matches!(
            self.state,
            ProvisioningState::AccessPointActive | ProvisioningState::Connecting
        )
    }

    pub fn ap_ssid(&self) -> &str {
        &self.ap_ssid
    }

    pub fn credentials(&self) -> Option<&StoredCredentials> {
        self.credentials.as_ref()
    }

    /// Whether a configuration has been received (the portal's `/confirm`
    /// endpoint reports this to the mobile app).
    pub fn config_received(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn on_state_change(&mut self, callback: impl FnMut(ProvisioningState) + 'static) {
        self.state_callback = Some(Box::new(callback));
    }

    pub fn on_credentials(&mut self, callback: impl FnMut(&StoredCredentials) + 'static) {
        self.credentials_callback = Some(Box::new(callback));
    }

    fn set_state(&mut self, state: ProvisioningState) {
        if self.state != state {
            self.state = state;
            if let Some(callback) = self.state_callback.as_mut() {
                callback(state);
            }
        }
    }
}

/// Default AP name derived from the chip identifier.
pub fn default_ap_ssid(chip_id: u32) -> String {
    format!("{AP_SSID_PREFIX}{:04X}", chip_id & 0xFFFF)
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn submitted() -> ProvisioningRequest {
        ProvisioningRequest {
            ssid: "HomeNet".to_string(),
            password: "hunter22".to_string(),
            token: "tok-1".to_string(),
        }
    }

    #[test]
    fn happy_path_reaches_success() {
        let mut prov = Provisioner::new();
        prov.start_ap("VWire_Setup_BEEF", 0, false, 1_000);
        assert_eq!(prov.state(), ProvisioningState::AccessPointActive);
        assert_eq!(prov.poll(1_100), ProvisioningPoll::WaitingForConfig);

        prov.submit(submitted()).unwrap();
        let step = prov.poll(1_200);
        let ProvisioningPoll::Connect(credentials) = step else {
            panic!("expected Connect, got {step:?}");
        };
        assert_eq!(credentials.ssid, "HomeNet");
        assert_eq!(prov.state(), ProvisioningState::Connecting);
        assert_eq!(prov.poll(1_300), ProvisioningPoll::Joining);

        prov.connect_result(true);
        assert_eq!(prov.state(), ProvisioningState::Success);
        assert_eq!(prov.poll(1_400), ProvisioningPoll::Finished(true));
    }

    #[test]
    fn failed_join_reports_failure() {
        let mut prov = Provisioner::new();
        prov.start_ap("ap", 0, false, 0);
        prov.submit(submitted()).unwrap();
        let _ = prov.poll(10);
        prov.connect_result(false);
        assert_eq!(prov.state(), ProvisioningState::Failed);
    }

    #[test]
    fn ssid_always_required() {
        let mut prov = Provisioner::new();
        prov.start_ap("ap", 0, false, 0);
        let result = prov.submit(ProvisioningRequest {
            ssid: String::new(),
            ..submitted()
        });
        assert_eq!(result, Err("SSID is required"));
    }

    #[test]
    fn token_required_unless_oem() {
        let mut prov = Provisioner::new();
        prov.start_ap("ap", 0, false, 0);
        let result = prov.submit(ProvisioningRequest {
            token: String::new(),
            ..submitted()
        });
        assert_eq!(result, Err("Device token is required"));

        let mut oem = Provisioner::new();
        oem.start_ap("ap", 0, true, 0);
        oem.submit(ProvisioningRequest {
            token: String::new(),
            ..submitted()
        })
        .unwrap();
        // OEM mode never stores a token; the firmware carries it.
        let ProvisioningPoll::Connect(credentials) = oem.poll(1) else {
            panic!("expected Connect");
        };
        assert_eq!(credentials.auth_token, "");
    }

    #[test]
    fn submit_outside_ap_mode_rejected() {
        let mut prov = Provisioner::new();
        assert_eq!(prov.submit(submitted()), Err("Not provisioning"));
    }

    #[test]
    fn overall_timeout_fires() {
        let mut prov = Provisioner::new();
        prov.start_ap("ap", 60_000, false, 0);
        assert_eq!(prov.poll(59_999), ProvisioningPoll::WaitingForConfig);
        assert_eq!(prov.poll(60_000), ProvisioningPoll::TimedOut);
        assert_eq!(prov.state(), ProvisioningState::Timeout);
    }

    #[test]
    fn zero_timeout_waits_forever() {
        let mut prov = Provisioner::new();
        prov.start_ap("ap", 0, false, 0);
        assert_eq!(prov.poll(u64::MAX / 2), ProvisioningPoll::WaitingForConfig);
    }

    #[test]
    fn state_callback_sees_transitions() {
        let states = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&states);
        let mut prov = Provisioner::new();
        prov.on_state_change(move |state| sink.borrow_mut().push(state));

        prov.start_ap("ap", 0, false, 0);
        prov.submit(submitted()).unwrap();
        let _ = prov.poll(1);
        prov.connect_result(true);

        assert_eq!(
            *states.borrow(),
            vec![
                ProvisioningState::AccessPointActive,
                ProvisioningState::Connecting,
                ProvisioningState::Success,
            ]
        );
    }

    #[test]
    fn config_body_parses_form_encoding() {
        let request =
            ProvisioningRequest::from_config_body("ssid=Home%20Net&password=a%2Bb+c&token=tok")
                .unwrap();
        assert_eq!(request.ssid, "Home Net");
        assert_eq!(request.password, "a+b c");
        assert_eq!(request.token, "tok");
    }

    #[test]
    fn config_body_parses_json_variants() {
        let request = ProvisioningRequest::from_config_body(
            r#"{"ssid":"Net","password":"pw","token":"tok"}"#,
        )
        .unwrap();
        assert_eq!(request.ssid, "Net");

        let legacy = ProvisioningRequest::from_config_body(
            r#"{"wifi_ssid":"Net2","wifi_pass":"pw2","token":"tok2"}"#,
        )
        .unwrap();
        assert_eq!(legacy.ssid, "Net2");
        assert_eq!(legacy.password, "pw2");

        assert!(ProvisioningRequest::from_config_body("{not json").is_err());
    }

    #[test]
    fn default_ap_ssid_uses_chip_id() {
        assert_eq!(default_ap_ssid(0xAABB_CCDD), "VWire_Setup_CCDD");
    }
}
