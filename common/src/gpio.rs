//! Managed physical pins: cloud pin names ("D4", "A0") resolved to hardware
//! GPIO numbers, polled inputs with change detection, and command-driven
//! writes where a single OUTPUT pin serves both switch widgets (0/1) and
//! slider widgets (2-255).

use log::warn;
use serde::Deserialize;

use crate::config::{PinMapping, MAX_GPIO_PINS};

pub const DEFAULT_READ_INTERVAL_MS: u64 = 1_000;
pub const MIN_READ_INTERVAL_MS: u64 = 100;
pub const MAX_READ_INTERVAL_MS: u64 = 60_000;

/// "Never read" marker; forces a publish on the first poll of a pin.
pub const VALUE_SENTINEL: i32 = -32_768;

const MAX_PIN_NAME_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioMode {
    Output,
    Input,
    InputPullup,
    Pwm,
    AnalogInput,
    Disabled,
}

impl GpioMode {
    /// Mode strings as the cloud platform sends them, case-insensitive.
    pub fn parse(mode: &str) -> Self {
        if mode.eq_ignore_ascii_case("OUTPUT") {
            Self::Output
        } else if mode.eq_ignore_ascii_case("INPUT") {
            Self::Input
        } else if mode.eq_ignore_ascii_case("INPUT_PULLUP") {
            Self::InputPullup
        } else if mode.eq_ignore_ascii_case("PWM") {
            Self::Pwm
        } else if mode.eq_ignore_ascii_case("ANALOG_INPUT") {
            Self::AnalogInput
        } else {
            Self::Disabled
        }
    }

    pub fn is_input(self) -> bool {
        matches!(self, Self::Input | Self::InputPullup | Self::AnalogInput)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Self::Output | Self::Pwm)
    }
}

/// Register-level pin access, provided by the platform driver.
pub trait GpioBackend {
    fn apply_mode(&mut self, hw_pin: u8, mode: GpioMode);
    fn digital_write(&mut self, hw_pin: u8, high: bool);
    fn digital_read(&mut self, hw_pin: u8) -> i32;
    fn analog_read(&mut self, hw_pin: u8) -> i32;
    /// Attach a PWM channel to the pin; called once before the first duty
    /// write and again after `clear_pwm`.
    fn setup_pwm(&mut self, hw_pin: u8);
    fn pwm_write(&mut self, hw_pin: u8, duty: u8);
    /// Detach PWM so plain digital writes work again.
    fn clear_pwm(&mut self, hw_pin: u8);
}

#[derive(Debug, Clone)]
struct GpioPin {
    name: String,
    hw_pin: u8,
    mode: GpioMode,
    read_interval_ms: u64,
    last_read_ms: u64,
    last_value: i32,
    active: bool,
    pwm_initialized: bool,
}

impl GpioPin {
    fn empty() -> Self {
        Self {
            name: String::new(),
            hw_pin: 0,
            mode: GpioMode::Disabled,
            read_interval_ms: DEFAULT_READ_INTERVAL_MS,
            last_read_ms: 0,
            last_value: VALUE_SENTINEL,
            active: false,
            pwm_initialized: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PinConfigDoc {
    pins: Vec<PinConfigEntry>,
}

#[derive(Debug, Deserialize)]
struct PinConfigEntry {
    pin: String,
    mode: String,
    #[serde(default)]
    interval: u64,
}

pub struct GpioManager {
    pins: Vec<GpioPin>,
    count: usize,
    mapping: PinMapping,
}

impl GpioManager {
    pub fn new(mapping: PinMapping) -> Self {
        Self {
            pins: (0..MAX_GPIO_PINS).map(|_| GpioPin::empty()).collect(),
            count: 0,
            mapping,
        }
    }

    /// Apply a pinconfig payload:
    /// `{"pins":[{"pin":"D4","mode":"OUTPUT","interval":500},...]}`.
    /// Unknown modes and unresolvable names are skipped, not fatal.
    /// Returns the number of pins successfully configured.
    pub fn apply_config(&mut self, json: &str, backend: &mut dyn GpioBackend) -> usize {
        let doc: PinConfigDoc = match serde_json::from_str(json) {
            Ok(doc) => doc,
            Err(err) => {
                warn!("pinconfig parse error: {err}");
                return 0;
            }
        };

        let mut configured = 0;
        for entry in doc.pins {
            let mode = GpioMode::parse(&entry.mode);
            if mode == GpioMode::Disabled {
                continue;
            }
            if self.add_pin(&entry.pin, mode, entry.interval, backend) {
                configured += 1;
            }
        }
        configured
    }

    /// Upsert a managed pin by name, resolving the hardware number from the
    /// name. `read_interval_ms == 0` selects the default.
    pub fn add_pin(
        &mut self,
        name: &str,
        mode: GpioMode,
        read_interval_ms: u64,
        backend: &mut dyn GpioBackend,
    ) -> bool {
        match resolve_pin_number(name, self.mapping) {
            Some(hw_pin) => self.add_pin_with_number(name, hw_pin, mode, read_interval_ms, backend),
            None => false,
        }
    }

    /// Upsert with an explicit hardware pin number, bypassing name
    /// resolution.
    pub fn add_pin_with_number(
        &mut self,
        name: &str,
        hw_pin: u8,
        mode: GpioMode,
        read_interval_ms: u64,
        backend: &mut dyn GpioBackend,
    ) -> bool {
        if name.is_empty() || name.len() > MAX_PIN_NAME_LEN {
            return false;
        }

        let index = match self.find(name) {
            Some(index) => index,
            None => {
                let Some(index) = self.pins.iter().position(|pin| !pin.active) else {
                    return false;
                };
                self.count += 1;
                index
            }
        };

        let pin = &mut self.pins[index];
        pin.name = name.to_ascii_uppercase();
        pin.hw_pin = hw_pin;
        pin.mode = mode;
        pin.active = true;
        pin.last_value = VALUE_SENTINEL;
        pin.last_read_ms = 0;
        pin.pwm_initialized = false;
        pin.read_interval_ms = if read_interval_ms == 0 {
            DEFAULT_READ_INTERVAL_MS
        } else {
            read_interval_ms.clamp(MIN_READ_INTERVAL_MS, MAX_READ_INTERVAL_MS)
        };

        backend.apply_mode(hw_pin, mode);
        true
    }

    pub fn remove_pin(&mut self, name: &str) -> bool {
        match self.find(name) {
            Some(index) => {
                self.pins[index].active = false;
                self.count -= 1;
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&mut self) {
        for pin in &mut self.pins {
            pin.active = false;
        }
        self.count = 0;
    }

    /// Read every input pin whose interval elapsed and publish values that
    /// changed since the previous read (or have never been read).
    pub fn poll(
        &mut self,
        now_ms: u64,
        backend: &mut dyn GpioBackend,
        publish: &mut dyn FnMut(&str, i32),
    ) {
        if self.count == 0 {
            return;
        }

        for pin in &mut self.pins {
            if !pin.active || !pin.mode.is_input() {
                continue;
            }
            if now_ms.wrapping_sub(pin.last_read_ms) < pin.read_interval_ms {
                continue;
            }
            pin.last_read_ms = now_ms;

            let value = if pin.mode == GpioMode::AnalogInput {
                backend.analog_read(pin.hw_pin)
            } else {
                backend.digital_read(pin.hw_pin)
            };

            if value != pin.last_value {
                pin.last_value = value;
                publish(&pin.name, value);
            }
        }
    }

    /// Write a commanded value to a named pin. Values 0/1 drive a clean
    /// digital level, 2-255 a proportional PWM duty cycle.
    pub fn handle_command(&mut self, name: &str, value: i32, backend: &mut dyn GpioBackend) -> bool {
        let Some(index) = self.find(name) else {
            return false;
        };
        let pin = &mut self.pins[index];
        if !pin.mode.is_writable() {
            return false;
        }

        let value = value.clamp(0, 255);
        if value <= 1 {
            if pin.pwm_initialized {
                backend.clear_pwm(pin.hw_pin);
                pin.pwm_initialized = false;
            }
            backend.digital_write(pin.hw_pin, value == 1);
        } else {
            if !pin.pwm_initialized {
                backend.setup_pwm(pin.hw_pin);
                pin.pwm_initialized = true;
            }
            backend.pwm_write(pin.hw_pin, value as u8);
        }
        pin.last_value = value;
        true
    }

    pub fn pin_count(&self) -> usize {
        self.count
    }

    pub fn has_pin(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Last read or written value, `None` for unmanaged pins.
    pub fn pin_value(&self, name: &str) -> Option<i32> {
        self.find(name).map(|index| self.pins[index].last_value)
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.pins
            .iter()
            .position(|pin| pin.active && pin.name.eq_ignore_ascii_case(name))
    }
}

/// Resolve a cloud pin name to a hardware GPIO number. On NodeMCU-style
/// boards the D labels map through the silkscreen table (D4 = GPIO 2) and
/// A0 is the single ADC pin (GPIO 17); everywhere else the digit is the
/// GPIO number.
pub fn resolve_pin_number(name: &str, mapping: PinMapping) -> Option<u8> {
    let mut chars = name.chars();
    let prefix = chars.next()?.to_ascii_uppercase();
    let digits = chars.as_str();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let number: u32 = digits.parse().ok()?;

    match (prefix, mapping) {
        ('D', PinMapping::NodeMcu) => Some(match number {
            0 => 16,
            1 => 5,
            2 => 4,
            3 => 0,
            4 => 2,
            5 => 14,
            6 => 12,
            7 => 13,
            8 => 15,
            9 => 3,
            10 => 1,
            other => u8::try_from(other).ok()?,
        }),
        ('D', PinMapping::Direct) => u8::try_from(number).ok(),
        ('A', PinMapping::NodeMcu) => Some(17),
        ('A', PinMapping::Direct) => u8::try_from(number).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct MockBackend {
        modes: Vec<(u8, GpioMode)>,
        digital_writes: Vec<(u8, bool)>,
        pwm_writes: Vec<(u8, u8)>,
        pwm_setups: Vec<u8>,
        pwm_clears: Vec<u8>,
        digital_value: i32,
        analog_value: i32,
    }

    impl GpioBackend for MockBackend {
        fn apply_mode(&mut self, hw_pin: u8, mode: GpioMode) {
            self.modes.push((hw_pin, mode));
        }
        fn digital_write(&mut self, hw_pin: u8, high: bool) {
            self.digital_writes.push((hw_pin, high));
        }
        fn digital_read(&mut self, _hw_pin: u8) -> i32 {
            self.digital_value
        }
        fn analog_read(&mut self, _hw_pin: u8) -> i32 {
            self.analog_value
        }
        fn setup_pwm(&mut self, hw_pin: u8) {
            self.pwm_setups.push(hw_pin);
        }
        fn pwm_write(&mut self, hw_pin: u8, duty: u8) {
            self.pwm_writes.push((hw_pin, duty));
        }
        fn clear_pwm(&mut self, hw_pin: u8) {
            self.pwm_clears.push(hw_pin);
        }
    }

    #[test]
    fn apply_config_counts_and_skips() {
        let mut manager = GpioManager::new(PinMapping::Direct);
        let mut backend = MockBackend::default();
        let configured = manager.apply_config(
            r#"{"pins":[
                {"pin":"D4","mode":"OUTPUT"},
                {"pin":"A0","mode":"ANALOG_INPUT","interval":500},
                {"pin":"D5","mode":"NOT_A_MODE"},
                {"pin":"Q1","mode":"INPUT"}
            ]}"#,
            &mut backend,
        );
        assert_eq!(configured, 2);
        assert_eq!(manager.pin_count(), 2);
        assert!(manager.has_pin("d4"));
        assert!(!manager.has_pin("D5"));
    }

    #[test]
    fn malformed_config_configures_nothing() {
        let mut manager = GpioManager::new(PinMapping::Direct);
        let mut backend = MockBackend::default();
        assert_eq!(manager.apply_config("not json", &mut backend), 0);
        assert_eq!(manager.apply_config(r#"{"nopins":[]}"#, &mut backend), 0);
    }

    #[test]
    fn add_pin_uppercases_and_applies_mode() {
        let mut manager = GpioManager::new(PinMapping::Direct);
        let mut backend = MockBackend::default();
        assert!(manager.add_pin("d13", GpioMode::Output, 0, &mut backend));
        assert_eq!(backend.modes, vec![(13, GpioMode::Output)]);
        assert_eq!(manager.pin_value("D13"), Some(VALUE_SENTINEL));
    }

    #[test]
    fn re_adding_updates_in_place() {
        let mut manager = GpioManager::new(PinMapping::Direct);
        let mut backend = MockBackend::default();
        manager.add_pin("D2", GpioMode::Output, 0, &mut backend);
        manager.add_pin("D2", GpioMode::Input, 250, &mut backend);
        assert_eq!(manager.pin_count(), 1);
    }

    #[test]
    fn interval_clamps_to_bounds() {
        let mut manager = GpioManager::new(PinMapping::Direct);
        let mut backend = MockBackend::default();
        manager.add_pin("D1", GpioMode::Input, 10, &mut backend);
        manager.add_pin("D2", GpioMode::Input, 120_000, &mut backend);
        manager.add_pin("D3", GpioMode::Input, 0, &mut backend);

        backend.digital_value = 1;
        let mut published = Vec::new();
        // MIN interval pin fires at 100ms, the clamped-max pin much later.
        manager.poll(100, &mut backend, &mut |name, value| {
            published.push((name.to_string(), value));
        });
        assert_eq!(published, vec![("D1".to_string(), 1)]);
    }

    #[test]
    fn poll_publishes_first_read_then_only_changes() {
        let mut manager = GpioManager::new(PinMapping::Direct);
        let mut backend = MockBackend::default();
        manager.add_pin("D7", GpioMode::Input, 100, &mut backend);

        let mut published = Vec::new();
        backend.digital_value = 0;
        manager.poll(100, &mut backend, &mut |name, value| {
            published.push((name.to_string(), value));
        });
        // First read always publishes, even a zero.
        assert_eq!(published, vec![("D7".to_string(), 0)]);

        manager.poll(200, &mut backend, &mut |name, value| {
            published.push((name.to_string(), value));
        });
        assert_eq!(published.len(), 1, "unchanged value re-published");

        backend.digital_value = 1;
        manager.poll(300, &mut backend, &mut |name, value| {
            published.push((name.to_string(), value));
        });
        assert_eq!(published.last(), Some(&("D7".to_string(), 1)));
    }

    #[test]
    fn output_pins_are_never_polled() {
        let mut manager = GpioManager::new(PinMapping::Direct);
        let mut backend = MockBackend::default();
        manager.add_pin("D4", GpioMode::Output, 100, &mut backend);

        let mut fired = false;
        manager.poll(10_000, &mut backend, &mut |_, _| fired = true);
        assert!(!fired);
    }

    #[test]
    fn command_smart_write_digital_and_pwm() {
        let mut manager = GpioManager::new(PinMapping::Direct);
        let mut backend = MockBackend::default();
        manager.add_pin("D9", GpioMode::Output, 0, &mut backend);

        assert!(manager.handle_command("D9", 1, &mut backend));
        assert!(manager.handle_command("D9", 0, &mut backend));
        assert_eq!(backend.digital_writes, vec![(9, true), (9, false)]);

        assert!(manager.handle_command("D9", 128, &mut backend));
        assert!(manager.handle_command("D9", 255, &mut backend));
        assert_eq!(backend.pwm_setups, vec![9]);
        assert_eq!(backend.pwm_writes, vec![(9, 128), (9, 255)]);

        // Back to digital releases the PWM channel first.
        assert!(manager.handle_command("D9", 0, &mut backend));
        assert_eq!(backend.pwm_clears, vec![9]);
        assert_eq!(manager.pin_value("D9"), Some(0));
    }

    #[test]
    fn command_clamps_out_of_range_values() {
        let mut manager = GpioManager::new(PinMapping::Direct);
        let mut backend = MockBackend::default();
        manager.add_pin("D9", GpioMode::Pwm, 0, &mut backend);

        assert!(manager.handle_command("D9", 1_000, &mut backend));
        assert_eq!(backend.pwm_writes, vec![(9, 255)]);
        assert!(manager.handle_command("D9", -5, &mut backend));
        assert_eq!(backend.digital_writes, vec![(9, false)]);
    }

    #[test]
    fn command_refuses_inputs_and_unknown_pins() {
        let mut manager = GpioManager::new(PinMapping::Direct);
        let mut backend = MockBackend::default();
        manager.add_pin("D5", GpioMode::Input, 0, &mut backend);

        assert!(!manager.handle_command("D5", 1, &mut backend));
        assert!(!manager.handle_command("D6", 1, &mut backend));
        assert!(backend.digital_writes.is_empty());
    }

    #[test]
    fn remove_and_clear() {
        let mut manager = GpioManager::new(PinMapping::Direct);
        let mut backend = MockBackend::default();
        manager.add_pin("D1", GpioMode::Input, 0, &mut backend);
        manager.add_pin("D2", GpioMode::Input, 0, &mut backend);

        assert!(manager.remove_pin("d1"));
        assert!(!manager.remove_pin("d1"));
        assert_eq!(manager.pin_count(), 1);

        manager.clear_all();
        assert_eq!(manager.pin_count(), 0);
    }

    #[test]
    fn nodemcu_name_resolution() {
        assert_eq!(resolve_pin_number("D4", PinMapping::NodeMcu), Some(2));
        assert_eq!(resolve_pin_number("D0", PinMapping::NodeMcu), Some(16));
        assert_eq!(resolve_pin_number("A0", PinMapping::NodeMcu), Some(17));
        assert_eq!(resolve_pin_number("D4", PinMapping::Direct), Some(4));
        assert_eq!(resolve_pin_number("A3", PinMapping::Direct), Some(3));
        assert_eq!(resolve_pin_number("V4", PinMapping::Direct), None);
        assert_eq!(resolve_pin_number("D", PinMapping::Direct), None);
        assert_eq!(resolve_pin_number("", PinMapping::Direct), None);
        assert_eq!(resolve_pin_number("D999", PinMapping::Direct), None);
    }

    #[test]
    fn table_is_bounded() {
        let mut manager = GpioManager::new(PinMapping::Direct);
        let mut backend = MockBackend::default();
        for i in 0..MAX_GPIO_PINS {
            assert!(manager.add_pin(&format!("D{i}"), GpioMode::Input, 0, &mut backend));
        }
        assert!(!manager.add_pin("D99", GpioMode::Input, 0, &mut backend));
    }
}
