//! Topic scheme: everything lives under a device-scoped root
//! `vwire/<deviceId>/...`.

pub const TOPIC_ROOT: &str = "vwire";

pub fn status_topic(device_id: &str) -> String {
    format!("{TOPIC_ROOT}/{device_id}/status")
}

pub fn command_wildcard(device_id: &str) -> String {
    format!("{TOPIC_ROOT}/{device_id}/cmd/#")
}

pub fn ack_topic(device_id: &str) -> String {
    format!("{TOPIC_ROOT}/{device_id}/ack")
}

pub fn data_topic(device_id: &str) -> String {
    format!("{TOPIC_ROOT}/{device_id}/data")
}

pub fn ota_topic(device_id: &str) -> String {
    format!("{TOPIC_ROOT}/{device_id}/ota")
}

pub fn ota_status_topic(device_id: &str) -> String {
    format!("{TOPIC_ROOT}/{device_id}/ota_status")
}

pub fn pin_topic(device_id: &str, pin: u8) -> String {
    format!("{TOPIC_ROOT}/{device_id}/pin/V{pin}")
}

pub fn gpio_pin_topic(device_id: &str, pin_name: &str) -> String {
    format!("{TOPIC_ROOT}/{device_id}/pin/{pin_name}")
}

pub fn sync_all_topic(device_id: &str) -> String {
    format!("{TOPIC_ROOT}/{device_id}/sync")
}

pub fn sync_pin_topic(device_id: &str, pin: u8) -> String {
    format!("{TOPIC_ROOT}/{device_id}/sync/V{pin}")
}

pub fn heartbeat_topic(device_id: &str) -> String {
    format!("{TOPIC_ROOT}/{device_id}/heartbeat")
}

pub fn notify_topic(device_id: &str) -> String {
    format!("{TOPIC_ROOT}/{device_id}/notify")
}

pub fn alarm_topic(device_id: &str) -> String {
    format!("{TOPIC_ROOT}/{device_id}/alarm")
}

pub fn email_topic(device_id: &str) -> String {
    format!("{TOPIC_ROOT}/{device_id}/email")
}

pub fn log_topic(device_id: &str) -> String {
    format!("{TOPIC_ROOT}/{device_id}/log")
}

pub fn pinconfig_topic(device_id: &str) -> String {
    format!("{TOPIC_ROOT}/{device_id}/pinconfig")
}

pub fn is_ack_topic(topic: &str) -> bool {
    topic.ends_with("/ack")
}

pub fn is_ota_topic(topic: &str) -> bool {
    topic.ends_with("/ota")
}

pub fn is_pinconfig_topic(topic: &str) -> bool {
    topic.ends_with("/pinconfig")
}

/// The raw pin token following the `/cmd/` infix, if any.
pub fn command_pin_token(topic: &str) -> Option<&str> {
    let start = topic.find("/cmd/")? + "/cmd/".len();
    let token = &topic[start..];
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Parse a virtual pin number from a command token, accepting an optional
/// single leading letter ("V7", "v7" and "7" all mean pin 7).
pub fn parse_pin_number(token: &str) -> Option<u16> {
    let digits = match token.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => &token[1..],
        Some(_) => token,
        None => return None,
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn topics_are_device_scoped() {
        assert_eq!(status_topic("tok123"), "vwire/tok123/status");
        assert_eq!(command_wildcard("tok123"), "vwire/tok123/cmd/#");
        assert_eq!(pin_topic("tok123", 7), "vwire/tok123/pin/V7");
        assert_eq!(sync_pin_topic("tok123", 0), "vwire/tok123/sync/V0");
        assert_eq!(ota_status_topic("tok123"), "vwire/tok123/ota_status");
    }

    #[test]
    fn ack_suffix_must_be_exact() {
        assert!(is_ack_topic("vwire/tok/ack"));
        assert!(!is_ack_topic("vwire/tok/ack2"));
        assert!(!is_ack_topic("vwire/tok/ack/extra"));
        assert!(!is_ack_topic("vwire/tok/track"));
    }

    #[test]
    fn ota_suffix_must_be_exact() {
        assert!(is_ota_topic("vwire/tok/ota"));
        assert!(!is_ota_topic("vwire/tok/ota_status"));
    }

    #[test]
    fn command_token_extraction() {
        assert_eq!(command_pin_token("vwire/tok/cmd/V7"), Some("V7"));
        assert_eq!(command_pin_token("vwire/tok/cmd/D13"), Some("D13"));
        assert_eq!(command_pin_token("vwire/tok/cmd/"), None);
        assert_eq!(command_pin_token("vwire/tok/status"), None);
    }

    #[test]
    fn pin_number_parsing() {
        assert_eq!(parse_pin_number("V7"), Some(7));
        assert_eq!(parse_pin_number("v7"), Some(7));
        assert_eq!(parse_pin_number("7"), Some(7));
        assert_eq!(parse_pin_number("V127"), Some(127));
        assert_eq!(parse_pin_number("D13"), Some(13));
        assert_eq!(parse_pin_number("V"), None);
        assert_eq!(parse_pin_number(""), None);
        assert_eq!(parse_pin_number("V7x"), None);
        assert_eq!(parse_pin_number("VV7"), None);
    }
}
