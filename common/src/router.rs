//! Inbound payload helpers. ACK payloads are scanned for their literal keys
//! instead of going through a full JSON parse, so a malformed payload can
//! never cost more than a substring search on the hot path.

/// Copy an inbound payload into an owned string, truncating at
/// `max_len` bytes and replacing invalid UTF-8. Truncation is an explicit,
/// tested behavior rather than a side effect of a buffer copy.
pub fn payload_to_string(payload: &[u8], max_len: usize) -> String {
    let slice = if payload.len() > max_len {
        &payload[..max_len]
    } else {
        payload
    };
    String::from_utf8_lossy(slice).into_owned()
}

/// Extract `msgId` and `ok` from an ACK payload like
/// `{"msgId":"0001_1234","ok":true}`. Returns `None` when either key is
/// missing or unterminated.
pub fn parse_ack(payload: &str) -> Option<(String, bool)> {
    let id_start = payload.find("\"msgId\":\"")? + "\"msgId\":\"".len();
    let rest = &payload[id_start..];
    let id_end = rest.find('"')?;
    let msg_id = &rest[..id_end];

    let ok_start = payload.find("\"ok\":")?;
    let success = payload[ok_start + "\"ok\":".len()..]
        .trim_start()
        .starts_with("true");

    Some((msg_id.to_string(), success))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ack_parses_both_flags() {
        assert_eq!(
            parse_ack(r#"{"msgId":"0001_1234","ok":true}"#),
            Some(("0001_1234".to_string(), true))
        );
        assert_eq!(
            parse_ack(r#"{"msgId":"0001_1234","ok":false}"#),
            Some(("0001_1234".to_string(), false))
        );
    }

    #[test]
    fn ack_tolerates_whitespace_and_field_order() {
        assert_eq!(
            parse_ack(r#"{ "ok": true, "msgId": "A1_9" }"#),
            Some(("A1_9".to_string(), true))
        );
    }

    #[test]
    fn malformed_ack_yields_none() {
        assert_eq!(parse_ack(r#"{"ok":true}"#), None);
        assert_eq!(parse_ack(r#"{"msgId":"no-ok-field"}"#), None);
        assert_eq!(parse_ack(r#"{"msgId":"unterminated"#), None);
        assert_eq!(parse_ack("not json at all"), None);
    }

    #[test]
    fn payload_truncates_at_limit() {
        let long = vec![b'a'; 100];
        assert_eq!(payload_to_string(&long, 10).len(), 10);
        assert_eq!(payload_to_string(b"short", 10), "short");
    }

    #[test]
    fn payload_replaces_invalid_utf8() {
        let bytes = [b'o', b'k', 0xFF, 0xFE];
        let text = payload_to_string(&bytes, 16);
        assert!(text.starts_with("ok"));
    }
}
