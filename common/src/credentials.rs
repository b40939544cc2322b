//! Fixed-layout credential record persisted to non-volatile storage:
//! magic, SSID, password, auth token, then an XOR checksum over every
//! preceding byte. Anything that fails validation reads as "not
//! provisioned" — a corrupt record must never take the device down.

pub const CRED_MAGIC: u16 = 0x5657; // "VW"

pub const MAX_SSID_LEN: usize = 33;
pub const MAX_PASS_LEN: usize = 65;
pub const MAX_TOKEN_LEN: usize = 64;

pub const RECORD_LEN: usize = 2 + MAX_SSID_LEN + MAX_PASS_LEN + MAX_TOKEN_LEN + 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredCredentials {
    pub ssid: String,
    pub password: String,
    pub auth_token: String,
}

impl StoredCredentials {
    pub fn new(
        ssid: impl Into<String>,
        password: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Serialize to the fixed on-flash layout. Overlong fields truncate to
    /// their field width (minus the NUL terminator byte).
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut record = [0_u8; RECORD_LEN];
        record[..2].copy_from_slice(&CRED_MAGIC.to_le_bytes());

        let mut offset = 2;
        for (field, width) in [
            (self.ssid.as_str(), MAX_SSID_LEN),
            (self.password.as_str(), MAX_PASS_LEN),
            (self.auth_token.as_str(), MAX_TOKEN_LEN),
        ] {
            let bytes = field.as_bytes();
            let len = bytes.len().min(width - 1);
            record[offset..offset + len].copy_from_slice(&bytes[..len]);
            offset += width;
        }

        record[RECORD_LEN - 1] = xor_checksum(&record[..RECORD_LEN - 1]);
        record
    }

    /// Decode a stored record. `None` on wrong length, magic mismatch,
    /// checksum mismatch or an empty SSID.
    pub fn decode(record: &[u8]) -> Option<Self> {
        if record.len() != RECORD_LEN {
            return None;
        }
        let magic = u16::from_le_bytes([record[0], record[1]]);
        if magic != CRED_MAGIC {
            return None;
        }
        if record[RECORD_LEN - 1] != xor_checksum(&record[..RECORD_LEN - 1]) {
            return None;
        }

        let ssid = field_str(&record[2..2 + MAX_SSID_LEN]);
        let password = field_str(&record[2 + MAX_SSID_LEN..2 + MAX_SSID_LEN + MAX_PASS_LEN]);
        let auth_token = field_str(
            &record[2 + MAX_SSID_LEN + MAX_PASS_LEN..2 + MAX_SSID_LEN + MAX_PASS_LEN + MAX_TOKEN_LEN],
        );

        if ssid.is_empty() {
            return None;
        }

        Some(Self {
            ssid,
            password,
            auth_token,
        })
    }

    /// Whether a raw record would decode successfully.
    pub fn is_valid(record: &[u8]) -> bool {
        Self::decode(record).is_some()
    }
}

fn field_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |sum, b| sum ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trip_is_byte_identical() {
        let credentials = StoredCredentials::new("HomeNet", "hunter22", "tok-abc-123");
        let record = credentials.encode();
        assert_eq!(record.len(), RECORD_LEN);
        assert_eq!(StoredCredentials::decode(&record), Some(credentials));
    }

    #[test]
    fn empty_password_and_token_survive() {
        let credentials = StoredCredentials::new("OpenNet", "", "");
        let decoded = StoredCredentials::decode(&credentials.encode()).unwrap();
        assert_eq!(decoded.password, "");
        assert_eq!(decoded.auth_token, "");
    }

    #[test]
    fn corrupting_any_byte_invalidates() {
        let record = StoredCredentials::new("HomeNet", "hunter22", "tok-abc-123").encode();
        for i in 0..RECORD_LEN {
            let mut corrupt = record;
            corrupt[i] ^= 0x01;
            assert!(
                !StoredCredentials::is_valid(&corrupt),
                "flip at byte {i} went undetected"
            );
        }
    }

    #[test]
    fn wrong_magic_or_length_rejected() {
        let mut record = StoredCredentials::new("HomeNet", "p", "t").encode();
        record[0] = 0x00;
        assert!(StoredCredentials::decode(&record).is_none());

        assert!(StoredCredentials::decode(&[0_u8; 4]).is_none());
        assert!(StoredCredentials::decode(&[]).is_none());
    }

    #[test]
    fn empty_ssid_reads_as_not_provisioned() {
        let record = StoredCredentials::new("", "pass", "token").encode();
        assert!(StoredCredentials::decode(&record).is_none());
    }

    #[test]
    fn overlong_fields_truncate_to_field_width() {
        let credentials = StoredCredentials::new(
            "s".repeat(100),
            "p".repeat(100),
            "t".repeat(100),
        );
        let decoded = StoredCredentials::decode(&credentials.encode()).unwrap();
        assert_eq!(decoded.ssid.len(), MAX_SSID_LEN - 1);
        assert_eq!(decoded.password.len(), MAX_PASS_LEN - 1);
        assert_eq!(decoded.auth_token.len(), MAX_TOKEN_LEN - 1);
    }
}
