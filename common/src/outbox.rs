//! Reliable-delivery pending table: a fixed-capacity slot array tracking
//! envelopes that still await an application-level ACK.

use log::{debug, warn};

use crate::config::{MAX_PENDING_MESSAGES, MAX_PENDING_VALUE_LEN};
use crate::error::VwireError;
use crate::types::DataEnvelope;

/// Sentinel identifier reported to the delivery callback when a send fails
/// before a slot could be allocated.
pub const QUEUE_FULL_SENTINEL: &str = "queue_full";

/// Inbound ACK identifiers longer than this are truncated before matching.
const MSG_ID_MAX_LEN: usize = 15;

#[derive(Debug, Clone, Default)]
struct PendingSlot {
    msg_id: String,
    pin: u8,
    value: String,
    sent_at_ms: u64,
    retries: u8,
    active: bool,
}

impl PendingSlot {
    fn envelope(&self) -> DataEnvelope {
        DataEnvelope {
            msg_id: self.msg_id.clone(),
            pin: format!("V{}", self.pin),
            value: self.value.clone(),
        }
    }
}

/// Result of one retry pass: envelopes to republish and identifiers that
/// exhausted their retries and must be reported as failed.
#[derive(Debug, Default)]
pub struct RetryPass {
    pub resend: Vec<DataEnvelope>,
    pub dropped: Vec<String>,
}

pub struct Outbox {
    slots: [PendingSlot; MAX_PENDING_MESSAGES],
    counter: u32,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
            counter: 0,
        }
    }

    /// Claim a free slot and build the envelope for the initial publish.
    /// Identifier uniqueness is best-effort: a wrapping 16-bit counter plus
    /// the clock's low digits, collisions possible only under pathological
    /// timing.
    pub fn alloc(&mut self, pin: u8, value: &str, now_ms: u64) -> Result<DataEnvelope, VwireError> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| !slot.active)
            .ok_or(VwireError::QueueFull)?;

        self.counter = self.counter.wrapping_add(1);
        slot.msg_id = format!("{:04X}_{}", self.counter & 0xFFFF, now_ms % 10_000);
        slot.pin = pin;
        slot.value = truncate_value(value);
        slot.sent_at_ms = now_ms;
        slot.retries = 0;
        slot.active = true;

        Ok(slot.envelope())
    }

    /// Advance every slot past its ACK timeout: republish while retries
    /// remain, otherwise free the slot and report the drop.
    pub fn process_retries(
        &mut self,
        now_ms: u64,
        ack_timeout_ms: u64,
        max_retries: u8,
    ) -> RetryPass {
        let mut pass = RetryPass::default();

        for slot in &mut self.slots {
            if !slot.active {
                continue;
            }
            if now_ms.wrapping_sub(slot.sent_at_ms) < ack_timeout_ms {
                continue;
            }

            if slot.retries < max_retries {
                slot.retries += 1;
                slot.sent_at_ms = now_ms;
                debug!(
                    "retry {}/{} for message {}",
                    slot.retries, max_retries, slot.msg_id
                );
                pass.resend.push(slot.envelope());
            } else {
                warn!(
                    "message {} dropped after {} retries",
                    slot.msg_id, max_retries
                );
                slot.active = false;
                pass.dropped.push(std::mem::take(&mut slot.msg_id));
            }
        }

        pass
    }

    /// Free the slot matching `msg_id`. Returns false for unknown
    /// identifiers (already removed or duplicate ACK) — not an error.
    pub fn acknowledge(&mut self, msg_id: &str) -> bool {
        let msg_id = &msg_id[..msg_id.len().min(MSG_ID_MAX_LEN)];
        for slot in &mut self.slots {
            if slot.active && slot.msg_id == msg_id {
                slot.active = false;
                return true;
            }
        }
        debug!("ack for unknown message {msg_id} (possibly duplicate)");
        false
    }

    pub fn pending_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.active).count()
    }

    pub fn active_ids(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|slot| slot.active)
            .map(|slot| slot.msg_id.as_str())
            .collect()
    }
}

fn truncate_value(value: &str) -> String {
    if value.len() <= MAX_PENDING_VALUE_LEN {
        return value.to_string();
    }
    let mut end = MAX_PENDING_VALUE_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}
