//! Request identifier generation.
//!
//! Every tool invocation posted to the server carries a `msg-` prefixed id
//! that the server echoes back on the correlated `tool_result` event. Ids
//! only need to be unique within one connection's lifetime.

const MESSAGE_ID_BYTES: usize = 16;

/// Generate a fresh `msg-<hex>` request id.
///
/// Falls back to a process-local counter if the OS entropy source is
/// unavailable, which keeps correlation working even on exotic platforms.
pub fn next_message_id() -> String {
    let mut bytes = [0_u8; MESSAGE_ID_BYTES];
    if getrandom::fill(&mut bytes).is_err() {
        use std::sync::atomic::{AtomicU64, Ordering};
        static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(1);
        let counter = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);
        bytes[..8].copy_from_slice(&counter.to_be_bytes());
    }

    let mut id = String::with_capacity(4 + MESSAGE_ID_BYTES * 2);
    id.push_str("msg-");
    for byte in bytes {
        use std::fmt::Write;
        let _ = write!(id, "{byte:02x}");
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_have_expected_shape() {
        let id = next_message_id();
        assert!(id.starts_with("msg-"));
        assert_eq!(id.len(), 4 + MESSAGE_ID_BYTES * 2);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn message_ids_are_unique() {
        let first = next_message_id();
        let second = next_message_id();
        assert_ne!(first, second);
    }
}
