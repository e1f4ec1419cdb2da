use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static ID_SEQ: AtomicU64 = AtomicU64::new(0);

pub fn generate_event_id() -> String {
    generate_id("evt")
}

pub fn generate_batch_id() -> String {
    generate_id("rvb")
}

fn generate_id(prefix: &str) -> String {
    let mut bytes = [0u8; 16];
    if getrandom::fill(&mut bytes).is_err() {
        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis())
            .unwrap_or(0);
        let seq = ID_SEQ.fetch_add(1, Ordering::Relaxed);
        return format!("{prefix}_fallback_{ts_ms}_{seq}");
    }
    format!("{prefix}_{}", hex_encode(&bytes))
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

pub(crate) fn hex_decode(raw: &str) -> Option<Vec<u8>> {
    let raw = raw.trim();
    if raw.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(raw.len() / 2);
    for pair in raw.as_bytes().chunks(2) {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        out.push(((hi << 4) | lo) as u8);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_prefixed_and_unique() {
        let a = generate_event_id();
        let b = generate_event_id();
        assert!(a.starts_with("evt_"));
        assert_eq!(a.len(), 4 + 32);
        assert_ne!(a, b);
        assert!(generate_batch_id().starts_with("rvb_"));
    }

    #[test]
    fn hex_decode_inverts_encode() {
        let bytes = [0x00, 0x7f, 0xab, 0xff];
        let encoded = hex_encode(&bytes);
        assert_eq!(encoded, "007fabff");
        assert_eq!(hex_decode(&encoded).as_deref(), Some(&bytes[..]));
        assert_eq!(hex_decode("abc"), None);
        assert_eq!(hex_decode("zz"), None);
    }
}
