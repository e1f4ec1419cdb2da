//! Second-factor checks gating irreversible admin actions.

#[cfg(feature = "auth")]
pub mod totp;

use async_trait::async_trait;

#[cfg(feature = "auth")]
pub use totp::{TotpConfig, TotpVerifier};

#[async_trait]
pub trait SecondFactor: Send + Sync {
    async fn validate(&self, code: &str) -> bool;
}

/// Used when no second factor is configured: nothing gets through.
#[derive(Debug, Default)]
pub struct RejectAll;

#[async_trait]
impl SecondFactor for RejectAll {
    async fn validate(&self, _code: &str) -> bool {
        false
    }
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reject_all_rejects_everything() {
        assert!(!RejectAll.validate("").await);
        assert!(!RejectAll.validate("123456").await);
    }

    #[test]
    fn constant_time_eq_compares_contents() {
        assert!(constant_time_eq(b"123456", b"123456"));
        assert!(!constant_time_eq(b"123456", b"123457"));
        assert!(!constant_time_eq(b"12345", b"123456"));
    }
}
