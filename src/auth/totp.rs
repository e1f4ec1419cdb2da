use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{SecondFactor, constant_time_eq};
use crate::clock::Clock;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct TotpConfig {
    pub secret: Vec<u8>,
    pub step_seconds: u64,
    pub digits: u32,
    pub skew_steps: u64,
}

impl std::fmt::Debug for TotpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TotpConfig")
            .field("secret", &"<redacted>")
            .field("step_seconds", &self.step_seconds)
            .field("digits", &self.digits)
            .field("skew_steps", &self.skew_steps)
            .finish()
    }
}

impl TotpConfig {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            step_seconds: 30,
            digits: 6,
            skew_steps: 1,
        }
    }
}

/// RFC 6238 time-based codes over HMAC-SHA256. A code is accepted once; any
/// code from the same or an earlier step is refused afterwards.
pub struct TotpVerifier {
    config: TotpConfig,
    clock: Arc<dyn Clock>,
    last_accepted_counter: Mutex<Option<u64>>,
}

impl TotpVerifier {
    pub fn new(config: TotpConfig, clock: Arc<dyn Clock>) -> Self {
        let config = TotpConfig {
            step_seconds: config.step_seconds.max(1),
            digits: config.digits.clamp(6, 9),
            ..config
        };
        Self {
            config,
            clock,
            last_accepted_counter: Mutex::new(None),
        }
    }

    pub fn current_counter(&self) -> u64 {
        self.clock.now_millis() / 1000 / self.config.step_seconds
    }

    pub fn current_code(&self) -> String {
        self.code_at_counter(self.current_counter())
    }

    pub fn code_at_counter(&self, counter: u64) -> String {
        totp_code(&self.config.secret, counter, self.config.digits)
    }

    fn verify_at(&self, code: &str) -> Option<u64> {
        let current = self.current_counter();
        let first = current.saturating_sub(self.config.skew_steps);
        let last = current.saturating_add(self.config.skew_steps);
        (first..=last).find(|counter| {
            constant_time_eq(self.code_at_counter(*counter).as_bytes(), code.as_bytes())
        })
    }
}

#[async_trait]
impl SecondFactor for TotpVerifier {
    async fn validate(&self, code: &str) -> bool {
        let code = code.trim();
        if code.len() != self.config.digits as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        if self.config.secret.is_empty() {
            return false;
        }
        let Some(counter) = self.verify_at(code) else {
            return false;
        };

        let mut last = self
            .last_accepted_counter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if last.is_some_and(|last| counter <= last) {
            return false;
        }
        *last = Some(counter);
        true
    }
}

fn totp_code(secret: &[u8], counter: u64, digits: u32) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return String::new();
    };
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = usize::from(digest[digest.len() - 1] & 0x0f);
    let binary = (u32::from(digest[offset] & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);
    let modulus = 10u64.pow(digits);
    let value = u64::from(binary) % modulus;
    format!("{value:0width$}", width = digits as usize)
}
