use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::LedgerOptions;
use crate::auth::{RejectAll, SecondFactor};
use crate::clock::Clock;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub const DEFAULT_AUDIT_ACTOR: &str = "admin";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unsupported config extension: {0} (expected toml, yaml, yml or json)")]
    UnsupportedFormat(String),
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "config-yaml")]
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,
    /// Grants admin read and write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
    /// Grants admin read only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_read_token: Option<String>,
    #[serde(default = "default_audit_actor")]
    pub audit_actor_default: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_factor: Option<SecondFactorConfig>,
    #[serde(default)]
    pub reject_double_reversal: bool,
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            admin_token: None,
            admin_read_token: None,
            audit_actor_default: default_audit_actor(),
            second_factor: None,
            reject_double_reversal: false,
            listen: default_listen(),
        }
    }
}

impl std::fmt::Debug for LedgerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerConfig")
            .field("sqlite_path", &self.sqlite_path)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field(
                "admin_read_token",
                &self.admin_read_token.as_ref().map(|_| "<redacted>"),
            )
            .field("audit_actor_default", &self.audit_actor_default)
            .field("second_factor", &self.second_factor)
            .field("reject_double_reversal", &self.reject_double_reversal)
            .field("listen", &self.listen)
            .finish()
    }
}

fn default_audit_actor() -> String {
    DEFAULT_AUDIT_ACTOR.to_string()
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SecondFactorConfig {
    Totp {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_hex: Option<String>,
        /// Name of an environment variable holding the hex secret.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_env: Option<String>,
        #[serde(default = "default_step_seconds")]
        step_seconds: u64,
        #[serde(default = "default_digits")]
        digits: u32,
        #[serde(default = "default_skew_steps")]
        skew_steps: u64,
    },
}

impl std::fmt::Debug for SecondFactorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Totp {
                secret_hex,
                secret_env,
                step_seconds,
                digits,
                skew_steps,
            } => f
                .debug_struct("Totp")
                .field("secret_hex", &secret_hex.as_ref().map(|_| "<redacted>"))
                .field("secret_env", secret_env)
                .field("step_seconds", step_seconds)
                .field("digits", digits)
                .field("skew_steps", skew_steps)
                .finish(),
        }
    }
}

fn default_step_seconds() -> u64 {
    30
}

fn default_digits() -> u32 {
    6
}

fn default_skew_steps() -> u64 {
    1
}

impl LedgerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|value| value.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let config = Self::parse_str(&ext, &raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse_str(format: &str, raw: &str) -> Result<Self, ConfigError> {
        match format {
            "toml" => Ok(toml::from_str(raw)?),
            "json" => Ok(serde_json::from_str(raw)?),
            #[cfg(feature = "config-yaml")]
            "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audit_actor_default.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "audit_actor_default must not be empty".to_string(),
            ));
        }
        for (name, token) in [
            ("admin_token", &self.admin_token),
            ("admin_read_token", &self.admin_read_token),
        ] {
            if token.as_deref().is_some_and(|t| t.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!("{name} must not be empty")));
            }
        }
        if let Some(SecondFactorConfig::Totp { step_seconds, .. }) = &self.second_factor {
            if *step_seconds == 0 {
                return Err(ConfigError::Invalid(
                    "second_factor.step_seconds must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn ledger_options(&self) -> LedgerOptions {
        LedgerOptions {
            reject_double_reversal: self.reject_double_reversal,
        }
    }

    /// Without a configured second factor every revoke is refused.
    pub fn build_second_factor(
        &self,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<dyn SecondFactor>, ConfigError> {
        let Some(second_factor) = &self.second_factor else {
            tracing::warn!("no second factor configured; revokes will be rejected");
            return Ok(Arc::new(RejectAll));
        };
        build_configured_second_factor(second_factor, clock)
    }
}

#[cfg(feature = "auth")]
fn build_configured_second_factor(
    config: &SecondFactorConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn SecondFactor>, ConfigError> {
    use crate::auth::{TotpConfig, TotpVerifier};

    let SecondFactorConfig::Totp {
        secret_hex,
        secret_env,
        step_seconds,
        digits,
        skew_steps,
    } = config;

    let secret_hex = match (secret_hex, secret_env) {
        (Some(secret), _) => secret.trim().to_string(),
        (None, Some(var)) => std::env::var(var)
            .map(|value| value.trim().to_string())
            .map_err(|_| ConfigError::Invalid(format!("second factor secret env {var} not set")))?,
        (None, None) => {
            return Err(ConfigError::Invalid(
                "second_factor requires secret_hex or secret_env".to_string(),
            ));
        }
    };
    let secret = crate::ids::hex_decode(&secret_hex)
        .ok_or_else(|| ConfigError::Invalid("second factor secret is not valid hex".to_string()))?;
    if secret.is_empty() {
        return Err(ConfigError::Invalid(
            "second factor secret must not be empty".to_string(),
        ));
    }

    let totp = TotpConfig {
        secret,
        step_seconds: *step_seconds,
        digits: *digits,
        skew_steps: *skew_steps,
    };
    Ok(Arc::new(TotpVerifier::new(totp, clock)))
}

#[cfg(not(feature = "auth"))]
fn build_configured_second_factor(
    _config: &SecondFactorConfig,
    _clock: Arc<dyn Clock>,
) -> Result<Arc<dyn SecondFactor>, ConfigError> {
    Err(ConfigError::Invalid(
        "second factor configured but the `auth` feature is disabled".to_string(),
    ))
}
