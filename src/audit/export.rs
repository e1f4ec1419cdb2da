use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use thiserror::Error;

use super::AuditLogRecord;
use crate::ids::hex_encode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditExportFormat {
    Jsonl,
    Csv,
}

impl AuditExportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Jsonl => "application/x-ndjson",
            Self::Csv => "text/csv",
        }
    }
}

impl FromStr for AuditExportFormat {
    type Err = AuditChainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "jsonl" | "ndjson" => Ok(Self::Jsonl),
            "csv" => Ok(Self::Csv),
            other => Err(AuditChainError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuditChainError {
    #[error("unsupported export format: {0}")]
    UnsupportedFormat(String),
    #[error("json error at line {line}: {source}")]
    Json {
        line: usize,
        source: serde_json::Error,
    },
    #[error("hash chain mismatch at line {line}: prev_hash expected {expected} got {got}")]
    PrevHashMismatch {
        line: usize,
        expected: String,
        got: String,
    },
    #[error("hash mismatch at line {line}: expected {expected} got {got}")]
    HashMismatch {
        line: usize,
        expected: String,
        got: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct AuditExportRecord {
    #[serde(flatten)]
    record: AuditLogRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prev_hash: Option<String>,
    hash: String,
}

pub fn audit_chain_hash(prev_hash: Option<&str>, record: &AuditLogRecord) -> String {
    let mut hasher = sha2::Sha256::new();
    if let Some(prev_hash) = prev_hash {
        hasher.update(prev_hash.as_bytes());
    }
    hasher.update(b"\n");
    if let Ok(serialized) = serde_json::to_vec(record) {
        hasher.update(&serialized);
    }
    hex_encode(&hasher.finalize())
}

fn csv_escape(value: &str) -> String {
    if !value.contains([',', '"', '\n', '\r']) {
        return value.to_string();
    }
    let escaped = value.replace('"', "\"\"");
    format!("\"{escaped}\"")
}

/// Renders records oldest first, each line chained to the previous hash.
pub fn render_audit_export(
    format: AuditExportFormat,
    logs: Vec<AuditLogRecord>,
) -> Result<String, serde_json::Error> {
    let mut prev_hash: Option<String> = None;
    let mut out = String::new();

    match format {
        AuditExportFormat::Jsonl => {
            for log in logs {
                let hash = audit_chain_hash(prev_hash.as_deref(), &log);
                let record = AuditExportRecord {
                    record: log,
                    prev_hash: prev_hash.clone(),
                    hash: hash.clone(),
                };
                prev_hash = Some(hash);
                out.push_str(&serde_json::to_string(&record)?);
                out.push('\n');
            }
        }
        AuditExportFormat::Csv => {
            out.push_str("id,ts_ms,kind,actor,description,payload_json,prev_hash,hash\n");
            for log in logs {
                let hash = audit_chain_hash(prev_hash.as_deref(), &log);
                let payload_json = serde_json::to_string(&log.payload)?;
                out.push_str(&format!(
                    "{},{},{},{},{},{},{},{}\n",
                    log.id,
                    log.ts_ms,
                    csv_escape(&log.kind),
                    csv_escape(&log.actor),
                    csv_escape(&log.description),
                    csv_escape(&payload_json),
                    csv_escape(prev_hash.as_deref().unwrap_or("")),
                    csv_escape(&hash)
                ));
                prev_hash = Some(hash);
            }
        }
    }
    Ok(out)
}

/// Checks a JSONL export; returns the number of verified records.
pub fn verify_audit_chain(jsonl: &str) -> Result<usize, AuditChainError> {
    let mut prev_hash: Option<String> = None;
    let mut verified = 0usize;
    for (line_no, line) in jsonl.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: AuditExportRecord =
            serde_json::from_str(line).map_err(|source| AuditChainError::Json {
                line: line_no + 1,
                source,
            })?;

        let expected_prev = prev_hash.as_deref().unwrap_or("");
        let got_prev = record.prev_hash.as_deref().unwrap_or("");
        if expected_prev != got_prev {
            return Err(AuditChainError::PrevHashMismatch {
                line: line_no + 1,
                expected: expected_prev.to_string(),
                got: got_prev.to_string(),
            });
        }

        let expected_hash = audit_chain_hash(prev_hash.as_deref(), &record.record);
        if record.hash != expected_hash {
            return Err(AuditChainError::HashMismatch {
                line: line_no + 1,
                expected: expected_hash,
                got: record.hash,
            });
        }
        prev_hash = Some(record.hash);
        verified += 1;
    }
    Ok(verified)
}
