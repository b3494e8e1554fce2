//! Identifier generation
//!
//! Ids are random and never checked for collisions; the id space is large
//! enough. Name uniqueness is a separate concern handled by the engine.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::types::Kind;

/// Length of the hex part of an AWS-style id
const AWS_ID_HEX_LEN: usize = 17;

/// Generate a new id in the format of the kind's family
pub fn new_id(kind: Kind) -> String {
    match kind.id_prefix() {
        Some(prefix) => aws_id(prefix),
        None => gcp_id(),
    }
}

/// `<prefix>-<17 hex>`
pub fn aws_id(prefix: &str) -> String {
    let bytes: [u8; 9] = rand::random();
    let hex = hex::encode(bytes);
    format!("{}-{}", prefix, &hex[..AWS_ID_HEX_LEN])
}

/// 19-digit decimal id
pub fn gcp_id() -> String {
    rand::thread_rng()
        .gen_range(1_000_000_000_000_000_000u64..10_000_000_000_000_000_000u64)
        .to_string()
}

/// Locally administered unicast MAC address
pub fn new_mac_address() -> String {
    let mut bytes: [u8; 6] = rand::random();
    bytes[0] = (bytes[0] & 0xfc) | 0x02;
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// `operation-<millis>-<hex>`
pub fn new_operation_name() -> String {
    let suffix: [u8; 4] = rand::random();
    format!(
        "operation-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        hex::encode(suffix)
    )
}

/// Generate a label fingerprint that differs from `previous`
pub fn new_fingerprint(labels: &BTreeMap<String, String>, previous: Option<&str>) -> String {
    loop {
        let mut hasher = Sha256::new();
        for (key, value) in labels {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(uuid::Uuid::new_v4().as_bytes());
        let digest = hasher.finalize();
        let fingerprint = STANDARD.encode(&digest[..8]);
        if previous != Some(fingerprint.as_str()) {
            return fingerprint;
        }
    }
}
