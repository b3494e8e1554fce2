//! Resource Implementations
//!
//! One module per emulated kind. Each implements [`Record`](crate::record::Record)
//! and [`ResourceKind`](crate::record::ResourceKind); kind-specific verbs are
//! added to [`Engine`](crate::engine::Engine) from the same module.

pub mod firewall;
pub mod instance;
pub mod instance_group_manager;
pub mod instance_template;
pub mod network;
pub mod network_interface;
pub mod security_group;
pub mod subnet;
pub mod subnetwork;
pub mod vpc;
pub mod vpn_gateway;

use crate::engine::EngineConfig;
use crate::record::Record;
use crate::types::ResourceMeta;
use crate::{Error, Result};
use ipnetwork::Ipv4Network;
use serde_json::{json, Map, Value};

/// EC2 `tagSet` projection of a label map
pub(crate) fn tag_set(meta: &ResourceMeta) -> Value {
    Value::Array(
        meta.labels
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect(),
    )
}

/// Envelope fields shared by every Compute-style projection
pub(crate) fn gcp_envelope(record: &dyn Record, config: &EngineConfig) -> Map<String, Value> {
    let kind = record.kind();
    let meta = record.meta();
    let mut map = Map::new();
    map.insert("kind".into(), json!(kind.gcp_kind()));
    map.insert("id".into(), json!(meta.id));
    map.insert("name".into(), json!(meta.name));
    map.insert("creationTimestamp".into(), json!(meta.creation_timestamp()));
    map.insert("selfLink".into(), json!(config.located_link(kind, record.location(), &meta.name)));
    if !meta.labels.is_empty() {
        map.insert("labels".into(), json!(meta.labels));
    }
    map.insert("labelFingerprint".into(), json!(meta.label_fingerprint));
    map
}

/// Filter attributes every Compute-style kind answers to
pub(crate) fn gcp_common_filter(meta: &ResourceMeta, name: &str) -> Option<Vec<String>> {
    match name {
        "name" => Some(vec![meta.name.clone()]),
        "id" => Some(vec![meta.id.clone()]),
        _ => None,
    }
}

/// Parse an IPv4 CIDR block, requiring the address to be the network address
pub(crate) fn parse_cidr(field: &str, value: &str) -> Result<Ipv4Network> {
    let net: Ipv4Network = value
        .trim()
        .parse()
        .map_err(|_| Error::invalid(format!("Value '{}' for {} is not a valid CIDR block", value, field)))?;
    if net.ip() != net.network() {
        return Err(Error::invalid(format!(
            "Value '{}' for {} is not a network address; did you mean {}/{}?",
            value,
            field,
            net.network(),
            net.prefix()
        )));
    }
    Ok(net)
}

/// Whether two blocks share any address
pub(crate) fn overlaps(a: &Ipv4Network, b: &Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

/// Whether `inner` lies entirely inside `outer`
pub(crate) fn within(outer: &Ipv4Network, inner: &Ipv4Network) -> bool {
    inner.prefix() >= outer.prefix() && outer.contains(inner.network())
}

/// Pick `request[field]` when present, otherwise the default in replace mode
/// or the current value in merge mode
pub(crate) fn choose<T>(present: Option<T>, current: T, default: T, replace: bool) -> T {
    match present {
        Some(value) => value,
        None if replace => default,
        None => current,
    }
}
