//! Compute-style firewall rule

use super::{gcp_common_filter, gcp_envelope, parse_cidr};
use crate::engine::EngineConfig;
use crate::integrity::resolve;
use crate::record::{record_accessors, record_variant, BuildContext, Record, ResourceKind, WriteMode};
use crate::request::FieldMap;
use crate::types::{Kind, Reference, ResourceMeta, Status};
use crate::{Error, Result};
use serde_json::{json, Value};

pub const DEFAULT_PRIORITY: i64 = 1000;
pub const DEFAULT_NETWORK: &str = "default";
const ANY_ADDRESS: &str = "0.0.0.0/0";

/// One `allowed` or `denied` entry
#[derive(Debug, Clone, PartialEq)]
pub struct FirewallRule {
    pub ip_protocol: String,
    pub ports: Vec<String>,
}

impl FirewallRule {
    fn from_request(entry: &FieldMap) -> Result<Self> {
        let ip_protocol = match entry.str("ip_protocol")? {
            Some(p) => p,
            None => entry.require_str("IPProtocol")?,
        };
        let ports = entry.str_list("ports")?.unwrap_or_default();
        for port in &ports {
            validate_port_range(port)?;
        }
        Ok(Self { ip_protocol, ports })
    }

    fn project(&self) -> Value {
        let mut value = json!({ "IPProtocol": self.ip_protocol });
        if !self.ports.is_empty() {
            value["ports"] = json!(self.ports);
        }
        value
    }
}

fn validate_port_range(port: &str) -> Result<()> {
    let invalid = || Error::invalid(format!("Invalid value for field 'ports': '{}'", port));
    let parse = |p: &str| p.parse::<u16>().map_err(|_| invalid());
    match port.split_once('-') {
        Some((lo, hi)) if parse(lo)? <= parse(hi)? => Ok(()),
        Some(_) => Err(invalid()),
        None => parse(port).map(|_| ()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Firewall {
    pub meta: ResourceMeta,
    pub network: String,
    pub description: String,
    pub direction: String,
    pub priority: i64,
    pub source_ranges: Vec<String>,
    pub destination_ranges: Vec<String>,
    pub source_tags: Vec<String>,
    pub target_tags: Vec<String>,
    pub allowed: Vec<FirewallRule>,
    pub denied: Vec<FirewallRule>,
    pub disabled: bool,
}

record_variant!(Firewall);

impl Firewall {
    pub fn with_defaults(meta: ResourceMeta) -> Self {
        Self {
            meta,
            network: DEFAULT_NETWORK.to_string(),
            description: String::new(),
            direction: "INGRESS".to_string(),
            priority: DEFAULT_PRIORITY,
            source_ranges: Vec::new(),
            destination_ranges: Vec::new(),
            source_tags: Vec::new(),
            target_tags: Vec::new(),
            allowed: Vec::new(),
            denied: Vec::new(),
            disabled: false,
        }
    }

    /// Apply every present field; absent fields keep their current value
    fn merge(&mut self, request: &FieldMap) -> Result<()> {
        if let Some(description) = request.str("description")? {
            self.description = description;
        }
        if let Some(direction) = request.str("direction")? {
            self.direction = direction.to_uppercase();
        }
        if let Some(priority) = request.i64("priority")? {
            self.priority = priority;
        }
        if let Some(ranges) = request.str_list("source_ranges")? {
            self.source_ranges = ranges;
        }
        if let Some(ranges) = request.str_list("destination_ranges")? {
            self.destination_ranges = ranges;
        }
        if let Some(tags) = request.str_list("source_tags")? {
            self.source_tags = tags;
        }
        if let Some(tags) = request.str_list("target_tags")? {
            self.target_tags = tags;
        }
        if let Some(rules) = request.objects("allowed")? {
            self.allowed = rules.iter().map(FirewallRule::from_request).collect::<Result<_>>()?;
        }
        if let Some(rules) = request.objects("denied")? {
            self.denied = rules.iter().map(FirewallRule::from_request).collect::<Result<_>>()?;
        }
        if let Some(disabled) = request.bool("disabled")? {
            self.disabled = disabled;
        }
        Ok(())
    }

    /// Cross-field rules checked after every write
    fn validate(&mut self) -> Result<()> {
        if self.direction != "INGRESS" && self.direction != "EGRESS" {
            return Err(Error::invalid(format!(
                "Invalid value for field 'direction': '{}'",
                self.direction
            )));
        }
        if !(0..=65535).contains(&self.priority) {
            return Err(Error::invalid(format!(
                "Invalid value for field 'priority': {}. Must be between 0 and 65535",
                self.priority
            )));
        }
        match (self.allowed.is_empty(), self.denied.is_empty()) {
            (true, true) => {
                return Err(Error::invalid(
                    "Exactly one of 'allowed' or 'denied' must be specified",
                ))
            }
            (false, false) => {
                return Err(Error::invalid(
                    "'allowed' and 'denied' cannot be specified together",
                ))
            }
            _ => {}
        }
        for range in self.source_ranges.iter().chain(&self.destination_ranges) {
            parse_cidr("ranges", range)?;
        }
        if self.direction == "EGRESS" && (!self.source_tags.is_empty()) {
            return Err(Error::invalid("source tags are not allowed on egress rules"));
        }

        // an ingress rule with no sources, or egress with no destinations, applies everywhere
        if self.direction == "INGRESS" && self.source_ranges.is_empty() && self.source_tags.is_empty() {
            self.source_ranges = vec![ANY_ADDRESS.to_string()];
        }
        if self.direction == "EGRESS" && self.destination_ranges.is_empty() {
            self.destination_ranges = vec![ANY_ADDRESS.to_string()];
        }
        Ok(())
    }
}

impl Record for Firewall {
    fn kind(&self) -> Kind {
        Kind::Firewall
    }

    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    fn references(&self) -> Vec<Reference> {
        vec![Reference::new(Kind::Network, &self.network)]
    }

    fn filter_values(&self, name: &str) -> Option<Vec<String>> {
        let values = match name {
            "network" => vec![self.network.clone()],
            "direction" => vec![self.direction.clone()],
            "priority" => vec![self.priority.to_string()],
            "disabled" => vec![self.disabled.to_string()],
            "description" => vec![self.description.clone()],
            "sourceRanges" => self.source_ranges.clone(),
            "destinationRanges" => self.destination_ranges.clone(),
            "sourceTags" => self.source_tags.clone(),
            "targetTags" => self.target_tags.clone(),
            _ => return gcp_common_filter(&self.meta, name),
        };
        Some(values)
    }

    fn project(&self, config: &EngineConfig) -> Value {
        let mut map = gcp_envelope(self, config);
        map.insert("description".into(), json!(self.description));
        map.insert("network".into(), json!(config.self_link(Kind::Network, &self.network)));
        map.insert("direction".into(), json!(self.direction));
        map.insert("priority".into(), json!(self.priority));
        map.insert("disabled".into(), json!(self.disabled));
        let lists = [
            ("sourceRanges", &self.source_ranges),
            ("destinationRanges", &self.destination_ranges),
            ("sourceTags", &self.source_tags),
            ("targetTags", &self.target_tags),
        ];
        for (field, values) in lists {
            if !values.is_empty() {
                map.insert(field.into(), json!(values));
            }
        }
        if !self.allowed.is_empty() {
            let rules: Vec<Value> = self.allowed.iter().map(FirewallRule::project).collect();
            map.insert("allowed".into(), Value::Array(rules));
        }
        if !self.denied.is_empty() {
            let rules: Vec<Value> = self.denied.iter().map(FirewallRule::project).collect();
            map.insert("denied".into(), Value::Array(rules));
        }
        Value::Object(map)
    }
}

impl ResourceKind for Firewall {
    const KIND: Kind = Kind::Firewall;
    const REQUIRED: &'static [&'static str] = &["name"];
    const INITIAL_STATUS: Status = Status::Ready;

    record_accessors!(Firewall);

    fn build(meta: ResourceMeta, request: &FieldMap, ctx: &BuildContext<'_>) -> Result<Self> {
        let mut firewall = Firewall::with_defaults(meta);
        let network = request
            .str("network")?
            .unwrap_or_else(|| DEFAULT_NETWORK.to_string());
        firewall.network = resolve(ctx.tables, Kind::Network, &network)?;
        firewall.merge(request)?;
        firewall.validate()?;
        Ok(firewall)
    }

    fn apply(&mut self, request: &FieldMap, ctx: &BuildContext<'_>, mode: WriteMode) -> Result<()> {
        if let Some(network) = request.str("network")? {
            self.network = resolve(ctx.tables, Kind::Network, &network)?;
        }
        if mode == WriteMode::Replace {
            let mut fresh = Firewall::with_defaults(self.meta.clone());
            fresh.network = std::mem::take(&mut self.network);
            *self = fresh;
        } else if request.contains("direction") {
            return Err(Error::invalid("the direction of a firewall rule cannot be patched"));
        }
        self.merge(request)?;
        // a patch switching allowed to denied replaces the other list
        if mode == WriteMode::Merge {
            if request.contains("allowed") && !request.contains("denied") && !self.allowed.is_empty() {
                self.denied.clear();
            }
            if request.contains("denied") && !request.contains("allowed") && !self.denied.is_empty() {
                self.allowed.clear();
            }
        }
        self.validate()
    }
}
