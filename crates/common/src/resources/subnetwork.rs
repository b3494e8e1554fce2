//! Compute-style regional subnetwork

use super::network::Network;
use super::{choose, gcp_common_filter, gcp_envelope, overlaps, parse_cidr};
use crate::engine::{lookup, EngineConfig};
use crate::integrity::{normalize_key, resolve};
use crate::record::{record_accessors, record_variant, BuildContext, Record, ResourceKind, WriteMode};
use crate::request::FieldMap;
use crate::types::{Kind, Reference, ResourceMeta, Status};
use crate::{Error, Result};
use ipnetwork::Ipv4Network;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Subnetwork {
    pub meta: ResourceMeta,
    pub network: String,
    pub ip_cidr_range: String,
    pub region: String,
    pub gateway_address: String,
    pub private_ip_google_access: bool,
    pub description: String,
}

record_variant!(Subnetwork);

impl Record for Subnetwork {
    fn kind(&self) -> Kind {
        Kind::Subnetwork
    }

    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    fn location(&self) -> Option<&str> {
        Some(&self.region)
    }

    fn references(&self) -> Vec<Reference> {
        vec![Reference::new(Kind::Network, &self.network)]
    }

    fn parent_links(&self) -> Vec<Reference> {
        self.references()
    }

    fn filter_values(&self, name: &str) -> Option<Vec<String>> {
        let value = match name {
            "network" => self.network.clone(),
            "ipCidrRange" => self.ip_cidr_range.clone(),
            "region" => self.region.clone(),
            "gatewayAddress" => self.gateway_address.clone(),
            "privateIpGoogleAccess" => self.private_ip_google_access.to_string(),
            "description" => self.description.clone(),
            _ => return gcp_common_filter(&self.meta, name),
        };
        Some(vec![value])
    }

    fn project(&self, config: &EngineConfig) -> Value {
        let mut map = gcp_envelope(self, config);
        map.insert("description".into(), json!(self.description));
        map.insert("network".into(), json!(config.self_link(Kind::Network, &self.network)));
        map.insert("ipCidrRange".into(), json!(self.ip_cidr_range));
        map.insert("gatewayAddress".into(), json!(self.gateway_address));
        map.insert(
            "region".into(),
            json!(config.scope_link(Kind::Subnetwork, Some(&self.region))),
        );
        map.insert("privateIpGoogleAccess".into(), json!(self.private_ip_google_access));
        Value::Object(map)
    }
}

impl ResourceKind for Subnetwork {
    const KIND: Kind = Kind::Subnetwork;
    const REQUIRED: &'static [&'static str] = &["network", "ip_cidr_range"];
    const INITIAL_STATUS: Status = Status::Ready;

    record_accessors!(Subnetwork);

    fn build(meta: ResourceMeta, request: &FieldMap, ctx: &BuildContext<'_>) -> Result<Self> {
        let network = resolve(ctx.tables, Kind::Network, &request.require_str("network")?)?;
        let range = request.require_str("ip_cidr_range")?;
        let net = parse_cidr("ipCidrRange", &range)?;
        if net.prefix() > 29 {
            return Err(Error::invalid(format!(
                "Invalid IPCidrRange: {}. The prefix length must be /29 or shorter",
                range
            )));
        }

        let parent = lookup::<Network>(ctx.tables, &network)?;
        let conflict = parent
            .subnetworks
            .iter()
            .filter_map(|entry| lookup::<Subnetwork>(ctx.tables, normalize_key(entry)).ok())
            .find(|sibling| {
                parse_cidr("ipCidrRange", &sibling.ip_cidr_range)
                    .is_ok_and(|other| overlaps(&other, &net))
            });
        if let Some(sibling) = conflict {
            return Err(Error::invalid(format!(
                "Invalid IPCidrRange: {} conflicts with existing subnetwork '{}' ({})",
                range, sibling.meta.name, sibling.ip_cidr_range
            )));
        }

        Ok(Subnetwork {
            meta,
            network,
            ip_cidr_range: net.to_string(),
            region: request
                .str("region")?
                .map(|r| normalize_key(&r).to_string())
                .unwrap_or_else(|| ctx.config.region.clone()),
            gateway_address: gateway_of(&net),
            private_ip_google_access: request.bool("private_ip_google_access")?.unwrap_or(false),
            description: request.str("description")?.unwrap_or_default(),
        })
    }

    fn apply(&mut self, request: &FieldMap, _ctx: &BuildContext<'_>, mode: WriteMode) -> Result<()> {
        for fixed in ["network", "ip_cidr_range", "region"] {
            if let Some(value) = request.str(fixed)? {
                let current = match fixed {
                    "network" => &self.network,
                    "ip_cidr_range" => &self.ip_cidr_range,
                    _ => &self.region,
                };
                if normalize_key(&value) != current.as_str() {
                    return Err(Error::invalid(format!(
                        "{} of a subnetwork cannot be changed",
                        fixed
                    )));
                }
            }
        }
        let replace = mode == WriteMode::Replace;
        self.private_ip_google_access = choose(
            request.bool("private_ip_google_access")?,
            self.private_ip_google_access,
            false,
            replace,
        );
        self.description = choose(
            request.str("description")?,
            std::mem::take(&mut self.description),
            String::new(),
            replace,
        );
        Ok(())
    }
}

/// First host address of the range
fn gateway_of(net: &Ipv4Network) -> String {
    std::net::Ipv4Addr::from(u32::from(net.network()) + 1).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;

    fn setup() -> Engine {
        let engine = Engine::in_memory();
        engine
            .insert::<Network>(&FieldMap::new().with("name", "default"))
            .unwrap();
        engine
    }

    fn request(name: &str, range: &str) -> FieldMap {
        FieldMap::new()
            .with("name", name)
            .with("network", "projects/p/global/networks/default")
            .with("ip_cidr_range", range)
    }

    #[test]
    fn test_insert_normalizes_network_link() {
        let engine = setup();
        let outcome = engine.insert::<Subnetwork>(&request("sub-a", "10.128.0.0/20")).unwrap();
        let sub = outcome.resource;
        assert_eq!(sub.network, "default");
        assert_eq!(sub.gateway_address, "10.128.0.1");
        assert_eq!(sub.region, "us-central1");
        assert!(outcome.operation.region.is_some());

        let value = sub.project(engine.config());
        assert!(value["network"].as_str().unwrap().ends_with("/global/networks/default"));
        assert!(value["selfLink"]
            .as_str()
            .unwrap()
            .ends_with("/regions/us-central1/subnetworks/sub-a"));
    }

    #[test]
    fn test_overlap_rejected() {
        let engine = setup();
        engine.insert::<Subnetwork>(&request("sub-a", "10.128.0.0/20")).unwrap();
        let err = engine
            .insert::<Subnetwork>(&request("sub-b", "10.128.8.0/24"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_missing_network_leaves_no_trace() {
        let engine = Engine::in_memory();
        let err = engine
            .insert::<Subnetwork>(&request("sub-a", "10.128.0.0/20"))
            .unwrap_err();
        assert_eq!(err, Error::not_found(Kind::Network, "default"));
        assert!(engine.store().read().is_empty());
    }

    #[test]
    fn test_delete_unlinks_from_network() {
        let engine = setup();
        engine.insert::<Subnetwork>(&request("sub-a", "10.128.0.0/20")).unwrap();
        engine.delete::<Subnetwork>("sub-a").unwrap();
        assert!(engine.get::<Network>("default").unwrap().subnetworks.is_empty());
        engine.delete::<Network>("default").unwrap();
    }

    #[test]
    fn test_range_is_immutable() {
        let engine = setup();
        engine.insert::<Subnetwork>(&request("sub-a", "10.128.0.0/20")).unwrap();
        assert!(engine
            .patch::<Subnetwork>("sub-a", &FieldMap::new().with("ip_cidr_range", "10.0.0.0/20"))
            .is_err());
        let patched = engine
            .patch::<Subnetwork>(
                "sub-a",
                &FieldMap::new().with("private_ip_google_access", true),
            )
            .unwrap()
            .resource;
        assert!(patched.private_ip_google_access);
    }
}
