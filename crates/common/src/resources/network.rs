//! Compute-style VPC network

use super::{choose, gcp_common_filter, gcp_envelope};
use crate::engine::EngineConfig;
use crate::record::{record_accessors, record_variant, BuildContext, Record, ResourceKind, WriteMode};
use crate::request::FieldMap;
use crate::types::{Kind, ResourceMeta, Status};
use crate::{Error, Result};
use serde_json::{json, Value};

pub const DEFAULT_MTU: u32 = 1460;
pub const MTU_RANGE: std::ops::RangeInclusive<u32> = 1300..=8896;

#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    pub meta: ResourceMeta,
    pub description: String,
    pub auto_create_subnetworks: bool,
    pub routing_mode: String,
    pub mtu: u32,
    /// `<region>/<name>` of every attached subnetwork
    pub subnetworks: Vec<String>,
}

record_variant!(Network);

impl Network {
    pub fn with_defaults(meta: ResourceMeta) -> Self {
        Self {
            meta,
            description: String::new(),
            auto_create_subnetworks: false,
            routing_mode: "REGIONAL".to_string(),
            mtu: DEFAULT_MTU,
            subnetworks: Vec::new(),
        }
    }
}

impl Record for Network {
    fn kind(&self) -> Kind {
        Kind::Network
    }

    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    fn child_keys_mut(&mut self, child: Kind) -> Option<&mut Vec<String>> {
        match child {
            Kind::Subnetwork => Some(&mut self.subnetworks),
            _ => None,
        }
    }

    fn filter_values(&self, name: &str) -> Option<Vec<String>> {
        let value = match name {
            "mtu" => self.mtu.to_string(),
            "routingMode" | "routingConfig.routingMode" => self.routing_mode.clone(),
            "autoCreateSubnetworks" => self.auto_create_subnetworks.to_string(),
            "description" => self.description.clone(),
            _ => return gcp_common_filter(&self.meta, name),
        };
        Some(vec![value])
    }

    fn project(&self, config: &EngineConfig) -> Value {
        let mut map = gcp_envelope(self, config);
        map.insert("description".into(), json!(self.description));
        map.insert("autoCreateSubnetworks".into(), json!(self.auto_create_subnetworks));
        map.insert("routingConfig".into(), json!({ "routingMode": self.routing_mode }));
        map.insert("mtu".into(), json!(self.mtu));
        map.insert(
            "subnetworks".into(),
            json!(self
                .subnetworks
                .iter()
                .map(|entry| match entry.split_once('/') {
                    Some((region, name)) => config.located_link(Kind::Subnetwork, Some(region), name),
                    None => config.self_link(Kind::Subnetwork, entry),
                })
                .collect::<Vec<_>>()),
        );
        Value::Object(map)
    }
}

impl ResourceKind for Network {
    const KIND: Kind = Kind::Network;
    const REQUIRED: &'static [&'static str] = &["name"];
    const INITIAL_STATUS: Status = Status::Ready;

    record_accessors!(Network);

    fn build(meta: ResourceMeta, request: &FieldMap, ctx: &BuildContext<'_>) -> Result<Self> {
        let mut network = Network::with_defaults(meta);
        network.auto_create_subnetworks = request.bool("auto_create_subnetworks")?.unwrap_or(false);
        network.apply(request, ctx, WriteMode::Merge)?;
        Ok(network)
    }

    fn apply(&mut self, request: &FieldMap, _ctx: &BuildContext<'_>, mode: WriteMode) -> Result<()> {
        let replace = mode == WriteMode::Replace;
        if let Some(auto) = request.bool("auto_create_subnetworks")? {
            if auto != self.auto_create_subnetworks {
                return Err(Error::invalid(
                    "autoCreateSubnetworks cannot be changed after creation",
                ));
            }
        }

        self.description = choose(
            request.str("description")?,
            std::mem::take(&mut self.description),
            String::new(),
            replace,
        );

        let routing_mode = choose(
            request.str("routing_mode")?,
            std::mem::take(&mut self.routing_mode),
            "REGIONAL".to_string(),
            replace,
        );
        if routing_mode != "REGIONAL" && routing_mode != "GLOBAL" {
            return Err(Error::invalid(format!(
                "Invalid value for field 'routingConfig.routingMode': '{}'",
                routing_mode
            )));
        }
        self.routing_mode = routing_mode;

        let mtu = match request.i64("mtu")? {
            Some(mtu) => u32::try_from(mtu).ok().filter(|m| MTU_RANGE.contains(m)).ok_or_else(|| {
                Error::invalid(format!(
                    "Invalid value for field 'mtu': {}. Must be between {} and {}",
                    mtu,
                    MTU_RANGE.start(),
                    MTU_RANGE.end()
                ))
            })?,
            None if replace => DEFAULT_MTU,
            None => self.mtu,
        };
        self.mtu = mtu;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::resources::subnetwork::Subnetwork;

    fn insert(engine: &Engine, name: &str) -> Network {
        engine
            .insert::<Network>(&FieldMap::new().with("name", name))
            .unwrap()
            .resource
    }

    #[test]
    fn test_defaults_and_projection() {
        let engine = Engine::in_memory();
        let network = insert(&engine, "default");
        assert_eq!(network.mtu, DEFAULT_MTU);
        assert_eq!(network.meta.status, Status::Ready);

        let value = network.project(engine.config());
        assert_eq!(value["kind"], "compute#network");
        assert_eq!(value["routingConfig"]["routingMode"], "REGIONAL");
        assert!(value["selfLink"]
            .as_str()
            .unwrap()
            .ends_with("/global/networks/default"));
    }

    #[test]
    fn test_mtu_bounds() {
        let engine = Engine::in_memory();
        for mtu in [1299, 8897, -1] {
            let err = engine
                .insert::<Network>(&FieldMap::new().with("name", "n").with("mtu", mtu))
                .unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
        }
    }

    #[test]
    fn test_patch_merges_update_replaces() {
        let engine = Engine::in_memory();
        let request = FieldMap::new()
            .with("name", "net")
            .with("mtu", 1500)
            .with("description", "prod");
        engine.insert::<Network>(&request).unwrap();

        let patched = engine
            .patch::<Network>("net", &FieldMap::new().with("routing_mode", "GLOBAL"))
            .unwrap()
            .resource;
        assert_eq!(patched.mtu, 1500);
        assert_eq!(patched.description, "prod");
        assert_eq!(patched.routing_mode, "GLOBAL");

        let updated = engine
            .update::<Network>("net", &FieldMap::new().with("description", "staging"))
            .unwrap()
            .resource;
        assert_eq!(updated.mtu, DEFAULT_MTU);
        assert_eq!(updated.routing_mode, "REGIONAL");
        assert_eq!(updated.description, "staging");
    }

    #[test]
    fn test_rename_rejected() {
        let engine = Engine::in_memory();
        insert(&engine, "net");
        let err = engine
            .patch::<Network>("net", &FieldMap::new().with("name", "other"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_delete_blocked_by_subnetwork() {
        let engine = Engine::in_memory();
        insert(&engine, "net");
        engine
            .insert::<Subnetwork>(
                &FieldMap::new()
                    .with("name", "sub")
                    .with("network", "global/networks/net")
                    .with("ip_cidr_range", "10.0.0.0/24"),
            )
            .unwrap();

        let err = engine.delete::<Network>("net").unwrap_err();
        assert!(matches!(err, Error::DependencyViolation { .. }));
        assert_eq!(engine.get::<Network>("net").unwrap().subnetworks, vec!["us-central1/sub"]);
    }
}
