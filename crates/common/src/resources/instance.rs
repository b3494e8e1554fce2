//! EC2-style instance
//!
//! Instances are created directly in the running state and carry no
//! interfaces of their own; interfaces are attached afterwards.

use super::security_group::SecurityGroup;
use super::subnet::Subnet;
use super::tag_set;
use crate::engine::{lookup, EngineConfig};
use crate::integrity::{resolve, resolve_all};
use crate::record::{record_accessors, record_variant, BuildContext, Record, ResourceKind, WriteMode};
use crate::request::FieldMap;
use crate::store::Tables;
use crate::types::{Kind, Reference, ResourceMeta, Status};
use crate::{Error, Result};
use serde_json::{json, Value};

pub const DEFAULT_INSTANCE_TYPE: &str = "t2.micro";

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub meta: ResourceMeta,
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: String,
    pub vpc_id: String,
    pub availability_zone: String,
    pub security_group_ids: Vec<String>,
    pub network_interface_ids: Vec<String>,
}

record_variant!(Instance);

impl Record for Instance {
    fn kind(&self) -> Kind {
        Kind::Instance
    }

    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    fn references(&self) -> Vec<Reference> {
        let mut refs = vec![
            Reference::new(Kind::Subnet, &self.subnet_id),
            Reference::new(Kind::Vpc, &self.vpc_id),
        ];
        refs.extend(
            self.security_group_ids
                .iter()
                .map(|id| Reference::new(Kind::SecurityGroup, id)),
        );
        refs
    }

    fn child_keys_mut(&mut self, child: Kind) -> Option<&mut Vec<String>> {
        match child {
            Kind::NetworkInterface => Some(&mut self.network_interface_ids),
            _ => None,
        }
    }

    fn in_use(&self) -> Option<String> {
        if self.network_interface_ids.is_empty() {
            None
        } else {
            Some(format!(
                "network interfaces are still attached: {}",
                self.network_interface_ids.join(", ")
            ))
        }
    }

    fn filter_values(&self, name: &str) -> Option<Vec<String>> {
        let values = match name {
            "instance-id" => vec![self.meta.id.clone()],
            "image-id" => vec![self.image_id.clone()],
            "instance-type" => vec![self.instance_type.clone()],
            "subnet-id" => vec![self.subnet_id.clone()],
            "vpc-id" => vec![self.vpc_id.clone()],
            "availability-zone" => vec![self.availability_zone.clone()],
            "instance-state-name" => vec![self.meta.status.to_string()],
            "instance.group-id" | "group-id" => self.security_group_ids.clone(),
            "network-interface.network-interface-id" => self.network_interface_ids.clone(),
            _ => return None,
        };
        Some(values)
    }

    fn project(&self, _config: &EngineConfig) -> Value {
        json!({
            "instanceId": self.meta.id,
            "imageId": self.image_id,
            "instanceType": self.instance_type,
            "instanceState": { "code": 16, "name": self.meta.status.as_str() },
            "subnetId": self.subnet_id,
            "vpcId": self.vpc_id,
            "placement": { "availabilityZone": self.availability_zone },
            "groupSet": self
                .security_group_ids
                .iter()
                .map(|id| json!({ "groupId": id }))
                .collect::<Vec<_>>(),
            "networkInterfaceSet": self
                .network_interface_ids
                .iter()
                .map(|id| json!({ "networkInterfaceId": id }))
                .collect::<Vec<_>>(),
            "launchTime": self.meta.creation_timestamp(),
            "tagSet": tag_set(&self.meta),
        })
    }
}

impl ResourceKind for Instance {
    const KIND: Kind = Kind::Instance;
    const REQUIRED: &'static [&'static str] = &["image_id", "subnet_id"];
    const INITIAL_STATUS: Status = Status::Running;

    record_accessors!(Instance);

    fn build(meta: ResourceMeta, request: &FieldMap, ctx: &BuildContext<'_>) -> Result<Self> {
        let subnet_id = resolve(ctx.tables, Kind::Subnet, &request.require_str("subnet_id")?)?;
        let subnet = lookup::<Subnet>(ctx.tables, &subnet_id)?;
        let groups = request.str_list("security_group_ids")?.unwrap_or_default();
        let security_group_ids = groups_in_vpc(ctx.tables, &groups, &subnet.vpc_id)?;

        Ok(Instance {
            meta,
            image_id: request.require_str("image_id")?,
            instance_type: request
                .str("instance_type")?
                .unwrap_or_else(|| DEFAULT_INSTANCE_TYPE.to_string()),
            vpc_id: subnet.vpc_id.clone(),
            availability_zone: subnet.availability_zone.clone(),
            subnet_id,
            security_group_ids,
            network_interface_ids: Vec::new(),
        })
    }

    fn apply(&mut self, request: &FieldMap, ctx: &BuildContext<'_>, mode: WriteMode) -> Result<()> {
        for fixed in ["image_id", "subnet_id"] {
            if request.contains(fixed) {
                return Err(Error::invalid(format!("{} of an instance cannot be changed", fixed)));
            }
        }
        let replace = mode == WriteMode::Replace;
        if let Some(instance_type) = request.str("instance_type")? {
            self.instance_type = instance_type;
        } else if replace {
            self.instance_type = DEFAULT_INSTANCE_TYPE.to_string();
        }
        if let Some(groups) = request.str_list("security_group_ids")? {
            self.security_group_ids = groups_in_vpc(ctx.tables, &groups, &self.vpc_id)?;
        } else if replace {
            self.security_group_ids.clear();
        }
        Ok(())
    }
}

/// Resolve security groups and require each to belong to `vpc_id`
pub(crate) fn groups_in_vpc(tables: &Tables, raws: &[String], vpc_id: &str) -> Result<Vec<String>> {
    let ids = resolve_all(tables, Kind::SecurityGroup, raws)?;
    for id in &ids {
        let group = lookup::<SecurityGroup>(tables, id)?;
        if group.vpc_id != vpc_id {
            return Err(Error::invalid(format!(
                "Security group '{}' belongs to VPC '{}', not '{}'",
                id, group.vpc_id, vpc_id
            )));
        }
    }
    Ok(ids)
}
