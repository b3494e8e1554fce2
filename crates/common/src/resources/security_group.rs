//! EC2-style security group

use super::tag_set;
use crate::engine::EngineConfig;
use crate::integrity::resolve;
use crate::record::{record_accessors, record_variant, BuildContext, Record, ResourceKind, WriteMode};
use crate::request::FieldMap;
use crate::types::{Kind, Reference, ResourceMeta, Status};
use crate::{Error, Result};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct SecurityGroup {
    pub meta: ResourceMeta,
    pub group_name: String,
    pub description: String,
    pub vpc_id: String,
}

record_variant!(SecurityGroup);

impl Record for SecurityGroup {
    fn kind(&self) -> Kind {
        Kind::SecurityGroup
    }

    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    fn references(&self) -> Vec<Reference> {
        vec![Reference::new(Kind::Vpc, &self.vpc_id)]
    }

    fn filter_values(&self, name: &str) -> Option<Vec<String>> {
        let value = match name {
            "group-id" => self.meta.id.clone(),
            "group-name" => self.group_name.clone(),
            "description" => self.description.clone(),
            "vpc-id" => self.vpc_id.clone(),
            _ => return None,
        };
        Some(vec![value])
    }

    fn project(&self, config: &EngineConfig) -> Value {
        json!({
            "groupId": self.meta.id,
            "groupName": self.group_name,
            "groupDescription": self.description,
            "vpcId": self.vpc_id,
            "ownerId": config.account_id,
            "ipPermissions": [],
            "ipPermissionsEgress": [{
                "ipProtocol": "-1",
                "ipRanges": [{ "cidrIp": "0.0.0.0/0" }],
            }],
            "tagSet": tag_set(&self.meta),
        })
    }
}

impl ResourceKind for SecurityGroup {
    const KIND: Kind = Kind::SecurityGroup;
    const REQUIRED: &'static [&'static str] = &["group_name", "description", "vpc_id"];
    const INITIAL_STATUS: Status = Status::Available;

    record_accessors!(SecurityGroup);

    fn build(meta: ResourceMeta, request: &FieldMap, ctx: &BuildContext<'_>) -> Result<Self> {
        let group_name = request.require_str("group_name")?;
        if group_name.is_empty() || group_name.len() > 255 {
            return Err(Error::invalid("group name must be 1 to 255 characters"));
        }
        if group_name.starts_with("sg-") {
            return Err(Error::invalid(format!(
                "Group names may not be in the format sg-*: '{}'",
                group_name
            )));
        }
        let vpc_id = resolve(ctx.tables, Kind::Vpc, &request.require_str("vpc_id")?)?;

        let taken = ctx
            .tables
            .values(Kind::SecurityGroup)
            .filter_map(SecurityGroup::from_record)
            .any(|sg| sg.vpc_id == vpc_id && sg.group_name == group_name);
        if taken {
            return Err(Error::already_exists(Kind::SecurityGroup, group_name));
        }

        Ok(SecurityGroup {
            meta,
            group_name,
            description: request.require_str("description")?,
            vpc_id,
        })
    }

    fn apply(&mut self, request: &FieldMap, _ctx: &BuildContext<'_>, _mode: WriteMode) -> Result<()> {
        for fixed in ["group_name", "description", "vpc_id"] {
            if request.contains(fixed) {
                return Err(Error::invalid(format!(
                    "{} of a security group cannot be changed",
                    fixed
                )));
            }
        }
        Ok(())
    }
}
