//! EC2-style VPC

use super::{choose, parse_cidr, tag_set};
use crate::engine::EngineConfig;
use crate::record::{record_accessors, record_variant, BuildContext, Record, ResourceKind, WriteMode};
use crate::request::FieldMap;
use crate::types::{Kind, ResourceMeta, Status};
use crate::{Error, Result};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Vpc {
    pub meta: ResourceMeta,
    pub cidr_block: String,
    pub is_default: bool,
    pub instance_tenancy: String,
    pub enable_dns_support: bool,
    pub enable_dns_hostnames: bool,
    pub subnet_ids: Vec<String>,
    pub network_interface_ids: Vec<String>,
}

record_variant!(Vpc);

impl Record for Vpc {
    fn kind(&self) -> Kind {
        Kind::Vpc
    }

    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    fn child_keys_mut(&mut self, child: Kind) -> Option<&mut Vec<String>> {
        match child {
            Kind::Subnet => Some(&mut self.subnet_ids),
            Kind::NetworkInterface => Some(&mut self.network_interface_ids),
            _ => None,
        }
    }

    fn filter_values(&self, name: &str) -> Option<Vec<String>> {
        let value = match name {
            "vpc-id" => self.meta.id.clone(),
            "cidr" | "cidr-block" | "cidrBlock" => self.cidr_block.clone(),
            "state" => self.meta.status.to_string(),
            "is-default" | "isDefault" => self.is_default.to_string(),
            "instance-tenancy" => self.instance_tenancy.clone(),
            _ => return None,
        };
        Some(vec![value])
    }

    fn project(&self, config: &EngineConfig) -> Value {
        json!({
            "vpcId": self.meta.id,
            "state": self.meta.status.as_str(),
            "cidrBlock": self.cidr_block,
            "isDefault": self.is_default,
            "instanceTenancy": self.instance_tenancy,
            "enableDnsSupport": self.enable_dns_support,
            "enableDnsHostnames": self.enable_dns_hostnames,
            "ownerId": config.account_id,
            "tagSet": tag_set(&self.meta),
        })
    }
}

impl ResourceKind for Vpc {
    const KIND: Kind = Kind::Vpc;
    const REQUIRED: &'static [&'static str] = &["cidr_block"];
    const INITIAL_STATUS: Status = Status::Available;

    record_accessors!(Vpc);

    fn build(meta: ResourceMeta, request: &FieldMap, _ctx: &BuildContext<'_>) -> Result<Self> {
        let cidr = request.require_str("cidr_block")?;
        let net = parse_cidr("CidrBlock", &cidr)?;
        if !(16..=28).contains(&net.prefix()) {
            return Err(Error::invalid(format!(
                "The CIDR '{}' is invalid: VPC netmasks must be between /16 and /28",
                cidr
            )));
        }

        let mut vpc = Vpc {
            meta,
            cidr_block: net.to_string(),
            is_default: request.bool("is_default")?.unwrap_or(false),
            instance_tenancy: "default".to_string(),
            enable_dns_support: true,
            enable_dns_hostnames: false,
            subnet_ids: Vec::new(),
            network_interface_ids: Vec::new(),
        };
        if let Some(tenancy) = request.str("instance_tenancy")? {
            vpc.instance_tenancy = validate_tenancy(tenancy)?;
        }
        vpc.apply_attributes(request, false)?;
        Ok(vpc)
    }

    fn apply(&mut self, request: &FieldMap, _ctx: &BuildContext<'_>, mode: WriteMode) -> Result<()> {
        if let Some(cidr) = request.str("cidr_block")? {
            if cidr != self.cidr_block {
                return Err(Error::invalid("the primary CIDR block of a VPC cannot be changed"));
            }
        }
        if let Some(tenancy) = request.str("instance_tenancy")? {
            self.instance_tenancy = validate_tenancy(tenancy)?;
        }
        self.apply_attributes(request, mode == WriteMode::Replace)
    }
}

impl Vpc {
    /// DNS attributes, as set by `ModifyVpcAttribute`
    fn apply_attributes(&mut self, request: &FieldMap, replace: bool) -> Result<()> {
        self.enable_dns_support = choose(
            request.bool("enable_dns_support")?,
            self.enable_dns_support,
            true,
            replace,
        );
        self.enable_dns_hostnames = choose(
            request.bool("enable_dns_hostnames")?,
            self.enable_dns_hostnames,
            false,
            replace,
        );
        if self.enable_dns_hostnames && !self.enable_dns_support {
            return Err(Error::invalid(
                "DNS hostnames require DNS support to be enabled on the VPC",
            ));
        }
        Ok(())
    }
}

fn validate_tenancy(tenancy: String) -> Result<String> {
    match tenancy.as_str() {
        "default" | "dedicated" => Ok(tenancy),
        other => Err(Error::invalid(format!("Invalid instance tenancy '{}'", other))),
    }
}
