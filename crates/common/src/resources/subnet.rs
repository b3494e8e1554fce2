//! EC2-style subnet

use super::vpc::Vpc;
use super::{overlaps, parse_cidr, tag_set, within};
use crate::engine::{lookup, EngineConfig};
use crate::integrity::resolve;
use crate::record::{record_accessors, record_variant, BuildContext, Record, ResourceKind, WriteMode};
use crate::request::FieldMap;
use crate::types::{Kind, Reference, ResourceMeta, Status};
use crate::{Error, Result};
use ipnetwork::Ipv4Network;
use serde_json::{json, Value};
use std::net::Ipv4Addr;

/// Addresses held back at the bottom of every subnet
const RESERVED_LOW: u32 = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Subnet {
    pub meta: ResourceMeta,
    pub vpc_id: String,
    pub cidr_block: String,
    pub availability_zone: String,
    pub map_public_ip_on_launch: bool,
    pub network_interface_ids: Vec<String>,
}

record_variant!(Subnet);

impl Subnet {
    pub fn network(&self) -> Result<Ipv4Network> {
        parse_cidr("CidrBlock", &self.cidr_block)
    }

    /// Addresses not reserved and not yet handed to an interface
    pub fn available_ip_address_count(&self) -> u32 {
        let size = self.network().map(|n| n.size()).unwrap_or(0);
        size.saturating_sub(RESERVED_LOW + 1)
            .saturating_sub(self.network_interface_ids.len() as u32)
    }

    /// Whether `addr` may be assigned to an interface in this subnet
    pub fn is_assignable(&self, addr: Ipv4Addr) -> bool {
        let Ok(net) = self.network() else {
            return false;
        };
        let offset = u32::from(addr).wrapping_sub(u32::from(net.network()));
        net.contains(addr) && offset >= RESERVED_LOW && addr != net.broadcast()
    }

    /// Lowest assignable address not in `used`
    pub fn next_free_address(&self, used: &[Ipv4Addr]) -> Result<Ipv4Addr> {
        let net = self.network()?;
        let first = u32::from(net.network()) + RESERVED_LOW;
        let last = u32::from(net.broadcast());
        (first..last)
            .map(Ipv4Addr::from)
            .find(|addr| !used.contains(addr))
            .ok_or_else(|| {
                Error::invalid(format!(
                    "Subnet '{}' has no free addresses left",
                    self.meta.id
                ))
            })
    }
}

impl Record for Subnet {
    fn kind(&self) -> Kind {
        Kind::Subnet
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

    fn parent_links(&self) -> Vec<Reference> {
        self.references()
    }

    fn child_keys_mut(&mut self, child: Kind) -> Option<&mut Vec<String>> {
        match child {
            Kind::NetworkInterface => Some(&mut self.network_interface_ids),
            _ => None,
        }
    }

    fn filter_values(&self, name: &str) -> Option<Vec<String>> {
        let value = match name {
            "subnet-id" => self.meta.id.clone(),
            "vpc-id" => self.vpc_id.clone(),
            "cidr" | "cidr-block" | "cidrBlock" => self.cidr_block.clone(),
            "availability-zone" | "availabilityZone" => self.availability_zone.clone(),
            "available-ip-address-count" => self.available_ip_address_count().to_string(),
            "map-public-ip-on-launch" => self.map_public_ip_on_launch.to_string(),
            "state" => self.meta.status.to_string(),
            _ => return None,
        };
        Some(vec![value])
    }

    fn project(&self, config: &EngineConfig) -> Value {
        json!({
            "subnetId": self.meta.id,
            "subnetArn": format!(
                "arn:aws:ec2:{}:{}:subnet/{}",
                config.aws_region, config.account_id, self.meta.id
            ),
            "state": self.meta.status.as_str(),
            "vpcId": self.vpc_id,
            "cidrBlock": self.cidr_block,
            "availabilityZone": self.availability_zone,
            "availableIpAddressCount": self.available_ip_address_count(),
            "mapPublicIpOnLaunch": self.map_public_ip_on_launch,
            "ownerId": config.account_id,
            "tagSet": tag_set(&self.meta),
        })
    }
}

impl ResourceKind for Subnet {
    const KIND: Kind = Kind::Subnet;
    const REQUIRED: &'static [&'static str] = &["vpc_id", "cidr_block"];
    const INITIAL_STATUS: Status = Status::Available;

    record_accessors!(Subnet);

    fn build(meta: ResourceMeta, request: &FieldMap, ctx: &BuildContext<'_>) -> Result<Self> {
        let vpc_id = resolve(ctx.tables, Kind::Vpc, &request.require_str("vpc_id")?)?;
        let vpc = lookup::<Vpc>(ctx.tables, &vpc_id)?;
        let vpc_net = parse_cidr("CidrBlock", &vpc.cidr_block)?;

        let cidr = request.require_str("cidr_block")?;
        let net = parse_cidr("CidrBlock", &cidr)?;
        if !within(&vpc_net, &net) || net.prefix() > 28 {
            return Err(Error::invalid(format!(
                "The CIDR '{}' is invalid for VPC '{}' ({})",
                cidr, vpc_id, vpc.cidr_block
            )));
        }

        let conflict = vpc
            .subnet_ids
            .iter()
            .filter_map(|id| lookup::<Subnet>(ctx.tables, id).ok())
            .find(|sibling| sibling.network().is_ok_and(|other| overlaps(&other, &net)));
        if let Some(sibling) = conflict {
            return Err(Error::invalid(format!(
                "The CIDR '{}' conflicts with subnet '{}' ({})",
                cidr, sibling.meta.id, sibling.cidr_block
            )));
        }

        Ok(Subnet {
            meta,
            vpc_id,
            cidr_block: net.to_string(),
            availability_zone: request
                .str("availability_zone")?
                .unwrap_or_else(|| ctx.config.availability_zone.clone()),
            map_public_ip_on_launch: request.bool("map_public_ip_on_launch")?.unwrap_or(false),
            network_interface_ids: Vec::new(),
        })
    }

    fn apply(&mut self, request: &FieldMap, _ctx: &BuildContext<'_>, mode: WriteMode) -> Result<()> {
        for fixed in ["vpc_id", "cidr_block", "availability_zone"] {
            if request.contains(fixed) {
                return Err(Error::invalid(format!("{} of a subnet cannot be changed", fixed)));
            }
        }
        self.map_public_ip_on_launch = super::choose(
            request.bool("map_public_ip_on_launch")?,
            self.map_public_ip_on_launch,
            false,
            mode == WriteMode::Replace,
        );
        Ok(())
    }
}
