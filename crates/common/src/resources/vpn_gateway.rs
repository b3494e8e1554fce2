//! EC2-style virtual private gateway

use super::tag_set;
use crate::engine::{lookup, Engine, EngineConfig};
use crate::integrity::resolve;
use crate::operation::Ack;
use crate::record::{record_accessors, record_variant, BuildContext, Record, ResourceKind, WriteMode};
use crate::request::FieldMap;
use crate::types::{Kind, Reference, ResourceMeta, Status};
use crate::{Error, Result};
use serde_json::{json, Value};
use tracing::info;

pub const DEFAULT_AMAZON_SIDE_ASN: i64 = 64512;

/// One VPC attachment; detached entries are kept for reporting
#[derive(Debug, Clone, PartialEq)]
pub struct VpcAttachment {
    pub vpc_id: String,
    pub state: Status,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VpnGateway {
    pub meta: ResourceMeta,
    pub gateway_type: String,
    pub amazon_side_asn: i64,
    pub availability_zone: Option<String>,
    pub vpc_attachments: Vec<VpcAttachment>,
}

record_variant!(VpnGateway);

impl VpnGateway {
    /// The VPC this gateway is currently attached to, if any
    pub fn attached_vpc(&self) -> Option<&str> {
        self.vpc_attachments
            .iter()
            .find(|a| a.state == Status::Attached)
            .map(|a| a.vpc_id.as_str())
    }
}

impl Record for VpnGateway {
    fn kind(&self) -> Kind {
        Kind::VpnGateway
    }

    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    fn references(&self) -> Vec<Reference> {
        self.attached_vpc()
            .map(|vpc| Reference::new(Kind::Vpc, vpc))
            .into_iter()
            .collect()
    }

    fn in_use(&self) -> Option<String> {
        self.attached_vpc()
            .map(|vpc| format!("it is attached to VPC '{}'", vpc))
    }

    fn filter_values(&self, name: &str) -> Option<Vec<String>> {
        let values = match name {
            "vpn-gateway-id" => vec![self.meta.id.clone()],
            "state" => vec![self.meta.status.to_string()],
            "type" => vec![self.gateway_type.clone()],
            "amazon-side-asn" => vec![self.amazon_side_asn.to_string()],
            "availability-zone" => self.availability_zone.iter().cloned().collect(),
            "attachment.vpc-id" => self.vpc_attachments.iter().map(|a| a.vpc_id.clone()).collect(),
            "attachment.state" => self
                .vpc_attachments
                .iter()
                .map(|a| a.state.to_string())
                .collect(),
            _ => return None,
        };
        Some(values)
    }

    fn project(&self, _config: &EngineConfig) -> Value {
        json!({
            "vpnGatewayId": self.meta.id,
            "state": self.meta.status.as_str(),
            "type": self.gateway_type,
            "amazonSideAsn": self.amazon_side_asn,
            "availabilityZone": self.availability_zone,
            "attachments": self
                .vpc_attachments
                .iter()
                .map(|a| json!({ "vpcId": a.vpc_id, "state": a.state.as_str() }))
                .collect::<Vec<_>>(),
            "tagSet": tag_set(&self.meta),
        })
    }
}

impl ResourceKind for VpnGateway {
    const KIND: Kind = Kind::VpnGateway;
    const REQUIRED: &'static [&'static str] = &["gateway_type"];
    const INITIAL_STATUS: Status = Status::Available;

    record_accessors!(VpnGateway);

    fn build(meta: ResourceMeta, request: &FieldMap, _ctx: &BuildContext<'_>) -> Result<Self> {
        let gateway_type = request.require_str("gateway_type")?;
        if gateway_type != "ipsec.1" {
            return Err(Error::invalid(format!(
                "Invalid gateway type '{}'; only ipsec.1 is supported",
                gateway_type
            )));
        }
        let amazon_side_asn = request
            .i64("amazon_side_asn")?
            .unwrap_or(DEFAULT_AMAZON_SIDE_ASN);
        let private_16 = 64512..=65534;
        let private_32 = 4_200_000_000..=4_294_967_294;
        if !private_16.contains(&amazon_side_asn) && !private_32.contains(&amazon_side_asn) {
            return Err(Error::invalid(format!(
                "Amazon side ASN {} is not a private ASN",
                amazon_side_asn
            )));
        }

        Ok(VpnGateway {
            meta,
            gateway_type,
            amazon_side_asn,
            availability_zone: request.str("availability_zone")?,
            vpc_attachments: Vec::new(),
        })
    }

    fn apply(&mut self, request: &FieldMap, _ctx: &BuildContext<'_>, _mode: WriteMode) -> Result<()> {
        for fixed in ["gateway_type", "amazon_side_asn", "availability_zone"] {
            if request.contains(fixed) {
                return Err(Error::invalid(format!(
                    "{} of a VPN gateway cannot be changed",
                    fixed
                )));
            }
        }
        Ok(())
    }
}

impl Engine {
    // ========================================================================
    // VPN gateway attachments
    // ========================================================================

    /// Attach a gateway to a VPC; a gateway holds at most one live attachment
    pub fn attach_vpn_gateway(&self, request: &FieldMap) -> Result<VpcAttachment> {
        if let Some(missing) = request.missing(&["vpn_gateway_id", "vpc_id"]) {
            return Err(Error::MissingParameter(missing.to_string()));
        }
        let mut tables = self.store.write();
        let gateway_id = resolve(&tables, Kind::VpnGateway, &request.require_str("vpn_gateway_id")?)?;
        let vpc_id = resolve(&tables, Kind::Vpc, &request.require_str("vpc_id")?)?;

        let gateway = lookup::<VpnGateway>(&tables, &gateway_id)?;
        if let Some(current) = gateway.attached_vpc() {
            return Err(Error::InvalidStateTransition {
                kind: Kind::VpnGateway,
                key: gateway_id.clone(),
                state: format!("attached to VPC '{}'", current),
                verb: "attach".to_string(),
            });
        }
        let vpc_taken = tables
            .values(Kind::VpnGateway)
            .filter_map(VpnGateway::from_record)
            .any(|other| other.attached_vpc() == Some(vpc_id.as_str()));
        if vpc_taken {
            return Err(Error::invalid(format!(
                "VPC '{}' already has a VPN gateway attached",
                vpc_id
            )));
        }

        let gateway = tables
            .get_mut(Kind::VpnGateway, &gateway_id)
            .and_then(VpnGateway::from_record_mut)
            .ok_or_else(|| Error::not_found(Kind::VpnGateway, gateway_id.as_str()))?;
        let attachment = VpcAttachment {
            vpc_id: vpc_id.clone(),
            state: Status::Attached,
        };
        gateway.vpc_attachments.retain(|a| a.vpc_id != vpc_id);
        gateway.vpc_attachments.push(attachment.clone());
        gateway.meta.touch();

        info!("Attached {} to {}", gateway_id, vpc_id);
        Ok(attachment)
    }

    /// Detach a gateway from the VPC it is attached to
    pub fn detach_vpn_gateway(&self, request: &FieldMap) -> Result<Ack> {
        if let Some(missing) = request.missing(&["vpn_gateway_id", "vpc_id"]) {
            return Err(Error::MissingParameter(missing.to_string()));
        }
        let mut tables = self.store.write();
        let gateway_id = resolve(&tables, Kind::VpnGateway, &request.require_str("vpn_gateway_id")?)?;
        let vpc_id = resolve(&tables, Kind::Vpc, &request.require_str("vpc_id")?)?;

        let gateway = tables
            .get_mut(Kind::VpnGateway, &gateway_id)
            .and_then(VpnGateway::from_record_mut)
            .ok_or_else(|| Error::not_found(Kind::VpnGateway, gateway_id.as_str()))?;
        if gateway.attached_vpc() != Some(vpc_id.as_str()) {
            return Err(Error::InvalidStateTransition {
                kind: Kind::VpnGateway,
                key: gateway_id,
                state: format!("not attached to VPC '{}'", vpc_id),
                verb: "detach".to_string(),
            });
        }
        for attachment in gateway.vpc_attachments.iter_mut() {
            if attachment.vpc_id == vpc_id {
                attachment.state = Status::Detached;
            }
        }
        gateway.meta.touch();

        info!("Detached {} from {}", gateway_id, vpc_id);
        Ok(Ack::new())
    }
}
