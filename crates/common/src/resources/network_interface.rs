//! EC2-style elastic network interface and its attachment lifecycle

use super::instance::{groups_in_vpc, Instance};
use super::subnet::Subnet;
use super::tag_set;
use crate::engine::{lookup, Engine, EngineConfig};
use crate::id;
use crate::integrity::{self, normalize_key, resolve};
use crate::operation::Ack;
use crate::record::{record_accessors, record_variant, BuildContext, Record, ResourceKind, WriteMode};
use crate::request::FieldMap;
use crate::store::Tables;
use crate::types::{Kind, Reference, ResourceMeta, Status};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::net::Ipv4Addr;
use tracing::info;

/// Attachment sub-record; `status` is either attached or detached
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub attachment_id: Option<String>,
    pub instance_id: Option<String>,
    pub device_index: Option<i64>,
    pub status: Status,
    pub attach_time: Option<DateTime<Utc>>,
    pub delete_on_termination: bool,
}

impl Attachment {
    pub fn detached() -> Self {
        Self {
            attachment_id: None,
            instance_id: None,
            device_index: None,
            status: Status::Detached,
            attach_time: None,
            delete_on_termination: false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.status == Status::Attached
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkInterface {
    pub meta: ResourceMeta,
    pub subnet_id: String,
    pub vpc_id: String,
    pub availability_zone: String,
    pub security_group_ids: Vec<String>,
    pub private_ip_address: String,
    pub mac_address: String,
    pub description: String,
    pub source_dest_check: bool,
    pub attachment: Attachment,
}

record_variant!(NetworkInterface);

impl Record for NetworkInterface {
    fn kind(&self) -> Kind {
        Kind::NetworkInterface
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
        if let Some(instance_id) = &self.attachment.instance_id {
            refs.push(Reference::new(Kind::Instance, instance_id));
        }
        refs
    }

    fn parent_links(&self) -> Vec<Reference> {
        vec![
            Reference::new(Kind::Subnet, &self.subnet_id),
            Reference::new(Kind::Vpc, &self.vpc_id),
        ]
    }

    fn depends_on(&self, target: &Reference) -> bool {
        // the instance side of an attachment is guarded by the instance itself
        target.kind != Kind::Instance && self.references().contains(target)
    }

    fn in_use(&self) -> Option<String> {
        self.attachment.instance_id.as_ref().map(|instance_id| {
            format!("it is attached to instance '{}'", instance_id)
        })
    }

    fn filter_values(&self, name: &str) -> Option<Vec<String>> {
        let attachment = &self.attachment;
        let values = match name {
            "network-interface-id" => vec![self.meta.id.clone()],
            "subnet-id" => vec![self.subnet_id.clone()],
            "vpc-id" => vec![self.vpc_id.clone()],
            "availability-zone" => vec![self.availability_zone.clone()],
            "status" => vec![self.meta.status.to_string()],
            "description" => vec![self.description.clone()],
            "private-ip-address" | "addresses.private-ip-address" => {
                vec![self.private_ip_address.clone()]
            }
            "mac-address" => vec![self.mac_address.clone()],
            "source-dest-check" => vec![self.source_dest_check.to_string()],
            "group-id" => self.security_group_ids.clone(),
            "attachment.status" => vec![attachment.status.to_string()],
            "attachment.attachment-id" => attachment.attachment_id.iter().cloned().collect(),
            "attachment.instance-id" => attachment.instance_id.iter().cloned().collect(),
            "attachment.device-index" => attachment
                .device_index
                .iter()
                .map(|i| i.to_string())
                .collect(),
            _ => return None,
        };
        Some(values)
    }

    fn project(&self, config: &EngineConfig) -> Value {
        let mut value = json!({
            "networkInterfaceId": self.meta.id,
            "subnetId": self.subnet_id,
            "vpcId": self.vpc_id,
            "availabilityZone": self.availability_zone,
            "description": self.description,
            "ownerId": config.account_id,
            "status": self.meta.status.as_str(),
            "macAddress": self.mac_address,
            "privateIpAddress": self.private_ip_address,
            "sourceDestCheck": self.source_dest_check,
            "interfaceType": "interface",
            "groupSet": self
                .security_group_ids
                .iter()
                .map(|id| json!({ "groupId": id }))
                .collect::<Vec<_>>(),
            "tagSet": tag_set(&self.meta),
        });
        if self.attachment.is_attached() {
            value["attachment"] = json!({
                "attachmentId": self.attachment.attachment_id,
                "instanceId": self.attachment.instance_id,
                "instanceOwnerId": config.account_id,
                "deviceIndex": self.attachment.device_index,
                "status": self.attachment.status.as_str(),
                "attachTime": self
                    .attachment
                    .attach_time
                    .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
                "deleteOnTermination": self.attachment.delete_on_termination,
            });
        }
        value
    }
}

impl ResourceKind for NetworkInterface {
    const KIND: Kind = Kind::NetworkInterface;
    const REQUIRED: &'static [&'static str] = &["subnet_id"];
    const INITIAL_STATUS: Status = Status::Available;

    record_accessors!(NetworkInterface);

    fn build(meta: ResourceMeta, request: &FieldMap, ctx: &BuildContext<'_>) -> Result<Self> {
        let subnet_id = resolve(ctx.tables, Kind::Subnet, &request.require_str("subnet_id")?)?;
        let subnet = lookup::<Subnet>(ctx.tables, &subnet_id)?;
        let groups = request.str_list("security_group_ids")?.unwrap_or_default();
        let security_group_ids = groups_in_vpc(ctx.tables, &groups, &subnet.vpc_id)?;

        let used = addresses_in_subnet(ctx.tables, &subnet_id);
        let private_ip = match request.str("private_ip_address")? {
            Some(raw) => {
                let addr: Ipv4Addr = raw
                    .parse()
                    .map_err(|_| Error::invalid(format!("'{}' is not a valid IPv4 address", raw)))?;
                if !subnet.is_assignable(addr) {
                    return Err(Error::invalid(format!(
                        "Address '{}' is not assignable in subnet '{}' ({})",
                        addr, subnet_id, subnet.cidr_block
                    )));
                }
                if used.contains(&addr) {
                    return Err(Error::invalid(format!(
                        "Address '{}' is already in use in subnet '{}'",
                        addr, subnet_id
                    )));
                }
                addr
            }
            None => subnet.next_free_address(&used)?,
        };

        Ok(NetworkInterface {
            meta,
            vpc_id: subnet.vpc_id.clone(),
            availability_zone: subnet.availability_zone.clone(),
            subnet_id,
            security_group_ids,
            private_ip_address: private_ip.to_string(),
            mac_address: id::new_mac_address(),
            description: request.str("description")?.unwrap_or_default(),
            source_dest_check: request.bool("source_dest_check")?.unwrap_or(true),
            attachment: Attachment::detached(),
        })
    }

    fn apply(&mut self, request: &FieldMap, ctx: &BuildContext<'_>, mode: WriteMode) -> Result<()> {
        for fixed in ["subnet_id", "private_ip_address"] {
            if request.contains(fixed) {
                return Err(Error::invalid(format!(
                    "{} of a network interface cannot be changed",
                    fixed
                )));
            }
        }
        let replace = mode == WriteMode::Replace;
        self.description = super::choose(
            request.str("description")?,
            std::mem::take(&mut self.description),
            String::new(),
            replace,
        );
        self.source_dest_check = super::choose(
            request.bool("source_dest_check")?,
            self.source_dest_check,
            true,
            replace,
        );
        if let Some(groups) = request.str_list("security_group_ids")? {
            self.security_group_ids = groups_in_vpc(ctx.tables, &groups, &self.vpc_id)?;
        } else if replace {
            self.security_group_ids.clear();
        }
        Ok(())
    }
}

/// Private addresses already held by interfaces in `subnet_id`
fn addresses_in_subnet(tables: &Tables, subnet_id: &str) -> Vec<Ipv4Addr> {
    tables
        .values(Kind::NetworkInterface)
        .filter_map(NetworkInterface::from_record)
        .filter(|eni| eni.subnet_id == subnet_id)
        .filter_map(|eni| eni.private_ip_address.parse().ok())
        .collect()
}

/// Result of a successful attach
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentResult {
    pub attachment_id: String,
    pub network_interface: NetworkInterface,
}

impl Engine {
    // ========================================================================
    // Network interface attachments
    // ========================================================================

    /// Attach an available interface to a running instance at `device_index`
    pub fn attach_network_interface(&self, request: &FieldMap) -> Result<AttachmentResult> {
        if let Some(missing) = request.missing(&["network_interface_id", "instance_id", "device_index"]) {
            return Err(Error::MissingParameter(missing.to_string()));
        }
        let device_index = request.i64("device_index")?.unwrap_or_default();
        if device_index < 0 {
            return Err(Error::invalid(format!(
                "device index must not be negative, got {}",
                device_index
            )));
        }

        let mut tables = self.store.write();
        let eni_id = resolve(&tables, Kind::NetworkInterface, &request.require_str("network_interface_id")?)?;
        let instance_id = resolve(&tables, Kind::Instance, &request.require_str("instance_id")?)?;

        let eni = lookup::<NetworkInterface>(&tables, &eni_id)?;
        if eni.meta.status != Status::Available {
            return Err(Error::InvalidStateTransition {
                kind: Kind::NetworkInterface,
                key: eni_id,
                state: eni.meta.status.to_string(),
                verb: "attach".to_string(),
            });
        }
        let instance = lookup::<Instance>(&tables, &instance_id)?;
        if instance.meta.status != Status::Running {
            return Err(Error::InvalidStateTransition {
                kind: Kind::Instance,
                key: instance_id,
                state: instance.meta.status.to_string(),
                verb: "attach a network interface to".to_string(),
            });
        }
        if instance.availability_zone != eni.availability_zone {
            return Err(Error::invalid(format!(
                "Network interface '{}' is in {} but instance '{}' is in {}",
                eni_id, eni.availability_zone, instance_id, instance.availability_zone
            )));
        }
        let index_taken = instance
            .network_interface_ids
            .iter()
            .filter_map(|id| lookup::<NetworkInterface>(&tables, id).ok())
            .any(|other| other.attachment.device_index == Some(device_index));
        if index_taken {
            return Err(Error::invalid(format!(
                "Instance '{}' already has an interface attached at device index {}",
                instance_id, device_index
            )));
        }

        let attachment_id = id::aws_id("eni-attach");
        let eni = tables
            .get_mut(Kind::NetworkInterface, &eni_id)
            .and_then(NetworkInterface::from_record_mut)
            .ok_or_else(|| Error::not_found(Kind::NetworkInterface, eni_id.as_str()))?;
        eni.attachment = Attachment {
            attachment_id: Some(attachment_id.clone()),
            instance_id: Some(instance_id.clone()),
            device_index: Some(device_index),
            status: Status::Attached,
            attach_time: Some(Utc::now()),
            delete_on_termination: false,
        };
        eni.meta.status = Status::InUse;
        eni.meta.touch();
        let network_interface = eni.clone();

        integrity::register_back_refs(
            &mut tables,
            &Reference::new(Kind::NetworkInterface, &eni_id),
            &[Reference::new(Kind::Instance, &instance_id)],
        );

        info!("Attached {} to {} at index {}", eni_id, instance_id, device_index);
        Ok(AttachmentResult {
            attachment_id,
            network_interface,
        })
    }

    /// Detach the interface holding `attachment_id`
    pub fn detach_network_interface(&self, request: &FieldMap) -> Result<Ack> {
        let raw = request.require_str("attachment_id")?;
        let attachment_id = normalize_key(&raw).to_string();

        let mut tables = self.store.write();
        let eni = tables
            .values(Kind::NetworkInterface)
            .filter_map(NetworkInterface::from_record)
            .find(|eni| eni.attachment.attachment_id.as_deref() == Some(attachment_id.as_str()))
            .ok_or_else(|| Error::not_found(Kind::NetworkInterface, attachment_id.as_str()))?;
        let eni_id = eni.meta.id.clone();
        let instance_id = eni.attachment.instance_id.clone();

        let eni = tables
            .get_mut(Kind::NetworkInterface, &eni_id)
            .and_then(NetworkInterface::from_record_mut)
            .ok_or_else(|| Error::not_found(Kind::NetworkInterface, eni_id.as_str()))?;
        eni.attachment = Attachment::detached();
        eni.meta.status = Status::Available;
        eni.meta.touch();

        if let Some(instance_id) = &instance_id {
            integrity::unregister_back_refs(
                &mut tables,
                &Reference::new(Kind::NetworkInterface, &eni_id),
                &[Reference::new(Kind::Instance, instance_id)],
            );
        }

        info!("Detached {} ({})", eni_id, attachment_id);
        Ok(Ack::new())
    }
}
