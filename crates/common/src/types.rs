//! Core types for Skymock

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::id;

/// Id family a kind belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// EC2-style: key is a generated `<prefix>-<hex>` id
    Aws,
    /// Compute-style: key is the user-supplied name
    Gcp,
}

/// Wire surface an error or result is rendered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Aws,
    Gcp,
}

impl From<Family> for Surface {
    fn from(family: Family) -> Self {
        match family {
            Family::Aws => Surface::Aws,
            Family::Gcp => Surface::Gcp,
        }
    }
}

/// Location scope of a GCP-style resource, used to build links
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Regional,
    Zonal,
}

/// Emulated resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Kind {
    Vpc,
    Subnet,
    SecurityGroup,
    NetworkInterface,
    Instance,
    VpnGateway,
    Network,
    Subnetwork,
    Firewall,
    InstanceTemplate,
    InstanceGroupManager,
}

impl Kind {
    pub const ALL: [Kind; 11] = [
        Kind::Vpc,
        Kind::Subnet,
        Kind::SecurityGroup,
        Kind::NetworkInterface,
        Kind::Instance,
        Kind::VpnGateway,
        Kind::Network,
        Kind::Subnetwork,
        Kind::Firewall,
        Kind::InstanceTemplate,
        Kind::InstanceGroupManager,
    ];

    pub fn family(self) -> Family {
        match self {
            Kind::Vpc
            | Kind::Subnet
            | Kind::SecurityGroup
            | Kind::NetworkInterface
            | Kind::Instance
            | Kind::VpnGateway => Family::Aws,
            _ => Family::Gcp,
        }
    }

    /// Prefix of generated AWS-style ids
    pub fn id_prefix(self) -> Option<&'static str> {
        match self {
            Kind::Vpc => Some("vpc"),
            Kind::Subnet => Some("subnet"),
            Kind::SecurityGroup => Some("sg"),
            Kind::NetworkInterface => Some("eni"),
            Kind::Instance => Some("i"),
            Kind::VpnGateway => Some("vgw"),
            _ => None,
        }
    }

    /// Collection name as it appears in URLs and listings
    pub fn collection(self) -> &'static str {
        match self {
            Kind::Vpc => "vpcs",
            Kind::Subnet => "subnets",
            Kind::SecurityGroup => "securityGroups",
            Kind::NetworkInterface => "networkInterfaces",
            Kind::Instance => "instances",
            Kind::VpnGateway => "vpnGateways",
            Kind::Network => "networks",
            Kind::Subnetwork => "subnetworks",
            Kind::Firewall => "firewalls",
            Kind::InstanceTemplate => "instanceTemplates",
            Kind::InstanceGroupManager => "instanceGroupManagers",
        }
    }

    pub fn from_collection(collection: &str) -> Option<Kind> {
        Kind::ALL.into_iter().find(|k| k.collection() == collection)
    }

    /// Resolve the kind of an AWS-style id from its prefix
    pub fn from_aws_id(id: &str) -> Option<Kind> {
        let (prefix, rest) = id.split_once('-')?;
        if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Kind::ALL
            .into_iter()
            .find(|k| k.id_prefix() == Some(prefix))
    }

    /// `kind` field of the GCP-style envelope
    pub fn gcp_kind(self) -> &'static str {
        match self {
            Kind::Network => "compute#network",
            Kind::Subnetwork => "compute#subnetwork",
            Kind::Firewall => "compute#firewall",
            Kind::InstanceTemplate => "compute#instanceTemplate",
            Kind::InstanceGroupManager => "compute#instanceGroupManager",
            _ => "",
        }
    }

    pub fn scope(self) -> Scope {
        match self {
            Kind::Subnetwork => Scope::Regional,
            Kind::InstanceGroupManager => Scope::Zonal,
            _ => Scope::Global,
        }
    }

    /// Noun used inside AWS error codes (`Invalid<noun>.NotFound`)
    pub fn aws_error_noun(self) -> &'static str {
        match self {
            Kind::Vpc => "VpcID",
            Kind::Subnet => "SubnetID",
            Kind::SecurityGroup => "Group",
            Kind::NetworkInterface => "NetworkInterfaceID",
            Kind::Instance => "InstanceID",
            Kind::VpnGateway => "VpnGatewayID",
            Kind::Network => "Network",
            Kind::Subnetwork => "Subnetwork",
            Kind::Firewall => "Firewall",
            Kind::InstanceTemplate => "InstanceTemplate",
            Kind::InstanceGroupManager => "InstanceGroupManager",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let noun = match self {
            Kind::Vpc => "VPC",
            Kind::Subnet => "subnet",
            Kind::SecurityGroup => "security group",
            Kind::NetworkInterface => "network interface",
            Kind::Instance => "instance",
            Kind::VpnGateway => "VPN gateway",
            Kind::Network => "network",
            Kind::Subnetwork => "subnetwork",
            Kind::Firewall => "firewall",
            Kind::InstanceTemplate => "instance template",
            Kind::InstanceGroupManager => "instance group manager",
        };
        f.write_str(noun)
    }
}

/// Lifecycle status of a record or attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Available,
    InUse,
    Attached,
    Detached,
    Running,
    Ready,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Available => "available",
            Status::InUse => "in-use",
            Status::Attached => "attached",
            Status::Detached => "detached",
            Status::Running => "running",
            Status::Ready => "ready",
        }
    }

    /// Upper-case form used by the GCP-style surface
    pub fn gcp_str(self) -> String {
        self.as_str().replace('-', "_").to_uppercase()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource metadata common to all resources
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceMeta {
    pub id: String,
    pub name: String,
    pub status: Status,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub label_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub generation: i64,
}

impl ResourceMeta {
    pub fn new(id: String, name: String, status: Status) -> Self {
        let now = Utc::now();
        let labels = BTreeMap::new();
        Self {
            label_fingerprint: id::new_fingerprint(&labels, None),
            id,
            name,
            status,
            labels,
            created_at: now,
            updated_at: now,
            generation: 1,
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.set_labels(labels);
        self
    }

    /// Replace the label set; the fingerprint changes even if the labels do not
    pub fn set_labels(&mut self, labels: BTreeMap<String, String>) {
        self.label_fingerprint = id::new_fingerprint(&labels, Some(&self.label_fingerprint));
        self.labels = labels;
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.generation += 1;
    }

    /// RFC 3339 creation time as rendered on both surfaces
    pub fn creation_timestamp(&self) -> String {
        self.created_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}

/// Pointer from one record to another
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    pub kind: Kind,
    pub key: String,
}

impl Reference {
    pub fn new(kind: Kind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}'", self.kind, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_aws_id() {
        assert_eq!(Kind::from_aws_id("eni-0a1b2c3d4e5f60718"), Some(Kind::NetworkInterface));
        assert_eq!(Kind::from_aws_id("i-0123456789abcdef0"), Some(Kind::Instance));
        assert_eq!(Kind::from_aws_id("sg-abc"), Some(Kind::SecurityGroup));
        assert_eq!(Kind::from_aws_id("ami-12345"), None);
        assert_eq!(Kind::from_aws_id("vpc-"), None);
        assert_eq!(Kind::from_aws_id("default"), None);
    }

    #[test]
    fn test_collection_round_trip() {
        for kind in Kind::ALL {
            assert_eq!(Kind::from_collection(kind.collection()), Some(kind));
        }
        assert_eq!(Kind::from_collection("routers"), None);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(Status::InUse.as_str(), "in-use");
        assert_eq!(Status::InUse.gcp_str(), "IN_USE");
        assert_eq!(Status::Ready.gcp_str(), "READY");
    }

    #[test]
    fn test_set_labels_always_changes_fingerprint() {
        let mut meta = ResourceMeta::new("1".to_string(), "net".to_string(), Status::Ready);
        let labels: BTreeMap<String, String> = [("env".to_string(), "dev".to_string())].into();
        meta.set_labels(labels.clone());
        let first = meta.label_fingerprint.clone();
        meta.set_labels(labels);
        assert_ne!(meta.label_fingerprint, first);
    }

    #[test]
    fn test_touch_bumps_generation() {
        let mut meta = ResourceMeta::new("1".to_string(), "net".to_string(), Status::Ready);
        meta.touch();
        assert_eq!(meta.generation, 2);
        assert!(meta.updated_at >= meta.created_at);
    }
}
