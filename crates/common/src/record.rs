//! Resource records and the per-kind backend contract

use crate::engine::EngineConfig;
use crate::request::FieldMap;
use crate::resources::{
    firewall::Firewall, instance::Instance, instance_group_manager::InstanceGroupManager,
    instance_template::InstanceTemplate, network::Network, network_interface::NetworkInterface,
    security_group::SecurityGroup, subnet::Subnet, subnetwork::Subnetwork, vpc::Vpc,
    vpn_gateway::VpnGateway,
};
use crate::store::Tables;
use crate::types::{Family, Kind, Reference, ResourceMeta, Status};
use crate::Result;
use serde_json::Value;

/// Capabilities every stored record exposes to the generic engine.
///
/// The integrity checker and filter engine only ever see records through
/// this trait.
pub trait Record: std::fmt::Debug {
    fn kind(&self) -> Kind;

    fn meta(&self) -> &ResourceMeta;

    fn meta_mut(&mut self) -> &mut ResourceMeta;

    /// Key addressing the record within its kind
    fn key(&self) -> &str {
        match self.kind().family() {
            Family::Aws => &self.meta().id,
            Family::Gcp => &self.meta().name,
        }
    }

    /// Region or zone of a regional or zonal record
    fn location(&self) -> Option<&str> {
        None
    }

    /// Every foreign key held by this record
    fn references(&self) -> Vec<Reference> {
        Vec::new()
    }

    /// Parents that list this record in one of their back-reference lists
    fn parent_links(&self) -> Vec<Reference> {
        Vec::new()
    }

    /// Back-reference list for children of `child` kind, if this record keeps one
    fn child_keys_mut(&mut self, _child: Kind) -> Option<&mut Vec<String>> {
        None
    }

    /// Whether deleting `target` must be refused because of this record
    fn depends_on(&self, target: &Reference) -> bool {
        self.references().iter().any(|r| r == target)
    }

    /// Reason this record cannot be deleted in its current state
    fn in_use(&self) -> Option<String> {
        None
    }

    /// Values of a kind-specific filter attribute; `None` if the name is unknown
    fn filter_values(&self, name: &str) -> Option<Vec<String>>;

    /// Wire projection of the record
    fn project(&self, config: &EngineConfig) -> Value;
}

/// Tagged union over every emulated kind
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceRecord {
    Vpc(Vpc),
    Subnet(Subnet),
    SecurityGroup(SecurityGroup),
    NetworkInterface(NetworkInterface),
    Instance(Instance),
    VpnGateway(VpnGateway),
    Network(Network),
    Subnetwork(Subnetwork),
    Firewall(Firewall),
    InstanceTemplate(InstanceTemplate),
    InstanceGroupManager(InstanceGroupManager),
}

impl ResourceRecord {
    pub fn as_record(&self) -> &dyn Record {
        match self {
            ResourceRecord::Vpc(r) => r,
            ResourceRecord::Subnet(r) => r,
            ResourceRecord::SecurityGroup(r) => r,
            ResourceRecord::NetworkInterface(r) => r,
            ResourceRecord::Instance(r) => r,
            ResourceRecord::VpnGateway(r) => r,
            ResourceRecord::Network(r) => r,
            ResourceRecord::Subnetwork(r) => r,
            ResourceRecord::Firewall(r) => r,
            ResourceRecord::InstanceTemplate(r) => r,
            ResourceRecord::InstanceGroupManager(r) => r,
        }
    }

    pub fn as_record_mut(&mut self) -> &mut dyn Record {
        match self {
            ResourceRecord::Vpc(r) => r,
            ResourceRecord::Subnet(r) => r,
            ResourceRecord::SecurityGroup(r) => r,
            ResourceRecord::NetworkInterface(r) => r,
            ResourceRecord::Instance(r) => r,
            ResourceRecord::VpnGateway(r) => r,
            ResourceRecord::Network(r) => r,
            ResourceRecord::Subnetwork(r) => r,
            ResourceRecord::Firewall(r) => r,
            ResourceRecord::InstanceTemplate(r) => r,
            ResourceRecord::InstanceGroupManager(r) => r,
        }
    }

    pub fn kind(&self) -> Kind {
        self.as_record().kind()
    }

    pub fn key(&self) -> &str {
        self.as_record().key()
    }

    pub fn meta(&self) -> &ResourceMeta {
        self.as_record().meta()
    }

    pub fn meta_mut(&mut self) -> &mut ResourceMeta {
        self.as_record_mut().meta_mut()
    }

    pub fn project(&self, config: &EngineConfig) -> Value {
        self.as_record().project(config)
    }
}

/// Whether a write merges present fields or replaces modeled sub-objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Merge,
    Replace,
}

/// Read-only view handed to backends while they build or modify a record
pub struct BuildContext<'a> {
    pub tables: &'a Tables,
    pub config: &'a EngineConfig,
}

/// Per-kind backend contract
pub trait ResourceKind: Record + Clone + Into<ResourceRecord> + Sized {
    const KIND: Kind;

    /// Canonical request fields that must be present on insert
    const REQUIRED: &'static [&'static str];

    /// Status of a freshly inserted record
    const INITIAL_STATUS: Status;

    fn from_record(record: &ResourceRecord) -> Option<&Self>;

    fn from_record_mut(record: &mut ResourceRecord) -> Option<&mut Self>;

    /// Build a new record from an insert request.
    ///
    /// Resolves foreign keys and checks kind-specific uniqueness; must not mutate.
    fn build(meta: ResourceMeta, request: &FieldMap, ctx: &BuildContext<'_>) -> Result<Self>;

    /// Apply a patch or update request to a copy of the stored record
    fn apply(&mut self, request: &FieldMap, ctx: &BuildContext<'_>, mode: WriteMode) -> Result<()>;
}

/// Wire a kind struct into [`ResourceRecord`]
macro_rules! record_variant {
    ($ty:ident) => {
        impl From<$ty> for $crate::record::ResourceRecord {
            fn from(value: $ty) -> Self {
                $crate::record::ResourceRecord::$ty(value)
            }
        }
    };
}

pub(crate) use record_variant;

/// `from_record` / `from_record_mut` bodies for a kind struct
macro_rules! record_accessors {
    ($ty:ident) => {
        fn from_record(record: &$crate::record::ResourceRecord) -> Option<&Self> {
            match record {
                $crate::record::ResourceRecord::$ty(r) => Some(r),
                _ => None,
            }
        }

        fn from_record_mut(record: &mut $crate::record::ResourceRecord) -> Option<&mut Self> {
            match record {
                $crate::record::ResourceRecord::$ty(r) => Some(r),
                _ => None,
            }
        }
    };
}

pub(crate) use record_accessors;
