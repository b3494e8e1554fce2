//! Generic lifecycle engine
//!
//! Every verb takes the store's write lock once, validates the whole request,
//! and only then mutates. Nothing here ever needs to roll back.

use crate::filter::{self, Filter, Page, PageRequest};
use crate::id;
use crate::integrity::{self, normalize_key};
use crate::operation::{Ack, Operation, OperationType};
use crate::record::{BuildContext, Record, ResourceKind, WriteMode};
use crate::request::FieldMap;
use crate::store::{Store, Tables};
use crate::types::{Family, Kind, Reference, ResourceMeta, Scope};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Engine settings that shape generated links and defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Project used in Compute-style links
    pub project: String,

    /// Region for regional Compute-style resources
    pub region: String,

    /// Zone for zonal Compute-style resources
    pub zone: String,

    /// Base URL of Compute-style self links
    pub base_url: String,

    /// Region reported on EC2-style resources
    pub aws_region: String,

    /// Availability zone for subnets created without one
    pub availability_zone: String,

    /// Owner id reported on EC2-style resources
    pub account_id: String,

    /// Page size when a list call gives no maximum
    pub default_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            project: "skymock-project".to_string(),
            region: "us-central1".to_string(),
            zone: "us-central1-a".to_string(),
            base_url: "https://compute.googleapis.com/compute/v1".to_string(),
            aws_region: "us-east-1".to_string(),
            availability_zone: "us-east-1a".to_string(),
            account_id: "123456789012".to_string(),
            default_page_size: 500,
        }
    }
}

impl EngineConfig {
    pub fn project_link(&self) -> String {
        format!("{}/projects/{}", self.base_url.trim_end_matches('/'), self.project)
    }

    /// Scope prefix of a kind; regional and zonal kinds fall back to the
    /// configured region or zone when no location is given
    pub fn scope_link(&self, kind: Kind, location: Option<&str>) -> String {
        match kind.scope() {
            Scope::Global => format!("{}/global", self.project_link()),
            Scope::Regional => format!(
                "{}/regions/{}",
                self.project_link(),
                location.unwrap_or(&self.region)
            ),
            Scope::Zonal => format!(
                "{}/zones/{}",
                self.project_link(),
                location.unwrap_or(&self.zone)
            ),
        }
    }

    pub fn collection_link(&self, kind: Kind, location: Option<&str>) -> String {
        format!("{}/{}", self.scope_link(kind, location), kind.collection())
    }

    /// Link of a global record
    pub fn self_link(&self, kind: Kind, key: &str) -> String {
        self.located_link(kind, None, key)
    }

    pub fn located_link(&self, kind: Kind, location: Option<&str>, key: &str) -> String {
        format!("{}/{}", self.collection_link(kind, location), key)
    }

    pub fn operation_link(&self, kind: Kind, location: Option<&str>, name: &str) -> String {
        format!("{}/operations/{}", self.scope_link(kind, location), name)
    }
}

/// Result of a mutating verb: the new representation and its operation
#[derive(Debug, Clone)]
pub struct Outcome<K> {
    pub resource: K,
    pub operation: Operation,
}

/// Parameters of a list/describe call
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Explicit keys; every one must exist
    pub ids: Vec<String>,
    pub filters: Vec<Filter>,
    /// `name = "value"` expression
    pub expression: Option<String>,
    /// Region or zone the records must live in
    pub location: Option<String>,
    pub page: PageRequest,
}

/// Resource engine over an injected store
#[derive(Clone, Debug)]
pub struct Engine {
    pub(crate) store: Store,
    pub(crate) config: Arc<EngineConfig>,
}

impl Engine {
    pub fn new(store: Store, config: EngineConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    /// Engine over a fresh store with default settings
    pub fn in_memory() -> Self {
        Self::new(Store::new(), EngineConfig::default())
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drop all state, for test isolation
    pub fn reset(&self) {
        self.store.reset();
    }

    pub(crate) fn operation(
        &self,
        target: &dyn Record,
        operation_type: OperationType,
        request: Option<&FieldMap>,
    ) -> Operation {
        let kind = target.kind();
        let location = target.location();
        Operation::done(
            &self.config,
            kind,
            location,
            operation_type,
            self.config.located_link(kind, location, target.key()),
            target.meta().id.clone(),
            request.map(FieldMap::to_value),
        )
    }

    // ========================================================================
    // Generic verbs
    // ========================================================================

    /// Create a record of kind `K`
    pub fn insert<K: ResourceKind>(&self, request: &FieldMap) -> Result<Outcome<K>> {
        let labels = check_insert::<K>(request)?;
        let mut tables = self.store.write();
        self.insert_locked::<K>(&mut tables, request, labels)
    }

    /// Create `count` records of kind `K` from one request; either all of
    /// them are stored or none is
    pub fn insert_many<K: ResourceKind>(
        &self,
        request: &FieldMap,
        count: usize,
    ) -> Result<Vec<Outcome<K>>> {
        let labels = check_insert::<K>(request)?;
        if K::KIND.family() == Family::Gcp && count > 1 {
            return Err(Error::invalid(format!(
                "{} names are unique; cannot create {} from one request",
                K::KIND,
                count
            )));
        }

        let mut tables = self.store.write();
        // later copies can collide with earlier ones, so stage them all first
        let mut staged = tables.clone();
        let outcomes = (0..count)
            .map(|_| self.insert_locked::<K>(&mut staged, request, labels.clone()))
            .collect::<Result<Vec<_>>>()?;
        *tables = staged;

        info!("Inserted {} {} records", outcomes.len(), K::KIND);
        Ok(outcomes)
    }

    fn build_record<K: ResourceKind>(
        &self,
        tables: &Tables,
        request: &FieldMap,
        labels: BTreeMap<String, String>,
    ) -> Result<K> {
        let id = id::new_id(K::KIND);
        let name = match K::KIND.family() {
            Family::Gcp => {
                let name = request.require_str("name")?;
                validate_gcp_name(&name)?;
                if tables.contains(K::KIND, &name) {
                    return Err(Error::already_exists(K::KIND, name));
                }
                name
            }
            Family::Aws => labels.get("Name").cloned().unwrap_or_else(|| id.clone()),
        };
        let meta = ResourceMeta::new(id, name, K::INITIAL_STATUS).with_labels(labels);

        let ctx = BuildContext {
            tables,
            config: &self.config,
        };
        let record = K::build(meta, request, &ctx)?;
        integrity::check_references(tables, &record.references())?;
        Ok(record)
    }

    fn insert_locked<K: ResourceKind>(
        &self,
        tables: &mut Tables,
        request: &FieldMap,
        labels: BTreeMap<String, String>,
    ) -> Result<Outcome<K>> {
        let record = self.build_record::<K>(tables, request, labels)?;

        let parents = record.parent_links();
        tables.put(record.clone().into());
        integrity::register_back_refs(tables, &integrity::back_ref(&record), &parents);

        debug!("Inserted {} {}", K::KIND, record.key());
        let operation = self.operation(&record, OperationType::Insert, Some(request));
        Ok(Outcome {
            resource: record,
            operation,
        })
    }

    /// Fetch one record
    pub fn get<K: ResourceKind>(&self, key: &str) -> Result<K> {
        let key = normalize_key(key);
        let tables = self.store.read();
        lookup::<K>(&tables, key).cloned()
    }

    /// List records in insertion order, filtered and paginated
    pub fn list<K: ResourceKind>(&self, query: &ListQuery) -> Result<Page<K>> {
        let wanted_name = match query.expression.as_deref() {
            Some(expr) => filter::parse_name_expression(expr)?,
            None => None,
        };

        let records: Vec<K> = {
            let tables = self.store.read();
            if query.ids.is_empty() {
                tables
                    .values(K::KIND)
                    .filter_map(K::from_record)
                    .cloned()
                    .collect()
            } else {
                query
                    .ids
                    .iter()
                    .map(|raw| lookup::<K>(&tables, normalize_key(raw)).cloned())
                    .collect::<Result<Vec<_>>>()?
            }
        };

        let mut records = filter::apply(records, &query.filters);
        if let Some(name) = wanted_name {
            records.retain(|r| r.meta().name == name);
        }
        if let Some(location) = query.location.as_deref() {
            records.retain(|r| r.location().map_or(true, |l| l == location));
        }
        filter::paginate(records, &query.page, self.config.default_page_size)
    }

    /// Merge the present fields of `request` into a record
    pub fn patch<K: ResourceKind>(&self, key: &str, request: &FieldMap) -> Result<Outcome<K>> {
        self.modify::<K>(key, request, WriteMode::Merge, OperationType::Patch)
    }

    /// Replace the modeled sub-objects of a record
    pub fn update<K: ResourceKind>(&self, key: &str, request: &FieldMap) -> Result<Outcome<K>> {
        self.modify::<K>(key, request, WriteMode::Replace, OperationType::Update)
    }

    fn modify<K: ResourceKind>(
        &self,
        key: &str,
        request: &FieldMap,
        mode: WriteMode,
        operation_type: OperationType,
    ) -> Result<Outcome<K>> {
        let key = normalize_key(key);
        let labels = request.labels()?;
        let mut tables = self.store.write();
        let current = lookup::<K>(&tables, key)?.clone();

        if K::KIND.family() == Family::Gcp {
            if let Some(name) = request.str("name")? {
                if name != current.meta().name {
                    return Err(Error::invalid(format!(
                        "the name of {} '{}' cannot be changed",
                        K::KIND,
                        key
                    )));
                }
            }
        }

        let mut next = current.clone();
        {
            let ctx = BuildContext {
                tables: &tables,
                config: &self.config,
            };
            next.apply(request, &ctx, mode)?;
        }
        integrity::check_references(&tables, &next.references())?;

        if let Some(labels) = labels {
            next.meta_mut().set_labels(labels);
            if K::KIND.family() == Family::Aws {
                sync_name_tag(next.meta_mut());
            }
        }
        next.meta_mut().touch();

        integrity::relink_back_refs(
            &mut tables,
            &integrity::back_ref(&next),
            &current.parent_links(),
            &next.parent_links(),
        );
        tables.put(next.clone().into());

        debug!("Modified {} {} ({:?})", K::KIND, key, mode);
        let operation = self.operation(&next, operation_type, Some(request));
        Ok(Outcome {
            resource: next,
            operation,
        })
    }

    /// Delete a record that is not in use and has no dependents
    pub fn delete<K: ResourceKind>(&self, key: &str) -> Result<Operation> {
        let mut tables = self.store.write();
        self.delete_locked::<K>(&mut tables, normalize_key(key))
            .map(|outcome| outcome.operation)
    }

    /// Delete several records of one kind, returning each record as it was
    /// just before removal. A key named twice is deleted once; nothing is
    /// removed unless every key exists and is deletable.
    pub fn delete_all<K: ResourceKind>(&self, keys: &[String]) -> Result<Vec<Outcome<K>>> {
        let mut unique: Vec<&str> = Vec::with_capacity(keys.len());
        for key in keys.iter().map(|k| normalize_key(k)) {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }

        let mut tables = self.store.write();
        for key in &unique {
            lookup::<K>(&tables, key)?;
            integrity::check_deletable(&tables, &Reference::new(K::KIND, *key))?;
        }
        unique
            .iter()
            .map(|key| self.delete_locked::<K>(&mut tables, key))
            .collect()
    }

    fn delete_locked<K: ResourceKind>(&self, tables: &mut Tables, key: &str) -> Result<Outcome<K>> {
        let record = lookup::<K>(tables, key)?.clone();
        integrity::check_deletable(tables, &Reference::new(K::KIND, key))?;

        tables
            .delete(K::KIND, key)
            .ok_or_else(|| Error::not_found(K::KIND, key))?;
        integrity::unregister_back_refs(tables, &integrity::back_ref(&record), &record.parent_links());

        info!("Deleted {} {}", K::KIND, key);
        let operation = self.operation(&record, OperationType::Delete, None);
        Ok(Outcome {
            resource: record,
            operation,
        })
    }

    /// Replace labels, guarded by the caller's view of the fingerprint
    pub fn set_labels<K: ResourceKind>(&self, key: &str, request: &FieldMap) -> Result<Outcome<K>> {
        let key = normalize_key(key);
        let fingerprint = request.require_str("label_fingerprint")?;
        let labels = request.labels()?.unwrap_or_default();

        let mut tables = self.store.write();
        let record = tables
            .get_mut(K::KIND, key)
            .and_then(K::from_record_mut)
            .ok_or_else(|| Error::not_found(K::KIND, key))?;

        if record.meta().label_fingerprint != fingerprint {
            return Err(Error::ConditionNotMet(format!(
                "labels fingerprint '{}' does not match the current fingerprint of {} '{}'",
                fingerprint,
                K::KIND,
                key
            )));
        }

        let meta = record.meta_mut();
        meta.set_labels(labels);
        meta.touch();
        let updated = record.clone();

        debug!("Set labels on {} {}", K::KIND, key);
        let operation = self.operation(&updated, OperationType::SetLabels, Some(request));
        Ok(Outcome {
            resource: updated,
            operation,
        })
    }

    /// Add or overwrite tags on any EC2-style resources
    pub fn create_tags(&self, request: &FieldMap) -> Result<Ack> {
        let ids = request
            .str_list("resource_ids")?
            .ok_or_else(|| Error::MissingParameter("resource_ids".to_string()))?;
        let tags = request
            .labels()?
            .ok_or_else(|| Error::MissingParameter("tags".to_string()))?;

        let mut tables = self.store.write();
        let targets = resolve_tagged(&tables, &ids)?;
        for target in &targets {
            if let Some(record) = tables.get_mut(target.kind, &target.key) {
                let meta = record.meta_mut();
                let mut labels = meta.labels.clone();
                labels.extend(tags.clone());
                meta.set_labels(labels);
                sync_name_tag(meta);
                meta.touch();
            }
        }

        debug!("Tagged {} resources", targets.len());
        Ok(Ack::new())
    }

    /// Remove tags from EC2-style resources.
    ///
    /// `tag_keys` removes by key; `tags` removes a key only if its value
    /// matches (an empty value matches any). With neither, every tag goes.
    pub fn delete_tags(&self, request: &FieldMap) -> Result<Ack> {
        let ids = request
            .str_list("resource_ids")?
            .ok_or_else(|| Error::MissingParameter("resource_ids".to_string()))?;
        let keys = request.str_list("tag_keys")?;
        let pairs = request.labels()?;

        let mut tables = self.store.write();
        let targets = resolve_tagged(&tables, &ids)?;
        for target in &targets {
            if let Some(record) = tables.get_mut(target.kind, &target.key) {
                let meta = record.meta_mut();
                let labels = remove_tags(&meta.labels, keys.as_deref(), pairs.as_ref());
                meta.set_labels(labels);
                sync_name_tag(meta);
                meta.touch();
            }
        }

        debug!("Untagged {} resources", targets.len());
        Ok(Ack::new())
    }
}

/// Required fields and labels of an insert request, checked before locking
fn check_insert<K: ResourceKind>(request: &FieldMap) -> Result<BTreeMap<String, String>> {
    if let Some(missing) = request.missing(K::REQUIRED) {
        return Err(Error::MissingParameter(missing.to_string()));
    }
    Ok(request.labels()?.unwrap_or_default())
}

/// Typed lookup of one record
pub(crate) fn lookup<'a, K: ResourceKind>(tables: &'a Tables, key: &str) -> Result<&'a K> {
    tables
        .get(K::KIND, key)
        .and_then(K::from_record)
        .ok_or_else(|| Error::not_found(K::KIND, key))
}

/// EC2-style records are named by their `Name` tag, falling back to the id
fn sync_name_tag(meta: &mut ResourceMeta) {
    meta.name = meta
        .labels
        .get("Name")
        .cloned()
        .unwrap_or_else(|| meta.id.clone());
}

fn resolve_tagged(tables: &Tables, ids: &[String]) -> Result<Vec<Reference>> {
    ids.iter()
        .map(|raw| {
            let key = normalize_key(raw);
            let kind = Kind::from_aws_id(key)
                .ok_or_else(|| Error::invalid(format!("Invalid id: '{}'", key)))?;
            if tables.contains(kind, key) {
                Ok(Reference::new(kind, key))
            } else {
                Err(Error::not_found(kind, key))
            }
        })
        .collect()
}

fn remove_tags(
    labels: &BTreeMap<String, String>,
    keys: Option<&[String]>,
    pairs: Option<&BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    if keys.is_none() && pairs.is_none() {
        return BTreeMap::new();
    }
    labels
        .iter()
        .filter(|(k, v)| {
            let by_key = keys.is_some_and(|keys| keys.contains(k));
            let by_pair = pairs
                .and_then(|pairs| pairs.get(*k))
                .is_some_and(|wanted| wanted.is_empty() || wanted == *v);
            !(by_key || by_pair)
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Compute-style names: `[a-z]([-a-z0-9]{0,61}[a-z0-9])?`
pub fn validate_gcp_name(name: &str) -> Result<()> {
    let bytes = name.as_bytes();
    let valid = !bytes.is_empty()
        && bytes.len() <= 63
        && bytes[0].is_ascii_lowercase()
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[bytes.len() - 1] != b'-';
    if valid {
        Ok(())
    } else {
        Err(Error::invalid(format!(
            "Invalid value for field 'name': '{}'. Must be a match of regex '[a-z](?:[-a-z0-9]{{0,61}}[a-z0-9])?'",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("default", true)]
    #[test_case("a", true)]
    #[test_case("allow-ssh-22", true)]
    #[test_case("", false)]
    #[test_case("1st", false)]
    #[test_case("trailing-", false)]
    #[test_case("Upper", false)]
    #[test_case("under_score", false)]
    fn test_validate_gcp_name(name: &str, ok: bool) {
        assert_eq!(validate_gcp_name(name).is_ok(), ok);
    }

    #[test]
    fn test_validate_gcp_name_length() {
        assert!(validate_gcp_name(&"a".repeat(63)).is_ok());
        assert!(validate_gcp_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_links() {
        let config = EngineConfig::default();
        assert_eq!(
            config.self_link(Kind::Network, "default"),
            "https://compute.googleapis.com/compute/v1/projects/skymock-project/global/networks/default"
        );
        assert!(config
            .self_link(Kind::Subnetwork, "sub")
            .ends_with("/regions/us-central1/subnetworks/sub"));
        assert!(config
            .located_link(Kind::Subnetwork, Some("europe-west1"), "sub")
            .ends_with("/regions/europe-west1/subnetworks/sub"));
        assert!(config
            .collection_link(Kind::InstanceGroupManager, None)
            .ends_with("/zones/us-central1-a/instanceGroupManagers"));
        assert!(config
            .operation_link(Kind::InstanceGroupManager, Some("asia-east1-b"), "op")
            .ends_with("/zones/asia-east1-b/operations/op"));
    }

    #[test]
    fn test_remove_tags() {
        let labels: BTreeMap<String, String> = [
            ("Name".to_string(), "web".to_string()),
            ("env".to_string(), "dev".to_string()),
            ("team".to_string(), "net".to_string()),
        ]
        .into();
        let keys = vec!["env".to_string()];
        let pairs: BTreeMap<String, String> = [("team".to_string(), "other".to_string())].into();

        let left = remove_tags(&labels, Some(&keys), Some(&pairs));
        assert_eq!(left.keys().collect::<Vec<_>>(), vec!["Name", "team"]);
        assert!(remove_tags(&labels, None, None).is_empty());
    }
}
