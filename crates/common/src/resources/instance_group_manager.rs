//! Compute-style zonal managed instance group
//!
//! No instances are ever materialized; the group only tracks its target size
//! and template, and reports itself as stable.

use super::instance_template::InstanceTemplate;
use super::{choose, gcp_common_filter, gcp_envelope};
use crate::engine::{lookup, Engine, EngineConfig, Outcome};
use crate::integrity::{normalize_key, resolve};
use crate::operation::OperationType;
use crate::record::{record_accessors, record_variant, BuildContext, Record, ResourceKind, WriteMode};
use crate::request::FieldMap;
use crate::types::{Kind, Reference, ResourceMeta, Status};
use crate::{Error, Result};
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceGroupManager {
    pub meta: ResourceMeta,
    pub description: String,
    pub zone: String,
    pub instance_template: String,
    pub base_instance_name: String,
    pub target_size: i64,
}

record_variant!(InstanceGroupManager);

impl Record for InstanceGroupManager {
    fn kind(&self) -> Kind {
        Kind::InstanceGroupManager
    }

    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    fn location(&self) -> Option<&str> {
        Some(&self.zone)
    }

    fn references(&self) -> Vec<Reference> {
        vec![Reference::new(Kind::InstanceTemplate, &self.instance_template)]
    }

    fn filter_values(&self, name: &str) -> Option<Vec<String>> {
        let value = match name {
            "zone" => self.zone.clone(),
            "instanceTemplate" => self.instance_template.clone(),
            "baseInstanceName" => self.base_instance_name.clone(),
            "targetSize" => self.target_size.to_string(),
            "description" => self.description.clone(),
            _ => return gcp_common_filter(&self.meta, name),
        };
        Some(vec![value])
    }

    fn project(&self, config: &EngineConfig) -> Value {
        let mut map = gcp_envelope(self, config);
        let zone_link = config.scope_link(Kind::InstanceGroupManager, Some(&self.zone));
        map.insert("description".into(), json!(self.description));
        map.insert(
            "instanceTemplate".into(),
            json!(config.self_link(Kind::InstanceTemplate, &self.instance_template)),
        );
        map.insert(
            "instanceGroup".into(),
            json!(format!("{}/instanceGroups/{}", zone_link, self.meta.name)),
        );
        map.insert("baseInstanceName".into(), json!(self.base_instance_name));
        map.insert("targetSize".into(), json!(self.target_size));
        map.insert(
            "currentActions".into(),
            json!({
                "none": self.target_size,
                "creating": 0,
                "deleting": 0,
                "recreating": 0,
                "refreshing": 0,
                "restarting": 0,
                "abandoning": 0,
            }),
        );
        map.insert("status".into(), json!({ "isStable": true }));
        map.insert("zone".into(), json!(zone_link));
        Value::Object(map)
    }
}

impl ResourceKind for InstanceGroupManager {
    const KIND: Kind = Kind::InstanceGroupManager;
    const REQUIRED: &'static [&'static str] = &["instance_template", "base_instance_name"];
    const INITIAL_STATUS: Status = Status::Ready;

    record_accessors!(InstanceGroupManager);

    fn build(meta: ResourceMeta, request: &FieldMap, ctx: &BuildContext<'_>) -> Result<Self> {
        let instance_template = resolve(
            ctx.tables,
            Kind::InstanceTemplate,
            &request.require_str("instance_template")?,
        )?;
        let base_instance_name = request.require_str("base_instance_name")?;
        validate_base_instance_name(&base_instance_name)?;
        let target_size = validate_size(request.i64("target_size")?.unwrap_or(0))?;

        Ok(InstanceGroupManager {
            meta,
            description: request.str("description")?.unwrap_or_default(),
            zone: request
                .str("zone")?
                .map(|z| normalize_key(&z).to_string())
                .unwrap_or_else(|| ctx.config.zone.clone()),
            instance_template,
            base_instance_name,
            target_size,
        })
    }

    fn apply(&mut self, request: &FieldMap, ctx: &BuildContext<'_>, mode: WriteMode) -> Result<()> {
        if let Some(zone) = request.str("zone")? {
            if normalize_key(&zone) != self.zone {
                return Err(Error::invalid("the zone of an instance group manager cannot be changed"));
            }
        }
        let replace = mode == WriteMode::Replace;
        if let Some(template) = request.str("instance_template")? {
            self.instance_template = resolve(ctx.tables, Kind::InstanceTemplate, &template)?;
        }
        if let Some(base) = request.str("base_instance_name")? {
            validate_base_instance_name(&base)?;
            self.base_instance_name = base;
        }
        let size = request.i64("target_size")?.map(validate_size).transpose()?;
        self.target_size = choose(size, self.target_size, 0, replace);
        self.description = choose(
            request.str("description")?,
            std::mem::take(&mut self.description),
            String::new(),
            replace,
        );
        Ok(())
    }
}

fn validate_size(size: i64) -> Result<i64> {
    if size < 0 {
        return Err(Error::invalid(format!(
            "Invalid value for field 'targetSize': {}. Must be greater than or equal to 0",
            size
        )));
    }
    Ok(size)
}

/// Instance name prefix: a Compute name of at most 58 characters
fn validate_base_instance_name(name: &str) -> Result<()> {
    if name.len() > 58 {
        return Err(Error::invalid(format!(
            "Invalid value for field 'baseInstanceName': '{}'. Must be at most 58 characters",
            name
        )));
    }
    crate::engine::validate_gcp_name(name)
}

impl Engine {
    // ========================================================================
    // Managed instance group verbs
    // ========================================================================

    /// Change the target size of a group
    pub fn resize_instance_group_manager(
        &self,
        key: &str,
        request: &FieldMap,
    ) -> Result<Outcome<InstanceGroupManager>> {
        let size = request
            .i64("size")?
            .ok_or_else(|| Error::MissingParameter("size".to_string()))?;
        let size = validate_size(size)?;
        let key = normalize_key(key);

        let mut tables = self.store.write();
        let group = tables
            .get_mut(Kind::InstanceGroupManager, key)
            .and_then(InstanceGroupManager::from_record_mut)
            .ok_or_else(|| Error::not_found(Kind::InstanceGroupManager, key))?;
        group.target_size = size;
        group.meta.touch();
        let resource = group.clone();

        info!("Resized instance group manager {} to {}", key, size);
        let operation = self.operation(&resource, OperationType::Resize, Some(request));
        Ok(Outcome {
            resource,
            operation,
        })
    }

    /// Point a group at a different instance template
    pub fn set_instance_template(
        &self,
        key: &str,
        request: &FieldMap,
    ) -> Result<Outcome<InstanceGroupManager>> {
        let raw = request.require_str("instance_template")?;
        let key = normalize_key(key);

        let mut tables = self.store.write();
        let template = resolve(&tables, Kind::InstanceTemplate, &raw)?;
        lookup::<InstanceTemplate>(&tables, &template)?;
        let group = tables
            .get_mut(Kind::InstanceGroupManager, key)
            .and_then(InstanceGroupManager::from_record_mut)
            .ok_or_else(|| Error::not_found(Kind::InstanceGroupManager, key))?;
        group.instance_template = template;
        group.meta.touch();
        let resource = group.clone();

        info!(
            "Instance group manager {} now uses template {}",
            key, resource.instance_template
        );
        let operation = self.operation(&resource, OperationType::SetInstanceTemplate, Some(request));
        Ok(Outcome {
            resource,
            operation,
        })
    }
}
