//! Compute-style instance template. Templates are immutable once created.

use super::{gcp_common_filter, gcp_envelope};
use crate::engine::EngineConfig;
use crate::integrity::{normalize_key, resolve};
use crate::record::{record_accessors, record_variant, BuildContext, Record, ResourceKind, WriteMode};
use crate::request::FieldMap;
use crate::types::{Kind, Reference, ResourceMeta, Status};
use crate::{Error, Result};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceTemplate {
    pub meta: ResourceMeta,
    pub description: String,
    pub machine_type: String,
    pub network: Option<String>,
    pub tags: Vec<String>,
}

record_variant!(InstanceTemplate);

impl Record for InstanceTemplate {
    fn kind(&self) -> Kind {
        Kind::InstanceTemplate
    }

    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    fn references(&self) -> Vec<Reference> {
        self.network
            .iter()
            .map(|network| Reference::new(Kind::Network, network))
            .collect()
    }

    fn filter_values(&self, name: &str) -> Option<Vec<String>> {
        let values = match name {
            "machineType" | "properties.machineType" => vec![self.machine_type.clone()],
            "network" => self.network.iter().cloned().collect(),
            "description" => vec![self.description.clone()],
            _ => return gcp_common_filter(&self.meta, name),
        };
        Some(values)
    }

    fn project(&self, config: &EngineConfig) -> Value {
        let mut map = gcp_envelope(self, config);
        map.insert("description".into(), json!(self.description));
        let interfaces: Vec<Value> = self
            .network
            .iter()
            .map(|network| json!({ "network": config.self_link(Kind::Network, network) }))
            .collect();
        map.insert(
            "properties".into(),
            json!({
                "machineType": self.machine_type,
                "networkInterfaces": interfaces,
                "tags": { "items": self.tags },
            }),
        );
        Value::Object(map)
    }
}

impl ResourceKind for InstanceTemplate {
    const KIND: Kind = Kind::InstanceTemplate;
    const REQUIRED: &'static [&'static str] = &["machine_type"];
    const INITIAL_STATUS: Status = Status::Ready;

    record_accessors!(InstanceTemplate);

    fn build(meta: ResourceMeta, request: &FieldMap, ctx: &BuildContext<'_>) -> Result<Self> {
        let machine_type = request.require_str("machine_type")?;
        let machine_type = normalize_key(&machine_type).to_string();
        if machine_type.is_empty() {
            return Err(Error::invalid("machine type must not be empty"));
        }
        let network = request
            .str("network")?
            .map(|raw| resolve(ctx.tables, Kind::Network, &raw))
            .transpose()?;

        Ok(InstanceTemplate {
            meta,
            description: request.str("description")?.unwrap_or_default(),
            machine_type,
            network,
            tags: request.str_list("tags_items")?.unwrap_or_default(),
        })
    }

    fn apply(&mut self, request: &FieldMap, _ctx: &BuildContext<'_>, _mode: WriteMode) -> Result<()> {
        let changes = ["description", "machine_type", "network", "tags_items"]
            .iter()
            .any(|field| request.contains(field));
        if changes {
            return Err(Error::invalid(format!(
                "instance template '{}' is immutable; create a new template instead",
                self.meta.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::resources::network::Network;

    fn setup() -> Engine {
        let engine = Engine::in_memory();
        engine
            .insert::<Network>(&FieldMap::new().with("name", "default"))
            .unwrap();
        engine
    }

    fn template(name: &str) -> FieldMap {
        FieldMap::new()
            .with("name", name)
            .with("machine_type", "zones/us-central1-a/machineTypes/e2-small")
            .with("network", "global/networks/default")
    }

    #[test]
    fn test_insert_and_project() {
        let engine = setup();
        let tpl = engine.insert::<InstanceTemplate>(&template("web")).unwrap().resource;
        assert_eq!(tpl.machine_type, "e2-small");
        assert_eq!(tpl.network.as_deref(), Some("default"));

        let value = tpl.project(engine.config());
        assert_eq!(value["kind"], "compute#instanceTemplate");
        assert_eq!(value["properties"]["machineType"], "e2-small");
        assert!(value["properties"]["networkInterfaces"][0]["network"]
            .as_str()
            .unwrap()
            .ends_with("/global/networks/default"));
    }

    #[test]
    fn test_immutable() {
        let engine = setup();
        engine.insert::<InstanceTemplate>(&template("web")).unwrap();
        let err = engine
            .patch::<InstanceTemplate>("web", &FieldMap::new().with("machine_type", "n1-standard-1"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_without_network() {
        let engine = Engine::in_memory();
        let tpl = engine
            .insert::<InstanceTemplate>(
                &FieldMap::new().with("name", "bare").with("machine_type", "e2-micro"),
            )
            .unwrap()
            .resource;
        assert!(tpl.references().is_empty());
    }
}
