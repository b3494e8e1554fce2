//! Emulated asynchronous operations
//!
//! Every mutating call already finished by the time one of these is built,
//! so operations are always reported as `DONE` and never retained.

use crate::engine::EngineConfig;
use crate::id;
use crate::types::{Kind, Scope};
use serde::Serialize;
use serde_json::Value;

/// Verb recorded on an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Insert,
    Patch,
    Update,
    Delete,
    SetLabels,
    Resize,
    SetInstanceTemplate,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Insert => "insert",
            OperationType::Patch => "patch",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::SetLabels => "setLabels",
            OperationType::Resize => "resize",
            OperationType::SetInstanceTemplate => "setInstanceTemplate",
        }
    }
}

/// Completed operation in the Compute `compute#operation` shape
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub kind: &'static str,
    pub id: String,
    pub name: String,
    pub operation_type: &'static str,
    pub target_link: String,
    pub target_id: String,
    pub status: &'static str,
    pub progress: u8,
    pub insert_time: String,
    pub start_time: String,
    pub end_time: String,
    pub self_link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<Value>,
}

impl Operation {
    /// Format the result of a call that has already succeeded
    pub fn done(
        config: &EngineConfig,
        kind: Kind,
        location: Option<&str>,
        operation_type: OperationType,
        target_link: String,
        target_id: String,
        request: Option<Value>,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let name = id::new_operation_name();
        let scope = config.scope_link(kind, location);
        let (region, zone) = match kind.scope() {
            Scope::Global => (None, None),
            Scope::Regional => (Some(scope), None),
            Scope::Zonal => (None, Some(scope)),
        };
        Self {
            kind: "compute#operation",
            id: id::gcp_id(),
            self_link: config.operation_link(kind, location, &name),
            name,
            operation_type: operation_type.as_str(),
            target_link,
            target_id,
            status: "DONE",
            progress: 100,
            insert_time: now.clone(),
            start_time: now.clone(),
            end_time: now,
            region,
            zone,
            request,
        }
    }
}

/// AWS-style success acknowledgement for verbs without a representation
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub request_id: String,
    #[serde(rename = "return")]
    pub return_value: bool,
}

impl Ack {
    pub fn new() -> Self {
        Self {
            request_id: id::new_request_id(),
            return_value: true,
        }
    }
}

impl Default for Ack {
    fn default() -> Self {
        Self::new()
    }
}
