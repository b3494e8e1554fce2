//! EC2-style action endpoint
//!
//! One `POST /ec2` route carries every call; the `Action` field picks the
//! verb. Responses use the camelCase JSON rendering of the EC2 XML shapes.

use crate::server::{ApiError, AppState};
use crate::wire;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use skymock_common::resources::{
    instance::Instance, network_interface::NetworkInterface, security_group::SecurityGroup,
    subnet::Subnet, vpc::Vpc, vpn_gateway::VpnGateway,
};
use skymock_common::{id, Ack, Engine, Error, FieldMap, Outcome, Record, ResourceKind, Result};
use tracing::debug;

/// Largest MaxCount accepted by RunInstances
const MAX_RUN_COUNT: i64 = 20;

pub async fn handle(State(state): State<AppState>, body: Bytes) -> Response {
    match dispatch(&state.engine, &body) {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) => ApiError::aws(e).into_response(),
    }
}

fn dispatch(engine: &Engine, body: &[u8]) -> Result<Value> {
    let (action, request) = wire::aws_request(wire::parse_body(body)?)?;
    debug!("EC2 action {}", action);

    match action.as_str() {
        "CreateVpc" => created::<Vpc>(engine, &request, "vpc"),
        "DescribeVpcs" => described::<Vpc>(engine, &request, "vpc_id", "vpcSet"),
        "ModifyVpcAttribute" => modified::<Vpc>(engine, request, "vpc_id"),
        "DeleteVpc" => deleted::<Vpc>(engine, &request, "vpc_id"),

        "CreateSubnet" => created::<Subnet>(engine, &request, "subnet"),
        "DescribeSubnets" => described::<Subnet>(engine, &request, "subnet_id", "subnetSet"),
        "ModifySubnetAttribute" => modified::<Subnet>(engine, request, "subnet_id"),
        "DeleteSubnet" => deleted::<Subnet>(engine, &request, "subnet_id"),

        "CreateSecurityGroup" => {
            let outcome = engine.insert::<SecurityGroup>(&request)?;
            Ok(response("groupId", json!(outcome.resource.meta.id)))
        }
        "DescribeSecurityGroups" => {
            described::<SecurityGroup>(engine, &request, "group_id", "securityGroupInfo")
        }
        "DeleteSecurityGroup" => deleted::<SecurityGroup>(engine, &request, "group_id"),

        "CreateNetworkInterface" => {
            created::<NetworkInterface>(engine, &request, "networkInterface")
        }
        "DescribeNetworkInterfaces" => described::<NetworkInterface>(
            engine,
            &request,
            "network_interface_id",
            "networkInterfaceSet",
        ),
        "ModifyNetworkInterfaceAttribute" => {
            modified::<NetworkInterface>(engine, request, "network_interface_id")
        }
        "DeleteNetworkInterface" => {
            deleted::<NetworkInterface>(engine, &request, "network_interface_id")
        }
        "AttachNetworkInterface" => {
            let result = engine.attach_network_interface(&request)?;
            Ok(response("attachmentId", json!(result.attachment_id)))
        }
        "DetachNetworkInterface" => ack(engine.detach_network_interface(&request)?),

        "RunInstances" => run_instances(engine, &request),
        "DescribeInstances" => describe_instances(engine, &request),
        "TerminateInstances" => terminate_instances(engine, &request),

        "CreateVpnGateway" => created::<VpnGateway>(engine, &request, "vpnGateway"),
        "DescribeVpnGateways" => {
            described::<VpnGateway>(engine, &request, "vpn_gateway_id", "vpnGatewaySet")
        }
        "DeleteVpnGateway" => deleted::<VpnGateway>(engine, &request, "vpn_gateway_id"),
        "AttachVpnGateway" => {
            let attachment = engine.attach_vpn_gateway(&request)?;
            Ok(response(
                "attachment",
                json!({ "vpcId": attachment.vpc_id, "state": attachment.state.as_str() }),
            ))
        }
        "DetachVpnGateway" => ack(engine.detach_vpn_gateway(&request)?),

        "CreateTags" => ack(engine.create_tags(&request)?),
        "DeleteTags" => ack(engine.delete_tags(&request)?),

        _ => Err(Error::UnknownAction(action)),
    }
}

/// `{ requestId, <field>: value }`
fn response(field: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert("requestId".to_string(), json!(id::new_request_id()));
    map.insert(field.to_string(), value);
    Value::Object(map)
}

fn ack(ack: Ack) -> Result<Value> {
    serde_json::to_value(ack).map_err(|e| Error::Internal(e.to_string()))
}

fn created<K: ResourceKind>(engine: &Engine, request: &FieldMap, field: &str) -> Result<Value> {
    let outcome = engine.insert::<K>(request)?;
    Ok(response(field, outcome.resource.project(engine.config())))
}

fn described<K: ResourceKind>(
    engine: &Engine,
    request: &FieldMap,
    ids_field: &str,
    set_field: &str,
) -> Result<Value> {
    let query = wire::list_query(request, Some(ids_field))?;
    let page = engine.list::<K>(&query)?;
    let items: Vec<Value> = page
        .items
        .iter()
        .map(|r| r.project(engine.config()))
        .collect();

    let mut body = response(set_field, Value::Array(items));
    if let Some(token) = page.next_page_token {
        body["nextToken"] = json!(token);
    }
    Ok(body)
}

fn modified<K: ResourceKind>(engine: &Engine, mut request: FieldMap, key_field: &str) -> Result<Value> {
    let key = request.require_str(key_field)?;
    request.remove(key_field);
    engine.patch::<K>(&key, &request)?;
    ack(Ack::new())
}

fn deleted<K: ResourceKind>(engine: &Engine, request: &FieldMap, key_field: &str) -> Result<Value> {
    engine.delete::<K>(&request.require_str(key_field)?)?;
    ack(Ack::new())
}

fn run_instances(engine: &Engine, request: &FieldMap) -> Result<Value> {
    let count = request.i64("max_count")?.unwrap_or(1);
    if !(1..=MAX_RUN_COUNT).contains(&count) {
        return Err(Error::invalid(format!(
            "MaxCount must be between 1 and {}, got {}",
            MAX_RUN_COUNT, count
        )));
    }

    let instances: Vec<Value> = engine
        .insert_many::<Instance>(request, count as usize)?
        .iter()
        .map(|outcome| outcome.resource.project(engine.config()))
        .collect();

    let mut body = response("reservationId", json!(id::aws_id("r")));
    body["ownerId"] = json!(engine.config().account_id);
    body["instancesSet"] = Value::Array(instances);
    Ok(body)
}

/// One reservation per instance; reservations are not tracked
fn describe_instances(engine: &Engine, request: &FieldMap) -> Result<Value> {
    let query = wire::list_query(request, Some("instance_id"))?;
    let page = engine.list::<Instance>(&query)?;
    let config = engine.config();
    let reservations: Vec<Value> = page
        .items
        .iter()
        .map(|instance| {
            json!({
                "reservationId": format!("r-{}", instance.meta.id.trim_start_matches("i-")),
                "ownerId": config.account_id,
                "instancesSet": [instance.project(config)],
            })
        })
        .collect();

    let mut body = response("reservationSet", Value::Array(reservations));
    if let Some(token) = page.next_page_token {
        body["nextToken"] = json!(token);
    }
    Ok(body)
}

fn terminate_instances(engine: &Engine, request: &FieldMap) -> Result<Value> {
    let ids = match request.str_list("instance_ids")? {
        Some(ids) => ids,
        None => request
            .str_list("instance_id")?
            .ok_or_else(|| Error::MissingParameter("InstanceId".to_string()))?,
    };
    let changes: Vec<Value> = engine
        .delete_all::<Instance>(&ids)?
        .iter()
        .map(|Outcome { resource: instance, .. }| {
            json!({
                "instanceId": instance.meta.id,
                "previousState": { "code": 16, "name": instance.meta.status.as_str() },
                "currentState": { "code": 48, "name": "terminated" },
            })
        })
        .collect();
    Ok(response("instancesSet", Value::Array(changes)))
}
