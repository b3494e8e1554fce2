//! Compute-style REST handlers

use crate::server::{ApiError, ApiResult, AppState};
use crate::wire;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use skymock_common::resources::{
    firewall::Firewall, instance_group_manager::InstanceGroupManager,
    instance_template::InstanceTemplate, network::Network, subnetwork::Subnetwork,
};
use skymock_common::{
    Engine, Error, Family, FieldMap, Kind, ListQuery, Operation, Page, Record, Result, Scope,
};
use std::collections::HashMap;

/// Run `$body` with `$K` bound to the record type of a Compute kind
macro_rules! with_kind {
    ($kind:expr, $K:ident => $body:expr) => {
        match $kind {
            Kind::Network => {
                type $K = Network;
                $body
            }
            Kind::Subnetwork => {
                type $K = Subnetwork;
                $body
            }
            Kind::Firewall => {
                type $K = Firewall;
                $body
            }
            Kind::InstanceTemplate => {
                type $K = InstanceTemplate;
                $body
            }
            Kind::InstanceGroupManager => {
                type $K = InstanceGroupManager;
                $body
            }
            other => Err(Error::invalid(format!(
                "{} is not served by the Compute API",
                other
            ))),
        }
    };
}

fn insert_record(engine: &Engine, kind: Kind, request: &FieldMap) -> Result<Operation> {
    with_kind!(kind, K => engine.insert::<K>(request).map(|o| o.operation))
}

fn get_record(engine: &Engine, kind: Kind, key: &str) -> Result<Value> {
    with_kind!(kind, K => engine.get::<K>(key).map(|r| r.project(engine.config())))
}

fn list_records(engine: &Engine, kind: Kind, query: &ListQuery) -> Result<Page<Value>> {
    with_kind!(kind, K => engine
        .list::<K>(query)
        .map(|page| page.map(|r| r.project(engine.config()))))
}

fn patch_record(engine: &Engine, kind: Kind, key: &str, request: &FieldMap) -> Result<Operation> {
    with_kind!(kind, K => engine.patch::<K>(key, request).map(|o| o.operation))
}

fn update_record(engine: &Engine, kind: Kind, key: &str, request: &FieldMap) -> Result<Operation> {
    with_kind!(kind, K => engine.update::<K>(key, request).map(|o| o.operation))
}

fn delete_record(engine: &Engine, kind: Kind, key: &str) -> Result<Operation> {
    with_kind!(kind, K => engine.delete::<K>(key))
}

fn set_labels(engine: &Engine, kind: Kind, key: &str, request: &FieldMap) -> Result<Operation> {
    with_kind!(kind, K => engine.set_labels::<K>(key, request).map(|o| o.operation))
}

/// Kind addressed by the path, checked against the scope it was reached under
fn target_kind(params: &HashMap<String, String>) -> Result<Kind> {
    let collection = params
        .get("collection")
        .map(String::as_str)
        .unwrap_or_default();
    let kind = Kind::from_collection(collection)
        .filter(|k| k.family() == Family::Gcp)
        .ok_or_else(|| Error::invalid(format!("Unknown collection '{}'", collection)))?;

    let scope = if params.contains_key("zone") {
        Scope::Zonal
    } else if params.contains_key("region") {
        Scope::Regional
    } else {
        Scope::Global
    };
    if kind.scope() != scope {
        return Err(Error::invalid(format!(
            "collection '{}' is not {:?}",
            collection, scope
        )));
    }
    Ok(kind)
}

/// Region or zone named by the path
fn path_location(params: &HashMap<String, String>) -> Option<&str> {
    params
        .get("zone")
        .or_else(|| params.get("region"))
        .map(String::as_str)
}

/// A regional or zonal record is only addressable under its own region or zone
fn check_location(engine: &Engine, kind: Kind, params: &HashMap<String, String>) -> Result<()> {
    let Some(location) = path_location(params) else {
        return Ok(());
    };
    let key = name_param(params);
    let actual = with_kind!(kind, K => engine
        .get::<K>(key)
        .map(|r| r.location().map(str::to_string)))?;
    match actual {
        Some(actual) if actual != location => Err(Error::not_found(kind, key)),
        _ => Ok(()),
    }
}

/// Kind of a by-name route, once the record is known to live under the path
fn located_kind(engine: &Engine, params: &HashMap<String, String>) -> Result<Kind> {
    let kind = target_kind(params)?;
    check_location(engine, kind, params)?;
    Ok(kind)
}

fn name_param(params: &HashMap<String, String>) -> &str {
    params.get("name").map(String::as_str).unwrap_or_default()
}

fn operation(op: Result<Operation>) -> ApiResult {
    let op = op.map_err(ApiError::gcp)?;
    Ok(respond(&op))
}

fn respond(body: &impl Serialize) -> axum::response::Response {
    (StatusCode::OK, Json(body)).into_response()
}

pub async fn insert(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult {
    let kind = target_kind(&params).map_err(ApiError::gcp)?;
    let request = wire::parse_body(&body)
        .and_then(|body| wire::gcp_request(body, &params))
        .map_err(ApiError::gcp)?;
    operation(insert_record(&state.engine, kind, &request))
}

pub async fn list(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult {
    let kind = target_kind(&params).map_err(ApiError::gcp)?;
    let mut query = wire::list_query(&wire::gcp_query(&query), None).map_err(ApiError::gcp)?;
    let location = path_location(&params);
    query.location = location.map(str::to_string);
    let page = list_records(&state.engine, kind, &query).map_err(ApiError::gcp)?;

    let config = state.engine.config();
    let mut body = json!({
        "kind": format!("{}List", kind.gcp_kind()),
        "id": format!("projects/{}/{}", config.project, kind.collection()),
        "items": page.items,
        "selfLink": config.collection_link(kind, location),
    });
    if let Some(token) = page.next_page_token {
        body["nextPageToken"] = json!(token);
    }
    Ok(respond(&body))
}

pub async fn get(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
) -> ApiResult {
    let kind = located_kind(&state.engine, &params).map_err(ApiError::gcp)?;
    let value = get_record(&state.engine, kind, name_param(&params)).map_err(ApiError::gcp)?;
    Ok(respond(&value))
}

pub async fn patch(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult {
    let kind = located_kind(&state.engine, &params).map_err(ApiError::gcp)?;
    let request = wire::parse_body(&body)
        .and_then(|body| wire::gcp_request(body, &params))
        .map_err(ApiError::gcp)?;
    operation(patch_record(&state.engine, kind, name_param(&params), &request))
}

pub async fn update(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult {
    let kind = located_kind(&state.engine, &params).map_err(ApiError::gcp)?;
    let request = wire::parse_body(&body)
        .and_then(|body| wire::gcp_request(body, &params))
        .map_err(ApiError::gcp)?;
    operation(update_record(&state.engine, kind, name_param(&params), &request))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
) -> ApiResult {
    let kind = located_kind(&state.engine, &params).map_err(ApiError::gcp)?;
    operation(delete_record(&state.engine, kind, name_param(&params)))
}

/// Custom methods: `setLabels`, `resize`, `setInstanceTemplate`
pub async fn verb(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult {
    let kind = located_kind(&state.engine, &params).map_err(ApiError::gcp)?;
    let mut request = wire::parse_body(&body)
        .and_then(|body| wire::gcp_request(body, &params))
        .map_err(ApiError::gcp)?;
    // resize carries its size in the query string
    for (name, value) in &query {
        let name = wire::snake_case(name);
        if !request.contains(&name) {
            request.insert(&name, value.clone());
        }
    }

    let engine = &state.engine;
    let name = name_param(&params);
    let result = match (params.get("verb").map(String::as_str), kind) {
        (Some("setLabels"), _) => set_labels(engine, kind, name, &request),
        (Some("resize"), Kind::InstanceGroupManager) => engine
            .resize_instance_group_manager(name, &request)
            .map(|o| o.operation),
        (Some("setInstanceTemplate"), Kind::InstanceGroupManager) => engine
            .set_instance_template(name, &request)
            .map(|o| o.operation),
        (other, _) => Err(Error::invalid(format!(
            "Unknown method '{}' on {}",
            other.unwrap_or_default(),
            kind.collection()
        ))),
    };
    operation(result)
}

#[cfg(test)]
mod tests {
    use crate::server::tests::call;
    use crate::server::{router, AppState};
    use axum::http::{Method, StatusCode};
    use axum::Router;
    use serde_json::json;
    use skymock_common::Engine;

    const GLOBAL: &str = "/compute/v1/projects/p/global";
    const REGION: &str = "/compute/v1/projects/p/regions/us-central1";
    const ZONE: &str = "/compute/v1/projects/p/zones/us-central1-a";

    fn app() -> Router {
        router(AppState::new(Engine::in_memory()))
    }

    async fn insert_network(app: &Router, name: &str) {
        let (status, op) = call(
            app,
            Method::POST,
            &format!("{}/networks", GLOBAL),
            Some(json!({ "name": name, "autoCreateSubnetworks": false, "routingConfig": { "routingMode": "GLOBAL" } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", op);
        assert_eq!(op["status"], "DONE");
        assert_eq!(op["operationType"], "insert");
    }

    #[tokio::test]
    async fn test_network_lifecycle() {
        let app = app();
        insert_network(&app, "vpc-a").await;

        let (status, net) = call(&app, Method::GET, &format!("{}/networks/vpc-a", GLOBAL), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(net["kind"], "compute#network");
        assert_eq!(net["routingConfig"]["routingMode"], "GLOBAL");

        let (status, list) = call(&app, Method::GET, &format!("{}/networks", GLOBAL), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["kind"], "compute#networkList");
        assert_eq!(list["items"].as_array().unwrap().len(), 1);

        let (status, op) = call(&app, Method::DELETE, &format!("{}/networks/vpc-a", GLOBAL), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(op["operationType"], "delete");

        let (status, err) = call(&app, Method::GET, &format!("{}/networks/vpc-a", GLOBAL), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["error"]["errors"][0]["reason"], "notFound");
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let app = app();
        insert_network(&app, "dup").await;
        let (status, err) = call(
            &app,
            Method::POST,
            &format!("{}/networks", GLOBAL),
            Some(json!({ "name": "dup" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["error"]["code"], 409);
    }

    #[tokio::test]
    async fn test_subnetwork_under_region() {
        let app = app();
        insert_network(&app, "net").await;
        let (status, op) = call(
            &app,
            Method::POST,
            &format!("{}/subnetworks", REGION),
            Some(json!({
                "name": "sub",
                "network": "projects/p/global/networks/net",
                "ipCidrRange": "10.0.0.0/24",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", op);
        assert!(op["region"].as_str().unwrap().ends_with("/regions/us-central1"));

        // regional collection reached through the global path
        let (status, _) = call(&app, Method::GET, &format!("{}/subnetworks", GLOBAL), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, err) = call(&app, Method::DELETE, &format!("{}/networks/net", GLOBAL), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"]["errors"][0]["reason"], "resourceInUseByAnotherResource");
    }

    #[tokio::test]
    async fn test_subnetworks_stay_in_their_region() {
        let app = app();
        insert_network(&app, "net").await;
        const EUROPE: &str = "/compute/v1/projects/p/regions/europe-west1";
        for (scope, name, range) in [(REGION, "us", "10.0.0.0/24"), (EUROPE, "eu", "10.0.1.0/24")] {
            let (status, op) = call(
                &app,
                Method::POST,
                &format!("{}/subnetworks", scope),
                Some(json!({ "name": name, "network": "global/networks/net", "ipCidrRange": range })),
            )
            .await;
            assert_eq!(status, StatusCode::OK, "{}", op);
        }

        let (status, list) = call(&app, Method::GET, &format!("{}/subnetworks", EUROPE), None).await;
        assert_eq!(status, StatusCode::OK);
        let items = list["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["name"], "eu");
        assert!(items[0]["selfLink"]
            .as_str()
            .unwrap()
            .ends_with("/regions/europe-west1/subnetworks/eu"));
        assert!(list["selfLink"]
            .as_str()
            .unwrap()
            .ends_with("/regions/europe-west1/subnetworks"));

        let (status, _) = call(&app, Method::GET, &format!("{}/subnetworks/eu", REGION), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, Method::DELETE, &format!("{}/subnetworks/eu", REGION), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, net) = call(&app, Method::GET, &format!("{}/networks/net", GLOBAL), None).await;
        let links: Vec<&str> = net["subnetworks"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|l| l.as_str())
            .collect();
        assert!(links[0].ends_with("/regions/us-central1/subnetworks/us"));
        assert!(links[1].ends_with("/regions/europe-west1/subnetworks/eu"));

        let (status, op) = call(&app, Method::DELETE, &format!("{}/subnetworks/eu", EUROPE), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(op["region"].as_str().unwrap().ends_with("/regions/europe-west1"));
        assert!(op["targetLink"]
            .as_str()
            .unwrap()
            .ends_with("/regions/europe-west1/subnetworks/eu"));
    }

    #[tokio::test]
    async fn test_firewall_patch() {
        let app = app();
        insert_network(&app, "default").await;
        let (status, _) = call(
            &app,
            Method::POST,
            &format!("{}/firewalls", GLOBAL),
            Some(json!({
                "name": "allow-ssh",
                "allowed": [{ "IPProtocol": "tcp", "ports": ["22"] }],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &app,
            Method::PATCH,
            &format!("{}/firewalls/allow-ssh", GLOBAL),
            Some(json!({ "priority": 500 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, fw) = call(&app, Method::GET, &format!("{}/firewalls/allow-ssh", GLOBAL), None).await;
        assert_eq!(fw["priority"], 500);
        assert_eq!(fw["allowed"][0]["IPProtocol"], "tcp");
    }

    #[tokio::test]
    async fn test_set_labels_fingerprint() {
        let app = app();
        insert_network(&app, "net").await;
        let (_, net) = call(&app, Method::GET, &format!("{}/networks/net", GLOBAL), None).await;
        let fingerprint = net["labelFingerprint"].as_str().unwrap().to_string();

        let uri = format!("{}/networks/net/setLabels", GLOBAL);
        let (status, _) = call(
            &app,
            Method::POST,
            &uri,
            Some(json!({ "labels": { "env": "dev" }, "labelFingerprint": fingerprint })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // the old fingerprint is now stale
        let (status, err) = call(
            &app,
            Method::POST,
            &uri,
            Some(json!({ "labels": { "env": "prod" }, "labelFingerprint": fingerprint })),
        )
        .await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(err["error"]["errors"][0]["reason"], "conditionNotMet");

        let (_, net) = call(&app, Method::GET, &format!("{}/networks/net", GLOBAL), None).await;
        assert_eq!(net["labels"]["env"], "dev");
    }

    #[tokio::test]
    async fn test_instance_group_manager_verbs() {
        let app = app();
        insert_network(&app, "default").await;
        for name in ["tpl-a", "tpl-b"] {
            let (status, op) = call(
                &app,
                Method::POST,
                &format!("{}/instanceTemplates", GLOBAL),
                Some(json!({
                    "name": name,
                    "properties": {
                        "machineType": "e2-small",
                        "networkInterfaces": [{ "network": "global/networks/default" }],
                    },
                })),
            )
            .await;
            assert_eq!(status, StatusCode::OK, "{}", op);
        }

        let (status, op) = call(
            &app,
            Method::POST,
            &format!("{}/instanceGroupManagers", ZONE),
            Some(json!({
                "name": "web",
                "instanceTemplate": "global/instanceTemplates/tpl-a",
                "baseInstanceName": "web",
                "targetSize": 1,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", op);

        let (status, op) = call(
            &app,
            Method::POST,
            &format!("{}/instanceGroupManagers/web/resize?size=3", ZONE),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", op);
        assert_eq!(op["operationType"], "resize");

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("{}/instanceGroupManagers/web/setInstanceTemplate", ZONE),
            Some(json!({ "instanceTemplate": "global/instanceTemplates/tpl-b" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, igm) = call(&app, Method::GET, &format!("{}/instanceGroupManagers/web", ZONE), None).await;
        assert_eq!(igm["targetSize"], 3);
        assert!(igm["instanceTemplate"].as_str().unwrap().ends_with("/tpl-b"));

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("{}/networks/default/resize", GLOBAL),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_paging_and_filter() {
        let app = app();
        for name in ["a", "b", "c"] {
            insert_network(&app, name).await;
        }
        let (_, page) = call(&app, Method::GET, &format!("{}/networks?maxResults=2", GLOBAL), None).await;
        assert_eq!(page["items"].as_array().unwrap().len(), 2);
        let token = page["nextPageToken"].as_str().unwrap().to_string();

        let (_, rest) = call(
            &app,
            Method::GET,
            &format!("{}/networks?maxResults=2&pageToken={}", GLOBAL, token),
            None,
        )
        .await;
        assert_eq!(rest["items"][0]["name"], "c");
        assert!(rest.get("nextPageToken").is_none());

        let (status, one) = call(
            &app,
            Method::GET,
            &format!("{}/networks?filter=name%3D%22b%22", GLOBAL),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(one["items"].as_array().unwrap().len(), 1);
        assert_eq!(one["items"][0]["name"], "b");
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let (status, err) = call(&app(), Method::GET, &format!("{}/routers", GLOBAL), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"]["code"], 400);
    }
}
