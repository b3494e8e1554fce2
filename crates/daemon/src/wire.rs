//! Wire-name normalization
//!
//! Compute-style bodies arrive in camelCase, EC2-style ones in PascalCase.
//! Both are folded into the snake_case [`FieldMap`] the engine reads before
//! anything is dispatched.

use serde_json::{Map, Value};
use skymock_common::{Error, FieldMap, Filter, ListQuery, PageRequest, Result};
use std::collections::HashMap;

/// EC2 query-style singular names and the canonical field they feed
const AWS_ALIASES: &[(&str, &str)] = &[
    ("group_description", "description"),
    ("security_group_id", "security_group_ids"),
    ("type", "gateway_type"),
    ("resource_id", "resource_ids"),
    ("tag", "tags"),
    ("tag_key", "tag_keys"),
    ("filter", "filters"),
];

/// `IPProtocol` -> `ip_protocol`, `ipCidrRange` -> `ip_cidr_range`
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            let boundary = prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_lower);
            if boundary {
                out.push('_');
            }
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}

/// Rename object keys recursively. Label maps keep their user keys.
fn snake_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let key = snake_case(&k);
                    let v = if key == "labels" { v } else { snake_keys(v) };
                    (key, v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(snake_keys).collect()),
        other => other,
    }
}

/// Decode a request body; an empty body is an empty object
pub fn parse_body(body: &[u8]) -> Result<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| Error::invalid(format!("Malformed JSON body: {}", e)))
}

fn into_map(value: Value) -> Result<Map<String, Value>> {
    match snake_keys(value) {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(Error::invalid(format!(
            "request body must be an object, got {}",
            other
        ))),
    }
}

fn hoist(map: &mut Map<String, Value>, from: &[&str], to: &str) {
    if map.contains_key(to) {
        return;
    }
    let mut cursor = map.get(from[0]);
    for segment in &from[1..] {
        cursor = cursor.and_then(|v| match segment.parse::<usize>() {
            Ok(index) => v.get(index),
            Err(_) => v.get(*segment),
        });
    }
    if let Some(value) = cursor.cloned() {
        map.insert(to.to_string(), value);
    }
}

/// Compute-style body plus the scope segments of its path
pub fn gcp_request(body: Value, path: &HashMap<String, String>) -> Result<FieldMap> {
    let mut map = into_map(body)?;

    hoist(&mut map, &["routing_config", "routing_mode"], "routing_mode");
    hoist(&mut map, &["properties", "machine_type"], "machine_type");
    hoist(&mut map, &["properties", "network_interfaces", "0", "network"], "network");
    hoist(&mut map, &["properties", "tags", "items"], "tags_items");
    map.remove("routing_config");
    map.remove("properties");

    for scope in ["region", "zone"] {
        if let Some(value) = path.get(scope) {
            map.entry(scope.to_string())
                .or_insert_with(|| Value::String(value.clone()));
        }
    }
    Ok(map.into())
}

/// Query-string parameters of a Compute-style call
pub fn gcp_query(query: &HashMap<String, String>) -> FieldMap {
    query
        .iter()
        .map(|(k, v)| (snake_case(k), Value::String(v.clone())))
        .collect::<Map<_, _>>()
        .into()
}

/// Split an EC2-style body into its action name and canonical fields
pub fn aws_request(body: Value) -> Result<(String, FieldMap)> {
    let mut map = into_map(body)?;
    let action = match map.remove("action") {
        Some(Value::String(action)) => action,
        Some(other) => return Err(Error::invalid(format!("Invalid Action {}", other))),
        None => return Err(Error::MissingParameter("Action".to_string())),
    };

    // AttributeBooleanValue / AttributeValue wrappers
    for value in map.values_mut() {
        let unwrapped = match value {
            Value::Object(inner) if inner.len() == 1 => inner.remove("value"),
            _ => None,
        };
        if let Some(unwrapped) = unwrapped {
            *value = unwrapped;
        }
    }

    for (from, to) in AWS_ALIASES {
        if !map.contains_key(*to) {
            if let Some(value) = map.remove(*from) {
                map.insert(to.to_string(), value);
            }
        }
    }

    let specs = map
        .remove("tag_specifications")
        .or_else(|| map.remove("tag_specification"));
    if let Some(Value::Array(specs)) = specs {
        let tags: Vec<Value> = specs
            .iter()
            .filter_map(|spec| spec.get("tags").or_else(|| spec.get("tag")))
            .filter_map(Value::as_array)
            .flatten()
            .cloned()
            .collect();
        map.entry("tags".to_string()).or_insert(Value::Array(tags));
    }

    Ok((action, map.into()))
}

/// Build a list query from canonical fields.
///
/// `ids_field` names the explicit id list of an EC2 describe call; both its
/// plural and singular spelling are accepted.
pub fn list_query(fields: &FieldMap, ids_field: Option<&str>) -> Result<ListQuery> {
    let ids = match ids_field {
        Some(field) => match fields.str_list(&format!("{}s", field))? {
            Some(ids) => ids,
            None => fields.str_list(field)?.unwrap_or_default(),
        },
        None => Vec::new(),
    };

    let filters = fields
        .objects("filters")?
        .unwrap_or_default()
        .iter()
        .map(|f| {
            let values = match f.str_list("values")? {
                Some(values) => values,
                None => f.str_list("value")?.unwrap_or_default(),
            };
            Ok(Filter {
                name: f.require_str("name")?,
                values,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let max_results = match fields.i64("max_results")? {
        Some(n) if n < 0 => {
            return Err(Error::invalid(format!(
                "maxResults must not be negative, got {}",
                n
            )))
        }
        Some(n) => Some(n as usize),
        None => None,
    };
    let page_token = match fields.str("page_token")? {
        Some(token) => Some(token),
        None => fields.str("next_token")?,
    };

    Ok(ListQuery {
        ids,
        filters,
        expression: fields.str("filter")?,
        location: None,
        page: PageRequest {
            max_results,
            page_token,
        },
    })
}
