//! Filtering and pagination over in-memory collections
//!
//! Two filter styles are supported: EC2-style attribute filters
//! (`Filter.N.Name` / `Filter.N.Value.M` after flattening) and the restricted
//! `name = "value"` expression accepted by Compute-style list calls.

use crate::record::Record;
use crate::{Error, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};

/// One attribute filter: OR across `values`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

impl Filter {
    pub fn new(name: &str, values: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// Attribute values of a record under a filter name.
///
/// Tag and label filters apply to every kind; everything else is looked up
/// on the record itself. `None` means the name is not recognised.
fn attribute_values(record: &dyn Record, name: &str) -> Option<Vec<String>> {
    let labels = &record.meta().labels;
    if let Some(key) = name
        .strip_prefix("tag:")
        .or_else(|| name.strip_prefix("labels."))
    {
        return Some(labels.get(key).cloned().into_iter().collect());
    }
    match name {
        "tag-key" => Some(labels.keys().cloned().collect()),
        "tag-value" => Some(labels.values().cloned().collect()),
        _ => record.filter_values(name),
    }
}

/// Whether a record passes every recognised filter
pub fn matches(record: &dyn Record, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| {
        match attribute_values(record, &filter.name) {
            // unrecognised filter names are no-ops
            None => true,
            Some(actual) => filter
                .values
                .iter()
                .any(|wanted| actual.iter().any(|a| wildcard_match(wanted, a))),
        }
    })
}

/// Keep the records that pass every filter, in their original order
pub fn apply<R: Record>(records: Vec<R>, filters: &[Filter]) -> Vec<R> {
    if filters.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|r| matches(r, filters))
        .collect()
}

/// EC2 filter values treat `*` as any run and `?` as any single character
fn wildcard_match(pattern: &str, value: &str) -> bool {
    if !pattern.contains(['*', '?']) {
        return pattern == value;
    }
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    let (mut pi, mut vi) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while vi < v.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, vi));
            pi += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            vi = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

/// Parse a list filter of the form `name = "value"`.
///
/// Returns the wanted name, or `None` for an empty expression.
pub fn parse_name_expression(expression: &str) -> Result<Option<String>> {
    let expr = expression.trim();
    if expr.is_empty() {
        return Ok(None);
    }
    let invalid = || Error::invalid(format!("Invalid list filter expression '{}'", expression));

    let rest = expr.strip_prefix("name").ok_or_else(invalid)?;
    let rest = rest.trim_start().strip_prefix('=').ok_or_else(invalid)?;
    let value = rest.trim();

    let unquoted = match value.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let inner = value[1..].strip_suffix(quote).ok_or_else(invalid)?;
            if inner.contains(quote) {
                return Err(invalid());
            }
            inner
        }
        Some(_) if !value.contains(char::is_whitespace) && !value.contains(['"', '\'']) => value,
        _ => return Err(invalid()),
    };
    Ok(Some(unquoted.to_string()))
}

/// Pagination parameters of a list call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub max_results: Option<usize>,
    pub page_token: Option<String>,
}

/// One page of results
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_page_token: self.next_page_token,
        }
    }
}

fn encode_token(offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(format!("offset:{}", offset))
}

fn decode_token(token: &str) -> Result<usize> {
    let invalid = || Error::invalid(format!("Invalid page token '{}'", token));
    let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    text.strip_prefix("offset:")
        .and_then(|n| n.parse().ok())
        .ok_or_else(invalid)
}

/// Slice `[cursor, cursor + max)` out of `items`, preserving order
pub fn paginate<T>(items: Vec<T>, request: &PageRequest, default_size: usize) -> Result<Page<T>> {
    let size = match request.max_results {
        Some(0) => return Err(Error::invalid("maxResults must be greater than zero")),
        Some(n) => n,
        None => default_size.max(1),
    };
    let offset = match request.page_token.as_deref() {
        None | Some("") => 0,
        Some(token) => decode_token(token)?,
    };

    let total = items.len();
    let end = offset.saturating_add(size).min(total);
    let page: Vec<T> = items
        .into_iter()
        .skip(offset)
        .take(end.saturating_sub(offset))
        .collect();
    let next_page_token = (end < total).then(|| encode_token(end));

    Ok(Page {
        items: page,
        next_page_token,
    })
}
